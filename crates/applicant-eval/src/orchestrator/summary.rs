//! Human-readable step summaries and the decision-relevant fields pulled to the top level.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::aggregate::StepRecord;
use crate::domain::StepId;

const SCORE_KEYS: [&str; 3] = ["overall_score", "score", "total_score"];
const RECOMMENDATION_KEYS: [&str; 2] = ["recommendation", "decision"];
const RATIONALE_KEYS: [&str; 4] = ["rationale", "summary", "overall_assessment", "reasoning"];
const STRENGTH_KEYS: [&str; 3] = ["top_strengths", "strengths", "key_strengths"];
const RISK_KEYS: [&str; 4] = ["top_risks", "risks", "concerns", "weaknesses"];

const MAX_SUMMARY_SENTENCES: usize = 3;
const MAX_LIST_ITEMS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopLevelSummary {
    pub score: Option<f64>,
    pub recommendation: Option<String>,
    pub strengths: Vec<String>,
    pub risks: Vec<String>,
}

/// Build a short summary from the scalar fields of a step output: recommendation, score,
/// rationale, strengths, risks. Each part is cut to one sentence; at most three are kept.
pub fn synthesize_summary(output: &Value) -> Option<String> {
    let mut sentences = Vec::new();

    if let Some(recommendation) = first_text(output, &RECOMMENDATION_KEYS) {
        sentences.push(format!("Recommendation: {}", first_sentence(&recommendation)));
    }
    if let Some(score) = first_number(output, &SCORE_KEYS) {
        sentences.push(format!("Score: {}.", format_score(score)));
    }
    if let Some(rationale) = first_text(output, &RATIONALE_KEYS) {
        sentences.push(first_sentence(&rationale));
    }
    let strengths = first_list(output, &STRENGTH_KEYS);
    if !strengths.is_empty() {
        sentences.push(first_sentence(&format!("Strengths: {}", strengths.join(", "))));
    }
    let risks = first_list(output, &RISK_KEYS);
    if !risks.is_empty() {
        sentences.push(first_sentence(&format!("Risks: {}", risks.join(", "))));
    }

    if sentences.is_empty() {
        return None;
    }
    sentences.truncate(MAX_SUMMARY_SENTENCES);
    Some(sentences.join(" "))
}

/// Most decision-relevant fields across completed steps. Later steps win, so a final
/// scoring step overrides scores reported by earlier analysis steps.
pub(crate) fn extract_top_level(
    completed: &[StepId],
    steps: &BTreeMap<StepId, StepRecord>,
) -> TopLevelSummary {
    let mut summary = TopLevelSummary::default();

    for output in completed
        .iter()
        .rev()
        .filter_map(|id| steps.get(id))
        .filter_map(|record| record.output.as_ref())
    {
        if summary.score.is_none() {
            summary.score = first_number(output, &SCORE_KEYS);
        }
        if summary.recommendation.is_none() {
            summary.recommendation = first_text(output, &RECOMMENDATION_KEYS);
        }
        if summary.strengths.is_empty() {
            summary.strengths = first_list(output, &STRENGTH_KEYS);
        }
        if summary.risks.is_empty() {
            summary.risks = first_list(output, &RISK_KEYS);
        }
    }

    summary
}

fn first_text(output: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| output.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

fn first_number(output: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().filter_map(|key| output.get(*key)).find_map(|value| match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn first_list(output: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter_map(|key| output.get(*key))
        .map(|value| match value {
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .take(MAX_LIST_ITEMS)
                .map(str::to_string)
                .collect(),
            Value::String(text) if !text.trim().is_empty() => vec![text.trim().to_string()],
            _ => Vec::new(),
        })
        .find(|items: &Vec<String>| !items.is_empty())
        .unwrap_or_default()
}

/// Text up to and including the first sentence terminator, with a period added if missing.
fn first_sentence(text: &str) -> String {
    let text = text.trim();
    let end = text
        .char_indices()
        .find(|&(index, ch)| {
            matches!(ch, '.' | '!' | '?')
                && text[index + ch.len_utf8()..]
                    .chars()
                    .next()
                    .map_or(true, char::is_whitespace)
        })
        .map(|(index, ch)| index + ch.len_utf8());

    match end {
        Some(end) => text[..end].to_string(),
        None => format!("{text}."),
    }
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{score:.0}")
    } else {
        format!("{score:.1}")
    }
}
