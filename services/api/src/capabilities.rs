//! Rule-based step capabilities used by the CLI and the HTTP service. They stand in for the
//! model-backed analyzers and produce the same output shapes.

use applicant_eval::agents::{StepCapability, StepContext, StepError, StepOutput};
use serde_json::{json, Value};

pub(crate) const TRANSCRIPT_PARSER: &str = "transcript_parser";
pub(crate) const ESSAY_ANALYZER: &str = "essay_analyzer";
pub(crate) const RECOMMENDATION_READER: &str = "recommendation_reader";
pub(crate) const STUDENT_EVALUATOR: &str = "student_evaluator";

const RULES_MODEL: &str = "rules-v1";

const GRADE_POINTS: [(&str, f64); 12] = [
    ("A+", 4.0),
    ("A", 4.0),
    ("A-", 3.7),
    ("B+", 3.3),
    ("B", 3.0),
    ("B-", 2.7),
    ("C+", 2.3),
    ("C", 2.0),
    ("C-", 1.7),
    ("D+", 1.3),
    ("D", 1.0),
    ("F", 0.0),
];

const ESSAY_THEMES: [(&str, &[&str]); 5] = [
    ("leadership", &["led", "lead", "captain", "organized", "founded"]),
    ("service", &["volunteer", "community", "tutored", "mentor", "helped"]),
    ("research", &["research", "experiment", "lab", "built", "prototype"]),
    ("resilience", &["overcame", "despite", "struggled", "setback", "persevered"]),
    ("creativity", &["designed", "wrote", "composed", "invented", "painted"]),
];

const SHORT_ESSAY_WORDS: usize = 150;

const ENDORSEMENT_WORDS: [&str; 7] = [
    "exceptional",
    "outstanding",
    "brilliant",
    "remarkable",
    "highly recommend",
    "best student",
    "top",
];
const CONCERN_WORDS: [&str; 4] = ["however", "concern", "inconsistent", "struggles"];

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn grade_points(grade: &str) -> Option<f64> {
    GRADE_POINTS
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(grade))
        .map(|(_, points)| *points)
}

/// Parses "Course Grade" entries separated by commas, semicolons, or newlines.
pub(crate) struct TranscriptParser;

impl StepCapability for TranscriptParser {
    fn run(&self, context: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let transcript = context
            .application
            .transcript
            .as_deref()
            .ok_or_else(|| StepError::MissingInput("transcript".to_string()))?;

        let mut courses = Vec::new();
        let mut points = Vec::new();
        let mut advanced = 0;
        for entry in transcript.split([',', ';', '\n']) {
            let entry = entry.trim();
            let Some((course, grade)) = entry.rsplit_once(char::is_whitespace) else {
                continue;
            };
            let Some(value) = grade_points(grade.trim()) else {
                continue;
            };
            let course = course.trim();
            if course.starts_with("AP ") || course.starts_with("IB ") || course.contains("Honors") {
                advanced += 1;
            }
            points.push(value);
            courses.push(json!({ "course": course, "grade": grade.trim().to_ascii_uppercase() }));
        }

        if courses.is_empty() {
            return Ok(StepOutput::new(json!({
                "error": "no graded courses found in transcript",
            })));
        }

        let gpa = (points.iter().sum::<f64>() / points.len() as f64 * 100.0).round() / 100.0;
        Ok(StepOutput::new(json!({
            "courses": courses,
            "gpa": gpa,
            "advanced_courses": advanced,
            "summary": format!("{} graded courses, GPA {gpa:.2}.", courses.len()),
        }))
        .with_source(RULES_MODEL))
    }

    fn model(&self) -> Option<&str> {
        Some(RULES_MODEL)
    }
}

/// Word count and theme detection.
pub(crate) struct EssayAnalyzer;

impl StepCapability for EssayAnalyzer {
    fn run(&self, context: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let essay = context
            .application
            .essay
            .as_deref()
            .filter(|essay| !essay.trim().is_empty())
            .ok_or_else(|| StepError::MissingInput("essay".to_string()))?;

        let lowered = essay.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();
        let themes: Vec<&str> = ESSAY_THEMES
            .iter()
            .filter(|(_, cues)| cues.iter().any(|cue| words.contains(cue)))
            .map(|(theme, _)| *theme)
            .collect();

        let length_points = (words.len() / 10).min(25) as f64;
        let score = (50.0 + length_points + 5.0 * themes.len() as f64).min(100.0);

        let mut risks = Vec::new();
        if words.len() < SHORT_ESSAY_WORDS {
            risks.push(format!("essay under {SHORT_ESSAY_WORDS} words"));
        }
        if themes.is_empty() {
            risks.push("no clear personal narrative".to_string());
        }

        Ok(StepOutput::new(json!({
            "word_count": words.len(),
            "themes": themes,
            "score": score,
            "strengths": themes,
            "risks": risks,
        }))
        .with_source(RULES_MODEL))
    }

    fn model(&self) -> Option<&str> {
        Some(RULES_MODEL)
    }
}

/// Rates the strength of the recommendation letter.
pub(crate) struct RecommendationReader;

impl StepCapability for RecommendationReader {
    fn run(&self, context: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let letter = context
            .application
            .recommendation_text
            .as_deref()
            .ok_or_else(|| StepError::MissingInput("recommendation letter".to_string()))?
            .to_lowercase();

        let praise = ENDORSEMENT_WORDS
            .iter()
            .filter(|phrase| letter.contains(*phrase))
            .count();
        let concerns = CONCERN_WORDS
            .iter()
            .filter(|phrase| letter.contains(*phrase))
            .count();

        let endorsement = match (praise, concerns) {
            (p, 0) if p >= 2 => "strong",
            (p, _) if p >= 1 => "moderate",
            _ => "weak",
        };

        Ok(StepOutput::new(json!({
            "endorsement": endorsement,
            "praise_signals": praise,
            "concern_signals": concerns,
        }))
        .with_summary(format!("Recommender endorsement is {endorsement}."))
        .with_source(RULES_MODEL))
    }

    fn model(&self) -> Option<&str> {
        Some(RULES_MODEL)
    }
}

/// Final scoring step. Reads the transcript and essay outputs, the optional recommendation
/// output, and the school context when it is ready.
pub(crate) struct StudentEvaluator;

impl StepCapability for StudentEvaluator {
    fn run(&self, context: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let gpa = context
            .prior(TRANSCRIPT_PARSER)
            .and_then(|output| output.get("gpa"))
            .and_then(Value::as_f64)
            .ok_or_else(|| StepError::MissingInput("transcript GPA".to_string()))?;
        let essay_score = context
            .prior(ESSAY_ANALYZER)
            .and_then(|output| output.get("score"))
            .and_then(Value::as_f64);
        let endorsement = context
            .prior(RECOMMENDATION_READER)
            .and_then(|output| output.get("endorsement"))
            .and_then(Value::as_str);

        let mut strengths = Vec::new();
        let mut risks = Vec::new();
        let mut score = gpa / 4.0 * 60.0;

        let school = context.school.filter(|school| school.ready);
        let school_note = match school.and_then(|school| school.record.as_ref()) {
            Some(record) => {
                if record.opportunity_score < 50.0 && gpa >= 3.5 {
                    score += 5.0;
                    strengths.push(format!("excels at {}", record.school_name));
                }
                if record.ap_course_count == 0 {
                    risks.push("no AP courses offered; rigor judged against school".to_string());
                }
                json!({
                    "school_name": record.school_name,
                    "opportunity_score": record.opportunity_score,
                    "ap_course_count": record.ap_course_count,
                })
            }
            None => {
                risks.push("school context unavailable".to_string());
                Value::Null
            }
        };

        match essay_score {
            Some(essay) => {
                score += essay * 0.3;
                if essay >= 75.0 {
                    strengths.push("compelling essay".to_string());
                }
            }
            None => {
                score += 15.0;
                risks.push("essay not analyzed".to_string());
            }
        }

        match endorsement {
            Some("strong") => {
                score += 10.0;
                strengths.push("strong recommendation".to_string());
            }
            Some("moderate") => score += 5.0,
            Some(_) => risks.push("lukewarm recommendation".to_string()),
            None => {}
        }

        if gpa >= 3.7 {
            strengths.push(format!("GPA {gpa:.1}"));
        } else if gpa < 3.0 {
            risks.push(format!("GPA {gpa:.1}"));
        }

        let score = round1(score.clamp(0.0, 100.0));
        let recommendation = if score >= 80.0 {
            "Admit"
        } else if score >= 65.0 {
            "Waitlist"
        } else {
            "Decline"
        };
        let rationale = format!(
            "Weighted score {score:.1} from GPA {gpa:.2}{}.",
            match essay_score {
                Some(essay) => format!(" and essay score {essay:.0}"),
                None => String::new(),
            }
        );

        Ok(StepOutput::new(json!({
            "overall_score": score,
            "recommendation": recommendation,
            "rationale": rationale,
            "top_strengths": strengths,
            "top_risks": risks,
            "school_context": school_note,
        }))
        .with_source(RULES_MODEL))
    }

    fn model(&self) -> Option<&str> {
        Some(RULES_MODEL)
    }
}
