use crate::demo::{run_evaluate, EvaluateArgs};
use crate::server;
use applicant_eval::error::AppError;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Applicant Evaluation Pipeline",
    about = "Run applicant evaluations and serve the execution monitor",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP status service (default command)
    Serve(ServeArgs),
    /// Evaluate applications from a CSV export (or the built-in demo applicants)
    Evaluate(EvaluateArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// School reference CSV used to enrich school records
    #[arg(long)]
    pub(crate) schools: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Evaluate(args) => run_evaluate(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["applicant-eval"]).expect("parses without arguments");
        assert!(cli.command.is_none());
    }

    #[test]
    fn evaluate_accepts_csv_paths() {
        let cli = Cli::try_parse_from([
            "applicant-eval",
            "evaluate",
            "--applications",
            "applicants.csv",
            "--schools",
            "schools.csv",
            "--application-id",
            "A-100",
        ])
        .expect("parses evaluate");

        match cli.command {
            Some(Command::Evaluate(args)) => {
                assert_eq!(
                    args.applications.as_deref(),
                    Some(std::path::Path::new("applicants.csv"))
                );
                assert_eq!(args.application_id.as_deref(), Some("A-100"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
