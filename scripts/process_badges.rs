use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use recorrido_admin::{
    badge_image::{process_badges, BadgeReport},
    cli, logging,
};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "process_badges",
    version,
    about = "Crop badge PNGs to circles with a transparent background"
)]
struct Cli {
    /// Folder holding the badge PNGs; output goes to <FOLDER>/_procesadas
    #[arg(value_name = "FOLDER")]
    folder: PathBuf,

    /// Only these file names (default: every PNG in the folder)
    #[arg(value_name = "FILE")]
    files: Vec<String>,

    #[arg(long = "logDir", value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Cli = cli::parse_or_exit();
    let _guard = match logging::init("process_badges", args.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => return cli::finish(Err(err)),
    };
    cli::finish(run(args))
}

fn run(args: Cli) -> Result<()> {
    let files = (!args.files.is_empty()).then_some(args.files);
    let report = process_badges(&args.folder, files)?;
    cli::emit_event(json!({
        "type": "summary",
        "output_dir": report.output_dir,
        "requested": report.requested,
        "processed": report.processed,
        "missing": report.missing,
        "failed": report.failed,
    }));
    print_human_summary(&report);
    Ok(())
}

fn print_human_summary(report: &BadgeReport) {
    eprintln!(
        "\nProcessed {}/{} badges into {}",
        report.processed, report.requested, report.output_dir
    );
    for missing in &report.missing {
        eprintln!("  File not found: {missing}");
    }
    for failure in &report.failed {
        eprintln!("  {} [{}] {}", failure.file, failure.code, failure.reason);
    }
}
