use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use recorrido_admin::{
    cli::{self, ConnectionArgs, DryRunArg},
    display_name::{sync_display_names, DisplayNameReport},
    logging,
    session::Session,
};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "sync_displayname",
    version,
    about = "Align users.displayName with users.nombre"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(flatten)]
    dry_run: DryRunArg,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Cli = cli::parse_or_exit();
    let _guard = match logging::init("sync_displayname", args.connection.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => return cli::finish(Err(err)),
    };
    cli::finish(run(args).await)
}

async fn run(args: Cli) -> Result<()> {
    let session = Session::open(&args.connection.session_config()?).await?;
    let report = sync_display_names(&session, args.dry_run.dry_run).await?;
    cli::emit_event(json!({
        "type": "summary",
        "dry_run": report.dry_run,
        "total": report.total,
        "updated": report.updated,
        "skipped": report.skipped,
        "batches": report.batches,
        "changes": report.changes,
    }));
    print_human_summary(&report);
    Ok(())
}

fn print_human_summary(report: &DisplayNameReport) {
    if report.total == 0 {
        eprintln!("\nNo users found");
        return;
    }
    let mode = if report.dry_run { " (dry run)" } else { "" };
    eprintln!("\nDisplay names{mode}");
    for change in &report.changes {
        eprintln!(
            "  {}: {:?} -> {:?}",
            change.id,
            change.previous.as_deref().unwrap_or(""),
            change.display_name
        );
    }
    eprintln!("  Updated:   {}", report.updated);
    eprintln!("  Skipped:   {}", report.skipped);
    eprintln!("  Total:     {}", report.total);
}
