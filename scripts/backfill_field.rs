use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use recorrido_admin::{
    backfill::{run_backfill, BackfillOptions, BackfillReport},
    cli::{self, ConnectionArgs, DryRunArg},
    logging,
    session::Session,
    store::DEFAULT_PAGE_SIZE,
    AppError,
};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(
    name = "backfill_field",
    version,
    about = "Add a field with a default value to documents that lack it"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[arg(long, value_name = "COLLECTION", default_value = "estaciones")]
    collection: String,

    #[arg(long, value_name = "NAME", default_value = "insigniaID")]
    field: String,

    /// JSON literal written into the field
    #[arg(long, value_name = "JSON", default_value = "null")]
    value: String,

    #[command(flatten)]
    dry_run: DryRunArg,

    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    #[arg(long = "pageSize", value_name = "N", default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Cli = cli::parse_or_exit();
    let _guard = match logging::init("backfill_field", args.connection.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => return cli::finish(Err(err)),
    };
    cli::finish(run(args).await)
}

async fn run(args: Cli) -> Result<()> {
    let value: Value = serde_json::from_str(&args.value).map_err(|err| {
        AppError::config("INVALID_VALUE", "--value must be a JSON literal.")
            .with_context("value", args.value.clone())
            .with_cause(err)
    })?;
    let options = BackfillOptions {
        collection: args.collection,
        field: args.field,
        value,
        dry_run: args.dry_run.dry_run,
        limit: args.limit,
        page_size: args.page_size,
    };
    options.validate()?;
    let session = Session::open(&args.connection.session_config()?).await?;
    let report = run_backfill(&session, &options).await?;
    emit_summary_event(&report);
    print_human_summary(&report);
    Ok(())
}

fn emit_summary_event(report: &BackfillReport) {
    cli::emit_event(json!({
        "type": "summary",
        "collection": report.collection,
        "field": report.field,
        "dry_run": report.dry_run,
        "scanned": report.scanned,
        "updated": report.updated,
        "skipped": report.skipped,
        "errors": report.errors,
    }));
}

fn print_human_summary(report: &BackfillReport) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    eprintln!("\nBackfill {}.{}{mode}", report.collection, report.field);
    eprintln!("  Scanned:   {}", report.scanned);
    eprintln!("  Updated:   {}", report.updated);
    eprintln!("  Skipped:   {}", report.skipped);
    eprintln!("  Failed:    {}", report.errors.len());
}
