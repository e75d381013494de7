use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{ArgAction, Parser};
use recorrido_admin::{
    blob::UrlExpiry,
    cli::{self, ConnectionArgs, DryRunArg},
    logging,
    migration::{run_migration, MigrationOptions, MigrationProgress, MigrationReport},
    session::Session,
    store::DEFAULT_PAGE_SIZE,
};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "migrate_collection",
    version,
    about = "Copy every document of one collection into another, relocating images"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[arg(long, value_name = "COLLECTION", default_value = "places")]
    from: String,

    #[arg(long, value_name = "COLLECTION", default_value = "estaciones")]
    to: String,

    /// Copy objects under <from>/ to <to>/ and mint new URLs
    #[arg(
        long = "copyStorage",
        value_name = "BOOL",
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = cli::parse_flag
    )]
    copy_storage: bool,

    #[command(flatten)]
    dry_run: DryRunArg,

    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    #[arg(long = "pageSize", value_name = "N", default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// YYYY-MM-DD, <days>d or 'permanent'
    #[arg(long = "urlExpiry", value_name = "WHEN", default_value = "2499-12-31")]
    url_expiry: UrlExpiry,

    /// Skip documents already marked as migrated to <to>
    #[arg(long)]
    resume: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Cli = cli::parse_or_exit();
    let _guard = match logging::init("migrate_collection", args.connection.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => return cli::finish(Err(err)),
    };
    cli::finish(run(args).await)
}

async fn run(args: Cli) -> Result<()> {
    let options = MigrationOptions {
        source: args.from,
        destination: args.to,
        copy_storage: args.copy_storage,
        dry_run: args.dry_run.dry_run,
        limit: args.limit,
        page_size: args.page_size,
        url_expiry: args.url_expiry,
        skip_migrated: args.resume,
    };
    options.validate()?;
    let session = Session::open(&args.connection.session_config()?).await?;

    let progress: Arc<dyn Fn(MigrationProgress) + Send + Sync> = Arc::new(|progress| {
        cli::emit_event(json!({
            "type": "progress",
            "id": progress.id,
            "outcome": progress.outcome,
            "scanned": progress.scanned,
            "migrated": progress.migrated,
            "skipped": progress.skipped,
            "failed": progress.failed,
            "limit": progress.limit,
        }));
    });

    let report = run_migration(&session, &options, Some(progress)).await?;
    emit_summary_event(&report);
    print_human_summary(&report);
    Ok(())
}

fn emit_summary_event(report: &MigrationReport) {
    cli::emit_event(json!({
        "type": "summary",
        "source": report.source,
        "destination": report.destination,
        "dry_run": report.dry_run,
        "scanned": report.scanned,
        "migrated_count": report.migrated_count,
        "skipped": report.skipped,
        "relocated_images": report.relocated_images,
        "rewritten_paths": report.rewritten_paths,
        "errors": report.errors,
        "elapsed_ms": report.elapsed_ms,
    }));
}

fn print_human_summary(report: &MigrationReport) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    eprintln!("\nMigration {} -> {}{mode}", report.source, report.destination);
    eprintln!("  Scanned:   {}", report.scanned);
    eprintln!("  Migrated:  {}", report.migrated_count);
    eprintln!("  Skipped:   {}", report.skipped);
    eprintln!("  Relocated: {}", report.relocated_images);
    eprintln!("  Rewritten: {}", report.rewritten_paths);
    eprintln!("  Failed:    {}", report.errors.len());
    for failure in &report.errors {
        eprintln!("    {} [{}] {}", failure.id, failure.code, failure.reason);
    }
    eprintln!("  Elapsed:   {:.2}s", report.elapsed_ms as f64 / 1000.0);
}
