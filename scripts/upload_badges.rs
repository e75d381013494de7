use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use recorrido_admin::{
    blob::UrlExpiry,
    cli::{self, ConnectionArgs, DryRunArg},
    logging,
    session::Session,
    uploads::{load_badge_mapping, upload_badges, BadgeUpload, PLACES_COLLECTION},
    AppError,
};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "upload_badges",
    version,
    about = "Upload badge images listed in a placeId -> file mapping"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[arg(long, value_name = "COLLECTION", default_value = PLACES_COLLECTION)]
    collection: String,

    /// YYYY-MM-DD, <days>d or 'permanent'
    #[arg(long = "urlExpiry", value_name = "WHEN", default_value = "365d")]
    url_expiry: UrlExpiry,

    #[command(flatten)]
    dry_run: DryRunArg,

    /// JSON object mapping placeId to file name
    #[arg(value_name = "MAPPING")]
    mapping: PathBuf,

    /// Folder holding the mapped files
    #[arg(value_name = "FOLDER")]
    folder: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Cli = cli::parse_or_exit();
    let _guard = match logging::init("upload_badges", args.connection.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => return cli::finish(Err(err)),
    };
    cli::finish(run(args).await)
}

async fn run(args: Cli) -> Result<()> {
    if args.connection.bucket.is_none() {
        return Err(AppError::config("MISSING_BUCKET", "--bucket is required for this job.").into());
    }
    let mapping = load_badge_mapping(&args.mapping)?;
    let session = Session::open(&args.connection.session_config()?).await?;
    let request = BadgeUpload {
        collection: args.collection,
        url_expiry: args.url_expiry,
        dry_run: args.dry_run.dry_run,
        ..BadgeUpload::new(mapping, args.folder)
    };
    let report = upload_badges(&session, &request).await?;
    cli::emit_event(json!({
        "type": "summary",
        "dry_run": report.dry_run,
        "uploaded": report.uploaded,
        "missing": report.missing,
        "errors": report.errors,
    }));
    eprintln!("\nAll done. Linked {} badges.", report.uploaded.len());
    for missing in &report.missing {
        eprintln!("  File not found: {missing}");
    }
    Ok(())
}
