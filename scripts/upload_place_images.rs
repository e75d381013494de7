use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use recorrido_admin::{
    blob::UrlExpiry,
    cli::{self, ConnectionArgs, DryRunArg},
    logging,
    session::Session,
    uploads::{upload_place_images, PlaceImageUpload, UploadReport, PLACES_COLLECTION},
    AppError,
};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "upload_place_images",
    version,
    about = "Upload images for one place and append them to its imagenes list"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[arg(long = "placeId", value_name = "ID")]
    place_id: String,

    #[arg(long, value_name = "COLLECTION", default_value = PLACES_COLLECTION)]
    collection: String,

    /// YYYY-MM-DD, <days>d or 'permanent'
    #[arg(long = "urlExpiry", value_name = "WHEN", default_value = "2499-12-31")]
    url_expiry: UrlExpiry,

    #[command(flatten)]
    dry_run: DryRunArg,

    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Cli = cli::parse_or_exit();
    let _guard = match logging::init("upload_place_images", args.connection.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => return cli::finish(Err(err)),
    };
    cli::finish(run(args).await)
}

async fn run(args: Cli) -> Result<()> {
    if args.connection.bucket.is_none() {
        return Err(AppError::config("MISSING_BUCKET", "--bucket is required for this job.").into());
    }
    let session = Session::open(&args.connection.session_config()?).await?;
    let request = PlaceImageUpload {
        collection: args.collection,
        place_id: args.place_id,
        files: args.files,
        url_expiry: args.url_expiry,
        dry_run: args.dry_run.dry_run,
    };
    let report = upload_place_images(&session, &request).await?;
    emit_summary_event(&report);
    eprintln!("\nDone. Uploaded {} files.", report.uploaded.len());
    if !report.missing.is_empty() {
        eprintln!("  Missing: {}", report.missing.join(", "));
    }
    Ok(())
}

fn emit_summary_event(report: &UploadReport) {
    cli::emit_event(json!({
        "type": "summary",
        "dry_run": report.dry_run,
        "uploaded": report.uploaded,
        "missing": report.missing,
        "errors": report.errors,
    }));
}
