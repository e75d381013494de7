use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use recorrido_admin::{
    cli::{self, ConnectionArgs},
    logging,
    session::Session,
    storage_sync::{sync_storage_urls, StorageSyncReport},
    AppError,
};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "sync_storage_urls",
    version,
    about = "Set users.photoURL and users.backgroundURL from the images in storage"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Sync a single user instead of every user with a storage folder
    #[arg(value_name = "UID")]
    uid: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Cli = cli::parse_or_exit();
    let _guard = match logging::init("sync_storage_urls", args.connection.log_dir.as_deref()) {
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
    let report = sync_storage_urls(&session, args.uid.as_deref()).await?;
    cli::emit_event(json!({
        "type": "summary",
        "users": report.users,
        "updated": report.updated,
        "without_images": report.without_images,
        "errors": report.errors,
    }));
    print_human_summary(&report);
    Ok(())
}

fn print_human_summary(report: &StorageSyncReport) {
    eprintln!("\nStorage URL sync");
    eprintln!("  Users:          {}", report.users);
    eprintln!("  Updated:        {}", report.updated);
    eprintln!("  Without images: {}", report.without_images);
    eprintln!("  Failed:         {}", report.errors.len());
}
