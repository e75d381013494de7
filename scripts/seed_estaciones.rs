use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use recorrido_admin::{
    cli::{self, ConnectionArgs, DryRunArg},
    logging,
    seed::{builtin_fixtures, load_fixtures, seed_estaciones},
    session::Session,
    uploads::PLACES_COLLECTION,
};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "seed_estaciones",
    version,
    about = "Create the development fixture stations"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[arg(long, value_name = "COLLECTION", default_value = PLACES_COLLECTION)]
    collection: String,

    /// JSON array of documents to create instead of the built-in stations
    #[arg(long, value_name = "PATH")]
    fixtures: Option<PathBuf>,

    #[command(flatten)]
    dry_run: DryRunArg,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Cli = cli::parse_or_exit();
    let _guard = match logging::init("seed_estaciones", args.connection.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => return cli::finish(Err(err)),
    };
    cli::finish(run(args).await)
}

async fn run(args: Cli) -> Result<()> {
    let fixtures = match args.fixtures.as_deref() {
        Some(path) => load_fixtures(path)?,
        None => builtin_fixtures()?,
    };
    let session = Session::open(&args.connection.session_config()?).await?;
    let report = seed_estaciones(
        &session,
        Some(args.collection.as_str()),
        fixtures,
        args.dry_run.dry_run,
    )
    .await?;
    cli::emit_event(json!({
        "type": "summary",
        "collection": report.collection,
        "dry_run": report.dry_run,
        "created": report.created,
    }));
    for doc in &report.created {
        eprintln!(
            "Created \"{}\" with ID: {}",
            doc.name,
            doc.id.as_deref().unwrap_or("(dry run)")
        );
    }
    eprintln!("Created {} documents in {}", report.created.len(), report.collection);
    Ok(())
}
