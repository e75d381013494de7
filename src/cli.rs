//! Flag conventions shared by the job binaries.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser};
use serde_json::Value;
use tracing::error;

use crate::config::{DataLayout, ServiceAccount, SessionConfig, BUCKET_ENV, CREDENTIALS_ENV};
use crate::error::{EXIT_OK, EXIT_RUNTIME, EXIT_USAGE};
use crate::AppError;

/// Credentials, bucket and log sink. Flattened into every job that talks to
/// the stores.
#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    /// Service-account key file
    #[arg(
        long = "serviceAccount",
        alias = "sa",
        value_name = "PATH",
        env = CREDENTIALS_ENV
    )]
    pub service_account: PathBuf,

    /// Storage bucket name
    #[arg(long, value_name = "NAME", env = BUCKET_ENV)]
    pub bucket: Option<String>,

    /// Overrides the project named in the key file
    #[arg(long = "projectId", value_name = "ID")]
    pub project_id: Option<String>,

    /// Also append JSON logs to <DIR>/<job>.log
    #[arg(long = "logDir", value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

impl ConnectionArgs {
    pub fn session_config(&self) -> Result<SessionConfig, AppError> {
        Ok(SessionConfig {
            account: ServiceAccount::load(&self.service_account)?,
            project_id: self.project_id.clone(),
            bucket: self.bucket.clone().filter(|b| !b.trim().is_empty()),
            layout: DataLayout::from_env()?,
        })
    }
}

/// `--dryRun true`, `--dryRun=false` and bare `--dryRun` all work.
#[derive(Debug, Clone, Copy, Args)]
pub struct DryRunArg {
    #[arg(
        long = "dryRun",
        value_name = "BOOL",
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = parse_flag
    )]
    pub dry_run: bool,
}

pub fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        other => Err(format!("expected true or false, got '{other}'")),
    }
}

/// Parse the command line. Usage errors exit with status 1; `--help` and
/// `--version` exit 0.
pub fn parse_or_exit<T: Parser>() -> T {
    match T::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { EXIT_USAGE } else { EXIT_OK };
            let _ = err.print();
            std::process::exit(i32::from(code));
        }
    }
}

/// Print one machine-readable record on stdout.
pub fn emit_event(event: Value) {
    println!("{event}");
}

/// Exit status for an error escaping a job, taken from the first structured
/// error in the chain.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<AppError>())
        .map(AppError::exit_code)
        .unwrap_or(EXIT_RUNTIME)
}

/// Map a job result to the process exit status, reporting failures on stderr.
pub fn finish(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code_for(&err);
            let app = AppError::from(err);
            error!(
                target: "recorrido_admin",
                event = "job_failed",
                code = %app.code(),
                exit_code = code,
                error = %app,
            );
            eprintln!("error: {}", format_cli_error(&app));
            ExitCode::from(code)
        }
    }
}

/// One-line operator message; walks the cause chain.
pub fn format_cli_error(err: &AppError) -> String {
    let mut line = format!("{} [{}]", err.message(), err.code());
    let mut cause = err.cause();
    while let Some(inner) = cause {
        line.push_str(&format!(": {} [{}]", inner.message(), inner.code()));
        cause = inner.cause();
    }
    line
}
