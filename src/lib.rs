//! Administrative jobs for the Tu Recorrido document store and image bucket.
//!
//! Every job opens a [`session::Session`] explicitly, walks its collection
//! sequentially and reports per-item failures in a summary instead of
//! aborting. The binaries under `scripts/` are thin `clap` wrappers around
//! the functions exported here.

pub mod backfill;
pub mod badge_image;
pub mod blob;
pub mod cli;
pub mod config;
pub mod display_name;
pub mod document;
pub mod error;
pub mod logging;
pub mod migration;
pub mod seed;
pub mod session;
pub mod storage_sync;
pub mod store;
pub mod time;
pub mod uploads;

pub use error::{AppError, AppResult, Result};
