//! Gamebot - process kernel for an inline-games Telegram bot.
//!
//! A single positional argument selects the operating mode: webhook
//! management (`set`/`unset`/`info`), one inbound-update server (`handle`),
//! a one-shot scheduled-job run (`cron`), storage schema creation
//! (`install`), or one of the two continuous loops (`loop`, `worker`).
//!
//! ## Architecture
//!
//! - `config` - environment defaults plus an optional JSON override
//! - `kernel` - mode table and dispatch
//! - `validate` - inbound request authenticity checks
//! - `webhook` - registration calls and the inbound HTTP listener
//! - `cron` - lock-guarded scheduled-job runner
//! - `runtime` - polling and worker loop drivers
//! - `telegram` - platform client seam (teloxide-backed)
//! - `database` - MongoDB storage collaborator

mod config;
mod cron;
mod database;
mod error;
mod kernel;
mod runtime;
mod telegram;
mod utils;
mod validate;
mod webhook;

use std::path::Path;
use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use config::Config;
use kernel::{ExitOutcome, Kernel};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gamebot=info,teloxide=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let override_path =
        std::env::var("BOT_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = Config::load(Path::new(&override_path));

    let arg = std::env::args().nth(1).unwrap_or_default();

    match Kernel::new(config).dispatch(&arg).await {
        Ok(ExitOutcome::Success) => ExitCode::SUCCESS,
        Ok(ExitOutcome::Usage) => ExitCode::FAILURE,
        Err(err) => {
            // Sole process-exit decision point; handlers only return errors.
            error!(error = %err, "mode handler failed");
            ExitCode::FAILURE
        }
    }
}
