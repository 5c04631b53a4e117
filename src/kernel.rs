//! Mode dispatch: maps the invocation argument to a handler.
//!
//! The mode set is a closed enum bound to handlers through a static table,
//! so an unknown argument cannot reach a handler and the help text is
//! generated from the same table it documents.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::cron::lock::FileLock;
use crate::cron::ScheduledJobRunner;
use crate::database::{Database, StorageJobExecutor};
use crate::error::KernelError;
use crate::runtime::{PollingLoop, WorkerLoop};
use crate::telegram::{TelegramClient, TracingSink, UpdateSink};
use crate::validate::RequestValidator;
use crate::webhook::{server, WebhookController};

/// Operating modes of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Help,
    Set,
    Unset,
    Info,
    Install,
    Handle,
    Cron,
    Loop,
    Worker,
}

struct ModeEntry {
    name: &'static str,
    mode: Mode,
    description: &'static str,
    hidden: bool,
}

const MODES: &[ModeEntry] = &[
    ModeEntry {
        name: "help",
        mode: Mode::Help,
        description: "Shows this help message",
        hidden: false,
    },
    ModeEntry {
        name: "set",
        mode: Mode::Set,
        description: "Sets the webhook",
        hidden: false,
    },
    ModeEntry {
        name: "unset",
        mode: Mode::Unset,
        description: "Deletes the webhook",
        hidden: false,
    },
    ModeEntry {
        name: "info",
        mode: Mode::Info,
        description: "Prints webhook status request result",
        hidden: false,
    },
    ModeEntry {
        name: "install",
        mode: Mode::Install,
        description: "Creates the storage schema",
        hidden: false,
    },
    ModeEntry {
        name: "handle",
        mode: Mode::Handle,
        description: "Handles incoming webhook updates",
        hidden: false,
    },
    ModeEntry {
        name: "cron",
        mode: Mode::Cron,
        description: "Runs scheduled commands once",
        hidden: false,
    },
    ModeEntry {
        name: "loop",
        mode: Mode::Loop,
        description: "Runs using getUpdates in a loop",
        hidden: false,
    },
    ModeEntry {
        name: "worker",
        mode: Mode::Worker,
        description: "Runs scheduled commands every minute",
        hidden: false,
    },
    // Legacy alias, kept dispatchable but out of the help text.
    ModeEntry {
        name: "getupdates",
        mode: Mode::Loop,
        description: "",
        hidden: true,
    },
];

/// Case-insensitive, whitespace-tolerant mode lookup.
fn lookup(arg: &str) -> Option<&'static ModeEntry> {
    let needle = arg.trim().to_lowercase();
    MODES.iter().find(|entry| entry.name == needle)
}

/// What the dispatched invocation amounted to, decided at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,

    /// Missing or unrecognized argument; help was printed.
    Usage,
}

/// Top-level kernel: owns the configuration and wires collaborators per mode.
pub struct Kernel {
    config: Config,
}

impl Kernel {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Dispatch the invocation argument to its mode handler.
    ///
    /// Handler errors propagate to the caller; deciding process exit
    /// behaviour is the boundary's job, not a library concern.
    pub async fn dispatch(&self, arg: &str) -> Result<ExitOutcome, KernelError> {
        let Some(entry) = lookup(arg) else {
            print!("{}", self.help_text());
            if arg.trim().is_empty() {
                println!("ERROR: No parameter specified!");
            } else {
                println!("ERROR: Invalid parameter specified!");
            }
            return Ok(ExitOutcome::Usage);
        };

        match entry.mode {
            Mode::Help => {
                print!("{}", self.help_text());
                Ok(ExitOutcome::Success)
            }
            Mode::Set => {
                self.webhook_controller()?.register().await?;
                Ok(ExitOutcome::Success)
            }
            Mode::Unset => {
                self.webhook_controller()?.deregister().await?;
                Ok(ExitOutcome::Success)
            }
            Mode::Info => {
                self.webhook_controller()?.status().await?;
                Ok(ExitOutcome::Success)
            }
            Mode::Install => {
                println!("Installing storage schema (MongoDB)...");
                self.database().await?.install_schema().await?;
                println!("Ok!");
                Ok(ExitOutcome::Success)
            }
            Mode::Handle => {
                let state = server::HandleState {
                    validator: Arc::new(RequestValidator::from_config(&self.config)),
                    sink: self.update_sink(),
                };
                server::serve(self.config.webhook.port, state, self.shutdown_token()).await?;
                Ok(ExitOutcome::Success)
            }
            Mode::Cron => {
                self.job_runner().await?.run_once().await?;
                Ok(ExitOutcome::Success)
            }
            Mode::Loop => {
                let client = TelegramClient::new(&self.config, self.update_sink())?;
                PollingLoop::new(client).run(self.shutdown_token()).await;
                Ok(ExitOutcome::Success)
            }
            Mode::Worker => {
                let runner = self.job_runner().await?;
                WorkerLoop::new(runner, self.config.debug)
                    .run(self.shutdown_token())
                    .await;
                Ok(ExitOutcome::Success)
            }
        }
    }

    fn help_text(&self) -> String {
        let mut out = match &self.config.bot_username {
            Some(username) => format!("Bot Console (@{username})\n\n"),
            None => "Bot Console\n\n".to_string(),
        };
        out.push_str("Available commands:\n");
        for entry in MODES.iter().filter(|entry| !entry.hidden) {
            out.push_str(&format!(" {:<10}- {}\n", entry.name, entry.description));
        }
        out
    }

    fn webhook_controller(&self) -> Result<WebhookController<TelegramClient>, KernelError> {
        let client = TelegramClient::new(&self.config, self.update_sink())?;
        Ok(WebhookController::new(client, self.config.clone()))
    }

    fn update_sink(&self) -> Arc<dyn UpdateSink> {
        Arc::new(TracingSink)
    }

    async fn database(&self) -> Result<Database, KernelError> {
        Database::connect(&self.config.storage.uri, &self.config.storage.database).await
    }

    async fn job_runner(&self) -> Result<ScheduledJobRunner, KernelError> {
        let db = self.database().await?;
        let executor = StorageJobExecutor::new(
            db,
            Duration::from_secs(self.config.storage.session_ttl_secs),
        );
        Ok(ScheduledJobRunner::new(
            self.config.cron.groups.clone(),
            Arc::new(FileLock::new(self.config.lock_path())),
            Arc::new(executor),
            true,
        ))
    }

    /// Cancellation token wired to Ctrl-C; the loops and the handle server
    /// drain out when it fires.
    fn shutdown_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                trigger.cancel();
            }
        });
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_trims() {
        assert_eq!(lookup("cron").map(|e| e.mode), Some(Mode::Cron));
        assert_eq!(lookup("  CRON  ").map(|e| e.mode), Some(Mode::Cron));
        assert_eq!(lookup("WoRkEr").map(|e| e.mode), Some(Mode::Worker));
        assert!(lookup("nope").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn hidden_alias_dispatches_to_the_polling_loop() {
        let entry = lookup("getupdates").unwrap();
        assert_eq!(entry.mode, Mode::Loop);
        assert!(entry.hidden);
    }

    #[test]
    fn help_text_lists_visible_modes_with_padding() {
        let mut config = Config::default();
        config.bot_username = Some("gamebot".to_string());
        let kernel = Kernel::new(config);

        let help = kernel.help_text();
        assert!(help.starts_with("Bot Console (@gamebot)\n"));
        assert!(help.contains(" help      - Shows this help message\n"));
        assert!(help.contains(" worker    - Runs scheduled commands every minute\n"));
        assert!(!help.contains("getupdates"));
    }

    #[tokio::test]
    async fn unknown_and_empty_arguments_are_usage_failures() {
        let kernel = Kernel::new(Config::default());
        assert_eq!(
            kernel.dispatch("bogus").await.unwrap(),
            ExitOutcome::Usage
        );
        assert_eq!(kernel.dispatch("").await.unwrap(), ExitOutcome::Usage);
        assert_eq!(
            kernel.dispatch("help").await.unwrap(),
            ExitOutcome::Success
        );
    }
}
