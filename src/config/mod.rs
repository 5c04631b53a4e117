//! Configuration for the bot kernel.
//!
//! Defaults come from environment variables (a `.env` file is honoured).
//! An optional JSON override file replaces values at top-level key
//! granularity: a key the file supplies replaces the whole default value for
//! that key, a key it omits keeps the default. Sections are never deep-merged.
//!
//! The loaded [`Config`] is immutable; components receive it by reference.
//! Identity fields (token, username) are validated by the mode that needs
//! them, not here, so e.g. `help` works on an empty environment.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

/// Webhook registration parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Public base URL Telegram should push updates to.
    pub url: Option<String>,

    /// Local port the `handle` mode listens on.
    pub port: u16,

    pub max_connections: Option<u8>,

    /// Update kinds to subscribe to, in Telegram API naming.
    pub allowed_updates: Vec<String>,

    /// Path to a self-signed certificate to upload with the registration.
    pub certificate: Option<PathBuf>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            port: 8443,
            max_connections: Some(100),
            allowed_updates: [
                "message",
                "inline_query",
                "chosen_inline_result",
                "callback_query",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            certificate: None,
        }
    }
}

/// Storage connection parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub uri: String,
    pub database: String,

    /// Game sessions untouched for longer than this are stale.
    pub session_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "gamebot".to_string(),
            session_ttl_secs: 86_400,
        }
    }
}

/// A named ordered group of scheduled job identifiers.
#[derive(Debug, Clone, Deserialize)]
pub struct CronGroup {
    pub name: String,
    pub jobs: Vec<String>,
}

/// Scheduled-job configuration.
///
/// Groups run in listed order, jobs in within-group order. A job listed twice
/// runs twice; repetition is how a job's frequency is weighted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    pub groups: Vec<CronGroup>,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            groups: vec![CronGroup {
                name: "default".to_string(),
                jobs: vec!["/cleansessions".to_string()],
            }],
        }
    }
}

/// Application configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: Option<String>,

    /// Bot username (without @).
    pub bot_username: Option<String>,

    /// Shared secret for webhook authenticity checks.
    pub secret: Option<String>,

    /// Administrator user IDs.
    pub admins: Vec<i64>,

    pub webhook: WebhookConfig,
    pub storage: StorageConfig,
    pub cron: CronConfig,

    /// Whether inbound webhook requests are checked against `valid_ips`.
    pub validate_request: bool,

    /// Allowed source ranges: single address, `start-end` span, or CIDR.
    pub valid_ips: Vec<String>,

    pub analytics_token: Option<String>,

    /// Shortens the worker interval and raises log verbosity.
    pub debug: bool,

    /// Fallback used to derive the webhook URL on Heroku-style hosting.
    pub heroku_app_name: Option<String>,

    /// Overrides where runtime files (the cron lock) live.
    pub data_dir: Option<PathBuf>,
}

/// JSON override layer. Every field is optional; a present field replaces the
/// corresponding default wholesale.
#[derive(Debug, Default, Deserialize)]
struct ConfigOverlay {
    bot_token: Option<String>,
    bot_username: Option<String>,
    secret: Option<String>,
    admins: Option<Vec<i64>>,
    webhook: Option<WebhookConfig>,
    storage: Option<StorageConfig>,
    cron: Option<CronConfig>,
    validate_request: Option<bool>,
    valid_ips: Option<Vec<String>>,
    analytics_token: Option<String>,
    debug: Option<bool>,
    heroku_app_name: Option<String>,
    data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: None,
            bot_username: None,
            secret: None,
            admins: Vec::new(),
            webhook: WebhookConfig::default(),
            storage: StorageConfig::default(),
            cron: CronConfig::default(),
            validate_request: true,
            // Telegram webhook origin range.
            valid_ips: vec!["149.154.167.197-149.154.167.233".to_string()],
            analytics_token: None,
            debug: false,
            heroku_app_name: None,
            data_dir: None,
        }
    }
}

impl Config {
    /// Build defaults from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        cfg.bot_token = non_empty(env::var("BOT_TOKEN").ok());
        cfg.bot_username = non_empty(env::var("BOT_USERNAME").ok())
            .map(|s| s.trim_start_matches('@').to_string());
        cfg.secret = non_empty(env::var("BOT_SECRET").ok());

        cfg.admins = env::var("BOT_ADMINS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.trim().parse::<i64>().ok())
            .collect();

        cfg.webhook.url = non_empty(env::var("BOT_WEBHOOK").ok());
        if let Some(port) = env::var("BOT_WEBHOOK_PORT")
            .ok()
            .and_then(|p| p.trim().parse::<u16>().ok())
        {
            cfg.webhook.port = port;
        }

        if let Some(uri) = non_empty(env::var("MONGODB_URI").ok()) {
            cfg.storage.uri = uri;
        }
        if let Some(db) = non_empty(env::var("MONGODB_DATABASE").ok()) {
            cfg.storage.database = db;
        }

        cfg.analytics_token = non_empty(env::var("ANALYTICS_TOKEN").ok());
        cfg.debug = env::var("DEBUG").is_ok_and(|v| !v.is_empty() && v != "0");
        cfg.heroku_app_name = non_empty(env::var("HEROKU_APP_NAME").ok());
        cfg.data_dir = non_empty(env::var("DATA_PATH").ok()).map(PathBuf::from);

        cfg
    }

    /// Load defaults, then apply the override file if it exists and parses.
    /// A malformed override is ignored with a warning; defaults win.
    pub fn load(override_path: &Path) -> Self {
        let cfg = Self::from_env();
        match std::fs::read_to_string(override_path) {
            Ok(raw) => match serde_json::from_str::<ConfigOverlay>(&raw) {
                Ok(overlay) => cfg.apply(overlay),
                Err(err) => {
                    warn!(path = %override_path.display(), %err, "ignoring malformed config override");
                    cfg
                }
            },
            Err(_) => cfg,
        }
    }

    fn apply(mut self, overlay: ConfigOverlay) -> Self {
        if let Some(v) = overlay.bot_token {
            self.bot_token = Some(v);
        }
        if let Some(v) = overlay.bot_username {
            self.bot_username = Some(v);
        }
        if let Some(v) = overlay.secret {
            self.secret = Some(v);
        }
        if let Some(v) = overlay.admins {
            self.admins = v;
        }
        if let Some(v) = overlay.webhook {
            self.webhook = v;
        }
        if let Some(v) = overlay.storage {
            self.storage = v;
        }
        if let Some(v) = overlay.cron {
            self.cron = v;
        }
        if let Some(v) = overlay.validate_request {
            self.validate_request = v;
        }
        if let Some(v) = overlay.valid_ips {
            self.valid_ips = v;
        }
        if let Some(v) = overlay.analytics_token {
            self.analytics_token = Some(v);
        }
        if let Some(v) = overlay.debug {
            self.debug = v;
        }
        if let Some(v) = overlay.heroku_app_name {
            self.heroku_app_name = Some(v);
        }
        if let Some(v) = overlay.data_dir {
            self.data_dir = Some(v);
        }
        self
    }

    /// Bot token, required by every mode that talks to Telegram.
    pub fn require_token(&self) -> Result<&str, crate::error::KernelError> {
        self.bot_token
            .as_deref()
            .ok_or_else(|| crate::error::KernelError::config("BOT_TOKEN is not set"))
    }

    /// Where the cron lock file lives. Fixed path inside the temporary-file
    /// area unless a data directory is configured.
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(env::temp_dir)
            .join("gamebot-cron.lock")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
