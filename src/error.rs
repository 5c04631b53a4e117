//! Kernel error types.

use thiserror::Error;

/// Errors surfaced by the kernel's mode handlers.
///
/// Expected conditions (lock contention, failed request validation) are not
/// errors: they are handled where they occur. Anything that reaches `main`
/// through this type is logged there and turns into a failing exit code;
/// library code never terminates the process itself.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Required configuration is missing or invalid for the selected mode.
    #[error("configuration error: {0}")]
    Config(String),

    /// The Telegram API transport or response reported a failure.
    #[error("telegram api error: {0}")]
    Upstream(String),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] mongodb::error::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KernelError {
    /// Shorthand for a `Config` error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
