//! Error types for probability diffusion

use thiserror::Error;

/// Errors raised before or while running the diffusion engine
///
/// Configuration problems are reported when the engine is built or a call is
/// entered, never half-way through an iteration.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to allocate {what} ({len} elements)")]
    Allocation {
        what: &'static str,
        len: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
