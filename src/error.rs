// =============================================================================
// Engine error taxonomy
// =============================================================================
//
// Component boundaries (exchange connector, config store, period scaler)
// return `EngineError`. Process plumbing in main.rs and settings.rs stays on
// `anyhow::Result`.
//
// No "insufficient data" variant: indicator functions return empty or
// zero-valued results on short input.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// All fetch attempts failed at the transport level or with a
    /// non-success status.
    #[error("network error after {attempts} attempt(s): {message}")]
    TransientNetwork { attempts: u32, message: String },

    /// The exchange answered, but the body does not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A single stream frame could not be parsed. The stream keeps running.
    #[error("malformed stream message: {0}")]
    MalformedMessage(String),

    /// Rejected at the serving boundary; nothing was mutated.
    #[error("invalid indicator config: {0}")]
    ConfigValidation(String),

    /// The repository refused the write. The in-memory cache keeps the new
    /// value.
    #[error("config persistence failed: {0}")]
    Persistence(String),

    #[error("invalid interval '{0}'")]
    InvalidInterval(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
