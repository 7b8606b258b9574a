use thiserror::Error;

/// Errors that cross the engine boundary.
///
/// Everything else degrades: unrecognized lines are dropped and counted in
/// `ParseDiagnostics`, bad numbers coerce to zero, and a log without any
/// player events yields a default summary instead of an error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The buffer does not look like a combat log. User-correctable
    /// (wrong file selected); the message is safe to surface verbatim.
    #[error("invalid combat log: {0}")]
    InvalidFormat(String),
}
