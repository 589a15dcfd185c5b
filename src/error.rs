use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Components keep their local `anyhow` context; where the caller has to
/// make a *decision* (retry, halt the run, tell the command issuer) the
/// error is narrowed to one of these kinds at the seam.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Network or API hiccup. Retried after a backoff; never fatal to the
    /// hosting process.
    #[error("transport error: {0}")]
    Transport(String),

    /// Missing or unrefreshable credential. Halts the current run and
    /// requires external re-authentication.
    #[error("credential unavailable: {0}")]
    Auth(String),

    /// No active live session, or an unknown persona. Surfaced to the
    /// command issuer; does not halt the process.
    #[error("{0} not found")]
    NotFound(String),

    /// Stop was requested. Clean unwind, not reported as a failure.
    #[error("operation cancelled")]
    Cancelled,
}
