//! Error taxonomy (spec §7). Components return `CoreError` at their public
//! boundary; `main.rs` and the CLI surface collapse everything into
//! `anyhow::Error` for display, the same layering `jvz-devx-usenet-dl` uses
//! between its library core (`thiserror`) and its binary edges (`anyhow`).

#[derive(Debug, thiserror::Error)]
pub(crate) enum CoreError {
    /// Rejected write: the offending value never reached storage.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Network or process-exit failure that retry policy may absorb.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// The hostname responded in a way that looks like bot detection.
    #[error("bot-blocked")]
    BotBlocked,

    /// Startup-time condition that must abort the process: singleton clash,
    /// unable to open the database, etc.
    #[error("fatal startup error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, CoreError::Sqlx(sqlx::Error::RowNotFound))
    }
}

/// Classification returned by external-process collaborators (Downloader,
/// Scraper) so callers can route to the right taxonomy branch without
/// string-matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    Transient,
    BotBlocked,
    Fatal,
}
