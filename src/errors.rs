use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T, E = Box<SearchError>> = std::result::Result<T, E>;

#[derive(Debug, Diagnostic, Clone, PartialEq, Error)]
pub enum SearchError {
    #[error("invalid search configuration: {message}")]
    #[diagnostic(help("fix the configuration and restart the search"))]
    Config { message: String },

    #[error("failed to search scan {scan} of {run:?}: {message}")]
    Spectrum {
        run: String,
        scan: u32,
        message: String,
    },

    #[error("giving up after {count} spectra failed to search")]
    #[diagnostic(help("this many failures usually means the peak lists or configuration are broken"))]
    TooManyErrors { count: u64 },

    #[error("no spectra were processed for {:.0?}, with {processed} processed in total", stalled_for)]
    #[diagnostic(help("the state of every search worker has been logged"))]
    Stalled { stalled_for: Duration, processed: u64 },

    #[error("failed to build the search indexes: {reason}")]
    IndexBuild { reason: String },

    #[error("failed to write search results: {reason}")]
    Sink { reason: String },
}

impl SearchError {
    pub(crate) fn config(message: impl ToString) -> Self {
        let message = message.to_string();

        Self::Config { message }
    }

    pub(crate) fn spectrum(run: &str, scan: u32, message: impl ToString) -> Self {
        let run = run.to_owned();
        let message = message.to_string();

        Self::Spectrum { run, scan, message }
    }

    pub(crate) const fn too_many_errors(count: u64) -> Self {
        Self::TooManyErrors { count }
    }

    pub(crate) const fn stalled(stalled_for: Duration, processed: u64) -> Self {
        Self::Stalled {
            stalled_for,
            processed,
        }
    }

    pub(crate) fn index_build(reason: impl ToString) -> Self {
        let reason = reason.to_string();

        Self::IndexBuild { reason }
    }

    pub(crate) fn sink(reason: impl ToString) -> Self {
        let reason = reason.to_string();

        Self::Sink { reason }
    }

    /// Fatal errors abort the whole search, while anything else only costs a single spectrum
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Spectrum { .. })
    }
}

// Module Tests ========================================================================================================
