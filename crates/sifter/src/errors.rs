use miette::Diagnostic;
use thiserror::Error;

pub type Result<T, E = Box<SifterError>> = std::result::Result<T, E>;

#[derive(Debug, Diagnostic, Clone, Eq, PartialEq, Error)]
pub enum SifterError {
    #[error("failed to parse the tolerance {input:?}")]
    #[diagnostic(help("tolerances are a number followed by a unit, like 10ppm or 0.02da"))]
    Tolerance { input: String },

    #[error("the tolerance {input:?} is negative")]
    NegativeTolerance { input: String },

    #[error("failed to start a pool of {threads} threads for building the fragment index: {reason}")]
    ThreadPool { threads: usize, reason: String },

    #[error("the fragment index can hold at most {} peptides, but {count} were given", u32::MAX)]
    TooManyPeptides { count: usize },
}

impl SifterError {
    pub(crate) fn tolerance(input: &str) -> Self {
        let input = input.to_owned();

        Self::Tolerance { input }
    }

    pub(crate) fn negative_tolerance(input: &str) -> Self {
        let input = input.to_owned();

        Self::NegativeTolerance { input }
    }

    pub(crate) fn thread_pool(threads: usize, reason: impl ToString) -> Self {
        let reason = reason.to_string();

        Self::ThreadPool { threads, reason }
    }

    pub(crate) const fn too_many_peptides(count: usize) -> Self {
        Self::TooManyPeptides { count }
    }
}
