use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

pub type Result<T, E = Box<PolychemError>> = std::result::Result<T, E>;

#[derive(Debug, Diagnostic, Clone, Eq, PartialEq, Error)]
pub enum PolychemError {
    #[error("the residue {abbr:?} could not be found in the supplied residue database")]
    #[diagnostic(help("modified residues are written as a residue followed by a modification, like Mox"))]
    ResidueLookup { abbr: String },

    #[error("failed to parse the peptide sequence {sequence:?}")]
    #[diagnostic(help(
        "sequences are made of uppercase residues, each optionally followed by a lowercase modification"
    ))]
    Sequence {
        #[source_code]
        sequence: String,
        #[label("expected a residue here")]
        span: SourceSpan,
    },

    #[error("the cross-linker target {target:?} is neither a residue nor a protein terminus")]
    #[diagnostic(help("targets are single residues (like K) or one of n-term and c-term"))]
    LinkTarget { target: String },
}

impl PolychemError {
    pub(crate) fn residue_lookup(abbr: &str) -> Self {
        let abbr = abbr.to_owned();

        Self::ResidueLookup { abbr }
    }

    pub(crate) fn sequence(sequence: &str, offset: usize) -> Self {
        let span = (offset, sequence.len().saturating_sub(offset).max(1)).into();
        let sequence = sequence.to_owned();

        Self::Sequence { sequence, span }
    }

    pub(crate) fn link_target(target: &str) -> Self {
        let target = target.to_owned();

        Self::LinkTarget { target }
    }
}
