//! A cross-link search engine for tandem mass spectra
//!
//! Spectra are narrowed down to a handful of linear and cross-linked peptide candidates by `CandidateScorer`, which
//! are then annotated and scored in full by `MatchEvaluator`, ranked by `Ranker`, and written to a `ResultSink`.
//! `SearchCoordinator` runs all of this over a `SpectrumSource` with a pool of worker threads.

mod candidates;
mod config;
mod coordinator;
mod errors;
mod evaluator;
mod filters;
mod matched;
mod ranking;
mod scores;
mod sink;
mod source;

pub use candidates::{Candidate, CandidateScorer, CandidateStats};
pub use config::{MINIMUM_RESIDUE_MASS, SearchConfig, WatchdogSettings};
pub use coordinator::{MemoryPressure, SearchContext, SearchCoordinator, SearchSummary, WorkerState};
pub use errors::{Result, SearchError};
pub use evaluator::{MatchEvaluator, WeightingStrategy};
pub use filters::{
    CandidatePairFilter, CleanUpMatchedPeaks, DefinePrimaryFragmentMatches, MatchFilter, ProteinGroupFilter,
};
pub use matched::{AUTO_VALIDATION, FragmentLinkage, MATCH_SCORE, MatchedFragment, MatchedXlinkedPeptide, Side};
pub use ranking::{COMBINED_DELTA, DELTA, DELTA_MOD, Ranker, ResultSort};
pub use scores::{
    AVERAGE_MS2_ERROR, AVERAGE_MS2_ERROR_CROSSLINKED, AVERAGE_MS2_ERROR_PEPTIDE1, AVERAGE_MS2_ERROR_PEPTIDE2,
    FragmentCoverage, FragmentError, MatchScore, ScorePlugin, ScoreTerm, SpectraCoverage,
};
pub use sink::{BufferedResultSink, MemorySink, MinimumRequirementsFilter, ResultSink};
pub use source::{SpectrumSource, VecSpectrumSource, delayed_has_next};
