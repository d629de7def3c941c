//! Mass-indexed lookups of peptides and their fragments, and the spectra they're searched against

mod errors;
mod fragment_index;
mod mass_index;
mod scored_occurrence;
mod spectrum;
mod tolerance;
mod total_float;

// Standard Library Imports
use std::{collections::BTreeMap, sync::Arc};

// External Crate Imports
use polychem::Peptide;

// Local Crate Imports
pub use errors::{Result, SifterError};
pub use fragment_index::FragmentIndexSettings;
pub use scored_occurrence::ScoredOccurrence;
pub use spectrum::{Peak, Spectrum};
pub use tolerance::Tolerance;
pub use total_float::TotalFloat;

// Public API ==========================================================================================================

/// Collects digested peptides into mass bins, until `finalize()` freezes them into a `MassIndex`
#[derive(Clone, Debug)]
pub struct MassIndexBuilder {
    tolerance: Tolerance,
    bins: BTreeMap<TotalFloat, Vec<Peptide>>,
    discarded_decoys: Vec<Peptide>,
}

/// A read-only index of peptides, sorted by mass
///
/// Masses under an absolute tolerance are quantized into bins, so `masses[i]` is the (possibly rounded) mass shared by
/// every peptide in `bins[i]`
#[derive(Clone, Debug)]
pub struct MassIndex {
    tolerance: Tolerance,
    masses: Vec<TotalFloat>,
    bins: Vec<Vec<Arc<Peptide>>>,
}

/// A read-only index from the m/z of every theoretical fragment to the peptides that produce it
///
/// Entries are stored in compressed rows: the peptides producing `mzs[i]` are `peptides[ids[j]]` for every `j` in
/// `offsets[i]..offsets[i + 1]`
#[derive(Clone, Debug)]
pub struct FragmentIndex {
    tolerance: Tolerance,
    peptides: Vec<Arc<Peptide>>,
    mzs: Vec<TotalFloat>,
    offsets: Vec<usize>,
    ids: Vec<u32>,
    fragment_count: u64,
}
