// Standard Library Imports
use std::fmt::Debug;

// External Crate Imports
use ahash::{HashMap, HashMapExt};
use polychem::{CrossLinker, Peptide};
use sifter::{Spectrum, Tolerance};
use smithereens::FragmentKey;

// Local Crate Imports
use crate::MatchedXlinkedPeptide;

// Public API ==========================================================================================================

/// Decides whether a pair of peptides is worth considering as a cross-link at all
pub trait CandidatePairFilter: Debug + Send + Sync {
    fn passes(
        &self,
        spectrum: &Spectrum,
        crosslinker: &CrossLinker,
        alpha: &Peptide,
        beta: &Peptide,
    ) -> bool;
}

/// Only pairs peptides that come from a common protein, for searching complexes of known composition
#[derive(Copy, Clone, Debug, Default)]
pub struct ProteinGroupFilter;

impl CandidatePairFilter for ProteinGroupFilter {
    fn passes(&self, _spectrum: &Spectrum, _crosslinker: &CrossLinker, alpha: &Peptide, beta: &Peptide) -> bool {
        alpha.shares_protein(beta)
    }
}

/// Tidies up the fragments matched to a candidate before it's scored
pub trait MatchFilter: Debug + Send + Sync {
    fn filter(&self, matched: &mut MatchedXlinkedPeptide, tolerance: &Tolerance);
}

/// Drops matches to fragments that have lost more than two neutral losses, unless enough other losses of the same
/// fragment were also seen to make that believable
#[derive(Copy, Clone, Debug, Default)]
pub struct CleanUpMatchedPeaks;

/// The largest number of losses that a fragment can carry without support from other lossy matches
const MAX_LOSS_DISTANCE: usize = 2;

impl MatchFilter for CleanUpMatchedPeaks {
    fn filter(&self, matched: &mut MatchedXlinkedPeptide, _tolerance: &Tolerance) {
        let groups = FragmentGroups::new(matched);
        matched.fragments_mut().retain(|fragment| {
            let unsupported = fragment.is_lossy()
                && !fragment.is_peptide_ion()
                && fragment.loss_count > MAX_LOSS_DISTANCE
                && groups.losses(&fragment.key, fragment.charge) <= MAX_LOSS_DISTANCE;
            !unsupported
        });
    }
}

/// Picks a single primary annotation for every matched peak, preferring the explanation best supported by other
/// matches and then the one with the smallest mass error
#[derive(Copy, Clone, Debug, Default)]
pub struct DefinePrimaryFragmentMatches;

impl MatchFilter for DefinePrimaryFragmentMatches {
    fn filter(&self, matched: &mut MatchedXlinkedPeptide, tolerance: &Tolerance) {
        let groups = FragmentGroups::new(matched);
        for fragment in matched.fragments_mut().iter_mut() {
            let group = groups.get(&fragment.key, fragment.charge);
            fragment.support = if fragment.is_backbone() && !fragment.is_lossy() {
                500 + 20 * group.losses as u32
            } else if fragment.is_lossy() && group.found_base {
                50
            } else if fragment.is_lossy() && group.losses > MAX_LOSS_DISTANCE {
                40
            } else if fragment.is_lossy() {
                20
            } else {
                0
            };
            fragment.primary = false;
        }

        let mut best: HashMap<usize, usize> = HashMap::new();
        let fragments = matched.fragments_mut();
        for (i, fragment) in fragments.iter().enumerate() {
            best.entry(fragment.peak)
                .and_modify(|current| {
                    let other = &fragments[*current];
                    let better = fragment.support > other.support
                        || (fragment.support == other.support
                            && fragment.error(tolerance).abs() < other.error(tolerance).abs());
                    if better {
                        *current = i;
                    }
                })
                .or_insert(i);
        }
        for i in best.into_values() {
            fragments[i].primary = true;
        }
    }
}

// Private Helper Types ================================================================================================

#[derive(Copy, Clone, Default, Debug)]
struct GroupSummary {
    losses: usize,
    found_base: bool,
}

/// Matched fragments grouped by the loss-free fragment they derive from, at a single charge state
struct FragmentGroups(HashMap<(FragmentKey, u32), GroupSummary>);

impl FragmentGroups {
    fn new(matched: &MatchedXlinkedPeptide) -> Self {
        let mut groups: HashMap<_, GroupSummary> = HashMap::new();
        for fragment in matched.fragments() {
            let group = groups.entry((fragment.key.clone(), fragment.charge)).or_default();
            if fragment.is_lossy() {
                group.losses += 1;
            } else {
                group.found_base = true;
            }
        }
        Self(groups)
    }

    fn get(&self, key: &FragmentKey, charge: u32) -> GroupSummary {
        self.0.get(&(key.clone(), charge)).copied().unwrap_or_default()
    }

    fn losses(&self, key: &FragmentKey, charge: u32) -> usize {
        self.get(key, charge).losses
    }
}

// Module Tests ========================================================================================================
