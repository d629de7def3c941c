// Standard Library Imports
use std::{num::NonZeroUsize, ops::Range, sync::Arc, thread, time::Instant};

// External Crate Imports
use itertools::Itertools;
use log::{debug, info};
use polychem::{CrossLinker, Peptide};
use rayon::{ThreadPoolBuilder, prelude::*};
use smithereens::{CrossLinkedFragmentProducer, Fragment, Fragmentation};

// Local Crate Imports
use crate::{FragmentIndex, Result, ScoredOccurrence, SifterError, Spectrum, Tolerance, TotalFloat};

// Public API ==========================================================================================================

/// Everything that decides which fragments end up in a `FragmentIndex`
#[derive(Clone, Debug)]
pub struct FragmentIndexSettings {
    /// The MS2 tolerance, which decides how fragment m/z values are quantized and queried
    pub tolerance: Tolerance,
    pub threads: usize,
    /// Peptides at or above this mass aren't indexed
    pub max_peptide_mass: f64,
    pub index_losses: bool,
    /// Fragment m/z values produced by more than this many peptides are dropped after the build
    pub max_peak_candidates: Option<usize>,
    pub fragmentation: Fragmentation,
    pub crosslinkers: Vec<Arc<CrossLinker>>,
    pub producers: Vec<Arc<dyn CrossLinkedFragmentProducer>>,
}

impl Default for FragmentIndexSettings {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::Ppm(20.0),
            threads: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            max_peptide_mass: f64::INFINITY,
            index_losses: true,
            max_peak_candidates: None,
            fragmentation: Fragmentation::default(),
            crosslinkers: Vec::new(),
            producers: Vec::new(),
        }
    }
}

impl FragmentIndex {
    /// Fragments every peptide lighter than `max_peptide_mass`, spread over `settings.threads` threads
    ///
    /// Peptides are split into many small mass ranges that are fragmented in parallel, then the sorted fragments of
    /// each range are merged. The result doesn't depend on the number of threads used.
    pub fn build<'a>(
        peptides: impl IntoIterator<Item = &'a Arc<Peptide>>,
        settings: &FragmentIndexSettings,
    ) -> Result<Self> {
        let started = Instant::now();
        let mut peptides: Vec<_> = peptides
            .into_iter()
            .filter(|peptide| peptide.mass() < settings.max_peptide_mass)
            .cloned()
            .collect();
        peptides.sort_by(|a, b| a.mass().total_cmp(&b.mass()).then(a.id().cmp(&b.id())));
        if u32::try_from(peptides.len()).is_err() {
            return Err(Box::new(SifterError::too_many_peptides(peptides.len())));
        }

        let threads = settings.threads.max(1);
        let shards = mass_shards(&peptides, threads);
        debug!(
            "fragmenting {} peptides in {} mass ranges on {threads} threads",
            peptides.len(),
            shards.len()
        );

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| SifterError::thread_pool(threads, e))?;
        let shard_entries: Vec<Vec<Entry>> = pool.install(|| {
            shards
                .into_par_iter()
                .map(|shard| fragment_shard(&peptides, shard, settings))
                .collect()
        });

        let (mzs, offsets, ids) = compress(shard_entries.into_iter().kmerge().dedup());
        let fragment_count = ids.len() as u64;
        let mut index = Self {
            tolerance: settings.tolerance,
            peptides,
            mzs,
            offsets,
            ids,
            fragment_count,
        };
        info!(
            "indexed {fragment_count} fragments under {} distinct m/z values from {} peptides in {:.2?}",
            index.len(),
            index.peptides.len(),
            started.elapsed()
        );

        if let Some(max_peak_candidates) = settings.max_peak_candidates {
            index.shrink(max_peak_candidates);
        }
        Ok(index)
    }

    #[must_use]
    pub const fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// The number of fragments indexed before any were dropped by `max_peak_candidates`
    #[must_use]
    pub const fn fragment_count(&self) -> u64 {
        self.fragment_count
    }

    /// The number of distinct fragment m/z values currently in the index
    #[must_use]
    pub fn len(&self) -> usize {
        self.mzs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mzs.is_empty()
    }

    /// Every indexed peptide, in order of increasing mass
    #[must_use]
    pub fn peptides(&self) -> &[Arc<Peptide>] {
        &self.peptides
    }

    /// Every peptide with a fragment within tolerance of `mz`
    #[must_use]
    pub fn get_for_mass(&self, mz: f64) -> Vec<&Arc<Peptide>> {
        let (min, max) = self.tolerance.bounds(mz);
        self.distinct_peptides(self.ids_between(min, max))
    }

    /// Like `get_for_mass()`, but with the tolerance window sized as if it were around `reference`
    #[must_use]
    pub fn get_for_mass_relative_to(&self, mz: f64, reference: f64) -> Vec<&Arc<Peptide>> {
        let (min, max) = self.tolerance.bounds_relative_to(mz, reference);
        self.distinct_peptides(self.ids_between(min, max))
    }

    /// Every peptide no heavier than `max_peptide_mass` with a fragment in `min_mz..=max_mz`
    ///
    /// With `max_candidates`, at most that many peptides are returned, lightest first
    #[must_use]
    pub fn get_for_mass_range(
        &self,
        min_mz: f64,
        max_mz: f64,
        max_peptide_mass: f64,
        max_candidates: Option<usize>,
    ) -> Vec<&Arc<Peptide>> {
        let mut peptides = self.distinct_peptides(self.ids_between(min_mz, max_mz));
        peptides.retain(|peptide| peptide.mass() <= max_peptide_mass);
        if let Some(max_candidates) = max_candidates {
            peptides.truncate(max_candidates);
        }
        peptides
    }

    /// The number of peptides `get_for_mass(mz)` would return, without collecting them
    #[must_use]
    pub fn count_peptides(&self, mz: f64) -> u64 {
        let (min, max) = self.tolerance.bounds(mz);
        distinct_ids(self.ids_between(min, max)).count() as u64
    }

    /// The peptides producing a fragment at exactly `mz` (after quantization)
    #[must_use]
    pub fn peptides_with_exact_fragment_mass(&self, mz: f64) -> Vec<&Arc<Peptide>> {
        let key = TotalFloat::quantized(mz, &self.tolerance);
        self.mzs
            .binary_search(&key)
            .map_or_else(|_| Vec::new(), |row| self.distinct_peptides(self.row(row)))
    }

    /// Scores every peptide with fragments matching the peaks of `spectrum`, the lowest scores being the most specific
    ///
    /// Each peak multiplies the score of every peptide it matches by the fraction of all indexed fragments those
    /// peptides make up, so peaks matching few peptides count for more
    #[must_use]
    pub fn alpha_candidates(
        &self,
        spectrum: &Spectrum,
        max_peptide_mass: f64,
    ) -> ScoredOccurrence<&Arc<Peptide>> {
        let mut scores = ScoredOccurrence::new();
        if self.fragment_count == 0 {
            return scores;
        }

        let total = self.fragment_count as f64;
        for peak in spectrum.peaks() {
            let (min, max) = self.tolerance.bounds(peak.mz);
            let matched = self.get_for_mass_range(min, max, max_peptide_mass, None);
            let factor = matched.len() as f64 / total;
            for peptide in matched {
                scores.multiply(peptide, factor);
            }
        }
        scores
    }
}

// Private Types and Methods ===========================================================================================

type Entry = (TotalFloat, u32);

impl FragmentIndex {
    /// Drops every m/z value produced by more than `max` peptides, leaving `fragment_count` untouched
    fn shrink(&mut self, max: usize) {
        let this = &*self;
        let kept: Vec<_> = (0..this.mzs.len())
            .filter(|&row| this.row(row).len() <= max)
            .flat_map(|row| this.row(row).iter().map(move |&id| (this.mzs[row], id)))
            .collect();
        let dropped = self.ids.len() - kept.len();
        (self.mzs, self.offsets, self.ids) = compress(kept.into_iter());
        info!(
            "dropped {dropped} fragments at m/z values shared by more than {max} peptides, leaving {}",
            self.ids.len()
        );
    }

    fn row(&self, row: usize) -> &[u32] {
        &self.ids[self.offsets[row]..self.offsets[row + 1]]
    }

    /// The ids of every row whose m/z could be in `min..=max`, given that quantization moves values by half a step
    fn ids_between(&self, min: f64, max: f64) -> &[u32] {
        let slack = self.tolerance.quantization_step().map_or(0.0, |step| step / 2.0);
        let start = self.mzs.partition_point(|mz| mz.value() < min - slack);
        let end = self.mzs.partition_point(|mz| mz.value() <= max + slack).max(start);
        &self.ids[self.offsets[start]..self.offsets[end]]
    }

    fn distinct_peptides(&self, ids: &[u32]) -> Vec<&Arc<Peptide>> {
        distinct_ids(ids).map(|id| &self.peptides[id as usize]).collect()
    }
}

/// A peptide can have several fragments in one window, but should only be counted once
fn distinct_ids(ids: &[u32]) -> impl Iterator<Item = u32> {
    ids.iter().copied().sorted_unstable().dedup()
}

/// Splits mass-sorted `peptides` into ranges spanning equal slices of mass, ten per thread
fn mass_shards(peptides: &[Arc<Peptide>], threads: usize) -> Vec<Range<usize>> {
    let Some(max_mass) = peptides.last().map(|peptide| peptide.mass()) else {
        return Vec::new();
    };
    let step = (max_mass + 1.0) / (threads * 10) as f64;
    if !(step > 0.0) {
        return vec![0..peptides.len()];
    }

    let mut shards = Vec::new();
    let mut start = 0;
    let mut upper = step;
    while start < peptides.len() {
        let end = start + peptides[start..].partition_point(|peptide| peptide.mass() < upper);
        if end > start {
            shards.push(start..end);
        }
        start = end;
        upper += step;
    }
    shards
}

fn fragment_shard(
    peptides: &[Arc<Peptide>],
    shard: Range<usize>,
    settings: &FragmentIndexSettings,
) -> Vec<Entry> {
    let mut entries = Vec::new();
    for (i, peptide) in peptides[shard.clone()].iter().enumerate() {
        // NOTE: `build()` has already checked that every index fits in a `u32`
        let id = (shard.start + i) as u32;
        let fragments = fragments(peptide, settings);
        entries.extend(
            fragments
                .iter()
                .map(|fragment| (TotalFloat::quantized(fragment.mz(1), &settings.tolerance), id)),
        );
    }
    entries.sort_unstable();
    entries.dedup();
    entries
}

/// The fragments of `peptide` that don't depend on knowing its cross-linked partner
fn fragments<'p>(peptide: &'p Peptide, settings: &FragmentIndexSettings) -> Vec<Fragment<'p>> {
    let primary = settings.fragmentation.primary(peptide);
    let mut fragments = if settings.index_losses {
        let lossy = settings.fragmentation.lossy(&primary);
        primary.iter().cloned().chain(lossy).collect()
    } else {
        primary.clone()
    };
    for crosslinker in &settings.crosslinkers {
        for producer in &settings.producers {
            fragments.extend(producer.produce(&primary, &[], crosslinker));
        }
    }
    fragments
}

/// Packs sorted `(mz, id)` pairs into compressed rows
fn compress(entries: impl Iterator<Item = Entry>) -> (Vec<TotalFloat>, Vec<usize>, Vec<u32>) {
    let mut mzs = Vec::new();
    let mut offsets = vec![0];
    let mut ids = Vec::new();
    for (mz, row) in &entries.chunk_by(|&(mz, _)| mz) {
        mzs.push(mz);
        ids.extend(row.map(|(_, id)| id));
        offsets.push(ids.len());
    }
    (mzs, offsets, ids)
}

// Module Tests ========================================================================================================
