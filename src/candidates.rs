// Standard Library Imports
use std::{cmp::Ordering, sync::Arc};

// External Crate Imports
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use log::{debug, trace};
use polychem::{CrossLinker, PROTON_MASS, Peptide, PeptideId};
use sifter::{FragmentIndex, MassIndex, ScoredOccurrence, Spectrum, Tolerance};
use smithereens::{CrossLinkedFragmentProducer, Fragment, Fragmentation, Linkage};

// Local Crate Imports
use crate::{CandidatePairFilter, MatchedXlinkedPeptide, SearchConfig};

// Public API ==========================================================================================================

/// The MGC and MGX statistics of a candidate, written onto its match once it has been evaluated
///
/// Probabilities are stored raw (lower is better) and only turned into `-ln(p)` scores by `record()`
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct CandidateStats {
    /// The MGC probability of the alpha peptide, `1.0` if it was never seen by MGC
    pub alpha_mgc: f64,
    /// The MGC probability of the beta peptide, for cross-links only
    pub beta_mgc: Option<f64>,
    pub mgx: f64,
    /// `-ln(p)` of the second best MGC alpha
    pub second_mgc: f64,
    /// `-ln(p)` of the second best MGX candidate
    pub second_mgx: f64,
    pub mgc_rank: usize,
    pub mgx_rank: usize,
    /// How many alpha peptides made it past the MGC rank cut-off
    pub alpha_considered: usize,
    /// How many peptides were scored by MGC at all
    pub alpha_count: usize,
    /// How many beta peptides matched the mass gap left by the alpha and cross-linker
    pub beta_count: usize,
}

impl Default for CandidateStats {
    fn default() -> Self {
        Self {
            alpha_mgc: 1.0,
            beta_mgc: None,
            mgx: 1.0,
            second_mgc: 0.0,
            second_mgx: 0.0,
            mgc_rank: 0,
            mgx_rank: 0,
            alpha_considered: 0,
            alpha_count: 0,
            beta_count: 0,
        }
    }
}

impl CandidateStats {
    /// Writes the MGC and MGX scores of this candidate onto `matched`
    pub fn record(&self, matched: &mut MatchedXlinkedPeptide) {
        let pa = self.alpha_mgc;
        let alpha = -pa.ln();
        let mgx = -self.mgx.ln();

        let (beta, mgc_delta, alpha_beta) = match self.beta_mgc {
            Some(pb) => (
                -pb.ln(),
                -(pa * pb).ln() - self.second_mgc,
                -(pa + pb - pa * pb).ln(),
            ),
            None => (0.0, alpha - self.second_mgc, alpha),
        };
        // NOTE: Linears that MGC never saw have no MGC score of their own, so MGX stands in for it
        let mgc = if self.beta_mgc.is_none() && pa == 1.0 {
            mgx
        } else {
            alpha + beta
        };
        let beta_count_inverse = if self.beta_count > 0 {
            1.0 / self.beta_count as f64
        } else {
            0.0
        };

        let scores = [
            ("mgcAlpha", alpha),
            ("mgcBeta", beta),
            ("mgcAlphaBeta", alpha_beta),
            ("mgcScore", mgc),
            ("mgcDelta", mgc_delta),
            ("mgxScore", mgx),
            ("mgxDelta", mgx - self.second_mgx),
            ("mgxRank", self.mgx_rank as f64),
            ("mgcRank", self.mgc_rank as f64),
            ("alphaConsidered", self.alpha_considered as f64),
            ("alphaCount", self.alpha_count as f64),
            ("betaCount", self.beta_count as f64),
            ("betaCountInverse", beta_count_inverse),
        ];
        for (name, value) in scores {
            matched.set_score(name, value);
        }
    }
}

/// A linear peptide or cross-linked pair worth evaluating in full
#[derive(Clone, Debug)]
pub struct Candidate {
    pub alpha: Arc<Peptide>,
    pub beta: Option<Arc<Peptide>>,
    pub crosslinker: Option<Arc<CrossLinker>>,
    pub stats: CandidateStats,
}

impl Candidate {
    #[must_use]
    pub const fn is_cross_linked(&self) -> bool {
        self.beta.is_some()
    }
}

/// Narrows every peptide and cross-linked pair down to the few worth evaluating against a spectrum
///
/// Alpha peptides are picked by how specifically their fragments explain the most intense peaks (MGC). Each alpha
/// then has every beta peptide filling the remaining precursor mass paired with it, and those pairs (plus any linear
/// peptides at the precursor mass) are re-scored against a larger set of peaks (MGX).
#[derive(Debug)]
pub struct CandidateScorer {
    peptides: Arc<MassIndex>,
    fragments: Arc<FragmentIndex>,
    precursor_tolerance: Tolerance,
    fragmentation: Fragmentation,
    crosslinkers: Vec<Arc<CrossLinker>>,
    producers: Vec<Arc<dyn CrossLinkedFragmentProducer>>,
    pair_filters: Vec<Box<dyn CandidatePairFilter>>,
    top_mgc_hits: usize,
    top_mgx_hits: usize,
    mgc_peaks: usize,
    mgx_peaks: usize,
    peak_window: f64,
    evaluate_linears: bool,
    minimum_residue_mass: f64,
}

impl CandidateScorer {
    #[must_use]
    pub fn new(
        config: &SearchConfig,
        peptides: Arc<MassIndex>,
        fragments: Arc<FragmentIndex>,
        producers: &[Arc<dyn CrossLinkedFragmentProducer>],
    ) -> Self {
        Self {
            peptides,
            fragments,
            precursor_tolerance: config.precursor_tolerance,
            fragmentation: config.fragmentation.clone(),
            crosslinkers: config.crosslinkers.clone(),
            producers: producers.to_vec(),
            pair_filters: Vec::new(),
            top_mgc_hits: config.top_mgc_hits,
            top_mgx_hits: config.top_mgx_hits,
            mgc_peaks: config.mgc_peaks,
            mgx_peaks: config.mgx_peaks,
            peak_window: config.peak_window,
            evaluate_linears: config.evaluate_linears,
            minimum_residue_mass: config.minimum_residue_mass,
        }
    }

    /// Adds a filter that every cross-linked pair must pass before it's scored
    #[must_use]
    pub fn with_pair_filter(mut self, filter: impl CandidatePairFilter + 'static) -> Self {
        self.pair_filters.push(Box::new(filter));
        self
    }

    #[must_use]
    pub const fn peptides(&self) -> &Arc<MassIndex> {
        &self.peptides
    }

    #[must_use]
    pub const fn fragments(&self) -> &Arc<FragmentIndex> {
        &self.fragments
    }

    /// The best candidates for `spectrum` at its recorded precursor charge, best MGX score first
    #[must_use]
    pub fn candidates(&self, spectrum: &Spectrum) -> Vec<Candidate> {
        let mgc_spectrum = spectrum.top_n_peaks(self.mgc_peaks, Some(self.peak_window));
        if mgc_spectrum.is_empty() {
            debug!(
                "scan {} of {:?} has no peaks to search with",
                spectrum.scan(),
                spectrum.run()
            );
            return Vec::new();
        }
        let mgx_spectrum = spectrum.top_n_peaks(self.mgx_peaks, Some(self.peak_window));

        let precursor_mass = spectrum.precursor_mass();
        let max_mass = self.precursor_tolerance.max(precursor_mass);
        let mgc_scores = self.fragments.alpha_candidates(&mgc_spectrum, max_mass);
        let alphas = mgc_scores.lowest_n_entries(self.top_mgc_hits * 10, Some(self.top_mgc_hits * 100));

        let mut mgc_ranks: HashMap<String, usize> = HashMap::new();
        let mut rank = 0;
        let mut last_score = None;
        let mut alpha_considered = 0;
        let mut seen_pairs: HashSet<(PeptideId, PeptideId, usize)> = HashSet::new();
        let mut pool = Vec::new();

        for &&alpha in &alphas {
            let score = mgc_scores.score(&alpha, 1.0);
            // NOTE: Modified forms of a peptide share the rank of its best scoring form
            let alpha_rank = *mgc_ranks.entry(alpha.base_sequence()).or_insert_with(|| {
                if last_score != Some(score) {
                    rank += 1;
                    last_score = Some(score);
                }
                rank
            });
            if alpha_rank > self.top_mgc_hits {
                continue;
            }
            alpha_considered += 1;

            if self.precursor_tolerance.compare(alpha.mass(), precursor_mass) == Ordering::Equal {
                continue;
            }
            for (c, crosslinker) in self.crosslinkers.iter().enumerate() {
                let beta_mass = precursor_mass - alpha.mass() - crosslinker.mass();
                if beta_mass <= self.minimum_residue_mass {
                    continue;
                }

                let betas = self.peptides.get_for_mass_relative_to(beta_mass, precursor_mass);
                let beta_count = betas.len();
                for beta in betas {
                    if beta.mass() > max_mass {
                        continue;
                    }
                    if seen_pairs.contains(&(beta.id(), alpha.id(), c))
                        || !seen_pairs.insert((alpha.id(), beta.id(), c))
                    {
                        trace!("{beta} x {alpha} has already been scored");
                        continue;
                    }
                    if !crosslinker.can_cross_link(alpha, beta)
                        || !self
                            .pair_filters
                            .iter()
                            .all(|filter| filter.passes(spectrum, crosslinker, alpha, beta))
                    {
                        continue;
                    }

                    let mgx = self.pair_mgx_score(&mgx_spectrum, alpha, beta, crosslinker);
                    pool.push(Pending {
                        alpha,
                        beta: Some(beta),
                        crosslinker: Some(crosslinker),
                        beta_count,
                        mgx,
                    });
                }
            }
        }

        if self.evaluate_linears {
            for peptide in self.peptides.get_for_mass(precursor_mass) {
                let mgx = self.linear_mgx_score(&mgx_spectrum, peptide);
                pool.push(Pending {
                    alpha: peptide,
                    beta: None,
                    crosslinker: None,
                    beta_count: 0,
                    mgx,
                });
            }
        }

        let mut mgx_scores = ScoredOccurrence::new();
        for (i, pending) in pool.iter().enumerate() {
            mgx_scores.add(i, pending.mgx);
        }
        let results = mgx_scores.lowest_n_entries(self.top_mgx_hits, Some(self.top_mgx_hits.pow(2)));
        debug!(
            "scan {}: {} peptides scored by MGC, {alpha_considered} considered as alpha, {} candidates scored by MGX, {} kept",
            spectrum.scan(),
            mgc_scores.len(),
            pool.len(),
            results.len()
        );

        let second_mgc = second_distinct_score(alphas.iter().map(|&alpha| mgc_scores.score(alpha, 1.0)));
        let second_mgx = second_distinct_score(results.iter().map(|&&i| pool[i].mgx));
        let missing_rank = self.top_mgc_hits * 2;
        let rank_of = |peptide: &Arc<Peptide>| mgc_ranks.get(&peptide.base_sequence()).copied();

        let mut mgx_rank = 0;
        let mut last_mgx = None;
        results
            .into_iter()
            .map(|&i| {
                let pending = &pool[i];
                if last_mgx != Some(pending.mgx) {
                    mgx_rank += 1;
                    last_mgx = Some(pending.mgx);
                }

                let alpha_rank = rank_of(pending.alpha);
                let beta_rank = pending.beta.and_then(|beta| rank_of(beta));
                let mgc_rank = match (alpha_rank, beta_rank) {
                    (Some(a), Some(b)) => a.min(b),
                    (Some(rank), None) | (None, Some(rank)) => rank,
                    (None, None) => missing_rank,
                };

                let stats = CandidateStats {
                    alpha_mgc: mgc_scores.score(&pending.alpha, 1.0),
                    beta_mgc: pending.beta.map(|beta| mgc_scores.score(&beta, 1.0)),
                    mgx: pending.mgx,
                    second_mgc,
                    second_mgx,
                    mgc_rank,
                    mgx_rank,
                    alpha_considered,
                    alpha_count: mgc_scores.len(),
                    beta_count: pending.beta_count,
                };
                Candidate {
                    alpha: Arc::clone(pending.alpha),
                    beta: pending.beta.cloned(),
                    crosslinker: pending.crosslinker.cloned(),
                    stats,
                }
            })
            .collect()
    }
}

// Private Helper Types and Methods ====================================================================================

/// A candidate that has been MGX-scored, but not yet ranked
struct Pending<'a> {
    alpha: &'a Arc<Peptide>,
    beta: Option<&'a Arc<Peptide>>,
    crosslinker: Option<&'a Arc<CrossLinker>>,
    beta_count: usize,
    mgx: f64,
}

impl CandidateScorer {
    /// Multiplies together how common every fragment explaining a peak is, counting each peak once
    ///
    /// Fragments carrying the whole of the other peptide aren't in the fragment index, so they're looked up by the
    /// m/z of their linear complement instead
    fn pair_mgx_score(&self, spectrum: &Spectrum, alpha: &Peptide, beta: &Peptide, crosslinker: &CrossLinker) -> f64 {
        let total = self.fragments.fragment_count();
        if total == 0 {
            return 1.0;
        }

        let alpha_primary = self.fragmentation.primary(alpha);
        let beta_primary = self.fragmentation.primary(beta);
        let linked: Vec<_> = self
            .producers
            .iter()
            .flat_map(|producer| producer.produce(&alpha_primary, &beta_primary, crosslinker))
            .collect();
        let fragments = alpha_primary.iter().chain(&linked).chain(&beta_primary);

        self.matched_peak_mzs(spectrum, fragments)
            .into_iter()
            .fold(1.0, |score, mz| {
                // NOTE: Peaks that no indexed fragment explains would zero the score, so they count as one
                score * self.fragments.count_peptides(mz).max(1) as f64 / total as f64
            })
    }

    /// Like `pair_mgx_score()`, but counting the fragments of `peptide` itself as part of the index
    fn linear_mgx_score(&self, spectrum: &Spectrum, peptide: &Peptide) -> f64 {
        let primary = self.fragmentation.primary(peptide);
        let total = (self.fragments.fragment_count() + primary.len() as u64) as f64;
        if total == 0.0 {
            return 1.0;
        }

        self.matched_peak_mzs(spectrum, primary.iter())
            .into_iter()
            .fold(1.0, |score, mz| {
                score * (self.fragments.count_peptides(mz) + 1) as f64 / total
            })
    }

    /// The m/z to look up in the fragment index for every peak explained by `fragments` at charge 1
    fn matched_peak_mzs<'a, 'p: 'a>(
        &self,
        spectrum: &Spectrum,
        fragments: impl Iterator<Item = &'a Fragment<'p>>,
    ) -> Vec<f64> {
        let tolerance = self.fragments.tolerance();
        let mut matched = HashSet::new();
        let mut mzs = Vec::new();
        for fragment in fragments {
            let Some(peak) = spectrum.peak_index_at(fragment.mz(1), &tolerance) else {
                continue;
            };
            if !matched.insert(peak) {
                continue;
            }
            match fragment.linkage() {
                // NOTE: Two whole peptides joined together is the precursor, which says nothing about either of them
                Linkage::Partner { .. } if fragment.is_peptide_ion() => (),
                Linkage::Partner { .. } => {
                    mzs.push(fragment.peptide().mass() - fragment.unlinked_mass() + PROTON_MASS);
                }
                Linkage::Unlinked | Linkage::Stub(_) => mzs.push(spectrum.peaks()[peak].mz),
            }
        }
        mzs
    }
}

/// `-ln(p)` of the first probability after the best one that isn't tied with it, or `0.0` if there is none
fn second_distinct_score(mut probabilities: impl Iterator<Item = f64>) -> f64 {
    let Some(best) = probabilities.next() else {
        return 0.0;
    };
    probabilities.find(|&p| p != best).map_or(0.0, |p| -p.ln())
}

// Module Tests ========================================================================================================

#[cfg(test)]
mod tests {
    use assert_float_eq::assert_float_absolute_eq;
    use once_cell::sync::Lazy;
    use polychem::{IdSequence, ProteinSource, ResidueDatabase, Specificity};
    use sifter::{MassIndexBuilder, Peak};
    use smithereens::{Dissociable, IonSeries, PeptideIonProducer};

    use super::*;
    use crate::ProteinGroupFilter;

    static DB: Lazy<ResidueDatabase> = Lazy::new(ResidueDatabase::default);

    const BS3_MASS: f64 = 138.068_08;

    fn bs3() -> Arc<CrossLinker> {
        Arc::new(CrossLinker::symmetric("BS3", BS3_MASS, Specificity::new(['K'])))
    }

    fn config() -> SearchConfig {
        SearchConfig {
            threads: 2,
            crosslinkers: vec![bs3()],
            ..SearchConfig::default()
        }
    }

    fn scorer(sequences: &[(&str, &str)], config: &SearchConfig) -> CandidateScorer {
        let ids = IdSequence::new();
        let mut builder = MassIndexBuilder::new(config.precursor_tolerance);
        for &(sequence, accession) in sequences {
            let source = ProteinSource::new(accession, 10, 100);
            builder.insert(Peptide::new(&DB, &ids, sequence, false, [source]).unwrap());
        }
        let peptides = Arc::new(builder.finalize());
        let producers: Vec<Arc<dyn CrossLinkedFragmentProducer>> = vec![Arc::new(PeptideIonProducer)];
        let fragments = FragmentIndex::build(peptides.iter(), &config.fragment_index_settings(&producers)).unwrap();
        CandidateScorer::new(config, peptides, Arc::new(fragments), &producers)
    }

    fn peptide(sequence: &str) -> Peptide {
        Peptide::new(&DB, &IdSequence::new(), sequence, false, []).unwrap()
    }

    fn spectrum(mzs: impl IntoIterator<Item = f64>, precursor_mass: f64, charge: u32) -> Spectrum {
        let peaks = mzs.into_iter().map(|mz| Peak::new(mz, 100.0)).collect();
        let precursor_mz = precursor_mass / f64::from(charge) + PROTON_MASS;
        Spectrum::new("run", 1, precursor_mz, charge, peaks)
    }

    const PEPTIDES: [(&str, &str); 6] = [
        ("PEPTIDE", "P1"),
        ("PEPKAR", "P1"),
        ("GKLVR", "P1"),
        ("SAMPLER", "P2"),
        ("ELVISK", "P2"),
        ("KIDNEY", "P3"),
    ];

    fn pair_spectrum() -> Spectrum {
        let alpha = peptide("PEPKAR");
        let beta = peptide("GKLVR");
        let b_ions = alpha.fragment(&[IonSeries::B]);
        let y_ions = beta.fragment(&[IonSeries::Y]);
        let mzs = b_ions[..3].iter().chain(&y_ions[2..]).map(|fragment| fragment.mz(1));
        spectrum(mzs, alpha.mass() + beta.mass() + BS3_MASS, 3)
    }

    fn pair_names(candidates: &[Candidate]) -> Vec<(String, String)> {
        candidates
            .iter()
            .filter_map(|candidate| {
                let beta = candidate.beta.as_ref()?;
                Some((candidate.alpha.sequence(), beta.sequence()))
            })
            .collect()
    }

    #[test]
    fn stats_for_pairs() {
        let stats = CandidateStats {
            alpha_mgc: 0.01,
            beta_mgc: Some(0.1),
            mgx: 0.001,
            second_mgc: 2.0,
            second_mgx: 3.0,
            mgc_rank: 2,
            mgx_rank: 1,
            alpha_considered: 5,
            alpha_count: 20,
            beta_count: 4,
        };
        let pep = Arc::new(peptide("PEPKAR"));
        let spectrum = Arc::new(pair_spectrum());
        let mut matched = MatchedXlinkedPeptide::new(spectrum, Arc::clone(&pep), Some(pep), Some(bs3()));
        stats.record(&mut matched);

        assert_float_absolute_eq!(matched.score("mgcAlpha"), -(0.01_f64).ln());
        assert_float_absolute_eq!(matched.score("mgcBeta"), -(0.1_f64).ln());
        assert_float_absolute_eq!(matched.score("mgcScore"), -(0.001_f64).ln());
        assert_float_absolute_eq!(matched.score("mgcDelta"), -(0.001_f64).ln() - 2.0);
        assert_float_absolute_eq!(matched.score("mgcAlphaBeta"), -(0.109_f64).ln());
        assert_float_absolute_eq!(matched.score("mgxScore"), -(0.001_f64).ln());
        assert_float_absolute_eq!(matched.score("mgxDelta"), -(0.001_f64).ln() - 3.0);
        assert_eq!(matched.score("mgcRank"), 2.0);
        assert_eq!(matched.score("alphaCount"), 20.0);
        assert_eq!(matched.score("betaCountInverse"), 0.25);
    }

    #[test]
    fn stats_for_linears() {
        let pep = Arc::new(peptide("PEPTIDE"));
        let spectrum = Arc::new(spectrum([], pep.mass(), 2));
        let mut matched = MatchedXlinkedPeptide::new(spectrum, pep, None, None);

        let stats = CandidateStats {
            alpha_mgc: 0.5,
            mgx: 0.25,
            second_mgc: 0.1,
            ..CandidateStats::default()
        };
        stats.record(&mut matched);
        assert_float_absolute_eq!(matched.score("mgcScore"), -(0.5_f64).ln());
        assert_float_absolute_eq!(matched.score("mgcDelta"), -(0.5_f64).ln() - 0.1);
        assert_eq!(matched.score("mgcBeta"), 0.0);
        assert_eq!(matched.score("betaCountInverse"), 0.0);

        // A linear that MGC never scored takes its MGX score as its MGC score
        let stats = CandidateStats {
            mgx: 0.25,
            ..CandidateStats::default()
        };
        stats.record(&mut matched);
        assert_float_absolute_eq!(matched.score("mgcScore"), -(0.25_f64).ln());
        assert_eq!(matched.score("mgcAlpha"), 0.0);
    }

    #[test]
    fn linear_candidates() {
        let scorer = scorer(&PEPTIDES, &config());
        let pep = peptide("PEPTIDE");
        let mzs = pep.fragment(&[IonSeries::Y]).iter().map(|y| y.mz(1)).collect::<Vec<_>>();
        let candidates = scorer.candidates(&spectrum(mzs, pep.mass(), 2));

        let top = &candidates[0];
        assert_eq!(top.alpha.sequence(), "PEPTIDE");
        assert!(!top.is_cross_linked() && top.crosslinker.is_none());
        assert!(top.stats.mgx < 1.0);
        assert!(top.stats.alpha_mgc < 1.0);
        assert_eq!(top.stats.mgx_rank, 1);
        assert_eq!(top.stats.mgc_rank, 1);
        assert!(top.stats.alpha_considered >= 1);
    }

    #[test]
    fn pairs_are_only_proposed_once() {
        let mut reversed = PEPTIDES;
        reversed.reverse();
        for peptides in [PEPTIDES, reversed] {
            let scorer = scorer(&peptides, &config());
            let candidates = scorer.candidates(&pair_spectrum());
            let mut pairs: Vec<_> = pair_names(&candidates)
                .into_iter()
                .map(|(a, b)| if a < b { (a, b) } else { (b, a) })
                .collect();
            pairs.sort();
            assert_eq!(pairs, [("GKLVR".to_owned(), "PEPKAR".to_owned())]);

            let pair = candidates.iter().find(|c| c.is_cross_linked()).unwrap();
            assert_eq!(pair.crosslinker.as_ref().unwrap().name(), "BS3");
            assert!(pair.stats.beta_mgc.is_some());
            assert_eq!(pair.stats.beta_count, 1);
        }
    }

    #[test]
    fn pair_filters_reject_pairs() {
        let peptides = [("PEPKAR", "P1"), ("GKLVR", "P2"), ("SAMPLER", "P3")];
        let unfiltered = scorer(&peptides, &config());
        assert_eq!(pair_names(&unfiltered.candidates(&pair_spectrum())).len(), 1);

        let filtered = scorer(&peptides, &config()).with_pair_filter(ProteinGroupFilter);
        assert!(pair_names(&filtered.candidates(&pair_spectrum())).is_empty());
    }

    #[test]
    fn non_linkable_pairs_are_skipped() {
        let config = SearchConfig {
            crosslinkers: vec![Arc::new(CrossLinker::symmetric(
                "Cys-linker",
                BS3_MASS,
                Specificity::new(['C']),
            ))],
            ..config()
        };
        let scorer = scorer(&PEPTIDES, &config);
        assert!(pair_names(&scorer.candidates(&pair_spectrum())).is_empty());
    }

    #[test]
    fn empty_spectra_have_no_candidates() {
        let scorer = scorer(&PEPTIDES, &config());
        let pep = peptide("PEPTIDE");
        assert!(scorer.candidates(&spectrum([], pep.mass(), 2)).is_empty());
    }

    #[test]
    fn second_distinct_scores() {
        assert_eq!(second_distinct_score([].into_iter()), 0.0);
        assert_eq!(second_distinct_score([0.1, 0.1].into_iter()), 0.0);
        assert_float_absolute_eq!(second_distinct_score([0.1, 0.1, 0.5, 0.7].into_iter()), -(0.5_f64).ln());
    }

    // NOTE: `PEMK` and `EPMK` share their b2, y1 and y2 ions, `PEMoxK` only its b2 and y1, and `GGK` only its y1
    const SHUFFLED: [(&str, &str); 4] = [("PEMK", "P1"), ("EPMK", "P2"), ("PEMoxK", "P1"), ("GGK", "P3")];

    fn shuffled_spectrum(precursor_mass: f64) -> Spectrum {
        let pemk = peptide("PEMK");
        let b_ions = pemk.fragment(&[IonSeries::B]);
        let y_ions = pemk.fragment(&[IonSeries::Y]);
        let mzs = [&b_ions[1], &y_ions[1], &y_ions[2]].map(|fragment| fragment.mz(1));
        spectrum(mzs, precursor_mass, 1)
    }

    #[test]
    fn deltas_skip_tied_candidates() {
        let scorer = scorer(&SHUFFLED, &config());
        let total = scorer.fragments().fragment_count() as f64;
        // NOTE: `PEMoxK` is too heavy to be an alpha here
        let candidates = scorer.candidates(&shuffled_spectrum(peptide("PEMK").mass()));

        let mut linears: Vec<_> = candidates.iter().map(|c| c.alpha.sequence()).collect();
        linears.sort();
        assert_eq!(linears, ["EPMK", "PEMK"]);

        for candidate in &candidates {
            let stats = candidate.stats;
            assert_float_absolute_eq!(stats.alpha_mgc, 3.0 * 2.0 * 2.0 / total.powi(3), 1e-15);
            assert_float_absolute_eq!(stats.second_mgc, -(3.0 / total).ln(), 1e-9);
            assert_eq!(stats.mgx_rank, 1);
            assert_eq!(stats.second_mgx, 0.0);

            let spectrum = Arc::new(shuffled_spectrum(candidate.alpha.mass()));
            let mut matched = MatchedXlinkedPeptide::new(spectrum, Arc::clone(&candidate.alpha), None, None);
            stats.record(&mut matched);
            assert_float_absolute_eq!(matched.score("mgcDelta"), (total * total / 4.0).ln(), 1e-9);
            assert_float_absolute_eq!(matched.score("mgxDelta"), matched.score("mgxScore"));
        }
    }

    #[test]
    fn mgc_ranks_keep_ties_and_modified_forms() {
        let config = SearchConfig {
            top_mgc_hits: 1,
            ..config()
        };
        let scorer = scorer(&SHUFFLED, &config);
        let total = scorer.fragments().fragment_count() as f64;
        let candidates = scorer.candidates(&shuffled_spectrum(peptide("PEMoxK").mass()));

        let [oxidised] = candidates.as_slice() else {
            panic!("expected a single linear candidate, got {candidates:?}");
        };
        assert_eq!(oxidised.alpha.sequence(), "PEMoxK");
        // NOTE: `PEMoxK` scores worse than `PEMK`, but shares its rank
        assert_eq!(oxidised.stats.mgc_rank, 1);
        // NOTE: `PEMK` and its tie `EPMK` advance along with `PEMoxK`, but `GGK` ranks second and is left out
        assert_eq!(oxidised.stats.alpha_considered, 3);
        assert_eq!(oxidised.stats.alpha_count, 4);
        assert_float_absolute_eq!(oxidised.stats.alpha_mgc, 4.0 * 3.0 / total.powi(2), 1e-12);
        assert_float_absolute_eq!(oxidised.stats.second_mgc, -(4.0 * 3.0 / total.powi(2)).ln(), 1e-9);
    }
}
