// Standard Library Imports
use std::{ptr, sync::Arc};

// External Crate Imports
use log::trace;
use polychem::{CrossLinker, Peptide};
use sifter::{Spectrum, Tolerance};
use smithereens::{CrossLinkedFragmentProducer, Fragment, Fragmentation};

// Local Crate Imports
use crate::{
    CandidateStats, CleanUpMatchedPeaks, DefinePrimaryFragmentMatches, FragmentCoverage, FragmentError,
    MatchFilter, MatchScore, MatchedFragment, MatchedXlinkedPeptide, ScorePlugin, SearchConfig, Side,
    SpectraCoverage,
};

// Public API ==========================================================================================================

/// How conflicting evidence is weighed when deciding where on each peptide the cross-linker sits
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum WeightingStrategy {
    /// Every fragment that disagrees with a site counts the same
    #[default]
    Standard,
    /// Disagreeing fragments count in proportion to the intensity of their peak, with lossy and cross-linked
    /// fragments discounted
    Weighted,
    /// Like `Weighted`, but each peptide is localised against all of its partners merged into one
    WeightedNary,
}

/// Turns candidates into fully annotated and scored matches
#[derive(Debug)]
pub struct MatchEvaluator {
    tolerance: Tolerance,
    fragmentation: Fragmentation,
    weighting: WeightingStrategy,
    producers: Vec<Arc<dyn CrossLinkedFragmentProducer>>,
    filters: Vec<Box<dyn MatchFilter>>,
    plugins: Vec<Box<dyn ScorePlugin>>,
}

impl MatchEvaluator {
    /// An evaluator with the standard clean-up filters and score plugins
    #[must_use]
    pub fn new(config: &SearchConfig, producers: &[Arc<dyn CrossLinkedFragmentProducer>]) -> Self {
        Self {
            tolerance: config.fragment_tolerance,
            fragmentation: config.fragmentation.clone(),
            weighting: config.weighting,
            producers: producers.to_vec(),
            filters: vec![Box::new(CleanUpMatchedPeaks), Box::new(DefinePrimaryFragmentMatches)],
            plugins: vec![
                Box::new(FragmentCoverage::default()),
                Box::new(SpectraCoverage),
                Box::new(FragmentError),
                Box::new(MatchScore::default()),
            ],
        }
    }

    /// Replaces the score plugins, which run in the order given
    #[must_use]
    pub fn with_plugins(mut self, plugins: Vec<Box<dyn ScorePlugin>>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Adds a plugin that runs after all of the others
    #[must_use]
    pub fn with_plugin(mut self, plugin: impl ScorePlugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    #[must_use]
    pub const fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Matches every theoretical fragment of a candidate against `spectrum` and scores the result
    ///
    /// Returns `None` when not a single fragment matched, since a match without evidence is never reported
    #[must_use]
    pub fn evaluate(
        &self,
        spectrum: &Arc<Spectrum>,
        alpha: &Arc<Peptide>,
        beta: Option<&Arc<Peptide>>,
        crosslinker: Option<&Arc<CrossLinker>>,
        stats: &CandidateStats,
    ) -> Option<MatchedXlinkedPeptide> {
        let mut matched = MatchedXlinkedPeptide::new(
            Arc::clone(spectrum),
            Arc::clone(alpha),
            beta.cloned(),
            crosslinker.cloned(),
        );

        let fragments = self.theoretical_fragments(alpha, beta, crosslinker.map(Arc::as_ref));
        for (fragment, side) in &fragments {
            for charge in 1..=spectrum.precursor_charge() {
                if let Some(peak) = spectrum.peak_index_at(fragment.mz(charge), &self.tolerance) {
                    matched
                        .fragments_mut()
                        .push(MatchedFragment::new(fragment, *side, charge, spectrum, peak));
                }
            }
        }
        trace!(
            "matched {} of {} fragments for {} in scan {}",
            matched.fragments().len(),
            fragments.len(),
            candidate_name(alpha, beta),
            spectrum.scan()
        );

        if let Some(beta) = beta {
            matched.set_might_be_linear(alpha.is_consecutive(beta));
        }
        if let (Some(beta), Some(crosslinker)) = (beta, crosslinker) {
            if !crosslinker.is_non_covalent() {
                self.localise(&mut matched, alpha, beta, crosslinker);
            }
        }

        for filter in &self.filters {
            filter.filter(&mut matched, &self.tolerance);
        }
        if matched.fragments().is_empty() {
            return None;
        }

        stats.record(&mut matched);
        for plugin in &self.plugins {
            plugin.score(&mut matched, &self.tolerance);
        }
        Some(matched)
    }
}

// Private Helper Methods ==============================================================================================

impl MatchEvaluator {
    /// Primary and lossy fragments of both peptides, plus everything the producers build from the pair
    fn theoretical_fragments<'p>(
        &self,
        alpha: &'p Peptide,
        beta: Option<&'p Arc<Peptide>>,
        crosslinker: Option<&CrossLinker>,
    ) -> Vec<(Fragment<'p>, Side)> {
        let alpha_primary = self.fragmentation.primary(alpha);
        let beta_primary = beta.map_or_else(Vec::new, |beta| self.fragmentation.primary(beta));

        let mut linked = Vec::new();
        if let (Some(_), Some(crosslinker)) = (beta, crosslinker) {
            for producer in &self.producers {
                linked.extend(producer.produce(&alpha_primary, &beta_primary, crosslinker));
            }
        }

        let side_of = |fragment: &Fragment<'_>| {
            if ptr::eq(fragment.peptide(), alpha) {
                Side::Alpha
            } else {
                Side::Beta
            }
        };
        let mut fragments: Vec<_> = alpha_primary
            .into_iter()
            .map(|fragment| (fragment, Side::Alpha))
            .chain(beta_primary.into_iter().map(|fragment| (fragment, Side::Beta)))
            .chain(linked.into_iter().map(|fragment| {
                let side = side_of(&fragment);
                (fragment, side)
            }))
            .collect();

        let lossy: Vec<_> = fragments
            .iter()
            .flat_map(|(fragment, side)| {
                self.fragmentation
                    .lossy(std::slice::from_ref(fragment))
                    .into_iter()
                    .map(move |lossy| (lossy, *side))
            })
            .collect();
        fragments.extend(lossy);
        fragments
    }

    /// Picks the link site on each peptide that the matched fragments contradict the least, then drops the
    /// fragments that contradict it
    fn localise(
        &self,
        matched: &mut MatchedXlinkedPeptide,
        alpha: &Peptide,
        beta: &Peptide,
        crosslinker: &CrossLinker,
    ) {
        let max_intensity = matched.spectrum().max_intensity();
        for (side, peptide) in [(Side::Alpha, alpha), (Side::Beta, beta)] {
            let sites = crosslinker.linkable_sites(peptide);
            let miss = |site: usize| -> f64 {
                matched
                    .fragments()
                    .iter()
                    .filter(|fragment| fragment.side == side && !fragment.supports_site(site))
                    .map(|fragment| self.miss_weight(fragment, max_intensity))
                    .sum()
            };
            // NOTE: Ties go to the first linkable site
            let mut best: Option<(usize, f64)> = None;
            for site in sites {
                let misses = miss(site);
                if best.is_none_or(|(_, fewest)| misses < fewest) {
                    best = Some((site, misses));
                }
            }
            let site = best.map(|(site, _)| site);
            matched.set_link_site(side, site);
            if let Some(site) = site {
                matched
                    .fragments_mut()
                    .retain(|fragment| fragment.side != side || fragment.supports_site(site));
            }
        }
    }

    fn miss_weight(&self, fragment: &MatchedFragment, max_intensity: f64) -> f64 {
        match self.weighting {
            WeightingStrategy::Standard => 1.0,
            WeightingStrategy::Weighted | WeightingStrategy::WeightedNary => {
                let weight = if max_intensity > 0.0 {
                    fragment.peak_intensity / max_intensity
                } else {
                    0.0
                };
                if fragment.is_lossy() {
                    if fragment.loss_count < 3 {
                        weight / (10.0 * fragment.loss_count as f64)
                    } else {
                        0.0
                    }
                } else if fragment.is_cross_linked() {
                    weight / 10.0
                } else {
                    weight
                }
            }
        }
    }
}

fn candidate_name(alpha: &Peptide, beta: Option<&Arc<Peptide>>) -> String {
    beta.map_or_else(|| alpha.sequence(), |beta| format!("{} x {}", alpha.sequence(), beta.sequence()))
}

// Module Tests ========================================================================================================

#[cfg(test)]
mod tests {
    use once_cell::sync::Lazy;
    use polychem::{IdSequence, ResidueDatabase, Specificity};
    use sifter::Peak;
    use smithereens::{Dissociable, IonSeries, PeptideIonProducer};

    use super::*;
    use crate::{FragmentLinkage, MATCH_SCORE};

    static DB: Lazy<ResidueDatabase> = Lazy::new(ResidueDatabase::default);
    static IDS: IdSequence = IdSequence::new();

    fn peptide(sequence: &str) -> Arc<Peptide> {
        Arc::new(Peptide::new(&DB, &IDS, sequence, false, []).unwrap())
    }

    fn evaluator(weighting: WeightingStrategy) -> MatchEvaluator {
        let config = SearchConfig {
            weighting,
            ..SearchConfig::default()
        };
        let producers: Vec<Arc<dyn CrossLinkedFragmentProducer>> = vec![Arc::new(PeptideIonProducer)];
        MatchEvaluator::new(&config, &producers)
    }

    fn spectrum_with(mzs: &[f64], precursor_mz: f64, charge: u32) -> Arc<Spectrum> {
        let peaks = mzs.iter().map(|&mz| Peak::new(mz, 100.0)).collect();
        Arc::new(Spectrum::new("run", 42, precursor_mz, charge, peaks))
    }

    #[test]
    fn no_evidence_no_match() {
        let pep = peptide("PEPTIDE");
        let spectrum = spectrum_with(&[50.0, 51.0], 400.687, 2);
        let evaluator = evaluator(WeightingStrategy::Standard);
        assert!(
            evaluator
                .evaluate(&spectrum, &pep, None, None, &CandidateStats::default())
                .is_none()
        );
    }

    #[test]
    fn linear_match() {
        let pep = peptide("PEPTIDE");
        let y_ions = pep.fragment(&[IonSeries::Y]);
        let mzs: Vec<_> = y_ions.iter().take(3).map(|y| y.mz(1)).collect();
        let spectrum = spectrum_with(&mzs, pep.mass() / 2.0 + polychem::PROTON_MASS, 2);

        let evaluator = evaluator(WeightingStrategy::Standard);
        let matched = evaluator
            .evaluate(&spectrum, &pep, None, None, &CandidateStats::default())
            .unwrap();
        assert!(matched.is_linear());
        let names: Vec<_> = matched
            .fragments()
            .iter()
            .filter(|f| f.primary)
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, ["y6", "y5", "y4"]);
        assert!(matched.has_score(MATCH_SCORE));
        assert_eq!(matched.score("fragment non lossy matched"), 3.0);
        assert_eq!(matched.score("spectrum peaks coverage"), 1.0);
    }

    #[test]
    fn cross_link_localisation() {
        let alpha = peptide("PEPKAR");
        let beta = peptide("GKLVR");
        let linker = Arc::new(CrossLinker::symmetric("BS3", 138.068_08, Specificity::new(['K'])));

        // Unlinked b1-b3 of alpha rule out a link before the K, and b4 carrying beta confirms it
        let b_ions = alpha.fragment(&[IonSeries::B]);
        let b4_linked = b_ions[3].linked_to(&beta, linker.mass());
        let mut mzs: Vec<_> = b_ions.iter().take(3).map(|b| b.mz(1)).collect();
        mzs.push(b4_linked.mz(1));
        // And beta's y2 (VR) leaves the K at position 1 as its only site
        mzs.push(beta.fragment(&[IonSeries::Y])[2].mz(1));
        let precursor = alpha.mass() + beta.mass() + linker.mass();
        let spectrum = spectrum_with(&mzs, precursor / 3.0 + polychem::PROTON_MASS, 3);

        for weighting in [
            WeightingStrategy::Standard,
            WeightingStrategy::Weighted,
            WeightingStrategy::WeightedNary,
        ] {
            let matched = evaluator(weighting)
                .evaluate(&spectrum, &alpha, Some(&beta), Some(&linker), &CandidateStats::default())
                .unwrap();
            assert_eq!(matched.link_site(Side::Alpha), Some(3));
            assert_eq!(matched.link_site(Side::Beta), Some(1));
            assert!(
                matched
                    .fragments()
                    .iter()
                    .any(|f| f.linkage == FragmentLinkage::CrossLinked && f.side == Side::Alpha)
            );
        }
    }

    #[test]
    fn conflicting_fragments_are_dropped() {
        let alpha = peptide("KPEPKR");
        let beta = peptide("GKLVR");
        let linker = Arc::new(CrossLinker::symmetric("BS3", 138.068_08, Specificity::new(['K'])));

        let b_ions = alpha.fragment(&[IonSeries::B]);
        let mut mzs: Vec<_> = b_ions[1..4].iter().map(|b| b.mz(1)).collect();
        // An unlinked b5 contradicts the unlinked b2-b4, which already rule out the first K
        mzs.push(b_ions[4].mz(1));
        let precursor = alpha.mass() + beta.mass() + linker.mass();
        let spectrum = spectrum_with(&mzs, precursor / 3.0 + polychem::PROTON_MASS, 3);

        let matched = evaluator(WeightingStrategy::Standard)
            .evaluate(&spectrum, &alpha, Some(&beta), Some(&linker), &CandidateStats::default())
            .unwrap();
        // Site 0 is contradicted by b2, b3, b4, and b5, while site 4 is only contradicted by b5
        assert_eq!(matched.link_site(Side::Alpha), Some(4));
        assert!(matched.fragments().iter().all(|f| f.name != "b5"));
    }
}
