// Standard Library Imports
use std::{collections::BTreeSet, fmt::Debug};

// External Crate Imports
use ahash::{HashMap, HashMapExt};
use sifter::Tolerance;
use smithereens::IonSeries;

// Local Crate Imports
use crate::{MATCH_SCORE, MatchedFragment, MatchedXlinkedPeptide, Side};

// Public API ==========================================================================================================

/// Adds one or more named scores to a match
pub trait ScorePlugin: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, matched: &mut MatchedXlinkedPeptide, tolerance: &Tolerance);
}

/// Counts how many of the backbone bonds of each peptide are explained by at least one fragment
///
/// Every bond can be seen from both ends (as a b or a y ion), so a peptide of length `n` has `2 * (n - 1)` sites that
/// could be matched. Scores are written both per peptide (`"peptide1 ..."`, `"peptide2 ..."`) and for the whole match
/// (`"fragment ..."`).
#[derive(Copy, Clone, Debug)]
pub struct FragmentCoverage {
    /// How many lossy matches a site needs before it counts towards the conservative coverage
    conservative_losses: usize,
}

impl Default for FragmentCoverage {
    fn default() -> Self {
        Self {
            conservative_losses: 3,
        }
    }
}

impl FragmentCoverage {
    #[must_use]
    pub const fn new(conservative_losses: usize) -> Self {
        Self {
            conservative_losses,
        }
    }
}

impl ScorePlugin for FragmentCoverage {
    fn name(&self) -> &str {
        "FragmentCoverage"
    }

    fn score(&self, matched: &mut MatchedXlinkedPeptide, _tolerance: &Tolerance) {
        let mut sides = [SiteCounts::default(), SiteCounts::default()];
        let mut all_non_lossy = [0_usize; 2];
        let mut all_lossy = [0_usize; 2];
        for fragment in matched.fragments().iter().filter(|f| f.is_backbone()) {
            let side = fragment.side.index();
            if fragment.is_lossy() {
                all_lossy[side] += 1;
            } else {
                all_non_lossy[side] += 1;
            }
            sides[side].add(fragment);
        }

        let mut whole = Summary::default();
        let mut possible = 0.0;
        let peptide_lengths: Vec<_> = matched.peptides().map(|peptide| peptide.len()).collect();
        for (p, &length) in peptide_lengths.iter().enumerate() {
            let prefix = format!("peptide{} ", p + 1);
            let sites = length.saturating_sub(1) as f64 * 2.0;
            possible += sites;
            let summary = sides[p].summarise(self.conservative_losses);
            matched.set_score(format!("{prefix}total fragment matches"), all_non_lossy[p] as f64);
            matched.set_score(format!("{prefix}lossy fragment matches"), all_lossy[p] as f64);
            summary.write(matched, &prefix, sites);
            whole.add(&summary);
        }

        let total_non_lossy: usize = all_non_lossy.iter().sum();
        let total_lossy: usize = all_lossy.iter().sum();
        matched.set_score("total fragment matches", total_non_lossy as f64);
        matched.set_score("lossy fragment matches", total_lossy as f64);
        whole.write(matched, "fragment ", possible);
    }
}

/// How much of the spectrum, by peak count and by intensity, the matched fragments explain
#[derive(Copy, Clone, Debug, Default)]
pub struct SpectraCoverage;

impl ScorePlugin for SpectraCoverage {
    fn name(&self) -> &str {
        "SpectraCoverage"
    }

    fn score(&self, matched: &mut MatchedXlinkedPeptide, _tolerance: &Tolerance) {
        let spectrum = matched.spectrum();
        let peaks = spectrum.peaks();
        let matched_peaks = matched.matched_peaks();
        let non_lossy_peaks: BTreeSet<_> = matched
            .fragments()
            .iter()
            .filter(|fragment| !fragment.is_lossy())
            .map(|fragment| fragment.peak)
            .collect();

        let total_intensity = spectrum.total_intensity();
        let intensity = |indices: &BTreeSet<usize>| -> f64 { indices.iter().map(|&i| peaks[i].intensity).sum() };
        let fraction = |part: f64, whole: f64| if whole > 0.0 { part / whole } else { 0.0 };

        let mut by_intensity: Vec<_> = (0..peaks.len()).collect();
        by_intensity.sort_by(|&a, &b| peaks[b].intensity.total_cmp(&peaks[a].intensity));
        let top_matched = |n: usize| {
            let top = &by_intensity[..n.min(by_intensity.len())];
            let found = top.iter().filter(|i| matched_peaks.contains(i)).count();
            fraction(found as f64, top.len() as f64)
        };

        let scores = [
            (
                "spectrum intensity coverage",
                fraction(intensity(&matched_peaks), total_intensity),
            ),
            (
                "spectra intensity nonlossy coverage",
                fraction(intensity(&non_lossy_peaks), total_intensity),
            ),
            (
                "spectrum peaks coverage",
                fraction(matched_peaks.len() as f64, peaks.len() as f64),
            ),
            ("spectra top10 matched%", top_matched(10)),
            ("spectra top20 matched%", top_matched(20)),
            ("spectra top40 matched%", top_matched(40)),
            ("spectra top100 matched%", top_matched(100)),
        ];
        for (name, value) in scores {
            matched.set_score(name, value);
        }
    }
}

/// The mean absolute mass error of the primary fragment matches, overall and split by where the fragment came from
#[derive(Copy, Clone, Debug, Default)]
pub struct FragmentError;

pub const AVERAGE_MS2_ERROR: &str = "AverageMS2Error";
pub const AVERAGE_MS2_ERROR_PEPTIDE1: &str = "AverageMS2ErrorPeptide1";
pub const AVERAGE_MS2_ERROR_PEPTIDE2: &str = "AverageMS2ErrorPeptide2";
pub const AVERAGE_MS2_ERROR_CROSSLINKED: &str = "AverageMS2ErrorCrossLinked";

impl ScorePlugin for FragmentError {
    fn name(&self) -> &str {
        "FragmentError"
    }

    fn score(&self, matched: &mut MatchedXlinkedPeptide, tolerance: &Tolerance) {
        let mut groups: [Vec<f64>; 4] = Default::default();
        for fragment in matched.fragments().iter().filter(|f| f.primary) {
            let error = fragment.error(tolerance).abs();
            groups[0].push(error);
            let group = if fragment.is_cross_linked() {
                3
            } else {
                match fragment.side {
                    Side::Alpha => 1,
                    Side::Beta => 2,
                }
            };
            groups[group].push(error);
        }

        let names = [
            AVERAGE_MS2_ERROR,
            AVERAGE_MS2_ERROR_PEPTIDE1,
            AVERAGE_MS2_ERROR_PEPTIDE2,
            AVERAGE_MS2_ERROR_CROSSLINKED,
        ];
        for (name, errors) in names.into_iter().zip(groups) {
            let mean = if errors.is_empty() {
                0.0
            } else {
                errors.iter().sum::<f64>() / errors.len() as f64
            };
            matched.set_score(name, mean);
        }
    }
}

/// One score that feeds into the match score, with the distribution it's normalised against
#[derive(Clone, PartialEq, Debug)]
pub struct ScoreTerm {
    pub name: String,
    pub average: f64,
    pub stdev: f64,
    pub weight: f64,
}

impl ScoreTerm {
    pub fn new(name: impl Into<String>, average: f64, stdev: f64, weight: f64) -> Self {
        let name = name.into();
        Self {
            name,
            average,
            stdev,
            weight,
        }
    }
}

/// Combines other scores into the single `"match score"` that matches are ranked by
///
/// Every term present on the match is normalised to a z-score, weighted, and averaged over the number of terms that
/// gave a finite value. Terms missing from the match are skipped, and a match with no usable terms scores `0.0`.
#[derive(Clone, Debug)]
pub struct MatchScore {
    terms: Vec<ScoreTerm>,
}

impl MatchScore {
    #[must_use]
    pub const fn new(terms: Vec<ScoreTerm>) -> Self {
        Self { terms }
    }

    #[must_use]
    pub fn terms(&self) -> &[ScoreTerm] {
        &self.terms
    }
}

impl Default for MatchScore {
    fn default() -> Self {
        Self::new(vec![
            ScoreTerm::new("fragment unique matched non lossy coverage", 0.25, 0.15, 3.0),
            ScoreTerm::new("fragment unique matched lossy coverage", 0.1, 0.1, 0.5),
            ScoreTerm::new("fragment coverage", 0.3, 0.15, 1.0),
            ScoreTerm::new("spectrum intensity coverage", 0.25, 0.15, 2.0),
            ScoreTerm::new("spectrum peaks coverage", 0.15, 0.1, 1.0),
            ScoreTerm::new("peptide2 unique matched non lossy coverage", 0.2, 0.15, 1.0),
        ])
    }
}

impl ScorePlugin for MatchScore {
    fn name(&self) -> &str {
        MATCH_SCORE
    }

    fn score(&self, matched: &mut MatchedXlinkedPeptide, _tolerance: &Tolerance) {
        let mut combined = 0.0;
        let mut count = 0;
        for term in &self.terms {
            if !matched.has_score(&term.name) {
                continue;
            }
            let normalised = (matched.score(&term.name) - term.average) / term.stdev;
            if normalised.is_finite() {
                combined += normalised * term.weight;
                count += 1;
            }
        }
        let score = if count == 0 { 0.0 } else { combined / f64::from(count) };
        matched.set_score(MATCH_SCORE, score);
    }
}

// Private Helper Types ================================================================================================

#[derive(Copy, Clone, Default, Debug)]
struct SiteCount {
    all: usize,
    lossy: usize,
    non_lossy: usize,
    primary: usize,
    lossy_primary: usize,
    non_lossy_primary: usize,
    cross_linked_primary: usize,
    non_lossy_cross_linked_primary: usize,
}

/// Match counts for every fragmentation site of one peptide, summed over all charge states
#[derive(Clone, Default, Debug)]
struct SiteCounts(HashMap<(bool, usize), SiteCount>);

impl SiteCounts {
    fn add(&mut self, fragment: &MatchedFragment) {
        let n_terminal = fragment.series == IonSeries::B;
        let site = self.0.entry((n_terminal, fragment.range.len())).or_default();
        site.all += 1;
        if fragment.is_lossy() {
            site.lossy += 1;
            if fragment.primary {
                site.lossy_primary += 1;
            }
        } else {
            site.non_lossy += 1;
            if fragment.primary {
                site.non_lossy_primary += 1;
            }
        }
        if fragment.primary {
            site.primary += 1;
            if fragment.is_cross_linked() {
                site.cross_linked_primary += 1;
                if !fragment.is_lossy() {
                    site.non_lossy_cross_linked_primary += 1;
                }
            }
        }
    }

    fn summarise(&self, conservative_losses: usize) -> Summary {
        let mut summary = Summary::default();
        for site in self.0.values() {
            let mut count = |condition: bool, total: &mut usize| {
                if condition {
                    *total += 1;
                }
            };
            count(site.all > 0, &mut summary.matched);
            count(site.non_lossy > 0, &mut summary.non_lossy);
            count(site.lossy > 0, &mut summary.lossy);
            count(site.primary > 0, &mut summary.unique);
            count(site.non_lossy_primary > 0, &mut summary.unique_non_lossy);
            count(site.lossy_primary > 0, &mut summary.unique_lossy);
            count(site.cross_linked_primary > 0, &mut summary.unique_cross_linked);
            count(
                site.non_lossy_cross_linked_primary > 0,
                &mut summary.unique_non_lossy_cross_linked,
            );
            count(
                site.non_lossy > 0 || site.lossy >= conservative_losses,
                &mut summary.conservative,
            );
        }
        summary
    }
}

/// Counts of matched sites, each site counted once no matter how many fragments or charges matched it
#[derive(Copy, Clone, Default, Debug)]
struct Summary {
    matched: usize,
    non_lossy: usize,
    lossy: usize,
    unique: usize,
    unique_non_lossy: usize,
    unique_lossy: usize,
    unique_cross_linked: usize,
    unique_non_lossy_cross_linked: usize,
    conservative: usize,
}

impl Summary {
    fn add(&mut self, other: &Self) {
        self.matched += other.matched;
        self.non_lossy += other.non_lossy;
        self.lossy += other.lossy;
        self.unique += other.unique;
        self.unique_non_lossy += other.unique_non_lossy;
        self.unique_lossy += other.unique_lossy;
        self.unique_cross_linked += other.unique_cross_linked;
        self.unique_non_lossy_cross_linked += other.unique_non_lossy_cross_linked;
        self.conservative += other.conservative;
    }

    fn write(&self, matched: &mut MatchedXlinkedPeptide, prefix: &str, possible: f64) {
        let coverage = |count: usize| if possible > 0.0 { count as f64 / possible } else { 0.0 };
        let scores = [
            ("matched", self.matched as f64),
            ("coverage", coverage(self.matched)),
            ("non lossy matched", self.non_lossy as f64),
            ("non lossy coverage", coverage(self.non_lossy)),
            ("lossy matched", self.lossy as f64),
            ("lossy coverage", coverage(self.lossy)),
            ("matched conservative", self.conservative as f64),
            ("conservative coverage", coverage(self.conservative)),
            ("unique matched", self.unique as f64),
            ("unique matched non lossy", self.unique_non_lossy as f64),
            ("unique matched non lossy coverage", coverage(self.unique_non_lossy)),
            ("unique matched lossy", self.unique_lossy as f64),
            ("unique matched lossy coverage", coverage(self.unique_lossy)),
            ("unique crosslinked matched", self.unique_cross_linked as f64),
            (
                "unique crosslinked matched non lossy",
                self.unique_non_lossy_cross_linked as f64,
            ),
        ];
        for (name, value) in scores {
            matched.set_score(format!("{prefix}{name}"), value);
        }
    }
}

// Module Tests ========================================================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_float_eq::assert_float_absolute_eq;
    use once_cell::sync::Lazy;
    use polychem::{IdSequence, Peptide, ResidueDatabase};
    use sifter::{Peak, Spectrum};
    use smithereens::{Dissociable, NeutralLoss};

    use super::*;
    use crate::{DefinePrimaryFragmentMatches, MatchFilter};

    static DB: Lazy<ResidueDatabase> = Lazy::new(ResidueDatabase::default);
    static IDS: IdSequence = IdSequence::new();

    // PEPTIDE with b2, y3, y3 - H2O, and an unmatched peak of equal intensity
    fn matched() -> MatchedXlinkedPeptide {
        let pep = Arc::new(Peptide::new(&DB, &IDS, "PEPTIDE", false, []).unwrap());
        let b2 = pep.fragment(&[IonSeries::B])[1].clone();
        let y3 = pep.fragment(&[IonSeries::Y])[3].clone();
        let y3_water = y3.with_loss(&NeutralLoss::water(), 1);
        let fragments = [&b2, &y3, &y3_water];
        let mut peaks: Vec<_> = fragments.iter().map(|f| Peak::new(f.mz(1), 100.0)).collect();
        peaks.push(Peak::new(1000.0, 100.0));
        let spectrum = Arc::new(Spectrum::new("run", 1, 400.687, 2, peaks));

        let mut matched = MatchedXlinkedPeptide::new(Arc::clone(&spectrum), Arc::clone(&pep), None, None);
        for fragment in fragments {
            let peak = spectrum.peak_index_at(fragment.mz(1), &Tolerance::Ppm(20.0)).unwrap();
            matched
                .fragments_mut()
                .push(MatchedFragment::new(fragment, Side::Alpha, 1, &spectrum, peak));
        }
        DefinePrimaryFragmentMatches.filter(&mut matched, &Tolerance::Ppm(20.0));
        matched
    }

    #[test]
    fn fragment_coverage() {
        let mut matched = matched();
        FragmentCoverage::default().score(&mut matched, &Tolerance::Ppm(20.0));
        // b2 and y3 are two distinct sites out of twelve
        assert_eq!(matched.score("fragment matched"), 2.0);
        assert_eq!(matched.score("fragment non lossy matched"), 2.0);
        assert_eq!(matched.score("fragment lossy matched"), 1.0);
        assert_eq!(matched.score("fragment unique matched non lossy"), 2.0);
        assert_float_absolute_eq!(matched.score("fragment coverage"), 2.0 / 12.0);
        assert_float_absolute_eq!(matched.score("peptide1 coverage"), 2.0 / 12.0);
        assert_eq!(matched.score("total fragment matches"), 2.0);
        assert_eq!(matched.score("lossy fragment matches"), 1.0);
        // Neither site has three lossy matches, so only the non-lossy matches are conservative
        assert_eq!(matched.score("fragment matched conservative"), 2.0);
        assert_eq!(matched.score("fragment unique crosslinked matched"), 0.0);
    }

    #[test]
    fn spectra_coverage() {
        let mut matched = matched();
        SpectraCoverage.score(&mut matched, &Tolerance::Ppm(20.0));
        assert_float_absolute_eq!(matched.score("spectrum peaks coverage"), 0.75);
        assert_float_absolute_eq!(matched.score("spectrum intensity coverage"), 0.75);
        assert_float_absolute_eq!(matched.score("spectra intensity nonlossy coverage"), 0.5);
        assert_float_absolute_eq!(matched.score("spectra top10 matched%"), 0.75);
    }

    #[test]
    fn fragment_error() {
        let mut matched = matched();
        FragmentError.score(&mut matched, &Tolerance::Ppm(20.0));
        // Peaks sit exactly on the theoretical m/z values
        assert_float_absolute_eq!(matched.score(AVERAGE_MS2_ERROR), 0.0, 1e-6);
        assert!(matched.has_score(AVERAGE_MS2_ERROR_PEPTIDE2));
        assert_eq!(matched.score(AVERAGE_MS2_ERROR_CROSSLINKED), 0.0);
    }

    #[test]
    fn match_score() {
        let mut matched = matched();
        let plugin = MatchScore::new(vec![
            ScoreTerm::new("a", 1.0, 2.0, 1.0),
            ScoreTerm::new("b", 0.0, 1.0, 3.0),
            ScoreTerm::new("missing", 0.0, 1.0, 100.0),
            ScoreTerm::new("degenerate", 0.0, 0.0, 100.0),
        ]);
        matched.set_score("a", 5.0);
        matched.set_score("b", -1.0);
        matched.set_score("degenerate", 0.0);
        plugin.score(&mut matched, &Tolerance::Ppm(20.0));
        // ((5 - 1) / 2 * 1 + (-1 - 0) / 1 * 3) / 2
        assert_float_absolute_eq!(matched.match_score(), -0.5);

        let mut unscored = self::matched();
        MatchScore::new(Vec::new()).score(&mut unscored, &Tolerance::Ppm(20.0));
        assert_eq!(unscored.match_score(), 0.0);
    }
}
