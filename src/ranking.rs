// Standard Library Imports
use std::cmp::Ordering;

// External Crate Imports
use ahash::{HashMap, HashMapExt, HashSet};

// Local Crate Imports
use crate::{
    AVERAGE_MS2_ERROR, AVERAGE_MS2_ERROR_CROSSLINKED, AVERAGE_MS2_ERROR_PEPTIDE1, AVERAGE_MS2_ERROR_PEPTIDE2,
    MATCH_SCORE, MatchedXlinkedPeptide, SearchConfig,
};

// Public API ==========================================================================================================

/// How far the top match is ahead of the best match with different peptide sequences
pub const DELTA: &str = "delta";
/// How far a match is ahead of the second best match, modified forms of the same peptides included
pub const DELTA_MOD: &str = "deltaMod";
/// The average of `delta` and the top score of the spectrum
pub const COMBINED_DELTA: &str = "combinedDelta";

/// How the matches of a single spectrum are ordered before ranks are handed out
#[derive(Clone, PartialEq, Debug, Default)]
pub enum ResultSort {
    /// Auto-validated matches first, then by descending match score
    #[default]
    Standard,
    /// By descending match score alone
    NoAutoValidation,
    /// By each of the named scores in turn (higher first), then as `Standard`
    SubScoreDirected(Vec<String>),
    /// Matches with a mean absolute MS2 error above the limit rank below those within it, then as `Standard`
    Ms2Limit(f64),
}

impl ResultSort {
    /// `Ordering::Less` when `a` should be ranked above `b`
    #[must_use]
    pub fn compare(&self, a: &MatchedXlinkedPeptide, b: &MatchedXlinkedPeptide) -> Ordering {
        match self {
            Self::Standard => standard(a, b),
            Self::NoAutoValidation => descending(a, b, MATCH_SCORE),
            Self::SubScoreDirected(scores) => scores
                .iter()
                .map(|score| descending(a, b, score))
                .find(|&ordering| ordering != Ordering::Equal)
                .unwrap_or_else(|| standard(a, b)),
            Self::Ms2Limit(limit) => [
                AVERAGE_MS2_ERROR,
                AVERAGE_MS2_ERROR_PEPTIDE1,
                AVERAGE_MS2_ERROR_PEPTIDE2,
                AVERAGE_MS2_ERROR_CROSSLINKED,
            ]
            .into_iter()
            .map(|error| {
                let within = |matched: &MatchedXlinkedPeptide| matched.score(error) <= *limit;
                within(b).cmp(&within(a))
            })
            .find(|&ordering| ordering != Ordering::Equal)
            .unwrap_or_else(|| standard(a, b)),
        }
    }

    /// A stable sort, so equally good matches keep the order they were evaluated in
    pub fn sort(&self, matches: &mut [MatchedXlinkedPeptide]) {
        matches.sort_by(|a, b| self.compare(a, b));
    }
}

/// Orders, ranks, and picks which of the matches of a spectrum should be reported
#[derive(Clone, Debug)]
pub struct Ranker {
    sort: ResultSort,
    min_top_score: f64,
    output_top_only: bool,
    prioritize_linears: bool,
    test_for_linear_mod: bool,
}

impl Ranker {
    #[must_use]
    pub fn new(config: &SearchConfig) -> Self {
        let sort = match (&config.result_sort, config.ms2_limit) {
            (ResultSort::Standard, Some(limit)) => ResultSort::Ms2Limit(limit),
            (sort, _) => sort.clone(),
        };
        Self {
            sort,
            min_top_score: config.min_top_score,
            output_top_only: config.output_top_only,
            prioritize_linears: config.prioritize_linears,
            test_for_linear_mod: config.test_for_linear_mod,
        }
    }

    #[must_use]
    pub const fn sort(&self) -> &ResultSort {
        &self.sort
    }

    /// Sorts the matches of one spectrum and returns those to report, with their ranks and delta scores set
    ///
    /// Nothing is reported for spectra whose best match scores below the minimum top score
    #[must_use]
    pub fn rank(&self, mut matches: Vec<MatchedXlinkedPeptide>) -> Vec<MatchedXlinkedPeptide> {
        self.sort.sort(&mut matches);
        self.linear_post_evaluation(&mut matches);
        if let Some(top) = matches.first_mut() {
            let validated = top.is_auto_validated() && top.is_cross_linked();
            top.set_validated(validated);
        }
        self.assign_ranks(matches)
    }
}

// Private Helper Functions ============================================================================================

fn descending(a: &MatchedXlinkedPeptide, b: &MatchedXlinkedPeptide, score: &str) -> Ordering {
    b.score(score).total_cmp(&a.score(score))
}

fn standard(a: &MatchedXlinkedPeptide, b: &MatchedXlinkedPeptide) -> Ordering {
    b.is_auto_validated()
        .cmp(&a.is_auto_validated())
        .then_with(|| descending(a, b, MATCH_SCORE))
}

const UNIQUE_NON_LOSSY: &str = "fragment unique matched non lossy";

/// Maps the base sequence of every peptide to the base sequences of the peptides it was linked to
#[derive(Default)]
struct PartnerLookup(HashMap<String, HashSet<String>>);

impl PartnerLookup {
    fn add(&mut self, matched: &MatchedXlinkedPeptide) {
        let bases = matched.base_sequences();
        for (i, base) in bases.iter().enumerate() {
            let partners = self.0.entry(base.clone()).or_default();
            partners.extend(bases.iter().enumerate().filter(|&(j, _)| j != i).map(|(_, b)| b.clone()));
        }
    }

    /// Whether `matched` is made of different peptides, not just differently modified ones
    fn is_distinct(&self, matched: &MatchedXlinkedPeptide) -> Option<bool> {
        let bases = matched.base_sequences();
        let Some(partners) = self.0.get(&bases[0]) else {
            return Some(true);
        };
        // NOTE: A linear peptide that's already part of the top match is skipped entirely
        if bases.len() == 1 {
            return None;
        }
        Some(bases[1..].iter().any(|base| !partners.contains(base)))
    }
}

impl Ranker {
    /// Gives a linear match the top spot when it explains the spectrum about as well as the cross-link above it
    fn linear_post_evaluation(&self, matches: &mut Vec<MatchedXlinkedPeptide>) {
        let Some(top) = matches.first() else {
            return;
        };
        if !top.is_cross_linked() {
            return;
        }
        let top_fragments = top.score(UNIQUE_NON_LOSSY);
        let mut promote = None;

        if self.prioritize_linears {
            promote = matches
                .iter()
                .position(MatchedXlinkedPeptide::is_linear)
                .filter(|&i| matches[i].score(UNIQUE_NON_LOSSY) >= top_fragments - 1.0);
        }

        if promote.is_none() && self.test_for_linear_mod && top.might_be_linear() {
            let bases = top.base_sequences();
            let joined = [
                format!("{}{}", bases[0], bases[1]),
                format!("{}{}", bases[1], bases[0]),
            ];
            promote = matches.iter().position(|matched| {
                matched.is_linear()
                    && joined.contains(&matched.alpha().base_sequence())
                    && matched.score(UNIQUE_NON_LOSSY) >= top_fragments - 1.0
            });
        }

        if let Some(i) = promote {
            let linear = matches.remove(i);
            matches.insert(0, linear);
        }
    }

    fn assign_ranks(&self, mut matches: Vec<MatchedXlinkedPeptide>) -> Vec<MatchedXlinkedPeptide> {
        let Some(first) = matches.first() else {
            return matches;
        };

        if matches.len() == 1 {
            let score = first.match_score();
            if score < self.min_top_score {
                return Vec::new();
            }
            let only = &mut matches[0];
            for name in [DELTA, DELTA_MOD, COMBINED_DELTA] {
                only.set_score(name, score);
            }
            only.set_rank(1);
            return matches;
        }

        let scores: Vec<_> = matches.iter().map(MatchedXlinkedPeptide::match_score).collect();
        let top_score = scores[1..].iter().copied().fold(scores[0], f64::max);

        let mut lookup = PartnerLookup::default();
        for (matched, _) in matches.iter().zip(&scores).filter(|&(_, &score)| score == top_score) {
            lookup.add(matched);
        }
        let mut no_mod_second = f64::MIN;
        for (matched, &score) in matches.iter().zip(&scores) {
            if score < top_score && lookup.is_distinct(matched) == Some(true) {
                no_mod_second = no_mod_second.max(score);
            }
        }

        if top_score < self.min_top_score {
            return Vec::new();
        }

        let second_score = scores[1..].iter().copied().fold(top_score.min(0.0), f64::max);
        let second_score = if second_score == f64::MIN { 0.0 } else { second_score };
        let no_mod_second = if no_mod_second == f64::MIN { 0.0 } else { no_mod_second };

        let top_group = scores.iter().position(|&score| score != scores[0]).unwrap_or(scores.len());
        let mut rank = 1;
        let mut last_score = scores[0];
        for (matched, &score) in matches.iter_mut().zip(&scores) {
            if score != last_score {
                rank += 1;
                last_score = score;
            }
            let delta = score - no_mod_second;
            matched.set_score(DELTA, delta);
            matched.set_score(DELTA_MOD, score - second_score);
            matched.set_score(COMBINED_DELTA, (delta + top_score) / 2.0);
            matched.set_rank(rank);
        }

        if self.output_top_only {
            matches.truncate(top_group);
        }
        matches
    }
}

// Module Tests ========================================================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use once_cell::sync::Lazy;
    use polychem::{IdSequence, Peptide, ProteinSource, ResidueDatabase};
    use sifter::Spectrum;

    use super::*;
    use crate::AUTO_VALIDATION;

    static DB: Lazy<ResidueDatabase> = Lazy::new(ResidueDatabase::default);
    static IDS: IdSequence = IdSequence::new();

    fn peptide(sequence: &str, start: usize) -> Arc<Peptide> {
        let source = ProteinSource::new("P1", start, 40);
        Arc::new(Peptide::new(&DB, &IDS, sequence, false, [source]).unwrap())
    }

    fn matched(peptides: &[&str], score: f64) -> MatchedXlinkedPeptide {
        let spectrum = Arc::new(Spectrum::new("run", 1, 500.0, 2, Vec::new()));
        let alpha = peptide(peptides[0], 0);
        let beta = peptides.get(1).map(|sequence| peptide(sequence, alpha.len()));
        let mut matched = MatchedXlinkedPeptide::new(spectrum, alpha, beta, None);
        matched.set_score(MATCH_SCORE, score);
        matched
    }

    fn ranker(config: SearchConfig) -> Ranker {
        Ranker::new(&config)
    }

    fn all_ranks() -> Ranker {
        ranker(SearchConfig {
            output_top_only: false,
            ..SearchConfig::default()
        })
    }

    fn summary(matches: &[MatchedXlinkedPeptide]) -> Vec<(String, usize)> {
        matches
            .iter()
            .map(|matched| (matched.base_sequences().join("-"), matched.rank()))
            .collect()
    }

    #[test]
    fn standard_sort() {
        let mut validated = matched(&["PEMK"], 1.0);
        validated.set_score(AUTO_VALIDATION, 1.0);
        let mut matches = vec![matched(&["ELVISK"], 5.0), validated, matched(&["SAMPLER"], 7.0)];

        ResultSort::Standard.sort(&mut matches);
        let order: Vec<_> = matches.iter().map(|m| m.alpha().sequence()).collect();
        assert_eq!(order, ["PEMK", "SAMPLER", "ELVISK"]);

        ResultSort::NoAutoValidation.sort(&mut matches);
        let order: Vec<_> = matches.iter().map(|m| m.alpha().sequence()).collect();
        assert_eq!(order, ["SAMPLER", "ELVISK", "PEMK"]);
    }

    #[test]
    fn sub_score_sort() {
        let mut a = matched(&["PEMK"], 9.0);
        a.set_score("fragment coverage", 0.2);
        let mut b = matched(&["ELVISK"], 1.0);
        b.set_score("fragment coverage", 0.4);
        let mut c = matched(&["SAMPLER"], 3.0);
        c.set_score("fragment coverage", 0.4);
        let mut matches = vec![a, b, c];

        ResultSort::SubScoreDirected(vec!["fragment coverage".to_owned()]).sort(&mut matches);
        let order: Vec<_> = matches.iter().map(|m| m.alpha().sequence()).collect();
        assert_eq!(order, ["SAMPLER", "ELVISK", "PEMK"]);
    }

    #[test]
    fn ms2_limit_sort() {
        let mut sloppy = matched(&["PEMK"], 9.0);
        sloppy.set_score(AVERAGE_MS2_ERROR, 12.0);
        let mut precise = matched(&["ELVISK"], 1.0);
        precise.set_score(AVERAGE_MS2_ERROR, 3.0);
        let mut sloppy_beta = matched(&["SAMPLER"], 5.0);
        sloppy_beta.set_score(AVERAGE_MS2_ERROR_PEPTIDE2, 11.0);
        let mut matches = vec![sloppy, sloppy_beta, precise];

        let sort = ranker(SearchConfig {
            ms2_limit: Some(10.0),
            ..SearchConfig::default()
        })
        .sort()
        .clone();
        assert_eq!(sort, ResultSort::Ms2Limit(10.0));
        sort.sort(&mut matches);
        let order: Vec<_> = matches.iter().map(|m| m.alpha().sequence()).collect();
        assert_eq!(order, ["ELVISK", "SAMPLER", "PEMK"]);
    }

    #[test]
    fn lone_matches() {
        let ranked = all_ranks().rank(vec![matched(&["PEMK"], 4.0)]);
        assert_eq!(summary(&ranked), [("PEMK".to_owned(), 1)]);
        for name in [DELTA, DELTA_MOD, COMBINED_DELTA] {
            assert_eq!(ranked[0].score(name), 4.0);
        }

        assert!(all_ranks().rank(vec![matched(&["PEMK"], -11.0)]).is_empty());
        assert!(all_ranks().rank(Vec::new()).is_empty());
    }

    #[test]
    fn ranks_and_deltas() {
        let matches = vec![
            matched(&["PEMoxK"], 8.0),
            matched(&["ELVISK"], 5.0),
            matched(&["PEMK"], 10.0),
            matched(&["SAMPLER"], 5.0),
        ];
        let ranked = all_ranks().rank(matches);
        assert_eq!(
            summary(&ranked),
            [
                ("PEMK".to_owned(), 1),
                ("PEMK".to_owned(), 2),
                ("ELVISK".to_owned(), 3),
                ("SAMPLER".to_owned(), 3),
            ]
        );

        // The modified PEMK isn't a distinct explanation, so ELVISK is the real runner-up
        let top = &ranked[0];
        assert_eq!(top.score(DELTA), 5.0);
        assert_eq!(top.score(DELTA_MOD), 2.0);
        assert_eq!(top.score(COMBINED_DELTA), 7.5);
        assert_eq!(ranked[1].score(DELTA), 3.0);
        assert_eq!(ranked[1].score(DELTA_MOD), 0.0);
        assert_eq!(ranked[3].score(DELTA), 0.0);
    }

    #[test]
    fn top_only_keeps_ties() {
        let matches = vec![
            matched(&["PEMK"], 10.0),
            matched(&["ELVISK"], 10.0),
            matched(&["SAMPLER"], 2.0),
        ];
        let ranked = ranker(SearchConfig::default()).rank(matches);
        assert_eq!(summary(&ranked), [("PEMK".to_owned(), 1), ("ELVISK".to_owned(), 1)]);
        // Neither top match has a distinct runner-up above it
        assert_eq!(ranked[0].score(DELTA), 8.0);
    }

    #[test]
    fn cross_linked_partners_count_as_the_same_match() {
        let matches = vec![
            matched(&["PEMK", "ELVISK"], 10.0),
            matched(&["ELVISK", "PEMK"], 6.0),
            matched(&["ELVISK"], 5.0),
            matched(&["PEMK", "SAMPLER"], 4.0),
        ];
        let ranked = all_ranks().rank(matches);
        // The swapped pair and the linear ELVISK are both part of the top match, but PEMK-SAMPLER isn't
        assert_eq!(ranked[0].score(DELTA), 6.0);
    }

    #[test]
    fn low_scoring_spectra_are_dropped() {
        let matches = vec![matched(&["PEMK"], -12.0), matched(&["ELVISK"], -15.0)];
        assert!(all_ranks().rank(matches).is_empty());
    }

    #[test]
    fn validated_cross_links() {
        let mut xl = matched(&["PEMK", "SAMPLER"], 10.0);
        xl.set_score(AUTO_VALIDATION, 1.0);
        let ranked = all_ranks().rank(vec![xl, matched(&["ELVISK"], 3.0)]);
        assert!(ranked[0].is_validated());
        assert!(!ranked[1].is_validated());

        let mut linear = matched(&["ELVISK"], 10.0);
        linear.set_score(AUTO_VALIDATION, 1.0);
        let ranked = all_ranks().rank(vec![linear]);
        assert!(!ranked[0].is_validated());
    }

    #[test]
    fn linears_of_consecutive_peptides_win() {
        let mut xl = matched(&["PEMK", "ELVISK"], 10.0);
        xl.set_might_be_linear(true);
        xl.set_score(UNIQUE_NON_LOSSY, 8.0);
        let mut linear = matched(&["PEMKELVISK"], 9.0);
        linear.set_score(UNIQUE_NON_LOSSY, 7.0);
        let unrelated = matched(&["SAMPLER"], 9.5);

        let ranked = all_ranks().rank(vec![xl.clone(), unrelated.clone(), linear.clone()]);
        assert_eq!(ranked[0].alpha().sequence(), "PEMKELVISK");
        assert_eq!(ranked[0].rank(), 1);

        // Unless the linear explains noticeably less of the spectrum
        linear.set_score(UNIQUE_NON_LOSSY, 6.0);
        let ranked = all_ranks().rank(vec![xl.clone(), unrelated.clone(), linear.clone()]);
        assert_eq!(ranked[0].base_sequences(), ["PEMK", "ELVISK"]);

        // Or the check is switched off
        linear.set_score(UNIQUE_NON_LOSSY, 7.0);
        let ranked = ranker(SearchConfig {
            output_top_only: false,
            test_for_linear_mod: false,
            ..SearchConfig::default()
        })
        .rank(vec![xl, unrelated, linear]);
        assert_eq!(ranked[0].base_sequences(), ["PEMK", "ELVISK"]);
    }

    #[test]
    fn prioritized_linears() {
        let mut xl = matched(&["PEMK", "SAMPLER"], 10.0);
        xl.set_score(UNIQUE_NON_LOSSY, 5.0);
        let mut linear = matched(&["ELVISK"], 3.0);
        linear.set_score(UNIQUE_NON_LOSSY, 4.0);

        let ranked = all_ranks().rank(vec![xl.clone(), linear.clone()]);
        assert_eq!(ranked[0].alpha().sequence(), "PEMK");

        let ranked = ranker(SearchConfig {
            output_top_only: false,
            prioritize_linears: true,
            ..SearchConfig::default()
        })
        .rank(vec![xl, linear]);
        assert_eq!(ranked[0].alpha().sequence(), "ELVISK");
    }
}
