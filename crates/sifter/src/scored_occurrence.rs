// Standard Library Imports
use std::hash::Hash;

// External Crate Imports
use ahash::{HashMap, HashMapExt};
use itertools::Itertools;

// Public API ==========================================================================================================

/// Running scores for a set of candidates, each built up from repeated additions or multiplications
///
/// Scores for candidates seen for the first time start out as the first value they're given, so multiplicative scores
/// behave as if they began at `1.0` and additive ones as if they began at `0.0`. Candidates keep the order in which
/// they were first seen, which is also how ties are ordered when ranking.
#[derive(Clone, Debug)]
pub struct ScoredOccurrence<T> {
    index: HashMap<T, usize>,
    entries: Vec<Occurrence<T>>,
}

impl<T: Clone + Eq + Hash> ScoredOccurrence<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    pub fn multiply(&mut self, item: T, factor: f64) -> f64 {
        self.update(item, factor, |score| score * factor)
    }

    pub fn add(&mut self, item: T, value: f64) -> f64 {
        self.update(item, value, |score| score + value)
    }

    #[must_use]
    pub fn seen(&self, item: &T) -> bool {
        self.index.contains_key(item)
    }

    /// The score of `item`, or `default` if it's never been scored
    #[must_use]
    pub fn score(&self, item: &T, default: f64) -> f64 {
        self.entry(item).map_or(default, |entry| entry.score)
    }

    /// How many times `item` has been scored
    #[must_use]
    pub fn count(&self, item: &T) -> usize {
        self.entry(item).map_or(0, |entry| entry.count)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every scored item in the order it was first seen
    pub fn iter(&self) -> impl Iterator<Item = (&T, f64)> {
        self.entries.iter().map(|entry| (&entry.item, entry.score))
    }

    /// Every scored item, lowest score first
    #[must_use]
    pub fn sorted(&self) -> Vec<(&T, f64)> {
        self.iter().sorted_by(|(_, a), (_, b)| a.total_cmp(b)).collect()
    }

    /// The items holding the `ranks` lowest distinct scores, lowest first
    ///
    /// Tied items share a rank and are never split: if `max_total` is given, whole groups of tied items are returned
    /// only while they fit, so the result can be empty if the best group alone is larger than `max_total`
    #[must_use]
    pub fn lowest_n_entries(&self, ranks: usize, max_total: Option<usize>) -> Vec<&T> {
        let sorted = self.sorted();
        take_ranks(&sorted, ranks, max_total)
    }

    /// The mirror image of `lowest_n_entries()`, returning the highest scores first
    #[must_use]
    pub fn highest_n_entries(&self, ranks: usize, max_total: Option<usize>) -> Vec<&T> {
        let mut sorted = self.sorted();
        sorted.reverse();
        // NOTE: Reversing also reverses the insertion order of ties, so put that back
        let sorted: Vec<_> = sorted
            .into_iter()
            .chunk_by(|(_, score)| *score)
            .into_iter()
            .flat_map(|(_, group)| group.collect_vec().into_iter().rev())
            .collect();
        take_ranks(&sorted, ranks, max_total)
    }
}

impl<T: Clone + Eq + Hash> Default for ScoredOccurrence<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Private Types and Helpers ===========================================================================================

#[derive(Clone, Debug)]
struct Occurrence<T> {
    item: T,
    score: f64,
    count: usize,
}

impl<T: Clone + Eq + Hash> ScoredOccurrence<T> {
    fn entry(&self, item: &T) -> Option<&Occurrence<T>> {
        self.index.get(item).map(|&i| &self.entries[i])
    }

    fn update(&mut self, item: T, initial: f64, combine: impl FnOnce(f64) -> f64) -> f64 {
        if let Some(&i) = self.index.get(&item) {
            let entry = &mut self.entries[i];
            entry.score = combine(entry.score);
            entry.count += 1;
            entry.score
        } else {
            self.index.insert(item.clone(), self.entries.len());
            self.entries.push(Occurrence {
                item,
                score: initial,
                count: 1,
            });
            initial
        }
    }
}

fn take_ranks<'a, T>(sorted: &[(&'a T, f64)], ranks: usize, max_total: Option<usize>) -> Vec<&'a T> {
    let mut taken = Vec::new();
    let groups = sorted.iter().chunk_by(|(_, score)| *score);
    for (_, group) in groups.into_iter().take(ranks) {
        let group: Vec<_> = group.map(|&(item, _)| item).collect();
        if max_total.is_some_and(|max| taken.len() + group.len() > max) {
            break;
        }
        taken.extend(group);
    }
    taken
}

// Module Tests ========================================================================================================
