// Standard Library Imports
use std::{
    collections::{BTreeMap, BTreeSet},
    iter,
    ops::Range,
    sync::Arc,
};

// External Crate Imports
use polychem::{CrossLinker, Peptide};
use sifter::{Spectrum, Tolerance};
use smithereens::{Fragment, FragmentKey, IonSeries, Linkage};

// Public API ==========================================================================================================

/// The name of the score that matches are ranked by
pub const MATCH_SCORE: &str = "match score";
/// Set to `1.0` by an external validation model when a match passes auto-validation
pub const AUTO_VALIDATION: &str = "AutoValidation";

/// Which of the (up to two) peptides of a match a fragment was cut from
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum Side {
    Alpha,
    Beta,
}

impl Side {
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Alpha => 0,
            Self::Beta => 1,
        }
    }
}

/// What a matched fragment still carries through the cross-linker
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum FragmentLinkage {
    Unlinked,
    CrossLinked,
    Stub,
}

/// A theoretical fragment explaining one spectrum peak at one charge state
///
/// Everything needed after matching is copied out of the `Fragment`, so matches can outlive the scratch fragment
/// lists they were built from
#[derive(Clone, PartialEq, Debug)]
pub struct MatchedFragment {
    pub key: FragmentKey,
    pub name: String,
    pub side: Side,
    pub series: IonSeries,
    pub range: Range<usize>,
    pub charge: u32,
    pub theoretical_mz: f64,
    pub peak: usize,
    pub peak_mz: f64,
    pub peak_intensity: f64,
    pub loss_count: usize,
    pub linkage: FragmentLinkage,
    /// Whether this is the annotation of its peak that the peak is attributed to
    pub primary: bool,
    /// How well other matches back this one up, as decided by `DefinePrimaryFragmentMatches`
    pub support: u32,
}

impl MatchedFragment {
    pub(crate) fn new(
        fragment: &Fragment<'_>,
        side: Side,
        charge: u32,
        spectrum: &Spectrum,
        peak: usize,
    ) -> Self {
        let linkage = match fragment.linkage() {
            Linkage::Unlinked => FragmentLinkage::Unlinked,
            Linkage::Partner { .. } => FragmentLinkage::CrossLinked,
            Linkage::Stub(_) => FragmentLinkage::Stub,
        };
        let matched = spectrum.peaks()[peak];
        Self {
            key: fragment.key(),
            name: fragment.name(),
            side,
            series: fragment.series(),
            range: fragment.range(),
            charge,
            theoretical_mz: fragment.mz(charge),
            peak,
            peak_mz: matched.mz,
            peak_intensity: matched.intensity,
            loss_count: fragment.loss_count(),
            linkage,
            primary: false,
            support: 0,
        }
    }

    #[must_use]
    pub const fn is_lossy(&self) -> bool {
        self.loss_count > 0
    }

    #[must_use]
    pub fn is_peptide_ion(&self) -> bool {
        self.series == IonSeries::Precursor
    }

    /// b and y ions, with or without losses or a linked partner, but not stubs or peptide ions
    #[must_use]
    pub fn is_backbone(&self) -> bool {
        !self.is_peptide_ion() && self.linkage != FragmentLinkage::Stub
    }

    #[must_use]
    pub fn is_cross_linked(&self) -> bool {
        self.linkage == FragmentLinkage::CrossLinked
    }

    /// Whether the link site at `site` is consistent with this fragment having been observed
    ///
    /// Unlinked fragments can't contain the site, while fragments carrying the linker (or a stub of it) must
    #[must_use]
    pub fn supports_site(&self, site: usize) -> bool {
        if self.is_peptide_ion() {
            return true;
        }
        let contains = self.range.contains(&site);
        match self.linkage {
            FragmentLinkage::Unlinked => !contains,
            FragmentLinkage::CrossLinked | FragmentLinkage::Stub => contains,
        }
    }

    /// The mass error of this match, in ppm for relative tolerances and Da otherwise
    #[must_use]
    pub fn error(&self, tolerance: &Tolerance) -> f64 {
        tolerance.error(self.theoretical_mz, self.peak_mz)
    }
}

/// A candidate peptide, or pair of cross-linked peptides, with the fragments found for it in a spectrum
#[derive(Clone, Debug)]
pub struct MatchedXlinkedPeptide {
    spectrum: Arc<Spectrum>,
    alpha: Arc<Peptide>,
    beta: Option<Arc<Peptide>>,
    crosslinker: Option<Arc<CrossLinker>>,
    link_sites: [Option<usize>; 2],
    fragments: Vec<MatchedFragment>,
    scores: BTreeMap<String, f64>,
    rank: usize,
    validated: bool,
    might_be_linear: bool,
}

impl MatchedXlinkedPeptide {
    #[must_use]
    pub const fn new(
        spectrum: Arc<Spectrum>,
        alpha: Arc<Peptide>,
        beta: Option<Arc<Peptide>>,
        crosslinker: Option<Arc<CrossLinker>>,
    ) -> Self {
        Self {
            spectrum,
            alpha,
            beta,
            crosslinker,
            link_sites: [None, None],
            fragments: Vec::new(),
            scores: BTreeMap::new(),
            rank: 0,
            validated: false,
            might_be_linear: false,
        }
    }

    #[must_use]
    pub const fn spectrum(&self) -> &Arc<Spectrum> {
        &self.spectrum
    }

    #[must_use]
    pub const fn alpha(&self) -> &Arc<Peptide> {
        &self.alpha
    }

    #[must_use]
    pub const fn beta(&self) -> Option<&Arc<Peptide>> {
        self.beta.as_ref()
    }

    #[must_use]
    pub const fn crosslinker(&self) -> Option<&Arc<CrossLinker>> {
        self.crosslinker.as_ref()
    }

    pub fn peptides(&self) -> impl Iterator<Item = &Arc<Peptide>> {
        iter::once(&self.alpha).chain(&self.beta)
    }

    #[must_use]
    pub fn peptide(&self, side: Side) -> Option<&Arc<Peptide>> {
        match side {
            Side::Alpha => Some(&self.alpha),
            Side::Beta => self.beta.as_ref(),
        }
    }

    #[must_use]
    pub const fn is_cross_linked(&self) -> bool {
        self.beta.is_some()
    }

    #[must_use]
    pub const fn is_linear(&self) -> bool {
        self.beta.is_none()
    }

    /// The modification-independent sequence of every peptide in this match
    #[must_use]
    pub fn base_sequences(&self) -> Vec<String> {
        self.peptides().map(|peptide| peptide.base_sequence()).collect()
    }

    #[must_use]
    pub const fn link_site(&self, side: Side) -> Option<usize> {
        self.link_sites[side.index()]
    }

    pub(crate) const fn set_link_site(&mut self, side: Side, site: Option<usize>) {
        self.link_sites[side.index()] = site;
    }

    #[must_use]
    pub fn fragments(&self) -> &[MatchedFragment] {
        &self.fragments
    }

    pub fn fragments_mut(&mut self) -> &mut Vec<MatchedFragment> {
        &mut self.fragments
    }

    /// Every spectrum peak (by index) that has at least one annotation
    #[must_use]
    pub fn matched_peaks(&self) -> BTreeSet<usize> {
        self.fragments.iter().map(|fragment| fragment.peak).collect()
    }

    /// Drops the per-fragment annotations once they're no longer needed, keeping the scores computed from them
    pub fn clear_annotations(&mut self) {
        self.fragments = Vec::new();
    }

    /// The value of the score called `name`, or `0.0` if it hasn't been set
    #[must_use]
    pub fn score(&self, name: &str) -> f64 {
        self.scores.get(name).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn has_score(&self, name: &str) -> bool {
        self.scores.contains_key(name)
    }

    pub fn set_score(&mut self, name: impl Into<String>, value: f64) {
        self.scores.insert(name.into(), value);
    }

    #[must_use]
    pub const fn scores(&self) -> &BTreeMap<String, f64> {
        &self.scores
    }

    #[must_use]
    pub fn match_score(&self) -> f64 {
        self.score(MATCH_SCORE)
    }

    #[must_use]
    pub fn is_auto_validated(&self) -> bool {
        self.score(AUTO_VALIDATION) == 1.0
    }

    /// The position of this match among the matches of its spectrum, starting at `1`, or `0` if it's unranked
    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    pub const fn set_rank(&mut self, rank: usize) {
        self.rank = rank;
    }

    #[must_use]
    pub const fn is_validated(&self) -> bool {
        self.validated
    }

    pub const fn set_validated(&mut self, validated: bool) {
        self.validated = validated;
    }

    /// Set on a cross-link that a linear peptide explains nearly as well
    #[must_use]
    pub const fn might_be_linear(&self) -> bool {
        self.might_be_linear
    }

    pub const fn set_might_be_linear(&mut self, might_be_linear: bool) {
        self.might_be_linear = might_be_linear;
    }
}

// Module Tests ========================================================================================================
