// Standard Library Imports
use std::{collections::BTreeSet, ops::Range};

// Local Crate Imports
use crate::{Peptide, PolychemError, Result};

// Public API ==========================================================================================================

/// The residues (and protein termini) that one end of a cross-linker can react with
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Specificity {
    residues: BTreeSet<char>,
    protein_n_term: bool,
    protein_c_term: bool,
}

impl Specificity {
    /// An empty list of residues links anything
    pub fn new(residues: impl IntoIterator<Item = char>) -> Self {
        let residues = residues.into_iter().collect();
        Self {
            residues,
            ..Self::default()
        }
    }

    /// Builds a specificity from target names like `K`, `n-term` or `c-term`
    pub fn from_targets<S: AsRef<str>>(targets: impl IntoIterator<Item = S>) -> Result<Self> {
        let mut specificity = Self::default();
        for target in targets {
            let target = target.as_ref();
            let mut chars = target.chars();
            match (target, chars.next(), chars.next()) {
                ("n-term", ..) => specificity.protein_n_term = true,
                ("c-term", ..) => specificity.protein_c_term = true,
                (_, Some(residue), None) if residue.is_ascii_uppercase() => {
                    specificity.residues.insert(residue);
                }
                _ => return Err(Box::new(PolychemError::link_target(target))),
            }
        }
        Ok(specificity)
    }

    #[must_use]
    pub fn with_protein_n_term(mut self) -> Self {
        self.protein_n_term = true;
        self
    }

    #[must_use]
    pub fn with_protein_c_term(mut self) -> Self {
        self.protein_c_term = true;
        self
    }

    /// The positions in `peptide` this end could attach to
    ///
    /// A residue in the last position only counts when the peptide ends its protein, since otherwise a modified
    /// residue there would have blocked digestion
    #[must_use]
    pub fn linkable_sites(&self, peptide: &Peptide) -> Vec<usize> {
        let len = peptide.len();
        let c_terminal = peptide.is_protein_c_terminal();
        let mut sites: Vec<_> = (0..len)
            .filter(|&i| self.links_residue(peptide, i) && (i + 1 < len || c_terminal))
            .collect();
        if self.protein_n_term && peptide.is_protein_n_terminal() && !sites.contains(&0) {
            sites.insert(0, 0);
        }
        if self.protein_c_term && c_terminal && len > 0 && !sites.contains(&(len - 1)) {
            sites.push(len - 1);
        }
        sites
    }

    #[must_use]
    pub fn is_linkable(&self, peptide: &Peptide) -> bool {
        !self.linkable_sites(peptide).is_empty()
    }

    /// Whether a fragment spanning `range` of `peptide` contains a site this end could attach to
    ///
    /// Unlike `linkable_sites()`, the last residue of the peptide isn't excluded here
    #[must_use]
    pub fn links_fragment(&self, peptide: &Peptide, range: Range<usize>) -> bool {
        let len = peptide.len();
        range.clone().any(|i| self.links_residue(peptide, i))
            || (self.protein_n_term && range.start == 0 && peptide.is_protein_n_terminal())
            || (self.protein_c_term && range.end == len && peptide.is_protein_c_terminal())
    }
}

impl Specificity {
    fn links_residue(&self, peptide: &Peptide, position: usize) -> bool {
        peptide.residues().get(position).is_some_and(|residue| {
            self.residues.is_empty() || self.residues.contains(&residue.base())
        })
    }
}

// ---------------------------------------------------------------------------------------------------------------------

#[derive(Clone, PartialEq, Debug)]
pub enum LinkerKind {
    Symmetric(Specificity),
    Asymmetric(Specificity, Specificity),
    /// Peptides that stuck together in the gas phase without any covalent bond
    NonCovalent,
}

#[derive(Clone, PartialEq, Debug)]
pub struct CrossLinker {
    name: String,
    mass: f64,
    kind: LinkerKind,
    stubs: Vec<f64>,
}

impl CrossLinker {
    pub fn new(name: impl Into<String>, mass: f64, kind: LinkerKind) -> Self {
        let name = name.into();
        let mass = if kind == LinkerKind::NonCovalent { 0.0 } else { mass };
        Self {
            name,
            mass,
            kind,
            stubs: Vec::new(),
        }
    }

    pub fn symmetric(name: impl Into<String>, mass: f64, specificity: Specificity) -> Self {
        Self::new(name, mass, LinkerKind::Symmetric(specificity))
    }

    pub fn asymmetric(
        name: impl Into<String>,
        mass: f64,
        first: Specificity,
        second: Specificity,
    ) -> Self {
        Self::new(name, mass, LinkerKind::Asymmetric(first, second))
    }

    pub fn non_covalent(name: impl Into<String>) -> Self {
        Self::new(name, 0.0, LinkerKind::NonCovalent)
    }

    /// Masses of the remnants left on each peptide when a cleavable linker breaks
    #[must_use]
    pub fn with_stubs(mut self, stubs: impl IntoIterator<Item = f64>) -> Self {
        self.stubs = stubs.into_iter().collect();
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The mass added when two peptides are joined by this linker
    #[must_use]
    pub const fn mass(&self) -> f64 {
        self.mass
    }

    #[must_use]
    pub const fn kind(&self) -> &LinkerKind {
        &self.kind
    }

    #[must_use]
    pub fn stubs(&self) -> &[f64] {
        &self.stubs
    }

    #[must_use]
    pub fn is_non_covalent(&self) -> bool {
        self.kind == LinkerKind::NonCovalent
    }

    /// Whether either end of the linker could attach somewhere on `peptide`
    #[must_use]
    pub fn is_linkable(&self, peptide: &Peptide) -> bool {
        match &self.kind {
            LinkerKind::Symmetric(specificity) => specificity.is_linkable(peptide),
            LinkerKind::Asymmetric(first, second) => {
                first.is_linkable(peptide) || second.is_linkable(peptide)
            }
            LinkerKind::NonCovalent => true,
        }
    }

    /// Whether `alpha` and `beta` could be joined by this linker, in either orientation
    #[must_use]
    pub fn can_cross_link(&self, alpha: &Peptide, beta: &Peptide) -> bool {
        match &self.kind {
            LinkerKind::Symmetric(specificity) => {
                specificity.is_linkable(alpha) && specificity.is_linkable(beta)
            }
            LinkerKind::Asymmetric(first, second) => {
                (first.is_linkable(alpha) && second.is_linkable(beta))
                    || (second.is_linkable(alpha) && first.is_linkable(beta))
            }
            LinkerKind::NonCovalent => true,
        }
    }

    /// Candidate link sites on `peptide`, from whichever ends of the linker could attach to it
    #[must_use]
    pub fn linkable_sites(&self, peptide: &Peptide) -> Vec<usize> {
        match &self.kind {
            LinkerKind::Symmetric(specificity) => specificity.linkable_sites(peptide),
            LinkerKind::Asymmetric(first, second) => {
                let mut sites = first.linkable_sites(peptide);
                sites.extend(second.linkable_sites(peptide));
                sites.sort_unstable();
                sites.dedup();
                sites
            }
            LinkerKind::NonCovalent => Vec::new(),
        }
    }

    /// Whether a fragment covering `range` of `peptide` could still carry this linker
    #[must_use]
    pub fn links_fragment(&self, peptide: &Peptide, range: Range<usize>) -> bool {
        match &self.kind {
            LinkerKind::Symmetric(specificity) => specificity.links_fragment(peptide, range),
            LinkerKind::Asymmetric(first, second) => {
                first.links_fragment(peptide, range.clone()) || second.links_fragment(peptide, range)
            }
            LinkerKind::NonCovalent => false,
        }
    }
}

// Module Tests ========================================================================================================
