// Standard Library Imports
use std::collections::BTreeSet;

// External Crate Imports
use polychem::{AMMONIA_MASS, Peptide, WATER_MASS};

// Local Crate Imports
use crate::{Dissociable, Fragment, IonSeries};

// Public API ==========================================================================================================

#[derive(Clone, PartialEq, Debug)]
pub struct NeutralLoss {
    name: String,
    mass: f64,
    residues: BTreeSet<char>,
    n_terminal: bool,
    c_terminal: bool,
}

impl NeutralLoss {
    pub fn new(name: impl Into<String>, mass: f64, residues: impl IntoIterator<Item = char>) -> Self {
        let name = name.into();
        let residues = residues.into_iter().collect();
        Self {
            name,
            mass,
            residues,
            n_terminal: false,
            c_terminal: false,
        }
    }

    #[must_use]
    pub fn with_n_terminal(mut self) -> Self {
        self.n_terminal = true;
        self
    }

    #[must_use]
    pub fn with_c_terminal(mut self) -> Self {
        self.c_terminal = true;
        self
    }

    #[must_use]
    pub fn water() -> Self {
        Self::new("H2O", WATER_MASS, ['S', 'T', 'D', 'E']).with_c_terminal()
    }

    #[must_use]
    pub fn ammonia() -> Self {
        Self::new("NH3", AMMONIA_MASS, ['R', 'K', 'N', 'Q']).with_n_terminal()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn mass(&self) -> f64 {
        self.mass
    }

    /// How many times this loss could happen on `fragment`
    #[must_use]
    pub fn sites(&self, fragment: &Fragment) -> usize {
        let peptide = fragment.peptide();
        let range = fragment.range();
        let residue_sites = peptide.residues()[range.clone()]
            .iter()
            .filter(|residue| self.residues.contains(&residue.base()))
            .count();
        let n_site = self.n_terminal && range.start == 0;
        let c_site = self.c_terminal && range.end == peptide.len();
        residue_sites + usize::from(n_site) + usize::from(c_site)
    }
}

// ---------------------------------------------------------------------------------------------------------------------

/// Which ions, and which of their neutral losses, make up the theoretical spectrum of a peptide
#[derive(Clone, PartialEq, Debug)]
pub struct Fragmentation {
    series: Vec<IonSeries>,
    losses: Vec<NeutralLoss>,
    max_losses: usize,
}

impl Fragmentation {
    #[must_use]
    pub const fn new(series: Vec<IonSeries>, losses: Vec<NeutralLoss>, max_losses: usize) -> Self {
        Self {
            series,
            losses,
            max_losses,
        }
    }

    #[must_use]
    pub fn series(&self) -> &[IonSeries] {
        &self.series
    }

    #[must_use]
    pub fn losses(&self) -> &[NeutralLoss] {
        &self.losses
    }

    #[must_use]
    pub fn primary<'p>(&self, peptide: &'p Peptide) -> Vec<Fragment<'p>> {
        peptide.fragment(&self.series)
    }

    /// Every loss variant of the loss-free `fragments`, up to `max_losses` of each kind
    #[must_use]
    pub fn lossy<'p>(&self, fragments: &[Fragment<'p>]) -> Vec<Fragment<'p>> {
        fragments
            .iter()
            .filter(|fragment| !fragment.is_lossy())
            .flat_map(|fragment| {
                self.losses.iter().flat_map(move |loss| {
                    let count = loss.sites(fragment).min(self.max_losses);
                    (1..=count).map(move |n| fragment.with_loss(loss, n))
                })
            })
            .collect()
    }

    /// Primary fragments followed by their losses
    #[must_use]
    pub fn all<'p>(&self, peptide: &'p Peptide) -> Vec<Fragment<'p>> {
        let mut fragments = self.primary(peptide);
        let lossy = self.lossy(&fragments);
        fragments.extend(lossy);
        fragments
    }
}

impl Default for Fragmentation {
    fn default() -> Self {
        Self::new(
            vec![IonSeries::B, IonSeries::Y, IonSeries::Precursor],
            vec![NeutralLoss::water(), NeutralLoss::ammonia()],
            3,
        )
    }
}

// Module Tests ========================================================================================================
