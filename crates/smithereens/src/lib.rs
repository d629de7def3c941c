//! Theoretical fragmentation of peptides and cross-linked peptide pairs

mod fragmentation;
mod producers;

// Standard Library Imports
use std::{
    fmt::{self, Display, Formatter},
    ops::Range,
};

// External Crate Imports
use polychem::{Massive, PROTON_MASS, Peptide, PeptideId, WATER_MASS, to_f64};
use rust_decimal::Decimal;

// Local Crate Imports
pub use fragmentation::{Fragmentation, NeutralLoss};
pub use producers::{CrossLinkedFragmentProducer, PeptideIonProducer, StubProducer};

// Public API ==========================================================================================================

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, derive_more::Display)]
pub enum IonSeries {
    #[display("b")]
    B,
    #[display("y")]
    Y,
    /// The intact peptide
    #[display("P")]
    Precursor,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct AppliedLoss {
    pub name: String,
    pub count: usize,
}

/// What, if anything, is still attached to a fragment through the cross-linker
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Linkage<'p> {
    Unlinked,
    /// The whole partner peptide, plus the linker itself, is carried by this fragment
    Partner {
        peptide: &'p Peptide,
        added_mass: f64,
    },
    /// A cleaved linker has left only a stub of the given mass
    Stub(f64),
}

#[derive(Clone, PartialEq, Debug)]
pub struct Fragment<'p> {
    peptide: &'p Peptide,
    series: IonSeries,
    range: Range<usize>,
    neutral_mass: f64,
    loss: Option<AppliedLoss>,
    linkage: Linkage<'p>,
}

/// Identifies a fragment irrespective of any neutral losses, so that lossy fragments can be grouped with their parent
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct FragmentKey {
    peptide: PeptideId,
    series: IonSeries,
    start: usize,
    end: usize,
    partner: Option<PeptideId>,
    stub: Option<u64>,
}

impl<'p> Fragment<'p> {
    #[must_use]
    pub const fn new(
        peptide: &'p Peptide,
        series: IonSeries,
        range: Range<usize>,
        neutral_mass: f64,
    ) -> Self {
        Self {
            peptide,
            series,
            range,
            neutral_mass,
            loss: None,
            linkage: Linkage::Unlinked,
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        let mut name = match self.series {
            IonSeries::Precursor => self.series.to_string(),
            series => format!("{series}{}", self.range.len()),
        };
        match self.linkage {
            Linkage::Unlinked => (),
            Linkage::Partner { peptide, .. } => name.push_str(&format!(" + {}", peptide.sequence())),
            Linkage::Stub(mass) => name.push_str(&format!(" + stub({mass:.3})")),
        }
        if let Some(AppliedLoss { name: loss, count }) = &self.loss {
            if *count == 1 {
                name.push_str(&format!("_{loss}"));
            } else {
                name.push_str(&format!("_{loss}x{count}"));
            }
        }
        name
    }

    #[must_use]
    pub const fn peptide(&self) -> &'p Peptide {
        self.peptide
    }

    #[must_use]
    pub const fn series(&self) -> IonSeries {
        self.series
    }

    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    #[must_use]
    pub const fn neutral_mass(&self) -> f64 {
        self.neutral_mass
    }

    #[must_use]
    pub fn mz(&self, charge: u32) -> f64 {
        self.neutral_mass / f64::from(charge) + PROTON_MASS
    }

    /// The neutral mass of this fragment without anything carried through the linker
    #[must_use]
    pub fn unlinked_mass(&self) -> f64 {
        match self.linkage {
            Linkage::Unlinked => self.neutral_mass,
            Linkage::Partner { added_mass, .. } => self.neutral_mass - added_mass,
            Linkage::Stub(mass) => self.neutral_mass - mass,
        }
    }

    #[must_use]
    pub const fn loss(&self) -> Option<&AppliedLoss> {
        self.loss.as_ref()
    }

    #[must_use]
    pub fn loss_count(&self) -> usize {
        self.loss.as_ref().map_or(0, |loss| loss.count)
    }

    #[must_use]
    pub const fn is_lossy(&self) -> bool {
        self.loss.is_some()
    }

    #[must_use]
    pub const fn linkage(&self) -> Linkage<'p> {
        self.linkage
    }

    #[must_use]
    pub const fn is_cross_linked(&self) -> bool {
        matches!(self.linkage, Linkage::Partner { .. })
    }

    #[must_use]
    pub const fn is_unlinked(&self) -> bool {
        matches!(self.linkage, Linkage::Unlinked)
    }

    #[must_use]
    pub fn is_peptide_ion(&self) -> bool {
        self.series == IonSeries::Precursor
    }

    #[must_use]
    pub fn key(&self) -> FragmentKey {
        let (partner, stub) = match self.linkage {
            Linkage::Unlinked => (None, None),
            Linkage::Partner { peptide, .. } => (Some(peptide.id()), None),
            Linkage::Stub(mass) => (None, Some(mass.to_bits())),
        };
        FragmentKey {
            peptide: self.peptide.id(),
            series: self.series,
            start: self.range.start,
            end: self.range.end,
            partner,
            stub,
        }
    }

    #[must_use]
    pub fn with_loss(&self, loss: &NeutralLoss, count: usize) -> Self {
        let loss_mass = loss.mass() * count as f64;
        Self {
            neutral_mass: self.neutral_mass - loss_mass,
            loss: Some(AppliedLoss {
                name: loss.name().to_owned(),
                count,
            }),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn linked_to(&self, partner: &'p Peptide, linker_mass: f64) -> Self {
        let added_mass = partner.mass() + linker_mass;
        Self {
            neutral_mass: self.neutral_mass + added_mass,
            linkage: Linkage::Partner {
                peptide: partner,
                added_mass,
            },
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_stub(&self, stub_mass: f64) -> Self {
        Self {
            neutral_mass: self.neutral_mass + stub_mass,
            linkage: Linkage::Stub(stub_mass),
            ..self.clone()
        }
    }
}

impl Display for Fragment<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// DESIGN: Fragments borrow the peptide they came from instead of sharing ownership of it, since they only ever live
// for as long as a single index shard or candidate evaluation. Anything that needs to outlive that should copy out
// the few fields it needs
pub trait Dissociable {
    #[must_use]
    fn fragment(&self, series: &[IonSeries]) -> Vec<Fragment<'_>>;
}

impl Dissociable for Peptide {
    fn fragment(&self, series: &[IonSeries]) -> Vec<Fragment<'_>> {
        let len = self.len();
        let mut prefix_masses = Vec::with_capacity(len + 1);
        let mut total = Decimal::ZERO;
        prefix_masses.push(total);
        for residue in self.residues() {
            total += residue.monoisotopic_mass();
            prefix_masses.push(total);
        }

        let mut fragments = Vec::new();
        for &ion in series {
            match ion {
                IonSeries::B => fragments.extend((1..len).map(|i| {
                    Fragment::new(self, ion, 0..i, to_f64(prefix_masses[i]))
                })),
                IonSeries::Y => fragments.extend((1..len).map(|i| {
                    let mass = to_f64(total - prefix_masses[i]) + WATER_MASS;
                    Fragment::new(self, ion, i..len, mass)
                })),
                IonSeries::Precursor => fragments.push(Fragment::new(self, ion, 0..len, self.mass())),
            }
        }
        fragments
    }
}

// Module Tests ========================================================================================================
