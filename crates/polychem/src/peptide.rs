// Standard Library Imports
use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    sync::{
        Arc,
        atomic::{self, AtomicU32},
    },
};

// External Crate Imports
use rust_decimal::Decimal;

// Local Crate Imports
use crate::{
    Massive, Result, WATER_MASS, parser,
    residue_database::{Residue, ResidueDatabase},
    to_f64,
};

// Public API ==========================================================================================================

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, derive_more::Display)]
pub struct PeptideId(u32);

/// Hands out `PeptideId`s for a single search run
#[derive(Debug, Default)]
pub struct IdSequence(AtomicU32);

impl IdSequence {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn next_id(&self) -> PeptideId {
        PeptideId(self.0.fetch_add(1, atomic::Ordering::Relaxed))
    }
}

/// Where in a protein a peptide was found, with `start` being the zero-based offset of its first residue
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct ProteinSource {
    pub accession: String,
    pub start: usize,
    pub protein_length: usize,
}

impl ProteinSource {
    pub fn new(accession: impl Into<String>, start: usize, protein_length: usize) -> Self {
        let accession = accession.into();
        Self {
            accession,
            start,
            protein_length,
        }
    }
}

// NOTE: `Peptide`s are compared and hashed by their `id` alone, so two identical sequences digested from different
// proteins are still distinct until a `MassIndexBuilder` merges them
#[derive(Clone, Debug)]
pub struct Peptide {
    id: PeptideId,
    residues: Vec<Arc<Residue>>,
    mass: f64,
    decoy: bool,
    sources: Vec<ProteinSource>,
}

impl Peptide {
    pub fn new(
        db: &ResidueDatabase,
        ids: &IdSequence,
        sequence: &str,
        decoy: bool,
        sources: impl IntoIterator<Item = ProteinSource>,
    ) -> Result<Self> {
        let residues: Vec<_> = parser::residue_abbrs(sequence)?
            .into_iter()
            .map(|abbr| db.residue(abbr).cloned())
            .collect::<Result<_>>()?;
        let residue_mass: Decimal = residues.iter().map(|r| r.monoisotopic_mass()).sum();
        let mass = to_f64(residue_mass) + WATER_MASS;

        Ok(Self {
            id: ids.next_id(),
            residues,
            mass,
            decoy,
            sources: sources.into_iter().collect(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> PeptideId {
        self.id
    }

    /// The neutral monoisotopic mass of the whole peptide, including its terminal water
    #[must_use]
    pub const fn mass(&self) -> f64 {
        self.mass
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.residues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    #[must_use]
    pub const fn is_decoy(&self) -> bool {
        self.decoy
    }

    #[must_use]
    pub fn residues(&self) -> &[Arc<Residue>] {
        &self.residues
    }

    #[must_use]
    pub fn sequence(&self) -> String {
        self.residues.iter().map(|r| r.abbr()).collect()
    }

    /// The sequence with every modification stripped
    #[must_use]
    pub fn base_sequence(&self) -> String {
        self.residues.iter().map(|r| r.base()).collect()
    }

    #[must_use]
    pub fn sources(&self) -> &[ProteinSource] {
        &self.sources
    }

    pub fn add_sources(&mut self, sources: impl IntoIterator<Item = ProteinSource>) {
        for source in sources {
            if !self.sources.contains(&source) {
                self.sources.push(source);
            }
        }
    }

    /// Peptides without any recorded source are assumed to be free-floating, so both termini count
    #[must_use]
    pub fn is_protein_n_terminal(&self) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|s| s.start == 0)
    }

    #[must_use]
    pub fn is_protein_c_terminal(&self) -> bool {
        self.sources.is_empty()
            || self
                .sources
                .iter()
                .any(|s| s.start + self.len() == s.protein_length)
    }

    /// True if `other` directly follows or precedes this peptide in any shared protein
    #[must_use]
    pub fn is_consecutive(&self, other: &Self) -> bool {
        self.sources.iter().any(|a| {
            other.sources.iter().any(|b| {
                a.accession == b.accession
                    && (a.start + self.len() == b.start || b.start + other.len() == a.start)
            })
        })
    }

    #[must_use]
    pub fn shares_protein(&self, other: &Self) -> bool {
        self.sources
            .iter()
            .any(|a| other.sources.iter().any(|b| a.accession == b.accession))
    }

    /// Sums the residues in `range`, for building fragment masses
    #[must_use]
    pub fn residue_mass(&self, range: std::ops::Range<usize>) -> Decimal {
        self.residues[range]
            .iter()
            .map(|r| r.monoisotopic_mass())
            .sum()
    }
}

impl Display for Peptide {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sequence())?;
        if self.decoy {
            write!(f, " (decoy)")?;
        }
        Ok(())
    }
}

impl PartialEq for Peptide {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Peptide {}

impl Hash for Peptide {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Ord for Peptide {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for Peptide {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Module Tests ========================================================================================================
