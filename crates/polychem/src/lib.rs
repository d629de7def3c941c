//! Peptide chemistry: residue masses, modified peptide sequences, and cross-linker chemistry

mod crosslinker;
pub mod errors;
mod parser;
mod peptide;
pub mod residue_database;

// External Crate Imports
use rust_decimal::{Decimal, prelude::ToPrimitive};

// Local Crate Imports
pub use crosslinker::{CrossLinker, LinkerKind, Specificity};
pub use errors::{PolychemError, Result};
pub use peptide::{IdSequence, Peptide, PeptideId, ProteinSource};
pub use residue_database::{Residue, ResidueDatabase};

// Public API ==========================================================================================================

pub const PROTON_MASS: f64 = 1.007_276_466_77;
pub const WATER_MASS: f64 = 18.010_560_27;
pub const AMMONIA_MASS: f64 = 17.026_544_93;
pub const C13_MASS_DIFFERENCE: f64 = 1.003_35;

pub trait Massive {
    #[must_use]
    fn monoisotopic_mass(&self) -> Decimal;
}

/// Converts an exact mass into the `f64` that the search indexes work with
#[must_use]
pub fn to_f64(mass: Decimal) -> f64 {
    // NOTE: Every `Decimal` falls well within the range of an `f64`, so this conversion only ever loses precision
    mass.to_f64().unwrap_or(f64::NAN)
}
