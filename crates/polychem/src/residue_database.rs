// Standard Library Imports
use std::{collections::hash_map::Entry, str::FromStr, sync::Arc};

// External Crate Imports
use ahash::{HashMap, HashMapExt};
use knuffel::{
    Decode,
    span::{Span, Spanned},
};
use miette::{Diagnostic, LabeledSpan, NamedSource, Result};
use rust_decimal::Decimal;
use thiserror::Error;

// Local Crate Imports
use crate::{Massive, errors::PolychemError};

// Public API ==========================================================================================================

pub const DEFAULT_KDL: &str = include_str!("../data/residues.kdl");

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Residue {
    abbr: String,
    base: char,
    name: String,
    mass: Decimal,
}

impl Residue {
    #[must_use]
    pub fn abbr(&self) -> &str {
        &self.abbr
    }

    /// The unmodified amino acid this residue is built on
    #[must_use]
    pub const fn base(&self) -> char {
        self.base
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.abbr.len() > 1
    }
}

impl Massive for Residue {
    fn monoisotopic_mass(&self) -> Decimal {
        self.mass
    }
}

// NOTE: Modified residues are expanded into this table when the database is built, so lookups during a search never
// need to write to it
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ResidueDatabase {
    residues: HashMap<String, Arc<Residue>>,
    minimum_mass: Decimal,
}

impl ResidueDatabase {
    pub fn new(file_name: impl AsRef<str>, kdl_text: impl AsRef<str>) -> Result<Self> {
        let parsed_db: ResidueDatabaseKdl =
            knuffel::parse(file_name.as_ref(), kdl_text.as_ref())?;
        parsed_db
            .validate(())
            .map_err(|e| e.finalize(file_name, kdl_text).into())
    }

    pub fn residue(&self, abbr: &str) -> crate::Result<&Arc<Residue>> {
        self.residues
            .get(abbr)
            .ok_or_else(|| Box::new(PolychemError::residue_lookup(abbr)))
    }

    /// The lightest unmodified residue, used as a lower bound when searching for peptides by mass
    #[must_use]
    pub const fn minimum_mass(&self) -> Decimal {
        self.minimum_mass
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.residues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }
}

impl Default for ResidueDatabase {
    fn default() -> Self {
        // NOTE: The bundled database is checked by `build_default_database()` below, so this can't fail at runtime
        Self::new("residues.kdl", DEFAULT_KDL).expect("the bundled residue database failed to validate")
    }
}

// KDL File Schema =====================================================================================================

#[derive(Debug, Decode)]
#[knuffel(span_type=Span)]
struct ResidueDatabaseKdl {
    #[knuffel(child, unwrap(children))]
    residues: Vec<ResidueKdl>,
    #[knuffel(child, unwrap(children))]
    modifications: Vec<ModificationKdl>,
}

#[derive(Debug, Decode)]
#[knuffel(span_type=Span)]
struct ResidueKdl {
    #[knuffel(span)]
    span: Span,
    #[knuffel(node_name)]
    abbr: String,
    #[knuffel(argument)]
    name: String,
    #[knuffel(property)]
    mass: MassKdl,
}

#[derive(Debug, Decode)]
#[knuffel(span_type=Span)]
struct ModificationKdl {
    #[knuffel(span)]
    span: Span,
    #[knuffel(node_name)]
    abbr: String,
    #[knuffel(argument)]
    name: String,
    #[knuffel(property)]
    mass: MassKdl,
    #[knuffel(children(name = "targeting", non_empty))]
    targets: Vec<TargetKdl>,
}

#[derive(Debug, Decode)]
#[knuffel(span_type=Span)]
struct TargetKdl {
    #[knuffel(span)]
    span: Span,
    #[knuffel(arguments)]
    residues: Vec<String>,
}

// NOTE: Masses are written as strings so that they can be parsed exactly into a `Decimal`
type MassKdl = Spanned<String, Span>;

// Contextual Validation Trait  ========================================================================================

type DbResult<T> = Result<T, DatabaseErrorKind>;

trait ValidateInto<'c, T> {
    type Context: 'c;

    fn validate(self, ctx: Self::Context) -> DbResult<T>;
}

// Residue Database Validation =========================================================================================

type Residues = HashMap<String, (Span, Arc<Residue>)>;

impl ValidateInto<'_, ResidueDatabase> for ResidueDatabaseKdl {
    type Context = ();

    fn validate(self, _ctx: Self::Context) -> DbResult<ResidueDatabase> {
        let mut residues = Residues::new();
        for residue_kdl in self.residues {
            let span = residue_kdl.span;
            let residue = residue_kdl.validate(())?;
            match residues.entry(residue.abbr.clone()) {
                Entry::Occupied(e) => {
                    let (abbr, (first_defined_at, _)) = e.remove_entry();
                    return Err(DatabaseErrorKind::DuplicateResidue(first_defined_at, span, abbr));
                }
                Entry::Vacant(e) => e.insert((span, Arc::new(residue))),
            };
        }

        let minimum_mass = residues
            .values()
            .map(|(_, residue)| residue.mass)
            .min()
            .unwrap_or_default();

        let mut modified = HashMap::new();
        let mut seen_modifications: HashMap<String, Span> = HashMap::new();
        for modification_kdl in self.modifications {
            match seen_modifications.entry(modification_kdl.abbr.clone()) {
                Entry::Occupied(e) => {
                    let (abbr, first_defined_at) = e.remove_entry();
                    return Err(DatabaseErrorKind::DuplicateModification(
                        first_defined_at,
                        modification_kdl.span,
                        abbr,
                    ));
                }
                Entry::Vacant(e) => e.insert(modification_kdl.span),
            };
            for residue in modification_kdl.validate(&residues)? {
                modified.insert(residue.abbr.clone(), Arc::new(residue));
            }
        }

        let residues = residues
            .into_iter()
            .map(|(abbr, (_, residue))| (abbr, residue))
            .chain(modified)
            .collect();

        Ok(ResidueDatabase {
            residues,
            minimum_mass,
        })
    }
}

impl ValidateInto<'_, Residue> for ResidueKdl {
    type Context = ();

    fn validate(self, _ctx: Self::Context) -> DbResult<Residue> {
        let mut chars = self.abbr.chars();
        let (Some(base), None) = (chars.next(), chars.next()) else {
            return Err(DatabaseErrorKind::InvalidResidueAbbr(self.span, self.abbr));
        };
        if !base.is_ascii_uppercase() {
            return Err(DatabaseErrorKind::InvalidResidueAbbr(self.span, self.abbr));
        }

        Ok(Residue {
            abbr: self.abbr,
            base,
            name: self.name,
            mass: self.mass.validate(())?,
        })
    }
}

impl<'r> ValidateInto<'r, Vec<Residue>> for ModificationKdl {
    type Context = &'r Residues;

    fn validate(self, ctx: Self::Context) -> DbResult<Vec<Residue>> {
        let valid_abbr = self.abbr.starts_with(|c: char| c.is_ascii_lowercase())
            && self
                .abbr
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !valid_abbr {
            return Err(DatabaseErrorKind::InvalidModificationAbbr(self.span, self.abbr));
        }

        let mass = self.mass.validate(())?;
        let mut modified = Vec::new();
        for target in self.targets {
            for residue_abbr in target.residues {
                let Some((_, residue)) = ctx.get(&residue_abbr) else {
                    return Err(DatabaseErrorKind::UndefinedTarget(target.span, residue_abbr));
                };
                modified.push(Residue {
                    abbr: format!("{}{}", residue.abbr, self.abbr),
                    base: residue.base,
                    name: format!("{} ({})", residue.name, self.name),
                    mass: residue.mass + mass,
                });
            }
        }
        Ok(modified)
    }
}

impl ValidateInto<'_, Decimal> for MassKdl {
    type Context = ();

    fn validate(self, _ctx: Self::Context) -> DbResult<Decimal> {
        Decimal::from_str(&self).map_err(|_| {
            let span = *self.span();
            DatabaseErrorKind::InvalidMass(span, (*self).clone())
        })
    }
}

// Validation Error Types and Trait Implementations  ===================================================================

#[derive(Debug, Error)]
#[error("failed to validate residue database file")]
struct DatabaseError {
    kdl: NamedSource<String>,
    #[source]
    kind: DatabaseErrorKind,
}

// NOTE: This is manually implemented because the list of labels is dynamic and needs to be extracted from `self.kind`
impl Diagnostic for DatabaseError {
    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.kdl)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        Some(Box::new(self.kind.labels().into_iter().map(|(s, l)| {
            LabeledSpan::new_with_span(Some(l.to_owned()), *s)
        })))
    }

    fn diagnostic_source(&self) -> Option<&dyn Diagnostic> {
        Some(&self.kind)
    }
}

#[derive(Clone, Debug, Diagnostic, Error)]
enum DatabaseErrorKind {
    #[error("the residue {2:?} has already been defined")]
    #[diagnostic(help("remove the duplicate residue, or give it a new abbreviation"))]
    DuplicateResidue(Span, Span, String),

    #[error("the modification {2:?} has already been defined")]
    #[diagnostic(help("remove the duplicate modification, or give it a new abbreviation"))]
    DuplicateModification(Span, Span, String),

    #[error("the residue abbreviation {1:?} is not a single uppercase letter")]
    #[diagnostic(help("residues are single uppercase letters, like K"))]
    InvalidResidueAbbr(Span, String),

    #[error("the modification abbreviation {1:?} must be lowercase letters and digits")]
    #[diagnostic(help("modifications start with a lowercase letter, like ox or bs3oh"))]
    InvalidModificationAbbr(Span, String),

    #[error("the mass {1:?} is not a valid decimal number")]
    InvalidMass(Span, String),

    #[error("the residue {1:?} targeted by this modification is undefined")]
    #[diagnostic(help("double-check for typos, or add {1:?} to the residues section"))]
    UndefinedTarget(Span, String),
}

impl DatabaseErrorKind {
    fn labels(&self) -> Vec<(&Span, &'static str)> {
        match self {
            Self::DuplicateResidue(s1, s2, _) | Self::DuplicateModification(s1, s2, _) => {
                vec![(s1, "first defined here"), (s2, "then again here")]
            }
            Self::InvalidResidueAbbr(s, _) => vec![(s, "invalid residue")],
            Self::InvalidModificationAbbr(s, _) => vec![(s, "invalid modification")],
            Self::InvalidMass(s, _) => vec![(s, "invalid mass")],
            Self::UndefinedTarget(s, _) => vec![(s, "undefined residue")],
        }
    }

    fn finalize(self, file_name: impl AsRef<str>, kdl: impl AsRef<str>) -> DatabaseError {
        let kdl = NamedSource::new(file_name, kdl.as_ref().to_owned());
        DatabaseError { kdl, kind: self }
    }
}

// Module Tests ========================================================================================================
