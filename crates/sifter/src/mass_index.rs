// Standard Library Imports
use std::{collections::BTreeMap, mem, sync::Arc};

// External Crate Imports
use log::{debug, info};
use polychem::Peptide;

// Local Crate Imports
use crate::{MassIndex, MassIndexBuilder, Tolerance, TotalFloat};

// Public API ==========================================================================================================

impl MassIndexBuilder {
    #[must_use]
    pub const fn new(tolerance: Tolerance) -> Self {
        Self {
            tolerance,
            bins: BTreeMap::new(),
            discarded_decoys: Vec::new(),
        }
    }

    /// Adds a peptide to its mass bin, returning `false` if it was discarded as a duplicate
    ///
    /// A peptide with the same sequence as one already in its bin is merged into it: a target always replaces a decoy,
    /// a decoy never replaces a target, and otherwise the protein sources of the newcomer are added to the original
    pub fn insert(&mut self, peptide: Peptide) -> bool {
        let key = TotalFloat::quantized(peptide.mass(), &self.tolerance);
        let bin = self.bins.entry(key).or_default();
        let sequence = peptide.sequence();

        let Some(existing) = bin.iter_mut().find(|p| p.sequence() == sequence) else {
            bin.push(peptide);
            return true;
        };

        match (existing.is_decoy(), peptide.is_decoy()) {
            (true, false) => {
                debug!("target {peptide} replaced an identical decoy");
                let decoy = mem::replace(existing, peptide);
                self.discarded_decoys.push(decoy);
                true
            }
            (false, true) => {
                debug!("decoy {peptide} discarded in favour of an identical target");
                self.discarded_decoys.push(peptide);
                false
            }
            _ => {
                existing.add_sources(peptide.sources().iter().cloned());
                false
            }
        }
    }

    /// Removes every peptide shorter than `min_length`, returning how many were removed
    pub fn cleanup(&mut self, min_length: usize) -> usize {
        let mut removed = 0;
        self.bins.retain(|_, bin| {
            let before = bin.len();
            bin.retain(|peptide| peptide.len() >= min_length);
            removed += before - bin.len();
            !bin.is_empty()
        });
        debug!("removed {removed} peptides shorter than {min_length} residues");
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bins.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Decoys that were displaced by, or discarded in favour of, an identical target peptide
    #[must_use]
    pub fn discarded_decoys(&self) -> &[Peptide] {
        &self.discarded_decoys
    }

    /// Freezes the peptides collected so far into a read-only index that can be shared between threads
    #[must_use]
    pub fn finalize(self) -> MassIndex {
        let (masses, bins): (Vec<TotalFloat>, Vec<Vec<Arc<Peptide>>>) = self
            .bins
            .into_iter()
            .map(|(mass, bin)| (mass, bin.into_iter().map(Arc::new).collect()))
            .unzip();
        let index = MassIndex {
            tolerance: self.tolerance,
            masses,
            bins,
        };
        info!(
            "indexed {} peptides under {} distinct masses ({} decoys discarded)",
            index.len(),
            index.masses.len(),
            self.discarded_decoys.len()
        );
        index
    }
}

impl MassIndex {
    #[must_use]
    pub const fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Every peptide within tolerance of `mass`
    #[must_use]
    pub fn get_for_mass(&self, mass: f64) -> Vec<&Arc<Peptide>> {
        let (min, max) = self.tolerance.bounds(mass);
        self.get_for_exact_mass_range(min, max)
    }

    /// Every peptide within a window around `mass` that's sized as if it were around `reference`
    #[must_use]
    pub fn get_for_mass_relative_to(&self, mass: f64, reference: f64) -> Vec<&Arc<Peptide>> {
        let (min, max) = self.tolerance.bounds_relative_to(mass, reference);
        self.get_for_exact_mass_range(min, max)
    }

    /// Every peptide from just under `min` to just over `max`, with both ends widened by the tolerance
    #[must_use]
    pub fn get_for_mass_range(&self, min: f64, max: f64) -> Vec<&Arc<Peptide>> {
        let (min, _) = self.tolerance.bounds(min);
        let (_, max) = self.tolerance.bounds(max);
        self.get_for_exact_mass_range(min, max)
    }

    /// Every peptide with a mass in `min..=max`, with no tolerance applied
    #[must_use]
    pub fn get_for_exact_mass_range(&self, min: f64, max: f64) -> Vec<&Arc<Peptide>> {
        self.bins_between(min, max)
            .flatten()
            .filter(|peptide| (min..=max).contains(&peptide.mass()))
            .collect()
    }

    /// The peptides in the bin for exactly `mass` (after quantization)
    #[must_use]
    pub fn peptides_with_exact_mass(&self, mass: f64) -> &[Arc<Peptide>] {
        let key = TotalFloat::quantized(mass, &self.tolerance);
        match self.masses.binary_search(&key) {
            Ok(i) => &self.bins[i],
            Err(_) => &[],
        }
    }

    /// Every peptide, in order of increasing mass
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Peptide>> {
        self.bins.iter().flatten()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bins.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    #[must_use]
    pub fn min_mass(&self) -> Option<f64> {
        self.iter().map(|peptide| peptide.mass()).min_by(f64::total_cmp)
    }

    #[must_use]
    pub fn max_mass(&self) -> Option<f64> {
        self.iter().map(|peptide| peptide.mass()).max_by(f64::total_cmp)
    }
}

// Private Methods =====================================================================================================

impl MassIndex {
    /// The bins that could hold masses in `min..=max`, given that quantization moves masses by up to half a step
    fn bins_between(&self, min: f64, max: f64) -> impl Iterator<Item = &Vec<Arc<Peptide>>> {
        let slack = self.tolerance.quantization_step().map_or(0.0, |step| step / 2.0);
        let start = self.masses.partition_point(|mass| mass.value() < min - slack);
        let end = self.masses.partition_point(|mass| mass.value() <= max + slack);
        self.bins[start..end.max(start)].iter()
    }
}

// Module Tests ========================================================================================================
