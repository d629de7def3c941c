// Standard Library Imports
use std::cmp::Ordering;

// External Crate Imports
use derive_more::Constructor;
use polychem::PROTON_MASS;

// Local Crate Imports
use crate::Tolerance;

// Public API ==========================================================================================================

#[derive(Copy, Clone, PartialEq, Debug, Constructor)]
pub struct Peak {
    pub mz: f64,
    pub intensity: f64,
}

/// A centroided MS2 spectrum, with peaks kept sorted by m/z
#[derive(Clone, PartialEq, Debug)]
pub struct Spectrum {
    run: String,
    scan: u32,
    precursor_mz: f64,
    precursor_charge: u32,
    peaks: Vec<Peak>,
    alternative_charges: Vec<u32>,
}

impl Spectrum {
    pub fn new(
        run: impl Into<String>,
        scan: u32,
        precursor_mz: f64,
        precursor_charge: u32,
        mut peaks: Vec<Peak>,
    ) -> Self {
        let run = run.into();
        peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        Self {
            run,
            scan,
            precursor_mz,
            precursor_charge: precursor_charge.max(1),
            peaks,
            alternative_charges: Vec::new(),
        }
    }

    /// Marks the precursor charge as ambiguous, so the spectrum is searched once per plausible charge
    #[must_use]
    pub fn with_alternative_charges(mut self, charges: impl IntoIterator<Item = u32>) -> Self {
        self.alternative_charges = charges
            .into_iter()
            .filter(|&charge| charge > 0 && charge != self.precursor_charge)
            .collect();
        self.alternative_charges.sort_unstable();
        self.alternative_charges.dedup();
        self
    }

    #[must_use]
    pub fn run(&self) -> &str {
        &self.run
    }

    #[must_use]
    pub const fn scan(&self) -> u32 {
        self.scan
    }

    #[must_use]
    pub const fn precursor_mz(&self) -> f64 {
        self.precursor_mz
    }

    #[must_use]
    pub const fn precursor_charge(&self) -> u32 {
        self.precursor_charge
    }

    /// The neutral mass of the precursor
    #[must_use]
    pub fn precursor_mass(&self) -> f64 {
        (self.precursor_mz - PROTON_MASS) * f64::from(self.precursor_charge)
    }

    #[must_use]
    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    #[must_use]
    pub fn total_intensity(&self) -> f64 {
        self.peaks.iter().map(|peak| peak.intensity).sum()
    }

    #[must_use]
    pub fn max_intensity(&self) -> f64 {
        self.peaks.iter().map(|peak| peak.intensity).fold(0.0, f64::max)
    }

    /// The peak closest to `mz`, if any lies within `tolerance`
    #[must_use]
    pub fn peak_at(&self, mz: f64, tolerance: &Tolerance) -> Option<&Peak> {
        self.peak_index_at(mz, tolerance).map(|i| &self.peaks[i])
    }

    /// Like `peak_at()`, but returns the position of the peak in `peaks()`
    #[must_use]
    pub fn peak_index_at(&self, mz: f64, tolerance: &Tolerance) -> Option<usize> {
        let (min, max) = tolerance.bounds(mz);
        let start = self.peaks.partition_point(|peak| peak.mz < min);
        let end = self.peaks.partition_point(|peak| peak.mz <= max);
        (start..end).min_by(|&a, &b| {
            let error = |i: usize| (self.peaks[i].mz - mz).abs();
            error(a).total_cmp(&error(b))
        })
    }

    /// A copy of this spectrum reduced to its `n` most intense peaks
    ///
    /// With a `window`, the `n` most intense peaks are kept from every `window`-wide slice of the m/z range instead
    #[must_use]
    pub fn top_n_peaks(&self, n: usize, window: Option<f64>) -> Self {
        let peaks = match window {
            Some(width) if width > 0.0 => {
                let mut kept = Vec::new();
                let mut start = 0;
                while start < self.peaks.len() {
                    let limit = self.peaks[start].mz + width;
                    let end = start + self.peaks[start..].partition_point(|peak| peak.mz < limit);
                    kept.extend(most_intense(&self.peaks[start..end], n));
                    start = end;
                }
                kept
            }
            _ => most_intense(&self.peaks, n),
        };
        Self {
            peaks: sorted_by_mz(peaks),
            ..self.clone()
        }
    }

    /// One spectrum per plausible precursor charge, starting with the recorded charge
    #[must_use]
    pub fn alternative_charge_state_spectra(&self) -> Vec<Self> {
        let mut spectra = vec![Self {
            alternative_charges: Vec::new(),
            ..self.clone()
        }];
        spectra.extend(self.alternative_charges.iter().map(|&charge| Self {
            precursor_charge: charge,
            alternative_charges: Vec::new(),
            ..self.clone()
        }));
        spectra
    }
}

// Private Helper Functions ============================================================================================

fn most_intense(peaks: &[Peak], n: usize) -> Vec<Peak> {
    let mut peaks = peaks.to_vec();
    peaks.sort_by(|a, b| b.intensity.total_cmp(&a.intensity).then(a.mz.total_cmp(&b.mz)));
    peaks.truncate(n);
    peaks
}

fn sorted_by_mz(mut peaks: Vec<Peak>) -> Vec<Peak> {
    peaks.sort_by(|a, b| match a.mz.total_cmp(&b.mz) {
        Ordering::Equal => b.intensity.total_cmp(&a.intensity),
        ordering => ordering,
    });
    peaks
}

// Module Tests ========================================================================================================

#[cfg(test)]
mod tests {
    use assert_float_eq::assert_float_absolute_eq;

    use super::*;

    fn spectrum() -> Spectrum {
        let peaks = [
            (300.0, 10.0),
            (100.0, 50.0),
            (200.0, 30.0),
            (200.5, 40.0),
            (150.0, 20.0),
        ]
        .map(|(mz, intensity)| Peak::new(mz, intensity))
        .to_vec();
        Spectrum::new("run1", 42, 500.5, 2, peaks)
    }

    #[test]
    fn peaks_are_sorted() {
        let spectrum = spectrum();
        let mzs: Vec<_> = spectrum.peaks().iter().map(|peak| peak.mz).collect();
        assert_eq!(mzs, [100.0, 150.0, 200.0, 200.5, 300.0]);
        assert_eq!(spectrum.len(), 5);
        assert_eq!(spectrum.run(), "run1");
        assert_eq!(spectrum.scan(), 42);
        assert_float_absolute_eq!(spectrum.total_intensity(), 150.0);
        assert_float_absolute_eq!(spectrum.max_intensity(), 50.0);
    }

    #[test]
    fn precursor_mass() {
        let spectrum = spectrum();
        assert_float_absolute_eq!(spectrum.precursor_mass(), 998.985_447, 1e-6);
    }

    #[test]
    fn peak_lookup() {
        let spectrum = spectrum();
        let tolerance = Tolerance::Da(0.6);
        // Both 200.0 and 200.5 are in range, but 200.5 is closer
        assert_eq!(spectrum.peak_at(200.4, &tolerance), Some(&Peak::new(200.5, 40.0)));
        assert_eq!(spectrum.peak_index_at(199.9, &tolerance), Some(2));
        assert_eq!(spectrum.peak_at(250.0, &tolerance), None);
        assert_eq!(spectrum.peak_at(100.0, &Tolerance::Ppm(10.0)), Some(&Peak::new(100.0, 50.0)));
        assert_eq!(spectrum.peak_at(100.01, &Tolerance::Ppm(10.0)), None);
    }

    #[test]
    fn top_n_peaks() {
        let spectrum = spectrum();
        let top = spectrum.top_n_peaks(3, None);
        let mzs: Vec<_> = top.peaks().iter().map(|peak| peak.mz).collect();
        assert_eq!(mzs, [100.0, 200.0, 200.5]);
        assert_eq!(top.scan(), spectrum.scan());

        assert_eq!(spectrum.top_n_peaks(10, None), spectrum);
        assert!(spectrum.top_n_peaks(0, None).is_empty());
    }

    #[test]
    fn windowed_top_n_peaks() {
        let spectrum = spectrum();
        // Windows start at 100, 200, and 300
        let top = spectrum.top_n_peaks(1, Some(100.0));
        let mzs: Vec<_> = top.peaks().iter().map(|peak| peak.mz).collect();
        assert_eq!(mzs, [100.0, 200.5, 300.0]);
    }

    #[test]
    fn alternative_charges() {
        let spectrum = spectrum();
        assert_eq!(spectrum.alternative_charge_state_spectra(), [spectrum.clone()]);

        let ambiguous = spectrum.clone().with_alternative_charges([2, 3, 0, 3]);
        let charges: Vec<_> = ambiguous
            .alternative_charge_state_spectra()
            .iter()
            .map(Spectrum::precursor_charge)
            .collect();
        assert_eq!(charges, [2, 3]);
        assert_float_absolute_eq!(
            ambiguous.alternative_charge_state_spectra()[1].precursor_mass(),
            1498.478_171,
            1e-6
        );
    }
}
