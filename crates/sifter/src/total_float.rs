// Standard Library Imports
use std::cmp::Ordering;

// External Crate Imports
use derive_more::{From, Into};

// Local Crate Imports
use crate::Tolerance;

// Public API ==========================================================================================================

/// A peptide mass or fragment m/z that can be sorted, binary-searched, and deduplicated as an index key
// PERF: Try out `f32` and see if that saves enough space to speed things up!
#[derive(Copy, Clone, Debug, From, Into)]
pub struct TotalFloat(f64);

impl TotalFloat {
    /// The key `mass` is stored under in an index searched with `tolerance`
    ///
    /// Absolute tolerances round masses into bins, so masses closer together than the tolerance can resolve share a
    /// key. Relative tolerances leave masses untouched.
    #[must_use]
    pub fn quantized(mass: f64, tolerance: &Tolerance) -> Self {
        Self(tolerance.quantize(mass))
    }

    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

// Implementing Ord for TotalFloat  ====================================================================================

impl Ord for TotalFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for TotalFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TotalFloat {
    fn eq(&self, other: &Self) -> bool {
        // NOTE: `.total_cmp()` tells apart values that `==` on `f64` doesn't (like `-0.0` and `0.0`), and sorting and
        // deduplicating index keys both need `Ord` and `PartialEq` to agree
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TotalFloat {}

// Module Tests ========================================================================================================

#[cfg(test)]
mod tests {
    use assert_float_eq::assert_float_absolute_eq;

    use super::*;

    #[test]
    fn keys_sort_and_dedup() {
        let mut keys: Vec<TotalFloat> = [799.359_964, 147.112_804, 1103.504_75, 147.112_804, f64::NAN]
            .into_iter()
            .map(TotalFloat::from)
            .collect();
        keys.sort_unstable();
        keys.dedup();

        let masses: Vec<f64> = keys.iter().map(|key| key.value()).collect();
        assert_eq!(masses.len(), 4);
        assert_eq!(masses[..3], [147.112_804, 799.359_964, 1103.504_75]);
        // NOTE: NaN sorts after every mass instead of poisoning the order
        assert!(masses[3].is_nan());

        assert_eq!(keys.binary_search(&TotalFloat::from(799.359_964)), Ok(1));
        assert_eq!(keys.partition_point(|key| key.value() < 500.0), 1);
        assert_ne!(TotalFloat::from(-0.0), TotalFloat::from(0.0));
    }

    #[test]
    fn quantized_keys() {
        let da = Tolerance::Da(0.02);
        let a = TotalFloat::quantized(1234.567_891, &da);
        let b = TotalFloat::quantized(1234.567_934, &da);
        assert_eq!(a, b);
        assert_float_absolute_eq!(a.into(), 1234.5679, 1e-9);
        assert!(TotalFloat::quantized(1234.568_1, &da) > a);

        let ppm = Tolerance::Ppm(10.0);
        let a = TotalFloat::quantized(1234.567_891, &ppm);
        let b = TotalFloat::quantized(1234.567_934, &ppm);
        assert!(a < b);
        assert_eq!(a.value(), 1234.567_891);
    }
}
