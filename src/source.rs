// Standard Library Imports
use std::{
    collections::VecDeque,
    ops::RangeInclusive,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

// External Crate Imports
use log::warn;
use rand::Rng;
use sifter::Spectrum;

// Public API ==========================================================================================================

/// A stream of spectra that any number of search workers can pull from at once
pub trait SpectrumSource: Send + Sync {
    fn has_next(&self) -> bool;

    /// May return `None` even right after `has_next()` returned `true`, when another worker got there first
    fn next(&self) -> Option<Spectrum>;

    fn count_read(&self) -> u64;

    /// The number of spectra in the whole stream, if it's known up front
    fn total_count(&self) -> Option<u64>;

    /// Spectra that were read but never handed to a worker
    fn discarded(&self) -> u64 {
        0
    }
}

/// An in-memory queue of spectra
#[derive(Debug, Default)]
pub struct VecSpectrumSource {
    spectra: Mutex<VecDeque<Spectrum>>,
    total: u64,
    read: AtomicU64,
}

impl VecSpectrumSource {
    #[must_use]
    pub fn new(spectra: impl IntoIterator<Item = Spectrum>) -> Self {
        let spectra: VecDeque<_> = spectra.into_iter().collect();
        let total = spectra.len() as u64;
        Self {
            spectra: Mutex::new(spectra),
            total,
            read: AtomicU64::new(0),
        }
    }
}

impl SpectrumSource for VecSpectrumSource {
    fn has_next(&self) -> bool {
        !self.spectra.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    fn next(&self) -> Option<Spectrum> {
        let spectrum = self.spectra.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        if spectrum.is_some() {
            self.read.fetch_add(1, Ordering::Relaxed);
        }
        spectrum
    }

    fn count_read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    fn total_count(&self) -> Option<u64> {
        Some(self.total)
    }
}

/// Like `source.has_next()`, but an empty source is given a random `retry_delay` to prove it has really run dry
///
/// Buffered sources can briefly look empty while they're being refilled, and giving up on them too early would
/// silently drop spectra
pub fn delayed_has_next(source: &dyn SpectrumSource, retry_delay: &RangeInclusive<Duration>) -> bool {
    if source.has_next() {
        return true;
    }

    thread::sleep(random_delay(retry_delay));
    let has_next = source.has_next();
    if has_next {
        warn!(
            "({}) the input looked finished, but more spectra turned up",
            thread::current().name().unwrap_or("unnamed")
        );
    }
    has_next
}

/// A random duration within `range`
pub(crate) fn random_delay(range: &RangeInclusive<Duration>) -> Duration {
    if range.is_empty() {
        return *range.start();
    }
    rand::thread_rng().gen_range(range.clone())
}

// Module Tests ========================================================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    fn spectra(scans: impl IntoIterator<Item = u32>) -> Vec<Spectrum> {
        scans
            .into_iter()
            .map(|scan| Spectrum::new("run", scan, 500.0, 2, Vec::new()))
            .collect()
    }

    const NO_DELAY: RangeInclusive<Duration> = Duration::ZERO..=Duration::ZERO;

    #[test]
    fn vec_source() {
        let source = VecSpectrumSource::new(spectra(1..=3));
        assert_eq!(source.total_count(), Some(3));
        assert_eq!(source.discarded(), 0);

        let mut scans = Vec::new();
        while source.has_next() {
            scans.push(source.next().unwrap().scan());
        }
        assert_eq!(scans, [1, 2, 3]);
        assert_eq!(source.count_read(), 3);
        assert!(source.next().is_none());
        assert_eq!(source.count_read(), 3);
    }

    #[test]
    fn shared_between_threads() {
        let source = VecSpectrumSource::new(spectra(0..1000));
        let read = AtomicU64::new(0);
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    while source.next().is_some() {
                        read.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(read.into_inner(), 1000);
        assert_eq!(source.count_read(), 1000);
    }

    /// Looks empty the first time it's asked
    struct Hesitant {
        inner: VecSpectrumSource,
        asked: AtomicBool,
    }

    impl SpectrumSource for Hesitant {
        fn has_next(&self) -> bool {
            self.asked.swap(true, Ordering::AcqRel) && self.inner.has_next()
        }

        fn next(&self) -> Option<Spectrum> {
            self.inner.next()
        }

        fn count_read(&self) -> u64 {
            self.inner.count_read()
        }

        fn total_count(&self) -> Option<u64> {
            None
        }
    }

    #[test]
    fn delayed_double_check() {
        let hesitant = Hesitant {
            inner: VecSpectrumSource::new(spectra([7])),
            asked: AtomicBool::new(false),
        };
        assert!(delayed_has_next(&hesitant, &NO_DELAY));
        assert_eq!(hesitant.next().map(|spectrum| spectrum.scan()), Some(7));
        assert!(!delayed_has_next(&hesitant, &NO_DELAY));

        let empty = VecSpectrumSource::default();
        assert!(!delayed_has_next(&empty, &NO_DELAY));
    }

    #[test]
    fn random_delays() {
        let range = Duration::from_millis(10)..=Duration::from_millis(20);
        for _ in 0..100 {
            assert!(range.contains(&random_delay(&range)));
        }
        assert_eq!(random_delay(&NO_DELAY), Duration::ZERO);
    }
}
