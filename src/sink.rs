// Standard Library Imports
use std::{
    fmt::{self, Debug, Formatter},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        mpsc::{self, Receiver, Sender},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

// External Crate Imports
use log::{debug, warn};

// Local Crate Imports
use crate::{
    AVERAGE_MS2_ERROR, AVERAGE_MS2_ERROR_CROSSLINKED, AVERAGE_MS2_ERROR_PEPTIDE1, AVERAGE_MS2_ERROR_PEPTIDE2,
    DELTA, MATCH_SCORE, MatchedXlinkedPeptide, Result, SearchConfig, SearchError,
};

// Public API ==========================================================================================================

/// Where ranked matches end up, shared by every search worker
pub trait ResultSink: Send + Sync {
    fn write_header(&self) -> Result<()>;

    fn write_result(&self, matched: MatchedXlinkedPeptide) -> Result<()>;

    /// Returns once everything written so far has reached its final destination
    fn flush(&self) -> Result<()>;

    /// Called once, after the last result has been written
    fn finished(&self) -> Result<()>;

    /// The number of results that made it through this sink
    fn result_count(&self) -> u64;
}

/// Collects every result in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<MatchedXlinkedPeptide>>,
    header_written: AtomicBool,
    finished: AtomicBool,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn results(&self) -> Vec<MatchedXlinkedPeptide> {
        lock(&self.results).clone()
    }

    #[must_use]
    pub fn header_written(&self) -> bool {
        self.header_written.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl ResultSink for MemorySink {
    fn write_header(&self) -> Result<()> {
        self.header_written.store(true, Ordering::Release);
        Ok(())
    }

    fn write_result(&self, matched: MatchedXlinkedPeptide) -> Result<()> {
        lock(&self.results).push(matched);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn finished(&self) -> Result<()> {
        self.finished.store(true, Ordering::Release);
        Ok(())
    }

    fn result_count(&self) -> u64 {
        lock(&self.results).len() as u64
    }
}

/// Batches results and hands them to a background thread that writes them into another sink
pub struct BufferedResultSink {
    inner: Arc<dyn ResultSink>,
    batch_size: usize,
    batch: Mutex<Vec<MatchedXlinkedPeptide>>,
    sender: Mutex<Option<Sender<Vec<MatchedXlinkedPeptide>>>>,
    writer: Mutex<Option<JoinHandle<Result<()>>>>,
    pending: Arc<AtomicUsize>,
    written: AtomicU64,
    top_annotations_only: bool,
}

impl BufferedResultSink {
    /// Starts the writer thread, which runs until `finished()` is called
    pub fn new(inner: Arc<dyn ResultSink>, batch_size: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let writer = {
            let inner = Arc::clone(&inner);
            let pending = Arc::clone(&pending);
            thread::Builder::new()
                .name("result-writer".to_owned())
                .spawn(move || write_batches(&*inner, &receiver, &pending))
                .map_err(SearchError::sink)?
        };

        Ok(Self {
            inner,
            batch_size: batch_size.max(1),
            batch: Mutex::new(Vec::new()),
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
            pending,
            written: AtomicU64::new(0),
            top_annotations_only: false,
        })
    }

    /// Drops the fragment annotations of matches ranked below the top before they're queued
    #[must_use]
    pub const fn with_top_annotations_only(mut self, top_annotations_only: bool) -> Self {
        self.top_annotations_only = top_annotations_only;
        self
    }

    /// Results that are queued but haven't reached the inner sink yet
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire) + lock(&self.batch).len()
    }
}

impl ResultSink for BufferedResultSink {
    fn write_header(&self) -> Result<()> {
        self.inner.write_header()
    }

    fn write_result(&self, mut matched: MatchedXlinkedPeptide) -> Result<()> {
        if self.top_annotations_only && matched.rank() > 1 {
            matched.clear_annotations();
        }
        self.written.fetch_add(1, Ordering::Relaxed);

        let full = {
            let mut batch = lock(&self.batch);
            batch.push(matched);
            (batch.len() >= self.batch_size).then(|| std::mem::take(&mut *batch))
        };
        match full {
            Some(batch) => self.send(batch),
            None => Ok(()),
        }
    }

    fn flush(&self) -> Result<()> {
        let batch = std::mem::take(&mut *lock(&self.batch));
        if !batch.is_empty() {
            self.send(batch)?;
        }

        // NOTE: A batch can be in flight between a worker and the channel, so the queue has to be seen empty twice
        let mut empty_checks = 0;
        while empty_checks < 2 {
            if self.pending() == 0 {
                empty_checks += 1;
            } else {
                empty_checks = 0;
                if lock(&self.writer).as_ref().is_none_or(JoinHandle::is_finished) {
                    return Err(Box::new(SearchError::sink("the result writer stopped before draining its queue")));
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
        debug!("flushed {} buffered results", self.written.load(Ordering::Relaxed));
        self.inner.flush()
    }

    fn finished(&self) -> Result<()> {
        self.flush()?;
        drop(lock(&self.sender).take());
        if let Some(writer) = lock(&self.writer).take() {
            writer
                .join()
                .map_err(|_| SearchError::sink("the result writer panicked"))??;
        }
        self.inner.finished()
    }

    fn result_count(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

impl BufferedResultSink {
    fn send(&self, batch: Vec<MatchedXlinkedPeptide>) -> Result<()> {
        let len = batch.len();
        self.pending.fetch_add(len, Ordering::AcqRel);
        let sent = lock(&self.sender).as_ref().is_some_and(|sender| sender.send(batch).is_ok());
        if sent {
            Ok(())
        } else {
            self.pending.fetch_sub(len, Ordering::AcqRel);
            Err(Box::new(SearchError::sink("results were written after the result writer shut down")))
        }
    }
}

impl Debug for BufferedResultSink {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedResultSink")
            .field("batch_size", &self.batch_size)
            .field("pending", &self.pending())
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

/// A sink decorator that only passes on matches with enough evidence to be worth reporting
pub struct MinimumRequirementsFilter {
    inner: Arc<dyn ResultSink>,
    ms2_limit: Option<f64>,
    max_rank: Option<usize>,
    passed: AtomicU64,
}

impl MinimumRequirementsFilter {
    #[must_use]
    pub fn new(inner: Arc<dyn ResultSink>) -> Self {
        Self {
            inner,
            ms2_limit: None,
            max_rank: None,
            passed: AtomicU64::new(0),
        }
    }

    /// Takes the MS2 error limit from the configuration, and reports no more ranks than candidates are evaluated
    #[must_use]
    pub fn from_config(inner: Arc<dyn ResultSink>, config: &SearchConfig) -> Self {
        Self::new(inner)
            .with_ms2_limit(config.ms2_limit)
            .with_max_rank(Some(config.top_mgx_hits))
    }

    #[must_use]
    pub const fn with_ms2_limit(mut self, ms2_limit: Option<f64>) -> Self {
        self.ms2_limit = ms2_limit;
        self
    }

    #[must_use]
    pub const fn with_max_rank(mut self, max_rank: Option<usize>) -> Self {
        self.max_rank = max_rank;
        self
    }

    #[must_use]
    pub fn passes(&self, matched: &MatchedXlinkedPeptide) -> bool {
        if matched.score(NON_LOSSY_MATCHED) <= 1.0 || self.exceeds_ms2_limit(matched) {
            return false;
        }
        if matched.rank() <= 2 {
            return true;
        }

        let explains_enough = matched.score(INTENSITY_COVERAGE) > 0.025 || matched.score(PEAK_COVERAGE) > 0.025;
        explains_enough
            && matched.fragments().len() > 2
            && -2.0 * matched.score(DELTA) < matched.score(MATCH_SCORE)
            && self.max_rank.is_none_or(|max_rank| matched.rank() <= max_rank)
    }
}

impl ResultSink for MinimumRequirementsFilter {
    fn write_header(&self) -> Result<()> {
        self.inner.write_header()
    }

    fn write_result(&self, matched: MatchedXlinkedPeptide) -> Result<()> {
        if !self.passes(&matched) {
            return Ok(());
        }
        self.passed.fetch_add(1, Ordering::Relaxed);
        self.inner.write_result(matched)
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    fn finished(&self) -> Result<()> {
        self.inner.finished()
    }

    fn result_count(&self) -> u64 {
        self.passed.load(Ordering::Relaxed)
    }
}

impl Debug for MinimumRequirementsFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinimumRequirementsFilter")
            .field("ms2_limit", &self.ms2_limit)
            .field("max_rank", &self.max_rank)
            .field("passed", &self.passed)
            .finish_non_exhaustive()
    }
}

// Private Helper Code =================================================================================================

const NON_LOSSY_MATCHED: &str = "fragment non lossy matched";
const INTENSITY_COVERAGE: &str = "spectrum intensity coverage";
const PEAK_COVERAGE: &str = "spectrum peaks coverage";

// NOTE: A worker that panicked mid-write leaves nothing half-done behind the lock, so poisoning is ignored
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write_batches(
    inner: &dyn ResultSink,
    receiver: &Receiver<Vec<MatchedXlinkedPeptide>>,
    pending: &AtomicUsize,
) -> Result<()> {
    while let Ok(batch) = receiver.recv() {
        for matched in batch {
            let written = inner.write_result(matched);
            pending.fetch_sub(1, Ordering::AcqRel);
            if let Err(error) = written {
                warn!("the result writer stopped: {error}");
                return Err(error);
            }
        }
    }
    Ok(())
}

impl MinimumRequirementsFilter {
    fn exceeds_ms2_limit(&self, matched: &MatchedXlinkedPeptide) -> bool {
        let Some(limit) = self.ms2_limit else {
            return false;
        };
        [AVERAGE_MS2_ERROR, AVERAGE_MS2_ERROR_PEPTIDE1]
            .into_iter()
            .chain(
                [AVERAGE_MS2_ERROR_CROSSLINKED, AVERAGE_MS2_ERROR_PEPTIDE2]
                    .into_iter()
                    .filter(|&error| matched.has_score(error)),
            )
            .any(|error| matched.score(error) > limit)
    }
}

// Module Tests ========================================================================================================
