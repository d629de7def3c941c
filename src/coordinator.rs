// Standard Library Imports
use std::{
    fmt::{self, Debug, Formatter},
    ops::RangeInclusive,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

// External Crate Imports
use derive_more::Display;
use log::{debug, error, info, warn};
use polychem::Peptide;
use sifter::{FragmentIndex, MassIndex, MassIndexBuilder, Spectrum};
use smithereens::CrossLinkedFragmentProducer;

// Local Crate Imports
use crate::{
    CandidateScorer, MatchEvaluator, MatchedXlinkedPeptide, MinimumRequirementsFilter, Ranker, Result, ResultSink,
    SearchConfig, SearchError, SpectrumSource, WatchdogSettings,
    source::{delayed_has_next, random_delay},
};

// Public API ==========================================================================================================

/// Everything needed to search a single spectrum, shared read-only by every worker
#[derive(Debug)]
pub struct SearchContext {
    scorer: CandidateScorer,
    evaluator: MatchEvaluator,
    ranker: Ranker,
}

impl SearchContext {
    #[must_use]
    pub fn new(config: &SearchConfig, scorer: CandidateScorer, evaluator: MatchEvaluator) -> Self {
        let ranker = Ranker::new(config);
        Self {
            scorer,
            evaluator,
            ranker,
        }
    }

    /// Indexes `peptides` and sets up the standard scorer and evaluator around them
    pub fn build(
        config: &SearchConfig,
        peptides: impl IntoIterator<Item = Peptide>,
        producers: &[Arc<dyn CrossLinkedFragmentProducer>],
    ) -> Result<Self> {
        let started = Instant::now();
        let mut builder = MassIndexBuilder::new(config.precursor_tolerance);
        for peptide in peptides {
            builder.insert(peptide);
        }
        builder.cleanup(config.min_peptide_length);
        let mass_index = Arc::new(builder.finalize());
        info!("indexed {} peptides by mass in {:.2?}", mass_index.len(), started.elapsed());

        let settings = config.fragment_index_settings(producers);
        let fragment_index =
            FragmentIndex::build(mass_index.iter(), &settings).map_err(SearchError::index_build)?;

        Ok(Self::from_indexes(config, mass_index, Arc::new(fragment_index), producers))
    }

    /// Sets up the standard scorer and evaluator around indexes that are already built
    #[must_use]
    pub fn from_indexes(
        config: &SearchConfig,
        peptides: Arc<MassIndex>,
        fragments: Arc<FragmentIndex>,
        producers: &[Arc<dyn CrossLinkedFragmentProducer>],
    ) -> Self {
        let scorer = CandidateScorer::new(config, peptides, fragments, producers);
        let evaluator = MatchEvaluator::new(config, producers);
        Self::new(config, scorer, evaluator)
    }

    #[must_use]
    pub const fn scorer(&self) -> &CandidateScorer {
        &self.scorer
    }

    #[must_use]
    pub const fn evaluator(&self) -> &MatchEvaluator {
        &self.evaluator
    }

    #[must_use]
    pub const fn ranker(&self) -> &Ranker {
        &self.ranker
    }

    /// Scores, evaluates, and ranks every candidate for each plausible charge state of `spectrum`
    pub fn search_spectrum(&self, spectrum: &Spectrum) -> Result<Vec<MatchedXlinkedPeptide>> {
        let mass = spectrum.precursor_mass();
        if !mass.is_finite() || mass <= 0.0 {
            return Err(Box::new(SearchError::spectrum(
                spectrum.run(),
                spectrum.scan(),
                format!("the precursor mass {mass} can't be searched"),
            )));
        }

        let mut matches = Vec::new();
        for variant in spectrum.alternative_charge_state_spectra() {
            let variant = Arc::new(variant);
            for candidate in self.scorer.candidates(&variant) {
                matches.extend(self.evaluator.evaluate(
                    &variant,
                    &candidate.alpha,
                    candidate.beta.as_ref(),
                    candidate.crosslinker.as_ref(),
                    &candidate.stats,
                ));
            }
        }
        debug!(
            "scan {} of {:?} gave {} matches",
            spectrum.scan(),
            spectrum.run(),
            matches.len()
        );
        Ok(self.ranker.rank(matches))
    }
}

/// Reports how much of its time the process recently spent reclaiming memory, as a fraction between 0 and 1
pub trait MemoryPressure: Send + Sync {
    fn sample(&self) -> f64;
}

/// What a search worker is currently doing
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum WorkerState {
    #[display("idle")]
    Idle,
    #[display("fetching a spectrum")]
    FetchSpectrum,
    #[display("scoring candidates for scan {_0}")]
    Search(u32),
    #[display("writing the results of scan {_0}")]
    Emit(u32),
    #[display("finished")]
    Finished,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SearchSummary {
    pub processed: u64,
    pub errors: u64,
    pub results: u64,
    pub elapsed: Duration,
}

/// Runs a pool of search workers, pulling from one spectrum source and writing to one sink
pub struct SearchCoordinator {
    shared: Arc<Shared>,
    threads: usize,
    watchdog: WatchdogSettings,
    memory: Option<Box<dyn MemoryPressure>>,
    workers: Mutex<Vec<Worker>>,
    next_worker: AtomicUsize,
}

impl SearchCoordinator {
    /// Results pass through a `MinimumRequirementsFilter` on their way to `sink` if the configuration asks for it
    #[must_use]
    pub fn new(
        config: &SearchConfig,
        context: SearchContext,
        source: Arc<dyn SpectrumSource>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let sink: Arc<dyn ResultSink> = if config.minimum_requirements {
            Arc::new(MinimumRequirementsFilter::from_config(sink, config))
        } else {
            sink
        };
        let shared = Shared {
            context,
            source,
            sink,
            retry_delay: config.watchdog.retry_delay.clone(),
            max_spectrum_errors: config.max_spectrum_errors,
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            fatal: Mutex::new(None),
        };
        Self {
            shared: Arc::new(shared),
            threads: config.threads.max(1),
            watchdog: config.watchdog.clone(),
            memory: None,
            workers: Mutex::new(Vec::new()),
            next_worker: AtomicUsize::new(0),
        }
    }

    /// Stops a worker whenever memory pressure goes over the configured limit
    #[must_use]
    pub fn with_memory_pressure(mut self, memory: impl MemoryPressure + 'static) -> Self {
        self.memory = Some(Box::new(memory));
        self
    }

    /// Searches every spectrum in the source, returning once they've all been written to the sink
    pub fn run(&self) -> Result<SearchSummary> {
        let started = Instant::now();
        let sink = &self.shared.sink;
        sink.write_header()?;

        info!("searching with {} threads", self.threads);
        self.spawn_workers(self.threads)?;
        let outcome = self.supervise(started);

        // NOTE: Whatever made it to the sink is kept, even when the search itself failed
        if let Err(error) = sink.flush() {
            warn!("failed to flush results: {error}");
        }
        outcome?;
        sink.finished()?;

        let summary = SearchSummary {
            processed: self.processed(),
            errors: self.shared.errors.load(Ordering::Relaxed),
            results: sink.result_count(),
            elapsed: started.elapsed(),
        };
        info!(
            "searched {} spectra in {:.2?} ({} failed), writing {} results",
            summary.processed, summary.elapsed, summary.errors, summary.results
        );
        Ok(summary)
    }

    /// Asks every worker to stop after the spectrum it's currently searching
    pub fn stop(&self) {
        info!("stopping the search");
        self.shared.stopped.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    pub fn increase_threads(&self) -> Result<()> {
        self.spawn_workers(1)?;
        info!("increased the search to {} threads", self.active_threads());
        Ok(())
    }

    /// Stops one worker, returning `false` if it's the last one left
    pub fn decrease_threads(&self) -> bool {
        let workers = lock(&self.workers);
        let mut active = workers.iter().filter(|worker| worker.is_active());
        let Some(victim) = active.next() else {
            return false;
        };
        if active.next().is_none() {
            return false;
        }
        victim.stop.store(true, Ordering::Release);
        warn!("stopping {} to reduce memory use", victim.name);
        true
    }

    #[must_use]
    pub fn active_threads(&self) -> usize {
        lock(&self.workers).iter().filter(|worker| worker.is_active()).count()
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        self.shared.processed.load(Ordering::Relaxed)
    }

    /// The name and current state of every worker that's been started and not yet cleaned up
    #[must_use]
    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        lock(&self.workers)
            .iter()
            .map(|worker| (worker.name.clone(), *lock(&worker.state)))
            .collect()
    }
}

impl Debug for SearchCoordinator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchCoordinator")
            .field("threads", &self.threads)
            .field("watchdog", &self.watchdog)
            .field("processed", &self.processed())
            .field("workers", &self.worker_states())
            .finish_non_exhaustive()
    }
}

// Private Types =======================================================================================================

const PROGRESS_SPECTRA: u64 = 100;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// State shared between the coordinator and its workers
struct Shared {
    context: SearchContext,
    source: Arc<dyn SpectrumSource>,
    sink: Arc<dyn ResultSink>,
    retry_delay: RangeInclusive<Duration>,
    max_spectrum_errors: u64,
    processed: AtomicU64,
    errors: AtomicU64,
    stopped: AtomicBool,
    fatal: Mutex<Option<Box<SearchError>>>,
}

impl Shared {
    fn fail(&self, error: Box<SearchError>) {
        error!("the search failed: {error}");
        self.stopped.store(true, Ordering::Release);
        lock(&self.fatal).get_or_insert(error);
    }

    fn should_stop(&self, stop: &AtomicBool) -> bool {
        stop.load(Ordering::Acquire) || self.stopped.load(Ordering::Acquire)
    }
}

struct Worker {
    name: String,
    stop: Arc<AtomicBool>,
    state: Arc<Mutex<WorkerState>>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn is_active(&self) -> bool {
        !self.stop.load(Ordering::Acquire) && !self.handle.is_finished()
    }
}

/// Progress as last seen by the supervisor
struct Progress {
    processed: u64,
    changed: Instant,
    reported: u64,
    report_time: Instant,
}

// Private Helper Code =================================================================================================

// NOTE: Nothing is left half-updated behind these locks when a worker panics, so poisoning is ignored
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SearchCoordinator {
    fn spawn_workers(&self, count: usize) -> Result<()> {
        let mut workers = lock(&self.workers);
        for _ in 0..count {
            let name = format!("search-{}", self.next_worker.fetch_add(1, Ordering::Relaxed));
            let stop = Arc::new(AtomicBool::new(false));
            let state = Arc::new(Mutex::new(WorkerState::Idle));
            let handle = {
                let shared = Arc::clone(&self.shared);
                let stop = Arc::clone(&stop);
                let state = Arc::clone(&state);
                thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || search_worker(&shared, &stop, &state))
                    .map_err(|e| SearchError::config(format!("failed to start search worker {name}: {e}")))?
            };
            debug!("started {name}");
            workers.push(Worker {
                name,
                stop,
                state,
                handle,
            });
        }
        Ok(())
    }

    fn supervise(&self, started: Instant) -> Result<()> {
        let now = Instant::now();
        let mut progress = Progress {
            processed: 0,
            changed: now,
            reported: 0,
            report_time: now,
        };

        loop {
            thread::sleep(self.watchdog.supervise_interval);

            if let Some(error) = lock(&self.shared.fatal).take() {
                self.join_finished_workers();
                return Err(error);
            }

            self.check_progress(&mut progress, started)?;
            self.check_memory();

            if self.join_finished_workers() > 0 {
                continue;
            }
            // NOTE: Workers can all give up on an input that's only briefly run dry
            if !self.is_stopped() && self.shared.source.has_next() {
                warn!("every worker finished, but spectra are left unsearched; restarting workers");
                self.spawn_workers(self.threads)?;
                continue;
            }
            return Ok(());
        }
    }

    /// Cleans up after finished workers, returning how many are still running
    fn join_finished_workers(&self) -> usize {
        let mut workers = lock(&self.workers);
        let (finished, running): (Vec<_>, Vec<_>) =
            workers.drain(..).partition(|worker| worker.handle.is_finished());
        *workers = running;

        for worker in finished {
            if worker.handle.join().is_err() {
                error!("{} panicked", worker.name);
            } else {
                debug!("{} finished", worker.name);
            }
        }
        workers.len()
    }

    fn check_progress(&self, progress: &mut Progress, started: Instant) -> Result<()> {
        let processed = self.processed();
        let now = Instant::now();

        if processed != progress.processed {
            progress.processed = processed;
            progress.changed = now;
        } else if now.duration_since(progress.changed) > self.watchdog.stall_countdown {
            let stalled_for = now.duration_since(progress.changed);
            error!("no spectra were processed for {stalled_for:.0?}; worker states follow");
            for (name, state) in self.worker_states() {
                error!("  {name}: {state}");
            }
            self.stop();
            return Err(Box::new(SearchError::stalled(stalled_for, processed)));
        }

        let due = processed >= progress.reported + PROGRESS_SPECTRA
            || (processed > progress.reported && now.duration_since(progress.report_time) >= PROGRESS_INTERVAL);
        if due {
            self.report_progress(processed, started);
            progress.reported = processed;
            progress.report_time = now;
        }
        Ok(())
    }

    fn report_progress(&self, processed: u64, started: Instant) {
        let elapsed = started.elapsed();
        let rate = processed as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        match self.shared.source.total_count().filter(|&total| total > 0) {
            Some(total) => {
                let percent = 100.0 * processed as f64 / total as f64;
                let remaining = total.saturating_sub(processed) as f64 / rate.max(f64::EPSILON);
                info!(
                    "processed {processed}/{total} spectra ({percent:.1}%), {rate:.1} spectra/s, ETA {:.0?}",
                    Duration::from_secs_f64(remaining.min(1e9))
                );
            }
            None => info!("processed {processed} spectra, {rate:.1} spectra/s"),
        }
    }

    fn check_memory(&self) {
        let Some(memory) = &self.memory else {
            return;
        };
        let pressure = memory.sample();
        if pressure > self.watchdog.memory_limit {
            warn!(
                "{:.0}% of recent time went to reclaiming memory, over the {:.0}% limit",
                pressure * 100.0,
                self.watchdog.memory_limit * 100.0
            );
            if !self.decrease_threads() {
                warn!("only one search worker is left, so it keeps running");
            }
        }
    }
}

fn search_worker(shared: &Shared, stop: &AtomicBool, state: &Mutex<WorkerState>) {
    let name = thread::current().name().unwrap_or("search").to_owned();
    let set_state = |new: WorkerState| *lock(state) = new;

    while !shared.should_stop(stop) && delayed_has_next(&*shared.source, &shared.retry_delay) {
        set_state(WorkerState::FetchSpectrum);
        let Some(spectrum) = shared.source.next() else {
            // NOTE: Another worker can take the last spectrum between `has_next()` and `next()`
            warn!("({name}) did not get a spectrum");
            thread::sleep(random_delay(&shared.retry_delay));
            continue;
        };

        let scan = spectrum.scan();
        set_state(WorkerState::Search(scan));
        let searched = panic::catch_unwind(AssertUnwindSafe(|| shared.context.search_spectrum(&spectrum)))
            .unwrap_or_else(|_| {
                Err(Box::new(SearchError::spectrum(
                    spectrum.run(),
                    scan,
                    "searching the spectrum panicked",
                )))
            });

        match searched {
            Ok(matches) => {
                set_state(WorkerState::Emit(scan));
                for matched in matches {
                    if let Err(error) = shared.sink.write_result(matched) {
                        shared.fail(error);
                        set_state(WorkerState::Finished);
                        return;
                    }
                }
            }
            Err(error) => {
                error!("({name}) {error}");
                let errors = shared.errors.fetch_add(1, Ordering::AcqRel) + 1;
                if errors > shared.max_spectrum_errors {
                    shared.fail(Box::new(SearchError::too_many_errors(errors)));
                }
            }
        }
        shared.processed.fetch_add(1, Ordering::Relaxed);
        set_state(WorkerState::Idle);
    }

    if stop.load(Ordering::Acquire) {
        info!("({name}) stopped");
    }
    set_state(WorkerState::Finished);
}

// Module Tests ========================================================================================================
