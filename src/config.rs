// Standard Library Imports
use std::{
    num::NonZeroUsize,
    ops::RangeInclusive,
    sync::Arc,
    thread,
    time::Duration,
};

// External Crate Imports
use knuffel::{
    Decode,
    span::{Span, Spanned},
};
use miette::{Diagnostic, LabeledSpan, NamedSource, Result};
use polychem::{CrossLinker, Specificity};
use sifter::{FragmentIndexSettings, Tolerance};
use smithereens::{CrossLinkedFragmentProducer, Fragmentation, IonSeries, NeutralLoss};
use thiserror::Error;

// Local Crate Imports
use crate::{ResultSort, WeightingStrategy};

// Public API ==========================================================================================================

/// The lightest amino acid residue (glycine), below which no beta peptide can exist
pub const MINIMUM_RESIDUE_MASS: f64 = 57.021_463_721;

/// Every setting of a search, from tolerances and candidate limits to thread control
#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub precursor_tolerance: Tolerance,
    pub fragment_tolerance: Tolerance,
    /// How many distinct MGC scores worth of alpha peptides go on to be paired with beta peptides
    pub top_mgc_hits: usize,
    /// How many distinct MGX scores worth of candidates are fully evaluated
    pub top_mgx_hits: usize,
    /// The number of most intense peaks used to pick alpha peptides
    pub mgc_peaks: usize,
    /// The number of most intense peaks used to score candidate pairs
    pub mgx_peaks: usize,
    /// The m/z window that `mgc_peaks` and `mgx_peaks` are picked from
    pub peak_window: f64,
    pub min_top_score: f64,
    pub evaluate_linears: bool,
    pub index_losses: bool,
    pub max_peak_candidates: Option<usize>,
    pub output_top_only: bool,
    pub threads: usize,
    pub max_peptide_mass: f64,
    pub min_peptide_length: usize,
    pub minimum_residue_mass: f64,
    pub result_sort: ResultSort,
    pub weighting: WeightingStrategy,
    pub prioritize_linears: bool,
    pub test_for_linear_mod: bool,
    /// Whether results must pass `MinimumRequirementsFilter` before being written
    pub minimum_requirements: bool,
    /// The largest mean absolute MS2 error a written result may have
    pub ms2_limit: Option<f64>,
    pub max_spectrum_errors: u64,
    pub watchdog: WatchdogSettings,
    pub crosslinkers: Vec<Arc<CrossLinker>>,
    pub fragmentation: Fragmentation,
}

/// Timings for the threads that keep an eye on the search workers
#[derive(Clone, PartialEq, Debug)]
pub struct WatchdogSettings {
    /// How long the search may go without processing a spectrum before it's considered hung
    pub stall_countdown: Duration,
    /// How long a worker waits before double-checking that its input has really run dry
    pub retry_delay: RangeInclusive<Duration>,
    /// How often the coordinator checks on progress and memory
    pub supervise_interval: Duration,
    /// The fraction of time spent reclaiming memory above which a worker is stopped
    pub memory_limit: f64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            stall_countdown: Duration::from_secs(30 * 60),
            retry_delay: Duration::from_millis(1000)..=Duration::from_millis(2000),
            supervise_interval: Duration::from_secs(1),
            memory_limit: 0.8,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            precursor_tolerance: Tolerance::Ppm(6.0),
            fragment_tolerance: Tolerance::Ppm(20.0),
            top_mgc_hits: 10,
            top_mgx_hits: 10,
            mgc_peaks: 100,
            mgx_peaks: 100,
            peak_window: 100.0,
            min_top_score: -10.0,
            evaluate_linears: true,
            index_losses: true,
            max_peak_candidates: None,
            output_top_only: true,
            threads: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            max_peptide_mass: f64::INFINITY,
            min_peptide_length: 2,
            minimum_residue_mass: MINIMUM_RESIDUE_MASS,
            result_sort: ResultSort::Standard,
            weighting: WeightingStrategy::Standard,
            prioritize_linears: false,
            test_for_linear_mod: true,
            minimum_requirements: true,
            ms2_limit: None,
            max_spectrum_errors: 1000,
            watchdog: WatchdogSettings::default(),
            crosslinkers: Vec::new(),
            fragmentation: Fragmentation::default(),
        }
    }
}

impl SearchConfig {
    /// Reads a configuration from KDL, falling back to the defaults for anything left unset
    pub fn from_kdl(file_name: impl AsRef<str>, kdl_text: impl AsRef<str>) -> Result<Self> {
        let parsed: SearchConfigKdl = knuffel::parse(file_name.as_ref(), kdl_text.as_ref())?;
        parsed
            .validate(())
            .map_err(|e| e.finalize(file_name, kdl_text).into())
    }

    /// The fragment index settings matching this search
    #[must_use]
    pub fn fragment_index_settings(
        &self,
        producers: &[Arc<dyn CrossLinkedFragmentProducer>],
    ) -> FragmentIndexSettings {
        FragmentIndexSettings {
            tolerance: self.fragment_tolerance,
            threads: self.threads,
            max_peptide_mass: self.max_peptide_mass,
            index_losses: self.index_losses,
            max_peak_candidates: self.max_peak_candidates,
            fragmentation: self.fragmentation.clone(),
            crosslinkers: self.crosslinkers.clone(),
            producers: producers.to_vec(),
        }
    }
}

// KDL File Schema =====================================================================================================

#[derive(Debug, Decode)]
#[knuffel(span_type=Span)]
struct SearchConfigKdl {
    #[knuffel(child, unwrap(argument))]
    precursor_tolerance: Option<Spanned<String, Span>>,
    #[knuffel(child, unwrap(argument))]
    fragment_tolerance: Option<Spanned<String, Span>>,
    #[knuffel(child, unwrap(argument))]
    top_mgc_hits: Option<u32>,
    // NOTE: Negative values fall back to `top-mgc-hits`
    #[knuffel(child, unwrap(argument))]
    top_mgx_hits: Option<i64>,
    #[knuffel(child, unwrap(argument))]
    mgc_peaks: Option<u32>,
    #[knuffel(child, unwrap(argument))]
    mgx_peaks: Option<u32>,
    #[knuffel(child, unwrap(argument))]
    peak_window: Option<f64>,
    #[knuffel(child, unwrap(argument))]
    min_top_score: Option<f64>,
    #[knuffel(child, unwrap(argument))]
    evaluate_linears: Option<bool>,
    #[knuffel(child, unwrap(argument))]
    index_losses: Option<bool>,
    #[knuffel(child, unwrap(argument))]
    max_peak_candidates: Option<u32>,
    #[knuffel(child, unwrap(argument))]
    output_top_only: Option<bool>,
    #[knuffel(child, unwrap(argument))]
    threads: Option<u32>,
    #[knuffel(child, unwrap(argument))]
    max_peptide_mass: Option<f64>,
    #[knuffel(child, unwrap(argument))]
    min_peptide_length: Option<u32>,
    #[knuffel(child)]
    result_sort: Option<ResultSortKdl>,
    #[knuffel(child, unwrap(argument))]
    weighting: Option<Spanned<String, Span>>,
    #[knuffel(child, unwrap(argument))]
    prioritize_linears: Option<bool>,
    #[knuffel(child, unwrap(argument))]
    test_for_linear_mod: Option<bool>,
    #[knuffel(child, unwrap(argument))]
    minimum_requirements: Option<bool>,
    #[knuffel(child, unwrap(argument))]
    ms2_limit: Option<f64>,
    #[knuffel(child, unwrap(argument))]
    max_spectrum_errors: Option<u64>,
    #[knuffel(child, unwrap(argument))]
    max_losses: Option<u32>,
    #[knuffel(child)]
    watchdog: Option<WatchdogKdl>,
    #[knuffel(children(name = "crosslinker"))]
    crosslinkers: Vec<CrossLinkerKdl>,
    #[knuffel(children(name = "loss"))]
    losses: Vec<LossKdl>,
}

#[derive(Debug, Decode)]
#[knuffel(span_type=Span)]
struct ResultSortKdl {
    #[knuffel(span)]
    span: Span,
    #[knuffel(argument)]
    kind: String,
    #[knuffel(arguments)]
    scores: Vec<String>,
    #[knuffel(property)]
    limit: Option<f64>,
}

#[derive(Debug, Decode)]
#[knuffel(span_type=Span)]
struct WatchdogKdl {
    #[knuffel(span)]
    span: Span,
    /// In seconds
    #[knuffel(property)]
    countdown: Option<u64>,
    /// In milliseconds
    #[knuffel(property)]
    retry_min: Option<u64>,
    /// In milliseconds
    #[knuffel(property)]
    retry_max: Option<u64>,
    /// In milliseconds
    #[knuffel(property)]
    interval: Option<u64>,
    #[knuffel(property)]
    memory_limit: Option<f64>,
}

#[derive(Debug, Decode)]
#[knuffel(span_type=Span)]
struct CrossLinkerKdl {
    #[knuffel(span)]
    span: Span,
    #[knuffel(argument)]
    name: String,
    #[knuffel(property)]
    mass: Option<f64>,
    #[knuffel(property)]
    kind: Option<String>,
    #[knuffel(children(name = "links"))]
    links: Vec<TargetsKdl>,
    #[knuffel(child)]
    stubs: Option<StubsKdl>,
}

#[derive(Debug, Decode)]
#[knuffel(span_type=Span)]
struct TargetsKdl {
    #[knuffel(span)]
    span: Span,
    #[knuffel(arguments)]
    targets: Vec<String>,
}

#[derive(Debug, Decode)]
#[knuffel(span_type=Span)]
struct StubsKdl {
    #[knuffel(arguments)]
    masses: Vec<f64>,
}

#[derive(Debug, Decode)]
#[knuffel(span_type=Span)]
struct LossKdl {
    #[knuffel(span)]
    span: Span,
    #[knuffel(argument)]
    name: String,
    #[knuffel(property)]
    mass: f64,
    #[knuffel(child)]
    targets: Option<TargetsKdl>,
    #[knuffel(child, unwrap(argument))]
    terminal: Option<Spanned<String, Span>>,
}

// Contextual Validation Trait  ========================================================================================

type ConfigResult<T> = Result<T, ConfigErrorKind>;

trait ValidateInto<T> {
    fn validate(self, ctx: ()) -> ConfigResult<T>;
}

// Search Configuration Validation =====================================================================================

impl ValidateInto<SearchConfig> for SearchConfigKdl {
    fn validate(self, _ctx: ()) -> ConfigResult<SearchConfig> {
        let defaults = SearchConfig::default();
        let tolerance = |kdl: Option<Spanned<String, Span>>, default: Tolerance| -> ConfigResult<Tolerance> {
            kdl.map_or(Ok(default), |tolerance| tolerance.validate(()))
        };
        let top_mgc_hits = self.top_mgc_hits.map_or(defaults.top_mgc_hits, |hits| hits as usize);
        let top_mgx_hits = match self.top_mgx_hits {
            Some(hits) if hits >= 0 => hits as usize,
            _ => top_mgc_hits,
        };

        let crosslinkers = self
            .crosslinkers
            .into_iter()
            .map(|crosslinker| crosslinker.validate(()).map(Arc::new))
            .collect::<ConfigResult<_>>()?;

        let losses: Vec<_> = self
            .losses
            .into_iter()
            .map(|loss| loss.validate(()))
            .collect::<ConfigResult<_>>()?;
        let fragmentation = if losses.is_empty() && self.max_losses.is_none() {
            defaults.fragmentation
        } else {
            let losses = if losses.is_empty() {
                defaults.fragmentation.losses().to_vec()
            } else {
                losses
            };
            let max_losses = self.max_losses.map_or(3, |max| max as usize);
            Fragmentation::new(
                vec![IonSeries::B, IonSeries::Y, IonSeries::Precursor],
                losses,
                max_losses,
            )
        };

        Ok(SearchConfig {
            precursor_tolerance: tolerance(self.precursor_tolerance, defaults.precursor_tolerance)?,
            fragment_tolerance: tolerance(self.fragment_tolerance, defaults.fragment_tolerance)?,
            top_mgc_hits,
            top_mgx_hits,
            mgc_peaks: self.mgc_peaks.map_or(defaults.mgc_peaks, |peaks| peaks as usize),
            mgx_peaks: self.mgx_peaks.map_or(defaults.mgx_peaks, |peaks| peaks as usize),
            peak_window: self.peak_window.unwrap_or(defaults.peak_window),
            min_top_score: self.min_top_score.unwrap_or(defaults.min_top_score),
            evaluate_linears: self.evaluate_linears.unwrap_or(defaults.evaluate_linears),
            index_losses: self.index_losses.unwrap_or(defaults.index_losses),
            max_peak_candidates: self.max_peak_candidates.map(|max| max as usize),
            output_top_only: self.output_top_only.unwrap_or(defaults.output_top_only),
            threads: self.threads.map_or(defaults.threads, |threads| threads.max(1) as usize),
            max_peptide_mass: self.max_peptide_mass.unwrap_or(defaults.max_peptide_mass),
            min_peptide_length: self
                .min_peptide_length
                .map_or(defaults.min_peptide_length, |length| length as usize),
            minimum_residue_mass: defaults.minimum_residue_mass,
            result_sort: self
                .result_sort
                .map_or(Ok(defaults.result_sort), |sort| sort.validate(()))?,
            weighting: self
                .weighting
                .map_or(Ok(defaults.weighting), |weighting| weighting.validate(()))?,
            prioritize_linears: self.prioritize_linears.unwrap_or(defaults.prioritize_linears),
            test_for_linear_mod: self.test_for_linear_mod.unwrap_or(defaults.test_for_linear_mod),
            minimum_requirements: self
                .minimum_requirements
                .unwrap_or(defaults.minimum_requirements),
            ms2_limit: self.ms2_limit,
            max_spectrum_errors: self.max_spectrum_errors.unwrap_or(defaults.max_spectrum_errors),
            watchdog: self
                .watchdog
                .map_or(Ok(defaults.watchdog), |watchdog| watchdog.validate(()))?,
            crosslinkers,
            fragmentation,
        })
    }
}

impl ValidateInto<Tolerance> for Spanned<String, Span> {
    fn validate(self, _ctx: ()) -> ConfigResult<Tolerance> {
        self.parse()
            .map_err(|e: Box<sifter::SifterError>| {
                ConfigErrorKind::InvalidTolerance(*self.span(), e.to_string())
            })
    }
}

impl ValidateInto<WeightingStrategy> for Spanned<String, Span> {
    fn validate(self, _ctx: ()) -> ConfigResult<WeightingStrategy> {
        match self.as_str() {
            "standard" => Ok(WeightingStrategy::Standard),
            "weighted" => Ok(WeightingStrategy::Weighted),
            "weighted-nary" => Ok(WeightingStrategy::WeightedNary),
            _ => Err(ConfigErrorKind::InvalidWeighting(*self.span(), (*self).clone())),
        }
    }
}

impl ValidateInto<ResultSort> for ResultSortKdl {
    fn validate(self, _ctx: ()) -> ConfigResult<ResultSort> {
        match (self.kind.as_str(), self.limit) {
            ("standard", _) => Ok(ResultSort::Standard),
            ("no-auto-validation", _) => Ok(ResultSort::NoAutoValidation),
            ("sub-scores", _) if !self.scores.is_empty() => Ok(ResultSort::SubScoreDirected(self.scores)),
            ("ms2-limit", Some(limit)) => Ok(ResultSort::Ms2Limit(limit)),
            _ => Err(ConfigErrorKind::InvalidResultSort(self.span, self.kind.clone())),
        }
    }
}

impl ValidateInto<WatchdogSettings> for WatchdogKdl {
    fn validate(self, _ctx: ()) -> ConfigResult<WatchdogSettings> {
        let defaults = WatchdogSettings::default();
        let retry_min = self
            .retry_min
            .map_or(*defaults.retry_delay.start(), Duration::from_millis);
        let retry_max = self
            .retry_max
            .map_or(*defaults.retry_delay.end(), Duration::from_millis)
            .max(retry_min);
        let memory_limit = self.memory_limit.unwrap_or(defaults.memory_limit);
        if !(0.0..=1.0).contains(&memory_limit) {
            return Err(ConfigErrorKind::InvalidMemoryLimit(self.span, memory_limit));
        }

        Ok(WatchdogSettings {
            stall_countdown: self
                .countdown
                .map_or(defaults.stall_countdown, Duration::from_secs),
            retry_delay: retry_min..=retry_max,
            supervise_interval: self
                .interval
                .map_or(defaults.supervise_interval, Duration::from_millis),
            memory_limit,
        })
    }
}

impl ValidateInto<CrossLinker> for CrossLinkerKdl {
    fn validate(self, _ctx: ()) -> ConfigResult<CrossLinker> {
        let kind = self.kind.as_deref().unwrap_or("symmetric");
        let specificities: Vec<_> = self
            .links
            .into_iter()
            .map(|links| {
                Specificity::from_targets(&links.targets)
                    .map_err(|e| ConfigErrorKind::InvalidLinkTarget(links.span, e.to_string()))
            })
            .collect::<ConfigResult<_>>()?;
        let mass = || {
            self.mass
                .ok_or_else(|| ConfigErrorKind::MissingLinkerMass(self.span, self.name.clone()))
        };

        let crosslinker = match (kind, specificities.as_slice()) {
            ("noncovalent", []) => CrossLinker::non_covalent(&self.name),
            ("symmetric", [specificity]) => {
                CrossLinker::symmetric(&self.name, mass()?, specificity.clone())
            }
            ("asymmetric", [first, second]) => {
                CrossLinker::asymmetric(&self.name, mass()?, first.clone(), second.clone())
            }
            ("noncovalent" | "symmetric" | "asymmetric", _) => {
                return Err(ConfigErrorKind::WrongLinkCount(
                    self.span,
                    kind.to_owned(),
                    specificities.len(),
                ));
            }
            _ => return Err(ConfigErrorKind::InvalidLinkerKind(self.span, kind.to_owned())),
        };

        let stubs = self.stubs.map(|stubs| stubs.masses).unwrap_or_default();
        Ok(crosslinker.with_stubs(stubs))
    }
}

impl ValidateInto<NeutralLoss> for LossKdl {
    fn validate(self, _ctx: ()) -> ConfigResult<NeutralLoss> {
        let mut residues = Vec::new();
        if let Some(targets) = self.targets {
            for target in targets.targets {
                let mut chars = target.chars();
                let (Some(residue), None) = (chars.next(), chars.next()) else {
                    return Err(ConfigErrorKind::InvalidLossTarget(targets.span, target));
                };
                residues.push(residue);
            }
        }

        let loss = NeutralLoss::new(self.name, self.mass, residues);
        match self.terminal.as_ref().map(|terminal| terminal.as_str()) {
            None => Ok(loss),
            Some("n") => Ok(loss.with_n_terminal()),
            Some("c") => Ok(loss.with_c_terminal()),
            Some(other) => Err(ConfigErrorKind::InvalidTerminal(
                self.terminal.as_ref().map_or(self.span, |t| *t.span()),
                other.to_owned(),
            )),
        }
    }
}

// Validation Error Types and Trait Implementations  ===================================================================

#[derive(Debug, Error)]
#[error("failed to validate search configuration")]
struct ConfigError {
    kdl: NamedSource<String>,
    #[source]
    kind: ConfigErrorKind,
}

// NOTE: This is manually implemented because the list of labels is dynamic and needs to be extracted from `self.kind`
impl Diagnostic for ConfigError {
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
enum ConfigErrorKind {
    #[error("invalid tolerance: {1}")]
    #[diagnostic(help("tolerances are a number followed by a unit, like 10ppm or 0.02da"))]
    InvalidTolerance(Span, String),

    #[error("the weighting strategy {1:?} doesn't exist")]
    #[diagnostic(help("try one of standard, weighted, or weighted-nary"))]
    InvalidWeighting(Span, String),

    #[error("the result sort {1:?} doesn't exist or is missing its settings")]
    #[diagnostic(help(
        "try standard, no-auto-validation, sub-scores followed by score names, or ms2-limit with a limit"
    ))]
    InvalidResultSort(Span, String),

    #[error("the memory limit {1} isn't a fraction between 0 and 1")]
    InvalidMemoryLimit(Span, f64),

    #[error("the cross-linker kind {1:?} doesn't exist")]
    #[diagnostic(help("try one of symmetric, asymmetric, or noncovalent"))]
    InvalidLinkerKind(Span, String),

    #[error("the cross-linker {1:?} needs a mass")]
    MissingLinkerMass(Span, String),

    #[error("a {1} cross-linker can't have {2} sets of links")]
    #[diagnostic(help("symmetric linkers take one links node, asymmetric take two, and noncovalent take none"))]
    WrongLinkCount(Span, String, usize),

    #[error("{1}")]
    InvalidLinkTarget(Span, String),

    #[error("the loss target {1:?} is not a single residue")]
    InvalidLossTarget(Span, String),

    #[error("the loss terminal {1:?} is neither n nor c")]
    InvalidTerminal(Span, String),
}

impl ConfigErrorKind {
    fn labels(&self) -> Vec<(&Span, &'static str)> {
        match self {
            Self::InvalidTolerance(s, _) => vec![(s, "invalid tolerance")],
            Self::InvalidWeighting(s, _) => vec![(s, "unknown weighting")],
            Self::InvalidResultSort(s, _) => vec![(s, "invalid result sort")],
            Self::InvalidMemoryLimit(s, _) => vec![(s, "invalid memory limit")],
            Self::InvalidLinkerKind(s, _) | Self::WrongLinkCount(s, ..) => {
                vec![(s, "invalid cross-linker")]
            }
            Self::MissingLinkerMass(s, _) => vec![(s, "missing mass")],
            Self::InvalidLinkTarget(s, _) | Self::InvalidLossTarget(s, _) => {
                vec![(s, "invalid target")]
            }
            Self::InvalidTerminal(s, _) => vec![(s, "invalid terminal")],
        }
    }

    fn finalize(self, file_name: impl AsRef<str>, kdl: impl AsRef<str>) -> ConfigError {
        let kdl = NamedSource::new(file_name, kdl.as_ref().to_owned());
        ConfigError { kdl, kind: self }
    }
}

// Module Tests ========================================================================================================
