use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use once_cell::sync::Lazy;
use polychem::{CrossLinker, IdSequence, PROTON_MASS, Peptide, ProteinSource, ResidueDatabase, Specificity};
use sifter::{FragmentIndex, FragmentIndexSettings, MassIndexBuilder, Peak, Spectrum, Tolerance};
use smithereens::{CrossLinkedFragmentProducer, Dissociable, IonSeries, PeptideIonProducer};
use xisearch::{
    MemorySink, ResultSink, SearchConfig, SearchContext, SearchCoordinator, SpectrumSource, VecSpectrumSource,
    WatchdogSettings,
};

static DB: Lazy<ResidueDatabase> = Lazy::new(ResidueDatabase::default);

fn config(linker_mass: f64) -> SearchConfig {
    SearchConfig {
        threads: 2,
        minimum_requirements: false,
        precursor_tolerance: Tolerance::Ppm(10.0),
        crosslinkers: vec![Arc::new(CrossLinker::symmetric(
            "XL",
            linker_mass,
            Specificity::new(['K']),
        ))],
        watchdog: WatchdogSettings {
            retry_delay: Duration::from_millis(1)..=Duration::from_millis(10),
            supervise_interval: Duration::from_millis(5),
            ..WatchdogSettings::default()
        },
        ..SearchConfig::default()
    }
}

fn digest<'a>(ids: &IdSequence, sequences: impl IntoIterator<Item = &'a str>) -> Vec<Peptide> {
    sequences
        .into_iter()
        .map(|sequence| {
            let source = ProteinSource::new(format!("{sequence}_protein"), 10, 100);
            Peptide::new(&DB, ids, sequence, false, [source]).unwrap()
        })
        .collect()
}

fn context(config: &SearchConfig, sequences: &[&str]) -> SearchContext {
    let producers: Vec<Arc<dyn CrossLinkedFragmentProducer>> = vec![Arc::new(PeptideIonProducer)];
    let peptides = digest(&IdSequence::new(), sequences.iter().copied());
    SearchContext::build(config, peptides, &producers).unwrap()
}

fn peptide(sequence: &str) -> Peptide {
    Peptide::new(&DB, &IdSequence::new(), sequence, false, []).unwrap()
}

fn spectrum(scan: u32, mzs: impl IntoIterator<Item = f64>, precursor_mass: f64, charge: u32) -> Spectrum {
    let peaks = mzs.into_iter().map(|mz| Peak::new(mz, 100.0)).collect();
    let precursor_mz = precursor_mass / f64::from(charge) + PROTON_MASS;
    Spectrum::new("run", scan, precursor_mz, charge, peaks)
}

#[test]
fn a_single_y_ion_finds_its_peptide() {
    let config = config(138.068_08);
    let context = context(&config, &["PEP", "SAMPLER", "ELVISK", "GKLVR"]);

    let pep = peptide("PEP");
    let y_ions = pep.fragment(&[IonSeries::Y]);
    let y1 = y_ions.last().unwrap();
    assert_eq!(y1.range(), 2..3);
    let spectrum = spectrum(1, [y1.mz(1)], pep.mass(), 1);

    let candidates = context.scorer().candidates(&spectrum);
    assert_eq!(candidates[0].alpha.sequence(), "PEP");
    assert!(!candidates[0].is_cross_linked());

    let matches = context.search_spectrum(&spectrum).unwrap();
    let top = &matches[0];
    assert_eq!(top.alpha().sequence(), "PEP");
    assert!(!top.fragments().is_empty());
    assert_eq!(top.rank(), 1);
}

#[test]
fn b_cross_linked_pairs_are_proposed_once() {
    const LINKER_MASS: f64 = 100.0;
    let config = config(LINKER_MASS);

    let alpha = peptide("PEPKAR");
    let beta = peptide("GKLVR");
    let b_ions = alpha.fragment(&[IonSeries::B]);
    let y_ions = beta.fragment(&[IonSeries::Y]);
    let mzs = b_ions[..3].iter().chain(&y_ions[2..]).map(|fragment| fragment.mz(1));
    let spectrum = spectrum(1, mzs, alpha.mass() + beta.mass() + LINKER_MASS, 3);

    for sequences in [["PEPKAR", "GKLVR", "SAMPLER"], ["SAMPLER", "GKLVR", "PEPKAR"]] {
        let context = context(&config, &sequences);

        let pairs: Vec<_> = context
            .scorer()
            .candidates(&spectrum)
            .into_iter()
            .filter_map(|candidate| {
                let mut pair = [candidate.alpha.sequence(), candidate.beta?.sequence()];
                pair.sort();
                Some(pair)
            })
            .collect();
        assert_eq!(pairs, [["GKLVR".to_owned(), "PEPKAR".to_owned()]]);

        let matches = context.search_spectrum(&spectrum).unwrap();
        let top = &matches[0];
        assert!(top.is_cross_linked());
        assert_eq!(top.rank(), 1);
        let mut sequences = top.base_sequences();
        sequences.sort();
        assert_eq!(sequences, ["GKLVR", "PEPKAR"]);
    }
}

#[test]
fn c_fragment_indexes_do_not_depend_on_threads() {
    const RESIDUES: [char; 20] = [
        'G', 'A', 'S', 'P', 'V', 'T', 'C', 'L', 'I', 'N', 'D', 'Q', 'K', 'E', 'M', 'H', 'F', 'R', 'Y', 'W',
    ];
    let sequences: Vec<String> = (0..10_000_usize)
        .map(|i| {
            let mut sequence: String = (0..4).map(|digit| RESIDUES[i / 20_usize.pow(digit) % 20]).collect();
            sequence.push('K');
            sequence
        })
        .collect();

    let ids = IdSequence::new();
    let mut builder = MassIndexBuilder::new(Tolerance::Ppm(10.0));
    for peptide in digest(&ids, sequences.iter().map(String::as_str)) {
        builder.insert(peptide);
    }
    let peptides = builder.finalize();
    assert_eq!(peptides.len(), 10_000);

    let build = |threads| {
        let settings = FragmentIndexSettings {
            threads,
            ..FragmentIndexSettings::default()
        };
        FragmentIndex::build(peptides.iter(), &settings).unwrap()
    };
    let single = build(1);
    let parallel = build(8);
    assert_eq!(single.fragment_count(), parallel.fragment_count());
    assert_eq!(single.len(), parallel.len());

    let ids_for = |index: &FragmentIndex, mz| {
        let mut ids: Vec<_> = index.get_for_mass(mz).iter().map(|peptide| peptide.id()).collect();
        ids.sort();
        ids
    };
    for peptide in peptides.iter().step_by(100) {
        let b2 = &peptide.fragment(&[IonSeries::B])[1];
        let mz = b2.mz(1);
        let found = ids_for(&single, mz);
        assert!(found.contains(&peptide.id()));
        assert_eq!(found, ids_for(&parallel, mz));
        assert_eq!(single.count_peptides(mz), parallel.count_peptides(mz));
    }
}

/// Claims to have a spectrum, then comes up empty the first time it's asked for one
struct Racing {
    inner: VecSpectrumSource,
    raced: AtomicBool,
}

impl SpectrumSource for Racing {
    fn has_next(&self) -> bool {
        self.inner.has_next()
    }

    fn next(&self) -> Option<Spectrum> {
        if self.raced.swap(true, Ordering::AcqRel) {
            self.inner.next()
        } else {
            None
        }
    }

    fn count_read(&self) -> u64 {
        self.inner.count_read()
    }

    fn total_count(&self) -> Option<u64> {
        self.inner.total_count()
    }
}

#[test]
fn d_racing_sources_are_retried() {
    let mut config = config(138.068_08);
    config.threads = 1;
    let context = context(&config, &["PEPTIDE", "SAMPLER", "ELVISK"]);

    let sampler = peptide("SAMPLER");
    let mzs = sampler
        .fragment(&[IonSeries::B, IonSeries::Y])
        .iter()
        .map(|fragment| fragment.mz(1))
        .collect::<Vec<_>>();
    let source = Arc::new(Racing {
        inner: VecSpectrumSource::new([spectrum(42, mzs, sampler.mass(), 2)]),
        raced: AtomicBool::new(false),
    });
    let sink = Arc::new(MemorySink::new());

    let coordinator = SearchCoordinator::new(&config, context, Arc::clone(&source) as _, Arc::clone(&sink) as _);
    let summary = coordinator.run().unwrap();

    assert_eq!((summary.processed, summary.errors), (1, 0));
    assert!(source.raced.load(Ordering::Acquire));
    assert_eq!(source.count_read(), 1);
    let results = sink.results();
    assert!(sink.result_count() > 0);
    assert!(results.iter().all(|matched| matched.spectrum().scan() == 42));
    assert_eq!(results[0].alpha().sequence(), "SAMPLER");
}
