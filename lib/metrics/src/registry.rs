use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::attributes::{Attributes, assert_legal_key};
use crate::counter::Counter;
use crate::metric::{Metric, MetricObserver, Observation};
use crate::summary::Summary;

static GLOBAL_REGISTRY: OnceLock<Registry> = OnceLock::new();

/// A set of named metrics. Clones share the same metrics, so a registry can
/// be handed to every component that needs to record something.
#[derive(Clone, Default)]
pub struct Registry {
    counters: Arc<Mutex<BTreeMap<&'static str, Metric<Counter>>>>,
    summaries: Arc<Mutex<BTreeMap<&'static str, Metric<Summary>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registering the same name twice returns the already registered metric.
    pub fn register_counter(
        &self,
        name: &'static str,
        description: &'static str,
    ) -> Metric<Counter> {
        assert_legal_key(name);

        self.counters
            .lock()
            .entry(name)
            .or_insert_with(|| Metric {
                name,
                description,
                series: Arc::new(Mutex::new(BTreeMap::new())),
                options: (),
            })
            .clone()
    }

    pub fn register_summary(
        &self,
        name: &'static str,
        description: &'static str,
        objectives: impl Iterator<Item = f64>,
    ) -> Metric<Summary> {
        assert_legal_key(name);

        let options = objectives.collect::<Vec<f64>>();

        self.summaries
            .lock()
            .entry(name)
            .or_insert_with(|| Metric {
                name,
                description,
                series: Arc::new(Mutex::new(BTreeMap::new())),
                options,
            })
            .clone()
    }

    pub fn report(&self, reporter: &mut impl Reporter) {
        report_generic(reporter, &self.counters);
        report_generic(reporter, &self.summaries);
    }
}

fn report_generic<M: MetricObserver>(
    reporter: &mut impl Reporter,
    metrics: &Mutex<BTreeMap<&'static str, Metric<M>>>,
) {
    metrics.lock().values().for_each(|metric| {
        reporter.start_metric(metric.name, metric.description);
        metric
            .series
            .lock()
            .iter()
            .for_each(|(attrs, observer)| reporter.report(attrs, observer.observe()));
        reporter.finish_metric()
    })
}

pub trait Reporter {
    fn start_metric(&mut self, name: &'static str, description: &'static str);

    fn report(&mut self, attrs: &Attributes, observation: Observation);

    /// Finish recording a given metric
    fn finish_metric(&mut self);
}

/// The process-wide registry, for callers that have no registry of their own.
pub fn global_registry() -> Registry {
    GLOBAL_REGISTRY.get_or_init(Registry::new).clone()
}

pub fn register_counter(name: &'static str, description: &'static str) -> Metric<Counter> {
    GLOBAL_REGISTRY
        .get_or_init(Registry::new)
        .register_counter(name, description)
}

pub fn register_summary(
    name: &'static str,
    description: &'static str,
    objectives: impl Iterator<Item = f64>,
) -> Metric<Summary> {
    GLOBAL_REGISTRY
        .get_or_init(Registry::new)
        .register_summary(name, description, objectives)
}
