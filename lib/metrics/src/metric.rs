use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::attributes::Attributes;
use crate::summary::SummaryObservation;

/// The current value of one metric series
#[derive(Debug, Clone)]
pub enum Observation {
    Counter(u64),
    Summary(SummaryObservation),
}

/// Types that wish to be used with `Metric` must implement this trait
///
/// `Metric` maintains a distinct `MetricObserver` for each unique set of `Attributes`
pub trait MetricObserver: MakeMetricObserver + std::fmt::Debug + Send + 'static {
    /// The type that is used to modify the value reported by this MetricObserver
    type Recorder;

    /// Return a `Self::Recorder` that can be used to mutate the value reported
    /// by this `MetricObserver`
    fn recorder(&self) -> Self::Recorder;

    /// Return the current value for this
    fn observe(&self) -> Observation;
}

/// Defines how to construct new instances of a `MetricObserver` from the
/// options the metric was registered with.
pub trait MakeMetricObserver {
    type Options: Sized + Send + Sync + std::fmt::Debug;

    fn create(options: &Self::Options) -> Self;
}

/// A named family of series, one per attribute set. Clones share the
/// same series.
#[derive(Clone)]
pub struct Metric<T: MetricObserver> {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) series: Arc<Mutex<BTreeMap<Attributes, T>>>,

    pub(crate) options: T::Options,
}

impl<T: MetricObserver> Metric<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn recorder(&self, attributes: impl Into<Attributes>) -> T::Recorder {
        self.observer(attributes).recorder()
    }

    pub fn observer(&self, attributes: impl Into<Attributes>) -> MappedMutexGuard<'_, T> {
        MutexGuard::map(self.series.lock(), |values| {
            values
                .entry(attributes.into())
                .or_insert_with(|| T::create(&self.options))
        })
    }
}
