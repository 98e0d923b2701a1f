use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::metric::{MakeMetricObserver, MetricObserver, Observation};

/// A monotonic counter, safe to increment from any number of tasks.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    state: Arc<AtomicU64>,
}

impl Counter {
    #[inline]
    pub fn inc(&self, i: u64) {
        self.state.fetch_add(i, Ordering::Relaxed);
    }

    #[inline]
    pub fn fetch(&self) -> u64 {
        self.state.load(Ordering::Relaxed)
    }
}

impl MetricObserver for Counter {
    type Recorder = Self;

    fn recorder(&self) -> Self::Recorder {
        self.clone()
    }

    fn observe(&self) -> Observation {
        Observation::Counter(self.fetch())
    }
}

impl MakeMetricObserver for Counter {
    type Options = ();

    fn create(_: &Self::Options) -> Self {
        Counter::default()
    }
}
