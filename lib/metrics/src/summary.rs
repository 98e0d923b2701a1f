use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::metric::{MakeMetricObserver, MetricObserver, Observation};

/// Default objectives, as `(quantile, allowed error)` pairs.
pub const DEFAULT_OBJECTIVES: [(f64, f64); 3] = [(0.5, 0.05), (0.9, 0.01), (0.99, 0.001)];

/// How many of the most recent observations quantiles are computed from.
const DEFAULT_WINDOW: usize = 512;

#[derive(Clone, Debug, PartialEq)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Clone, Debug)]
pub struct SummaryObservation {
    pub quantiles: Vec<Quantile>,
    pub count: u64,
    pub sum: f64,
}

#[derive(Debug)]
struct State {
    samples: VecDeque<f64>,
    count: u64,
    sum: f64,
}

/// A `Summary` tracks the total count and sum of observations, and the
/// configured quantiles over a sliding window of the latest samples.
#[derive(Clone, Debug)]
pub struct Summary {
    objectives: Arc<Vec<f64>>,
    window: usize,
    state: Arc<Mutex<State>>,
}

impl Summary {
    pub fn new(objectives: impl IntoIterator<Item = f64>, window: usize) -> Self {
        let mut objectives = objectives
            .into_iter()
            .filter(|q| (0.0..=1.0).contains(q))
            .collect::<Vec<_>>();
        objectives.sort_by(f64::total_cmp);
        objectives.dedup();

        let window = window.max(1);

        Self {
            objectives: Arc::new(objectives),
            window,
            state: Arc::new(Mutex::new(State {
                samples: VecDeque::with_capacity(window),
                count: 0,
                sum: 0.0,
            })),
        }
    }

    pub fn record(&self, value: f64) {
        let mut state = self.state.lock();

        if state.samples.len() == self.window {
            state.samples.pop_front();
        }
        state.samples.push_back(value);
        state.count = state.count.wrapping_add(1);
        state.sum += value;
    }

    pub fn get(&self) -> SummaryObservation {
        let state = self.state.lock();

        let mut sorted = state.samples.iter().copied().collect::<Vec<_>>();
        sorted.sort_by(f64::total_cmp);

        let quantiles = self
            .objectives
            .iter()
            .map(|&quantile| {
                let value = if sorted.is_empty() {
                    f64::NAN
                } else {
                    let rank = (quantile * (sorted.len() - 1) as f64).round() as usize;
                    sorted[rank.min(sorted.len() - 1)]
                };

                Quantile { quantile, value }
            })
            .collect();

        SummaryObservation {
            quantiles,
            count: state.count,
            sum: state.sum,
        }
    }
}

impl MetricObserver for Summary {
    type Recorder = Self;

    fn recorder(&self) -> Self::Recorder {
        self.clone()
    }

    fn observe(&self) -> Observation {
        Observation::Summary(self.get())
    }
}

impl MakeMetricObserver for Summary {
    type Options = Vec<f64>;

    fn create(options: &Self::Options) -> Self {
        if options.is_empty() {
            return Summary::new(DEFAULT_OBJECTIVES.iter().map(|(q, _)| *q), DEFAULT_WINDOW);
        }

        Summary::new(options.iter().copied(), DEFAULT_WINDOW)
    }
}
