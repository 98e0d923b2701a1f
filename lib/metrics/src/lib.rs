#![forbid(unsafe_code)]
#![deny(unused)]
#![deny(dead_code)]

mod attributes;
mod counter;
mod metric;
mod registry;
mod summary;

pub use attributes::Attributes;
pub use counter::Counter;
pub use metric::{Metric, Observation};
pub use registry::{Registry, Reporter, global_registry, register_counter, register_summary};
pub use summary::{DEFAULT_OBJECTIVES, Quantile, Summary, SummaryObservation};
