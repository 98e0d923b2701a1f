#[macro_use]
extern crate tracing;

pub mod http;
pub mod labels;
pub mod refresh;
pub mod xds;

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Dynamically dispatched error, safe to send across threads
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

/// A set of labels, keyed by label name.
pub type LabelSet = BTreeMap<String, String>;

/// TargetGroup is a set of targets with a common labels
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TargetGroup {
    /// `targets` is a list of targets identified by a label set. Each target
    /// is uniquely identifiable in the group by its `__address__` label.
    /// Consumers merge the group `labels` under each target's own labels.
    pub targets: Vec<LabelSet>,

    /// `labels` is a set of labels that is common across all targets in the group
    pub labels: LabelSet,

    /// An identifier that describes a group of targets, stable across refreshes
    pub source: String,
}

/// Discoverer provides information about target groups. It maintains a set of
/// sources from which TargetGroup can originate.
///
/// `Discoverer` does not know if an actual change happened. It does guarantee
/// that it sends the new TargetGroup whenever a change happens.
///
/// `run` returns once `shutdown` is cancelled or the receiver of `output` is
/// dropped.
#[async_trait::async_trait]
pub trait Discoverer: Send {
    async fn run(
        self: Box<Self>,
        shutdown: CancellationToken,
        output: mpsc::Sender<Vec<TargetGroup>>,
    );
}
