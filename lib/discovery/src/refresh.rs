use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use metrics::{Attributes, Counter, DEFAULT_OBJECTIVES, Registry, Summary};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{Discoverer, TargetGroup};

pub const REFRESH_FAILURES_METRIC: &str = "prometheus_sd_refresh_failures_total";
pub const REFRESH_DURATION_METRIC: &str = "prometheus_sd_refresh_duration_seconds";

/// SkipUpdate can be returned from a refresh call to short circuit the
/// update without error. It may be wrapped by other errors, as long as it
/// stays reachable through `source()`.
#[derive(Debug)]
pub struct SkipUpdate {
    reason: String,
}

impl SkipUpdate {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for SkipUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skip discovery update: {}", self.reason)
    }
}

impl std::error::Error for SkipUpdate {}

/// Returns true if `err`, or any error in its source chain, is a `SkipUpdate`.
pub fn is_skip_update(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.is::<SkipUpdate>() {
            return true;
        }

        current = err.source();
    }

    false
}

/// Fetches the latest target groups. Implemented for every
/// `FnMut(CancellationToken) -> impl Future` so plain closures can be
/// scheduled too.
pub trait Refresh: Send {
    fn refresh(
        &mut self,
        shutdown: &CancellationToken,
    ) -> impl Future<Output = crate::Result<Vec<TargetGroup>>> + Send;
}

impl<F, Fut> Refresh for F
where
    F: FnMut(CancellationToken) -> Fut + Send,
    Fut: Future<Output = crate::Result<Vec<TargetGroup>>> + Send,
{
    fn refresh(
        &mut self,
        shutdown: &CancellationToken,
    ) -> impl Future<Output = crate::Result<Vec<TargetGroup>>> + Send {
        self(shutdown.clone())
    }
}

/// Calls a `Refresh` once at startup and then at every interval, and
/// sends every successful result to the output channel.
pub struct RefreshDiscovery<R> {
    mechanism: String,
    interval: Duration,
    refresh: R,

    failures: Counter,
    duration: Summary,
}

impl<R: Refresh> RefreshDiscovery<R> {
    /// `mechanism` keys the failure and duration metrics, instances that
    /// share a name share the series.
    pub fn new(
        registry: &Registry,
        mechanism: impl Into<String>,
        interval: Duration,
        refresh: R,
    ) -> Self {
        let mechanism = mechanism.into();
        let attrs = Attributes::from([("mechanism", Cow::Owned(mechanism.clone()))]);

        let failures = registry
            .register_counter(
                REFRESH_FAILURES_METRIC,
                "Number of refresh failures for the given SD mechanism.",
            )
            .recorder(attrs.clone());
        let duration = registry
            .register_summary(
                REFRESH_DURATION_METRIC,
                "The duration of a refresh in seconds for the given SD mechanism.",
                DEFAULT_OBJECTIVES.iter().map(|(quantile, _)| *quantile),
            )
            .recorder(attrs);

        Self {
            mechanism,
            interval,
            refresh,
            failures,
            duration,
        }
    }

    pub fn mechanism(&self) -> &str {
        &self.mechanism
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn inner(&self) -> &R {
        &self.refresh
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.refresh
    }

    /// Runs until `shutdown` is cancelled or the receiver of `output` is
    /// dropped. A failed refresh emits nothing, so consumers keep the last
    /// groups they received.
    pub async fn run(mut self, shutdown: CancellationToken, output: mpsc::Sender<Vec<TargetGroup>>) {
        // Get an initial set right away.
        if let Ok(groups) = self.refresh_once(&shutdown).await {
            if !emit(&shutdown, &output, groups).await {
                return;
            }
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Ok(groups) = self.refresh_once(&shutdown).await else {
                continue;
            };

            if !emit(&shutdown, &output, groups).await {
                break;
            }
        }

        debug!(message = "refresh discovery stopped", mechanism = %self.mechanism);
    }

    async fn refresh_once(
        &mut self,
        shutdown: &CancellationToken,
    ) -> crate::Result<Vec<TargetGroup>> {
        let start = Instant::now();
        let result = self.refresh.refresh(shutdown).await;
        self.duration.record(start.elapsed().as_secs_f64());

        let err = match result {
            Ok(groups) => return Ok(groups),
            Err(err) => err,
        };

        if is_skip_update(err.as_ref()) {
            debug!(
                message = "Update skipped",
                mechanism = %self.mechanism,
                reason = %err
            );

            return Err(err);
        }

        self.failures.inc(1);

        if !shutdown.is_cancelled() {
            error!(
                message = "Unable to refresh target groups",
                mechanism = %self.mechanism,
                %err
            );
        }

        Err(err)
    }
}

/// Blocks until the consumer accepts `groups` or shutdown fires. Returns
/// false if the loop should stop.
async fn emit(
    shutdown: &CancellationToken,
    output: &mpsc::Sender<Vec<TargetGroup>>,
    groups: Vec<TargetGroup>,
) -> bool {
    tokio::select! {
        biased;

        _ = shutdown.cancelled() => false,
        result = output.send(groups) => match result {
            Ok(()) => true,
            Err(_) => {
                warn!(message = "target group receiver dropped");
                false
            }
        },
    }
}

#[async_trait::async_trait]
impl<R: Refresh + 'static> Discoverer for RefreshDiscovery<R> {
    async fn run(
        self: Box<Self>,
        shutdown: CancellationToken,
        output: mpsc::Sender<Vec<TargetGroup>>,
    ) {
        (*self).run(shutdown, output).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::LabelSet;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("up to date")]
    struct UpToDate(#[source] SkipUpdate);

    fn tg1() -> Vec<TargetGroup> {
        vec![TargetGroup {
            source: "tg".to_string(),
            targets: vec![
                LabelSet::from([("t1".to_string(), "v1".to_string())]),
                LabelSet::from([("t2".to_string(), "v2".to_string())]),
            ],
            labels: LabelSet::from([("l1".to_string(), "lv1".to_string())]),
        }]
    }

    fn tg2() -> Vec<TargetGroup> {
        vec![TargetGroup {
            source: "tg".to_string(),
            ..Default::default()
        }]
    }

    fn failures(registry: &Registry) -> u64 {
        registry
            .register_counter(REFRESH_FAILURES_METRIC, "")
            .recorder(&[("mechanism", "test")])
            .fetch()
    }

    fn refreshes(registry: &Registry) -> u64 {
        registry
            .register_summary(REFRESH_DURATION_METRIC, "", std::iter::empty())
            .recorder(&[("mechanism", "test")])
            .get()
            .count
    }

    async fn recv(rx: &mut mpsc::Receiver<Vec<TargetGroup>>) -> Option<Vec<TargetGroup>> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("receive target groups in time")
    }

    #[test]
    fn skip_update_through_source_chain() {
        let direct: crate::Error = Box::new(SkipUpdate::new("nothing new"));
        assert!(is_skip_update(direct.as_ref()));
        assert_eq!(direct.to_string(), "skip discovery update: nothing new");

        let wrapped: crate::Error = Box::new(UpToDate(SkipUpdate::new("v1")));
        assert!(is_skip_update(wrapped.as_ref()));

        let other: crate::Error = "some error".into();
        assert!(!is_skip_update(other.as_ref()));
    }

    #[tokio::test]
    async fn initial_refresh_does_not_wait_for_interval() {
        let registry = Registry::new();
        let discovery = RefreshDiscovery::new(
            &registry,
            "test",
            Duration::from_secs(3600),
            |_: CancellationToken| async { Ok::<_, crate::Error>(tg1()) },
        );

        let shutdown = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1);
        let handle = tokio::spawn(discovery.run(shutdown.clone(), tx));

        assert_eq!(recv(&mut rx).await, Some(tg1()));
        assert_eq!(refreshes(&registry), 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("stopped while waiting for the next tick")
            .unwrap();
    }

    #[tokio::test]
    async fn refresh() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let discovery = RefreshDiscovery::new(
            &registry,
            "test",
            Duration::from_millis(1),
            move |_: CancellationToken| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    let result: crate::Result<Vec<TargetGroup>> = match call {
                        1 => Ok(tg1()),
                        2 => Ok(tg2()),
                        _ => Err("some error".into()),
                    };
                    result
                }
            },
        );

        let shutdown = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(discovery.run(shutdown.clone(), tx));

        assert_eq!(recv(&mut rx).await, Some(tg1()));
        assert_eq!(recv(&mut rx).await, Some(tg2()));

        // every following refresh fails, nothing else is emitted
        let next = tokio::time::timeout(Duration::from_millis(20), rx.recv()).await;
        assert!(next.is_err(), "unexpected target group");
        assert!(failures(&registry) >= 1);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn failure_increments_counter() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let discovery = RefreshDiscovery::new(
            &registry,
            "test",
            Duration::from_millis(1),
            move |_: CancellationToken| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    let result: crate::Result<Vec<TargetGroup>> = match call {
                        1 => Ok(tg1()),
                        2 => Err("some error".into()),
                        _ => Ok(tg2()),
                    };
                    result
                }
            },
        );

        let shutdown = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(discovery.run(shutdown.clone(), tx));

        assert_eq!(recv(&mut rx).await, Some(tg1()));
        assert_eq!(recv(&mut rx).await, Some(tg2()));
        assert_eq!(failures(&registry), 1);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn skip_update_is_not_a_failure() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let discovery = RefreshDiscovery::new(
            &registry,
            "test",
            Duration::from_millis(1),
            move |_: CancellationToken| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    let result: crate::Result<Vec<TargetGroup>> = match call {
                        1 => Ok(tg1()),
                        2 => Err(Box::new(UpToDate(SkipUpdate::new("version 1")))),
                        _ => Ok(tg2()),
                    };
                    result
                }
            },
        );

        let shutdown = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(discovery.run(shutdown.clone(), tx));

        assert_eq!(recv(&mut rx).await, Some(tg1()));
        // the skipped refresh emits nothing, so the next batch is tg2
        assert_eq!(recv(&mut rx).await, Some(tg2()));
        assert_eq!(failures(&registry), 0);
        assert!(refreshes(&registry) >= 3);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn cancel_while_emitting() {
        let registry = Registry::new();
        let discovery = RefreshDiscovery::new(
            &registry,
            "test",
            Duration::from_millis(1),
            |_: CancellationToken| async { Ok::<_, crate::Error>(tg2()) },
        );

        let shutdown = CancellationToken::new();
        // nobody reads, so once the buffer is full the scheduler is stuck
        // in emit until shutdown fires
        let (tx, _rx) = mpsc::channel(1);
        let handle = tokio::spawn(discovery.run(shutdown.clone(), tx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("stopped while blocked on emit")
            .unwrap();
        assert_eq!(failures(&registry), 0);
    }

    #[tokio::test]
    async fn stops_when_receiver_dropped() {
        let registry = Registry::new();
        let discovery = RefreshDiscovery::new(
            &registry,
            "test",
            Duration::from_millis(1),
            |_: CancellationToken| async { Ok::<_, crate::Error>(tg1()) },
        );

        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        tokio::time::timeout(
            Duration::from_secs(1),
            discovery.run(CancellationToken::new(), tx),
        )
        .await
        .expect("stopped after the receiver was dropped");
    }

    #[tokio::test]
    async fn cancelled_refresh_is_counted_but_quiet() {
        let registry = Registry::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let mut discovery = RefreshDiscovery::new(
            &registry,
            "test",
            Duration::from_secs(1),
            |shutdown: CancellationToken| async move {
                shutdown.cancelled().await;
                Err::<Vec<TargetGroup>, crate::Error>("cancelled".into())
            },
        );

        assert!(discovery.refresh_once(&shutdown).await.is_err());
        assert_eq!(failures(&registry), 1);
        assert_eq!(refreshes(&registry), 1);
    }
}
