//! The set of tracked containers and the periodic flush cycle driving them.
//!
//! Every cycle snapshots the tracked samples, refreshes each one in its own task,
//! joins all tasks and hands the collected points to the [`Sink`] as one batch.
//! Cycles never overlap: [`Registry::report`] awaits each [`Registry::send`] before
//! waiting for the next tick.
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;

use crate::cgroup::CounterReader;
use crate::container::{Classification, ContainerID};
use crate::probe::RuntimeProbe;
use crate::runtime::ContainerRuntime;
use crate::sample::{self, ContainerSample};
use crate::sink::{Batch, Point, Sink};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to prime container `{container_id}`: {source}")]
    Priming {
        container_id: ContainerID,
        #[source]
        source: sample::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct Config {
    /// Time between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Upper bound for refreshing a single sample.
    pub sample_timeout: Duration,
    /// Value of the `host` column.
    pub hostname: String,
}

enum Tick {
    Interval,
    Stop,
}

pub struct Registry<C, R, S> {
    samples: DashMap<ContainerID, Arc<Mutex<ContainerSample>>>,
    reader: Arc<C>,
    probe: Arc<RuntimeProbe<R>>,
    sink: Arc<S>,
    config: Config,
    stop: watch::Sender<bool>,
}

impl<C, R, S> Registry<C, R, S>
where
    C: CounterReader,
    R: ContainerRuntime,
    S: Sink,
{
    pub fn new(reader: Arc<C>, probe: RuntimeProbe<R>, sink: Arc<S>, config: Config) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            samples: DashMap::new(),
            reader,
            probe: Arc::new(probe),
            sink,
            config,
            stop,
        }
    }

    /// Starts tracking a container.
    ///
    /// Does nothing if `container_id` is already tracked. Otherwise the new sample is
    /// primed first and only inserted if priming succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Priming`] if the container's counters or network probe could
    /// not be set up. The container is not tracked in that case.
    pub async fn add(
        &self,
        name: &str,
        container_id: ContainerID,
        classification: Classification,
    ) -> Result<()> {
        if self.samples.contains_key(&container_id) {
            log::debug!("container `{container_id}` is already tracked");
            return Ok(());
        }

        let mut sample = ContainerSample::new(container_id.clone(), name, classification);
        sample
            .prime(&self.reader, self.probe.as_ref())
            .await
            .map_err(|source| Error::Priming {
                container_id: container_id.clone(),
                source,
            })?;

        match self.samples.entry(container_id.clone()) {
            // A concurrent add won. Its sample and baseline stay; the armed exec
            // session of this one is never started and is left to the daemon.
            Entry::Occupied(_) => {
                log::debug!("container `{container_id}` was added concurrently, discarding");
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(sample)));
                log::info!("tracking container `{name}` ({container_id})");
            }
        }
        Ok(())
    }

    /// Stops tracking a container. Unknown containers are ignored.
    pub fn remove(&self, container_id: &ContainerID) {
        if self.samples.remove(container_id).is_some() {
            log::info!("stopped tracking container `{container_id}`");
        }
    }

    pub fn contains(&self, container_id: &ContainerID) -> bool {
        self.samples.contains_key(container_id)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Runs one flush cycle.
    ///
    /// Samples that fail to refresh, or do not refresh within the sample timeout, are
    /// skipped for this cycle and keep their baseline. The timeout covers both the
    /// cgroup read and the network probe. A failed write is logged and the batch
    /// dropped.
    pub async fn send(&self) {
        let samples: Vec<_> = self
            .samples
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        if samples.is_empty() {
            log::trace!("no containers tracked, skipping cycle");
            return;
        }

        let started = Instant::now();
        let mut tasks = JoinSet::new();
        for sample in samples {
            let reader = Arc::clone(&self.reader);
            let probe = Arc::clone(&self.probe);
            let hostname = self.config.hostname.clone();
            let timeout = self.config.sample_timeout;
            tasks.spawn(async move {
                let mut sample = sample.lock().await;
                sample_once(&mut sample, &reader, probe.as_ref(), &hostname, timeout).await
            });
        }

        let mut batch = Batch::default();
        let mut sampled = 0usize;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Some(points)) => {
                    sampled += 1;
                    batch.extend(points);
                }
                Ok(None) => {}
                Err(err) => log::error!("sampling task panicked: {err}"),
            }
        }
        log::debug!(
            "sampled {sampled} containers in {} microseconds",
            started.elapsed().as_micros()
        );

        if batch.is_empty() {
            return;
        }
        if let Err(err) = self.sink.write(&batch).await {
            log::error!("failed to write {} points, dropping batch: {err}", batch.len());
        }
    }

    /// Runs a flush cycle every interval until [`Registry::stop`] is called.
    pub async fn report(&self) {
        let mut stop = self.stop.subscribe();
        log::info!(
            "reporting {} containers every {:?}",
            self.len(),
            self.config.interval
        );

        loop {
            if *stop.borrow_and_update() {
                break;
            }
            let tick = tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => Tick::Interval,
                _ = stop.changed() => Tick::Stop,
            };
            match tick {
                Tick::Interval => self.send().await,
                Tick::Stop => break,
            }
        }

        log::info!("stopped reporting");
    }

    /// Ends [`Registry::report`] after the cycle in progress, if any.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

/// Refreshes one sample and returns its points, or `None` if it is skipped this cycle.
async fn sample_once<C, R>(
    sample: &mut ContainerSample,
    reader: &Arc<C>,
    probe: &RuntimeProbe<R>,
    hostname: &str,
    timeout: Duration,
) -> Option<Vec<Point>>
where
    C: CounterReader,
    R: ContainerRuntime,
{
    match tokio::time::timeout(timeout, sample.refresh(reader, probe)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            log::warn!("skipping container `{}` this cycle: {err}", sample.id());
            return None;
        }
        Err(_) => {
            log::warn!(
                "skipping container `{}` this cycle: no counters within {timeout:?}",
                sample.id()
            );
            return None;
        }
    }

    sample.compute_rate(Instant::now());
    let points = sample.points(hostname);
    sample.save_baseline();
    Some(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::CounterSnapshot;
    use crate::cgroup::testing::FakeReader;
    use crate::probe::Backoff;
    use crate::runtime::testing::FakeRuntime;
    use crate::sink::Value;
    use crate::sink::testing::RecordingSink;

    const NETDEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
  eth0: 1000 10 0 0 0 0 0 0 2000 20 0 0 0 0 0 0
";

    struct Fixture {
        reader: Arc<FakeReader>,
        runtime: Arc<FakeRuntime>,
        sink: Arc<RecordingSink>,
        registry: Arc<Registry<FakeReader, FakeRuntime, RecordingSink>>,
    }

    fn fixture(interval: Duration) -> Fixture {
        fixture_with_timeout(interval, Duration::from_secs(5))
    }

    fn fixture_with_timeout(interval: Duration, sample_timeout: Duration) -> Fixture {
        let reader = Arc::new(FakeReader::default());
        let runtime = Arc::new(FakeRuntime::default());
        let sink = Arc::new(RecordingSink::default());
        let backoff = Backoff {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_attempts: 2,
        };
        let registry = Arc::new(Registry::new(
            Arc::clone(&reader),
            RuntimeProbe::new(Arc::clone(&runtime), backoff),
            Arc::clone(&sink),
            Config {
                interval,
                sample_timeout,
                hostname: "node-1".to_owned(),
            },
        ));
        Fixture {
            reader,
            runtime,
            sink,
            registry,
        }
    }

    fn id(id: &str) -> ContainerID {
        ContainerID::new(id).unwrap()
    }

    fn snapshot(cpu_total: u64, mem_usage: u64) -> CounterSnapshot {
        CounterSnapshot {
            cpu_total,
            mem_usage,
            ..Default::default()
        }
    }

    fn other() -> Classification {
        Classification::Other("db".to_owned())
    }

    #[tokio::test]
    async fn test_add_twice_is_noop() {
        let f = fixture(Duration::from_secs(10));
        f.reader.set(&id("c1"), snapshot(100, 50));
        f.registry.add("web", id("c1"), other()).await.unwrap();

        f.reader.set(&id("c1"), snapshot(900, 90));
        f.registry.add("web", id("c1"), other()).await.unwrap();

        assert_eq!(f.registry.len(), 1);
        assert_eq!(f.reader.reads(), 1);
        let sample = f.registry.samples.get(&id("c1")).unwrap().value().clone();
        assert_eq!(sample.lock().await.baseline().unwrap().kernel.cpu_total, 100);
    }

    #[tokio::test]
    async fn test_concurrent_add_same_id() {
        let f = fixture(Duration::from_secs(10));
        f.reader.set(&id("c1"), snapshot(100, 50));
        f.runtime.set_netdev("c1", NETDEV);

        let (first, second) = tokio::join!(
            f.registry
                .add("web", id("c1"), Classification::Application),
            f.registry
                .add("web", id("c1"), Classification::Application),
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(f.registry.len(), 1);

        f.registry.send().await;
        assert_eq!(f.sink.batches()[0].points("cpu_usage").len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let f = fixture(Duration::from_secs(10));
        f.registry.remove(&id("ghost"));
        assert!(f.registry.is_empty());

        f.reader.set(&id("c1"), snapshot(1, 1));
        f.registry.add("web", id("c1"), other()).await.unwrap();
        f.registry.remove(&id("c1"));
        f.registry.remove(&id("c1"));
        assert!(!f.registry.contains(&id("c1")));
    }

    #[tokio::test]
    async fn test_priming_failure_not_tracked() {
        let f = fixture(Duration::from_secs(10));
        assert!(matches!(
            f.registry.add("web", id("c1"), other()).await,
            Err(Error::Priming { .. })
        ));

        // application container without a reachable network namespace
        f.reader.set(&id("c2"), snapshot(1, 1));
        assert!(matches!(
            f.registry
                .add("api", id("c2"), Classification::Application)
                .await,
            Err(Error::Priming { .. })
        ));
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_send_empty_registry() {
        let f = fixture(Duration::from_secs(10));
        f.registry.send().await;
        assert_eq!(f.sink.writes(), 0);
    }

    #[tokio::test]
    async fn test_send_application_scenario() {
        let f = fixture(Duration::from_secs(10));
        f.reader.set(&id("c1"), snapshot(100, 50));
        f.runtime.set_netdev("c1", NETDEV);
        f.registry
            .add("web", id("c1"), Classification::Application)
            .await
            .unwrap();

        f.reader.set(&id("c1"), snapshot(150, 60));
        f.registry.send().await;

        let batches = f.sink.batches();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.points("cpu_usage")[0].value, Value::Counter(150));
        assert_eq!(batch.points("mem_usage")[0].value, Value::Counter(60));
        match batch.points("cpu_usage_rate")[0].value {
            Value::Rate(rate) => assert!(rate > 0.0 && rate <= 50.0),
            value => panic!("Expected a rate, got {value:?}"),
        }
        assert!(batch.points("mem_usage_rate").is_empty());
        assert_eq!(batch.points("eth0.rx_bytes")[0].value, Value::Counter(1000));
        assert_eq!(batch.points("eth0.rx_bytes.rate")[0].value, Value::Rate(0.0));
        let point = &batch.points("cpu_usage")[0];
        assert_eq!(point.host, "node-1");
        assert_eq!(point.app_type, "application");
        assert_eq!(point.app_id, id("c1"));
    }

    #[tokio::test]
    async fn test_send_non_application_has_no_network_series() {
        let f = fixture(Duration::from_secs(10));
        f.reader.set(&id("c1"), snapshot(100, 50));
        f.runtime.set_netdev("c1", NETDEV);
        f.registry.add("db", id("c1"), other()).await.unwrap();

        f.registry.send().await;

        let batch = &f.sink.batches()[0];
        assert!(batch.series().iter().all(|s| !s.name.starts_with("eth0")));
        assert_eq!(f.runtime.created_execs(), 0);
    }

    #[tokio::test]
    async fn test_failing_sample_does_not_abort_cycle() {
        let f = fixture(Duration::from_secs(10));
        f.reader.set(&id("c1"), snapshot(100, 50));
        f.reader.set(&id("c2"), snapshot(200, 70));
        f.registry.add("a", id("c1"), other()).await.unwrap();
        f.registry.add("b", id("c2"), other()).await.unwrap();

        f.reader.fail(&id("c1"));
        f.registry.send().await;

        let batch = &f.sink.batches()[0];
        let usage = batch.points("cpu_usage");
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].app_id, id("c2"));

        // c1 keeps its baseline and is sampled again once readable
        f.reader.set(&id("c1"), snapshot(300, 50));
        f.registry.send().await;
        assert_eq!(f.sink.batches()[1].points("cpu_usage").len(), 2);
    }

    async fn baseline_cpu(f: &Fixture, container_id: &ContainerID) -> u64 {
        let sample = f.registry.samples.get(container_id).unwrap().value().clone();
        let sample = sample.lock().await;
        sample.baseline().unwrap().kernel.cpu_total
    }

    #[tokio::test]
    async fn test_stalled_network_read_is_skipped() {
        let f = fixture_with_timeout(Duration::from_secs(10), Duration::from_millis(50));
        f.reader.set(&id("c1"), snapshot(100, 50));
        f.reader.set(&id("c2"), snapshot(100, 50));
        f.runtime.set_netdev("c1", NETDEV);
        f.registry
            .add("web", id("c1"), Classification::Application)
            .await
            .unwrap();
        f.registry.add("db", id("c2"), other()).await.unwrap();

        f.reader.set(&id("c1"), snapshot(200, 60));
        f.reader.set(&id("c2"), snapshot(300, 70));
        f.runtime.set_start_delay("c1", Duration::from_secs(2));
        let started = Instant::now();
        f.registry.send().await;
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(f.sink.writes(), 1);
        let usage = f.sink.batches()[0].points("cpu_usage").to_vec();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].app_id, id("c2"));
        assert_eq!(baseline_cpu(&f, &id("c1")).await, 100);
        assert_eq!(baseline_cpu(&f, &id("c2")).await, 300);
    }

    #[tokio::test]
    async fn test_stalled_counter_read_is_skipped() {
        let f = fixture_with_timeout(Duration::from_secs(10), Duration::from_millis(50));
        f.reader.set(&id("c1"), snapshot(100, 50));
        f.reader.set(&id("c2"), snapshot(100, 50));
        f.registry.add("a", id("c1"), other()).await.unwrap();
        f.registry.add("b", id("c2"), other()).await.unwrap();

        f.reader.set(&id("c1"), snapshot(200, 60));
        f.reader.set(&id("c2"), snapshot(300, 70));
        f.reader.set_delay(&id("c1"), Duration::from_millis(500));
        f.registry.send().await;

        let usage = f.sink.batches()[0].points("cpu_usage").to_vec();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].app_id, id("c2"));
        assert_eq!(baseline_cpu(&f, &id("c1")).await, 100);
    }

    #[tokio::test]
    async fn test_sink_failure_is_not_fatal() {
        let f = fixture(Duration::from_secs(10));
        f.reader.set(&id("c1"), snapshot(100, 50));
        f.registry.add("a", id("c1"), other()).await.unwrap();

        f.sink.set_fail(true);
        f.registry.send().await;
        f.sink.set_fail(false);
        f.registry.send().await;

        assert_eq!(f.sink.writes(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_adds_then_send() {
        const N: u64 = 16;
        let f = fixture(Duration::from_secs(10));

        let mut adds = JoinSet::new();
        for i in 0..N {
            let container_id = id(&format!("c{i}"));
            f.reader.set(&container_id, snapshot(i * 100, i));
            let registry = Arc::clone(&f.registry);
            adds.spawn(async move { registry.add("app", container_id, other()).await });
        }
        while let Some(result) = adds.join_next().await {
            result.unwrap().unwrap();
        }
        assert_eq!(f.registry.len(), N as usize);

        f.registry.send().await;

        assert_eq!(f.sink.writes(), 1);
        let batch = &f.sink.batches()[0];
        let usage = batch.points("cpu_usage");
        assert_eq!(usage.len(), N as usize);
        for point in usage {
            let i: u64 = point.app_id.as_str()[1..].parse().unwrap();
            assert_eq!(point.value, Value::Counter(i * 100));
            let mem = batch
                .points("mem_usage")
                .iter()
                .find(|p| p.app_id == point.app_id)
                .unwrap();
            assert_eq!(mem.value, Value::Counter(i));
        }
    }

    #[tokio::test]
    async fn test_stop_during_send_completes_cycle() {
        let f = fixture(Duration::from_millis(1));
        f.reader.set(&id("c1"), snapshot(100, 50));
        f.registry.add("a", id("c1"), other()).await.unwrap();
        f.sink.set_delay(Duration::from_millis(200));

        let registry = Arc::clone(&f.registry);
        let report = tokio::spawn(async move { registry.report().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        f.registry.stop();
        report.await.unwrap();

        assert_eq!(f.sink.writes(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_report() {
        let f = fixture(Duration::from_millis(1));
        f.reader.set(&id("c1"), snapshot(100, 50));
        f.registry.add("a", id("c1"), other()).await.unwrap();

        f.registry.stop();
        f.registry.report().await;
        assert_eq!(f.sink.writes(), 0);
    }

    #[tokio::test]
    async fn test_report_runs_cycles() {
        let f = fixture(Duration::from_millis(5));
        f.reader.set(&id("c1"), snapshot(100, 50));
        f.registry.add("a", id("c1"), other()).await.unwrap();

        let registry = Arc::clone(&f.registry);
        let report = tokio::spawn(async move { registry.report().await });
        while f.sink.writes() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        f.registry.stop();
        report.await.unwrap();
        assert!(f.sink.writes() >= 2);
    }
}
