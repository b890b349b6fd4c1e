//! Per-container counter state and rate derivation.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::cgroup::{self, CounterReader, CounterSnapshot};
use crate::container::{Classification, ContainerID};
use crate::probe::{self, NetworkCounters, ProbeHandle, RuntimeProbe};
use crate::runtime::ContainerRuntime;
use crate::sink::{Point, Value};

const NANOS_PER_SEC: f64 = 1e9;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read counters: {0}")]
    Counters(#[from] cgroup::Error),
    #[error("failed to read network counters: {0}")]
    Network(#[from] probe::Error),
    #[error("counter read task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// All counters of one sample, as read in one refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Counters {
    pub kernel: CounterSnapshot,
    /// Empty unless the container is an application.
    pub network: NetworkCounters,
}

/// Rates derived during the current cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rates {
    /// CPU nanoseconds per elapsed nanosecond.
    pub cpu_user: f64,
    pub cpu_system: f64,
    pub cpu_total: f64,
    /// Per-second rates keyed `<iface>.<counter>.rate`.
    pub network: BTreeMap<String, f64>,
}

/// `(current - baseline) / elapsed`, or zero if the counter went backwards or no time passed.
fn rate(current: u64, baseline: u64, elapsed: f64) -> f64 {
    if current < baseline || elapsed <= 0.0 {
        return 0.0;
    }
    (current - baseline) as f64 / elapsed
}

#[derive(Debug)]
pub struct ContainerSample {
    id: ContainerID,
    name: String,
    classification: Classification,
    current: Counters,
    baseline: Option<Counters>,
    sampled_at: Instant,
    rates: Option<Rates>,
    probe: Option<ProbeHandle>,
}

impl ContainerSample {
    pub fn new(id: ContainerID, name: impl Into<String>, classification: Classification) -> Self {
        Self {
            id,
            name: name.into(),
            classification,
            current: Counters::default(),
            baseline: None,
            sampled_at: Instant::now(),
            rates: None,
            probe: None,
        }
    }

    pub fn id(&self) -> &ContainerID {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    pub fn current(&self) -> &Counters {
        &self.current
    }

    pub fn baseline(&self) -> Option<&Counters> {
        self.baseline.as_ref()
    }

    pub fn rates(&self) -> Option<&Rates> {
        self.rates.as_ref()
    }

    /// Makes the sample ready for its first cycle: attaches the network probe of an
    /// application container, reads the counters once and stores them as baseline.
    ///
    /// # Errors
    ///
    /// Fails if the container never becomes ready, the probe cannot be attached, or
    /// the first read fails.
    pub async fn prime<C, R>(&mut self, reader: &Arc<C>, probe: &RuntimeProbe<R>) -> Result<()>
    where
        C: CounterReader,
        R: ContainerRuntime,
    {
        if self.classification.is_application() && self.probe.is_none() {
            probe.wait_ready(&self.id).await?;
            self.probe = Some(probe.attach(&self.id).await?);
        }
        self.refresh(reader, probe).await?;
        self.sampled_at = Instant::now();
        self.save_baseline();
        Ok(())
    }

    /// Reads fresh counters. On failure no stored counter changes.
    ///
    /// The kernel counters are read on the blocking pool, so dropping the returned
    /// future (e.g. on timeout) releases the caller even while a read is stuck.
    pub async fn refresh<C, R>(&mut self, reader: &Arc<C>, probe: &RuntimeProbe<R>) -> Result<()>
    where
        C: CounterReader,
        R: ContainerRuntime,
    {
        self.rates = None;
        let kernel = {
            let reader = Arc::clone(reader);
            let container_id = self.id.clone();
            tokio::task::spawn_blocking(move || reader.read_counters(&container_id)).await??
        };
        let network = match self.probe.as_mut() {
            Some(handle) => probe.read_counters(handle).await?,
            None => NetworkCounters::new(),
        };
        self.current = Counters { kernel, network };
        Ok(())
    }

    /// Derives rates from the current counters against the baseline over the time
    /// elapsed since the last sample, then moves the sample time to `now`.
    ///
    /// A sample without baseline gets no rates.
    pub fn compute_rate(&mut self, now: Instant) {
        let Some(baseline) = self.baseline.as_ref() else {
            self.rates = None;
            return;
        };
        let elapsed = now.saturating_duration_since(self.sampled_at);
        let elapsed_ns = elapsed.as_nanos() as f64;
        let elapsed_s = elapsed_ns / NANOS_PER_SEC;

        let current = &self.current.kernel;
        let previous = &baseline.kernel;
        let network = self
            .current
            .network
            .iter()
            .filter_map(|(metric, &value)| {
                let before = *baseline.network.get(metric)?;
                Some((format!("{metric}.rate"), rate(value, before, elapsed_s)))
            })
            .collect();

        self.rates = Some(Rates {
            cpu_user: rate(current.cpu_user, previous.cpu_user, elapsed_ns),
            cpu_system: rate(current.cpu_system, previous.cpu_system, elapsed_ns),
            cpu_total: rate(current.cpu_total, previous.cpu_total, elapsed_ns),
            network,
        });
        self.sampled_at = now;
    }

    pub fn save_baseline(&mut self) {
        self.baseline = Some(self.current.clone());
    }

    /// The rows this sample contributes to the cycle's batch.
    pub fn points(&self, host: &str) -> Vec<Point> {
        let kernel = &self.current.kernel;
        let mut values = vec![
            ("cpu_usage".to_owned(), Value::Counter(kernel.cpu_total)),
            ("cpu_system".to_owned(), Value::Counter(kernel.cpu_system)),
            ("cpu_user".to_owned(), Value::Counter(kernel.cpu_user)),
            ("mem_usage".to_owned(), Value::Counter(kernel.mem_usage)),
            ("mem_rss".to_owned(), Value::Counter(kernel.mem_rss)),
            ("mem_max_usage".to_owned(), Value::Counter(kernel.mem_max_usage)),
        ];
        if let Some(rates) = &self.rates {
            values.push(("cpu_usage_rate".to_owned(), Value::Rate(rates.cpu_total)));
            values.push(("cpu_system_rate".to_owned(), Value::Rate(rates.cpu_system)));
            values.push(("cpu_user_rate".to_owned(), Value::Rate(rates.cpu_user)));
        }
        if self.classification.is_application() {
            values.extend(
                self.current
                    .network
                    .iter()
                    .map(|(metric, &value)| (metric.clone(), Value::Counter(value))),
            );
            if let Some(rates) = &self.rates {
                values.extend(
                    rates
                        .network
                        .iter()
                        .map(|(metric, &value)| (metric.clone(), Value::Rate(value))),
                );
            }
        }

        values
            .into_iter()
            .map(|(metric, value)| Point {
                host: host.to_owned(),
                app_type: self.classification.to_string(),
                app_id: self.id.clone(),
                metric,
                value,
            })
            .collect()
    }
}
