//! Container Metrics: a resident agent that samples per-container CPU, memory and
//! network usage and reports counters and rates to InfluxDB.
//!
//! CPU and memory counters are read from the cgroup v2 hierarchy; network counters
//! of application containers are read from inside their network namespace through
//! the Docker Engine API.
use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};

pub mod cgroup;
pub mod config;
pub mod container;
pub mod discovery;
pub mod error;
pub mod probe;
pub mod registry;
pub mod runtime;
pub mod sample;
pub mod sink;

use error::{Error, Result};

/// Runs the agent until it receives SIGINT, SIGTERM, SIGHUP or SIGQUIT.
///
/// Containers running at startup are tracked right away, containers started later
/// as soon as the runtime reports them. On shutdown the cycle in progress, if any,
/// is completed before returning.
///
/// # Errors
///
/// Fails if the configuration is invalid, the runtime cannot be reached, or the
/// initial container listing fails.
pub async fn run(config: config::Config) -> Result<()> {
    config.validate()?;
    let classification = config.classification()?;
    let registry_config = config.registry_config()?;
    log::debug!("Hostname: {}", registry_config.hostname);

    let runtime = Arc::new(runtime::DockerRuntime::connect(config.endpoint.as_deref()).await?);
    let reader = Arc::new(cgroup::CgroupReader::new(&config.cgroup_root));
    let sink = Arc::new(sink::InfluxSink::new(
        &config.host,
        &config.database,
        &config.username,
        &config.password,
    )?);
    log::debug!("Writing to {}", sink.uri());

    let registry = Arc::new(registry::Registry::new(
        reader,
        probe::RuntimeProbe::new(Arc::clone(&runtime), config.readiness()),
        sink,
        registry_config,
    ));

    let events = discovery::subscribe(Arc::clone(&runtime));
    let tracked = discovery::discover(runtime.as_ref(), &registry, &classification).await?;
    log::info!("Tracking {tracked} containers");

    tokio::spawn(discovery::watch(events, Arc::clone(&registry), classification));

    let report = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.report().await })
    };

    wait_for_shutdown().await?;
    registry.stop();
    if let Err(err) = report.await {
        log::error!("report loop panicked: {err}");
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(Error::Signal)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(Error::Signal)?;
    let mut sighup = signal(SignalKind::hangup()).map_err(Error::Signal)?;
    let mut sigquit = signal(SignalKind::quit()).map_err(Error::Signal)?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sighup.recv() => "SIGHUP",
        _ = sigquit.recv() => "SIGQUIT",
    };
    log::info!("Received {name}, shutting down");

    Ok(())
}
