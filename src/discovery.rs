//! Finding the containers to track, once at startup and then from runtime events.
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cgroup::CounterReader;
use crate::container::{self, Classification, ContainerID};
use crate::error::ResultOkLogExt;
use crate::registry::Registry;
use crate::runtime::{self, ContainerEvent, ContainerRuntime};
use crate::sink::Sink;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to list containers: {0}")]
    List(#[source] runtime::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The display name of a container, falling back to its id when the runtime name
/// yields none (e.g. `/_1`).
fn display_name_or_id(raw: Option<&str>, container_id: &ContainerID) -> String {
    match raw.map(container::display_name) {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => container_id.to_string(),
    }
}

/// An open runtime event stream whose events are buffered until [`watch`] drains them.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<ContainerEvent>,
    task: JoinHandle<runtime::Result<()>>,
}

/// Starts receiving container events from `runtime`.
///
/// Subscribe before [`discover`] so that containers starting while the inventory is
/// taken are not missed; adding a container twice is harmless.
pub fn subscribe<R: ContainerRuntime>(runtime: Arc<R>) -> Subscription {
    let (tx, events) = mpsc::channel(EVENT_BUFFER);
    let task = tokio::spawn(async move { runtime.watch_events(tx).await });
    Subscription { events, task }
}

/// Adds every container that has not exited to `registry`, all with `classification`.
///
/// Returns the number of containers that are tracked afterwards. Containers that
/// cannot be tracked are logged and skipped.
///
/// # Errors
///
/// Returns [`Error::List`] if the runtime cannot list its containers.
pub async fn discover<R, C, S>(
    runtime: &R,
    registry: &Registry<C, R, S>,
    classification: &Classification,
) -> Result<usize>
where
    R: ContainerRuntime,
    C: CounterReader,
    S: Sink,
{
    let containers = runtime.list_containers().await.map_err(Error::List)?;
    log::debug!("runtime reported {} containers", containers.len());

    for summary in containers.into_iter().filter(|c| !c.has_exited()) {
        let Some(container_id) = ContainerID::new(&summary.id).ok_log() else {
            continue;
        };
        let name = display_name_or_id(summary.names.first().map(String::as_str), &container_id);
        registry
            .add(&name, container_id, classification.clone())
            .await
            .ok_log();
    }

    Ok(registry.len())
}

/// Applies the events of `subscription`, tracking started containers and dropping
/// stopped ones, until the event stream ends.
pub async fn watch<R, C, S>(
    subscription: Subscription,
    registry: Arc<Registry<C, R, S>>,
    classification: Classification,
) where
    R: ContainerRuntime,
    C: CounterReader,
    S: Sink,
{
    let Subscription { mut events, task } = subscription;

    while let Some(event) = events.recv().await {
        match event {
            ContainerEvent::Started { id, name } => {
                let Some(container_id) = ContainerID::new(&id).ok_log() else {
                    continue;
                };
                let name = display_name_or_id(Some(name.as_str()), &container_id);
                registry
                    .add(&name, container_id, classification.clone())
                    .await
                    .ok_log();
            }
            ContainerEvent::Stopped { id } => {
                if let Some(container_id) = ContainerID::new(&id).ok_log() {
                    registry.remove(&container_id);
                }
            }
        }
    }

    match task.await {
        Ok(Ok(())) => log::warn!("runtime event stream closed"),
        Ok(Err(err)) => log::error!("runtime event stream failed: {err}"),
        Err(err) => log::error!("runtime event task panicked: {err}"),
    }
}
