#![allow(deprecated)]

use std::collections::HashMap;

use bollard::container::{InspectContainerOptions, ListContainersOptions, LogOutput};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::system::EventsOptions;
use bollard::{API_DEFAULT_VERSION, Docker};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::container::ContainerID;

use super::{ContainerEvent, ContainerRuntime, ContainerSummary, Error, ExecID, Result};

/// Request timeout for calls against the Docker daemon, in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// [`ContainerRuntime`] backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the daemon at `endpoint` (`unix://`, `tcp://` or `http://`), or to
    /// the local default socket (honouring `DOCKER_HOST`) when no endpoint is given,
    /// and checks that it answers.
    pub async fn connect(endpoint: Option<&str>) -> Result<Self> {
        let label = endpoint.unwrap_or("local socket").to_owned();
        let docker = match endpoint {
            None => Docker::connect_with_socket_defaults(),
            Some(ep) if ep.starts_with("unix://") => {
                Docker::connect_with_socket(ep, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(ep) if ep.starts_with("tcp://") || ep.starts_with("http://") => {
                Docker::connect_with_http(ep, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(ep) => return Err(Error::UnsupportedEndpoint(ep.to_owned())),
        }
        .map_err(|source| Error::Connect {
            endpoint: label.clone(),
            source,
        })?;

        docker.ping().await.map_err(|source| Error::Connect {
            endpoint: label.clone(),
            source,
        })?;
        log::info!("Connected to Docker daemon at {label}");

        Ok(Self { docker })
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ContainerSummary {
                    id: c.id?,
                    names: c.names.unwrap_or_default(),
                    status: c.status.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn is_running(&self, container_id: &ContainerID) -> Result<bool> {
        match self
            .docker
            .inspect_container(container_id.as_str(), None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(info.state.and_then(|s| s.running).unwrap_or(false)),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_exec(&self, container_id: &ContainerID, cmd: &[&str]) -> Result<ExecID> {
        let options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(false),
            cmd: Some(cmd.to_vec()),
            ..Default::default()
        };

        match self.docker.create_exec(container_id.as_str(), options).await {
            Ok(exec) => Ok(ExecID::new(exec.id)),
            Err(err) if is_not_found(&err) => Err(Error::NotFound(container_id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn start_exec(&self, exec_id: &ExecID) -> Result<Vec<u8>> {
        let mut stdout = Vec::new();
        match self.docker.start_exec(exec_id.as_str(), None).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(frame) = output.next().await {
                    if let LogOutput::StdOut { message } = frame? {
                        stdout.extend_from_slice(&message);
                    }
                }
            }
            StartExecResults::Detached => return Err(Error::Detached(exec_id.to_string())),
        }

        let inspect = self.docker.inspect_exec(exec_id.as_str()).await?;
        match inspect.exit_code {
            Some(0) | None => Ok(stdout),
            Some(exit_code) => Err(Error::ExecFailed {
                exec_id: exec_id.to_string(),
                exit_code,
            }),
        }
    }

    async fn watch_events(&self, tx: mpsc::Sender<ContainerEvent>) -> Result<()> {
        let mut filters = HashMap::new();
        filters.insert("type".to_owned(), vec!["container".to_owned()]);
        filters.insert(
            "event".to_owned(),
            vec!["start".to_owned(), "die".to_owned(), "destroy".to_owned()],
        );
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        let mut stream = Box::pin(self.docker.events(Some(options)));
        while let Some(message) = stream.next().await {
            let message = message?;
            let Some(actor) = message.actor else {
                continue;
            };
            let Some(id) = actor.id else {
                continue;
            };
            let event = match message.action.as_deref() {
                Some("start") => ContainerEvent::Started {
                    name: actor
                        .attributes
                        .and_then(|mut attributes| attributes.remove("name"))
                        .unwrap_or_default(),
                    id,
                },
                Some("die") | Some("destroy") => ContainerEvent::Stopped { id },
                _ => continue,
            };
            log::debug!("Received runtime event: {event:?}");
            if tx.send(event).await.is_err() {
                break;
            }
        }

        Ok(())
    }
}
