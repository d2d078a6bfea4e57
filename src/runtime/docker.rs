use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::errors::Error as DockerError;
use bollard::models::ContainerInspectResponse;
use bollard::system::EventsOptions;
use bollard::{ClientVersion, Docker, API_DEFAULT_VERSION};
use futures_util::stream::{BoxStream, StreamExt};
use log::{debug, info};

use super::{ContainerRuntime, RunningContainer};
use crate::error::RuntimeError;
use crate::types::{ContainerInspect, NetworkEndpoint, RawEvent};

/// Oldest Docker Engine API version whose inspect payload carries everything we read.
pub const MINIMUM_API_VERSION: ClientVersion = ClientVersion {
    major_version: 1,
    minor_version: 24,
};

/// Bound on inspect calls made while handling live events.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(15);
/// Used when neither an override nor `DOCKER_HOST` names the daemon.
pub const DEFAULT_SOCKET: &str = "unix:///var/run/docker.sock";

/// Bound on calls made during the startup pass.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    timeout: Duration,
}

impl DockerRuntime {
    /// Connect to the local daemon.
    ///
    /// Without a `socket` override the connection follows `DOCKER_HOST` and
    /// falls back to the default socket. `api_version` is either `auto` or
    /// `MAJOR.MINOR`; versions older than [`MINIMUM_API_VERSION`] are refused.
    pub fn connect(
        socket: Option<&str>,
        api_version: &str,
        timeout: Duration,
    ) -> Result<Self, RuntimeError> {
        let version = parse_api_version(api_version)?;
        let auto = api_version.eq_ignore_ascii_case("auto");
        let docker = match socket {
            Some(socket) => {
                info!("Connecting to Docker at {}", socket);
                Docker::connect_with_local(socket, timeout.as_secs(), &version)
            }
            None if auto => {
                info!("Connecting to Docker using local defaults");
                Docker::connect_with_local_defaults()
            }
            None => {
                let host = std::env::var("DOCKER_HOST").unwrap_or_else(|_| DEFAULT_SOCKET.into());
                info!("Connecting to Docker at {}", host);
                Docker::connect_with_local(&host, timeout.as_secs(), &version)
            }
        }
        .map_err(|e| RuntimeError::Api(e.to_string()))?;
        info!(
            "Using Docker API version {}.{}",
            version.major_version, version.minor_version
        );
        Ok(Self {
            docker: docker.with_timeout(timeout),
            timeout,
        })
    }

    /// The same connection with a different bound on each call.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            docker: self.docker.clone().with_timeout(timeout),
            timeout,
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, RuntimeError>
    where
        F: Future<Output = Result<T, DockerError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|e| classify(e, self.timeout)),
            Err(_) => Err(RuntimeError::Timeout(self.timeout.as_secs())),
        }
    }
}

/// Resolve the configured API version string against what we support.
pub fn parse_api_version(requested: &str) -> Result<ClientVersion, RuntimeError> {
    if requested.eq_ignore_ascii_case("auto") {
        return Ok(ClientVersion {
            major_version: API_DEFAULT_VERSION.major_version,
            minor_version: API_DEFAULT_VERSION.minor_version,
        });
    }

    let invalid = || RuntimeError::Api(format!("invalid docker API version {:?}", requested));
    let (major, minor) = requested.trim().split_once('.').ok_or_else(invalid)?;
    let version = ClientVersion {
        major_version: major.parse().map_err(|_| invalid())?,
        minor_version: minor.parse().map_err(|_| invalid())?,
    };

    let key = |v: &ClientVersion| (v.major_version, v.minor_version);
    if key(&version) < key(&MINIMUM_API_VERSION) {
        return Err(RuntimeError::UnsupportedApiVersion {
            requested: requested.to_string(),
            minimum: format!(
                "{}.{}",
                MINIMUM_API_VERSION.major_version, MINIMUM_API_VERSION.minor_version
            ),
        });
    }
    Ok(version)
}

fn classify(err: DockerError, bound: Duration) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        DockerError::RequestTimeoutError => RuntimeError::Timeout(bound.as_secs()),
        other => RuntimeError::Api(other.to_string()),
    }
}

fn to_inspect(detail: ContainerInspectResponse) -> ContainerInspect {
    let (hostname, labels) = detail
        .config
        .map(|config| {
            (
                config.hostname.unwrap_or_default(),
                config.labels.unwrap_or_default(),
            )
        })
        .unwrap_or_default();

    // The runtime reports networks as a map; sort for a stable "first" network.
    let mut networks: Vec<(String, NetworkEndpoint)> = detail
        .network_settings
        .and_then(|settings| settings.networks)
        .unwrap_or_default()
        .into_iter()
        .map(|(name, endpoint)| {
            (
                name,
                NetworkEndpoint {
                    ip_address: endpoint.ip_address,
                    global_ipv6_address: endpoint.global_ipv6_address,
                },
            )
        })
        .collect();
    networks.sort_by(|a, b| a.0.cmp(&b.0));

    ContainerInspect {
        id: detail.id.unwrap_or_default(),
        name: detail.name.unwrap_or_default(),
        hostname,
        network_mode: detail
            .host_config
            .and_then(|host| host.network_mode)
            .unwrap_or_default(),
        labels,
        networks,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect(&self, id: &str) -> Result<ContainerInspect, RuntimeError> {
        let detail = self
            .bounded(
                self.docker
                    .inspect_container(id, None::<InspectContainerOptions>),
            )
            .await?;
        Ok(to_inspect(detail))
    }

    async fn list_running(&self) -> Result<Vec<RunningContainer>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.bounded(self.docker.list_containers(Some(opts))).await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .as_ref()
                    .and_then(|n| n.first())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                Some(RunningContainer { id, name })
            })
            .collect())
    }

    fn events(&self) -> BoxStream<'static, Result<RawEvent, RuntimeError>> {
        let filters: HashMap<String, Vec<String>> = [
            ("type", ["container"].as_slice()),
            ("event", ["start", "die"].as_slice()),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect();
        let opts = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        let bound = self.timeout;
        self.docker
            .events(Some(opts))
            .map(move |msg| {
                let event = msg.map_err(|e| classify(e, bound))?;
                let (id, name) = match event.actor {
                    Some(actor) => (
                        actor.id.unwrap_or_default(),
                        actor
                            .attributes
                            .and_then(|mut attributes| attributes.remove("name"))
                            .unwrap_or_default(),
                    ),
                    None => Default::default(),
                };
                let raw = RawEvent {
                    kind: event.typ.map(|t| t.to_string()).unwrap_or_default(),
                    action: event.action.unwrap_or_default(),
                    id,
                    name,
                };
                debug!("Docker event: {:?}", raw);
                Ok(raw)
            })
            .boxed()
    }
}
