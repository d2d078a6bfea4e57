//! Data structures used throughout the daemon.
//!
//! A [`LifecycleEvent`] is what the event loop feeds into the pipeline, a
//! [`ContainerInspect`] is the subset of the runtime's inspect payload we
//! consume, and a [`ContainerRecord`] is the normalized, immutable view of a
//! container that the DNS backends work from. Records are never mutated in
//! place: every resolution produces a fresh value.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use log::warn;

use crate::error::InvalidTopology;

/// The two lifecycle transitions we react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    Die,
}

impl Action {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "start" => Some(Self::Start),
            "die" => Some(Self::Die),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Die => "die",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry of the runtime event stream, before filtering.
#[derive(Debug, Clone, Default)]
pub struct RawEvent {
    pub kind: String,
    pub action: String,
    pub id: String,
    pub name: String,
}

/// A container start or die, the only events that enter the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub action: Action,
    pub container_id: String,
    pub actor_name: String,
}

impl LifecycleEvent {
    /// Keeps only `container` events whose action is `start` or `die`.
    pub fn from_raw(raw: &RawEvent) -> Option<Self> {
        if raw.kind != "container" || raw.id.is_empty() {
            return None;
        }
        let action = Action::parse(&raw.action)?;
        Some(Self {
            action,
            container_id: raw.id.clone(),
            actor_name: raw.name.clone(),
        })
    }

    /// A synthetic start, used when converging with already running containers.
    pub fn start(container_id: impl Into<String>, actor_name: impl Into<String>) -> Self {
        Self {
            action: Action::Start,
            container_id: container_id.into(),
            actor_name: actor_name.into(),
        }
    }

    /// Name to tag log lines with; falls back to the id when the runtime sent no name.
    pub fn label(&self) -> &str {
        if self.actor_name.is_empty() {
            &self.container_id
        } else {
            &self.actor_name
        }
    }
}

/// Addresses of one attached network as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkEndpoint {
    pub ip_address: Option<String>,
    pub global_ipv6_address: Option<String>,
}

/// The fields of a container inspect payload the resolver consumes.
#[derive(Debug, Clone, Default)]
pub struct ContainerInspect {
    pub id: String,
    /// As reported, with the leading `/`.
    pub name: String,
    pub hostname: String,
    pub network_mode: String,
    pub labels: HashMap<String, String>,
    /// Attached networks in the order the runtime reported them.
    pub networks: Vec<(String, NetworkEndpoint)>,
}

/// A `name#port` token from the `services` label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMarker {
    pub name: String,
    pub port: u16,
}

/// Parses whitespace separated `name#port` tokens, skipping the malformed ones.
pub fn parse_service_markers(label: &str) -> Vec<ServiceMarker> {
    label
        .split_whitespace()
        .filter_map(|token| {
            let (name, port) = token.split_once('#')?;
            let port = port.parse().ok()?;
            if name.is_empty() {
                return None;
            }
            Some(ServiceMarker {
                name: name.to_string(),
                port,
            })
        })
        .collect()
}

/// Identity and network facts for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub hostname: String,
    /// `0.0.0.0` is kept as reported; see [`ContainerRecord::usable_ipv4`].
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub service_markers: Vec<ServiceMarker>,
    pub network_mode: String,
}

const SERVICES_LABEL: &str = "services";

impl ContainerRecord {
    /// Normalizes an inspect payload.
    ///
    /// `host` networking and `container:<id>` namespaces leave the container
    /// without an address of its own and are rejected.
    pub fn from_inspect(inspect: &ContainerInspect) -> Result<Self, InvalidTopology> {
        let mode = inspect.network_mode.as_str();
        if mode == "host" || mode.starts_with("container:") {
            return Err(InvalidTopology(mode.to_string()));
        }

        let network = if mode == "default" { "bridge" } else { mode };
        let endpoint = inspect
            .networks
            .iter()
            .find(|(name, _)| name == network)
            .or_else(|| inspect.networks.first())
            .map(|(_, endpoint)| endpoint);

        let ipv4 = endpoint
            .and_then(|e| e.ip_address.as_deref())
            .and_then(|addr| parse_addr::<Ipv4Addr>(addr, &inspect.id));
        let ipv6 = endpoint
            .and_then(|e| e.global_ipv6_address.as_deref())
            .and_then(|addr| parse_addr::<Ipv6Addr>(addr, &inspect.id));

        Ok(Self {
            id: inspect.id.clone(),
            name: inspect.name.trim_start_matches('/').to_string(),
            hostname: inspect.hostname.clone(),
            ipv4,
            ipv6,
            service_markers: inspect
                .labels
                .get(SERVICES_LABEL)
                .map(|label| parse_service_markers(label))
                .unwrap_or_default(),
            network_mode: inspect.network_mode.clone(),
        })
    }

    /// The IPv4 address, unless absent or `0.0.0.0`.
    pub fn usable_ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4.filter(|ip| !ip.is_unspecified())
    }

    pub fn usable_ipv6(&self) -> Option<Ipv6Addr> {
        self.ipv6.filter(|ip| !ip.is_unspecified())
    }

    pub fn has_address(&self) -> bool {
        self.usable_ipv4().is_some() || self.usable_ipv6().is_some()
    }

    /// A copy of this record carrying a different IPv6 address.
    pub fn with_ipv6(&self, ipv6: Ipv6Addr) -> Self {
        Self {
            ipv6: Some(ipv6),
            ..self.clone()
        }
    }
}

fn parse_addr<T: std::str::FromStr>(addr: &str, id: &str) -> Option<T> {
    if addr.is_empty() {
        return None;
    }
    match addr.parse() {
        Ok(ip) => Some(ip),
        Err(_) => {
            warn!("Ignoring unparsable address {:?} of container {}", addr, id);
            None
        }
    }
}
