//! TSIG-signed dynamic updates (RFC 2136) against an authoritative server.
//!
//! One `apply` builds one update message scoped to the configured zone:
//!
//! * `start` with a usable IPv4 replaces the A record set of the hostname and,
//!   when the container has a global IPv6 address, the AAAA record set too.
//!   Replace is "delete the RRset, add the value", so re-applying the same
//!   record leaves the zone unchanged.
//! * `start` without a usable IPv4 sends nothing.
//! * `die` deletes the A and AAAA record sets of the hostname.
//!
//! The message goes out through an [`UpdateTransport`]; the production
//! transport signs it and sends it over TCP with a bounded wait.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_client::client::{Client, SyncClient};
use hickory_client::error::{ClientError, ClientErrorKind};
use hickory_client::tcp::TcpClientConnection;
use hickory_proto::error::ProtoErrorKind;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode, UpdateMessage};
use hickory_proto::rr::dnssec::tsig::TSigner;
use hickory_proto::rr::rdata::{A, AAAA, TXT};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::xfer::{DnsRequest, DnsRequestOptions};
use hickory_resolver::TokioAsyncResolver;
use log::{debug, info};

use super::{ChangeKind, ChangeOutcome, ChangeRequest, DnsBackend, RecordKind};
use crate::error::{BackendError, ConfigError};
use crate::types::{Action, ContainerRecord};

/// Bound on one update transaction, connect included.
pub const DNS_TIMEOUT: Duration = Duration::from_secs(10);

/// The parts of an update response we judge the outcome by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateResponse {
    pub message_type: MessageType,
    pub op_code: OpCode,
    pub response_code: ResponseCode,
}

impl UpdateResponse {
    pub fn no_error() -> Self {
        Self {
            message_type: MessageType::Response,
            op_code: OpCode::Update,
            response_code: ResponseCode::NoError,
        }
    }

    fn check(&self, server: &str) -> Result<(), BackendError> {
        if self.message_type != MessageType::Response || self.op_code != OpCode::Update {
            return Err(BackendError::UnexpectedResponder(format!(
                "{} answered with a {:?} {:?}",
                server, self.op_code, self.message_type
            )));
        }
        match self.response_code {
            ResponseCode::NoError => Ok(()),
            code @ (ResponseCode::BADKEY | ResponseCode::BADSIG | ResponseCode::BADTIME) => {
                Err(BackendError::BadKey(code))
            }
            code => Err(BackendError::ServerFailure(code)),
        }
    }
}

/// Carries a finished update message to the server.
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    async fn send(&self, message: Message) -> Result<UpdateResponse, BackendError>;

    /// Where updates go, for log lines.
    fn server(&self) -> String;
}

enum Target {
    Addr(SocketAddr),
    Host {
        name: String,
        port: u16,
        resolver: TokioAsyncResolver,
    },
}

/// Signs updates with a TSIG key and sends them over TCP.
pub struct TsigTcpTransport {
    target: Target,
    signer: TSigner,
    timeout: Duration,
}

impl TsigTcpTransport {
    /// `server` may be an IP literal or a hostname; hostnames are looked up
    /// through the system resolver on every send.
    pub fn new(
        server: &str,
        port: u16,
        signer: TSigner,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let target = match server.parse::<IpAddr>() {
            Ok(ip) => Target::Addr(SocketAddr::new(ip, port)),
            Err(_) => Target::Host {
                name: server.to_string(),
                port,
                resolver: TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
                    ConfigError::Invalid(format!("cannot resolve DNS server {}: {}", server, e))
                })?,
            },
        };
        Ok(Self {
            target,
            signer,
            timeout,
        })
    }

    async fn server_addr(&self) -> Result<SocketAddr, BackendError> {
        match &self.target {
            Target::Addr(addr) => Ok(*addr),
            Target::Host {
                name,
                port,
                resolver,
            } => {
                let lookup = tokio::time::timeout(self.timeout, resolver.lookup_ip(name.as_str()))
                    .await
                    .map_err(|_| BackendError::Timeout(name.clone()))?
                    .map_err(|e| BackendError::Timeout(format!("{} ({})", name, e)))?;
                lookup
                    .iter()
                    .next()
                    .map(|ip| SocketAddr::new(ip, *port))
                    .ok_or_else(|| BackendError::Timeout(format!("{} has no address", name)))
            }
        }
    }
}

#[async_trait]
impl UpdateTransport for TsigTcpTransport {
    async fn send(&self, message: Message) -> Result<UpdateResponse, BackendError> {
        let addr = self.server_addr().await?;
        let signer = self.signer.clone();
        let timeout = self.timeout;

        // The synchronous client drives its own reactor; keep it off the workers.
        tokio::task::spawn_blocking(move || {
            let conn = TcpClientConnection::with_timeout(addr, timeout)
                .map_err(|e| classify(e, addr))?;
            let client = SyncClient::with_tsigner(conn, signer);
            let request = DnsRequest::new(message, DnsRequestOptions::default());
            let response = client
                .send(request)
                .into_iter()
                .next()
                .ok_or_else(|| {
                    BackendError::UnexpectedResponder(format!("{} sent no answer", addr))
                })?
                .map_err(|e| classify(e, addr))?;

            Ok(UpdateResponse {
                message_type: response.message_type(),
                op_code: response.op_code(),
                response_code: response.response_code(),
            })
        })
        .await
        .map_err(|e| BackendError::Malformed(format!("update task failed: {}", e)))?
    }

    fn server(&self) -> String {
        match &self.target {
            Target::Addr(addr) => addr.to_string(),
            Target::Host { name, port, .. } => format!("{}:{}", name, port),
        }
    }
}

fn classify(err: ClientError, addr: SocketAddr) -> BackendError {
    match err.kind() {
        ClientErrorKind::Timeout | ClientErrorKind::Io(_) => BackendError::Timeout(addr.to_string()),
        ClientErrorKind::Proto(proto) => match proto.kind() {
            ProtoErrorKind::Timeout | ProtoErrorKind::Io(_) => {
                BackendError::Timeout(addr.to_string())
            }
            _ => BackendError::Malformed(proto.to_string()),
        },
        _ => BackendError::Malformed(err.to_string()),
    }
}

/// Changes a dynamic update carries for `action` on `record`.
pub fn plan(action: Action, record: &ContainerRecord, ttl: u32) -> Vec<ChangeRequest> {
    let owner = record.hostname.as_str();
    match action {
        Action::Start => {
            let Some(ipv4) = record.usable_ipv4() else {
                return Vec::new();
            };
            let mut changes = vec![ChangeRequest::upsert(owner, RecordKind::A, ipv4.to_string(), ttl)];
            if let Some(ipv6) = record.usable_ipv6() {
                changes.push(ChangeRequest::upsert(
                    owner,
                    RecordKind::Aaaa,
                    ipv6.to_string(),
                    ttl,
                ));
            }
            changes
        }
        Action::Die => vec![
            ChangeRequest::delete(owner, RecordKind::A, Vec::new(), 0),
            ChangeRequest::delete(owner, RecordKind::Aaaa, Vec::new(), 0),
        ],
    }
}

fn owner_name(owner: &str, zone: &Name) -> Result<Name, BackendError> {
    let name = Name::from_str(owner)
        .map_err(|e| BackendError::Malformed(format!("invalid owner name {:?}: {}", owner, e)))?;
    if name.is_fqdn() {
        return Ok(name);
    }
    name.append_domain(zone)
        .map_err(|e| BackendError::Malformed(format!("{} does not fit in {}: {}", owner, zone, e)))
}

fn rdata(kind: RecordKind, value: &str) -> Result<RData, BackendError> {
    let parsed = match kind {
        RecordKind::A => value.parse::<Ipv4Addr>().map(|ip| RData::A(A(ip))),
        RecordKind::Aaaa => value.parse::<Ipv6Addr>().map(|ip| RData::AAAA(AAAA(ip))),
        RecordKind::Txt => return Ok(RData::TXT(TXT::new(vec![value.to_string()]))),
    };
    parsed.map_err(|_| BackendError::Malformed(format!("invalid {} value {:?}", kind, value)))
}

/// Builds one update message for `zone` carrying every change.
pub fn build_update(zone: &Name, changes: &[ChangeRequest]) -> Result<Message, BackendError> {
    let mut zone_query = Query::new();
    zone_query
        .set_name(zone.clone())
        .set_query_class(DNSClass::IN)
        .set_query_type(RecordType::SOA);

    let mut message = Message::new();
    message
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Update)
        .set_recursion_desired(false);
    message.add_zone(zone_query);

    for change in changes {
        let owner = owner_name(&change.owner, zone)?;
        let rtype = change.record_type.record_type();
        match change.kind {
            ChangeKind::Upsert => {
                let mut clear = Record::with(owner.clone(), rtype, 0);
                clear.set_dns_class(DNSClass::ANY);
                message.add_update(clear);
                for value in &change.values {
                    let record = Record::from_rdata(owner.clone(), change.ttl, rdata(change.record_type, value)?);
                    message.add_update(record);
                }
            }
            ChangeKind::Delete if change.values.is_empty() => {
                let mut clear = Record::with(owner.clone(), rtype, 0);
                clear.set_dns_class(DNSClass::ANY);
                message.add_update(clear);
            }
            ChangeKind::Delete => {
                for value in &change.values {
                    let mut record = Record::from_rdata(owner.clone(), 0, rdata(change.record_type, value)?);
                    record.set_dns_class(DNSClass::NONE);
                    message.add_update(record);
                }
            }
        }
    }
    Ok(message)
}

pub struct DynamicUpdateBackend<T> {
    zone: Name,
    ttl: u32,
    transport: T,
}

impl<T: UpdateTransport> DynamicUpdateBackend<T> {
    pub fn new(zone: &str, ttl: u32, transport: T) -> Result<Self, ConfigError> {
        let mut zone = Name::from_str(zone)
            .map_err(|e| ConfigError::Invalid(format!("invalid zone name {:?}: {}", zone, e)))?;
        zone.set_fqdn(true);
        Ok(Self {
            zone,
            ttl,
            transport,
        })
    }
}

#[async_trait]
impl<T: UpdateTransport> DnsBackend for DynamicUpdateBackend<T> {
    async fn apply(
        &self,
        action: Action,
        record: &ContainerRecord,
    ) -> Result<ChangeOutcome, BackendError> {
        for marker in &record.service_markers {
            debug!(
                "[{}] Service marker {}#{} (no SRV record published)",
                record.name, marker.name, marker.port
            );
        }

        let changes = plan(action, record, self.ttl);
        if changes.is_empty() {
            debug!(
                "[{}] No usable IPv4 for {}, nothing to update",
                record.name, record.hostname
            );
            return Ok(ChangeOutcome::Skipped);
        }

        let server = self.transport.server();
        match (action, record.usable_ipv6()) {
            (Action::Start, Some(ipv6)) => info!(
                "[{}] Updating dns {}, setting {}.{} to {} and {}",
                record.name,
                server,
                record.hostname,
                self.zone,
                record.ipv4.map(|ip| ip.to_string()).unwrap_or_default(),
                ipv6
            ),
            (Action::Start, None) => info!(
                "[{}] Updating dns {}, setting {}.{} to {}",
                record.name,
                server,
                record.hostname,
                self.zone,
                record.ipv4.map(|ip| ip.to_string()).unwrap_or_default()
            ),
            (Action::Die, _) => info!(
                "[{}] Removing entry for {}.{} in {}",
                record.name, record.hostname, self.zone, server
            ),
        }

        let message = build_update(&self.zone, &changes)?;
        let response = self.transport.send(message).await?;
        response.check(&server)?;
        Ok(ChangeOutcome::Applied)
    }

    fn name(&self) -> &'static str {
        "bind"
    }
}
