//! Hosted-zone backend: one change batch per `apply`.
//!
//! A start upserts the A and AAAA record sets the container has addresses
//! for, plus a TXT record holding the container id as a provenance marker.
//! The change-batch protocol only deletes a record set when given its exact
//! current values, so a die first reads the A and AAAA sets back and deletes
//! the ones that exist under exactly the owner name, then the TXT marker.
//!
//! If the TXT marker names another container the delete is abandoned: two
//! containers sharing a hostname must not remove each other's records.

use async_trait::async_trait;
use log::{debug, info, warn};

use super::{ChangeOutcome, ChangeRequest, DnsBackend, RecordKind};
use crate::error::BackendError;
use crate::types::{Action, ContainerRecord};

/// TTL of every record set this backend writes.
pub const HOSTED_ZONE_TTL: u32 = 300;

/// A record set as listed by the hosted-zone API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSet {
    pub name: String,
    pub record_type: RecordKind,
    pub ttl: u32,
    pub values: Vec<String>,
}

/// The three calls of the hosted-zone management API we use.
#[async_trait]
pub trait HostedZoneApi: Send + Sync {
    /// Apex name of the configured zone, e.g. `example.com.`.
    async fn zone_apex(&self) -> Result<String, BackendError>;

    /// The first record set at or after `(name, record_type)` in the zone's
    /// listing order. It may belong to a different name or type.
    async fn first_record_set(
        &self,
        name: &str,
        record_type: RecordKind,
    ) -> Result<Option<RecordSet>, BackendError>;

    /// Submit every change as one batch.
    async fn submit(&self, changes: &[ChangeRequest]) -> Result<(), BackendError>;
}

pub struct HostedZoneBackend<A> {
    api: A,
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}

impl<A: HostedZoneApi> HostedZoneBackend<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// The record set of exactly `(owner, record_type)`, if it exists.
    async fn existing(
        &self,
        owner: &str,
        record_type: RecordKind,
    ) -> Result<Option<RecordSet>, BackendError> {
        Ok(self
            .api
            .first_record_set(owner, record_type)
            .await?
            .filter(|set| set.record_type == record_type && same_name(&set.name, owner)))
    }

    fn upsert_batch(owner: &str, record: &ContainerRecord) -> Vec<ChangeRequest> {
        let mut changes = Vec::with_capacity(3);
        if let Some(ipv4) = record.usable_ipv4() {
            info!(
                "[{}] Updating route53, setting {} to ipv4 {}",
                record.name, owner, ipv4
            );
            changes.push(ChangeRequest::upsert(
                owner,
                RecordKind::A,
                ipv4.to_string(),
                HOSTED_ZONE_TTL,
            ));
        }
        if let Some(ipv6) = record.usable_ipv6() {
            info!(
                "[{}] Updating route53, setting {} to ipv6 {}",
                record.name, owner, ipv6
            );
            changes.push(ChangeRequest::upsert(
                owner,
                RecordKind::Aaaa,
                ipv6.to_string(),
                HOSTED_ZONE_TTL,
            ));
        }
        changes.push(ChangeRequest::upsert(
            owner,
            RecordKind::Txt,
            record.id.clone(),
            HOSTED_ZONE_TTL,
        ));
        changes
    }

    async fn delete_batch(
        &self,
        owner: &str,
        record: &ContainerRecord,
    ) -> Result<Vec<ChangeRequest>, BackendError> {
        let marker = self.existing(owner, RecordKind::Txt).await?;
        if let Some(marker) = &marker {
            if !marker.values.iter().any(|value| value == &record.id) {
                return Err(BackendError::Ownership {
                    name: owner.to_string(),
                    owner: marker.values.join(","),
                });
            }
        }

        let mut changes = Vec::with_capacity(3);
        for kind in [RecordKind::A, RecordKind::Aaaa] {
            if let Some(set) = self.existing(owner, kind).await? {
                info!(
                    "[{}] Removing {} from route53 with {} {}",
                    record.name,
                    owner,
                    kind,
                    set.values.join(",")
                );
                changes.push(ChangeRequest::delete(owner, kind, set.values, set.ttl));
            }
        }

        // Deleting a set that does not exist fails the whole batch.
        if let Some(set) = marker {
            changes.push(ChangeRequest::delete(owner, RecordKind::Txt, set.values, set.ttl));
        }
        Ok(changes)
    }
}

#[async_trait]
impl<A: HostedZoneApi> DnsBackend for HostedZoneBackend<A> {
    async fn apply(
        &self,
        action: Action,
        record: &ContainerRecord,
    ) -> Result<ChangeOutcome, BackendError> {
        let apex = self.api.zone_apex().await.map_err(|err| {
            warn!("[{}] Hosted zone lookup failed, nothing submitted", record.name);
            err
        })?;
        let owner = format!("{}.{}", record.hostname, apex);

        let changes = match action {
            Action::Start => Self::upsert_batch(&owner, record),
            Action::Die => self.delete_batch(&owner, record).await?,
        };
        if changes.is_empty() {
            debug!("[{}] No record sets left for {}", record.name, owner);
            return Ok(ChangeOutcome::Skipped);
        }
        self.api.submit(&changes).await?;
        Ok(ChangeOutcome::Applied)
    }

    fn name(&self) -> &'static str {
        "route53"
    }
}
