//! DNS backends.
//!
//! A backend turns a resolved [`ContainerRecord`] and an [`Action`] into
//! changes on an authoritative zone. Two variants exist:
//!
//! * [`DynamicUpdateBackend`]: TSIG-signed dynamic updates sent over TCP to a
//!   server such as BIND.
//! * [`HostedZoneBackend`]: change batches submitted to a hosted-zone
//!   management API (Route 53).
//!
//! Backends keep no mutable state between calls. They do not retry: a failed
//! `apply` is final for that attempt and is reported to the dispatcher.

use std::fmt;

use async_trait::async_trait;
use hickory_proto::rr::RecordType;

use crate::error::BackendError;
use crate::types::{Action, ContainerRecord};

pub mod dynamic_update;
pub mod hosted_zone;
pub mod route53;

pub use dynamic_update::{DynamicUpdateBackend, TsigTcpTransport, UpdateResponse, UpdateTransport};
pub use hosted_zone::{HostedZoneApi, HostedZoneBackend, RecordSet};
pub use route53::Route53Api;

/// Whether a change was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Applied,
    /// Nothing to do for this record, e.g. a start without a usable IPv4.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upsert,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    A,
    Aaaa,
    Txt,
}

impl RecordKind {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::A => RecordType::A,
            Self::Aaaa => RecordType::AAAA,
            Self::Txt => RecordType::TXT,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Txt => "TXT",
        })
    }
}

/// One typed change against an owner name.
///
/// An upsert replaces the whole record set with `values`. A delete with no
/// values removes the whole record set; with values it removes exactly those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    pub kind: ChangeKind,
    pub owner: String,
    pub record_type: RecordKind,
    pub values: Vec<String>,
    pub ttl: u32,
}

impl ChangeRequest {
    pub fn upsert(owner: &str, record_type: RecordKind, value: String, ttl: u32) -> Self {
        Self {
            kind: ChangeKind::Upsert,
            owner: owner.to_string(),
            record_type,
            values: vec![value],
            ttl,
        }
    }

    pub fn delete(owner: &str, record_type: RecordKind, values: Vec<String>, ttl: u32) -> Self {
        Self {
            kind: ChangeKind::Delete,
            owner: owner.to_string(),
            record_type,
            values,
            ttl,
        }
    }
}

/// Applies upserts and deletes for a container's records.
#[async_trait]
pub trait DnsBackend: Send + Sync {
    async fn apply(
        &self,
        action: Action,
        record: &ContainerRecord,
    ) -> Result<ChangeOutcome, BackendError>;

    /// Short name for log lines.
    fn name(&self) -> &'static str;
}
