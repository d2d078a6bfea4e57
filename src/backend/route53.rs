//! Route 53 implementation of [`HostedZoneApi`].

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_route53::error::{DisplayErrorContext, SdkError};
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use aws_sdk_route53::Client;
use log::debug;

use super::hosted_zone::{HostedZoneApi, RecordSet, HOSTED_ZONE_TTL};
use super::{ChangeKind, ChangeRequest, RecordKind};
use crate::error::BackendError;

pub struct Route53Api {
    client: Client,
    hosted_zone: String,
}

impl Route53Api {
    /// Credentials and region come from the usual AWS environment and profile chain.
    pub async fn from_env(hosted_zone: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self {
            client: Client::new(&config),
            hosted_zone: hosted_zone.into(),
        }
    }
}

fn rr_type(kind: RecordKind) -> RrType {
    match kind {
        RecordKind::A => RrType::A,
        RecordKind::Aaaa => RrType::Aaaa,
        RecordKind::Txt => RrType::Txt,
    }
}

fn record_kind(rr_type: &RrType) -> Option<RecordKind> {
    match rr_type {
        RrType::A => Some(RecordKind::A),
        RrType::Aaaa => Some(RecordKind::Aaaa),
        RrType::Txt => Some(RecordKind::Txt),
        _ => None,
    }
}

/// Route 53 wants TXT values as quoted character strings.
fn encode_value(kind: RecordKind, value: &str) -> String {
    match kind {
        RecordKind::Txt => format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\"")),
        _ => value.to_string(),
    }
}

fn decode_value(kind: RecordKind, value: &str) -> String {
    match kind {
        RecordKind::Txt => value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .map(|v| v.replace("\\\"", "\"").replace("\\\\", "\\"))
            .unwrap_or_else(|| value.to_string()),
        _ => value.to_string(),
    }
}

fn sdk_error<E, R>(err: SdkError<E, R>, call: &str) -> BackendError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            BackendError::Timeout(format!("route53 {}", call))
        }
        other => BackendError::Rejected(format!("{}: {}", call, DisplayErrorContext(other))),
    }
}

fn malformed(err: impl std::fmt::Display) -> BackendError {
    BackendError::Malformed(err.to_string())
}

fn to_change(change: &ChangeRequest) -> Result<Change, BackendError> {
    let records = change
        .values
        .iter()
        .map(|value| {
            ResourceRecord::builder()
                .value(encode_value(change.record_type, value))
                .build()
                .map_err(malformed)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let set = ResourceRecordSet::builder()
        .name(&change.owner)
        .r#type(rr_type(change.record_type))
        .ttl(i64::from(change.ttl))
        .set_resource_records(Some(records))
        .build()
        .map_err(malformed)?;

    Change::builder()
        .action(match change.kind {
            ChangeKind::Upsert => ChangeAction::Upsert,
            ChangeKind::Delete => ChangeAction::Delete,
        })
        .resource_record_set(set)
        .build()
        .map_err(malformed)
}

#[async_trait]
impl HostedZoneApi for Route53Api {
    async fn zone_apex(&self) -> Result<String, BackendError> {
        let output = self
            .client
            .get_hosted_zone()
            .id(&self.hosted_zone)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_hosted_zone())
                    .unwrap_or(false)
                {
                    BackendError::ZoneNotFound(self.hosted_zone.clone())
                } else {
                    sdk_error(err, "GetHostedZone")
                }
            })?;

        output
            .hosted_zone()
            .map(|zone| zone.name().to_string())
            .ok_or_else(|| BackendError::ZoneNotFound(self.hosted_zone.clone()))
    }

    async fn first_record_set(
        &self,
        name: &str,
        record_type: RecordKind,
    ) -> Result<Option<RecordSet>, BackendError> {
        let output = self
            .client
            .list_resource_record_sets()
            .hosted_zone_id(&self.hosted_zone)
            .start_record_name(name)
            .start_record_type(rr_type(record_type))
            .max_items(1)
            .send()
            .await
            .map_err(|err| sdk_error(err, "ListResourceRecordSets"))?;

        Ok(output.resource_record_sets().first().and_then(|set| {
            let kind = record_kind(set.r#type())?;
            Some(RecordSet {
                name: set.name().to_string(),
                record_type: kind,
                ttl: set
                    .ttl()
                    .and_then(|ttl| u32::try_from(ttl).ok())
                    .unwrap_or(HOSTED_ZONE_TTL),
                values: set
                    .resource_records()
                    .iter()
                    .map(|rr| decode_value(kind, rr.value()))
                    .collect(),
            })
        }))
    }

    async fn submit(&self, changes: &[ChangeRequest]) -> Result<(), BackendError> {
        let changes = changes
            .iter()
            .map(to_change)
            .collect::<Result<Vec<_>, _>>()?;
        let batch = ChangeBatch::builder()
            .set_changes(Some(changes))
            .build()
            .map_err(malformed)?;

        let output = self
            .client
            .change_resource_record_sets()
            .hosted_zone_id(&self.hosted_zone)
            .change_batch(batch)
            .send()
            .await
            .map_err(|err| sdk_error(err, "ChangeResourceRecordSets"))?;

        if let Some(info) = output.change_info() {
            debug!("Route 53 change {} is {:?}", info.id(), info.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txt_values_are_quoted_both_ways() {
        assert_eq!(encode_value(RecordKind::Txt, "c1"), "\"c1\"");
        assert_eq!(decode_value(RecordKind::Txt, "\"c1\""), "c1");
        assert_eq!(encode_value(RecordKind::A, "10.0.0.5"), "10.0.0.5");
        assert_eq!(decode_value(RecordKind::Txt, "bare"), "bare");
    }

    #[test]
    fn builds_delete_change() {
        let change = to_change(&ChangeRequest::delete(
            "web1.example.com.",
            RecordKind::Aaaa,
            vec!["2001:db8::5".into()],
            300,
        ))
        .unwrap();
        assert_eq!(change.action(), &ChangeAction::Delete);
        let set = change.resource_record_set().unwrap();
        assert_eq!(set.name(), "web1.example.com.");
        assert_eq!(set.r#type(), &RrType::Aaaa);
        assert_eq!(set.resource_records()[0].value(), "2001:db8::5");
    }
}
