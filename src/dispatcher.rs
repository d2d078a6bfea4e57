//! Hands resolved records to the configured DNS backend.

use std::net::Ipv6Addr;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::backend::{ChangeOutcome, DnsBackend};
use crate::types::{Action, ContainerRecord};

/// Republishes addresses under an internal IPv6 prefix under an external one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6Rewrite {
    internal: String,
    external: String,
}

impl Ipv6Rewrite {
    pub fn new(internal: impl Into<String>, external: impl Into<String>) -> Self {
        Self {
            internal: internal.into(),
            external: external.into(),
        }
    }

    /// Swaps the internal prefix for the external one, matching on the
    /// canonical text form. Addresses outside the prefix pass unchanged.
    pub fn apply(&self, addr: Ipv6Addr) -> Ipv6Addr {
        let text = addr.to_string();
        let Some(suffix) = text.strip_prefix(&self.internal) else {
            return addr;
        };
        let rewritten = format!("{}{}", self.external, suffix);
        match rewritten.parse() {
            Ok(external) => external,
            Err(_) => {
                warn!(
                    "Rewriting {} with prefix {} gives invalid address {}",
                    addr, self.external, rewritten
                );
                addr
            }
        }
    }
}

pub struct UpdateDispatcher {
    backend: Arc<dyn DnsBackend>,
    rewrite: Option<Ipv6Rewrite>,
}

impl UpdateDispatcher {
    pub fn new(backend: Arc<dyn DnsBackend>, rewrite: Option<Ipv6Rewrite>) -> Self {
        Self { backend, rewrite }
    }

    /// The record as the backend should see it.
    pub fn prepare(&self, record: ContainerRecord) -> ContainerRecord {
        match (&self.rewrite, record.ipv6) {
            (Some(rewrite), Some(ipv6)) => {
                let external = rewrite.apply(ipv6);
                if external == ipv6 {
                    record
                } else {
                    debug!("[{}] Publishing {} as {}", record.name, ipv6, external);
                    record.with_ipv6(external)
                }
            }
            _ => record,
        }
    }

    /// Apply `action` for `record`. Failures are logged here and go no further.
    pub async fn dispatch(&self, action: Action, record: ContainerRecord) {
        if !record.has_address() {
            debug!(
                "[{}] No usable address for {}, dropping {}",
                record.name, record.hostname, action
            );
            return;
        }

        let record = self.prepare(record);
        match self.backend.apply(action, &record).await {
            Ok(ChangeOutcome::Applied) => info!(
                "[{}] {} {} for {} applied",
                record.name,
                self.backend.name(),
                action,
                record.hostname
            ),
            Ok(ChangeOutcome::Skipped) => debug!(
                "[{}] {} {} for {} skipped",
                record.name,
                self.backend.name(),
                action,
                record.hostname
            ),
            Err(err) if err.is_protocol() => error!(
                "[{}] Protocol error on {} {} for {}: {}",
                record.name,
                self.backend.name(),
                action,
                record.hostname,
                err
            ),
            Err(err) => error!(
                "[{}] Error reported while updating {} ({} {}): {}",
                record.name,
                record.hostname,
                self.backend.name(),
                action,
                err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_internal_prefix() {
        let rewrite = Ipv6Rewrite::new("ffc0::", "2001:db32::");
        assert_eq!(
            rewrite.apply("ffc0::1".parse().unwrap()),
            "2001:db32::1".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn leaves_other_addresses_alone() {
        let rewrite = Ipv6Rewrite::new("ffc0::", "2001:db32::");
        let addr: Ipv6Addr = "fd00::1".parse().unwrap();
        assert_eq!(rewrite.apply(addr), addr);
    }

    #[test]
    fn keeps_address_when_result_is_invalid() {
        let rewrite = Ipv6Rewrite::new("ffc0::", "nonsense");
        let addr: Ipv6Addr = "ffc0::1".parse().unwrap();
        assert_eq!(rewrite.apply(addr), addr);
    }
}
