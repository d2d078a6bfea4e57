//! Keeps DNS records in sync with the lifecycle of Docker containers.
//!
//! Container `start` and `die` events are resolved to a [`types::ContainerRecord`]
//! (falling back to a cache when the runtime has already forgotten the
//! container) and applied to a DNS backend: TSIG-signed dynamic updates or a
//! Route 53 hosted zone.

pub mod backend;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event_loop;
pub mod resolver;
pub mod runtime;
pub mod secrets;
pub mod startup;
pub mod types;
