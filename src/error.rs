//! Error types for the runtime adapter, the DNS backends and configuration loading.
//!
//! Every failure on the event path ends at the unit-of-work boundary: it is
//! logged there and the unit terminates. Only configuration errors and an
//! unsupported runtime API version are fatal to the process.

use hickory_proto::op::ResponseCode;
use thiserror::Error;

/// Failures talking to the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The container vanished before it could be inspected.
    #[error("container {0} not found")]
    NotFound(String),

    /// The runtime API did not answer within the bound.
    #[error("runtime API timed out after {0}s")]
    Timeout(u64),

    /// The requested API version is older than the oldest one we speak.
    #[error("docker API version {requested} is below the supported minimum {minimum}")]
    UnsupportedApiVersion { requested: String, minimum: String },

    /// Anything else reported by the runtime client.
    #[error("runtime API error: {0}")]
    Api(String),
}

/// Failures applying a change to a DNS backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection refused, reset, or no answer within the bound.
    #[error("timed out or failed to connect to {0}")]
    Timeout(String),

    /// The answer did not look like a reply to our update.
    #[error("unexpected responder: {0}")]
    UnexpectedResponder(String),

    /// The update could not be built or was rejected as malformed.
    #[error("malformed update: {0}")]
    Malformed(String),

    /// The server refused the transaction signature.
    #[error("server rejected the TSIG key ({0})")]
    BadKey(ResponseCode),

    /// The server answered with a non-zero response code.
    #[error("server reported {0} ({})", u16::from(*.0))]
    ServerFailure(ResponseCode),

    /// The configured hosted zone does not exist or could not be read.
    #[error("hosted zone {0} not found")]
    ZoneNotFound(String),

    /// The remote API refused the change batch.
    #[error("change rejected: {0}")]
    Rejected(String),

    /// The owner name carries another container's provenance marker.
    #[error("{name} is owned by container {owner}")]
    Ownership { name: String, owner: String },
}

impl BackendError {
    /// Protocol-level failures: malformed transaction, unexpected responder
    /// or a rejected signature key.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedResponder(_) | Self::Malformed(_) | Self::BadKey(_)
        )
    }
}

/// The container shares another network namespace and has no address of its own.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("network mode {0:?} gives the container no address of its own")]
pub struct InvalidTopology(pub String);

/// Configuration and secret loading failures. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("TSIG key {0} not present in keyring")]
    MissingKey(String),

    #[error("TSIG key {0} is not valid base64")]
    BadKeyEncoding(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}
