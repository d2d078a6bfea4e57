//! TSIG key material.
//!
//! The keyring file is a JSON object mapping key names to base64 secrets,
//! e.g. `{"ddns-key.": "c2VjcmV0..."}`. Only the key named in the
//! configuration is decoded.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hickory_proto::rr::dnssec::tsig::TSigner;
use hickory_proto::rr::dnssec::rdata::tsig::TsigAlgorithm;
use hickory_proto::rr::Name;

use crate::error::ConfigError;

/// Allowed clock skew on signed messages, in seconds.
pub const TSIG_FUDGE: u16 = 300;

pub struct TsigKey {
    pub name: String,
    pub algorithm: TsigAlgorithm,
    secret: Vec<u8>,
}

impl fmt::Debug for TsigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsigKey")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

pub fn parse_algorithm(name: &str) -> Result<TsigAlgorithm, ConfigError> {
    match name.trim_end_matches('.').to_ascii_lowercase().as_str() {
        "hmac-md5" | "hmac-md5.sig-alg.reg.int" => Ok(TsigAlgorithm::HmacMd5),
        "hmac-sha1" => Ok(TsigAlgorithm::HmacSha1),
        "hmac-sha224" => Ok(TsigAlgorithm::HmacSha224),
        "hmac-sha256" => Ok(TsigAlgorithm::HmacSha256),
        "hmac-sha384" => Ok(TsigAlgorithm::HmacSha384),
        "hmac-sha512" => Ok(TsigAlgorithm::HmacSha512),
        other => Err(ConfigError::Invalid(format!(
            "unsupported TSIG algorithm {:?}",
            other
        ))),
    }
}

impl TsigKey {
    /// Read `keyname` out of the keyring at `path`.
    pub fn load(path: &Path, keyname: &str, algorithm: &str) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let keyring: HashMap<String, String> =
            serde_json::from_str(&text).map_err(|source| ConfigError::Json {
                path: display,
                source,
            })?;
        Self::from_keyring(&keyring, keyname, algorithm)
    }

    pub fn from_keyring(
        keyring: &HashMap<String, String>,
        keyname: &str,
        algorithm: &str,
    ) -> Result<Self, ConfigError> {
        let wanted = keyname.trim_end_matches('.');
        let encoded = keyring
            .iter()
            .find(|(name, _)| name.trim_end_matches('.') == wanted)
            .map(|(_, secret)| secret)
            .ok_or_else(|| ConfigError::MissingKey(keyname.to_string()))?;
        let secret = BASE64
            .decode(encoded.trim())
            .map_err(|_| ConfigError::BadKeyEncoding(keyname.to_string()))?;

        Ok(Self {
            name: keyname.to_string(),
            algorithm: parse_algorithm(algorithm)?,
            secret,
        })
    }

    pub fn signer(&self) -> Result<TSigner, ConfigError> {
        let name = Name::from_str(&self.name)
            .map_err(|e| ConfigError::Invalid(format!("invalid TSIG key name: {}", e)))?;
        TSigner::new(self.secret.clone(), self.algorithm.clone(), name, TSIG_FUDGE)
            .map_err(|e| ConfigError::Invalid(format!("cannot build TSIG signer: {}", e)))
    }
}
