use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::dispatcher::Ipv6Rewrite;
use crate::error::ConfigError;

/// Which DNS backend receives the changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// TSIG-signed dynamic updates to an authoritative server.
    Bind,
    /// Change batches against a Route 53 hosted zone.
    Route53,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub apiversion: String,
    pub dnsserver: String,
    pub dnsport: u16,
    pub ttl: u32,
    pub keyname: String,
    pub zonename: String,
    pub engine: Engine,
    pub hostedzone: String,
    pub intprefix: String,
    pub extprefix: String,
    #[serde(deserialize_with = "lenient_bool")]
    pub ipv6replace: bool,
    pub secrets: PathBuf,
    pub tsigalgorithm: String,
    pub workers: usize,
    pub queuedepth: usize,
    /// Overrides `DOCKER_HOST` and the default socket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockersocket: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apiversion: "auto".into(),
            dnsserver: String::new(),
            dnsport: 53,
            ttl: 60,
            keyname: String::new(),
            zonename: String::new(),
            engine: Engine::Bind,
            hostedzone: String::new(),
            intprefix: String::new(),
            extprefix: String::new(),
            ipv6replace: false,
            secrets: "secrets.json".into(),
            tsigalgorithm: "hmac-sha256".into(),
            workers: 8,
            queuedepth: 64,
            dockersocket: None,
        }
    }
}

/// Accepts real booleans as well as the usual textual spellings.
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Int(value) => value != 0,
        Flag::Text(text) => parse_flag(&text),
    })
}

pub fn parse_flag(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "t" | "1" | "on"
    )
}

/// Command-line overrides. Every flag is optional and wins over files and environment.
#[derive(Debug, Parser, Serialize)]
#[command(name = "docker-ddns", version, about = "Docker dynamic DNS updater")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, default_value = "dockerddns.toml")]
    #[serde(skip)]
    pub config: PathBuf,

    /// Docker API version, `auto` or MAJOR.MINOR
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apiversion: Option<String>,

    /// DNS host to update
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dnsserver: Option<String>,

    /// DNS port to update
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dnsport: Option<u16>,

    /// Default TTL for the records
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,

    /// Key name from the secrets file
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyname: Option<String>,

    /// Zone to update
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zonename: Option<String>,

    /// DNS engine to use
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<Engine>,

    /// Route 53 hosted zone id
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostedzone: Option<String>,

    /// Internal IPv6 prefix
    #[arg(long, value_name = "ffc0::")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intprefix: Option<String>,

    /// External IPv6 prefix
    #[arg(long, value_name = "2001:db32::")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extprefix: Option<String>,

    /// Replace the internal prefix with the external one on IPv6 updates
    #[arg(long, value_name = "true/false")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6replace: Option<String>,

    /// TSIG keyring file
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<PathBuf>,
}

impl Config {
    /// Defaults, then `dockerddns.toml`/`dockerddns.json`, then `DOCKERDDNS_*`
    /// environment variables, then command-line flags.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(cli))
    }

    pub fn figment(cli: &Cli) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Json::file("dockerddns.json"))
            .merge(Env::prefixed("DOCKERDDNS_"))
            .merge(Serialized::defaults(cli))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let require = |value: &str, key: &str| {
            if value.trim().is_empty() {
                Err(ConfigError::Invalid(format!(
                    "{} is required for engine {:?}",
                    key, self.engine
                )))
            } else {
                Ok(())
            }
        };
        match self.engine {
            Engine::Bind => {
                require(&self.dnsserver, "dnsserver")?;
                require(&self.zonename, "zonename")?;
                require(&self.keyname, "keyname")?;
            }
            Engine::Route53 => require(&self.hostedzone, "hostedzone")?,
        }
        if self.ipv6replace && (self.intprefix.is_empty() || self.extprefix.is_empty()) {
            return Err(ConfigError::Invalid(
                "ipv6replace needs both intprefix and extprefix".into(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        Ok(())
    }

    pub fn ipv6_rewrite(&self) -> Option<Ipv6Rewrite> {
        self.ipv6replace
            .then(|| Ipv6Rewrite::new(self.intprefix.clone(), self.extprefix.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    #[test]
    fn file_values_override_defaults() {
        let config = Config::from_figment(base().merge(Toml::string(
            r#"
            dnsserver = "ns1.example.com"
            zonename = "example.com"
            keyname = "ddns-key"
            ttl = 120
            ipv6replace = "yes"
            intprefix = "ffc0::"
            extprefix = "2001:db32::"
            "#,
        )))
        .unwrap();
        assert_eq!(config.engine, Engine::Bind);
        assert_eq!(config.ttl, 120);
        assert_eq!(config.dnsport, 53);
        assert!(config.ipv6replace);
        assert_eq!(
            config.ipv6_rewrite(),
            Some(Ipv6Rewrite::new("ffc0::", "2001:db32::"))
        );
    }

    #[test]
    fn command_line_wins() {
        let cli = Cli::parse_from([
            "docker-ddns",
            "--engine",
            "route53",
            "--hostedzone",
            "Z123",
            "--ipv6replace",
            "off",
        ]);
        let config = Config::from_figment(
            base()
                .merge(Toml::string("engine = \"bind\"\nipv6replace = true"))
                .merge(Serialized::defaults(&cli)),
        )
        .unwrap();
        assert_eq!(config.engine, Engine::Route53);
        assert_eq!(config.hostedzone, "Z123");
        assert!(!config.ipv6replace);
    }

    #[test]
    fn bind_requires_server_zone_and_key() {
        let err = Config::from_figment(base().merge(Toml::string("zonename = \"example.com\"")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_engine_is_rejected() {
        let err = Config::from_figment(base().merge(Toml::string("engine = \"powerdns\"")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn docker_socket_is_only_an_override() {
        let bind = "dnsserver = \"ns1\"\nzonename = \"example.com\"\nkeyname = \"k\"\n";
        let config = Config::from_figment(base().merge(Toml::string(bind))).unwrap();
        assert_eq!(config.dockersocket, None);

        let config = Config::from_figment(base().merge(Toml::string(&format!(
            "{}dockersocket = \"/run/user/1000/docker.sock\"",
            bind
        ))))
        .unwrap();
        assert_eq!(
            config.dockersocket.as_deref(),
            Some("/run/user/1000/docker.sock")
        );
    }

    #[test]
    fn flags() {
        assert!(parse_flag("On"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
