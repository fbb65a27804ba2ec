//! Resolve a YAML settings source into the parameters required to reach the broker.
//!
//! Setting names are case-insensitive: every key is uppercased when it is read.
//!
//! Recognised keys are deserialized into typed fields:
//!
//! | Key | Meaning |
//! |---|---|
//! | `RABBIT_HOST` (or `HOST`) | Broker host, or a comma separated pool of hosts |
//! | `RABBIT_PORT` | Broker port |
//! | `RABBIT_VHOST` | Virtual host |
//! | `RABBIT_USER` / `RABBIT_PASS` | Credentials |
//! | `RABBIT_HEARTBEAT` | Heartbeat interval in seconds (defaults to 60) |
//! | `RABBIT_CONNECTION_TIMEOUT` | Timeout of a single connection attempt, in seconds |
//! | `SSL_CERTIFICATE_CHAIN` / `SSL_KEY` | PEM files used for TLS |
//! | `VERIFY_PEER` | Whether to validate the server certificate |
//! | `SSL_VERSION` | `SSLv23`, `SSLv3`, `TLSv1`, `TLSv1.1` or `TLSv1.2` |
//! | `EXCHANGE` / `EXCHANGE_OUT` | Input and output exchange names |
//!
//! Any other key is kept verbatim and can be retrieved with [`Settings::get`].
//!
//! ```rust
//! use carrot_relay::settings::Settings;
//!
//! let settings = Settings::from_yaml_str(
//!     "rabbit_host: rabbit-1,rabbit-2\nexchange_out: results\nteam: payments\n",
//! )
//! .unwrap();
//!
//! assert!(settings.host_pool().contains(&"rabbit-1".to_owned()));
//! assert_eq!(settings.exchange_out(), Some("results"));
//! assert_eq!(settings.get_str("team"), Some("payments"));
//! ```
use crate::amqp::configuration::{ConnectionParameters, TlsParameters, TlsVersion};
use rand::seq::SliceRandom;
use serde::{Deserialize, Deserializer};
use serde_aux::field_attributes::{
    deserialize_bool_from_anything, deserialize_option_number_from_string,
};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, warn};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_HEARTBEAT_SECONDS: u16 = 60;

const HOST_KEY: &str = "RABBIT_HOST";
const HOST_ALIAS: &str = "HOST";

/// Keys with a typed counterpart in [`BrokerSettings`].
const RECOGNIZED_KEYS: &[&str] = &[
    HOST_KEY,
    HOST_ALIAS,
    "RABBIT_PORT",
    "RABBIT_VHOST",
    "RABBIT_USER",
    "RABBIT_PASS",
    "RABBIT_HEARTBEAT",
    "RABBIT_CONNECTION_TIMEOUT",
    "SSL_CERTIFICATE_CHAIN",
    "SSL_KEY",
    "VERIFY_PEER",
    "SSL_VERSION",
    "EXCHANGE",
    "EXCHANGE_OUT",
];

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read the configuration file at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration format")]
    Parse(#[from] serde_yaml::Error),
    #[error("The configuration source must be a mapping of setting names to values")]
    NotAMapping,
    #[error("Invalid value for `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
struct BrokerSettings {
    #[serde(rename = "RABBIT_HOST")]
    hosts: Option<String>,
    #[serde(
        rename = "RABBIT_PORT",
        deserialize_with = "deserialize_option_number_from_string"
    )]
    port: Option<u16>,
    #[serde(rename = "RABBIT_VHOST")]
    vhost: Option<String>,
    #[serde(rename = "RABBIT_USER")]
    user: Option<String>,
    #[serde(rename = "RABBIT_PASS")]
    password: Option<String>,
    #[serde(
        rename = "RABBIT_HEARTBEAT",
        deserialize_with = "deserialize_option_number_from_string"
    )]
    heartbeat: Option<u16>,
    #[serde(
        rename = "RABBIT_CONNECTION_TIMEOUT",
        deserialize_with = "deserialize_option_number_from_string"
    )]
    connection_timeout_seconds: Option<u64>,
    #[serde(rename = "SSL_CERTIFICATE_CHAIN")]
    ssl_certificate_chain: Option<PathBuf>,
    #[serde(rename = "SSL_KEY")]
    ssl_key: Option<PathBuf>,
    #[serde(rename = "VERIFY_PEER", deserialize_with = "deserialize_option_bool")]
    verify_peer: Option<bool>,
    #[serde(rename = "SSL_VERSION")]
    ssl_version: Option<String>,
    #[serde(rename = "EXCHANGE")]
    exchange_in: Option<String>,
    #[serde(rename = "EXCHANGE_OUT")]
    exchange_out: Option<String>,
}

fn deserialize_option_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_bool_from_anything(deserializer).map(Some)
}

impl BrokerSettings {
    /// Values present in `newer` win.
    fn merge(self, newer: BrokerSettings) -> Self {
        Self {
            hosts: newer.hosts.or(self.hosts),
            port: newer.port.or(self.port),
            vhost: newer.vhost.or(self.vhost),
            user: newer.user.or(self.user),
            password: newer.password.or(self.password),
            heartbeat: newer.heartbeat.or(self.heartbeat),
            connection_timeout_seconds: newer
                .connection_timeout_seconds
                .or(self.connection_timeout_seconds),
            ssl_certificate_chain: newer.ssl_certificate_chain.or(self.ssl_certificate_chain),
            ssl_key: newer.ssl_key.or(self.ssl_key),
            verify_peer: newer.verify_peer.or(self.verify_peer),
            ssl_version: newer.ssl_version.or(self.ssl_version),
            exchange_in: newer.exchange_in.or(self.exchange_in),
            exchange_out: newer.exchange_out.or(self.exchange_out),
        }
    }

    fn clear(&mut self, key: &str) {
        match key {
            HOST_KEY | HOST_ALIAS => self.hosts = None,
            "RABBIT_PORT" => self.port = None,
            "RABBIT_VHOST" => self.vhost = None,
            "RABBIT_USER" => self.user = None,
            "RABBIT_PASS" => self.password = None,
            "RABBIT_HEARTBEAT" => self.heartbeat = None,
            "RABBIT_CONNECTION_TIMEOUT" => self.connection_timeout_seconds = None,
            "SSL_CERTIFICATE_CHAIN" => self.ssl_certificate_chain = None,
            "SSL_KEY" => self.ssl_key = None,
            "VERIFY_PEER" => self.verify_peer = None,
            "SSL_VERSION" => self.ssl_version = None,
            "EXCHANGE" => self.exchange_in = None,
            "EXCHANGE_OUT" => self.exchange_out = None,
            _ => {}
        }
    }
}

/// The settings of a relay process.
///
/// Build it with [`Settings::load`] (or [`Settings::from_yaml_str`]) and hand
/// [`Settings::connection_parameters`] to a [`ConnectionFactory`].
///
/// [`ConnectionFactory`]: crate::amqp::ConnectionFactory
#[derive(Debug, Clone, Default)]
pub struct Settings {
    broker: BrokerSettings,
    /// Settings without a typed counterpart, keyed by their uppercased name.
    extensions: BTreeMap<String, Value>,
    host: Option<String>,
    host_pool: Vec<String>,
    heartbeat: Option<u16>,
    tls: Option<TlsParameters>,
}

impl Settings {
    /// Parse settings from a YAML document and derive the connection parameters.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SettingsError> {
        let mut settings = Self::default();
        settings.merge_yaml(yaml)?;
        settings.resolve()?;
        Ok(settings)
    }

    /// Read the YAML file at `path`, merge it on top of the current settings and derive
    /// the connection parameters.
    ///
    /// A missing file is not an error: the host falls back to `localhost` and the failure is
    /// logged. Any other I/O failure, or a malformed document, is returned to the caller.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.host = Some(DEFAULT_HOST.to_owned());
                self.host_pool = vec![DEFAULT_HOST.to_owned()];
                error!(
                    path = %path.display(),
                    "Could not find a configuration file at {}",
                    path.display()
                );
                return Ok(());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_owned(),
                    source,
                })
            }
        };
        self.merge_yaml(&content)?;
        self.resolve()
    }

    /// Merge a YAML document on top of the current settings, without deriving the
    /// connection parameters. Call [`Settings::resolve`] afterwards.
    pub fn merge_yaml(&mut self, yaml: &str) -> Result<(), SettingsError> {
        let mapping = match serde_yaml::from_str(yaml)? {
            Value::Mapping(mapping) => mapping,
            // An empty document
            Value::Null => Mapping::new(),
            _ => return Err(SettingsError::NotAMapping),
        };
        self.merge_mapping(mapping)
    }

    fn merge_mapping(&mut self, mapping: Mapping) -> Result<(), SettingsError> {
        let mut recognized = Mapping::new();
        let mut cleared = Vec::new();
        let mut extensions = BTreeMap::new();
        for (key, value) in mapping {
            let Value::String(key) = key else {
                warn!(?key, "Ignoring a setting whose name is not a string");
                continue;
            };
            let key = key.to_uppercase();
            if RECOGNIZED_KEYS.contains(&key.as_str()) {
                // Null means "unset": the transport default applies.
                if value.is_null() {
                    cleared.push(key);
                } else {
                    recognized.insert(Value::String(key), value);
                }
            } else {
                extensions.insert(key, value);
            }
        }
        if let Some(host) = recognized.remove(HOST_ALIAS) {
            if !recognized.contains_key(HOST_KEY) {
                recognized.insert(Value::String(HOST_KEY.to_owned()), host);
            }
        }
        // Nothing is applied unless the whole mapping is valid.
        let newer: BrokerSettings = serde_yaml::from_value(Value::Mapping(recognized))?;
        let mut broker = std::mem::take(&mut self.broker);
        for key in &cleared {
            broker.clear(key);
        }
        self.broker = broker.merge(newer);
        self.extensions.extend(extensions);
        Ok(())
    }

    /// Derive the connection fields from the merged settings.
    ///
    /// A host is picked uniformly at random from the host pool; the pool itself is kept
    /// around (see [`Settings::host_pool`]). Heartbeat defaults to 60 seconds. TLS parameters
    /// are only set if at least one TLS setting is present.
    pub fn resolve(&mut self) -> Result<(), SettingsError> {
        self.host_pool = parse_host_pool(self.broker.hosts.as_deref().unwrap_or(DEFAULT_HOST));
        self.host = self.host_pool.choose(&mut rand::thread_rng()).cloned();
        self.heartbeat = Some(self.broker.heartbeat.unwrap_or(DEFAULT_HEARTBEAT_SECONDS));

        let version = self
            .broker
            .ssl_version
            .as_deref()
            .map(str::parse::<TlsVersion>)
            .transpose()
            .map_err(|e| SettingsError::Invalid {
                key: "SSL_VERSION",
                message: e.to_string(),
            })?;
        let tls = TlsParameters {
            certificate_chain: self.broker.ssl_certificate_chain.clone(),
            private_key: self.broker.ssl_key.clone(),
            verify_peer: self.broker.verify_peer,
            version,
        };
        self.tls = (!tls.is_empty()).then_some(tls);
        Ok(())
    }

    /// Store a setting by name.
    ///
    /// Recognised names update the typed fields (call [`Settings::resolve`] to re-derive the
    /// connection parameters); a null value clears them. Any other name is stored verbatim,
    /// uppercased.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), SettingsError> {
        let mut mapping = Mapping::new();
        mapping.insert(Value::String(name.to_owned()), value.into());
        self.merge_mapping(mapping)
    }

    /// Retrieve a setting without a typed counterpart.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extensions.get(&name.to_uppercase())
    }

    /// Retrieve a string setting without a typed counterpart.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// The host selected for the connection.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Every candidate host, in the configured order.
    pub fn host_pool(&self) -> &[String] {
        &self.host_pool
    }

    /// The name of the input exchange, if configured.
    pub fn exchange_in(&self) -> Option<&str> {
        self.broker.exchange_in.as_deref()
    }

    /// The name of the output exchange, if configured.
    pub fn exchange_out(&self) -> Option<&str> {
        self.broker.exchange_out.as_deref()
    }

    /// The connection-parameter record. Unset fields stay `None`.
    pub fn connection_parameters(&self) -> ConnectionParameters {
        ConnectionParameters {
            host: self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            port: self.broker.port,
            vhost: self.broker.vhost.clone(),
            user: self.broker.user.clone(),
            password: self.broker.password.clone().map(Into::into),
            heartbeat: self.heartbeat,
            connection_timeout: self
                .broker
                .connection_timeout_seconds
                .map(Duration::from_secs),
            tls: self.tls.clone(),
        }
    }
}

/// Split a comma separated list of hosts, dropping blank entries.
fn parse_host_pool(hosts: &str) -> Vec<String> {
    let pool: Vec<String> = hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(ToOwned::to_owned)
        .collect();
    if pool.is_empty() {
        vec![DEFAULT_HOST.to_owned()]
    } else {
        pool
    }
}
