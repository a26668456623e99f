//! Console configuration model and loading
//!
//! A configuration document pairs one broker description with a list of
//! topic bindings ("items"). Validation is all-or-nothing: a document with any
//! missing or malformed field is rejected as a whole and nothing from it is kept.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Validated console configuration: broker parameters plus topic bindings
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleConfig {
    pub broker: BrokerConfig,
    pub items: Vec<TopicItem>,
}

/// Broker connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub options: BrokerOptions,
}

/// Client options passed through to the broker client
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerOptions {
    pub client_id: String,
    pub clean: bool,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
    pub reconnect_period_ms: u64,
    pub credentials: Option<Credentials>,
}

#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// MQTT quality-of-service level, passed through opaquely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(format!("qos must be 0, 1 or 2, got {other}")),
        }
    }
}

/// What an item does when triggered. Fixed at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Publishes `message` on every trigger
    Publisher { message: String },
    /// Toggles a subscription on successive triggers
    Subscriber,
}

/// One topic binding from the configuration document
#[derive(Debug, Clone, PartialEq)]
pub struct TopicItem {
    /// Position in the document's item list, the correlation key for UI slots
    pub index: usize,
    pub name: String,
    pub topic: String,
    pub qos: Qos,
    pub binding: Binding,
}

impl TopicItem {
    pub fn is_publisher(&self) -> bool {
        matches!(self.binding, Binding::Publisher { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match &self.binding {
            Binding::Publisher { message } => Some(message),
            Binding::Subscriber => None,
        }
    }
}

impl BrokerConfig {
    /// Broker URL handed to the client: `mqtt://{host}:{port}`
    pub fn url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }

    /// Human-readable broker description shown while connected
    pub fn summary(&self) -> String {
        format!(
            "{}\nclientId {}\nkeepalive {}\nreconnect {}\nconnectTimeout {}",
            self.url(),
            self.options.client_id,
            self.options.keep_alive_secs,
            self.options.reconnect_period_ms,
            self.options.connect_timeout_ms
        )
    }
}

impl BrokerOptions {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }
}

fn default_client_id() -> String {
    format!("mqtt-console-{}", uuid::Uuid::new_v4().simple())
}

fn default_clean() -> bool {
    true
}

fn default_keepalive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30_000
}

fn default_reconnect_period() -> u64 {
    1_000
}

/// Wire shape of `mqtt_broker.options`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOptions {
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_clean")]
    clean: bool,
    #[serde(default = "default_keepalive", rename = "keepalive")]
    keep_alive: u64,
    #[serde(default = "default_connect_timeout")]
    connect_timeout: u64,
    #[serde(default = "default_reconnect_period")]
    reconnect_period: u64,
    username: Option<String>,
    password: Option<String>,
}

/// Where a faulty field was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLocation {
    Document,
    Broker,
    Options,
    Item(usize),
}

impl fmt::Display for FieldLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldLocation::Document => write!(f, "document"),
            FieldLocation::Broker => write!(f, "mqtt_broker"),
            FieldLocation::Options => write!(f, "mqtt_broker.options"),
            FieldLocation::Item(index) => write!(f, "item {index}"),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to fetch config from {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Missing field '{field}' in {location}")]
    MissingField {
        field: &'static str,
        location: FieldLocation,
    },
    #[error("Invalid field '{field}' in {location}: {reason}")]
    InvalidField {
        field: &'static str,
        location: FieldLocation,
        reason: String,
    },
}

impl ConfigError {
    fn missing(field: &'static str, location: FieldLocation) -> Self {
        Self::MissingField { field, location }
    }

    fn invalid<S: Into<String>>(field: &'static str, location: FieldLocation, reason: S) -> Self {
        Self::InvalidField {
            field,
            location,
            reason: reason.into(),
        }
    }
}

/// Validate a parsed JSON document into a [`ConsoleConfig`]
///
/// Items receive `index` equal to their position in the list.
pub fn validate(doc: &Value) -> Result<ConsoleConfig, ConfigError> {
    let root = doc
        .as_object()
        .ok_or_else(|| ConfigError::invalid("document", FieldLocation::Document, "not an object"))?;

    let broker = validate_broker(require(root, "mqtt_broker", FieldLocation::Document)?)?;

    let raw_items = require(root, "items", FieldLocation::Document)?
        .as_array()
        .ok_or_else(|| ConfigError::invalid("items", FieldLocation::Document, "not an array"))?;

    let items = raw_items
        .iter()
        .enumerate()
        .map(|(index, raw)| validate_item(index, raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ConsoleConfig { broker, items })
}

impl ConsoleConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let doc: Value = serde_json::from_str(content)?;
        validate(&doc)
    }

    /// Load and validate a local JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Fetch and validate a JSON document over HTTP
    pub async fn load_from_url(url: &str) -> Result<Self, ConfigError> {
        let fetch_error = |reason: String| ConfigError::Fetch {
            url: url.to_string(),
            reason,
        };

        let response = reqwest::get(url)
            .await
            .map_err(|e| fetch_error(e.to_string()))?
            .error_for_status()
            .map_err(|e| fetch_error(e.to_string()))?;
        let content = response
            .text()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        Self::from_json_str(&content)
    }
}

fn require<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
    location: FieldLocation,
) -> Result<&'a Value, ConfigError> {
    match object.get(field) {
        Some(Value::Null) | None => Err(ConfigError::missing(field, location)),
        Some(value) => Ok(value),
    }
}

fn require_str(
    object: &Map<String, Value>,
    field: &'static str,
    location: FieldLocation,
) -> Result<String, ConfigError> {
    require(object, field, location)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::invalid(field, location, "expected a string"))
}

fn validate_broker(value: &Value) -> Result<BrokerConfig, ConfigError> {
    let location = FieldLocation::Broker;
    let broker = value
        .as_object()
        .ok_or_else(|| ConfigError::invalid("mqtt_broker", FieldLocation::Document, "not an object"))?;

    let host = require_str(broker, "host", location)?;
    if host.trim().is_empty() {
        return Err(ConfigError::invalid("host", location, "must not be empty"));
    }

    let port = require(broker, "port", location)?
        .as_u64()
        .filter(|port| (1..=u64::from(u16::MAX)).contains(port))
        .ok_or_else(|| ConfigError::invalid("port", location, "expected an integer in 1..=65535"))?;

    let raw_options = require(broker, "options", location)?;
    if !raw_options.is_object() {
        return Err(ConfigError::invalid("options", location, "not an object"));
    }
    let raw: RawOptions = serde_json::from_value(raw_options.clone())
        .map_err(|e| ConfigError::invalid("options", FieldLocation::Options, e.to_string()))?;

    let credentials = raw.username.map(|username| Credentials {
        username,
        password: raw.password.unwrap_or_default(),
    });

    Ok(BrokerConfig {
        host,
        port: port as u16,
        options: BrokerOptions {
            client_id: raw.client_id,
            clean: raw.clean,
            keep_alive_secs: raw.keep_alive,
            connect_timeout_ms: raw.connect_timeout,
            reconnect_period_ms: raw.reconnect_period,
            credentials,
        },
    })
}

fn validate_item(index: usize, value: &Value) -> Result<TopicItem, ConfigError> {
    let location = FieldLocation::Item(index);
    let item = value
        .as_object()
        .ok_or_else(|| ConfigError::invalid("item", location, "not an object"))?;

    let topic = require_str(item, "topic", location)?;
    if topic.is_empty() {
        return Err(ConfigError::invalid("topic", location, "must not be empty"));
    }
    let name = require_str(item, "name", location)?;

    let qos = require(item, "qos", location)?
        .as_u64()
        .and_then(|raw| u8::try_from(raw).ok())
        .ok_or_else(|| ConfigError::invalid("qos", location, "expected 0, 1 or 2"))
        .and_then(|raw| Qos::try_from(raw).map_err(|e| ConfigError::invalid("qos", location, e)))?;

    let binding = match item.get("message") {
        None | Some(Value::Null) => Binding::Subscriber,
        Some(Value::String(message)) if message.is_empty() => Binding::Subscriber,
        Some(Value::String(message)) => Binding::Publisher {
            message: message.clone(),
        },
        Some(_) => return Err(ConfigError::invalid("message", location, "expected a string")),
    };

    Ok(TopicItem {
        index,
        name,
        topic,
        qos,
        binding,
    })
}

/// Where a configuration document comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Url(String),
}

impl ConfigSource {
    /// `http://` and `https://` locations are fetched, everything else is a local path
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            ConfigSource::Url(location.to_string())
        } else {
            ConfigSource::File(PathBuf::from(location))
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Url(url) => write!(f, "{url}"),
        }
    }
}

/// Load a configuration from `source`, turning failures into the reason
/// string shown to the operator
pub async fn load_config(source: &ConfigSource) -> Result<ConsoleConfig, String> {
    debug!("Loading configuration from {}", source);

    let result = match source {
        ConfigSource::File(path) => ConsoleConfig::load_from_file(path),
        ConfigSource::Url(url) => ConsoleConfig::load_from_url(url).await,
    };

    match result {
        Ok(config) => {
            info!(
                "Loaded configuration from {} ({} items)",
                source,
                config.items.len()
            );
            Ok(config)
        }
        Err(e @ (ConfigError::FileRead(_) | ConfigError::Fetch { .. })) => {
            Err(format!("Load failed: {source}: {e}"))
        }
        Err(e) => Err(format!("Wrong format: {source}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_doc() -> Value {
        json!({
            "mqtt_broker": {
                "host": "localhost",
                "port": 9001,
                "options": {
                    "clientId": "c1",
                    "clean": true,
                    "keepalive": 60,
                    "connectTimeout": 4000,
                    "reconnectPeriod": 1000
                }
            },
            "items": [
                {"name": "Temp", "topic": "room/temp", "qos": 0},
                {"name": "SetAC", "topic": "room/ac", "qos": 1, "message": "cool"}
            ]
        })
    }

    #[test]
    fn test_sample_document_loads() {
        let config = validate(&sample_doc()).unwrap();

        assert_eq!(config.broker.url(), "mqtt://localhost:9001");
        assert_eq!(config.broker.options.client_id, "c1");
        assert_eq!(config.broker.options.connect_timeout_ms, 4000);
        assert_eq!(config.items.len(), 2);
        assert_eq!(config.items[0].index, 0);
        assert_eq!(config.items[0].binding, Binding::Subscriber);
        assert_eq!(config.items[1].index, 1);
        assert_eq!(config.items[1].message(), Some("cool"));
        assert_eq!(config.items[1].qos, Qos::AtLeastOnce);
    }

    #[test]
    fn test_option_defaults() {
        let mut doc = sample_doc();
        doc["mqtt_broker"]["options"] = json!({});

        let config = validate(&doc).unwrap();
        let options = config.broker.options;
        assert!(options.client_id.starts_with("mqtt-console-"));
        assert!(options.clean);
        assert_eq!(options.keep_alive_secs, 60);
        assert_eq!(options.connect_timeout_ms, 30_000);
        assert_eq!(options.reconnect_period_ms, 1_000);
        assert!(options.credentials.is_none());
    }

    #[test]
    fn test_credentials_from_options() {
        let mut doc = sample_doc();
        doc["mqtt_broker"]["options"]["username"] = json!("emqx");
        doc["mqtt_broker"]["options"]["password"] = json!("public");

        let config = validate(&doc).unwrap();
        let credentials = config.broker.options.credentials.unwrap();
        assert_eq!(credentials.username, "emqx");
        assert_eq!(credentials.password, "public");
        assert!(!format!("{credentials:?}").contains("public"));
    }

    #[test]
    fn test_missing_broker_fields() {
        for field in ["host", "port", "options"] {
            let mut doc = sample_doc();
            doc["mqtt_broker"].as_object_mut().unwrap().remove(field);

            match validate(&doc) {
                Err(ConfigError::MissingField { field: f, location }) => {
                    assert_eq!(f, field);
                    assert_eq!(location, FieldLocation::Broker);
                }
                other => panic!("expected missing {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_missing_item_field_names_item_index() {
        let mut doc = sample_doc();
        doc["items"][1].as_object_mut().unwrap().remove("qos");

        let err = validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField {
                field: "qos",
                location: FieldLocation::Item(1)
            }
        ));
        assert_eq!(err.to_string(), "Missing field 'qos' in item 1");
    }

    #[test]
    fn test_invalid_qos_and_port() {
        let mut doc = sample_doc();
        doc["items"][0]["qos"] = json!(3);
        assert!(matches!(
            validate(&doc),
            Err(ConfigError::InvalidField { field: "qos", .. })
        ));

        let mut doc = sample_doc();
        doc["mqtt_broker"]["port"] = json!(70000);
        assert!(matches!(
            validate(&doc),
            Err(ConfigError::InvalidField { field: "port", .. })
        ));
    }

    #[test]
    fn test_empty_message_is_subscriber() {
        let mut doc = sample_doc();
        doc["items"][1]["message"] = json!("");

        let config = validate(&doc).unwrap();
        assert!(!config.items[1].is_publisher());
    }

    #[test]
    fn test_broker_summary() {
        let config = validate(&sample_doc()).unwrap();
        let summary = config.broker.summary();
        assert!(summary.starts_with("mqtt://localhost:9001\n"));
        assert!(summary.contains("clientId c1"));
        assert!(summary.contains("reconnect 1000"));
    }

    #[test]
    fn test_config_source_parse() {
        assert_eq!(
            ConfigSource::parse("http://example.com/ui_setup.json"),
            ConfigSource::Url("http://example.com/ui_setup.json".to_string())
        );
        assert_eq!(
            ConfigSource::parse("./assets/ui_setup.json"),
            ConfigSource::File(PathBuf::from("./assets/ui_setup.json"))
        );
    }
}
