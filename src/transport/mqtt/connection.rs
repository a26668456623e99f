//! Pure option mapping for the rumqttc adapter
//!
//! Turns the validated broker configuration into `rumqttc::MqttOptions`.

use crate::config::{BrokerConfig, Qos};
use crate::transport::TransportError;
use rumqttc::{MqttOptions, QoS};
use std::time::Duration;
use url::Url;

/// Default MQTT port when the URL carries none
const DEFAULT_MQTT_PORT: u16 = 1883;

/// rumqttc rejects keep-alive intervals between zero and one second
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(1);

/// Configure MQTT options for `url` using the broker's client options
pub fn configure_mqtt_options(url: &str, broker: &BrokerConfig) -> Result<MqttOptions, TransportError> {
    let parsed = Url::parse(url).map_err(|_| TransportError::InvalidUrl(url.to_string()))?;

    if parsed.scheme() != "mqtt" {
        return Err(TransportError::InvalidUrl(url.to_string()));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;
    let port = parsed.port().unwrap_or(DEFAULT_MQTT_PORT);

    let options = &broker.options;
    let mut mqtt_options = MqttOptions::new(options.client_id.clone(), host, port);
    mqtt_options.set_clean_session(options.clean);
    mqtt_options.set_keep_alive(keep_alive(options.keep_alive()));

    if let Some(credentials) = &options.credentials {
        mqtt_options.set_credentials(credentials.username.clone(), credentials.password.clone());
    }

    Ok(mqtt_options)
}

fn keep_alive(requested: Duration) -> Duration {
    if requested.is_zero() {
        requested
    } else {
        requested.max(MIN_KEEP_ALIVE)
    }
}

/// rumqttc takes the connection timeout in whole seconds
pub fn connection_timeout_secs(connect_timeout: Duration) -> u64 {
    let millis = connect_timeout.as_millis() as u64;
    millis.div_ceil(1000).max(1)
}

pub fn to_rumqttc_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}
