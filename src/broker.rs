//! MQTT broker connection.
//!
//! Wraps a `rumqttc` client. Publishing goes through [`MqttPublisher`]; the
//! event loop runs on its own task and reports connection lifecycle changes
//! as [`ConnectionSignal`]s for the gateway to apply.

use crate::gateway::{ConnectionSignal, PublishError, Publisher};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Capacity of the client request channel.
pub const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// Connection parameters for the broker.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Pause after a connection error before the event loop reconnects
    pub reconnect_delay: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        BrokerSettings {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "serial-mqtt-bridge".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

impl BrokerSettings {
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        // rumqttc rejects sub-second keep-alives other than zero.
        let keep_alive = if self.keep_alive.is_zero() {
            Duration::ZERO
        } else {
            self.keep_alive.max(Duration::from_secs(1))
        };
        options.set_keep_alive(keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

/// [`Publisher`] backed by a `rumqttc` client.
///
/// Uses `try_publish` at QoS 0, so a publish never waits on the network.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| PublishError::Rejected(e.to_string()))
    }
}

/// Create the client. Nothing touches the network until the event loop is polled.
pub fn connect(settings: &BrokerSettings) -> (MqttPublisher, EventLoop) {
    let (client, eventloop) = AsyncClient::new(settings.mqtt_options(), REQUEST_CHANNEL_CAPACITY);
    (MqttPublisher { client }, eventloop)
}

/// Map one event loop poll result onto a lifecycle signal, if it is one.
pub fn signal_for(event: &Result<Event, ConnectionError>) -> Option<ConnectionSignal> {
    match event {
        Ok(Event::Incoming(Packet::ConnAck(ack))) if ack.code == ConnectReturnCode::Success => {
            Some(ConnectionSignal::Connected)
        }
        Ok(Event::Incoming(Packet::ConnAck(ack))) => Some(ConnectionSignal::Disconnected {
            reason: format!("connection refused: {:?}", ack.code),
        }),
        Ok(Event::Incoming(Packet::Disconnect)) => Some(ConnectionSignal::Disconnected {
            reason: "broker closed the session".to_string(),
        }),
        Ok(_) => None,
        Err(e) => Some(ConnectionSignal::Disconnected {
            reason: e.to_string(),
        }),
    }
}

/// Drive the event loop on a background task, forwarding lifecycle signals.
///
/// After an error the task waits `reconnect_delay`; the next poll reconnects.
/// The task ends once `signals` is dropped.
pub fn spawn_event_loop(
    mut eventloop: EventLoop,
    reconnect_delay: Duration,
    signals: mpsc::Sender<ConnectionSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(?reconnect_delay, "starting MQTT event loop");
        loop {
            let event = eventloop.poll().await;
            let failed = event.is_err();

            if let Some(signal) = signal_for(&event)
                && signals.send(signal).await.is_err()
            {
                debug!("signal receiver dropped, stopping MQTT event loop");
                break;
            }

            if failed {
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    })
}
