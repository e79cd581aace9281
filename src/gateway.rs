//! Publish gateway: broker delivery with offline fallback.
//!
//! The gateway is the single owner of the connection state and of the offline
//! session. Broker lifecycle signals and publish requests both arrive through
//! `&mut self`, so the pipeline that owns the gateway serializes them.

use crate::offline::OfflineSink;
use crate::router::PublishIntent;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Error returned by a [`Publisher`] that could not accept a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Broker client rejected publish: {0}")]
    Rejected(String),
}

/// Broker side of the gateway.
///
/// Publishing is fire-and-forget: implementations hand the message to the
/// client and return without waiting for any acknowledgment.
pub trait Publisher: Send {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}

/// Broker connection state as last reported by the connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Connected,
    #[default]
    Disconnected,
}

/// Lifecycle signal emitted by the broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    Connected,
    Disconnected { reason: String },
}

/// What happened to a single intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the broker client
    Published,
    /// Written to the offline log
    Buffered,
    /// Lost: broker client refused it, or the offline log could not be written
    Dropped,
}

/// Format the offline record for `intent`: `{timestamp} | {payload} → {topic}`.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use serial_mqtt_bridge::gateway::offline_record;
/// use serial_mqtt_bridge::router::PublishIntent;
///
/// let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
/// let intent = PublishIntent::new("siteA/P1/temp", "TEMP:22.5");
/// assert_eq!(
///     offline_record(at, &intent),
///     "2024-05-01T12:30:00.000Z | TEMP:22.5 → siteA/P1/temp"
/// );
/// ```
pub fn offline_record(at: DateTime<Utc>, intent: &PublishIntent) -> String {
    format!(
        "{} | {} → {}",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        intent.payload,
        intent.topic
    )
}

/// Routes intents to the broker while connected and to the offline sink
/// otherwise.
///
/// Starts disconnected; only [`ConnectionSignal`]s move it between states.
#[derive(Debug)]
pub struct Gateway<P, S> {
    publisher: P,
    sink: S,
    state: ConnectionState,
    /// The current outage has already been logged at `warn`
    outage_reported: bool,
}

impl<P: Publisher, S: OfflineSink> Gateway<P, S> {
    pub fn new(publisher: P, sink: S) -> Self {
        Gateway {
            publisher,
            sink,
            state: ConnectionState::Disconnected,
            outage_reported: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Apply a broker lifecycle signal.
    ///
    /// `Connected` closes any open offline session so the next outage starts
    /// a new one. `Disconnected` leaves an open session alone. Only the first
    /// failure of an outage is logged at `warn`; repeated reconnect failures
    /// go to `debug`.
    pub fn on_signal(&mut self, signal: ConnectionSignal) {
        match signal {
            ConnectionSignal::Connected => {
                info!("connected to MQTT broker");
                self.state = ConnectionState::Connected;
                self.outage_reported = false;
                self.sink.close();
            }
            ConnectionSignal::Disconnected { reason } => {
                if self.state == ConnectionState::Connected {
                    warn!(%reason, "lost MQTT broker connection, buffering offline");
                } else if !self.outage_reported {
                    warn!(%reason, "MQTT broker unreachable, buffering offline");
                } else {
                    debug!(%reason, "MQTT broker still unreachable");
                }
                self.outage_reported = true;
                self.state = ConnectionState::Disconnected;
            }
        }
    }

    /// Deliver one intent. Never fails; the outcome is logged and returned.
    pub fn publish(&mut self, intent: &PublishIntent) -> Delivery {
        match self.state {
            ConnectionState::Connected => self.publish_to_broker(intent),
            ConnectionState::Disconnected => self.buffer_offline(intent),
        }
    }

    fn publish_to_broker(&mut self, intent: &PublishIntent) -> Delivery {
        match self.publisher.publish(&intent.topic, &intent.payload) {
            Ok(()) => {
                info!(topic = %intent.topic, payload = %intent.payload, "published");
                Delivery::Published
            }
            Err(e) => {
                warn!(topic = %intent.topic, error = %e, "publish failed, message dropped");
                Delivery::Dropped
            }
        }
    }

    fn buffer_offline(&mut self, intent: &PublishIntent) -> Delivery {
        let record = offline_record(Utc::now(), intent);

        if let Err(first) = self.sink.append(&record) {
            // One retry in a fresh session before giving up on this message.
            warn!(error = %first, "offline append failed, retrying in a new session");
            self.sink.close();
            if let Err(second) = self.sink.append(&record) {
                error!(
                    topic = %intent.topic,
                    error = %second,
                    "offline append failed twice, message dropped"
                );
                self.sink.close();
                return Delivery::Dropped;
            }
        }

        info!(topic = %intent.topic, payload = %intent.payload, "buffered offline");
        Delivery::Buffered
    }
}
