//! Topic routing for decoded lines.
//!
//! Every sensor frame fans out to three topics under the deployment
//! namespace; unstructured lines go to a single catch-all topic.

use crate::frame::{Decoded, SensorFrame};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Topic suffix for temperature readings.
pub const TOPIC_TEMPERATURE: &str = "temp";
/// Topic suffix for humidity readings.
pub const TOPIC_HUMIDITY: &str = "hum";
/// Topic suffix for authorized RFID tags.
pub const TOPIC_RFID: &str = "rfid";
/// Topic suffix for RFID tags outside the authorization set.
pub const TOPIC_RFID_DENIED: &str = "rfid/denegado";
/// Catch-all topic suffix for lines that are not sensor frames.
pub const TOPIC_OTHER: &str = "otros";

/// Tags accepted when no authorization list is configured.
pub const DEFAULT_AUTHORIZED_TAGS: [&str; 2] = ["12345", "67890"];

/// The `{site}/{floor}` prefix that scopes every topic of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(site: &str, floor: &str) -> Self {
        Namespace(format!("{site}/{floor}"))
    }

    /// Join `suffix` onto the namespace.
    ///
    /// ```
    /// use serial_mqtt_bridge::router::Namespace;
    ///
    /// let ns = Namespace::new("siteA", "P1");
    /// assert_eq!(ns.topic("rfid/denegado"), "siteA/P1/rfid/denegado");
    /// ```
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{suffix}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed set of RFID tags allowed through to the `rfid` topic.
///
/// Membership is exact and case-sensitive. The set is built once at startup
/// and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationSet {
    tags: BTreeSet<String>,
}

impl AuthorizationSet {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AuthorizationSet {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl Default for AuthorizationSet {
    fn default() -> Self {
        AuthorizationSet::new(DEFAULT_AUTHORIZED_TAGS)
    }
}

/// A message ready to be handed to the publish gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishIntent {
    pub topic: String,
    pub payload: String,
}

impl PublishIntent {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        PublishIntent {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Map a decoded line onto the intents to publish, in publish order.
///
/// Frames always yield exactly three intents (temperature, humidity, RFID);
/// unstructured lines yield one intent carrying the raw text.
pub fn route(decoded: &Decoded, ns: &Namespace, auth: &AuthorizationSet) -> Vec<PublishIntent> {
    match decoded {
        Decoded::Frame(frame) => route_frame(frame, ns, auth),
        Decoded::Unstructured(message) => {
            vec![PublishIntent::new(ns.topic(TOPIC_OTHER), message.text.as_str())]
        }
    }
}

fn route_frame(frame: &SensorFrame, ns: &Namespace, auth: &AuthorizationSet) -> Vec<PublishIntent> {
    // Remaining fields are decoded for visibility only; nothing subscribes to them.
    debug!(
        sonic = %frame.sonic,
        photoresistor = %frame.photoresistor,
        led_state = %frame.led_state,
        led_binary_pattern = %frame.led_binary_pattern,
        buzzer_state = %frame.buzzer_state,
        "unrouted frame fields"
    );

    let rfid_topic = if auth.contains(&frame.rfid_tag) {
        TOPIC_RFID
    } else {
        TOPIC_RFID_DENIED
    };

    vec![
        PublishIntent::new(
            ns.topic(TOPIC_TEMPERATURE),
            format!("TEMP:{}", frame.temperature),
        ),
        PublishIntent::new(ns.topic(TOPIC_HUMIDITY), format!("HUM:{}", frame.humidity)),
        PublishIntent::new(ns.topic(rfid_topic), format!("RFID:{}", frame.rfid_tag)),
    ]
}
