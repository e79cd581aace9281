//! Sensor frame decoding.
//!
//! The device emits one comma-separated record per line:
//!
//! ```text
//! sonic,photoresistor,temperature,humidity,led_state,led_binary_pattern,buzzer_state,rfid_tag
//! ```
//!
//! Decoding is purely structural. Field contents are carried as text and never
//! validated, so `abc,,,,,,,x` is as much a frame as a real reading.

/// Number of positional fields in a sensor record.
pub const FRAME_FIELD_COUNT: usize = 8;

/// One decoded line of sensor telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorFrame {
    /// Ultrasonic distance reading
    pub sonic: String,
    /// Photoresistor (light level) reading
    pub photoresistor: String,
    /// Temperature reading
    pub temperature: String,
    /// Relative humidity reading
    pub humidity: String,
    /// State of the single indicator LED
    pub led_state: String,
    /// Bit pattern of the LED bar, e.g. `0101`
    pub led_binary_pattern: String,
    /// Buzzer on/off state
    pub buzzer_state: String,
    /// Last RFID tag presented to the reader
    pub rfid_tag: String,
}

/// A line that did not have the shape of a sensor record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnstructuredMessage {
    /// The trimmed line, verbatim
    pub text: String,
}

/// Result of decoding one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(SensorFrame),
    Unstructured(UnstructuredMessage),
}

/// Decode a raw line into a [`SensorFrame`] or an [`UnstructuredMessage`].
///
/// Surrounding whitespace is trimmed first. Lines with at least
/// [`FRAME_FIELD_COUNT`] comma-separated fields map positionally onto a frame;
/// anything past the eighth field is ignored. Everything else is returned as
/// unstructured text.
///
/// # Example
/// ```
/// use serial_mqtt_bridge::frame::{Decoded, decode};
///
/// match decode("12,34,22.5,55,1,0101,0,12345\n") {
///     Decoded::Frame(frame) => assert_eq!(frame.rfid_tag, "12345"),
///     Decoded::Unstructured(_) => unreachable!(),
/// }
/// ```
pub fn decode(raw: &str) -> Decoded {
    let line = raw.trim();
    let fields: Vec<&str> = line.splitn(FRAME_FIELD_COUNT + 1, ',').collect();

    match fields.as_slice() {
        [
            sonic,
            photoresistor,
            temperature,
            humidity,
            led_state,
            led_binary_pattern,
            buzzer_state,
            rfid_tag,
            ..,
        ] => Decoded::Frame(SensorFrame {
            sonic: (*sonic).to_owned(),
            photoresistor: (*photoresistor).to_owned(),
            temperature: (*temperature).to_owned(),
            humidity: (*humidity).to_owned(),
            led_state: (*led_state).to_owned(),
            led_binary_pattern: (*led_binary_pattern).to_owned(),
            buzzer_state: (*buzzer_state).to_owned(),
            rfid_tag: (*rfid_tag).to_owned(),
        }),
        _ => Decoded::Unstructured(UnstructuredMessage {
            text: line.to_owned(),
        }),
    }
}
