//! Serial port backend.
//!
//! Opens the device through `tokio-serial` (8N1, no flow control) and frames
//! its output with [`spawn_line_reader`](super::spawn_line_reader). Virtual
//! ports such as `/dev/pts/N` from `socat` work the same as USB adapters.

use super::{LineResult, SourceError, spawn_line_reader};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tracing::info;

/// Open `device` at `baud_rate` and start framing lines from it.
pub fn open(device: &str, baud_rate: u32) -> Result<mpsc::Receiver<LineResult>, SourceError> {
    let port = tokio_serial::new(device, baud_rate)
        .open_native_async()
        .map_err(|e| SourceError::Open {
            device: device.to_string(),
            source: e.into(),
        })?;

    info!(device, baud_rate, "opened serial device");
    Ok(spawn_line_reader(port))
}
