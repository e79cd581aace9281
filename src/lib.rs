//! `serial-mqtt-bridge` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The core “business logic” lives in [`crate::app`] where it
//! can be tested deterministically with an injected line source, publisher and
//! offline sink.

pub mod app;
pub mod broker;
pub mod duration;
pub mod frame;
pub mod gateway;
pub mod offline;
pub mod router;
pub mod source;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use app::{Options, Pipeline, RunError};
pub use duration::parse_duration;
pub use frame::{Decoded, SensorFrame, UnstructuredMessage, decode};
pub use gateway::{ConnectionSignal, ConnectionState, Delivery, Gateway, PublishError, Publisher};
pub use offline::{OfflineLog, OfflineSink};
pub use router::{AuthorizationSet, Namespace, PublishIntent, route};
pub use source::{Backend, LineFramer, LineResult, LineSource, SourceError};
