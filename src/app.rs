//! Core application runner (business logic) for `serial-mqtt-bridge`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically with an injected line source, publisher
//! and offline sink.

use crate::broker::{self, BrokerSettings};
use crate::duration::parse_duration;
use crate::frame::{Decoded, decode};
use crate::gateway::{ConnectionSignal, Delivery, Gateway, Publisher};
use crate::offline::{OfflineLog, OfflineSink};
use crate::router::{AuthorizationSet, DEFAULT_AUTHORIZED_TAGS, Namespace, route};
use crate::source::{Backend, DeviceSource, LineResult, LineSource, SourceError};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Channel buffer size for broker lifecycle signals.
pub const SIGNAL_CHANNEL_BUFFER_SIZE: usize = 16;

/// Configuration for the bridge. Every option can also come from the
/// environment (or a `.env` file).
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Serial device the sensor board is attached to
    #[arg(long, env = "SERIAL_PORT", default_value = "/dev/pts/0")]
    pub device: String,

    /// Serial baud rate
    #[arg(long, env = "BAUD_RATE", default_value_t = 9600)]
    pub baud_rate: u32,

    /// Where telemetry lines are read from
    #[arg(long, env = "BRIDGE_BACKEND", default_value_t, value_enum)]
    pub backend: Backend,

    /// Site name, first segment of every topic
    #[arg(long, env = "SEDE", default_value = "amerikeCDMX")]
    pub site: String,

    /// Floor name, second segment of every topic
    #[arg(long, env = "PISO", default_value = "P1")]
    pub floor: String,

    /// MQTT broker host
    #[arg(long, env = "MQTT_HOST", default_value = "127.0.0.1")]
    pub mqtt_host: String,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// MQTT username; credentials are only sent when this is set
    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    /// MQTT password
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// MQTT client identifier
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "serial-mqtt-bridge")]
    pub client_id: String,

    /// MQTT keep-alive interval (e.g. 30s, 1m)
    #[arg(long, env = "MQTT_KEEP_ALIVE", default_value = "30s", value_parser = parse_duration)]
    pub keep_alive: Duration,

    /// Pause before reconnecting after a broker error (e.g. 500ms, 5s)
    #[arg(long, env = "MQTT_RECONNECT_DELAY", default_value = "1s", value_parser = parse_duration)]
    pub reconnect_delay: Duration,

    /// RFID tags published on `rfid`; others go to `rfid/denegado`.
    /// Comma separated or repeated.
    #[arg(
        long = "authorized",
        env = "RFID_AUTHORIZED",
        value_delimiter = ',',
        default_values = DEFAULT_AUTHORIZED_TAGS,
        value_name = "TAG"
    )]
    pub authorized: Vec<String>,

    /// Directory for offline session logs
    #[arg(long, env = "OFFLINE_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Verbose output, log decode details and routine broker traffic
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn namespace(&self) -> Namespace {
        Namespace::new(&self.site, &self.floor)
    }

    pub fn authorization_set(&self) -> AuthorizationSet {
        AuthorizationSet::new(self.authorized.iter().map(|t| t.trim()))
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.client_id.clone(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            keep_alive: self.keep_alive,
            reconnect_delay: self.reconnect_delay,
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("Failed to create offline log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Decode, route and publish, one line at a time.
#[derive(Debug, Clone)]
pub struct Pipeline {
    namespace: Namespace,
    authorized: AuthorizationSet,
}

impl Pipeline {
    pub fn new(namespace: Namespace, authorized: AuthorizationSet) -> Self {
        Pipeline {
            namespace,
            authorized,
        }
    }

    pub fn from_options(options: &Options) -> Self {
        Pipeline::new(options.namespace(), options.authorization_set())
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Handle one line. Every intent is attempted, whatever happened to the
    /// previous one.
    pub fn handle_line<P, S>(&self, line: &str, gateway: &mut Gateway<P, S>) -> Vec<Delivery>
    where
        P: Publisher,
        S: OfflineSink,
    {
        info!(line, "received line");

        let decoded = decode(line);
        if let Decoded::Unstructured(_) = decoded {
            debug!("line is not a sensor frame, routing to catch-all topic");
        }

        route(&decoded, &self.namespace, &self.authorized)
            .iter()
            .map(|intent| gateway.publish(intent))
            .collect()
    }
}

/// Single consumer for both event sources.
///
/// Broker signals are applied as they arrive, taking priority over lines that
/// are ready at the same moment. Returns when the line source ends; a fatal
/// source error is returned as [`RunError::Source`].
pub async fn run_pipeline<P, S>(
    pipeline: &Pipeline,
    mut lines: mpsc::Receiver<LineResult>,
    mut signals: mpsc::Receiver<ConnectionSignal>,
    gateway: &mut Gateway<P, S>,
) -> Result<(), RunError>
where
    P: Publisher,
    S: OfflineSink,
{
    loop {
        tokio::select! {
            biased;
            Some(signal) = signals.recv() => gateway.on_signal(signal),
            line = lines.recv() => match line {
                Some(Ok(line)) => {
                    pipeline.handle_line(&line, gateway);
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    info!("line source closed");
                    return Ok(());
                }
            },
        }
    }
}

/// Open `source` and run the pipeline against an already built gateway.
pub async fn run_with_source<P, S>(
    options: &Options,
    source: &dyn LineSource,
    signals: mpsc::Receiver<ConnectionSignal>,
    gateway: &mut Gateway<P, S>,
) -> Result<(), RunError>
where
    P: Publisher,
    S: OfflineSink,
{
    let pipeline = Pipeline::from_options(options);
    let lines = source.open(options.backend).await?;
    run_pipeline(&pipeline, lines, signals, gateway).await
}

/// Wire the real device, broker and offline log together and run until the
/// device stream ends.
pub async fn run(options: Options) -> Result<(), RunError> {
    std::fs::create_dir_all(&options.log_dir).map_err(|source| RunError::LogDir {
        path: options.log_dir.clone(),
        source,
    })?;

    let settings = options.broker_settings();
    let (publisher, eventloop) = broker::connect(&settings);
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_BUFFER_SIZE);
    let events = broker::spawn_event_loop(eventloop, settings.reconnect_delay, signal_tx);

    let mut gateway = Gateway::new(publisher, OfflineLog::new(&options.log_dir));
    let source = DeviceSource {
        device: options.device.clone(),
        baud_rate: options.baud_rate,
    };

    info!(
        namespace = %options.namespace(),
        backend = %options.backend,
        device = %options.device,
        broker = %format!("{}:{}", settings.host, settings.port),
        "starting bridge"
    );

    let result = run_with_source(&options, &source, signal_rx, &mut gateway).await;
    events.abort();
    result
}
