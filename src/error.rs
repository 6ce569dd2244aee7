use std::path::PathBuf;

use derive_more::From;
use thiserror::Error;

use crate::protocol::{EndpointId, endpoint_metadata};

/// Errors returned by the radio and serial transports.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("failed to open serial port `{path}`")]
    SerialOpen {
        path: String,
        source: tokio_serial::Error,
    },
    #[error("serial I/O failed")]
    SerialIo(#[from] std::io::Error),
    #[error("serial port `{path}` is already closed")]
    SerialClosed { path: String },
    #[error("session `{session}` has no open serial port")]
    SerialNotOpen { session: String },
    #[error("no peripheral is connected")]
    NotConnected,
    #[error("peripheral `{id}` is not known to the radio")]
    UnknownPeripheral { id: String },
    #[error(
        "required endpoint `{name}` ({uuid}) was not found on the connected device",
        name = endpoint_metadata(*endpoint).name(),
        uuid = endpoint_metadata(*endpoint).uuid()
    )]
    MissingEndpoint { endpoint: EndpointId },
    #[error("invalid service UUID `{value}` in scan filter")]
    InvalidServiceUuid { value: String },
    #[error("timed out after {elapsed_ms} ms while {operation}")]
    TimedOut {
        operation: &'static str,
        elapsed_ms: u128,
    },
    #[error("serial port `{path}` is not wired in the simulated rig")]
    UnknownSimulatedPort { path: String },
}

/// Errors raised while building wire frames.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum EncodingError {
    #[error("control-point arguments are {len} bytes, the limit is {max}")]
    PayloadTooLong { len: usize, max: usize },
    #[error("`{operation}` has no {channel} form")]
    UnsupportedOnChannel {
        operation: String,
        channel: &'static str,
    },
    #[error("invalid argument for `{operation}`: {reason}")]
    InvalidArgument { operation: String, reason: String },
}

/// Errors raised while decoding wire frames.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum DecodingError {
    #[error("control-point frame was empty")]
    EmptyFrame,
    #[error("AT reply `{line}` is not valid hexadecimal")]
    InvalidHexReply { line: String },
}

/// A second expectation was armed while one was still outstanding.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("cannot arm `{requested}` while `{outstanding}` is still awaiting its reply")]
pub struct ProtocolViolation {
    pub(crate) outstanding: String,
    pub(crate) requested: String,
}

/// Errors returned while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{}`", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse `{}`", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("configuration key `{key}` is required for this run")]
    MissingKey { key: &'static str },
    #[error("no pin map exists for hardware variant `{variant}`")]
    MissingPinMap { variant: String },
    #[error("unknown scenario `{name}`")]
    UnknownScenario { name: String },
    #[error("unknown test group `{name}`")]
    UnknownGroup { name: String },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Errors returned when writing reports.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report `{}`", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to format report timestamp")]
    Timestamp(#[from] time::error::Format),
}

/// Top-level harness errors wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum HarnessError {
    #[error(transparent)]
    #[from(TransportError, Box<TransportError>)]
    Transport(Box<TransportError>),
    #[error(transparent)]
    #[from(EncodingError, Box<EncodingError>)]
    Encoding(Box<EncodingError>),
    #[error(transparent)]
    #[from(DecodingError, Box<DecodingError>)]
    Decoding(Box<DecodingError>),
    #[error(transparent)]
    #[from(ProtocolViolation, Box<ProtocolViolation>)]
    ProtocolViolation(Box<ProtocolViolation>),
    #[error(transparent)]
    #[from(ConfigError, Box<ConfigError>)]
    Config(Box<ConfigError>),
    #[error(transparent)]
    #[from(ReportError, Box<ReportError>)]
    Report(Box<ReportError>),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn module_errors_convert_into_harness_errors() {
        let error: HarnessError = ConfigError::UnknownGroup {
            name: "power".to_string(),
        }
        .into();

        assert_matches!(&error, HarnessError::Config(config) if matches!(**config, ConfigError::UnknownGroup { .. }));
        assert_eq!("unknown test group `power`", error.to_string());
    }
}
