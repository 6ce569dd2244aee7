use async_trait::async_trait;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, StopBits};
use tracing::{info, instrument, warn};

use super::serial::{SerialConfig, SerialPortHandle, SerialTransport};
use crate::error::TransportError;

/// Serial ports backed by `tokio-serial`.
#[derive(Debug, Default)]
pub(crate) struct TokioSerialTransport;

#[async_trait]
impl SerialTransport for TokioSerialTransport {
    #[instrument(skip(self, config), level = "debug", fields(path = config.path(), baud_rate = config.baud_rate()))]
    async fn open(&self, config: &SerialConfig) -> Result<SerialPortHandle, TransportError> {
        let mut stream = tokio_serial::new(config.path(), config.baud_rate())
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|source| TransportError::SerialOpen {
                path: config.path().to_string(),
                source,
            })?;

        // The DUT boards route DTR/RTS to reset and mode pins.
        if let Err(error) = stream.write_data_terminal_ready(false) {
            warn!(path = config.path(), %error, "failed to de-assert DTR");
        }
        if let Err(error) = stream.write_request_to_send(false) {
            warn!(path = config.path(), %error, "failed to de-assert RTS");
        }

        info!(path = config.path(), "serial port opened");
        let (reader, writer) = tokio::io::split(stream);
        Ok(SerialPortHandle::spawn(
            config.path(),
            reader,
            writer,
            config.framing(),
        ))
    }
}
