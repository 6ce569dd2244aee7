use std::fmt;

use async_trait::async_trait;
use bon::Builder;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use crate::codec::{Framing, run_framed_reader};
use crate::error::TransportError;
use crate::utils::format_frame;

/// Factory baud rate of the DUT UART.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// Settings for opening one serial port.
#[derive(Debug, Clone, Eq, PartialEq, Builder)]
pub struct SerialConfig {
    #[builder(into)]
    path: String,
    #[builder(default = DEFAULT_BAUD_RATE)]
    baud_rate: u32,
    #[builder(default)]
    framing: Framing,
}

impl SerialConfig {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    #[must_use]
    pub fn framing(&self) -> Framing {
        self.framing
    }
}

/// Opens serial ports.
#[async_trait]
pub trait SerialTransport: Send + Sync + fmt::Debug {
    /// # Errors
    ///
    /// Returns [`TransportError`] if the port cannot be opened.
    async fn open(&self, config: &SerialConfig) -> Result<SerialPortHandle, TransportError>;
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open serial port: a writer plus a framed reader task.
pub struct SerialPortHandle {
    path: String,
    writer: Option<BoxedWriter>,
    frames: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    reader: JoinHandle<()>,
}

impl fmt::Debug for SerialPortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialPortHandle")
            .field("path", &self.path)
            .field("open", &self.writer.is_some())
            .finish_non_exhaustive()
    }
}

impl SerialPortHandle {
    /// Wraps split port halves and starts the framed reader.
    pub(crate) fn spawn<R, W>(path: &str, reader: R, writer: W, framing: Framing) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let port = path.to_string();
        let reader = tokio::spawn(async move {
            if let Err(error) = run_framed_reader(reader, framing, tx).await {
                warn!(%port, ?error, "serial reader stopped");
            }
        });

        Self {
            path: path.to_string(),
            writer: Some(Box::new(writer)),
            frames: Some(rx),
            reader,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Takes the framed receive stream; only the first call returns it.
    pub fn take_frames(&mut self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.frames.take()
    }

    /// Writes and flushes `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SerialClosed`] after [`close`](Self::close)
    /// and [`TransportError::SerialIo`] on write failures.
    #[instrument(skip(self, bytes), level = "trace", fields(path = %self.path, len = bytes.len()))]
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TransportError::SerialClosed {
                path: self.path.clone(),
            })?;
        trace!(frame = %format_frame(bytes), "serial write");
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`TransportError`] if the port is closed or flushing fails.
    pub async fn flush(&mut self) -> Result<(), TransportError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TransportError::SerialClosed {
                path: self.path.clone(),
            })?;
        writer.flush().await?;
        Ok(())
    }

    /// Stops the reader and shuts the writer down. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SerialIo`] if the shutdown fails.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.reader.abort();
        if let Some(mut writer) = self.writer.take() {
            debug!(path = %self.path, "closing serial port");
            writer.shutdown().await?;
        }
        Ok(())
    }
}

impl Drop for SerialPortHandle {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn handle_frames_replies_and_rejects_writes_after_close() {
        let (host, device) = tokio::io::duplex(64);
        let (host_reader, host_writer) = tokio::io::split(host);
        let (mut device_reader, mut device_writer) = tokio::io::split(device);
        let mut handle = SerialPortHandle::spawn("/dev/null", host_reader, host_writer, Framing::Lines);
        let mut frames = handle.take_frames().expect("frames are available once");
        assert_eq!(true, handle.take_frames().is_none());

        handle.write(b"AT\n").await.expect("write succeeds");
        let mut received = [0u8; 3];
        device_reader
            .read_exact(&mut received)
            .await
            .expect("device receives the line");
        assert_eq!(b"AT\n", &received);

        device_writer.write_all(b"OK\n").await.expect("device replies");
        assert_eq!(Some(b"OK".to_vec()), frames.recv().await);

        handle.close().await.expect("close succeeds");
        assert_matches!(
            handle.write(b"AT\n").await,
            Err(TransportError::SerialClosed { .. })
        );
    }
}
