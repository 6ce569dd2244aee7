use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

/// Quiet period after which a partial serial burst is treated as a frame.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(150);

const READ_BUFFER_LEN: usize = 256;

/// How a serial byte stream is cut into frames.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Framing {
    /// Newline delimited lines with the terminator removed.
    Lines,
    /// A frame ends once the line has been idle for the given period.
    ///
    /// This is a heuristic: two replies arriving closer together than the
    /// quiet period coalesce. Complete lines inside one burst are still split
    /// so the common `OK\nOK\n` case stays correct.
    QuietPeriod(Duration),
    /// Every read chunk is delivered unchanged.
    Raw,
}

impl Default for Framing {
    fn default() -> Self {
        Self::QuietPeriod(DEFAULT_QUIET_PERIOD)
    }
}

/// Splits a byte stream on `\n`, dropping `\r` and empty lines.
#[derive(Debug, Default)]
pub(crate) struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for byte in chunk {
            if *byte == b'\n' {
                let line = std::mem::take(&mut self.pending);
                if let Some(line) = finish_line(line) {
                    frames.push(line);
                }
            } else {
                self.pending.push(*byte);
            }
        }
        frames
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Returns whatever is buffered as a final frame.
    pub(crate) fn flush(&mut self) -> Option<Vec<u8>> {
        finish_line(std::mem::take(&mut self.pending))
    }
}

fn finish_line(mut line: Vec<u8>) -> Option<Vec<u8>> {
    while line.last() == Some(&b'\r') {
        line.pop();
    }
    (!line.is_empty()).then_some(line)
}

/// Reads from `reader` until EOF, pushing frames into `frames`.
///
/// Shared by the real serial port and the simulated rig so both exercise the
/// same delimiting rules.
#[instrument(skip(reader, frames), level = "debug", fields(?framing))]
pub(crate) async fn run_framed_reader<R>(
    mut reader: R,
    framing: Framing,
    frames: mpsc::UnboundedSender<Vec<u8>>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; READ_BUFFER_LEN];
    let mut lines = LineFramer::default();

    loop {
        let read = match framing {
            Framing::QuietPeriod(period) if lines.has_pending() => {
                match timeout(period, reader.read(&mut buffer)).await {
                    Ok(read) => read?,
                    Err(_elapsed) => {
                        if let Some(frame) = lines.flush() {
                            trace!(len = frame.len(), "quiet period elapsed, emitting frame");
                            if frames.send(frame).is_err() {
                                return Ok(());
                            }
                        }
                        continue;
                    }
                }
            }
            _ => reader.read(&mut buffer).await?,
        };

        if read == 0 {
            if let Some(frame) = lines.flush() {
                let _ = frames.send(frame);
            }
            debug!("serial stream reached EOF");
            return Ok(());
        }

        let chunk = &buffer[..read];
        let ready = match framing {
            Framing::Raw => vec![chunk.to_vec()],
            Framing::Lines | Framing::QuietPeriod(_) => lines.push(chunk),
        };
        for frame in ready {
            if frames.send(frame).is_err() {
                return Ok(());
            }
        }
    }
}
