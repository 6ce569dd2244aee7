mod at;
mod control_point;
mod framing;
mod status;

pub use self::at::{AtCommand, AtForm, decode_at_hex_value, decode_at_response_line, encode_at_command};
pub use self::control_point::{
    ControlPointResponse, decode_control_point_response, encode_control_point_command,
};
pub(crate) use self::framing::run_framed_reader;
pub use self::framing::{DEFAULT_QUIET_PERIOD, Framing};
pub use self::status::StatusCode;

/// Exact byte comparison: buffers of different length never compare equal.
#[must_use]
pub fn compare_buffers(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() == actual.len() && expected.iter().zip(actual).all(|(left, right)| left == right)
}
