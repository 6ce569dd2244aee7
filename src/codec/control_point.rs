use tracing::instrument;

use super::StatusCode;
use crate::error::{DecodingError, EncodingError};
use crate::protocol::MAX_CONTROL_POINT_ARGS;

/// A decoded control-point notification.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ControlPointResponse {
    status: u8,
    payload: Vec<u8>,
}

impl ControlPointResponse {
    /// First byte of the frame: a status code or an echoed opcode.
    #[must_use]
    pub fn status_byte(&self) -> u8 {
        self.status
    }

    /// The status byte interpreted against the closed status set.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        StatusCode::from_code(self.status)
    }

    /// Bytes following the status byte.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Builds a control-point write: the opcode followed by its arguments.
///
/// # Errors
///
/// Returns [`EncodingError::PayloadTooLong`] when `args` exceeds the
/// attribute limit.
pub fn encode_control_point_command(opcode: u8, args: &[u8]) -> Result<Vec<u8>, EncodingError> {
    if args.len() > MAX_CONTROL_POINT_ARGS {
        return Err(EncodingError::PayloadTooLong {
            len: args.len(),
            max: MAX_CONTROL_POINT_ARGS,
        });
    }

    let mut frame = Vec::with_capacity(args.len() + 1);
    frame.push(opcode);
    frame.extend_from_slice(args);
    Ok(frame)
}

/// Splits a control-point notification into status byte and payload.
///
/// # Errors
///
/// Returns [`DecodingError::EmptyFrame`] for an empty notification.
#[instrument(skip(raw), level = "trace", fields(len = raw.len()))]
pub fn decode_control_point_response(raw: &[u8]) -> Result<ControlPointResponse, DecodingError> {
    let Some((&status, payload)) = raw.split_first() else {
        return Err(DecodingError::EmptyFrame);
    };

    Ok(ControlPointResponse {
        status,
        payload: payload.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn opcode_survives_encode_then_decode_for_every_byte() {
        for opcode in 0..=u8::MAX {
            let frame = encode_control_point_command(opcode, &[0xAA, 0x55])
                .expect("two argument bytes are within the limit");
            let decoded = decode_control_point_response(&frame).expect("frame is non-empty");
            assert_eq!(opcode, decoded.status_byte());
            assert_eq!(&[0xAA, 0x55], decoded.payload());
        }
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(19)]
    fn encode_accepts_arguments_up_to_limit(#[case] len: usize) {
        let args = vec![0x11; len];
        let frame = encode_control_point_command(0x20, &args).expect("within the limit");
        assert_eq!(len + 1, frame.len());
        assert_eq!(0x20, frame[0]);
    }

    #[test]
    fn encode_rejects_twenty_argument_bytes() {
        let result = encode_control_point_command(0x20, &[0u8; 20]);
        assert_matches!(
            result,
            Err(EncodingError::PayloadTooLong { len: 20, max: 19 })
        );
    }

    #[test]
    fn decode_rejects_empty_frame() {
        assert_matches!(
            decode_control_point_response(&[]),
            Err(DecodingError::EmptyFrame)
        );
    }

    #[test]
    fn decode_maps_known_status_codes() {
        let locked = decode_control_point_response(&[0x01]).expect("non-empty frame");
        assert_eq!(Some(StatusCode::Locked), locked.status());

        let echo = decode_control_point_response(&[0x53, 0x04, 0x01, 0x00]).expect("non-empty");
        assert_eq!(None, echo.status());
        assert_eq!(&[0x04, 0x01, 0x00], echo.payload());
    }
}
