use strum::IntoEnumIterator;
use strum_macros::EnumIter;

use crate::protocol::{AT_ERR, AT_LOCKED, AT_OK};

/// Return codes sent on the control point.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, derive_more::Display)]
pub enum StatusCode {
    #[display("Command Success")]
    Success,
    #[display("Device Locked")]
    Locked,
    #[display("Command Invalid Length")]
    InvalidLength,
    #[display("Unlock Failed")]
    UnlockFailed,
    #[display("Update Pin Failed")]
    UpdatePinFailed,
    #[display("Invalid Data")]
    InvalidData,
    #[display("Invalid State")]
    InvalidState,
    #[display("Invalid Parameter")]
    InvalidParameter,
    #[display("Invalid Command")]
    InvalidCommand,
}

impl StatusCode {
    /// Wire value of the status code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Locked => 1,
            Self::InvalidLength => 2,
            Self::UnlockFailed => 3,
            Self::UpdatePinFailed => 4,
            Self::InvalidData => 5,
            Self::InvalidState => 6,
            Self::InvalidParameter => 7,
            Self::InvalidCommand => 8,
        }
    }

    /// Maps a wire byte onto the closed status set.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::iter().find(|status| status.code() == code)
    }

    /// Status token the AT interpreter prints for this outcome.
    ///
    /// The serial channel only distinguishes success, lock rejection and
    /// everything else.
    #[must_use]
    pub fn at_token(self) -> &'static str {
        match self {
            Self::Success => AT_OK,
            Self::Locked => AT_LOCKED,
            _ => AT_ERR,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn codes_cover_zero_through_eight() {
        let codes: Vec<u8> = StatusCode::iter().map(StatusCode::code).collect();
        assert_eq!((0..=8).collect::<Vec<u8>>(), codes);
        assert_eq!(None, StatusCode::from_code(9));
    }

    #[rstest]
    #[case(StatusCode::Success, "Command Success", "OK")]
    #[case(StatusCode::Locked, "Device Locked", "LOCKED")]
    #[case(StatusCode::InvalidParameter, "Invalid Parameter", "ERR")]
    fn status_renders_names_and_tokens(
        #[case] status: StatusCode,
        #[case] name: &str,
        #[case] token: &str,
    ) {
        assert_eq!(name, status.to_string());
        assert_eq!(token, status.at_token());
    }
}
