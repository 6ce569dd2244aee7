use std::fmt;

use crate::error::DecodingError;
use crate::protocol::{AT_ATTENTION, AtMnemonic};

/// Shape of one AT command line.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AtForm {
    /// `<mnemonic>?`
    Get,
    /// `<mnemonic> <arg> <arg>`
    Set(Vec<String>),
    /// `<mnemonic>` with no arguments, e.g. `at$devrst`.
    Action,
}

/// An AT command bound to its mnemonic.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AtCommand {
    mnemonic: Option<AtMnemonic>,
    form: AtForm,
}

impl AtCommand {
    /// The bare `AT` attention line.
    #[must_use]
    pub fn attention() -> Self {
        Self {
            mnemonic: None,
            form: AtForm::Action,
        }
    }

    #[must_use]
    pub fn get(mnemonic: AtMnemonic) -> Self {
        Self {
            mnemonic: Some(mnemonic),
            form: AtForm::Get,
        }
    }

    #[must_use]
    pub fn set<I, S>(mnemonic: AtMnemonic, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mnemonic: Some(mnemonic),
            form: AtForm::Set(args.into_iter().map(Into::into).collect()),
        }
    }

    #[must_use]
    pub fn action(mnemonic: AtMnemonic) -> Self {
        Self {
            mnemonic: Some(mnemonic),
            form: AtForm::Action,
        }
    }

    /// Mnemonic of the command, `None` for the bare attention line.
    #[must_use]
    pub fn mnemonic(&self) -> Option<AtMnemonic> {
        self.mnemonic
    }

    #[must_use]
    pub fn form(&self) -> &AtForm {
        &self.form
    }

    /// Renders the full wire line including the terminator.
    #[must_use]
    pub fn encode(&self) -> String {
        let mnemonic = self
            .mnemonic
            .map_or_else(|| AT_ATTENTION.to_string(), |mnemonic| mnemonic.to_string());
        encode_at_command(&mnemonic, &self.form)
    }
}

impl fmt::Display for AtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode().trim_end())
    }
}

/// Formats one AT line. Arguments are written as-is, without escaping.
#[must_use]
pub fn encode_at_command(mnemonic: &str, form: &AtForm) -> String {
    match form {
        AtForm::Get => format!("{mnemonic}?\n"),
        AtForm::Action => format!("{mnemonic}\n"),
        AtForm::Set(args) if args.is_empty() => format!("{mnemonic}\n"),
        AtForm::Set(args) => format!("{mnemonic} {}\n", args.join(" ")),
    }
}

/// Decodes one reply line, dropping any trailing CR/LF.
#[must_use]
pub fn decode_at_response_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Parses a hexadecimal AT value such as `fc c1` or `0001c200`.
///
/// # Errors
///
/// Returns [`DecodingError::InvalidHexReply`] if the line is not valid hex.
pub fn decode_at_hex_value(line: &str) -> Result<Vec<u8>, DecodingError> {
    let compact: String = line.split_whitespace().collect();
    hex::decode(&compact).map_err(|_| DecodingError::InvalidHexReply {
        line: line.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(AtCommand::get(AtMnemonic::BeaconUuid), "at$buuid?\n")]
    #[case(AtCommand::set(AtMnemonic::UartBaudRate, ["115200"]), "at$ubr 115200\n")]
    #[case(AtCommand::set(AtMnemonic::GpioConfig, ["04", "01", "00"]), "at$gcfg 04 01 00\n")]
    #[case(AtCommand::action(AtMnemonic::DeviceReset), "at$devrst\n")]
    #[case(AtCommand::attention(), "AT\n")]
    fn commands_encode_to_wire_lines(#[case] command: AtCommand, #[case] expected: &str) {
        assert_eq!(expected, command.encode());
    }

    #[rstest]
    #[case(b"OK\n", "OK")]
    #[case(b"LOCKED\r\n", "LOCKED")]
    #[case(b"04 01 03", "04 01 03")]
    #[case(b"", "")]
    fn response_lines_drop_terminators(#[case] raw: &[u8], #[case] expected: &str) {
        assert_eq!(expected, decode_at_response_line(raw));
    }

    #[test]
    fn hex_values_ignore_spacing() {
        assert_eq!(
            vec![0xfc, 0xc1],
            decode_at_hex_value("fc c1").expect("valid hex")
        );
        assert_matches!(
            decode_at_hex_value("OK"),
            Err(DecodingError::InvalidHexReply { .. })
        );
    }
}
