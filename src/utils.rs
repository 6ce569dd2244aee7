use time::OffsetDateTime;

/// Wall-clock time in the local offset, falling back to UTC when the offset
/// cannot be determined.
pub(crate) fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Formats bytes as lowercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    bytes
        .iter()
        .map(|value| hex::encode([*value]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Renders a frame for logs: printable ASCII as text, anything else as hex.
pub(crate) fn format_frame(bytes: &[u8]) -> String {
    if !bytes.is_empty() && bytes.iter().all(|byte| byte.is_ascii_graphic() || *byte == b' ') {
        return format!("\"{}\"", String::from_utf8_lossy(bytes));
    }
    format_hex(bytes)
}

/// Renders a signed byte the way the firmware prints it in AT replies.
pub(crate) fn signed_hex(value: i8) -> String {
    hex::encode(value.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn format_hex_handles_empty_payload() {
        assert_eq!("<empty>", format_hex(&[]));
    }

    #[rstest]
    #[case(&[0x05, 0x00, 0xA1, 0xFF], "05 00 a1 ff")]
    #[case(b"OK", "\"OK\"")]
    #[case(b"04 01 03", "\"04 01 03\"")]
    fn format_frame_prefers_text(#[case] bytes: &[u8], #[case] expected: &str) {
        assert_eq!(expected, format_frame(bytes));
    }

    #[rstest]
    #[case(-4, "fc")]
    #[case(-63, "c1")]
    #[case(4, "04")]
    fn signed_hex_matches_firmware_rendering(#[case] value: i8, #[case] expected: &str) {
        assert_eq!(expected, signed_hex(value));
    }
}
