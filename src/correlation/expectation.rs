use std::time::Duration;

use bon::Builder;

use crate::codec::compare_buffers;

/// Leading bytes a UART line emits while it settles after reconfiguration.
const LINE_NOISE: [u8; 2] = [0xff, 0xfe];

/// Stream an incoming frame arrived on.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display)]
pub enum Source {
    /// Control-point notifications.
    #[display("control point")]
    ControlPoint,
    /// UART TX notifications (device to host).
    #[display("UART TX")]
    UartTx,
    /// Framed serial data.
    #[display("serial")]
    Serial,
    /// Characteristic read results.
    #[display("attribute read")]
    AttributeRead,
}

/// How an incoming frame is compared with the expectation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MatchRule {
    /// Exact byte equality.
    Exact(Vec<u8>),
    /// Any of the listed replies.
    OneOf(Vec<Vec<u8>>),
    /// Any frame at all.
    Any,
    /// Accumulate chunks until the expected length is reached.
    Stream(Vec<u8>),
}

impl MatchRule {
    /// Bytes reported as "expected" when the rule does not match.
    pub(crate) fn expected_bytes(&self) -> Vec<u8> {
        match self {
            Self::Exact(bytes) | Self::Stream(bytes) => bytes.clone(),
            Self::OneOf(options) => options.join(&b'|'),
            Self::Any => Vec::new(),
        }
    }
}

/// One expected reply, armed before its command is sent.
#[derive(Debug, Clone, Builder)]
pub struct Expectation {
    #[builder(into)]
    label: String,
    rule: MatchRule,
    source: Source,
    timeout: Duration,
    /// Whether the outcome is appended to the scenario step log.
    #[builder(default = true)]
    recorded: bool,
}

impl Expectation {
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }

    #[must_use]
    pub fn source(&self) -> Source {
        self.source
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn is_recorded(&self) -> bool {
        self.recorded
    }
}

/// Final state of an expectation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Resolution {
    Matched { actual: Vec<u8> },
    Mismatched { expected: Vec<u8>, actual: Vec<u8> },
    TimedOut,
}

impl Resolution {
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }

    /// Bytes that resolved the expectation, if any arrived.
    #[must_use]
    pub fn actual(&self) -> Option<&[u8]> {
        match self {
            Self::Matched { actual } | Self::Mismatched { actual, .. } => Some(actual),
            Self::TimedOut => None,
        }
    }
}

/// Progress of one armed expectation against incoming frames.
#[derive(Debug, Default)]
pub(crate) struct MatchProgress {
    received: Vec<u8>,
}

impl MatchProgress {
    /// Applies one frame; `None` means more data is needed.
    pub(crate) fn apply(&mut self, rule: &MatchRule, frame: &[u8]) -> Option<Resolution> {
        match rule {
            MatchRule::Exact(expected) => Some(verdict(expected, frame)),
            MatchRule::OneOf(options) => {
                if options.iter().any(|option| compare_buffers(option, frame)) {
                    Some(Resolution::Matched {
                        actual: frame.to_vec(),
                    })
                } else {
                    Some(Resolution::Mismatched {
                        expected: rule.expected_bytes(),
                        actual: frame.to_vec(),
                    })
                }
            }
            MatchRule::Any => Some(Resolution::Matched {
                actual: frame.to_vec(),
            }),
            MatchRule::Stream(expected) => self.apply_stream(expected, frame),
        }
    }

    fn apply_stream(&mut self, expected: &[u8], frame: &[u8]) -> Option<Resolution> {
        let mut chunk = frame;
        if self.received.is_empty() {
            let first = expected.first().copied();
            let skip = chunk
                .iter()
                .take_while(|byte| LINE_NOISE.contains(*byte) && Some(**byte) != first)
                .count();
            chunk = &chunk[skip..];
        }
        self.received.extend_from_slice(chunk);

        let diverged = self
            .received
            .iter()
            .zip(expected)
            .any(|(actual, wanted)| actual != wanted);
        if diverged || self.received.len() > expected.len() {
            return Some(Resolution::Mismatched {
                expected: expected.to_vec(),
                actual: std::mem::take(&mut self.received),
            });
        }
        if self.received.len() == expected.len() {
            return Some(Resolution::Matched {
                actual: std::mem::take(&mut self.received),
            });
        }
        None
    }
}

fn verdict(expected: &[u8], actual: &[u8]) -> Resolution {
    if compare_buffers(expected, actual) {
        Resolution::Matched {
            actual: actual.to_vec(),
        }
    } else {
        Resolution::Mismatched {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(MatchRule::Exact(vec![0x00]), &[0x00], true)]
    #[case(MatchRule::Exact(vec![0x53, 0x04]), &[0x53, 0x04, 0x01], false)]
    #[case(MatchRule::OneOf(vec![b"OK".to_vec(), b"ERR".to_vec()]), b"ERR", true)]
    #[case(MatchRule::OneOf(vec![b"OK".to_vec(), b"ERR".to_vec()]), b"???", false)]
    #[case(MatchRule::Any, b"BMD-300 NRF52832", true)]
    fn single_frame_rules_resolve_immediately(
        #[case] rule: MatchRule,
        #[case] frame: &[u8],
        #[case] matched: bool,
    ) {
        let mut progress = MatchProgress::default();
        let resolution = progress.apply(&rule, frame).expect("single-frame rule resolves");
        assert_eq!(matched, resolution.is_match());
    }

    #[test]
    fn stream_rule_accumulates_chunks() {
        let rule = MatchRule::Stream((0..40).collect());
        let mut progress = MatchProgress::default();

        assert_eq!(None, progress.apply(&rule, &(0..20).collect::<Vec<u8>>()));
        let resolution = progress
            .apply(&rule, &(20..40).collect::<Vec<u8>>())
            .expect("stream completes at expected length");
        assert_matches!(resolution, Resolution::Matched { actual } if actual.len() == 40);
    }

    #[test]
    fn stream_rule_skips_leading_line_noise() {
        let rule = MatchRule::Stream(vec![0x00, 0x01, 0x02]);
        let mut progress = MatchProgress::default();

        let resolution = progress
            .apply(&rule, &[0xff, 0xfe, 0x00, 0x01, 0x02])
            .expect("noise is dropped before the first byte");
        assert_eq!(true, resolution.is_match());
    }

    #[test]
    fn stream_rule_fails_on_first_divergence() {
        let rule = MatchRule::Stream(vec![0x00, 0x01, 0x02, 0x03]);
        let mut progress = MatchProgress::default();

        let resolution = progress
            .apply(&rule, &[0x00, 0x02])
            .expect("divergence resolves without waiting for more data");
        assert_matches!(
            resolution,
            Resolution::Mismatched { actual, .. } if actual == vec![0x00, 0x02]
        );
    }
}
