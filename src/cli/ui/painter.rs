use owo_colors::{OwoColorize, Style};

use crate::scenario::Verdict;

#[derive(Debug, Clone, Copy)]
enum Tone {
    Heading,
    Pass,
    Fail,
    Warning,
    Muted,
    Value,
}

impl Tone {
    fn style(self) -> Style {
        match self {
            Self::Heading => Style::new().bold().cyan(),
            Self::Pass => Style::new().bold().green(),
            Self::Fail => Style::new().bold().red(),
            Self::Warning => Style::new().bold().yellow(),
            Self::Muted => Style::new().dimmed(),
            Self::Value => Style::new().bold(),
        }
    }
}

/// Colours console output when stdout is a terminal and leaves it plain
/// otherwise.
#[derive(Debug)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn heading(&self, text: impl AsRef<str>) -> String {
        self.paint(Tone::Heading, text.as_ref())
    }

    /// `PASS` in green, `FAIL` in red.
    pub(crate) fn verdict(&self, verdict: Verdict) -> String {
        let tone = match verdict {
            Verdict::Pass => Tone::Pass,
            Verdict::Fail => Tone::Fail,
        };
        self.paint(tone, &verdict.to_string())
    }

    pub(crate) fn warning(&self, text: impl AsRef<str>) -> String {
        self.paint(Tone::Warning, text.as_ref())
    }

    pub(crate) fn muted(&self, text: impl AsRef<str>) -> String {
        self.paint(Tone::Muted, text.as_ref())
    }

    pub(crate) fn value(&self, text: impl AsRef<str>) -> String {
        self.paint(Tone::Value, text.as_ref())
    }

    fn paint(&self, tone: Tone, text: &str) -> String {
        if !self.use_colour || text.is_empty() {
            return text.to_string();
        }
        text.style(tone.style()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Verdict::Pass, "PASS")]
    #[case(Verdict::Fail, "FAIL")]
    fn plain_verdicts_are_bare_words(#[case] verdict: Verdict, #[case] expected: &str) {
        assert_eq!(expected, Painter::new(false).verdict(verdict));
    }

    #[test]
    fn colour_wraps_the_text() {
        let painter = Painter::new(true);

        let styled = painter.heading("Test results:");

        assert_ne!("Test results:", styled);
        assert!(styled.contains("Test results:"));
        assert_ne!(painter.verdict(Verdict::Pass), painter.verdict(Verdict::Fail));
    }

    #[test]
    fn empty_text_stays_empty_in_colour() {
        assert_eq!("", Painter::new(true).warning(""));
    }
}
