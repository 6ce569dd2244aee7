use std::fmt::{self, Display, Formatter};

use crate::scenario::SuiteResult;

use super::painter::Painter;
use super::table::{Table, format_run_time};

/// Renders the per-scenario results and the suite verdict.
pub(crate) struct SuiteSummaryView<'a> {
    suite: &'a SuiteResult,
    painter: &'a Painter,
}

impl<'a> SuiteSummaryView<'a> {
    pub(crate) fn new(suite: &'a SuiteResult, painter: &'a Painter) -> Self {
        Self { suite, painter }
    }
}

impl Display for SuiteSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::results(self.painter, self.suite.results());

        write!(f, "{}", self.painter.heading("Test results:"))?;
        write!(f, "\n{table}")?;
        write!(
            f,
            "\n{} {} {}",
            self.painter.heading("Test Suite:"),
            self.painter.verdict(self.suite.verdict()),
            self.painter.muted(format!(
                "({} passed, {} failed in {})",
                self.suite.passed(),
                self.suite.failed(),
                format_run_time(self.suite.run_time())
            ))
        )
    }
}
