use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bon::Builder;
use tracing::instrument;

use crate::config::HarnessConfig;
use crate::hw::Hardware;
use crate::report::write_report;
use crate::scenario::{ScenarioId, Verdict, run_suite};
use crate::terminal::TerminalClient;

use super::ui::{Painter, SuiteSummaryView, Table};

/// One series of scenarios against one bench, ending in a CSV report.
#[derive(Debug, Builder)]
pub(crate) struct BenchRun<'a> {
    scenarios: Vec<ScenarioId>,
    config: HarnessConfig,
    hardware: Hardware,
    #[builder(default)]
    pause: Duration,
    report_dir: &'a Path,
    backend: &'static str,
}

impl BenchRun<'_> {
    /// Executes `run` and `suite`: runs the scenarios, writes the report and
    /// prints the summary.
    #[instrument(
        skip_all,
        level = "info",
        fields(scenarios = self.scenarios.len(), backend = self.backend)
    )]
    pub(crate) async fn execute<W>(
        self,
        out: &mut W,
        terminal_client: &dyn TerminalClient,
    ) -> Result<Verdict>
    where
        W: io::Write,
    {
        let report_file = self.config.test.report_file().to_string();
        let suite = run_suite(
            &self.scenarios,
            Arc::new(self.config),
            &self.hardware,
            self.pause,
        )
        .await;
        let path = write_report(&suite, self.report_dir, &report_file)?;

        let painter = Painter::new(terminal_client.stdout_is_terminal());
        writeln!(out, "{}", SuiteSummaryView::new(&suite, &painter))?;
        let details = Table::key_value(
            &painter,
            vec![
                ("backend", self.backend.to_string()),
                ("report", path.display().to_string()),
            ],
        );
        writeln!(out, "{details}")?;
        Ok(suite.verdict())
    }
}
