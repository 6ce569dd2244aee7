use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{Instrument, info, info_span, instrument};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use super::catalog::ScenarioId;
use super::runner::{ScenarioResult, Verdict, run_scenario};
use crate::config::HarnessConfig;
use crate::hw::Hardware;
use crate::utils::local_now;

/// Results of a series of scenarios.
#[derive(Debug, Clone)]
pub struct SuiteResult {
    results: Vec<ScenarioResult>,
    started_at: OffsetDateTime,
    run_time: Duration,
}

impl SuiteResult {
    #[must_use]
    pub fn new(results: Vec<ScenarioResult>, started_at: OffsetDateTime, run_time: Duration) -> Self {
        Self {
            results,
            started_at,
            run_time,
        }
    }

    #[must_use]
    pub fn results(&self) -> &[ScenarioResult] {
        &self.results
    }

    #[must_use]
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    #[must_use]
    pub fn run_time(&self) -> Duration {
        self.run_time
    }

    /// PASS only when at least one scenario ran and every one passed.
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        if !self.results.is_empty() && self.results.iter().all(ScenarioResult::passed) {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    #[must_use]
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|result| result.passed()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }
}

/// Runs `ids` one after another, each with fresh sessions, waiting `pause`
/// between scenarios.
#[instrument(skip_all, level = "info", fields(scenarios = ids.len()))]
pub async fn run_suite(
    ids: &[ScenarioId],
    config: Arc<HarnessConfig>,
    hardware: &Hardware,
    pause: Duration,
) -> SuiteResult {
    let started_at = local_now();
    let clock = Instant::now();
    let mut results = Vec::with_capacity(ids.len());

    for (index, id) in ids.iter().copied().enumerate() {
        if index > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        let span = info_span!("scenario", %id, progress = true);
        span.pb_set_message(&format!("Running {}", id.title()));
        let result = run_scenario(id, Arc::clone(&config), hardware.clone())
            .instrument(span.clone())
            .await;
        let finish = if result.passed() {
            format!("{} {}", "✓".green(), id.title())
        } else {
            format!("{} {}: {}", "✗".red(), id.title(), result.note())
        };
        span.pb_set_finish_message(&finish);
        results.push(result);
    }

    let suite = SuiteResult::new(results, started_at, clock.elapsed());
    info!(
        verdict = %suite.verdict(),
        passed = suite.passed(),
        failed = suite.failed(),
        "suite finished"
    );
    suite
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::{HwConfig, TestConfig};
    use crate::hw::{FakeRig, FakeRigConfig, SIM_SETUP_UART, SIM_TARGET_UART};

    fn result(verdict: Verdict) -> ScenarioResult {
        ScenarioResult::new("x", verdict, "", local_now(), Duration::ZERO)
    }

    #[test]
    fn empty_suite_fails() {
        let suite = SuiteResult::new(Vec::new(), local_now(), Duration::ZERO);
        assert_eq!(Verdict::Fail, suite.verdict());
    }

    #[test]
    fn one_failure_fails_the_suite() {
        let suite = SuiteResult::new(
            vec![result(Verdict::Pass), result(Verdict::Fail), result(Verdict::Pass)],
            local_now(),
            Duration::ZERO,
        );
        assert_eq!(Verdict::Fail, suite.verdict());
        assert_eq!((2, 1), (suite.passed(), suite.failed()));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_every_scenario_in_order() {
        let rig_config = FakeRigConfig::default();
        let test = TestConfig::default()
            .with_uart_paths(SIM_TARGET_UART, SIM_SETUP_UART)
            .with_default_device_mac(rig_config.target_address());
        let config = HarnessConfig::new(test, HwConfig::default());
        let hardware = Hardware::simulated(&FakeRig::new(rig_config));

        let suite = run_suite(
            &[ScenarioId::DeviceInfo, ScenarioId::GpioConfig],
            Arc::new(config),
            &hardware,
            Duration::from_millis(100),
        )
        .await;

        let names: Vec<&str> = suite.results().iter().map(ScenarioResult::name).collect();
        assert_eq!(vec!["Device Info", "GpioConfig Test"], names);
        assert_eq!(Verdict::Pass, suite.verdict(), "{:?}", suite.results());
    }
}
