use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use super::catalog::ScenarioId;
use super::context::ScenarioContext;
use crate::config::HarnessConfig;
use crate::correlation::StepRecord;
use crate::hw::Hardware;
use crate::utils::local_now;

/// One end-to-end test case.
///
/// `teardown` runs whenever setup opened a transport, even after an abort,
/// and its outcome never changes the verdict.
#[async_trait]
pub trait Scenario: Send + Sync {
    fn id(&self) -> ScenarioId;

    async fn setup(&self, context: &mut ScenarioContext);

    async fn body(&self, context: &mut ScenarioContext);

    async fn teardown(&self, _context: &mut ScenarioContext) {}
}

/// Where a [`ScenarioRunner`] is in its run.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, derive_more::Display)]
pub enum RunnerState {
    #[default]
    NotStarted,
    Setup,
    Body,
    Teardown,
    Done,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum Verdict {
    #[display("PASS")]
    Pass,
    #[display("FAIL")]
    Fail,
}

impl Verdict {
    #[must_use]
    pub fn passed(self) -> bool {
        self == Self::Pass
    }
}

/// Outcome of one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    name: String,
    verdict: Verdict,
    note: String,
    steps: Vec<StepRecord>,
    started_at: OffsetDateTime,
    run_time: Duration,
}

impl ScenarioResult {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        verdict: Verdict,
        note: impl Into<String>,
        started_at: OffsetDateTime,
        run_time: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            verdict,
            note: note.into(),
            steps: Vec::new(),
            started_at,
            run_time,
        }
    }

    #[must_use]
    pub fn with_steps(mut self, steps: Vec<StepRecord>) -> Self {
        self.steps = steps;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }

    /// First failure cause, or a non-fatal note on a pass.
    #[must_use]
    pub fn note(&self) -> &str {
        &self.note
    }

    #[must_use]
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    #[must_use]
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    #[must_use]
    pub fn run_time(&self) -> Duration {
        self.run_time
    }
}

/// Folds the steps recorded before teardown into a verdict and note.
///
/// A scenario fails when it was aborted, recorded nothing, or has a failed
/// step.
#[must_use]
pub fn fold_verdict(
    should_continue: bool,
    steps: &[StepRecord],
    note: Option<&str>,
) -> (Verdict, String) {
    let first_failure = steps.iter().find(|record| !record.passed());
    let fallback = || match first_failure {
        Some(record) => match record.note() {
            Some(note) => format!("{}: {note}", record.label()),
            None => format!("{} failed", record.label()),
        },
        None => "Scenario aborted".to_string(),
    };

    if !should_continue || first_failure.is_some() {
        return (
            Verdict::Fail,
            note.map_or_else(fallback, str::to_string),
        );
    }
    if steps.is_empty() {
        return (Verdict::Fail, "No steps were recorded".to_string());
    }
    (Verdict::Pass, note.unwrap_or_default().to_string())
}

/// Drives one scenario through setup, body and teardown.
#[derive(Debug, Default)]
pub struct ScenarioRunner {
    state: RunnerState,
}

impl ScenarioRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> RunnerState {
        self.state
    }

    #[instrument(skip_all, level = "info", fields(scenario = %scenario.id()))]
    pub async fn run(
        &mut self,
        scenario: &dyn Scenario,
        mut context: ScenarioContext,
    ) -> ScenarioResult {
        let started_at = local_now();
        let clock = Instant::now();

        self.state = RunnerState::Setup;
        scenario.setup(&mut context).await;
        if context.should_continue() {
            self.state = RunnerState::Body;
            scenario.body(&mut context).await;
        }

        let steps = context.steps().records();
        let (verdict, note) = fold_verdict(context.should_continue(), &steps, context.note());

        if context.transport_opened() {
            self.state = RunnerState::Teardown;
            context.begin_teardown();
            scenario.teardown(&mut context).await;
            let teardown_failures = context.steps().records()[steps.len()..]
                .iter()
                .filter(|record| !record.passed())
                .count();
            if teardown_failures > 0 {
                warn!(teardown_failures, "teardown did not complete cleanly");
            }
        }
        context.close().await;
        self.state = RunnerState::Done;

        let run_time = clock.elapsed();
        info!(%verdict, %note, run_time = %humantime::format_duration(run_time), "scenario finished");
        ScenarioResult::new(scenario.id().title(), verdict, note, started_at, run_time)
            .with_steps(steps)
    }
}

/// Runs the scenario behind `id` with fresh sessions.
pub async fn run_scenario(
    id: ScenarioId,
    config: Arc<HarnessConfig>,
    hardware: Hardware,
) -> ScenarioResult {
    let scenario = id.scenario();
    let context = ScenarioContext::new(config, hardware);
    ScenarioRunner::new().run(scenario.as_ref(), context).await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::correlation::StepLog;
    use crate::hw::{FakeRig, FakeRigConfig};

    fn records(outcomes: &[(&str, bool)]) -> Vec<StepRecord> {
        let log = StepLog::new();
        for (label, passed) in outcomes {
            log.record(*label, *passed, (!passed).then(|| "timed out".to_string()));
        }
        log.records()
    }

    #[test]
    fn empty_log_fails() {
        assert_eq!(
            (Verdict::Fail, "No steps were recorded".to_string()),
            fold_verdict(true, &[], None)
        );
    }

    #[test]
    fn first_failure_becomes_the_note() {
        let steps = records(&[("a", true), ("b", false), ("c", false)]);
        assert_eq!(
            (Verdict::Fail, "b: timed out".to_string()),
            fold_verdict(true, &steps, None)
        );
    }

    #[test]
    fn abort_note_wins_over_steps() {
        let steps = records(&[("a", true)]);
        assert_eq!(
            (Verdict::Fail, "Could not find a BMDware test device!".to_string()),
            fold_verdict(false, &steps, Some("Could not find a BMDware test device!"))
        );
    }

    #[test]
    fn passing_run_keeps_a_non_fatal_note() {
        let steps = records(&[("a", true), ("b", true)]);
        assert_eq!(
            (Verdict::Pass, "Failed to disconnect".to_string()),
            fold_verdict(true, &steps, Some("Failed to disconnect"))
        );
    }

    /// Records which phases ran.
    #[derive(Default)]
    struct PhaseRecorder {
        phases: Mutex<Vec<&'static str>>,
        fail_setup: bool,
    }

    impl PhaseRecorder {
        fn phases(&self) -> Vec<&'static str> {
            self.phases.lock().expect("phases").clone()
        }
    }

    #[async_trait]
    impl Scenario for PhaseRecorder {
        fn id(&self) -> ScenarioId {
            ScenarioId::DeviceInfo
        }

        async fn setup(&self, context: &mut ScenarioContext) {
            self.phases.lock().expect("phases").push("setup");
            context.open_target(None).await;
            if self.fail_setup {
                context.abort("setup refused");
            }
        }

        async fn body(&self, context: &mut ScenarioContext) {
            self.phases.lock().expect("phases").push("body");
            context.record("body step", true, None);
        }

        async fn teardown(&self, context: &mut ScenarioContext) {
            self.phases.lock().expect("phases").push("teardown");
            context.record("teardown step", false, Some("ignored".to_string()));
        }
    }

    fn context() -> ScenarioContext {
        let rig = FakeRig::new(FakeRigConfig::default());
        ScenarioContext::new(Arc::default(), Hardware::simulated(&rig))
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_runs_but_does_not_change_the_verdict() {
        let recorder = PhaseRecorder::default();
        let mut runner = ScenarioRunner::new();

        let result = runner.run(&recorder, context()).await;

        assert_eq!(vec!["setup", "body", "teardown"], recorder.phases());
        assert_eq!(RunnerState::Done, runner.state());
        assert_eq!(Verdict::Pass, result.verdict());
        assert_eq!(1, result.steps().len());
        assert_eq!("Device Info", result.name());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_setup_skips_the_body() {
        let recorder = PhaseRecorder {
            fail_setup: true,
            ..PhaseRecorder::default()
        };

        let result = ScenarioRunner::new().run(&recorder, context()).await;

        assert_eq!(vec!["setup", "teardown"], recorder.phases());
        assert_eq!(Verdict::Fail, result.verdict());
        assert_eq!("setup refused", result.note());
    }
}
