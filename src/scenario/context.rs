use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::Framing;
use crate::config::{HarnessConfig, PinMap};
use crate::correlation::{StepLog, StepRecord};
use crate::hw::{Hardware, SerialConfig};
use crate::protocol::{HardwareVariant, bmdware_service_uuids};
use crate::scan::{DEFAULT_BEACON_SCAN_TIMEOUT, DeviceQuery, ScanFilter, ScanMatcher};
use crate::session::{Channel, DeviceSession, Operation, Reply, SessionConfig};
use crate::utils::format_hex;

/// Which board of the bench a step addresses.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display)]
pub enum Role {
    #[display("target")]
    Target,
    #[display("setup")]
    Setup,
}

/// Assertion over the context, evaluated when its step runs.
pub type Predicate = Arc<dyn Fn(&ScenarioContext) -> bool + Send + Sync>;

/// Future returned by a session step closure.
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// One declarative step of a scenario body.
#[derive(Clone)]
pub enum TestStep {
    SendAndExpect {
        role: Role,
        channel: Channel,
        operation: Operation,
        reply: Reply,
    },
    Scan {
        filter: ScanFilter,
        timeout: Duration,
    },
    Delay(Duration),
    RawAssert {
        label: String,
        predicate: Predicate,
    },
    Connect(Role),
    Disconnect(Role),
    Reset {
        role: Role,
        channel: Channel,
        settle: Duration,
    },
}

impl TestStep {
    /// Command that must be acknowledged with the success status.
    #[must_use]
    pub fn expect_success(role: Role, channel: Channel, operation: Operation) -> Self {
        Self::SendAndExpect {
            role,
            channel,
            operation,
            reply: Reply::success(),
        }
    }

    /// Scan for a manufacturer-data pattern with the beacon defaults.
    #[must_use]
    pub fn scan_for(filter: ScanFilter) -> Self {
        Self::Scan {
            filter,
            timeout: DEFAULT_BEACON_SCAN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn assert(
        label: impl Into<String>,
        predicate: impl Fn(&ScenarioContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::RawAssert {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for TestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendAndExpect {
                role,
                channel,
                operation,
                reply,
            } => f
                .debug_struct("SendAndExpect")
                .field("role", role)
                .field("channel", channel)
                .field("operation", operation)
                .field("reply", reply)
                .finish(),
            Self::Scan { filter, timeout } => f
                .debug_struct("Scan")
                .field("filter", filter)
                .field("timeout", timeout)
                .finish(),
            Self::Delay(duration) => f.debug_tuple("Delay").field(duration).finish(),
            Self::RawAssert { label, .. } => {
                f.debug_struct("RawAssert").field("label", label).finish_non_exhaustive()
            }
            Self::Connect(role) => f.debug_tuple("Connect").field(role).finish(),
            Self::Disconnect(role) => f.debug_tuple("Disconnect").field(role).finish(),
            Self::Reset {
                role,
                channel,
                settle,
            } => f
                .debug_struct("Reset")
                .field("role", role)
                .field("channel", channel)
                .field("settle", settle)
                .finish(),
        }
    }
}

/// Everything one scenario run owns: its sessions, its step log and the
/// abort flag.
///
/// `should_continue` starts true and only ever goes false during setup and
/// body, when a session loses its link or port or the bench cannot be
/// brought into the state a scenario needs. Mismatched and missing replies
/// are recorded and the scenario carries on. The first note wins.
pub struct ScenarioContext {
    config: Arc<HarnessConfig>,
    hardware: Hardware,
    target: Option<DeviceSession>,
    setup: Option<DeviceSession>,
    steps: StepLog,
    should_continue: bool,
    note: Option<String>,
    transport_opened: bool,
    tearing_down: bool,
    variant: HardwareVariant,
}

impl fmt::Debug for ScenarioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioContext")
            .field("should_continue", &self.should_continue)
            .field("note", &self.note)
            .field("transport_opened", &self.transport_opened)
            .field("variant", &self.variant)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

impl ScenarioContext {
    #[must_use]
    pub fn new(config: Arc<HarnessConfig>, hardware: Hardware) -> Self {
        Self {
            config,
            hardware,
            target: None,
            setup: None,
            steps: StepLog::new(),
            should_continue: true,
            note: None,
            transport_opened: false,
            tearing_down: false,
            variant: HardwareVariant::Unknown,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    #[must_use]
    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    #[must_use]
    pub fn steps(&self) -> &StepLog {
        &self.steps
    }

    #[must_use]
    pub fn should_continue(&self) -> bool {
        self.should_continue
    }

    #[must_use]
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    #[must_use]
    pub fn transport_opened(&self) -> bool {
        self.transport_opened
    }

    /// Variant reported by the setup board, once it has been queried.
    #[must_use]
    pub fn variant(&self) -> HardwareVariant {
        self.variant
    }

    pub(crate) fn set_variant(&mut self, variant: HardwareVariant) {
        self.variant = variant;
    }

    /// Stops the remaining setup and body steps. Teardown failures are only
    /// logged.
    pub fn abort(&mut self, note: impl Into<String>) {
        let note = note.into();
        if self.tearing_down {
            warn!(%note, "teardown step failed");
            return;
        }
        warn!(%note, "scenario aborted");
        self.should_continue = false;
        self.note.get_or_insert(note);
    }

    /// Notes a problem without stopping the scenario.
    pub fn set_note(&mut self, note: impl Into<String>) {
        self.note.get_or_insert_with(|| note.into());
    }

    /// Re-arms the context for teardown, which always runs to the end.
    pub(crate) fn begin_teardown(&mut self) {
        self.tearing_down = true;
        self.should_continue = true;
    }

    pub fn record(&mut self, label: &str, passed: bool, note: Option<String>) {
        self.steps.record(label, passed, note);
    }

    /// Records the outcome of a check; a failure is noted and the scenario
    /// goes on.
    pub fn check(&mut self, label: &str, passed: bool, note: impl Into<String>) -> bool {
        if passed {
            self.record(label, true, None);
        } else {
            let note = note.into();
            self.record(label, false, Some(note.clone()));
            self.set_note(note);
        }
        passed
    }

    /// Like [`check`](Self::check), but a failure aborts the scenario.
    pub fn require(&mut self, label: &str, passed: bool, note: impl Into<String>) -> bool {
        if passed {
            self.record(label, true, None);
        } else {
            let note = note.into();
            self.record(label, false, Some(note.clone()));
            self.abort(note);
        }
        passed
    }

    /// Pin map of the variant the setup board reported.
    ///
    /// Aborts the scenario and returns `None` when the variant has no entry.
    pub fn pin_map(&mut self) -> Option<PinMap> {
        match self.config.pin_map(self.variant) {
            Ok(pins) => Some(pins.clone()),
            Err(error) => {
                self.abort(error.to_string());
                None
            }
        }
    }

    /// Query that locates the target from the configured address, name and
    /// the BMDware services.
    #[must_use]
    pub fn target_query(&self) -> DeviceQuery {
        let test = &self.config.test;
        DeviceQuery::builder()
            .maybe_address(test.device_mac())
            .maybe_adv_name(test.adv_name())
            .services(bmdware_service_uuids())
            .build()
    }

    /// Opens the target session; `framing` also opens its serial port.
    pub async fn open_target(&mut self, framing: Option<Framing>) -> bool {
        let serial = match framing {
            Some(framing) => {
                let Some(path) = self.config.test.target_uart() else {
                    self.abort("No target_uart configured");
                    return false;
                };
                Some(self.serial_config(path, framing))
            }
            None => None,
        };
        let config = SessionConfig::builder()
            .name(Role::Target.to_string())
            .maybe_serial(serial)
            .build();
        self.open_session(Role::Target, config).await
    }

    /// Opens the setup board over its UART.
    pub async fn open_setup(&mut self) -> bool {
        let Some(path) = self.config.test.setup_uart() else {
            self.abort("No setup_uart configured");
            return false;
        };
        let serial = self.serial_config(path, Framing::default());
        let config = SessionConfig::builder()
            .name(Role::Setup.to_string())
            .serial(serial)
            .bind_radio(false)
            .build();
        self.open_session(Role::Setup, config).await
    }

    fn serial_config(&self, path: &str, framing: Framing) -> SerialConfig {
        SerialConfig::builder()
            .path(path)
            .framing(framing)
            .maybe_baud_rate(self.config.test.baudrate())
            .build()
    }

    async fn open_session(&mut self, role: Role, config: SessionConfig) -> bool {
        match DeviceSession::open(config, &self.hardware, self.steps.clone()).await {
            Ok(session) => {
                debug!(%role, "session opened");
                self.transport_opened = true;
                *self.slot(role) = Some(session);
                true
            }
            Err(error) => {
                self.abort(format!("Failed to open {role}: {error}"));
                false
            }
        }
    }

    fn slot(&mut self, role: Role) -> &mut Option<DeviceSession> {
        match role {
            Role::Target => &mut self.target,
            Role::Setup => &mut self.setup,
        }
    }

    #[must_use]
    pub fn session(&self, role: Role) -> Option<&DeviceSession> {
        match role {
            Role::Target => self.target.as_ref(),
            Role::Setup => self.setup.as_ref(),
        }
    }

    /// Mutable session for `role`; aborts when it was never opened.
    pub fn session_mut(&mut self, role: Role) -> Option<&mut DeviceSession> {
        if self.slot(role).is_none() {
            self.abort(format!("The {role} session is not open"));
        }
        self.slot(role).as_mut()
    }

    /// Finds and connects to the target; aborts on failure.
    pub async fn connect_target(&mut self) -> bool {
        let query = self.target_query();
        let Some(target) = self.session_mut(Role::Target) else {
            return false;
        };
        let connected = target.find_and_connect(&query).await;
        target.take_transport_failure();
        if connected {
            return true;
        }
        let note = target
            .take_note()
            .unwrap_or_else(|| "Failed to connect to device!".to_string());
        self.record("connect to target", false, Some(note.clone()));
        self.abort(note);
        false
    }

    /// Disconnects from the target. A failure is noted but does not abort.
    pub async fn disconnect_target(&mut self) -> bool {
        let Some(target) = self.session_mut(Role::Target) else {
            return false;
        };
        if target.disconnect_radio().await {
            return true;
        }
        let note = target
            .take_note()
            .unwrap_or_else(|| "Failed to disconnect".to_string());
        self.set_note(note);
        false
    }

    /// Runs one step against the target session.
    ///
    /// A failed step aborts the scenario only when the session lost its
    /// transport. Returns `false` without running anything once the scenario
    /// is aborted.
    pub async fn on_target<F>(&mut self, step: F) -> bool
    where
        F: for<'a> FnOnce(&'a mut DeviceSession) -> StepFuture<'a> + Send,
    {
        self.on(Role::Target, step).await
    }

    pub async fn on<F>(&mut self, role: Role, step: F) -> bool
    where
        F: for<'a> FnOnce(&'a mut DeviceSession) -> StepFuture<'a> + Send,
    {
        self.run_on(role, step, false).await
    }

    /// Runs a step the rest of the scenario depends on; any failure aborts.
    pub async fn on_or_abort<F>(&mut self, role: Role, step: F) -> bool
    where
        F: for<'a> FnOnce(&'a mut DeviceSession) -> StepFuture<'a> + Send,
    {
        self.run_on(role, step, true).await
    }

    async fn run_on<F>(&mut self, role: Role, step: F, fatal: bool) -> bool
    where
        F: for<'a> FnOnce(&'a mut DeviceSession) -> StepFuture<'a> + Send,
    {
        if !self.should_continue {
            return false;
        }
        let Some(session) = self.session_mut(role) else {
            return false;
        };
        let passed = step(session).await;
        let transport_lost = session.take_transport_failure();
        if passed {
            return true;
        }
        let note = session
            .take_note()
            .or_else(|| self.steps.last_failure().and_then(failure_note))
            .unwrap_or_else(|| format!("{role} step failed"));
        if fatal || transport_lost {
            self.abort(note);
        } else {
            self.set_note(note);
        }
        false
    }

    /// Runs every step in order and reports whether all of them passed.
    /// Steps after an abort complete as no-ops.
    pub async fn run_steps(&mut self, steps: &[TestStep]) -> bool {
        let mut all_passed = true;
        for step in steps {
            all_passed &= self.run_step(step).await;
        }
        all_passed
    }

    pub async fn run_step(&mut self, step: &TestStep) -> bool {
        if !self.should_continue {
            return false;
        }
        match step {
            TestStep::SendAndExpect {
                role,
                channel,
                operation,
                reply,
            } => {
                let (operation, reply, channel) = (operation.clone(), reply.clone(), *channel);
                self.on(*role, move |session| {
                    Box::pin(async move { session.execute(&operation, channel, reply).await })
                })
                .await
            }
            TestStep::Scan { filter, timeout } => {
                let found = self.scan(filter.clone(), *timeout).await;
                let label = format!("scan for {} {}", filter.field(), format_hex(filter.pattern()));
                self.check(
                    &label,
                    found,
                    "Failed to discover beacon with correct data",
                )
            }
            TestStep::Delay(duration) => {
                tokio::time::sleep(*duration).await;
                true
            }
            TestStep::RawAssert { label, predicate } => {
                let passed = predicate(&*self);
                self.check(label, passed, format!("{label} did not hold"))
            }
            TestStep::Connect(Role::Target) => self.connect_target().await,
            TestStep::Connect(Role::Setup) => {
                self.require("connect to setup", false, "The setup board is driven over its UART")
            }
            TestStep::Disconnect(role) => {
                self.on(*role, |session| Box::pin(session.disconnect_radio()))
                    .await
            }
            TestStep::Reset {
                role,
                channel,
                settle,
            } => {
                let (channel, settle) = (*channel, *settle);
                self.on(*role, move |session| Box::pin(session.reset(channel, settle)))
                    .await
            }
        }
    }

    /// Scans until an advertisement matches `filter`.
    pub async fn scan(&mut self, filter: ScanFilter, timeout: Duration) -> bool {
        let radio = self.hardware.radio();
        let mut matcher = ScanMatcher::new(filter, Vec::new());
        match matcher.run(radio.as_ref(), timeout).await {
            Ok(found) => found,
            Err(error) => {
                warn!(%error, "scan failed");
                self.set_note(format!("Scan failed: {error}"));
                false
            }
        }
    }

    /// Closes every session; errors are logged.
    pub async fn close(&mut self) {
        for role in [Role::Target, Role::Setup] {
            if let Some(mut session) = self.slot(role).take()
                && let Err(error) = session.close().await
            {
                warn!(%role, %error, "failed to close session");
            }
        }
        info!(steps = self.steps.len(), "scenario sessions closed");
    }
}

fn failure_note(record: StepRecord) -> Option<String> {
    Some(match record.note() {
        Some(note) => format!("{}: {note}", record.label()),
        None => record.label().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::TestConfig;
    use crate::hw::{FakeRig, FakeRigConfig};
    use crate::protocol::IBEACON_PREFIX;
    use crate::session::ConnectionState;

    fn context() -> (FakeRig, ScenarioContext) {
        let rig = FakeRig::new(FakeRigConfig::default());
        let test = TestConfig::default()
            .with_default_device_mac(FakeRigConfig::default().target_address());
        let config = HarnessConfig::new(test, Default::default());
        let context = ScenarioContext::new(Arc::new(config), Hardware::simulated(&rig));
        (rig, context)
    }

    #[tokio::test(start_paused = true)]
    async fn declarative_steps_drive_the_target() {
        let (rig, mut context) = context();
        assert!(context.open_target(None).await);

        let steps = [
            TestStep::Connect(Role::Target),
            TestStep::expect_success(Role::Target, Channel::Ble, Operation::SetBeaconMajor(7)),
            TestStep::expect_success(Role::Target, Channel::Ble, Operation::SetBeaconEnable(true)),
            TestStep::Disconnect(Role::Target),
            TestStep::scan_for(ScanFilter::builder().pattern(IBEACON_PREFIX).build()),
            TestStep::assert("target idle", |context| {
                context
                    .session(Role::Target)
                    .is_some_and(|target| target.connection_state() == ConnectionState::Disconnected)
            }),
        ];

        assert!(context.run_steps(&steps).await);
        assert!(context.should_continue());
        assert!(!rig.target_connected());
        assert_eq!(None, context.steps().first_failure());
        context.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_abort_note_wins() {
        let (_rig, mut context) = context();
        context.abort("first");
        context.abort("second");
        context.set_note("third");

        assert!(!context.should_continue());
        assert_eq!(Some("first"), context.note());
        assert!(!context.run_step(&TestStep::Delay(Duration::from_secs(1))).await);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_link_aborts_with_its_note() {
        let (_rig, mut context) = context();
        assert!(context.open_target(None).await);

        let steps = [
            TestStep::expect_success(Role::Target, Channel::Ble, Operation::SetBeaconMajor(7)),
            TestStep::expect_success(Role::Target, Channel::Ble, Operation::SetBeaconMinor(8)),
        ];

        assert!(!context.run_steps(&steps).await);
        assert!(!context.should_continue());
        assert_eq!(Some("no peripheral is connected"), context.note());
        let records = context.steps().records();
        assert_eq!(1, records.len(), "{records:?}");
        assert!(!records[0].passed());
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_reply_is_recorded_and_the_chain_goes_on() {
        let (_rig, mut context) = context();
        assert!(context.open_target(None).await);

        let steps = [
            TestStep::Connect(Role::Target),
            TestStep::SendAndExpect {
                role: Role::Target,
                channel: Channel::Ble,
                operation: Operation::SetBeaconMajor(7),
                reply: Reply::locked(),
            },
            TestStep::expect_success(Role::Target, Channel::Ble, Operation::SetBeaconMinor(8)),
        ];

        assert!(!context.run_steps(&steps).await);
        assert!(context.should_continue());
        let outcomes: Vec<(String, bool)> = context
            .steps()
            .records()
            .iter()
            .map(|record| (record.label().to_string(), record.passed()))
            .collect();
        assert_eq!(
            vec![
                ("set beacon major (BLE)".to_string(), false),
                ("set beacon minor (BLE)".to_string(), true),
            ],
            outcomes
        );
        assert!(context.note().is_some_and(|note| note.contains("set beacon major")));
        context.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_check_notes_and_failed_requirement_aborts() {
        let (_rig, mut context) = context();

        assert!(!context.check("optional", false, "soft"));
        assert!(context.should_continue());
        assert!(!context.require("required", false, "hard"));
        assert!(!context.should_continue());
        assert_eq!(Some("soft"), context.note());
        assert_eq!(2, context.steps().len());
    }

    #[tokio::test(start_paused = true)]
    async fn required_session_step_aborts_on_a_mismatch() {
        let (_rig, mut context) = context();
        assert!(context.open_target(None).await);
        assert!(context.connect_target().await);

        let passed = context
            .on_or_abort(Role::Target, |target| {
                Box::pin(target.execute(&Operation::SetBeaconMajor(7), Channel::Ble, Reply::locked()))
            })
            .await;

        assert!(!passed);
        assert!(!context.should_continue());
        context.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_setup_uart_aborts() {
        let (_rig, mut context) = context();
        assert!(!context.open_setup().await);
        assert!(!context.transport_opened());
        assert_eq!(Some("No setup_uart configured"), context.note());
    }
}
