use std::sync::Arc;

use bmdware_hil::config::{HarnessConfig, HwConfig, TestConfig};
use bmdware_hil::hw::{Fault, FakeRig, FakeRigConfig, Hardware, SIM_SETUP_UART, SIM_TARGET_UART};
use bmdware_hil::scenario::{ScenarioId, Verdict, run_scenario, run_suite};
use pretty_assertions::assert_eq;
use rstest::rstest;

const HW_CONFIG: &str = r#"{
    "nrf52": {
        "at_ctrl_pin": "0C",
        "beacon_only_pin": "0D",
        "output_pins": ["0E", "10"],
        "input_pins": ["0F", "11"]
    }
}"#;

const TEST_CONFIG: &str = r#"{
    "baudrate": 57600,
    "adv_name": "BMDware",
    "test_beacon_uuid": "6d224c46ef864b4692090f559ec3adb4",
    "test_beacon_major": 9876,
    "test_beacon_minor": 5234
}"#;

struct Bench {
    rig: FakeRig,
    hardware: Hardware,
    config: Arc<HarnessConfig>,
}

fn bench() -> Bench {
    let rig_config = FakeRigConfig::default();
    let test: TestConfig = serde_json::from_str(TEST_CONFIG).expect("test config parses");
    let test = test
        .with_uart_paths(SIM_TARGET_UART, SIM_SETUP_UART)
        .with_default_device_mac(rig_config.target_address());
    let hw: HwConfig = serde_json::from_str(HW_CONFIG).expect("hw config parses");
    let rig = FakeRig::new(rig_config);
    let hardware = Hardware::simulated(&rig);
    Bench {
        rig,
        hardware,
        config: Arc::new(HarnessConfig::new(test, hw)),
    }
}

#[rstest]
#[case::beacon_payload(ScenarioId::BeaconPayload)]
#[case::custom_beacon_data(ScenarioId::CustomBeaconData)]
#[case::connectable_tx_power(ScenarioId::ConnectableTxPower)]
#[case::at_beacon_settings(ScenarioId::AtBeaconSettings)]
#[case::lock_unlock(ScenarioId::LockUnlock)]
#[case::password_change(ScenarioId::PasswordChange)]
#[case::at_lock_unlock(ScenarioId::AtLockUnlock)]
#[case::at_device_reset(ScenarioId::AtDeviceReset)]
#[case::device_info(ScenarioId::DeviceInfo)]
#[case::gpio_config(ScenarioId::GpioConfig)]
#[case::gpio_status_pin(ScenarioId::GpioStatusPin)]
#[case::at_gpio_config(ScenarioId::AtGpioConfig)]
#[case::uart_passthrough(ScenarioId::UartPassthrough)]
#[case::at_uart_settings(ScenarioId::AtUartSettings)]
#[tokio::test(start_paused = true)]
async fn scenario_passes_against_the_simulated_rig(#[case] id: ScenarioId) {
    let bench = bench();

    let result = run_scenario(id, Arc::clone(&bench.config), bench.hardware.clone()).await;

    assert_eq!(Verdict::Pass, result.verdict(), "{}: {}", id, result.note());
    assert_eq!(id.title(), result.name());
    assert!(!bench.rig.target_connected(), "{id} left the target connected");
    assert!(!bench.rig.target_in_at_mode(), "{id} left the target in AT mode");
}

#[tokio::test(start_paused = true)]
async fn scenarios_leave_the_rig_reusable() {
    let bench = bench();
    let ids = [
        ScenarioId::AtLockUnlock,
        ScenarioId::LockUnlock,
        ScenarioId::AtGpioConfig,
        ScenarioId::BeaconPayload,
        ScenarioId::UartPassthrough,
    ];

    let suite = run_suite(&ids, Arc::clone(&bench.config), &bench.hardware, Default::default()).await;

    let verdicts: Vec<Verdict> = suite.results().iter().map(|result| result.verdict()).collect();
    assert_eq!(vec![Verdict::Pass; ids.len()], verdicts, "{:?}", suite.results());
    assert_eq!(Verdict::Pass, suite.verdict());
}

#[tokio::test(start_paused = true)]
async fn missing_pin_map_fails_at_mode_scenarios() {
    let rig_config = FakeRigConfig::default();
    let test = TestConfig::default()
        .with_uart_paths(SIM_TARGET_UART, SIM_SETUP_UART)
        .with_default_device_mac(rig_config.target_address());
    let rig = FakeRig::new(rig_config);
    let config = Arc::new(HarnessConfig::new(test, HwConfig::default()));

    let result = run_scenario(ScenarioId::AtDeviceReset, config, Hardware::simulated(&rig)).await;

    assert_eq!(Verdict::Fail, result.verdict());
    assert!(!result.note().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreachable_target_fails_with_a_note() {
    let rig = FakeRig::new(FakeRigConfig::default());
    let test = TestConfig::default()
        .with_uart_paths(SIM_TARGET_UART, SIM_SETUP_UART)
        .with_default_device_mac("c0:98:e5:ff:ff:ff");
    let config = Arc::new(HarnessConfig::new(test, HwConfig::default()));

    let result = run_scenario(ScenarioId::BeaconPayload, config, Hardware::simulated(&rig)).await;

    assert_eq!(Verdict::Fail, result.verdict());
    assert!(!result.note().is_empty());
}

#[rstest]
#[case::lost_reply(Fault::DropReply)]
#[case::garbled_reply(Fault::CorruptReply)]
#[tokio::test(start_paused = true)]
async fn bad_reply_fails_the_step_and_the_body_carries_on(#[case] fault: Fault) {
    let bench = bench();
    bench.rig.inject(fault);

    let result = run_scenario(ScenarioId::GpioConfig, Arc::clone(&bench.config), bench.hardware.clone()).await;

    assert_eq!(Verdict::Fail, result.verdict());
    assert!(result.note().starts_with("set GPIO"), "{}", result.note());
    let outcomes: Vec<bool> = result.steps().iter().map(|step| step.passed()).collect();
    assert_eq!(vec![false, true, true, true], outcomes, "{:?}", result.steps());
    assert!(!bench.rig.target_connected());
}

#[tokio::test(start_paused = true)]
async fn target_silent_after_strapping_aborts_before_the_body() {
    let bench = bench();
    bench.rig.inject(Fault::DropReply);

    let result = run_scenario(ScenarioId::AtDeviceReset, Arc::clone(&bench.config), bench.hardware.clone()).await;

    assert_eq!(Verdict::Fail, result.verdict());
    assert_eq!("Target did not enter AT mode", result.note());
    assert_eq!(
        Some("target in AT mode"),
        result.steps().last().map(|step| step.label())
    );
    assert!(!bench.rig.target_in_at_mode());
}

#[tokio::test(start_paused = true)]
async fn refused_subscription_fails_without_leaving_a_link() {
    let bench = bench();
    bench.rig.inject(Fault::RefuseSubscription);

    let result = run_scenario(ScenarioId::DeviceInfo, Arc::clone(&bench.config), bench.hardware.clone()).await;

    assert_eq!(Verdict::Fail, result.verdict());
    assert!(result.note().starts_with("Failed to connect to device"), "{}", result.note());
    assert!(!bench.rig.target_connected());
}
