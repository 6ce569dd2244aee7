use std::io;

use anyhow::Result;
use tracing::{info, instrument};

use crate::cli::run::BenchRun;
use crate::cli::{Args, Command};
use crate::config::{HarnessConfig, HwConfig, LogLevel, TestConfig, TestList};
use crate::hw::{
    FakeRigConfig, HardwareBackend, SIM_SETUP_UART, SIM_TARGET_UART, hardware_from_backend,
};
use crate::protocol::HardwareVariant;
use crate::scenario::{ScenarioId, Verdict};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

const SERVICE_NAME: &str = "bmdware-hil";

/// Simulated rig wired like the nRF52 bench and identified like the
/// configured DUT.
fn fake_rig_config(test: &TestConfig, hw: &HwConfig) -> FakeRigConfig {
    let builder = FakeRigConfig::builder()
        .maybe_target_address(test.device_mac())
        .maybe_adv_name(test.adv_name());
    match hw.pin_map(HardwareVariant::Nrf52) {
        Ok(pins) => builder
            .loopback(pins.loopback_pairs().collect())
            .setup_at_ctrl_pin(pins.at_ctrl_pin())
            .setup_beacon_only_pin(pins.beacon_only_pin())
            .build(),
        Err(_missing) => builder.build(),
    }
}

/// Resolves the hardware backend and points the configuration at it.
fn select_backend(fake: bool, config: HarnessConfig) -> (HardwareBackend, HarnessConfig) {
    if !fake {
        return (HardwareBackend::Real, config);
    }
    let rig = fake_rig_config(&config.test, &config.hw);
    let test = config
        .test
        .with_uart_paths(SIM_TARGET_UART, SIM_SETUP_UART)
        .with_default_device_mac(rig.target_address());
    (HardwareBackend::Fake(rig), HarnessConfig::new(test, config.hw))
}

fn scenarios_for(args: &Args) -> Result<Vec<ScenarioId>> {
    let ids = match args.command() {
        Command::List => Vec::new(),
        Command::Run(run) => ScenarioId::resolve(run.scenarios())?,
        Command::Suite(suite) => {
            let test_list = TestList::load(args.test_list())?;
            match suite.group() {
                Some(group) => ScenarioId::resolve(test_list.group(group)?)?,
                None => ScenarioId::resolve(&test_list.all())?,
            }
        }
    };
    Ok(ids)
}

/// Runs the CLI command against the process's terminal.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded, the hardware cannot be
/// opened, or output or the report cannot be written.
pub async fn run<W>(args: Args, out: &mut W) -> Result<Verdict>
where
    W: io::Write,
{
    run_with_clients(args, out, &SystemTerminalClient).await
}

/// Runs the CLI command with an injected terminal client.
///
/// `list` always yields [`Verdict::Pass`]; `run` and `suite` yield the suite
/// verdict.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded, the hardware cannot be
/// opened, or output or the report cannot be written.
#[instrument(
    skip(args, out, terminal_client),
    level = "info",
    fields(command = args.command().name(), fake = args.fake())
)]
pub async fn run_with_clients<W>(
    args: Args,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
) -> Result<Verdict>
where
    W: io::Write,
{
    if matches!(args.command(), Command::List) {
        telemetry::initialise_tracing(
            SERVICE_NAME,
            terminal_client.stderr_is_terminal(),
            args.log_level().map(LogLevel::as_level_filter),
        )?;
        crate::cli::list::run(args.test_list(), out, terminal_client)?;
        return Ok(Verdict::Pass);
    }

    let config = HarnessConfig::load(args.config(), args.hw_config())?;
    telemetry::initialise_tracing(
        SERVICE_NAME,
        terminal_client.stderr_is_terminal(),
        args.log_level()
            .or(config.test.log_level())
            .map(LogLevel::as_level_filter),
    )?;

    let scenarios = scenarios_for(&args)?;
    let pause = match args.command() {
        Command::Run(run) => run.pause(),
        Command::Suite(suite) => suite.pause(),
        Command::List => Default::default(),
    };
    let (backend, config) = select_backend(args.fake(), config);
    let backend_label = match backend {
        HardwareBackend::Real => "hardware",
        HardwareBackend::Fake(_) => "simulated",
    };
    info!(scenarios = scenarios.len(), backend = backend_label, "starting test run");
    let hardware = hardware_from_backend(backend).await?;

    BenchRun::builder()
        .scenarios(scenarios)
        .config(config)
        .hardware(hardware)
        .pause(pause)
        .report_dir(args.report_dir())
        .backend(backend_label)
        .build()
        .execute(out, terminal_client)
        .await
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::protocol::GpioPin;

    #[test]
    fn fake_mode_follows_the_configured_identity() {
        let test: TestConfig =
            serde_json::from_str(r#"{"target_uart": "/dev/ttyUSB0", "device_mac": "AA:BB:CC:DD:EE:FF"}"#)
                .expect("config parses");
        let config = HarnessConfig::new(test, HwConfig::default());

        let (backend, config) = select_backend(true, config);

        let HardwareBackend::Fake(rig) = backend else {
            panic!("fake mode should select the simulated rig");
        };
        assert_eq!("AA:BB:CC:DD:EE:FF", rig.target_address());
        assert_eq!(Some(SIM_TARGET_UART), config.test.target_uart());
        assert_eq!(Some(SIM_SETUP_UART), config.test.setup_uart());
        assert_eq!(Some("AA:BB:CC:DD:EE:FF"), config.test.device_mac());
    }

    #[test]
    fn fake_rig_uses_the_nrf52_wiring() {
        let hw: HwConfig = serde_json::from_str(
            r#"{"nrf52": {"at_ctrl_pin": "1A", "beacon_only_pin": "1B",
                          "output_pins": ["02"], "input_pins": ["03"]}}"#,
        )
        .expect("hw config parses");

        let rig = fake_rig_config(&TestConfig::default(), &hw);

        assert_eq!([(GpioPin(0x02), GpioPin(0x03))], rig.loopback());
        assert_eq!(GpioPin(0x1a), rig.setup_at_ctrl_pin());
    }

    #[test]
    fn real_mode_keeps_the_configuration() {
        let (backend, config) = select_backend(false, HarnessConfig::default());
        assert!(matches!(backend, HardwareBackend::Real));
        assert_eq!(None, config.test.target_uart());
    }
}
