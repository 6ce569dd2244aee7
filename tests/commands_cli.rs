use std::fs;
use std::path::Path;

use clap::Parser;
use pretty_assertions::assert_eq;

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl bmdware_hil::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

const TEST_CONFIG: &str = r#"{
    "target_uart": "/dev/ttyUSB0",
    "setup_uart": "/dev/ttyUSB1",
    "device_mac": "",
    "adv_name": "BMDware",
    "test_beacon_uuid": "6d224c46ef864b4692090f559ec3adb4",
    "test_beacon_major": 9876,
    "test_beacon_minor": 5234,
    "report_file": "bench_report.csv"
}"#;

const HW_CONFIG: &str = r#"{
    "nrf52": {
        "at_ctrl_pin": "0C",
        "beacon_only_pin": "0D",
        "output_pins": ["0E", "10"],
        "input_pins": ["0F", "11"]
    }
}"#;

const TEST_LIST: &str = r#"{
    "beacon": ["beacon-payload"],
    "gpio": ["gpio-config", "gpio-status-pin"]
}"#;

fn write_bench_files(directory: &Path) {
    fs::write(directory.join("test_config.json"), TEST_CONFIG).expect("test config written");
    fs::write(directory.join("hw_config.json"), HW_CONFIG).expect("hw config written");
    fs::write(directory.join("test_list.json"), TEST_LIST).expect("test list written");
}

async fn run_with_parsed_args(args: bmdware_hil::Args) -> anyhow::Result<(bmdware_hil::Verdict, String)> {
    let mut output = Vec::new();
    let verdict = bmdware_hil::run_with_clients(args, &mut output, &FakeTerminalClient).await?;
    Ok((verdict, String::from_utf8(output)?))
}

fn reports_in(directory: &Path) -> Vec<String> {
    let mut reports: Vec<String> = fs::read_dir(directory)
        .expect("directory readable")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with("_bench_report.csv"))
        .collect();
    reports.sort();
    reports
}

#[tokio::test(start_paused = true)]
async fn suite_group_runs_on_the_simulated_rig_and_writes_a_report() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    write_bench_files(directory.path());
    let args = bmdware_hil::Args::new(bmdware_hil::Command::Suite(bmdware_hil::SuiteArgs::new(
        Some("gpio".to_string()),
    )))
    .with_directory(directory.path())
    .with_fake(true);

    let (verdict, stdout) = run_with_parsed_args(args).await?;

    assert_eq!(bmdware_hil::Verdict::Pass, verdict, "{stdout}");
    assert!(stdout.contains("GpioConfig Test"), "{stdout}");
    assert!(stdout.contains("simulated"), "{stdout}");

    let reports = reports_in(directory.path());
    assert_eq!(1, reports.len(), "{reports:?}");
    let csv = fs::read_to_string(directory.path().join(&reports[0]))?;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!("TestName,StartTime,RunTime,Result,Note", lines[0]);
    assert_eq!(4, lines.len(), "{csv}");
    assert!(lines[1].starts_with("GpioConfig Test,"), "{csv}");
    assert!(lines[3].starts_with("Test Suite,"), "{csv}");
    assert!(lines[3].ends_with(",PASS,"), "{csv}");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn run_accepts_legacy_script_names() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    write_bench_files(directory.path());
    let args = bmdware_hil::Args::try_parse_from([
        "bmdware-hil",
        "--fake",
        "run",
        "misc/device_info_test.js",
        "beacon-payload",
    ])?
    .with_directory(directory.path());

    let (verdict, stdout) = run_with_parsed_args(args).await?;

    assert_eq!(bmdware_hil::Verdict::Pass, verdict, "{stdout}");
    assert!(stdout.contains("Device Info"), "{stdout}");
    assert!(stdout.contains("Beacon Payload"), "{stdout}");
    assert_eq!(1, reports_in(directory.path()).len());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unknown_scenario_is_an_error() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    write_bench_files(directory.path());
    let args = bmdware_hil::Args::new(bmdware_hil::Command::Run(bmdware_hil::RunArgs::new([
        "no-such-scenario",
    ])))
    .with_directory(directory.path())
    .with_fake(true);

    let error = run_with_parsed_args(args)
        .await
        .expect_err("unknown scenario should be rejected");

    assert!(format!("{error:#}").contains("no-such-scenario"), "{error:#}");
    assert!(reports_in(directory.path()).is_empty());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unknown_group_is_an_error() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    write_bench_files(directory.path());
    let args = bmdware_hil::Args::new(bmdware_hil::Command::Suite(bmdware_hil::SuiteArgs::new(
        Some("power".to_string()),
    )))
    .with_directory(directory.path())
    .with_fake(true);

    let error = run_with_parsed_args(args)
        .await
        .expect_err("unknown group should be rejected");

    assert!(format!("{error:#}").contains("power"), "{error:#}");

    Ok(())
}

#[tokio::test]
async fn list_prints_the_catalog_and_groups() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    write_bench_files(directory.path());
    let args = bmdware_hil::Args::new(bmdware_hil::Command::List).with_directory(directory.path());

    let (verdict, stdout) = run_with_parsed_args(args).await?;

    assert_eq!(bmdware_hil::Verdict::Pass, verdict);
    assert!(stdout.contains("Scenarios:"), "{stdout}");
    assert!(stdout.contains("uart-passthrough"), "{stdout}");
    assert!(stdout.contains("Test list:"), "{stdout}");
    assert!(stdout.contains("gpio-config, gpio-status-pin"), "{stdout}");

    Ok(())
}

#[tokio::test]
async fn list_without_a_test_list_shows_the_catalog() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let args = bmdware_hil::Args::new(bmdware_hil::Command::List).with_directory(directory.path());

    let (_verdict, stdout) = run_with_parsed_args(args).await?;

    assert!(stdout.contains("Scenarios:"), "{stdout}");
    assert!(!stdout.contains("Test list:"), "{stdout}");

    Ok(())
}
