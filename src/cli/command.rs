use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::{
    DEFAULT_HW_CONFIG_PATH, DEFAULT_TEST_CONFIG_PATH, DEFAULT_TEST_LIST_PATH, LogLevel,
};

/// Command-line options of the BMDware test bench.
#[derive(Debug, Parser)]
#[command(
    name = "bmdware-hil",
    about = "Hardware-in-the-loop tests for BMDware beacon and UART bridge firmware."
)]
pub struct Args {
    /// Test configuration: UART paths, DUT identity and beacon values.
    #[arg(long, global = true, default_value = DEFAULT_TEST_CONFIG_PATH)]
    config: PathBuf,
    /// Pin maps of the bench wiring per hardware variant.
    #[arg(long, global = true, default_value = DEFAULT_HW_CONFIG_PATH)]
    hw_config: PathBuf,
    /// Named groups of scenarios for `suite`.
    #[arg(long, global = true, default_value = DEFAULT_TEST_LIST_PATH)]
    test_list: PathBuf,
    /// Log verbosity, 1 (errors) to 5 (trace) or a level name. Overrides
    /// `log_level` in the test configuration.
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Runs against the simulated two-board rig instead of real hardware.
    #[arg(long, global = true)]
    fake: bool,
    /// Directory the CSV report is written to.
    #[arg(long, global = true, default_value = ".")]
    report_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing, using the default
    /// file locations.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            config: PathBuf::from(DEFAULT_TEST_CONFIG_PATH),
            hw_config: PathBuf::from(DEFAULT_HW_CONFIG_PATH),
            test_list: PathBuf::from(DEFAULT_TEST_LIST_PATH),
            log_level: None,
            fake: false,
            report_dir: PathBuf::from("."),
            command,
        }
    }

    /// Points every configuration file and the report into `directory`.
    #[must_use]
    pub fn with_directory(mut self, directory: &Path) -> Self {
        self.config = directory.join(DEFAULT_TEST_CONFIG_PATH);
        self.hw_config = directory.join(DEFAULT_HW_CONFIG_PATH);
        self.test_list = directory.join(DEFAULT_TEST_LIST_PATH);
        self.report_dir = directory.to_path_buf();
        self
    }

    #[must_use]
    pub fn with_fake(mut self, fake: bool) -> Self {
        self.fake = fake;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = Some(log_level);
        self
    }

    #[must_use]
    pub fn config(&self) -> &Path {
        &self.config
    }

    #[must_use]
    pub fn hw_config(&self) -> &Path {
        &self.hw_config
    }

    #[must_use]
    pub fn test_list(&self) -> &Path {
        &self.test_list
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn fake(&self) -> bool {
        self.fake
    }

    #[must_use]
    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    #[must_use]
    pub fn command(&self) -> &Command {
        &self.command
    }
}

/// Supported CLI commands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the scenario catalog and the groups of the test list.
    List,
    /// Run the named scenarios in order.
    Run(RunArgs),
    /// Run one group of the test list, or every group in file order.
    Suite(SuiteArgs),
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Run(_args) => "run",
            Self::Suite(_args) => "suite",
        }
    }
}

/// Arguments of `run`.
#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    /// Scenario names as printed by `list`; legacy script paths are accepted.
    #[arg(required = true)]
    scenarios: Vec<String>,
    /// Pause between scenarios (e.g. `500ms`, `2s`).
    #[arg(long, default_value = "0s", value_parser = parse_duration)]
    pause: Duration,
}

impl RunArgs {
    #[must_use]
    pub fn new<S: Into<String>>(scenarios: impl IntoIterator<Item = S>) -> Self {
        Self {
            scenarios: scenarios.into_iter().map(Into::into).collect(),
            pause: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn scenarios(&self) -> &[String] {
        &self.scenarios
    }

    #[must_use]
    pub fn pause(&self) -> Duration {
        self.pause
    }
}

/// Arguments of `suite`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct SuiteArgs {
    /// Group of the test list; every group runs when omitted.
    group: Option<String>,
    /// Pause between scenarios (e.g. `500ms`, `2s`).
    #[arg(long, default_value = "0s", value_parser = parse_duration)]
    pause: Duration,
}

impl SuiteArgs {
    #[must_use]
    pub fn new(group: Option<String>) -> Self {
        Self {
            group,
            pause: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    #[must_use]
    pub fn pause(&self) -> Duration {
        self.pause
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
