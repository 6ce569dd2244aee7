//! JSON configuration: `test_config.json`, `hw_config.json` and
//! `test_list.json`.
//!
//! Every key of the test configuration is optional. A missing key, `null` or an
//! empty string all mean "do not constrain on this field".

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bon::Builder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_with::{DisplayFromStr, Map, NoneAsEmptyString, PickFirst, serde_as};
use tracing::level_filters::LevelFilter;
use tracing::{debug, instrument};

use crate::error::ConfigError;
use crate::protocol::{GpioPin, HardwareVariant};

pub const DEFAULT_TEST_CONFIG_PATH: &str = "test_config.json";
pub const DEFAULT_HW_CONFIG_PATH: &str = "hw_config.json";
pub const DEFAULT_TEST_LIST_PATH: &str = "test_list.json";

/// Report file name used when the configuration names none.
pub const DEFAULT_REPORT_FILE: &str = "test_report.csv";

const DEFAULT_TEST_BEACON_MAJOR: u16 = 9876;
const DEFAULT_TEST_BEACON_MINOR: u16 = 5234;
const DEFAULT_TEST_BEACON_UUID: [u8; 16] = [
    0x6d, 0x22, 0x4c, 0x46, 0xef, 0x86, 0x4b, 0x46, 0x92, 0x09, 0x0f, 0x55, 0x9e, 0xc3, 0xad, 0xb4,
];

/// Verbosity, given by name or as the numeric levels 1 (errors) to 5 (trace).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Deserialize, derive_more::Display)]
#[serde(try_from = "RawLogLevel")]
pub enum LogLevel {
    #[display("error")]
    Error,
    #[display("warn")]
    Warn,
    #[display("info")]
    Info,
    #[display("debug")]
    Debug,
    #[display("trace")]
    Trace,
}

impl LogLevel {
    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "error" => Ok(Self::Error),
            "2" | "warn" | "warning" => Ok(Self::Warn),
            "3" | "info" => Ok(Self::Info),
            "4" | "debug" => Ok(Self::Debug),
            "5" | "trace" => Ok(Self::Trace),
            other => Err(format!(
                "`{other}` is not a log level (use 1-5 or error, warn, info, debug, trace)"
            )),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLogLevel {
    Number(u8),
    Name(String),
}

impl TryFrom<RawLogLevel> for LogLevel {
    type Error = String;

    fn try_from(raw: RawLogLevel) -> Result<Self, String> {
        match raw {
            RawLogLevel::Number(level) => level.to_string().parse(),
            RawLogLevel::Name(name) => name.parse(),
        }
    }
}

/// iBeacon UUID written as 32 hexadecimal digits.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BeaconUuid(pub [u8; 16]);

impl Default for BeaconUuid {
    fn default() -> Self {
        Self(DEFAULT_TEST_BEACON_UUID)
    }
}

impl fmt::Display for BeaconUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for BeaconUuid {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let digits: String = value.chars().filter(|c| *c != '-').collect();
        let bytes = hex::decode(&digits).map_err(|error| format!("invalid beacon UUID: {error}"))?;
        let uuid: [u8; 16] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| format!("beacon UUID must be 16 bytes, got {}", bytes.len()))?;
        Ok(Self(uuid))
    }
}

/// Contents of `test_config.json`.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize, Builder)]
#[serde(default)]
pub struct TestConfig {
    #[serde_as(as = "NoneAsEmptyString")]
    #[builder(into)]
    target_uart: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[builder(into)]
    setup_uart: Option<String>,
    #[serde_as(as = "PickFirst<(Option<_>, NoneAsEmptyString)>")]
    baudrate: Option<u32>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[builder(into)]
    device_mac: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[builder(into)]
    adv_name: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[builder(into)]
    version_under_test: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    test_beacon_uuid: Option<BeaconUuid>,
    #[serde_as(as = "PickFirst<(Option<_>, NoneAsEmptyString)>")]
    test_beacon_major: Option<u16>,
    #[serde_as(as = "PickFirst<(Option<_>, NoneAsEmptyString)>")]
    test_beacon_minor: Option<u16>,
    #[serde_as(as = "PickFirst<(Option<_>, NoneAsEmptyString)>")]
    log_level: Option<LogLevel>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[builder(into)]
    report_file: Option<String>,
}

impl TestConfig {
    /// Loads `test_config.json`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }

    #[must_use]
    pub fn target_uart(&self) -> Option<&str> {
        self.target_uart.as_deref()
    }

    #[must_use]
    pub fn setup_uart(&self) -> Option<&str> {
        self.setup_uart.as_deref()
    }

    #[must_use]
    pub fn baudrate(&self) -> Option<u32> {
        self.baudrate
    }

    #[must_use]
    pub fn device_mac(&self) -> Option<&str> {
        self.device_mac.as_deref()
    }

    #[must_use]
    pub fn adv_name(&self) -> Option<&str> {
        self.adv_name.as_deref()
    }

    #[must_use]
    pub fn version_under_test(&self) -> Option<&str> {
        self.version_under_test.as_deref()
    }

    /// Beacon UUID the beacon scenarios program, defaulting to the one the
    /// bench has always used.
    #[must_use]
    pub fn test_beacon_uuid(&self) -> BeaconUuid {
        self.test_beacon_uuid.unwrap_or_default()
    }

    #[must_use]
    pub fn test_beacon_major(&self) -> u16 {
        self.test_beacon_major.unwrap_or(DEFAULT_TEST_BEACON_MAJOR)
    }

    #[must_use]
    pub fn test_beacon_minor(&self) -> u16 {
        self.test_beacon_minor.unwrap_or(DEFAULT_TEST_BEACON_MINOR)
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn report_file(&self) -> &str {
        self.report_file.as_deref().unwrap_or(DEFAULT_REPORT_FILE)
    }

    /// Replaces both UART paths, e.g. with the simulated rig's ports.
    #[must_use]
    pub fn with_uart_paths(mut self, target: &str, setup: &str) -> Self {
        self.target_uart = Some(target.to_string());
        self.setup_uart = Some(setup.to_string());
        self
    }

    /// Pins discovery to one address unless the file already does.
    #[must_use]
    pub fn with_default_device_mac(mut self, mac: &str) -> Self {
        self.device_mac.get_or_insert_with(|| mac.to_string());
        self
    }
}

/// Pin wiring of the test bench for one hardware variant.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Builder)]
pub struct PinMap {
    /// Setup-board output wired to the target's AT-mode strap.
    #[serde_as(as = "DisplayFromStr")]
    at_ctrl_pin: GpioPin,
    /// Setup-board output wired to the target's beacon-only strap.
    #[serde_as(as = "DisplayFromStr")]
    beacon_only_pin: GpioPin,
    /// Target outputs, each looped back to the input at the same index.
    #[serde_as(as = "Vec<DisplayFromStr>")]
    output_pins: Vec<GpioPin>,
    #[serde_as(as = "Vec<DisplayFromStr>")]
    input_pins: Vec<GpioPin>,
}

impl PinMap {
    #[must_use]
    pub fn at_ctrl_pin(&self) -> GpioPin {
        self.at_ctrl_pin
    }

    #[must_use]
    pub fn beacon_only_pin(&self) -> GpioPin {
        self.beacon_only_pin
    }

    #[must_use]
    pub fn output_pins(&self) -> &[GpioPin] {
        &self.output_pins
    }

    #[must_use]
    pub fn input_pins(&self) -> &[GpioPin] {
        &self.input_pins
    }

    /// Output/input pairs wired together on the bench.
    pub fn loopback_pairs(&self) -> impl Iterator<Item = (GpioPin, GpioPin)> + '_ {
        self.output_pins
            .iter()
            .copied()
            .zip(self.input_pins.iter().copied())
    }

    /// First loopback pair.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKey`] when no pair is configured.
    pub fn first_loopback(&self) -> Result<(GpioPin, GpioPin), ConfigError> {
        self.loopback_pairs().next().ok_or(ConfigError::MissingKey {
            key: "output_pins/input_pins",
        })
    }
}

/// Contents of `hw_config.json`.
#[derive(Debug, Clone, Default, Deserialize, Builder)]
pub struct HwConfig {
    nrf51: Option<PinMap>,
    nrf52: Option<PinMap>,
}

impl HwConfig {
    /// Loads `hw_config.json`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }

    /// Pin map selected by the hardware variant the setup board reported.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingPinMap`] for unknown variants or absent
    /// entries.
    pub fn pin_map(&self, variant: HardwareVariant) -> Result<&PinMap, ConfigError> {
        let pins = match variant {
            HardwareVariant::Nrf51 => self.nrf51.as_ref(),
            HardwareVariant::Nrf52 => self.nrf52.as_ref(),
            HardwareVariant::Unknown => None,
        };
        pins.ok_or_else(|| ConfigError::MissingPinMap {
            variant: variant.to_string(),
        })
    }
}

/// Contents of `test_list.json`: named groups of scenario names, in file
/// order.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct TestList {
    #[serde_as(as = "Map<_, _>")]
    groups: Vec<(String, Vec<String>)>,
}

impl TestList {
    /// Loads `test_list.json`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups
            .iter()
            .map(|(name, tests)| (name.as_str(), tests.as_slice()))
    }

    /// Scenario names of one group.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownGroup`] if no group has that name.
    pub fn group(&self, name: &str) -> Result<&[String], ConfigError> {
        self.groups
            .iter()
            .find(|(group, _)| group == name)
            .map(|(_, tests)| tests.as_slice())
            .ok_or_else(|| ConfigError::UnknownGroup {
                name: name.to_string(),
            })
    }

    /// Every scenario name, group by group.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|(_, tests)| tests.iter().cloned())
            .collect()
    }
}

/// Everything a run reads from disk.
#[derive(Debug, Clone, Default)]
pub struct HarnessConfig {
    pub test: TestConfig,
    pub hw: HwConfig,
}

impl HarnessConfig {
    #[must_use]
    pub fn new(test: TestConfig, hw: HwConfig) -> Self {
        Self { test, hw }
    }

    /// Loads both configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either file cannot be read or parsed.
    #[instrument(level = "debug", fields(test_config = %test_config.display(), hw_config = %hw_config.display()))]
    pub fn load(test_config: &Path, hw_config: &Path) -> Result<Self, ConfigError> {
        Ok(Self::new(TestConfig::load(test_config)?, HwConfig::load(hw_config)?))
    }

    /// Pin map for `variant`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingPinMap`] when the variant has no entry.
    pub fn pin_map(&self, variant: HardwareVariant) -> Result<&PinMap, ConfigError> {
        self.hw.pin_map(variant)
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: PathBuf::from(path),
        source,
    })?;
    debug!(path = %path.display(), bytes = text.len(), "loaded configuration file");
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: PathBuf::from(path),
        source,
    })
}
