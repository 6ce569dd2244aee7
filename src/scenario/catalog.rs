use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use super::beacon::{AtBeaconSettings, BeaconPayload, CustomBeaconData};
use super::gpio::{AtDeviceReset, AtGpioConfig, GpioConfig, GpioStatusPin};
use super::info::{ConnectableTxPower, DeviceInfo};
use super::lock::{AtLockUnlock, LockUnlock, PasswordChange};
use super::runner::Scenario;
use super::uart::{AtUartSettings, UartPassthrough};
use crate::error::ConfigError;

/// Every scenario the harness knows.
///
/// Names are kebab-case; the script paths of older test lists are accepted as
/// aliases.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, EnumString, Display)]
pub enum ScenarioId {
    #[strum(to_string = "beacon-payload", serialize = "beacon/beacon_payload_test.js")]
    BeaconPayload,
    #[strum(to_string = "at-beacon-settings", serialize = "beacon/at_beacon_test.js")]
    AtBeaconSettings,
    #[strum(
        to_string = "custom-beacon-data",
        serialize = "beacon/custom_beacon_data_test.js"
    )]
    CustomBeaconData,
    #[strum(
        to_string = "connectable-tx-power",
        serialize = "beacon/connectable_tx_power_test.js"
    )]
    ConnectableTxPower,
    #[strum(to_string = "lock-unlock", serialize = "misc/lock_unlock_test.js")]
    LockUnlock,
    #[strum(to_string = "password-change", serialize = "misc/password_change_test.js")]
    PasswordChange,
    #[strum(to_string = "at-lock-unlock", serialize = "misc/at_lock_unlock_test.js")]
    AtLockUnlock,
    #[strum(to_string = "gpio-config", serialize = "gpio/gpio_config_test.js")]
    GpioConfig,
    #[strum(to_string = "gpio-status-pin", serialize = "gpio/gpio_status_test.js")]
    GpioStatusPin,
    #[strum(to_string = "at-gpio-config", serialize = "gpio/at_gpio_config_test.js")]
    AtGpioConfig,
    #[strum(to_string = "at-device-reset", serialize = "misc/at_device_reset_test.js")]
    AtDeviceReset,
    #[strum(to_string = "uart-passthrough", serialize = "uart/uart_passthrough_big_test.js")]
    UartPassthrough,
    #[strum(to_string = "at-uart-settings", serialize = "uart/at_uart_test.js")]
    AtUartSettings,
    #[strum(to_string = "device-info", serialize = "misc/device_info_test.js")]
    DeviceInfo,
}

impl ScenarioId {
    /// Name used in reports.
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::BeaconPayload => "Beacon Payload",
            Self::AtBeaconSettings => "AT Beacon Setting Test",
            Self::CustomBeaconData => "Custom Beacon Data Test",
            Self::ConnectableTxPower => "Connectable TX Power",
            Self::LockUnlock => "LockUnlock Test",
            Self::PasswordChange => "PasswordChange Test",
            Self::AtLockUnlock => "AT Lock Unlock Test",
            Self::GpioConfig => "GpioConfig Test",
            Self::GpioStatusPin => "GPIO status Test",
            Self::AtGpioConfig => "AT GPIO Config Test",
            Self::AtDeviceReset => "AT Device Reset Test",
            Self::UartPassthrough => "Uart Passthrough Big",
            Self::AtUartSettings => "AT UART Setting Test",
            Self::DeviceInfo => "Device Info",
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::BeaconPayload => "iBeacon fields written over BLE show up in the advertisement",
            Self::AtBeaconSettings => "iBeacon fields written over AT show up in the advertisement",
            Self::CustomBeaconData => "custom advertising payload is saved, advertised and cleared",
            Self::ConnectableTxPower => "lowering the connectable TX power lowers the received RSSI",
            Self::LockUnlock => "a password locks every protected BLE command until unlocked",
            Self::PasswordChange => "only the newest password unlocks the device",
            Self::AtLockUnlock => "AT unlock lasts one command and getters work while locked",
            Self::GpioConfig => "GPIO configuration round-trips over BLE",
            Self::GpioStatusPin => "the connection status pin reports the BLE link",
            Self::AtGpioConfig => "looped-back pins follow writes and pulls over AT",
            Self::AtDeviceReset => "a device reset clears the GPIO configuration",
            Self::UartPassthrough => "256 bytes cross the UART bridge in both directions",
            Self::AtUartSettings => "UART settings written over AT read back over BLE",
            Self::DeviceInfo => "serial number and firmware revision are readable",
        }
    }

    /// Whether the scenario drives the setup board and the target's UART.
    #[must_use]
    pub fn uses_setup_board(self) -> bool {
        matches!(
            self,
            Self::AtBeaconSettings
                | Self::AtLockUnlock
                | Self::AtGpioConfig
                | Self::AtDeviceReset
                | Self::AtUartSettings
        )
    }

    #[must_use]
    pub fn scenario(self) -> Box<dyn Scenario> {
        match self {
            Self::BeaconPayload => Box::new(BeaconPayload),
            Self::AtBeaconSettings => Box::new(AtBeaconSettings),
            Self::CustomBeaconData => Box::new(CustomBeaconData),
            Self::ConnectableTxPower => Box::new(ConnectableTxPower),
            Self::LockUnlock => Box::new(LockUnlock),
            Self::PasswordChange => Box::new(PasswordChange),
            Self::AtLockUnlock => Box::new(AtLockUnlock),
            Self::GpioConfig => Box::new(GpioConfig),
            Self::GpioStatusPin => Box::new(GpioStatusPin),
            Self::AtGpioConfig => Box::new(AtGpioConfig),
            Self::AtDeviceReset => Box::new(AtDeviceReset),
            Self::UartPassthrough => Box::new(UartPassthrough),
            Self::AtUartSettings => Box::new(AtUartSettings),
            Self::DeviceInfo => Box::new(DeviceInfo),
        }
    }

    /// Resolves scenario names, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownScenario`] for the first unknown name.
    pub fn resolve<S: AsRef<str>>(names: &[S]) -> Result<Vec<Self>, ConfigError> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref().trim();
                name.parse().map_err(|_| ConfigError::UnknownScenario {
                    name: name.to_string(),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn all() -> Vec<Self> {
        Self::iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("beacon-payload", ScenarioId::BeaconPayload)]
    #[case("beacon/beacon_payload_test.js", ScenarioId::BeaconPayload)]
    #[case(" uart-passthrough ", ScenarioId::UartPassthrough)]
    #[case("misc/at_lock_unlock_test.js", ScenarioId::AtLockUnlock)]
    fn names_and_legacy_paths_resolve(#[case] name: &str, #[case] expected: ScenarioId) {
        assert_eq!(vec![expected], ScenarioId::resolve(&[name]).expect("resolves"));
    }

    #[test]
    fn display_uses_the_kebab_name() {
        assert_eq!("at-gpio-config", ScenarioId::AtGpioConfig.to_string());
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert_matches!(
            ScenarioId::resolve(&["beacon-payload", "warp-drive"]),
            Err(ConfigError::UnknownScenario { name }) if name == "warp-drive"
        );
    }

    #[test]
    fn every_scenario_reports_its_own_id() {
        for id in ScenarioId::iter() {
            assert_eq!(id, id.scenario().id());
        }
    }
}
