use std::collections::HashMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

const BEACON_CONFIG_BASE_UUID: &str = "24130000707f90bd20452ab8807571b7";
const UART_BASE_UUID: &str = "6e400000b5a3f393e0a9e50e24dcca9e";
const BLUETOOTH_BASE_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Largest argument block accepted by one control-point write.
pub const MAX_CONTROL_POINT_ARGS: usize = 19;
/// Bytes carried by the first custom beacon data write.
pub const CUSTOM_BEACON_DATA_PART1_LEN: usize = 19;
/// Bytes carried by the second custom beacon data write.
pub const CUSTOM_BEACON_DATA_PART2_LEN: usize = 12;
/// Accepted password lengths.
pub const PASSWORD_LEN: std::ops::RangeInclusive<usize> = 4..=19;
/// Password the firmware treats as "no password set".
pub const DEFAULT_PASSWORD: &str = "password1234";
/// Largest attribute write used for UART passthrough.
pub const UART_CHUNK_LEN: usize = 20;

/// Soft reset token written to the control point.
pub const SOFT_RESET_TOKEN: [u8; 4] = [0x4b, 0x10, 0x2f, 0x37];
/// Bootloader entry token written to the control point.
pub const BOOTLOADER_TOKEN: [u8; 4] = [0x03, 0x56, 0x30, 0x57];
/// Factory defaults token written to the control point.
pub const FACTORY_DEFAULTS_TOKEN: [u8; 16] = [
    0x48, 0xb0, 0xfc, 0xd6, 0x16, 0xab, 0x43, 0xac, 0x83, 0x45, 0x3d, 0xae, 0xb9, 0x99, 0xc2, 0x9c,
];

/// Control-point notification raised when the UART TX buffer is almost full.
pub const UART_BUFFER_ALMOST_FULL: u8 = 0x09;
/// Control-point notification raised when the UART TX buffer is full.
pub const UART_BUFFER_FULL: u8 = 0x0a;

/// Factory beacon UUID.
pub const DEFAULT_BEACON_UUID: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
];

/// Apple company identifier and iBeacon type/length prefix.
pub const IBEACON_PREFIX: [u8; 4] = [0x4c, 0x00, 0x02, 0x15];

/// Transmit power levels accepted by the firmware, in dBm.
pub const VALID_TX_POWERS: [i8; 9] = [-40, -30, -20, -16, -12, -8, -4, 0, 4];
/// Highest supported transmit power.
pub const TX_POWER_HIGH: i8 = 4;
/// Factory transmit power.
pub const TX_POWER_DEFAULT: i8 = -4;
/// Lowest transmit power used by the RSSI comparison.
pub const TX_POWER_LOW: i8 = -30;

/// Known BMDware GATT endpoints.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum EndpointId {
    #[strum(to_string = "beacon_config_service")]
    BeaconConfigService,
    #[strum(to_string = "control_point")]
    ControlPoint,
    #[strum(to_string = "beacon_uuid")]
    BeaconUuid,
    #[strum(to_string = "beacon_major")]
    BeaconMajor,
    #[strum(to_string = "beacon_minor")]
    BeaconMinor,
    #[strum(to_string = "beacon_adv_interval")]
    BeaconAdvInterval,
    #[strum(to_string = "beacon_tx_power")]
    BeaconTxPower,
    #[strum(to_string = "beacon_enable")]
    BeaconEnable,
    #[strum(to_string = "connectable_tx_power")]
    ConnectableTxPower,
    #[strum(to_string = "uart_service")]
    UartService,
    /// Host to device UART data.
    #[strum(to_string = "uart_rx")]
    UartRx,
    /// Device to host UART data.
    #[strum(to_string = "uart_tx")]
    UartTx,
    #[strum(to_string = "uart_baud_rate")]
    UartBaudRate,
    #[strum(to_string = "uart_parity")]
    UartParity,
    #[strum(to_string = "uart_flow_control")]
    UartFlowControl,
    #[strum(to_string = "uart_enable")]
    UartEnable,
    #[strum(to_string = "serial_number")]
    SerialNumber,
    #[strum(to_string = "firmware_revision")]
    FirmwareRevision,
}

/// Descriptive metadata for one endpoint.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    uuid: String,
}

impl EndpointMetadata {
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Canonical hyphenated lowercase UUID.
    pub(crate) fn uuid(&self) -> &str {
        &self.uuid
    }
}

static ENDPOINTS_BY_ID: LazyLock<HashMap<EndpointId, EndpointMetadata>> = LazyLock::new(|| {
    EndpointId::iter()
        .map(|endpoint| (endpoint, metadata_for(endpoint)))
        .collect()
});

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    ENDPOINTS_BY_ID
        .get(&endpoint)
        .cloned()
        .unwrap_or_else(|| metadata_for(endpoint))
}

/// Resolves an endpoint from any textual UUID form.
pub(crate) fn endpoint_for_uuid(uuid: &str) -> Option<EndpointId> {
    let wanted = compact_uuid(uuid);
    EndpointId::iter().find(|endpoint| compact_uuid(endpoint_metadata(*endpoint).uuid()) == wanted)
}

/// Services advertised by BMDware, used to narrow discovery.
pub(crate) fn bmdware_service_uuids() -> Vec<String> {
    [EndpointId::BeaconConfigService, EndpointId::UartService]
        .into_iter()
        .map(|endpoint| endpoint_metadata(endpoint).uuid().to_string())
        .collect()
}

/// Substitutes a short identifier into a 128-bit vendor base UUID.
///
/// Four-character ids replace the `0000` group at offset 4; five-character
/// ids replace the `00000` group at offset 3.
pub(crate) fn full_uuid_from_base(base: &str, short: &str) -> String {
    let compact = compact_uuid(base);
    let offset = if short.len() == 5 { 3 } else { 4 };
    let end = (offset + short.len()).min(compact.len());
    let mut merged = String::with_capacity(compact.len());
    merged.push_str(&compact[..offset]);
    merged.push_str(&short.to_ascii_lowercase());
    merged.push_str(&compact[end..]);
    hyphenate(&merged)
}

fn sig_uuid(short: &str) -> String {
    format!("0000{short}{BLUETOOTH_BASE_SUFFIX}")
}

fn compact_uuid(uuid: &str) -> String {
    uuid.chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn hyphenate(compact: &str) -> String {
    if compact.len() != 32 {
        return compact.to_string();
    }
    format!(
        "{}-{}-{}-{}-{}",
        &compact[0..8],
        &compact[8..12],
        &compact[12..16],
        &compact[16..20],
        &compact[20..32]
    )
}

fn metadata_for(endpoint: EndpointId) -> EndpointMetadata {
    let beacon = |short: &str| full_uuid_from_base(BEACON_CONFIG_BASE_UUID, short);
    let uart = |short: &str| full_uuid_from_base(UART_BASE_UUID, short);
    let endpoint_named = |name, uuid| EndpointMetadata { name, uuid };

    match endpoint {
        EndpointId::BeaconConfigService => {
            endpoint_named("BMDware beacon configuration service", beacon("b33f"))
        }
        EndpointId::ControlPoint => endpoint_named("control point", beacon("b43f")),
        EndpointId::BeaconUuid => endpoint_named("beacon UUID", beacon("b53f")),
        EndpointId::BeaconMajor => endpoint_named("beacon major", beacon("b63f")),
        EndpointId::BeaconMinor => endpoint_named("beacon minor", beacon("b73f")),
        EndpointId::BeaconAdvInterval => {
            endpoint_named("beacon advertising interval", beacon("b83f"))
        }
        EndpointId::BeaconTxPower => endpoint_named("beacon tx power", beacon("b93f")),
        EndpointId::BeaconEnable => endpoint_named("beacon enable", beacon("ba3f")),
        EndpointId::ConnectableTxPower => endpoint_named("connectable tx power", beacon("bb3f")),
        EndpointId::UartService => endpoint_named("BMDware UART service", uart("00001")),
        EndpointId::UartRx => endpoint_named("UART RX", uart("00002")),
        EndpointId::UartTx => endpoint_named("UART TX", uart("00003")),
        EndpointId::UartBaudRate => endpoint_named("UART baud rate", uart("00004")),
        EndpointId::UartParity => endpoint_named("UART parity", uart("00005")),
        EndpointId::UartFlowControl => endpoint_named("UART flow control", uart("00006")),
        EndpointId::UartEnable => endpoint_named("UART enable", uart("00008")),
        EndpointId::SerialNumber => endpoint_named("serial number", sig_uuid("2a25")),
        EndpointId::FirmwareRevision => endpoint_named("firmware revision", sig_uuid("2a26")),
    }
}

/// Control-point opcodes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum ControlOpcode {
    #[strum(to_string = "custom beacon data part 1")]
    CustomBeaconData1,
    #[strum(to_string = "custom beacon data part 2")]
    CustomBeaconData2,
    #[strum(to_string = "save custom beacon data")]
    SaveCustomBeaconData,
    #[strum(to_string = "clear custom beacon data")]
    ClearCustomBeaconData,
    #[strum(to_string = "set password")]
    SetPassword,
    #[strum(to_string = "set RSSI calibration")]
    SetRssiCalibration,
    #[strum(to_string = "get RSSI calibration")]
    GetRssiCalibration,
    #[strum(to_string = "set connectable advertising interval")]
    SetConnectableAdvInterval,
    #[strum(to_string = "get connectable advertising interval")]
    GetConnectableAdvInterval,
    #[strum(to_string = "set GPIO config")]
    SetGpioConfig,
    #[strum(to_string = "write GPIO")]
    WriteGpio,
    #[strum(to_string = "read GPIO")]
    ReadGpio,
    #[strum(to_string = "get GPIO config")]
    GetGpioConfig,
    #[strum(to_string = "configure status pin")]
    ConfigureStatusPin,
    #[strum(to_string = "deconfigure status pin")]
    DeconfigureStatusPin,
    #[strum(to_string = "get status pin config")]
    GetStatusPinConfig,
    #[strum(to_string = "read status pin")]
    ReadStatusPin,
    #[strum(to_string = "unlock")]
    Unlock,
}

impl ControlOpcode {
    /// Wire value of the opcode.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::CustomBeaconData1 => 0x20,
            Self::CustomBeaconData2 => 0x21,
            Self::SaveCustomBeaconData => 0x22,
            Self::ClearCustomBeaconData => 0x23,
            Self::SetPassword => 0x31,
            Self::SetRssiCalibration => 0x40,
            Self::GetRssiCalibration => 0x41,
            Self::SetConnectableAdvInterval => 0x42,
            Self::GetConnectableAdvInterval => 0x43,
            Self::SetGpioConfig => 0x50,
            Self::WriteGpio => 0x51,
            Self::ReadGpio => 0x52,
            Self::GetGpioConfig => 0x53,
            Self::ConfigureStatusPin => 0x54,
            Self::DeconfigureStatusPin => 0x55,
            Self::GetStatusPinConfig => 0x56,
            Self::ReadStatusPin => 0x57,
            Self::Unlock => 0xf8,
        }
    }

    /// Maps a wire value back to the opcode, if known.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::iter().find(|opcode| opcode.code() == code)
    }
}

/// AT command mnemonics understood by the firmware.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, EnumString, Display)]
pub enum AtMnemonic {
    #[strum(serialize = "at$ben")]
    BeaconEnable,
    #[strum(serialize = "at$buuid")]
    BeaconUuid,
    #[strum(serialize = "at$bmjid")]
    BeaconMajor,
    #[strum(serialize = "at$bmnid")]
    BeaconMinor,
    #[strum(serialize = "at$badint")]
    BeaconAdvInterval,
    #[strum(serialize = "at$btxpwr")]
    BeaconTxPower,
    #[strum(serialize = "at$cusbcn")]
    CustomBeaconData,
    #[strum(serialize = "at$cbclr")]
    CustomBeaconClear,
    #[strum(serialize = "at$bcal")]
    RssiCalibration,
    #[strum(serialize = "at$ver")]
    Version,
    #[strum(serialize = "at$blver")]
    BootloaderVersion,
    #[strum(serialize = "at$ctxpwr")]
    ConnectableTxPower,
    #[strum(serialize = "at$conadv")]
    ConnectableAdvEnable,
    #[strum(serialize = "at$cadint")]
    ConnectableAdvInterval,
    #[strum(serialize = "at$password")]
    Password,
    #[strum(serialize = "at$unlock")]
    Unlock,
    #[strum(serialize = "at$devrst")]
    DeviceReset,
    #[strum(serialize = "at$defaults")]
    ResetDefaults,
    #[strum(serialize = "at$hwinfo")]
    HardwareInfo,
    #[strum(serialize = "at$hotswap")]
    Hotswap,
    #[strum(serialize = "at$mac")]
    Mac,
    #[strum(serialize = "at$gcfg")]
    GpioConfig,
    #[strum(serialize = "at$gset")]
    GpioWrite,
    #[strum(serialize = "at$gread")]
    GpioRead,
    #[strum(serialize = "at$gcget")]
    GpioConfigGet,
    #[strum(serialize = "at$ubr")]
    UartBaudRate,
    #[strum(serialize = "at$upar")]
    UartParity,
    #[strum(serialize = "at$ufc")]
    UartFlowControl,
    #[strum(serialize = "at$uen")]
    UartEnable,
}

impl AtMnemonic {
    /// Whether a set form of the command needs the device to be unlocked.
    #[must_use]
    pub fn requires_unlock(self) -> bool {
        !matches!(
            self,
            Self::Version
                | Self::BootloaderVersion
                | Self::Unlock
                | Self::DeviceReset
                | Self::HardwareInfo
                | Self::Mac
                | Self::GpioRead
                | Self::GpioConfigGet
        )
    }
}

/// Bare attention line used to detect AT mode.
pub const AT_ATTENTION: &str = "AT";
/// AT success token.
pub const AT_OK: &str = "OK";
/// AT failure token.
pub const AT_ERR: &str = "ERR";
/// AT locked token.
pub const AT_LOCKED: &str = "LOCKED";
/// AT reply for an unknown command.
pub const AT_UNKNOWN: &str = "???";
/// Hardware-info substring for nRF51 modules.
pub const NRF51_HW_ID: &str = "NRF51";
/// Hardware-info substring for nRF52 modules.
pub const NRF52_HW_ID: &str = "NRF52";

/// Hardware variant reported by `at$hwinfo`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Display)]
pub enum HardwareVariant {
    #[default]
    #[strum(to_string = "Unknown")]
    Unknown,
    #[strum(to_string = "NRF51")]
    Nrf51,
    #[strum(to_string = "NRF52")]
    Nrf52,
}

impl HardwareVariant {
    /// Classifies a hardware-info reply by substring.
    #[must_use]
    pub fn from_hardware_info(reply: &str) -> Self {
        if reply.contains(NRF51_HW_ID) {
            Self::Nrf51
        } else if reply.contains(NRF52_HW_ID) {
            Self::Nrf52
        } else {
            Self::Unknown
        }
    }
}

/// GPIO pin index as understood by the firmware pin map.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct GpioPin(pub u8);

impl fmt::Display for GpioPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

/// Pins are written as hexadecimal pin-map indices (`"0A"`, `"0x0a"`).
impl FromStr for GpioPin {
    type Err = ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let digits = value
            .trim()
            .trim_start_matches("0x")
            .trim_start_matches("0X");
        u8::from_str_radix(digits, 16).map(Self)
    }
}

/// GPIO direction.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum Direction {
    #[default]
    #[strum(to_string = "in")]
    In,
    #[strum(to_string = "out")]
    Out,
}

impl Direction {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::In => 0,
            Self::Out => 1,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::iter().find(|value| value.code() == code)
    }
}

/// GPIO pull configuration.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum Pull {
    #[default]
    #[strum(to_string = "none")]
    None,
    #[strum(to_string = "down")]
    Down,
    #[strum(to_string = "up")]
    Up,
}

impl Pull {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Down => 1,
            Self::Up => 3,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::iter().find(|value| value.code() == code)
    }
}

/// Logic level of a pin; also used for status-pin polarity.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum Level {
    #[default]
    #[strum(to_string = "low")]
    Low,
    #[strum(to_string = "high")]
    High,
}

impl Level {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::High => 1,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::iter().find(|value| value.code() == code)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(EndpointId::ControlPoint, "2413b43f-707f-90bd-2045-2ab8807571b7")]
    #[case(EndpointId::BeaconConfigService, "2413b33f-707f-90bd-2045-2ab8807571b7")]
    #[case(EndpointId::UartTx, "6e400003-b5a3-f393-e0a9-e50e24dcca9e")]
    #[case(EndpointId::UartEnable, "6e400008-b5a3-f393-e0a9-e50e24dcca9e")]
    #[case(EndpointId::FirmwareRevision, "00002a26-0000-1000-8000-00805f9b34fb")]
    fn endpoint_uuids_expand_from_vendor_bases(
        #[case] endpoint: EndpointId,
        #[case] expected: &str,
    ) {
        assert_eq!(expected, endpoint_metadata(endpoint).uuid());
    }

    #[test]
    fn endpoint_lookup_ignores_uuid_formatting() {
        assert_eq!(
            Some(EndpointId::UartRx),
            endpoint_for_uuid("6E400002B5A3F393E0A9E50E24DCCA9E")
        );
        assert_eq!(None, endpoint_for_uuid("deadbeef"));
    }

    #[test]
    fn every_endpoint_resolves_back_from_its_uuid() {
        for endpoint in EndpointId::iter() {
            let metadata = endpoint_metadata(endpoint);
            assert!(!metadata.name().is_empty(), "{endpoint}");
            assert_eq!(Some(endpoint), endpoint_for_uuid(metadata.uuid()));
        }
    }

    #[test]
    fn opcode_codes_round_trip() {
        for opcode in ControlOpcode::iter() {
            assert_eq!(Some(opcode), ControlOpcode::from_code(opcode.code()));
        }
    }

    #[test]
    fn mnemonics_render_firmware_names() {
        assert_eq!("at$ubr", AtMnemonic::UartBaudRate.to_string());
        assert_eq!(Ok(AtMnemonic::GpioConfigGet), "at$gcget".parse());
    }

    #[rstest]
    #[case("BMD-300 NRF52832", HardwareVariant::Nrf52)]
    #[case("NRF51822", HardwareVariant::Nrf51)]
    #[case("", HardwareVariant::Unknown)]
    fn hardware_variant_is_selected_by_substring(
        #[case] reply: &str,
        #[case] expected: HardwareVariant,
    ) {
        assert_eq!(expected, HardwareVariant::from_hardware_info(reply));
    }

    #[rstest]
    #[case("09", 0x09)]
    #[case("0A", 0x0a)]
    #[case("0x17", 0x17)]
    fn gpio_pins_parse_as_hex(#[case] text: &str, #[case] expected: u8) {
        assert_eq!(Ok(GpioPin(expected)), text.parse());
    }

    #[test]
    fn pull_codes_skip_reserved_value() {
        assert_eq!(3, Pull::Up.code());
        assert_eq!(None, Pull::from_code(2));
    }
}
