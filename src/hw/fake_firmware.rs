use std::collections::BTreeMap;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::codec::StatusCode;
use crate::protocol::{
    AT_ATTENTION, AT_ERR, AT_LOCKED, AT_OK, AT_UNKNOWN, AtMnemonic, BOOTLOADER_TOKEN,
    CUSTOM_BEACON_DATA_PART1_LEN, CUSTOM_BEACON_DATA_PART2_LEN, ControlOpcode, DEFAULT_BEACON_UUID,
    DEFAULT_PASSWORD, Direction, EndpointId, FACTORY_DEFAULTS_TOKEN, GpioPin, HardwareVariant,
    IBEACON_PREFIX, Level, PASSWORD_LEN, Pull, SOFT_RESET_TOKEN, TX_POWER_DEFAULT, UART_CHUNK_LEN,
    VALID_TX_POWERS,
};
use crate::utils::signed_hex;

const VALID_BAUD_RATES: [u32; 16] = [
    1_200, 2_400, 4_800, 9_600, 14_400, 19_200, 28_800, 38_400, 57_600, 76_800, 115_200, 230_400,
    250_000, 460_800, 921_600, 1_000_000,
];
const DEFAULT_ADV_INTERVAL: u16 = 0x0064;
const DEFAULT_RSSI_CALIBRATION: i8 = -63;
const CUSTOM_BEACON_MAX_LEN: usize = CUSTOM_BEACON_DATA_PART1_LEN + CUSTOM_BEACON_DATA_PART2_LEN;
const BASE_RSSI: i16 = -50;

/// Something the simulated firmware wants the rig to do.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum FirmwareAction {
    /// Control-point notification to the connected central.
    Notify(Vec<u8>),
    /// UART TX notification to the connected central.
    UartTx(Vec<u8>),
    /// Bytes written out of the physical UART.
    Serial(Vec<u8>),
    Reset,
    Bootloader,
}

/// Static identity of one simulated module.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct FirmwareIdentity {
    pub(crate) variant: HardwareVariant,
    pub(crate) mac: String,
    pub(crate) version: String,
    pub(crate) serial_number: String,
}

impl FirmwareIdentity {
    fn hardware_info(&self) -> String {
        match self.variant {
            HardwareVariant::Nrf51 => "BMD-200 NRF51822".to_string(),
            HardwareVariant::Nrf52 | HardwareVariant::Unknown => "BMD-300 NRF52832".to_string(),
        }
    }

    fn pin_count(&self) -> u8 {
        match self.variant {
            HardwareVariant::Nrf51 => 0x07,
            HardwareVariant::Nrf52 | HardwareVariant::Unknown => 0x18,
        }
    }
}

/// Persistent configuration, restored by factory defaults.
#[derive(Debug, Clone, Eq, PartialEq)]
struct Settings {
    beacon_uuid: [u8; 16],
    beacon_major: u16,
    beacon_minor: u16,
    beacon_adv_interval: u16,
    beacon_tx_power: i8,
    beacon_enable: bool,
    connectable_tx_power: i8,
    connectable_adv_enable: bool,
    connectable_adv_interval: u16,
    custom_beacon_data: Option<Vec<u8>>,
    rssi_calibration: (i8, i8),
    uart_baud_rate: u32,
    uart_parity: bool,
    uart_flow_control: bool,
    uart_enable: bool,
    hotswap: bool,
    password: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            beacon_uuid: DEFAULT_BEACON_UUID,
            beacon_major: 0,
            beacon_minor: 0,
            beacon_adv_interval: DEFAULT_ADV_INTERVAL,
            beacon_tx_power: TX_POWER_DEFAULT,
            beacon_enable: false,
            connectable_tx_power: TX_POWER_DEFAULT,
            connectable_adv_enable: true,
            connectable_adv_interval: DEFAULT_ADV_INTERVAL,
            custom_beacon_data: None,
            rssi_calibration: (TX_POWER_DEFAULT, DEFAULT_RSSI_CALIBRATION),
            uart_baud_rate: super::serial::DEFAULT_BAUD_RATE,
            uart_parity: false,
            uart_flow_control: false,
            uart_enable: false,
            hotswap: false,
            password: DEFAULT_PASSWORD.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
struct PinConfig {
    direction: Direction,
    pull: Pull,
    level: Level,
}

/// One advertisement the simulated module is currently sending.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum AdvertisingPacket {
    Beacon { manufacturer_data: Vec<u8>, rssi: i16 },
    Connectable { rssi: i16 },
}

/// Behavioural model of one BMDware module.
#[derive(Debug, Clone)]
pub(crate) struct Firmware {
    identity: FirmwareIdentity,
    settings: Settings,
    locked: bool,
    relock_after_next_at: bool,
    pins: BTreeMap<u8, PinConfig>,
    loopback: Vec<(GpioPin, GpioPin)>,
    status_pin: Option<(GpioPin, Level)>,
    custom_parts: (Option<Vec<u8>>, Option<Vec<u8>>),
    at_ctrl_line: Level,
    beacon_only_line: Level,
    at_mode: bool,
    connected: bool,
    serial_line: Vec<u8>,
}

impl Firmware {
    /// A freshly booted module; `loopback` lists output pins wired to inputs.
    pub(crate) fn new(identity: FirmwareIdentity, loopback: Vec<(GpioPin, GpioPin)>) -> Self {
        Self {
            identity,
            settings: Settings::default(),
            locked: false,
            relock_after_next_at: false,
            pins: BTreeMap::new(),
            loopback,
            status_pin: None,
            custom_parts: (None, None),
            at_ctrl_line: Level::High,
            beacon_only_line: Level::High,
            at_mode: false,
            connected: false,
            serial_line: Vec::new(),
        }
    }

    pub(crate) fn is_at_mode(&self) -> bool {
        self.at_mode
    }

    pub(crate) fn is_connectable(&self) -> bool {
        self.settings.connectable_adv_enable && self.beacon_only_line == Level::High
    }

    /// Level of `pin` as an output seen from outside the module.
    pub(crate) fn driven_level(&self, pin: GpioPin) -> Option<Level> {
        let config = self.pins.get(&pin.0)?;
        (config.direction == Direction::Out).then_some(config.level)
    }

    /// Drives the module's AT-mode select line; low selects AT mode.
    pub(crate) fn set_at_ctrl_line(&mut self, level: Level) {
        self.at_ctrl_line = level;
        if self.settings.hotswap {
            self.at_mode = level == Level::Low;
        }
    }

    /// Drives the beacon-only line; low disables connectable advertising.
    pub(crate) fn set_beacon_only_line(&mut self, level: Level) {
        self.beacon_only_line = level;
    }

    /// Reboots: volatile state is cleared and the mode lines are sampled.
    pub(crate) fn reset(&mut self) {
        self.pins.clear();
        self.status_pin = None;
        self.custom_parts = (None, None);
        self.connected = false;
        self.serial_line.clear();
        self.relock_after_next_at = false;
        self.locked = self.has_password();
        self.at_mode = self.at_ctrl_line == Level::Low;
        debug!(mac = %self.identity.mac, at_mode = self.at_mode, "simulated module booted");
    }

    pub(crate) fn on_connect(&mut self) {
        self.connected = true;
    }

    pub(crate) fn on_disconnect(&mut self) {
        self.connected = false;
        self.locked = self.has_password();
    }

    /// Advertisements currently on air.
    pub(crate) fn advertisements(&self) -> Vec<AdvertisingPacket> {
        let mut packets = Vec::new();
        if self.settings.beacon_enable {
            packets.push(AdvertisingPacket::Beacon {
                manufacturer_data: self.beacon_payload(),
                rssi: simulated_rssi(self.settings.beacon_tx_power),
            });
        }
        if self.is_connectable() && !self.connected {
            packets.push(AdvertisingPacket::Connectable {
                rssi: simulated_rssi(self.settings.connectable_tx_power),
            });
        }
        packets
    }

    fn beacon_payload(&self) -> Vec<u8> {
        if let Some(custom) = &self.settings.custom_beacon_data {
            return custom.clone();
        }
        let mut payload = IBEACON_PREFIX.to_vec();
        payload.extend_from_slice(&self.settings.beacon_uuid);
        payload.extend_from_slice(&self.settings.beacon_major.to_be_bytes());
        payload.extend_from_slice(&self.settings.beacon_minor.to_be_bytes());
        payload.extend_from_slice(&self.settings.rssi_calibration.1.to_be_bytes());
        payload
    }

    fn has_password(&self) -> bool {
        self.settings.password != DEFAULT_PASSWORD
    }

    fn restore_defaults(&mut self) {
        self.settings = Settings::default();
        self.locked = false;
        self.relock_after_next_at = false;
        self.pins.clear();
        self.status_pin = None;
        self.custom_parts = (None, None);
    }

    fn valid_pin(&self, pin: GpioPin) -> bool {
        pin.0 < self.identity.pin_count()
    }

    fn pin(&self, pin: GpioPin) -> PinConfig {
        self.pins.get(&pin.0).copied().unwrap_or_default()
    }

    fn read_pin(&self, pin: GpioPin) -> Level {
        let config = self.pin(pin);
        if config.direction == Direction::Out {
            return config.level;
        }
        let driven = self
            .loopback
            .iter()
            .filter(|(_, input)| *input == pin)
            .find_map(|(output, _)| self.driven_level(*output));
        if let Some(level) = driven {
            return level;
        }
        match config.pull {
            Pull::Up => Level::High,
            Pull::Down | Pull::None => Level::Low,
        }
    }

    fn configure_pin(&mut self, pin: GpioPin, direction: Direction, pull: Pull) -> StatusCode {
        if !self.valid_pin(pin) {
            return StatusCode::InvalidParameter;
        }
        if self.status_pin.is_some_and(|(status, _)| status == pin) {
            return StatusCode::InvalidState;
        }
        let entry = self.pins.entry(pin.0).or_default();
        entry.direction = direction;
        entry.pull = pull;
        StatusCode::Success
    }

    fn write_pin(&mut self, pin: GpioPin, level: Level) -> StatusCode {
        if !self.valid_pin(pin) {
            return StatusCode::InvalidParameter;
        }
        match self.pins.get_mut(&pin.0) {
            Some(config) if config.direction == Direction::Out => {
                config.level = level;
                StatusCode::Success
            }
            _ => StatusCode::InvalidState,
        }
    }

    /// Handles one write to the control point.
    pub(crate) fn handle_control_point(&mut self, frame: &[u8]) -> Vec<FirmwareAction> {
        trace!(len = frame.len(), "control point write");
        if frame == SOFT_RESET_TOKEN {
            return vec![FirmwareAction::Reset];
        }
        if frame == FACTORY_DEFAULTS_TOKEN {
            self.restore_defaults();
            return status(StatusCode::Success);
        }
        if frame == BOOTLOADER_TOKEN {
            if self.locked {
                return status(StatusCode::Locked);
            }
            return vec![FirmwareAction::Bootloader];
        }
        let Some((&code, args)) = frame.split_first() else {
            return status(StatusCode::InvalidLength);
        };
        let Some(opcode) = ControlOpcode::from_code(code) else {
            return status(StatusCode::InvalidCommand);
        };
        if self.locked && opcode != ControlOpcode::Unlock {
            return status(StatusCode::Locked);
        }

        match (opcode, args) {
            (ControlOpcode::CustomBeaconData1, data)
                if (1..=CUSTOM_BEACON_DATA_PART1_LEN).contains(&data.len()) =>
            {
                self.custom_parts.0 = Some(data.to_vec());
                status(StatusCode::Success)
            }
            (ControlOpcode::CustomBeaconData2, data)
                if (1..=CUSTOM_BEACON_DATA_PART2_LEN).contains(&data.len()) =>
            {
                self.custom_parts.1 = Some(data.to_vec());
                status(StatusCode::Success)
            }
            (ControlOpcode::SaveCustomBeaconData, []) => match &self.custom_parts {
                (Some(first), Some(second)) => {
                    self.settings.custom_beacon_data = Some([first.as_slice(), second].concat());
                    status(StatusCode::Success)
                }
                _ => status(StatusCode::InvalidState),
            },
            (ControlOpcode::ClearCustomBeaconData, []) => {
                self.settings.custom_beacon_data = None;
                self.custom_parts = (None, None);
                status(StatusCode::Success)
            }
            (ControlOpcode::SetPassword, password) if PASSWORD_LEN.contains(&password.len()) => {
                self.settings.password = String::from_utf8_lossy(password).into_owned();
                self.locked = self.has_password();
                status(StatusCode::Success)
            }
            (ControlOpcode::Unlock, password) => {
                if password == self.settings.password.as_bytes() {
                    self.locked = false;
                    status(StatusCode::Success)
                } else {
                    status(StatusCode::UnlockFailed)
                }
            }
            (ControlOpcode::SetRssiCalibration, &[power, rssi]) => {
                self.settings.rssi_calibration = (power as i8, rssi as i8);
                status(StatusCode::Success)
            }
            (ControlOpcode::GetRssiCalibration, []) => {
                let (power, rssi) = self.settings.rssi_calibration;
                notify(code, &[power as u8, rssi as u8])
            }
            (ControlOpcode::SetConnectableAdvInterval, &[low, high]) => {
                self.settings.connectable_adv_interval = u16::from_le_bytes([low, high]);
                status(StatusCode::Success)
            }
            (ControlOpcode::GetConnectableAdvInterval, []) => {
                notify(code, &self.settings.connectable_adv_interval.to_le_bytes())
            }
            (ControlOpcode::SetGpioConfig, &[pin, direction, pull]) => {
                match (Direction::from_code(direction), Pull::from_code(pull)) {
                    (Some(direction), Some(pull)) => {
                        status(self.configure_pin(GpioPin(pin), direction, pull))
                    }
                    _ => status(StatusCode::InvalidParameter),
                }
            }
            (ControlOpcode::WriteGpio, &[pin, level]) => match Level::from_code(level) {
                Some(level) => status(self.write_pin(GpioPin(pin), level)),
                None => status(StatusCode::InvalidParameter),
            },
            (ControlOpcode::ReadGpio, &[pin]) if self.valid_pin(GpioPin(pin)) => {
                notify(code, &[pin, self.read_pin(GpioPin(pin)).code()])
            }
            (ControlOpcode::GetGpioConfig, &[pin]) if self.valid_pin(GpioPin(pin)) => {
                let config = self.pin(GpioPin(pin));
                notify(code, &[pin, config.direction.code(), config.pull.code()])
            }
            (ControlOpcode::ConfigureStatusPin, &[pin, polarity]) => {
                match Level::from_code(polarity) {
                    Some(polarity) if self.valid_pin(GpioPin(pin)) => {
                        self.status_pin = Some((GpioPin(pin), polarity));
                        self.pins.insert(
                            pin,
                            PinConfig {
                                direction: Direction::Out,
                                pull: Pull::None,
                                level: polarity,
                            },
                        );
                        status(StatusCode::Success)
                    }
                    _ => status(StatusCode::InvalidParameter),
                }
            }
            (ControlOpcode::DeconfigureStatusPin, []) => match self.status_pin.take() {
                Some((pin, _)) => {
                    self.pins.remove(&pin.0);
                    status(StatusCode::Success)
                }
                None => status(StatusCode::InvalidState),
            },
            (ControlOpcode::GetStatusPinConfig, []) => match self.status_pin {
                Some((pin, polarity)) => notify(code, &[pin.0, polarity.code()]),
                None => status(StatusCode::InvalidState),
            },
            (ControlOpcode::ReadStatusPin, []) => match self.status_pin {
                Some(_) => notify(code, &[u8::from(self.connected)]),
                None => status(StatusCode::InvalidState),
            },
            (ControlOpcode::ReadGpio | ControlOpcode::GetGpioConfig, &[_]) => {
                status(StatusCode::InvalidParameter)
            }
            _ => status(StatusCode::InvalidLength),
        }
    }

    /// Handles a write to any characteristic other than the control point
    /// and UART RX. Accepted writes produce no notification.
    pub(crate) fn handle_attribute_write(
        &mut self,
        endpoint: EndpointId,
        value: &[u8],
    ) -> Vec<FirmwareAction> {
        if self.locked {
            return status(StatusCode::Locked);
        }
        let settings = &mut self.settings;
        let accepted = match (endpoint, value) {
            (EndpointId::BeaconUuid, value) => <[u8; 16]>::try_from(value)
                .map(|uuid| settings.beacon_uuid = uuid)
                .is_ok(),
            (EndpointId::BeaconMajor, &[low, high]) => {
                settings.beacon_major = u16::from_le_bytes([low, high]);
                true
            }
            (EndpointId::BeaconMinor, &[low, high]) => {
                settings.beacon_minor = u16::from_le_bytes([low, high]);
                true
            }
            (EndpointId::BeaconAdvInterval, &[low, high]) => {
                settings.beacon_adv_interval = u16::from_le_bytes([low, high]);
                true
            }
            (EndpointId::BeaconTxPower, &[power]) if VALID_TX_POWERS.contains(&(power as i8)) => {
                settings.beacon_tx_power = power as i8;
                true
            }
            (EndpointId::ConnectableTxPower, &[power])
                if VALID_TX_POWERS.contains(&(power as i8)) =>
            {
                settings.connectable_tx_power = power as i8;
                true
            }
            (EndpointId::BeaconEnable, &[flag @ (0 | 1)]) => {
                settings.beacon_enable = flag == 1;
                true
            }
            (EndpointId::UartBaudRate, value) => <[u8; 4]>::try_from(value)
                .ok()
                .map(u32::from_le_bytes)
                .filter(|baud| VALID_BAUD_RATES.contains(baud))
                .map(|baud| settings.uart_baud_rate = baud)
                .is_some(),
            (EndpointId::UartParity, &[flag @ (0 | 1)]) => {
                settings.uart_parity = flag == 1;
                true
            }
            (EndpointId::UartFlowControl, &[flag @ (0 | 1)]) => {
                settings.uart_flow_control = flag == 1;
                true
            }
            (EndpointId::UartEnable, &[flag @ (0 | 1)]) => {
                settings.uart_enable = flag == 1;
                true
            }
            _ => false,
        };

        if accepted {
            Vec::new()
        } else {
            status(StatusCode::InvalidData)
        }
    }

    /// Value returned by a characteristic read.
    pub(crate) fn read_attribute(&self, endpoint: EndpointId) -> Option<Vec<u8>> {
        let settings = &self.settings;
        let value = match endpoint {
            EndpointId::BeaconUuid => settings.beacon_uuid.to_vec(),
            EndpointId::BeaconMajor => settings.beacon_major.to_le_bytes().to_vec(),
            EndpointId::BeaconMinor => settings.beacon_minor.to_le_bytes().to_vec(),
            EndpointId::BeaconAdvInterval => settings.beacon_adv_interval.to_le_bytes().to_vec(),
            EndpointId::BeaconTxPower => vec![settings.beacon_tx_power as u8],
            EndpointId::BeaconEnable => vec![u8::from(settings.beacon_enable)],
            EndpointId::ConnectableTxPower => vec![settings.connectable_tx_power as u8],
            EndpointId::UartBaudRate => settings.uart_baud_rate.to_le_bytes().to_vec(),
            EndpointId::UartParity => vec![u8::from(settings.uart_parity)],
            EndpointId::UartFlowControl => vec![u8::from(settings.uart_flow_control)],
            EndpointId::UartEnable => vec![u8::from(settings.uart_enable)],
            EndpointId::SerialNumber => self.identity.serial_number.as_bytes().to_vec(),
            EndpointId::FirmwareRevision => self.identity.version.as_bytes().to_vec(),
            EndpointId::ControlPoint
            | EndpointId::UartRx
            | EndpointId::UartTx
            | EndpointId::BeaconConfigService
            | EndpointId::UartService => return None,
        };
        Some(value)
    }

    /// Data written by the central to the UART RX characteristic.
    pub(crate) fn handle_uart_rx(&mut self, data: &[u8]) -> Vec<FirmwareAction> {
        if self.at_mode || !self.settings.uart_enable {
            debug!(len = data.len(), "UART passthrough inactive, dropping data");
            return Vec::new();
        }
        vec![FirmwareAction::Serial(data.to_vec())]
    }

    /// Bytes arriving on the physical UART.
    pub(crate) fn handle_serial(&mut self, data: &[u8]) -> Vec<FirmwareAction> {
        if !self.at_mode {
            if !(self.connected && self.settings.uart_enable) {
                return Vec::new();
            }
            return data
                .chunks(UART_CHUNK_LEN)
                .map(|chunk| FirmwareAction::UartTx(chunk.to_vec()))
                .collect();
        }

        let mut actions = Vec::new();
        for &byte in data {
            match byte {
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.serial_line).into_owned();
                    self.serial_line.clear();
                    actions.extend(self.handle_at_line(line.trim()));
                }
                b'\r' => {}
                _ => self.serial_line.push(byte),
            }
        }
        actions
    }

    fn handle_at_line(&mut self, line: &str) -> Vec<FirmwareAction> {
        if line.is_empty() {
            return Vec::new();
        }
        trace!(%line, "AT command");
        let relock = std::mem::take(&mut self.relock_after_next_at);
        let (reply, reset) = self.interpret_at(line);
        if relock && self.has_password() {
            self.locked = true;
        }

        let mut actions = vec![FirmwareAction::Serial(format!("{reply}\n").into_bytes())];
        if reset {
            actions.push(FirmwareAction::Reset);
        }
        actions
    }

    fn interpret_at(&mut self, line: &str) -> (String, bool) {
        if line.eq_ignore_ascii_case(AT_ATTENTION) {
            return (AT_OK.to_string(), false);
        }
        let mut tokens = line.split_whitespace();
        let head = tokens.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = tokens.collect();
        let is_get = head.ends_with('?');
        let Ok(mnemonic) = AtMnemonic::from_str(head.trim_end_matches('?')) else {
            return (AT_UNKNOWN.to_string(), false);
        };

        if is_get {
            return (self.at_get(mnemonic), false);
        }
        if self.locked && mnemonic.requires_unlock() {
            return (AT_LOCKED.to_string(), false);
        }
        self.at_set(mnemonic, &args)
    }

    fn at_get(&self, mnemonic: AtMnemonic) -> String {
        let settings = &self.settings;
        match mnemonic {
            AtMnemonic::BeaconEnable => flag(settings.beacon_enable),
            AtMnemonic::BeaconUuid => hex::encode_upper(settings.beacon_uuid),
            AtMnemonic::BeaconMajor => format!("{:04x}", settings.beacon_major),
            AtMnemonic::BeaconMinor => format!("{:04x}", settings.beacon_minor),
            AtMnemonic::BeaconAdvInterval => format!("{:04x}", settings.beacon_adv_interval),
            AtMnemonic::BeaconTxPower => signed_hex(settings.beacon_tx_power),
            AtMnemonic::CustomBeaconData => settings
                .custom_beacon_data
                .as_ref()
                .map(hex::encode)
                .unwrap_or_default(),
            AtMnemonic::RssiCalibration => {
                let (power, rssi) = settings.rssi_calibration;
                format!("{} {}", signed_hex(power), signed_hex(rssi))
            }
            AtMnemonic::Version => self.identity.version.clone(),
            AtMnemonic::BootloaderVersion => "1.0.0".to_string(),
            AtMnemonic::ConnectableTxPower => signed_hex(settings.connectable_tx_power),
            AtMnemonic::ConnectableAdvEnable => flag(settings.connectable_adv_enable),
            AtMnemonic::ConnectableAdvInterval => {
                format!("{:04x}", settings.connectable_adv_interval)
            }
            AtMnemonic::HardwareInfo => self.identity.hardware_info(),
            AtMnemonic::Hotswap => flag(settings.hotswap),
            AtMnemonic::Mac => self.identity.mac.clone(),
            AtMnemonic::UartBaudRate => format!("{:08x}", settings.uart_baud_rate),
            AtMnemonic::UartParity => flag(settings.uart_parity),
            AtMnemonic::UartFlowControl => flag(settings.uart_flow_control),
            AtMnemonic::UartEnable => flag(settings.uart_enable),
            AtMnemonic::CustomBeaconClear
            | AtMnemonic::Password
            | AtMnemonic::Unlock
            | AtMnemonic::DeviceReset
            | AtMnemonic::ResetDefaults
            | AtMnemonic::GpioConfig
            | AtMnemonic::GpioWrite
            | AtMnemonic::GpioRead
            | AtMnemonic::GpioConfigGet => AT_ERR.to_string(),
        }
    }

    fn at_set(&mut self, mnemonic: AtMnemonic, args: &[&str]) -> (String, bool) {
        let ok = |accepted: bool| (if accepted { AT_OK } else { AT_ERR }).to_string();

        let reply = match (mnemonic, args) {
            (AtMnemonic::DeviceReset, []) => return (AT_OK.to_string(), true),
            (AtMnemonic::ResetDefaults, []) => {
                self.restore_defaults();
                AT_OK.to_string()
            }
            (AtMnemonic::CustomBeaconClear, []) => {
                self.settings.custom_beacon_data = None;
                AT_OK.to_string()
            }
            (AtMnemonic::GpioRead, [pin]) => match GpioPin::from_str(pin) {
                Ok(pin) if self.valid_pin(pin) => format!("{:02x}", self.read_pin(pin).code()),
                _ => AT_ERR.to_string(),
            },
            (AtMnemonic::GpioConfigGet, [pin]) => match GpioPin::from_str(pin) {
                Ok(pin) if self.valid_pin(pin) => {
                    let config = self.pin(pin);
                    format!(
                        "{pin} {:02x} {:02x}",
                        config.direction.code(),
                        config.pull.code()
                    )
                }
                _ => AT_ERR.to_string(),
            },
            (AtMnemonic::GpioConfig, [pin, direction, pull]) => {
                let parsed = (
                    GpioPin::from_str(pin).ok(),
                    hex_byte(direction).and_then(Direction::from_code),
                    hex_byte(pull).and_then(Pull::from_code),
                );
                match parsed {
                    (Some(pin), Some(direction), Some(pull)) => {
                        ok(self.configure_pin(pin, direction, pull) == StatusCode::Success)
                    }
                    _ => AT_ERR.to_string(),
                }
            }
            (AtMnemonic::GpioWrite, [pin, level]) => {
                match (GpioPin::from_str(pin).ok(), hex_byte(level).and_then(Level::from_code)) {
                    (Some(pin), Some(level)) => {
                        ok(self.write_pin(pin, level) == StatusCode::Success)
                    }
                    _ => AT_ERR.to_string(),
                }
            }
            (AtMnemonic::Password, [password]) => {
                let accepted = PASSWORD_LEN.contains(&password.len());
                if accepted {
                    self.settings.password = (*password).to_string();
                    self.locked = self.has_password();
                }
                ok(accepted)
            }
            (AtMnemonic::Unlock, [password]) => {
                let accepted = *password == self.settings.password;
                if accepted {
                    self.locked = false;
                    self.relock_after_next_at = true;
                }
                ok(accepted)
            }
            (AtMnemonic::Hotswap, [value]) => ok(parse_flag(value)
                .map(|enabled| {
                    self.settings.hotswap = enabled;
                    if enabled {
                        self.at_mode = self.at_ctrl_line == Level::Low;
                    }
                })
                .is_some()),
            (mnemonic, args) => ok(self.apply_setting(mnemonic, args)),
        };
        (reply, false)
    }

    fn apply_setting(&mut self, mnemonic: AtMnemonic, args: &[&str]) -> bool {
        let settings = &mut self.settings;
        let applied = match (mnemonic, args) {
            (AtMnemonic::BeaconEnable, [value]) => {
                parse_flag(value).map(|flag| settings.beacon_enable = flag)
            }
            (AtMnemonic::BeaconUuid, [value]) => hex::decode(value)
                .ok()
                .and_then(|bytes| <[u8; 16]>::try_from(bytes).ok())
                .map(|uuid| settings.beacon_uuid = uuid),
            (AtMnemonic::BeaconMajor, [value]) => {
                parse_hex_u16(value).map(|major| settings.beacon_major = major)
            }
            (AtMnemonic::BeaconMinor, [value]) => {
                parse_hex_u16(value).map(|minor| settings.beacon_minor = minor)
            }
            (AtMnemonic::BeaconAdvInterval, [value]) => {
                parse_hex_u16(value).map(|interval| settings.beacon_adv_interval = interval)
            }
            (AtMnemonic::BeaconTxPower, [value]) => {
                parse_tx_power(value).map(|power| settings.beacon_tx_power = power)
            }
            (AtMnemonic::ConnectableTxPower, [value]) => {
                parse_tx_power(value).map(|power| settings.connectable_tx_power = power)
            }
            (AtMnemonic::ConnectableAdvEnable, [value]) => {
                parse_flag(value).map(|flag| settings.connectable_adv_enable = flag)
            }
            (AtMnemonic::ConnectableAdvInterval, [value]) => {
                parse_hex_u16(value).map(|interval| settings.connectable_adv_interval = interval)
            }
            (AtMnemonic::CustomBeaconData, [value]) => hex::decode(value)
                .ok()
                .filter(|data| !data.is_empty() && data.len() <= CUSTOM_BEACON_MAX_LEN)
                .map(|data| settings.custom_beacon_data = Some(data)),
            (AtMnemonic::RssiCalibration, [value]) => hex::decode(value)
                .ok()
                .and_then(|bytes| <[u8; 2]>::try_from(bytes).ok())
                .map(|[power, rssi]| settings.rssi_calibration = (power as i8, rssi as i8)),
            (AtMnemonic::UartBaudRate, [value]) => value
                .parse::<u32>()
                .ok()
                .filter(|baud| VALID_BAUD_RATES.contains(baud))
                .map(|baud| settings.uart_baud_rate = baud),
            (AtMnemonic::UartParity, [value]) => {
                parse_flag(value).map(|flag| settings.uart_parity = flag)
            }
            (AtMnemonic::UartFlowControl, [value]) => {
                parse_flag(value).map(|flag| settings.uart_flow_control = flag)
            }
            (AtMnemonic::UartEnable, [value]) => {
                parse_flag(value).map(|flag| settings.uart_enable = flag)
            }
            _ => None,
        };
        applied.is_some()
    }
}

fn status(code: StatusCode) -> Vec<FirmwareAction> {
    vec![FirmwareAction::Notify(vec![code.code()])]
}

fn notify(opcode: u8, payload: &[u8]) -> Vec<FirmwareAction> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(opcode);
    frame.extend_from_slice(payload);
    vec![FirmwareAction::Notify(frame)]
}

fn flag(value: bool) -> String {
    (if value { "01" } else { "00" }).to_string()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "00" | "0" => Some(false),
        "01" | "1" => Some(true),
        _ => None,
    }
}

fn hex_byte(value: &str) -> Option<u8> {
    u8::from_str_radix(value, 16).ok()
}

fn parse_hex_u16(value: &str) -> Option<u16> {
    u16::from_str_radix(value, 16).ok()
}

fn parse_tx_power(value: &str) -> Option<i8> {
    hex_byte(value)
        .map(|byte| byte as i8)
        .filter(|power| VALID_TX_POWERS.contains(power))
}

/// Signal strength the simulated radio reports for a transmit power.
pub(crate) fn simulated_rssi(tx_power: i8) -> i16 {
    BASE_RSSI + i16::from(tx_power) / 4
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn firmware() -> Firmware {
        let identity = FirmwareIdentity {
            variant: HardwareVariant::Nrf52,
            mac: "c0:98:e5:00:00:01".to_string(),
            version: "3.2.1".to_string(),
            serial_number: "SIM0001".to_string(),
        };
        Firmware::new(identity, vec![(GpioPin(0x0e), GpioPin(0x0f))])
    }

    fn at_mode_firmware() -> Firmware {
        let mut firmware = firmware();
        firmware.set_at_ctrl_line(Level::Low);
        firmware.reset();
        firmware
    }

    fn at(firmware: &mut Firmware, line: &str) -> String {
        let actions = firmware.handle_serial(format!("{line}\n").as_bytes());
        let Some(FirmwareAction::Serial(reply)) = actions.first() else {
            panic!("no serial reply for {line}: {actions:?}");
        };
        String::from_utf8_lossy(reply).trim_end().to_string()
    }

    #[rstest]
    #[case(&[0x20, 0x12, 0x34], &[0x00])]
    #[case(&[0x21], &[0x02])]
    #[case(&[0x22], &[0x06])]
    #[case(&[0x41], &[0x41, 0xfc, 0xc1])]
    #[case(&[0x56], &[0x06])]
    #[case(&[0x60], &[0x08])]
    #[case(&[0x53, 0x09], &[0x53, 0x09, 0x00, 0x00])]
    fn control_point_replies(#[case] frame: &[u8], #[case] expected: &[u8]) {
        let mut firmware = firmware();
        assert_eq!(
            vec![FirmwareAction::Notify(expected.to_vec())],
            firmware.handle_control_point(frame)
        );
    }

    #[test]
    fn password_locks_until_unlocked() {
        let mut firmware = firmware();
        assert_eq!(status(StatusCode::Success), firmware.handle_control_point(b"\x31test"));
        assert_eq!(status(StatusCode::Locked), firmware.handle_control_point(&[0x41]));
        assert_eq!(
            status(StatusCode::Locked),
            firmware.handle_attribute_write(EndpointId::BeaconMajor, &[0x01, 0x00])
        );
        assert_eq!(status(StatusCode::UnlockFailed), firmware.handle_control_point(b"\xf8nope"));
        assert_eq!(status(StatusCode::Success), firmware.handle_control_point(b"\xf8test"));
        assert_eq!(
            Vec::<FirmwareAction>::new(),
            firmware.handle_attribute_write(EndpointId::BeaconMajor, &[0x01, 0x00])
        );

        firmware.on_disconnect();
        assert_eq!(status(StatusCode::Locked), firmware.handle_control_point(&[0x41]));
    }

    #[test]
    fn status_pin_deconfiguration_restores_the_input() {
        let mut firmware = firmware();
        firmware.on_connect();
        assert_eq!(status(StatusCode::Success), firmware.handle_control_point(&[0x54, 0x09, 0x00]));
        assert_eq!(
            vec![FirmwareAction::Notify(vec![0x56, 0x09, 0x00])],
            firmware.handle_control_point(&[0x56])
        );
        assert_eq!(
            vec![FirmwareAction::Notify(vec![0x57, 0x01])],
            firmware.handle_control_point(&[0x57])
        );
        assert_eq!(status(StatusCode::Success), firmware.handle_control_point(&[0x55]));
        assert_eq!(
            vec![FirmwareAction::Notify(vec![0x53, 0x09, 0x00, 0x00])],
            firmware.handle_control_point(&[0x53, 0x09])
        );
    }

    #[test]
    fn loopback_pins_follow_the_driving_output() {
        let mut firmware = at_mode_firmware();
        assert_eq!("OK", at(&mut firmware, "at$gcfg 0E 01 00"));
        assert_eq!("0E 01 00", at(&mut firmware, "at$gcget 0E"));
        assert_eq!("OK", at(&mut firmware, "at$gcfg 0F 00 00"));
        assert_eq!("OK", at(&mut firmware, "at$gset 0E 01"));
        assert_eq!("01", at(&mut firmware, "at$gread 0F"));
        assert_eq!("OK", at(&mut firmware, "at$gset 0E 00"));
        assert_eq!("00", at(&mut firmware, "at$gread 0F"));

        assert_eq!("OK", at(&mut firmware, "at$gcfg 0E 00 00"));
        assert_eq!("OK", at(&mut firmware, "at$gcfg 0F 00 03"));
        assert_eq!("01", at(&mut firmware, "at$gread 0F"));
        assert_eq!("OK", at(&mut firmware, "at$gcfg 0F 00 01"));
        assert_eq!("00", at(&mut firmware, "at$gread 0F"));
    }

    #[test]
    fn at_unlock_relocks_after_the_next_command() {
        let mut firmware = at_mode_firmware();
        assert_eq!("OK", at(&mut firmware, "at$password test"));
        assert_eq!("LOCKED", at(&mut firmware, "at$ubr 115200"));
        assert_eq!("OK", at(&mut firmware, "at$unlock test"));
        assert_eq!("OK", at(&mut firmware, "at$ubr 115200"));
        assert_eq!("LOCKED", at(&mut firmware, "at$ubr 38400"));
        assert_eq!("0001c200", at(&mut firmware, "at$ubr?"));
        assert_eq!("fc c1", at(&mut firmware, "at$bcal?"));
        assert_eq!("00112233445566778899AABBCCDDEEFF", at(&mut firmware, "at$buuid?"));
    }

    #[test]
    fn device_reset_replies_then_reboots() {
        let mut firmware = at_mode_firmware();
        let actions = firmware.handle_serial(b"at$devrst\n");
        assert_eq!(
            vec![
                FirmwareAction::Serial(b"OK\n".to_vec()),
                FirmwareAction::Reset
            ],
            actions
        );
    }

    #[test]
    fn beacon_payload_carries_settings_in_big_endian() {
        let mut firmware = at_mode_firmware();
        at(&mut firmware, "at$buuid 6d224c46ef864b4692090f559ec3adb4");
        at(&mut firmware, "at$bmjid 9876");
        at(&mut firmware, "at$bmnid 5234");
        at(&mut firmware, "at$bcal fce3");
        at(&mut firmware, "at$ben 01");

        let packets = firmware.advertisements();
        assert_matches!(
            packets.first(),
            Some(AdvertisingPacket::Beacon { manufacturer_data, .. })
                if hex::encode(manufacturer_data)
                    == "4c0002156d224c46ef864b4692090f559ec3adb498765234e3"
        );
    }

    #[test]
    fn serial_bytes_pass_through_in_attribute_sized_chunks() {
        let mut firmware = firmware();
        firmware.on_connect();
        firmware.handle_attribute_write(EndpointId::UartEnable, &[0x01]);

        let data: Vec<u8> = (0..=255).collect();
        let actions = firmware.handle_serial(&data);

        assert_eq!(13, actions.len());
        assert_matches!(actions.last(), Some(FirmwareAction::UartTx(chunk)) if chunk.len() == 16);
    }
}
