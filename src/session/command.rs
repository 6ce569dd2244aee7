use crate::codec::{AtCommand, StatusCode, encode_control_point_command};
use crate::correlation::{MatchRule, Source};
use crate::error::EncodingError;
use crate::protocol::{
    AT_ERR, AT_OK, AtMnemonic, BOOTLOADER_TOKEN, ControlOpcode, Direction, EndpointId,
    FACTORY_DEFAULTS_TOKEN, GpioPin, Level, Pull, SOFT_RESET_TOKEN,
};
use crate::utils::signed_hex;

/// Which link a command travels over.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display)]
pub enum Channel {
    #[display("BLE")]
    Ble,
    #[display("serial")]
    Serial,
}

/// One encoded command, ready to send.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Command {
    /// Full control-point frame (opcode and arguments, or a magic token).
    ControlPoint(Vec<u8>),
    AttributeWrite { endpoint: EndpointId, value: Vec<u8> },
    AttributeRead { endpoint: EndpointId },
    At(AtCommand),
    /// Bytes written to the UART; the DUT forwards them as UART TX notifications.
    RawSerial(Vec<u8>),
    /// Bytes written to UART RX in attribute-sized chunks; the DUT forwards
    /// them out of its UART.
    UartStream(Vec<u8>),
}

impl Command {
    #[must_use]
    pub fn channel(&self) -> Channel {
        match self {
            Self::ControlPoint(_)
            | Self::AttributeWrite { .. }
            | Self::AttributeRead { .. }
            | Self::UartStream(_) => Channel::Ble,
            Self::At(_) | Self::RawSerial(_) => Channel::Serial,
        }
    }

    /// Stream the reply to this command arrives on.
    #[must_use]
    pub fn reply_source(&self) -> Source {
        match self {
            Self::ControlPoint(_) | Self::AttributeWrite { .. } => Source::ControlPoint,
            Self::AttributeRead { .. } => Source::AttributeRead,
            Self::At(_) | Self::UartStream(_) => Source::Serial,
            Self::RawSerial(_) => Source::UartTx,
        }
    }
}

/// Reply a step expects.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Reply {
    /// A status: `[code]` on the control point, `OK`/`LOCKED`/`ERR` on AT.
    /// A successful characteristic write produces no notification at all.
    Status(StatusCode),
    /// Exact bytes; AT values are compared as their ASCII text.
    Value(Vec<u8>),
    OneOf(Vec<Vec<u8>>),
    Any,
    NoResponse,
    /// Accumulated passthrough data.
    Stream(Vec<u8>),
}

impl Reply {
    /// Expected AT text such as `0001c200`.
    #[must_use]
    pub fn text(value: impl AsRef<str>) -> Self {
        Self::Value(value.as_ref().as_bytes().to_vec())
    }

    #[must_use]
    pub fn success() -> Self {
        Self::Status(StatusCode::Success)
    }

    #[must_use]
    pub fn locked() -> Self {
        Self::Status(StatusCode::Locked)
    }

    /// Either of the replies that prove an AT interpreter is listening.
    #[must_use]
    pub fn at_alive() -> Self {
        Self::OneOf(vec![AT_OK.as_bytes().to_vec(), AT_ERR.as_bytes().to_vec()])
    }

    /// Match rule for this reply to `command`; `None` when nothing is expected.
    pub(crate) fn rule_for(&self, command: &Command) -> Option<MatchRule> {
        match self {
            Self::Status(StatusCode::Success) if matches!(command, Command::AttributeWrite { .. }) => {
                None
            }
            Self::Status(code) => Some(match command {
                Command::At(_) => MatchRule::Exact(code.at_token().as_bytes().to_vec()),
                _ => MatchRule::Exact(vec![code.code()]),
            }),
            Self::Value(bytes) => Some(MatchRule::Exact(bytes.clone())),
            Self::OneOf(options) => Some(MatchRule::OneOf(options.clone())),
            Self::Any => Some(MatchRule::Any),
            Self::NoResponse => None,
            Self::Stream(bytes) => Some(MatchRule::Stream(bytes.clone())),
        }
    }
}

/// Which half of the custom beacon payload a BLE write carries.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CustomDataPart {
    First,
    Second,
}

/// High-level operations the firmware offers on one or both channels.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Operation {
    SetBeaconUuid([u8; 16]),
    SetBeaconMajor(u16),
    SetBeaconMinor(u16),
    SetBeaconEnable(bool),
    SetBeaconTxPower(i8),
    SetBeaconAdvInterval(u16),
    SetConnectableTxPower(i8),
    SetConnectableAdvEnable(bool),
    SetConnectableAdvInterval(u16),
    GetConnectableAdvInterval,
    /// One BLE part of the custom beacon payload.
    SetCustomBeaconDataPart(CustomDataPart, Vec<u8>),
    /// The whole custom beacon payload in one AT line.
    SetCustomBeaconData(Vec<u8>),
    SaveCustomBeaconData,
    ClearCustomBeaconData,
    SetRssiCalibration { power: i8, rssi: i8 },
    GetRssiCalibration,
    SetGpioConfig { pin: GpioPin, direction: Direction, pull: Pull },
    GetGpioConfig(GpioPin),
    WriteGpio { pin: GpioPin, level: Level },
    ReadGpio(GpioPin),
    ConfigureStatusPin { pin: GpioPin, polarity: Level },
    DeconfigureStatusPin,
    GetStatusPinConfig,
    ReadStatusPin,
    SetUartBaudRate(u32),
    SetUartParity(bool),
    SetUartFlowControl(bool),
    SetUartEnable(bool),
    SetPassword(String),
    Unlock(String),
    ResetDefaults,
    EnterBootloader,
    SoftReset,
    /// AT getter (`<mnemonic>?`).
    Get(AtMnemonic),
    /// BLE characteristic read.
    Read(EndpointId),
    /// Bare `AT` attention line.
    Attention,
    HardwareInfo,
}

impl Operation {
    /// Short human name used in step labels and errors.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::SetBeaconUuid(_) => "set beacon UUID".to_string(),
            Self::SetBeaconMajor(_) => "set beacon major".to_string(),
            Self::SetBeaconMinor(_) => "set beacon minor".to_string(),
            Self::SetBeaconEnable(_) => "set beacon enable".to_string(),
            Self::SetBeaconTxPower(_) => "set beacon tx power".to_string(),
            Self::SetBeaconAdvInterval(_) => "set beacon advertising interval".to_string(),
            Self::SetConnectableTxPower(_) => "set connectable tx power".to_string(),
            Self::SetConnectableAdvEnable(_) => "set connectable advertising".to_string(),
            Self::SetConnectableAdvInterval(_) => {
                "set connectable advertising interval".to_string()
            }
            Self::GetConnectableAdvInterval => "get connectable advertising interval".to_string(),
            Self::SetCustomBeaconDataPart(CustomDataPart::First, _) => {
                "set custom beacon data part 1".to_string()
            }
            Self::SetCustomBeaconDataPart(CustomDataPart::Second, _) => {
                "set custom beacon data part 2".to_string()
            }
            Self::SetCustomBeaconData(_) => "set custom beacon data".to_string(),
            Self::SaveCustomBeaconData => "save custom beacon data".to_string(),
            Self::ClearCustomBeaconData => "clear custom beacon data".to_string(),
            Self::SetRssiCalibration { .. } => "set RSSI calibration".to_string(),
            Self::GetRssiCalibration => "get RSSI calibration".to_string(),
            Self::SetGpioConfig { pin, .. } => format!("set GPIO {pin} config"),
            Self::GetGpioConfig(pin) => format!("get GPIO {pin} config"),
            Self::WriteGpio { pin, level } => format!("write GPIO {pin} {level}"),
            Self::ReadGpio(pin) => format!("read GPIO {pin}"),
            Self::ConfigureStatusPin { .. } => "configure status pin".to_string(),
            Self::DeconfigureStatusPin => "deconfigure status pin".to_string(),
            Self::GetStatusPinConfig => "get status pin config".to_string(),
            Self::ReadStatusPin => "read status pin".to_string(),
            Self::SetUartBaudRate(_) => "set UART baud rate".to_string(),
            Self::SetUartParity(_) => "set UART parity".to_string(),
            Self::SetUartFlowControl(_) => "set UART flow control".to_string(),
            Self::SetUartEnable(_) => "set UART enable".to_string(),
            Self::SetPassword(_) => "set password".to_string(),
            Self::Unlock(_) => "unlock".to_string(),
            Self::ResetDefaults => "reset to factory defaults".to_string(),
            Self::EnterBootloader => "enter bootloader".to_string(),
            Self::SoftReset => "soft reset".to_string(),
            Self::Get(mnemonic) => format!("get {mnemonic}"),
            Self::Read(endpoint) => format!("read {endpoint}"),
            Self::Attention => "AT attention".to_string(),
            Self::HardwareInfo => "hardware info".to_string(),
        }
    }

    /// Encodes the operation for `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::UnsupportedOnChannel`] when the firmware has no
    /// form of this operation on `channel`, and
    /// [`EncodingError::PayloadTooLong`] for oversized control-point payloads.
    pub fn command(&self, channel: Channel) -> Result<Command, EncodingError> {
        match channel {
            Channel::Ble => self.ble_command(),
            Channel::Serial => self.at_command().map(Command::At),
        }
    }

    fn unsupported(&self, channel: Channel) -> EncodingError {
        EncodingError::UnsupportedOnChannel {
            operation: self.name(),
            channel: match channel {
                Channel::Ble => "BLE",
                Channel::Serial => "AT",
            },
        }
    }

    fn ble_command(&self) -> Result<Command, EncodingError> {
        let control = |opcode: ControlOpcode, args: &[u8]| {
            encode_control_point_command(opcode.code(), args).map(Command::ControlPoint)
        };
        let write = |endpoint, value: Vec<u8>| Ok(Command::AttributeWrite { endpoint, value });

        match self {
            Self::SetBeaconUuid(uuid) => write(EndpointId::BeaconUuid, uuid.to_vec()),
            Self::SetBeaconMajor(value) => write(EndpointId::BeaconMajor, value.to_le_bytes().to_vec()),
            Self::SetBeaconMinor(value) => write(EndpointId::BeaconMinor, value.to_le_bytes().to_vec()),
            Self::SetBeaconEnable(enabled) => write(EndpointId::BeaconEnable, vec![u8::from(*enabled)]),
            Self::SetBeaconTxPower(power) => write(EndpointId::BeaconTxPower, vec![*power as u8]),
            Self::SetBeaconAdvInterval(value) => {
                write(EndpointId::BeaconAdvInterval, value.to_le_bytes().to_vec())
            }
            Self::SetConnectableTxPower(power) => {
                write(EndpointId::ConnectableTxPower, vec![*power as u8])
            }
            Self::SetConnectableAdvInterval(value) => {
                control(ControlOpcode::SetConnectableAdvInterval, &value.to_le_bytes())
            }
            Self::GetConnectableAdvInterval => control(ControlOpcode::GetConnectableAdvInterval, &[]),
            Self::SetCustomBeaconDataPart(CustomDataPart::First, data) => {
                control(ControlOpcode::CustomBeaconData1, data)
            }
            Self::SetCustomBeaconDataPart(CustomDataPart::Second, data) => {
                control(ControlOpcode::CustomBeaconData2, data)
            }
            Self::SaveCustomBeaconData => control(ControlOpcode::SaveCustomBeaconData, &[]),
            Self::ClearCustomBeaconData => control(ControlOpcode::ClearCustomBeaconData, &[]),
            Self::SetRssiCalibration { power, rssi } => control(
                ControlOpcode::SetRssiCalibration,
                &[*power as u8, *rssi as u8],
            ),
            Self::GetRssiCalibration => control(ControlOpcode::GetRssiCalibration, &[]),
            Self::SetGpioConfig {
                pin,
                direction,
                pull,
            } => control(
                ControlOpcode::SetGpioConfig,
                &[pin.0, direction.code(), pull.code()],
            ),
            Self::GetGpioConfig(pin) => control(ControlOpcode::GetGpioConfig, &[pin.0]),
            Self::WriteGpio { pin, level } => {
                control(ControlOpcode::WriteGpio, &[pin.0, level.code()])
            }
            Self::ReadGpio(pin) => control(ControlOpcode::ReadGpio, &[pin.0]),
            Self::ConfigureStatusPin { pin, polarity } => {
                control(ControlOpcode::ConfigureStatusPin, &[pin.0, polarity.code()])
            }
            Self::DeconfigureStatusPin => control(ControlOpcode::DeconfigureStatusPin, &[]),
            Self::GetStatusPinConfig => control(ControlOpcode::GetStatusPinConfig, &[]),
            Self::ReadStatusPin => control(ControlOpcode::ReadStatusPin, &[]),
            Self::SetUartBaudRate(baud) => write(EndpointId::UartBaudRate, baud.to_le_bytes().to_vec()),
            Self::SetUartParity(enabled) => write(EndpointId::UartParity, vec![u8::from(*enabled)]),
            Self::SetUartFlowControl(enabled) => {
                write(EndpointId::UartFlowControl, vec![u8::from(*enabled)])
            }
            Self::SetUartEnable(enabled) => write(EndpointId::UartEnable, vec![u8::from(*enabled)]),
            Self::SetPassword(password) => control(ControlOpcode::SetPassword, password.as_bytes()),
            Self::Unlock(password) => control(ControlOpcode::Unlock, password.as_bytes()),
            Self::ResetDefaults => Ok(Command::ControlPoint(FACTORY_DEFAULTS_TOKEN.to_vec())),
            Self::EnterBootloader => Ok(Command::ControlPoint(BOOTLOADER_TOKEN.to_vec())),
            Self::SoftReset => Ok(Command::ControlPoint(SOFT_RESET_TOKEN.to_vec())),
            Self::Read(endpoint) => Ok(Command::AttributeRead {
                endpoint: *endpoint,
            }),
            Self::SetConnectableAdvEnable(_)
            | Self::SetCustomBeaconData(_)
            | Self::Get(_)
            | Self::Attention
            | Self::HardwareInfo => Err(self.unsupported(Channel::Ble)),
        }
    }

    fn at_command(&self) -> Result<AtCommand, EncodingError> {
        let set = |mnemonic, arg: String| Ok(AtCommand::set(mnemonic, [arg]));

        match self {
            Self::SetBeaconUuid(uuid) => set(AtMnemonic::BeaconUuid, hex::encode(uuid)),
            Self::SetBeaconMajor(value) => set(AtMnemonic::BeaconMajor, format!("{value:04x}")),
            Self::SetBeaconMinor(value) => set(AtMnemonic::BeaconMinor, format!("{value:04x}")),
            Self::SetBeaconEnable(enabled) => set(AtMnemonic::BeaconEnable, at_flag(*enabled)),
            Self::SetBeaconTxPower(power) => set(AtMnemonic::BeaconTxPower, signed_hex(*power)),
            Self::SetBeaconAdvInterval(value) => {
                set(AtMnemonic::BeaconAdvInterval, format!("{value:04x}"))
            }
            Self::SetConnectableTxPower(power) => {
                set(AtMnemonic::ConnectableTxPower, signed_hex(*power))
            }
            Self::SetConnectableAdvEnable(enabled) => {
                set(AtMnemonic::ConnectableAdvEnable, at_flag(*enabled))
            }
            Self::SetConnectableAdvInterval(value) => {
                set(AtMnemonic::ConnectableAdvInterval, format!("{value:04x}"))
            }
            Self::GetConnectableAdvInterval => Ok(AtCommand::get(AtMnemonic::ConnectableAdvInterval)),
            Self::SetCustomBeaconData(data) => set(AtMnemonic::CustomBeaconData, hex::encode(data)),
            Self::ClearCustomBeaconData => Ok(AtCommand::action(AtMnemonic::CustomBeaconClear)),
            Self::SetRssiCalibration { power, rssi } => set(
                AtMnemonic::RssiCalibration,
                format!("{}{}", signed_hex(*power), signed_hex(*rssi)),
            ),
            Self::GetRssiCalibration => Ok(AtCommand::get(AtMnemonic::RssiCalibration)),
            Self::SetGpioConfig {
                pin,
                direction,
                pull,
            } => Ok(AtCommand::set(
                AtMnemonic::GpioConfig,
                [
                    pin.to_string(),
                    format!("{:02x}", direction.code()),
                    format!("{:02x}", pull.code()),
                ],
            )),
            Self::GetGpioConfig(pin) => set(AtMnemonic::GpioConfigGet, pin.to_string()),
            Self::WriteGpio { pin, level } => Ok(AtCommand::set(
                AtMnemonic::GpioWrite,
                [pin.to_string(), format!("{:02x}", level.code())],
            )),
            Self::ReadGpio(pin) => set(AtMnemonic::GpioRead, pin.to_string()),
            Self::SetUartBaudRate(baud) => set(AtMnemonic::UartBaudRate, baud.to_string()),
            Self::SetUartParity(enabled) => set(AtMnemonic::UartParity, at_flag(*enabled)),
            Self::SetUartFlowControl(enabled) => {
                set(AtMnemonic::UartFlowControl, at_flag(*enabled))
            }
            Self::SetUartEnable(enabled) => set(AtMnemonic::UartEnable, at_flag(*enabled)),
            Self::SetPassword(password) => set(AtMnemonic::Password, password.clone()),
            Self::Unlock(password) => set(AtMnemonic::Unlock, password.clone()),
            Self::ResetDefaults => Ok(AtCommand::action(AtMnemonic::ResetDefaults)),
            Self::SoftReset => Ok(AtCommand::action(AtMnemonic::DeviceReset)),
            Self::Get(mnemonic) => Ok(AtCommand::get(*mnemonic)),
            Self::Attention => Ok(AtCommand::attention()),
            Self::HardwareInfo => Ok(AtCommand::get(AtMnemonic::HardwareInfo)),
            Self::SetCustomBeaconDataPart(..)
            | Self::SaveCustomBeaconData
            | Self::ConfigureStatusPin { .. }
            | Self::DeconfigureStatusPin
            | Self::GetStatusPinConfig
            | Self::ReadStatusPin
            | Self::EnterBootloader
            | Self::Read(_) => Err(self.unsupported(Channel::Serial)),
        }
    }
}

/// Serial passthrough is not an AT command, so it bypasses [`Operation::command`].
pub(crate) fn serial_passthrough(data: &[u8]) -> Command {
    Command::RawSerial(data.to_vec())
}

fn at_flag(enabled: bool) -> String {
    (if enabled { "01" } else { "00" }).to_string()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Operation::SetBeaconMajor(0x9876), "at$bmjid 9876\n")]
    #[case(Operation::SetRssiCalibration { power: -4, rssi: -29 }, "at$bcal fce3\n")]
    #[case(Operation::GetGpioConfig(GpioPin(0x0e)), "at$gcget 0E\n")]
    #[case(Operation::SetUartBaudRate(115_200), "at$ubr 115200\n")]
    #[case(Operation::SetBeaconEnable(true), "at$ben 01\n")]
    #[case(Operation::SoftReset, "at$devrst\n")]
    fn operations_encode_as_at_lines(#[case] operation: Operation, #[case] expected: &str) {
        let Ok(Command::At(command)) = operation.command(Channel::Serial) else {
            panic!("{operation:?} has an AT form");
        };
        assert_eq!(expected, command.encode());
    }

    #[rstest]
    #[case(Operation::SetBeaconMajor(0x9876), Command::AttributeWrite { endpoint: EndpointId::BeaconMajor, value: vec![0x76, 0x98] })]
    #[case(Operation::SetGpioConfig { pin: GpioPin(0x07), direction: Direction::In, pull: Pull::Down }, Command::ControlPoint(vec![0x50, 0x07, 0x00, 0x01]))]
    #[case(Operation::Unlock("test".to_string()), Command::ControlPoint(vec![0xf8, 0x74, 0x65, 0x73, 0x74]))]
    #[case(Operation::SoftReset, Command::ControlPoint(SOFT_RESET_TOKEN.to_vec()))]
    fn operations_encode_for_ble(#[case] operation: Operation, #[case] expected: Command) {
        assert_eq!(Ok(expected), operation.command(Channel::Ble));
    }

    #[test]
    fn channel_only_operations_are_rejected() {
        assert_matches!(
            Operation::ReadStatusPin.command(Channel::Serial),
            Err(EncodingError::UnsupportedOnChannel { channel: "AT", .. })
        );
        assert_matches!(
            Operation::Attention.command(Channel::Ble),
            Err(EncodingError::UnsupportedOnChannel { channel: "BLE", .. })
        );
    }

    #[test]
    fn oversized_custom_data_is_an_encoding_error() {
        let operation = Operation::SetCustomBeaconDataPart(CustomDataPart::First, vec![0; 20]);
        assert_matches!(
            operation.command(Channel::Ble),
            Err(EncodingError::PayloadTooLong { len: 20, max: 19 })
        );
    }

    #[rstest]
    #[case(Reply::success(), Command::At(AtCommand::attention()), Some(MatchRule::Exact(b"OK".to_vec())))]
    #[case(Reply::locked(), Command::ControlPoint(vec![0x41]), Some(MatchRule::Exact(vec![0x01])))]
    #[case(Reply::success(), Command::AttributeWrite { endpoint: EndpointId::BeaconMajor, value: vec![0, 0] }, None)]
    #[case(Reply::locked(), Command::AttributeWrite { endpoint: EndpointId::BeaconMajor, value: vec![0, 0] }, Some(MatchRule::Exact(vec![0x01])))]
    fn replies_map_to_channel_specific_rules(
        #[case] reply: Reply,
        #[case] command: Command,
        #[case] expected: Option<MatchRule>,
    ) {
        assert_eq!(expected, reply.rule_for(&command));
    }
}
