use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, warn};

use super::command::{Channel, Command, CustomDataPart, Operation, Reply, serial_passthrough};
use crate::codec::decode_at_response_line;
use crate::correlation::{
    Expectation, ExpectationHandle, ExpectationQueue, Resolution, Source, StepLog, wait_for,
    wait_for_disconnect,
};
use crate::error::{ProtocolViolation, TransportError};
use crate::hw::{Hardware, RadioTransport, SerialConfig, SerialPortHandle, SerialTransport, WriteMode};
use crate::protocol::{
    AtMnemonic, CUSTOM_BEACON_DATA_PART1_LEN, ControlOpcode, DEFAULT_PASSWORD, Direction,
    EndpointId, GpioPin, HardwareVariant, Level, Pull, UART_BUFFER_ALMOST_FULL, UART_BUFFER_FULL,
    UART_CHUNK_LEN,
};
use crate::scan::{DeviceQuery, find_device};
use crate::utils::signed_hex;

/// Reply deadline for ordinary commands.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(3);
/// Deadline for the bare `AT` line.
pub const AT_ATTENTION_TIMEOUT: Duration = Duration::from_millis(1000);
/// Deadline for the hardware-info query.
pub const HARDWARE_INFO_TIMEOUT: Duration = Duration::from_millis(500);
/// Time a DUT needs after a reset before it accepts commands.
pub const DEFAULT_RESET_SETTLE: Duration = Duration::from_millis(500);
/// Pause after each AT exchange; the firmware drops lines sent back to back.
pub const DEFAULT_AT_COMMAND_GAP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, derive_more::Display)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, derive_more::Display)]
pub enum AtMode {
    #[default]
    Unknown,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, derive_more::Display)]
pub enum LockState {
    #[default]
    Unknown,
    Locked,
    Unlocked,
}

/// How to open one [`DeviceSession`].
#[derive(Debug, Clone, Builder)]
pub struct SessionConfig {
    #[builder(into)]
    name: String,
    serial: Option<SerialConfig>,
    /// Whether the session may use the shared radio.
    #[builder(default = true)]
    bind_radio: bool,
    #[builder(default = DEFAULT_REPLY_TIMEOUT)]
    reply_timeout: Duration,
    #[builder(default = DEFAULT_AT_COMMAND_GAP)]
    at_command_gap: Duration,
}

/// One DUT reached over BLE, its UART, or both.
///
/// Every exchange goes through a single-slot [`ExpectationQueue`], so commands
/// on one session are strictly serialized.
#[derive(Debug)]
pub struct DeviceSession {
    name: String,
    radio: Option<Arc<dyn RadioTransport>>,
    serial_transport: Arc<dyn SerialTransport>,
    serial: Option<SerialPortHandle>,
    serial_reader: Option<JoinHandle<()>>,
    ble_readers: Vec<JoinHandle<()>>,
    queue: ExpectationQueue,
    steps: StepLog,
    peripheral_id: Option<String>,
    connection: ConnectionState,
    at_mode: AtMode,
    lock: LockState,
    password_set: bool,
    relock_after_next_at: bool,
    variant: HardwareVariant,
    reply_timeout: Duration,
    at_command_gap: Duration,
    note: Option<String>,
    transport_failed: bool,
}

impl DeviceSession {
    /// Opens the configured serial port and binds the radio.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the serial port cannot be opened.
    #[instrument(skip_all, level = "info", fields(session = %config.name))]
    pub async fn open(
        config: SessionConfig,
        hardware: &Hardware,
        steps: StepLog,
    ) -> Result<Self, TransportError> {
        let mut session = Self {
            queue: ExpectationQueue::new(&config.name, steps.clone()),
            name: config.name,
            radio: config.bind_radio.then(|| hardware.radio()),
            serial_transport: hardware.serial(),
            serial: None,
            serial_reader: None,
            ble_readers: Vec::new(),
            steps,
            peripheral_id: None,
            connection: ConnectionState::Disconnected,
            at_mode: AtMode::Unknown,
            lock: LockState::Unknown,
            password_set: false,
            relock_after_next_at: false,
            variant: HardwareVariant::Unknown,
            reply_timeout: config.reply_timeout,
            at_command_gap: config.at_command_gap,
            note: None,
            transport_failed: false,
        };
        if let Some(serial) = &config.serial {
            session.open_serial(serial).await?;
        }
        Ok(session)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    #[must_use]
    pub fn at_mode(&self) -> AtMode {
        self.at_mode
    }

    #[must_use]
    pub fn lock_state(&self) -> LockState {
        self.lock
    }

    #[must_use]
    pub fn hardware_variant(&self) -> HardwareVariant {
        self.variant
    }

    #[must_use]
    pub fn peripheral_id(&self) -> Option<&str> {
        self.peripheral_id.as_deref()
    }

    #[must_use]
    pub fn has_serial(&self) -> bool {
        self.serial.is_some()
    }

    /// Takes the latest failure note, if any.
    pub fn take_note(&mut self) -> Option<String> {
        self.note.take()
    }

    /// Whether a failure since the last call left the session without a
    /// usable link or port. Mismatches and timeouts never set this.
    ///
    /// Until it is taken or the radio reconnects, further commands are
    /// skipped without being recorded.
    pub fn take_transport_failure(&mut self) -> bool {
        std::mem::take(&mut self.transport_failed)
    }

    /// Replaces the serial port, e.g. to switch baud rate or framing.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if closing the old port or opening the new
    /// one fails.
    #[instrument(skip(self, config), level = "debug", fields(session = %self.name, path = config.path()))]
    pub async fn open_serial(&mut self, config: &SerialConfig) -> Result<(), TransportError> {
        self.close_serial().await?;
        let mut port = self.serial_transport.open(config).await?;
        if let Some(mut frames) = port.take_frames() {
            let queue = self.queue.clone();
            self.serial_reader = Some(tokio::spawn(async move {
                while let Some(frame) = frames.recv().await {
                    queue.deliver(Source::Serial, &frame);
                }
            }));
        }
        self.serial = Some(port);
        self.at_mode = AtMode::Unknown;
        Ok(())
    }

    async fn close_serial(&mut self) -> Result<(), TransportError> {
        if let Some(reader) = self.serial_reader.take() {
            reader.abort();
        }
        if let Some(mut port) = self.serial.take() {
            port.close().await?;
        }
        Ok(())
    }

    /// Runs `operation` on `channel` and compares the reply with `reply`.
    ///
    /// Encoding and transport failures are recorded as failed steps, never
    /// returned.
    pub async fn execute(&mut self, operation: &Operation, channel: Channel, reply: Reply) -> bool {
        let label = format!("{} ({channel})", operation.name());
        self.execute_labelled(&label, operation, channel, reply).await
    }

    #[instrument(
        skip(self, operation, reply),
        level = "debug",
        fields(session = %self.name, %channel, operation = %operation.name())
    )]
    pub async fn execute_labelled(
        &mut self,
        label: &str,
        operation: &Operation,
        channel: Channel,
        reply: Reply,
    ) -> bool {
        let command = match operation.command(channel) {
            Ok(command) => command,
            Err(error) => return self.fail(label, error.to_string()),
        };
        let passed = self.run_command(label, &command, &reply).await;
        if passed && reply == Reply::success() {
            self.track_lock(operation, channel);
        }
        passed
    }

    async fn run_command(&mut self, label: &str, command: &Command, reply: &Reply) -> bool {
        self.exchange(label, command, reply, self.reply_timeout, true)
            .await
            .is_some_and(|resolution| resolution.is_match())
    }

    /// Arms, sends and waits. `None` means the exchange never started.
    async fn exchange(
        &mut self,
        label: &str,
        command: &Command,
        reply: &Reply,
        timeout: Duration,
        recorded: bool,
    ) -> Option<Resolution> {
        if self.transport_failed {
            debug!(session = %self.name, %label, "skipped until the link is back");
            return None;
        }
        let serial_line = matches!(command, Command::At(_));
        let relock = serial_line && std::mem::take(&mut self.relock_after_next_at);

        let mut armed = None;
        if let Some(rule) = reply.rule_for(command) {
            let expectation = Expectation::builder()
                .label(label)
                .rule(rule)
                .source(command.reply_source())
                .timeout(timeout)
                .recorded(recorded)
                .build();
            let claimed = self.queue.arm(expectation);
            armed = Some(self.claim_slot(claimed, recorded, label)?);
        }

        if let Err(error) = self.send(command).await {
            self.queue.clear();
            warn!(session = %self.name, %label, %error, "send failed");
            self.fail_transport(recorded, label, error.to_string());
            return None;
        }

        // Replies that never come are only settled once the command went out.
        let handle = match armed {
            Some(handle) => handle,
            None => {
                let settled = self.queue.arm_no_response(label, recorded);
                self.claim_slot(settled, recorded, label)?
            }
        };

        let resolution = wait_for(handle).await;
        if serial_line {
            tokio::time::sleep(self.at_command_gap).await;
            if relock && self.password_set {
                debug!(session = %self.name, "AT unlock expired");
                self.lock = LockState::Locked;
            }
        }
        Some(resolution)
    }

    async fn send(&mut self, command: &Command) -> Result<(), TransportError> {
        match command {
            Command::ControlPoint(frame) => {
                self.connected_radio()?
                    .write(EndpointId::ControlPoint, frame, WriteMode::WithResponse)
                    .await
            }
            Command::AttributeWrite { endpoint, value } => {
                self.connected_radio()?
                    .write(*endpoint, value, WriteMode::WithResponse)
                    .await
            }
            Command::AttributeRead { endpoint } => {
                let value = self.connected_radio()?.read(*endpoint).await?;
                self.queue.deliver(Source::AttributeRead, &value);
                Ok(())
            }
            Command::At(line) => self.serial_port()?.write(line.encode().as_bytes()).await,
            Command::RawSerial(bytes) => self.serial_port()?.write(bytes).await,
            Command::UartStream(bytes) => {
                let radio = self.connected_radio()?;
                for chunk in bytes.chunks(UART_CHUNK_LEN) {
                    radio
                        .write(EndpointId::UartRx, chunk, WriteMode::WithResponse)
                        .await?;
                }
                Ok(())
            }
        }
    }

    fn connected_radio(&self) -> Result<Arc<dyn RadioTransport>, TransportError> {
        match &self.radio {
            Some(radio) if self.connection == ConnectionState::Connected => Ok(Arc::clone(radio)),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn serial_port(&mut self) -> Result<&mut SerialPortHandle, TransportError> {
        let session = self.name.clone();
        self.serial
            .as_mut()
            .ok_or(TransportError::SerialNotOpen { session })
    }

    fn fail(&mut self, label: &str, note: String) -> bool {
        warn!(session = %self.name, %label, %note, "step failed");
        self.steps.record(label, false, Some(note.clone()));
        self.note = Some(note);
        false
    }

    fn fail_if(&mut self, recorded: bool, label: &str, note: String) {
        if recorded {
            self.fail(label, note);
        } else {
            self.note = Some(note);
        }
    }

    /// A failure that leaves nothing to talk to.
    fn fail_transport(&mut self, recorded: bool, label: &str, note: String) {
        self.transport_failed = true;
        self.fail_if(recorded, label, note);
    }

    fn lose_link(&mut self, note: String) -> bool {
        self.transport_failed = true;
        self.note = Some(note);
        false
    }

    fn claim_slot(
        &mut self,
        armed: Result<ExpectationHandle, ProtocolViolation>,
        recorded: bool,
        label: &str,
    ) -> Option<ExpectationHandle> {
        match armed {
            Ok(handle) => Some(handle),
            Err(violation) => {
                self.fail_transport(recorded, label, violation.to_string());
                None
            }
        }
    }

    fn track_lock(&mut self, operation: &Operation, channel: Channel) {
        match operation {
            Operation::SetPassword(password) => {
                self.password_set = password != DEFAULT_PASSWORD;
                self.lock = if self.password_set {
                    LockState::Locked
                } else {
                    LockState::Unlocked
                };
            }
            Operation::Unlock(_) => {
                self.lock = LockState::Unlocked;
                self.relock_after_next_at = channel == Channel::Serial;
            }
            Operation::ResetDefaults => {
                self.password_set = false;
                self.relock_after_next_at = false;
                self.lock = LockState::Unlocked;
            }
            _ => {}
        }
    }

    async fn query_quietly(
        &mut self,
        label: &str,
        operation: &Operation,
        reply: Reply,
        timeout: Duration,
    ) -> Option<Resolution> {
        let command = operation.command(Channel::Serial).ok()?;
        self.exchange(label, &command, &reply, timeout, false).await
    }

    /// Sends a bare `AT`; `OK` or `ERR` both prove AT mode.
    #[instrument(skip(self), level = "info", fields(session = %self.name))]
    pub async fn verify_at_mode(&mut self) -> bool {
        let enabled = self
            .query_quietly(
                "AT mode check",
                &Operation::Attention,
                Reply::at_alive(),
                AT_ATTENTION_TIMEOUT,
            )
            .await
            .is_some_and(|resolution| resolution.is_match());
        self.at_mode = if enabled {
            AtMode::Enabled
        } else {
            AtMode::Disabled
        };
        info!(session = %self.name, at_mode = %self.at_mode, "checked AT mode");
        enabled
    }

    /// Verifies AT mode, then identifies the hardware variant.
    pub async fn enter_at_mode(&mut self) -> bool {
        if !self.verify_at_mode().await {
            return false;
        }
        self.query_hardware_info().await;
        true
    }

    /// Classifies the module from its `at$hwinfo?` reply.
    #[instrument(skip(self), level = "info", fields(session = %self.name))]
    pub async fn query_hardware_info(&mut self) -> HardwareVariant {
        let resolution = self
            .query_quietly(
                "hardware info",
                &Operation::HardwareInfo,
                Reply::Any,
                HARDWARE_INFO_TIMEOUT,
            )
            .await;
        let variant = resolution
            .as_ref()
            .and_then(Resolution::actual)
            .map(|actual| HardwareVariant::from_hardware_info(&decode_at_response_line(actual)))
            .unwrap_or_default();
        info!(session = %self.name, %variant, "hardware variant");
        self.variant = variant;
        variant
    }

    /// Locates the DUT and connects to it.
    pub async fn find_and_connect(&mut self, query: &DeviceQuery) -> bool {
        let Some(radio) = self.radio.clone() else {
            return self.lose_link(format!("session `{}` has no radio", self.name));
        };
        match find_device(radio.as_ref(), query).await {
            Ok(Some(found)) => self.connect_radio(found.peripheral_id()).await,
            Ok(None) => {
                self.connection = ConnectionState::Disconnected;
                self.lose_link("Could not find a BMDware test device!".to_string())
            }
            Err(error) => {
                self.connection = ConnectionState::Disconnected;
                self.lose_link(format!("Scan failed: {error}"))
            }
        }
    }

    /// Connects and starts forwarding control-point and UART TX notifications.
    #[instrument(skip(self), level = "info", fields(session = %self.name))]
    pub async fn connect_radio(&mut self, peripheral_id: &str) -> bool {
        let Some(radio) = self.radio.clone() else {
            return self.lose_link(format!("session `{}` has no radio", self.name));
        };
        self.connection = ConnectionState::Connecting;
        match self.subscribe_all(radio.as_ref(), peripheral_id).await {
            Ok(()) => {
                self.connection = ConnectionState::Connected;
                self.peripheral_id = Some(peripheral_id.to_string());
                self.transport_failed = false;
                true
            }
            Err(error) => {
                warn!(session = %self.name, %error, "connect failed");
                self.abort_ble_readers();
                // The link may be up even though a subscription failed.
                if let Err(disconnect_error) = radio.disconnect().await {
                    debug!(
                        session = %self.name,
                        error = %disconnect_error,
                        "disconnect after failed connect"
                    );
                }
                self.connection = ConnectionState::Disconnected;
                self.lose_link(format!("Failed to connect to device: {error}"))
            }
        }
    }

    async fn subscribe_all(
        &mut self,
        radio: &dyn RadioTransport,
        peripheral_id: &str,
    ) -> Result<(), TransportError> {
        radio.connect(peripheral_id).await?;
        for (endpoint, source) in [
            (EndpointId::ControlPoint, Source::ControlPoint),
            (EndpointId::UartTx, Source::UartTx),
        ] {
            let mut notifications = radio.subscribe_notify(endpoint).await?;
            let queue = self.queue.clone();
            self.ble_readers.push(tokio::spawn(async move {
                while let Some(frame) = notifications.next().await {
                    if source == Source::ControlPoint && is_uart_buffer_notice(&frame) {
                        warn!(code = frame[0], "DUT reports UART buffer pressure");
                        continue;
                    }
                    queue.deliver(source, &frame);
                }
            }));
        }
        Ok(())
    }

    fn abort_ble_readers(&mut self) {
        for reader in self.ble_readers.drain(..) {
            reader.abort();
        }
    }

    fn mark_disconnected(&mut self) {
        self.abort_ble_readers();
        self.connection = ConnectionState::Disconnected;
        self.peripheral_id = None;
        if self.password_set {
            self.lock = LockState::Locked;
        }
    }

    #[instrument(skip(self), level = "info", fields(session = %self.name))]
    pub async fn disconnect_radio(&mut self) -> bool {
        let result = match &self.radio {
            Some(radio) if self.connection != ConnectionState::Disconnected => {
                radio.disconnect().await
            }
            _ => Ok(()),
        };
        self.mark_disconnected();
        match result {
            Ok(()) => true,
            Err(error) => {
                self.note = Some(format!("Failed to disconnect: {error}"));
                false
            }
        }
    }

    /// Soft-resets the DUT and waits for it to drop the BLE link.
    ///
    /// Over BLE the reset token has no reply, so the disconnect event is the
    /// success signal. Over AT the `OK` reply is checked as well.
    #[instrument(skip(self), level = "info", fields(session = %self.name, %channel))]
    pub async fn reset(&mut self, channel: Channel, settle: Duration) -> bool {
        let mut events = match &self.radio {
            Some(radio) if self.connection == ConnectionState::Connected => {
                Some(radio.connection_events())
            }
            _ => None,
        };
        let reply = match channel {
            Channel::Ble => Reply::NoResponse,
            Channel::Serial => Reply::success(),
        };
        let label = format!("soft reset ({channel})");
        let sent = self
            .execute_labelled(&label, &Operation::SoftReset, channel, reply)
            .await;

        let disconnected = match events.as_mut() {
            Some(events) => {
                let seen = wait_for_disconnect(events, self.reply_timeout).await;
                self.steps.record(
                    "disconnect after reset",
                    seen,
                    (!seen).then(|| "device did not disconnect after reset".to_string()),
                );
                self.mark_disconnected();
                seen
            }
            None => true,
        };

        self.at_mode = AtMode::Unknown;
        self.relock_after_next_at = false;
        if self.password_set {
            self.lock = LockState::Locked;
        }
        tokio::time::sleep(settle).await;
        sent && disconnected
    }

    /// Aborts reader tasks, disconnects and closes the serial port.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the serial port fails to shut down.
    #[instrument(skip(self), level = "debug", fields(session = %self.name))]
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.queue.clear();
        if self.connection != ConnectionState::Disconnected {
            self.disconnect_radio().await;
        }
        self.close_serial().await
    }

    pub async fn set_beacon_uuid(&mut self, channel: Channel, uuid: [u8; 16]) -> bool {
        self.execute(&Operation::SetBeaconUuid(uuid), channel, Reply::success())
            .await
    }

    pub async fn set_beacon_major(&mut self, channel: Channel, major: u16) -> bool {
        self.execute(&Operation::SetBeaconMajor(major), channel, Reply::success())
            .await
    }

    pub async fn set_beacon_minor(&mut self, channel: Channel, minor: u16) -> bool {
        self.execute(&Operation::SetBeaconMinor(minor), channel, Reply::success())
            .await
    }

    pub async fn set_beacon_enable(&mut self, channel: Channel, enabled: bool) -> bool {
        self.execute(&Operation::SetBeaconEnable(enabled), channel, Reply::success())
            .await
    }

    pub async fn set_beacon_tx_power(&mut self, channel: Channel, power: i8) -> bool {
        self.execute(&Operation::SetBeaconTxPower(power), channel, Reply::success())
            .await
    }

    pub async fn set_beacon_adv_interval(&mut self, channel: Channel, interval: u16) -> bool {
        self.execute(
            &Operation::SetBeaconAdvInterval(interval),
            channel,
            Reply::success(),
        )
        .await
    }

    pub async fn set_connectable_tx_power(&mut self, channel: Channel, power: i8) -> bool {
        self.execute(
            &Operation::SetConnectableTxPower(power),
            channel,
            Reply::success(),
        )
        .await
    }

    pub async fn set_connectable_adv_enable(&mut self, enabled: bool) -> bool {
        self.execute(
            &Operation::SetConnectableAdvEnable(enabled),
            Channel::Serial,
            Reply::success(),
        )
        .await
    }

    /// Writes a custom advertising payload: two control-point parts over
    /// BLE, one line over AT.
    pub async fn set_custom_beacon_data(&mut self, channel: Channel, data: &[u8]) -> bool {
        match channel {
            Channel::Ble => {
                let split = data.len().min(CUSTOM_BEACON_DATA_PART1_LEN);
                let (first, second) = data.split_at(split);
                let mut passed = self
                    .execute(
                        &Operation::SetCustomBeaconDataPart(CustomDataPart::First, first.to_vec()),
                        channel,
                        Reply::success(),
                    )
                    .await;
                if !second.is_empty() {
                    passed &= self
                        .execute(
                            &Operation::SetCustomBeaconDataPart(
                                CustomDataPart::Second,
                                second.to_vec(),
                            ),
                            channel,
                            Reply::success(),
                        )
                        .await;
                }
                passed
            }
            Channel::Serial => {
                self.execute(
                    &Operation::SetCustomBeaconData(data.to_vec()),
                    channel,
                    Reply::success(),
                )
                .await
            }
        }
    }

    pub async fn save_custom_beacon_data(&mut self) -> bool {
        self.execute(&Operation::SaveCustomBeaconData, Channel::Ble, Reply::success())
            .await
    }

    pub async fn clear_custom_beacon_data(&mut self, channel: Channel) -> bool {
        self.execute(&Operation::ClearCustomBeaconData, channel, Reply::success())
            .await
    }

    pub async fn set_rssi_calibration(&mut self, channel: Channel, power: i8, rssi: i8) -> bool {
        self.execute(
            &Operation::SetRssiCalibration { power, rssi },
            channel,
            Reply::success(),
        )
        .await
    }

    /// Reads the RSSI calibration and compares it with `(power, rssi)`.
    pub async fn get_rssi_calibration(&mut self, channel: Channel, power: i8, rssi: i8) -> bool {
        let reply = match channel {
            Channel::Ble => Reply::Value(vec![
                ControlOpcode::GetRssiCalibration.code(),
                power.to_be_bytes()[0],
                rssi.to_be_bytes()[0],
            ]),
            Channel::Serial => Reply::text(format!("{} {}", signed_hex(power), signed_hex(rssi))),
        };
        self.execute(&Operation::GetRssiCalibration, channel, reply)
            .await
    }

    pub async fn set_gpio_config(
        &mut self,
        channel: Channel,
        pin: GpioPin,
        direction: Direction,
        pull: Pull,
    ) -> bool {
        self.execute(
            &Operation::SetGpioConfig {
                pin,
                direction,
                pull,
            },
            channel,
            Reply::success(),
        )
        .await
    }

    /// Reads a pin configuration and compares it with `direction` and `pull`.
    pub async fn get_gpio_config(
        &mut self,
        channel: Channel,
        pin: GpioPin,
        direction: Direction,
        pull: Pull,
    ) -> bool {
        let reply = match channel {
            Channel::Ble => Reply::Value(vec![
                ControlOpcode::GetGpioConfig.code(),
                pin.0,
                direction.code(),
                pull.code(),
            ]),
            Channel::Serial => Reply::text(format!(
                "{pin} {:02x} {:02x}",
                direction.code(),
                pull.code()
            )),
        };
        self.execute(&Operation::GetGpioConfig(pin), channel, reply)
            .await
    }

    pub async fn write_gpio(&mut self, channel: Channel, pin: GpioPin, level: Level) -> bool {
        self.execute(&Operation::WriteGpio { pin, level }, channel, Reply::success())
            .await
    }

    /// Reads a pin and compares it with `level`.
    pub async fn read_gpio(&mut self, channel: Channel, pin: GpioPin, level: Level) -> bool {
        let reply = match channel {
            Channel::Ble => Reply::Value(vec![ControlOpcode::ReadGpio.code(), pin.0, level.code()]),
            Channel::Serial => Reply::text(format!("{:02x}", level.code())),
        };
        self.execute(&Operation::ReadGpio(pin), channel, reply).await
    }

    pub async fn configure_status_pin(&mut self, pin: GpioPin, polarity: Level) -> bool {
        self.execute(
            &Operation::ConfigureStatusPin { pin, polarity },
            Channel::Ble,
            Reply::success(),
        )
        .await
    }

    pub async fn deconfigure_status_pin(&mut self) -> bool {
        self.execute(&Operation::DeconfigureStatusPin, Channel::Ble, Reply::success())
            .await
    }

    pub async fn get_status_pin_config(&mut self, pin: GpioPin, polarity: Level) -> bool {
        let reply = Reply::Value(vec![
            ControlOpcode::GetStatusPinConfig.code(),
            pin.0,
            polarity.code(),
        ]);
        self.execute(&Operation::GetStatusPinConfig, Channel::Ble, reply)
            .await
    }

    /// Reads the connection status pin; `active` is whether it reports a
    /// connection.
    pub async fn read_status_pin(&mut self, active: bool) -> bool {
        let reply = Reply::Value(vec![ControlOpcode::ReadStatusPin.code(), u8::from(active)]);
        self.execute(&Operation::ReadStatusPin, Channel::Ble, reply)
            .await
    }

    pub async fn set_uart_baud_rate(&mut self, channel: Channel, baud_rate: u32) -> bool {
        self.execute(&Operation::SetUartBaudRate(baud_rate), channel, Reply::success())
            .await
    }

    pub async fn set_uart_parity(&mut self, channel: Channel, enabled: bool) -> bool {
        self.execute(&Operation::SetUartParity(enabled), channel, Reply::success())
            .await
    }

    pub async fn set_uart_flow_control(&mut self, channel: Channel, enabled: bool) -> bool {
        self.execute(&Operation::SetUartFlowControl(enabled), channel, Reply::success())
            .await
    }

    pub async fn set_uart_enable(&mut self, channel: Channel, enabled: bool) -> bool {
        self.execute(&Operation::SetUartEnable(enabled), channel, Reply::success())
            .await
    }

    /// AT getter compared with `expected`; used by the lock audit.
    pub async fn get(&mut self, mnemonic: AtMnemonic, expected: &str) -> bool {
        self.execute(&Operation::Get(mnemonic), Channel::Serial, Reply::text(expected))
            .await
    }

    pub async fn set_password(&mut self, channel: Channel, password: &str) -> bool {
        self.execute(
            &Operation::SetPassword(password.to_string()),
            channel,
            Reply::success(),
        )
        .await
    }

    pub async fn unlock_device(&mut self, channel: Channel, password: &str) -> bool {
        self.execute(
            &Operation::Unlock(password.to_string()),
            channel,
            Reply::success(),
        )
        .await
    }

    /// Expects every operation to be refused with the locked status.
    pub async fn lockout_check(&mut self, channel: Channel, operations: &[Operation]) -> bool {
        let mut all_locked = true;
        for operation in operations {
            let label = format!("{} while locked ({channel})", operation.name());
            let locked = self
                .execute_labelled(&label, operation, channel, Reply::locked())
                .await;
            all_locked &= locked;
        }
        all_locked
    }

    pub async fn reset_defaults(&mut self, channel: Channel) -> bool {
        self.execute(&Operation::ResetDefaults, channel, Reply::success())
            .await
    }

    /// Sends the bootloader token, expecting `reply` (the locked status when
    /// the device is locked).
    pub async fn enter_bootloader(&mut self, reply: Reply) -> bool {
        self.execute(&Operation::EnterBootloader, Channel::Ble, reply)
            .await
    }

    /// Reads the serial number and firmware revision characteristics.
    pub async fn read_device_info(&mut self, expected_version: Option<&str>) -> bool {
        let serial_number = self
            .execute(
                &Operation::Read(EndpointId::SerialNumber),
                Channel::Ble,
                Reply::Any,
            )
            .await;
        let version = self
            .execute(
                &Operation::Read(EndpointId::FirmwareRevision),
                Channel::Ble,
                expected_version.map_or(Reply::Any, |version| {
                    Reply::Value(version.as_bytes().to_vec())
                }),
            )
            .await;
        serial_number && version
    }

    /// Sends `data` through the UART bridge from `from` and expects it to
    /// arrive intact on the other side.
    #[instrument(skip(self, data), level = "info", fields(session = %self.name, %from, len = data.len()))]
    pub async fn passthrough(&mut self, from: Channel, data: &[u8]) -> bool {
        let command = match from {
            Channel::Ble => Command::UartStream(data.to_vec()),
            Channel::Serial => serial_passthrough(data),
        };
        let label = format!("UART passthrough of {} bytes from {from}", data.len());
        self.run_command(&label, &command, &Reply::Stream(data.to_vec()))
            .await
    }

    /// Records a step whose outcome was decided outside the queue.
    pub fn record(&mut self, label: &str, passed: bool, note: Option<String>) {
        if !passed {
            self.note.clone_from(&note);
        }
        self.steps.record(label, passed, note);
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.abort_ble_readers();
        if let Some(reader) = self.serial_reader.take() {
            reader.abort();
        }
    }
}

fn is_uart_buffer_notice(frame: &[u8]) -> bool {
    matches!(frame, [code] if *code == UART_BUFFER_ALMOST_FULL || *code == UART_BUFFER_FULL)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::codec::Framing;
    use crate::correlation::StepRecord;
    use crate::hw::{Fault, FakeRig, FakeRigConfig, SIM_SETUP_UART, SIM_TARGET_UART};

    fn rig() -> (FakeRig, Hardware, StepLog) {
        let rig = FakeRig::new(FakeRigConfig::default());
        let hardware = Hardware::simulated(&rig);
        (rig, hardware, StepLog::new())
    }

    fn serial(path: &str, framing: Framing) -> SerialConfig {
        SerialConfig::builder().path(path).framing(framing).build()
    }

    async fn connected_target(hardware: &Hardware, steps: &StepLog) -> DeviceSession {
        let config = SessionConfig::builder().name("target").build();
        let mut session = DeviceSession::open(config, hardware, steps.clone())
            .await
            .expect("session opens");
        let query = DeviceQuery::builder()
            .address(FakeRigConfig::default().target_address())
            .build();
        assert!(session.find_and_connect(&query).await);
        session
    }

    #[tokio::test(start_paused = true)]
    async fn gpio_config_round_trips_over_ble() {
        let (_rig, hardware, steps) = rig();
        let mut target = connected_target(&hardware, &steps).await;
        let pin = GpioPin(0x0e);

        assert!(
            target
                .set_gpio_config(Channel::Ble, pin, Direction::Out, Pull::None)
                .await
        );
        assert!(
            target
                .get_gpio_config(Channel::Ble, pin, Direction::Out, Pull::None)
                .await
        );
        assert_eq!(None, steps.first_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn password_locks_until_unlocked_and_relocks_on_disconnect() {
        let (_rig, hardware, steps) = rig();
        let mut target = connected_target(&hardware, &steps).await;

        assert!(target.set_password(Channel::Ble, "secret").await);
        assert_eq!(LockState::Locked, target.lock_state());
        assert!(
            target
                .lockout_check(Channel::Ble, &[Operation::SetBeaconMajor(7)])
                .await
        );

        assert!(target.unlock_device(Channel::Ble, "secret").await);
        assert_eq!(LockState::Unlocked, target.lock_state());
        assert!(target.set_beacon_major(Channel::Ble, 7).await);

        assert!(target.disconnect_radio().await);
        assert_eq!(LockState::Locked, target.lock_state());
        assert_eq!(ConnectionState::Disconnected, target.connection_state());
    }

    #[tokio::test(start_paused = true)]
    async fn setup_board_reports_at_mode_and_variant() {
        let (_rig, hardware, steps) = rig();
        let config = SessionConfig::builder()
            .name("setup")
            .serial(serial(SIM_SETUP_UART, Framing::default()))
            .bind_radio(false)
            .build();
        let mut setup = DeviceSession::open(config, &hardware, steps.clone())
            .await
            .expect("session opens");

        assert!(setup.enter_at_mode().await);
        assert_eq!(AtMode::Enabled, setup.at_mode());
        assert_eq!(HardwareVariant::Nrf52, setup.hardware_variant());
        assert!(steps.is_empty(), "AT-mode checks are not recorded");
    }

    #[tokio::test(start_paused = true)]
    async fn target_outside_at_mode_ignores_bare_at() {
        let (_rig, hardware, steps) = rig();
        let config = SessionConfig::builder()
            .name("target")
            .serial(serial(SIM_TARGET_UART, Framing::default()))
            .build();
        let mut target = DeviceSession::open(config, &hardware, steps)
            .await
            .expect("session opens");

        assert!(!target.verify_at_mode().await);
        assert_eq!(AtMode::Disabled, target.at_mode());
    }

    #[tokio::test(start_paused = true)]
    async fn passthrough_crosses_the_bridge_both_ways() {
        let (_rig, hardware, steps) = rig();
        let mut target = connected_target(&hardware, &steps).await;
        target
            .open_serial(&serial(SIM_TARGET_UART, Framing::Raw))
            .await
            .expect("raw port opens");
        assert!(target.set_uart_enable(Channel::Ble, true).await);
        let data: Vec<u8> = (0..=255).collect();

        assert!(target.passthrough(Channel::Ble, &data).await);
        assert!(target.passthrough(Channel::Serial, &data).await);
        assert_eq!(None, steps.first_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn ble_reset_drops_the_link() {
        let (rig, hardware, steps) = rig();
        let mut target = connected_target(&hardware, &steps).await;

        assert!(target.reset(Channel::Ble, DEFAULT_RESET_SETTLE).await);
        assert_eq!(ConnectionState::Disconnected, target.connection_state());
        assert!(!rig.target_connected());
        let labels: Vec<String> = steps
            .records()
            .iter()
            .map(|record| record.label().to_string())
            .collect();
        assert_eq!(
            vec![
                "soft reset (BLE)".to_string(),
                "disconnect after reset".to_string()
            ],
            labels
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_operation_is_a_failed_step() {
        let (_rig, hardware, steps) = rig();
        let mut target = connected_target(&hardware, &steps).await;

        assert!(
            !target
                .execute(&Operation::Attention, Channel::Ble, Reply::at_alive())
                .await
        );
        let failure = steps.first_failure().expect("failure recorded");
        assert_eq!("AT attention (BLE)", failure.label());
        assert!(target.take_note().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_without_a_link_is_one_failed_step() {
        let (_rig, hardware, steps) = rig();
        let config = SessionConfig::builder().name("target").build();
        let mut target = DeviceSession::open(config, &hardware, steps.clone())
            .await
            .expect("session opens");

        assert!(!target.reset(Channel::Ble, DEFAULT_RESET_SETTLE).await);

        let records = steps.records();
        assert_eq!(1, records.len(), "{records:?}");
        assert_eq!("soft reset (BLE)", records[0].label());
        assert!(!records[0].passed());
        assert!(target.take_transport_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_link_skips_later_commands_until_reconnected() {
        let (_rig, hardware, steps) = rig();
        let mut target = connected_target(&hardware, &steps).await;
        assert!(target.disconnect_radio().await);

        assert!(!target.set_beacon_major(Channel::Ble, 7).await);
        assert!(!target.set_beacon_minor(Channel::Ble, 8).await);
        assert_eq!(1, steps.len());

        let query = DeviceQuery::builder()
            .address(FakeRigConfig::default().target_address())
            .build();
        assert!(target.find_and_connect(&query).await);
        assert!(target.set_beacon_minor(Channel::Ble, 8).await);
        assert_eq!(2, steps.len());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_reply_is_not_a_transport_failure() {
        let (rig, hardware, steps) = rig();
        let mut target = connected_target(&hardware, &steps).await;
        rig.inject(Fault::DropReply);

        assert!(!target.set_beacon_major(Channel::Ble, 7).await);
        assert!(!target.take_transport_failure());
        assert!(target.set_beacon_major(Channel::Ble, 7).await);
        let outcomes: Vec<bool> = steps.records().iter().map(StepRecord::passed).collect();
        assert_eq!(vec![false, true], outcomes);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscription_drops_the_link() {
        let (rig, hardware, steps) = rig();
        let config = SessionConfig::builder().name("target").build();
        let mut target = DeviceSession::open(config, &hardware, steps)
            .await
            .expect("session opens");
        let query = DeviceQuery::builder()
            .address(FakeRigConfig::default().target_address())
            .build();
        rig.inject(Fault::RefuseSubscription);

        assert!(!target.find_and_connect(&query).await);
        assert!(!rig.target_connected());
        assert_eq!(ConnectionState::Disconnected, target.connection_state());
        assert!(target.take_transport_failure());
        assert!(
            target
                .take_note()
                .is_some_and(|note| note.starts_with("Failed to connect to device"))
        );

        assert!(target.find_and_connect(&query).await);
        assert!(rig.target_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn commands_without_serial_fail_cleanly() {
        let (_rig, hardware, steps) = rig();
        let config = SessionConfig::builder().name("radio only").build();
        let mut session = DeviceSession::open(config, &hardware, steps.clone())
            .await
            .expect("session opens");

        assert!(!session.set_beacon_enable(Channel::Serial, true).await);
        assert_eq!(
            Some("session `radio only` has no open serial port"),
            steps.first_failure().as_ref().and_then(|record| record.note())
        );
    }
}
