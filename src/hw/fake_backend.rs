use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tracing::{debug, info, instrument, trace, warn};

use super::fake_firmware::{AdvertisingPacket, Firmware, FirmwareAction, FirmwareIdentity};
use super::radio::{
    Advertisement, ConnectionEvent, DiscoveryEvent, EventStream, RadioTransport, ScanOptions,
    WriteMode,
};
use super::serial::{SerialConfig, SerialPortHandle, SerialTransport};
use crate::error::TransportError;
use crate::protocol::{EndpointId, GpioPin, HardwareVariant, Level, bmdware_service_uuids};

/// Serial path of the simulated target board.
pub const SIM_TARGET_UART: &str = "sim://target";
/// Serial path of the simulated setup board.
pub const SIM_SETUP_UART: &str = "sim://setup";
/// Local name both simulated boards advertise.
pub const SIM_ADV_NAME: &str = "BMDware";

const ADVERTISING_PERIOD: Duration = Duration::from_millis(100);
const PIPE_CAPACITY: usize = 4096;
const CONNECTION_EVENT_CAPACITY: usize = 16;

/// Wiring and identity of the simulated two-board rig.
///
/// The target's `loopback` pairs connect an output pin to an input pin. The
/// setup board's `setup_at_ctrl_pin` and `setup_beacon_only_pin` drive the
/// target's AT-mode and beacon-only straps.
#[derive(Debug, Clone, Builder)]
pub struct FakeRigConfig {
    #[builder(default = HardwareVariant::Nrf52)]
    variant: HardwareVariant,
    #[builder(into, default = SIM_ADV_NAME.to_string())]
    adv_name: String,
    #[builder(into, default = SIM_TARGET_UART.to_string())]
    target_uart: String,
    #[builder(into, default = SIM_SETUP_UART.to_string())]
    setup_uart: String,
    #[builder(into, default = "c0:98:e5:00:00:01".to_string())]
    target_address: String,
    #[builder(into, default = "c0:98:e5:00:00:02".to_string())]
    setup_address: String,
    #[builder(default = vec![(GpioPin(0x0e), GpioPin(0x0f)), (GpioPin(0x10), GpioPin(0x11))])]
    loopback: Vec<(GpioPin, GpioPin)>,
    #[builder(default = GpioPin(0x0c))]
    setup_at_ctrl_pin: GpioPin,
    #[builder(default = GpioPin(0x0d))]
    setup_beacon_only_pin: GpioPin,
    #[builder(into, default = "3.2.1".to_string())]
    firmware_version: String,
}

impl Default for FakeRigConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FakeRigConfig {
    #[must_use]
    pub fn target_address(&self) -> &str {
        &self.target_address
    }

    #[must_use]
    pub fn adv_name(&self) -> &str {
        &self.adv_name
    }

    #[must_use]
    pub fn loopback(&self) -> &[(GpioPin, GpioPin)] {
        &self.loopback
    }

    #[must_use]
    pub fn setup_at_ctrl_pin(&self) -> GpioPin {
        self.setup_at_ctrl_pin
    }
}

/// One-shot misbehaviour of the simulated target, consumed in the order
/// injected.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Fault {
    /// The next control-point notification or serial output is lost.
    DropReply,
    /// The next control-point notification or serial output arrives with
    /// its first byte garbled.
    CorruptReply,
    /// The next notification subscription fails after the link is up.
    RefuseSubscription,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Board {
    Target,
    Setup,
}

#[derive(Debug)]
struct BoardState {
    firmware: Firmware,
    address: String,
    uart_path: String,
    local_name: String,
    serial_out: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[derive(Debug)]
struct RigState {
    target: BoardState,
    setup: BoardState,
    connected: Option<Board>,
    subscribers: Vec<(EndpointId, mpsc::UnboundedSender<Vec<u8>>)>,
    scan_task: Option<JoinHandle<()>>,
    faults: VecDeque<Fault>,
}

impl RigState {
    fn board(&mut self, board: Board) -> &mut BoardState {
        match board {
            Board::Target => &mut self.target,
            Board::Setup => &mut self.setup,
        }
    }

    fn board_ref(&self, board: Board) -> &BoardState {
        match board {
            Board::Target => &self.target,
            Board::Setup => &self.setup,
        }
    }

    fn board_by_address(&self, address: &str) -> Option<Board> {
        if self.target.address.eq_ignore_ascii_case(address) {
            Some(Board::Target)
        } else if self.setup.address.eq_ignore_ascii_case(address) {
            Some(Board::Setup)
        } else {
            None
        }
    }

    fn take_fault(&mut self, wanted: impl Fn(Fault) -> bool) -> Option<Fault> {
        let index = self.faults.iter().position(|fault| wanted(*fault))?;
        self.faults.remove(index)
    }

    /// Applies a pending reply fault of the target to `frame`; `None` drops it.
    fn reply_from(&mut self, board: Board, mut frame: Vec<u8>) -> Option<Vec<u8>> {
        if board != Board::Target {
            return Some(frame);
        }
        match self.take_fault(|fault| matches!(fault, Fault::DropReply | Fault::CorruptReply)) {
            Some(Fault::DropReply) => {
                debug!(frame = %hex::encode(&frame), "simulated target reply dropped");
                None
            }
            Some(_) => {
                if let Some(first) = frame.first_mut() {
                    *first ^= 0x55;
                }
                debug!(frame = %hex::encode(&frame), "simulated target reply garbled");
                Some(frame)
            }
            None => Some(frame),
        }
    }

    fn board_by_uart(&self, path: &str) -> Option<Board> {
        if self.target.uart_path == path {
            Some(Board::Target)
        } else if self.setup.uart_path == path {
            Some(Board::Setup)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct RigInner {
    state: Mutex<RigState>,
    events: broadcast::Sender<ConnectionEvent>,
    setup_at_ctrl_pin: GpioPin,
    setup_beacon_only_pin: GpioPin,
}

/// In-process stand-in for the radio and both serial adapters of the rig.
///
/// Cloning shares the same simulated hardware, so one clone can serve as the
/// [`RadioTransport`] and another as the [`SerialTransport`].
#[derive(Debug, Clone)]
pub struct FakeRig {
    inner: Arc<RigInner>,
}

impl FakeRig {
    #[must_use]
    pub fn new(config: FakeRigConfig) -> Self {
        let board = |address: &str, uart_path: &str, loopback, at_ctrl| {
            let identity = FirmwareIdentity {
                variant: config.variant,
                mac: address.to_string(),
                version: config.firmware_version.clone(),
                serial_number: format!("SIM{}", address.replace(':', "").to_uppercase()),
            };
            let mut firmware = Firmware::new(identity, loopback);
            firmware.set_at_ctrl_line(at_ctrl);
            firmware.reset();
            BoardState {
                firmware,
                address: address.to_string(),
                uart_path: uart_path.to_string(),
                local_name: config.adv_name.clone(),
                serial_out: None,
            }
        };

        // The setup board is strapped into AT mode; the target follows the
        // setup board's outputs and floats high until they are driven.
        let state = RigState {
            target: board(
                &config.target_address,
                &config.target_uart,
                config.loopback.clone(),
                Level::High,
            ),
            setup: board(&config.setup_address, &config.setup_uart, Vec::new(), Level::Low),
            connected: None,
            subscribers: Vec::new(),
            scan_task: None,
            faults: VecDeque::new(),
        };
        let (events, _) = broadcast::channel(CONNECTION_EVENT_CAPACITY);
        info!(target_uart = %config.target_uart, setup_uart = %config.setup_uart, "simulated rig ready");

        Self {
            inner: Arc::new(RigInner {
                state: Mutex::new(state),
                events,
                setup_at_ctrl_pin: config.setup_at_ctrl_pin,
                setup_beacon_only_pin: config.setup_beacon_only_pin,
            }),
        }
    }

    /// Whether a central is connected to the simulated target.
    #[must_use]
    pub fn target_connected(&self) -> bool {
        self.lock().connected == Some(Board::Target)
    }

    /// Whether the simulated target is currently in AT mode.
    #[must_use]
    pub fn target_in_at_mode(&self) -> bool {
        self.lock().target.firmware.is_at_mode()
    }

    /// Queues `fault` for the simulated target.
    pub fn inject(&self, fault: Fault) {
        info!(?fault, "fault injected into the simulated target");
        self.lock().faults.push_back(fault);
    }

    fn lock(&self) -> MutexGuard<'_, RigState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, state: &mut RigState, board: Board, actions: Vec<FirmwareAction>) {
        for action in actions {
            match action {
                FirmwareAction::Notify(frame) => {
                    if let Some(frame) = state.reply_from(board, frame) {
                        self.notify(state, board, EndpointId::ControlPoint, frame);
                    }
                }
                FirmwareAction::UartTx(chunk) => {
                    self.notify(state, board, EndpointId::UartTx, chunk);
                }
                FirmwareAction::Serial(bytes) => {
                    let Some(bytes) = state.reply_from(board, bytes) else {
                        continue;
                    };
                    if let Some(out) = &state.board(board).serial_out
                        && out.send(bytes).is_err()
                    {
                        trace!(?board, "serial output dropped, port closed");
                    }
                }
                FirmwareAction::Reset | FirmwareAction::Bootloader => {
                    self.drop_connection(state, board);
                    state.board(board).firmware.reset();
                }
            }
        }
        if board == Board::Setup {
            self.propagate_straps(state);
        }
    }

    fn notify(&self, state: &mut RigState, board: Board, endpoint: EndpointId, frame: Vec<u8>) {
        if state.connected != Some(board) {
            trace!(?board, %endpoint, "notification without a central, dropped");
            return;
        }
        state
            .subscribers
            .retain(|(subscribed, sender)| *subscribed != endpoint || sender.send(frame.clone()).is_ok());
    }

    fn drop_connection(&self, state: &mut RigState, board: Board) {
        if state.connected != Some(board) {
            return;
        }
        state.connected = None;
        state.subscribers.clear();
        let board_state = state.board(board);
        board_state.firmware.on_disconnect();
        debug!(address = %board_state.address, "simulated peripheral disconnected");
        let _ = self.inner.events.send(ConnectionEvent::Disconnected {
            peripheral_id: board_state.address.clone(),
        });
    }

    fn propagate_straps(&self, state: &mut RigState) {
        let setup = &state.setup.firmware;
        let at_ctrl = setup
            .driven_level(self.inner.setup_at_ctrl_pin)
            .unwrap_or(Level::High);
        let beacon_only = setup
            .driven_level(self.inner.setup_beacon_only_pin)
            .unwrap_or(Level::High);
        state.target.firmware.set_at_ctrl_line(at_ctrl);
        state.target.firmware.set_beacon_only_line(beacon_only);
    }

    fn serial_input(&self, board: Board, bytes: &[u8]) {
        let mut state = self.lock();
        let actions = state.board(board).firmware.handle_serial(bytes);
        self.apply(&mut state, board, actions);
    }

    fn discovery_events(state: &RigState, options: &ScanOptions) -> Vec<DiscoveryEvent> {
        let services = bmdware_service_uuids();
        [&state.target, &state.setup]
            .into_iter()
            .flat_map(|board| {
                board
                    .firmware
                    .advertisements()
                    .into_iter()
                    .map(|packet| match packet {
                        AdvertisingPacket::Beacon {
                            manufacturer_data,
                            rssi,
                        } => DiscoveryEvent::new(
                            board.address.clone(),
                            rssi,
                            Advertisement::builder()
                                .manufacturer_data(manufacturer_data)
                                .build(),
                        ),
                        AdvertisingPacket::Connectable { rssi } => DiscoveryEvent::new(
                            board.address.clone(),
                            rssi,
                            Advertisement::builder()
                                .local_name(board.local_name.clone())
                                .service_uuids(services.clone())
                                .build(),
                        ),
                    })
            })
            .filter(|event| {
                options.services().is_empty()
                    || event
                        .advertisement()
                        .service_uuids()
                        .iter()
                        .any(|uuid| options.services().contains(uuid))
            })
            .collect()
    }
}

#[async_trait]
impl RadioTransport for FakeRig {
    #[instrument(skip(self, options), level = "debug", fields(services = ?options.services()))]
    async fn scan(
        &self,
        options: ScanOptions,
    ) -> Result<EventStream<DiscoveryEvent>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let rig = self.clone();
        let task = tokio::spawn(async move {
            let mut reported = Vec::new();
            loop {
                let events = Self::discovery_events(&rig.lock(), &options);
                for event in events {
                    if !options.allow_duplicates() {
                        let key = (event.peripheral_id().to_string(), event.advertisement().clone());
                        if reported.contains(&key) {
                            continue;
                        }
                        reported.push(key);
                    }
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                tokio::time::sleep(ADVERTISING_PERIOD).await;
            }
        });

        if let Some(previous) = self.lock().scan_task.replace(task) {
            previous.abort();
        }
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        if let Some(task) = self.lock().scan_task.take() {
            task.abort();
        }
        Ok(())
    }

    #[instrument(skip(self), level = "info")]
    async fn connect(&self, peripheral_id: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        let board = state
            .board_by_address(peripheral_id)
            .filter(|board| state.board_ref(*board).firmware.is_connectable())
            .ok_or_else(|| TransportError::UnknownPeripheral {
                id: peripheral_id.to_string(),
            })?;
        if let Some(previous) = state.connected {
            self.drop_connection(&mut state, previous);
        }
        state.connected = Some(board);
        let board_state = state.board(board);
        board_state.firmware.on_connect();
        let _ = self.inner.events.send(ConnectionEvent::Connected {
            peripheral_id: board_state.address.clone(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        if let Some(board) = state.connected {
            self.drop_connection(&mut state, board);
        }
        Ok(())
    }

    async fn read(&self, endpoint: EndpointId) -> Result<Vec<u8>, TransportError> {
        let mut state = self.lock();
        let board = state.connected.ok_or(TransportError::NotConnected)?;
        state
            .board(board)
            .firmware
            .read_attribute(endpoint)
            .ok_or(TransportError::MissingEndpoint { endpoint })
    }

    #[instrument(skip(self, payload), level = "trace", fields(%endpoint, len = payload.len()))]
    async fn write(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        _mode: WriteMode,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        let board = state.connected.ok_or(TransportError::NotConnected)?;
        let firmware = &mut state.board(board).firmware;
        let actions = match endpoint {
            EndpointId::ControlPoint => firmware.handle_control_point(payload),
            EndpointId::UartRx => firmware.handle_uart_rx(payload),
            EndpointId::UartTx | EndpointId::BeaconConfigService | EndpointId::UartService => {
                return Err(TransportError::MissingEndpoint { endpoint });
            }
            _ => firmware.handle_attribute_write(endpoint, payload),
        };
        self.apply(&mut state, board, actions);
        Ok(())
    }

    async fn subscribe_notify(
        &self,
        endpoint: EndpointId,
    ) -> Result<EventStream<Vec<u8>>, TransportError> {
        if !matches!(endpoint, EndpointId::ControlPoint | EndpointId::UartTx) {
            return Err(TransportError::MissingEndpoint { endpoint });
        }
        let mut state = self.lock();
        if state.connected.is_none() {
            return Err(TransportError::NotConnected);
        }
        if state
            .take_fault(|fault| fault == Fault::RefuseSubscription)
            .is_some()
        {
            return Err(TransportError::MissingEndpoint { endpoint });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push((endpoint, tx));
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn connection_events(&self) -> EventStream<ConnectionEvent> {
        Box::pin(BroadcastStream::new(self.inner.events.subscribe()).filter_map(Result::ok))
    }
}

#[async_trait]
impl SerialTransport for FakeRig {
    #[instrument(skip(self, config), level = "debug", fields(path = config.path()))]
    async fn open(&self, config: &SerialConfig) -> Result<SerialPortHandle, TransportError> {
        let board = self.lock().board_by_uart(config.path()).ok_or_else(|| {
            TransportError::UnknownSimulatedPort {
                path: config.path().to_string(),
            }
        })?;

        let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
        let (device_reader, device_writer) = tokio::io::split(device);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.lock().board(board).serial_out = Some(out_tx);

        tokio::spawn(pump_device_output(out_rx, device_writer));
        tokio::spawn(pump_device_input(self.clone(), board, device_reader));

        let (host_reader, host_writer) = tokio::io::split(host);
        Ok(SerialPortHandle::spawn(
            config.path(),
            host_reader,
            host_writer,
            config.framing(),
        ))
    }
}

async fn pump_device_output(
    mut output: mpsc::UnboundedReceiver<Vec<u8>>,
    mut writer: WriteHalf<DuplexStream>,
) {
    while let Some(bytes) = output.recv().await {
        if let Err(error) = writer.write_all(&bytes).await {
            debug!(%error, "simulated UART closed by the host");
            break;
        }
    }
}

async fn pump_device_input(rig: FakeRig, board: Board, mut reader: ReadHalf<DuplexStream>) {
    let mut buffer = [0u8; 256];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => rig.serial_input(board, &buffer[..read]),
            Err(error) => {
                warn!(?board, %error, "simulated UART read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::codec::Framing;

    async fn open(rig: &FakeRig, path: &str) -> (SerialPortHandle, mpsc::UnboundedReceiver<Vec<u8>>) {
        let config = SerialConfig::builder().path(path).framing(Framing::Lines).build();
        let mut port = rig.open(&config).await.expect("simulated port opens");
        let frames = port.take_frames().expect("frames available");
        (port, frames)
    }

    #[tokio::test(start_paused = true)]
    async fn setup_board_answers_at_commands() {
        let rig = FakeRig::new(FakeRigConfig::default());
        let (mut port, mut frames) = open(&rig, SIM_SETUP_UART).await;

        port.write(b"AT\n").await.expect("write");
        assert_eq!(Some(b"OK".to_vec()), frames.recv().await);
        port.write(b"at$hwinfo?\n").await.expect("write");
        assert_eq!(Some(b"BMD-300 NRF52832".to_vec()), frames.recv().await);
    }

    #[tokio::test(start_paused = true)]
    async fn target_samples_setup_straps_at_boot() {
        let rig = FakeRig::new(FakeRigConfig::default());
        let (mut port, mut frames) = open(&rig, SIM_SETUP_UART).await;
        assert_eq!(false, rig.target_in_at_mode());

        port.write(b"at$gcfg 0C 01 00\n").await.expect("write");
        assert_eq!(Some(b"OK".to_vec()), frames.recv().await);
        port.write(b"at$gset 0C 00\n").await.expect("write");
        assert_eq!(Some(b"OK".to_vec()), frames.recv().await);
        assert_eq!(false, rig.target_in_at_mode());

        let target = rig.lock().target.address.clone();
        rig.connect(&target).await.expect("connects");
        rig.write(
            EndpointId::ControlPoint,
            &crate::protocol::SOFT_RESET_TOKEN,
            WriteMode::WithResponse,
        )
        .await
        .expect("write");

        assert_eq!(true, rig.target_in_at_mode());
        let (mut target_port, mut target_frames) = open(&rig, SIM_TARGET_UART).await;
        target_port.write(b"AT\n").await.expect("write");
        assert_eq!(Some(b"OK".to_vec()), target_frames.recv().await);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_write_and_notify() {
        let rig = FakeRig::new(FakeRigConfig::default());
        let target = rig.lock().target.address.clone();
        rig.connect(&target).await.expect("connects");
        let mut notifications = rig
            .subscribe_notify(EndpointId::ControlPoint)
            .await
            .expect("subscribes");

        rig.write(EndpointId::ControlPoint, &[0x41], WriteMode::WithResponse)
            .await
            .expect("write");
        assert_eq!(Some(vec![0x41, 0xfc, 0xc1]), notifications.next().await);
        assert_eq!(
            vec![0x00, 0x00],
            rig.read(EndpointId::BeaconMajor).await.expect("read")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn injected_reply_faults_hit_one_reply_each() {
        let rig = FakeRig::new(FakeRigConfig::default());
        let target = rig.lock().target.address.clone();
        rig.connect(&target).await.expect("connects");
        let mut notifications = rig
            .subscribe_notify(EndpointId::ControlPoint)
            .await
            .expect("subscribes");
        rig.inject(Fault::DropReply);
        rig.inject(Fault::CorruptReply);

        for _ in 0..3 {
            rig.write(EndpointId::ControlPoint, &[0x41], WriteMode::WithResponse)
                .await
                .expect("write");
        }

        assert_eq!(Some(vec![0x14, 0xfc, 0xc1]), notifications.next().await);
        assert_eq!(Some(vec![0x41, 0xfc, 0xc1]), notifications.next().await);
    }

    #[tokio::test(start_paused = true)]
    async fn setup_board_ignores_target_faults() {
        let rig = FakeRig::new(FakeRigConfig::default());
        let (mut port, mut frames) = open(&rig, SIM_SETUP_UART).await;
        rig.inject(Fault::DropReply);

        port.write(b"AT\n").await.expect("write");
        assert_eq!(Some(b"OK".to_vec()), frames.recv().await);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_subscription_fails_once() {
        let rig = FakeRig::new(FakeRigConfig::default());
        let target = rig.lock().target.address.clone();
        rig.inject(Fault::RefuseSubscription);
        rig.connect(&target).await.expect("connects");

        assert_matches!(
            rig.subscribe_notify(EndpointId::UartTx).await.err(),
            Some(TransportError::MissingEndpoint {
                endpoint: EndpointId::UartTx
            })
        );
        assert!(rig.subscribe_notify(EndpointId::UartTx).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn soft_reset_disconnects_the_central() {
        let rig = FakeRig::new(FakeRigConfig::default());
        let target = rig.lock().target.address.clone();
        let mut events = rig.connection_events();
        rig.connect(&target).await.expect("connects");
        assert_matches!(events.next().await, Some(ConnectionEvent::Connected { .. }));

        rig.write(
            EndpointId::ControlPoint,
            &crate::protocol::SOFT_RESET_TOKEN,
            WriteMode::WithResponse,
        )
        .await
        .expect("write");

        assert_matches!(
            events.next().await,
            Some(ConnectionEvent::Disconnected { peripheral_id }) if peripheral_id == target
        );
        assert_eq!(false, rig.target_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn scans_filter_by_service() {
        let rig = FakeRig::new(FakeRigConfig::default());
        let options = ScanOptions::builder()
            .services(bmdware_service_uuids())
            .build();
        let mut events = rig.scan(options).await.expect("scan starts");

        let first = events.next().await.expect("advertisement");
        assert_eq!(Some(SIM_ADV_NAME), first.advertisement().local_name());
        rig.stop_scan().await.expect("scan stops");
    }
}
