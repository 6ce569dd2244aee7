mod btleplug_backend;
mod fake_backend;
mod fake_firmware;
mod hardware;
mod radio;
mod serial;
mod serial_backend;

pub use self::fake_backend::{
    Fault, FakeRig, FakeRigConfig, SIM_ADV_NAME, SIM_SETUP_UART, SIM_TARGET_UART,
};
pub use self::hardware::{Hardware, HardwareBackend, hardware_from_backend};
pub use self::radio::{
    Advertisement, ConnectionEvent, DiscoveryEvent, EventStream, RadioTransport, ScanOptions,
    WriteMode,
};
pub use self::serial::{DEFAULT_BAUD_RATE, SerialConfig, SerialPortHandle, SerialTransport};
