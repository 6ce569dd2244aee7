//! Per-DUT command sessions over BLE and the AT serial interface.

mod command;
mod device;

pub use self::command::{Channel, Command, CustomDataPart, Operation, Reply};
pub use self::device::{
    AT_ATTENTION_TIMEOUT, AtMode, ConnectionState, DEFAULT_AT_COMMAND_GAP, DEFAULT_REPLY_TIMEOUT,
    DEFAULT_RESET_SETTLE, DeviceSession, HARDWARE_INFO_TIMEOUT, LockState, SessionConfig,
};
