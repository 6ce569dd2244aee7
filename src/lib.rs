mod app;
mod cli;
pub mod codec;
pub mod config;
pub mod correlation;
mod error;
pub mod hw;
pub mod protocol;
pub mod report;
pub mod scan;
pub mod scenario;
pub mod session;
mod telemetry;
mod terminal;
mod utils;

pub use app::{run, run_with_clients};
pub use cli::{Args, Command, RunArgs, SuiteArgs};
pub use error::{
    ConfigError, DecodingError, EncodingError, HarnessError, ProtocolViolation, ReportError,
    TransportError,
};
pub use scenario::{ScenarioId, ScenarioResult, SuiteResult, Verdict};
pub use terminal::{SystemTerminalClient, TerminalClient};
