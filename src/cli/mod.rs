pub(crate) mod command;
pub(crate) mod list;
pub(crate) mod run;
pub(crate) mod ui;

pub use self::command::{Args, Command, RunArgs, SuiteArgs};
