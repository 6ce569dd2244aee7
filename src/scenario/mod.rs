//! End-to-end scenarios and the runner that drives them.

mod beacon;
mod catalog;
mod context;
mod gpio;
mod hotswap;
mod info;
mod lock;
mod runner;
mod suite;
mod uart;

pub use self::catalog::ScenarioId;
pub use self::context::{Predicate, Role, ScenarioContext, StepFuture, TestStep};
pub use self::runner::{
    RunnerState, Scenario, ScenarioResult, ScenarioRunner, Verdict, fold_verdict, run_scenario,
};
pub use self::suite::{SuiteResult, run_suite};
