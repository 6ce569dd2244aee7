mod expectation;
mod queue;
mod step_log;
mod waiter;

pub use self::expectation::{Expectation, MatchRule, Resolution, Source};
pub use self::queue::{Delivery, ExpectationHandle, ExpectationQueue};
pub use self::step_log::{StepLog, StepRecord};
pub use self::waiter::{wait_for, wait_for_disconnect, wait_for_then};
