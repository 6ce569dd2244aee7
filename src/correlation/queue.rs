use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::expectation::{Expectation, MatchProgress, Resolution, Source};
use super::step_log::StepLog;
use crate::error::ProtocolViolation;
use crate::utils::format_frame;

/// What happened to a delivered frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Delivery {
    /// The frame resolved the armed expectation.
    Resolved,
    /// The frame was consumed but the expectation needs more data.
    Pending,
    /// Nothing was armed for this source; the frame was dropped.
    Unhandled,
}

/// Receiving side of an armed expectation.
///
/// Consumed by [`wait_for`](super::wait_for), so each expectation is awaited
/// at most once.
#[derive(Debug)]
pub struct ExpectationHandle {
    label: String,
    receiver: oneshot::Receiver<Resolution>,
}

impl ExpectationHandle {
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn into_receiver(self) -> oneshot::Receiver<Resolution> {
        self.receiver
    }
}

#[derive(Debug)]
struct ArmedSlot {
    id: u64,
    expectation: Expectation,
    progress: MatchProgress,
    resolver: oneshot::Sender<Resolution>,
    timer: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    slot: Option<ArmedSlot>,
}

/// Single-slot correlation between one sent command and its reply.
///
/// Clones share the same slot, so transport reader tasks can deliver frames
/// while the scenario awaits the handle.
#[derive(Debug, Clone)]
pub struct ExpectationQueue {
    name: Arc<str>,
    state: Arc<Mutex<QueueState>>,
    steps: StepLog,
}

impl ExpectationQueue {
    /// Creates a queue that records outcomes into `steps`.
    #[must_use]
    pub fn new(name: &str, steps: StepLog) -> Self {
        Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(QueueState::default())),
            steps,
        }
    }

    /// Arms `expectation` and starts its deadline timer.
    ///
    /// Must be called before the command is sent so an immediate reply is not
    /// lost.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation`] if another expectation is unresolved.
    #[instrument(
        skip(self, expectation),
        level = "trace",
        fields(queue = %self.name, label = expectation.label())
    )]
    pub fn arm(&self, expectation: Expectation) -> Result<ExpectationHandle, ProtocolViolation> {
        let mut state = self.lock();
        if let Some(outstanding) = &state.slot {
            return Err(ProtocolViolation {
                outstanding: outstanding.expectation.label().to_string(),
                requested: expectation.label().to_string(),
            });
        }

        state.next_id += 1;
        let id = state.next_id;
        let (resolver, receiver) = oneshot::channel();
        let timeout = expectation.timeout();
        let queue = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            queue.expire(id);
        });

        let label = expectation.label().to_string();
        state.slot = Some(ArmedSlot {
            id,
            expectation,
            progress: MatchProgress::default(),
            resolver,
            timer,
        });

        Ok(ExpectationHandle { label, receiver })
    }

    /// Records a command whose success produces no reply. Call it once the
    /// command has been sent.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation`] if another expectation is unresolved.
    pub fn arm_no_response(
        &self,
        label: &str,
        recorded: bool,
    ) -> Result<ExpectationHandle, ProtocolViolation> {
        if let Some(outstanding) = &self.lock().slot {
            return Err(ProtocolViolation {
                outstanding: outstanding.expectation.label().to_string(),
                requested: label.to_string(),
            });
        }

        let (resolver, receiver) = oneshot::channel();
        let resolution = Resolution::Matched { actual: Vec::new() };
        if recorded {
            self.steps.record(label, true, None);
        }
        let _ = resolver.send(resolution);

        Ok(ExpectationHandle {
            label: label.to_string(),
            receiver,
        })
    }

    /// Offers one incoming frame to the armed expectation.
    pub fn deliver(&self, source: Source, frame: &[u8]) -> Delivery {
        let mut state = self.lock();
        let Some(slot) = state.slot.as_mut() else {
            debug!(queue = %self.name, %source, frame = %format_frame(frame), "unhandled frame");
            return Delivery::Unhandled;
        };
        if slot.expectation.source() != source {
            debug!(
                queue = %self.name,
                %source,
                armed = %slot.expectation.source(),
                frame = %format_frame(frame),
                "frame from a different source than the armed expectation"
            );
            return Delivery::Unhandled;
        }

        let Some(resolution) = slot.progress.apply(slot.expectation.rule(), frame) else {
            return Delivery::Pending;
        };
        let Some(slot) = state.slot.take() else {
            return Delivery::Unhandled;
        };
        drop(state);

        self.finish(slot, resolution);
        Delivery::Resolved
    }

    /// Whether an expectation is currently armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.lock().slot.is_some()
    }

    /// Drops any armed expectation without recording it.
    pub fn clear(&self) {
        if let Some(slot) = self.lock().slot.take() {
            slot.timer.abort();
            debug!(queue = %self.name, label = slot.expectation.label(), "cleared armed expectation");
        }
    }

    fn expire(&self, id: u64) {
        let mut state = self.lock();
        if state.slot.as_ref().is_none_or(|slot| slot.id != id) {
            return;
        }
        let Some(slot) = state.slot.take() else {
            return;
        };
        drop(state);

        self.finish(slot, Resolution::TimedOut);
    }

    fn finish(&self, slot: ArmedSlot, resolution: Resolution) {
        let ArmedSlot {
            expectation,
            resolver,
            timer,
            ..
        } = slot;
        timer.abort();

        let note = match &resolution {
            Resolution::Matched { actual } => {
                info!(
                    queue = %self.name,
                    label = expectation.label(),
                    actual = %format_frame(actual),
                    "expectation matched"
                );
                None
            }
            Resolution::Mismatched { expected, actual } => {
                warn!(
                    queue = %self.name,
                    label = expectation.label(),
                    expected = %format_frame(expected),
                    actual = %format_frame(actual),
                    "expectation mismatched"
                );
                Some(format!(
                    "expected {}, received {}",
                    format_frame(expected),
                    format_frame(actual)
                ))
            }
            Resolution::TimedOut => {
                warn!(
                    queue = %self.name,
                    label = expectation.label(),
                    timeout_ms = expectation.timeout().as_millis(),
                    "expectation timed out"
                );
                Some(format!(
                    "no reply within {} ms",
                    expectation.timeout().as_millis()
                ))
            }
        };

        if expectation.is_recorded() {
            self.steps
                .record(expectation.label(), resolution.is_match(), note);
        }
        let _ = resolver.send(resolution);
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::correlation::{MatchRule, wait_for};

    fn status_expectation(label: &str, timeout_ms: u64) -> Expectation {
        Expectation::builder()
            .label(label)
            .rule(MatchRule::Exact(vec![0x00]))
            .source(Source::ControlPoint)
            .timeout(Duration::from_millis(timeout_ms))
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn second_arm_is_a_protocol_violation() {
        let queue = ExpectationQueue::new("target", StepLog::new());
        let _first = queue
            .arm(status_expectation("set gpio", 1_000))
            .expect("first arm succeeds");

        let error = queue
            .arm(status_expectation("get gpio", 1_000))
            .expect_err("second arm must be rejected");
        assert_eq!("set gpio", error.outstanding);
        assert_eq!("get gpio", error.requested);
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_resolves_once_and_records_once() {
        let steps = StepLog::new();
        let queue = ExpectationQueue::new("target", steps.clone());
        let handle = queue
            .arm(status_expectation("unlock", 1_000))
            .expect("arm succeeds");

        assert_eq!(Delivery::Resolved, queue.deliver(Source::ControlPoint, &[0x00]));
        assert_eq!(Delivery::Unhandled, queue.deliver(Source::ControlPoint, &[0x00]));

        assert_eq!(true, wait_for(handle).await.is_match());
        assert_eq!(1, steps.len());
        assert_eq!(false, queue.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_source_is_dropped_without_resolving() {
        let queue = ExpectationQueue::new("target", StepLog::new());
        let _handle = queue
            .arm(status_expectation("unlock", 1_000))
            .expect("arm succeeds");

        assert_eq!(Delivery::Unhandled, queue.deliver(Source::UartTx, &[0x00]));
        assert_eq!(true, queue.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn unarmed_delivery_is_not_an_error() {
        let steps = StepLog::new();
        let queue = ExpectationQueue::new("target", steps.clone());

        assert_eq!(Delivery::Unhandled, queue.deliver(Source::ControlPoint, &[0x01]));
        assert_eq!(true, steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn length_mismatch_records_a_failed_step() {
        let steps = StepLog::new();
        let queue = ExpectationQueue::new("target", steps.clone());
        let handle = queue
            .arm(status_expectation("set password", 1_000))
            .expect("arm succeeds");

        queue.deliver(Source::ControlPoint, &[0x00, 0x00]);

        assert_matches!(wait_for(handle).await, Resolution::Mismatched { .. });
        let failure = steps.first_failure().expect("mismatch is recorded");
        assert_eq!("set password", failure.label());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_resolves_timed_out_at_the_deadline() {
        let steps = StepLog::new();
        let queue = ExpectationQueue::new("target", steps.clone());
        let started = tokio::time::Instant::now();
        let handle = queue
            .arm(status_expectation("read gpio", 500))
            .expect("arm succeeds");

        let resolution = wait_for(handle).await;

        assert_eq!(Resolution::TimedOut, resolution);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "resolved early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(510), "resolved late: {elapsed:?}");
        assert_eq!(false, steps.records()[0].passed());
    }

    #[tokio::test(start_paused = true)]
    async fn late_delivery_after_timeout_is_unhandled() {
        let queue = ExpectationQueue::new("target", StepLog::new());
        let handle = queue
            .arm(status_expectation("read gpio", 100))
            .expect("arm succeeds");
        assert_eq!(Resolution::TimedOut, wait_for(handle).await);

        assert_eq!(Delivery::Unhandled, queue.deliver(Source::ControlPoint, &[0x00]));
    }

    #[tokio::test(start_paused = true)]
    async fn no_response_resolves_immediately() {
        let steps = StepLog::new();
        let queue = ExpectationQueue::new("target", steps.clone());

        let handle = queue
            .arm_no_response("soft reset", true)
            .expect("nothing else is armed");

        assert_eq!(true, wait_for(handle).await.is_match());
        assert_eq!(1, steps.len());
        assert_eq!(false, queue.is_armed());
    }
}
