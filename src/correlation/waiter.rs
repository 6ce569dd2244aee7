use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, instrument};

use super::expectation::Resolution;
use super::queue::ExpectationHandle;
use crate::hw::ConnectionEvent;

/// Suspends until the expectation behind `handle` resolves.
///
/// The runtime keeps servicing transport readers while this waits. A queue
/// that was cleared before resolving reads as [`Resolution::TimedOut`].
#[instrument(skip(handle), level = "trace", fields(label = handle.label()))]
pub async fn wait_for(handle: ExpectationHandle) -> Resolution {
    handle
        .into_receiver()
        .await
        .unwrap_or(Resolution::TimedOut)
}

/// Runs `on_resolved` exactly once when the expectation resolves.
pub fn wait_for_then<F>(handle: ExpectationHandle, on_resolved: F) -> JoinHandle<()>
where
    F: FnOnce(Resolution) + Send + 'static,
{
    tokio::spawn(async move {
        let resolution = wait_for(handle).await;
        on_resolved(resolution);
    })
}

/// Waits for the radio to report a disconnect, up to `deadline`.
#[instrument(skip(events), level = "debug", fields(deadline_ms = deadline.as_millis()))]
pub async fn wait_for_disconnect<S>(events: &mut S, deadline: Duration) -> bool
where
    S: Stream<Item = ConnectionEvent> + Unpin,
{
    let waited = tokio::time::timeout(deadline, async {
        while let Some(event) = events.next().await {
            match event {
                ConnectionEvent::Disconnected { peripheral_id } => {
                    debug!(%peripheral_id, "peripheral disconnected");
                    return true;
                }
                ConnectionEvent::Connected { .. } => {}
            }
        }
        false
    })
    .await;

    waited.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::correlation::{Expectation, ExpectationQueue, MatchRule, Source, StepLog};

    fn expectation(label: &str) -> Expectation {
        Expectation::builder()
            .label(label)
            .rule(MatchRule::Exact(b"OK".to_vec()))
            .source(Source::Serial)
            .timeout(Duration::from_millis(300))
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn callback_fires_exactly_once() {
        let queue = ExpectationQueue::new("target", StepLog::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = queue.arm(expectation("set baud")).expect("arm succeeds");

        let counter = Arc::clone(&fired);
        let task = wait_for_then(handle, move |resolution| {
            assert_eq!(true, resolution.is_match());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        queue.deliver(Source::Serial, b"OK");
        queue.deliver(Source::Serial, b"OK");
        task.await.expect("callback task joins");

        assert_eq!(1, fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn independent_queues_wait_concurrently() {
        let target = ExpectationQueue::new("target", StepLog::new());
        let setup = ExpectationQueue::new("setup", StepLog::new());
        let target_handle = target.arm(expectation("target check")).expect("arm target");
        let setup_handle = setup.arm(expectation("setup check")).expect("arm setup");

        setup.deliver(Source::Serial, b"OK");
        let (target_resolution, setup_resolution) =
            tokio::join!(wait_for(target_handle), wait_for(setup_handle));

        assert_eq!(Resolution::TimedOut, target_resolution);
        assert_eq!(true, setup_resolution.is_match());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_wait_honours_deadline() {
        let mut silent = tokio_stream::pending::<ConnectionEvent>();
        assert_eq!(
            false,
            wait_for_disconnect(&mut silent, Duration::from_secs(2)).await
        );

        let mut events = tokio_stream::iter(vec![
            ConnectionEvent::Connected {
                peripheral_id: "dut".to_string(),
            },
            ConnectionEvent::Disconnected {
                peripheral_id: "dut".to_string(),
            },
        ]);
        assert_eq!(
            true,
            wait_for_disconnect(&mut events, Duration::from_secs(2)).await
        );
    }
}
