use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{error, trace};

use crate::api::SqsApi;
use crate::config::ReaderConfig;
use crate::metrics::Metrics;
use crate::reader::{Outbound, PendingMessage};
use crate::shutdown::Signaller;
use crate::tracker::InFlightTracker;

/// Exponential backoff for empty or failed receive calls. No elapsed-time
/// ceiling: the loop keeps retrying until shutdown.
struct Backoff {
    next: Duration,
}

impl Backoff {
    const INITIAL: Duration = Duration::from_millis(10);
    const MAX: Duration = Duration::from_secs(60);

    fn new() -> Self {
        Self {
            next: Self::INITIAL,
        }
    }

    fn reset(&mut self) {
        self.next = Self::INITIAL;
    }

    fn advance(&mut self) -> Duration {
        let current = self.next;
        self.next = (current * 2).min(Self::MAX);
        current
    }
}

/// Long-poll the queue and keep the hand-off channel supplied, one message
/// at a time. Admission into the in-flight tracker happens before dispatch,
/// so a full tracker stalls this loop rather than the consumer.
pub(crate) async fn fetch_loop(
    conf: Arc<ReaderConfig>,
    api: Arc<dyn SqsApi>,
    tracker: Arc<InFlightTracker>,
    outbound: Arc<Outbound>,
    messages_tx: mpsc::Sender<PendingMessage>,
    messages_rx: Arc<Mutex<mpsc::Receiver<PendingMessage>>>,
    shutdown: Signaller,
    metrics: Arc<Metrics>,
) {
    let mut pending: VecDeque<PendingMessage> = VecDeque::new();
    let mut backoff = Backoff::new();

    loop {
        if pending.is_empty() {
            let received = tokio::select! {
                res = api.receive(
                    &conf.url,
                    conf.max_number_of_messages as i32,
                    conf.wait_time_seconds,
                ) => res,
                _ = shutdown.soft().cancelled() => break,
            };

            match received {
                Ok(batch) => {
                    let got_any = !batch.is_empty();
                    if got_any {
                        trace!(
                            count = batch.len(),
                            in_flight = tracker.size(),
                            "admitting received messages"
                        );
                        metrics.messages_received.add(batch.len() as u64, &[]);
                        let deadline = Instant::now() + conf.message_timeout();
                        let batch: Vec<PendingMessage> = batch
                            .into_iter()
                            .map(|message| PendingMessage::new(message, deadline))
                            .collect();
                        let handles = batch
                            .iter()
                            .filter_map(|msg| msg.handle.clone())
                            .collect::<Vec<_>>();
                        tracker.add_new(shutdown.soft(), handles).await;
                        pending.extend(batch);
                    }
                    if got_any || conf.wait_time_seconds > 0 {
                        // A long-poll round trip counts as a success even when
                        // empty; without long polling every empty response
                        // backs off.
                        backoff.reset();
                    }
                }
                Err(err) if err.is_timeout() => {}
                Err(err) => error!(error = %err, "failed to pull new messages"),
            }

            if pending.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(backoff.advance()) => {}
                    _ = shutdown.soft().cancelled() => break,
                }
                continue;
            }
        }

        tokio::select! {
            permit = messages_tx.reserve() => {
                let Ok(permit) = permit else { break };
                if let Some(msg) = pending.pop_front() {
                    metrics.messages_delivered.add(1, &[]);
                    permit.send(msg);
                }
            }
            _ = shutdown.soft().cancelled() => break,
        }
    }

    // Drain. The hand-off channel can hold one message that no consumer
    // ever took; close it and pull that message back so the reset covers
    // exactly what was received but never delivered.
    let mut undispatched = Vec::new();
    {
        let mut rx = messages_rx.lock().await;
        rx.close();
        while let Ok(msg) = rx.try_recv() {
            undispatched.extend(msg.handle);
        }
    }
    undispatched.extend(pending.iter().filter_map(|msg| msg.handle.clone()));
    if !undispatched.is_empty() {
        if let Err(err) = outbound.reset(&undispatched).await {
            error!(error = %err, "failed to reset visibility timeout for pending messages");
        }
    }
}
