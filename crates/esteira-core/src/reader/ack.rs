use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, error};

use crate::config::ReaderConfig;
use crate::handle::MessageHandle;
use crate::metrics::Metrics;
use crate::reader::Outbound;
use crate::shutdown::Signaller;
use crate::tracker::InFlightTracker;

const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Consume ack and nack notifications, batch the outbound traffic, and keep
/// long-running leases alive. A handle leaves the tracker the moment its
/// notification is handled; the wire call happens on the next flush.
pub(crate) async fn ack_loop(
    conf: Arc<ReaderConfig>,
    tracker: Arc<InFlightTracker>,
    outbound: Arc<Outbound>,
    mut ack_rx: mpsc::Receiver<Arc<MessageHandle>>,
    mut nack_rx: mpsc::Receiver<Arc<MessageHandle>>,
    shutdown: Signaller,
    metrics: Arc<Metrics>,
) {
    // Serializes refresh passes without blocking the loop: a tick that finds
    // the previous pass still running skips refreshing.
    let refresh_gate = Arc::new(Mutex::new(()));
    let mut flush_tick = tokio::time::interval(FLUSH_INTERVAL);

    let mut pending_acks: Vec<Arc<MessageHandle>> = Vec::new();
    let mut pending_nacks: Vec<Arc<MessageHandle>> = Vec::new();

    loop {
        tokio::select! {
            Some(handle) = ack_rx.recv() => {
                debug!(id = %handle.id, pending = pending_acks.len(), in_flight = tracker.size(), "acking message");
                tracker.remove(&handle.id);
                handle.deadline.set_deleted();
                pending_acks.push(handle);
                metrics.messages_acked.add(1, &[]);
                if pending_acks.len() >= conf.max_number_of_messages {
                    flush_finished(&outbound, &mut pending_acks, true).await;
                }
            }
            Some(handle) = nack_rx.recv() => {
                debug!(id = %handle.id, pending = pending_nacks.len(), in_flight = tracker.size(), "nacking message");
                tracker.remove(&handle.id);
                handle.deadline.set_deleted();
                pending_nacks.push(handle);
                metrics.messages_nacked.add(1, &[]);
                if pending_nacks.len() >= conf.max_number_of_messages {
                    flush_finished(&outbound, &mut pending_nacks, false).await;
                }
            }
            _ = flush_tick.tick() => {
                flush_finished(&outbound, &mut pending_acks, true).await;
                flush_finished(&outbound, &mut pending_nacks, false).await;
                metrics.in_flight.record(tracker.size() as u64, &[]);
                spawn_refresh(&refresh_gate, &tracker, &outbound, &metrics);
            }
            _ = shutdown.soft().cancelled() => break,
        }
    }

    // Refuse new notifications, then drain any that won the race into the
    // channel buffers after the loop stopped selecting. A send that arrives
    // after the close fails and the acker resolves the message directly.
    ack_rx.close();
    nack_rx.close();
    while let Some(handle) = ack_rx.recv().await {
        tracker.remove(&handle.id);
        handle.deadline.set_deleted();
        pending_acks.push(handle);
        metrics.messages_acked.add(1, &[]);
    }
    while let Some(handle) = nack_rx.recv().await {
        tracker.remove(&handle.id);
        handle.deadline.set_deleted();
        pending_nacks.push(handle);
        metrics.messages_nacked.add(1, &[]);
    }

    // Wait out any refresh pass still in flight so no RPC can land after the
    // reader reports stopped, then flush one last time.
    let _refresh_guard = refresh_gate.lock().await;
    flush_finished(&outbound, &mut pending_acks, true).await;
    flush_finished(&outbound, &mut pending_nacks, false).await;
    tracker.clear();
}

/// Flush a pending batch: deletes for acks, visibility resets for nacks.
/// Flush errors are logged only; the affected messages redeliver once their
/// visibility expires.
async fn flush_finished(outbound: &Outbound, handles: &mut Vec<Arc<MessageHandle>>, erase: bool) {
    if handles.is_empty() {
        return;
    }
    let batch = std::mem::take(handles);
    if erase {
        if let Err(err) = outbound.delete(&batch).await {
            error!(error = %err, "failed to delete messages");
        }
    } else if let Err(err) = outbound.reset(&batch).await {
        error!(error = %err, "failed to reset the visibility timeout of messages");
    }
}

/// Kick off an asynchronous refresh pass for handles near lease expiry,
/// unless the previous pass is still in flight.
fn spawn_refresh(
    gate: &Arc<Mutex<()>>,
    tracker: &Arc<InFlightTracker>,
    outbound: &Arc<Outbound>,
    metrics: &Arc<Metrics>,
) {
    let Ok(guard) = Arc::clone(gate).try_lock_owned() else {
        return;
    };
    let tracker = Arc::clone(tracker);
    let outbound = Arc::clone(outbound);
    let metrics = Arc::clone(metrics);
    tokio::spawn(async move {
        let _guard = guard;
        let due = tracker.pull_to_refresh();
        if due.is_empty() {
            return;
        }
        let started = Instant::now();
        if let Err(err) = outbound.extend(&due).await {
            debug!(error = %err, "failed to update messages visibility timeout");
        }
        metrics.visibility_refreshed.add(due.len() as u64, &[]);
        debug!(count = due.len(), elapsed = ?started.elapsed(), "refreshed message leases");
    });
}
