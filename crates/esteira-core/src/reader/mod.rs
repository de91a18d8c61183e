mod ack;
mod fetch;
mod outbound;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::api::{QueueMessage, SqsApi, SqsApiError};
use crate::config::ReaderConfig;
use crate::error::{AckError, CloseError, ConfigError, ReadError};
use crate::handle::MessageHandle;
use crate::metrics::Metrics;
use crate::shutdown::Signaller;
use crate::tracker::InFlightTracker;

pub(crate) use outbound::Outbound;

/// A received message paired with its in-flight handle while it waits on the
/// hand-off channel. The handle is absent for malformed messages (missing id
/// or receipt token); those are still delivered, but cannot be resolved on
/// the wire.
pub(crate) struct PendingMessage {
    pub message: QueueMessage,
    pub handle: Option<Arc<MessageHandle>>,
}

impl PendingMessage {
    fn new(message: QueueMessage, deadline: Instant) -> Self {
        let handle = match (&message.message_id, &message.receipt_handle) {
            (Some(id), Some(receipt)) => Some(Arc::new(MessageHandle::new(
                id.clone(),
                receipt.clone(),
                deadline,
            ))),
            _ => None,
        };
        Self { message, handle }
    }
}

/// A message ready for the consumer, decorated with queue metadata:
/// `sqs_message_id`, `sqs_receipt_handle`, `sqs_approximate_receive_count`
/// (when the server reports it), and every string-valued message attribute
/// under its own name.
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub body: String,
    pub metadata: HashMap<String, String>,
}

fn decorate(message: &QueueMessage) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    if let Some(id) = &message.message_id {
        metadata.insert("sqs_message_id".to_string(), id.clone());
    }
    if let Some(receipt) = &message.receipt_handle {
        metadata.insert("sqs_receipt_handle".to_string(), receipt.clone());
    }
    if let Some(count) = message.attributes.get("ApproximateReceiveCount") {
        metadata.insert("sqs_approximate_receive_count".to_string(), count.clone());
    }
    for (name, value) in &message.message_attributes {
        metadata.insert(name.clone(), value.clone());
    }
    metadata
}

/// Channel ends handed to the loops exactly once, at connect time.
struct LoopInputs {
    messages_tx: mpsc::Sender<PendingMessage>,
    ack_rx: mpsc::Receiver<Arc<MessageHandle>>,
    nack_rx: mpsc::Receiver<Arc<MessageHandle>>,
}

/// Streaming SQS consumer.
///
/// `connect` spawns two background tasks: a fetch loop that long-polls the
/// queue and a loop that batches acks, nacks, and visibility refreshes.
/// `read` hands out one message at a time together with its [`Acker`];
/// `close` runs the two-phase shutdown.
///
/// The hand-off and notification channels hold a single message each, so a
/// stalled consumer stops the fetch loop almost immediately; occupancy
/// control beyond that lives in the in-flight tracker.
pub struct SqsReader {
    conf: Arc<ReaderConfig>,
    api: OnceLock<Arc<dyn SqsApi>>,
    outbound: OnceLock<Arc<Outbound>>,
    /// Shared with the fetch loop, whose drain step closes the channel and
    /// reclaims a buffered message no consumer ever took.
    messages_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PendingMessage>>>,
    loop_inputs: std::sync::Mutex<Option<LoopInputs>>,
    ack_tx: mpsc::Sender<Arc<MessageHandle>>,
    nack_tx: mpsc::Sender<Arc<MessageHandle>>,
    shutdown: Signaller,
    metrics: Arc<Metrics>,
}

impl SqsReader {
    /// Create a reader from a validated configuration. The AWS client is
    /// built lazily by [`connect`](Self::connect).
    pub fn new(conf: ReaderConfig) -> Result<Self, ConfigError> {
        conf.validate()?;
        let (messages_tx, messages_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::channel(1);
        let (nack_tx, nack_rx) = mpsc::channel(1);
        Ok(Self {
            conf: Arc::new(conf),
            api: OnceLock::new(),
            outbound: OnceLock::new(),
            messages_rx: Arc::new(tokio::sync::Mutex::new(messages_rx)),
            loop_inputs: std::sync::Mutex::new(Some(LoopInputs {
                messages_tx,
                ack_rx,
                nack_rx,
            })),
            ack_tx,
            nack_tx,
            shutdown: Signaller::new(),
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Create a reader over a specific queue API implementation instead of
    /// the AWS client. This is the seam test doubles plug into.
    pub fn with_api(conf: ReaderConfig, api: Arc<dyn SqsApi>) -> Result<Self, ConfigError> {
        let reader = Self::new(conf)?;
        let _ = reader.api.set(api);
        Ok(reader)
    }

    /// Connect to the queue and spawn the fetch and ack loops. Idempotent:
    /// repeated calls reuse the existing client and running loops.
    pub async fn connect(&self) {
        let api = match self.api.get() {
            Some(api) => Arc::clone(api),
            None => {
                let aws_conf =
                    aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
                let client: Arc<dyn SqsApi> = Arc::new(aws_sdk_sqs::Client::new(&aws_conf));
                Arc::clone(self.api.get_or_init(|| client))
            }
        };

        let inputs = self
            .loop_inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(inputs) = inputs else {
            return;
        };

        let outbound = Arc::new(Outbound {
            api: Arc::clone(&api),
            conf: Arc::clone(&self.conf),
            shutdown: self.shutdown.clone(),
        });
        let _ = self.outbound.set(Arc::clone(&outbound));

        let tracker = Arc::new(InFlightTracker::new(
            self.conf.max_outstanding_messages,
            self.conf.message_timeout(),
        ));

        let fetch = tokio::spawn(fetch::fetch_loop(
            Arc::clone(&self.conf),
            api,
            Arc::clone(&tracker),
            Arc::clone(&outbound),
            inputs.messages_tx,
            Arc::clone(&self.messages_rx),
            self.shutdown.clone(),
            Arc::clone(&self.metrics),
        ));
        let ack = tokio::spawn(ack::ack_loop(
            Arc::clone(&self.conf),
            tracker,
            outbound,
            inputs.ack_rx,
            inputs.nack_rx,
            self.shutdown.clone(),
            Arc::clone(&self.metrics),
        ));

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let _ = fetch.await;
            let _ = ack.await;
            shutdown.mark_stopped();
        });
    }

    /// Block until the next message is available and return it with its
    /// [`Acker`].
    ///
    /// Returns [`ReadError::EndOfInput`] once the soft stop has fired or the
    /// hand-off channel is closed, and [`ReadError::Cancelled`] for a
    /// message with no body (read again to re-drive). Dropping the returned
    /// future abandons only this call; the background loops are unaffected.
    pub async fn read(&self) -> Result<(ConsumedMessage, Acker), ReadError> {
        if self.api.get().is_none() {
            return Err(ReadError::NotConnected);
        }

        let next = {
            let mut rx = self.messages_rx.lock().await;
            tokio::select! {
                next = rx.recv() => next.ok_or(ReadError::EndOfInput)?,
                _ = self.shutdown.soft().cancelled() => return Err(ReadError::EndOfInput),
            }
        };

        let PendingMessage { message, handle } = next;
        let metadata = decorate(&message);
        let Some(body) = message.body else {
            return Err(ReadError::Cancelled);
        };

        let acker = Acker {
            handle,
            ack_tx: self.ack_tx.clone(),
            nack_tx: self.nack_tx.clone(),
            outbound: self.outbound.get().map(Arc::clone),
            shutdown: self.shutdown.clone(),
        };
        Ok((ConsumedMessage { body, metadata }, acker))
    }

    /// Two-phase shutdown: trigger the soft stop immediately, escalate to a
    /// hard stop one second before `timeout` elapses, and wait for both
    /// loops to exit. Idempotent; repeated calls return as soon as the loops
    /// have stopped.
    pub async fn close(&self, timeout: Duration) -> Result<(), CloseError> {
        self.shutdown.soft_stop();

        let deadline = Instant::now() + timeout;
        let escalate_at = deadline - Duration::from_secs(1).min(timeout);

        tokio::select! {
            _ = self.shutdown.stopped().cancelled() => return Ok(()),
            _ = tokio::time::sleep_until(escalate_at) => self.shutdown.hard_stop(),
        }
        tokio::select! {
            _ = self.shutdown.stopped().cancelled() => Ok(()),
            _ = tokio::time::sleep_until(deadline) => Err(CloseError::DeadlineExceeded),
        }
    }
}

/// Resolution handle for one delivered message. Consuming: a message is
/// acked or nacked at most once. Both operations are no-ops for a message
/// that carried no receipt token.
pub struct Acker {
    handle: Option<Arc<MessageHandle>>,
    ack_tx: mpsc::Sender<Arc<MessageHandle>>,
    nack_tx: mpsc::Sender<Arc<MessageHandle>>,
    outbound: Option<Arc<Outbound>>,
    shutdown: Signaller,
}

impl Acker {
    /// Signal successful processing. The handle is routed to the ack loop
    /// for a batched delete; if the reader is already draining, the delete
    /// is issued directly under the hard-stop token.
    pub async fn ack(self) -> Result<(), AckError> {
        let Self {
            handle,
            ack_tx,
            outbound,
            shutdown,
            ..
        } = self;
        let Some(handle) = handle else {
            return Ok(());
        };

        tokio::select! {
            res = ack_tx.send(Arc::clone(&handle)) => {
                if res.is_err() {
                    direct_flush(&outbound, handle, true).await?;
                }
            }
            _ = shutdown.soft().cancelled() => {
                direct_flush(&outbound, handle, true).await?;
            }
        }
        Ok(())
    }

    /// Signal failed processing. The handle is routed to the nack loop for a
    /// batched visibility reset; if the reader is already draining, the
    /// reset is issued directly under the hard-stop token.
    pub async fn nack(self) -> Result<(), AckError> {
        let Self {
            handle,
            nack_tx,
            outbound,
            shutdown,
            ..
        } = self;
        let Some(handle) = handle else {
            return Ok(());
        };

        tokio::select! {
            res = nack_tx.send(Arc::clone(&handle)) => {
                if res.is_err() {
                    direct_flush(&outbound, handle, false).await?;
                }
            }
            _ = shutdown.soft().cancelled() => {
                direct_flush(&outbound, handle, false).await?;
            }
        }
        Ok(())
    }
}

async fn direct_flush(
    outbound: &Option<Arc<Outbound>>,
    handle: Arc<MessageHandle>,
    erase: bool,
) -> Result<(), SqsApiError> {
    let Some(outbound) = outbound else {
        return Ok(());
    };
    if erase {
        outbound.delete(&[handle]).await
    } else {
        outbound.reset(&[handle]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decorate_collects_queue_metadata() {
        let message = QueueMessage {
            message_id: Some("m1".to_string()),
            receipt_handle: Some("r1".to_string()),
            body: Some("{}".to_string()),
            attributes: HashMap::from([(
                "ApproximateReceiveCount".to_string(),
                "3".to_string(),
            )]),
            message_attributes: HashMap::from([("tenant".to_string(), "acme".to_string())]),
        };

        let metadata = decorate(&message);
        assert_eq!(metadata.get("sqs_message_id").map(String::as_str), Some("m1"));
        assert_eq!(
            metadata.get("sqs_receipt_handle").map(String::as_str),
            Some("r1")
        );
        assert_eq!(
            metadata
                .get("sqs_approximate_receive_count")
                .map(String::as_str),
            Some("3")
        );
        assert_eq!(metadata.get("tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn decorate_skips_absent_fields() {
        let metadata = decorate(&QueueMessage::default());
        assert!(metadata.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_message_without_receipt_has_no_handle() {
        let message = QueueMessage {
            message_id: Some("m1".to_string()),
            body: Some("data".to_string()),
            ..QueueMessage::default()
        };
        let pending = PendingMessage::new(message, Instant::now() + Duration::from_secs(30));
        assert!(pending.handle.is_none());
    }
}
