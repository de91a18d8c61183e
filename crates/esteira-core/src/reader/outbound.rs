use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};

use crate::api::{DeleteEntry, SqsApi, SqsApiError, VisibilityEntry};
use crate::config::ReaderConfig;
use crate::handle::MessageHandle;
use crate::shutdown::Signaller;

/// Outbound RPC surface shared by the ack loop, the fetch loop's drain step,
/// and ackers that resolve directly during shutdown. Every call races the
/// hard-stop token, so an escalated shutdown cuts off in-flight requests.
pub(crate) struct Outbound {
    pub api: Arc<dyn SqsApi>,
    pub conf: Arc<ReaderConfig>,
    pub shutdown: Signaller,
}

impl Outbound {
    /// Delete acked messages, up to 10 per RPC. Per-entry failures are
    /// logged and never retried. No-op when `delete_message` is off.
    pub async fn delete(&self, handles: &[Arc<MessageHandle>]) -> Result<(), SqsApiError> {
        if !self.conf.delete_message {
            return Ok(());
        }

        let mut rest = handles;
        while !rest.is_empty() {
            let take = rest.len().min(ReaderConfig::MAX_BATCH_SIZE);
            let (chunk, tail) = rest.split_at(take);
            rest = tail;

            let entries = chunk
                .iter()
                .map(|handle| DeleteEntry {
                    id: handle.id.clone(),
                    receipt_handle: handle.receipt_handle.clone(),
                })
                .collect();

            let failed = tokio::select! {
                res = self.api.delete_batch(&self.conf.url, entries) => res?,
                _ = self.shutdown.hard().cancelled() => return Err(SqsApiError::Cancelled),
            };
            for fail in failed {
                error!(
                    id = %fail.id,
                    code = %fail.code,
                    message = fail.message.as_deref().unwrap_or("(no message)"),
                    sender_fault = fail.sender_fault,
                    "failed to delete consumed message"
                );
            }
        }
        Ok(())
    }

    /// Make nacked messages immediately redeliverable by resetting their
    /// visibility to zero. No-op when `reset_visibility` is off; the message
    /// then redelivers after its original timeout.
    pub async fn reset(&self, handles: &[Arc<MessageHandle>]) -> Result<(), SqsApiError> {
        if !self.conf.reset_visibility {
            return Ok(());
        }
        self.change_visibility(0, handles, false).await
    }

    /// Extend the visibility lease of in-flight messages by the configured
    /// message timeout. Handles resolved since they were captured are
    /// skipped.
    pub async fn extend(&self, handles: &[Arc<MessageHandle>]) -> Result<(), SqsApiError> {
        let timeout_secs = self.conf.message_timeout().as_secs() as i32;
        self.change_visibility(timeout_secs, handles, true).await
    }

    /// Change visibility, up to 10 entries per RPC. With `skip_resolved` the
    /// deleted sentinel is re-checked right before each handle is enqueued:
    /// an extension must never touch a message that was acked after the
    /// refresh pass captured it. Resets pass `false` because the nack path
    /// marks handles resolved before flushing them.
    async fn change_visibility(
        &self,
        timeout_secs: i32,
        handles: &[Arc<MessageHandle>],
        skip_resolved: bool,
    ) -> Result<(), SqsApiError> {
        let mut rest = handles;
        while !rest.is_empty() {
            let mut entries = Vec::new();
            let mut sent: HashMap<&str, &Arc<MessageHandle>> = HashMap::new();
            let mut consumed = 0;
            for handle in rest {
                consumed += 1;
                if skip_resolved && handle.deadline.is_deleted() {
                    continue;
                }
                entries.push(VisibilityEntry {
                    id: handle.id.clone(),
                    receipt_handle: handle.receipt_handle.clone(),
                    visibility_timeout: timeout_secs,
                });
                sent.insert(handle.id.as_str(), handle);
                if entries.len() == ReaderConfig::MAX_BATCH_SIZE {
                    break;
                }
            }
            rest = &rest[consumed..];
            if entries.is_empty() {
                continue;
            }

            let failed = tokio::select! {
                res = self.api.change_visibility_batch(&self.conf.url, entries) => res?,
                _ = self.shutdown.hard().cancelled() => return Err(SqsApiError::Cancelled),
            };
            for fail in failed {
                if skip_resolved
                    && sent
                        .get(fail.id.as_str())
                        .is_some_and(|handle| handle.deadline.is_deleted())
                {
                    continue;
                }
                debug!(
                    id = %fail.id,
                    code = %fail.code,
                    message = fail.message.as_deref().unwrap_or("(no message)"),
                    sender_fault = fail.sender_fault,
                    "failed to update consumed message visibility"
                );
            }
        }
        Ok(())
    }
}
