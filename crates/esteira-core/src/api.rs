use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_sqs::error::{DisplayErrorContext, SdkError};
use aws_sdk_sqs::types::{
    ChangeMessageVisibilityBatchRequestEntry, DeleteMessageBatchRequestEntry, QueueAttributeName,
    SendMessageBatchRequestEntry,
};

/// A message as received from the queue service, decoupled from the SDK
/// types. This is the wire-level representation; the consumer-facing type
/// with decorated metadata is built by the reader.
#[derive(Debug, Clone, Default)]
pub struct QueueMessage {
    pub message_id: Option<String>,
    pub receipt_handle: Option<String>,
    pub body: Option<String>,
    /// Server attributes (e.g. "ApproximateReceiveCount").
    pub attributes: HashMap<String, String>,
    /// Caller-set message attributes, string values only.
    pub message_attributes: HashMap<String, String>,
}

/// One entry of a `delete_batch` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEntry {
    pub id: String,
    pub receipt_handle: String,
}

/// One entry of a `change_visibility_batch` request. A timeout of zero makes
/// the message immediately redeliverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityEntry {
    pub id: String,
    pub receipt_handle: String,
    pub visibility_timeout: i32,
}

/// One entry of a `send_batch` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEntry {
    pub id: String,
    pub body: String,
}

/// A per-entry failure from one of the batch operations. Batch RPCs succeed
/// as a whole while reporting individual entries that were rejected.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub id: String,
    pub code: String,
    pub message: Option<String>,
    pub sender_fault: bool,
}

/// Errors from the queue service API.
///
/// `Timeout` covers both long-poll expiry and client-side dispatch timeouts;
/// callers suppress it on the receive path. `Cancelled` marks an RPC cut off
/// by the hard-stop token during shutdown.
#[derive(Debug, thiserror::Error)]
pub enum SqsApiError {
    #[error("request timed out")]
    Timeout,

    #[error("request cancelled by shutdown")]
    Cancelled,

    #[error("malformed batch entry: {0}")]
    InvalidEntry(String),

    #[error("sqs request failed: {0}")]
    Request(String),
}

impl SqsApiError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// The four queue service operations the reader depends on, modelled on AWS
/// SQS semantics. Implemented by `aws_sdk_sqs::Client` for production and by
/// scripted fakes in tests.
///
/// `send_batch` is unused by the reader and present for symmetry with the
/// service API.
#[async_trait]
pub trait SqsApi: Send + Sync {
    /// Long-poll the queue for up to `max_messages` messages, requesting all
    /// server attributes and all message attributes.
    async fn receive(
        &self,
        url: &str,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<QueueMessage>, SqsApiError>;

    /// Delete up to 10 messages. Returns the entries that failed.
    async fn delete_batch(
        &self,
        url: &str,
        entries: Vec<DeleteEntry>,
    ) -> Result<Vec<BatchFailure>, SqsApiError>;

    /// Change the visibility timeout of up to 10 messages. Returns the
    /// entries that failed.
    async fn change_visibility_batch(
        &self,
        url: &str,
        entries: Vec<VisibilityEntry>,
    ) -> Result<Vec<BatchFailure>, SqsApiError>;

    /// Send up to 10 messages. Returns the entries that failed.
    async fn send_batch(
        &self,
        url: &str,
        entries: Vec<SendEntry>,
    ) -> Result<Vec<BatchFailure>, SqsApiError>;
}

#[async_trait]
impl SqsApi for aws_sdk_sqs::Client {
    async fn receive(
        &self,
        url: &str,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<QueueMessage>, SqsApiError> {
        #[allow(deprecated)]
        let out = self
            .receive_message()
            .queue_url(url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_time_seconds)
            .attribute_names(QueueAttributeName::All)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(classify)?;

        Ok(out
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|msg| QueueMessage {
                message_id: msg.message_id,
                receipt_handle: msg.receipt_handle,
                body: msg.body,
                attributes: msg
                    .attributes
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(name, value)| (name.as_str().to_string(), value))
                    .collect(),
                message_attributes: msg
                    .message_attributes
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|(name, value)| value.string_value.map(|v| (name, v)))
                    .collect(),
            })
            .collect())
    }

    async fn delete_batch(
        &self,
        url: &str,
        entries: Vec<DeleteEntry>,
    ) -> Result<Vec<BatchFailure>, SqsApiError> {
        let entries = entries
            .into_iter()
            .map(|entry| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(entry.id)
                    .receipt_handle(entry.receipt_handle)
                    .build()
                    .map_err(|e| SqsApiError::InvalidEntry(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let out = self
            .delete_message_batch()
            .queue_url(url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(classify)?;

        Ok(out.failed.into_iter().map(batch_failure).collect())
    }

    async fn change_visibility_batch(
        &self,
        url: &str,
        entries: Vec<VisibilityEntry>,
    ) -> Result<Vec<BatchFailure>, SqsApiError> {
        let entries = entries
            .into_iter()
            .map(|entry| {
                ChangeMessageVisibilityBatchRequestEntry::builder()
                    .id(entry.id)
                    .receipt_handle(entry.receipt_handle)
                    .visibility_timeout(entry.visibility_timeout)
                    .build()
                    .map_err(|e| SqsApiError::InvalidEntry(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let out = self
            .change_message_visibility_batch()
            .queue_url(url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(classify)?;

        Ok(out.failed.into_iter().map(batch_failure).collect())
    }

    async fn send_batch(
        &self,
        url: &str,
        entries: Vec<SendEntry>,
    ) -> Result<Vec<BatchFailure>, SqsApiError> {
        let entries = entries
            .into_iter()
            .map(|entry| {
                SendMessageBatchRequestEntry::builder()
                    .id(entry.id)
                    .message_body(entry.body)
                    .build()
                    .map_err(|e| SqsApiError::InvalidEntry(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let out = self
            .send_message_batch()
            .queue_url(url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(classify)?;

        Ok(out.failed.into_iter().map(batch_failure).collect())
    }
}

fn batch_failure(entry: aws_sdk_sqs::types::BatchResultErrorEntry) -> BatchFailure {
    BatchFailure {
        id: entry.id,
        code: entry.code,
        message: entry.message,
        sender_fault: entry.sender_fault,
    }
}

/// Map an SDK error, distinguishing timeouts (long-poll expiry, dispatch
/// timeouts) so the receive path can suppress them.
fn classify<E, R>(err: SdkError<E, R>) -> SqsApiError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    match &err {
        SdkError::TimeoutError(_) => SqsApiError::Timeout,
        SdkError::DispatchFailure(failure) if failure.is_timeout() => SqsApiError::Timeout,
        _ => SqsApiError::Request(DisplayErrorContext(&err).to_string()),
    }
}
