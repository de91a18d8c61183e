pub mod api;
pub mod config;
pub mod error;
mod handle;
pub mod metrics;
mod reader;
mod shutdown;
pub mod telemetry;
mod tracker;

pub use api::{
    BatchFailure, DeleteEntry, QueueMessage, SendEntry, SqsApi, SqsApiError, VisibilityEntry,
};
pub use config::ReaderConfig;
pub use error::{AckError, CloseError, ConfigError, ReadError};
pub use reader::{Acker, ConsumedMessage, SqsReader};
