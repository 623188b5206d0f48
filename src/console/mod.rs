//! Structured console logs shipped to the remote service.
pub mod buffer;
pub mod entry;

use crate::http::ApiError;
use async_trait::async_trait;
use duration_str::deserialize_duration;
use serde::Deserialize;
use std::time::Duration;

pub use buffer::ConsoleBuffer;
pub use entry::{ConsoleBatch, ConsoleClock, ConsoleEntry, ConsoleOwner, EntryKind};

pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Destination of drained console batches.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsoleSink: Send + Sync {
    async fn post_entries(&self, batch: &ConsoleBatch) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(
        default = "default_flush_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub flush_interval: Duration,
    /// Longest wait for in-flight posts once a unit is done.
    #[serde(
        default = "default_drain_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub drain_timeout: Duration,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}

fn default_drain_timeout() -> Duration {
    DEFAULT_DRAIN_TIMEOUT
}
