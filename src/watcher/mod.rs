//! Periodic poller over an external [StatusSource].
//!
//! The watcher reads its source once per interval, trims the value and publishes it when it
//! belongs to the configured match set. Publishing does not stop the watcher: a value that keeps
//! matching is published again on every tick until [StatusWatcher::stop] is called.
pub mod source;

use crate::event::channel::{pub_sub, EventConsumer};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

pub use source::{FileSource, RosterSource, SourceError, StatusSource};

#[derive(Error, Debug, PartialEq)]
pub enum WatcherConfigError {
    #[error("the status source must be identified")]
    EmptySource,
    #[error("the poll interval must be a positive number of milliseconds")]
    InvalidInterval,
    #[error("the match set must contain at least one non empty value")]
    EmptyMatchSet,
}

pub struct StatusWatcher {
    source: Arc<dyn StatusSource>,
    interval: Duration,
    matches: Arc<HashSet<String>>,
    handle: Option<JoinHandle<()>>,
}

impl StatusWatcher {
    pub fn try_new<I, S>(
        source: Arc<dyn StatusSource>,
        interval_ms: u64,
        matches: I,
    ) -> Result<Self, WatcherConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if source.id().trim().is_empty() {
            return Err(WatcherConfigError::EmptySource);
        }
        if interval_ms == 0 {
            return Err(WatcherConfigError::InvalidInterval);
        }
        let matches: HashSet<String> = matches
            .into_iter()
            .map(|m| m.as_ref().trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if matches.is_empty() {
            return Err(WatcherConfigError::EmptyMatchSet);
        }

        Ok(Self {
            source,
            interval: Duration::from_millis(interval_ms),
            matches: Arc::new(matches),
            handle: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Starts polling, restarting it if it was already running. Every matched value is delivered
    /// through the returned consumer.
    pub fn start(&mut self) -> EventConsumer<String> {
        self.stop();

        let (publisher, consumer) = pub_sub();
        let source = self.source.clone();
        let matches = self.matches.clone();
        let period = self.interval;

        self.handle = Some(tokio::spawn(async move {
            let source_id = source.id();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let value = match source.read().await {
                    Ok(value) => value,
                    Err(err) => {
                        debug!(source = %source_id, %err, "Status source not readable");
                        continue;
                    }
                };
                let value = value.trim();
                if !matches.contains(value) {
                    trace!(source = %source_id, value, "No match");
                    continue;
                }
                debug!(source = %source_id, value, "Status matched");
                if publisher.publish(value.to_string()).is_err() {
                    debug!(source = %source_id, "Match consumer dropped, stopping watcher");
                    break;
                }
            }
        }));

        consumer
    }

    /// Stops polling. Safe to call at any time.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for StatusWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
