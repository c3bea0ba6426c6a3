//! Log sink handed to execution contexts.
//!
//! Function code logs through [`LogSink::enqueue`], which never blocks the
//! invocation. [`ChannelLogSink`] forwards entries over an unbounded channel
//! to a drain task that re-emits them as `tracing` events under the
//! `function_log` target.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Asynchronous destination for function logs.
pub trait LogSink: Send + Sync {
    /// Queue a log line. Must return without waiting on the destination.
    fn enqueue(&self, level: LogLevel, message: String);
}

#[derive(Clone)]
pub struct ChannelLogSink {
    sender: mpsc::UnboundedSender<LogEntry>,
}

impl ChannelLogSink {
    /// Create a sink and the receiving end of its queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogEntry>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Create a sink whose entries are drained into `tracing` by a
    /// background task. The task ends once every sink clone is dropped.
    pub fn spawn() -> (Arc<Self>, JoinHandle<()>) {
        let (sink, receiver) = Self::channel();
        let handle = tokio::spawn(drain_to_tracing(receiver));
        (Arc::new(sink), handle)
    }
}

impl LogSink for ChannelLogSink {
    fn enqueue(&self, level: LogLevel, message: String) {
        // The drain task is gone during shutdown; late lines are dropped.
        let _ = self.sender.send(LogEntry { level, message });
    }
}

pub async fn drain_to_tracing(mut receiver: mpsc::UnboundedReceiver<LogEntry>) {
    while let Some(entry) = receiver.recv().await {
        match entry.level {
            LogLevel::Error => error!(target: "function_log", "{}", entry.message),
            LogLevel::Warn => warn!(target: "function_log", "{}", entry.message),
            LogLevel::Info => info!(target: "function_log", "{}", entry.message),
            LogLevel::Debug => debug!(target: "function_log", "{}", entry.message),
        }
    }
}
