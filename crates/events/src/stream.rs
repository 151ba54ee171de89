//! Live output fan-out for running executions.
//!
//! [`LogStreamer`] keeps, per live execution, the transcript so far and a set
//! of bounded subscriber channels. Delivery never blocks the publishing
//! reader task: a subscriber whose buffer is full misses that line.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use scriptd_core::scripting::executor::OutputSink;
use scriptd_core::types::DbId;
use tokio::sync::mpsc;

/// Default per-subscriber buffer, in lines.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Maximum transcript size kept per execution (10 MiB).
///
/// Lines past the cap are still streamed live.
pub const MAX_TRANSCRIPT_BYTES: usize = 10 * 1024 * 1024;

/// Line written once in place of everything past the cap.
pub const TRUNCATION_MARKER: &str = "[output truncated]";

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<String>,
}

#[derive(Default)]
struct LiveExecution {
    lines: Vec<String>,
    bytes: usize,
    truncated: bool,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
    lag_warned: bool,
}

impl LiveExecution {
    fn append(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        if self.bytes + line.len() + 1 > MAX_TRANSCRIPT_BYTES {
            self.truncated = true;
            self.lines.push(TRUNCATION_MARKER.to_string());
            return;
        }
        self.bytes += line.len() + 1;
        self.lines.push(line.to_string());
    }
}

pub struct LogStreamer {
    capacity: usize,
    executions: Mutex<HashMap<DbId, LiveExecution>>,
}

impl LogStreamer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            executions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DbId, LiveExecution>> {
        self.executions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start buffering output for `execution_id`.
    pub fn open(&self, execution_id: DbId) {
        self.lock().entry(execution_id).or_default();
    }

    /// Append a line to the transcript and offer it to every subscriber.
    ///
    /// Lines for executions that are not open are dropped.
    pub fn publish(&self, execution_id: DbId, line: String) {
        let mut executions = self.lock();
        let Some(live) = executions.get_mut(&execution_id) else {
            return;
        };
        live.append(&line);

        let mut lagged = false;
        live.subscribers.retain(|sub| match sub.sender.try_send(line.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                lagged = true;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if lagged && !live.lag_warned {
            live.lag_warned = true;
            tracing::warn!(execution_id, "Subscriber buffer full, dropping output lines");
        }
    }

    /// Subscribe to an open execution.
    ///
    /// The receiver first yields the lines already published, then live
    /// lines, and ends when the execution is closed. Returns `None` if the
    /// execution is not live.
    pub fn subscribe(self: &Arc<Self>, execution_id: DbId) -> Option<Subscription> {
        let mut executions = self.lock();
        let live = executions.get_mut(&execution_id)?;

        let (sender, receiver) = mpsc::channel(self.capacity + live.lines.len());
        for line in &live.lines {
            // Capacity covers the whole backlog.
            let _ = sender.try_send(line.clone());
        }

        let id = live.next_subscriber_id;
        live.next_subscriber_id += 1;
        live.subscribers.push(Subscriber { id, sender });

        Some(Subscription {
            execution_id,
            id,
            receiver,
            streamer: Arc::downgrade(self),
        })
    }

    fn unsubscribe(&self, execution_id: DbId, id: u64) {
        if let Some(live) = self.lock().get_mut(&execution_id) {
            live.subscribers.retain(|sub| sub.id != id);
        }
    }

    /// Render the transcript accumulated so far, one line per `\n`.
    pub fn transcript(&self, execution_id: DbId) -> Option<String> {
        let executions = self.lock();
        let live = executions.get(&execution_id)?;
        let mut out = String::with_capacity(live.bytes + TRUNCATION_MARKER.len() + 1);
        for line in &live.lines {
            out.push_str(line);
            out.push('\n');
        }
        Some(out)
    }

    /// Stop streaming `execution_id`; every subscriber observes end of stream.
    pub fn close(&self, execution_id: DbId) {
        if let Some(live) = self.lock().remove(&execution_id) {
            tracing::debug!(
                execution_id,
                subscribers = live.subscribers.len(),
                "Closed output stream",
            );
        }
    }

    /// An [`OutputSink`] that publishes into `execution_id`.
    pub fn sink(self: &Arc<Self>, execution_id: DbId) -> Arc<dyn OutputSink> {
        Arc::new(ExecutionOutput {
            streamer: Arc::clone(self),
            execution_id,
        })
    }
}

impl Default for LogStreamer {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

struct ExecutionOutput {
    streamer: Arc<LogStreamer>,
    execution_id: DbId,
}

impl OutputSink for ExecutionOutput {
    fn line(&self, line: String) {
        self.streamer.publish(self.execution_id, line);
    }
}

/// Receiving end of a live execution's output.
#[derive(Debug)]
pub struct Subscription {
    execution_id: DbId,
    id: u64,
    receiver: mpsc::Receiver<String>,
    streamer: Weak<LogStreamer>,
}

impl Subscription {
    pub fn execution_id(&self) -> DbId {
        self.execution_id
    }

    /// Next line, or `None` once the execution has finished.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Detach from the execution.
    pub fn unsubscribe(self) {
        if let Some(streamer) = self.streamer.upgrade() {
            streamer.unsubscribe(self.execution_id, self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
