use super::{LogJob, LogKey};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Oldest entries are dropped past this, so unwatched runtime logs stay bounded.
pub const MAX_BUFFERED_ENTRIES: usize = 5_000;

/// What a viewer receives: `{"event": "build" | "runtime" | "complete", "data": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, actix::Message)]
#[rtype(result = "()")]
pub struct LogFrame {
    pub event: String,
    pub data: String,
}

impl From<&LogJob> for LogFrame {
    fn from(job: &LogJob) -> Self {
        let event = if job.entry.complete {
            "complete".to_string()
        } else {
            job.key.log_type.as_str().to_string()
        };
        Self {
            event,
            data: job.entry.message.clone(),
        }
    }
}

/// A live viewer. `send` returns false once the viewer is gone.
pub trait LogSubscriber: Send + Sync {
    fn send(&self, frame: LogFrame) -> bool;
}

impl LogSubscriber for tokio::sync::mpsc::UnboundedSender<LogFrame> {
    fn send(&self, frame: LogFrame) -> bool {
        tokio::sync::mpsc::UnboundedSender::send(self, frame).is_ok()
    }
}

impl LogSubscriber for actix::Recipient<LogFrame> {
    fn send(&self, frame: LogFrame) -> bool {
        self.connected() && {
            self.do_send(frame);
            true
        }
    }
}

pub type SubscriptionId = u64;

#[derive(Default)]
struct HubState {
    subscribers: HashMap<LogKey, Vec<(SubscriptionId, Arc<dyn LogSubscriber>)>>,
    buffers: HashMap<LogKey, VecDeque<LogJob>>,
}

/// Subscribers and per-key buffers behind one lock, so replay and live delivery
/// cannot interleave.
#[derive(Default)]
pub struct LogHub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl LogHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        // state stays consistent even if a holder panicked mid-send
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a viewer and replay everything buffered for `key`, in order, exactly once.
    pub fn subscribe(&self, key: LogKey, subscriber: Arc<dyn LogSubscriber>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();

        if let Some(buffered) = state.buffers.remove(&key) {
            tracing::debug!(
                repository_id = %key.repository_id,
                branch = %key.branch,
                entries = buffered.len(),
                "Replaying buffered log entries"
            );
            for job in &buffered {
                subscriber.send(LogFrame::from(job));
            }
        }

        state
            .subscribers
            .entry(key)
            .or_default()
            .push((id, subscriber));
        id
    }

    pub fn unsubscribe(&self, key: &LogKey, id: SubscriptionId) {
        let mut state = self.lock();
        if let Some(subscribers) = state.subscribers.get_mut(key) {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
            if subscribers.is_empty() {
                state.subscribers.remove(key);
            }
        }
    }

    /// Forward to every live viewer of the key, or buffer when there is none.
    pub fn deliver(&self, job: LogJob) {
        let mut state = self.lock();

        if let Some(subscribers) = state.subscribers.get_mut(&job.key) {
            let frame = LogFrame::from(&job);
            subscribers.retain(|(_, subscriber)| subscriber.send(frame.clone()));
            if !subscribers.is_empty() {
                return;
            }
            state.subscribers.remove(&job.key);
        }

        let buffer = state.buffers.entry(job.key.clone()).or_default();
        if buffer.len() >= MAX_BUFFERED_ENTRIES {
            buffer.pop_front();
        }
        buffer.push_back(job);
    }

    pub fn buffered(&self, key: &LogKey) -> usize {
        self.lock().buffers.get(key).map(VecDeque::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{LogEntry, LogType};
    use tokio::sync::mpsc;

    fn job(key: &LogKey, message: &str) -> LogJob {
        LogJob {
            key: key.clone(),
            entry: LogEntry {
                message: message.to_string(),
                complete: false,
            },
        }
    }

    #[test]
    fn test_late_subscriber_gets_replay_once_in_order() {
        let hub = LogHub::new();
        let key = LogKey::new("acme/shop", "main", LogType::Build);
        for line in ["one\n", "two\n", "three\n"] {
            hub.deliver(job(&key, line));
        }
        assert_eq!(hub.buffered(&key), 3);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.subscribe(key.clone(), Arc::new(tx));
        let replayed: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|frame| frame.data)
            .collect();
        assert_eq!(replayed, vec!["one\n", "two\n", "three\n"]);
        assert_eq!(hub.buffered(&key), 0);

        // a second viewer sees nothing from before
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.subscribe(key.clone(), Arc::new(tx2));
        assert!(rx2.try_recv().is_err());

        hub.unsubscribe(&key, id);
        hub.deliver(job(&key, "four\n"));
        assert!(rx.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap().data, "four\n");
    }

    #[test]
    fn test_keys_are_isolated() {
        let hub = LogHub::new();
        let build = LogKey::new("acme/shop", "main", LogType::Build);
        let runtime = LogKey::new("acme/shop", "main", LogType::Runtime);

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.subscribe(build.clone(), Arc::new(tx));
        hub.deliver(job(&runtime, "GET / 200\n"));

        assert!(rx.try_recv().is_err());
        assert_eq!(hub.buffered(&runtime), 1);
    }

    #[test]
    fn test_dropped_viewer_falls_back_to_buffering() {
        let hub = LogHub::new();
        let key = LogKey::new("acme/shop", "main", LogType::Runtime);
        let (tx, rx) = mpsc::unbounded_channel();
        hub.subscribe(key.clone(), Arc::new(tx));
        drop(rx);

        hub.deliver(job(&key, "lost viewer\n"));
        assert_eq!(hub.buffered(&key), 1);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let hub = LogHub::new();
        let key = LogKey::new("acme/shop", "main", LogType::Runtime);
        for n in 0..(MAX_BUFFERED_ENTRIES + 10) {
            hub.deliver(job(&key, &n.to_string()));
        }
        assert_eq!(hub.buffered(&key), MAX_BUFFERED_ENTRIES);

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.subscribe(key, Arc::new(tx));
        assert_eq!(rx.try_recv().unwrap().data, "10");
    }
}
