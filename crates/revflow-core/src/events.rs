use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::types::ObservabilityEvent;

const MAX_HISTORY: usize = 10_000;

/// Fire-and-forget observability facade. Every workflow/queue/remediation
/// state transition calls `notify`; delivery never blocks the transition
/// that produced it because a full broadcast channel simply drops the
/// event for subscribers that are behind.
pub struct EventBus {
    tx: broadcast::Sender<ObservabilityEvent>,
    history: Mutex<VecDeque<ObservabilityEvent>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            tx,
            history: Mutex::new(VecDeque::new()),
        })
    }

    /// Best-effort publish. Never returns an error to the caller: a state
    /// transition must complete regardless of whether anyone is watching.
    pub async fn notify(&self, event: ObservabilityEvent) {
        let _ = self.tx.send(event.clone());
        let mut history = self.history.lock().await;
        history.push_back(event);
        if history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    /// Returns a history snapshot plus a live receiver for new events.
    pub async fn subscribe(&self) -> (Vec<ObservabilityEvent>, broadcast::Receiver<ObservabilityEvent>) {
        let history = self.history.lock().await;
        (history.iter().cloned().collect(), self.tx.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            tx,
            history: Mutex::new(VecDeque::new()),
        }
    }
}
