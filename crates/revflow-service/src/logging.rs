use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};

const RING_CAPACITY: usize = 500;

/// One log line as shipped to `/events` subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub level: &'static str,
    pub component: &'static str,
    pub message: String,
}

/// Shared sink behind the tracing layer: a broadcast channel for live
/// subscribers plus a bounded backlog so a subscriber that connects late
/// still sees recent lines. Pushing never blocks logging; a full channel
/// just drops lines for slow subscribers.
pub struct LogTail {
    tx: broadcast::Sender<LogLine>,
    ring: Mutex<VecDeque<LogLine>>,
}

impl LogTail {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            tx,
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        })
    }

    /// The tracing layer feeding this tail; hand it to the subscriber
    /// registry at startup.
    pub fn layer(self: &Arc<Self>) -> TailLayer {
        TailLayer { tail: Arc::clone(self) }
    }

    pub fn subscribe(&self) -> (Vec<LogLine>, broadcast::Receiver<LogLine>) {
        let backlog = self
            .ring
            .lock()
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default();
        (backlog, self.tx.subscribe())
    }

    fn push(&self, line: LogLine) {
        let _ = self.tx.send(line.clone());
        if let Ok(mut ring) = self.ring.lock() {
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(line);
        }
    }
}

pub struct TailLayer {
    tail: Arc<LogTail>,
}

/// Collects the event's `message` plus any structured fields appended as
/// `key=value` pairs, roughly what the fmt layer prints on one line.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        use std::fmt::Write;
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        use std::fmt::Write;
        if field.name() == "message" {
            self.message = format!("{value:?}");
            if self.message.len() >= 2 && self.message.starts_with('"') && self.message.ends_with('"') {
                self.message = self.message[1..self.message.len() - 1].to_string();
            }
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

fn component_for(target: &str) -> &'static str {
    let mut parts = target.split("::");
    match parts.next().unwrap_or_default() {
        "revflow_core" => match parts.next().unwrap_or_default() {
            "orchestrator" => "orchestrator",
            "mergequeue" => "mergequeue",
            "remediation" => "remediation",
            "session" => "session",
            _ => "core",
        },
        "revflow_agents" => "agents",
        "revflow_service" => "service",
        _ => "deps",
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for TailLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() == tracing::Level::TRACE {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let mut message = visitor.message;
        message.push_str(&visitor.fields);

        self.tail.push(LogLine {
            at: Utc::now(),
            level: metadata.level().as_str(),
            component: component_for(metadata.target()),
            message,
        });
    }
}
