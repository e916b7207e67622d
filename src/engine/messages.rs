use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::EngineResult;
use crate::models::ProviderId;

/// Commands the engine consumes from the durable queue. Delivery is
/// at-least-once; both handlers are idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineMessage {
    /// Enqueued by the platform when an invoice reaches "issued".
    SubmitEInvoice {
        invoice_id: Uuid,
        provider: ProviderId,
    },
    /// Enqueued by the submit flow and re-enqueued by the poller itself.
    CheckEInvoiceStatus { submission_id: Uuid, attempt: u32 },
}

impl EngineMessage {
    /// Partition key: all messages of one submission/invoice stay ordered.
    pub fn key(&self) -> String {
        match self {
            EngineMessage::SubmitEInvoice { invoice_id, .. } => invoice_id.to_string(),
            EngineMessage::CheckEInvoiceStatus { submission_id, .. } => submission_id.to_string(),
        }
    }
}

/// The engine's view of the message transport. Delayed dispatch is how all
/// backoff is realized: the protocol decides whether and how much, the
/// transport owns the actual timing.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn dispatch(&self, message: EngineMessage) -> EngineResult<()>;

    async fn dispatch_delayed(&self, message: EngineMessage, delay: Duration) -> EngineResult<()>;
}

/// In-memory bus with a manual clock, for tests and local runs. Messages
/// become visible through [`MemoryBus::drain_due`] once the simulated clock
/// has passed their due time.
#[derive(Default)]
pub struct MemoryBus {
    state: Mutex<MemoryBusState>,
}

#[derive(Default)]
struct MemoryBusState {
    now: Duration,
    queue: Vec<(EngineMessage, Duration)>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the simulated clock.
    pub fn advance(&self, by: Duration) {
        self.state.lock().unwrap().now += by;
    }

    /// Remove and return every message whose due time has passed.
    pub fn drain_due(&self) -> Vec<EngineMessage> {
        let mut state = self.state.lock().unwrap();
        let now = state.now;
        let mut due = Vec::new();
        state.queue.retain(|(message, due_at)| {
            if *due_at <= now {
                due.push(message.clone());
                false
            } else {
                true
            }
        });
        due
    }

    /// Messages still waiting, due or not.
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Delay until the earliest queued message becomes due.
    pub fn next_due_in(&self) -> Option<Duration> {
        let state = self.state.lock().unwrap();
        state
            .queue
            .iter()
            .map(|(_, due_at)| due_at.saturating_sub(state.now))
            .min()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn dispatch(&self, message: EngineMessage) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        let due_at = state.now;
        state.queue.push((message, due_at));
        Ok(())
    }

    async fn dispatch_delayed(&self, message: EngineMessage, delay: Duration) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        let due_at = state.now + delay;
        state.queue.push((message, due_at));
        Ok(())
    }
}
