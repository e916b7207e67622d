//! The submission engine: message types, the submit orchestrator, and the
//! status poller, glued together for the worker.

pub mod kafka;
pub mod messages;
pub mod poll;
pub mod submit;

pub use kafka::KafkaBus;
pub use messages::{EngineMessage, MemoryBus, MessageBus};
pub use poll::{StatusPoller, MAX_ATTEMPTS};
pub use submit::SubmitOrchestrator;

use std::sync::Arc;

use crate::core::EngineResult;
use crate::providers::ProviderRegistry;
use crate::store::{InvoiceStore, SubmissionStore};

/// Both engine handlers behind one message entry point.
pub struct Engine {
    submitter: SubmitOrchestrator,
    poller: StatusPoller,
}

impl Engine {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        submissions: Arc<dyn SubmissionStore>,
        registry: Arc<ProviderRegistry>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Engine {
            submitter: SubmitOrchestrator::new(
                invoices,
                submissions.clone(),
                registry.clone(),
                bus.clone(),
            ),
            poller: StatusPoller::new(submissions, registry, bus),
        }
    }

    pub async fn handle_message(&self, message: EngineMessage) -> EngineResult<()> {
        match message {
            EngineMessage::SubmitEInvoice {
                invoice_id,
                provider,
            } => self.submitter.handle(invoice_id, provider).await,
            EngineMessage::CheckEInvoiceStatus {
                submission_id,
                attempt,
            } => self.poller.handle(submission_id, attempt).await,
        }
    }
}
