//! Persistence boundary for invoices and submissions.
//!
//! The engine owns the interface, not the schema. Submission rows are an
//! audit trail: they are never deleted, and the store's conditional update
//! is the last line of the monotonicity guarantee: a stale worker can never
//! move a row backward or overwrite a terminal status.

pub mod postgres;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::EngineResult;
use crate::models::{EInvoiceSubmission, InvoiceRecord, ProviderId};

/// Read access to invoices owned by the wider platform.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn find_invoice(&self, id: Uuid) -> EngineResult<Option<InvoiceRecord>>;
}

/// Submission record persistence.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn insert(&self, submission: &EInvoiceSubmission) -> EngineResult<()>;

    async fn find(&self, id: Uuid) -> EngineResult<Option<EInvoiceSubmission>>;

    /// The non-terminal submission for (invoice, provider), if any. Dedupe
    /// key for re-delivered submit messages.
    async fn find_active(
        &self,
        invoice_id: Uuid,
        provider: ProviderId,
    ) -> EngineResult<Option<EInvoiceSubmission>>;

    /// Persist the submission's current state. A stored row that is already
    /// terminal, or further along than the update, is left untouched; the
    /// write is silently dropped rather than regressing the state machine.
    async fn update(&self, submission: &EInvoiceSubmission) -> EngineResult<()>;
}

/// In-memory store for tests and local runs. Both trait implementations
/// share one mutex-guarded state, mirroring a single database.
#[derive(Default)]
pub struct MemoryStore {
    invoices: Mutex<HashMap<Uuid, InvoiceRecord>>,
    submissions: Mutex<HashMap<Uuid, EInvoiceSubmission>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_invoice(&self, invoice: InvoiceRecord) {
        self.invoices.lock().unwrap().insert(invoice.id, invoice);
    }

    pub fn submission(&self, id: Uuid) -> Option<EInvoiceSubmission> {
        self.submissions.lock().unwrap().get(&id).cloned()
    }

    pub fn submissions_for(&self, invoice_id: Uuid) -> Vec<EInvoiceSubmission> {
        self.submissions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.invoice_id == invoice_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn find_invoice(&self, id: Uuid) -> EngineResult<Option<InvoiceRecord>> {
        Ok(self.invoices.lock().unwrap().get(&id).cloned())
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn insert(&self, submission: &EInvoiceSubmission) -> EngineResult<()> {
        self.submissions
            .lock()
            .unwrap()
            .insert(submission.id, submission.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> EngineResult<Option<EInvoiceSubmission>> {
        Ok(self.submissions.lock().unwrap().get(&id).cloned())
    }

    async fn find_active(
        &self,
        invoice_id: Uuid,
        provider: ProviderId,
    ) -> EngineResult<Option<EInvoiceSubmission>> {
        Ok(self
            .submissions
            .lock()
            .unwrap()
            .values()
            .find(|s| {
                s.invoice_id == invoice_id && s.provider == provider && !s.status.is_terminal()
            })
            .cloned())
    }

    async fn update(&self, submission: &EInvoiceSubmission) -> EngineResult<()> {
        let mut submissions = self.submissions.lock().unwrap();
        if let Some(stored) = submissions.get(&submission.id) {
            let allowed = stored.status == submission.status
                || stored.status.can_transition(submission.status);
            if !allowed {
                return Ok(());
            }
        }
        submissions.insert(submission.id, submission.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubmissionStatus;

    #[tokio::test]
    async fn update_refuses_to_regress_a_terminal_row() {
        let store = MemoryStore::new();
        let mut submission = EInvoiceSubmission::new(Uuid::new_v4(), ProviderId::EFactura);
        store.insert(&submission).await.unwrap();

        let mut validated = submission.clone();
        assert!(validated.transition(SubmissionStatus::Accepted));
        assert!(validated.transition(SubmissionStatus::Validated));
        store.update(&validated).await.unwrap();

        // A stale worker still holding the pending snapshot flushes late.
        submission.external_id = Some("stale".into());
        store.update(&submission).await.unwrap();

        let stored = store.submission(submission.id).unwrap();
        assert_eq!(stored.status, SubmissionStatus::Validated);
        assert_ne!(stored.external_id.as_deref(), Some("stale"));
    }

    #[tokio::test]
    async fn find_active_ignores_terminal_submissions() {
        let store = MemoryStore::new();
        let invoice_id = Uuid::new_v4();

        let mut done = EInvoiceSubmission::new(invoice_id, ProviderId::EFactura);
        done.transition(SubmissionStatus::Error);
        store.insert(&done).await.unwrap();

        assert!(store
            .find_active(invoice_id, ProviderId::EFactura)
            .await
            .unwrap()
            .is_none());

        let open = EInvoiceSubmission::new(invoice_id, ProviderId::EFactura);
        store.insert(&open).await.unwrap();
        let found = store
            .find_active(invoice_id, ProviderId::EFactura)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, open.id);
    }
}
