use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::core::{EngineError, EngineResult};
use crate::engine::messages::{EngineMessage, MessageBus};
use crate::models::{EInvoiceSubmission, ProviderId, SubmissionStatus};
use crate::providers::ProviderRegistry;
use crate::store::{InvoiceStore, SubmissionStore};

/// Handles `SubmitEInvoice`: creates (or re-uses) the submission record,
/// runs the provider's submission handler, captures the outcome, and
/// schedules the first status poll when anything is left to poll.
pub struct SubmitOrchestrator {
    invoices: Arc<dyn InvoiceStore>,
    submissions: Arc<dyn SubmissionStore>,
    registry: Arc<ProviderRegistry>,
    bus: Arc<dyn MessageBus>,
}

impl SubmitOrchestrator {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        submissions: Arc<dyn SubmissionStore>,
        registry: Arc<ProviderRegistry>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        SubmitOrchestrator {
            invoices,
            submissions,
            registry,
            bus,
        }
    }

    pub async fn handle(&self, invoice_id: Uuid, provider: ProviderId) -> EngineResult<()> {
        let Some(invoice) = self.invoices.find_invoice(invoice_id).await? else {
            tracing::warn!(%invoice_id, "submit requested for unknown invoice");
            return Ok(());
        };

        // At-least-once delivery: a re-delivered submit message re-uses the
        // open submission instead of creating a duplicate record.
        let mut submission = match self.submissions.find_active(invoice_id, provider).await? {
            Some(existing) if existing.status == SubmissionStatus::Accepted => {
                // Already at the provider; just make sure a poll is queued.
                self.bus
                    .dispatch(EngineMessage::CheckEInvoiceStatus {
                        submission_id: existing.id,
                        attempt: 0,
                    })
                    .await?;
                return Ok(());
            }
            Some(existing) => {
                tracing::info!(
                    %invoice_id,
                    submission_id = %existing.id,
                    "re-using open submission for re-delivered submit"
                );
                existing
            }
            None => {
                let submission = EInvoiceSubmission::new(invoice_id, provider);
                self.submissions.insert(&submission).await?;
                submission
            }
        };

        let result = match self.registry.submission_handler(provider) {
            Ok(handler) => handler.handle(&invoice, &mut submission).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                self.submissions.update(&submission).await?;
                crate::metrics::SUBMISSIONS_TOTAL
                    .with_label_values(&[provider.as_str(), submission.status.as_str()])
                    .inc();

                if !submission.status.is_terminal() {
                    self.bus
                        .dispatch(EngineMessage::CheckEInvoiceStatus {
                            submission_id: submission.id,
                            attempt: 0,
                        })
                        .await?;
                }
                Ok(())
            }
            Err(EngineError::RateLimited {
                limit,
                retry_after_secs,
            }) => {
                // Recoverable: keep the submission open and retry the whole
                // submit after the budget recovers.
                tracing::info!(
                    %invoice_id,
                    submission_id = %submission.id,
                    limit,
                    retry_after_secs,
                    "submission deferred by provider rate limit"
                );
                self.submissions.update(&submission).await?;
                self.bus
                    .dispatch_delayed(
                        EngineMessage::SubmitEInvoice {
                            invoice_id,
                            provider,
                        },
                        Duration::from_secs(retry_after_secs),
                    )
                    .await?;
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    %invoice_id,
                    submission_id = %submission.id,
                    provider = %provider,
                    error = %err,
                    "submission failed"
                );
                submission.record_error(err.to_string());
                self.submissions.update(&submission).await?;
                crate::metrics::SUBMISSIONS_TOTAL
                    .with_label_values(&[provider.as_str(), submission.status.as_str()])
                    .inc();
                Ok(())
            }
        }
    }
}
