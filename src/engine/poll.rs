use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::core::{EngineError, EngineResult};
use crate::engine::messages::{EngineMessage, MessageBus};
use crate::providers::{CheckDisposition, ProviderRegistry};
use crate::store::SubmissionStore;

/// Ceiling on poll attempts for one submission.
pub const MAX_ATTEMPTS: u32 = 10;

const MAX_ATTEMPTS_MESSAGE: &str = "Max status check attempts exceeded.";
const XML_ONLY_NOTE: &str = "No API submission — XML generation only. Marked as accepted.";

/// Handles `CheckEInvoiceStatus`: one bounded, non-blocking probe of a
/// submission's external state.
///
/// Every exit leaves the submission advanced, re-scheduled, or terminally
/// errored, never silently stuck:
/// - terminal submission: idempotent no-op (stale/duplicate deliveries);
/// - no external id: the XML-only shortcut straight to `Accepted`;
/// - attempt ceiling reached: `Error` with a fixed message;
/// - checker settled or asked for a re-check: persisted / re-enqueued;
/// - recoverable checker failure: re-enqueued; rate-limit exhaustion
///   delays by at least its retry-after without consuming an attempt,
///   transport errors consume `attempt + 1` and leave timing to the
///   transport;
/// - anything else: `Error` with the failure message.
pub struct StatusPoller {
    submissions: Arc<dyn SubmissionStore>,
    registry: Arc<ProviderRegistry>,
    bus: Arc<dyn MessageBus>,
}

impl StatusPoller {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        registry: Arc<ProviderRegistry>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        StatusPoller {
            submissions,
            registry,
            bus,
        }
    }

    pub async fn handle(&self, submission_id: Uuid, attempt: u32) -> EngineResult<()> {
        let Some(mut submission) = self.submissions.find(submission_id).await? else {
            tracing::warn!(%submission_id, "status check requested for unknown submission");
            return Ok(());
        };

        // Terminal first: a stale or duplicate poll must never touch the
        // record again.
        if submission.status.is_terminal() {
            return Ok(());
        }

        // XML-only submissions have nothing to poll.
        if submission.external_id.is_none() {
            submission.transition(crate::models::SubmissionStatus::Accepted);
            submission.put_metadata("note", serde_json::json!(XML_ONLY_NOTE));
            self.submissions.update(&submission).await?;
            return Ok(());
        }

        if attempt >= MAX_ATTEMPTS {
            submission.record_error(MAX_ATTEMPTS_MESSAGE);
            self.submissions.update(&submission).await?;
            return Ok(());
        }

        let checker = match self.registry.status_checker(submission.provider) {
            Ok(checker) => checker,
            Err(err) => {
                tracing::error!(%submission_id, error = %err, "status checker lookup failed");
                submission.record_error(err.to_string());
                self.submissions.update(&submission).await?;
                return Ok(());
            }
        };

        match checker.check(&mut submission, attempt).await {
            Ok(CheckDisposition::Settled) => {
                self.submissions.update(&submission).await?;
                Ok(())
            }
            Ok(CheckDisposition::Reschedule { delay }) => {
                self.submissions.update(&submission).await?;
                self.bus
                    .dispatch_delayed(
                        EngineMessage::CheckEInvoiceStatus {
                            submission_id,
                            attempt: attempt + 1,
                        },
                        delay,
                    )
                    .await?;
                Ok(())
            }
            Err(EngineError::NotFound { entity, id }) => {
                // Nothing left to act on; do not retry.
                tracing::warn!(%submission_id, entity, id, "status check target vanished");
                Ok(())
            }
            Err(EngineError::RateLimited {
                limit,
                retry_after_secs,
            }) => {
                // Recoverable and not this submission's fault: wait out the
                // budget with the same attempt number.
                tracing::info!(
                    %submission_id,
                    limit,
                    retry_after_secs,
                    "status check deferred by provider rate limit"
                );
                self.bus
                    .dispatch_delayed(
                        EngineMessage::CheckEInvoiceStatus {
                            submission_id,
                            attempt,
                        },
                        Duration::from_secs(retry_after_secs),
                    )
                    .await?;
                Ok(())
            }
            Err(err) if err.is_recoverable() && attempt < MAX_ATTEMPTS - 1 => {
                tracing::warn!(
                    %submission_id,
                    provider = %submission.provider,
                    error = %err,
                    attempt,
                    "status check failed, retrying"
                );
                // The transport decides when the retry runs.
                self.bus
                    .dispatch(EngineMessage::CheckEInvoiceStatus {
                        submission_id,
                        attempt: attempt + 1,
                    })
                    .await?;
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    %submission_id,
                    provider = %submission.provider,
                    error = %err,
                    attempt,
                    "status check failed terminally"
                );
                submission.record_error(err.to_string());
                self.submissions.update(&submission).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::messages::MemoryBus;
    use crate::models::{EInvoiceSubmission, ProviderId, SubmissionStatus};
    use crate::providers::{StatusChecker, SubmissionHandler};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NoopHandler;

    #[async_trait]
    impl SubmissionHandler for NoopHandler {
        async fn handle(
            &self,
            _invoice: &crate::models::InvoiceRecord,
            _submission: &mut EInvoiceSubmission,
        ) -> EngineResult<()> {
            Ok(())
        }
    }

    /// Checker that always fails with a transport error and counts calls.
    #[derive(Default)]
    struct AlwaysFailing {
        calls: AtomicU32,
    }

    #[async_trait]
    impl StatusChecker for AlwaysFailing {
        async fn check(
            &self,
            _submission: &mut EInvoiceSubmission,
            _attempt: u32,
        ) -> EngineResult<CheckDisposition> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Transport("connection reset".into()))
        }
    }

    struct RateLimitedOnce {
        remaining: AtomicU32,
    }

    #[async_trait]
    impl StatusChecker for RateLimitedOnce {
        async fn check(
            &self,
            submission: &mut EInvoiceSubmission,
            _attempt: u32,
        ) -> EngineResult<CheckDisposition> {
            if self.remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(EngineError::RateLimited {
                    limit: "per-minute".into(),
                    retry_after_secs: 30,
                })
            } else {
                submission.transition(SubmissionStatus::Validated);
                Ok(CheckDisposition::Settled)
            }
        }
    }

    struct PanickingChecker;

    #[async_trait]
    impl StatusChecker for PanickingChecker {
        async fn check(
            &self,
            _submission: &mut EInvoiceSubmission,
            _attempt: u32,
        ) -> EngineResult<CheckDisposition> {
            panic!("checker must not run");
        }
    }

    fn registry(checker: Arc<dyn StatusChecker>) -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        registry.register(ProviderId::EFactura, Arc::new(NoopHandler), checker);
        Arc::new(registry)
    }

    fn poller(
        store: &Arc<MemoryStore>,
        bus: &Arc<MemoryBus>,
        checker: Arc<dyn StatusChecker>,
    ) -> StatusPoller {
        StatusPoller::new(store.clone(), registry(checker), bus.clone())
    }

    async fn submission_with_external_id(store: &MemoryStore) -> EInvoiceSubmission {
        let mut submission = EInvoiceSubmission::new(Uuid::new_v4(), ProviderId::EFactura);
        submission.external_id = Some("ext-1".into());
        submission.transition(SubmissionStatus::Accepted);
        store.insert(&submission).await.unwrap();
        submission
    }

    #[tokio::test]
    async fn terminal_submission_is_an_idempotent_no_op() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let sut = poller(&store, &bus, Arc::new(PanickingChecker));

        let mut submission = EInvoiceSubmission::new(Uuid::new_v4(), ProviderId::EFactura);
        submission.transition(SubmissionStatus::Validated);
        submission.put_metadata("download_id", serde_json::json!("9001"));
        store.insert(&submission).await.unwrap();

        for attempt in [0, 3, MAX_ATTEMPTS, 99] {
            sut.handle(submission.id, attempt).await.unwrap();
        }

        let stored = store.submission(submission.id).unwrap();
        assert_eq!(stored.status, SubmissionStatus::Validated);
        assert_eq!(stored.metadata, submission.metadata);
        assert_eq!(stored.error_message, None);
        assert_eq!(bus.pending(), 0);
    }

    #[tokio::test]
    async fn missing_external_id_short_circuits_to_accepted() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let sut = poller(&store, &bus, Arc::new(PanickingChecker));

        let submission = EInvoiceSubmission::new(Uuid::new_v4(), ProviderId::EFactura);
        store.insert(&submission).await.unwrap();

        sut.handle(submission.id, 0).await.unwrap();

        let stored = store.submission(submission.id).unwrap();
        assert_eq!(stored.status, SubmissionStatus::Accepted);
        assert_eq!(
            stored.metadata.get("note").and_then(|n| n.as_str()),
            Some(XML_ONLY_NOTE)
        );
        // No outbound call was made and no further poll is scheduled.
        assert_eq!(bus.pending(), 0);
    }

    #[tokio::test]
    async fn attempt_ceiling_errors_on_the_last_scheduled_try() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let checker = Arc::new(AlwaysFailing::default());
        let sut = poller(&store, &bus, checker.clone());

        let submission = submission_with_external_id(&store).await;

        // Drive the full retry protocol through the simulated transport.
        sut.handle(submission.id, 0).await.unwrap();
        let mut rounds = 0;
        loop {
            let due = bus.drain_due();
            if due.is_empty() {
                break;
            }
            for message in due {
                match message {
                    EngineMessage::CheckEInvoiceStatus {
                        submission_id,
                        attempt,
                    } => sut.handle(submission_id, attempt).await.unwrap(),
                    other => panic!("unexpected message {other:?}"),
                }
            }
            rounds += 1;
            assert!(rounds <= MAX_ATTEMPTS + 1, "retry protocol did not converge");
        }

        // Attempts 0..=MAX-1 each probed once; the last one errored out.
        assert_eq!(checker.calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        let stored = store.submission(submission.id).unwrap();
        assert_eq!(stored.status, SubmissionStatus::Error);
        assert_eq!(stored.error_message.as_deref(), Some("connection reset"));
        assert_eq!(bus.pending(), 0);

        // A straggler delivery after the terminal transition changes nothing.
        sut.handle(submission.id, 5).await.unwrap();
        assert_eq!(checker.calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn stale_attempt_numbers_beyond_the_ceiling_error_out() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let sut = poller(&store, &bus, Arc::new(PanickingChecker));

        let submission = submission_with_external_id(&store).await;
        sut.handle(submission.id, MAX_ATTEMPTS).await.unwrap();

        let stored = store.submission(submission.id).unwrap();
        assert_eq!(stored.status, SubmissionStatus::Error);
        assert_eq!(stored.error_message.as_deref(), Some(MAX_ATTEMPTS_MESSAGE));
    }

    #[tokio::test]
    async fn rate_limited_poll_waits_out_the_budget_without_spending_an_attempt() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let checker = Arc::new(RateLimitedOnce {
            remaining: AtomicU32::new(1),
        });
        let sut = poller(&store, &bus, checker);

        let submission = submission_with_external_id(&store).await;
        sut.handle(submission.id, 4).await.unwrap();

        // Not due before the retry-after elapses.
        assert!(bus.drain_due().is_empty());
        assert!(bus.next_due_in() >= Some(Duration::from_secs(30)));
        bus.advance(Duration::from_secs(29));
        assert!(bus.drain_due().is_empty());

        bus.advance(Duration::from_secs(1));
        match bus.drain_due().as_slice() {
            [EngineMessage::CheckEInvoiceStatus { attempt, .. }] => {
                // Same attempt: the budget, not the submission, was at fault.
                assert_eq!(*attempt, 4);
            }
            other => panic!("expected one re-check, got {other:?}"),
        }

        sut.handle(submission.id, 4).await.unwrap();
        let stored = store.submission(submission.id).unwrap();
        assert_eq!(stored.status, SubmissionStatus::Validated);
    }

    #[tokio::test]
    async fn reschedule_disposition_re_enqueues_with_incremented_attempt() {
        struct StillPending;

        #[async_trait]
        impl StatusChecker for StillPending {
            async fn check(
                &self,
                _submission: &mut EInvoiceSubmission,
                _attempt: u32,
            ) -> EngineResult<CheckDisposition> {
                Ok(CheckDisposition::Reschedule {
                    delay: Duration::from_secs(300),
                })
            }
        }

        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let sut = poller(&store, &bus, Arc::new(StillPending));

        let submission = submission_with_external_id(&store).await;
        sut.handle(submission.id, 2).await.unwrap();

        bus.advance(Duration::from_secs(300));
        match bus.drain_due().as_slice() {
            [EngineMessage::CheckEInvoiceStatus { attempt, .. }] => assert_eq!(*attempt, 3),
            other => panic!("expected one re-check, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_submission_is_a_logged_no_op() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let sut = poller(&store, &bus, Arc::new(PanickingChecker));

        sut.handle(Uuid::new_v4(), 0).await.unwrap();
        assert_eq!(bus.pending(), 0);
    }

    #[tokio::test]
    async fn vanished_invoice_stops_the_pursuit() {
        struct NotFoundChecker;

        #[async_trait]
        impl StatusChecker for NotFoundChecker {
            async fn check(
                &self,
                _submission: &mut EInvoiceSubmission,
                _attempt: u32,
            ) -> EngineResult<CheckDisposition> {
                Err(EngineError::NotFound {
                    entity: "invoice",
                    id: "x".into(),
                })
            }
        }

        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let sut = poller(&store, &bus, Arc::new(NotFoundChecker));

        let submission = submission_with_external_id(&store).await;
        sut.handle(submission.id, 0).await.unwrap();
        assert_eq!(bus.pending(), 0);
    }
}
