//! Provider strategy layer.
//!
//! Each external authority implements two capability traits, submit and
//! status-check, and registers both under its stable key. Lookup of an
//! unregistered key is a configuration error, never a silent skip.

pub mod efactura;
pub mod xrechnung;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{EngineError, EngineResult};
use crate::models::{EInvoiceSubmission, InvoiceRecord, ProviderId};

/// What a completed status check wants the poller to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckDisposition {
    /// The submission reached a terminal state (or needs no further polling).
    Settled,
    /// Still pending at the authority; poll again after `delay`.
    Reschedule { delay: Duration },
}

/// Submits one invoice to one authority.
///
/// A call performs exactly one durable XML write and at most one outbound
/// network call, and leaves `submission.status` / `external_id` /
/// `error_message` updated before returning. Errors propagate; the
/// orchestrator records them on the submission.
#[async_trait]
pub trait SubmissionHandler: Send + Sync {
    async fn handle(
        &self,
        invoice: &InvoiceRecord,
        submission: &mut EInvoiceSubmission,
    ) -> EngineResult<()>;
}

/// One non-blocking probe of the authority's processing state.
///
/// Maps provider status codes onto the submission state machine, updates the
/// record in place, and tells the poller whether to re-schedule.
#[async_trait]
pub trait StatusChecker: Send + Sync {
    async fn check(
        &self,
        submission: &mut EInvoiceSubmission,
        attempt: u32,
    ) -> EngineResult<CheckDisposition>;
}

/// Per-organization provider credentials (bearer tokens, OAuth2 client
/// pairs), resolved at call time. `None` means the organization has not
/// connected this provider; handlers decide whether that is an error or
/// the XML-only flow.
#[async_trait]
pub trait CredentialsResolver: Send + Sync {
    async fn resolve(
        &self,
        organization_id: &str,
        provider: ProviderId,
    ) -> EngineResult<Option<HashMap<String, String>>>;
}

/// Static credentials from configuration. `"*"` registers a fallback used
/// by every organization without an explicit entry.
#[derive(Default)]
pub struct StaticCredentials {
    entries: HashMap<(String, ProviderId), HashMap<String, String>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        organization_id: impl Into<String>,
        provider: ProviderId,
        credentials: HashMap<String, String>,
    ) -> Self {
        self.entries
            .insert((organization_id.into(), provider), credentials);
        self
    }
}

#[async_trait]
impl CredentialsResolver for StaticCredentials {
    async fn resolve(
        &self,
        organization_id: &str,
        provider: ProviderId,
    ) -> EngineResult<Option<HashMap<String, String>>> {
        Ok(self
            .entries
            .get(&(organization_id.to_string(), provider))
            .or_else(|| self.entries.get(&("*".to_string(), provider)))
            .cloned())
    }
}

/// The strategy registry: provider key -> (submission handler, status
/// checker). Populated explicitly at startup; no runtime discovery.
#[derive(Default)]
pub struct ProviderRegistry {
    handlers: HashMap<ProviderId, Arc<dyn SubmissionHandler>>,
    checkers: HashMap<ProviderId, Arc<dyn StatusChecker>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        provider: ProviderId,
        handler: Arc<dyn SubmissionHandler>,
        checker: Arc<dyn StatusChecker>,
    ) {
        self.handlers.insert(provider, handler);
        self.checkers.insert(provider, checker);
    }

    pub fn submission_handler(
        &self,
        provider: ProviderId,
    ) -> EngineResult<Arc<dyn SubmissionHandler>> {
        self.handlers.get(&provider).cloned().ok_or_else(|| {
            EngineError::Config(format!("no submission handler registered for '{provider}'"))
        })
    }

    pub fn status_checker(&self, provider: ProviderId) -> EngineResult<Arc<dyn StatusChecker>> {
        self.checkers.get(&provider).cloned().ok_or_else(|| {
            EngineError::Config(format!("no status checker registered for '{provider}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl SubmissionHandler for NoopHandler {
        async fn handle(
            &self,
            _invoice: &InvoiceRecord,
            _submission: &mut EInvoiceSubmission,
        ) -> EngineResult<()> {
            Ok(())
        }
    }

    struct NoopChecker;

    #[async_trait]
    impl StatusChecker for NoopChecker {
        async fn check(
            &self,
            _submission: &mut EInvoiceSubmission,
            _attempt: u32,
        ) -> EngineResult<CheckDisposition> {
            Ok(CheckDisposition::Settled)
        }
    }

    #[test]
    fn unknown_provider_key_is_a_config_error() {
        let registry = ProviderRegistry::new();
        let err = match registry.submission_handler(ProviderId::EFactura) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, EngineError::Config(_)));
        let err = match registry.status_checker(ProviderId::XRechnung) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn registered_pair_is_returned() {
        let mut registry = ProviderRegistry::new();
        registry.register(ProviderId::EFactura, Arc::new(NoopHandler), Arc::new(NoopChecker));
        assert!(registry.submission_handler(ProviderId::EFactura).is_ok());
        assert!(registry.status_checker(ProviderId::EFactura).is_ok());
    }

    #[tokio::test]
    async fn static_credentials_fall_back_to_wildcard() {
        let resolver = StaticCredentials::new()
            .with("*", ProviderId::EFactura, HashMap::from([("token".into(), "t-global".into())]))
            .with(
                "RO1",
                ProviderId::EFactura,
                HashMap::from([("token".into(), "t-ro1".into())]),
            );

        let specific = resolver.resolve("RO1", ProviderId::EFactura).await.unwrap().unwrap();
        assert_eq!(specific["token"], "t-ro1");

        let fallback = resolver.resolve("DE9", ProviderId::EFactura).await.unwrap().unwrap();
        assert_eq!(fallback["token"], "t-global");

        assert!(resolver
            .resolve("DE9", ProviderId::XRechnung)
            .await
            .unwrap()
            .is_none());
    }
}
