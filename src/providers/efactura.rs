//! Romanian ANAF e-Factura provider.
//!
//! Upload is a single POST of the UBL XML; processing is asynchronous and
//! the upload id is polled via the message-state endpoint until the
//! authority reports `ok` or `nok`. Both endpoints are rate limited by
//! published ANAF quotas, consulted through the engine's guard.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use rand::Rng;

use crate::core::{EngineError, EngineResult};
use crate::models::{EInvoiceSubmission, InvoiceRecord, ProviderId, SubmissionStatus};
use crate::providers::{CheckDisposition, CredentialsResolver, StatusChecker, SubmissionHandler};
use crate::ratelimit::RateLimitGuard;
use crate::storage::{xml_object_key, ObjectStore};
use crate::store::InvoiceStore;
use crate::xml;

const CONTENT_TYPE_XML: &str = "application/xml";

/// Authority's answer to an upload request.
#[derive(Debug, Clone)]
pub struct UploadResponse {
    pub upload_id: Option<String>,
    pub error: Option<String>,
}

/// Authority's answer to a message-state probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Validated { download_id: Option<String> },
    Rejected { message: String },
    InProgress,
}

/// HTTP client for the e-Factura REST endpoints.
pub struct EFacturaClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<dyn RateLimitGuard>,
}

impl EFacturaClient {
    pub fn new(base_url: impl Into<String>, limiter: Arc<dyn RateLimitGuard>) -> Self {
        EFacturaClient {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            limiter,
        }
    }

    /// Upload a UBL document for the given taxpayer id.
    pub async fn upload(
        &self,
        xml: &[u8],
        taxpayer_id: &str,
        token: &str,
    ) -> EngineResult<UploadResponse> {
        self.limiter.acquire(ProviderId::EFactura).await?;

        let response = self
            .http
            .post(format!("{}/upload", self.base_url))
            .query(&[("standard", "UBL"), ("cif", taxpayer_id)])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(xml.to_vec())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(EngineError::Transport(format!(
                "upload returned HTTP {status}: {body}"
            )));
        }

        let attrs = collect_attributes(&body)?;
        if attrs.get("ExecutionStatus").map(String::as_str) == Some("0") {
            Ok(UploadResponse {
                upload_id: attrs.get("index_incarcare").cloned(),
                error: None,
            })
        } else {
            Ok(UploadResponse {
                upload_id: None,
                error: Some(
                    attrs
                        .get("errorMessage")
                        .cloned()
                        .unwrap_or_else(|| "upload refused without an error message".to_string()),
                ),
            })
        }
    }

    /// One non-blocking probe of a previously uploaded document.
    pub async fn check_status(&self, upload_id: &str, token: &str) -> EngineResult<DeliveryStatus> {
        self.limiter.acquire(ProviderId::EFactura).await?;

        let response = self
            .http
            .get(format!("{}/stareMesaj", self.base_url))
            .query(&[("id_incarcare", upload_id)])
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(EngineError::Transport(format!(
                "status check returned HTTP {status}: {body}"
            )));
        }

        let attrs = collect_attributes(&body)?;
        match attrs.get("stare").map(String::as_str) {
            Some("ok") => Ok(DeliveryStatus::Validated {
                download_id: attrs.get("id_descarcare").cloned(),
            }),
            Some("nok") => Ok(DeliveryStatus::Rejected {
                message: attrs
                    .get("errorMessage")
                    .cloned()
                    .unwrap_or_else(|| "document rejected by the authority".to_string()),
            }),
            Some(_) => Ok(DeliveryStatus::InProgress),
            None => Err(EngineError::Transport(format!(
                "status response missing 'stare': {body}"
            ))),
        }
    }
}

/// Flatten the authority's XML envelope into its attributes, first
/// occurrence wins. The envelope is a single `header` element, with an
/// optional `Errors` child carrying `errorMessage`.
fn collect_attributes(body: &str) -> EngineResult<HashMap<String, String>> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);
    let mut attrs = HashMap::new();

    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Start(e) | Event::Empty(e) => {
                for attr in e.attributes() {
                    let attr =
                        attr.map_err(|err| EngineError::Transport(format!("bad attribute: {err}")))?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .unescape_value()
                        .map_err(|err| EngineError::Transport(format!("bad attribute: {err}")))?
                        .into_owned();
                    attrs.entry(key).or_insert(value);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(attrs)
}

/// Submission side of the provider pair.
pub struct EFacturaSubmissionHandler {
    client: Arc<EFacturaClient>,
    storage: Arc<dyn ObjectStore>,
    credentials: Arc<dyn CredentialsResolver>,
}

impl EFacturaSubmissionHandler {
    pub fn new(
        client: Arc<EFacturaClient>,
        storage: Arc<dyn ObjectStore>,
        credentials: Arc<dyn CredentialsResolver>,
    ) -> Self {
        EFacturaSubmissionHandler {
            client,
            storage,
            credentials,
        }
    }
}

#[async_trait]
impl SubmissionHandler for EFacturaSubmissionHandler {
    async fn handle(
        &self,
        invoice: &InvoiceRecord,
        submission: &mut EInvoiceSubmission,
    ) -> EngineResult<()> {
        if !invoice.state.is_submittable() {
            return Err(EngineError::Validation(format!(
                "invoice {} is not in a submittable state",
                invoice.number
            )));
        }

        // Serialize validates the document and fails before any side effect.
        let bytes = xml::serialize(&invoice.document)?;

        let key = xml_object_key(&invoice.organization_id, invoice.document.issue_date, invoice.id);
        self.storage.put(&key, bytes.clone(), CONTENT_TYPE_XML).await?;
        submission.xml_path = Some(key);

        let credentials = self
            .credentials
            .resolve(&invoice.organization_id, ProviderId::EFactura)
            .await?;
        let token = credentials
            .as_ref()
            .and_then(|c| c.get("token"))
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "no e-Factura token configured for organization {}",
                    invoice.organization_id
                ))
            })?;

        let response = self
            .client
            .upload(&bytes, &invoice.organization_id, token)
            .await?;

        match response.upload_id {
            Some(upload_id) => {
                submission.external_id = Some(upload_id.clone());
                submission.transition(SubmissionStatus::Accepted);
                submission.put_metadata("upload_id", serde_json::json!(upload_id));
                submission.put_metadata(
                    "submitted_at",
                    serde_json::json!(chrono::Utc::now().to_rfc3339()),
                );
                tracing::info!(
                    invoice_id = %invoice.id,
                    submission_id = %submission.id,
                    "invoice uploaded to e-Factura"
                );
            }
            None => {
                submission.record_error(
                    response
                        .error
                        .unwrap_or_else(|| "upload refused".to_string()),
                );
            }
        }

        Ok(())
    }
}

/// Polling side of the provider pair.
pub struct EFacturaStatusChecker {
    client: Arc<EFacturaClient>,
    invoices: Arc<dyn InvoiceStore>,
    credentials: Arc<dyn CredentialsResolver>,
}

impl EFacturaStatusChecker {
    /// Delay before the next probe, by attempt index. The authority
    /// validates most documents within minutes but can take hours under
    /// load, so the schedule stretches accordingly.
    const DELAY_SCHEDULE_SECS: [u64; 5] = [300, 900, 1_800, 3_600, 7_200];

    pub fn new(
        client: Arc<EFacturaClient>,
        invoices: Arc<dyn InvoiceStore>,
        credentials: Arc<dyn CredentialsResolver>,
    ) -> Self {
        EFacturaStatusChecker {
            client,
            invoices,
            credentials,
        }
    }

    fn next_delay(attempt: u32) -> Duration {
        let base = Self::DELAY_SCHEDULE_SECS
            [usize::min(attempt as usize, Self::DELAY_SCHEDULE_SECS.len() - 1)];
        // Jitter keeps a burst of submissions from polling in lockstep.
        let jitter = rand::thread_rng().gen_range(0..30);
        Duration::from_secs(base + jitter)
    }
}

#[async_trait]
impl StatusChecker for EFacturaStatusChecker {
    async fn check(
        &self,
        submission: &mut EInvoiceSubmission,
        attempt: u32,
    ) -> EngineResult<CheckDisposition> {
        let invoice = self
            .invoices
            .find_invoice(submission.invoice_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "invoice",
                id: submission.invoice_id.to_string(),
            })?;

        let upload_id = submission.external_id.clone().ok_or_else(|| {
            EngineError::Validation("status check requires an external id".into())
        })?;

        let credentials = self
            .credentials
            .resolve(&invoice.organization_id, ProviderId::EFactura)
            .await?;
        let token = credentials
            .as_ref()
            .and_then(|c| c.get("token"))
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "no e-Factura token configured for organization {}",
                    invoice.organization_id
                ))
            })?;

        let status = self.client.check_status(&upload_id, token).await?;
        submission.put_metadata(
            "last_checked_at",
            serde_json::json!(chrono::Utc::now().to_rfc3339()),
        );

        match status {
            DeliveryStatus::Validated { download_id } => {
                submission.transition(SubmissionStatus::Validated);
                if let Some(download_id) = download_id {
                    submission.put_metadata("download_id", serde_json::json!(download_id));
                }
                crate::metrics::STATUS_CHECKS_TOTAL
                    .with_label_values(&[ProviderId::EFactura.as_str(), "validated"])
                    .inc();
                Ok(CheckDisposition::Settled)
            }
            DeliveryStatus::Rejected { message } => {
                if submission.transition(SubmissionStatus::Rejected) {
                    submission.error_message = Some(message);
                }
                crate::metrics::STATUS_CHECKS_TOTAL
                    .with_label_values(&[ProviderId::EFactura.as_str(), "rejected"])
                    .inc();
                Ok(CheckDisposition::Settled)
            }
            DeliveryStatus::InProgress => {
                crate::metrics::STATUS_CHECKS_TOTAL
                    .with_label_values(&[ProviderId::EFactura.as_str(), "in_progress"])
                    .inc();
                Ok(CheckDisposition::Reschedule {
                    delay: Self::next_delay(attempt),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubmissionStatus;
    use crate::providers::StaticCredentials;
    use crate::ratelimit::UnlimitedGuard;
    use crate::storage::MemoryObjectStore;
    use crate::store::MemoryStore;
    use crate::testutil::sample_invoice;
    use httpmock::prelude::*;

    fn credentials() -> Arc<StaticCredentials> {
        Arc::new(StaticCredentials::new().with(
            "*",
            ProviderId::EFactura,
            HashMap::from([("token".to_string(), "tok-1".to_string())]),
        ))
    }

    fn client(server: &MockServer) -> Arc<EFacturaClient> {
        Arc::new(EFacturaClient::new(server.base_url(), Arc::new(UnlimitedGuard)))
    }

    #[tokio::test]
    async fn successful_upload_stores_xml_and_accepts_submission() {
        let server = MockServer::start();
        let upload = server.mock(|when, then| {
            when.method(POST)
                .path("/upload")
                .query_param("standard", "UBL")
                .header("authorization", "Bearer tok-1");
            then.status(200)
                .body(r#"<header ExecutionStatus="0" index_incarcare="5001"/>"#);
        });

        let storage = Arc::new(MemoryObjectStore::new());
        let handler =
            EFacturaSubmissionHandler::new(client(&server), storage.clone(), credentials());

        let invoice = sample_invoice();
        let mut submission = EInvoiceSubmission::new(invoice.id, ProviderId::EFactura);
        handler.handle(&invoice, &mut submission).await.unwrap();

        upload.assert();
        assert_eq!(submission.status, SubmissionStatus::Accepted);
        assert_eq!(submission.external_id.as_deref(), Some("5001"));
        assert!(storage.contains(submission.xml_path.as_deref().unwrap()));
        assert!(submission.metadata.contains_key("submitted_at"));
    }

    #[tokio::test]
    async fn refused_upload_marks_submission_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/upload");
            then.status(200).body(
                r#"<header ExecutionStatus="1"><Errors errorMessage="CIF invalid"/></header>"#,
            );
        });

        let handler = EFacturaSubmissionHandler::new(
            client(&server),
            Arc::new(MemoryObjectStore::new()),
            credentials(),
        );

        let invoice = sample_invoice();
        let mut submission = EInvoiceSubmission::new(invoice.id, ProviderId::EFactura);
        handler.handle(&invoice, &mut submission).await.unwrap();

        assert_eq!(submission.status, SubmissionStatus::Error);
        assert_eq!(submission.error_message.as_deref(), Some("CIF invalid"));
    }

    #[tokio::test]
    async fn missing_token_is_a_config_error_before_any_call() {
        let server = MockServer::start();
        let handler = EFacturaSubmissionHandler::new(
            client(&server),
            Arc::new(MemoryObjectStore::new()),
            Arc::new(StaticCredentials::new()),
        );

        let invoice = sample_invoice();
        let mut submission = EInvoiceSubmission::new(invoice.id, ProviderId::EFactura);
        let err = handler.handle(&invoice, &mut submission).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn validated_status_settles_submission() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/stareMesaj")
                .query_param("id_incarcare", "5001");
            then.status(200)
                .body(r#"<header stare="ok" id_descarcare="9001"/>"#);
        });

        let store = Arc::new(MemoryStore::new());
        let invoice = sample_invoice();
        store.add_invoice(invoice.clone());

        let checker = EFacturaStatusChecker::new(client(&server), store, credentials());
        let mut submission = EInvoiceSubmission::new(invoice.id, ProviderId::EFactura);
        submission.external_id = Some("5001".into());
        submission.transition(SubmissionStatus::Accepted);

        let disposition = checker.check(&mut submission, 0).await.unwrap();
        assert_eq!(disposition, CheckDisposition::Settled);
        assert_eq!(submission.status, SubmissionStatus::Validated);
        assert_eq!(
            submission.metadata.get("download_id"),
            Some(&serde_json::json!("9001"))
        );
    }

    #[tokio::test]
    async fn rejected_status_is_a_business_outcome_not_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/stareMesaj");
            then.status(200)
                .body(r#"<header stare="nok" errorMessage="invalid VAT breakdown"/>"#);
        });

        let store = Arc::new(MemoryStore::new());
        let invoice = sample_invoice();
        store.add_invoice(invoice.clone());

        let checker = EFacturaStatusChecker::new(client(&server), store, credentials());
        let mut submission = EInvoiceSubmission::new(invoice.id, ProviderId::EFactura);
        submission.external_id = Some("5001".into());
        submission.transition(SubmissionStatus::Accepted);

        let disposition = checker.check(&mut submission, 2).await.unwrap();
        assert_eq!(disposition, CheckDisposition::Settled);
        assert_eq!(submission.status, SubmissionStatus::Rejected);
        assert_eq!(
            submission.error_message.as_deref(),
            Some("invalid VAT breakdown")
        );
    }

    #[tokio::test]
    async fn in_progress_requests_a_delayed_recheck() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/stareMesaj");
            then.status(200).body(r#"<header stare="in prelucrare"/>"#);
        });

        let store = Arc::new(MemoryStore::new());
        let invoice = sample_invoice();
        store.add_invoice(invoice.clone());

        let checker = EFacturaStatusChecker::new(client(&server), store, credentials());
        let mut submission = EInvoiceSubmission::new(invoice.id, ProviderId::EFactura);
        submission.external_id = Some("5001".into());
        submission.transition(SubmissionStatus::Accepted);

        match checker.check(&mut submission, 1).await.unwrap() {
            CheckDisposition::Reschedule { delay } => {
                assert!(delay >= Duration::from_secs(900));
                assert!(delay < Duration::from_secs(930 + 1));
            }
            other => panic!("expected reschedule, got {other:?}"),
        }
        assert_eq!(submission.status, SubmissionStatus::Accepted);
    }

    #[tokio::test]
    async fn vanished_invoice_is_reported_as_not_found() {
        let server = MockServer::start();
        let checker = EFacturaStatusChecker::new(
            client(&server),
            Arc::new(MemoryStore::new()),
            credentials(),
        );

        let mut submission =
            EInvoiceSubmission::new(uuid::Uuid::new_v4(), ProviderId::EFactura);
        submission.external_id = Some("5001".into());

        let err = checker.check(&mut submission, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn delay_schedule_caps_at_the_last_step() {
        let late = EFacturaStatusChecker::next_delay(40);
        assert!(late >= Duration::from_secs(7_200));
        assert!(late < Duration::from_secs(7_200 + 30));
    }
}
