//! German XRechnung provider (ZRE, Zentraler Rechnungseingang des Bundes).
//!
//! ZRE uses OAuth2 client credentials. Organizations without a configured
//! client pair still get their XML generated and stored for manual upload;
//! such submissions carry no external id and are settled by the poller's
//! shortcut instead of an API probe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::core::{EngineError, EngineResult};
use crate::models::{EInvoiceSubmission, InvoiceRecord, ProviderId, SubmissionStatus};
use crate::providers::{CheckDisposition, CredentialsResolver, StatusChecker, SubmissionHandler};
use crate::ratelimit::RateLimitGuard;
use crate::storage::{xml_object_key, ObjectStore};
use crate::store::InvoiceStore;
use crate::xml;

const CONTENT_TYPE_XML: &str = "application/xml";

/// ZRE's processing state for one submitted invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZreStatus {
    Delivered,
    Rejected { message: String },
    Processing,
}

pub struct XRechnungClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<dyn RateLimitGuard>,
}

impl XRechnungClient {
    pub fn new(base_url: impl Into<String>, limiter: Arc<dyn RateLimitGuard>) -> Self {
        XRechnungClient {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            limiter,
        }
    }

    /// OAuth2 client-credentials grant; returns the bearer token.
    async fn authenticate(&self, client_id: &str, client_secret: &str) -> EngineResult<String> {
        let response = self
            .http
            .post(format!("{}/auth/token", self.base_url))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;

        let body: serde_json::Value = response.json().await?;
        body.get("access_token")
            .and_then(|t| t.as_str())
            .map(String::from)
            .ok_or_else(|| {
                EngineError::Transport(format!(
                    "ZRE authentication failed: {}",
                    body.get("error_description")
                        .or_else(|| body.get("error"))
                        .and_then(|e| e.as_str())
                        .unwrap_or("unknown error")
                ))
            })
    }

    /// Submit an XRechnung document; returns the ZRE invoice id.
    pub async fn submit(
        &self,
        xml: &[u8],
        credentials: &HashMap<String, String>,
    ) -> EngineResult<String> {
        self.limiter.acquire(ProviderId::XRechnung).await?;

        let token = self
            .authenticate(
                credentials.get("client_id").map(String::as_str).unwrap_or(""),
                credentials
                    .get("client_secret")
                    .map(String::as_str)
                    .unwrap_or(""),
            )
            .await?;

        let response = self
            .http
            .post(format!("{}/invoices", self.base_url))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_XML)
            .header(reqwest::header::ACCEPT, "application/json")
            .body(xml.to_vec())
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);

        if status.is_success() {
            body.get("id")
                .or_else(|| body.get("invoiceId"))
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| {
                    EngineError::Transport("ZRE accepted the upload without an id".into())
                })
        } else {
            Err(EngineError::Transport(format!(
                "ZRE API: {}",
                body.get("message")
                    .or_else(|| body.get("error"))
                    .and_then(|v| v.as_str())
                    .unwrap_or(status.as_str())
            )))
        }
    }

    pub async fn check_status(
        &self,
        external_id: &str,
        credentials: &HashMap<String, String>,
    ) -> EngineResult<ZreStatus> {
        self.limiter.acquire(ProviderId::XRechnung).await?;

        let token = self
            .authenticate(
                credentials.get("client_id").map(String::as_str).unwrap_or(""),
                credentials
                    .get("client_secret")
                    .map(String::as_str)
                    .unwrap_or(""),
            )
            .await?;

        let response = self
            .http
            .get(format!("{}/invoices/{}/status", self.base_url, external_id))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Transport(format!(
                "status check returned HTTP {status}"
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let zre_status = body
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_ascii_lowercase();

        Ok(match zre_status.as_str() {
            "delivered" | "accepted" => ZreStatus::Delivered,
            "rejected" => ZreStatus::Rejected {
                message: body
                    .get("rejectionReason")
                    .or_else(|| body.get("errorMessage"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("rejected by ZRE")
                    .to_string(),
            },
            _ => ZreStatus::Processing,
        })
    }
}

pub struct XRechnungSubmissionHandler {
    client: Arc<XRechnungClient>,
    storage: Arc<dyn ObjectStore>,
    credentials: Arc<dyn CredentialsResolver>,
}

impl XRechnungSubmissionHandler {
    pub fn new(
        client: Arc<XRechnungClient>,
        storage: Arc<dyn ObjectStore>,
        credentials: Arc<dyn CredentialsResolver>,
    ) -> Self {
        XRechnungSubmissionHandler {
            client,
            storage,
            credentials,
        }
    }
}

#[async_trait]
impl SubmissionHandler for XRechnungSubmissionHandler {
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

        let bytes = xml::serialize(&invoice.document)?;

        let key = xml_object_key(&invoice.organization_id, invoice.document.issue_date, invoice.id);
        self.storage.put(&key, bytes.clone(), CONTENT_TYPE_XML).await?;
        submission.xml_path = Some(key);

        let credentials = self
            .credentials
            .resolve(&invoice.organization_id, ProviderId::XRechnung)
            .await?;

        let has_client_pair = credentials
            .as_ref()
            .map(|c| c.contains_key("client_id") && c.contains_key("client_secret"))
            .unwrap_or(false);

        if !has_client_pair {
            // XML-only flow: no API call is made and no external id exists;
            // the first status poll settles the submission.
            submission.put_metadata(
                "note",
                serde_json::json!(
                    "XML generated. No ZRE API credentials configured — upload manually."
                ),
            );
            submission.put_metadata(
                "xml_generated_at",
                serde_json::json!(chrono::Utc::now().to_rfc3339()),
            );
            tracing::info!(
                invoice_id = %invoice.id,
                submission_id = %submission.id,
                "XRechnung XML stored, no credentials, skipping API submission"
            );
            return Ok(());
        }

        let credentials = credentials.unwrap_or_default();
        let external_id = self.client.submit(&bytes, &credentials).await?;

        submission.external_id = Some(external_id.clone());
        submission.transition(SubmissionStatus::Accepted);
        submission.put_metadata("zre_invoice_id", serde_json::json!(external_id));
        submission.put_metadata(
            "submitted_at",
            serde_json::json!(chrono::Utc::now().to_rfc3339()),
        );

        Ok(())
    }
}

pub struct XRechnungStatusChecker {
    client: Arc<XRechnungClient>,
    invoices: Arc<dyn InvoiceStore>,
    credentials: Arc<dyn CredentialsResolver>,
}

impl XRechnungStatusChecker {
    const DELAY_SCHEDULE_SECS: [u64; 3] = [600, 1_800, 3_600];

    pub fn new(
        client: Arc<XRechnungClient>,
        invoices: Arc<dyn InvoiceStore>,
        credentials: Arc<dyn CredentialsResolver>,
    ) -> Self {
        XRechnungStatusChecker {
            client,
            invoices,
            credentials,
        }
    }

    fn next_delay(attempt: u32) -> Duration {
        let base = Self::DELAY_SCHEDULE_SECS
            [usize::min(attempt as usize, Self::DELAY_SCHEDULE_SECS.len() - 1)];
        let jitter = rand::thread_rng().gen_range(0..30);
        Duration::from_secs(base + jitter)
    }
}

#[async_trait]
impl StatusChecker for XRechnungStatusChecker {
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

        let external_id = submission.external_id.clone().ok_or_else(|| {
            EngineError::Validation("status check requires an external id".into())
        })?;

        let credentials = self
            .credentials
            .resolve(&invoice.organization_id, ProviderId::XRechnung)
            .await?
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "no ZRE credentials configured for organization {}",
                    invoice.organization_id
                ))
            })?;

        let status = self.client.check_status(&external_id, &credentials).await?;
        submission.put_metadata(
            "last_checked_at",
            serde_json::json!(chrono::Utc::now().to_rfc3339()),
        );

        match status {
            ZreStatus::Delivered => {
                submission.transition(SubmissionStatus::Validated);
                crate::metrics::STATUS_CHECKS_TOTAL
                    .with_label_values(&[ProviderId::XRechnung.as_str(), "validated"])
                    .inc();
                Ok(CheckDisposition::Settled)
            }
            ZreStatus::Rejected { message } => {
                if submission.transition(SubmissionStatus::Rejected) {
                    submission.error_message = Some(message);
                }
                crate::metrics::STATUS_CHECKS_TOTAL
                    .with_label_values(&[ProviderId::XRechnung.as_str(), "rejected"])
                    .inc();
                Ok(CheckDisposition::Settled)
            }
            ZreStatus::Processing => {
                crate::metrics::STATUS_CHECKS_TOTAL
                    .with_label_values(&[ProviderId::XRechnung.as_str(), "in_progress"])
                    .inc();
                Ok(CheckDisposition::Reschedule {
                    delay: Self::next_delay(attempt),
                })
            }
        }
    }
}
