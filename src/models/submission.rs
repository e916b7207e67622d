use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::InvoiceDocument;

/// Supported e-invoicing authorities. One tag per external system; the
/// string form is the registry key and the persisted column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// Romanian ANAF e-Factura.
    EFactura,
    /// German XRechnung via the ZRE portal.
    XRechnung,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::EFactura => "efactura",
            ProviderId::XRechnung => "xrechnung",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "efactura" => Some(ProviderId::EFactura),
            "xrechnung" => Some(ProviderId::XRechnung),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one submission.
///
/// `Pending -> Accepted -> Validated | Rejected`, with `Error` reachable
/// from any non-terminal state. Terminal states never transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Created, provider not yet (successfully) called.
    Pending,
    /// Provider acknowledged receipt; awaiting authority validation.
    Accepted,
    /// Authority validated the document. Terminal.
    Validated,
    /// Authority rejected the document's content. Terminal, and a legitimate
    /// business outcome rather than an operational failure.
    Rejected,
    /// Operational failure: attempts exhausted, unrecoverable exception, or
    /// an explicit provider error. Terminal.
    Error,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Validated | SubmissionStatus::Rejected | SubmissionStatus::Error
        )
    }

    /// Ordering used by the monotonicity guard. Transitions never decrease
    /// rank, so a stale duplicate poll can never resurrect a submission.
    pub fn rank(&self) -> u8 {
        match self {
            SubmissionStatus::Pending => 0,
            SubmissionStatus::Accepted => 1,
            SubmissionStatus::Validated | SubmissionStatus::Rejected | SubmissionStatus::Error => 2,
        }
    }

    pub fn can_transition(self, next: SubmissionStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::Validated => "validated",
            SubmissionStatus::Rejected => "rejected",
            SubmissionStatus::Error => "error",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SubmissionStatus::Pending),
            "accepted" => Some(SubmissionStatus::Accepted),
            "validated" => Some(SubmissionStatus::Validated),
            "rejected" => Some(SubmissionStatus::Rejected),
            "error" => Some(SubmissionStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tracked attempt to deliver one invoice's document to one provider.
///
/// Created `Pending` at submission time, mutated only by the submission
/// orchestrator and the status poller, never deleted; a resubmission
/// creates a new record instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EInvoiceSubmission {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub provider: ProviderId,
    pub status: SubmissionStatus,
    /// Identifier assigned by the external authority. `None` means no API
    /// call was made (XML-only flow) and there is nothing to poll.
    pub external_id: Option<String>,
    pub error_message: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Object-storage key of the generated XML.
    pub xml_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EInvoiceSubmission {
    pub fn new(invoice_id: Uuid, provider: ProviderId) -> Self {
        let now = Utc::now();
        EInvoiceSubmission {
            id: Uuid::new_v4(),
            invoice_id,
            provider,
            status: SubmissionStatus::Pending,
            external_id: None,
            error_message: None,
            metadata: HashMap::new(),
            xml_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status transition if the monotonic guard allows it. Returns
    /// whether the status actually changed.
    pub fn transition(&mut self, next: SubmissionStatus) -> bool {
        if !self.status.can_transition(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.transition(SubmissionStatus::Error) {
            self.error_message = Some(message.into());
        }
    }

    pub fn put_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
        self.updated_at = Utc::now();
    }
}

/// Invoice lifecycle as the owning platform tracks it. Only `Issued` and
/// `SentToProvider` invoices are eligible for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    Draft,
    Issued,
    SentToProvider,
    Validated,
    Rejected,
}

impl InvoiceState {
    pub fn is_submittable(&self) -> bool {
        matches!(self, InvoiceState::Issued | InvoiceState::SentToProvider)
    }
}

/// The slice of an invoice the engine needs: identity, owning organization,
/// lifecycle state, and the document to serialize. Loaded through the
/// invoice store boundary; the engine never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub organization_id: String,
    pub number: String,
    pub state: InvoiceState,
    pub document: InvoiceDocument,
}
