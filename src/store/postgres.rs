use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::core::{EngineError, EngineResult};
use crate::models::{
    EInvoiceSubmission, InvoiceDocument, InvoiceRecord, InvoiceState, ProviderId, SubmissionStatus,
};

use super::{InvoiceStore, SubmissionStore};

const TERMINAL_STATUSES: &str = "('validated', 'rejected', 'error')";

/// Postgres-backed store. Queries are runtime-bound; the schema is owned by
/// the surrounding platform's migrations.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        Ok(PgStore {
            pool: PgPool::connect(database_url).await?,
        })
    }
}

fn submission_from_row(row: &PgRow) -> EngineResult<EInvoiceSubmission> {
    let provider_key: String = row.try_get("provider")?;
    let provider = ProviderId::from_key(&provider_key)
        .ok_or_else(|| EngineError::Persistence(format!("unknown provider '{provider_key}'")))?;

    let status_key: String = row.try_get("status")?;
    let status = SubmissionStatus::from_str(&status_key)
        .ok_or_else(|| EngineError::Persistence(format!("unknown status '{status_key}'")))?;

    let metadata: serde_json::Value = row.try_get("metadata")?;
    let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata)
        .map_err(|e| EngineError::Persistence(format!("metadata decode: {e}")))?;

    Ok(EInvoiceSubmission {
        id: row.try_get("id")?,
        invoice_id: row.try_get("invoice_id")?,
        provider,
        status,
        external_id: row.try_get("external_id")?,
        error_message: row.try_get("error_message")?,
        metadata,
        xml_path: row.try_get("xml_path")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl SubmissionStore for PgStore {
    async fn insert(&self, submission: &EInvoiceSubmission) -> EngineResult<()> {
        let metadata = serde_json::to_value(&submission.metadata)
            .map_err(|e| EngineError::Persistence(format!("metadata encode: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO einvoice_submissions
                (id, invoice_id, provider, status, external_id, error_message,
                 metadata, xml_path, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(submission.id)
        .bind(submission.invoice_id)
        .bind(submission.provider.as_str())
        .bind(submission.status.as_str())
        .bind(&submission.external_id)
        .bind(&submission.error_message)
        .bind(metadata)
        .bind(&submission.xml_path)
        .bind(submission.created_at)
        .bind(submission.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, id: Uuid) -> EngineResult<Option<EInvoiceSubmission>> {
        let row = sqlx::query("SELECT * FROM einvoice_submissions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(submission_from_row).transpose()
    }

    async fn find_active(
        &self,
        invoice_id: Uuid,
        provider: ProviderId,
    ) -> EngineResult<Option<EInvoiceSubmission>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT * FROM einvoice_submissions
            WHERE invoice_id = $1 AND provider = $2 AND status NOT IN {TERMINAL_STATUSES}
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        ))
        .bind(invoice_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(submission_from_row).transpose()
    }

    async fn update(&self, submission: &EInvoiceSubmission) -> EngineResult<()> {
        let metadata = serde_json::to_value(&submission.metadata)
            .map_err(|e| EngineError::Persistence(format!("metadata encode: {e}")))?;

        // Monotonic guard in SQL: never touch a terminal row, never move a
        // row to a lower-ranked status. A refused write is a no-op, matching
        // the idempotent-terminal-poll contract.
        sqlx::query(&format!(
            r#"
            UPDATE einvoice_submissions
            SET status = $2, external_id = $3, error_message = $4,
                metadata = $5, xml_path = $6, updated_at = $7
            WHERE id = $1
              AND status NOT IN {TERMINAL_STATUSES}
              AND (CASE status WHEN 'pending' THEN 0 WHEN 'accepted' THEN 1 ELSE 2 END) <= $8
            "#,
        ))
        .bind(submission.id)
        .bind(submission.status.as_str())
        .bind(&submission.external_id)
        .bind(&submission.error_message)
        .bind(metadata)
        .bind(&submission.xml_path)
        .bind(submission.updated_at)
        .bind(submission.status.rank() as i16)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl InvoiceStore for PgStore {
    async fn find_invoice(&self, id: Uuid) -> EngineResult<Option<InvoiceRecord>> {
        let row = sqlx::query(
            "SELECT id, organization_id, number, state, document FROM invoices WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let state_key: String = row.try_get("state")?;
        let state: InvoiceState =
            serde_json::from_value(serde_json::Value::String(state_key.clone()))
                .map_err(|_| EngineError::Persistence(format!("unknown invoice state '{state_key}'")))?;

        let document: serde_json::Value = row.try_get("document")?;
        let document: InvoiceDocument = serde_json::from_value(document)
            .map_err(|e| EngineError::Persistence(format!("document decode: {e}")))?;

        Ok(Some(InvoiceRecord {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            number: row.try_get("number")?,
            state,
            document,
        }))
    }
}
