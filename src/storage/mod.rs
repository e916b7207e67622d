pub mod s3;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use uuid::Uuid;

use crate::core::{EngineError, EngineResult};

/// Durable object storage for generated XML. The engine writes exactly one
/// object per submission; reads are for audit and manual download.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> EngineResult<()>;
    async fn get(&self, key: &str) -> EngineResult<Vec<u8>>;
}

/// Storage key for a generated document: `{org}/{year}/{month}/{invoice}.xml`.
pub fn xml_object_key(organization_id: &str, issue_date: NaiveDate, invoice_id: Uuid) -> String {
    format!(
        "{}/{}/{:02}/{}.xml",
        organization_id,
        issue_date.year(),
        issue_date.month(),
        invoice_id
    )
}

/// In-memory store for tests and local runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> EngineResult<()> {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> EngineResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::Storage(format!("object {key} not found")))
    }
}
