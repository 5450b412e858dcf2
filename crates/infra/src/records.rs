//! Lead records: the recipient collection bulk jobs select from.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use serde_json::{Map, Value};

use forgecrm_core::RecipientId;

/// One lead as seen by the bulk subsystem: an id, an optional address and
/// every other field as free-form JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadRecord {
    pub id: RecipientId,
    pub email: Option<String>,
    /// All fields, including `name` and the email field(s).
    pub fields: Map<String, Value>,
}

impl LeadRecord {
    /// Build from a JSON object. The id comes from `name` (or `id`), the
    /// address from `email` (or `email_id`).
    pub fn from_json(value: Value) -> Result<Self, RecordStoreError> {
        let Value::Object(mut fields) = value else {
            return Err(RecordStoreError::Invalid("lead record must be a JSON object".to_string()));
        };

        let raw_id = ["name", "id"]
            .iter()
            .find_map(|k| fields.get(*k).and_then(Value::as_str))
            .ok_or_else(|| RecordStoreError::Invalid("lead record has no name".to_string()))?;
        let id = RecipientId::new(raw_id).map_err(|e| RecordStoreError::Invalid(e.to_string()))?;

        let email = ["email", "email_id"]
            .iter()
            .find_map(|k| fields.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string);

        fields
            .entry("name")
            .or_insert_with(|| Value::String(id.as_str().to_string()));

        Ok(Self { id, email, fields })
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordStoreError {
    #[error("invalid lead record: {0}")]
    Invalid(String),
    #[error("record store unavailable: {0}")]
    Storage(String),
}

/// Read access to lead records.
pub trait RecordStore: Send + Sync {
    fn get(&self, id: &RecipientId) -> Result<Option<LeadRecord>, RecordStoreError>;

    /// Every record, in natural (id) order.
    fn list(&self) -> Result<Vec<LeadRecord>, RecordStoreError>;
}

impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    fn get(&self, id: &RecipientId) -> Result<Option<LeadRecord>, RecordStoreError> {
        (**self).get(id)
    }

    fn list(&self) -> Result<Vec<LeadRecord>, RecordStoreError> {
        (**self).list()
    }
}

/// In-memory record store for tests/dev, ordered by id.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    inner: RwLock<BTreeMap<RecipientId, LeadRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, record: LeadRecord) -> Result<(), RecordStoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| RecordStoreError::Storage("lock poisoned".to_string()))?;
        map.insert(record.id.clone(), record);
        Ok(())
    }

    /// Seed from a JSON array of lead objects.
    pub fn from_json(value: Value) -> Result<Self, RecordStoreError> {
        let Value::Array(items) = value else {
            return Err(RecordStoreError::Invalid("lead seed must be a JSON array".to_string()));
        };
        let store = Self::new();
        for item in items {
            store.upsert(LeadRecord::from_json(item)?)?;
        }
        Ok(store)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading lead seed {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing lead seed {}", path.display()))?;
        Ok(Self::from_json(value)?)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for InMemoryRecordStore {
    fn get(&self, id: &RecipientId) -> Result<Option<LeadRecord>, RecordStoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| RecordStoreError::Storage("lock poisoned".to_string()))?;
        Ok(map.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<LeadRecord>, RecordStoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| RecordStoreError::Storage("lock poisoned".to_string()))?;
        Ok(map.values().cloned().collect())
    }
}
