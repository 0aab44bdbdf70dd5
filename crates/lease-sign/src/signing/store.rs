use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::domain::{AgreementId, AgreementRecord};

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("agreement already exists")]
    Conflict,
    #[error("agreement not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction for agreements. Each agreement is an independently
/// lockable resource: `lease` hands back the record's own mutex, and every
/// mutating coordinator operation holds it for the whole transition,
/// audit append included.
pub trait AgreementStore: Send + Sync {
    fn insert(&self, record: AgreementRecord) -> Result<(), StoreError>;
    fn lease(&self, id: &AgreementId) -> Result<Arc<Mutex<AgreementRecord>>, StoreError>;
    /// Ids of agreements that are not yet terminal, for the sweep.
    fn sweep_candidates(&self) -> Result<Vec<AgreementId>, StoreError>;
}

/// In-memory store used by the service and tests. A durable deployment
/// implements `AgreementStore` over its own backend.
#[derive(Default)]
pub struct InMemoryAgreementStore {
    records: Mutex<HashMap<AgreementId, Arc<Mutex<AgreementRecord>>>>,
}

impl InMemoryAgreementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AgreementStore for InMemoryAgreementStore {
    fn insert(&self, record: AgreementRecord) -> Result<(), StoreError> {
        let mut guard = self.records.lock().expect("agreement store mutex poisoned");
        if guard.contains_key(&record.id) {
            return Err(StoreError::Conflict);
        }
        guard.insert(record.id.clone(), Arc::new(Mutex::new(record)));
        Ok(())
    }

    fn lease(&self, id: &AgreementId) -> Result<Arc<Mutex<AgreementRecord>>, StoreError> {
        let guard = self.records.lock().expect("agreement store mutex poisoned");
        guard.get(id).cloned().ok_or(StoreError::NotFound)
    }

    fn sweep_candidates(&self) -> Result<Vec<AgreementId>, StoreError> {
        let guard = self.records.lock().expect("agreement store mutex poisoned");
        let mut ids: Vec<AgreementId> = guard
            .iter()
            .filter(|(_, cell)| {
                let record = cell.lock().expect("agreement mutex poisoned");
                !record.status.is_terminal()
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ids)
    }
}
