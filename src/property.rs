use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Policy;
use crate::limits::*;
use crate::store::Store;

/// Manages per-property stores. Each property gets its own Store + WAL + compactor.
pub struct PropertyManager {
    stores: DashMap<String, Arc<Store>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    policy: Policy,
}

impl PropertyManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, policy: Policy) -> Self {
        Self {
            stores: DashMap::new(),
            data_dir,
            compact_threshold,
            policy,
        }
    }

    /// Get or lazily open the store for `property_id`.
    pub fn get_or_open(&self, property_id: &str) -> io::Result<Arc<Store>> {
        if let Some(store) = self.stores.get(property_id) {
            return Ok(store.value().clone());
        }
        if property_id.len() > MAX_PROPERTY_ID_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "property id too long"));
        }
        if self.stores.len() >= MAX_PROPERTIES {
            return Err(io::Error::other("too many properties"));
        }

        // The id names a file on disk; keep it to a safe alphabet.
        let file_stem: String = property_id
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if file_stem.is_empty() || file_stem != property_id {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "property id may only contain letters, digits, '_' and '-'",
            ));
        }

        // Two callers may race to open the same property; only one store may own the WAL.
        let entry = self.stores.entry(property_id.to_string());
        let store = match entry {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let wal_path = self.data_dir.join(format!("{file_stem}.wal"));
                let store = Arc::new(Store::open(wal_path, property_id, self.policy.clone())?);
                e.insert(store.clone());
                store
            }
        };

        let compactor_store = store.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_store, threshold).await;
        });

        metrics::gauge!(crate::observability::PROPERTIES_ACTIVE).set(self.stores.len() as f64);
        Ok(store)
    }
}
