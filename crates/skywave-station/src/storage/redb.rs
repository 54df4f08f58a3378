//! redb-backed storage backend.
//!
//! Two tables: callsign -> PEM for the trust roster, path -> CBOR of
//! `(meta, blob)` for cached pages.

use std::collections::BTreeMap;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use super::{PageCache, PageMeta, TrustedKeyStore};
use crate::error::StorageError;

const TRUST_TABLE: TableDefinition<&str, &str> = TableDefinition::new("trusted_keys");
const PAGE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pages");

#[derive(Serialize, Deserialize)]
struct StoredPage {
    meta: PageMeta,
    blob: Vec<u8>,
}

/// Persistent store backed by a single redb file.
pub struct RedbStorage {
    db: Database,
}

fn backend(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

impl RedbStorage {
    /// Open (or create) the database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(backend)?;
        // Make sure both tables exist so first reads see empty tables
        // rather than missing ones.
        let tx = db.begin_write().map_err(backend)?;
        {
            tx.open_table(TRUST_TABLE).map_err(backend)?;
            tx.open_table(PAGE_TABLE).map_err(backend)?;
        }
        tx.commit().map_err(backend)?;
        Ok(Self { db })
    }
}

impl TrustedKeyStore for RedbStorage {
    fn put(&self, callsign: &str, pem: &str) -> Result<(), StorageError> {
        let tx = self.db.begin_write().map_err(backend)?;
        {
            let mut table = tx.open_table(TRUST_TABLE).map_err(backend)?;
            table.insert(callsign, pem).map_err(backend)?;
        }
        tx.commit().map_err(backend)?;
        Ok(())
    }

    fn get(&self, callsign: &str) -> Result<Option<String>, StorageError> {
        let tx = self.db.begin_read().map_err(backend)?;
        let table = tx.open_table(TRUST_TABLE).map_err(backend)?;
        let value = table.get(callsign).map_err(backend)?;
        Ok(value.map(|v| v.value().to_string()))
    }

    fn list(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let tx = self.db.begin_read().map_err(backend)?;
        let table = tx.open_table(TRUST_TABLE).map_err(backend)?;
        let mut out = BTreeMap::new();
        for item in table.iter().map_err(backend)? {
            let (key, value) = item.map_err(backend)?;
            out.insert(key.value().to_string(), value.value().to_string());
        }
        Ok(out)
    }
}

impl PageCache for RedbStorage {
    fn put(&self, path: &str, blob: &[u8], meta: &PageMeta) -> Result<(), StorageError> {
        let stored = StoredPage { meta: meta.clone(), blob: blob.to_vec() };
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&stored, &mut bytes)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        let tx = self.db.begin_write().map_err(backend)?;
        {
            let mut table = tx.open_table(PAGE_TABLE).map_err(backend)?;
            table.insert(path, bytes.as_slice()).map_err(backend)?;
        }
        tx.commit().map_err(backend)?;
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<(Vec<u8>, PageMeta)>, StorageError> {
        let tx = self.db.begin_read().map_err(backend)?;
        let table = tx.open_table(PAGE_TABLE).map_err(backend)?;
        let Some(value) = table.get(path).map_err(backend)? else {
            return Ok(None);
        };
        let stored: StoredPage = ciborium::de::from_reader(value.value())
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        Ok(Some((stored.blob, stored.meta)))
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let tx = self.db.begin_read().map_err(backend)?;
        let table = tx.open_table(PAGE_TABLE).map_err(backend)?;
        let mut out = Vec::new();
        for item in table.iter().map_err(backend)? {
            let (key, _) = item.map_err(backend)?;
            out.push(key.value().to_string());
        }
        Ok(out)
    }
}
