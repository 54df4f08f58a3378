//! In-memory storage backend.

use std::{
    collections::BTreeMap,
    sync::Mutex,
};

use super::{PageCache, PageMeta, TrustedKeyStore};
use crate::error::StorageError;

/// Volatile store for tests and bench mode.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    keys: Mutex<BTreeMap<String, String>>,
    pages: Mutex<BTreeMap<String, (Vec<u8>, PageMeta)>>,
}

impl MemoryStorage {
    /// Fresh empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StorageError {
    StorageError::Backend("memory store poisoned".to_string())
}

impl TrustedKeyStore for MemoryStorage {
    fn put(&self, callsign: &str, pem: &str) -> Result<(), StorageError> {
        let mut keys = self.keys.lock().map_err(|_| poisoned())?;
        keys.insert(callsign.to_string(), pem.to_string());
        Ok(())
    }

    fn get(&self, callsign: &str) -> Result<Option<String>, StorageError> {
        let keys = self.keys.lock().map_err(|_| poisoned())?;
        Ok(keys.get(callsign).cloned())
    }

    fn list(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let keys = self.keys.lock().map_err(|_| poisoned())?;
        Ok(keys.clone())
    }
}

impl PageCache for MemoryStorage {
    fn put(&self, path: &str, blob: &[u8], meta: &PageMeta) -> Result<(), StorageError> {
        let mut pages = self.pages.lock().map_err(|_| poisoned())?;
        pages.insert(path.to_string(), (blob.to_vec(), meta.clone()));
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<(Vec<u8>, PageMeta)>, StorageError> {
        let pages = self.pages.lock().map_err(|_| poisoned())?;
        Ok(pages.get(path).cloned())
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let pages = self.pages.lock().map_err(|_| poisoned())?;
        Ok(pages.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_round_trip() {
        let store = MemoryStorage::new();
        TrustedKeyStore::put(&store, "KA1ABC", "-----BEGIN PUBLIC KEY-----").unwrap();
        assert_eq!(
            TrustedKeyStore::get(&store, "KA1ABC").unwrap().as_deref(),
            Some("-----BEGIN PUBLIC KEY-----")
        );
        assert!(TrustedKeyStore::get(&store, "W2DEF").unwrap().is_none());
        assert_eq!(TrustedKeyStore::list(&store).unwrap().len(), 1);
    }

    #[test]
    fn pages_round_trip() {
        let store = MemoryStorage::new();
        let meta = PageMeta {
            content_type: "text/html".to_string(),
            stored_at_ms: 12345,
            origin: Some("W2DEF".to_string()),
        };
        PageCache::put(&store, "/index", b"<html></html>", &meta).unwrap();

        let (blob, stored_meta) = PageCache::get(&store, "/index").unwrap().unwrap();
        assert_eq!(blob, b"<html></html>");
        assert_eq!(stored_meta, meta);
        assert_eq!(PageCache::list(&store).unwrap(), vec!["/index".to_string()]);
    }
}
