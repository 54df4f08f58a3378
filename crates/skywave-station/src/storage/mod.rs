//! Persistence boundary: trusted keys and the page cache.
//!
//! Both stores are host-provided in spirit; the station only consumes
//! the traits. Two backends ship with the crate: an in-memory store for
//! tests and bench mode, and a redb-backed store for stations that keep
//! their trust roster and cached pages across restarts. Routes are
//! deliberately not persisted; they live and die with the session.

mod memory;
mod redb;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use memory::MemoryStorage;
pub use redb::RedbStorage;

use crate::error::StorageError;

/// Metadata stored alongside a cached page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    /// MIME type of the cached blob.
    pub content_type: String,
    /// Cache time, milliseconds since the Unix epoch.
    pub stored_at_ms: u64,
    /// Callsign the page was fetched from.
    pub origin: Option<String>,
}

/// Trust roster: which public key a callsign is bound to.
pub trait TrustedKeyStore: Send + Sync {
    /// Bind a callsign to an SPKI PEM.
    fn put(&self, callsign: &str, pem: &str) -> Result<(), StorageError>;

    /// Key bound to a callsign, if any.
    fn get(&self, callsign: &str) -> Result<Option<String>, StorageError>;

    /// The whole roster.
    fn list(&self) -> Result<BTreeMap<String, String>, StorageError>;
}

/// Cached page content keyed by path.
pub trait PageCache: Send + Sync {
    /// Store a page blob with its metadata.
    fn put(&self, path: &str, blob: &[u8], meta: &PageMeta) -> Result<(), StorageError>;

    /// Fetch a cached page.
    fn get(&self, path: &str) -> Result<Option<(Vec<u8>, PageMeta)>, StorageError>;

    /// Paths currently cached.
    fn list(&self) -> Result<Vec<String>, StorageError>;
}

/// Adapter: the content pipeline's verification trait over any trust
/// store, swallowing backend errors into "not trusted".
pub struct TrustLookup<'a>(pub &'a dyn TrustedKeyStore);

impl skywave_content::TrustedKeys for TrustLookup<'_> {
    fn lookup(&self, callsign: &str) -> Option<String> {
        self.0.get(callsign).ok().flatten()
    }
}
