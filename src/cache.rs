//! In-memory cache for resolved media metadata.
//!
//! Every cacheable value is keyed by the SHA-256 hex digest of its canonical
//! identifier (watch URL for videos, playlist id for playlists), so the same
//! source always maps to the same entry no matter how the request arrived.
//! Entries optionally carry a TTL; expired entries are dropped lazily on read
//! and swept periodically by the maintenance task.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::sources::{MediaInfo, PlaylistPage};

/// Digest SHA-256 en hexadecimal de un identificador canónico.
pub fn content_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: u64,
    ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Option<Duration>) -> Self {
        Self {
            value,
            created_at: current_timestamp(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => current_timestamp() > self.created_at + ttl.as_secs(),
            None => false,
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Cache concurrente con TTL opcional por entrada.
///
/// La inserción es idempotente: volver a insertar bajo la misma clave
/// reemplaza el valor sin efectos secundarios, así que dos resoluciones
/// concurrentes de la misma fuente convergen al mismo estado.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    entries: Arc<DashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Inserta sin expiración.
    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, CacheEntry::new(value, None));
    }

    /// Inserta con TTL. `None` equivale a una entrada permanente.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) {
        self.entries.insert(key, CacheEntry::new(value, ttl));
    }

    /// Devuelve una copia del valor si existe y no expiró.
    /// Las entradas vencidas se eliminan en el momento de la lectura.
    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => return Some(entry.value.clone()),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Barre las entradas vencidas y devuelve cuántas eliminó.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("🧹 Cache: {} entradas expiradas eliminadas", removed);
        }
        removed
    }

    /// Inserta una entrada ya vencida, para probar el barrido sin esperas.
    #[cfg(test)]
    fn insert_expired(&self, key: K, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: current_timestamp().saturating_sub(120),
                ttl: Some(Duration::from_secs(1)),
            },
        );
    }
}

impl<K, V> Clone for TtlCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Metadatos resueltos, clave = hash de la URL canónica.
pub type MediaCache = TtlCache<String, MediaInfo>;

/// Páginas de playlist, clave = hash del id de playlist. Siempre con TTL.
pub type PlaylistCache = TtlCache<String, PlaylistPage>;
