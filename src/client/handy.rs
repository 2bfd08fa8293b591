use crate::client::{ResolvesClientCert, StoresClientSessions};
use crate::msgs::enums::SignatureScheme;
use crate::sign;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// An implementer of `StoresClientSessions` which does nothing.
pub struct NoClientSessionStorage {}

impl StoresClientSessions for NoClientSessionStorage {
    fn put(&self, _key: Vec<u8>, _value: Vec<u8>) -> bool {
        false
    }

    fn get(&self, _key: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// An implementer of `StoresClientSessions` that stores everything
/// in memory.  It enforces a limit on the number of entries
/// to bound memory usage.
pub struct ClientSessionMemoryCache {
    cache: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    keys: Mutex<VecDeque<Vec<u8>>>,
    max_entries: usize,
}

impl ClientSessionMemoryCache {
    /// Make a new ClientSessionMemoryCache.  `size` is the
    /// maximum number of stored sessions.
    pub fn new(size: usize) -> Arc<Self> {
        debug_assert!(size > 0);
        Arc::new(Self {
            cache: Mutex::new(HashMap::new()),
            keys: Mutex::new(VecDeque::new()),
            max_entries: size,
        })
    }
}

impl StoresClientSessions for ClientSessionMemoryCache {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        let mut cache = self.cache.lock().unwrap();
        let mut keys = self.keys.lock().unwrap();

        if cache.insert(key.clone(), value).is_none() {
            keys.push_back(key);

            if keys.len() > self.max_entries {
                if let Some(oldest) = keys.pop_front() {
                    cache.remove(&oldest);
                }
            }
        }

        true
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache
            .lock()
            .unwrap()
            .get(key)
            .cloned()
    }
}

/// A client-auth resolver that never has a certificate to offer.
pub struct FailResolveClientCert {}

impl ResolvesClientCert for FailResolveClientCert {
    fn resolve(
        &self,
        _acceptable_issuers: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<sign::CertifiedKey>> {
        None
    }

    fn has_certs(&self) -> bool {
        false
    }
}

/// A client-auth resolver that always presents the same certificate,
/// whoever asks.
pub struct AlwaysResolvesClientCert(Arc<sign::CertifiedKey>);

impl AlwaysResolvesClientCert {
    pub(crate) fn new(certified_key: sign::CertifiedKey) -> Self {
        Self(Arc::new(certified_key))
    }
}

impl ResolvesClientCert for AlwaysResolvesClientCert {
    fn resolve(
        &self,
        _acceptable_issuers: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<sign::CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }

    fn has_certs(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_cache_evicts_oldest() {
        let cache = ClientSessionMemoryCache::new(2);
        assert!(cache.put(b"a".to_vec(), b"1".to_vec()));
        assert!(cache.put(b"b".to_vec(), b"2".to_vec()));
        assert!(cache.put(b"c".to_vec(), b"3".to_vec()));

        assert!(cache.get(b"a").is_none());
        assert_eq!(cache.get(b"b"), Some(b"2".to_vec()));
        assert_eq!(cache.get(b"c"), Some(b"3".to_vec()));
    }

    #[test]
    fn no_storage_stores_nothing() {
        let storage = NoClientSessionStorage {};
        assert!(!storage.put(b"k".to_vec(), b"v".to_vec()));
        assert!(storage.get(b"k").is_none());
    }
}
