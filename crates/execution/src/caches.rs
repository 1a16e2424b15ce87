//! Node-wide caches. All of them are soft: losing an entry only costs
//! recomputation, never correctness.

use crate::classloader::{ClassLoader, ClasspathError};
use crate::state_view::StateView;
use arca_types::config::ConsensusParams;
use arca_types::signatures::ClassTag;
use arca_types::{StorageReference, TransactionReference};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Bound of the signature-verification LRU.
const SIGNATURE_CACHE_CAPACITY: usize = 4096;

type SignatureKey = ([u8; 32], Vec<u8>);

/// A small bounded LRU for signature verdicts, keyed by
/// `(request_hash, public_key)`.
struct SignatureCache {
    map: HashMap<SignatureKey, bool>,
    order: VecDeque<SignatureKey>,
}

impl SignatureCache {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &SignatureKey) -> Option<bool> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: SignatureKey, verdict: bool) {
        if self.map.insert(key.clone(), verdict).is_none() {
            self.order.push_back(key);
            if self.order.len() > SIGNATURE_CACHE_CAPACITY {
                if let Some(evicted) = self.order.pop_front() {
                    self.map.remove(&evicted);
                }
            }
        }
    }
}

/// The caches shared by every builder of one node.
pub struct NodeCaches {
    classloaders: DashMap<TransactionReference, Arc<ClassLoader>>,
    signatures: Mutex<SignatureCache>,
    class_tags: DashMap<StorageReference, ClassTag>,
    consensus: RwLock<Option<ConsensusParams>>,
}

impl Default for NodeCaches {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeCaches {
    pub fn new() -> Self {
        Self {
            classloaders: DashMap::new(),
            signatures: Mutex::new(SignatureCache::new()),
            class_tags: DashMap::new(),
            consensus: RwLock::new(None),
        }
    }

    /// The class loader of a classpath, building and caching it on miss.
    pub fn classloader_for<S: StateView>(
        &self,
        store: &S,
        classpath: &TransactionReference,
    ) -> Result<Arc<ClassLoader>, ClasspathError> {
        if let Some(loader) = self.classloaders.get(classpath) {
            return Ok(loader.clone());
        }
        let loader = Arc::new(ClassLoader::build(store, classpath)?);
        self.classloaders.insert(*classpath, loader.clone());
        Ok(loader)
    }

    /// Called after every successful module store: installed modules can
    /// extend existing classpath chains, so cached loaders go stale.
    pub fn invalidate_classloaders(&self) {
        let dropped = self.classloaders.len();
        self.classloaders.clear();
        if dropped > 0 {
            debug!(target: "caches", dropped, "classloader cache invalidated");
        }
    }

    pub fn signature_verdict(&self, request_hash: [u8; 32], public_key: &[u8]) -> Option<bool> {
        let cache = self.signatures.lock().ok()?;
        cache.get(&(request_hash, public_key.to_vec()))
    }

    pub fn record_signature_verdict(
        &self,
        request_hash: [u8; 32],
        public_key: &[u8],
        verdict: bool,
    ) {
        if let Ok(mut cache) = self.signatures.lock() {
            cache.insert((request_hash, public_key.to_vec()), verdict);
        }
    }

    pub fn class_tag(&self, object: &StorageReference) -> Option<ClassTag> {
        self.class_tags.get(object).map(|t| t.clone())
    }

    pub fn record_class_tag(&self, tag: ClassTag) {
        self.class_tags.insert(tag.object, tag);
    }

    /// The cached consensus parameters, if any. Recomputed only through
    /// [`NodeCaches::set_consensus`], on explicit request.
    pub fn consensus(&self) -> Option<ConsensusParams> {
        self.consensus.read().ok().and_then(|c| c.clone())
    }

    pub fn set_consensus(&self, params: ConsensusParams) {
        if let Ok(mut slot) = self.consensus.write() {
            *slot = Some(params);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_cache_is_bounded() {
        let caches = NodeCaches::new();
        for i in 0..(SIGNATURE_CACHE_CAPACITY + 100) {
            let mut hash = [0u8; 32];
            hash[..8].copy_from_slice(&(i as u64).to_be_bytes());
            caches.record_signature_verdict(hash, b"pk", true);
        }
        let inner = caches.signatures.lock().unwrap();
        assert!(inner.map.len() <= SIGNATURE_CACHE_CAPACITY);
    }
}
