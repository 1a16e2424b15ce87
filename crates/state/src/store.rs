//! The node store: three tries plus head metadata over one byte store.
//!
//! Every commit flushes the dirty nodes of all three tries, the head
//! pointer and the retained-roots window in a single atomic write batch,
//! then garbage-collects records that fell out of the retention window.

use crate::trie::{PatriciaTrie, TrieRoot};
use arca_storage::{Database, TableId, WriteBatch};
use arca_types::config::ConsensusParams;
use arca_types::error::StateError;
use arca_types::marshalling::{
    from_bytes, to_bytes, Marshallable, MarshallingContext, UnmarshallingContext,
};
use arca_types::{StorageReference, TransactionReference, TransactionRequest, TransactionResponse};
use std::sync::Arc;
use tracing::{debug, info};

/// Width of the merged root: the three concatenated trie roots.
pub const MERGED_ROOT_LEN: usize = 96;

const HEAD_KEY: &[u8] = b"head";
const ROOTS_KEY: &[u8] = b"roots";

/// Single-byte keys of the info trie.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InfoKey {
    /// Classpath of the base runtime module.
    BaseCode = 0x00,
    /// Storage reference of the manifest; its presence marks the node as
    /// initialized.
    Manifest = 0x01,
    /// Storage reference of the gamete.
    Gamete = 0x02,
    /// Number of commits performed so far.
    CommitCount = 0x03,
    /// Marshalled consensus parameters.
    Consensus = 0x04,
}

impl InfoKey {
    fn key(self) -> [u8; 1] {
        [self as u8]
    }
}

/// An empty trie contributes 32 zero bytes to the merged root.
fn root_bytes(root: Option<TrieRoot>) -> [u8; 32] {
    root.unwrap_or([0u8; 32])
}

fn root_option(bytes: &[u8]) -> Option<TrieRoot> {
    let root: TrieRoot = bytes.try_into().ok()?;
    (root != [0u8; 32]).then_some(root)
}

pub struct NodeStore {
    db: Arc<dyn Database>,
    responses: PatriciaTrie,
    histories: PatriciaTrie,
    info: PatriciaTrie,
    commit_number: u64,
    checkable_depth: i64,
    /// Most-recent-first window of `(commit, merged_root)` pairs that may
    /// still be checked out.
    retained: Vec<(u64, [u8; MERGED_ROOT_LEN])>,
}

impl NodeStore {
    /// Opens the store over `db`, resuming from the persisted head if one
    /// exists.
    pub fn open(db: Arc<dyn Database>, checkable_depth: i64) -> Result<Self, StateError> {
        let head = db.get(TableId::Meta, HEAD_KEY)?;
        let (commit_number, merged) = match head {
            Some(bytes) if bytes.len() == 8 + MERGED_ROOT_LEN => {
                let commit = u64::from_be_bytes(bytes[..8].try_into().unwrap());
                let mut root = [0u8; MERGED_ROOT_LEN];
                root.copy_from_slice(&bytes[8..]);
                (commit, Some(root))
            }
            Some(bytes) => {
                return Err(StateError::MalformedRoot(bytes.len()));
            }
            None => (0, None),
        };

        let retained = match db.get(TableId::Meta, ROOTS_KEY)? {
            Some(bytes) => decode_retained(&bytes)?,
            None => Vec::new(),
        };

        let (responses_root, histories_root, info_root) = match merged {
            Some(root) => split_merged(&root)?,
            None => (None, None, None),
        };

        info!(target: "store", commit_number, "opened node store");
        Ok(Self {
            responses: PatriciaTrie::new(db.clone(), TableId::ResponseNodes, responses_root),
            histories: PatriciaTrie::new(db.clone(), TableId::HistoryNodes, histories_root),
            info: PatriciaTrie::new(db.clone(), TableId::InfoNodes, info_root),
            db,
            commit_number,
            checkable_depth,
            retained,
        })
    }

    pub fn commit_number(&self) -> u64 {
        self.commit_number
    }

    /// The authenticated state commitment: responses ++ histories ++ info.
    pub fn merged_root(&self) -> [u8; MERGED_ROOT_LEN] {
        let mut out = [0u8; MERGED_ROOT_LEN];
        out[..32].copy_from_slice(&root_bytes(self.responses.root()));
        out[32..64].copy_from_slice(&root_bytes(self.histories.root()));
        out[64..].copy_from_slice(&root_bytes(self.info.root()));
        out
    }

    // ---- requests and responses ----
    //
    // The responses trie stores the committed pair: the request bytes
    // (length-prefixed) followed by the response. The request is part of
    // the authenticated state because the transaction reference is the
    // hash of exactly those bytes.

    pub fn get_response(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<TransactionResponse>, StateError> {
        match self.responses.get(reference.as_bytes())? {
            Some(bytes) => {
                let mut r = UnmarshallingContext::new(&bytes);
                let _request = r.read_byte_array()?;
                let response = TransactionResponse::unmarshal(&mut r)?;
                r.expect_end()?;
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }

    pub fn get_request(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<TransactionRequest>, StateError> {
        match self.responses.get(reference.as_bytes())? {
            Some(bytes) => {
                let mut r = UnmarshallingContext::new(&bytes);
                let request_bytes = r.read_byte_array()?;
                Ok(Some(from_bytes(&request_bytes)?))
            }
            None => Ok(None),
        }
    }

    pub fn put_delivery(
        &mut self,
        reference: &TransactionReference,
        request: &TransactionRequest,
        response: &TransactionResponse,
    ) -> Result<(), StateError> {
        let mut w = MarshallingContext::new();
        w.write_byte_array(&to_bytes(request)?)?;
        response.marshal(&mut w)?;
        self.responses.put(reference.as_bytes(), w.finish())?;
        Ok(())
    }

    // ---- histories ----

    /// The history of an object, most-recent-first, ending with the
    /// transaction that created it.
    pub fn get_history(
        &self,
        object: &StorageReference,
    ) -> Result<Vec<TransactionReference>, StateError> {
        let key = history_key(object)?;
        match self.histories.get(&key)? {
            None => Ok(Vec::new()),
            Some(bytes) => {
                // The last element is elided on disk: it always equals the
                // creating transaction of the object.
                let mut history: Vec<TransactionReference> = from_bytes(&bytes)?;
                history.push(object.transaction);
                Ok(history)
            }
        }
    }

    pub fn put_history(
        &mut self,
        object: &StorageReference,
        history: &[TransactionReference],
    ) -> Result<(), StateError> {
        let key = history_key(object)?;
        let elided = match history.split_last() {
            Some((last, rest)) if *last == object.transaction => rest.to_vec(),
            // A history not ending in the creator would be a bug upstream;
            // store it in full rather than corrupting it.
            _ => history.to_vec(),
        };
        let bytes = to_bytes(&elided)?;
        self.histories.put(&key, bytes)?;
        Ok(())
    }

    // ---- info ----

    pub fn get_base_code(&self) -> Result<Option<TransactionReference>, StateError> {
        self.get_info_reference(InfoKey::BaseCode)
    }

    pub fn set_base_code(&mut self, reference: &TransactionReference) -> Result<(), StateError> {
        self.info
            .put(&InfoKey::BaseCode.key(), reference.as_bytes().to_vec())?;
        Ok(())
    }

    pub fn get_manifest(&self) -> Result<Option<StorageReference>, StateError> {
        self.get_info_storage_reference(InfoKey::Manifest)
    }

    pub fn set_manifest(&mut self, manifest: &StorageReference) -> Result<(), StateError> {
        let mut w = MarshallingContext::new();
        manifest.marshal_without_selector(&mut w)?;
        self.info.put(&InfoKey::Manifest.key(), w.finish())?;
        Ok(())
    }

    pub fn get_gamete(&self) -> Result<Option<StorageReference>, StateError> {
        self.get_info_storage_reference(InfoKey::Gamete)
    }

    pub fn set_gamete(&mut self, gamete: &StorageReference) -> Result<(), StateError> {
        let mut w = MarshallingContext::new();
        gamete.marshal_without_selector(&mut w)?;
        self.info.put(&InfoKey::Gamete.key(), w.finish())?;
        Ok(())
    }

    pub fn get_consensus_params(&self) -> Result<Option<ConsensusParams>, StateError> {
        match self.info.get(&InfoKey::Consensus.key())? {
            Some(bytes) => Ok(Some(from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_consensus_params(&mut self, params: &ConsensusParams) -> Result<(), StateError> {
        let bytes = to_bytes(params)?;
        self.info.put(&InfoKey::Consensus.key(), bytes)?;
        Ok(())
    }

    /// A node is initialized once the manifest is recorded; initial
    /// requests are inadmissible afterwards.
    pub fn is_initialized(&self) -> Result<bool, StateError> {
        Ok(self.get_manifest()?.is_some())
    }

    fn get_info_reference(
        &self,
        key: InfoKey,
    ) -> Result<Option<TransactionReference>, StateError> {
        match self.info.get(&key.key())? {
            None => Ok(None),
            Some(bytes) => {
                let arr: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StateError::MalformedRoot(bytes.len()))?;
                Ok(Some(TransactionReference(arr)))
            }
        }
    }

    fn get_info_storage_reference(
        &self,
        key: InfoKey,
    ) -> Result<Option<StorageReference>, StateError> {
        match self.info.get(&key.key())? {
            None => Ok(None),
            Some(bytes) => {
                let mut r = UnmarshallingContext::new(&bytes);
                let sr = StorageReference::unmarshal_without_selector(&mut r)?;
                r.expect_end()?;
                Ok(Some(sr))
            }
        }
    }

    // ---- commit, checkout and garbage collection ----

    /// Flushes all pending mutations as one atomic batch, advances the
    /// commit counter and sweeps nodes that left the retention window.
    /// Returns the new merged root.
    pub fn commit(&mut self) -> Result<[u8; MERGED_ROOT_LEN], StateError> {
        self.commit_number += 1;
        // The commit count is part of the replicated state.
        self.info.put(
            &InfoKey::CommitCount.key(),
            self.commit_number.to_be_bytes().to_vec(),
        )?;

        let merged = self.merged_root();
        self.retained.insert(0, (self.commit_number, merged));
        let window = self.retention_window();
        self.retained.truncate(window);

        let mut batch = WriteBatch::new();
        // Sweep before draining: reachability marking must still see the
        // dirty nodes of this commit.
        if self.checkable_depth >= 0 {
            self.sweep(&mut batch)?;
        }
        self.responses.drain_into(&mut batch, self.commit_number);
        self.histories.drain_into(&mut batch, self.commit_number);
        self.info.drain_into(&mut batch, self.commit_number);

        let mut head = self.commit_number.to_be_bytes().to_vec();
        head.extend_from_slice(&merged);
        batch.put(TableId::Meta, HEAD_KEY.to_vec(), head);
        batch.put(TableId::Meta, ROOTS_KEY.to_vec(), encode_retained(&self.retained));

        self.db.write(batch)?;
        debug!(
            target: "store",
            commit = self.commit_number,
            root = %hex::encode(merged),
            "advanced store roots"
        );
        Ok(merged)
    }

    /// How many merged roots stay checkout-able, the head included.
    fn retention_window(&self) -> usize {
        if self.checkable_depth < 0 {
            usize::MAX
        } else {
            (self.checkable_depth as usize).max(1)
        }
    }

    fn sweep(&self, batch: &mut WriteBatch) -> Result<(), StateError> {
        let oldest_live = self
            .retained
            .last()
            .map(|(commit, _)| *commit)
            .unwrap_or(0);

        let mut responses_roots = Vec::new();
        let mut histories_roots = Vec::new();
        let mut info_roots = Vec::new();
        for (_, merged) in &self.retained {
            let (r, h, i) = split_merged(merged)?;
            responses_roots.extend(r);
            histories_roots.extend(h);
            info_roots.extend(i);
        }

        self.responses
            .garbage_collect(&responses_roots, oldest_live, batch)?;
        self.histories
            .garbage_collect(&histories_roots, oldest_live, batch)?;
        self.info.garbage_collect(&info_roots, oldest_live, batch)?;
        Ok(())
    }

    /// Reopens the tries at a historical merged root. The root must still
    /// be inside the retention window.
    pub fn checkout(&mut self, merged: &[u8]) -> Result<(), StateError> {
        if merged.len() != MERGED_ROOT_LEN {
            return Err(StateError::MalformedRoot(merged.len()));
        }
        let known = self
            .retained
            .iter()
            .any(|(_, root)| root.as_slice() == merged);
        if !known && self.checkable_depth >= 0 {
            return Err(StateError::UnknownRoot(hex::encode(merged)));
        }
        let (r, h, i) = split_merged(merged)?;
        self.responses.reset_to(r);
        self.histories.reset_to(h);
        self.info.reset_to(i);
        info!(target: "store", root = %hex::encode(merged), "checked out historical state");
        Ok(())
    }
}

fn history_key(object: &StorageReference) -> Result<Vec<u8>, StateError> {
    let mut w = MarshallingContext::new();
    object.marshal_without_selector(&mut w)?;
    Ok(w.finish())
}

#[allow(clippy::type_complexity)]
fn split_merged(
    merged: &[u8],
) -> Result<(Option<TrieRoot>, Option<TrieRoot>, Option<TrieRoot>), StateError> {
    if merged.len() != MERGED_ROOT_LEN {
        return Err(StateError::MalformedRoot(merged.len()));
    }
    Ok((
        root_option(&merged[..32]),
        root_option(&merged[32..64]),
        root_option(&merged[64..]),
    ))
}

fn encode_retained(retained: &[(u64, [u8; MERGED_ROOT_LEN])]) -> Vec<u8> {
    let mut out = Vec::with_capacity(retained.len() * (8 + MERGED_ROOT_LEN));
    for (commit, root) in retained {
        out.extend_from_slice(&commit.to_be_bytes());
        out.extend_from_slice(root);
    }
    out
}

fn decode_retained(bytes: &[u8]) -> Result<Vec<(u64, [u8; MERGED_ROOT_LEN])>, StateError> {
    const ENTRY: usize = 8 + MERGED_ROOT_LEN;
    if bytes.len() % ENTRY != 0 {
        return Err(StateError::MalformedRoot(bytes.len()));
    }
    let mut out = Vec::with_capacity(bytes.len() / ENTRY);
    for chunk in bytes.chunks_exact(ENTRY) {
        let commit = u64::from_be_bytes(chunk[..8].try_into().unwrap());
        let mut root = [0u8; MERGED_ROOT_LEN];
        root.copy_from_slice(&chunk[8..]);
        out.push((commit, root));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca_storage::MemoryDatabase;
    use arca_types::requests::InitialModuleStoreRequest;
    use arca_types::responses::{InitializationResponse, VoidMethodCallSuccessfulResponse};

    fn tx(b: u8) -> TransactionReference {
        TransactionReference([b; 32])
    }

    fn req(b: u8) -> TransactionRequest {
        TransactionRequest::InitialModuleStore(InitialModuleStoreRequest { module: vec![b] })
    }

    fn fresh(depth: i64) -> NodeStore {
        NodeStore::open(Arc::new(MemoryDatabase::new()), depth).unwrap()
    }

    #[test]
    fn deliveries_roundtrip_through_the_trie() {
        let mut store = fresh(2);
        let response = TransactionResponse::Initialization(InitializationResponse);
        store.put_delivery(&tx(1), &req(1), &response).unwrap();
        store.commit().unwrap();
        assert_eq!(store.get_response(&tx(1)).unwrap(), Some(response));
        assert_eq!(store.get_request(&tx(1)).unwrap(), Some(req(1)));
        assert_eq!(store.get_response(&tx(2)).unwrap(), None);
        assert_eq!(store.get_request(&tx(2)).unwrap(), None);
    }

    #[test]
    fn history_elides_the_creating_transaction() {
        let mut store = fresh(2);
        let object = StorageReference::new(tx(1), 0);

        store.put_history(&object, &[tx(1)]).unwrap();
        store.commit().unwrap();
        assert_eq!(store.get_history(&object).unwrap(), vec![tx(1)]);

        store.put_history(&object, &[tx(3), tx(2), tx(1)]).unwrap();
        store.commit().unwrap();
        assert_eq!(
            store.get_history(&object).unwrap(),
            vec![tx(3), tx(2), tx(1)]
        );
    }

    #[test]
    fn merged_root_is_deterministic_and_reopenable() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let root = {
            let mut store = NodeStore::open(db.clone(), 5).unwrap();
            store.set_base_code(&tx(9)).unwrap();
            store
                .put_delivery(
                    &tx(9),
                    &req(9),
                    &TransactionResponse::Initialization(InitializationResponse),
                )
                .unwrap();
            store.commit().unwrap()
        };

        let store = NodeStore::open(db, 5).unwrap();
        assert_eq!(store.merged_root(), root);
        assert_eq!(store.commit_number(), 1);
        assert_eq!(store.get_base_code().unwrap(), Some(tx(9)));
    }

    #[test]
    fn checkout_views_historical_state() {
        let mut store = fresh(5);
        store.set_base_code(&tx(1)).unwrap();
        let root1 = store.commit().unwrap();
        store.set_base_code(&tx(2)).unwrap();
        let root2 = store.commit().unwrap();
        assert_ne!(root1, root2);

        store.checkout(&root1).unwrap();
        assert_eq!(store.get_base_code().unwrap(), Some(tx(1)));
        store.checkout(&root2).unwrap();
        assert_eq!(store.get_base_code().unwrap(), Some(tx(2)));
    }

    #[test]
    fn checkout_outside_window_is_rejected() {
        let mut store = fresh(1);
        store.set_base_code(&tx(1)).unwrap();
        let root1 = store.commit().unwrap();
        store.set_base_code(&tx(2)).unwrap();
        store.commit().unwrap();

        assert!(matches!(
            store.checkout(&root1),
            Err(StateError::UnknownRoot(_))
        ));
    }

    #[test]
    fn zero_depth_sweeps_previous_commits() {
        let mut store = fresh(0);
        for i in 0..5u8 {
            store
                .put_delivery(
                    &tx(i),
                    &req(i),
                    &TransactionResponse::VoidMethodCallSuccessful(
                        VoidMethodCallSuccessfulResponse {
                            updates: vec![],
                            events: vec![],
                            gas: Default::default(),
                        },
                    ),
                )
                .unwrap();
            store.commit().unwrap();
        }
        // The head stays fully readable after every sweep.
        for i in 0..5u8 {
            assert!(store.get_response(&tx(i)).unwrap().is_some());
        }
    }
}
