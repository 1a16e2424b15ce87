//! A Merkle-Patricia trie over a transactional byte store.
//!
//! Keys are hashed to 32 bytes and walked as 64 four-bit nibbles, so every
//! path has the same length and values live only in leaves. Nodes are
//! SCALE-encoded and addressed by the SHA-256 of their encoding; each
//! persisted record carries the commit number at which it was written,
//! which bounds the garbage collector's sweep.

mod node;

pub use node::{nibbles_of, TrieNode};

use arca_crypto::hash::sha256;
use arca_storage::{Database, TableId, WriteBatch};
use arca_types::error::StateError;
use parity_scale_codec::{Decode, Encode};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

pub type TrieRoot = [u8; 32];

/// A store-backed trie with an in-memory delta of dirty nodes.
///
/// Mutations accumulate in the delta; nothing reaches the store until the
/// owner drains the delta into a [`WriteBatch`] at commit time.
pub struct PatriciaTrie {
    db: Arc<dyn Database>,
    table: TableId,
    root: Option<TrieRoot>,
    dirty: HashMap<TrieRoot, TrieNode>,
}

impl PatriciaTrie {
    pub fn new(db: Arc<dyn Database>, table: TableId, root: Option<TrieRoot>) -> Self {
        Self {
            db,
            table,
            root,
            dirty: HashMap::new(),
        }
    }

    /// The root digest, or `None` while the trie is empty.
    pub fn root(&self) -> Option<TrieRoot> {
        self.root
    }

    /// Points the trie at a historical root. The caller is responsible for
    /// only using roots within the retention window.
    pub fn reset_to(&mut self, root: Option<TrieRoot>) {
        self.root = root;
        self.dirty.clear();
    }

    fn load_node(&self, digest: &TrieRoot) -> Result<TrieNode, StateError> {
        if let Some(node) = self.dirty.get(digest) {
            return Ok(node.clone());
        }
        let record = self
            .db
            .get(self.table, digest)?
            .ok_or_else(|| StateError::MissingNode(hex::encode(digest)))?;
        decode_record(&record).map(|(_, node)| node)
    }

    fn store_node(&mut self, node: TrieNode) -> TrieRoot {
        let digest = sha256(&node.encode());
        self.dirty.insert(digest, node);
        digest
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        let Some(root) = self.root else {
            return Ok(None);
        };
        let path = nibbles_of(&sha256(key));
        self.get_at(&root, &path)
    }

    fn get_at(&self, digest: &TrieRoot, path: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        match self.load_node(digest)? {
            TrieNode::Leaf { suffix, value } => {
                Ok((suffix.as_slice() == path).then_some(value))
            }
            TrieNode::Extension { path: ext, child } => match path.strip_prefix(ext.as_slice()) {
                Some(rest) => self.get_at(&child, rest),
                None => Ok(None),
            },
            TrieNode::Branch { children } => {
                let (first, rest) = match path.split_first() {
                    Some(split) => split,
                    None => return Ok(None),
                };
                match children[*first as usize] {
                    Some(child) => self.get_at(&child, rest),
                    None => Ok(None),
                }
            }
        }
    }

    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StateError> {
        let path = nibbles_of(&sha256(key));
        let root = self.root;
        let new_root = self.put_at(root.as_ref(), &path, value)?;
        self.root = Some(new_root);
        Ok(())
    }

    fn put_at(
        &mut self,
        digest: Option<&TrieRoot>,
        path: &[u8],
        value: Vec<u8>,
    ) -> Result<TrieRoot, StateError> {
        let Some(digest) = digest else {
            return Ok(self.store_node(TrieNode::Leaf {
                suffix: path.to_vec(),
                value,
            }));
        };

        match self.load_node(digest)? {
            TrieNode::Leaf {
                suffix,
                value: old_value,
            } => {
                if suffix.as_slice() == path {
                    return Ok(self.store_node(TrieNode::Leaf {
                        suffix,
                        value,
                    }));
                }
                // Same-length paths that differ: fork at the first
                // divergent nibble.
                let split = common_prefix(&suffix, path);
                let mut children: [Option<TrieRoot>; 16] = [None; 16];
                let old_child = self.store_node(TrieNode::Leaf {
                    suffix: suffix[split + 1..].to_vec(),
                    value: old_value,
                });
                let new_child = self.store_node(TrieNode::Leaf {
                    suffix: path[split + 1..].to_vec(),
                    value,
                });
                children[suffix[split] as usize] = Some(old_child);
                children[path[split] as usize] = Some(new_child);
                let branch = self.store_node(TrieNode::Branch { children });
                Ok(self.wrap_extension(&path[..split], branch))
            }
            TrieNode::Extension { path: ext, child } => {
                let split = common_prefix(&ext, path);
                if split == ext.len() {
                    let new_child = self.put_at(Some(&child), &path[split..], value)?;
                    return Ok(self.store_node(TrieNode::Extension {
                        path: ext,
                        child: new_child,
                    }));
                }
                // The extension itself diverges from the new path.
                let mut children: [Option<TrieRoot>; 16] = [None; 16];
                let ext_rest = &ext[split + 1..];
                let pushed_down = if ext_rest.is_empty() {
                    child
                } else {
                    self.store_node(TrieNode::Extension {
                        path: ext_rest.to_vec(),
                        child,
                    })
                };
                let new_child = self.store_node(TrieNode::Leaf {
                    suffix: path[split + 1..].to_vec(),
                    value,
                });
                children[ext[split] as usize] = Some(pushed_down);
                children[path[split] as usize] = Some(new_child);
                let branch = self.store_node(TrieNode::Branch { children });
                Ok(self.wrap_extension(&path[..split], branch))
            }
            TrieNode::Branch { mut children } => {
                let (first, rest) = path.split_first().expect("fixed-width paths end in leaves");
                let slot = children[*first as usize];
                let new_child = self.put_at(slot.as_ref(), rest, value)?;
                children[*first as usize] = Some(new_child);
                Ok(self.store_node(TrieNode::Branch { children }))
            }
        }
    }

    fn wrap_extension(&mut self, prefix: &[u8], child: TrieRoot) -> TrieRoot {
        if prefix.is_empty() {
            child
        } else {
            self.store_node(TrieNode::Extension {
                path: prefix.to_vec(),
                child,
            })
        }
    }

    /// Drains the dirty nodes into `batch`, tagging each record with the
    /// committing epoch.
    pub fn drain_into(&mut self, batch: &mut WriteBatch, commit_number: u64) {
        for (digest, node) in self.dirty.drain() {
            batch.put(self.table, digest.to_vec(), encode_record(commit_number, &node));
        }
    }

    /// Collects every digest reachable from `root` into `out`.
    pub fn mark_reachable(
        &self,
        root: &TrieRoot,
        out: &mut HashSet<TrieRoot>,
    ) -> Result<(), StateError> {
        if !out.insert(*root) {
            return Ok(());
        }
        match self.load_node(root)? {
            TrieNode::Leaf { .. } => Ok(()),
            TrieNode::Extension { child, .. } => self.mark_reachable(&child, out),
            TrieNode::Branch { children } => {
                for child in children.into_iter().flatten() {
                    self.mark_reachable(&child, out)?;
                }
                Ok(())
            }
        }
    }

    /// Deletes node records written strictly before `oldest_live_commit`
    /// and unreachable from any of `retained_roots`. Appends the deletes
    /// to `batch`; returns how many records became garbage.
    pub fn garbage_collect(
        &self,
        retained_roots: &[TrieRoot],
        oldest_live_commit: u64,
        batch: &mut WriteBatch,
    ) -> Result<usize, StateError> {
        let mut live = HashSet::new();
        for root in retained_roots {
            self.mark_reachable(root, &mut live)?;
        }
        let mut swept = 0;
        for (key, record) in self.db.scan(self.table)? {
            let digest: TrieRoot = match key.as_slice().try_into() {
                Ok(d) => d,
                Err(_) => continue,
            };
            let (epoch, _) = decode_record(&record)?;
            if epoch < oldest_live_commit && !live.contains(&digest) {
                batch.delete(self.table, key);
                swept += 1;
            }
        }
        if swept > 0 {
            debug!(target: "trie", table = ?self.table, swept, "garbage-collected trie nodes");
        }
        Ok(swept)
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn encode_record(commit_number: u64, node: &TrieNode) -> Vec<u8> {
    let mut record = commit_number.to_be_bytes().to_vec();
    record.extend_from_slice(&node.encode());
    record
}

fn decode_record(record: &[u8]) -> Result<(u64, TrieNode), StateError> {
    if record.len() < 8 {
        return Err(StateError::MissingNode("truncated node record".into()));
    }
    let epoch = u64::from_be_bytes(record[..8].try_into().unwrap());
    let node = TrieNode::decode(&mut &record[8..])
        .map_err(|e| StateError::MissingNode(format!("undecodable node: {e}")))?;
    Ok((epoch, node))
}

#[cfg(test)]
mod tests;
