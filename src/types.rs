/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for 'inert' types, i.e., those that are sent around and inspected, but have no active behavior.
//!
//! The two central types here are [VirtualState], the content-addressed key-value state of a chain, and
//! [Block], an ordered batch of per-request [state updates](StateUpdate) produced by one execution round.
//! A new state is only ever derived by applying a block to a clone of the previous one; the hash of the
//! resulting state is what ends up committed to the ledger in an [Anchor].

use std::collections::{btree_map, btree_set, BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;

pub use ed25519_dalek::VerifyingKey;
pub use sha2::Sha256 as CryptoHasher;

pub type BlockIndex = u64;
pub type ChainAddress = [u8; 32];
pub type CryptoHash = [u8; 32];
pub type Entropy = [u8; 32];
pub type Key = Vec<u8>;
pub type OutputId = [u8; 32];
pub type RequestId = [u8; 32];
pub type Value = Vec<u8>;

/// Nanoseconds since the Unix epoch. A timestamp of 0 means "no time", and disables the deterministic
/// per-request increment during batch execution.
pub type Timestamp = u64;

/// Hash an arbitrary byte sequence with the crate's [CryptoHasher].
pub fn hash_data(bytes: &[u8]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub type StateMutations = UpdateSet<Key, Value>;

/// A set of insertions and deletions to be applied to a key-value store.
///
/// Backed by ordered collections so that the Borsh encoding of an update set, and therefore every hash
/// computed over it, is deterministic.
#[derive(Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UpdateSet<K: Ord, V> {
    inserts: BTreeMap<K, V>,
    deletes: BTreeSet<K>,
}

impl<K: Ord, V> UpdateSet<K, V> {
    pub fn new() -> Self {
        Self {
            inserts: BTreeMap::new(),
            deletes: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.deletes.remove(&key);
        self.inserts.insert(key, value);
    }

    pub fn delete(&mut self, key: K) {
        self.inserts.remove(&key);
        self.deletes.insert(key);
    }

    pub fn get_insert(&self, key: &K) -> Option<&V> {
        self.inserts.get(key)
    }

    pub fn contains_delete(&self, key: &K) -> bool {
        self.deletes.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }

    /// Get an iterator over all of the key-value pairs inserted by this update set, in ascending key order.
    pub fn inserts(&self) -> btree_map::Iter<K, V> {
        self.inserts.iter()
    }

    /// Get an iterator over all of the keys deleted by this update set, in ascending key order.
    pub fn deletions(&self) -> btree_set::Iter<K> {
        self.deletes.iter()
    }
}

/// An opaque, uniquely identified state-transition input.
///
/// Requests enter the system from the upstream agreement protocol (which fixes their position within a
/// batch) and are consumed exactly once by the executor. Deduplication across batches is the
/// responsibility of upstream nonce tracking, not of this crate.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct Request {
    pub id: RequestId,
    pub origin: RequestOrigin,
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum RequestOrigin {
    OnLedger,
    OffLedger,
}

/// The state delta produced by executing a single request.
///
/// A failure of the request's own (pure) execution does not abort the batch: it is recorded in `error`
/// and the update carries whatever mutations were produced before the failure (usually none).
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct StateUpdate {
    pub request: RequestId,
    pub timestamp: Timestamp,
    pub error: Option<String>,
    pub mutations: StateMutations,
}

impl StateUpdate {
    pub fn new(request: RequestId, timestamp: Timestamp) -> StateUpdate {
        StateUpdate {
            request,
            timestamp,
            error: None,
            mutations: StateMutations::new(),
        }
    }
}

/// An ordered sequence of state updates produced by one execution round, computed for a fixed position.
///
/// Blocks are created once by the executor and immutable afterward. `state_hash` is the hash of the
/// state that results from applying this block to the state at `index - 1`. `approving_output` is the
/// ledger output that confirms this block, when known: blocks relayed by peers carry it, freshly
/// executed local blocks do not (their anchoring transaction has not been posted yet).
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub index: BlockIndex,
    pub state_hash: CryptoHash,
    pub approving_output: Option<OutputId>,
    pub updates: Vec<StateUpdate>,
}

impl Block {
    pub fn new(index: BlockIndex, state_hash: CryptoHash, updates: Vec<StateUpdate>) -> Block {
        Block {
            index,
            state_hash,
            approving_output: None,
            updates,
        }
    }

    pub fn with_approving_output(mut self, output: OutputId) -> Block {
        self.approving_output = Some(output);
        self
    }

    pub fn size(&self) -> usize {
        self.updates.len()
    }
}

/// The chain's ordered, content-addressed key-value state.
///
/// Identity is [hash](VirtualState::hash), computed over the Borsh encoding of the contents, the
/// position counter, and the timestamp. The authoritative ("solid") instance is owned exclusively by
/// the state manager; the executor only ever mutates clones.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct VirtualState {
    index: BlockIndex,
    timestamp: Timestamp,
    store: BTreeMap<Key, Value>,
}

impl VirtualState {
    /// The pre-genesis state: position 0, no time, empty store.
    pub fn origin() -> VirtualState {
        VirtualState {
            index: 0,
            timestamp: 0,
            store: BTreeMap::new(),
        }
    }

    pub fn index(&self) -> BlockIndex {
        self.index
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.store.get(key)
    }

    pub fn hash(&self) -> CryptoHash {
        hash_data(&self.try_to_vec().unwrap())
    }

    /// Apply a single state update. The state's timestamp becomes the update's timestamp.
    pub fn apply_update(&mut self, update: &StateUpdate) {
        for (key, value) in update.mutations.inserts() {
            self.store.insert(key.clone(), value.clone());
        }
        for key in update.mutations.deletions() {
            self.store.remove(key);
        }
        self.timestamp = update.timestamp;
    }

    /// Apply a whole block, advancing the position counter to the block's index.
    ///
    /// Fails if the block was not computed for the position immediately after this state's.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), ApplyBlockError> {
        if block.index != self.index + 1 {
            return Err(ApplyBlockError::IndexMismatch {
                expected: self.index + 1,
                actual: block.index,
            });
        }
        for update in &block.updates {
            self.apply_update(update);
        }
        self.index = block.index;
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ApplyBlockError {
    IndexMismatch {
        expected: BlockIndex,
        actual: BlockIndex,
    },
}

/// The externally observed ledger commitment to a chain state: a position, a state-hash commitment,
/// and the identifying output reference. Ground truth; the core never mutates it.
#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Anchor {
    pub index: BlockIndex,
    pub commitment: CryptoHash,
    pub output: OutputId,
    pub timestamp: Timestamp,
}

/// Where the state manager currently stands in its synchronization lifecycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SyncStage {
    /// No anchor has been observed yet.
    Uninitialized,
    /// An anchor pull is outstanding and no candidate at the needed position is approved.
    Pulling,
    /// The observed anchor is ahead of the solid state.
    AwaitingApproval,
    /// The solid state's hash equals the observed anchor's commitment.
    Synced,
}

/// A point-in-time summary of the chain's synchronization state, rebuilt whole on every
/// reconciliation pass and safe for concurrent external reads through
/// [SyncStatusReader](crate::chain::SyncStatusReader).
#[derive(Clone)]
pub struct SyncStatus {
    pub synced: bool,
    pub stage: SyncStage,
    pub solid_index: BlockIndex,
    pub solid_hash: CryptoHash,
    pub solid_timestamp: Timestamp,
    pub anchor: Option<Anchor>,
}
