//! Trait definition for the external checkpoint store.
//!
//! The state manager offers every newly solid state to the snapshot store
//! ([store_async](SnapshotStore::store_async)), and consults the store once, at startup, to begin the chain from
//! a checkpoint instead of replaying from origin. Persistence itself — format, medium, pruning —
//! belongs entirely to the collaborator behind this trait.

use std::sync::mpsc::{self, Receiver};

use crate::types::{BlockIndex, CryptoHash, VirtualState};

/// Identifies a checkpoint: the position and the state-hash commitment of the checkpointed state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SnapshotInfo {
    pub index: BlockIndex,
    pub commitment: CryptoHash,
}

pub trait SnapshotStore: Clone + Send + 'static {
    /// Persist a state. Must not block: the state manager calls this opportunistically after each
    /// promotion and never waits for completion.
    fn store_async(&mut self, info: SnapshotInfo, state: VirtualState);

    /// Begin restoring the identified checkpoint, delivering the result through the returned
    /// channel. Startup blocks on this channel (the one deliberate synchronous join in the crate);
    /// the implementation is free to do the work on another thread.
    fn load_async(&mut self, info: SnapshotInfo) -> Receiver<Option<VirtualState>>;

    /// Whether a checkpoint with this position and commitment is available.
    fn exists(&self, index: BlockIndex, commitment: CryptoHash) -> bool;
}

/// A snapshot store that stores nothing. For chains that replay from origin on every start, and
/// for tests.
#[derive(Clone)]
pub struct NoSnapshots;

impl SnapshotStore for NoSnapshots {
    fn store_async(&mut self, _info: SnapshotInfo, _state: VirtualState) {}

    fn load_async(&mut self, _info: SnapshotInfo) -> Receiver<Option<VirtualState>> {
        let (sender, receiver) = mpsc::channel();
        // Safety: the receiver cannot have been dropped; it was created on the previous line.
        sender.send(None).unwrap();
        receiver
    }

    fn exists(&self, _index: BlockIndex, _commitment: CryptoHash) -> bool {
        false
    }
}
