use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver},
        Arc, Mutex,
    },
};

use anchorsync_rs::snapshots::{SnapshotInfo, SnapshotStore};
use anchorsync_rs::types::{BlockIndex, CryptoHash, VirtualState};

/// An in-memory snapshot store.
#[derive(Clone)]
pub(crate) struct MemSnapshots {
    states: Arc<Mutex<HashMap<(BlockIndex, CryptoHash), VirtualState>>>,
}

impl MemSnapshots {
    pub(crate) fn new() -> MemSnapshots {
        MemSnapshots {
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn contains(&self, index: BlockIndex, commitment: CryptoHash) -> bool {
        self.states
            .lock()
            .unwrap()
            .contains_key(&(index, commitment))
    }
}

impl SnapshotStore for MemSnapshots {
    fn store_async(&mut self, info: SnapshotInfo, state: VirtualState) {
        self.states
            .lock()
            .unwrap()
            .insert((info.index, info.commitment), state);
    }

    fn load_async(&mut self, info: SnapshotInfo) -> Receiver<Option<VirtualState>> {
        let (sender, receiver) = mpsc::channel();
        let state = self
            .states
            .lock()
            .unwrap()
            .get(&(info.index, info.commitment))
            .cloned();
        sender.send(state).unwrap();
        receiver
    }

    fn exists(&self, index: BlockIndex, commitment: CryptoHash) -> bool {
        self.contains(index, commitment)
    }
}
