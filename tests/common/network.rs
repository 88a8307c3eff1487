use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use anchorsync_rs::networking::CommitteeNetwork;
use anchorsync_rs::types::{Block, BlockIndex, ChainAddress, VerifyingKey};

struct CommitteeState {
    inbox: VecDeque<(VerifyingKey, Block)>,
    requested: Vec<BlockIndex>,
}

/// A mock committee network. The test plays the part of the peers: it injects relayed blocks with
/// `send_block` and observes the node's missing-block broadcasts through `requested`.
#[derive(Clone)]
pub(crate) struct MockCommittee {
    state: Arc<Mutex<CommitteeState>>,
}

impl MockCommittee {
    pub(crate) fn new() -> MockCommittee {
        MockCommittee {
            state: Arc::new(Mutex::new(CommitteeState {
                inbox: VecDeque::new(),
                requested: Vec::new(),
            })),
        }
    }

    /// Relay a block to the node, as if `origin` sent it.
    pub(crate) fn send_block(&self, origin: VerifyingKey, block: Block) {
        self.state.lock().unwrap().inbox.push_back((origin, block));
    }

    /// Every position the node has broadcast a block request for, in order, with repeats.
    pub(crate) fn requested(&self) -> Vec<BlockIndex> {
        self.state.lock().unwrap().requested.clone()
    }
}

impl CommitteeNetwork for MockCommittee {
    fn request_block(&mut self, _chain: ChainAddress, index: BlockIndex) {
        self.state.lock().unwrap().requested.push(index);
    }

    fn recv_block(&mut self) -> Option<(VerifyingKey, Block)> {
        self.state.lock().unwrap().inbox.pop_front()
    }
}
