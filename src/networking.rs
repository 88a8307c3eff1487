/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait definitions for the two pluggable connectors the core consumes — the [ledger node
//! connector](LedgerConnector) and the [committee peer network](CommitteeNetwork) — as well as the
//! poller thread that drains them into channels for the state manager.
//!
//! Both connectors are fire-and-forget from the core's point of view: a pull or a block request
//! returns immediately, and whatever reply eventually arrives is delivered through the connector's
//! receive method as an ordinary inbound observation. The core never correlates requests with
//! responses; a late reply is reconciled exactly like a fresh one.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::types::{Anchor, Block, BlockIndex, ChainAddress, OutputId, VerifyingKey};

/// Connection to a node of the external ledger on which the chain is anchored.
pub trait LedgerConnector: Clone + Send + 'static {
    /// Ask the ledger for the current anchor output of the chain at `chain`. Must not block; the
    /// reply (if any) arrives later through [recv_anchor](Self::recv_anchor).
    fn pull_state(&mut self, chain: ChainAddress);

    /// Ask the ledger for a specific confirmed output. Used while catching up, to obtain the
    /// anchor for an old position instead of waiting for the live anchor to re-arrive. Must not
    /// block.
    fn pull_confirmed_output(&mut self, chain: ChainAddress, output: OutputId);

    /// Receive the next anchor observation, if one is available now. Must not block.
    fn recv_anchor(&mut self) -> Option<Anchor>;
}

/// Connection to the other validator nodes of this chain's committee.
pub trait CommitteeNetwork: Clone + Send + 'static {
    /// Broadcast a request for the block at `index` to the committee. Must not block.
    fn request_block(&mut self, chain: ChainAddress, index: BlockIndex);

    /// Receive the next block relayed by a peer, if one is available now. Must not block.
    ///
    /// The returned [VerifyingKey] must identify the peer the block actually came from; the state
    /// manager records it as the candidate's origin.
    fn recv_block(&mut self) -> Option<(VerifyingKey, Block)>;
}

/// Spawn the poller thread, which polls the ledger connector and the committee network for inbound
/// observations and distributes them into receivers for the state manager.
pub(crate) fn start_polling<L: LedgerConnector, P: CommitteeNetwork>(
    mut ledger: L,
    mut network: P,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<Anchor>,
    Receiver<(VerifyingKey, Block)>,
) {
    let (to_anchor_receiver, anchor_receiver) = mpsc::channel();
    let (to_block_receiver, block_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        let mut received = false;
        if let Some(anchor) = ledger.recv_anchor() {
            let _ = to_anchor_receiver.send(anchor);
            received = true;
        }
        if let Some((origin, block)) = network.recv_block() {
            let _ = to_block_receiver.send((origin, block));
            received = true;
        }
        if !received {
            thread::yield_now()
        }
    });

    (poller_thread, anchor_receiver, block_receiver)
}
