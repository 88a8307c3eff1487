/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-chain reconciliation loop that keeps the solid state in step with the ledger anchor.
//!
//! This module defines the state manager thread, the driving force of a chain. The manager is the
//! single writer of the chain's three mutable pieces: the solid [VirtualState], the
//! [CandidateTracker], and the published [SyncStatus]. Everything else talks to it through
//! channels: the poller delivers anchor observations and peer blocks, the [BatchSender]
//! (crate::chain::BatchSender) delivers agreed batches, and the executor delivers completion
//! outcomes.
//!
//! Each loop iteration first absorbs whatever arrived (batches, execution outcomes, anchors, peer
//! blocks), then runs four idempotent steps in fixed order — each a no-op when its precondition is
//! unmet:
//! 1. *Pull anchor if needed*: if the retry deadline elapsed, fire-and-forget a
//!    [pull_state](crate::networking::LedgerConnector::pull_state) and reset the deadline. The
//!    deadline is shortened right after fresh local progress, so a newly executed block is
//!    confirmed against the ledger sooner than the steady-state interval.
//! 2. *Request missing blocks*: extend the awaited range to cover the anchor, bounded by the
//!    configured sync window ahead of the solid position, then broadcast a block request to the
//!    committee for every awaited position with no candidate whose fetch deadline lapsed.
//! 3. *Promote if approved*: while a candidate at the position immediately after the solid
//!    position is approved, replace the solid state with the candidate's computed state (deriving
//!    it from the block when the candidate carries none, and rejecting the candidate outright if
//!    the derived state does not hash to the hash the block declared), evict the tracker at or
//!    below the new position, and offer the new state to the snapshot store.
//! 4. *Notify and publish*: if a promotion is pending notification and the solid hash now equals
//!    the anchor's commitment, fire the state-transition and synced events, exactly once per newly
//!    reached state (deduplicated by the last-notified hash); then rebuild and publish the
//!    [SyncStatus] snapshot unconditionally.
//!
//! The anchor is ground truth. A late pull reply is an ordinary observation: an observation newer
//! than the known anchor (or at the same position with a rotated output id) replaces it, an older
//! one is not adopted but still re-checks approvals at its position — that is how a
//! confirming-output reply for an old position approves a catch-up candidate.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crate::candidates::{Approval, CandidateKey, CandidateOrigin, CandidateTracker};
use crate::events::*;
use crate::executor::{start_execution, ExecutionOutcome, ExecutionTask, RequestExecutor};
use crate::networking::{CommitteeNetwork, LedgerConnector};
use crate::snapshots::{SnapshotInfo, SnapshotStore};
use crate::types::{
    Anchor, Block, ChainAddress, CryptoHash, Entropy, Request, SyncStage, SyncStatus, Timestamp,
    VerifyingKey, VirtualState,
};

/// An agreed, ordered batch of requests together with the deterministic time and randomness seeds
/// fixed by the upstream agreement protocol.
pub struct ExecutionBatch {
    pub requests: Vec<Request>,
    pub timestamp: Timestamp,
    pub entropy: Entropy,
    pub leader: Option<VerifyingKey>,
}

/// Inputs delivered to the state manager through its inbound channel.
pub(crate) enum ChainEvent {
    Batch(ExecutionBatch),
    ExecutionOutcome(ExecutionOutcome),
}

/// The subset of [Configuration](crate::chain::Configuration) the state manager needs.
pub(crate) struct ManagerConfiguration {
    pub(crate) chain: ChainAddress,
    pub(crate) pull_state_retry: Duration,
    pub(crate) pull_state_new_block_delay: Duration,
    pub(crate) fetch_block_retry: Duration,
    pub(crate) sync_window: u64,
    pub(crate) tick: Duration,
}

pub(crate) struct StateManager<E: RequestExecutor, L: LedgerConnector, P: CommitteeNetwork, S: SnapshotStore>
{
    config: ManagerConfiguration,
    executor: Arc<E>,
    ledger: L,
    network: P,
    snapshots: S,

    solid: VirtualState,
    solid_hash: CryptoHash,
    anchor: Option<Anchor>,
    tracker: CandidateTracker,
    stage: SyncStage,
    last_notified_hash: Option<CryptoHash>,
    transition_pending: bool,

    executing: bool,
    queued_batches: VecDeque<ExecutionBatch>,
    pull_deadline: Instant,

    chain_events: Receiver<ChainEvent>,
    // Held so that executor completion callbacks always have a live channel to send into, and to
    // hand to each spawned execution.
    chain_event_sender: Sender<ChainEvent>,
    anchor_observations: Receiver<Anchor>,
    peer_blocks: Receiver<(VerifyingKey, Block)>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
    sync_status: Arc<Mutex<SyncStatus>>,
}

impl<E: RequestExecutor, L: LedgerConnector, P: CommitteeNetwork, S: SnapshotStore>
    StateManager<E, L, P, S>
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: ManagerConfiguration,
        initial_state: VirtualState,
        executor: Arc<E>,
        ledger: L,
        network: P,
        snapshots: S,
        chain_events: Receiver<ChainEvent>,
        chain_event_sender: Sender<ChainEvent>,
        anchor_observations: Receiver<Anchor>,
        peer_blocks: Receiver<(VerifyingKey, Block)>,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
        sync_status: Arc<Mutex<SyncStatus>>,
    ) -> StateManager<E, L, P, S> {
        let solid_hash = initial_state.hash();
        StateManager {
            config,
            executor,
            ledger,
            network,
            snapshots,
            solid: initial_state,
            solid_hash,
            anchor: None,
            tracker: CandidateTracker::new(),
            stage: SyncStage::Uninitialized,
            last_notified_hash: None,
            transition_pending: false,
            executing: false,
            queued_batches: VecDeque::new(),
            pull_deadline: Instant::now(),
            chain_events,
            chain_event_sender,
            anchor_observations,
            peer_blocks,
            shutdown_signal,
            event_publisher,
            sync_status,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("State manager thread disconnected from main thread")
                }
            }

            self.absorb();
            self.take_action();
            self.publish_status();
        })
    }

    /// Drain every inbound channel, blocking on the first receive for at most one tick so timer
    /// deadlines fire without busy-waiting.
    fn absorb(&mut self) {
        match self.chain_events.recv_timeout(self.config.tick) {
            Ok(chain_event) => self.on_chain_event(chain_event),
            Err(RecvTimeoutError::Timeout) => (),
            // Safety: the manager holds its own sender for executor completions, so the channel
            // cannot disconnect while this thread runs.
            Err(RecvTimeoutError::Disconnected) => {
                panic!("State manager disconnected from its own inbound channel")
            }
        }
        while let Ok(chain_event) = self.chain_events.try_recv() {
            self.on_chain_event(chain_event);
        }

        while let Ok(anchor) = self.anchor_observations.try_recv() {
            self.on_anchor_observation(anchor);
        }

        while let Ok((origin, block)) = self.peer_blocks.try_recv() {
            self.on_peer_block(origin, block);
        }
    }

    fn on_chain_event(&mut self, chain_event: ChainEvent) {
        match chain_event {
            ChainEvent::Batch(batch) => {
                self.queued_batches.push_back(batch);
                self.maybe_dispatch();
            }
            ChainEvent::ExecutionOutcome(outcome) => self.on_execution_outcome(outcome),
        }
    }

    /// Dispatch queued batches until one execution is outstanding. At most one execution is ever
    /// outstanding per chain; later batches wait in the queue until its completion is observed.
    fn maybe_dispatch(&mut self) {
        while !self.executing {
            let Some(batch) = self.queued_batches.pop_front() else {
                return;
            };

            let index = self.solid.index() + 1;
            let batch_size = batch.requests.len();
            let leader = batch.leader;
            let task = ExecutionTask {
                chain: self.config.chain,
                previous_state: self.solid.clone(),
                requests: batch.requests,
                timestamp: batch.timestamp,
                entropy: batch.entropy,
                leader,
            };

            let completion_sender = self.chain_event_sender.clone();
            let dispatch = start_execution(self.executor.clone(), task, move |outcome| {
                // Discarded only if the manager is already shutting down.
                let _ = completion_sender.send(ChainEvent::ExecutionOutcome(outcome));
            });

            match dispatch {
                Ok(()) => {
                    self.executing = true;
                    Event::publish(
                        &self.event_publisher,
                        Event::StartExecution(StartExecutionEvent {
                            timestamp: SystemTime::now(),
                            index,
                            batch_size,
                            leader,
                        }),
                    );
                }
                // A batch rejected before spawning (empty) is fatal to that batch only; try the
                // next one.
                Err(error) => Event::publish(
                    &self.event_publisher,
                    Event::FailExecution(FailExecutionEvent {
                        timestamp: SystemTime::now(),
                        error,
                    }),
                ),
            }
        }
    }

    fn on_execution_outcome(&mut self, outcome: ExecutionOutcome) {
        self.executing = false;

        match outcome {
            Ok(output) => {
                Event::publish(
                    &self.event_publisher,
                    Event::FinishExecution(FinishExecutionEvent {
                        timestamp: SystemTime::now(),
                        index: output.block.index,
                        state_hash: output.block.state_hash,
                        batch_size: output.block.size(),
                        tx_draft: output.tx_draft,
                    }),
                );

                // A locally executed block is registered unconditionally: local execution already
                // validated it.
                let (is_new, key) =
                    self.tracker
                        .add_candidate(output.block, Some(output.state), CandidateOrigin::Local);
                if is_new {
                    Event::publish(
                        &self.event_publisher,
                        Event::InsertCandidate(InsertCandidateEvent {
                            timestamp: SystemTime::now(),
                            index: key.index,
                            state_hash: key.state_hash,
                            origin: CandidateOrigin::Local,
                        }),
                    );
                }

                match self.anchor {
                    Some(anchor) if key.index <= anchor.index => {
                        self.apply_approval(key, &anchor);
                    }
                    // The block supersedes the known anchor position (or no anchor is known yet):
                    // fresh local progress should be confirmed against the ledger sooner than the
                    // steady-state retry.
                    _ => {
                        let sooner = Instant::now() + self.config.pull_state_new_block_delay;
                        if sooner < self.pull_deadline {
                            self.pull_deadline = sooner;
                        }
                    }
                }
            }
            Err(error) => Event::publish(
                &self.event_publisher,
                Event::FailExecution(FailExecutionEvent {
                    timestamp: SystemTime::now(),
                    error,
                }),
            ),
        }

        self.maybe_dispatch();
    }

    fn on_anchor_observation(&mut self, observed: Anchor) {
        // An equal-index observation with a different output is an on-ledger output rotation at
        // an unchanged position; the published status must track the new output id.
        let adopt = match self.anchor {
            None => true,
            Some(known) => {
                observed.index > known.index
                    || (observed.index == known.index && observed.output != known.output)
            }
        };

        if adopt {
            self.anchor = Some(observed);
            Event::publish(
                &self.event_publisher,
                Event::ObserveAnchor(ObserveAnchorEvent {
                    timestamp: SystemTime::now(),
                    anchor: observed,
                }),
            );
        }

        // Whether or not the observation was adopted as the current anchor, it can approve
        // candidates at its position. This is how a confirming-output reply for an already
        // superseded position approves a catch-up candidate.
        if observed.index > self.solid.index() {
            for key in self.tracker.keys_at(observed.index) {
                self.apply_approval(key, &observed);
            }
        }
    }

    fn on_peer_block(&mut self, origin: VerifyingKey, block: Block) {
        let index = block.index;
        if !self.tracker.is_awaiting(index) {
            // Unsolicited; dropping it un-cached prevents peer-block amplification.
            Event::publish(
                &self.event_publisher,
                Event::DiscardPeerBlock(DiscardPeerBlockEvent {
                    timestamp: SystemTime::now(),
                    origin,
                    index,
                }),
            );
            return;
        }

        let state_hash = block.state_hash;
        let (is_new, key) = self
            .tracker
            .add_candidate(block, None, CandidateOrigin::Peer(origin));
        Event::publish(
            &self.event_publisher,
            Event::ReceivePeerBlock(ReceivePeerBlockEvent {
                timestamp: SystemTime::now(),
                origin,
                index,
                state_hash,
            }),
        );
        if is_new {
            Event::publish(
                &self.event_publisher,
                Event::InsertCandidate(InsertCandidateEvent {
                    timestamp: SystemTime::now(),
                    index: key.index,
                    state_hash: key.state_hash,
                    origin: CandidateOrigin::Peer(origin),
                }),
            );
        }

        if let Some(anchor) = self.anchor {
            self.apply_approval(key, &anchor);
        }

        // If the candidate is still unapproved but its block names the output that confirms it,
        // ask the ledger for that output directly instead of waiting for the live anchor to
        // re-arrive. At most once per candidate.
        let output_to_pull = match self.tracker.candidate(key) {
            Some(candidate) if !candidate.is_approved() && !candidate.output_pull_requested() => {
                candidate.approving_output()
            }
            _ => None,
        };
        if let Some(output) = output_to_pull {
            self.ledger.pull_confirmed_output(self.config.chain, output);
            self.tracker.mark_output_pull_requested(key);
            Event::publish(
                &self.event_publisher,
                Event::PullConfirmedOutput(PullConfirmedOutputEvent {
                    timestamp: SystemTime::now(),
                    chain: self.config.chain,
                    output,
                }),
            );
        }
    }

    /// Check one candidate against one anchor, publishing the approval or conflict.
    fn apply_approval(&mut self, key: CandidateKey, anchor: &Anchor) {
        match self.tracker.check_approval(key, anchor) {
            Approval::NewlyApproved => Event::publish(
                &self.event_publisher,
                Event::ApproveCandidate(ApproveCandidateEvent {
                    timestamp: SystemTime::now(),
                    index: key.index,
                    state_hash: key.state_hash,
                    output: anchor.output,
                }),
            ),
            Approval::Conflict => {
                // Two distinct candidates hashing to the anchor's commitment indicates a bug or
                // adversarial input. The first winner stands.
                let approved_hash = self
                    .tracker
                    .keys_at(key.index)
                    .into_iter()
                    .find(|other| {
                        self.tracker
                            .candidate(*other)
                            .map(|candidate| candidate.is_approved())
                            .unwrap_or(false)
                    })
                    .map(|other| other.state_hash)
                    .unwrap_or_default();
                Event::publish(
                    &self.event_publisher,
                    Event::HashConflict(HashConflictEvent {
                        timestamp: SystemTime::now(),
                        index: key.index,
                        approved_hash,
                        conflicting_hash: key.state_hash,
                    }),
                );
            }
            Approval::AlreadyApproved | Approval::NotApproved => (),
        }
    }

    /// The four-step reconciliation pass. Every step is idempotent and a no-op when its
    /// precondition is unmet.
    fn take_action(&mut self) {
        let now = Instant::now();

        // 1. Pull the anchor if the retry deadline elapsed.
        if now >= self.pull_deadline {
            self.ledger.pull_state(self.config.chain);
            self.pull_deadline = now + self.config.pull_state_retry;
            if self.stage == SyncStage::Uninitialized {
                self.stage = SyncStage::Pulling;
            }
            Event::publish(
                &self.event_publisher,
                Event::PullAnchor(PullAnchorEvent {
                    timestamp: SystemTime::now(),
                    chain: self.config.chain,
                }),
            );
        }

        // 2. Keep the awaited range covering the anchor, bounded by the sync window ahead of the
        // solid position, and re-broadcast fetches for awaited positions that still have no
        // candidate. Running this every pass slides the window forward as promotions land.
        if let Some(anchor) = self.anchor {
            if anchor.index > self.solid.index() {
                let to = anchor.index.min(self.solid.index() + self.config.sync_window);
                self.tracker.await_range(self.solid.index() + 1, to);
            }
        }
        for index in self.tracker.due_fetches(now, self.config.fetch_block_retry) {
            self.network.request_block(self.config.chain, index);
            Event::publish(
                &self.event_publisher,
                Event::RequestBlock(RequestBlockEvent {
                    timestamp: SystemTime::now(),
                    index,
                }),
            );
        }

        // 3. Promote while an approved candidate sits immediately after the solid position.
        while let Some(candidate) = self.tracker.take_approved(self.solid.index() + 1) {
            let (block, state) = candidate.into_parts();
            let new_solid = match state {
                Some(state) => state,
                None => {
                    let mut derived = self.solid.clone();
                    // Safety: take_approved was called with index solid + 1, so the block applies.
                    derived.apply_block(&block).unwrap();
                    // Approval was decided on the hash the block declared. A peer block whose
                    // updates do not actually produce that state is dropped here, before it can
                    // become solid; the position stays awaited, so the genuine block can still
                    // arrive.
                    let derived_hash = derived.hash();
                    if derived_hash != block.state_hash {
                        Event::publish(
                            &self.event_publisher,
                            Event::RejectBlock(RejectBlockEvent {
                                timestamp: SystemTime::now(),
                                index: block.index,
                                declared_hash: block.state_hash,
                                derived_hash,
                            }),
                        );
                        continue;
                    }
                    derived
                }
            };

            self.solid = new_solid;
            self.solid_hash = self.solid.hash();
            self.tracker.evict_at_or_below(self.solid.index());
            self.transition_pending = true;

            self.snapshots.store_async(
                SnapshotInfo {
                    index: self.solid.index(),
                    commitment: self.solid_hash,
                },
                self.solid.clone(),
            );
        }

        // 4. Notify observers, exactly once per newly reached solid state, once it matches the
        // anchor.
        if self.transition_pending {
            if let Some(anchor) = self.anchor {
                if self.solid_hash == anchor.commitment
                    && self.last_notified_hash != Some(self.solid_hash)
                {
                    Event::publish(
                        &self.event_publisher,
                        Event::StateTransition(StateTransitionEvent {
                            timestamp: SystemTime::now(),
                            state: self.solid.clone(),
                            anchor,
                        }),
                    );
                    Event::publish(
                        &self.event_publisher,
                        Event::Synced(SyncedEvent {
                            timestamp: SystemTime::now(),
                            index: self.solid.index(),
                            output: anchor.output,
                        }),
                    );
                    self.last_notified_hash = Some(self.solid_hash);
                    self.transition_pending = false;
                }
            }
        }
    }

    /// Rebuild the whole [SyncStatus] snapshot and publish it for external readers. Runs every
    /// pass, so status read-outs reflect the latest anchor/solid comparison even without progress.
    fn publish_status(&mut self) {
        if let Some(anchor) = self.anchor {
            self.stage = if self.solid_hash == anchor.commitment {
                SyncStage::Synced
            } else {
                SyncStage::AwaitingApproval
            };
        }

        let status = SyncStatus {
            synced: self.stage == SyncStage::Synced,
            stage: self.stage,
            solid_index: self.solid.index(),
            solid_hash: self.solid_hash,
            solid_timestamp: self.solid.timestamp(),
            anchor: self.anchor,
        };

        // Safety: the only other lock users are readers that clone the value out; none of them
        // can panic while holding the lock.
        *self.sync_status.lock().unwrap() = status;
    }
}
