//! Definitions of the events emitted by the state manager, for event handling and logging.
//! Note: an event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::candidates::CandidateOrigin;
use crate::executor::{AnchorTxDraft, ExecuteError};
use crate::types::{
    Anchor, BlockIndex, ChainAddress, CryptoHash, OutputId, VerifyingKey, VirtualState,
};

pub enum Event {
    // Events that advance the chain's solid state.
    InsertCandidate(InsertCandidateEvent),
    ApproveCandidate(ApproveCandidateEvent),
    StateTransition(StateTransitionEvent),
    Synced(SyncedEvent),
    // Events that involve asking a collaborator for something.
    PullAnchor(PullAnchorEvent),
    PullConfirmedOutput(PullConfirmedOutputEvent),
    RequestBlock(RequestBlockEvent),
    // Events that involve receiving an inbound observation.
    ObserveAnchor(ObserveAnchorEvent),
    ReceivePeerBlock(ReceivePeerBlockEvent),
    DiscardPeerBlock(DiscardPeerBlockEvent),
    // Execution events.
    StartExecution(StartExecutionEvent),
    FinishExecution(FinishExecutionEvent),
    FailExecution(FailExecutionEvent),
    // Anomalies.
    HashConflict(HashConflictEvent),
    RejectBlock(RejectBlockEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus shuts down before the state manager. Events sent in that window are
            // dropped.
            let _ = event_publisher.send(event);
        }
    }
}

/// A block entered the candidate tracker.
pub struct InsertCandidateEvent {
    pub timestamp: SystemTime,
    pub index: BlockIndex,
    pub state_hash: CryptoHash,
    pub origin: CandidateOrigin,
}

/// A candidate's committed state hash matched the anchor's commitment at its position.
pub struct ApproveCandidateEvent {
    pub timestamp: SystemTime,
    pub index: BlockIndex,
    pub state_hash: CryptoHash,
    pub output: OutputId,
}

/// The solid state advanced to a newly approved candidate. Fired at most once per distinct newly
/// reached solid state.
pub struct StateTransitionEvent {
    pub timestamp: SystemTime,
    /// A clone of the new solid state.
    pub state: VirtualState,
    pub anchor: Anchor,
}

/// The node reached a solid state whose hash equals the anchor's commitment. Fired at most once per
/// distinct newly reached solid position.
pub struct SyncedEvent {
    pub timestamp: SystemTime,
    pub index: BlockIndex,
    pub output: OutputId,
}

/// The state manager asked the ledger for the chain's current anchor.
pub struct PullAnchorEvent {
    pub timestamp: SystemTime,
    pub chain: ChainAddress,
}

/// The state manager asked the ledger for the specific output confirming a peer-relayed block.
pub struct PullConfirmedOutputEvent {
    pub timestamp: SystemTime,
    pub chain: ChainAddress,
    pub output: OutputId,
}

/// The state manager broadcast a fetch for a missing block to its committee.
pub struct RequestBlockEvent {
    pub timestamp: SystemTime,
    pub index: BlockIndex,
}

/// An anchor observation arrived from the ledger connector and was accepted as the current anchor.
pub struct ObserveAnchorEvent {
    pub timestamp: SystemTime,
    pub anchor: Anchor,
}

/// A peer-relayed block at an awaited position was absorbed.
pub struct ReceivePeerBlockEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub index: BlockIndex,
    pub state_hash: CryptoHash,
}

/// A peer-relayed block at a position that was not awaited was dropped.
pub struct DiscardPeerBlockEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub index: BlockIndex,
}

/// An agreed batch was dispatched to the executor.
pub struct StartExecutionEvent {
    pub timestamp: SystemTime,
    pub index: BlockIndex,
    pub batch_size: usize,
    pub leader: Option<VerifyingKey>,
}

/// The executor completed a batch and the resulting block was registered as a candidate.
///
/// Carries the [anchoring-transaction draft](AnchorTxDraft) for the block: a handler registered for
/// this event is how the committee's transaction-signing machinery receives drafts to post.
pub struct FinishExecutionEvent {
    pub timestamp: SystemTime,
    pub index: BlockIndex,
    pub state_hash: CryptoHash,
    pub batch_size: usize,
    pub tx_draft: AnchorTxDraft,
}

/// The executor failed a whole batch. The chain keeps running; nothing was applied.
pub struct FailExecutionEvent {
    pub timestamp: SystemTime,
    pub error: ExecuteError,
}

/// A candidate's hash matched the anchor while a different candidate at the same position was
/// already approved. Indicates a bug or adversarial peer input; the first approval stands.
pub struct HashConflictEvent {
    pub timestamp: SystemTime,
    pub index: BlockIndex,
    pub approved_hash: CryptoHash,
    pub conflicting_hash: CryptoHash,
}

/// An approved peer block failed promotion: applying its updates did not produce the state hash
/// it declared (and was approved on). Indicates a bug or adversarial peer input. The candidate is
/// dropped and the position stays awaited, so the genuine block can still arrive.
pub struct RejectBlockEvent {
    pub timestamp: SystemTime,
    pub index: BlockIndex,
    pub declared_hash: CryptoHash,
    pub derived_hash: CryptoHash,
}
