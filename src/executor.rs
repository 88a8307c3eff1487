//! The deterministic executor: runs an ordered batch of requests against a clone of the previous
//! state, producing a [Block] and a candidate [anchoring-transaction draft](AnchorTxDraft).
//!
//! The executor has no peer or network awareness. It is invoked as a non-blocking operation through
//! [start_execution]: the caller is released immediately and receives the result through a completion
//! callback, so the state manager never blocks on a slow contract. The state manager guarantees that
//! at most one execution is outstanding per chain at any time.
//!
//! Determinism is the load-bearing property here: executing the same batch twice from the same
//! previous state, timestamp, and entropy must produce bit-identical blocks. To that end, per-request
//! timestamps are derived by incrementing the batch timestamp by one nanosecond per request (when the
//! batch timestamp is non-zero), and per-request entropy is derived by hashing the previous entropy
//! value. Wall-clock reads never enter execution.

use std::fmt;
use std::sync::Arc;
use std::thread;

use crate::types::{
    hash_data, ApplyBlockError, Block, BlockIndex, ChainAddress, CryptoHash, Entropy, Request,
    StateMutations, StateUpdate, Timestamp, VerifyingKey, VirtualState,
};

/// The per-request sandboxed contract execution function: a pure function from (state, request) to a
/// set of state mutations.
///
/// Implementors are expected to be *deterministic*: `apply` must evaluate to the same value every time
/// it is called with the same arguments. The provided `entropy` is the only sanctioned source of
/// intra-request randomness.
pub trait RequestExecutor: Send + Sync + 'static {
    type Error: fmt::Display;

    fn apply(
        &self,
        state: &VirtualState,
        request: &Request,
        timestamp: Timestamp,
        entropy: &Entropy,
    ) -> Result<StateMutations, Self::Error>;
}

/// Everything one execution round needs: the previous state, the agreed batch, and the deterministic
/// time/randomness seeds fixed by the upstream agreement protocol.
pub struct ExecutionTask {
    pub chain: ChainAddress,
    pub previous_state: VirtualState,
    pub requests: Vec<Request>,
    pub timestamp: Timestamp,
    pub entropy: Entropy,
    /// Which committee member led the agreement round that produced this batch. Informational; not
    /// used by execution itself.
    pub leader: Option<VerifyingKey>,
}

/// The product of a successful execution round.
pub struct BatchOutput {
    pub block: Block,
    /// The state resulting from applying `block` to the previous state. Computed on a clone; the
    /// caller's copy of the previous state is never mutated.
    pub state: VirtualState,
    pub tx_draft: AnchorTxDraft,
}

pub type ExecutionOutcome = Result<BatchOutput, ExecuteError>;

/// A batch-level execution failure. Individual request failures are *not* represented here: they are
/// recorded in the failing request's [StateUpdate] and the batch continues.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ExecuteError {
    /// The batch contained no requests.
    EmptyBatch,
    /// Execution produced no state updates. Guards an invariant that cannot be broken by the code in
    /// this module; reported rather than asserted.
    NoUpdates,
    Apply(ApplyBlockError),
    TxBuild(AnchorTxBuildError),
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteError::EmptyBatch => write!(f, "batch contains no requests"),
            ExecuteError::NoUpdates => write!(f, "execution produced no state updates"),
            ExecuteError::Apply(ApplyBlockError::IndexMismatch { expected, actual }) => write!(
                f,
                "resulting block computed for index {} but previous state expects {}",
                actual, expected
            ),
            ExecuteError::TxBuild(err) => write!(f, "anchoring transaction: {}", err),
        }
    }
}

/// Run a batch in the background, delivering the outcome through `on_finish`.
///
/// Fails fast (synchronously, without spawning) on an empty batch. The spawned task owns a clone of
/// the previous state; the caller's authoritative copy is untouched either way.
pub(crate) fn start_execution<E, F>(
    executor: Arc<E>,
    task: ExecutionTask,
    on_finish: F,
) -> Result<(), ExecuteError>
where
    E: RequestExecutor,
    F: FnOnce(ExecutionOutcome) + Send + 'static,
{
    if task.requests.is_empty() {
        return Err(ExecuteError::EmptyBatch);
    }

    thread::spawn(move || on_finish(execute_batch(executor.as_ref(), &task)));

    Ok(())
}

/// Execute a batch synchronously. Public so that executors can be exercised and replayed directly,
/// e.g. to audit a peer-supplied block against a local re-execution.
pub fn execute_batch<E: RequestExecutor>(executor: &E, task: &ExecutionTask) -> ExecutionOutcome {
    if task.requests.is_empty() {
        return Err(ExecuteError::EmptyBatch);
    }

    let mut speculative = task.previous_state.clone();
    let mut timestamp = task.timestamp;
    let mut entropy = task.entropy;

    let mut updates: Vec<StateUpdate> = Vec::with_capacity(task.requests.len());
    for request in &task.requests {
        let mut update = StateUpdate::new(request.id, timestamp);
        match executor.apply(&speculative, request, timestamp, &entropy) {
            Ok(mutations) => update.mutations = mutations,
            // A failing request produces an (empty) update recording the error; the batch goes on.
            Err(err) => update.error = Some(err.to_string()),
        }
        speculative.apply_update(&update);
        updates.push(update);

        // Distinct timestamp per request, remaining deterministic.
        if timestamp != 0 {
            timestamp += 1;
        }
        entropy = hash_data(&entropy);
    }

    if updates.is_empty() {
        return Err(ExecuteError::NoUpdates);
    }

    // The block's position is fixed to previous + 1. Its resulting state hash is computed by
    // replaying the block on a fresh clone of the previous state.
    let block = Block::new(task.previous_state.index() + 1, [0u8; 32], updates);
    let mut result_state = task.previous_state.clone();
    result_state
        .apply_block(&block)
        .map_err(ExecuteError::Apply)?;
    let block = Block {
        state_hash: result_state.hash(),
        ..block
    };

    let mut tx_builder = AnchorTxBuilder::new(task.chain);
    tx_builder
        .set_state_params(block.index, block.state_hash, result_state.timestamp())
        .map_err(ExecuteError::TxBuild)?;
    let tx_draft = tx_builder.build().map_err(ExecuteError::TxBuild)?;

    Ok(BatchOutput {
        block,
        state: result_state,
        tx_draft,
    })
}

/// A candidate ledger-anchoring transaction: the commitment the committee will try to post to the
/// external ledger for this block. The byte-level transaction encoding belongs to the ledger
/// collaborator, not to this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AnchorTxDraft {
    pub chain: ChainAddress,
    pub index: BlockIndex,
    pub commitment: CryptoHash,
    pub timestamp: Timestamp,
}

/// Accumulates the parameters of an [AnchorTxDraft] and finalizes it once the resulting state hash is
/// known.
pub struct AnchorTxBuilder {
    chain: ChainAddress,
    state_params: Option<(BlockIndex, CryptoHash, Timestamp)>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AnchorTxBuildError {
    StateParamsAlreadySet,
    StateParamsMissing,
}

impl fmt::Display for AnchorTxBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorTxBuildError::StateParamsAlreadySet => write!(f, "state params already set"),
            AnchorTxBuildError::StateParamsMissing => write!(f, "state params missing"),
        }
    }
}

impl AnchorTxBuilder {
    pub fn new(chain: ChainAddress) -> AnchorTxBuilder {
        AnchorTxBuilder {
            chain,
            state_params: None,
        }
    }

    /// Fix the (position, commitment, timestamp) triple the transaction will carry. May be called
    /// exactly once per builder.
    pub fn set_state_params(
        &mut self,
        index: BlockIndex,
        commitment: CryptoHash,
        timestamp: Timestamp,
    ) -> Result<(), AnchorTxBuildError> {
        if self.state_params.is_some() {
            return Err(AnchorTxBuildError::StateParamsAlreadySet);
        }
        self.state_params = Some((index, commitment, timestamp));
        Ok(())
    }

    pub fn build(self) -> Result<AnchorTxDraft, AnchorTxBuildError> {
        let (index, commitment, timestamp) = self
            .state_params
            .ok_or(AnchorTxBuildError::StateParamsMissing)?;
        Ok(AnchorTxDraft {
            chain: self.chain,
            index,
            commitment,
            timestamp,
        })
    }
}
