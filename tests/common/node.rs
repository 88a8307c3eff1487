use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anchorsync_rs::chain::{BatchSender, Chain, ChainSpec, Configuration, SyncStatusReader};
use anchorsync_rs::events::{
    ApproveCandidateEvent, DiscardPeerBlockEvent, FailExecutionEvent, FinishExecutionEvent,
    InsertCandidateEvent, PullConfirmedOutputEvent, RejectBlockEvent, StateTransitionEvent,
    SyncedEvent,
};
use anchorsync_rs::executor::AnchorTxDraft;
use anchorsync_rs::snapshots::SnapshotInfo;
use anchorsync_rs::types::{
    BlockIndex, CryptoHash, Entropy, OutputId, Request, SyncStatus, Timestamp,
};
use anchorsync_rs::ExecutionBatch;

use crate::common::{counter_app::CounterApp, ledger::MockLedger, network::MockCommittee,
    snapshots::MemSnapshots};

pub(crate) const CHAIN_ADDRESS: [u8; 32] = [7; 32];

pub(crate) const SYNC_WINDOW: u64 = 8;

/// Everything the integration tests want to assert on, recorded by event handlers.
#[derive(Clone, Default)]
pub(crate) struct EventLog {
    pub(crate) inserted_candidates: Vec<(BlockIndex, CryptoHash)>,
    pub(crate) approved_candidates: Vec<(BlockIndex, CryptoHash)>,
    pub(crate) state_transitions: Vec<BlockIndex>,
    pub(crate) synced: Vec<BlockIndex>,
    pub(crate) discarded_peer_blocks: Vec<BlockIndex>,
    pub(crate) rejected_blocks: Vec<BlockIndex>,
    pub(crate) finished_executions: Vec<AnchorTxDraft>,
    pub(crate) failed_executions: Vec<String>,
    pub(crate) pulled_confirmed_outputs: Vec<OutputId>,
}

/// One chain node under test: a [Chain] wired to the [CounterApp], the mock ledger, and the mock
/// committee, with every interesting event recorded into an [EventLog].
pub(crate) struct Node {
    batch_sender: BatchSender,
    status_reader: SyncStatusReader,
    events: Arc<Mutex<EventLog>>,
    // Keeps the background threads alive for the lifetime of the node.
    _chain: Chain,
}

impl Node {
    pub(crate) fn new(ledger: MockLedger, network: MockCommittee, snapshots: MemSnapshots) -> Node {
        Node::started_from(ledger, network, snapshots, None)
    }

    pub(crate) fn started_from(
        ledger: MockLedger,
        network: MockCommittee,
        snapshots: MemSnapshots,
        restore_from: Option<SnapshotInfo>,
    ) -> Node {
        let configuration = Configuration::builder()
            .chain_address(CHAIN_ADDRESS)
            .pull_state_retry(Duration::from_millis(100))
            .pull_state_new_block_delay(Duration::from_millis(20))
            .fetch_block_retry(Duration::from_millis(100))
            .sync_window(SYNC_WINDOW)
            .tick(Duration::from_millis(10))
            .log_events(true)
            .build();

        let events = Arc::new(Mutex::new(EventLog::default()));

        let spec = ChainSpec::builder()
            .executor(CounterApp)
            .ledger(ledger)
            .network(network)
            .snapshots(snapshots)
            .configuration(configuration)
            .on_insert_candidate({
                let events = Arc::clone(&events);
                move |event: &InsertCandidateEvent| {
                    events
                        .lock()
                        .unwrap()
                        .inserted_candidates
                        .push((event.index, event.state_hash))
                }
            })
            .on_approve_candidate({
                let events = Arc::clone(&events);
                move |event: &ApproveCandidateEvent| {
                    events
                        .lock()
                        .unwrap()
                        .approved_candidates
                        .push((event.index, event.state_hash))
                }
            })
            .on_state_transition({
                let events = Arc::clone(&events);
                move |event: &StateTransitionEvent| {
                    events
                        .lock()
                        .unwrap()
                        .state_transitions
                        .push(event.state.index())
                }
            })
            .on_synced({
                let events = Arc::clone(&events);
                move |event: &SyncedEvent| events.lock().unwrap().synced.push(event.index)
            })
            .on_discard_peer_block({
                let events = Arc::clone(&events);
                move |event: &DiscardPeerBlockEvent| {
                    events
                        .lock()
                        .unwrap()
                        .discarded_peer_blocks
                        .push(event.index)
                }
            })
            .on_finish_execution({
                let events = Arc::clone(&events);
                move |event: &FinishExecutionEvent| {
                    events
                        .lock()
                        .unwrap()
                        .finished_executions
                        .push(event.tx_draft)
                }
            })
            .on_fail_execution({
                let events = Arc::clone(&events);
                move |event: &FailExecutionEvent| {
                    events
                        .lock()
                        .unwrap()
                        .failed_executions
                        .push(event.error.to_string())
                }
            })
            .on_reject_block({
                let events = Arc::clone(&events);
                move |event: &RejectBlockEvent| {
                    events.lock().unwrap().rejected_blocks.push(event.index)
                }
            })
            .on_pull_confirmed_output({
                let events = Arc::clone(&events);
                move |event: &PullConfirmedOutputEvent| {
                    events
                        .lock()
                        .unwrap()
                        .pulled_confirmed_outputs
                        .push(event.output)
                }
            })
            .restore_from(restore_from);

        let chain = spec.build().start();

        Node {
            batch_sender: chain.batch_sender(),
            status_reader: chain.sync_status_reader(),
            events,
            _chain: chain,
        }
    }

    pub(crate) fn submit(&self, requests: Vec<Request>, timestamp: Timestamp, entropy: Entropy) {
        self.batch_sender
            .submit(ExecutionBatch {
                requests,
                timestamp,
                entropy,
                leader: None,
            })
            .unwrap()
    }

    pub(crate) fn status(&self) -> SyncStatus {
        self.status_reader.status()
    }

    pub(crate) fn events(&self) -> EventLog {
        self.events.lock().unwrap().clone()
    }
}
