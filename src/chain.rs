/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, start, and interact with a chain.
//!
//! A [Chain] is one committee-run chain anchored on an external ledger. A process may run any
//! number of independent chains; each gets its own background threads and channels.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the chain](ChainSpec) with:
//!   1. `ChainSpec::builder` to construct a `ChainSpecBuilder`,
//!   2. The setters of the `ChainSpecBuilder`, and
//!   3. The `ChainSpecBuilder::build` method to construct a [ChainSpec],
//! - The function to [start](ChainSpec::start) a [Chain] given its specification,
//! - [The type](Chain) which keeps the chain alive, and its two handles: the [BatchSender]
//!   through which the upstream agreement protocol submits agreed batches, and the
//!   [SyncStatusReader] through which any thread reads the current synchronization status.
//!
//! ## Starting a chain
//!
//! Here is an example that demonstrates how to build and start a chain using the builder pattern:
//!
//! ```ignore
//! let chain =
//!     ChainSpec::builder()
//!     .executor(executor)
//!     .ledger(ledger)
//!     .network(network)
//!     .snapshots(snapshots)
//!     .configuration(configuration)
//!     .on_state_transition(transition_handler)
//!     .on_finish_execution(finish_handler)
//!     .build()
//!     .start()
//! ```
//!
//! ### Required setters
//!
//! The required setters are for providing the trait implementations required to run a chain:
//! - `.executor(...)`
//! - `.ledger(...)`
//! - `.network(...)`
//! - `.snapshots(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from
//! [crate::events]:
//! - `.on_insert_candidate(...)`
//! - `.on_approve_candidate(...)`
//! - `.on_state_transition(...)`
//! - `.on_synced(...)`
//! - `.on_pull_anchor(...)`
//! - `.on_pull_confirmed_output(...)`
//! - `.on_request_block(...)`
//! - `.on_observe_anchor(...)`
//! - `.on_receive_peer_block(...)`
//! - `.on_discard_peer_block(...)`
//! - `.on_start_execution(...)`
//! - `.on_finish_execution(...)`
//! - `.on_fail_execution(...)`
//! - `.on_hash_conflict(...)`
//! - `.on_reject_block(...)`
//!
//! and `.restore_from(...)` for naming a snapshot to restore the solid state from at startup.
//!
//! The chain's [configuration](Configuration) can also be defined using the builder pattern, for
//! example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .chain_address(chain_address)
//!     .pull_state_retry(Duration::from_secs(2))
//!     .pull_state_new_block_delay(Duration::from_millis(200))
//!     .fetch_block_retry(Duration::from_secs(3))
//!     .sync_window(100)
//!     .tick(Duration::from_millis(50))
//!     .log_events(true)
//!     .build()
//! ```

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::event_bus::*;
use crate::events::*;
use crate::executor::RequestExecutor;
use crate::manager::{ChainEvent, ExecutionBatch, ManagerConfiguration, StateManager};
use crate::networking::{start_polling, CommitteeNetwork, LedgerConnector};
use crate::snapshots::{SnapshotInfo, SnapshotStore};
use crate::types::{ChainAddress, SyncStage, SyncStatus, VirtualState};

/// Stores the user-defined parameters required to run a chain, that is:
/// 1. The [address](ChainAddress) identifying the chain on the external ledger.
/// 2. The steady-state interval between anchor pulls from the ledger.
/// 3. The shortened anchor-pull delay used right after fresh local progress, so a newly executed
///    block is confirmed against the ledger sooner.
/// 4. The interval after which a block request for a missing position is re-broadcast to the
///    committee.
/// 5. The sync window, i.e., how many positions ahead of the solid state are fetched at a time
///    while catching up. The window slides forward as promotions land, so an arbitrarily large
///    anchor jump never floods the committee with fetches.
/// 6. The tick, i.e., the longest the state manager sleeps waiting for input before running a
///    reconciliation pass anyway, which bounds how late the two timers above can fire.
/// 7. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Log Events
///
/// This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.chain_address(...)`
    - `.pull_state_retry(...)`
    - `.pull_state_new_block_delay(...)`
    - `.fetch_block_retry(...)`
    - `.sync_window(...)`
    - `.tick(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the chain's address on the external ledger. Required."))]
    pub chain_address: ChainAddress,
    #[builder(setter(doc = "Set the steady-state interval between anchor pulls. Required."))]
    pub pull_state_retry: Duration,
    #[builder(setter(doc = "Set the shortened anchor-pull delay used after fresh local progress. Required."))]
    pub pull_state_new_block_delay: Duration,
    #[builder(setter(doc = "Set the interval after which a missing-block request is re-broadcast. Required."))]
    pub fetch_block_retry: Duration,
    #[builder(setter(doc = "Set the number of positions ahead of the solid state that are fetched at a time while catching up. Required."))]
    pub sync_window: u64,
    #[builder(setter(doc = "Set the longest the state manager sleeps before running a pass anyway. Required."))]
    pub tick: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl From<&Configuration> for ManagerConfiguration {
    fn from(configuration: &Configuration) -> ManagerConfiguration {
        ManagerConfiguration {
            chain: configuration.chain_address,
            pull_state_retry: configuration.pull_state_retry,
            pull_state_new_block_delay: configuration.pull_state_new_block_delay,
            fetch_block_retry: configuration.fetch_block_retry,
            sync_window: configuration.sync_window,
            tick: configuration.tick,
        }
    }
}

/// Stores all necessary parameters and trait implementations required to run a [Chain].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ChainSpec]. On the builder call the following methods to construct a valid [ChainSpec].

    Required:
    - `.executor(...)`
    - `.ledger(...)`
    - `.network(...)`
    - `.snapshots(...)`
    - `.configuration(...)`

    Optional:
    - `.restore_from(...)`
    - `.on_insert_candidate(...)`
    - `.on_approve_candidate(...)`
    - `.on_state_transition(...)`
    - `.on_synced(...)`
    - `.on_pull_anchor(...)`
    - `.on_pull_confirmed_output(...)`
    - `.on_request_block(...)`
    - `.on_observe_anchor(...)`
    - `.on_receive_peer_block(...)`
    - `.on_discard_peer_block(...)`
    - `.on_start_execution(...)`
    - `.on_finish_execution(...)`
    - `.on_fail_execution(...)`
    - `.on_hash_conflict(...)`
    - `.on_reject_block(...)`
"))]
pub struct ChainSpec<E: RequestExecutor, L: LedgerConnector, P: CommitteeNetwork, S: SnapshotStore>
{
    // Required parameters
    #[builder(setter(doc = "Set the deterministic request executor. The argument must implement the [RequestExecutor](crate::executor::RequestExecutor) trait. Required."))]
    executor: E,
    #[builder(setter(doc = "Set the connection to a node of the external ledger. The argument must implement the [LedgerConnector](crate::networking::LedgerConnector) trait. Required."))]
    ledger: L,
    #[builder(setter(doc = "Set the connection to the chain's committee peers. The argument must implement the [CommitteeNetwork](crate::networking::CommitteeNetwork) trait. Required."))]
    network: P,
    #[builder(setter(doc = "Set the snapshot store. The argument must implement the [SnapshotStore](crate::snapshots::SnapshotStore) trait. Required."))]
    snapshots: S,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a chain. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(doc = "Name a snapshot to restore the solid state from at startup, instead of replaying from the origin state. Ignored if the store does not have it. Optional."))]
    restore_from: Option<SnapshotInfo>,
    #[builder(default, setter(transform = |handler: impl Fn(&InsertCandidateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertCandidateEvent>),
    doc = "Register a handler closure to be invoked after a block enters the candidate tracker. Optional."))]
    on_insert_candidate: Option<HandlerPtr<InsertCandidateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ApproveCandidateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ApproveCandidateEvent>),
    doc = "Register a handler closure to be invoked after a candidate is approved against the anchor. Optional."))]
    on_approve_candidate: Option<HandlerPtr<ApproveCandidateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StateTransitionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StateTransitionEvent>),
    doc = "Register a handler closure to be invoked after the solid state advances to a newly approved candidate. Optional."))]
    on_state_transition: Option<HandlerPtr<StateTransitionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SyncedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SyncedEvent>),
    doc = "Register a handler closure to be invoked after the solid state's hash matches the anchor's commitment. Optional."))]
    on_synced: Option<HandlerPtr<SyncedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PullAnchorEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PullAnchorEvent>),
    doc = "Register a handler closure to be invoked after the chain asks the ledger for its current anchor. Optional."))]
    on_pull_anchor: Option<HandlerPtr<PullAnchorEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PullConfirmedOutputEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PullConfirmedOutputEvent>),
    doc = "Register a handler closure to be invoked after the chain asks the ledger for a specific confirmed output. Optional."))]
    on_pull_confirmed_output: Option<HandlerPtr<PullConfirmedOutputEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RequestBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RequestBlockEvent>),
    doc = "Register a handler closure to be invoked after the chain broadcasts a request for a missing block. Optional."))]
    on_request_block: Option<HandlerPtr<RequestBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ObserveAnchorEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ObserveAnchorEvent>),
    doc = "Register a handler closure to be invoked after an observed anchor is adopted as the current anchor. Optional."))]
    on_observe_anchor: Option<HandlerPtr<ObserveAnchorEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceivePeerBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceivePeerBlockEvent>),
    doc = "Register a handler closure to be invoked after a peer-relayed block at an awaited position is absorbed. Optional."))]
    on_receive_peer_block: Option<HandlerPtr<ReceivePeerBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DiscardPeerBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DiscardPeerBlockEvent>),
    doc = "Register a handler closure to be invoked after an unsolicited peer-relayed block is dropped. Optional."))]
    on_discard_peer_block: Option<HandlerPtr<DiscardPeerBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartExecutionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartExecutionEvent>),
    doc = "Register a handler closure to be invoked after an agreed batch is dispatched to the executor. Optional."))]
    on_start_execution: Option<HandlerPtr<StartExecutionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FinishExecutionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FinishExecutionEvent>),
    doc = "Register a handler closure to be invoked after the executor completes a batch. The event carries the anchoring-transaction draft for the resulting block. Optional."))]
    on_finish_execution: Option<HandlerPtr<FinishExecutionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FailExecutionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FailExecutionEvent>),
    doc = "Register a handler closure to be invoked after the executor fails a whole batch. Optional."))]
    on_fail_execution: Option<HandlerPtr<FailExecutionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&HashConflictEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<HashConflictEvent>),
    doc = "Register a handler closure to be invoked after a candidate's hash collides with an already approved different candidate. Optional."))]
    on_hash_conflict: Option<HandlerPtr<HashConflictEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectBlockEvent>),
    doc = "Register a handler closure to be invoked after an approved block is rejected at promotion because its updates do not produce the hash it declared. Optional."))]
    on_reject_block: Option<HandlerPtr<RejectBlockEvent>>,
}

impl<E: RequestExecutor, L: LedgerConnector, P: CommitteeNetwork, S: SnapshotStore>
    ChainSpec<E, L, P, S>
{
    /// Starts all threads and channels associated with running a chain, and returns the handles to
    /// them in a [Chain] struct.
    ///
    /// If `restore_from` names a snapshot the store has, this blocks until the snapshot is loaded;
    /// this is the one deliberate synchronous join in the crate. Everything after startup is
    /// non-blocking.
    pub fn start(self) -> Chain {
        let mut snapshots = self.snapshots;
        let initial_state = match self.restore_from {
            Some(info) if snapshots.exists(info.index, info.commitment) => snapshots
                .load_async(info)
                .recv()
                .ok()
                .flatten()
                .unwrap_or_else(VirtualState::origin),
            _ => VirtualState::origin(),
        };

        let manager_configuration = ManagerConfiguration::from(&self.configuration);
        let log_events = self.configuration.log_events;

        let event_handlers = EventHandlers::new(
            log_events,
            self.on_insert_candidate,
            self.on_approve_candidate,
            self.on_state_transition,
            self.on_synced,
            self.on_pull_anchor,
            self.on_pull_confirmed_output,
            self.on_request_block,
            self.on_observe_anchor,
            self.on_receive_peer_block,
            self.on_discard_peer_block,
            self.on_start_execution,
            self.on_finish_execution,
            self.on_fail_execution,
            self.on_hash_conflict,
            self.on_reject_block,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, anchor_observations, peer_blocks) = start_polling(
            self.ledger.clone(),
            self.network.clone(),
            poller_shutdown_receiver,
        );

        let sync_status = Arc::new(Mutex::new(SyncStatus {
            synced: false,
            stage: SyncStage::Uninitialized,
            solid_index: initial_state.index(),
            solid_hash: initial_state.hash(),
            solid_timestamp: initial_state.timestamp(),
            anchor: None,
        }));

        let (chain_event_sender, chain_event_receiver) = mpsc::channel();
        let (manager_shutdown, manager_shutdown_receiver) = mpsc::channel();
        let manager = StateManager::new(
            manager_configuration,
            initial_state,
            Arc::new(self.executor),
            self.ledger,
            self.network,
            snapshots,
            chain_event_receiver,
            chain_event_sender.clone(),
            anchor_observations,
            peer_blocks,
            manager_shutdown_receiver,
            event_publisher,
            Arc::clone(&sync_status),
        );
        let manager = manager.start();

        let (event_bus_shutdown, event_bus_shutdown_receiver) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let event_bus = if !event_handlers.is_empty() {
            Some(start_event_bus(
                event_handlers,
                event_subscriber.unwrap(), // Safety: should be Some(...).
                event_bus_shutdown_receiver.unwrap(), // Safety: should be Some(...).
            ))
        } else {
            None
        };

        Chain {
            batch_sender: BatchSender {
                sender: chain_event_sender,
            },
            sync_status,
            poller: Some(poller),
            poller_shutdown,
            manager: Some(manager),
            manager_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a running chain. When this value is dropped, all
/// background threads are gracefully shut down.
pub struct Chain {
    batch_sender: BatchSender,
    sync_status: Arc<Mutex<SyncStatus>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    manager: Option<JoinHandle<()>>,
    manager_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Chain {
    /// Returns a [BatchSender] through which the upstream agreement protocol submits agreed
    /// batches. Cheap to clone and safe to use from any thread.
    pub fn batch_sender(&self) -> BatchSender {
        self.batch_sender.clone()
    }

    /// Returns a [SyncStatusReader] which can be used to read the chain's current synchronization
    /// status from any thread.
    pub fn sync_status_reader(&self) -> SyncStatusReader {
        SyncStatusReader {
            status: Arc::clone(&self.sync_status),
        }
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown in this function is important, as the threads make
        // assumptions about the validity of their channels based on this. The state manager
        // receives messages from the poller, and assumes that the poller will live longer than it.

        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| shutdown.send(()).unwrap());
        if self.event_bus.is_some() {
            self.event_bus.take().unwrap().join().unwrap();
        }

        self.manager_shutdown.send(()).unwrap();
        self.manager.take().unwrap().join().unwrap();

        self.poller_shutdown.send(()).unwrap();
        self.poller.take().unwrap().join().unwrap();
    }
}

/// Submits agreed batches into a chain's state manager. Submission is a non-blocking handoff; the
/// batch is executed once no earlier execution is outstanding.
#[derive(Clone)]
pub struct BatchSender {
    sender: Sender<ChainEvent>,
}

impl BatchSender {
    pub fn submit(&self, batch: ExecutionBatch) -> Result<(), ChainShutDownError> {
        self.sender
            .send(ChainEvent::Batch(batch))
            .map_err(|_| ChainShutDownError)
    }
}

/// The [Chain] the handle pointed at was dropped.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChainShutDownError;

/// Reads point-in-time [SyncStatus] snapshots published by the state manager. Snapshots are
/// rebuilt whole on every reconciliation pass; readers never see the live mutable state.
#[derive(Clone)]
pub struct SyncStatusReader {
    status: Arc<Mutex<SyncStatus>>,
}

impl SyncStatusReader {
    pub fn status(&self) -> SyncStatus {
        // Safety: the manager only ever replaces the value while holding the lock, and cannot
        // panic doing so.
        self.status.lock().unwrap().clone()
    }
}
