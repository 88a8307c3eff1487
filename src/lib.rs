/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust library for keeping the state of a committee-run chain in step with the anchor the
//! committee posts on an external ledger.
//!
//! Each chain periodically commits a hash of its state into a ledger output (the "anchor"). This
//! crate implements the core that runs on every committee node: a deterministic executor that
//! turns agreed request batches into blocks and anchoring-transaction drafts, a candidate tracker
//! that holds not-yet-confirmed blocks (locally executed or relayed by peers), and a state manager
//! that reconciles the two against the observed anchor, promoting the approved candidate into the
//! node's one solid state.
//!
//! The anchor is ground truth: a candidate becomes the solid state only when its committed state
//! hash equals the anchor's commitment at the same position, never because it was produced
//! locally. A node is "synced" exactly when its solid state's hash equals the current anchor's
//! commitment.
//!
//! The crate is deliberately incomplete on its own. Byzantine agreement on batches, the ledger
//! client, transaction signing and posting, and snapshot persistence all live behind traits the
//! library user implements: [RequestExecutor](executor::RequestExecutor),
//! [LedgerConnector](networking::LedgerConnector),
//! [CommitteeNetwork](networking::CommitteeNetwork), and
//! [SnapshotStore](snapshots::SnapshotStore). Wire them together with
//! [ChainSpec](chain::ChainSpec) and start a [Chain](chain::Chain); see [crate::chain].

pub mod candidates;

pub mod chain;

pub mod events;

pub mod executor;

pub mod logging;

pub mod networking;

pub mod snapshots;

pub mod types;

pub(crate) mod event_bus;

pub(crate) mod manager;

pub use manager::ExecutionBatch;
