/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the chain's
//! [configuration](crate::chain::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [StateTransition](crate::events::StateTransitionEvent) is printed:
//!
//! ```text
//! StateTransition, 1701329264, 6, fNGCJyk, Id5u7f6
//! ```
//!
//! In the snippet:
//! - The third value is the new solid position.
//! - The fourth value is the first seven characters of the Base64 encoding of the new solid state's
//!   hash.
//! - The fifth value is the first seven characters of the Base64 encoding of the approving anchor
//!   output's id.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;

use crate::candidates::CandidateOrigin;
use crate::events::*;

// Names of each event in PascalCase for printing:
pub const INSERT_CANDIDATE: &str = "InsertCandidate";
pub const APPROVE_CANDIDATE: &str = "ApproveCandidate";
pub const STATE_TRANSITION: &str = "StateTransition";
pub const SYNCED: &str = "Synced";

pub const PULL_ANCHOR: &str = "PullAnchor";
pub const PULL_CONFIRMED_OUTPUT: &str = "PullConfirmedOutput";
pub const REQUEST_BLOCK: &str = "RequestBlock";

pub const OBSERVE_ANCHOR: &str = "ObserveAnchor";
pub const RECEIVE_PEER_BLOCK: &str = "ReceivePeerBlock";
pub const DISCARD_PEER_BLOCK: &str = "DiscardPeerBlock";

pub const START_EXECUTION: &str = "StartExecution";
pub const FINISH_EXECUTION: &str = "FinishExecution";
pub const FAIL_EXECUTION: &str = "FailExecution";

pub const HASH_CONFLICT: &str = "HashConflict";
pub const REJECT_BLOCK: &str = "RejectBlock";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertCandidateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_candidate_event: &InsertCandidateEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                INSERT_CANDIDATE,
                secs_since_unix_epoch(insert_candidate_event.timestamp),
                insert_candidate_event.index,
                first_seven_base64_chars(&insert_candidate_event.state_hash),
                origin_string(&insert_candidate_event.origin),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApproveCandidateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |approve_candidate_event: &ApproveCandidateEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                APPROVE_CANDIDATE,
                secs_since_unix_epoch(approve_candidate_event.timestamp),
                approve_candidate_event.index,
                first_seven_base64_chars(&approve_candidate_event.state_hash),
                first_seven_base64_chars(&approve_candidate_event.output),
            )
        };
        Box::new(logger)
    }
}

impl Logger for StateTransitionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |state_transition_event: &StateTransitionEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                STATE_TRANSITION,
                secs_since_unix_epoch(state_transition_event.timestamp),
                state_transition_event.state.index(),
                first_seven_base64_chars(&state_transition_event.state.hash()),
                first_seven_base64_chars(&state_transition_event.anchor.output),
            )
        };
        Box::new(logger)
    }
}

impl Logger for SyncedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |synced_event: &SyncedEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SYNCED,
                secs_since_unix_epoch(synced_event.timestamp),
                synced_event.index,
                first_seven_base64_chars(&synced_event.output),
            )
        };
        Box::new(logger)
    }
}

impl Logger for PullAnchorEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |pull_anchor_event: &PullAnchorEvent| {
            log::debug!(
                "{}, {}, {}",
                PULL_ANCHOR,
                secs_since_unix_epoch(pull_anchor_event.timestamp),
                first_seven_base64_chars(&pull_anchor_event.chain),
            )
        };
        Box::new(logger)
    }
}

impl Logger for PullConfirmedOutputEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |pull_confirmed_output_event: &PullConfirmedOutputEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                PULL_CONFIRMED_OUTPUT,
                secs_since_unix_epoch(pull_confirmed_output_event.timestamp),
                first_seven_base64_chars(&pull_confirmed_output_event.chain),
                first_seven_base64_chars(&pull_confirmed_output_event.output),
            )
        };
        Box::new(logger)
    }
}

impl Logger for RequestBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |request_block_event: &RequestBlockEvent| {
            log::debug!(
                "{}, {}, {}",
                REQUEST_BLOCK,
                secs_since_unix_epoch(request_block_event.timestamp),
                request_block_event.index,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ObserveAnchorEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |observe_anchor_event: &ObserveAnchorEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                OBSERVE_ANCHOR,
                secs_since_unix_epoch(observe_anchor_event.timestamp),
                observe_anchor_event.anchor.index,
                first_seven_base64_chars(&observe_anchor_event.anchor.commitment),
                first_seven_base64_chars(&observe_anchor_event.anchor.output),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePeerBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_peer_block_event: &ReceivePeerBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_PEER_BLOCK,
                secs_since_unix_epoch(receive_peer_block_event.timestamp),
                first_seven_base64_chars(&receive_peer_block_event.origin.to_bytes()),
                receive_peer_block_event.index,
                first_seven_base64_chars(&receive_peer_block_event.state_hash),
            )
        };
        Box::new(logger)
    }
}

impl Logger for DiscardPeerBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |discard_peer_block_event: &DiscardPeerBlockEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                DISCARD_PEER_BLOCK,
                secs_since_unix_epoch(discard_peer_block_event.timestamp),
                first_seven_base64_chars(&discard_peer_block_event.origin.to_bytes()),
                discard_peer_block_event.index,
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartExecutionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_execution_event: &StartExecutionEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_EXECUTION,
                secs_since_unix_epoch(start_execution_event.timestamp),
                start_execution_event.index,
                start_execution_event.batch_size,
                start_execution_event
                    .leader
                    .map(|leader| first_seven_base64_chars(&leader.to_bytes()))
                    .unwrap_or_default(),
            )
        };
        Box::new(logger)
    }
}

impl Logger for FinishExecutionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |finish_execution_event: &FinishExecutionEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                FINISH_EXECUTION,
                secs_since_unix_epoch(finish_execution_event.timestamp),
                finish_execution_event.index,
                first_seven_base64_chars(&finish_execution_event.state_hash),
                finish_execution_event.batch_size,
            )
        };
        Box::new(logger)
    }
}

impl Logger for FailExecutionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |fail_execution_event: &FailExecutionEvent| {
            log::warn!(
                "{}, {}, {}",
                FAIL_EXECUTION,
                secs_since_unix_epoch(fail_execution_event.timestamp),
                fail_execution_event.error,
            )
        };
        Box::new(logger)
    }
}

impl Logger for HashConflictEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |hash_conflict_event: &HashConflictEvent| {
            log::error!(
                "{}, {}, {}, {}, {}",
                HASH_CONFLICT,
                secs_since_unix_epoch(hash_conflict_event.timestamp),
                hash_conflict_event.index,
                first_seven_base64_chars(&hash_conflict_event.approved_hash),
                first_seven_base64_chars(&hash_conflict_event.conflicting_hash),
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_block_event: &RejectBlockEvent| {
            log::error!(
                "{}, {}, {}, {}, {}",
                REJECT_BLOCK,
                secs_since_unix_epoch(reject_block_event.timestamp),
                reject_block_event.index,
                first_seven_base64_chars(&reject_block_event.declared_hash),
                first_seven_base64_chars(&reject_block_event.derived_hash),
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a byte sequence by base64-encoding it and taking the first
// 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occurred before the Unix Epoch.")
        .as_secs()
}

fn origin_string(origin: &CandidateOrigin) -> String {
    match origin {
        CandidateOrigin::Local => "local".to_string(),
        CandidateOrigin::Peer(peer) => first_seven_base64_chars(&peer.to_bytes()),
    }
}
