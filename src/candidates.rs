/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory index of not-yet-confirmed blocks, keyed by (position, resulting state hash).
//!
//! Two candidates may legitimately coexist at the same position, e.g. one produced by local
//! execution and one relayed by a peer, until the externally observed [Anchor] approves one of them.
//! Approval is decided *only* against the anchor, never by preferring local origin; it is monotonic
//! (never revoked) and exclusive (one winner per position). Candidates are evicted only when a later
//! position becomes solid, never on age, so a legitimate-but-slow approval race is never lost.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::types::{Anchor, Block, BlockIndex, CryptoHash, OutputId, VerifyingKey, VirtualState};

/// Identifies a candidate in the tracker. Positions alone are not unique; the pair with the
/// resulting state hash is.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CandidateKey {
    pub index: BlockIndex,
    pub state_hash: CryptoHash,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CandidateOrigin {
    /// Produced by this node's own execution of an agreed batch.
    Local,
    /// Received from the identified committee peer.
    Peer(VerifyingKey),
}

/// A block proposal at a given position, pending approval against the anchor.
pub struct Candidate {
    block: Block,
    state: Option<VirtualState>,
    origin: CandidateOrigin,
    approved: bool,
    output_pull_requested: bool,
}

impl Candidate {
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// The state resulting from this candidate's block, if it was computed locally. Peer-relayed
    /// candidates carry none until promotion applies the block to a clone of the solid state.
    pub fn state(&self) -> Option<&VirtualState> {
        self.state.as_ref()
    }

    pub fn origin(&self) -> CandidateOrigin {
        self.origin
    }

    pub fn is_local(&self) -> bool {
        self.origin == CandidateOrigin::Local
    }

    pub fn is_approved(&self) -> bool {
        self.approved
    }

    pub fn approving_output(&self) -> Option<OutputId> {
        self.block.approving_output
    }

    pub fn output_pull_requested(&self) -> bool {
        self.output_pull_requested
    }

    /// Decompose into the block and the computed state (if any). Used by promotion, which consumes
    /// the winning candidate.
    pub(crate) fn into_parts(self) -> (Block, Option<VirtualState>) {
        (self.block, self.state)
    }
}

/// The result of checking one candidate against one anchor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Approval {
    /// The candidate's hash equals the anchor's commitment and no candidate at this position was
    /// approved before.
    NewlyApproved,
    /// This same candidate was already approved earlier; re-checking is a no-op.
    AlreadyApproved,
    /// The hashes do not match (or the positions differ); nothing changes.
    NotApproved,
    /// The hash matches the anchor, but a *different* candidate at this position is already
    /// approved. Should be impossible under the hashing scheme; the first winner stands.
    Conflict,
}

pub struct CandidateTracker {
    // Competing candidates at one position stay individually addressable until approval resolves,
    // hence a list per position rather than one slot.
    candidates: BTreeMap<BlockIndex, Vec<Candidate>>,
    // Positions we have outstanding interest in, mapped to the instant a block fetch was last
    // broadcast for them (None until the first fetch goes out).
    awaited: BTreeMap<BlockIndex, Option<Instant>>,
}

impl CandidateTracker {
    pub fn new() -> CandidateTracker {
        CandidateTracker {
            candidates: BTreeMap::new(),
            awaited: BTreeMap::new(),
        }
    }

    /// Register a block as a candidate at its position.
    ///
    /// Returns `(is_new, key)`. Re-adding an already-known (position, hash) pair is a no-op with
    /// `is_new = false`, but still returns the key so callers can re-check approval. A re-add can
    /// still enrich the existing entry: a computed state, or an approving output id the first copy
    /// lacked.
    pub fn add_candidate(
        &mut self,
        block: Block,
        state: Option<VirtualState>,
        origin: CandidateOrigin,
    ) -> (bool, CandidateKey) {
        let key = CandidateKey {
            index: block.index,
            state_hash: block.state_hash,
        };

        let at_position = self.candidates.entry(block.index).or_default();
        if let Some(existing) = at_position
            .iter_mut()
            .find(|candidate| candidate.block.state_hash == key.state_hash)
        {
            if existing.state.is_none() {
                existing.state = state;
            }
            if existing.block.approving_output.is_none() {
                existing.block.approving_output = block.approving_output;
            }
            return (false, key);
        }

        at_position.push(Candidate {
            block,
            state,
            origin,
            approved: false,
            output_pull_requested: false,
        });
        (true, key)
    }

    pub fn candidate(&self, key: CandidateKey) -> Option<&Candidate> {
        self.candidates
            .get(&key.index)?
            .iter()
            .find(|candidate| candidate.block.state_hash == key.state_hash)
    }

    /// All candidate keys at a position, in insertion order.
    pub fn keys_at(&self, index: BlockIndex) -> Vec<CandidateKey> {
        self.candidates
            .get(&index)
            .map(|at_position| {
                at_position
                    .iter()
                    .map(|candidate| CandidateKey {
                        index,
                        state_hash: candidate.block.state_hash,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check a candidate against an anchor, marking it approved on a match. See [Approval].
    pub fn check_approval(&mut self, key: CandidateKey, anchor: &Anchor) -> Approval {
        if key.index != anchor.index {
            return Approval::NotApproved;
        }

        let Some(at_position) = self.candidates.get_mut(&key.index) else {
            return Approval::NotApproved;
        };
        let already_approved_hash = at_position
            .iter()
            .find(|candidate| candidate.approved)
            .map(|candidate| candidate.block.state_hash);

        let Some(candidate) = at_position
            .iter_mut()
            .find(|candidate| candidate.block.state_hash == key.state_hash)
        else {
            return Approval::NotApproved;
        };

        if candidate.block.state_hash != anchor.commitment {
            return Approval::NotApproved;
        }
        match already_approved_hash {
            Some(hash) if hash == key.state_hash => Approval::AlreadyApproved,
            Some(_) => Approval::Conflict,
            None => {
                candidate.approved = true;
                Approval::NewlyApproved
            }
        }
    }

    /// Whether the tracker has outstanding interest in blocks at this position. Peer blocks at
    /// positions that are not awaited are rejected by the state manager without being cached.
    pub fn is_awaiting(&self, index: BlockIndex) -> bool {
        self.awaited.contains_key(&index)
    }

    /// Mark the closed range of positions as awaited. Positions already awaited keep their fetch
    /// bookkeeping.
    pub(crate) fn await_range(&mut self, from: BlockIndex, to: BlockIndex) {
        for index in from..=to {
            self.awaited.entry(index).or_insert(None);
        }
    }

    /// Awaited positions with no candidate whose block fetch is due (never sent, or sent longer
    /// than `retry` ago). Marks them as fetched at `now`; the caller broadcasts the requests.
    pub(crate) fn due_fetches(&mut self, now: Instant, retry: Duration) -> Vec<BlockIndex> {
        let candidates = &self.candidates;
        self.awaited
            .iter_mut()
            .filter(|(index, last_fetch)| {
                let have_candidate = candidates
                    .get(*index)
                    .map(|at_position| !at_position.is_empty())
                    .unwrap_or(false);
                let due = match last_fetch {
                    None => true,
                    Some(at) => now.duration_since(*at) >= retry,
                };
                !have_candidate && due
            })
            .map(|(index, last_fetch)| {
                *last_fetch = Some(now);
                *index
            })
            .collect()
    }

    /// Record that a confirming-output pull went out for this candidate, so it is not re-requested.
    pub(crate) fn mark_output_pull_requested(&mut self, key: CandidateKey) {
        if let Some(at_position) = self.candidates.get_mut(&key.index) {
            if let Some(candidate) = at_position
                .iter_mut()
                .find(|candidate| candidate.block.state_hash == key.state_hash)
            {
                candidate.output_pull_requested = true;
            }
        }
    }

    /// Remove and return the approved candidate at a position, if any. Used by promotion; the
    /// losers at that position fall to the subsequent [evict_at_or_below](Self::evict_at_or_below).
    pub(crate) fn take_approved(&mut self, index: BlockIndex) -> Option<Candidate> {
        let at_position = self.candidates.get_mut(&index)?;
        let position = at_position
            .iter()
            .position(|candidate| candidate.approved)?;
        Some(at_position.remove(position))
    }

    /// Drop every candidate and awaited position at or below `index`. Called when the solid
    /// position advances; there is no retroactive reconsideration of superseded positions.
    pub(crate) fn evict_at_or_below(&mut self, index: BlockIndex) {
        self.candidates = self.candidates.split_off(&(index + 1));
        self.awaited = self.awaited.split_off(&(index + 1));
    }

    /// Total number of candidates across all positions.
    pub fn len(&self) -> usize {
        self.candidates.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
