//! Tests of the candidate tracker's bookkeeping: identity, deduplication, enrichment, and
//! approval against anchors.

use anchorsync_rs::candidates::{Approval, CandidateKey, CandidateOrigin, CandidateTracker};
use anchorsync_rs::types::{Anchor, Block};

mod common;

fn block(index: u64, state_hash: [u8; 32]) -> Block {
    Block::new(index, state_hash, vec![])
}

fn anchor(index: u64, commitment: [u8; 32], output: [u8; 32]) -> Anchor {
    Anchor {
        index,
        commitment,
        output,
        timestamp: 0,
    }
}

/// A candidate is identified by (position, resulting state hash): re-adding the same pair is a
/// no-op with `is_new = false`, while a different hash at the same position coexists.
#[test]
fn identity_and_deduplication_test() {
    let mut tracker = CandidateTracker::new();

    let (is_new, key) = tracker.add_candidate(block(1, [1; 32]), None, CandidateOrigin::Local);
    assert!(is_new);
    assert_eq!(tracker.len(), 1);

    let (is_new, again) = tracker.add_candidate(block(1, [1; 32]), None, CandidateOrigin::Local);
    assert!(!is_new);
    assert_eq!(again, key);
    assert_eq!(tracker.len(), 1);

    let (is_new, _) = tracker.add_candidate(block(1, [2; 32]), None, CandidateOrigin::Local);
    assert!(is_new);
    assert_eq!(tracker.len(), 2);
    assert_eq!(tracker.keys_at(1).len(), 2);
}

/// A re-add that carries an approving output id the first copy lacked fills it in.
#[test]
fn enrichment_test() {
    let mut tracker = CandidateTracker::new();

    let (_, key) = tracker.add_candidate(block(1, [1; 32]), None, CandidateOrigin::Local);
    assert_eq!(tracker.candidate(key).unwrap().approving_output(), None);

    let enriched = block(1, [1; 32]).with_approving_output([8; 32]);
    let (is_new, _) = tracker.add_candidate(enriched, None, CandidateOrigin::Local);
    assert!(!is_new);
    assert_eq!(
        tracker.candidate(key).unwrap().approving_output(),
        Some([8; 32])
    );
}

/// Approval requires the same position and a matching commitment; it is monotonic, and re-checking
/// an approved candidate is a no-op.
#[test]
fn approval_test() {
    let mut tracker = CandidateTracker::new();

    let (_, key_a) = tracker.add_candidate(block(1, [1; 32]), None, CandidateOrigin::Local);
    let (_, key_b) = tracker.add_candidate(block(1, [2; 32]), None, CandidateOrigin::Local);

    let confirmed = anchor(1, [2; 32], [9; 32]);

    assert_eq!(tracker.check_approval(key_a, &confirmed), Approval::NotApproved);
    assert_eq!(tracker.check_approval(key_b, &confirmed), Approval::NewlyApproved);
    assert_eq!(tracker.check_approval(key_b, &confirmed), Approval::AlreadyApproved);
    assert!(tracker.candidate(key_b).unwrap().is_approved());
    assert!(!tracker.candidate(key_a).unwrap().is_approved());

    // A key for a different position never matches.
    let elsewhere = CandidateKey {
        index: 2,
        state_hash: [2; 32],
    };
    assert_eq!(
        tracker.check_approval(elsewhere, &confirmed),
        Approval::NotApproved
    );
}

/// If a second, different candidate at an approved position also matches an anchor, the first
/// winner stands and the check reports a conflict.
#[test]
fn approval_exclusivity_test() {
    let mut tracker = CandidateTracker::new();

    let (_, key_a) = tracker.add_candidate(block(1, [1; 32]), None, CandidateOrigin::Local);
    let (_, key_b) = tracker.add_candidate(block(1, [2; 32]), None, CandidateOrigin::Local);

    assert_eq!(
        tracker.check_approval(key_a, &anchor(1, [1; 32], [8; 32])),
        Approval::NewlyApproved
    );
    assert_eq!(
        tracker.check_approval(key_b, &anchor(1, [2; 32], [9; 32])),
        Approval::Conflict
    );
    assert!(tracker.candidate(key_a).unwrap().is_approved());
    assert!(!tracker.candidate(key_b).unwrap().is_approved());
}

/// Positions are not awaited by default; a fresh tracker awaits nothing.
#[test]
fn not_awaiting_by_default_test() {
    let tracker = CandidateTracker::new();
    assert!(!tracker.is_awaiting(1));
    assert!(tracker.is_empty());
}
