use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use anchorsync_rs::networking::LedgerConnector;
use anchorsync_rs::types::{Anchor, ChainAddress, OutputId};

struct LedgerScript {
    current: Option<Anchor>,
    confirmed: HashMap<OutputId, Anchor>,
    inbox: VecDeque<Anchor>,
    pull_state_count: usize,
    pull_confirmed_output_count: usize,
}

/// A scriptable in-process ledger node. The test sets the chain's current anchor and a table of
/// confirmed outputs; pulls are answered from the script and delivered through `recv_anchor` like
/// a real connector would.
#[derive(Clone)]
pub(crate) struct MockLedger {
    script: Arc<Mutex<LedgerScript>>,
}

impl MockLedger {
    pub(crate) fn new() -> MockLedger {
        MockLedger {
            script: Arc::new(Mutex::new(LedgerScript {
                current: None,
                confirmed: HashMap::new(),
                inbox: VecDeque::new(),
                pull_state_count: 0,
                pull_confirmed_output_count: 0,
            })),
        }
    }

    /// Set the anchor that future `pull_state` calls are answered with.
    pub(crate) fn set_anchor(&self, anchor: Anchor) {
        self.script.lock().unwrap().current = Some(anchor);
    }

    /// Add an anchor to the confirmed-output table, keyed by its output id.
    pub(crate) fn add_confirmed(&self, anchor: Anchor) {
        self.script
            .lock()
            .unwrap()
            .confirmed
            .insert(anchor.output, anchor);
    }

    pub(crate) fn pull_state_count(&self) -> usize {
        self.script.lock().unwrap().pull_state_count
    }

    pub(crate) fn pull_confirmed_output_count(&self) -> usize {
        self.script.lock().unwrap().pull_confirmed_output_count
    }
}

impl LedgerConnector for MockLedger {
    fn pull_state(&mut self, _chain: ChainAddress) {
        let mut script = self.script.lock().unwrap();
        script.pull_state_count += 1;
        if let Some(anchor) = script.current {
            script.inbox.push_back(anchor);
        }
    }

    fn pull_confirmed_output(&mut self, _chain: ChainAddress, output: OutputId) {
        let mut script = self.script.lock().unwrap();
        script.pull_confirmed_output_count += 1;
        if let Some(anchor) = script.confirmed.get(&output).copied() {
            script.inbox.push_back(anchor);
        }
    }

    fn recv_anchor(&mut self) -> Option<Anchor> {
        self.script.lock().unwrap().inbox.pop_front()
    }
}
