use anchorsync_rs::executor::RequestExecutor;
use anchorsync_rs::types::{
    Entropy, Request, RequestOrigin, StateMutations, Timestamp, VirtualState,
};

pub(crate) const COUNTER_KEY: &[u8] = b"counter";

const OP_ADD: u8 = 0;
const OP_FAIL: u8 = 1;

/// A minimal deterministic executor: requests add an amount to a single counter key, or fail on
/// purpose. Reads go through the speculative state, so requests within one batch see the effects
/// of the requests before them.
#[derive(Clone)]
pub(crate) struct CounterApp;

impl RequestExecutor for CounterApp {
    type Error = String;

    fn apply(
        &self,
        state: &VirtualState,
        request: &Request,
        _timestamp: Timestamp,
        _entropy: &Entropy,
    ) -> Result<StateMutations, String> {
        match request.payload.first() {
            Some(&OP_ADD) => {
                let amount_bytes: [u8; 8] = request
                    .payload
                    .get(1..9)
                    .and_then(|bytes| bytes.try_into().ok())
                    .ok_or_else(|| "malformed add payload".to_string())?;
                let amount = u64::from_le_bytes(amount_bytes);
                let current = counter_value(state);

                let mut mutations = StateMutations::new();
                mutations.insert(
                    COUNTER_KEY.to_vec(),
                    (current + amount).to_le_bytes().to_vec(),
                );
                Ok(mutations)
            }
            Some(&OP_FAIL) => Err("request instructed to fail".to_string()),
            _ => Err("unknown operation".to_string()),
        }
    }
}

pub(crate) fn counter_value(state: &VirtualState) -> u64 {
    state
        .get(COUNTER_KEY)
        .and_then(|value| value.as_slice().try_into().ok())
        .map(u64::from_le_bytes)
        .unwrap_or(0)
}

pub(crate) fn add_request(id: u8, amount: u64) -> Request {
    let mut payload = vec![OP_ADD];
    payload.extend_from_slice(&amount.to_le_bytes());
    Request {
        id: [id; 32],
        origin: RequestOrigin::OffLedger,
        payload,
    }
}

pub(crate) fn failing_request(id: u8) -> Request {
    Request {
        id: [id; 32],
        origin: RequestOrigin::OffLedger,
        payload: vec![OP_FAIL],
    }
}
