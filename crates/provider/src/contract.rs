//! Counter contract ABI bindings.

use alloy_primitives::{Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall, SolEvent};
use tally_core::{TallyError, TallyResult};

sol! {
    interface Counter {
        event NewNumber(uint256 newNumber);

        function number() external view returns (uint256);
        function increment() external;
    }
}

/// Calldata for `increment()`.
pub fn increment_calldata() -> Bytes {
    Bytes::from(Counter::incrementCall {}.abi_encode())
}

/// Calldata for the `number()` view.
pub fn number_calldata() -> Bytes {
    Bytes::from(Counter::numberCall {}.abi_encode())
}

pub fn decode_number(output: &[u8]) -> TallyResult<U256> {
    Counter::numberCall::abi_decode_returns(output)
        .map_err(|e| TallyError::Provider(format!("Failed to decode number(): {e}")))
}

/// Topic-0 for a supported event name.
pub fn event_signature(name: &str) -> Option<B256> {
    match name {
        "NewNumber" => Some(Counter::NewNumber::SIGNATURE_HASH),
        _ => None,
    }
}
