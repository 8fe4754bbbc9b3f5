//! Chain-facing plumbing: JSON-RPC transport, emitter ABI handling and
//! EventLog1 decoding.

pub mod abi;
pub mod decode;
pub mod rpc;

/// keccak256 of the emitter's `EventLog1` canonical signature.
pub const EVENT_SIGNATURE: &str =
    "0x137a44067c8961cd7e1d876f4754a5a3a75989b4552f1843fc69c3b372def160";

/// GMX event emitter on Arbitrum One.
pub const DEFAULT_EMITTER: &str = "0xC8ee91A54287DB53897056e12D9819156D3822Fb";

pub const DEFAULT_RPC_URL: &str = "https://arb1.arbitrum.io/rpc";
