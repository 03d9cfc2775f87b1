//! The read-only method allow-list.
//!
//! Only these methods are looked up in, or written to, the response cache.
//! Each one is an idempotent query; anything that mutates node state (or
//! subscribes, or signs) must never appear here.

/// Default cacheable methods.
pub const DEFAULT_READ_ONLY_METHODS: &[&str] = &[
    "eth_blockNumber",
    "eth_chainId",
    "eth_gasPrice",
    "eth_maxPriorityFeePerGas",
    "eth_feeHistory",
    "eth_getBalance",
    "eth_getCode",
    "eth_getStorageAt",
    "eth_getTransactionCount",
    "eth_getBlockByNumber",
    "eth_getBlockByHash",
    "eth_getBlockTransactionCountByNumber",
    "eth_getBlockTransactionCountByHash",
    "eth_getTransactionByHash",
    "eth_getTransactionReceipt",
    "eth_getLogs",
    "eth_call",
    "eth_estimateGas",
    "eth_syncing",
    "net_version",
    "net_listening",
    "net_peerCount",
    "web3_clientVersion",
];

pub(crate) fn d_read_only_methods() -> Vec<String> {
    DEFAULT_READ_ONLY_METHODS
        .iter()
        .map(|m| (*m).to_string())
        .collect()
}
