//! Wire protocol for talking JSON-RPC 2.0 to a node over its IPC socket.
//!
//! Two halves:
//! - [`jsonrpc`]: request/response/error envelopes and the tagged
//!   [`Outcome`] every inbound response is decoded into.
//! - [`framing`]: the incremental [`FrameParser`] that turns an arbitrary
//!   byte stream into whole JSON values, and [`encode_frame`] for the
//!   outbound direction (one value per newline-terminated line).

pub mod framing;
pub mod jsonrpc;

pub use framing::{encode_frame, FrameError, FrameParser};
pub use jsonrpc::{
    normalize_id, JsonRpcError, JsonRpcRequest, Message, Outcome, JSONRPC_VERSION,
};
