//! Reference wire codecs
//!
//! Exchange adapters normally ship their own [`FrameCodec`](hermes_ports::FrameCodec);
//! the codecs here cover the common JSON-RPC style used by several venues
//! and double as the codec for the in-process test exchange.

mod json_rpc;

pub use json_rpc::JsonRpcCodec;
