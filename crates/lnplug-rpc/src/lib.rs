//! Shared JSON-RPC definitions for lnplug plugins.
//!
//! This crate provides the wire layer a plugin needs to talk to its host
//! over stdin/stdout and to the node over its RPC socket.
//!
//! # Architecture
//!
//! - [`protocol`]: JSON-RPC 2.0 message types (Request, Response,
//!   Notification) in the plugin dialect
//! - [`transport`]: blank-line-delimited codec for message framing
//! - [`client`]: lazy Unix-socket RPC client for calling the node

pub mod client;
pub mod protocol;
pub mod transport;

// Re-export main client types
pub use client::{ClientError, NodeRpc};

// Re-export protocol types
pub use protocol::{
    JSONRPC_VERSION, Message, NodeError, Notification, Request, RequestId, Response,
};

// Re-export transport types
pub use transport::{CodecError, Frame, JsonRpcCodec};
