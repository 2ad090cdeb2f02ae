//! Session protocol: JSON-RPC 2.0 over HTTP with per-session channels.
//!
//! [`server`] owns the HTTP routes, [`handler`] answers the JSON-RPC methods inside a
//! session, and [`protocol`] holds the wire types.

pub mod handler;
pub mod protocol;
pub mod server;

pub use handler::McpHandler;
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use server::{router, serve, shutdown_signal, ServerState, SESSION_HEADER};
