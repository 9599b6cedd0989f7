//! MCP protocol plumbing: JSON-RPC 2.0 types, request/response payloads,
//! and the stdio transport.

pub mod messages;
pub mod stdio;
pub mod types;
