//! Lore MCP server library.
//!
//! The binary in `main.rs` wires [`state::AppState`] to the stdio
//! transport; the library form exists so the end-to-end test crate can
//! drive the real tool surface against scripted backends.

pub mod formatters;
pub mod protocol;
pub mod server;
pub mod state;
pub mod tools;
