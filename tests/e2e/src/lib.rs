//! End-to-end test support: an isolated database harness and scripted
//! LLM/embedding stand-ins for driving the real tool surface without any
//! network service.

pub mod harness;
pub mod mocks;
