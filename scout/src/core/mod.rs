//! Deterministic, pure logic shared by the exploration core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and return deterministic outputs suitable for tests.

pub mod citations;
pub mod claims;
pub mod engine_error;
pub mod filter;
pub mod grounding;
pub mod ledger;
pub mod memory;
pub mod routing;
pub mod tool_text;
pub mod types;
