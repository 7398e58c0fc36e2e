//! Side-effecting boundaries: filesystem tools, the reasoning engine, the
//! response cache, configuration, and transcripts.

pub mod cache;
pub mod config;
pub mod engine;
pub mod git;
pub mod process;
pub mod prompt;
pub mod tools;
pub mod transcript;
