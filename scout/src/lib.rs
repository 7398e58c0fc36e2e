//! Grounded code exploration for LLM assistants.
//!
//! scout answers questions about a repository by letting a reasoning engine
//! call read-only exploration tools, then checks every `file:line` citation
//! and every factual claim in the answer against what those tools actually
//! returned. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (citation and claim extraction,
//!   grounding verification, working memory, the tool-use circuit breaker).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting boundaries (filesystem tools, the engine
//!   client, response cache, configuration, transcripts).
//!
//! Orchestration modules ([`session`], [`turn`], [`assistant`]) coordinate
//! core logic with I/O to answer one question at a time.

pub mod assistant;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod turn;
