//! Conversation state owned by one assistant instance.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::ledger::{BreakerLimits, LedgerState, ToolLedger};
use crate::core::memory::{MemoryStats, WorkingMemory};
use crate::core::routing::ToolRouter;
use crate::io::engine::ChatMessage;

pub const DEFAULT_CONTEXT_TOKENS: usize = 100_000;
const CONTEXT_WARN_RATIO: f64 = 0.8;
const CONTEXT_TRUNCATE_RATIO: f64 = 0.95;
const TRUNCATED_CHARS: usize = 4000;
const TRUNCATION_MARKER: &str = "\n\n[TRUNCATED - Context limit approaching]";

static SESSION_SEQ: AtomicU32 = AtomicU32::new(0);

fn new_session_id() -> String {
    let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "s-{}-{}-{seq}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        std::process::id()
    )
}

/// Estimated tokens of tool output fed back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextUsage {
    pub tokens_used: usize,
    pub limit: usize,
    pub percentage: f64,
}

/// Counters reported by `/stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub turns: u32,
    pub history_messages: usize,
    pub memory: MemoryStats,
    pub ledger: LedgerState,
    pub context: ContextUsage,
    pub routing_warnings: Vec<&'static str>,
}

/// Rough token estimate, four bytes per token.
fn estimate_tokens(content: &str) -> usize {
    content.len() / 4
}

/// Working memory, tool ledger, and message history for one conversation.
///
/// The first history message is always the system prompt.
#[derive(Debug)]
pub struct Session {
    id: String,
    system_prompt: String,
    pub(crate) memory: WorkingMemory,
    pub(crate) ledger: ToolLedger,
    pub(crate) history: Vec<ChatMessage>,
    pub(crate) router: ToolRouter,
    turns: u32,
    max_history: usize,
    context_tokens: usize,
    context_limit: usize,
    context_warned: bool,
}

impl Session {
    pub fn new(system_prompt: String, limits: BreakerLimits, max_history: usize) -> Self {
        Self {
            id: new_session_id(),
            history: vec![ChatMessage::system(system_prompt.clone())],
            system_prompt,
            memory: WorkingMemory::new(),
            ledger: ToolLedger::new(limits),
            router: ToolRouter::new(),
            turns: 0,
            max_history,
            context_tokens: 0,
            context_limit: DEFAULT_CONTEXT_TOKENS,
            context_warned: false,
        }
    }

    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = limit.max(1);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn memory(&self) -> &WorkingMemory {
        &self.memory
    }

    pub fn ledger(&self) -> &ToolLedger {
        &self.ledger
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn turns(&self) -> u32 {
        self.turns
    }

    pub(crate) fn begin_turn(&mut self) -> u32 {
        self.turns += 1;
        self.turns
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.clone(),
            turns: self.turns,
            history_messages: self.history.len(),
            memory: self.memory.stats(),
            ledger: self.ledger.state(),
            context: self.context_usage(),
            routing_warnings: self.router.warnings().to_vec(),
        }
    }

    pub fn context_usage(&self) -> ContextUsage {
        ContextUsage {
            tokens_used: self.context_tokens,
            limit: self.context_limit,
            percentage: (self.context_tokens as f64 / self.context_limit as f64 * 1000.0).round()
                / 10.0,
        }
    }

    /// Account for tool output entering the context. Near the limit the
    /// output is cut to its first few thousand characters.
    pub(crate) fn track_context(&mut self, content: String) -> String {
        let limit = self.context_limit as f64;
        let projected = self.context_tokens + estimate_tokens(&content);
        let content = if projected as f64 / limit >= CONTEXT_TRUNCATE_RATIO
            && content.chars().count() > TRUNCATED_CHARS
        {
            warn!(
                tokens = projected,
                limit = self.context_limit,
                "truncating tool output near context limit"
            );
            let mut cut: String = content.chars().take(TRUNCATED_CHARS).collect();
            cut.push_str(TRUNCATION_MARKER);
            cut
        } else {
            content
        };
        self.context_tokens += estimate_tokens(&content);

        if !self.context_warned && self.context_tokens as f64 / limit >= CONTEXT_WARN_RATIO {
            self.context_warned = true;
            warn!(
                tokens = self.context_tokens,
                limit = self.context_limit,
                "context usage high"
            );
        }
        content
    }

    /// Discard memory, ledger, and history. A fresh id keeps transcripts of
    /// the old conversation apart.
    pub fn reset(&mut self) {
        debug!(session = %self.id, "resetting session");
        self.id = new_session_id();
        self.memory.reset();
        self.ledger.reset();
        self.router.reset();
        self.history = vec![ChatMessage::system(self.system_prompt.clone())];
        self.turns = 0;
        self.context_tokens = 0;
        self.context_warned = false;
    }

    /// Keep system messages plus the most recent `max_history` others,
    /// starting at a user message so tool results keep their request.
    ///
    /// A single turn longer than `max_history` is kept whole from its user
    /// message.
    pub(crate) fn prune_history(&mut self) {
        let (system, rest): (Vec<ChatMessage>, Vec<ChatMessage>) =
            std::mem::take(&mut self.history)
                .into_iter()
                .partition(ChatMessage::is_system);
        let cut = rest.len().saturating_sub(self.max_history);
        let start = rest[cut..]
            .iter()
            .position(ChatMessage::is_user)
            .map(|offset| cut + offset)
            .or_else(|| rest[..cut].iter().rposition(ChatMessage::is_user))
            .unwrap_or(0);
        let dropped = start;
        self.history = system;
        self.history.extend(rest.into_iter().skip(start));
        if dropped > 0 {
            debug!(dropped, kept = self.history.len(), "pruned history");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::types::ToolCall;
    use crate::io::engine::ToolRequest;

    fn exchange(n: usize) -> Vec<ChatMessage> {
        vec![
            ChatMessage::user(format!("q{n}")),
            ChatMessage::Assistant {
                text: String::new(),
                tool_calls: vec![ToolRequest {
                    id: format!("c{n}"),
                    name: "read_file".to_string(),
                    args: json!({"file_path": "a.py"}),
                }],
            },
            ChatMessage::Tool {
                call_id: format!("c{n}"),
                name: "read_file".to_string(),
                content: "out".to_string(),
            },
            ChatMessage::Assistant {
                text: format!("a{n}"),
                tool_calls: Vec::new(),
            },
        ]
    }

    #[test]
    fn pruning_keeps_system_and_restarts_at_user() {
        let mut session = Session::new("sys".to_string(), BreakerLimits::default(), 6);
        for n in 0..3 {
            session.history.extend(exchange(n));
        }
        session.prune_history();

        let history = session.history();
        assert_eq!(history[0], ChatMessage::system("sys"));
        assert_eq!(history[1], ChatMessage::user("q2"));
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn turn_longer_than_limit_survives_pruning() {
        let mut session = Session::new("sys".to_string(), BreakerLimits::default(), 20);
        session.history.push(ChatMessage::user("q0"));
        session.history.push(ChatMessage::Assistant {
            text: "a0".to_string(),
            tool_calls: Vec::new(),
        });
        session.history.push(ChatMessage::user("q1"));
        for n in 0..10 {
            session.history.extend(exchange(n).into_iter().skip(1).take(2));
        }
        session.history.push(ChatMessage::Assistant {
            text: "a1".to_string(),
            tool_calls: Vec::new(),
        });
        session.prune_history();

        let history = session.history();
        assert_eq!(history[0], ChatMessage::system("sys"));
        assert_eq!(history[1], ChatMessage::user("q1"));
        assert_eq!(history.len(), 23);
        assert_eq!(
            history.last(),
            Some(&ChatMessage::Assistant {
                text: "a1".to_string(),
                tool_calls: Vec::new(),
            })
        );
    }

    #[test]
    fn short_history_is_untouched() {
        let mut session = Session::new("sys".to_string(), BreakerLimits::default(), 20);
        session.history.extend(exchange(0));
        session.prune_history();
        assert_eq!(session.history().len(), 5);
    }

    #[test]
    fn context_is_counted_then_truncated_near_the_limit() {
        let mut session =
            Session::new("sys".to_string(), BreakerLimits::default(), 20).with_context_limit(2000);
        let small = session.track_context("x".repeat(400));
        assert_eq!(small.len(), 400);
        assert_eq!(session.context_usage().tokens_used, 100);
        assert!((session.context_usage().percentage - 5.0).abs() < 1e-9);

        let big = session.track_context("y".repeat(8000));
        assert!(big.starts_with(&"y".repeat(TRUNCATED_CHARS)));
        assert!(big.ends_with("[TRUNCATED - Context limit approaching]"));
        assert_eq!(
            session.context_usage().tokens_used,
            100 + (TRUNCATED_CHARS + TRUNCATION_MARKER.len()) / 4
        );
    }

    #[test]
    fn reset_discards_everything_and_changes_id() {
        let mut session = Session::new("sys".to_string(), BreakerLimits::default(), 20);
        let first_id = session.id().to_string();
        session.begin_turn();
        session.history.extend(exchange(0));
        session.memory.record_file_read("a.py", 3, "x", Some(3));
        session.ledger.record(ToolCall {
            name: "read_file".to_string(),
            args: json!({}),
            output: "out".to_string(),
        });
        session.router.route("read_file");
        session.track_context("out".to_string());

        session.reset();
        let stats = session.stats();
        assert_ne!(stats.session_id, first_id);
        assert_eq!(stats.turns, 0);
        assert_eq!(stats.history_messages, 1);
        assert_eq!(stats.memory.files_read, 0);
        assert_eq!(stats.ledger.total_calls, 0);
        assert_eq!(stats.context.tokens_used, 0);
        assert!(stats.routing_warnings.is_empty());
    }
}
