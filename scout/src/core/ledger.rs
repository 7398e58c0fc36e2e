//! Tool-use ledger and circuit breaker.
//!
//! Every tool call is recorded with a fingerprint of its output. After each
//! batch the orchestrator asks [`ToolLedger::check_thrashing`] whether
//! exploration should stop. Once tripped, the ledger stays tripped until reset.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::core::types::ToolCall;

const ARGS_DIGEST_CHARS: usize = 100;

/// How rule 2 (repetition inside the recent window) counts calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepetitionRule {
    /// Trip when a tool name repeats in the window and fewer than the
    /// threshold of those calls produced new information.
    #[default]
    Unproductive,
    /// Trip on the name count alone.
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerLimits {
    pub max_total_calls: usize,
    pub window: usize,
    pub repetition_threshold: usize,
    pub max_calls_without_new_info: usize,
    pub max_calls_per_tool: usize,
    pub output_fingerprint_chars: usize,
    pub repetition: RepetitionRule,
}

impl Default for BreakerLimits {
    fn default() -> Self {
        Self {
            max_total_calls: 25,
            window: 5,
            repetition_threshold: 3,
            max_calls_without_new_info: 5,
            max_calls_per_tool: 10,
            output_fingerprint_chars: 500,
            repetition: RepetitionRule::Unproductive,
        }
    }
}

/// One row of the call history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub name: String,
    pub args_digest: String,
    pub new_info: bool,
}

/// Snapshot of the breaker counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerState {
    pub total_calls: usize,
    pub calls_without_new_info: usize,
    pub new_info_calls: usize,
    pub distinct_outputs: usize,
    pub tripped: bool,
    pub trip_reason: Option<String>,
}

/// Why the breaker tripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trip {
    BudgetExhausted { calls: usize },
    Repetitive { tool: String, count: usize, window: usize },
    NoNewInformation { calls: usize },
    PerToolLimit { tool: String, count: usize, limit: usize },
}

impl Trip {
    pub fn reason(&self) -> String {
        match self {
            Self::BudgetExhausted { calls } => {
                format!("Tool call budget exhausted ({calls} calls)")
            }
            Self::Repetitive {
                tool,
                count,
                window,
            } => format!("Repetitive use of {tool} ({count} times in last {window} calls)"),
            Self::NoNewInformation { calls } => {
                format!("No new information in last {calls} tool calls")
            }
            Self::PerToolLimit { tool, count, limit } => {
                format!("{tool} called {count} times (limit: {limit})")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolLedger {
    limits: BreakerLimits,
    calls: Vec<ToolCall>,
    history: Vec<LedgerEntry>,
    fingerprints: HashSet<u64>,
    per_tool: BTreeMap<String, usize>,
    calls_without_new_info: usize,
    new_info_calls: usize,
    trip: Option<Trip>,
}

impl ToolLedger {
    pub fn new(limits: BreakerLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> &BreakerLimits {
        &self.limits
    }

    /// Record a completed call. Returns whether its output was new information.
    pub fn record(&mut self, call: ToolCall) -> bool {
        let fingerprint = fingerprint(&call.output, self.limits.output_fingerprint_chars);
        let new_info = self.fingerprints.insert(fingerprint);
        if new_info {
            self.calls_without_new_info = 0;
            self.new_info_calls += 1;
        } else {
            self.calls_without_new_info += 1;
        }
        *self.per_tool.entry(call.name.clone()).or_insert(0) += 1;
        let args_digest = args_digest(&call.args);
        debug!(
            tool = %call.name,
            new_info,
            total_calls = self.calls.len() + 1,
            calls_without_new_info = self.calls_without_new_info,
            "ledger recorded tool call"
        );
        self.history.push(LedgerEntry {
            name: call.name.clone(),
            args_digest,
            new_info,
        });
        self.calls.push(call);
        new_info
    }

    /// Evaluate the breaker rules in order. The first trip is sticky.
    pub fn check_thrashing(&mut self) -> Option<&Trip> {
        if self.trip.is_none() {
            self.trip = self.evaluate();
            if let Some(trip) = &self.trip {
                warn!(
                    reason = %trip.reason(),
                    total_calls = self.calls.len(),
                    "circuit breaker tripped"
                );
            }
        }
        self.trip.as_ref()
    }

    fn evaluate(&self) -> Option<Trip> {
        let limits = &self.limits;
        let total = self.calls.len();

        if total >= limits.max_total_calls {
            return Some(Trip::BudgetExhausted { calls: total });
        }

        let start = self.history.len().saturating_sub(limits.window);
        let window = &self.history[start..];
        let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for entry in window {
            let slot = counts.entry(entry.name.as_str()).or_insert((0, 0));
            slot.0 += 1;
            if entry.new_info {
                slot.1 += 1;
            }
        }
        // Most frequent first so the reason names the worst offender.
        let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then_with(|| a.0.cmp(b.0)));
        for (tool, (count, productive)) in ranked {
            if count < limits.repetition_threshold {
                continue;
            }
            let repetitive = match limits.repetition {
                RepetitionRule::Any => true,
                RepetitionRule::Unproductive => productive < limits.repetition_threshold,
            };
            if repetitive {
                return Some(Trip::Repetitive {
                    tool: tool.to_string(),
                    count,
                    window: limits.window,
                });
            }
        }

        if self.calls_without_new_info >= limits.max_calls_without_new_info {
            return Some(Trip::NoNewInformation {
                calls: self.calls_without_new_info,
            });
        }

        self.per_tool
            .iter()
            .find(|(_, count)| **count >= limits.max_calls_per_tool)
            .map(|(tool, count)| Trip::PerToolLimit {
                tool: tool.clone(),
                count: *count,
                limit: limits.max_calls_per_tool,
            })
    }

    pub fn is_tripped(&self) -> bool {
        self.trip.is_some()
    }

    pub fn trip(&self) -> Option<&Trip> {
        self.trip.as_ref()
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn history(&self) -> &[LedgerEntry] {
        &self.history
    }

    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.calls.iter().map(|call| call.output.as_str())
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.per_tool.get(name).copied().unwrap_or(0)
    }

    pub fn state(&self) -> LedgerState {
        LedgerState {
            total_calls: self.calls.len(),
            calls_without_new_info: self.calls_without_new_info,
            new_info_calls: self.new_info_calls,
            distinct_outputs: self.fingerprints.len(),
            tripped: self.trip.is_some(),
            trip_reason: self.trip.as_ref().map(Trip::reason),
        }
    }

    /// Deterministic explanation shown instead of an answer after a trip.
    pub fn graceful_exit_message(&self, files_read: usize) -> String {
        let mut message = format!(
            "I've explored extensively but couldn't find a complete answer to your question.\n\n\
             **What I searched:**\n\
             - Made {} tool calls\n\
             - Read {} files\n\
             - Found {} pieces of new information\n",
            self.calls.len(),
            files_read,
            self.new_info_calls
        );
        if let Some(trip) = &self.trip {
            message.push_str(&format!("\n**Stopped because:** {}\n", trip.reason()));
        }
        message.push_str(
            "\n**Suggestion:** Try asking a more specific question, or point me to a \
             particular file or component.",
        );
        message
    }

    /// Clear counters, history, and fingerprints. Limits are kept.
    pub fn reset(&mut self) {
        *self = Self::new(self.limits.clone());
    }
}

/// Stable 64-bit fingerprint of the first `chars` characters of `output`.
pub fn fingerprint(output: &str, chars: usize) -> u64 {
    let head: String = output.chars().take(chars).collect();
    let digest = Sha256::digest(head.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn args_digest(args: &serde_json::Value) -> String {
    args.to_string().chars().take(ARGS_DIGEST_CHARS).collect()
}
