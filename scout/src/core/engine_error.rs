//! Classification of reasoning-engine failures.
//!
//! The engine boundary reports failures as [`EngineInvocationError`]. The kind
//! decides whether the caller retries, and maps to the message shown to the
//! user once retries run out.

use std::fmt;

/// Failure class of an engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    RateLimited,
    Timeout,
    ServerError,
    ServiceUnavailable,
    Network,
    ContextLength,
    Auth,
    ModelNotFound,
    InsufficientQuota,
    Other,
}

impl EngineErrorKind {
    /// Transient kinds are retried with backoff.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::Timeout
                | Self::ServerError
                | Self::ServiceUnavailable
                | Self::Network
        )
    }

    fn advice(self) -> Option<(&'static str, &'static str)> {
        let advice = match self {
            Self::RateLimited => (
                "The AI service is busy right now.",
                "Wait 30-60 seconds and try again. If using a free model, try a different one.",
            ),
            Self::ContextLength => (
                "This repository is too large for a complete analysis.",
                "Try asking about a specific component or file instead of the whole codebase.",
            ),
            Self::Auth => (
                "Your API key appears to be invalid or expired.",
                "Check the key named by `engine.api_key_env` and make sure it is still active.",
            ),
            Self::Timeout => (
                "The request took too long to complete.",
                "Try a simpler question, or check if the AI service is experiencing issues.",
            ),
            Self::Network => (
                "Network connection issue.",
                "Check your internet connection and try again.",
            ),
            Self::ModelNotFound => (
                "The selected model is not available.",
                "Pick a different `engine.model` in the scout config.",
            ),
            Self::InsufficientQuota => (
                "Your API account may have insufficient credits.",
                "Check your provider balance, or switch to a free model.",
            ),
            Self::ServerError | Self::ServiceUnavailable => (
                "The AI service is temporarily unavailable.",
                "The service may be experiencing high load. Wait a minute and try again.",
            ),
            Self::Other => return None,
        };
        Some(advice)
    }
}

/// A failed call to the reasoning engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocationError {
    pub kind: EngineErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Server-provided `Retry-After`, in seconds.
    pub retry_after_secs: Option<u64>,
}

impl EngineInvocationError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Classify from an optional HTTP status and the provider's message.
    pub fn classify(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = status
            .and_then(|status| kind_from_status(status, &message))
            .unwrap_or_else(|| kind_from_message(&message));
        Self {
            kind,
            status,
            message,
            retry_after_secs: None,
        }
    }

    pub fn with_retry_after(mut self, secs: Option<u64>) -> Self {
        self.retry_after_secs = secs;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Markdown message for the end user.
    pub fn friendly_message(&self) -> String {
        match self.kind.advice() {
            Some((message, action)) => format!("**Error:** {message}\n\n**Suggestion:** {action}"),
            None => {
                let mut details: String = self.message.chars().take(300).collect();
                if self.message.chars().count() > 300 {
                    details.push_str("...");
                }
                format!(
                    "**Error:** An unexpected error occurred.\n\n**Details:** {details}\n\n\
                     **Suggestion:** Try again or ask a simpler question."
                )
            }
        }
    }
}

impl fmt::Display for EngineInvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "engine error ({:?}, HTTP {status}): {}", self.kind, self.message),
            None => write!(f, "engine error ({:?}): {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for EngineInvocationError {}

fn kind_from_status(status: u16, message: &str) -> Option<EngineErrorKind> {
    let kind = match status {
        429 => EngineErrorKind::RateLimited,
        408 => EngineErrorKind::Timeout,
        401 | 403 => EngineErrorKind::Auth,
        402 => EngineErrorKind::InsufficientQuota,
        404 if message.to_lowercase().contains("model") => EngineErrorKind::ModelNotFound,
        503 => EngineErrorKind::ServiceUnavailable,
        500..=599 => EngineErrorKind::ServerError,
        // Providers report context overflows as 400 with a descriptive body.
        _ => return None,
    };
    Some(kind)
}

const MESSAGE_PATTERNS: &[(EngineErrorKind, &[&str])] = &[
    (
        EngineErrorKind::RateLimited,
        &["rate limit", "429", "too many requests", "quota exceeded"],
    ),
    (
        EngineErrorKind::ContextLength,
        &["context length", "maximum context", "too long", "token limit", "context window"],
    ),
    (
        EngineErrorKind::Auth,
        &["invalid api key", "unauthorized", "401", "authentication", "invalid_api_key"],
    ),
    (
        EngineErrorKind::Timeout,
        &["timeout", "timed out", "deadline exceeded"],
    ),
    (
        EngineErrorKind::ModelNotFound,
        &["model not found", "invalid model", "model_not_found", "no such model"],
    ),
    (
        EngineErrorKind::InsufficientQuota,
        &["insufficient", "quota", "credits", "balance", "payment"],
    ),
    (
        EngineErrorKind::ServiceUnavailable,
        &[
            "502",
            "503",
            "504",
            "service unavailable",
            "temporarily unavailable",
            "overloaded",
            "capacity",
        ],
    ),
    (
        EngineErrorKind::Network,
        &["connection", "network", "unreachable", "dns", "ssl", "certificate"],
    ),
];

fn kind_from_message(message: &str) -> EngineErrorKind {
    let lower = message.to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| lower.contains(p)))
        .map_or(EngineErrorKind::Other, |(kind, _)| *kind)
}
