//! Reasoning-engine boundary.
//!
//! The [`ReasoningEngine`] trait decouples the turn machine from the model
//! provider. [`HttpEngine`] speaks the OpenAI-compatible chat-completions
//! protocol; tests use scripted engines that replay canned replies.

use std::collections::VecDeque;
use std::env;
use std::io::{BufRead, BufReader};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::core::engine_error::{EngineErrorKind, EngineInvocationError};
use crate::io::config::{EngineConfig, RetryConfig};

/// A tool invocation requested by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Tool advertised to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolRequest>,
    },
    Tool {
        call_id: String,
        name: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
}

/// A complete engine reply: either a final answer or tool calls to run.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineReply {
    Text(String),
    ToolCalls(Vec<ToolRequest>),
}

/// Incremental piece of a streamed reply.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineDelta {
    Text(String),
    ToolCall(ToolRequest),
}

pub type DeltaStream<'e> =
    Box<dyn Iterator<Item = Result<EngineDelta, EngineInvocationError>> + 'e>;

pub trait ReasoningEngine {
    fn model_id(&self) -> &str;

    fn respond(&self, request: &EngineRequest) -> Result<EngineReply, EngineInvocationError>;

    /// Stream the reply. The default yields the whole reply from
    /// [`ReasoningEngine::respond`] at once.
    fn stream<'e>(&'e self, request: &EngineRequest) -> Result<DeltaStream<'e>, EngineInvocationError> {
        let deltas: Vec<EngineDelta> = match self.respond(request)? {
            EngineReply::Text(text) => vec![EngineDelta::Text(text)],
            EngineReply::ToolCalls(calls) => calls.into_iter().map(EngineDelta::ToolCall).collect(),
        };
        Ok(Box::new(deltas.into_iter().map(Ok)))
    }
}

impl<E: ReasoningEngine + ?Sized> ReasoningEngine for Box<E> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn respond(&self, request: &EngineRequest) -> Result<EngineReply, EngineInvocationError> {
        (**self).respond(request)
    }

    fn stream<'e>(&'e self, request: &EngineRequest) -> Result<DeltaStream<'e>, EngineInvocationError> {
        (**self).stream(request)
    }
}

/// Exponential backoff for transient engine failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(secs) = retry_after_secs {
            return Duration::from_secs(secs).min(self.max_delay);
        }
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            multiplier: cfg.multiplier,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Open the engine's reply stream, retrying transient failures.
///
/// Only opening the stream is retried; errors while reading it surface to the
/// caller.
pub fn invoke_with_retry<'e, E: ReasoningEngine + ?Sized>(
    engine: &'e E,
    request: &EngineRequest,
    policy: &RetryPolicy,
    sleeper: &dyn Fn(Duration),
) -> Result<DeltaStream<'e>, EngineInvocationError> {
    let mut attempt = 1;
    loop {
        match engine.stream(request) {
            Ok(stream) => return Ok(stream),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt, err.retry_after_secs);
                warn!(
                    kind = ?err.kind,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient engine error, retrying"
                );
                sleeper(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpEngine {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl HttpEngine {
    /// Build from config, reading the API key from the configured variable.
    pub fn from_config(cfg: &EngineConfig) -> Result<Self> {
        let key_env = cfg.resolved_api_key_env();
        let api_key = env::var(&key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("missing API key: set the {key_env} environment variable"))?;
        let base_url = cfg.resolved_base_url()?;
        Self::new(&base_url, &api_key, &cfg.model, cfg.temperature, Duration::from_secs(cfg.timeout_secs))
    }

    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
        })
    }

    fn send(&self, request: &EngineRequest, stream: bool) -> Result<reqwest::blocking::Response, EngineInvocationError> {
        let body = wire_body(&self.model, self.temperature, request, stream);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let text = response.text().unwrap_or_default();
        let message: String = error_message(&text).chars().take(500).collect();
        Err(EngineInvocationError::classify(Some(status.as_u16()), message).with_retry_after(retry_after))
    }
}

impl ReasoningEngine for HttpEngine {
    fn model_id(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len()))]
    fn respond(&self, request: &EngineRequest) -> Result<EngineReply, EngineInvocationError> {
        let response = self.send(request, false)?;
        let text = response.text().map_err(transport_error)?;
        let parsed: WireResponse = serde_json::from_str(&text).map_err(|err| {
            EngineInvocationError::new(
                EngineErrorKind::Other,
                format!("unparseable engine response: {err}"),
            )
        })?;
        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(EngineInvocationError::new(
                EngineErrorKind::Other,
                "engine response has no choices",
            ));
        };
        let calls: Vec<ToolRequest> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolRequest {
                id: call.id,
                name: call.function.name,
                args: parse_arguments(&call.function.arguments),
            })
            .collect();
        debug!(tool_calls = calls.len(), "engine replied");
        if calls.is_empty() {
            Ok(EngineReply::Text(choice.message.content.unwrap_or_default()))
        } else {
            Ok(EngineReply::ToolCalls(calls))
        }
    }

    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len()))]
    fn stream<'e>(&'e self, request: &EngineRequest) -> Result<DeltaStream<'e>, EngineInvocationError> {
        let response = self.send(request, true)?;
        Ok(Box::new(SseDeltas::new(BufReader::new(response))))
    }
}

fn transport_error(err: reqwest::Error) -> EngineInvocationError {
    let kind = if err.is_timeout() {
        EngineErrorKind::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        EngineErrorKind::Network
    } else {
        return EngineInvocationError::classify(None, err.to_string());
    };
    EngineInvocationError::new(kind, err.to_string())
}

/// Provider error bodies are usually `{"error": {"message": ...}}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn wire_body(model: &str, temperature: f32, request: &EngineRequest, stream: bool) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(wire_message).collect();
    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": temperature,
        "stream": stream,
    });
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
    }
    body
}

fn wire_message(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System { content } => json!({"role": "system", "content": content}),
        ChatMessage::User { content } => json!({"role": "user", "content": content}),
        ChatMessage::Assistant { text, tool_calls } if tool_calls.is_empty() => {
            json!({"role": "assistant", "content": text})
        }
        ChatMessage::Assistant { text, tool_calls } => {
            let calls: Vec<Value> = tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": call.args.to_string()},
                    })
                })
                .collect();
            let content = if text.is_empty() { Value::Null } else { json!(text) };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        ChatMessage::Tool {
            call_id,
            name,
            content,
        } => json!({"role": "tool", "tool_call_id": call_id, "name": name, "content": content}),
    }
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
}

#[derive(Deserialize)]
struct WireChunkChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    content: Option<String>,
    tool_calls: Option<Vec<WireDeltaCall>>,
}

#[derive(Deserialize)]
struct WireDeltaCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<WireDeltaFunction>,
}

#[derive(Deserialize)]
struct WireDeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Server-sent-events reader for streamed chat completions.
///
/// Text fragments are yielded as they arrive; tool-call fragments are
/// assembled and yielded once the stream ends.
struct SseDeltas<R> {
    reader: R,
    pending: VecDeque<EngineDelta>,
    calls: Vec<PartialCall>,
    finished: bool,
}

impl<R: BufRead> SseDeltas<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
            calls: Vec::new(),
            finished: false,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        for (idx, call) in self.calls.drain(..).enumerate() {
            let id = if call.id.is_empty() {
                format!("call_{idx}")
            } else {
                call.id
            };
            self.pending.push_back(EngineDelta::ToolCall(ToolRequest {
                id,
                name: call.name,
                args: parse_arguments(&call.arguments),
            }));
        }
    }

    fn feed(&mut self, line: &str) -> Result<(), EngineInvocationError> {
        let Some(data) = line.trim_end().strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.finish();
            return Ok(());
        }
        if data.is_empty() {
            return Ok(());
        }
        let chunk: WireChunk = serde_json::from_str(data).map_err(|err| {
            EngineInvocationError::new(EngineErrorKind::Other, format!("bad stream chunk: {err}"))
        })?;
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content
                && !text.is_empty()
            {
                self.pending.push_back(EngineDelta::Text(text));
            }
            for fragment in choice.delta.tool_calls.unwrap_or_default() {
                if self.calls.len() <= fragment.index {
                    self.calls.resize_with(fragment.index + 1, PartialCall::default);
                }
                let call = &mut self.calls[fragment.index];
                if let Some(id) = fragment.id {
                    call.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        call.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
            }
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for SseDeltas<R> {
    type Item = Result<EngineDelta, EngineInvocationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(delta) = self.pending.pop_front() {
                return Some(Ok(delta));
            }
            if self.finished {
                return None;
            }
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => self.finish(),
                Ok(_) => {
                    if let Err(err) = self.feed(&line) {
                        self.finished = true;
                        return Some(Err(err));
                    }
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(EngineInvocationError::new(
                        EngineErrorKind::Network,
                        format!("stream read failed: {err}"),
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Cursor;

    use super::*;

    struct Flaky {
        failures: RefCell<VecDeque<EngineInvocationError>>,
        calls: RefCell<u32>,
    }

    impl Flaky {
        fn new(failures: Vec<EngineInvocationError>) -> Self {
            Self {
                failures: RefCell::new(failures.into()),
                calls: RefCell::new(0),
            }
        }
    }

    impl ReasoningEngine for Flaky {
        fn model_id(&self) -> &str {
            "flaky"
        }

        fn respond(&self, _request: &EngineRequest) -> Result<EngineReply, EngineInvocationError> {
            *self.calls.borrow_mut() += 1;
            match self.failures.borrow_mut().pop_front() {
                Some(err) => Err(err),
                None => Ok(EngineReply::Text("ok".to_string())),
            }
        }
    }

    fn request() -> EngineRequest {
        EngineRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: Vec::new(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(4000),
            max_delay: Duration::from_millis(30000),
            multiplier: 2,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = policy();
        assert_eq!(policy.delay_for(1, None), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4, None), Duration::from_secs(30));
        assert_eq!(policy.delay_for(1, Some(7)), Duration::from_secs(7));
        assert_eq!(policy.delay_for(1, Some(600)), Duration::from_secs(30));
    }

    #[test]
    fn retries_transient_errors_then_succeeds() {
        let engine = Flaky::new(vec![
            EngineInvocationError::classify(Some(429), "slow down"),
            EngineInvocationError::classify(Some(502), "bad gateway").with_retry_after(Some(2)),
        ]);
        let slept = RefCell::new(Vec::new());
        let stream = invoke_with_retry(&engine, &request(), &policy(), &|d| slept.borrow_mut().push(d))
            .expect("third attempt succeeds");
        let deltas: Vec<_> = stream.collect();
        assert_eq!(deltas, vec![Ok(EngineDelta::Text("ok".to_string()))]);
        assert_eq!(*engine.calls.borrow(), 3);
        assert_eq!(*slept.borrow(), vec![Duration::from_secs(4), Duration::from_secs(2)]);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let engine = Flaky::new(vec![
            EngineInvocationError::classify(Some(503), "down"),
            EngineInvocationError::classify(Some(503), "down"),
            EngineInvocationError::classify(Some(503), "down"),
            EngineInvocationError::classify(Some(503), "down"),
        ]);
        let err = invoke_with_retry(&engine, &request(), &policy(), &|_| {}).err().expect("fails");
        assert_eq!(err.kind, EngineErrorKind::ServiceUnavailable);
        assert_eq!(*engine.calls.borrow(), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let engine = Flaky::new(vec![EngineInvocationError::classify(Some(401), "bad key")]);
        let err = invoke_with_retry(&engine, &request(), &policy(), &|_| {}).err().expect("fails");
        assert_eq!(err.kind, EngineErrorKind::Auth);
        assert_eq!(*engine.calls.borrow(), 1);
    }

    #[test]
    fn wire_body_serializes_tool_round_trip() {
        let request = EngineRequest {
            messages: vec![
                ChatMessage::system("sys"),
                ChatMessage::user("where?"),
                ChatMessage::Assistant {
                    text: String::new(),
                    tool_calls: vec![ToolRequest {
                        id: "c1".to_string(),
                        name: "read_file".to_string(),
                        args: json!({"file_path": "a.py"}),
                    }],
                },
                ChatMessage::Tool {
                    call_id: "c1".to_string(),
                    name: "read_file".to_string(),
                    content: "📄 a.py (1 lines)".to_string(),
                },
            ],
            tools: vec![ToolSchema {
                name: "read_file".to_string(),
                description: "read".to_string(),
                parameters: json!({"type": "object"}),
            }],
        };
        let body = wire_body("m", 0.0, &request, false);
        assert_eq!(body["messages"][2]["content"], Value::Null);
        assert_eq!(body["messages"][2]["tool_calls"][0]["function"]["arguments"], "{\"file_path\":\"a.py\"}");
        assert_eq!(body["messages"][3]["tool_call_id"], "c1");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn sse_stream_yields_text_then_assembled_tool_calls() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Let me \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"look.\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"function\":{\"name\":\"read_file\",\"arguments\":\"{\\\"file_\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"path\\\":\\\"a.py\\\"}\"}}]}}]}\n\n",
            ": keep-alive\n",
            "data: [DONE]\n\n",
        );
        let deltas: Vec<_> = SseDeltas::new(Cursor::new(body)).collect::<Result<_, _>>().expect("stream");
        assert_eq!(
            deltas,
            vec![
                EngineDelta::Text("Let me ".to_string()),
                EngineDelta::Text("look.".to_string()),
                EngineDelta::ToolCall(ToolRequest {
                    id: "c1".to_string(),
                    name: "read_file".to_string(),
                    args: json!({"file_path": "a.py"}),
                }),
            ]
        );
    }

    #[test]
    fn sse_stream_reports_malformed_chunks() {
        let mut stream = SseDeltas::new(Cursor::new("data: {oops\n"));
        let err = stream.next().expect("item").expect_err("malformed");
        assert_eq!(err.kind, EngineErrorKind::Other);
        assert!(stream.next().is_none());
    }

    #[test]
    fn error_bodies_prefer_provider_message() {
        assert_eq!(error_message(r#"{"error": {"message": "Rate limit exceeded"}}"#), "Rate limit exceeded");
        assert_eq!(error_message("plain failure\n"), "plain failure");
    }

    #[test]
    fn unparseable_arguments_are_kept_as_text() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("{bad"), Value::String("{bad".to_string()));
    }
}
