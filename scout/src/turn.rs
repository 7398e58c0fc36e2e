//! The turn machine: one user message in, one verified answer out.
//!
//! A turn moves through `AwaitingModel -> DispatchingTools -> AwaitingModel
//! ... -> Verifying -> Done`. Engine failures and circuit-breaker trips end
//! it in `Aborted` instead. [`TurnStream`] drives the machine lazily and
//! yields a [`TurnEvent`] for every observable step; dropping the stream
//! cancels the turn.

use std::collections::VecDeque;
use std::mem;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::engine_error::EngineInvocationError;
use crate::core::filter::filter_reported;
use crate::core::grounding::{GroundingReport, VerificationPolicy, verify_answer};
use crate::core::ledger::Trip;
use crate::core::memory::ToolObservation;
use crate::core::types::ToolCall;
use crate::io::config::ScoutConfig;
use crate::io::engine::{
    ChatMessage, DeltaStream, EngineDelta, EngineRequest, ReasoningEngine, RetryPolicy,
    ToolRequest, invoke_with_retry,
};
use crate::io::tools::{ToolKind, ToolRegistry};
use crate::session::Session;

/// Characters of tool output carried by [`TurnEvent::ToolEnd`].
pub const TOOL_PREVIEW_CHARS: usize = 500;
const EMPTY_ANSWER: &str = "No response generated.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingModel,
    DispatchingTools,
    Verifying,
    Done,
    Aborted,
}

impl TurnPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// A chunk of engine text, as it arrives.
    Token(String),
    ToolStart { name: String, status: String },
    ToolEnd { name: String, preview: String },
    Done { answer: String, phase: TurnPhase },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub phase: TurnPhase,
    pub report: Option<GroundingReport>,
    pub removed_citations: usize,
    /// Calls made during this turn only.
    pub tool_calls: Vec<ToolCall>,
    pub trip_reason: Option<String>,
    pub cached: bool,
}

impl TurnOutcome {
    fn aborted(answer: String, tool_calls: Vec<ToolCall>, trip_reason: Option<String>) -> Self {
        Self {
            answer,
            phase: TurnPhase::Aborted,
            report: None,
            removed_citations: 0,
            tool_calls,
            trip_reason,
            cached: false,
        }
    }
}

/// Knobs the turn machine reads from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSettings {
    pub policy: VerificationPolicy,
    pub removal_note: bool,
    pub max_parallel: usize,
    pub retry: RetryPolicy,
}

impl TurnSettings {
    pub fn from_config(cfg: &ScoutConfig) -> Self {
        Self {
            policy: cfg.verification.policy,
            removal_note: cfg.verification.removal_note,
            max_parallel: cfg.tools.max_parallel,
            retry: RetryPolicy::from(&cfg.retry),
        }
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from_config(&ScoutConfig::default())
    }
}

/// Collaborators shared by every turn of a session.
pub struct TurnDeps<'a, E: ReasoningEngine + ?Sized> {
    pub engine: &'a E,
    pub tools: &'a ToolRegistry,
    pub settings: &'a TurnSettings,
    /// Called with each retry backoff. Tests pass a recorder.
    pub sleeper: &'a dyn Fn(Duration),
}

impl<E: ReasoningEngine + ?Sized> Clone for TurnDeps<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: ReasoningEngine + ?Sized> Copy for TurnDeps<'_, E> {}

/// Invoked once with the final outcome, before the `Done` event is yielded.
pub type Finisher<'a> = Box<dyn FnOnce(&Session, &TurnOutcome) + 'a>;

/// Lazily driven turn. Nothing touches the session until the first `next()`.
pub struct TurnStream<'a, E: ReasoningEngine + ?Sized> {
    deps: TurnDeps<'a, E>,
    session: &'a mut Session,
    prompt: Option<String>,
    replay: Option<String>,
    phase: TurnPhase,
    turn: u32,
    ledger_start: usize,
    deltas: Option<DeltaStream<'a>>,
    text: String,
    requests: Vec<ToolRequest>,
    announced: bool,
    pending: VecDeque<TurnEvent>,
    outcome: Option<TurnOutcome>,
    on_finish: Option<Finisher<'a>>,
}

impl<'a, E: ReasoningEngine + ?Sized> TurnStream<'a, E> {
    pub fn new(deps: TurnDeps<'a, E>, session: &'a mut Session, prompt: String) -> Self {
        Self {
            deps,
            session,
            prompt: Some(prompt),
            replay: None,
            phase: TurnPhase::AwaitingModel,
            turn: 0,
            ledger_start: 0,
            deltas: None,
            text: String::new(),
            requests: Vec::new(),
            announced: false,
            pending: VecDeque::new(),
            outcome: None,
            on_finish: None,
        }
    }

    /// A turn that replays a cached answer without calling the engine.
    pub fn replay(
        deps: TurnDeps<'a, E>,
        session: &'a mut Session,
        prompt: String,
        answer: String,
    ) -> Self {
        let mut stream = Self::new(deps, session, prompt);
        stream.replay = Some(answer);
        stream
    }

    pub fn with_finisher(mut self, on_finish: Finisher<'a>) -> Self {
        self.on_finish = Some(on_finish);
        self
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn outcome(&self) -> Option<&TurnOutcome> {
        self.outcome.as_ref()
    }

    /// Drive the turn to completion, forwarding every event.
    pub fn run(mut self, mut on_event: impl FnMut(&TurnEvent)) -> TurnOutcome {
        while let Some(event) = self.next() {
            on_event(&event);
        }
        self.outcome.take().unwrap_or_else(|| {
            TurnOutcome::aborted("Turn ended without an answer.".to_string(), Vec::new(), None)
        })
    }

    fn start(&mut self, prompt: String) {
        self.turn = self.session.begin_turn();
        self.ledger_start = self.session.ledger.calls().len();

        if let Some(answer) = self.replay.take() {
            debug!(turn = self.turn, "replaying cached answer");
            self.session.history.push(ChatMessage::user(prompt));
            self.session.history.push(ChatMessage::Assistant {
                text: answer.clone(),
                tool_calls: Vec::new(),
            });
            self.pending.push_back(TurnEvent::Token(answer.clone()));
            self.finish(TurnOutcome {
                answer,
                phase: TurnPhase::Done,
                report: None,
                removed_citations: 0,
                tool_calls: Vec::new(),
                trip_reason: None,
                cached: true,
            });
            return;
        }

        if let Some(reason) = self.session.ledger.trip().map(Trip::reason) {
            warn!(reason = %reason, "session breaker already tripped, not calling the engine");
            let answer = self.graceful_answer();
            self.finish(TurnOutcome::aborted(answer, Vec::new(), Some(reason)));
            return;
        }

        debug!(turn = self.turn, session = %self.session.id(), "turn started");
        self.session.history.push(ChatMessage::user(prompt));
    }

    fn poll_model(&mut self) -> Option<TurnEvent> {
        if self.deltas.is_none() {
            let request = EngineRequest {
                messages: self.session.history.clone(),
                tools: self.deps.tools.schemas(),
            };
            debug!(messages = request.messages.len(), "invoking engine");
            match invoke_with_retry(
                self.deps.engine,
                &request,
                &self.deps.settings.retry,
                self.deps.sleeper,
            ) {
                Ok(deltas) => self.deltas = Some(deltas),
                Err(err) => {
                    self.abort_engine(&err);
                    return None;
                }
            }
        }

        let next = self.deltas.as_mut().and_then(|deltas| deltas.next());
        match next {
            Some(Ok(EngineDelta::Text(chunk))) => {
                if chunk.is_empty() {
                    return None;
                }
                self.text.push_str(&chunk);
                Some(TurnEvent::Token(chunk))
            }
            Some(Ok(EngineDelta::ToolCall(request))) => {
                self.requests.push(request);
                None
            }
            Some(Err(err)) => {
                self.deltas = None;
                self.abort_engine(&err);
                None
            }
            None => {
                self.deltas = None;
                self.end_reply();
                None
            }
        }
    }

    fn end_reply(&mut self) {
        if self.requests.is_empty() {
            self.phase = TurnPhase::Verifying;
            return;
        }
        debug!(requests = self.requests.len(), "engine requested tools");
        self.session.history.push(ChatMessage::Assistant {
            text: mem::take(&mut self.text),
            tool_calls: self.requests.clone(),
        });
        self.phase = TurnPhase::DispatchingTools;
        self.announced = false;
    }

    fn dispatch_tools(&mut self) {
        if !self.announced {
            for request in &self.requests {
                self.pending.push_back(TurnEvent::ToolStart {
                    name: request.name.clone(),
                    status: self.deps.tools.status_line(&request.name, &request.args),
                });
            }
            self.announced = true;
            return;
        }

        let requests = mem::take(&mut self.requests);
        let outputs = self
            .deps
            .tools
            .dispatch_batch(&requests, self.deps.settings.max_parallel);
        for (request, output) in requests.into_iter().zip(outputs) {
            self.session.router.route(&request.name);
            let output = self.session.track_context(output);
            let observation = ToolKind::from_name(&request.name)
                .map_or(ToolObservation::Ignored, |kind| kind.observation(&request.args));
            self.session.memory.observe_tool_output(observation, &output);
            self.pending.push_back(TurnEvent::ToolEnd {
                name: request.name.clone(),
                preview: output.chars().take(TOOL_PREVIEW_CHARS).collect(),
            });
            self.session.history.push(ChatMessage::Tool {
                call_id: request.id,
                name: request.name.clone(),
                content: output.clone(),
            });
            self.session.ledger.record(ToolCall {
                name: request.name,
                args: request.args,
                output,
            });
        }

        match self.session.ledger.check_thrashing().map(Trip::reason) {
            Some(reason) => self.abort_tripped(reason),
            None => self.phase = TurnPhase::AwaitingModel,
        }
    }

    fn verify(&mut self) {
        let raw = mem::take(&mut self.text);
        let report = {
            let outputs: Vec<&str> = self.session.ledger.outputs().collect();
            verify_answer(&raw, &outputs, self.deps.settings.policy)
        };
        let filtered = filter_reported(&raw, &report, self.deps.settings.removal_note);

        for grounding in &report.claims {
            if grounding.grounded
                && grounding.citation_valid == Some(true)
                && let Some(citation) = &grounding.claim.citation
                && self.session.memory.can_cite(&citation.file, citation.line)
            {
                self.session
                    .memory
                    .add_fact(&grounding.claim.text, &citation.to_string());
            }
        }

        let answer = if filtered.text.trim().is_empty() {
            EMPTY_ANSWER.to_string()
        } else {
            filtered.text
        };
        info!(
            citations = report.citations.len(),
            removed = filtered.removed,
            grounded = report.grounded_count(),
            claims = report.claims.len(),
            f1 = report.f1,
            "answer verified"
        );
        self.session.history.push(ChatMessage::Assistant {
            text: answer.clone(),
            tool_calls: Vec::new(),
        });
        let tool_calls = self.turn_calls();
        self.finish(TurnOutcome {
            answer,
            phase: TurnPhase::Done,
            report: Some(report),
            removed_citations: filtered.removed,
            tool_calls,
            trip_reason: None,
            cached: false,
        });
    }

    fn graceful_answer(&self) -> String {
        self.session
            .ledger
            .graceful_exit_message(self.session.memory.files().len())
    }

    fn abort_tripped(&mut self, reason: String) {
        warn!(reason = %reason, "circuit breaker tripped, ending turn");
        let answer = self.graceful_answer();
        self.session.history.push(ChatMessage::Assistant {
            text: answer.clone(),
            tool_calls: Vec::new(),
        });
        let tool_calls = self.turn_calls();
        self.finish(TurnOutcome::aborted(answer, tool_calls, Some(reason)));
    }

    fn abort_engine(&mut self, err: &EngineInvocationError) {
        warn!(kind = ?err.kind, err = %err, "engine invocation failed");
        let answer = err.friendly_message();
        self.pending.push_back(TurnEvent::Error(answer.clone()));
        let tool_calls = self.turn_calls();
        self.finish(TurnOutcome::aborted(answer, tool_calls, None));
    }

    fn turn_calls(&self) -> Vec<ToolCall> {
        self.session
            .ledger
            .calls()
            .get(self.ledger_start..)
            .map(<[ToolCall]>::to_vec)
            .unwrap_or_default()
    }

    fn finish(&mut self, outcome: TurnOutcome) {
        self.phase = outcome.phase;
        self.session.prune_history();
        info!(
            turn = self.turn,
            phase = ?outcome.phase,
            tool_calls = outcome.tool_calls.len(),
            cached = outcome.cached,
            "turn finished"
        );
        if let Some(on_finish) = self.on_finish.take() {
            on_finish(self.session, &outcome);
        }
        self.pending.push_back(TurnEvent::Done {
            answer: outcome.answer.clone(),
            phase: outcome.phase,
        });
        self.outcome = Some(outcome);
    }
}

impl<E: ReasoningEngine + ?Sized> Iterator for TurnStream<'_, E> {
    type Item = TurnEvent;

    fn next(&mut self) -> Option<TurnEvent> {
        if let Some(prompt) = self.prompt.take() {
            self.start(prompt);
        }
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            match self.phase {
                TurnPhase::Done | TurnPhase::Aborted => return None,
                TurnPhase::AwaitingModel => {
                    if let Some(event) = self.poll_model() {
                        return Some(event);
                    }
                }
                TurnPhase::DispatchingTools => self.dispatch_tools(),
                TurnPhase::Verifying => self.verify(),
            }
        }
    }
}

impl<E: ReasoningEngine + ?Sized> Drop for TurnStream<'_, E> {
    fn drop(&mut self) {
        if self.prompt.is_some() || self.outcome.is_some() {
            return;
        }
        // Requests announced but never run would leave an unanswered
        // tool-call message in the history.
        if self.phase == TurnPhase::DispatchingTools
            && matches!(
                self.session.history.last(),
                Some(ChatMessage::Assistant { tool_calls, .. }) if !tool_calls.is_empty()
            )
        {
            self.session.history.pop();
        }
        self.session.prune_history();
        debug!(turn = self.turn, phase = ?self.phase, "turn cancelled");
    }
}

/// Run one turn to completion.
pub fn run_turn<E: ReasoningEngine + ?Sized>(
    deps: TurnDeps<'_, E>,
    session: &mut Session,
    prompt: String,
    on_event: impl FnMut(&TurnEvent),
) -> TurnOutcome {
    TurnStream::new(deps, session, prompt).run(on_event)
}
