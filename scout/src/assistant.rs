//! The public face of scout: ask questions about one repository.
//!
//! An [`Assistant`] owns the tool registry, prompt templates, response cache
//! and a single [`Session`]. Each question runs one turn of the machine in
//! [`crate::turn`]; cache hits replay the stored answer instead.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::io::cache::{CacheEntry, CachedToolCall, ResponseCache, repo_state_hash};
use crate::io::config::{ScoutConfig, ScoutPaths};
use crate::io::engine::ReasoningEngine;
use crate::io::prompt::PromptLibrary;
use crate::io::tools::{ToolContext, ToolRegistry};
use crate::io::transcript::{TranscriptSummary, TurnTranscript, list_transcripts, write_transcript};
use crate::session::{Session, SessionStats};
use crate::turn::{Finisher, TurnDeps, TurnEvent, TurnOutcome, TurnPhase, TurnSettings, TurnStream};

/// Cache key for the canned overview question.
const OVERVIEW_KEY: &str = "[overview]";

pub struct Assistant<E: ReasoningEngine> {
    engine: E,
    tools: ToolRegistry,
    prompts: PromptLibrary,
    cfg: ScoutConfig,
    settings: TurnSettings,
    paths: ScoutPaths,
    session: Session,
    cache: Option<ResponseCache>,
    sleeper: Box<dyn Fn(Duration)>,
}

impl<E: ReasoningEngine> Assistant<E> {
    pub fn new(repo: &Path, cfg: ScoutConfig, engine: E) -> Result<Self> {
        cfg.validate()?;
        let ctx = ToolContext::new(repo, cfg.tools.clone())?;
        let tools = ToolRegistry::new(ctx)?;
        let prompts = PromptLibrary::new()?;
        let system = prompts
            .system(tools.context().root(), &tools.schemas())
            .context("render system prompt")?;
        let paths = ScoutPaths::new(tools.context().root());
        let cache = cfg
            .cache
            .enabled
            .then(|| ResponseCache::new(paths.cache_dir_for(&cfg.cache), cfg.cache.max_age_days));
        let session = Session::new(
            system,
            cfg.breaker.clone(),
            cfg.session.max_history_messages,
        )
        .with_context_limit(cfg.session.max_context_tokens);
        info!(
            repo = %tools.context().root().display(),
            model = engine.model_id(),
            cache = cache.is_some(),
            "assistant ready"
        );
        Ok(Self {
            settings: TurnSettings::from_config(&cfg),
            engine,
            tools,
            prompts,
            cfg,
            paths,
            session,
            cache,
            sleeper: Box::new(thread::sleep),
        })
    }

    /// Replace the retry backoff sleeper.
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn repo_root(&self) -> &Path {
        self.tools.context().root()
    }

    pub fn config(&self) -> &ScoutConfig {
        &self.cfg
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    pub fn transcripts_dir(&self) -> &Path {
        &self.paths.transcripts_dir
    }

    /// Transcripts written for the current session.
    pub fn transcripts(&self) -> Result<Vec<TranscriptSummary>> {
        list_transcripts(&self.paths.transcripts_dir, self.session.id())
    }

    /// Drop memory, ledger, and history. The next question starts fresh.
    pub fn reset(&mut self) {
        self.session.reset();
    }

    /// Answer a question using the deep-dive or code-flow workflow.
    #[instrument(skip_all, fields(session = %self.session.id()))]
    pub fn ask(&mut self, question: &str, use_cache: bool) -> Result<TurnOutcome> {
        self.ask_with(question, use_cache, |_| {})
    }

    pub fn ask_with(
        &mut self,
        question: &str,
        use_cache: bool,
        on_event: impl FnMut(&TurnEvent),
    ) -> Result<TurnOutcome> {
        let message = self.prompts.question(question)?;
        Ok(self.begin(question, message, use_cache)?.run(on_event))
    }

    /// Stream the answer to a question event by event.
    pub fn stream_ask(&mut self, question: &str, use_cache: bool) -> Result<TurnStream<'_, E>> {
        let message = self.prompts.question(question)?;
        self.begin(question, message, use_cache)
    }

    #[instrument(skip_all, fields(session = %self.session.id()))]
    pub fn overview(&mut self, use_cache: bool) -> Result<TurnOutcome> {
        let message = self.prompts.overview()?;
        Ok(self.begin(OVERVIEW_KEY, message, use_cache)?.run(|_| {}))
    }

    /// Send a raw conversational message. Follow-ups depend on history, so
    /// chat turns bypass the cache.
    #[instrument(skip_all, fields(session = %self.session.id()))]
    pub fn chat(&mut self, message: &str, on_event: impl FnMut(&TurnEvent)) -> Result<TurnOutcome> {
        Ok(self.begin(message, message.to_string(), false)?.run(on_event))
    }

    fn begin(&mut self, key: &str, message: String, use_cache: bool) -> Result<TurnStream<'_, E>> {
        let Self {
            engine,
            tools,
            prompts,
            cfg,
            settings,
            paths,
            session,
            cache,
            sleeper,
        } = self;
        let model = engine.model_id().to_string();
        let cache = cache.as_ref().filter(|_| use_cache);
        let store = cache.map(|cache| (cache, repo_state_hash(tools.context().root())));
        let deps = TurnDeps {
            engine: &*engine,
            tools: &*tools,
            settings: &*settings,
            sleeper: &**sleeper,
        };
        let transcripts = cfg
            .session
            .transcripts
            .then(|| paths.transcripts_dir.clone());

        if let Some((cache, repo_hash)) = &store
            && let Some(entry) = cache.get(repo_hash, key, &model)
        {
            info!(key, "answering from cache");
            let finisher = record_turn(None, transcripts, key, model, PathBuf::new());
            return Ok(TurnStream::replay(deps, session, message, entry.response).with_finisher(finisher));
        }

        let prompt = prompts.augment(&message, &session.memory, cfg.session.max_context_facts)?;
        let finisher = record_turn(
            store,
            transcripts,
            key,
            model,
            tools.context().root().to_path_buf(),
        );
        Ok(TurnStream::new(deps, session, prompt).with_finisher(finisher))
    }
}

/// Cache DONE answers and write the transcript once a turn finishes.
fn record_turn<'a>(
    store: Option<(&'a ResponseCache, String)>,
    transcripts: Option<PathBuf>,
    key: &str,
    model: String,
    repo_root: PathBuf,
) -> Finisher<'a> {
    let key = key.to_string();
    Box::new(move |session: &Session, outcome: &TurnOutcome| {
        if outcome.phase == TurnPhase::Done
            && !outcome.cached
            && let Some((cache, repo_hash)) = &store
        {
            let calls = outcome
                .tool_calls
                .iter()
                .map(|call| CachedToolCall {
                    name: call.name.clone(),
                    args: call.args.clone(),
                })
                .collect();
            let entry = CacheEntry::new(&outcome.answer, calls, &repo_root);
            if let Err(err) = cache.put(repo_hash, &key, &model, &entry) {
                warn!(err = %format!("{err:#}"), "could not cache response");
            }
        }
        if let Some(dir) = &transcripts {
            let transcript = TurnTranscript::new(session.id(), session.turns(), &key, outcome);
            if let Err(err) = write_transcript(dir, &transcript) {
                warn!(err = %format!("{err:#}"), "could not write transcript");
            }
        }
    })
}
