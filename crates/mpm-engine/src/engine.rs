//! Engine facade owned by a session.
//!
//! Wires the ledger, threshold engine, dispatcher, store and rehydrator
//! together. All configuration flows in at construction; the only
//! process-global artifact is the writer lock file.

use crate::dispatcher::{Decision, TriggerDispatcher};
use crate::session_state::SessionState;
use crate::summarizer::Summarizer;
use crate::synthesizer::Synthesizer;
use mpm_config::ContextConfig;
use mpm_core::{
    new_session_id, EngineError, Result, SummarizerError, ThresholdLevel, TriggerEvent,
    TriggerKind,
};
use mpm_ledger::{Budget, LedgerSnapshot, ThresholdEngine, TokenLedger};
use mpm_lock::{acquire_writer_lock, WriterLock};
use mpm_resume::{bootstrap as rehydrate, BootstrapContext, LogRef, LogStore};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// What one `record_usage` call produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordOutcome {
    /// Raw occupancy after the update.
    pub occupancy: f64,
    /// Level crossed by this update, if any.
    pub crossed: Option<ThresholdLevel>,
    /// Dispatcher decision for the crossing, when one fired.
    pub decision: Option<Decision>,
}

/// Point-in-time status for the host.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub snapshot: LedgerSnapshot,
    pub level: ThresholdLevel,
    pub last_log: Option<PathBuf>,
    pub log_count: usize,
}

pub struct ContextEngine {
    enabled: bool,
    session_id: String,
    ledger: Arc<TokenLedger>,
    thresholds: ThresholdEngine,
    dispatcher: Option<TriggerDispatcher>,
    store: Option<LogStore>,
    state: Arc<RwLock<SessionState>>,
    rehydrated: Option<BootstrapContext>,
    _writer_lock: Option<WriterLock>,
}

impl std::fmt::Debug for ContextEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEngine")
            .field("enabled", &self.enabled)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl ContextEngine {
    /// Construct the engine for a project: acquire the writer lock, clean
    /// up and rehydrate the log store, preload the ledger, arm the
    /// dispatcher. Fatal errors (`InvalidConfig` upstream,
    /// `ConcurrentWriter` here) abort startup.
    pub fn bootstrap(
        config: &ContextConfig,
        project_root: &Path,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<Self> {
        let session_id = new_session_id();
        let project_path = std::fs::canonicalize(project_root)
            .unwrap_or_else(|_| project_root.to_path_buf());

        let budget = Budget::new(
            config.budget_total,
            config.thresholds.caution,
            config.thresholds.warning,
            config.thresholds.critical,
        )?;
        let ledger = Arc::new(TokenLedger::new(budget));
        let thresholds = ThresholdEngine::new(budget);

        let state = Arc::new(RwLock::new(SessionState {
            session_id: session_id.clone(),
            project_path,
            ..Default::default()
        }));

        if !config.enabled {
            return Ok(Self {
                enabled: false,
                session_id,
                ledger,
                thresholds,
                dispatcher: None,
                store: None,
                state,
                rehydrated: None,
                _writer_lock: None,
            });
        }

        let mut writer_lock = None;
        let mut store = None;
        let mut dispatcher = None;
        let mut rehydrated = None;

        if config.resume_logs.enabled {
            let storage_dir = config.storage_dir(project_root);
            writer_lock = Some(acquire_writer_lock(&storage_dir, &session_id)?);

            let log_store = LogStore::new(&storage_dir);
            rehydrated = rehydrate(
                &log_store,
                config.resume_logs.auto_load,
                config.resume_logs.cleanup.auto_cleanup,
                config.resume_logs.cleanup.keep_count,
            )?;

            if let Some(context) = &rehydrated {
                ledger.preload(context.preload_tokens)?;
                if let Ok(mut guard) = state.write() {
                    guard.parent_session_id = Some(context.log.session_id.clone());
                }
            }

            let synthesizer = Arc::new(Synthesizer::new(
                summarizer,
                config
                    .resume_logs
                    .token_allocation
                    .per_section()
                    .to_vec(),
                config.resume_logs.max_tokens,
            ));

            let mut trigger_dispatcher = TriggerDispatcher::new(
                synthesizer,
                Arc::new(log_store.clone()),
                ledger.clone(),
                state.clone(),
                config.resume_logs.auto_generate,
            );
            for kind in config.enabled_triggers() {
                trigger_dispatcher.register(kind);
            }

            store = Some(log_store);
            dispatcher = Some(trigger_dispatcher);
        }

        Ok(Self {
            enabled: true,
            session_id,
            ledger,
            thresholds,
            dispatcher,
            store,
            state,
            rehydrated,
            _writer_lock: writer_lock,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn rehydrated(&self) -> Option<&BootstrapContext> {
        self.rehydrated.as_ref()
    }

    /// Record one turn's usage, observe thresholds and dispatch any
    /// crossing.
    pub fn record_usage(&mut self, input_tokens: i64, output_tokens: i64) -> Result<RecordOutcome> {
        if !self.enabled {
            return Err(EngineError::Disabled);
        }

        let occupancy = self.ledger.record_usage(input_tokens, output_tokens)?;
        let crossed = self.thresholds.observe(occupancy);

        let decision = match crossed {
            Some(level) => self.fire_for_level(level, occupancy),
            None => None,
        };

        Ok(RecordOutcome {
            occupancy,
            crossed,
            decision,
        })
    }

    /// Exhaustion is the budget running out; it is dispatched through the
    /// max-tokens safety path rather than as an ordinary crossing.
    fn fire_for_level(&self, level: ThresholdLevel, occupancy: f64) -> Option<Decision> {
        let dispatcher = self.dispatcher.as_ref()?;
        let kind = match level {
            ThresholdLevel::Exhausted => TriggerKind::MaxTokens,
            other => TriggerKind::ThresholdCrossed(other),
        };
        Some(dispatcher.fire(TriggerEvent::new(kind, &self.session_id, occupancy)))
    }

    /// Report a provider-side context overflow; always generates.
    pub fn report_context_exceeded(&self) -> Result<Decision> {
        if !self.enabled {
            return Err(EngineError::Disabled);
        }
        let dispatcher = self.dispatcher.as_ref().ok_or(EngineError::Disabled)?;
        Ok(dispatcher.fire(TriggerEvent::new(
            TriggerKind::ModelContextExceeded,
            &self.session_id,
            self.ledger.occupancy(),
        )))
    }

    /// Explicit pause: fire `ManualPause` and wait for the generation to
    /// commit. `Ok(None)` means the trigger is not enabled.
    pub async fn pause(&self) -> Result<Option<LogRef>> {
        if !self.enabled {
            return Err(EngineError::Disabled);
        }
        let dispatcher = self.dispatcher.as_ref().ok_or(EngineError::Disabled)?;

        let decision = dispatcher.fire(TriggerEvent::new(
            TriggerKind::ManualPause,
            &self.session_id,
            self.ledger.occupancy(),
        ));
        if decision == Decision::Skip {
            return Ok(None);
        }

        dispatcher.wait_idle().await;

        if let Some(failure) = dispatcher.last_failure() {
            return Err(EngineError::Summarizer(SummarizerError::Permanent(failure)));
        }
        Ok(dispatcher.last_log())
    }

    /// Flush-free shutdown: cancel any in-flight generation.
    pub async fn shutdown(&self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.shutdown().await;
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    pub fn current_level(&self) -> ThresholdLevel {
        self.thresholds.current_level()
    }

    pub fn status(&self) -> Result<StatusReport> {
        if !self.enabled {
            return Err(EngineError::Disabled);
        }
        let log_count = match &self.store {
            Some(store) => store.list_latest(usize::MAX)?.len(),
            None => 0,
        };
        let last_log = self
            .dispatcher
            .as_ref()
            .and_then(|d| d.last_log())
            .map(|r| r.path)
            .or_else(|| {
                self.store
                    .as_ref()
                    .and_then(|s| s.list_latest(1).ok())
                    .and_then(|refs| refs.into_iter().next())
                    .map(|r| r.path)
            });

        Ok(StatusReport {
            snapshot: self.ledger.snapshot(),
            level: self.thresholds.current_level(),
            last_log,
            log_count,
        })
    }

    /// Append transcript text the synthesizer may summarize later.
    pub fn append_transcript(&self, text: &str) {
        if let Ok(mut guard) = self.state.write() {
            if !guard.transcript.is_empty() {
                guard.transcript.push('\n');
            }
            guard.transcript.push_str(text);
        }
    }

    pub fn record_decision(&self, decision: &str) {
        if let Ok(mut guard) = self.state.write() {
            guard.recent_decisions.push(decision.to_string());
        }
    }

    pub fn add_open_task(&self, task: &str) {
        if let Ok(mut guard) = self.state.write() {
            guard.open_tasks.push(task.to_string());
        }
    }

    pub fn set_git_branch(&self, branch: Option<String>) {
        if let Ok(mut guard) = self.state.write() {
            guard.git_branch = branch;
        }
    }
}
