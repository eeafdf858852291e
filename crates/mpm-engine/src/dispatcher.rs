//! Maps trigger events to resume-log generation.
//!
//! At most one generation runs per session at a time. While one is in
//! flight, later triggers collapse into a single deferred slot that the
//! worker drains after the current generation commits, preserving the
//! ordering guarantee that logs for level L complete before level L+1
//! starts and that `created_at` values are strictly increasing.

use crate::session_state::SessionState;
use crate::synthesizer::Synthesizer;
use chrono::{DateTime, Utc};
use mpm_core::{EngineError, Result, ThresholdLevel, TriggerEvent, TriggerKind};
use mpm_ledger::TokenLedger;
use mpm_resume::{LogRef, LogStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of handing a trigger to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Generate,
    Skip,
    Defer,
}

#[derive(Default)]
struct Shared {
    running: bool,
    deferred: Option<TriggerEvent>,
    /// Threshold levels that already produced a log; they cannot
    /// re-trigger within the session.
    generated_levels: HashSet<ThresholdLevel>,
    last_created_at: Option<DateTime<Utc>>,
    last_log: Option<LogRef>,
    last_failure: Option<String>,
    handle: Option<JoinHandle<()>>,
}

pub struct TriggerDispatcher {
    enabled: HashSet<TriggerKind>,
    auto_generate: bool,
    synthesizer: Arc<Synthesizer>,
    store: Arc<LogStore>,
    ledger: Arc<TokenLedger>,
    state: Arc<RwLock<SessionState>>,
    shared: Arc<Mutex<Shared>>,
    cancel: CancellationToken,
}

impl TriggerDispatcher {
    pub fn new(
        synthesizer: Arc<Synthesizer>,
        store: Arc<LogStore>,
        ledger: Arc<TokenLedger>,
        state: Arc<RwLock<SessionState>>,
        auto_generate: bool,
    ) -> Self {
        Self {
            enabled: HashSet::new(),
            auto_generate,
            synthesizer,
            store,
            ledger,
            state,
            shared: Arc::new(Mutex::new(Shared::default())),
            cancel: CancellationToken::new(),
        }
    }

    /// Enable a trigger kind from configuration.
    pub fn register(&mut self, kind: TriggerKind) {
        self.enabled.insert(kind);
    }

    /// Resolve a trigger to a decision; `Generate` spawns the background
    /// generation task. Must be called from within a tokio runtime.
    pub fn fire(&self, event: TriggerEvent) -> Decision {
        let safety_override = matches!(
            event.kind,
            TriggerKind::MaxTokens | TriggerKind::ModelContextExceeded
        );

        let mut shared = self.shared_lock();

        if !safety_override {
            if !self.enabled.contains(&event.kind) {
                return Decision::Skip;
            }
            if !self.auto_generate && event.kind != TriggerKind::ManualPause {
                return Decision::Skip;
            }
            if let TriggerKind::ThresholdCrossed(level) = event.kind {
                if shared.generated_levels.contains(&level) {
                    tracing::debug!(level = %level, "level in cool-down, skipping trigger");
                    return Decision::Skip;
                }
            }
        }

        if shared.running {
            // One deferred slot; further requests collapse into it.
            if shared.deferred.is_none() {
                shared.deferred = Some(event);
            }
            return Decision::Defer;
        }

        shared.running = true;
        let handle = tokio::spawn(run_worker(
            self.synthesizer.clone(),
            self.store.clone(),
            self.ledger.clone(),
            self.state.clone(),
            self.shared.clone(),
            self.cancel.clone(),
            event,
        ));
        shared.handle = Some(handle);
        Decision::Generate
    }

    /// Wait for the in-flight generation (and anything deferred behind it)
    /// to finish.
    pub async fn wait_idle(&self) {
        let handle = self.shared_lock().handle.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Cancel any in-flight generation and drop the deferred slot. A
    /// cancelled synthesis never becomes the latest log.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = {
            let mut shared = self.shared_lock();
            shared.deferred = None;
            shared.handle.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared_lock().running
    }

    /// The most recently committed log of this session, if any.
    pub fn last_log(&self) -> Option<LogRef> {
        self.shared_lock().last_log.clone()
    }

    /// Why the most recent generation failed, if it did.
    pub fn last_failure(&self) -> Option<String> {
        self.shared_lock().last_failure.clone()
    }

    fn shared_lock(&self) -> MutexGuard<'_, Shared> {
        // Poisoning here means a worker panicked mid-update; that is an
        // invariant violation, not a recoverable state.
        self.shared.lock().expect("dispatcher state poisoned")
    }
}

/// Background generation loop: run the initial event, then drain the
/// deferred slot until it is empty or cancellation fires.
async fn run_worker(
    synthesizer: Arc<Synthesizer>,
    store: Arc<LogStore>,
    ledger: Arc<TokenLedger>,
    state: Arc<RwLock<SessionState>>,
    shared: Arc<Mutex<Shared>>,
    cancel: CancellationToken,
    initial: TriggerEvent,
) {
    let mut event = initial;
    loop {
        let floor = shared
            .lock()
            .expect("dispatcher state poisoned")
            .last_created_at;

        let result =
            generate_once(&synthesizer, &store, &ledger, &state, &event, floor, &cancel).await;

        let mut guard = shared.lock().expect("dispatcher state poisoned");
        match result {
            Ok((log_ref, created_at)) => {
                if let TriggerKind::ThresholdCrossed(level) = event.kind {
                    guard.generated_levels.insert(level);
                }
                guard.last_created_at = Some(created_at);
                guard.last_log = Some(log_ref);
                guard.last_failure = None;
            }
            Err(EngineError::Cancelled) => {
                tracing::debug!(trigger = %event.kind, "generation cancelled");
            }
            Err(error) => {
                // The trigger stays eligible; a later fire retries.
                tracing::warn!(trigger = %event.kind, %error, "resume log generation failed");
                guard.last_failure = Some(error.to_string());
            }
        }

        if cancel.is_cancelled() {
            guard.deferred = None;
            guard.running = false;
            return;
        }

        match guard.deferred.take() {
            Some(next) => {
                if let TriggerKind::ThresholdCrossed(level) = next.kind {
                    if guard.generated_levels.contains(&level) {
                        guard.running = false;
                        return;
                    }
                }
                event = next;
            }
            None => {
                guard.running = false;
                return;
            }
        }
    }
}

async fn generate_once(
    synthesizer: &Synthesizer,
    store: &LogStore,
    ledger: &TokenLedger,
    state: &RwLock<SessionState>,
    event: &TriggerEvent,
    created_at_floor: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
) -> Result<(LogRef, DateTime<Utc>)> {
    let snapshot = state
        .read()
        .map_err(|_| EngineError::InvalidInput("session state poisoned".to_string()))?
        .clone();

    let ledger_snapshot = ledger.snapshot();
    let consumed = ledger_snapshot.used + ledger_snapshot.rehydrated;
    let tokens_at_generation = consumed.min(u64::from(u32::MAX)) as u32;

    let log = synthesizer
        .synthesize(
            &snapshot,
            event,
            ledger_snapshot.total,
            tokens_at_generation,
            created_at_floor,
            cancel,
        )
        .await?;
    let created_at = log.created_at;

    // Filesystem work runs on the blocking pool; the cancellation flag is
    // checked right before the commit rename.
    let store = store.clone();
    let cancel_flag = cancel.clone();
    let log_ref = tokio::task::spawn_blocking(move || {
        store.persist_cancellable(&log, || cancel_flag.is_cancelled())
    })
    .await
    .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;

    Ok((log_ref, created_at))
}
