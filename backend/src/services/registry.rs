//! Single-writer routing for ledgers
//!
//! Every active ledger key is owned by exactly one tokio task. Requests for a
//! key are queued on that task's bounded mailbox and handled one at a time,
//! so commands against one ledger are strictly serialized while different
//! ledgers proceed in parallel.
//!
//! A worker rebuilds its ledger from the latest snapshot plus newer events
//! on first use, and shuts down after sitting idle. The next request for the
//! key spawns a fresh worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ledger_core::{
    CommandMeta, CommandOutcome, Decision, Ledger, LedgerCommand, LedgerError, LedgerEvent, LedgerKey,
    LedgerSnapshot,
};
use tokio::sync::{mpsc, oneshot, Mutex};

use super::store::EventStore;
use crate::config::LedgerSettings;
use crate::error::{AppError, AppResult};

/// Message handled by a ledger worker
enum LedgerRequest {
    Execute {
        command: LedgerCommand,
        meta: CommandMeta,
        reply: oneshot::Sender<AppResult<CommandOutcome>>,
    },
    Snapshot {
        reply: oneshot::Sender<AppResult<LedgerSnapshot>>,
    },
}

/// Routes requests to one worker per ledger key
#[derive(Clone)]
pub struct LedgerRegistry {
    store: EventStore,
    settings: LedgerSettings,
    workers: Arc<Mutex<HashMap<LedgerKey, mpsc::Sender<LedgerRequest>>>>,
}

impl LedgerRegistry {
    pub fn new(store: EventStore, settings: LedgerSettings) -> Self {
        Self {
            store,
            settings,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Run a command on the ledger's worker and wait for its outcome
    pub async fn execute(
        &self,
        key: LedgerKey,
        command: LedgerCommand,
        meta: CommandMeta,
    ) -> AppResult<CommandOutcome> {
        let (reply, response) = oneshot::channel();
        self.dispatch(key, LedgerRequest::Execute { command, meta, reply })
            .await?;
        response
            .await
            .map_err(|_| AppError::WorkerUnavailable(format!("ledger {} dropped the request", key)))?
    }

    /// Current state of a ledger as seen by its worker
    pub async fn snapshot(&self, key: LedgerKey) -> AppResult<LedgerSnapshot> {
        let (reply, response) = oneshot::channel();
        self.dispatch(key, LedgerRequest::Snapshot { reply }).await?;
        response
            .await
            .map_err(|_| AppError::WorkerUnavailable(format!("ledger {} dropped the request", key)))?
    }

    /// Number of workers whose mailbox is still open
    pub async fn active_workers(&self) -> usize {
        let mut workers = self.workers.lock().await;
        workers.retain(|_, sender| !sender.is_closed());
        workers.len()
    }

    async fn dispatch(&self, key: LedgerKey, mut request: LedgerRequest) -> AppResult<()> {
        // A worker may close its mailbox between lookup and send; retry once
        // against a freshly spawned worker.
        for _ in 0..2 {
            let sender = self.worker(key).await;
            match sender.send(request).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    self.evict(key, &sender).await;
                    request = returned;
                }
            }
        }

        Err(AppError::WorkerUnavailable(format!(
            "no worker accepted requests for ledger {}",
            key
        )))
    }

    async fn worker(&self, key: LedgerKey) -> mpsc::Sender<LedgerRequest> {
        let mut workers = self.workers.lock().await;
        if let Some(sender) = workers.get(&key) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }

        let (sender, mailbox) = mpsc::channel(self.settings.mailbox_capacity.max(1));
        let worker = LedgerWorker {
            key,
            store: self.store.clone(),
            snapshot_interval: self.settings.snapshot_interval,
            ledger: None,
        };
        let idle_timeout = Duration::from_secs(self.settings.idle_timeout_secs);
        tokio::spawn(worker.run(mailbox, idle_timeout));
        tracing::debug!(%key, "Spawned ledger worker");

        workers.insert(key, sender.clone());
        sender
    }

    async fn evict(&self, key: LedgerKey, sender: &mpsc::Sender<LedgerRequest>) {
        let mut workers = self.workers.lock().await;
        if workers
            .get(&key)
            .map(|current| current.same_channel(sender))
            .unwrap_or(false)
        {
            workers.remove(&key);
        }
    }
}

/// Rebuild a ledger from its latest snapshot and the events after it
pub async fn load_ledger(store: &EventStore, key: LedgerKey) -> AppResult<Ledger> {
    let mut ledger = match store.load_snapshot(key).await? {
        Some(snapshot) => Ledger::restore(snapshot),
        None => Ledger::new(key),
    };
    let from_version = ledger.version();

    let events = store.load_events(key, from_version, None).await?;
    ledger
        .catch_up(&events)
        .map_err(|source| AppError::ReplayFailed { key, source })?;

    tracing::info!(
        %key,
        from_version,
        version = ledger.version(),
        replayed = events.len(),
        "Ledger activated"
    );
    Ok(ledger)
}

/// Owner of one ledger's state
struct LedgerWorker {
    key: LedgerKey,
    store: EventStore,
    snapshot_interval: u64,
    ledger: Option<Ledger>,
}

impl LedgerWorker {
    async fn run(mut self, mut mailbox: mpsc::Receiver<LedgerRequest>, idle_timeout: Duration) {
        loop {
            match tokio::time::timeout(idle_timeout, mailbox.recv()).await {
                Ok(Some(request)) => self.handle(request).await,
                Ok(None) => break,
                Err(_) => {
                    // Refuse new sends, then finish what is already queued
                    mailbox.close();
                    while let Some(request) = mailbox.recv().await {
                        self.handle(request).await;
                    }
                    tracing::debug!(key = %self.key, "Ledger worker idle, shutting down");
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, request: LedgerRequest) {
        match request {
            LedgerRequest::Execute { command, meta, reply } => {
                let result = self.execute(&command, &meta).await;
                let _ = reply.send(result);
            }
            LedgerRequest::Snapshot { reply } => {
                let result = self.ensure_loaded().await.and_then(|_| {
                    self.ledger.as_ref().map(Ledger::snapshot).ok_or_else(|| {
                        AppError::WorkerUnavailable(format!("ledger {} is not loaded", self.key))
                    })
                });
                let _ = reply.send(result);
            }
        }
    }

    async fn ensure_loaded(&mut self) -> AppResult<()> {
        if self.ledger.is_none() {
            self.ledger = Some(load_ledger(&self.store, self.key).await?);
        }
        Ok(())
    }

    async fn execute(&mut self, command: &LedgerCommand, meta: &CommandMeta) -> AppResult<CommandOutcome> {
        match self.try_execute(command, meta).await {
            Err(AppError::VersionConflict { version, .. }) => {
                // The stream moved under us; reload and decide again once
                tracing::warn!(key = %self.key, version, "Version conflict, reloading ledger");
                self.ledger = None;
                self.try_execute(command, meta).await
            }
            other => other,
        }
    }

    async fn try_execute(&mut self, command: &LedgerCommand, meta: &CommandMeta) -> AppResult<CommandOutcome> {
        self.ensure_loaded().await?;
        let key = self.key;
        let ledger = match self.ledger.as_mut() {
            Some(ledger) => ledger,
            None => {
                return Err(AppError::WorkerUnavailable(format!("ledger {} is not loaded", key)))
            }
        };

        // Keys that left the in-memory window are answered by the log
        if let Some(idempotency_key) = &meta.idempotency_key {
            if ledger.processed(idempotency_key).is_none() && ledger.idempotency_window_is_full() {
                if let Some(event) = self.store.find_by_idempotency_key(key, idempotency_key).await? {
                    return recorded_outcome(command, idempotency_key, &event);
                }
            }
        }

        match ledger.decide(command, meta)? {
            Decision::Emit(event) => {
                // Fold first so an event that cannot be applied is never stored
                let next = ledger.applied(&event).map_err(|err| match err {
                    LedgerError::Replay(source) => AppError::ReplayFailed { key, source },
                    other => AppError::Ledger(other),
                })?;
                self.store.append(&event).await?;
                *ledger = next;

                tracing::info!(
                    %key,
                    version = event.sequence,
                    event_type = event.payload.name(),
                    command = command.name(),
                    "Ledger event recorded"
                );

                if self.snapshot_interval > 0 && event.sequence % self.snapshot_interval == 0 {
                    if let Err(e) = self.store.save_snapshot(&ledger.snapshot()).await {
                        tracing::warn!(%key, version = event.sequence, "Failed to save snapshot: {}", e);
                    }
                }

                Ok(CommandOutcome::from_event(&event))
            }
            Decision::Duplicate { version } => {
                tracing::debug!(%key, version, "Duplicate command, returning recorded outcome");
                let event = self
                    .store
                    .load_event(key, version)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Event {} of ledger {}", version, key)))?;
                let idempotency_key = meta.idempotency_key.as_deref().unwrap_or_default();
                recorded_outcome(command, idempotency_key, &event)
            }
            Decision::NoOp => Ok(CommandOutcome::unchanged(ledger.version())),
        }
    }
}

/// Outcome of a retried command, or a conflict when the key was used for
/// something else
fn recorded_outcome(
    command: &LedgerCommand,
    idempotency_key: &str,
    event: &LedgerEvent,
) -> AppResult<CommandOutcome> {
    if !command.is_recorded_by(&event.payload) {
        return Err(LedgerError::IdempotencyKeyReused {
            key: idempotency_key.to_string(),
            version: event.sequence,
        }
        .into());
    }
    Ok(CommandOutcome::from_event(event).into_duplicate())
}
