//! Warm session pool
//!
//! Holds at most one long-lived isolated session per language. Requests for
//! a language queue on that session's mutex in arrival order; a semaphore
//! bounds how many may wait. The lease handed to a request is released only
//! after the post-request reset, so requests never overlap on a session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, ConfigError, LanguageConfig, LanguageId};
use crate::dialect::markers::MarkerSet;
use crate::dialect::{self, Dialect};
use crate::engine::EngineError;
use crate::engine::protocol::{self, Completion};
use crate::engine::reset::{ResetOutcome, reset_session};
use crate::engine::session::{Session, SessionInfo};
use crate::runtime::IsolationRuntime;
use crate::types::ExecutionResult;

/// Shortest idle sweep interval
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

struct Slot {
    session: Arc<Mutex<Option<Session>>>,
    /// Waiting requests plus the one in flight
    admission: Arc<Semaphore>,
}

/// Exclusive use of a language's warm session
///
/// Dropping the lease releases the session to the next queued request.
pub struct WarmLease {
    language: LanguageId,
    guard: OwnedMutexGuard<Option<Session>>,
    _permit: OwnedSemaphorePermit,
}

impl WarmLease {
    pub fn language(&self) -> LanguageId {
        self.language
    }

    pub fn session(&mut self) -> Result<&mut Session, EngineError> {
        self.guard
            .as_mut()
            .ok_or(EngineError::SessionExited(self.language))
    }

    /// Terminate the session and leave the slot empty
    async fn evict(&mut self) {
        if let Some(mut session) = self.guard.take() {
            session.terminate().await;
        }
    }

    /// Tear the session down on purpose
    async fn recycle(&mut self) {
        if let Some(session) = self.guard.as_mut() {
            info!(id = session.id(), language = %self.language, "recycling session");
            session.mark_recycling();
        }
        self.evict().await;
    }

    /// Reset the session, then release it
    async fn reset(mut self, dialect: &'static Dialect, markers: MarkerSet, fallback: Duration) {
        let Some(session) = self.guard.as_mut() else {
            return;
        };

        match reset_session(session, dialect, &markers, fallback).await {
            ResetOutcome::Completed | ResetOutcome::FallbackElapsed => session.finish_request(),
            ResetOutcome::SessionExited => {
                warn!(id = session.id(), language = %self.language, "evicting session that exited during reset");
                self.evict().await;
            }
        }
    }
}

/// What happens to a warm session after a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Followup {
    /// Clear user state and release the session
    Reset,
    /// Replace the session
    Recycle,
    /// Drop a session whose interpreter already exited
    Evict,
}

fn followup(completion: Completion, dialect: &Dialect) -> Followup {
    match completion {
        Completion::TimedOut => Followup::Recycle,
        Completion::Exited => Followup::Evict,
        Completion::EndMarker | Completion::ErrorSignature if dialect.resets_in_place() => {
            Followup::Reset
        }
        Completion::EndMarker | Completion::ErrorSignature => Followup::Recycle,
    }
}

pub struct PoolManager {
    config: Arc<Config>,
    runtime: Arc<IsolationRuntime>,
    slots: HashMap<LanguageId, Slot>,
    next_id: AtomicU64,
    closed: AtomicBool,
    sweeper: StdMutex<Option<JoinHandle<()>>>,
}

impl PoolManager {
    pub fn new(config: Arc<Config>, runtime: Arc<IsolationRuntime>) -> Self {
        let slots = LanguageId::ALL
            .into_iter()
            .map(|language| {
                let slot = Slot {
                    session: Arc::new(Mutex::new(None)),
                    admission: Arc::new(Semaphore::new(config.max_queued_requests + 1)),
                };
                (language, slot)
            })
            .collect();

        Self {
            config,
            runtime,
            slots,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            sweeper: StdMutex::new(None),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn slot(&self, language: LanguageId) -> Result<&Slot, EngineError> {
        self.slots
            .get(&language)
            .ok_or(EngineError::Config(ConfigError::LanguageNotFound(language)))
    }

    /// Lease the warm session for `language`, starting one if needed
    ///
    /// Waits in FIFO order behind requests already queued for the language.
    /// Dead sessions are evicted and sessions that served
    /// `max_requests_per_session` requests are recycled before reuse.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, language: LanguageId) -> Result<WarmLease, EngineError> {
        if self.is_closed() {
            return Err(EngineError::PoolClosed);
        }

        let lang = self.config.language(language)?;
        if !self.runtime.is_available().await {
            return Err(EngineError::IsolationUnavailable);
        }
        if !self.runtime.ensure_image(language, lang).await {
            return Err(EngineError::ImageProvisioning(language));
        }

        let slot = self.slot(language)?;
        let permit = slot
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::Closed => EngineError::PoolClosed,
                TryAcquireError::NoPermits => EngineError::QueueFull(language),
            })?;
        let mut guard = slot.session.clone().lock_owned().await;

        if self.is_closed() {
            return Err(EngineError::PoolClosed);
        }

        if let Some(session) = guard.as_mut() {
            if !session.is_alive() {
                warn!(id = session.id(), %language, "warm session exited unexpectedly, replacing it");
                session.terminate().await;
                *guard = None;
            } else if session.request_count() >= self.config.max_requests_per_session {
                info!(
                    id = session.id(),
                    %language,
                    requests = session.request_count(),
                    "session reached its request limit, recycling"
                );
                session.mark_recycling();
                session.terminate().await;
                *guard = None;
            }
        }

        if guard.is_none() {
            *guard = Some(self.start_session(language, lang).await?);
        }

        Ok(WarmLease {
            language,
            guard,
            _permit: permit,
        })
    }

    async fn start_session(
        &self,
        language: LanguageId,
        lang: &LanguageConfig,
    ) -> Result<Session, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let launch = self.runtime.isolated_launch(&self.config, language, lang);
        debug!(id, %language, "starting warm session");

        Session::start(
            id,
            language,
            &launch,
            dialect::lookup(language),
            &self.config,
            lang.library.as_deref(),
        )
        .await
    }

    /// Run one request on the warm session for `language`
    ///
    /// The result is returned as soon as the reply is read. Timed-out and
    /// exited sessions, and sessions of dialects that cannot clear their
    /// state, are torn down in the background. Otherwise the session is reset
    /// in the background and released once the reset finishes.
    #[instrument(skip(self, code))]
    pub async fn execute(
        &self,
        language: LanguageId,
        code: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, EngineError> {
        let mut lease = self.get_or_create(language).await?;
        let dialect = dialect::lookup(language);
        let markers = MarkerSet::generate();

        let session = lease.session()?;
        session.begin_request();
        let restricted = session.is_restricted();
        let outcome = protocol::run_request(
            session.process_mut(),
            dialect,
            &markers,
            code,
            restricted,
            timeout,
            self.config.error_debounce(),
        )
        .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                lease.evict().await;
                return Err(e);
            }
        };

        let result = protocol::finalize(dialect, &markers, &outcome).with_warm_session(true);

        // The lease moves into the follow-up task, so the next request for
        // this language waits for it while this caller returns at once.
        match followup(outcome.completion, dialect) {
            Followup::Reset => {
                let fallback = self.config.reset_fallback();
                tokio::spawn(lease.reset(dialect, markers, fallback));
            }
            Followup::Recycle => {
                tokio::spawn(async move { lease.recycle().await });
            }
            Followup::Evict => {
                warn!(%language, "warm session exited mid-request");
                tokio::spawn(async move { lease.evict().await });
            }
        }

        Ok(result)
    }

    /// Start the warm session for `language` without running a request
    pub async fn prewarm(&self, language: LanguageId) -> Result<(), EngineError> {
        let lease = self.get_or_create(language).await?;
        debug!(language = %lease.language(), "prewarmed");
        Ok(())
    }

    /// Snapshot of the warm session for `language`, if one is pooled
    ///
    /// Waits for any in-flight request and reset to finish.
    pub async fn session_info(&self, language: LanguageId) -> Option<SessionInfo> {
        let slot = self.slots.get(&language)?;
        slot.session.lock().await.as_ref().map(Session::info)
    }

    /// Terminate warm sessions idle for at least `idle`, skipping busy ones
    pub async fn evict_idle(&self, idle: Duration) -> usize {
        let mut evicted = 0;

        for (language, slot) in &self.slots {
            let Ok(mut guard) = slot.session.try_lock() else {
                continue;
            };
            if let Some(session) = guard.as_mut()
                && session.idle_for() >= idle
            {
                info!(id = session.id(), %language, idle = ?session.idle_for(), "evicting idle session");
                session.terminate().await;
                *guard = None;
                evicted += 1;
            }
        }

        evicted
    }

    /// Periodically evict idle sessions when `idle_eviction_ms` is set
    ///
    /// Must be called from within a Tokio runtime. The sweeper holds only a
    /// weak reference and stops once the pool is dropped or shut down.
    pub fn start_idle_sweeper(self: &Arc<Self>) {
        let Some(idle) = self.config.idle_eviction() else {
            return;
        };
        let interval = (idle / 2).max(MIN_SWEEP_INTERVAL);
        let pool = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                if pool.is_closed() {
                    break;
                }
                pool.evict_idle(idle).await;
            }
        });

        debug!(?interval, "idle sweeper started");
        if let Ok(mut sweeper) = self.sweeper.lock()
            && let Some(previous) = sweeper.replace(handle)
        {
            previous.abort();
        }
    }

    /// Terminate every pooled session and refuse further leases
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut sweeper) = self.sweeper.lock()
            && let Some(handle) = sweeper.take()
        {
            handle.abort();
        }

        for (language, slot) in &self.slots {
            slot.admission.close();
            let mut guard = slot.session.lock().await;
            if let Some(mut session) = guard.take() {
                debug!(id = session.id(), %language, "shutting down session");
                session.terminate().await;
            }
        }

        info!("session pool shut down");
    }
}
