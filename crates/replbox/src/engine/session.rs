//! Interpreter session lifecycle
//!
//! A session is one running interpreter process plus the bookkeeping the
//! pool needs to decide when to reuse, recycle or evict it.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, LanguageId};
use crate::dialect::Dialect;
use crate::dialect::markers::MarkerSet;
use crate::engine::EngineError;
use crate::engine::protocol::{self, MarkerWait};
use crate::runtime::{LaunchSpec, SessionProcess, StreamEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Draining the banner and running the bootstrap
    Starting,
    Ready,
    /// Exactly one request (or its reset) in flight
    Busy,
    /// Being torn down on purpose
    Recycling,
    Terminated,
}

/// Read-only snapshot of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: u64,
    pub language: LanguageId,
    pub state: SessionState,
    pub request_count: u32,
    pub idle_for: Duration,
    pub container: Option<String>,
}

#[derive(Debug)]
pub struct Session {
    id: u64,
    language: LanguageId,
    process: SessionProcess,
    container: Option<String>,
    state: SessionState,
    request_count: u32,
    created_at: Instant,
    last_used_at: Instant,
    /// User code runs through the dialect's restriction wrapper
    restricted: bool,
}

impl Session {
    /// Start an interpreter and wait until it accepts requests
    ///
    /// Drains the startup banner, then loads the restriction library when
    /// `library` is given and the dialect has a bootstrap, and waits for a
    /// boot marker to confirm the interpreter reads input.
    #[instrument(skip(launch, dialect, config, library), fields(container = launch.container.as_deref()))]
    pub async fn start(
        id: u64,
        language: LanguageId,
        launch: &LaunchSpec,
        dialect: &Dialect,
        config: &Config,
        library: Option<&str>,
    ) -> Result<Self, EngineError> {
        let startup_failed = |message: String| EngineError::SessionStartup { language, message };

        let process = launch.spawn().map_err(|e| startup_failed(e.to_string()))?;
        let now = Instant::now();
        let mut session = Self {
            id,
            language,
            process,
            container: launch.container.clone(),
            state: SessionState::Starting,
            request_count: 0,
            created_at: now,
            last_used_at: now,
            restricted: dialect.bootstrap.is_some() && library.is_some(),
        };

        let deadline = now + config.startup_timeout();
        if let Err(message) = session.drain_banner(dialect, config.banner_drain(), deadline).await {
            session.terminate().await;
            return Err(startup_failed(message));
        }

        let marker = MarkerSet::generate().start;
        let boot = dialect.boot_payload(&marker, library, config.timeout_ms);
        if let Err(e) = session.process.write(boot.text.as_bytes()).await {
            session.terminate().await;
            return Err(startup_failed(format!("failed to write bootstrap: {e}")));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let (wait, stderr) = protocol::wait_for_marker(&mut session.process, &marker, remaining).await;
        match wait {
            MarkerWait::Seen => {}
            MarkerWait::Elapsed => {
                session.terminate().await;
                return Err(startup_failed(format!(
                    "interpreter did not respond within {}ms",
                    config.startup_timeout_ms
                )));
            }
            MarkerWait::Exited => {
                session.terminate().await;
                return Err(startup_failed(exit_message(&stderr)));
            }
        }

        session.state = SessionState::Ready;
        info!(id, %language, restricted = session.restricted, "session ready");
        Ok(session)
    }

    /// Read startup output until the ready signature, a quiet window, or the deadline
    async fn drain_banner(
        &mut self,
        dialect: &Dialect,
        quiet: Duration,
        deadline: Instant,
    ) -> Result<(), String> {
        let mut banner = String::new();

        loop {
            let wake = (Instant::now() + quiet).min(deadline);
            tokio::select! {
                event = self.process.recv() => match event {
                    Some(StreamEvent::Data(_, text)) => {
                        banner.push_str(&text);
                        if dialect.is_ready(&banner) {
                            debug!("ready signature seen");
                            return Ok(());
                        }
                    }
                    Some(StreamEvent::Closed(_)) => {
                        if self.process.streams_closed() {
                            return Err(exit_message(&banner));
                        }
                    }
                    None => return Err(exit_message(&banner)),
                },
                _ = tokio::time::sleep_until(wake) => {
                    debug!(banner_len = banner.len(), "banner drained");
                    return Ok(());
                }
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn language(&self) -> LanguageId {
        self.language
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    pub fn process_mut(&mut self) -> &mut SessionProcess {
        &mut self.process
    }

    /// Mark the session busy with a new request
    pub fn begin_request(&mut self) {
        self.state = SessionState::Busy;
        self.request_count += 1;
        self.last_used_at = Instant::now();
    }

    /// Mark the session ready for the next request
    pub fn finish_request(&mut self) {
        if self.state == SessionState::Busy {
            self.state = SessionState::Ready;
        }
        self.last_used_at = Instant::now();
    }

    pub fn mark_recycling(&mut self) {
        self.state = SessionState::Recycling;
    }

    /// Check if the interpreter is still running
    pub fn is_alive(&mut self) -> bool {
        self.state != SessionState::Terminated && !self.process.has_exited()
    }

    /// Kill the interpreter (and its container)
    pub async fn terminate(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.state = SessionState::Terminated;

        if let Err(e) = self.process.kill().await {
            warn!(id = self.id, language = %self.language, error = %e, "failed to kill session");
        }
        debug!(id = self.id, requests = self.request_count, age = ?self.age(), "session terminated");
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            language: self.language,
            state: self.state,
            request_count: self.request_count,
            idle_for: self.idle_for(),
            container: self.container.clone(),
        }
    }
}

fn exit_message(output: &str) -> String {
    let output = output.trim();
    if output.is_empty() {
        "interpreter exited during startup".to_string()
    } else {
        format!("interpreter exited during startup: {output}")
    }
}
