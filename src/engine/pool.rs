//! Bounded leasing of render sessions.
//!
//! A FIFO semaphore caps the number of leased sessions. Released sessions that are still healthy
//! go back to an idle list and are handed out again; everything else is closed.

use std::fmt;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::util::lock::mutex_lock;

use super::{EngineError, EngineHandle, EngineSession, PrintJob, SessionProfile};

const SOURCE: &str = "engine::pool";

const METRIC_SESSION_ACQUIRED: &str = "pressroom_session_acquired_total";
const METRIC_SESSION_RELEASED: &str = "pressroom_session_released_total";
const METRIC_SESSION_LEAKED: &str = "pressroom_session_leaked_total";
const METRIC_SESSION_WAIT_MS: &str = "pressroom_session_wait_ms";
const METRIC_POOL_EXHAUSTED: &str = "pressroom_pool_exhausted_total";

#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("no render session became available within {waited:?}")]
    Exhausted { waited: Duration },
    #[error("engine initialization failed: {0}")]
    EngineInit(EngineError),
    #[error("engine crashed: {0}")]
    EngineCrash(EngineError),
    #[error("render session pool is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_sessions: usize,
    pub acquire_timeout: Duration,
    /// Renders a session may serve before it is closed instead of reused.
    pub max_session_uses: u32,
    pub profile: SessionProfile,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 4,
            acquire_timeout: Duration::from_secs(10),
            max_session_uses: 32,
            profile: SessionProfile::default(),
        }
    }
}

impl From<&crate::config::PoolSettings> for PoolConfig {
    fn from(settings: &crate::config::PoolSettings) -> Self {
        Self {
            max_sessions: settings.max_sessions.get(),
            acquire_timeout: settings.acquire_timeout,
            max_session_uses: settings.max_session_uses.get(),
            profile: SessionProfile {
                viewport_width: settings.viewport_width.get(),
                viewport_height: settings.viewport_height.get(),
                ..SessionProfile::default()
            },
        }
    }
}

/// What the caller wants done with a session it hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDisposition {
    /// The render succeeded; keep the session if it passes the health check.
    Reuse,
    /// The render failed or timed out; close the session.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
    pub leaked: u64,
    pub leased: u64,
    pub idle: usize,
    pub max_sessions: usize,
}

struct IdleSession {
    id: u64,
    generation: u64,
    uses: u32,
    session: Box<dyn EngineSession>,
}

struct PoolInner {
    engine: Arc<EngineHandle>,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IdleSession>>,
    closed: AtomicBool,
    session_ids: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    leaked: AtomicU64,
}

#[derive(Clone)]
pub struct RenderSessionPool {
    inner: Arc<PoolInner>,
}

/// A leased session. Hand it back with [`RenderSessionPool::release`]; dropping it instead
/// closes it in the background and is logged as a leak.
pub struct RenderSession {
    id: u64,
    generation: u64,
    uses: u32,
    session: Option<Box<dyn EngineSession>>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl RenderSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Engine generation the session was opened against.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn render(&mut self, job: &PrintJob<'_>) -> Result<Vec<u8>, EngineError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| EngineError::session("session already released"))?;
        self.uses += 1;
        session.render_pdf(job).await
    }
}

impl fmt::Debug for RenderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderSession")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("uses", &self.uses)
            .field("leased", &self.session.is_some())
            .finish()
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.pool.released.fetch_add(1, Ordering::SeqCst);
        self.pool.leaked.fetch_add(1, Ordering::SeqCst);
        counter!(METRIC_SESSION_RELEASED).increment(1);
        counter!(METRIC_SESSION_LEAKED).increment(1);
        warn!(
            target = SOURCE,
            op = "drop",
            session_id = self.id,
            generation = self.generation,
            "Render session dropped without release; closing in background"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(session.close());
            }
            Err(_) => warn!(
                target = SOURCE,
                op = "drop",
                session_id = self.id,
                "No runtime available to close dropped session"
            ),
        }
    }
}

impl RenderSessionPool {
    pub fn new(engine: Arc<EngineHandle>, config: PoolConfig) -> Self {
        let max_sessions = config.max_sessions.max(1);
        Self {
            inner: Arc::new(PoolInner {
                engine,
                permits: Arc::new(Semaphore::new(max_sessions)),
                config: PoolConfig {
                    max_sessions,
                    ..config
                },
                idle: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                session_ids: AtomicU64::new(0),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
                leaked: AtomicU64::new(0),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.inner.engine
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Lease a session, waiting up to the configured acquire timeout.
    pub async fn acquire(&self) -> Result<RenderSession, PoolError> {
        self.acquire_within(self.inner.config.acquire_timeout).await
    }

    /// Lease a session, waiting up to `wait` for a free slot.
    ///
    /// The engine is brought up first, with one more launch attempt if the first fails. If opening
    /// a session on the ready engine fails, the engine is restarted and the open is retried once.
    pub async fn acquire_within(&self, wait: Duration) -> Result<RenderSession, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let ready = match self.inner.engine.ensure_ready().await {
            Ok(ready) => ready,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "acquire",
                    result = "launch_failed",
                    error = %err,
                    "Engine launch failed, trying once more"
                );
                self.inner
                    .engine
                    .ensure_ready()
                    .await
                    .map_err(PoolError::EngineInit)?
            }
        };

        let started = Instant::now();
        let permit =
            match tokio::time::timeout(wait, Arc::clone(&self.inner.permits).acquire_owned()).await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(PoolError::Closed),
                Err(_) => {
                    counter!(METRIC_POOL_EXHAUSTED).increment(1);
                    warn!(
                        target = SOURCE,
                        op = "acquire",
                        result = "exhausted",
                        waited_ms = wait.as_millis() as u64,
                        max_sessions = self.inner.config.max_sessions,
                        "No render session available"
                    );
                    return Err(PoolError::Exhausted { waited: wait });
                }
            };
        histogram!(METRIC_SESSION_WAIT_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        if let Some(idle) = self.take_idle(ready.generation).await {
            debug!(
                target = SOURCE,
                op = "acquire",
                result = "reused",
                session_id = idle.id,
                generation = idle.generation,
                uses = idle.uses,
                "Reusing idle render session"
            );
            return Ok(self.lease(idle.id, idle.generation, idle.uses, idle.session, permit));
        }

        let profile = &self.inner.config.profile;
        let (generation, session) = match ready.instance.open_session(profile).await {
            Ok(session) => (ready.generation, session),
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "acquire",
                    result = "open_failed",
                    generation = ready.generation,
                    error = %err,
                    "Session creation failed on a ready engine"
                );
                let restarted = self
                    .inner
                    .engine
                    .restart(ready.generation)
                    .await
                    .map_err(PoolError::EngineInit)?;
                match restarted.instance.open_session(profile).await {
                    Ok(session) => (restarted.generation, session),
                    Err(err) => return Err(PoolError::EngineCrash(err)),
                }
            }
        };

        let id = self.inner.session_ids.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            target = SOURCE,
            op = "acquire",
            result = "opened",
            session_id = id,
            generation,
            "Opened render session"
        );
        Ok(self.lease(id, generation, 0, session, permit))
    }

    /// Hand a session back. Never fails; a session that cannot be reused is closed.
    pub async fn release(&self, mut lease: RenderSession, disposition: SessionDisposition) {
        let Some(mut session) = lease.session.take() else {
            return;
        };
        let permit = lease.permit.take();
        self.inner.released.fetch_add(1, Ordering::SeqCst);
        counter!(METRIC_SESSION_RELEASED).increment(1);

        let reusable = disposition == SessionDisposition::Reuse
            && lease.uses < self.inner.config.max_session_uses
            && !self.is_closed()
            && self.inner.engine.is_live(lease.generation);

        if reusable {
            match session.reset().await {
                Ok(()) if !self.is_closed() => {
                    mutex_lock(&self.inner.idle, SOURCE, "release").push(IdleSession {
                        id: lease.id,
                        generation: lease.generation,
                        uses: lease.uses,
                        session,
                    });
                    debug!(
                        target = SOURCE,
                        op = "release",
                        result = "idle",
                        session_id = lease.id,
                        uses = lease.uses,
                        "Render session returned to pool"
                    );
                    drop(permit);
                    return;
                }
                Ok(()) => {}
                Err(err) => warn!(
                    target = SOURCE,
                    op = "release",
                    result = "reset_failed",
                    session_id = lease.id,
                    error = %err,
                    "Render session failed health check"
                ),
            }
        }

        session.close().await;
        debug!(
            target = SOURCE,
            op = "release",
            result = "closed",
            session_id = lease.id,
            ?disposition,
            "Render session closed"
        );
        drop(permit);
    }

    pub fn stats(&self) -> PoolStats {
        let acquired = self.inner.acquired.load(Ordering::SeqCst);
        let released = self.inner.released.load(Ordering::SeqCst);
        PoolStats {
            acquired,
            released,
            leaked: self.inner.leaked.load(Ordering::SeqCst),
            leased: acquired.saturating_sub(released),
            idle: mutex_lock(&self.inner.idle, SOURCE, "stats").len(),
            max_sessions: self.inner.config.max_sessions,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop leasing, wait up to `grace` for leased sessions to come back, then close idle
    /// sessions and shut the engine down.
    pub async fn close(&self, grace: Duration) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let slots = u32::try_from(self.inner.config.max_sessions).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, self.inner.permits.acquire_many(slots)).await {
            Ok(Ok(all)) => drop(all),
            Ok(Err(_)) => {}
            Err(_) => warn!(
                target = SOURCE,
                op = "close",
                leased = self.stats().leased,
                grace_ms = grace.as_millis() as u64,
                "Leased sessions did not return in time; shutting engine down anyway"
            ),
        }
        self.inner.permits.close();

        let idle = std::mem::take(&mut *mutex_lock(&self.inner.idle, SOURCE, "close"));
        let closed = idle.len();
        for entry in idle {
            entry.session.close().await;
        }
        self.inner.engine.shutdown().await;

        let stats = self.stats();
        info!(
            target = SOURCE,
            op = "close",
            result = "ok",
            idle_closed = closed,
            acquired = stats.acquired,
            released = stats.released,
            leaked = stats.leaked,
            "Render session pool closed"
        );
    }

    fn lease(
        &self,
        id: u64,
        generation: u64,
        uses: u32,
        session: Box<dyn EngineSession>,
        permit: OwnedSemaphorePermit,
    ) -> RenderSession {
        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        counter!(METRIC_SESSION_ACQUIRED).increment(1);
        RenderSession {
            id,
            generation,
            uses,
            session: Some(session),
            permit: Some(permit),
            pool: Arc::clone(&self.inner),
        }
    }

    // Idle sessions from a retired engine generation are closed on the way.
    async fn take_idle(&self, generation: u64) -> Option<IdleSession> {
        let (reused, stale) = {
            let mut idle = mutex_lock(&self.inner.idle, SOURCE, "take_idle");
            let (current, stale): (Vec<_>, Vec<_>) = idle
                .drain(..)
                .partition(|entry| entry.generation == generation);
            *idle = current;
            (idle.pop(), stale)
        };
        for entry in stale {
            entry.session.close().await;
        }
        reused
    }
}
