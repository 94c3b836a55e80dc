#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, header},
};
use pressroom::{
    application::render::{RenderConfig, RenderService},
    cache::{CacheConfig, ResultCache},
    domain::DEFAULT_TITLE,
    engine::{
        EngineError, EngineHandle, EngineInstance, EngineLauncher, EngineSession, PoolConfig,
        PrintJob, RenderSessionPool, SessionProfile,
    },
    infra::http::{self, HttpState},
};

/// In-memory engine whose failures are scripted per test.
#[derive(Default)]
pub struct ScriptedEngine {
    pub launches: AtomicUsize,
    pub renders: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub shutdowns: AtomicUsize,
    failing_launches: AtomicUsize,
    failing_renders: AtomicUsize,
    crashing_renders: AtomicUsize,
    wedged_shutdown: AtomicBool,
    render_delay: Mutex<Duration>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launcher(self: &Arc<Self>) -> Arc<dyn EngineLauncher> {
        Arc::new(ScriptedLauncher(Arc::clone(self)))
    }

    pub fn fail_launches(&self, count: usize) {
        self.failing_launches.store(count, Ordering::SeqCst);
    }

    /// The next `count` renders fail while the engine keeps answering probes.
    pub fn fail_renders(&self, count: usize) {
        self.failing_renders.store(count, Ordering::SeqCst);
    }

    /// The next render takes its engine instance down with it.
    pub fn crash_next_render(&self) {
        self.crash_renders(1);
    }

    /// Each of the next `count` renders takes its engine instance down with it.
    pub fn crash_renders(&self, count: usize) {
        self.crashing_renders.store(count, Ordering::SeqCst);
    }

    /// Instance shutdown never completes from now on, like a browser that ignores close.
    pub fn wedge_shutdowns(&self) {
        self.wedged_shutdown.store(true, Ordering::SeqCst);
    }

    pub fn set_render_delay(&self, delay: Duration) {
        *self.render_delay.lock().expect("render delay lock") = delay;
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

struct ScriptedLauncher(Arc<ScriptedEngine>);

#[async_trait]
impl EngineLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Arc<dyn EngineInstance>, EngineError> {
        self.0.launches.fetch_add(1, Ordering::SeqCst);
        if take(&self.0.failing_launches) {
            return Err(EngineError::launch("browser executable not found"));
        }
        Ok(Arc::new(ScriptedInstance {
            engine: Arc::clone(&self.0),
            dead: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct ScriptedInstance {
    engine: Arc<ScriptedEngine>,
    dead: Arc<AtomicBool>,
}

#[async_trait]
impl EngineInstance for ScriptedInstance {
    async fn open_session(
        &self,
        _profile: &SessionProfile,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(EngineError::session("target closed"));
        }
        self.engine.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            engine: Arc::clone(&self.engine),
            dead: Arc::clone(&self.dead),
        }))
    }

    async fn probe(&self) -> Result<String, EngineError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(EngineError::unreachable("connection closed"));
        }
        Ok("ScriptedEngine/1.0".to_string())
    }

    async fn shutdown(&self) {
        self.engine.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.engine.wedged_shutdown.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

struct ScriptedSession {
    engine: Arc<ScriptedEngine>,
    dead: Arc<AtomicBool>,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn render_pdf(&mut self, job: &PrintJob<'_>) -> Result<Vec<u8>, EngineError> {
        let delay = *self.engine.render_delay.lock().expect("render delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.dead.load(Ordering::SeqCst) {
            return Err(EngineError::render("target closed"));
        }
        if take(&self.engine.crashing_renders) {
            self.dead.store(true, Ordering::SeqCst);
            return Err(EngineError::render("renderer process exited"));
        }
        if take(&self.engine.failing_renders) {
            return Err(EngineError::render("printToPDF rejected the document"));
        }
        self.engine.renders.fetch_add(1, Ordering::SeqCst);
        Ok(format!("%PDF-1.7 scripted {}", job.document.len()).into_bytes())
    }

    async fn reset(&mut self) -> Result<(), EngineError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(EngineError::session("target closed"));
        }
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.engine.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Knobs for a test service; defaults keep every wait short.
#[derive(Clone)]
pub struct Harness {
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub render: RenderConfig,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            pool: PoolConfig {
                max_sessions: 2,
                acquire_timeout: Duration::from_millis(500),
                ..PoolConfig::default()
            },
            cache: CacheConfig::default(),
            render: RenderConfig {
                timeout: Duration::from_secs(2),
                settle_delay: Duration::ZERO,
                dedupe_inflight: true,
            },
        }
    }
}

impl Harness {
    pub fn service(&self, engine: &Arc<ScriptedEngine>) -> RenderService {
        let handle = Arc::new(EngineHandle::new(
            engine.launcher(),
            Duration::from_secs(2),
        ));
        let pool = RenderSessionPool::new(handle, self.pool.clone());
        let cache = Arc::new(ResultCache::new(self.cache.clone()));
        RenderService::new(pool, cache, self.render.clone())
    }
}

pub fn router(service: RenderService) -> Router {
    http::build_router(
        HttpState {
            render: service,
            default_title: Arc::from(DEFAULT_TITLE),
            ping_message: Arc::from("ping"),
        },
        1024 * 1024,
    )
}

pub fn json_post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}
