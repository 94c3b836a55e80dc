//! Scripted in-memory engine for unit tests.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    EngineError, EngineInstance, EngineLauncher, EngineSession, PrintJob, SessionProfile,
};

#[derive(Default)]
pub(crate) struct FakeEngine {
    pub launches: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub resets: AtomicUsize,
    pub renders: AtomicUsize,
    failing_launches: AtomicUsize,
    failing_opens: AtomicUsize,
    failing_resets: AtomicUsize,
    wedged_shutdown: AtomicBool,
    launch_delay: Mutex<Duration>,
    render_delay: Mutex<Duration>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launcher(self: &Arc<Self>) -> Arc<dyn EngineLauncher> {
        Arc::new(FakeLauncher(Arc::clone(self)))
    }

    pub fn fail_launches(&self, count: usize) {
        self.failing_launches.store(count, Ordering::SeqCst);
    }

    pub fn fail_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn fail_resets(&self, count: usize) {
        self.failing_resets.store(count, Ordering::SeqCst);
    }

    /// Instance shutdown never completes from now on.
    pub fn wedge_shutdowns(&self) {
        self.wedged_shutdown.store(true, Ordering::SeqCst);
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        *self.launch_delay.lock().expect("launch delay lock") = delay;
    }

    pub fn set_render_delay(&self, delay: Duration) {
        *self.render_delay.lock().expect("render delay lock") = delay;
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

struct FakeLauncher(Arc<FakeEngine>);

#[async_trait]
impl EngineLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Arc<dyn EngineInstance>, EngineError> {
        let delay = *self.0.launch_delay.lock().expect("launch delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.0.launches.fetch_add(1, Ordering::SeqCst);
        if take(&self.0.failing_launches) {
            return Err(EngineError::launch("scripted launch failure"));
        }
        Ok(Arc::new(FakeInstance(Arc::clone(&self.0))))
    }
}

struct FakeInstance(Arc<FakeEngine>);

#[async_trait]
impl EngineInstance for FakeInstance {
    async fn open_session(
        &self,
        _profile: &SessionProfile,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        if take(&self.0.failing_opens) {
            return Err(EngineError::session("scripted target crash"));
        }
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession(Arc::clone(&self.0))))
    }

    async fn probe(&self) -> Result<String, EngineError> {
        Ok("FakeEngine/1.0".to_string())
    }

    async fn shutdown(&self) {
        self.0.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.0.wedged_shutdown.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

struct FakeSession(Arc<FakeEngine>);

#[async_trait]
impl EngineSession for FakeSession {
    async fn render_pdf(&mut self, job: &PrintJob<'_>) -> Result<Vec<u8>, EngineError> {
        let delay = *self.0.render_delay.lock().expect("render delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.0.renders.fetch_add(1, Ordering::SeqCst);
        Ok(format!("%PDF-fake {}", job.document.len()).into_bytes())
    }

    async fn reset(&mut self) -> Result<(), EngineError> {
        self.0.resets.fetch_add(1, Ordering::SeqCst);
        if take(&self.0.failing_resets) {
            return Err(EngineError::session("scripted reset failure"));
        }
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.0.closed.fetch_add(1, Ordering::SeqCst);
    }
}
