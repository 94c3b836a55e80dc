use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};

use crate::cache::CacheKey;

use super::types::RenderError;

pub type SharedRender = Shared<BoxFuture<'static, Result<Bytes, RenderError>>>;

/// Renders currently running, keyed by the cache key they will populate.
///
/// Each render runs as its own task; waiters only hold a shared handle to the outcome, so a
/// caller that goes away cannot abandon a leased session.
#[derive(Default, Clone)]
pub struct InFlightRenders {
    renders: Arc<DashMap<CacheKey, SharedRender>>,
}

/// A handle on a running render.
pub struct InFlight {
    pub render: SharedRender,
    /// True for the caller that started the render.
    pub leader: bool,
}

impl InFlightRenders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the render running for `key`, or start `work` as a new task if there is none.
    pub fn join_or_start<F, Fut>(&self, key: CacheKey, work: F) -> InFlight
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, RenderError>> + Send + 'static,
    {
        use dashmap::mapref::entry::Entry;

        match self.renders.entry(key.clone()) {
            Entry::Occupied(occupied) => InFlight {
                render: occupied.get().clone(),
                leader: false,
            },
            Entry::Vacant(vacant) => {
                let guard = InFlightGuard {
                    key,
                    renders: Arc::clone(&self.renders),
                };
                let render = spawn_shared(work(), guard);
                vacant.insert(render.clone());
                InFlight {
                    render,
                    leader: true,
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.renders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renders.is_empty()
    }
}

/// Run `work` on its own task and expose its outcome as a cloneable future. The guard is dropped
/// when the task finishes.
pub fn spawn_shared<Fut>(work: Fut, guard: impl Send + 'static) -> SharedRender
where
    Fut: Future<Output = Result<Bytes, RenderError>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let outcome = work.await;
        drop(guard);
        outcome
    });
    async move {
        match task.await {
            Ok(outcome) => outcome,
            Err(join) => Err(RenderError::Aborted(join.to_string())),
        }
    }
    .boxed()
    .shared()
}

struct InFlightGuard {
    key: CacheKey,
    renders: Arc<DashMap<CacheKey, SharedRender>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.renders.remove(&self.key);
    }
}
