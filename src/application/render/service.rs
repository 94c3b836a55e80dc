//! Request orchestration: cache lookup, assembly, session lease, print, cache fill.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheKey, PDF_CONTENT_TYPE, ResultCache, compute_key};
use crate::domain::{PrintLayout, RenderRequest};
use crate::engine::{EngineError, PrintJob, RenderSessionPool, SessionDisposition};

use super::css::normalize_css;
use super::document::{CompleteDocument, DocumentAssembler, DocumentOptions};
use super::inflight::{InFlightRenders, spawn_shared};
use super::types::{RenderConfig, RenderError, RenderResponse, RenderedPdf, attachment_filename};

const SOURCE: &str = "application::render::service";

const METRIC_RENDER_MS: &str = "pressroom_render_ms";
const METRIC_RENDER_FAILED: &str = "pressroom_render_failed_total";
const METRIC_RENDER_DEDUPED: &str = "pressroom_render_deduped_total";

/// Entry point for every render. Cheap to clone; clones share pool, cache and in-flight state.
#[derive(Clone)]
pub struct RenderService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    pool: RenderSessionPool,
    cache: Arc<ResultCache>,
    assembler: DocumentAssembler,
    inflight: InFlightRenders,
    config: RenderConfig,
}

enum Attempt {
    Printed(Vec<u8>),
    EngineFailed { generation: u64, error: EngineError },
}

impl RenderService {
    pub fn new(pool: RenderSessionPool, cache: Arc<ResultCache>, config: RenderConfig) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                pool,
                cache,
                assembler: DocumentAssembler::new(),
                inflight: InFlightRenders::new(),
                config,
            }),
        }
    }

    pub fn pool(&self) -> &RenderSessionPool {
        &self.inner.pool
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    pub fn config(&self) -> &RenderConfig {
        &self.inner.config
    }

    pub async fn render(&self, request: RenderRequest) -> Result<RenderResponse, RenderError> {
        request.validate()?;

        if request.css_only {
            return Ok(RenderResponse::Css(normalize_css(&request.css_text)));
        }

        let key = compute_key(&request);
        let filename = attachment_filename(&request.title, OffsetDateTime::now_utc());

        if let Some(entry) = self.inner.cache.get(&key) {
            info!(
                target = SOURCE,
                op = "render",
                result = "cache_hit",
                cache_key = %key,
                bytes = entry.size_bytes(),
                stored_filename = %entry.suggested_filename,
                "Serving cached PDF"
            );
            return Ok(RenderResponse::Pdf(RenderedPdf {
                payload: entry.payload,
                content_type: entry.content_type,
                filename,
                from_cache: true,
            }));
        }

        let payload = if self.inner.config.dedupe_inflight {
            let inner = Arc::clone(&self.inner);
            let job_key = key.clone();
            let job_filename = filename.clone();
            let flight = self.inner.inflight.join_or_start(key.clone(), move || async move {
                inner.render_and_store(job_key, request, job_filename).await
            });
            if !flight.leader {
                counter!(METRIC_RENDER_DEDUPED).increment(1);
                debug!(
                    target = SOURCE,
                    op = "render",
                    result = "joined",
                    cache_key = %key,
                    "Joined render already in flight"
                );
            }
            flight.render.await?
        } else {
            let inner = Arc::clone(&self.inner);
            let job_key = key.clone();
            let job_filename = filename.clone();
            spawn_shared(
                async move { inner.render_and_store(job_key, request, job_filename).await },
                (),
            )
            .await?
        };

        Ok(RenderResponse::Pdf(RenderedPdf {
            payload,
            content_type: PDF_CONTENT_TYPE,
            filename,
            from_cache: false,
        }))
    }

    /// Bring the engine up if needed and confirm it answers.
    pub async fn health(&self) -> Result<String, EngineError> {
        self.inner.pool.engine().probe().await
    }

    /// Drain leased sessions for up to `grace`, then stop the engine.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.pool.close(grace).await;
    }
}

impl ServiceInner {
    async fn render_and_store(
        &self,
        key: CacheKey,
        request: RenderRequest,
        filename: String,
    ) -> Result<Bytes, RenderError> {
        let started = Instant::now();
        let document = self.assembler.build(
            &request.html_body,
            &request.css_text,
            &DocumentOptions {
                title: &request.title,
                format: request.layout.format,
            },
        );
        let layout = request.layout.print_layout();

        let outcome = self.print_with_recovery(&document, layout).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let pdf = match outcome {
            Ok(pdf) => pdf,
            Err(err) => {
                counter!(METRIC_RENDER_FAILED).increment(1);
                warn!(
                    target = SOURCE,
                    op = "render",
                    result = "error",
                    cache_key = %key,
                    elapsed_ms,
                    error = %err,
                    "PDF render failed"
                );
                return Err(err);
            }
        };

        histogram!(METRIC_RENDER_MS).record(elapsed_ms);
        let payload = Bytes::from(pdf);
        self.cache
            .put(CacheEntry::pdf(key.clone(), payload.clone(), filename));
        info!(
            target = SOURCE,
            op = "render",
            result = "ok",
            cache_key = %key,
            document_bytes = document.len(),
            bytes = payload.len(),
            elapsed_ms,
            "Rendered PDF"
        );
        Ok(payload)
    }

    // A render error on an engine that no longer answers counts as a crash: restart it and try
    // once more. An engine that still answers produced a genuine render failure.
    async fn print_with_recovery(
        &self,
        document: &CompleteDocument,
        layout: PrintLayout,
    ) -> Result<Vec<u8>, RenderError> {
        let (generation, error) = match self.print_once(document, layout).await? {
            Attempt::Printed(pdf) => return Ok(pdf),
            Attempt::EngineFailed { generation, error } => (generation, error),
        };

        let engine = self.pool.engine();
        if engine.is_live(generation) {
            match engine.probe().await {
                Ok(_) => return Err(RenderError::Engine(error)),
                Err(probe_err) => {
                    warn!(
                        target = SOURCE,
                        op = "render",
                        result = "engine_unresponsive",
                        generation,
                        error = %probe_err,
                        "Engine stopped answering after render failure"
                    );
                    engine
                        .restart(generation)
                        .await
                        .map_err(RenderError::EngineInit)?;
                }
            }
        }

        match self.print_once(document, layout).await? {
            Attempt::Printed(pdf) => Ok(pdf),
            Attempt::EngineFailed { error: retry, .. } => {
                debug!(
                    target = SOURCE,
                    op = "render",
                    first_error = %error,
                    "Retry after engine restart failed"
                );
                Err(RenderError::EngineCrash(retry))
            }
        }
    }

    async fn print_once(
        &self,
        document: &CompleteDocument,
        layout: PrintLayout,
    ) -> Result<Attempt, RenderError> {
        let mut session = self.pool.acquire().await?;
        let generation = session.generation();
        let job = PrintJob {
            document: document.as_str(),
            layout,
            settle_delay: self.config.settle_delay,
        };

        let outcome = tokio::time::timeout(self.config.timeout, session.render(&job)).await;
        let disposition = match &outcome {
            Ok(Ok(_)) => SessionDisposition::Reuse,
            _ => SessionDisposition::Discard,
        };
        self.pool.release(session, disposition).await;

        match outcome {
            Ok(Ok(pdf)) => Ok(Attempt::Printed(pdf)),
            Ok(Err(error)) => Ok(Attempt::EngineFailed { generation, error }),
            Err(_) => Err(RenderError::Timeout {
                limit: self.config.timeout,
            }),
        }
    }
}
