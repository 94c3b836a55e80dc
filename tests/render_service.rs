mod common;

use std::time::Duration;

use common::{Harness, ScriptedEngine};
use pressroom::application::render::{RenderError, RenderResponse, RenderedPdf};
use pressroom::domain::{LayoutOptions, Orientation, PageFormat, Quality, RenderRequest};
use pressroom::engine::RenderSessionPool;

fn expect_pdf(response: RenderResponse) -> RenderedPdf {
    match response {
        RenderResponse::Pdf(pdf) => pdf,
        RenderResponse::Css(css) => panic!("expected a PDF, got css {css:?}"),
    }
}

fn assert_no_leases(pool: &RenderSessionPool) {
    let stats = pool.stats();
    assert_eq!(stats.leased, 0, "sessions still leased: {stats:?}");
    assert_eq!(stats.acquired, stats.released);
}

#[tokio::test]
async fn repeated_request_is_served_from_cache() {
    let engine = ScriptedEngine::new();
    let service = Harness::default().service(&engine);
    let request = RenderRequest::new("<h1>Q1</h1>", "h1 { color: red; }");

    let first = expect_pdf(service.render(request.clone()).await.expect("first render"));
    let second = expect_pdf(service.render(request).await.expect("second render"));

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.payload, second.payload);
    assert_eq!(second.content_type, "application/pdf");
    assert!(first.payload.starts_with(b"%PDF"));
    assert_eq!(engine.renders(), 1);
    assert_eq!(service.cache().len(), 1);
    assert_no_leases(service.pool());
}

#[tokio::test]
async fn title_change_still_hits_cache_with_fresh_filename() {
    let engine = ScriptedEngine::new();
    let service = Harness::default().service(&engine);

    let first = expect_pdf(
        service
            .render(RenderRequest::new("<p>x</p>", "").with_title("Weekly report"))
            .await
            .expect("first render"),
    );
    let second = expect_pdf(
        service
            .render(RenderRequest::new("<p>x</p>", "").with_title("Monthly report"))
            .await
            .expect("second render"),
    );

    assert!(second.from_cache);
    assert!(first.filename.starts_with("Weekly_report_"));
    assert!(second.filename.starts_with("Monthly_report_"));
    assert_eq!(engine.renders(), 1);
}

#[tokio::test]
async fn layout_changes_render_again() {
    let engine = ScriptedEngine::new();
    let service = Harness::default().service(&engine);
    let base = RenderRequest::new("<p>x</p>", "");
    let landscape = base.clone().with_layout(LayoutOptions::new(
        PageFormat::Letter,
        Orientation::Landscape,
        true,
        Quality::Low,
    ));

    service.render(base).await.expect("portrait");
    service.render(landscape).await.expect("landscape");

    assert_eq!(engine.renders(), 2);
    assert_eq!(service.cache().len(), 2);
}

#[tokio::test]
async fn css_only_never_touches_engine() {
    let engine = ScriptedEngine::new();
    let service = Harness::default().service(&engine);

    let response = service
        .render(RenderRequest::new("<p>x</p>", "/* c */ a{color:red;}  ").with_css_only(true))
        .await
        .expect("css only");

    match response {
        RenderResponse::Css(css) => assert_eq!(css, "a{color:red}"),
        RenderResponse::Pdf(_) => panic!("css only must not print"),
    }
    assert_eq!(engine.launches(), 0);
    assert_eq!(service.pool().stats().acquired, 0);
}

#[tokio::test]
async fn empty_html_is_rejected_before_engine_use() {
    let engine = ScriptedEngine::new();
    let service = Harness::default().service(&engine);

    let err = service
        .render(RenderRequest::new("", "a{}").with_css_only(true))
        .await
        .expect_err("validation error");

    assert!(matches!(err, RenderError::Validation(_)));
    assert_eq!(err.to_string(), "HTML content is required");
    assert_eq!(engine.launches(), 0);
}

#[tokio::test]
async fn timeout_releases_session_and_skips_cache() {
    let engine = ScriptedEngine::new();
    engine.set_render_delay(Duration::from_millis(300));
    let harness = Harness {
        render: pressroom::application::render::RenderConfig {
            timeout: Duration::from_millis(50),
            ..Harness::default().render
        },
        ..Harness::default()
    };
    let service = harness.service(&engine);

    let err = service
        .render(RenderRequest::new("<p>slow</p>", ""))
        .await
        .expect_err("render should time out");

    assert!(matches!(err, RenderError::Timeout { .. }));
    assert!(service.cache().is_empty());
    assert_no_leases(service.pool());

    let session = service.pool().acquire().await.expect("pool still usable");
    service
        .pool()
        .release(session, pressroom::engine::SessionDisposition::Discard)
        .await;
}

#[tokio::test]
async fn engine_crash_restarts_and_retries_once() {
    let engine = ScriptedEngine::new();
    let service = Harness::default().service(&engine);
    engine.crash_next_render();

    let pdf = expect_pdf(
        service
            .render(RenderRequest::new("<p>crash</p>", ""))
            .await
            .expect("retry after restart succeeds"),
    );

    assert!(!pdf.from_cache);
    assert_eq!(engine.launches(), 2);
    assert_eq!(engine.renders(), 1);
    assert_no_leases(service.pool());
}

#[tokio::test]
async fn render_failure_on_live_engine_is_surfaced_without_restart() {
    let engine = ScriptedEngine::new();
    let service = Harness::default().service(&engine);
    engine.fail_renders(1);

    let err = service
        .render(RenderRequest::new("<p>bad</p>", ""))
        .await
        .expect_err("render failure");

    assert!(matches!(err, RenderError::Engine(_)));
    assert_eq!(engine.launches(), 1);
    assert!(service.cache().is_empty());
    assert_no_leases(service.pool());

    service
        .render(RenderRequest::new("<p>bad</p>", ""))
        .await
        .expect("next attempt renders");
}

#[tokio::test]
async fn single_launch_failure_is_absorbed_by_retry() {
    let engine = ScriptedEngine::new();
    engine.fail_launches(1);
    let service = Harness::default().service(&engine);

    let pdf = expect_pdf(
        service
            .render(RenderRequest::new("<p>x</p>", ""))
            .await
            .expect("second launch succeeds"),
    );

    assert!(!pdf.from_cache);
    assert_eq!(engine.launches(), 2);
    assert_no_leases(service.pool());
}

#[tokio::test]
async fn repeated_launch_failure_surfaces_then_next_request_retries() {
    let engine = ScriptedEngine::new();
    engine.fail_launches(2);
    let service = Harness::default().service(&engine);

    let err = service
        .render(RenderRequest::new("<p>x</p>", ""))
        .await
        .expect_err("launch failure");
    assert!(matches!(err, RenderError::EngineInit(_)));
    assert_eq!(engine.launches(), 2);

    service
        .render(RenderRequest::new("<p>x</p>", ""))
        .await
        .expect("third launch succeeds");
    assert_eq!(engine.launches(), 3);
}

#[tokio::test]
async fn crash_after_restart_is_surfaced() {
    let engine = ScriptedEngine::new();
    engine.crash_renders(2);
    let service = Harness::default().service(&engine);

    let err = service
        .render(RenderRequest::new("<p>crash</p>", ""))
        .await
        .expect_err("both attempts crash");

    assert!(matches!(err, RenderError::EngineCrash(_)));
    assert_eq!(engine.launches(), 2);
    assert_eq!(engine.renders(), 0);
    assert!(service.cache().is_empty());
    assert_no_leases(service.pool());
}

#[tokio::test(start_paused = true)]
async fn wedged_engine_shutdown_does_not_hang_requests() {
    let engine = ScriptedEngine::new();
    let service = Harness::default().service(&engine);
    service
        .render(RenderRequest::new("<p>warm</p>", ""))
        .await
        .expect("warm up");
    engine.wedge_shutdowns();
    engine.crash_renders(2);
    let request = RenderRequest::new("<p>stuck</p>", "");

    let err = tokio::time::timeout(Duration::from_secs(30), service.render(request.clone()))
        .await
        .expect("first request answers")
        .expect_err("both attempts crash");
    assert!(matches!(err, RenderError::EngineCrash(_)));

    let pdf = expect_pdf(
        tokio::time::timeout(Duration::from_secs(30), service.render(request))
            .await
            .expect("same key answers too")
            .expect("fresh engine renders"),
    );
    assert!(!pdf.from_cache);
    assert_eq!(engine.launches(), 3);
    assert_eq!(engine.shutdowns.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_no_leases(service.pool());
}

#[tokio::test]
async fn concurrent_identical_misses_render_once() {
    let engine = ScriptedEngine::new();
    engine.set_render_delay(Duration::from_millis(100));
    let service = Harness::default().service(&engine);
    let request = RenderRequest::new("<p>same</p>", "p{}");

    let (a, b, c) = tokio::join!(
        service.render(request.clone()),
        service.render(request.clone()),
        service.render(request),
    );

    let payloads: Vec<_> = [a, b, c]
        .into_iter()
        .map(|outcome| expect_pdf(outcome.expect("render")).payload)
        .collect();
    assert!(payloads.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(engine.renders(), 1);
}

#[tokio::test]
async fn without_dedupe_concurrent_misses_each_render() {
    let engine = ScriptedEngine::new();
    engine.set_render_delay(Duration::from_millis(100));
    let mut harness = Harness::default();
    harness.render.dedupe_inflight = false;
    let service = harness.service(&engine);
    let request = RenderRequest::new("<p>same</p>", "");

    let (a, b) = tokio::join!(service.render(request.clone()), service.render(request));
    a.expect("first");
    b.expect("second");

    assert_eq!(engine.renders(), 2);
    assert_eq!(service.cache().len(), 1);
}

#[tokio::test]
async fn saturated_pool_reports_exhaustion() {
    let engine = ScriptedEngine::new();
    engine.set_render_delay(Duration::from_millis(300));
    let mut harness = Harness::default();
    harness.pool.max_sessions = 1;
    harness.pool.acquire_timeout = Duration::from_millis(20);
    let service = harness.service(&engine);

    let (a, b) = tokio::join!(
        service.render(RenderRequest::new("<p>one</p>", "")),
        service.render(RenderRequest::new("<p>two</p>", "")),
    );

    let exhausted = [&a, &b]
        .iter()
        .filter(|outcome| matches!(outcome, Err(RenderError::PoolExhausted { .. })))
        .count();
    assert_eq!(exhausted, 1);
    assert!(a.is_ok() || b.is_ok());
    assert_no_leases(service.pool());
}

#[tokio::test]
async fn disabled_cache_renders_every_time() {
    let engine = ScriptedEngine::new();
    let mut harness = Harness::default();
    harness.cache.enabled = false;
    let service = harness.service(&engine);
    let request = RenderRequest::new("<p>x</p>", "");

    service.render(request.clone()).await.expect("first");
    let second = expect_pdf(service.render(request).await.expect("second"));

    assert!(!second.from_cache);
    assert_eq!(engine.renders(), 2);
}

#[tokio::test]
async fn health_brings_engine_up() {
    let engine = ScriptedEngine::new();
    let service = Harness::default().service(&engine);

    let version = service.health().await.expect("healthy");

    assert_eq!(version, "ScriptedEngine/1.0");
    assert_eq!(engine.launches(), 1);
}

#[tokio::test]
async fn shutdown_stops_engine_and_refuses_new_work() {
    let engine = ScriptedEngine::new();
    let service = Harness::default().service(&engine);
    service
        .render(RenderRequest::new("<p>x</p>", ""))
        .await
        .expect("render before shutdown");

    service.shutdown(Duration::from_millis(100)).await;

    assert_eq!(engine.shutdowns.load(std::sync::atomic::Ordering::SeqCst), 1);
    let err = service
        .render(RenderRequest::new("<p>other</p>", ""))
        .await
        .expect_err("closed");
    assert!(matches!(err, RenderError::ShuttingDown));
}
