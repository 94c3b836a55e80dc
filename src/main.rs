use std::{process, sync::Arc, time::Duration};

use pressroom::{
    application::{
        error::AppError,
        render::{RenderConfig, RenderService},
    },
    cache::{CacheConfig, ResultCache},
    config,
    engine::{EngineHandle, EngineLauncher, PoolConfig, RenderSessionPool},
    infra::{
        chromium::{ChromiumConfig, ChromiumLauncher},
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
    util::bytes::ByteSize,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const SOURCE: &str = "pressroom::serve";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

fn build_render_service(settings: &config::Settings) -> RenderService {
    let launcher: Arc<dyn EngineLauncher> =
        Arc::new(ChromiumLauncher::new(ChromiumConfig::from(&settings.engine)));
    let engine = Arc::new(EngineHandle::new(launcher, settings.engine.launch_timeout));
    let pool = RenderSessionPool::new(engine, PoolConfig::from(&settings.pool));
    let cache = Arc::new(ResultCache::new(CacheConfig::from(&settings.cache)));
    RenderService::new(pool, cache, RenderConfig::from(&settings.render))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let service = build_render_service(&settings);
    let router = http::build_router(
        HttpState::new(service.clone(), &settings),
        settings.server.body_limit_bytes.get(),
    );

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|source| InfraError::Bind {
            addr: settings.server.addr,
            source,
        })?;

    info!(
        target = SOURCE,
        addr = %settings.server.addr,
        max_sessions = settings.pool.max_sessions.get(),
        cache_enabled = settings.cache.enabled,
        body_limit = %ByteSize(settings.server.body_limit_bytes.get()),
        "Listening"
    );

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let mut server: JoinHandle<std::io::Result<()>> = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = stop_rx.changed().await;
            })
            .await
    });

    let grace = settings.server.graceful_shutdown;
    let served = tokio::select! {
        outcome = &mut server => Some(outcome),
        () = shutdown_signal() => None,
    };

    let result = match served {
        Some(outcome) => flatten_server_outcome(outcome),
        None => {
            info!(target = SOURCE, grace_ms = grace.as_millis() as u64, "Shutting down");
            let _ = stop_tx.send(true);
            match tokio::time::timeout(grace, &mut server).await {
                Ok(outcome) => flatten_server_outcome(outcome),
                Err(_) => {
                    warn!(
                        target = SOURCE,
                        "Connections still open after the grace period, aborting"
                    );
                    server.abort();
                    Ok(())
                }
            }
        }
    };

    service.shutdown(shutdown_drain(grace)).await;
    info!(target = SOURCE, "Stopped");
    result
}

fn flatten_server_outcome(
    outcome: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(InfraError::server(err.to_string()).into()),
        Err(join) => Err(InfraError::server(join.to_string()).into()),
    }
}

// Sessions still leased once the listener has drained get a short window of their own.
fn shutdown_drain(grace: Duration) -> Duration {
    grace.min(Duration::from_secs(5))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = SOURCE, error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(target = SOURCE, error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
