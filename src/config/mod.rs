//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::DEFAULT_TITLE;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pressroom";
const ENV_PREFIX: &str = "PRESSROOM";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_BODY_LIMIT_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_PING_MESSAGE: &str = "ping";
const DEFAULT_LAUNCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_SESSIONS: u64 = 4;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_SESSION_USES: u64 = 32;
const DEFAULT_VIEWPORT_WIDTH: u64 = 1000;
const DEFAULT_VIEWPORT_HEIGHT: u64 = 700;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 20;
const DEFAULT_CACHE_MAX_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_CACHE_TTL_MS: u64 = 3_000;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SETTLE_DELAY_MS: u64 = 500;

/// Command-line arguments for the pressroom binary.
#[derive(Debug, Parser)]
#[command(name = "pressroom", version, about = "HTML/CSS to PDF rendering service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRESSROOM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP rendering service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the maximum accepted request body size.
    #[arg(long = "server-body-limit-bytes", value_name = "BYTES")]
    pub server_body_limit_bytes: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the browser executable.
    #[arg(long = "engine-chrome-path", value_name = "PATH")]
    pub engine_chrome_path: Option<PathBuf>,

    /// Override the concurrency ceiling on leased render sessions.
    #[arg(long = "pool-max-sessions", value_name = "COUNT")]
    pub pool_max_sessions: Option<u64>,

    /// Override how long a request waits for a free render session.
    #[arg(long = "pool-acquire-timeout-ms", value_name = "MILLIS")]
    pub pool_acquire_timeout_ms: Option<u64>,

    /// Toggle the result cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the result cache entry lifetime.
    #[arg(long = "cache-ttl-ms", value_name = "MILLIS")]
    pub cache_ttl_ms: Option<u64>,

    /// Override the per-render deadline.
    #[arg(long = "render-timeout-seconds", value_name = "SECONDS")]
    pub render_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub engine: EngineSettings,
    pub pool: PoolSettings,
    pub cache: CacheSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub body_limit_bytes: NonZeroUsize,
    pub ping_message: String,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub chrome_path: Option<PathBuf>,
    pub launch_timeout: Duration,
    pub no_sandbox: bool,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_sessions: NonZeroUsize,
    pub acquire_timeout: Duration,
    pub max_session_uses: NonZeroU32,
    pub viewport_width: NonZeroU32,
    pub viewport_height: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_entries: NonZeroUsize,
    pub max_bytes: NonZeroUsize,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub timeout: Duration,
    pub settle_delay: Duration,
    pub dedupe_inflight: bool,
    pub default_title: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("engine.extra_args"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    engine: RawEngineSettings,
    pool: RawPoolSettings,
    cache: RawCacheSettings,
    render: RawRenderSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(bytes) = overrides.server_body_limit_bytes {
            self.server.body_limit_bytes = Some(bytes);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.engine_chrome_path.as_ref() {
            self.engine.chrome_path = Some(path.clone());
        }
        if let Some(max) = overrides.pool_max_sessions {
            self.pool.max_sessions = Some(max);
        }
        if let Some(millis) = overrides.pool_acquire_timeout_ms {
            self.pool.acquire_timeout_ms = Some(millis);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(millis) = overrides.cache_ttl_ms {
            self.cache.ttl_ms = Some(millis);
        }
        if let Some(seconds) = overrides.render_timeout_seconds {
            self.render.timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            engine,
            pool,
            cache,
            render,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            engine: build_engine_settings(engine)?,
            pool: build_pool_settings(pool)?,
            cache: build_cache_settings(cache)?,
            render: build_render_settings(render)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = positive_duration(
        graceful_secs,
        Duration::from_secs,
        "server.graceful_shutdown_seconds",
    )?;

    let body_limit_bytes = non_zero_usize(
        server.body_limit_bytes.unwrap_or(DEFAULT_BODY_LIMIT_BYTES),
        "server.body_limit_bytes",
    )?;

    let ping_message = server
        .ping_message
        .unwrap_or_else(|| DEFAULT_PING_MESSAGE.to_string());

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
        body_limit_bytes,
        ping_message,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_engine_settings(engine: RawEngineSettings) -> Result<EngineSettings, LoadError> {
    let chrome_path = engine
        .chrome_path
        .filter(|path| !path.as_os_str().is_empty());

    let launch_timeout = positive_duration(
        engine
            .launch_timeout_seconds
            .unwrap_or(DEFAULT_LAUNCH_TIMEOUT_SECS),
        Duration::from_secs,
        "engine.launch_timeout_seconds",
    )?;

    let extra_args = engine
        .extra_args
        .unwrap_or_default()
        .into_iter()
        .map(|arg| arg.trim().to_string())
        .filter(|arg| !arg.is_empty())
        .collect();

    Ok(EngineSettings {
        chrome_path,
        launch_timeout,
        no_sandbox: engine.no_sandbox.unwrap_or(true),
        extra_args,
    })
}

fn build_pool_settings(pool: RawPoolSettings) -> Result<PoolSettings, LoadError> {
    Ok(PoolSettings {
        max_sessions: non_zero_usize(
            pool.max_sessions.unwrap_or(DEFAULT_MAX_SESSIONS),
            "pool.max_sessions",
        )?,
        acquire_timeout: positive_duration(
            pool.acquire_timeout_ms
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_MS),
            Duration::from_millis,
            "pool.acquire_timeout_ms",
        )?,
        max_session_uses: non_zero_u32(
            pool.max_session_uses.unwrap_or(DEFAULT_MAX_SESSION_USES),
            "pool.max_session_uses",
        )?,
        viewport_width: non_zero_u32(
            pool.viewport_width.unwrap_or(DEFAULT_VIEWPORT_WIDTH),
            "pool.viewport_width",
        )?,
        viewport_height: non_zero_u32(
            pool.viewport_height.unwrap_or(DEFAULT_VIEWPORT_HEIGHT),
            "pool.viewport_height",
        )?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        max_entries: non_zero_usize(
            cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
            "cache.max_entries",
        )?,
        max_bytes: non_zero_usize(
            cache.max_bytes.unwrap_or(DEFAULT_CACHE_MAX_BYTES),
            "cache.max_bytes",
        )?,
        ttl: positive_duration(
            cache.ttl_ms.unwrap_or(DEFAULT_CACHE_TTL_MS),
            Duration::from_millis,
            "cache.ttl_ms",
        )?,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let timeout = positive_duration(
        render.timeout_seconds.unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS),
        Duration::from_secs,
        "render.timeout_seconds",
    )?;

    let default_title = render
        .default_title
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    Ok(RenderSettings {
        timeout,
        settle_delay: Duration::from_millis(
            render.settle_delay_ms.unwrap_or(DEFAULT_SETTLE_DELAY_MS),
        ),
        dedupe_inflight: render.dedupe_inflight.unwrap_or(true),
        default_title,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    body_limit_bytes: Option<u64>,
    ping_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    chrome_path: Option<PathBuf>,
    launch_timeout_seconds: Option<u64>,
    no_sandbox: Option<bool>,
    extra_args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPoolSettings {
    max_sessions: Option<u64>,
    acquire_timeout_ms: Option<u64>,
    max_session_uses: Option<u64>,
    viewport_width: Option<u64>,
    viewport_height: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    max_entries: Option<u64>,
    max_bytes: Option<u64>,
    ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    timeout_seconds: Option<u64>,
    settle_delay_ms: Option<u64>,
    dedupe_inflight: Option<bool>,
    default_title: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize)
        .ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_duration(
    value: u64,
    unit: fn(u64) -> Duration,
    key: &'static str,
) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(unit(value))
}
