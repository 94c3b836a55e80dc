//! Headless Chromium backend driven over the DevTools protocol.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetEmulatedMediaParams,
};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, EventRequestPaused, FailRequestParams, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{
    EngineError, EngineInstance, EngineLauncher, EngineSession, PrintJob, ResourceClass,
    SessionProfile,
};

const SOURCE: &str = "infra::chromium";

/// Upper bound for each step of taking the browser down before the process is killed.
const EXIT_WAIT: Duration = Duration::from_secs(5);

/// Flags that keep a headless browser lean for one-shot document printing.
const LAUNCH_ARGS: &[&str] = &[
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--no-first-run",
    "--no-zygote",
    "--disable-gpu",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--disable-features=TranslateUI",
    "--disable-ipc-flooding-protection",
    "--disable-extensions",
    "--disable-default-apps",
    "--disable-background-networking",
    "--disable-sync",
    "--metrics-recording-only",
    "--no-default-browser-check",
    "--mute-audio",
];

#[derive(Debug, Clone, Default)]
pub struct ChromiumConfig {
    /// Browser executable; auto-detected when unset.
    pub chrome_path: Option<PathBuf>,
    pub no_sandbox: bool,
    pub extra_args: Vec<String>,
}

impl From<&crate::config::EngineSettings> for ChromiumConfig {
    fn from(settings: &crate::config::EngineSettings) -> Self {
        Self {
            chrome_path: settings.chrome_path.clone(),
            no_sandbox: settings.no_sandbox,
            extra_args: settings.extra_args.clone(),
        }
    }
}

pub struct ChromiumLauncher {
    config: ChromiumConfig,
}

impl ChromiumLauncher {
    pub fn new(config: ChromiumConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn EngineInstance>, EngineError> {
        let profile_dir = tempfile::Builder::new()
            .prefix("pressroom-chromium-")
            .tempdir()
            .map_err(EngineError::launch)?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile_dir.path())
            .args(LAUNCH_ARGS.iter().copied())
            .args(self.config.extra_args.iter().cloned());
        if self.config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &self.config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(EngineError::launch)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(EngineError::launch)?;

        // The CDP connection only makes progress while its handler is polled.
        let driver = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(
                        target = SOURCE,
                        op = "handler",
                        error = %err,
                        "Browser handler reported an error"
                    );
                }
            }
        });

        info!(
            target = SOURCE,
            op = "launch",
            result = "ok",
            profile_dir = %profile_dir.path().display(),
            "Chromium launched"
        );

        Ok(Arc::new(ChromiumInstance {
            browser: RwLock::new(Some(browser)),
            driver,
            _profile_dir: profile_dir,
        }))
    }
}

struct ChromiumInstance {
    browser: RwLock<Option<Browser>>,
    driver: JoinHandle<()>,
    _profile_dir: TempDir,
}

#[async_trait]
impl EngineInstance for ChromiumInstance {
    async fn open_session(
        &self,
        profile: &SessionProfile,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        let page = {
            let guard = self.browser.read().await;
            let browser = guard
                .as_ref()
                .ok_or_else(|| EngineError::session("browser has been shut down"))?;
            browser
                .new_page("about:blank")
                .await
                .map_err(EngineError::session)?
        };

        match configure_page(&page, profile).await {
            Ok(blocker) => Ok(Box::new(ChromiumSession { page, blocker })),
            Err(err) => {
                if let Err(close_err) = page.close().await {
                    debug!(
                        target = SOURCE,
                        op = "open_session",
                        error = %close_err,
                        "Failed to close half-configured page"
                    );
                }
                Err(err)
            }
        }
    }

    async fn probe(&self) -> Result<String, EngineError> {
        let guard = self.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| EngineError::unreachable("browser has been shut down"))?;
        let version = browser.version().await.map_err(EngineError::unreachable)?;
        Ok(version.product)
    }

    async fn shutdown(&self) {
        let Some(mut browser) = self.browser.write().await.take() else {
            return;
        };
        let closed = match tokio::time::timeout(EXIT_WAIT, browser.close()).await {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                warn!(
                    target = SOURCE,
                    op = "shutdown",
                    error = %err,
                    "Browser close command failed"
                );
                false
            }
            Err(_) => {
                warn!(target = SOURCE, op = "shutdown", "Browser close command timed out");
                false
            }
        };
        let exited = closed
            && match tokio::time::timeout(EXIT_WAIT, browser.wait()).await {
                Ok(Ok(_)) => true,
                Ok(Err(err)) => {
                    warn!(
                        target = SOURCE,
                        op = "shutdown",
                        error = %err,
                        "Waiting for browser exit failed"
                    );
                    false
                }
                Err(_) => false,
            };
        if !exited {
            kill_browser(&mut browser).await;
        }
        self.driver.abort();
    }
}

async fn kill_browser(browser: &mut Browser) {
    match tokio::time::timeout(EXIT_WAIT, browser.kill()).await {
        Ok(Some(Err(err))) => warn!(
            target = SOURCE,
            op = "shutdown",
            error = %err,
            "Killing browser process failed"
        ),
        Err(_) => warn!(target = SOURCE, op = "shutdown", "Browser process did not die in time"),
        Ok(_) => debug!(target = SOURCE, op = "shutdown", "Browser process killed"),
    }
}

fn resource_type(class: ResourceClass) -> ResourceType {
    match class {
        ResourceClass::Image => ResourceType::Image,
        ResourceClass::Media => ResourceType::Media,
        ResourceClass::Font => ResourceType::Font,
        ResourceClass::Other => ResourceType::Other,
        ResourceClass::WebSocket => ResourceType::WebSocket,
    }
}

/// Apply the viewport and start failing blocked sub-resource requests.
async fn configure_page(
    page: &Page,
    profile: &SessionProfile,
) -> Result<JoinHandle<()>, EngineError> {
    page.execute(SetDeviceMetricsOverrideParams::new(
        i64::from(profile.viewport_width),
        i64::from(profile.viewport_height),
        1.0,
        false,
    ))
    .await
    .map_err(EngineError::session)?;

    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(EngineError::session)?;
    let interceptor = page.clone();
    let blocker = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let refusal =
                FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient);
            if let Err(err) = interceptor.execute(refusal).await {
                debug!(
                    target = SOURCE,
                    op = "block_request",
                    error = %err,
                    "Failed to refuse intercepted request"
                );
            }
        }
    });

    let patterns = profile
        .blocked
        .iter()
        .map(|class| RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: Some(resource_type(*class)),
            request_stage: None,
        })
        .collect::<Vec<_>>();
    if !patterns.is_empty() {
        let enabled = page
            .execute(fetch::EnableParams {
                patterns: Some(patterns),
                handle_auth_requests: None,
            })
            .await;
        if let Err(err) = enabled {
            blocker.abort();
            return Err(EngineError::session(err));
        }
    }

    Ok(blocker)
}

struct ChromiumSession {
    page: Page,
    blocker: JoinHandle<()>,
}

#[async_trait]
impl EngineSession for ChromiumSession {
    async fn render_pdf(&mut self, job: &PrintJob<'_>) -> Result<Vec<u8>, EngineError> {
        self.page
            .set_content(job.document)
            .await
            .map_err(EngineError::render)?;
        self.page
            .execute(SetEmulatedMediaParams {
                media: Some("screen".to_string()),
                features: None,
            })
            .await
            .map_err(EngineError::render)?;
        if !job.settle_delay.is_zero() {
            tokio::time::sleep(job.settle_delay).await;
        }

        let layout = job.layout;
        let params = PrintToPdfParams {
            landscape: Some(layout.landscape),
            print_background: Some(true),
            scale: Some(layout.scale),
            paper_width: Some(layout.paper_width_in),
            paper_height: Some(layout.paper_height_in),
            margin_top: Some(layout.margin_in),
            margin_bottom: Some(layout.margin_in),
            margin_left: Some(layout.margin_in),
            margin_right: Some(layout.margin_in),
            prefer_css_page_size: Some(true),
            ..Default::default()
        };
        self.page.pdf(params).await.map_err(EngineError::render)
    }

    async fn reset(&mut self) -> Result<(), EngineError> {
        self.page
            .goto("about:blank")
            .await
            .map_err(EngineError::session)?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        let ChromiumSession { page, blocker } = *self;
        blocker.abort();
        if let Err(err) = page.close().await {
            debug!(
                target = SOURCE,
                op = "close_session",
                error = %err,
                "Failed to close page"
            );
        }
    }
}
