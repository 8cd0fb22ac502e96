//! Headless browser scraping of third-party video pages.
//!
//! A scrape renders the page in a throwaway Chromium process, checks that the
//! page came back in its logged-out layout, and pulls the `html5player`
//! setter arguments out of the inline scripts. Rendering and extraction sit
//! behind [`PageRenderer`] and [`LinkExtractor`] so either can be swapped
//! without touching the HTTP layer.

use std::{
    path::PathBuf,
    process::Stdio,
    sync::{Arc, LazyLock},
    time::Duration,
};

use async_trait::async_trait;
use nix::{
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use regex::Regex;
use tokio::{process::Command, sync::Semaphore, time::timeout};
use tracing::{debug, info, warn};

use crate::config::ScrapeSettings;

/// Present in the markup only when the page rendered for a logged-out
/// visitor. Captchas and redirects lack it.
pub const LOGGED_OUT_MARKER: &str = "logged_user = false";

/// Chromium forks zygote and renderer helpers; the browser is started as the
/// leader of its own process group so teardown can reach all of them.
const CHROME_FLAGS: [&str; 5] = [
    "--headless",
    "--disable-gpu",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--mute-audio",
];

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("'logged_user = false' not found in HTML")]
    MarkerMissing,
    #[error("failed to launch browser {}: {source}", binary.display())]
    Launch {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("browser exited with {status}: {stderr}")]
    Browser { status: String, stderr: String },
    #[error("page did not render within {0:?}")]
    Timeout(Duration),
    #[error("scrape pool closed")]
    PoolClosed,
}

/// Pulls candidate video links out of rendered markup.
pub trait LinkExtractor: Send + Sync {
    fn extract_links(&self, markup: &str) -> Vec<String>;
}

/// Matches the `html5player.setVideoUrlLow/High/HLS('...')` call sites.
///
/// All low-quality links come first, then high-quality, then HLS manifests,
/// each group in document order. Duplicates are kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct Html5PlayerExtractor;

static PLAYER_SETTERS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    ["setVideoUrlLow", "setVideoUrlHigh", "setVideoHLS"].map(|setter| {
        Regex::new(&format!(r#"html5player\.{setter}\(['"](.*?)['"]\)"#))
            .expect("static html5player pattern")
    })
});

impl LinkExtractor for Html5PlayerExtractor {
    fn extract_links(&self, markup: &str) -> Vec<String> {
        PLAYER_SETTERS
            .iter()
            .flat_map(|pattern| pattern.captures_iter(markup))
            .filter_map(|caps| caps.get(1))
            .map(|link| link.as_str().to_owned())
            .collect()
    }
}

/// Produces the fully rendered DOM of a page.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, ScrapeError>;
}

/// SIGKILLs a whole process group when dropped.
struct ProcessGroupGuard(Pid);

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        // ESRCH just means every member already exited.
        let _ = killpg(self.0, Signal::SIGKILL);
    }
}

/// Runs one headless Chromium process per render and reads the DOM it dumps.
///
/// The browser and every helper it forked are killed when the call returns
/// or the render future is dropped, then its profile directory is removed.
#[derive(Debug, Clone)]
pub struct ChromeRenderer {
    binary: PathBuf,
    settle: Duration,
}

impl ChromeRenderer {
    pub fn new(binary: impl Into<PathBuf>, settle: Duration) -> Self {
        Self {
            binary: binary.into(),
            settle,
        }
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &str) -> Result<String, ScrapeError> {
        let launch_error = |source| ScrapeError::Launch {
            binary: self.binary.clone(),
            source,
        };
        let profile = tempfile::Builder::new()
            .prefix("videodex-chrome-")
            .tempdir()
            .map_err(launch_error)?;

        // Virtual time lets timers and deferred scripts run for the settle
        // budget before --dump-dom serializes the document.
        let child = Command::new(&self.binary)
            .args(CHROME_FLAGS)
            .arg(format!("--user-data-dir={}", profile.path().display()))
            .arg(format!("--virtual-time-budget={}", self.settle.as_millis()))
            .arg("--dump-dom")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_error)?;
        // Declared after `profile` so the group dies before the directory is removed.
        let _group = child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .map(|pid| ProcessGroupGuard(Pid::from_raw(pid)));
        debug!(binary = %self.binary.display(), url, "browser launched");

        let output = child.wait_with_output().await.map_err(launch_error)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .next_back()
                .unwrap_or("no output")
                .to_string();
            return Err(ScrapeError::Browser {
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Bounded front door for scrapes: at most `max_concurrent` renders run at
/// once, the rest wait for a permit.
pub struct ScrapeService {
    renderer: Arc<dyn PageRenderer>,
    extractor: Arc<dyn LinkExtractor>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl ScrapeService {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        extractor: Arc<dyn LinkExtractor>,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            extractor,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    pub fn from_settings(settings: &ScrapeSettings) -> Self {
        Self::new(
            Arc::new(ChromeRenderer::new(
                settings.browser_bin.clone(),
                settings.settle,
            )),
            Arc::new(Html5PlayerExtractor),
            settings.max_concurrent,
            settings.timeout,
        )
    }

    pub async fn scrape(&self, page_url: &str) -> Result<Vec<String>, ScrapeError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ScrapeError::PoolClosed)?;

        info!(page_url, "rendering page");
        let markup = timeout(self.timeout, self.renderer.render(page_url))
            .await
            .map_err(|_| ScrapeError::Timeout(self.timeout))??;

        if !markup.contains(LOGGED_OUT_MARKER) {
            warn!(page_url, "logged-out marker missing from rendered page");
            return Err(ScrapeError::MarkerMissing);
        }

        let links = self.extractor.extract_links(&markup);
        info!(page_url, links = links.len(), "scrape finished");
        Ok(links)
    }
}
