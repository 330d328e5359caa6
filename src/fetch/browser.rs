//! Headless browser lifecycle and stealth injection shared by
//! `headless_tier` and `smart_tier` (§4.2.3/§4.2.4).
//!
//! Trimmed down to what those two tiers actually call: find-or-download
//! Chrome, launch it with the stealth flag set, and inject a self-contained
//! evasion script (no external asset files — everything is inline, unlike
//! the teacher's file-backed evasion loader, which pulled dozens of `.js`
//! scripts off disk for a style of per-script bookkeeping this crate has no
//! use for). The user agent comes from `fingerprints::random_fingerprint`
//! rather than one fixed string, so a launched browser matches whatever
//! fingerprint the rest of §4.2 is presenting for that fetch.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::{self, JoinHandle};

use super::fingerprints::random_fingerprint;
use crate::errors::{ScrapeError, ScrapeResult};

fn downstream(e: impl ToString) -> ScrapeError {
    ScrapeError::DownstreamUnavailable(e.to_string())
}

async fn find_browser_executable() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &["/Applications/Google Chrome.app/Contents/MacOS/Google Chrome", "/Applications/Chromium.app/Contents/MacOS/Chromium"]
    } else if cfg!(target_os = "windows") {
        &[r"C:\Program Files\Google\Chrome\Application\chrome.exe", r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"]
    } else {
        &["/usr/bin/google-chrome", "/usr/bin/google-chrome-stable", "/usr/bin/chromium", "/usr/bin/chromium-browser"]
    };

    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in ["chromium", "chromium-browser", "google-chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output()
                && output.status.success()
            {
                let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !found.is_empty() {
                    return Some(PathBuf::from(found));
                }
            }
        }
    }

    None
}

async fn download_managed_browser() -> ScrapeResult<PathBuf> {
    let cache_dir = dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("scrapeweave").join("chromium");
    std::fs::create_dir_all(&cache_dir).map_err(downstream)?;

    let fetcher = BrowserFetcher::new(BrowserFetcherOptions::builder().with_path(&cache_dir).build().map_err(downstream)?);
    let revision = fetcher.fetch().await.map_err(downstream)?;
    Ok(revision.executable_path)
}

/// Finds or downloads Chrome/Chromium, launches it with §4.2.3's
/// stealth flag set, and returns the browser alongside the task driving its
/// CDP event handler and the profile directory it was given.
pub async fn launch_stealth_browser(headless: bool, profile_dir: Option<PathBuf>) -> ScrapeResult<(Browser, JoinHandle<()>, PathBuf)> {
    let chrome_path = match find_browser_executable().await {
        Some(path) => path,
        None => download_managed_browser().await?,
    };

    let user_data_dir = profile_dir.unwrap_or_else(|| std::env::temp_dir().join(format!("scrapeweave_chrome_{}", std::process::id())));
    std::fs::create_dir_all(&user_data_dir).map_err(downstream)?;

    let fingerprint = random_fingerprint();

    let mut config_builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(fingerprint.viewport.0, fingerprint.viewport.1)
        .user_data_dir(user_data_dir.clone())
        .chrome_executable(chrome_path);

    config_builder = if headless { config_builder.headless_mode(HeadlessMode::default()) } else { config_builder.with_head() };

    config_builder = config_builder
        .arg(format!("--user-agent={}", fingerprint.user_agent))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--disable-web-security")
        .arg("--disable-features=IsolateOrigins,site-per-process")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--hide-scrollbars")
        .arg("--mute-audio");

    let browser_config = config_builder.build().map_err(|e| ScrapeError::DownstreamUnavailable(format!("browser config: {e}")))?;

    let (browser, mut handler) = Browser::launch(browser_config).await.map_err(downstream)?;

    let handler_task = task::spawn(async move {
        while let Some(h) = handler.next().await {
            if let Err(e) = h {
                log::trace!("browser handler event: {e}");
            }
        }
    });

    Ok((browser, handler_task, user_data_dir))
}

/// Self-contained stealth injection: navigator/webdriver spoofing, plugin
/// and WebGL vendor mocking. Runs once per page before navigation.
pub async fn inject_stealth(page: &Page) -> ScrapeResult<()> {
    const SCRIPT: &str = r"
        Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
        Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
        Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
        if (!window.chrome) { window.chrome = {}; }
        if (!window.chrome.runtime) {
            window.chrome.runtime = { connect: () => ({ onMessage: { addListener: () => {} }, postMessage: () => {} }) };
        }
        if (window.WebGLRenderingContext) {
            const getParameter = WebGLRenderingContext.prototype.getParameter;
            WebGLRenderingContext.prototype.getParameter = function (param) {
                if (param === 37445) return 'Intel Inc.';
                if (param === 37446) return 'Intel Iris OpenGL Engine';
                return getParameter.apply(this, arguments);
            };
        }
    ";
    page.evaluate(SCRIPT).await.map_err(downstream)?;
    Ok(())
}
