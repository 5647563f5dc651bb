//! Session lifecycle for the single shared browser+page pair.
//!
//! At most one live browser exists at a time; the page handle lives inside
//! the same struct as its browser so it can never outlive it. Access goes
//! through `tokio::sync::Mutex` — browser calls are async and a sync lock
//! must not be held across `.await` points.

use chromiumoxide::page::Page;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::BrowserConfig;
use crate::browser::{BrowserError, BrowserResult, BrowserWrapper};
use crate::browser_setup::launch_browser;
use crate::utils::constants::NAVIGATION_SETTLE;

struct LiveSession {
    wrapper: BrowserWrapper,
    page: Page,
    current_url: Option<String>,
}

/// Owns the zero-or-one live browser session.
///
/// Not a process-wide singleton: callers that want sharing wrap it in `Arc`.
/// Reset is an explicit lifecycle transition, not ambient state mutation.
pub struct SessionController {
    config: BrowserConfig,
    live: Mutex<Option<LiveSession>>,
}

impl SessionController {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            live: Mutex::new(None),
        }
    }

    /// Get the live page, launching a fresh browser if none exists.
    ///
    /// An existing session is reused unconditionally — navigation on a live
    /// page is the action interpreter's job, never re-issued here. On a
    /// fresh launch, a supplied URL is navigated to and given a settle wait
    /// before the page is handed back.
    ///
    /// A launch or first-navigation failure tears the partial session down
    /// completely; nothing half-constructed is retained.
    pub async fn ensure_session(&self, url: Option<&str>) -> BrowserResult<Page> {
        let mut guard = self.live.lock().await;

        if let Some(live) = guard.as_ref() {
            return Ok(live.page.clone());
        }

        info!("Launching browser session");
        let (browser, handler, user_data_dir) = launch_browser(&self.config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
        let wrapper = BrowserWrapper::new(browser, handler, user_data_dir);

        let page = match wrapper.browser().new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                wrapper.shutdown().await;
                return Err(BrowserError::PageCreationFailed(e.to_string()));
            }
        };

        let mut current_url = None;
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            if let Err(e) = validate_url(url) {
                wrapper.shutdown().await;
                return Err(e);
            }
            if let Err(e) = navigate_settled(&page, url).await {
                wrapper.shutdown().await;
                return Err(e);
            }
            current_url = page.url().await.ok().flatten();
        }

        let page_handle = page.clone();
        *guard = Some(LiveSession {
            wrapper,
            page,
            current_url,
        });

        Ok(page_handle)
    }

    /// Close the live browser (if any) and clear all session state.
    ///
    /// Succeeds whether or not a session existed; calling it twice in a row
    /// leaves the same empty state both times.
    pub async fn reset(&self) {
        let mut guard = self.live.lock().await;

        if let Some(live) = guard.take() {
            info!("Shutting down browser session");
            live.wrapper.shutdown().await;
        }
    }

    /// URL of the live page as of the last observation, if any.
    pub async fn current_url(&self) -> Option<String> {
        self.live.lock().await.as_ref()?.current_url.clone()
    }

    /// Record the page URL observed after executing actions.
    pub async fn set_current_url(&self, url: String) {
        if let Some(live) = self.live.lock().await.as_mut() {
            live.current_url = Some(url);
        }
    }

    /// Whether a browser session is currently live.
    pub async fn is_live(&self) -> bool {
        self.live.lock().await.is_some()
    }
}

/// Navigate and wait until the page has settled.
///
/// chromiumoxide exposes no request-count idle signal, so "no more than a
/// couple of in-flight requests for ~500ms" is approximated by the load
/// lifecycle wait plus a fixed settle delay.
async fn navigate_settled(page: &Page, url: &str) -> BrowserResult<()> {
    page.goto(url)
        .await
        .map_err(|e| BrowserError::NavigationFailed(format!("{url}: {e}")))?;

    if let Err(e) = page.wait_for_navigation().await {
        warn!("Page load wait failed for {}: {}", url, e);
    }
    tokio::time::sleep(NAVIGATION_SETTLE).await;

    Ok(())
}

fn validate_url(raw: &str) -> BrowserResult<()> {
    match url::Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => Err(BrowserError::InvalidUrl(format!(
            "unsupported scheme {:?} in {raw}",
            parsed.scheme()
        ))),
        Err(e) => Err(BrowserError::InvalidUrl(format!("{raw}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reset_without_session_is_idempotent() {
        let controller = SessionController::new(BrowserConfig::default());

        controller.reset().await;
        assert!(!controller.is_live().await);
        assert!(controller.current_url().await.is_none());

        // Second reset against already-empty state behaves identically.
        controller.reset().await;
        assert!(!controller.is_live().await);
        assert!(controller.current_url().await.is_none());
    }

    #[test]
    fn url_validation_accepts_http_and_rejects_the_rest() {
        assert!(validate_url("https://example.com/search?q=1").is_ok());
        assert!(validate_url("http://localhost:8080").is_ok());
        assert!(matches!(
            validate_url("file:///etc/passwd"),
            Err(BrowserError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("not a url"),
            Err(BrowserError::InvalidUrl(_))
        ));
    }
}
