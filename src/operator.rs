//! The perform operation: the single entry point an HTTP layer (or the agent
//! loop) drives. One call = execute pending actions, then produce a fresh
//! observation of the page.
//!
//! Wire shapes here are the contract the transport must satisfy; the
//! transport itself lives outside this crate.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::Config;
use crate::action::{self, ActionError};
use crate::browser::BrowserError;
use crate::marker::{self, ElementMarker, MarkerSet};
use crate::session::SessionController;
use crate::snapshot;
use crate::utils::constants::OVERLAY_RENDER_WAIT;

/// Request body of the action endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformRequest {
    /// Target URL; only honored when a fresh session is being created.
    #[serde(default)]
    pub url: Option<String>,

    /// Ordered action batch, executed before the new observation.
    #[serde(default)]
    pub actions: Vec<String>,

    /// Tear the session down instead of observing.
    #[serde(default)]
    pub reset: bool,
}

impl PerformRequest {
    /// Observe without executing anything.
    pub fn observe(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn actions(url: Option<String>, actions: Vec<String>) -> Self {
        Self {
            url,
            actions,
            reset: false,
        }
    }

    pub fn reset() -> Self {
        Self {
            reset: true,
            ..Self::default()
        }
    }
}

/// Successful response: either a full observation or the trivial reset ack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerformResponse {
    Page(PageObservation),
    Reset(ResetAck),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageObservation {
    pub html: String,
    pub current_url: String,
    /// Base64 PNG of the viewport with marker overlays rendered.
    pub screenshot: String,
    pub markers: Vec<ElementMarker>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetAck {
    pub status: String,
}

impl Default for ResetAck {
    fn default() -> Self {
        Self {
            status: "reset".to_string(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum OperatorError {
    /// Infrastructure failure; fatal for this request, session state rolled
    /// back rather than left half-initialized.
    #[error(transparent)]
    Browser(#[from] BrowserError),

    /// The model referenced the marker contract incorrectly (bad index,
    /// stale set, vanished element). The session survives; re-observe and
    /// continue.
    #[error(transparent)]
    Action(#[from] ActionError),
}

#[derive(Default)]
struct ObservationState {
    epoch: u64,
    markers: MarkerSet,
    last_screenshot: Option<String>,
}

/// Owns the session plus the marker/screenshot caches of the most recent
/// observation. One task in flight at a time is assumed; concurrent callers
/// must serialize externally or marker indices can pair with a stale DOM.
pub struct Operator {
    session: SessionController,
    state: Mutex<ObservationState>,
}

impl Operator {
    pub fn new(config: &Config) -> Self {
        Self {
            session: SessionController::new(config.browser.clone()),
            state: Mutex::new(ObservationState::default()),
        }
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    /// Run one perform cycle: reset short-circuit, ensure session, execute
    /// the batch against the previous observation's markers, then observe —
    /// mark, screenshot, clean overlays (always, even when capture fails),
    /// normalize the HTML, read back the URL.
    pub async fn perform(&self, request: PerformRequest) -> Result<PerformResponse, OperatorError> {
        if request.reset {
            self.reset().await;
            return Ok(PerformResponse::Reset(ResetAck::default()));
        }

        let page = self.session.ensure_session(request.url.as_deref()).await?;

        if !request.actions.is_empty() {
            let (markers, live_epoch) = {
                let state = self.state.lock().await;
                (state.markers.clone(), state.epoch)
            };
            let outcome = action::execute_batch(&page, &markers, live_epoch, &request.actions).await?;
            if outcome.answer.is_some() {
                debug!("Batch contained ANSWER; remaining actions skipped");
            }
        }

        let epoch = {
            let mut state = self.state.lock().await;
            state.epoch += 1;
            state.epoch
        };

        let set = marker::observe(&page, epoch).await?;
        tokio::time::sleep(OVERLAY_RENDER_WAIT).await;

        let screenshot = snapshot::capture_screenshot(&page).await;
        // Overlays come off no matter how the capture went; leftovers would
        // corrupt every later observation.
        if let Err(e) = marker::clear_overlays(&page).await {
            warn!("Overlay cleanup failed: {}", e);
        }
        let screenshot = screenshot?;

        let html = snapshot::normalize_html(&page).await?;
        let current_url = snapshot::current_url(&page).await?;
        self.session.set_current_url(current_url.clone()).await;

        let markers = {
            let mut state = self.state.lock().await;
            state.markers = set;
            state.last_screenshot = Some(screenshot.clone());
            state.markers.markers.clone()
        };

        Ok(PerformResponse::Page(PageObservation {
            html,
            current_url,
            screenshot,
            markers,
        }))
    }

    /// Close the browser and clear every cache. Safe to call repeatedly and
    /// with no session at all.
    pub async fn reset(&self) {
        self.session.reset().await;
        let mut state = self.state.lock().await;
        *state = ObservationState::default();
    }

    /// Marker set of the most recent observation.
    pub async fn markers(&self) -> MarkerSet {
        self.state.lock().await.markers.clone()
    }

    /// Screenshot of the most recent observation, if any.
    pub async fn last_screenshot(&self) -> Option<String> {
        self.state.lock().await.last_screenshot.clone()
    }
}
