//! Ownership wrapper for a launched browser and its CDP event handler task.

use chromiumoxide::browser::Browser;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Wrapper for a Browser and its event handler task.
///
/// The handler task MUST be aborted once the browser is gone, otherwise it
/// runs indefinitely against a dead websocket. Dropping the wrapper takes
/// care of that; [`BrowserWrapper::shutdown`] is the clean path.
pub struct BrowserWrapper {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
}

impl BrowserWrapper {
    pub(crate) fn new(browser: Browser, handler: JoinHandle<()>, user_data_dir: PathBuf) -> Self {
        Self {
            browser,
            handler,
            user_data_dir: Some(user_data_dir),
        }
    }

    /// Get reference to inner browser
    pub(crate) fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Close the browser process and release everything it held.
    ///
    /// Close must be followed by `wait()`: drop alone only aborts the handler
    /// task and leaves a zombie Chromium process behind. Temp-profile removal
    /// has to happen after `wait()` completes or Windows fails on locked files.
    pub(crate) async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Failed to wait for browser exit: {}", e);
        }
        self.cleanup_temp_dir();
    }

    /// Remove the temporary profile directory (blocking operation).
    ///
    /// Uses blocking `std::fs::remove_dir_all()` because this is also reached
    /// from Drop context where async is not available.
    fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            info!("Cleaning up temp profile directory: {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "Failed to clean up temp profile {}: {}. Manual cleanup may be required.",
                    path.display(),
                    e
                );
            }
        }
    }
}

impl Drop for BrowserWrapper {
    fn drop(&mut self) {
        self.handler.abort();
        // Browser::drop() kills the Chromium process itself.

        if self.user_data_dir.is_some() {
            warn!(
                "BrowserWrapper dropped without explicit shutdown; temp profile will be orphaned: {}",
                self.user_data_dir.as_ref().unwrap().display()
            );
        }
    }
}
