//! Browser infrastructure for launching and managing Chromium instances

mod wrapper;

pub use crate::browser_setup::{download_managed_browser, find_browser_executable};
pub use wrapper::BrowserWrapper;

use thiserror::Error;

/// Infrastructure failures: launch, page creation, navigation, and raw
/// browser control. Fatal for the request that hit them; never left behind
/// as partially initialized session state.
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Failed to create page: {0}")]
    PageCreationFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Refusing to navigate to non-http(s) URL: {0}")]
    InvalidUrl(String),

    #[error("Browser control failed: {0}")]
    Control(String),

    #[error("Screenshot capture failed: {0}")]
    Screenshot(String),
}

pub type BrowserResult<T> = Result<T, BrowserError>;
