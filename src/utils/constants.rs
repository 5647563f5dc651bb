//! Shared timing and layout constants used across the operator core.

use std::time::Duration;

/// Chrome user agent string presented by launched browsers
///
/// Chrome releases a new stable roughly every 4 weeks; bump this
/// occasionally to stay within a plausible version window.
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// Minimum rendered size for an element to be marked as interactive.
/// Anything at or below this is treated as invisible or decorative.
pub const MIN_MARKED_WIDTH: f64 = 20.0;
pub const MIN_MARKED_HEIGHT: f64 = 20.0;

/// z-index given to marker overlays. Overlay cleanup matches elements on
/// this exact value, so render and cleanup must stay in sync.
pub const OVERLAY_Z_INDEX: &str = "2147483647";

/// Settle interval after every executed page-mutating action, letting
/// navigations, animations and async content land before the next action.
pub const ACTION_SETTLE: Duration = Duration::from_millis(1500);

/// Wait between rendering marker overlays and capturing the screenshot.
pub const OVERLAY_RENDER_WAIT: Duration = Duration::from_millis(500);

/// Post-load settle delay approximating "network idle" after navigation.
pub const NAVIGATION_SETTLE: Duration = Duration::from_millis(500);
