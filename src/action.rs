//! Action grammar and interpreter.
//!
//! Four recognized instruction forms, matched on a required prefix keyword:
//!
//! ```text
//! ANSWER                        terminal; halts the batch, no page mutation
//! Click [N]                     click the element at marker index N
//! Type [N]; <free text>         type the text into element at marker index N
//! Scroll [WINDOW]; <direction>  scroll the viewport
//! ```
//!
//! The parser is total: anything unrecognized becomes a logged no-op, never
//! a hard failure. A recognized prefix with a malformed or out-of-range
//! index is different — that is the model misusing the marker contract and
//! is reported loudly, distinct from infrastructure failures.

use chromiumoxide::page::Page;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::browser::BrowserError;
use crate::marker::{ElementMarker, MarkerSet};
use crate::utils::constants::ACTION_SETTLE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Terminal: the task is answered; remaining batch entries never run.
    Answer(String),
    Click(usize),
    Type(usize, String),
    Scroll(ScrollDirection),
    /// Anything that matched no grammar prefix; executes as a no-op.
    Unrecognized(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    fn parse(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "up" => Self::Up,
            "left" => Self::Left,
            "right" => Self::Right,
            _ => Self::Down,
        }
    }
}

/// Resolution and execution failures. Distinct from grammar no-ops (which
/// are not errors) and from [`BrowserError`] infrastructure faults, which
/// are wrapped.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("action index is not a non-negative integer in {0:?}")]
    MalformedIndex(String),

    #[error("missing \"; \" text payload in {0:?}")]
    MissingText(String),

    #[error("marker index {index} out of range: {available} markers in current set")]
    IndexOutOfRange { index: usize, available: usize },

    #[error("marker set from observation {held} is stale; live observation is {live}")]
    StaleMarkers { held: u64, live: u64 },

    #[error("element vanished for selector {selector:?}; re-observe and retry")]
    ElementVanished { selector: String },

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Parse one instruction string.
///
/// Total over its input: unknown prefixes come back as
/// [`Action::Unrecognized`]. Errors are reserved for recognized forms whose
/// index or payload is malformed.
pub fn parse(raw: &str) -> Result<Action, ActionError> {
    let trimmed = raw.trim();

    if trimmed.starts_with("ANSWER") {
        let answer = trimmed
            .split_once("; ")
            .map(|(_, rest)| rest.to_string())
            .unwrap_or_default();
        return Ok(Action::Answer(answer));
    }

    if trimmed.starts_with("Click") {
        let index = parse_index(trimmed, trimmed)?;
        return Ok(Action::Click(index));
    }

    if trimmed.starts_with("Type") {
        // Only the FIRST "; " delimits; the text may itself contain
        // semicolons and must not be re-split.
        let (head, text) = trimmed
            .split_once("; ")
            .ok_or_else(|| ActionError::MissingText(raw.to_string()))?;
        let index = parse_index(head, trimmed)?;
        return Ok(Action::Type(index, text.to_string()));
    }

    if trimmed.starts_with("Scroll") {
        let direction = trimmed
            .split_once("; ")
            .map(|(_, rest)| ScrollDirection::parse(rest))
            .unwrap_or(ScrollDirection::Down);
        return Ok(Action::Scroll(direction));
    }

    Ok(Action::Unrecognized(raw.to_string()))
}

/// Extract `N` from the bracketed token after the keyword.
fn parse_index(segment: &str, raw: &str) -> Result<usize, ActionError> {
    let token = segment
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| ActionError::MalformedIndex(raw.to_string()))?;
    token
        .trim_matches(|c| c == '[' || c == ']')
        .parse::<usize>()
        .map_err(|_| ActionError::MalformedIndex(raw.to_string()))
}

/// Result of running one action batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Page-mutating actions actually executed.
    pub executed: usize,
    /// Set when an ANSWER was encountered; the rest of the batch was skipped.
    pub answer: Option<String>,
}

/// Execute an ordered action batch against the live page.
///
/// Strictly sequential. After every executed non-Answer action the
/// interpreter sleeps a fixed settle interval so page reactions (navigation,
/// animation, async content) can land. Encountering `ANSWER` halts the rest
/// of the batch without error. Unrecognized instructions are logged no-ops.
pub async fn execute_batch(
    page: &Page,
    markers: &MarkerSet,
    live_epoch: u64,
    actions: &[String],
) -> Result<BatchOutcome, ActionError> {
    ensure_fresh(markers, live_epoch)?;

    let mut outcome = BatchOutcome::default();

    for raw in actions {
        match parse(raw)? {
            Action::Answer(text) => {
                debug!("ANSWER reached; halting batch");
                outcome.answer = Some(text);
                return Ok(outcome);
            }
            Action::Unrecognized(text) => {
                warn!("Ignoring unrecognized action: {:?}", text);
                continue;
            }
            Action::Click(index) => {
                let marker = resolve(markers, index)?;
                debug!("Click [{}] -> {}", index, marker.selector);
                click(page, &marker.selector).await?;
            }
            Action::Type(index, ref text) => {
                let marker = resolve(markers, index)?;
                debug!("Type [{}] -> {}", index, marker.selector);
                type_text(page, &marker.selector, text).await?;
            }
            Action::Scroll(direction) => {
                // The direction is accepted syntactically but the viewport
                // always moves one height downward; a known simplification.
                debug!("Scroll ({:?})", direction);
                scroll_window(page).await?;
            }
        }

        outcome.executed += 1;
        sleep(ACTION_SETTLE).await;
    }

    Ok(outcome)
}

fn ensure_fresh(markers: &MarkerSet, live_epoch: u64) -> Result<(), ActionError> {
    if markers.epoch != live_epoch {
        return Err(ActionError::StaleMarkers {
            held: markers.epoch,
            live: live_epoch,
        });
    }
    Ok(())
}

fn resolve(markers: &MarkerSet, index: usize) -> Result<&ElementMarker, ActionError> {
    markers.get(index).ok_or(ActionError::IndexOutOfRange {
        index,
        available: markers.len(),
    })
}

async fn click(page: &Page, selector: &str) -> Result<(), ActionError> {
    let element =
        page.find_element(selector)
            .await
            .map_err(|_| ActionError::ElementVanished {
                selector: selector.to_string(),
            })?;

    element
        .scroll_into_view()
        .await
        .map_err(|e| BrowserError::Control(format!("scroll into view failed: {e}")))?;

    let point = element
        .clickable_point()
        .await
        .map_err(|e| BrowserError::Control(format!("no clickable point for {selector:?}: {e}")))?;

    page.click(point)
        .await
        .map_err(|e| BrowserError::Control(format!("click failed for {selector:?}: {e}")))?;

    Ok(())
}

async fn type_text(page: &Page, selector: &str, text: &str) -> Result<(), ActionError> {
    let element =
        page.find_element(selector)
            .await
            .map_err(|_| ActionError::ElementVanished {
                selector: selector.to_string(),
            })?;

    element
        .scroll_into_view()
        .await
        .map_err(|e| BrowserError::Control(format!("scroll into view failed: {e}")))?;

    // Click to focus; direct focus() stalls on elements under an
    // IntersectionObserver.
    let point = element
        .clickable_point()
        .await
        .map_err(|e| BrowserError::Control(format!("no clickable point for {selector:?}: {e}")))?;

    page.click(point)
        .await
        .map_err(|e| BrowserError::Control(format!("focus click failed for {selector:?}: {e}")))?;

    element
        .type_str(text)
        .await
        .map_err(|e| BrowserError::Control(format!("typing failed for {selector:?}: {e}")))?;

    Ok(())
}

async fn scroll_window(page: &Page) -> Result<(), ActionError> {
    page.evaluate("window.scrollBy(0, window.innerHeight)")
        .await
        .map_err(|e| BrowserError::Control(format!("viewport scroll failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker_set(count: usize) -> MarkerSet {
        let markers = (0..count)
            .map(|index| ElementMarker {
                selector: format!("div:nth-child({})", index + 1),
                index,
                content: String::new(),
                label: "div".into(),
            })
            .collect();
        MarkerSet::new(1, markers)
    }

    #[test]
    fn click_parses_bracketed_index() {
        assert_eq!(parse("Click [2]").unwrap(), Action::Click(2));
    }

    #[test]
    fn type_splits_on_first_delimiter_only() {
        assert_eq!(
            parse("Type [3]; hello world; x").unwrap(),
            Action::Type(3, "hello world; x".into())
        );
    }

    #[test]
    fn scroll_accepts_direction_token() {
        assert_eq!(
            parse("Scroll [WINDOW]; down").unwrap(),
            Action::Scroll(ScrollDirection::Down)
        );
        assert_eq!(
            parse("Scroll [WINDOW]; up").unwrap(),
            Action::Scroll(ScrollDirection::Up)
        );
        assert_eq!(
            parse("Scroll [WINDOW]").unwrap(),
            Action::Scroll(ScrollDirection::Down)
        );
    }

    #[test]
    fn answer_carries_its_payload() {
        assert_eq!(parse("ANSWER; done").unwrap(), Action::Answer("done".into()));
        assert_eq!(parse("ANSWER").unwrap(), Action::Answer(String::new()));
    }

    #[test]
    fn unknown_prefix_is_a_noop_not_an_error() {
        assert_eq!(
            parse("Foo [1]").unwrap(),
            Action::Unrecognized("Foo [1]".into())
        );
        assert_eq!(parse("").unwrap(), Action::Unrecognized(String::new()));
    }

    #[test]
    fn malformed_index_fails_loudly() {
        assert!(matches!(
            parse("Click [x]"),
            Err(ActionError::MalformedIndex(_))
        ));
        assert!(matches!(
            parse("Click [-1]"),
            Err(ActionError::MalformedIndex(_))
        ));
        assert!(matches!(parse("Click"), Err(ActionError::MalformedIndex(_))));
    }

    #[test]
    fn type_without_payload_fails_loudly() {
        assert!(matches!(
            parse("Type [2]"),
            Err(ActionError::MissingText(_))
        ));
    }

    #[test]
    fn resolution_rejects_out_of_range_index() {
        let markers = marker_set(5);
        assert!(resolve(&markers, 4).is_ok());
        assert!(matches!(
            resolve(&markers, 5),
            Err(ActionError::IndexOutOfRange {
                index: 5,
                available: 5
            })
        ));
    }

    #[test]
    fn stale_marker_sets_are_refused() {
        let markers = marker_set(3);
        assert!(ensure_fresh(&markers, 1).is_ok());
        assert!(matches!(
            ensure_fresh(&markers, 2),
            Err(ActionError::StaleMarkers { held: 1, live: 2 })
        ));
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        assert_eq!(parse("  Click [0] ").unwrap(), Action::Click(0));
    }
}
