//! Element marking engine: discovers interactive elements on the live page,
//! assigns display indices, synthesizes selectors, and renders the numbered
//! overlays the model sees in its screenshot.
//!
//! The in-page script is a dumb collector: it reports candidate elements with
//! their geometry, text and ancestor-chain records. Filtering, ordering,
//! index assignment and selector synthesis all happen in Rust where they are
//! deterministic and unit-testable.

use chromiumoxide::page::Page;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::browser::{BrowserError, BrowserResult};
use crate::utils::constants::{MIN_MARKED_HEIGHT, MIN_MARKED_WIDTH, OVERLAY_Z_INDEX};

/// One discovered interactive element for one observation pass.
///
/// Indices are assigned per pass and are NOT stable across passes; the whole
/// set is replaced wholesale each observation and is stale the moment the
/// DOM changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementMarker {
    pub selector: String,
    pub index: usize,
    pub content: String,
    pub label: String,
}

/// A full observation pass result: the marker list plus an epoch stamping
/// which pass produced it. Action resolution validates the epoch, not just
/// the numeric index bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerSet {
    pub epoch: u64,
    pub markers: Vec<ElementMarker>,
}

impl MarkerSet {
    pub fn new(epoch: u64, markers: Vec<ElementMarker>) -> Self {
        Self { epoch, markers }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ElementMarker> {
        self.markers.get(index)
    }
}

/// Raw per-element record reported by the harvest script.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawElement {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
    /// Scroll-adjusted document coordinates, where overlays are placed.
    pub page_top: f64,
    pub page_left: f64,
    pub content: String,
    /// Ancestor chain, leaf first, ending at <body>.
    pub path: Vec<PathSegment>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PathSegment {
    pub tag: String,
    pub id: String,
    pub classes: Vec<String>,
    /// 1-based position among the parent's element children.
    pub position: u32,
}

#[derive(Debug, Clone, Serialize)]
struct OverlayBox {
    index: usize,
    top: f64,
    left: f64,
    width: f64,
    height: f64,
}

struct Discovered {
    marker: ElementMarker,
    overlay: OverlayBox,
}

/// Collects every candidate interactive element with geometry, content and
/// ancestor-chain records. Inputs and textareas report value-or-placeholder
/// instead of text content.
const HARVEST_JS: &str = r#"
(() => {
  const selectors = 'button, a, input, textarea, select, [role="button"], [onclick], [href]';
  const records = [];
  for (const el of Array.from(document.querySelectorAll(selectors))) {
    const rect = el.getBoundingClientRect();
    const path = [];
    let node = el;
    while (node.parentElement) {
      const siblings = node.parentNode ? Array.from(node.parentNode.children) : [];
      path.push({
        tag: node.tagName.toLowerCase(),
        id: node.id || "",
        classes: Array.from(node.classList),
        position: siblings.indexOf(node) + 1,
      });
      node = node.parentElement;
    }
    const tag = el.tagName.toLowerCase();
    let content = "";
    if (tag === "input" || tag === "textarea") {
      content = (el.value || "").trim() || (el.placeholder || "").trim();
    } else {
      content = el.textContent || "";
    }
    records.push({
      top: rect.top,
      left: rect.left,
      width: rect.width,
      height: rect.height,
      page_top: rect.top + window.scrollY,
      page_left: rect.left + window.scrollX,
      content: content,
      path: path,
    });
  }
  return records;
})()
"#;

/// Renders one outlined, numbered, non-interactive box per marker at its
/// document coordinates. `__Z__` / `__BOXES__` are substituted before eval;
/// the z-index doubles as the cleanup match key.
const OVERLAY_JS: &str = r##"
(() => {
  const boxes = __BOXES__;
  for (const b of boxes) {
    const marker = document.createElement("div");
    marker.style.position = "absolute";
    marker.style.zIndex = "__Z__";
    marker.style.pointerEvents = "none";
    marker.style.border = "2px dashed #FF0000";
    marker.style.width = b.width + "px";
    marker.style.height = b.height + "px";
    marker.style.top = b.top + "px";
    marker.style.left = b.left + "px";
    const label = document.createElement("div");
    label.textContent = String(b.index);
    label.style.position = "absolute";
    label.style.top = "-24px";
    label.style.left = "0";
    label.style.background = "#FF0000";
    label.style.color = "white";
    label.style.padding = "2px 8px";
    label.style.borderRadius = "4px";
    label.style.fontSize = "14px";
    marker.appendChild(label);
    document.body.appendChild(marker);
  }
})()
"##;

const CLEANUP_JS: &str = r#"
(() => {
  const overlays = document.querySelectorAll('[style*="z-index: __Z__"]');
  overlays.forEach((overlay) => overlay.remove());
})()
"#;

/// Run one observation pass: harvest, discover, render overlays.
///
/// The returned set replaces any previous one; `epoch` is the caller's
/// monotonic observation counter. Zero interactive elements is a valid
/// result, not an error.
pub async fn observe(page: &Page, epoch: u64) -> BrowserResult<MarkerSet> {
    let raw = harvest(page).await?;
    let discovered = discover(raw);
    debug!("Observation pass {} marked {} elements", epoch, discovered.len());

    let boxes: Vec<&OverlayBox> = discovered.iter().map(|d| &d.overlay).collect();
    render_overlays(page, &boxes).await?;

    let markers = discovered.into_iter().map(|d| d.marker).collect();
    Ok(MarkerSet::new(epoch, markers))
}

/// Remove every rendered overlay, matched on the overlay z-index marker.
///
/// Must run after every observation — even when screenshot capture failed —
/// or leftover boxes corrupt the next pass's visual state.
pub async fn clear_overlays(page: &Page) -> BrowserResult<()> {
    let script = CLEANUP_JS.replace("__Z__", OVERLAY_Z_INDEX);
    page.evaluate(script)
        .await
        .map_err(|e| BrowserError::Control(format!("overlay cleanup failed: {e}")))?;
    Ok(())
}

async fn harvest(page: &Page) -> BrowserResult<Vec<RawElement>> {
    page.evaluate(HARVEST_JS)
        .await
        .map_err(|e| BrowserError::Control(format!("element harvest failed: {e}")))?
        .into_value()
        .map_err(|e| BrowserError::Control(format!("element harvest returned bad data: {e}")))
}

async fn render_overlays(page: &Page, boxes: &[&OverlayBox]) -> BrowserResult<()> {
    if boxes.is_empty() {
        return Ok(());
    }
    let payload = serde_json::to_string(boxes)
        .map_err(|e| BrowserError::Control(format!("overlay payload encoding failed: {e}")))?;
    let script = OVERLAY_JS
        .replace("__BOXES__", &payload)
        .replace("__Z__", OVERLAY_Z_INDEX);
    page.evaluate(script)
        .await
        .map_err(|e| BrowserError::Control(format!("overlay rendering failed: {e}")))?;
    Ok(())
}

/// Filter to visibly sized elements, order by top then left coordinate, and
/// assign indices. This ordering IS the index contract the model relies on
/// when it references `[N]`; it approximates reading order and must be
/// reproduced identically for an unchanged DOM.
fn discover(raw: Vec<RawElement>) -> Vec<Discovered> {
    let mut visible: Vec<RawElement> = raw
        .into_iter()
        .filter(|el| el.width > MIN_MARKED_WIDTH && el.height > MIN_MARKED_HEIGHT)
        .collect();

    // Stable sort: elements tied on both coordinates keep document order.
    visible.sort_by(|a, b| a.top.total_cmp(&b.top).then(a.left.total_cmp(&b.left)));

    visible
        .into_iter()
        .enumerate()
        .map(|(index, el)| {
            let label = el.path.first().map(|s| s.tag.clone()).unwrap_or_default();
            Discovered {
                marker: ElementMarker {
                    selector: synthesize_selector(&el.path),
                    index,
                    content: el.content.trim().to_string(),
                    label,
                },
                overlay: OverlayBox {
                    index,
                    top: el.page_top,
                    left: el.page_left,
                    width: el.width,
                    height: el.height,
                },
            }
        })
        .collect()
}

/// Build a CSS path selector from the leaf-first ancestor chain.
///
/// An id terminates the walk: ids are trusted to be locally unique, which is
/// an implementation contract of this engine, not just an optimization.
/// Without an id, the segment is the tag plus any classes, and gains a
/// `:nth-child(k)` qualifier when the element is not the first child of its
/// parent or carries no classes at all.
///
/// Ids and classes are used verbatim; characters that would need CSS
/// escaping are an accepted limitation.
pub(crate) fn synthesize_selector(path: &[PathSegment]) -> String {
    let mut segments: Vec<String> = Vec::with_capacity(path.len());

    for seg in path {
        if !seg.id.is_empty() {
            segments.push(format!("{}#{}", seg.tag, seg.id));
            break;
        }

        let mut part = seg.tag.clone();
        if !seg.classes.is_empty() {
            part.push('.');
            part.push_str(&seg.classes.join("."));
        }
        if seg.position > 1 || seg.classes.is_empty() {
            part.push_str(&format!(":nth-child({})", seg.position));
        }
        segments.push(part);
    }

    segments.reverse();
    segments.join(" > ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(tag: &str, id: &str, classes: &[&str], position: u32) -> PathSegment {
        PathSegment {
            tag: tag.into(),
            id: id.into(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            position,
        }
    }

    fn raw(top: f64, left: f64, width: f64, height: f64, content: &str) -> RawElement {
        RawElement {
            top,
            left,
            width,
            height,
            page_top: top,
            page_left: left,
            content: content.into(),
            path: vec![seg("a", "", &[], 1), seg("body", "", &[], 2)],
        }
    }

    #[test]
    fn selector_stops_at_unique_id() {
        let path = vec![seg("button", "submit", &["cta"], 3), seg("div", "", &["form"], 1)];
        assert_eq!(synthesize_selector(&path), "button#submit");
    }

    #[test]
    fn ancestor_id_terminates_the_walk() {
        let path = vec![
            seg("a", "", &["link"], 1),
            seg("nav", "menu", &[], 2),
            seg("body", "", &[], 2),
        ];
        assert_eq!(synthesize_selector(&path), "nav#menu > a.link");
    }

    #[test]
    fn first_child_with_classes_gets_no_positional_qualifier() {
        let path = vec![seg("div", "", &["card", "active"], 1)];
        assert_eq!(synthesize_selector(&path), "div.card.active");
    }

    #[test]
    fn classless_element_always_gets_nth_child() {
        let path = vec![seg("li", "", &[], 1)];
        assert_eq!(synthesize_selector(&path), "li:nth-child(1)");
    }

    #[test]
    fn later_sibling_gets_its_one_based_position() {
        let path = vec![
            seg("li", "", &[], 3),
            seg("ul", "", &["menu"], 1),
            seg("body", "", &[], 2),
        ];
        assert_eq!(
            synthesize_selector(&path),
            "body:nth-child(2) > ul.menu > li:nth-child(3)"
        );
    }

    #[test]
    fn discovery_orders_top_then_left() {
        let input = vec![
            raw(300.0, 10.0, 100.0, 30.0, "third"),
            raw(100.0, 90.0, 100.0, 30.0, "second"),
            raw(100.0, 20.0, 100.0, 30.0, "first"),
        ];
        let markers: Vec<_> = discover(input).into_iter().map(|d| d.marker).collect();
        let contents: Vec<&str> = markers.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        let indices: Vec<usize> = markers.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn discovery_is_deterministic_for_identical_input() {
        let build = || {
            vec![
                raw(50.0, 50.0, 40.0, 40.0, "a"),
                raw(50.0, 50.0, 40.0, 40.0, "b"),
                raw(10.0, 10.0, 40.0, 40.0, "c"),
            ]
        };
        let first: Vec<_> = discover(build()).into_iter().map(|d| d.marker).collect();
        let second: Vec<_> = discover(build()).into_iter().map(|d| d.marker).collect();
        assert_eq!(first, second);
        // Fully tied coordinates preserve document order.
        assert_eq!(first[1].content, "a");
        assert_eq!(first[2].content, "b");
    }

    #[test]
    fn undersized_elements_are_not_marked() {
        let input = vec![
            raw(0.0, 0.0, 20.0, 100.0, "too narrow"),
            raw(0.0, 0.0, 100.0, 20.0, "too short"),
            raw(0.0, 0.0, 21.0, 21.0, "visible"),
        ];
        let markers: Vec<_> = discover(input).into_iter().map(|d| d.marker).collect();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].content, "visible");
    }

    #[test]
    fn no_candidates_yield_an_empty_set_not_an_error() {
        assert!(discover(Vec::new()).is_empty());
    }

    #[test]
    fn content_is_trimmed() {
        let input = vec![raw(0.0, 0.0, 30.0, 30.0, "  padded text \n")];
        let markers: Vec<_> = discover(input).into_iter().map(|d| d.marker).collect();
        assert_eq!(markers[0].content, "padded text");
    }

    #[test]
    fn overlay_scripts_share_the_cleanup_marker() {
        // Render and cleanup must agree on the z-index or overlays leak.
        assert!(OVERLAY_JS.contains("__Z__"));
        assert!(CLEANUP_JS.contains("__Z__"));
        assert_eq!(OVERLAY_Z_INDEX, "2147483647");
    }
}
