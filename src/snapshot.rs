//! Page snapshot normalizer: rewrites resource references to absolute form
//! and serializes the page as HTML plus a viewport screenshot.
//!
//! Rewriting runs inside the page, where the browser resolves relative URLs
//! against the live base for free (an anchor element's `href` getter). The
//! `@font-face` pass introspects `document.styleSheets`, which throws on
//! cross-origin sheets — those are skipped and logged, never fatal.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chromiumoxide::page::{Page, ScreenshotParams};
use chromiumoxide_cdp::cdp::browser_protocol::page::CaptureScreenshotFormat;

use crate::browser::{BrowserError, BrowserResult};

/// One serialized observation of the live page.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    /// Outer HTML with resource references rewritten to absolute URLs.
    pub html: String,
    /// Base64-encoded PNG of the current viewport.
    pub screenshot: String,
    /// Where the page actually is — may differ from the URL the caller
    /// requested if actions navigated in the meantime.
    pub current_url: String,
}

/// Rewrites relative resource references in place and returns the resolved
/// outer HTML. Mirrors what a detached viewer needs: images (src + each
/// srcset candidate, descriptors preserved), stylesheet and preload links,
/// re-materialized inline styles, external scripts, and @font-face urls.
const NORMALIZE_JS: &str = r#"
(() => {
  function toAbsoluteUrl(relativeUrl) {
    const a = document.createElement("a");
    a.href = relativeUrl;
    return a.href;
  }

  Array.from(document.querySelectorAll("img")).forEach((img) => {
    const src = img.getAttribute("src");
    if (src) img.setAttribute("src", toAbsoluteUrl(src));

    const srcset = img.getAttribute("srcset");
    if (srcset) {
      const updated = srcset
        .split(",")
        .map((entry) => {
          const [url, descriptor] = entry.trim().split(/\s+/);
          return (toAbsoluteUrl(url) + " " + (descriptor || "")).trim();
        })
        .join(", ");
      img.setAttribute("srcset", updated);
    }
  });

  Array.from(document.querySelectorAll('link[rel="stylesheet"]')).forEach((link) => {
    const href = link.getAttribute("href");
    if (href) link.setAttribute("href", toAbsoluteUrl(href));
  });

  // Dynamically injected styles can be stripped by serialization; append
  // equivalent fresh <style> elements so the markup survives standalone.
  Array.from(document.querySelectorAll("style")).forEach((style) => {
    const cssText = style.innerHTML;
    if (cssText) {
      const styleElement = document.createElement("style");
      styleElement.innerHTML = cssText;
      document.head.appendChild(styleElement);
    }
  });

  Array.from(document.querySelectorAll("script[src]")).forEach((script) => {
    const src = script.getAttribute("src");
    if (src) script.setAttribute("src", toAbsoluteUrl(src));
  });

  Array.from(document.querySelectorAll('link[rel="preload"]')).forEach((link) => {
    const href = link.getAttribute("href");
    if (href) link.setAttribute("href", toAbsoluteUrl(href));
  });

  // Best effort: cross-origin sheets throw on cssRules access.
  const styleSheets = Array.from(document.styleSheets);
  for (const sheet of styleSheets) {
    try {
      const rules = Array.from(sheet.cssRules);
      for (const rule of rules) {
        if (rule instanceof CSSFontFaceRule) {
          rule.style.cssText = rule.style.cssText.replace(
            /url\(['"]?(.*?)['"]?\)/g,
            (match, p1) => 'url("' + toAbsoluteUrl(p1) + '")'
          );
        }
      }
    } catch (e) {
      console.warn("skipping stylesheet during normalization:", e);
    }
  }

  return document.documentElement.outerHTML;
})()
"#;

/// Serialize the live page: normalized HTML, viewport PNG (base64), and the
/// page's current navigated URL.
pub async fn normalize(page: &Page) -> BrowserResult<PageSnapshot> {
    let html = normalize_html(page).await?;
    let screenshot = capture_screenshot(page).await?;
    let current_url = current_url(page).await?;

    Ok(PageSnapshot {
        html,
        screenshot,
        current_url,
    })
}

/// Rewrite resource references in the live DOM and return the outer HTML.
pub async fn normalize_html(page: &Page) -> BrowserResult<String> {
    page.evaluate(NORMALIZE_JS)
        .await
        .map_err(|e| BrowserError::Control(format!("html normalization failed: {e}")))?
        .into_value()
        .map_err(|e| BrowserError::Control(format!("html normalization returned bad data: {e}")))
}

/// Capture the current viewport as a base64-encoded PNG.
pub async fn capture_screenshot(page: &Page) -> BrowserResult<String> {
    let params = ScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Png)
        .build();

    let image_data = page
        .screenshot(params)
        .await
        .map_err(|e| BrowserError::Screenshot(e.to_string()))?;

    Ok(BASE64.encode(&image_data))
}

/// The page's current navigated URL.
pub async fn current_url(page: &Page) -> BrowserResult<String> {
    Ok(page
        .url()
        .await
        .map_err(|e| BrowserError::Control(format!("url readback failed: {e}")))?
        .unwrap_or_default())
}
