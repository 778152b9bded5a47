//! Small helpers shared by the extractors and the job runner.
//!
//! - Text cleanup for scraped markup
//! - String truncation for logging
//! - File system validation for output directories

use std::path::Path;

use scraper::ElementRef;
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::error::ScrapeError;

/// Collapse every run of whitespace (including `\r\n` and non-breaking
/// spaces) into a single space and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// All text beneath an element, whitespace-collapsed.
pub fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a char boundary) with an
/// ellipsis and the number of dropped bytes appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), ScrapeError> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| ScrapeError::io(path, e))?;
    let probe_path = path.join("..__probe_write__");
    std::fs::File::create(&probe_path).map_err(|e| ScrapeError::io(path, e))?;
    if let Err(e) = std::fs::remove_file(&probe_path) {
        debug!(probe = %probe_path.display(), error = %e, "Could not remove probe file");
    }
    info!("Directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \r\n  b\tc  "), "a b c");
        assert_eq!(collapse_whitespace("x\u{a0}\u{a0}y"), "x y");
        assert_eq!(collapse_whitespace("   "), "");
    }

    #[test]
    fn test_element_text_joins_children() {
        let doc = Html::parse_fragment("<p><strong>Address:</strong>\n   1 Main St </p>");
        let sel = Selector::parse("p").unwrap();
        let p = doc.select(&sel).next().unwrap();
        assert_eq!(element_text(p), "Address: 1 Main St");
    }

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundary() {
        let result = truncate_for_log("ééé", 3);
        assert_eq!(result, "é…(+4 bytes)");
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join("..__probe_write__").exists());
    }
}
