//! Text cleanup and small logging helpers.
//!
//! - [`normalize_text`]: fixed-point whitespace cleanup of extracted article text
//! - [`truncate_for_log`]: clip long strings before they hit the log stream
//! - [`looks_truncated`]: classify serde_json errors caused by cut-off output

use tracing::{debug, instrument, warn};

/// Outcome of a normalization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// The cleaned text.
    pub text: String,
    /// Number of passes that changed the text.
    pub passes: usize,
    /// `false` when the pass budget ran out before a fixed point.
    pub converged: bool,
}

/// One cleanup pass: collapse double spaces and double newlines, drop a space
/// that follows a newline, and trim both ends.
fn normalize_pass(text: &str) -> String {
    text.replace("  ", " ")
        .replace("\n\n", "\n")
        .replace("\n ", "\n")
        .trim()
        .to_string()
}

/// Repeatedly clean `text` until it stops changing or `max_passes` is spent.
///
/// A single `str::replace` halves every run of spaces or newlines, so a run of
/// length `k` needs about `log2(k)` passes. One extra pass is always spent to
/// observe the fixed point.
///
/// # Arguments
///
/// * `text` - Raw text extracted from the page
/// * `max_passes` - Upper bound on cleanup passes (`limit_clean`)
///
/// # Returns
///
/// The cleaned text, how many passes changed it, and whether a fixed point
/// was reached within the budget.
///
/// # Examples
///
/// ```ignore
/// let outcome = normalize_report("a        b", 100);
/// assert_eq!(outcome.text, "a b");
/// assert_eq!(outcome.passes, 3);
/// assert!(outcome.converged);
/// ```
pub fn normalize_report(text: &str, max_passes: usize) -> Normalized {
    let mut current = text.to_string();
    let mut passes = 0;

    for _ in 0..max_passes {
        let next = normalize_pass(&current);
        if next == current {
            return Normalized {
                text: current,
                passes,
                converged: true,
            };
        }
        current = next;
        passes += 1;
    }

    Normalized {
        text: current,
        passes,
        converged: false,
    }
}

/// Clean extracted article text.
///
/// Never fails: when the budget is exhausted the best-effort text is returned
/// and a warning is logged.
#[instrument(level = "debug", skip_all, fields(bytes = text.len(), max_passes))]
pub fn normalize_text(text: &str, max_passes: usize) -> String {
    let outcome = normalize_report(text, max_passes);
    if outcome.converged {
        debug!(passes = outcome.passes, bytes = outcome.text.len(), "Text normalized");
    } else {
        warn!(
            limit_clean = max_passes,
            bytes = outcome.text.len(),
            "The text could not be cleaned within the pass limit"
        );
    }
    outcome.text
}

/// Truncate a string for logging purposes.
///
/// Cuts on a character boundary after `max` characters and appends the number
/// of bytes dropped.
///
/// # Arguments
///
/// * `s` - The string to potentially truncate
/// * `max` - Maximum number of characters to keep
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// A completion cut off by `max_new_tokens` fails to parse with an EOF error.
///
/// # Arguments
///
/// * `e` - The serde_json error to classify
///
/// # Returns
///
/// `true` if the error is an EOF error, indicating truncation.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}
