//! Progress-line detection.
//!
//! Classification is advisory metadata for renderers. It never changes how
//! output is routed.

use regex::Regex;
use std::sync::OnceLock;

/// Filled and empty block glyphs drawn by progress bars
const PROGRESS_GLYPHS: &[char] = &['█', '▓', '▒', '░'];

fn fraction_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[\d+/\d+\]").expect("static regex is valid"))
}

/// True if the line looks like a progress update
///
/// Matches block glyphs, a `%` sign, a literal `...`, or a bracketed
/// fraction such as `[3/10]`.
pub fn is_progress(line: &str) -> bool {
    line.contains(PROGRESS_GLYPHS)
        || line.contains('%')
        || line.contains("...")
        || fraction_pattern().is_match(line)
}
