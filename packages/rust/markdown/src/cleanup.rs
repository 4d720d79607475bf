//! Inline citation marker cleanup for prose segments.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! The wrapped form must go before the bare form, otherwise the wrapper
//! tags would be left around nothing.

use std::sync::LazyLock;

use regex::Regex;

/// Run every marker-stripping pass on one prose segment.
pub(crate) fn strip_markers(prose: &str) -> String {
    let mut result = strip_superscript_markers(prose);
    result = strip_bracket_markers(&result);
    result
}

// ---------------------------------------------------------------------------
// Pass 1: superscript-wrapped markers
// ---------------------------------------------------------------------------

/// Remove `<sup>[n]</sup>`, including wrappers exposed by removing a nested one.
fn strip_superscript_markers(text: &str) -> String {
    static SUP_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<sup>\[\d+\]</sup>").expect("valid regex")
    });

    let mut result = text.to_string();
    while SUP_RE.is_match(&result) {
        result = SUP_RE.replace_all(&result, "").to_string();
    }
    result
}

// ---------------------------------------------------------------------------
// Pass 2: bare bracketed markers
// ---------------------------------------------------------------------------

/// Remove `[n]`.
fn strip_bracket_markers(text: &str) -> String {
    static BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\[\d+\]").expect("valid regex")
    });

    BRACKET_RE.replace_all(text, "").to_string()
}
