//! Whitespace normalization passes applied to extracted transcript text.
//!
//! Each pass is a function `&str -> String` applied in sequence. None of them
//! depend on locale or time, so the pipeline is deterministic.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on extracted text.
pub(crate) fn run_pipeline(text: &str) -> String {
    let mut result = normalize_line_endings(text);

    result = collapse_inline_whitespace(&result);
    result = trim_lines(&result);
    result = collapse_blank_lines(&result);

    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Line endings
// ---------------------------------------------------------------------------

/// Convert `\r\n` and bare `\r` to `\n`.
fn normalize_line_endings(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Inline whitespace
// ---------------------------------------------------------------------------

/// Collapse runs of spaces, tabs, and non-breaking spaces into one space.
fn collapse_inline_whitespace(text: &str) -> String {
    static INLINE_WS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\x0B\x0C\x{00A0}\x{2007}\x{202F}]+").expect("valid regex"));

    INLINE_WS_RE.replace_all(text, " ").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 3: Line trimming
// ---------------------------------------------------------------------------

/// Strip leading and trailing spaces from every line.
fn trim_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.trim_matches(' '));
    }
    out
}

// ---------------------------------------------------------------------------
// Pass 4: Blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 3+ newlines into a single blank line.
fn collapse_blank_lines(text: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(text, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_and_cr_become_lf() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn inline_whitespace_collapses() {
        assert_eq!(
            collapse_inline_whitespace("Mr\u{00A0}\u{00A0}Smith \t said"),
            "Mr Smith said"
        );
    }

    #[test]
    fn blank_line_runs_collapse_to_one() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb\n\nc"), "a\n\nb\n\nc");
    }

    #[test]
    fn pipeline_trims_everything() {
        let raw = "  \r\n  Chair:   Welcome.  \r\n\r\n\r\n\r\n  Witness:\tThank you. \n ";
        assert_eq!(run_pipeline(raw), "Chair: Welcome.\n\nWitness: Thank you.");
    }
}
