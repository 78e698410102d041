//! Deterministic text cleanup shared by the extraction and AI stages.
//!
//! Two families of rules live here:
//!
//! - **Model output** ([`clean_model_output`]): models sometimes wrap their
//!   answer in code fences, answer with CRLF line endings, or sprinkle
//!   zero-width characters. These are stripped before the output is compared
//!   with its input or stored.
//! - **Extraction helpers** ([`collapse_whitespace`], [`meaningful_len`],
//!   [`strip_non_printable`]): used to score extraction strategies and to
//!   recover text from raw bytes.
//!
//! Every rule is a pure `&str → String` function.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply the model-output rules in order:
///
/// 1. Strip outer code fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 2
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Trim leading/trailing blank lines
pub fn clean_model_output(input: &str) -> String {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim_matches('\n').to_string()
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\r?\n(.*?)\r?\n```\s*$").expect("valid regex"));

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

pub fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 5: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Extraction helpers ───────────────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Replace every whitespace run with a single space and trim the ends.
pub fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input, " ").trim().to_string()
}

/// Length in characters of `input` after whitespace collapsing.
pub fn meaningful_len(input: &str) -> usize {
    let mut count = 0usize;
    let mut in_space = true;
    for c in input.chars() {
        if c.is_whitespace() {
            in_space = true;
        } else {
            if in_space && count > 0 {
                count += 1;
            }
            in_space = false;
            count += 1;
        }
    }
    count
}

/// Replace control and other non-printable characters with spaces.
///
/// The Unicode replacement character produced by lossy decoding counts as
/// non-printable.
pub fn strip_non_printable(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c == '\u{FFFD}' || (c.is_control() && !c.is_whitespace()) {
                ' '
            } else {
                c
            }
        })
        .collect()
}

/// Locate the outermost JSON array in a model answer that may carry prose or
/// fences around it.
pub fn extract_json_array(input: &str) -> Option<&str> {
    let start = input.find('[')?;
    let end = input.rfind(']')?;
    (end > start).then(|| &input[start..=end])
}
