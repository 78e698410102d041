//! Grade 1 (uncontracted) Braille transliteration into Unicode Braille cells.
//!
//! Purely local and deterministic. Each source line is mapped character by
//! character, then word-wrapped to the embosser line width. Braille cells and
//! spaces map to themselves, so transliterating the output again is a no-op.

use crate::progress::StageProgress;
use tracing::debug;

/// Capital indicator, emitted before an uppercase letter.
pub const CAPITAL_SIGN: char = '⠠';
/// Numeric indicator, emitted before each digit.
pub const NUMERIC_SIGN: char = '⠼';

/// a–z in order.
const LETTERS: [char; 26] = [
    '⠁', '⠃', '⠉', '⠙', '⠑', '⠋', '⠛', '⠓', '⠊', '⠚', '⠅', '⠇', '⠍', '⠝', '⠕', '⠏', '⠟', '⠗',
    '⠎', '⠞', '⠥', '⠧', '⠺', '⠭', '⠽', '⠵',
];

fn punctuation(c: char) -> Option<&'static str> {
    Some(match c {
        ',' => "⠂",
        ';' => "⠆",
        ':' => "⠒",
        '.' => "⠲",
        '!' => "⠖",
        '?' => "⠦",
        '\'' => "⠄",
        '-' => "⠤",
        '"' => "⠶",
        '(' => "⠐⠣",
        ')' => "⠐⠜",
        '[' => "⠨⠣",
        ']' => "⠨⠜",
        '/' => "⠸⠌",
        '&' => "⠈⠯",
        '*' => "⠐⠔",
        '@' => "⠈⠁",
        '#' => "⠸⠹",
        '%' => "⠨⠴",
        '+' => "⠐⠖",
        '=' => "⠐⠶",
        '$' => "⠈⠎",
        '_' => "⠨⠤",
        _ => return None,
    })
}

/// Map one line of text to Braille cells without wrapping.
pub fn transliterate_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len() * 3);
    for c in line.chars() {
        if c.is_ascii_lowercase() {
            out.push(LETTERS[(c as u8 - b'a') as usize]);
        } else if c.is_ascii_uppercase() {
            out.push(CAPITAL_SIGN);
            out.push(LETTERS[(c as u8 - b'A') as usize]);
        } else if c.is_ascii_digit() {
            out.push(NUMERIC_SIGN);
            // 1–9 → a–i, 0 → j
            let idx = match c {
                '0' => 9,
                d => (d as u8 - b'1') as usize,
            };
            out.push(LETTERS[idx]);
        } else if let Some(cells) = punctuation(c) {
            out.push_str(cells);
        } else {
            out.push(c);
        }
    }
    out
}

/// Word-wrap a transliterated line to `width` cells. Words wider than a line
/// are split hard. An empty input yields one empty line.
pub fn wrap_cells(line: &str, width: usize) -> Vec<String> {
    if line.chars().count() <= width {
        return vec![line.to_string()];
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in line.split(' ').filter(|w| !w.is_empty()) {
        let word_len = word.chars().count();

        if word_len > width {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let cells: Vec<char> = word.chars().collect();
            let mut pieces = cells.chunks(width).peekable();
            while let Some(piece) = pieces.next() {
                if pieces.peek().is_some() {
                    lines.push(piece.iter().collect());
                } else {
                    current = piece.iter().collect();
                    current_len = piece.len();
                }
            }
            continue;
        }

        let needed = if current_len == 0 {
            word_len
        } else {
            current_len + 1 + word_len
        };
        if needed > width {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        } else {
            if current_len > 0 {
                current.push(' ');
            }
            current.push_str(word);
            current_len = needed;
        }
    }

    if current_len > 0 || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Output of [`Transliterator::transliterate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrailleResult {
    pub braille_text: String,
    /// `ceil(line_count / lines_per_page)`; 0 for empty output.
    pub page_count: usize,
    pub line_count: usize,
}

/// Text → wrapped Grade 1 Braille with a page estimate.
#[derive(Debug, Clone, Copy)]
pub struct Transliterator {
    line_width: usize,
    lines_per_page: usize,
}

impl Default for Transliterator {
    fn default() -> Self {
        Self::new(40, 25)
    }
}

impl Transliterator {
    pub fn new(line_width: usize, lines_per_page: usize) -> Self {
        Self {
            line_width: line_width.max(1),
            lines_per_page: lines_per_page.max(1),
        }
    }

    pub async fn transliterate(&self, text: &str, progress: &dyn StageProgress) -> BrailleResult {
        let source: Vec<&str> = text.lines().collect();
        let total = source.len();
        let mut out: Vec<String> = Vec::with_capacity(total);

        for (i, line) in source.iter().enumerate() {
            let cells = transliterate_line(line);
            out.extend(wrap_cells(&cells, self.line_width));
            progress.on_progress((i + 1) as f64 / total as f64).await;
        }
        if total == 0 {
            progress.on_progress(1.0).await;
        }

        let line_count = out.len();
        let page_count = line_count.div_ceil(self.lines_per_page);
        debug!(
            "Transliterated {} source lines into {} Braille lines, {} pages",
            total, line_count, page_count
        );

        BrailleResult {
            braille_text: out.join("\n"),
            page_count,
            line_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{FnProgress, NoopProgress};
    use std::sync::{Arc, Mutex};

    #[test]
    fn hello_world_capitalised() {
        assert_eq!(transliterate_line("Hello World"), "⠠⠓⠑⠇⠇⠕ ⠠⠺⠕⠗⠇⠙");
    }

    #[test]
    fn digits_each_get_numeric_sign() {
        assert_eq!(transliterate_line("10"), "⠼⠁⠼⠚");
        assert_eq!(transliterate_line("a9"), "⠁⠼⠊");
    }

    #[test]
    fn punctuation_and_passthrough() {
        assert_eq!(transliterate_line("Hi, you!"), "⠠⠓⠊⠂ ⠽⠕⠥⠖");
        assert_eq!(transliterate_line("(x)"), "⠐⠣⠭⠐⠜");
        assert_eq!(transliterate_line("é~"), "é~");
    }

    #[test]
    fn output_is_a_fixed_point() {
        let once = transliterate_line("Page 12: The End.");
        assert_eq!(transliterate_line(&once), once);
    }

    #[test]
    fn wraps_at_word_boundaries() {
        let line = transliterate_line(&"word ".repeat(20));
        let wrapped = wrap_cells(&line, 40);
        assert!(wrapped.len() > 1);
        for l in &wrapped {
            assert!(l.chars().count() <= 40, "{l}");
            assert!(!l.starts_with(' ') && !l.ends_with(' '));
        }
        // No word was cut.
        assert!(wrapped.iter().all(|l| l.split(' ').all(|w| w == "⠺⠕⠗⠙")));
    }

    #[test]
    fn long_word_is_hard_split() {
        let line = "⠁".repeat(95);
        let wrapped = wrap_cells(&line, 40);
        let lens: Vec<usize> = wrapped.iter().map(|l| l.chars().count()).collect();
        assert_eq!(lens, vec![40, 40, 15]);
    }

    #[test]
    fn long_word_tail_shares_line_with_next_word() {
        let line = format!("{} ⠃⠃", "⠁".repeat(45));
        assert_eq!(
            wrap_cells(&line, 40),
            vec!["⠁".repeat(40), format!("{} ⠃⠃", "⠁".repeat(5))]
        );
    }

    #[tokio::test]
    async fn page_count_formula() {
        let t = Transliterator::new(40, 25);
        let text = vec!["a"; 26].join("\n");
        let r = t.transliterate(&text, &NoopProgress).await;
        assert_eq!(r.line_count, 26);
        assert_eq!(r.page_count, 2);

        let r = t.transliterate("", &NoopProgress).await;
        assert_eq!(r.line_count, 0);
        assert_eq!(r.page_count, 0);
        assert_eq!(r.braille_text, "");
    }

    #[tokio::test]
    async fn empty_lines_are_preserved() {
        let r = Transliterator::default()
            .transliterate("ab\n\ncd", &NoopProgress)
            .await;
        assert_eq!(r.braille_text, "⠁⠃\n\n⠉⠙");
        assert_eq!(r.line_count, 3);
    }

    #[tokio::test]
    async fn progress_after_each_line() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = FnProgress::new(move |f| sink.lock().unwrap().push(f));

        Transliterator::default()
            .transliterate("a\nb\nc\nd", &progress)
            .await;
        assert_eq!(*seen.lock().unwrap(), vec![0.25, 0.5, 0.75, 1.0]);
    }
}
