//! Prompts sent to the AI completion service.
//!
//! All prompt text lives here so it can be changed without touching chunking,
//! retry, or parsing logic, and so tests can inspect it directly.

/// Instruction for cleaning one chunk of extracted text.
pub const CLEANUP_INSTRUCTION: &str = r#"You are preparing extracted document text for Braille transcription.

Fix the text below:
- Correct OCR errors (misread letters, broken or merged words, stray symbols)
- Normalise formatting: rejoin words hyphenated across line breaks, remove page headers, footers and page numbers, keep paragraph breaks as blank lines
- Preserve the meaning and wording; do not summarise, translate, or add content

Return ONLY the cleaned text. No commentary, no markdown fences."#;

/// Minimal request used to detect an exhausted quota before real work.
pub const PROBE_PROMPT: &str = "Reply with OK.";

/// Build the cleanup prompt for one chunk.
pub fn cleanup_prompt(chunk: &str) -> String {
    format!("{CLEANUP_INSTRUCTION}\n\nTEXT:\n\"\"\"\n{chunk}\n\"\"\"")
}

/// Build the validation prompt for a batch of `(line_number, original,
/// braille)` triples.
///
/// The model is asked for a strict JSON array so the answer can be parsed
/// without heuristics.
pub fn validation_prompt(lines: &[(usize, &str, &str)]) -> String {
    let mut body = String::new();
    for (n, original, braille) in lines {
        body.push_str(&format!(
            "Line {n}:\n  original: {original}\n  braille:  {braille}\n"
        ));
    }
    format!(
        r#"You are a Grade 1 (uncontracted) Unicode Braille proofreader.

For each numbered line, compare the original text with its Braille transcription and score the transcription accuracy from 0 to 100. List any problems you find (wrong cells, missing capital or number indicators, dropped characters).

{body}
Respond with ONLY a JSON array, one object per line, in this exact form:
[{{"line": <line number>, "accuracy": <0-100>, "issues": ["..."]}}]"#
    )
}
