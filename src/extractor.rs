//! Cleanup of raw model output into code.
//!
//! Models are asked for code only but routinely wrap it in markdown fences or
//! surround it with prose. [`extract`] is a best-effort cleanup: it never
//! fails and never returns less than the trimmed input when its heuristics
//! would leave almost nothing behind.

use once_cell::sync::Lazy;
use regex::Regex;

/// Fenced block: optional language tag, then a newline, then a non-greedy body.
static CODE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:\w+)?\s*\n(.*?)```").expect("code block regex"));

const SKIP_PHRASES: &[&str] = &[
    "here is",
    "here's",
    "this code",
    "to run",
    "to use",
    "to save",
    "you can",
    "simply",
    "make sure",
    "note that",
    "explanation",
    "how to",
    "save this",
    "run this",
    "execute",
    "to get started",
];

const CODE_SIGNALS: &[&str] = &[
    "def ",
    "class ",
    "function ",
    "const ",
    "let ",
    "var ",
    "import ",
    "from ",
    "#include",
    "public ",
    "private ",
    "fn ",
    "func ",
    "package ",
    "using ",
    "namespace ",
];

/// Below this many characters the line filter is considered to have
/// destroyed the output and the raw text is returned instead.
const MIN_FILTERED_LEN: usize = 10;

/// Extracts code from raw model output.
///
/// The language is accepted for symmetry with the generation call; the
/// heuristics are the same for every language.
pub fn extract(raw_text: &str, _language: &str) -> String {
    if let Some(block) = longest_fenced_block(raw_text) {
        return block.trim().to_string();
    }

    let filtered = strip_explanations(raw_text);
    if filtered.chars().count() < MIN_FILTERED_LEN {
        return raw_text.trim().to_string();
    }
    filtered
}

/// Returns the longest fenced block body; the first one wins on ties.
fn longest_fenced_block(raw_text: &str) -> Option<&str> {
    let mut best: Option<(&str, usize)> = None;
    for caps in CODE_BLOCK_RE.captures_iter(raw_text) {
        let Some(body) = caps.get(1) else { continue };
        let len = body.as_str().chars().count();
        if best.is_none_or(|(_, best_len)| len > best_len) {
            best = Some((body.as_str(), len));
        }
    }
    best.map(|(body, _)| body)
}

fn strip_explanations(raw_text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    for line in raw_text.split('\n') {
        if kept.is_empty() && line.trim().is_empty() {
            continue;
        }
        if !is_explanation(line) {
            kept.push(line);
        }
    }
    kept.join("\n").trim().to_string()
}

fn is_explanation(line: &str) -> bool {
    let lower = line.trim().to_lowercase();
    SKIP_PHRASES.iter().any(|phrase| lower.contains(phrase))
        && !CODE_SIGNALS.iter().any(|signal| line.contains(signal))
}
