//! Hierarchical, markdown-aware, Unicode-safe text chunker.
//!
//! Splits a document into bounded text spans for embedding and retrieval.
//! Purely a function of its input: no I/O, no async, safe to unit test
//! exhaustively.

use once_cell::sync::Lazy;
use regex::Regex;

/// A single chunk produced by [`chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub start_index: usize,
    pub end_index: usize,
    pub token_count: usize,
}

/// Options controlling [`chunk`].
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: 2048,
            overlap: 0,
        }
    }
}

const MIN_CHUNK_LEN: usize = 50;
const OCR_GARBAGE_RUN: usize = 200;

static HEADER_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n#{1,6}[ \t]").unwrap());
static HEADER_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s").unwrap());
static LIST_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([-*>|]|\d+\.\s)").unwrap());
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\n+").unwrap());
static SENTENCE_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([.!?])(\s+)").unwrap());
static CLAUSE_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([;,])(\s+)").unwrap());
static NEWLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static OCR_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S{200,}").unwrap());
static BLANK_LINE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Chunk `text` into ordered, bounded spans.
///
/// `normalize` is an optional caller-supplied pre-pass (for example
/// [`normalize_markdown`]); pass `None` to skip it.
pub fn chunk(text: &str, opts: &ChunkOptions, normalize: Option<fn(&str) -> String>) -> Vec<TextChunk> {
    let normalized = match normalize {
        Some(f) => f(text),
        None => text.to_string(),
    };

    let unwrapped = unwrap_hard_breaks(&normalized);
    let pieces = split_recursive(&unwrapped, opts.chunk_size, 0);
    let merged = merge_pieces(pieces, opts.chunk_size);
    let overlapped = if opts.overlap > 0 {
        apply_overlap(merged, opts.overlap)
    } else {
        merged
    };

    let filtered: Vec<String> = overlapped
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| s.chars().count() >= MIN_CHUNK_LEN)
        .filter(|s| !OCR_RUN.is_match(s))
        .collect();

    recover_offsets(&unwrapped, filtered)
}

/// Optional markdown cleanup hook: collapses 3+ blank lines down to one,
/// trims trailing whitespace per line. Does not alter headings or code fences.
pub fn normalize_markdown(text: &str) -> String {
    let collapsed = BLANK_LINE_RUN.replace_all(text, "\n\n");
    collapsed
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Step 2: replace every single `\n` with a space unless it borders a
/// structural break (blank neighbor, or the next line is a heading/list item).
fn unwrap_hard_breaks(text: &str) -> String {
    // A `\n\n+` run is left untouched; only a lone `\n` between two non-blank,
    // non-structural lines gets unwrapped. We split on single-vs-double by
    // walking line boundaries explicitly since blank lines must be preserved.
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() == 1 {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    out.push_str(lines[0]);
    for i in 1..lines.len() {
        let prev = lines[i - 1];
        let cur = lines[i];
        let structural =
            prev.trim().is_empty() || cur.trim().is_empty() || HEADER_LINE.is_match(cur) || LIST_LINE.is_match(cur);
        if structural {
            out.push('\n');
        } else {
            out.push(' ');
        }
        out.push_str(cur);
    }
    out
}

/// Split-point levels tried in order, outermost (largest structural unit) first.
fn apply_level(text: &str, level: usize) -> Vec<String> {
    match level {
        0 => split_before(text, &HEADER_BOUNDARY),
        1 => split_plain(text, &BLANK_RUN),
        2 => split_keep_left(text, &SENTENCE_BOUNDARY),
        3 => split_keep_left(text, &CLAUSE_BOUNDARY),
        4 => split_plain(text, &NEWLINE),
        5 => split_plain(text, &WHITESPACE),
        _ => vec![text.to_string()],
    }
}

const LEVEL_COUNT: usize = 6;

fn split_recursive(text: &str, chunk_size: usize, level: usize) -> Vec<String> {
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }
    if level >= LEVEL_COUNT {
        return vec![text.to_string()];
    }
    let parts = apply_level(text, level);
    if parts.len() <= 1 {
        return split_recursive(text, chunk_size, level + 1);
    }
    parts
        .into_iter()
        .flat_map(|p| split_recursive(&p, chunk_size, 0))
        .collect()
}

/// Split right before each match (zero-width "before" semantics); the
/// matched text stays attached to the piece that follows it.
fn split_before(text: &str, re: &Regex) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut last = 0usize;
    for m in re.find_iter(text) {
        if m.start() > last {
            pieces.push(text[last..m.start()].to_string());
            last = m.start();
        }
    }
    let tail = text[last..].to_string();
    if !tail.is_empty() {
        pieces.push(tail);
    }
    if pieces.is_empty() {
        vec![text.to_string()]
    } else {
        pieces
    }
}

/// Ordinary split that discards the separator (blank runs, bare newlines, whitespace).
fn split_plain(text: &str, re: &Regex) -> Vec<String> {
    re.split(text).map(|s| s.to_string()).filter(|s| !s.is_empty()).collect()
}

/// Split right after `group(1)` of each match, keeping that group attached
/// to the left piece and discarding the rest of the match (the whitespace run).
fn split_keep_left(text: &str, re: &Regex) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut last = 0usize;
    for caps in re.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let kept = caps.get(1).unwrap();
        pieces.push(text[last..kept.end()].to_string());
        last = whole.end();
    }
    let tail = text[last..].to_string();
    if !tail.is_empty() {
        pieces.push(tail);
    }
    pieces
}

/// Step 4: merge adjacent pieces greedily while the combination stays within `chunk_size`.
fn merge_pieces(pieces: Vec<String>, chunk_size: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        if current.is_empty() {
            current = piece;
            continue;
        }
        let sep = join_separator(&current, &piece);
        let combined_len = current.chars().count() + sep.chars().count() + piece.chars().count();
        if combined_len <= chunk_size {
            current.push_str(sep);
            current.push_str(&piece);
        } else {
            out.push(std::mem::take(&mut current));
            current = piece;
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn join_separator(left: &str, right: &str) -> &'static str {
    if left.ends_with('\n') || right.starts_with('#') {
        "\n"
    } else {
        " "
    }
}

/// Step 5: prefix every chunk after the first with the tail of its predecessor.
fn apply_overlap(chunks: Vec<String>, overlap: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.into_iter().enumerate() {
        if i == 0 {
            out.push(chunk);
            continue;
        }
        let prev = out.last().unwrap();
        let tail = extract_overlap_tail(prev, overlap);
        if tail.is_empty() {
            out.push(chunk);
            continue;
        }
        let sep = join_separator(&tail, &chunk);
        let mut joined = tail;
        joined.push_str(sep);
        joined.push_str(&chunk);
        out.push(joined);
    }
    out
}

/// Take up to `max_len` trailing characters of `text`, snapped forward to the
/// next whitespace boundary so overlap never starts mid-word.
fn extract_overlap_tail(text: &str, max_len: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return text.to_string();
    }
    let start = chars.len() - max_len;
    let mut idx = start;
    while idx < chars.len() && !chars[idx].is_whitespace() {
        idx += 1;
    }
    while idx < chars.len() && chars[idx].is_whitespace() {
        idx += 1;
    }
    if idx >= chars.len() {
        return chars[start..].iter().collect();
    }
    chars[idx..].iter().collect()
}

/// Step 7: locate each surviving chunk's offset in the unwrapped text.
fn recover_offsets(haystack: &str, chunks: Vec<String>) -> Vec<TextChunk> {
    let mut out = Vec::with_capacity(chunks.len());
    let mut cursor = 0usize;
    for text in chunks {
        let needle_len = text.chars().take(80).map(char::len_utf8).sum::<usize>().min(text.len());
        let needle = &text[..needle_len];
        let search_from = cursor.saturating_sub(10).min(haystack.len());
        let start = haystack[search_from..]
            .find(needle)
            .map(|p| search_from + p)
            .or_else(|| haystack.find(needle))
            .unwrap_or(cursor);
        let end = start + text.len();
        cursor = end;
        let token_count = text.chars().count();
        out.push(TextChunk {
            text,
            start_index: start,
            end_index: end,
            token_count,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk("", &ChunkOptions::default(), None).is_empty());
    }

    #[test]
    fn short_text_below_min_len_is_dropped() {
        let result = chunk("short", &ChunkOptions::default(), None);
        assert!(result.is_empty());
    }

    #[test]
    fn single_long_paragraph_survives_as_one_chunk() {
        let text = "word ".repeat(40);
        let result = chunk(&text, &ChunkOptions::default(), None);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].start_index, 0);
    }

    #[test]
    fn start_indices_are_strictly_increasing() {
        let mut body = String::new();
        for i in 0..30 {
            body.push_str(&format!("This is paragraph number {i} with enough padding text to matter.\n\n"));
        }
        let opts = ChunkOptions { chunk_size: 200, overlap: 0 };
        let result = chunk(&body, &opts, None);
        assert!(result.len() > 1);
        for w in result.windows(2) {
            assert!(w[1].start_index > w[0].start_index);
        }
    }

    #[test]
    fn chunks_never_exceed_chunk_size() {
        let body = "Sentence one is here. ".repeat(200);
        let opts = ChunkOptions { chunk_size: 300, overlap: 0 };
        let result = chunk(&body, &opts, None);
        for c in &result {
            assert!(c.text.chars().count() <= 300, "{} exceeds 300", c.text.len());
        }
    }

    #[test]
    fn heading_boundaries_are_respected() {
        let body = format!(
            "# Heading One\n\n{}\n\n# Heading Two\n\n{}",
            "alpha beta gamma delta epsilon zeta eta theta iota kappa ".repeat(5),
            "lambda mu nu xi omicron pi rho sigma tau upsilon ".repeat(5)
        );
        let opts = ChunkOptions { chunk_size: 150, overlap: 0 };
        let result = chunk(&body, &opts, None);
        assert!(result.iter().any(|c| c.text.contains("Heading One")));
        assert!(result.iter().any(|c| c.text.contains("Heading Two")));
    }

    #[test]
    fn overlap_prefixes_subsequent_chunks() {
        let body = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi omicron pi rho sigma tau upsilon phi chi psi omega "
            .repeat(6);
        let opts = ChunkOptions { chunk_size: 120, overlap: 20 };
        let result = chunk(&body, &opts, None);
        assert!(result.len() > 1);
    }

    #[test]
    fn ocr_garbage_run_is_filtered() {
        let garbage = "x".repeat(250);
        let body = format!("A perfectly normal sentence with enough length to pass the floor. {garbage} And more normal text after it to pad this out nicely.");
        let opts = ChunkOptions { chunk_size: 4000, overlap: 0 };
        let result = chunk(&body, &opts, None);
        assert!(result.iter().all(|c| !c.text.contains(&garbage)));
    }

    #[test]
    fn unicode_text_is_preserved_byte_for_byte_within_chunks() {
        let body = "これはテスト文章です。".repeat(10) + &"さらに追加のテキストをここに置きます。".repeat(10);
        let opts = ChunkOptions { chunk_size: 80, overlap: 0 };
        let result = chunk(&body, &opts, None);
        assert!(!result.is_empty());
        for c in &result {
            assert_eq!(c.text, c.text.trim());
        }
    }

    #[test]
    fn normalize_markdown_collapses_excess_blank_lines() {
        let text = "para one\n\n\n\n\npara two";
        let normalized = normalize_markdown(text);
        assert_eq!(normalized, "para one\n\npara two");
    }

    #[test]
    fn list_items_are_not_unwrapped_into_their_predecessor() {
        let text = "Intro line.\n- item one\n- item two";
        let unwrapped = unwrap_hard_breaks(text);
        assert!(unwrapped.contains("\n- item one"));
        assert!(unwrapped.contains("\n- item two"));
    }

    #[test]
    fn bare_single_newline_is_unwrapped_to_space() {
        let text = "This sentence continues\non the next physical line only.";
        let unwrapped = unwrap_hard_breaks(text);
        assert!(!unwrapped.contains('\n'));
    }
}
