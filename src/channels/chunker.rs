//! Outbound message chunking.
//!
//! The chat transport caps message size, so long replies are split into
//! transport-sized pieces. Boundaries prefer, in order:
//! 1. Paragraph breaks (runs of blank lines)
//! 2. Line breaks
//! 3. Hard slicing, only when a single line is still too long
//!
//! Separators stay attached to the piece before them, so concatenating the
//! chunks always reproduces the input exactly. Lengths are counted in
//! characters and slicing never splits a character.

use std::sync::LazyLock;

use regex::Regex;

/// Message size cap of the chat transport, in characters.
pub const DEFAULT_CHUNK_LIMIT: usize = 2000;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("paragraph regex is valid"));

/// Split `text` into chunks of at most `limit` characters.
///
/// A `limit` of zero means [`DEFAULT_CHUNK_LIMIT`]. Text that already fits
/// comes back as a single chunk, even when empty.
pub fn chunk_message(text: &str, limit: usize) -> Vec<String> {
    let limit = if limit == 0 { DEFAULT_CHUNK_LIMIT } else { limit };
    if char_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for block in paragraph_blocks(text) {
        let block_len = char_len(block);
        if block_len > limit {
            flush(&mut chunks, &mut current, &mut current_len);
            chunks.extend(split_oversized_block(block, limit));
            continue;
        }
        if current_len + block_len > limit {
            flush(&mut chunks, &mut current, &mut current_len);
        }
        current.push_str(block);
        current_len += block_len;
    }
    flush(&mut chunks, &mut current, &mut current_len);

    chunks
}

/// Paragraph blocks with their trailing separator attached.
fn paragraph_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut cursor = 0;
    for m in PARAGRAPH_BREAK.find_iter(text) {
        blocks.push(&text[cursor..m.end()]);
        cursor = m.end();
    }
    if cursor < text.len() {
        blocks.push(&text[cursor..]);
    }
    blocks
}

/// Pack the lines of an over-limit block, hard slicing any line that is
/// itself too long.
fn split_oversized_block(block: &str, limit: usize) -> Vec<String> {
    let lines: Vec<&str> = block.split_inclusive('\n').collect();
    if lines.len() <= 1 {
        return hard_slice(block, limit);
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in lines {
        let line_len = char_len(line);
        if line_len > limit {
            flush(&mut chunks, &mut current, &mut current_len);
            chunks.extend(hard_slice(line, limit));
            continue;
        }
        if current_len + line_len > limit {
            flush(&mut chunks, &mut current, &mut current_len);
        }
        current.push_str(line);
        current_len += line_len;
    }
    flush(&mut chunks, &mut current, &mut current_len);

    chunks
}

fn hard_slice(text: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    let mut count = 0;
    for ch in text.chars() {
        piece.push(ch);
        count += 1;
        if count == limit {
            pieces.push(std::mem::take(&mut piece));
            count = 0;
        }
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

fn flush(chunks: &mut Vec<String>, current: &mut String, current_len: &mut usize) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
        *current_len = 0;
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
