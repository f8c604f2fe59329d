//! Character-budget text splitting for the summarization step.
//!
//! Chunk sizes are measured in Unicode scalar values. Each chunk is an exact substring of the
//! input, so concatenating the chunks reconstructs the text byte for byte. Within the budget
//! the splitter prefers to end a chunk right after the last newline, then after the last
//! whitespace, as long as that keeps at least half the budget; otherwise it cuts hard at the
//! budget. The output depends only on the input and the budget, which keeps retries
//! idempotent.

use super::types::ChunkingError;

/// Split `text` into ordered chunks of at most `max_chunk_size` characters.
///
/// Returns an empty vector for empty input.
pub fn split_text(text: &str, max_chunk_size: usize) -> Result<Vec<String>, ChunkingError> {
    if max_chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let window_end = byte_offset_after_chars(rest, max_chunk_size);
        if window_end == rest.len() {
            chunks.push(rest.to_string());
            break;
        }

        let window = &rest[..window_end];
        let cut = preferred_boundary(window, max_chunk_size).unwrap_or(window_end);
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    Ok(chunks)
}

/// Byte offset just past the first `chars` characters, or the full length.
fn byte_offset_after_chars(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}

fn preferred_boundary(window: &str, max_chunk_size: usize) -> Option<usize> {
    let after_newline = window.rfind('\n').map(|offset| offset + 1);
    let after_whitespace = || {
        window
            .char_indices()
            .rev()
            .find(|(_, ch)| ch.is_whitespace())
            .map(|(offset, ch)| offset + ch.len_utf8())
    };

    after_newline
        .filter(|&cut| keeps_half_budget(window, cut, max_chunk_size))
        .or_else(|| {
            after_whitespace().filter(|&cut| keeps_half_budget(window, cut, max_chunk_size))
        })
}

fn keeps_half_budget(window: &str, cut: usize, max_chunk_size: usize) -> bool {
    window[..cut].chars().count() * 2 >= max_chunk_size
}
