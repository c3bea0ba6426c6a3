//! Splitting of large serialized payloads into size-bounded parts.
//!
//! The bound is expressed in bytes of UTF-8. A chunk never ends in the middle
//! of a character, so a chunk may be shorter than the bound even when more
//! input follows. Concatenating the chunks in order always reproduces the
//! input exactly.

use std::num::NonZeroUsize;

/// Split `input` into ordered chunks of at most `max_bytes` bytes each.
///
/// - Empty input yields no chunks.
/// - Input no longer than `max_bytes` yields exactly one chunk, the input.
/// - A character wider than `max_bytes` (only possible when the bound is
///   below 4) is emitted as a chunk of its own, so progress is always made.
pub fn chunk_str(input: &str, max_bytes: NonZeroUsize) -> Vec<&str> {
    let max = max_bytes.get();
    let mut chunks = Vec::with_capacity(input.len().div_ceil(max));
    let mut rest = input;

    while !rest.is_empty() {
        let mut end = rest.len().min(max);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }

    chunks
}
