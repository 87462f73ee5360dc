//! Fixed-window text chunker with overlap.
//!
//! Splits source text into windows of at most `max_chars` characters where
//! consecutive windows share up to `overlap_chars` characters. A window that
//! would end mid-word backs off to the last whitespace inside it, as long as
//! that still leaves more than `overlap_chars` characters so the next window
//! always starts further along. The next window starts `overlap_chars`
//! before the previous end, moved forward to a word boundary when one exists
//! inside the overlap.
//!
//! Lengths are counted in `char`s, never bytes, so multi-byte text is never
//! sliced inside a code point.

/// Split `text` into overlapping windows.
///
/// Returns pieces in source order; their position in the returned vector is
/// the chunk index. Whitespace-only text yields no chunks.
///
/// Callers must ensure `overlap_chars < max_chars` (enforced by config
/// validation); a larger overlap is clamped.
pub fn chunk_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    if text.trim().is_empty() || max_chars == 0 {
        return Vec::new();
    }
    let overlap = overlap_chars.min(max_chars - 1);

    let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let byte_at = |i: usize| if i >= n { text.len() } else { offsets[i] };

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let mut end = (start + max_chars).min(n);

        // Back off to a whitespace boundary when cutting through a word
        if end < n && !chars[end].is_whitespace() {
            if let Some(ws) = (start + 1..end).rev().find(|&i| chars[i].is_whitespace()) {
                if ws > start + overlap {
                    end = ws;
                }
            }
        }

        let piece = text[byte_at(start)..byte_at(end)].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end >= n {
            break;
        }

        // Start the next window on a word boundary inside the overlap
        let mut next = end.saturating_sub(overlap).max(start + 1);
        if !chars[next - 1].is_whitespace() {
            if let Some(ws) = (next..end).find(|&i| chars[i].is_whitespace()) {
                next = ws;
            }
        }
        start = next;
    }

    chunks
}
