//! Overlapping text chunker.
//!
//! Splits document text into windows of at most `chunk_size` characters with
//! `chunk_overlap` characters shared between consecutive windows. Window ends
//! prefer a paragraph boundary, then a sentence boundary, then whitespace,
//! before falling back to a hard character cut.
//!
//! Chunks are never trimmed, so concatenating chunk 0 with every later
//! chunk minus its first `chunk_overlap` characters reproduces the input
//! exactly.

/// Split text into overlapping windows. Sizes are in characters, not bytes,
/// so multi-byte text never splits inside a code point.
///
/// Returns no chunks for empty or whitespace-only input, and never returns
/// an empty chunk otherwise.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if chunk_size == 0 || text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    // Overlap must leave room to advance.
    let overlap = chunk_overlap.min(chunk_size - 1);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let hard_end = (start + chunk_size).min(chars.len());
        if hard_end == chars.len() {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        let end = find_break(&chars, start + overlap + 1, hard_end);
        chunks.push(chars[start..end].iter().collect());
        start = end - overlap;
    }

    chunks
}

/// Pick the best split position in `(min_end, hard_end]`, scanning backwards:
/// paragraph break, then sentence end, then any whitespace, else `hard_end`.
fn find_break(chars: &[char], min_end: usize, hard_end: usize) -> usize {
    if let Some(end) = rscan(chars, min_end, hard_end, is_paragraph_break) {
        return end;
    }
    if let Some(end) = rscan(chars, min_end, hard_end, is_sentence_break) {
        return end;
    }
    if let Some(end) = rscan(chars, min_end, hard_end, |c, i| c[i - 1].is_whitespace()) {
        return end;
    }
    hard_end
}

/// Highest `end` in `[min_end, hard_end]` for which `pred(chars, end)` holds.
fn rscan(
    chars: &[char],
    min_end: usize,
    hard_end: usize,
    pred: impl Fn(&[char], usize) -> bool,
) -> Option<usize> {
    (min_end..=hard_end).rev().find(|&end| pred(chars, end))
}

fn is_paragraph_break(chars: &[char], end: usize) -> bool {
    end >= 2 && chars[end - 1] == '\n' && chars[end - 2] == '\n'
}

fn is_sentence_break(chars: &[char], end: usize) -> bool {
    end >= 2 && chars[end - 1].is_whitespace() && matches!(chars[end - 2], '.' | '!' | '?')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_text("Hello, world!", 100, 20);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(split_text("", 100, 20).is_empty());
        assert!(split_text("   \n\n  ", 100, 20).is_empty());
    }

    #[test]
    fn test_no_chunk_exceeds_size() {
        let text = "word ".repeat(500);
        for chunk in split_text(&text, 80, 16) {
            assert!(chunk.chars().count() <= 80, "oversized chunk: {:?}", chunk);
        }
    }

    #[test]
    fn test_no_empty_chunks() {
        let text = "a\n\n".repeat(200);
        for chunk in split_text(&text, 50, 10) {
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(40), "b".repeat(40));
        let chunks = split_text(&text, 60, 5);
        assert!(chunks[0].ends_with("\n\n"), "first chunk: {:?}", chunks[0]);
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        let text = "First sentence here. Second sentence follows and keeps going for a while.";
        let chunks = split_text(text, 40, 5);
        assert!(
            chunks[0].ends_with(". "),
            "expected sentence split, got: {:?}",
            chunks[0]
        );
    }

    #[test]
    fn test_reconstruction_removes_fixed_overlap() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let overlap = 16;
        let chunks = split_text(&text, 90, overlap);
        assert!(chunks.len() > 1);

        let mut rebuilt: String = chunks[0].clone();
        for chunk in &chunks[1..] {
            rebuilt.extend(chunk.chars().skip(overlap));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_consecutive_chunks_share_overlap() {
        let text = "alpha beta gamma delta ".repeat(30);
        let overlap = 10;
        let chunks = split_text(&text, 60, overlap);
        for pair in chunks.windows(2) {
            let tail: String = pair[0]
                .chars()
                .skip(pair[0].chars().count() - overlap)
                .collect();
            let head: String = pair[1].chars().take(overlap).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_trailing_text_not_dropped() {
        let text = format!("{} tail", "x".repeat(95));
        let chunks = split_text(&text, 50, 10);
        let last = chunks.last().unwrap();
        assert!(last.ends_with("tail"));
    }

    #[test]
    fn test_multibyte_text_safe() {
        let text = "한국어 문장입니다. ".repeat(40);
        let chunks = split_text(&text, 30, 8);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 30);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta. Gamma delta. Epsilon zeta. ".repeat(20);
        assert_eq!(split_text(&text, 70, 12), split_text(&text, 70, 12));
    }

    #[test]
    fn test_hard_cut_on_unbroken_text() {
        let text = "z".repeat(250);
        let chunks = split_text(&text, 100, 20);
        assert!(chunks.len() >= 3);
        assert_eq!(chunks[0].len(), 100);
    }
}
