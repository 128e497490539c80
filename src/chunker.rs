//! Recursive, boundary-preferring text splitter.
//!
//! Text is split on the coarsest separator present (paragraph break, line
//! break, space, then single characters). Pieces are greedily merged back into
//! chunks of at most `chunk_size` characters, and each new chunk starts with
//! up to `chunk_overlap` characters of trailing pieces from the previous one.
//! Lengths are counted in `char`s.
use crate::config::{ConfigError, validate_chunking};

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits text into overlapping windows. Construct once at startup.
#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// Fails when `chunk_overlap >= chunk_size` or `chunk_size == 0`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        validate_chunking(chunk_size, chunk_overlap)?;
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into ordered chunks. Whitespace-only input yields none.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // Pick the first separator that occurs in the text; "" always matches.
        let (idx, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, s)| s.is_empty() || text.contains(**s))
            .map(|(i, s)| (i, *s))
            .unwrap_or((separators.len() - 1, ""));
        let finer = &separators[idx + 1..];

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                if let Some(chunk) = trimmed(piece) {
                    chunks.push(chunk);
                }
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }
        chunks
    }

    /// Greedily pack pieces into chunks, carrying trailing pieces forward
    /// as overlap.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: std::collections::VecDeque<(&str, usize)> =
            std::collections::VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                if let Some(chunk) = join(&window) {
                    chunks.push(chunk);
                }
                // Drop leading pieces until the carried-over tail fits the
                // overlap budget and leaves room for the incoming piece.
                while total > self.chunk_overlap
                    || (total > 0 && total + len > self.chunk_size)
                {
                    match window.pop_front() {
                        Some((_, front_len)) => total -= front_len,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        if let Some(chunk) = join(&window) {
            chunks.push(chunk);
        }
        chunks
    }
}

/// Split so that every piece after the first begins with `separator`.
/// An empty separator splits into single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(&text[start..pos]);
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    // Consecutive separators leave pieces that are just the separator; fold
    // them into the following piece so nothing is lost and none is empty.
    let mut merged: Vec<&'a str> = Vec::with_capacity(pieces.len());
    let mut carry_start: Option<usize> = None;
    for piece in pieces {
        let offset = piece.as_ptr() as usize - text.as_ptr() as usize;
        if piece == separator {
            carry_start.get_or_insert(offset);
            continue;
        }
        let from = carry_start.take().unwrap_or(offset);
        merged.push(&text[from..offset + piece.len()]);
    }
    if let Some(from) = carry_start {
        merged.push(&text[from..]);
    }
    merged
}

fn join(window: &std::collections::VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = window.iter().map(|(p, _)| *p).collect();
    trimmed(&joined)
}

fn trimmed(text: &str) -> Option<String> {
    let t = text.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(size: usize, overlap: usize) -> TextSplitter {
        TextSplitter::new(size, overlap).unwrap()
    }

    #[test]
    fn test_overlap_must_be_smaller() {
        assert!(TextSplitter::new(100, 100).is_err());
        assert!(TextSplitter::new(100, 150).is_err());
        assert!(TextSplitter::new(0, 0).is_err());
        assert!(TextSplitter::new(100, 0).is_ok());
    }

    #[test]
    fn test_split_empty_text() {
        assert!(splitter(500, 50).split("").is_empty());
    }

    #[test]
    fn test_whitespace_only() {
        assert!(splitter(500, 50).split("   \n\n   \n\n   ").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = splitter(500, 50).split("Paragraph 1\n\nParagraph 2\n\nParagraph 3");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "Paragraph 1\n\nParagraph 2\n\nParagraph 3");
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let a = "a".repeat(150);
        let b = "b".repeat(150);
        let c = "c".repeat(150);
        let text = format!("{a}\n\n{b}\n\n{c}");
        let chunks = splitter(200, 20).split(&text);
        assert_eq!(chunks, vec![a, b, c]);
    }

    #[test]
    fn test_never_exceeds_chunk_size() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(80)
            + "\n\n"
            + &"Lorem ipsum dolor sit amet\n".repeat(40)
            + &"x".repeat(700);
        for (size, overlap) in [(50, 0), (100, 20), (200, 20), (333, 100)] {
            let chunks = splitter(size, overlap).split(&text);
            assert!(!chunks.is_empty());
            for chunk in &chunks {
                assert!(
                    chunk.chars().count() <= size,
                    "chunk of {} chars exceeds {size}",
                    chunk.chars().count()
                );
            }
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let words: Vec<String> = (0..200).map(|i| format!("w{i:03}")).collect();
        let text = words.join(" ");
        let chunks = splitter(100, 20).split(&text);
        assert!(chunks.len() > 2);

        for pair in chunks.windows(2) {
            // The next chunk starts with words that ended the previous one.
            let first_word = pair[1].split(' ').next().unwrap();
            assert!(
                pair[0].contains(first_word),
                "expected {first_word} to be carried over from {:?}",
                pair[0]
            );
            let tail = pair[0].len() - pair[0].find(first_word).unwrap();
            assert!(tail <= 20 + 1, "overlap of {tail} exceeds budget");
        }
    }

    #[test]
    fn test_zero_overlap_no_repeats() {
        let words: Vec<String> = (0..100).map(|i| format!("w{i:03}")).collect();
        let text = words.join(" ");
        let chunks = splitter(60, 0).split(&text);
        let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.split(' ')).collect();
        assert_eq!(rejoined.len(), 100);
    }

    #[test]
    fn test_long_word_falls_back_to_characters() {
        let text = "y".repeat(250);
        let chunks = splitter(100, 10).split(&text);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
    }

    #[test]
    fn test_multibyte_characters() {
        let text = "これは日本語のテストです。".repeat(100);
        let chunks = splitter(50, 5).split(&text);
        assert!(chunks.len() >= 2);
        for chunk in chunks {
            assert!(!chunk.is_empty());
            assert!(chunk.chars().count() <= 50);
        }
    }

    #[test]
    fn test_split_keeping_separator() {
        assert_eq!(
            split_keeping_separator("a\n\nb\n\n\n\nc", "\n\n"),
            vec!["a", "\n\nb", "\n\n\n\nc"]
        );
        assert_eq!(split_keeping_separator("héllo", ""), vec!["h", "é", "l", "l", "o"]);
    }
}
