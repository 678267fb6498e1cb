//! Token-window text splitting for the long-term store.
//!
//! The embedding model caps inputs at 512 tokens for indexing and 8192 for
//! queries; oversized texts are split into overlapping windows so nothing is
//! silently truncated. Indexer submissions are additionally regrouped so no
//! single batch exceeds ~30 KB of UTF-8.

use std::path::Path;
use tokenizers::Tokenizer;
use tracing::warn;

/// Window size (tokens) for texts being added to the index.
pub const ADD_WINDOW_TOKENS: usize = 512;
/// Window size (tokens) for retrieval queries.
pub const QUERY_WINDOW_TOKENS: usize = 8192;
/// Overlap (tokens) between consecutive windows.
pub const WINDOW_OVERLAP_TOKENS: usize = 100;
/// Upper bound on the UTF-8 size of one indexer batch.
pub const MAX_BATCH_BYTES: usize = 30_000;

/// Splits text into token windows using a HuggingFace tokenizer when one is
/// configured, or a character-window approximation otherwise.
pub struct Chunker {
    tokenizer: Option<Tokenizer>,
}

impl Chunker {
    /// Chunker without a tokenizer: one character counts as one token.
    pub fn approximate() -> Self {
        Self { tokenizer: None }
    }

    /// Load a `tokenizer.json`; falls back to the approximation on failure.
    pub fn from_file(path: &Path) -> Self {
        match Tokenizer::from_file(path) {
            Ok(tokenizer) => Self {
                tokenizer: Some(tokenizer),
            },
            Err(e) => {
                warn!(
                    "failed to load tokenizer from {}: {} — falling back to char windows",
                    path.display(),
                    e
                );
                Self { tokenizer: None }
            }
        }
    }

    /// Split `text` into windows of at most `max_tokens` with
    /// `overlap` shared tokens between consecutive windows.
    pub fn split(&self, text: &str, max_tokens: usize, overlap: usize) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let step = max_tokens.saturating_sub(overlap).max(1);

        if let Some(tokenizer) = &self.tokenizer {
            match tokenizer.encode(text, false) {
                Ok(encoding) => {
                    let ids = encoding.get_ids();
                    if ids.len() <= max_tokens {
                        return vec![text.to_string()];
                    }
                    let mut chunks = Vec::new();
                    let mut start = 0;
                    while start < ids.len() {
                        let end = (start + max_tokens).min(ids.len());
                        match tokenizer.decode(&ids[start..end], true) {
                            Ok(chunk) => chunks.push(chunk),
                            Err(e) => {
                                warn!("tokenizer decode failed: {} — using char windows", e);
                                return char_windows(text, max_tokens, step);
                            }
                        }
                        start += step;
                    }
                    return chunks;
                }
                Err(e) => {
                    warn!("tokenizer encode failed: {} — using char windows", e);
                }
            }
        }

        char_windows(text, max_tokens, step)
    }
}

fn char_windows(text: &str, max_len: usize, step: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + max_len).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }
    chunks
}

/// Regroup texts into batches no larger than `max_bytes` of UTF-8.
/// A single text already larger than the cap is submitted alone.
pub fn regroup_batches(texts: Vec<String>, max_bytes: usize) -> Vec<Vec<String>> {
    let mut batches = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_bytes = 0;

    for text in texts {
        let len = text.len();
        if len >= max_bytes {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
            batches.push(vec![text]);
            continue;
        }
        if current_bytes + len > max_bytes && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += len;
        current.push(text);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = Chunker::approximate();
        assert_eq!(chunker.split("hello", 512, 100), vec!["hello".to_string()]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        let chunker = Chunker::approximate();
        assert!(chunker.split("", 512, 100).is_empty());
    }

    #[test]
    fn long_text_is_windowed_with_overlap() {
        let chunker = Chunker::approximate();
        let text: String = (0..25).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = chunker.split(&text, 10, 3);
        assert!(chunks.len() > 1);
        // Every window is within the cap.
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        // Consecutive windows share the overlap region.
        let first: Vec<char> = chunks[0].chars().collect();
        let second: Vec<char> = chunks[1].chars().collect();
        assert_eq!(&first[first.len() - 3..], &second[..3]);
    }

    #[test]
    fn windows_cover_the_whole_text() {
        let chunker = Chunker::approximate();
        let text: String = std::iter::repeat("甲乙丙丁").take(100).collect();
        let chunks = chunker.split(&text, 64, 16);
        // Strip the overlap from every window after the first and the
        // concatenation reproduces the input.
        let mut rebuilt: String = chunks[0].clone();
        for chunk in &chunks[1..] {
            let chars: Vec<char> = chunk.chars().collect();
            rebuilt.extend(chars[16.min(chars.len())..].iter());
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn regroup_respects_byte_cap() {
        let texts: Vec<String> = (0..10).map(|_| "x".repeat(400)).collect();
        let batches = regroup_batches(texts, 1000);
        assert!(batches.iter().all(|b| b.iter().map(String::len).sum::<usize>() <= 1000));
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 10);
    }

    #[test]
    fn oversized_text_goes_alone() {
        let texts = vec!["a".repeat(50), "b".repeat(5000), "c".repeat(50)];
        let batches = regroup_batches(texts, 1000);
        assert!(batches.iter().any(|b| b.len() == 1 && b[0].len() == 5000));
        // The small texts are not lost.
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn missing_tokenizer_file_falls_back() {
        let chunker = Chunker::from_file(Path::new("/nonexistent/tokenizer.json"));
        assert_eq!(chunker.split("abc", 10, 2), vec!["abc".to_string()]);
    }
}
