//! Recursive character text splitter.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters,
//! with `chunk_overlap` characters carried over between neighbours. The
//! splitter prefers coarse boundaries and only falls back to finer ones
//! when a piece is still too long:
//!
//! ```text
//! "\n\n"  paragraphs
//!   "\n"  lines
//!    " "  words
//!     ""  characters (hard split)
//! ```
//!
//! Lengths are measured in `char`s, never bytes, so multi-byte text is
//! never cut inside a code point.
//!
//! Each chunk receives a random UUID and a SHA-256 hash of its text; chunks
//! whose hash was already emitted for the same document are dropped.

use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

use crate::models::{Chunk, Document};

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Split every document into chunks, keeping each document's metadata.
pub fn chunk_documents(docs: &[Document], chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for (doc_index, doc) in docs.iter().enumerate() {
        let mut seen = HashSet::new();
        let mut chunk_index = 0;
        for piece in split_text(&doc.page_content, chunk_size, chunk_overlap) {
            let hash = hash_text(&piece);
            if !seen.insert(hash.clone()) {
                continue;
            }
            chunks.push(Chunk {
                id: Uuid::new_v4().to_string(),
                document_index: doc_index,
                chunk_index,
                text: piece,
                hash,
                metadata: doc.metadata.clone(),
            });
            chunk_index += 1;
        }
    }

    chunks
}

/// Split text into pieces of at most `chunk_size` chars with overlap.
///
/// Whitespace-only input yields no pieces.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size.saturating_sub(1));
    split_recursive(text, &SEPARATORS, chunk_size, chunk_overlap)
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    // Pick the coarsest separator that actually occurs in the text.
    let (sep_pos, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, sep)| sep.is_empty() || text.contains(*sep))
        .map(|(i, sep)| (i, *sep))
        .unwrap_or((separators.len().saturating_sub(1), ""));
    let finer = &separators[(sep_pos + 1).min(separators.len())..];

    let splits: Vec<String> = if separator.is_empty() {
        text.chars().map(|c| c.to_string()).collect()
    } else {
        text.split(separator)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    };

    let mut out = Vec::new();
    let mut pending: Vec<String> = Vec::new();

    for piece in splits {
        if char_len(&piece) < chunk_size {
            pending.push(piece);
            continue;
        }
        if !pending.is_empty() {
            out.extend(merge_splits(&pending, separator, chunk_size, chunk_overlap));
            pending.clear();
        }
        if finer.is_empty() {
            out.push(piece);
        } else {
            out.extend(split_recursive(&piece, finer, chunk_size, chunk_overlap));
        }
    }

    if !pending.is_empty() {
        out.extend(merge_splits(&pending, separator, chunk_size, chunk_overlap));
    }

    out
}

/// Greedily join small splits back together up to `chunk_size`, then slide
/// the window forward keeping at most `chunk_overlap` chars of context.
fn merge_splits(
    splits: &[String],
    separator: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut docs = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    let flush = |current: &VecDeque<&str>, docs: &mut Vec<String>| {
        let joined = current.iter().copied().collect::<Vec<_>>().join(separator);
        let trimmed = joined.trim();
        if !trimmed.is_empty() {
            docs.push(trimmed.to_string());
        }
    };

    for piece in splits {
        let len = char_len(piece);
        let joiner = if current.is_empty() { 0 } else { sep_len };

        if total + len + joiner > chunk_size && !current.is_empty() {
            flush(&current, &mut docs);
            while total > chunk_overlap || (total > 0 && total + len + sep_len > chunk_size) {
                let Some(first) = current.pop_front() else {
                    break;
                };
                let dropped = char_len(first) + if current.is_empty() { 0 } else { sep_len };
                total = total.saturating_sub(dropped);
                if current.is_empty() {
                    total = 0;
                }
            }
        }

        let joiner = if current.is_empty() { 0 } else { sep_len };
        current.push_back(piece);
        total += len + joiner;
    }

    flush(&current, &mut docs);
    docs
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentMetadata;

    fn doc(text: &str) -> Document {
        Document::new(
            text,
            DocumentMetadata {
                source: "TEST".to_string(),
                standard: "TEST".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_small_text_single_chunk() {
        let pieces = split_text("Hello, world!", 1000, 100);
        assert_eq!(pieces, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(split_text("", 100, 10).is_empty());
        assert!(split_text("  \n\n  ", 100, 10).is_empty());
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = (0..200)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        for piece in split_text(&text, 50, 10) {
            assert!(piece.chars().count() <= 50, "piece too long: {}", piece);
        }
    }

    #[test]
    fn test_paragraphs_kept_together_when_they_fit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let pieces = split_text(text, 40, 0);
        assert_eq!(pieces[0], "First paragraph.\n\nSecond paragraph.");
        assert_eq!(pieces[1], "Third paragraph.");
    }

    #[test]
    fn test_overlap_carries_context() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let pieces = split_text(text, 20, 10);
        assert!(pieces.len() > 1);
        // The last word of one chunk reappears at the start of the next.
        for pair in pieces.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap();
            assert!(pair[1].contains(last_word), "{:?}", pair);
        }
    }

    #[test]
    fn test_hard_split_without_separators() {
        let text = "x".repeat(95);
        let pieces = split_text(&text, 30, 0);
        assert_eq!(pieces.len(), 4);
        assert!(pieces.iter().all(|p| p.len() <= 30));
    }

    #[test]
    fn test_multibyte_text_not_split_inside_char() {
        let text = "é".repeat(50);
        let pieces = split_text(&text, 16, 4);
        for piece in &pieces {
            assert!(piece.chars().count() <= 16);
        }
    }

    #[test]
    fn test_chunk_documents_keeps_metadata_and_indices() {
        let docs = vec![doc("one two three four five six"), doc("seven")];
        let chunks = chunk_documents(&docs, 10, 0);
        assert!(chunks.len() >= 3);
        let first_doc: Vec<_> = chunks.iter().filter(|c| c.document_index == 0).collect();
        for (i, c) in first_doc.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.metadata.source, "TEST");
            assert_eq!(c.hash.len(), 64);
        }
    }

    #[test]
    fn test_duplicate_chunks_in_one_document_dropped() {
        let docs = vec![doc("same\n\nsame\n\nsame")];
        let chunks = chunk_documents(&docs, 5, 0);
        assert_eq!(chunks.len(), 1);
    }
}
