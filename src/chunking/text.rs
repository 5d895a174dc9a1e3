//! Size-bounded chunking that prefers natural break points.
//!
//! Each chunk ends at the last paragraph break in the second half of its
//! window, falling back to a sentence end, then any whitespace, then a hard
//! cut on a character boundary.

use super::{Chunker, ChunkingConfig, TextChunk};
use regex::Regex;

/// Paragraph- and sentence-aware chunker.
pub struct TextChunker {
    paragraph_break: Regex,
    sentence_end: Regex,
}

impl TextChunker {
    pub fn new() -> Self {
        Self {
            paragraph_break: Regex::new(r"\n[ \t]*\n").expect("Invalid regex"),
            sentence_end: Regex::new(r#"[.!?]["')\]]?\s"#).expect("Invalid regex"),
        }
    }

    /// Pick where a chunk starting at `start` should end, given a hard limit.
    fn break_point(&self, text: &str, start: usize, hard_end: usize) -> usize {
        let search_from = ceil_char_boundary(text, start + (hard_end - start) / 2);
        if search_from >= hard_end {
            return hard_end;
        }
        let window = &text[search_from..hard_end];

        if let Some(m) = self.paragraph_break.find_iter(window).last() {
            return search_from + m.end();
        }
        if let Some(m) = self.sentence_end.find_iter(window).last() {
            return search_from + m.end();
        }
        if let Some((i, c)) = window.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
            return search_from + i + c.len_utf8();
        }
        hard_end
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker for TextChunker {
    fn chunk(&self, text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
        let size = config.chunk_size.max(1);
        let overlap = config.chunk_overlap.min(size - 1);
        let len = text.len();

        let mut chunks = Vec::new();
        let mut position = 0u32;
        let mut start = skip_whitespace(text, 0);

        while start < len {
            let mut hard_end = floor_char_boundary(text, (start + size).min(len));
            if hard_end <= start {
                // A single character wider than the window
                hard_end = ceil_char_boundary(text, start + 1);
            }

            let end = if hard_end >= len {
                len
            } else {
                self.break_point(text, start, hard_end)
            };

            let content = text[start..end].trim_end();
            if !content.is_empty() {
                chunks.push(TextChunk {
                    content: content.to_string(),
                    offset: start,
                    position,
                });
                position += 1;
            }

            if end >= len {
                break;
            }

            // Step back by the overlap, then forward to a word start
            let mut next = ceil_char_boundary(text, end.saturating_sub(overlap));
            if next > start && next < end {
                if let Some(i) = text[next..end].find(char::is_whitespace) {
                    next += i;
                }
            }
            if next <= start {
                next = end;
            }
            start = skip_whitespace(text, next);
        }

        chunks
    }
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    let rest = &text[from..];
    from + (rest.len() - rest.trim_start().len())
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
