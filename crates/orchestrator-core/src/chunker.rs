//! Token-Aware Structural Chunker
//!
//! Splits conversation text into ordered, token-bounded chunks:
//!
//! - Primary split points are markdown headings (`#`, `##`, `###`), in
//!   descending priority.
//! - A heading section over the ceiling splits on paragraph boundaries
//!   (blank lines).
//! - Fenced code blocks are never split; a block that alone exceeds the
//!   ceiling is emitted as a single oversized chunk.
//! - Input that fits the ceiling whole (the common single-turn case) is one
//!   chunk.
//!
//! Same input, same ceiling, same tokeniser => identical output.

use unicode_segmentation::UnicodeSegmentation;

/// Default per-chunk token ceiling.
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// Count tokens the way the chunker does: unicode word boundaries.
pub fn count_tokens(text: &str) -> usize {
    text.unicode_words().count()
}

/// Token-aware structural splitter.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_tokens: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS)
    }
}

impl Chunker {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Split `text` into ordered chunks. Empty input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        if count_tokens(trimmed) <= self.max_tokens {
            return vec![trimmed.to_string()];
        }
        let mut chunks = Vec::new();
        self.split_by_heading(trimmed, 1, &mut chunks);
        chunks.retain(|c| !c.trim().is_empty());
        chunks
    }

    /// Split on headings of `level`, recursing into deeper levels for
    /// oversized sections; beyond `###` fall through to paragraphs.
    fn split_by_heading(&self, text: &str, level: usize, out: &mut Vec<String>) {
        if count_tokens(text) <= self.max_tokens {
            out.push(text.trim().to_string());
            return;
        }
        if level > 3 {
            self.split_paragraphs(text, out);
            return;
        }

        let marker = "#".repeat(level);
        let mut sections: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut in_fence = false;
        for line in text.lines() {
            if is_fence_delimiter(line) {
                in_fence = !in_fence;
            }
            let is_heading = !in_fence
                && line.starts_with(&marker)
                && line[marker.len()..].starts_with(' ');
            if is_heading && !current.trim().is_empty() {
                sections.push(std::mem::take(&mut current));
            }
            current.push_str(line);
            current.push('\n');
        }
        if !current.trim().is_empty() {
            sections.push(current);
        }

        if sections.len() <= 1 {
            // No split point at this level; try the next one down.
            self.split_by_heading(text, level + 1, out);
            return;
        }
        for section in sections {
            self.split_by_heading(section.trim(), level + 1, out);
        }
    }

    /// Split on blank lines (outside fences), greedily packing consecutive
    /// paragraphs back together up to the ceiling.
    fn split_paragraphs(&self, text: &str, out: &mut Vec<String>) {
        let paragraphs = split_blank_lines(text);
        let mut current = String::new();
        let mut current_tokens = 0usize;

        for para in paragraphs {
            let tokens = count_tokens(&para);
            if tokens > self.max_tokens {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current).trim().to_string());
                    current_tokens = 0;
                }
                if is_fenced_block(&para) {
                    // Oversized code block: emitted whole
                    out.push(para.trim().to_string());
                } else {
                    self.hard_split(&para, out);
                }
                continue;
            }
            if current_tokens + tokens > self.max_tokens && !current.is_empty() {
                out.push(std::mem::take(&mut current).trim().to_string());
                current_tokens = 0;
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&para);
            current_tokens += tokens;
        }
        if !current.trim().is_empty() {
            out.push(current.trim().to_string());
        }
    }

    /// Last resort for a single oversized prose paragraph: pack whitespace-
    /// separated words into token windows.
    fn hard_split(&self, text: &str, out: &mut Vec<String>) {
        let mut current = String::new();
        let mut tokens = 0usize;
        for word in text.split_whitespace() {
            if tokens >= self.max_tokens {
                out.push(std::mem::take(&mut current));
                tokens = 0;
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            tokens += 1;
        }
        if !current.is_empty() {
            out.push(current);
        }
    }
}

fn is_fence_delimiter(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

/// Whether a paragraph is one fenced code block.
fn is_fenced_block(para: &str) -> bool {
    let mut lines = para.trim().lines();
    match (lines.next(), para.trim().lines().last()) {
        (Some(first), Some(last)) => {
            is_fence_delimiter(first) && is_fence_delimiter(last) && para.trim().lines().count() >= 2
        }
        _ => false,
    }
}

/// Split into paragraphs at blank lines, keeping fenced code blocks whole
/// even when they contain blank lines.
fn split_blank_lines(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;
    for line in text.lines() {
        if is_fence_delimiter(line) {
            in_fence = !in_fence;
        }
        if line.trim().is_empty() && !in_fence {
            if !current.trim().is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        paragraphs.push(current);
    }
    paragraphs
        .into_iter()
        .map(|p| p.trim_end().to_string())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
