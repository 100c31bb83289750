//! Markdown chunking with section-heading context and character overlap.
//!
//! Chunk sizes are approximated from a fixed characters-per-token ratio. The
//! output is a pure function of `(source_file, text, options)`, so identical
//! input always yields identical boundaries, ids and hashes.

use {
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
};

/// Number of hex digits of the content hash embedded in a chunk id.
const ID_HASH_PREFIX: usize = 16;

/// Size policy for [`chunk_markdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerOptions {
    /// Target chunk size in tokens.
    pub target_tokens: usize,
    /// Overlap carried into the next chunk, in tokens.
    pub overlap_tokens: usize,
    pub chars_per_token: usize,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            target_tokens: 400,
            overlap_tokens: 80,
            chars_per_token: 4,
        }
    }
}

impl ChunkerOptions {
    pub fn target_chars(&self) -> usize {
        (self.target_tokens * self.chars_per_token).max(1)
    }

    pub fn overlap_chars(&self) -> usize {
        (self.overlap_tokens * self.chars_per_token).min(self.target_chars() - 1)
    }
}

/// A contiguous, line-ranged span of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// `{source_file}:{line_start}-{line_end}:{hash prefix}`.
    pub id: String,
    pub source_file: String,
    /// First line covered (1-based, inclusive).
    pub line_start: usize,
    /// Last line covered (1-based, inclusive).
    pub line_end: usize,
    /// Trimmed chunk text, prefixed with its section heading when the chunk
    /// starts inside a section.
    pub content: String,
    /// SHA-256 of `content`, lowercase hex.
    pub content_hash: String,
}

/// Split a markdown document into overlapping chunks.
///
/// A heading (`#`, `##` or `###` followed by whitespace) always closes the
/// current chunk, so sections are never merged. Chunks that start mid-section
/// carry the section heading as their first line. A trailing buffer that
/// holds only the overlap tail of the previous chunk is not emitted again.
pub fn chunk_markdown(source_file: &str, text: &str, options: &ChunkerOptions) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let target = options.target_chars();
    let overlap = options.overlap_chars();

    let mut chunks = Vec::new();
    let mut section: Option<&str> = None;
    let mut buffer = String::new();
    let mut start_line = 1usize;
    let mut last_line = 0usize;
    // Whether the buffer holds non-blank lines that no emitted chunk covers yet.
    let mut pending = false;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        last_line = line_no;
        let heading = is_section_heading(line);

        if heading {
            if pending && !buffer.trim().is_empty() {
                chunks.push(make_chunk(source_file, &buffer, start_line, line_no - 1));
            }
            buffer.clear();
            pending = false;
            section = Some(line);
            start_line = line_no;
        }

        if buffer.is_empty() && !heading {
            start_line = line_no;
            if let Some(heading_line) = section {
                buffer.push_str(heading_line);
                buffer.push('\n');
            }
        }

        buffer.push_str(line);
        buffer.push('\n');
        if !line.trim().is_empty() {
            pending = true;
        }

        if pending && buffer.len() >= target && buffer.chars().count() >= target {
            chunks.push(make_chunk(source_file, &buffer, start_line, line_no));

            let tail = overlap_tail(&buffer, overlap).to_string();
            // The tail ends with this line's newline; every newline in it is
            // one source line it overlaps.
            let tail_lines = tail.matches('\n').count();
            start_line = (line_no + 1).saturating_sub(tail_lines).max(start_line);

            buffer.clear();
            if !tail.is_empty() {
                if let Some(heading_line) = section
                    && !tail.starts_with(heading_line)
                {
                    buffer.push_str(heading_line);
                    buffer.push('\n');
                }
                buffer.push_str(&tail);
            }
            pending = false;
        }
    }

    if pending && !buffer.trim().is_empty() {
        chunks.push(make_chunk(source_file, &buffer, start_line, last_line));
    }

    chunks
}

/// Shallow markdown heading: 1 to 3 `#` followed by whitespace.
pub fn is_section_heading(line: &str) -> bool {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    (1..=3).contains(&hashes) && line[hashes..].starts_with(char::is_whitespace)
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Last `chars` characters of `buffer`, or `""` when the buffer is not longer
/// than that.
fn overlap_tail(buffer: &str, chars: usize) -> &str {
    if chars == 0 {
        return "";
    }
    match buffer.char_indices().rev().nth(chars - 1) {
        Some((idx, _)) if idx > 0 => &buffer[idx..],
        _ => "",
    }
}

fn make_chunk(source_file: &str, buffer: &str, line_start: usize, line_end: usize) -> Chunk {
    let content = buffer.trim().to_string();
    let content_hash = sha256_hex(&content);
    Chunk {
        id: format!(
            "{source_file}:{line_start}-{line_end}:{}",
            &content_hash[..ID_HASH_PREFIX]
        ),
        source_file: source_file.to_string(),
        line_start,
        line_end,
        content,
        content_hash,
    }
}
