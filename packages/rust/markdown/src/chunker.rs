//! Heading-aware Markdown chunking for embedding.
//!
//! Splitting rules, applied in order: top-level heading boundaries first,
//! then greedy paragraph packing within oversized sections, with a short
//! overlap carried between adjacent chunks. Fenced code blocks are atomic.

/// Options for the chunker.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Maximum characters per chunk.
    pub char_limit: usize,
    /// Overlap carried into the next chunk, terminated at a sentence or
    /// newline boundary.
    pub overlap: usize,
    /// Chunks whose stripped length is below this are dropped.
    pub min_chunk_chars: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            char_limit: 4000,
            overlap: 200,
            min_chunk_chars: 50,
        }
    }
}

impl ChunkOptions {
    /// Options with explicit limit and overlap, default minimum length.
    pub fn new(char_limit: usize, overlap: usize) -> Self {
        Self {
            char_limit,
            overlap,
            ..Self::default()
        }
    }
}

/// Split Markdown into ordered chunk texts.
///
/// Ordering is the chunk's position in the returned sequence.
pub fn chunk_markdown(markdown: &str, opts: &ChunkOptions) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();

    for section in split_sections(markdown) {
        let section = section.trim();
        if section.is_empty() {
            continue;
        }

        if len_chars(section) <= opts.char_limit {
            chunks.push(section.to_string());
        } else {
            pack_blocks(&split_blocks(section), opts, &mut chunks);
        }
    }

    chunks.retain(|c| len_chars(c.trim()) >= opts.min_chunk_chars);
    chunks
}

// ---------------------------------------------------------------------------
// Section splitting
// ---------------------------------------------------------------------------

/// Split on heading boundaries (`#`..`###`), ignoring headings inside
/// code fences. The preamble before the first heading is its own section.
fn split_sections(markdown: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        } else if !in_fence && is_section_heading(line) && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }

    sections
}

/// A top-level heading: one to three `#` followed by a space.
fn is_section_heading(line: &str) -> bool {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    (1..=3).contains(&hashes) && line.as_bytes().get(hashes) == Some(&b' ')
}

// ---------------------------------------------------------------------------
// Block splitting
// ---------------------------------------------------------------------------

/// Split a section into blocks: paragraphs separated by blank lines, with
/// fenced code blocks kept whole (blank lines inside a fence don't split).
fn split_blocks(section: &str) -> Vec<String> {
    fn flush(current: &mut String, blocks: &mut Vec<String>) {
        let block = current.trim_end().to_string();
        if !block.trim().is_empty() {
            blocks.push(block);
        }
        current.clear();
    }

    let mut blocks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in section.lines() {
        let is_fence_marker = line.trim_start().starts_with("```");

        if is_fence_marker && !in_fence {
            // A fence starts its own block so it can be placed atomically.
            flush(&mut current, &mut blocks);
            in_fence = true;
            current.push_str(line);
            current.push('\n');
            continue;
        }

        if in_fence {
            current.push_str(line);
            current.push('\n');
            if is_fence_marker {
                in_fence = false;
                flush(&mut current, &mut blocks);
            }
            continue;
        }

        if line.trim().is_empty() {
            flush(&mut current, &mut blocks);
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    flush(&mut current, &mut blocks);

    blocks
}

/// Is this block a fenced code block?
fn is_fence_block(block: &str) -> bool {
    block.trim_start().starts_with("```")
}

// ---------------------------------------------------------------------------
// Greedy packing
// ---------------------------------------------------------------------------

/// Pack blocks into chunks up to the limit, carrying overlap between
/// adjacent chunks.
fn pack_blocks(blocks: &[String], opts: &ChunkOptions, chunks: &mut Vec<String>) {
    let mut current = String::new();
    // Chars at the start of `current` that are carried overlap, not fresh
    // content. A chunk holding only overlap is never emitted.
    let mut overlap_only = false;

    for block in blocks {
        let block_len = len_chars(block);

        // Oversized fence: emit whatever is pending, then the fence whole.
        // No overlap is carried out of a fence; a partial fence re-opened
        // in the next chunk would be malformed.
        if is_fence_block(block) && block_len > opts.char_limit {
            if !current.trim().is_empty() && !overlap_only {
                chunks.push(current.trim().to_string());
            }
            chunks.push(block.clone());
            current.clear();
            overlap_only = false;
            continue;
        }

        // Oversized paragraph: flush, then hard-split on whitespace.
        if block_len > opts.char_limit {
            if !current.trim().is_empty() && !overlap_only {
                chunks.push(current.trim().to_string());
            }
            let pieces = hard_split(block, opts.char_limit);
            let last_overlap = pieces
                .last()
                .map(|p| make_overlap(p, opts.overlap))
                .unwrap_or_default();
            chunks.extend(pieces);
            current = last_overlap;
            overlap_only = !current.is_empty();
            continue;
        }

        let sep_len = if current.is_empty() { 0 } else { 2 };
        if !current.is_empty() && len_chars(&current) + sep_len + block_len > opts.char_limit {
            if overlap_only {
                // The carried overlap plus this block won't fit; drop the
                // overlap rather than emit a content-free chunk.
                current.clear();
            } else {
                let chunk = current.trim().to_string();
                let carried = make_overlap(&chunk, opts.overlap);
                chunks.push(chunk);
                current = carried;
                overlap_only = !current.is_empty();
                // Retry the fit with the fresh overlap.
                if !current.is_empty()
                    && len_chars(&current) + 2 + block_len > opts.char_limit
                {
                    current.clear();
                    overlap_only = false;
                }
            }
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(block);
        overlap_only = false;
    }

    if !current.trim().is_empty() && !overlap_only {
        chunks.push(current.trim().to_string());
    }
}

/// Hard-split an oversized paragraph at whitespace boundaries.
fn hard_split(block: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = block;

    while len_chars(remaining) > limit {
        let byte_limit = char_boundary(remaining, limit);
        let window = &remaining[..byte_limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(byte_limit);
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }

    let rest = remaining.trim();
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

/// Overlap carried into the next chunk: the chunk's tail, started at the
/// first sentence or newline boundary inside the window so it begins
/// cleanly. Chunks shorter than the overlap carry nothing.
fn make_overlap(chunk: &str, overlap: usize) -> String {
    if overlap == 0 || len_chars(chunk) <= overlap {
        return String::new();
    }

    let tail_start = char_boundary(chunk, len_chars(chunk) - overlap);
    let tail = &chunk[tail_start..];

    let newline_start = tail.find('\n').map(|p| p + 1);
    let sentence_start = tail.find(". ").map(|p| p + 2);
    let start = match (newline_start, sentence_start) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => 0,
    };

    tail[start..].trim_start().to_string()
}

/// Character count (not bytes).
fn len_chars(s: &str) -> usize {
    s.chars().count()
}

/// Byte index of the `n`-th character boundary.
fn char_boundary(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}
