//! Markdown hygiene after conversion.
//!
//! The converter's output needs a final tidy: stray container tags, inflated
//! blank runs, decorated fence info strings, and trailing whitespace. One
//! stateful walk over the lines handles all of it, leaving fenced code
//! untouched.

/// Fence info prefixes that are really CSS class names, not languages.
const FENCE_CLASS_PREFIXES: [&str; 3] = ["language-", "lang-", "highlight-"];

/// Container tags the converter sometimes leaks into its output. Their
/// content is worth keeping; the tags themselves are not.
const RESIDUAL_TAGS: [&str; 8] = [
    "div",
    "span",
    "section",
    "article",
    "figure",
    "figcaption",
    "details",
    "summary",
];

/// Tidy converted Markdown: drop leaked container tags, cap blank runs at
/// two lines, clean fence info strings, strip trailing whitespace, and end
/// with exactly one newline. Fenced code passes through verbatim.
pub(crate) fn tidy(md: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0usize;
    let mut in_fence = false;

    for raw in md.lines() {
        let is_marker = raw.trim_start().starts_with("```");

        let line = if in_fence && !is_marker {
            // Code is sacred, including its whitespace.
            raw.to_string()
        } else if is_marker && !in_fence {
            clean_fence_info(raw.trim_end())
        } else if is_marker {
            raw.trim_end().to_string()
        } else {
            let stripped = drop_residual_tags(raw);
            stripped.trim_end().to_string()
        };

        if is_marker {
            in_fence = !in_fence;
        }

        if line.is_empty() && !in_fence {
            blank_run += 1;
            if blank_run > 2 {
                continue;
            }
        } else {
            blank_run = 0;
        }

        lines.push(line);
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Turn `` ```language-python `` style fence openers into `` ```python ``.
fn clean_fence_info(line: &str) -> String {
    let indent_end = line.len() - line.trim_start().len();
    let (indent, fence) = line.split_at(indent_end);
    let info = fence.trim_start_matches('`');
    let ticks = &fence[..fence.len() - info.len()];

    for prefix in FENCE_CLASS_PREFIXES {
        if let Some(lang) = info.strip_prefix(prefix) {
            return format!("{indent}{ticks}{lang}");
        }
    }
    line.to_string()
}

/// Remove residual container tags from a line, keeping their inner text.
/// Anything that isn't a recognized container tag stays exactly as written.
fn drop_residual_tags(line: &str) -> String {
    if !line.contains('<') {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        let close = open + close;

        if is_residual_tag(&rest[open + 1..close]) {
            out.push_str(&rest[..open]);
        } else {
            out.push_str(&rest[..=close]);
        }
        rest = &rest[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Is the text between `<` and `>` a residual container tag, opening or
/// closing, with or without attributes?
fn is_residual_tag(inner: &str) -> bool {
    let name = inner
        .strip_prefix('/')
        .unwrap_or(inner)
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches('/');
    RESIDUAL_TAGS
        .iter()
        .any(|tag| tag.eq_ignore_ascii_case(name))
}
