//! HTML-to-Markdown normalization and chunking.
//!
//! [`normalize`] extracts the main content subtree from raw HTML and emits
//! clean Markdown plus a page title. [`chunk_markdown`] then splits that
//! Markdown into heading-aware, size-bounded segments for embedding.

mod chunker;
mod cleanup;

use std::collections::HashSet;

use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, instrument};

use sitegist_shared::{Result, SitegistError};

pub use chunker::{chunk_markdown, ChunkOptions};

/// Tags whose subtrees never carry main content.
const REMOVE_TAGS: [&str; 17] = [
    "script", "style", "noscript", "iframe", "object", "embed", "nav", "header", "footer",
    "aside", "menu", "form", "input", "button", "select", "textarea", "svg",
];

/// Class/id keywords marking boilerplate chrome.
const BOILERPLATE_KEYWORDS: [&str; 15] = [
    "nav", "navigation", "menu", "footer", "sidebar", "breadcrumb", "pagination", "cookie",
    "banner", "modal", "popup", "overlay", "share", "social", "advertisement",
];

/// Elements never removed by keyword matching, whatever their classes say.
const STRUCTURAL_TAGS: [&str; 4] = ["html", "body", "main", "article"];

/// Tags rendered without a closing tag.
const VOID_TAGS: [&str; 6] = ["img", "br", "hr", "input", "meta", "link"];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for content normalization.
#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    /// Extra CSS selectors whose matches are dropped before conversion.
    pub deny_selectors: Vec<String>,
    /// CSS selectors whose matches are kept even when a boilerplate keyword
    /// would otherwise remove them.
    pub allow_selectors: Vec<String>,
}

/// Result of normalizing one page.
#[derive(Debug, Clone)]
pub struct NormalizedPage {
    /// Extracted page title (`og:title` → `<title>` → first `<h1>`).
    pub title: String,
    /// Clean Markdown for the main content subtree.
    pub markdown: String,
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Normalize raw HTML into `(title, markdown)`.
///
/// Best-effort by design: thin pages produce short output rather than
/// errors. The only failure is input with no parseable markup at all.
#[instrument(skip_all, fields(html_len = html.len()))]
pub fn normalize(html: &str, opts: &NormalizeOptions) -> Result<NormalizedPage> {
    if html.trim().is_empty() {
        return Err(SitegistError::normalize("empty HTML document"));
    }

    let doc = Html::parse_document(html);

    let title = extract_title(&doc);
    let rules = DenyRules::compile(&doc, opts);

    // Pick the largest content root by kept-text length.
    let root = select_content_root(&doc, &rules)
        .ok_or_else(|| SitegistError::normalize("document has no content root"))?;

    let content_html = render_clean_html(root, &rules);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(REMOVE_TAGS.to_vec())
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| SitegistError::normalize(format!("markdown conversion failed: {e}")))?;

    let markdown = cleanup::tidy(&raw_markdown);

    let title = if title.is_empty() {
        first_h1(&markdown).unwrap_or_else(|| "Untitled".to_string())
    } else {
        title
    };

    debug!(title = %title, markdown_len = markdown.len(), "normalization complete");

    Ok(NormalizedPage { title, markdown })
}

/// Title precedence: `og:title` meta, `<title>`, first `<h1>`.
fn extract_title(doc: &Html) -> String {
    let og_sel = Selector::parse("meta[property=\"og:title\"]").expect("valid selector");
    if let Some(meta) = doc.select(&og_sel).next() {
        if let Some(content) = meta.value().attr("content") {
            let content = content.trim();
            if !content.is_empty() {
                return content.to_string();
            }
        }
    }

    let title_sel = Selector::parse("title").expect("valid selector");
    if let Some(el) = doc.select(&title_sel).next() {
        let text = el.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return text;
        }
    }

    let h1_sel = Selector::parse("h1").expect("valid selector");
    if let Some(el) = doc.select(&h1_sel).next() {
        let text = el.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return text;
        }
    }

    String::new()
}

/// First `# ` heading in the converted Markdown, as a last-resort title.
fn first_h1(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

// ---------------------------------------------------------------------------
// Deny rules
// ---------------------------------------------------------------------------

/// Compiled removal rules for one document.
struct DenyRules {
    denied_ids: HashSet<ego_tree::NodeId>,
    allowed_ids: HashSet<ego_tree::NodeId>,
}

impl DenyRules {
    fn compile(doc: &Html, opts: &NormalizeOptions) -> Self {
        let mut denied_ids = HashSet::new();
        for sel_str in &opts.deny_selectors {
            if let Ok(sel) = Selector::parse(sel_str) {
                denied_ids.extend(doc.select(&sel).map(|el| el.id()));
            }
        }

        let mut allowed_ids = HashSet::new();
        for sel_str in &opts.allow_selectors {
            if let Ok(sel) = Selector::parse(sel_str) {
                allowed_ids.extend(doc.select(&sel).map(|el| el.id()));
            }
        }

        Self {
            denied_ids,
            allowed_ids,
        }
    }

    /// Should this element's subtree be dropped?
    fn denies(&self, el: ElementRef<'_>) -> bool {
        if self.allowed_ids.contains(&el.id()) {
            return false;
        }
        if self.denied_ids.contains(&el.id()) {
            return true;
        }

        let name = el.value().name();
        if REMOVE_TAGS.contains(&name) {
            return true;
        }
        if STRUCTURAL_TAGS.contains(&name) {
            return false;
        }

        // Keyword match on class and id, as sites rarely use semantic tags
        // for their chrome.
        let mut attrs = String::new();
        if let Some(class) = el.value().attr("class") {
            attrs.push_str(&class.to_ascii_lowercase());
        }
        if let Some(id) = el.value().attr("id") {
            attrs.push(' ');
            attrs.push_str(&id.to_ascii_lowercase());
        }
        if attrs.is_empty() {
            return false;
        }
        BOILERPLATE_KEYWORDS.iter().any(|kw| attrs.contains(kw))
    }
}

// ---------------------------------------------------------------------------
// Content root selection
// ---------------------------------------------------------------------------

/// Pick the content root: the `<main>` or `<article>` with the most kept
/// text, falling back to `<body>` when neither carries anything. `<body>`
/// is excluded from the comparison since it contains everything.
fn select_content_root<'a>(doc: &'a Html, rules: &DenyRules) -> Option<ElementRef<'a>> {
    let mut best: Option<(usize, ElementRef<'a>)> = None;

    for sel_str in ["main", "article"] {
        let sel = Selector::parse(sel_str).expect("valid selector");
        for el in doc.select(&sel) {
            let len = kept_text_len(el, rules);
            if len > 0 && best.as_ref().map(|(b, _)| len > *b).unwrap_or(true) {
                best = Some((len, el));
            }
        }
    }
    if let Some((_, el)) = best {
        return Some(el);
    }

    let body_sel = Selector::parse("body").expect("valid selector");
    doc.select(&body_sel).next()
}

/// Total text length under `el`, excluding denied subtrees.
fn kept_text_len(el: ElementRef<'_>, rules: &DenyRules) -> usize {
    if rules.denies(el) {
        return 0;
    }
    let mut len = 0;
    for child in el.children() {
        match child.value() {
            Node::Text(text) => len += text.trim().len(),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    len += kept_text_len(child_el, rules);
                }
            }
            _ => {}
        }
    }
    len
}

// ---------------------------------------------------------------------------
// Clean HTML rendering
// ---------------------------------------------------------------------------

/// Re-serialize the subtree under `root`, skipping denied elements and
/// keeping only the attributes the Markdown conversion needs. Tables are
/// rendered directly as Markdown text since the converter drops them.
fn render_clean_html(root: ElementRef<'_>, rules: &DenyRules) -> String {
    let mut out = String::new();
    for child in root.children() {
        write_node(child, &mut out, rules);
    }
    out
}

fn write_node(node: ego_tree::NodeRef<'_, Node>, out: &mut String, rules: &DenyRules) {
    match node.value() {
        Node::Text(text) => out.push_str(&escape_text(&text.text)),
        Node::Element(_) => {
            let Some(el) = ElementRef::wrap(node) else {
                return;
            };
            if rules.denies(el) {
                return;
            }

            let name = el.value().name();
            if name == "table" {
                out.push_str(&table_to_markdown(el));
                return;
            }

            out.push('<');
            out.push_str(name);
            for (attr, value) in el.value().attrs() {
                if keep_attr(name, attr) {
                    out.push(' ');
                    out.push_str(attr);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
            }
            out.push('>');

            if VOID_TAGS.contains(&name) {
                return;
            }

            for child in node.children() {
                write_node(child, out, rules);
            }

            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        _ => {}
    }
}

/// Attributes the converter actually uses: link targets, image sources and
/// alt text, and language classes on code blocks.
fn keep_attr(tag: &str, attr: &str) -> bool {
    match attr {
        "href" => tag == "a",
        "src" | "alt" => tag == "img",
        "class" => tag == "code" || tag == "pre",
        _ => false,
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

// ---------------------------------------------------------------------------
// Table flattening
// ---------------------------------------------------------------------------

/// Render an HTML table as a Markdown table (the converter has no table
/// support, so this text passes straight through). The first row serves as
/// the header; short rows are padded to the widest row's width.
fn table_to_markdown(table: ElementRef<'_>) -> String {
    let row_sel = Selector::parse("tr").expect("valid selector");
    let cell_sel = Selector::parse("th, td").expect("valid selector");

    let mut grid: Vec<Vec<String>> = Vec::new();
    for row in table.select(&row_sel) {
        let cells: Vec<String> = row
            .select(&cell_sel)
            .map(|cell| {
                // Collapse internal whitespace; pipes inside cell text would
                // break the row syntax.
                cell.text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .replace('|', "\\|")
            })
            .collect();
        if !cells.is_empty() {
            grid.push(cells);
        }
    }

    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }

    let render_row = |cells: &[String]| {
        let mut line = String::from("|");
        for i in 0..width {
            line.push(' ');
            line.push_str(cells.get(i).map(String::as_str).unwrap_or(""));
            line.push_str(" |");
        }
        line.push('\n');
        line
    };

    let mut rows = grid.iter();
    let Some(header) = rows.next() else {
        return String::new();
    };

    let mut md = String::from("\n\n");
    md.push_str(&render_row(header));
    md.push('|');
    md.push_str(&" --- |".repeat(width));
    md.push('\n');
    for row in rows {
        md.push_str(&render_row(row));
    }
    md.push('\n');
    md
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
