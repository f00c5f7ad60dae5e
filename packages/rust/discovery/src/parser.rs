//! Pure parsing: robots.txt directives, sitemap XML, URL canonicalization.
//!
//! No HTTP happens here; `lib.rs` owns fetching and recursion.

use quick_xml::events::Event;
use url::Url;

// ---------------------------------------------------------------------------
// robots.txt
// ---------------------------------------------------------------------------

/// Extract every `Sitemap:` directive from a robots.txt body.
///
/// Splits on the first colon only, since sitemap URLs contain colons
/// themselves.
pub fn sitemaps_from_robots(robots: &str) -> Vec<String> {
    robots
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(':')?;
            if key.eq_ignore_ascii_case("sitemap") {
                let value = value.trim();
                (!value.is_empty()).then(|| value.to_string())
            } else {
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Sitemap XML
// ---------------------------------------------------------------------------

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapFile {
    /// A `<urlset>` of content page URLs (nested `.xml` feeds filtered out).
    UrlSet(Vec<String>),
    /// A `<sitemapindex>` pointing at child sitemaps.
    Index(Vec<String>),
}

/// Parse sitemap XML, accepting both namespaced and bare `<loc>` elements.
///
/// Malformed XML yields an empty url set; a broken sitemap is a warning for
/// the caller, never a hard failure.
pub fn parse_sitemap(xml: &str) -> SitemapFile {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();

    let mut root_is_index = false;
    let mut saw_root = false;
    let mut in_loc = false;
    let mut locs: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if !saw_root {
                    saw_root = true;
                    root_is_index = name.as_ref() == b"sitemapindex";
                }
                in_loc = name.as_ref() == b"loc";
            }
            Ok(Event::Text(t)) if in_loc => {
                if let Ok(text) = t.unescape() {
                    let text = text.trim();
                    if !text.is_empty() {
                        locs.push(text.to_string());
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"loc" {
                    in_loc = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    if root_is_index {
        // Children of an index must themselves be sitemaps.
        locs.retain(|u| u.to_ascii_lowercase().ends_with(".xml"));
        SitemapFile::Index(locs)
    } else {
        // Nested feeds inside a urlset are not content pages.
        locs.retain(|u| !u.to_ascii_lowercase().ends_with(".xml"));
        SitemapFile::UrlSet(locs)
    }
}

// ---------------------------------------------------------------------------
// Canonicalization
// ---------------------------------------------------------------------------

/// Canonical string form for deduplication: lowercase scheme+host (done by
/// `Url` parsing), fragment stripped, trailing path slash stripped unless
/// the path is `/`.
pub fn canonicalize(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    let mut s = canonical.to_string();
    if canonical.path() != "/" && canonical.query().is_none() && s.ends_with('/') {
        s.pop();
    }
    s
}
