use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// How to find an element on a page.
///
/// Plain strings deserialize to `Css`. The two labelled forms cover what CSS
/// alone can't express: "the `dd` after the `dt` saying VIN" and "the `span`
/// whose text mentions VIN".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    Css(String),
    LabelNext {
        label_css: String,
        label: String,
        next_css: String,
    },
    Containing {
        css: String,
        contains: String,
    },
}

impl Locator {
    pub fn css(s: &str) -> Self {
        Locator::Css(s.to_string())
    }

    pub fn label_next(label_css: &str, label: &str, next_css: &str) -> Self {
        Locator::LabelNext {
            label_css: label_css.to_string(),
            label: label.to_string(),
            next_css: next_css.to_string(),
        }
    }

    pub fn containing(css: &str, contains: &str) -> Self {
        Locator::Containing {
            css: css.to_string(),
            contains: contains.to_string(),
        }
    }
}

/// Parse a selector, treating a bad one as "matches nothing".
pub fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

pub fn element_text(el: &ElementRef) -> String {
    let joined: String = el.text().collect::<Vec<_>>().join(" ");
    SPACE_RE.replace_all(joined.trim(), " ").to_string()
}

/// Strip tags and collapse whitespace from a raw HTML fragment.
pub fn strip_tags(fragment: &str) -> String {
    let no_tags = TAG_RE.replace_all(fragment, " ");
    SPACE_RE.replace_all(&no_tags, " ").trim().to_string()
}

/// A parsed page or fragment.
pub struct Page {
    doc: Html,
}

impl Page {
    pub fn parse(html: &str) -> Self {
        Page {
            doc: Html::parse_document(html),
        }
    }

    pub fn fragment(html: &str) -> Self {
        Page {
            doc: Html::parse_fragment(html),
        }
    }

    pub fn root(&self) -> ElementRef<'_> {
        self.doc.root_element()
    }

    pub fn text(&self) -> String {
        element_text(&self.root())
    }

    pub fn html(&self) -> String {
        self.root().html()
    }

    pub fn select_all(&self, css: &str) -> Vec<ElementRef<'_>> {
        select_within(&self.root(), css)
    }

    /// Text of the first element the locator resolves to.
    pub fn locate_text(&self, locator: &Locator) -> Option<String> {
        locate_text(&self.root(), locator)
    }

    pub fn attr(&self, css: &str, name: &str) -> Option<String> {
        let sel = selector(css)?;
        self.doc
            .select(&sel)
            .find_map(|el| el.value().attr(name))
            .map(|v| v.trim().to_string())
    }

    /// Parsed bodies of every `<script type="application/ld+json">` block.
    /// Blocks that fail to parse are skipped.
    pub fn json_ld(&self) -> Vec<serde_json::Value> {
        let Some(sel) = selector(r#"script[type="application/ld+json"]"#) else {
            return Vec::new();
        };
        self.doc
            .select(&sel)
            .filter_map(|el| {
                let body: String = el.text().collect();
                serde_json::from_str(body.trim()).ok()
            })
            .collect()
    }
}

pub fn select_within<'a>(scope: &ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match selector(css) {
        Some(sel) => scope.select(&sel).collect(),
        None => Vec::new(),
    }
}

pub fn locate_text(scope: &ElementRef, locator: &Locator) -> Option<String> {
    match locator {
        Locator::Css(css) => select_within(scope, css)
            .first()
            .map(element_text)
            .filter(|t| !t.is_empty()),
        Locator::Containing { css, contains } => select_within(scope, css)
            .into_iter()
            .map(|el| element_text(&el))
            .find(|t| t.contains(contains.as_str())),
        Locator::LabelNext {
            label_css,
            label,
            next_css,
        } => {
            let next_sel = selector(next_css)?;
            select_within(scope, label_css)
                .into_iter()
                .filter(|el| element_text(el).contains(label.as_str()))
                .find_map(|el| {
                    el.next_siblings()
                        .filter_map(ElementRef::wrap)
                        .next()
                        .filter(|sib| next_sel.matches(sib))
                        .map(|sib| element_text(&sib))
                })
        }
    }
}

/// Nearest ancestor matching one of `tags` (e.g. `div`, `li`, `article`).
pub fn enclosing<'a>(el: &ElementRef<'a>, tags: &[&str]) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| tags.contains(&a.value().name()))
}

/// Char-boundary-safe window of `radius` bytes either side of `pos`.
pub fn context_window(text: &str, pos: usize, len: usize, radius: usize) -> &str {
    let mut start = pos.saturating_sub(radius);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (pos + len + radius).min(text.len());
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    &text[start..end]
}
