//! HTML → structural skeleton small enough to embed in a prompt.

use scraper::{ElementRef, Html, Node};
use std::fmt;

/// Default byte cap on a reduced document.
pub const DEFAULT_BUDGET: usize = 7000;

/// Dropped together with everything inside them.
const DROP_TAGS: &[&str] = &[
    "script", "style", "noscript", "meta", "link", "head", "iframe", "frame", "object",
    "embed", "svg", "canvas", "template", "base",
];

/// Kept as tags. Anything else is unwrapped: children stay, the tag goes.
const KEEP_TAGS: &[&str] = &[
    "div", "span", "p", "a", "button", "form", "input", "label", "h1", "h2", "h3", "h4", "h5",
    "h6", "ul", "ol", "li", "strong", "em", "b", "i",
];

/// Attributes that identify an element rather than style it, in output order.
const KEEP_ATTRS: &[&str] = &[
    "id",
    "class",
    "name",
    "type",
    "href",
    "placeholder",
    "aria-label",
    "role",
    "for",
    "title",
    "alt",
    "value",
    "action",
    "method",
    "data-testid",
];

/// HTML reduced to whitelisted structural tags and identity attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReducedDocument(String);

impl ReducedDocument {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Longest prefix of at most `cap` bytes that ends on a char boundary.
    pub fn prefix(&self, cap: usize) -> &str {
        &self.0[..floor_char_boundary(&self.0, cap)]
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ReducedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduces documents to a fixed byte budget.
#[derive(Debug, Clone, Copy)]
pub struct Reducer {
    budget: usize,
}

impl Default for Reducer {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BUDGET,
        }
    }
}

impl Reducer {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Parse permissively, prune, serialize, collapse whitespace, truncate.
    /// Malformed input yields a partial (possibly empty) skeleton.
    pub fn reduce(&self, html: &str) -> ReducedDocument {
        let doc = Html::parse_document(html);
        let mut skeleton = String::with_capacity(html.len().min(self.budget * 2));
        emit_children(doc.root_element(), &mut skeleton);

        // Unwrapping can leave nestings the parser rewrites (an `li` inside
        // an `li`); one more parse settles the skeleton into a fixpoint.
        let settled = Html::parse_document(&skeleton);
        let mut out = String::with_capacity(skeleton.len());
        emit_children(settled.root_element(), &mut out);
        let mut collapsed = collapse_whitespace(out.trim());
        collapsed.truncate(floor_char_boundary(&collapsed, self.budget));
        ReducedDocument(collapsed)
    }
}

/// Reduce with the default budget.
pub fn reduce(html: &str) -> ReducedDocument {
    Reducer::default().reduce(html)
}

fn emit_children(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => escape_text(text, out),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    emit_element(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn emit_element(el: ElementRef<'_>, out: &mut String) {
    let tag = el.value().name();
    if DROP_TAGS.contains(&tag) || is_hidden(el) {
        return;
    }
    if !KEEP_TAGS.contains(&tag) {
        emit_children(el, out);
        return;
    }

    let is_password = el
        .value()
        .attr("type")
        .is_some_and(|t| t.eq_ignore_ascii_case("password"));

    out.push('<');
    out.push_str(tag);
    for &name in KEEP_ATTRS {
        let Some(value) = el.value().attr(name) else {
            continue;
        };
        if name == "href" && value.trim_start().to_ascii_lowercase().starts_with("javascript:") {
            continue;
        }
        if name == "value" && is_password {
            continue;
        }
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_attr(value, out);
        out.push('"');
    }
    out.push('>');

    if tag == "input" {
        return;
    }
    emit_children(el, out);
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn is_hidden(el: ElementRef<'_>) -> bool {
    let v = el.value();
    if v.attr("hidden").is_some() {
        return true;
    }
    if v.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
        return true;
    }
    if v.attr("aria-hidden").is_some_and(|a| a.eq_ignore_ascii_case("true")) {
        return true;
    }
    if v.name() == "img" && v.attr("src").is_some_and(|s| s.starts_with("data:image")) {
        return true;
    }
    if let Some(style) = v.attr("style") {
        let style: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        if style.contains("display:none") || style.contains("visibility:hidden") {
            return true;
        }
    }
    false
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_ws = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
            }
            in_ws = true;
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}

fn floor_char_boundary(s: &str, cap: usize) -> usize {
    if cap >= s.len() {
        return s.len();
    }
    let mut i = cap;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
