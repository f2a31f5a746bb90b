use crate::driver::Locator;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Versioned locator overrides. This file is the only thing the patch loop
/// ever rewrites.
///
/// ```yaml
/// version: 2
/// locators:
///   card: ".product-list-entry"
///   page_link: "a.pagination-next"
///   login_submit: "text:Sign in"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    pub version: u64,
    #[serde(default)]
    pub locators: BTreeMap<String, String>,
}

impl Policy {
    pub fn parse(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load, or an empty version-0 policy when the file does not exist yet.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.locators.get(name).map(String::as_str)
    }

    /// Validation gate for oracle-proposed policies: a non-empty locator map
    /// whose CSS entries parse and name only known elements, and whose other
    /// entries are not blank.
    pub fn validate(&self) -> Result<()> {
        if self.locators.is_empty() {
            return Err(Error::Patch("policy has no locators".into()));
        }
        for (name, value) in &self.locators {
            if name.trim().is_empty() {
                return Err(Error::Patch("policy has a blank locator name".into()));
            }
            match Locator::parse(value) {
                Locator::Css(css) => {
                    if css.is_empty() || scraper::Selector::parse(&css).is_err() {
                        return Err(Error::Patch(format!(
                            "locator '{}' is not valid CSS: {}",
                            name, value
                        )));
                    }
                    if let Some(word) = prose_word(&css) {
                        return Err(Error::Patch(format!(
                            "locator '{}' reads as prose ('{}'): {}",
                            name, word, value
                        )));
                    }
                }
                other => {
                    let (_, v) = other.kind_and_value();
                    if v.trim().is_empty() {
                        return Err(Error::Patch(format!("locator '{}' is blank", name)));
                    }
                }
            }
        }
        Ok(())
    }

    /// Parse and validate an oracle reply as the successor of `current`.
    /// The version is always `current.version + 1`, whatever the reply says.
    pub fn from_proposal(raw: &str, current: &Policy) -> Result<Self> {
        let body = strip_fence(raw);
        let mut proposed: Policy = serde_yaml::from_str(body)
            .map_err(|e| Error::Patch(format!("proposal is not a policy document: {}", e)))?;
        proposed.validate()?;
        proposed.version = current.version + 1;
        Ok(proposed)
    }
}

/// Element names a selector may use as a bare type selector.
const HTML_TAGS: &[&str] = &[
    "a", "abbr", "article", "aside", "b", "blockquote", "body", "button", "caption", "code",
    "dd", "details", "dialog", "div", "dl", "dt", "em", "fieldset", "figcaption", "figure",
    "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "i", "img", "input",
    "label", "legend", "li", "main", "nav", "ol", "option", "p", "picture", "pre", "section",
    "select", "small", "span", "strong", "summary", "table", "tbody", "td", "textarea",
    "tfoot", "th", "thead", "time", "tr", "u", "ul",
];

/// First type selector in `css` that is not a lowercase HTML element name.
/// Attribute brackets, pseudo-class arguments and quoted strings are skipped.
fn prose_word(css: &str) -> Option<String> {
    let mut shape = String::with_capacity(css.len());
    let mut depth = 0usize;
    let mut quote = None;
    for c in css.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            (None, c) if depth == 0 => shape.push(c),
            _ => {}
        }
    }

    shape
        .split(|c: char| c.is_whitespace() || matches!(c, '>' | '+' | '~' | ','))
        .map(|compound| {
            compound
                .split(|c: char| matches!(c, '.' | '#' | ':' | '['))
                .next()
                .unwrap_or_default()
        })
        .find(|tag| !tag.is_empty() && *tag != "*" && !HTML_TAGS.contains(tag))
        .map(String::from)
}

fn strip_fence(raw: &str) -> &str {
    let s = raw.trim();
    match s.strip_prefix("```") {
        Some(rest) => rest
            .split_once('\n')
            .map(|(_, body)| body)
            .unwrap_or(rest)
            .trim_end()
            .trim_end_matches("```"),
        None => s,
    }
}
