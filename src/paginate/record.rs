use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

const RESERVED: &[&str] = &[
    "raw_name",
    "name",
    "page",
    "url",
    "description",
    "promotion_link",
];

/// One listing item.
///
/// Created once per distinct identity; after creation only the promotion
/// link may be added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRecord {
    raw_name: String,
    name: String,
    page: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    promotion_link: Option<String>,
    #[serde(flatten)]
    fields: BTreeMap<String, String>,
}

impl OfferRecord {
    /// New record keyed by the raw title text.
    pub fn new(raw_name: impl Into<String>, page: usize) -> Self {
        let raw_name = raw_name.into();
        Self {
            name: collapse(&raw_name),
            raw_name,
            page,
            url: None,
            description: None,
            promotion_link: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.is_empty());
        self
    }

    /// Extracted fields. Keys that collide with bookkeeping fields get a
    /// `field_` prefix.
    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.fields = fields
            .into_iter()
            .map(|(k, v)| {
                if RESERVED.contains(&k.as_str()) {
                    (format!("field_{}", k), v)
                } else {
                    (k, v)
                }
            })
            .collect();
        self
    }

    /// Attach the derived promotion link.
    pub fn set_promotion_link(&mut self, link: String) {
        self.promotion_link = Some(link);
    }

    /// Dedup identity.
    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn promotion_link(&self) -> Option<&str> {
        self.promotion_link.as_deref()
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Identities seen during one traversal. Only ever grows.
#[derive(Debug, Default)]
pub struct SeenSet {
    ids: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `identity`; `true` if it was not seen before.
    pub fn insert(&mut self, identity: &str) -> bool {
        if self.ids.contains(identity) {
            return false;
        }
        self.ids.insert(identity.to_string())
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.ids.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Text clean-up rules for card content.
pub(crate) struct Cleaner {
    url: Regex,
    email: Regex,
    field_line: Regex,
}

impl Cleaner {
    pub(crate) fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            url: Regex::new(r"(?i)\b(?:https?://|www\.)\S+")?,
            email: Regex::new(r"[\w.+-]+@[\w-]+(?:\.[\w-]+)+")?,
            field_line: Regex::new(r"^\s*([A-Za-z][A-Za-z0-9 /%&().-]{0,40}?)\s*:\s+(\S.*?)\s*$")?,
        })
    }

    /// Strip URLs and email addresses and collapse whitespace.
    pub(crate) fn description(&self, text: &str) -> String {
        let no_urls = self.url.replace_all(text, " ");
        let no_mail = self.email.replace_all(&no_urls, " ");
        collapse(&no_mail)
    }

    /// `Label: value` lines found in free card text.
    pub(crate) fn fields_from_text(&self, text: &str) -> BTreeMap<String, String> {
        text.lines()
            .filter_map(|line| self.field_line.captures(line))
            .filter_map(|c| {
                let label = field_key(c.get(1)?.as_str());
                let value = c.get(2)?.as_str().to_string();
                (!label.is_empty()).then_some((label, value))
            })
            .collect()
    }
}

/// Normalise a visible label into a record key: `"Avg $/sale:"` → `"avg_$/sale"`.
pub(crate) fn field_key(label: &str) -> String {
    collapse(label.trim().trim_end_matches(':'))
        .to_lowercase()
        .replace(' ', "_")
}

pub(crate) fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
