//! Selector oracle: turns natural-language target descriptions into locators
//! and structured judgments by asking a language model.
//!
//! Every reply is treated as untrusted text. Nothing in here returns an error
//! to the caller for a bad or missing answer; failures degrade to
//! [`LocatorResult::NoAnswer`], an unknown [`SiteProfile`], or an empty list.

mod http;

pub use http::HttpLlm;

use crate::reduce::{ReducedDocument, Reducer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Attempts `classify` makes before giving up.
pub const CLASSIFY_ATTEMPTS: usize = 5;

/// Byte cap for item snippets sent to `suggest_fields`.
const FIELD_SNIPPET_BUDGET: usize = 5000;

/// Why a model call produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0} is not supported by this model client")]
    Unsupported(&'static str),

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("unknown guess type '{0}'")]
    UnknownTag(String),
}

/// A text-completion model. Replies carry no format guarantee.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;

    /// Prompt with an attached PNG screenshot.
    async fn complete_with_image(&self, prompt: &str, png: &[u8]) -> Result<String, OracleError> {
        let _ = (prompt, png);
        Err(OracleError::Unsupported("image input"))
    }
}

/// Outcome of resolving one target description against one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum LocatorResult {
    /// A validated structural selector.
    Selector(String),
    /// The model says no such element exists.
    NotFound,
    /// The reply was not shaped like a selector.
    Invalid(String),
    /// The model call failed.
    NoAnswer,
}

impl LocatorResult {
    pub fn selector(&self) -> Option<&str> {
        match self {
            LocatorResult::Selector(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for LocatorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocatorResult::Selector(s) => write!(f, "{}", s),
            LocatorResult::NotFound => write!(f, "(not found)"),
            LocatorResult::Invalid(raw) => write!(f, "(invalid: {})", raw),
            LocatorResult::NoAnswer => write!(f, "(no answer)"),
        }
    }
}

/// High-level judgment about a page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SiteProfile {
    pub has_login: bool,
    #[serde(default = "SiteProfile::unknown_type")]
    pub site_type: String,
}

impl SiteProfile {
    fn unknown_type() -> String {
        "unknown".into()
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::default()
    }
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            has_login: false,
            site_type: Self::unknown_type(),
        }
    }
}

/// Free-text reasoning and the ordered target names distilled from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StrategyPlan {
    pub reasoning: String,
    pub targets: Vec<String>,
}

impl StrategyPlan {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// What a screenshot-based guess tells us to click.
#[derive(Debug, Clone, PartialEq)]
pub enum VisionGuess {
    Selector(String),
    Text(String),
    Description(String),
}

#[derive(Deserialize)]
struct RawGuess {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    #[serde(default)]
    confidence: Option<f32>,
}

impl VisionGuess {
    /// Parse a vision reply, digging the JSON object out of any prose.
    pub fn parse(raw: &str) -> Result<Self, OracleError> {
        let json = extract_json(raw).ok_or_else(|| OracleError::Malformed(raw.to_string()))?;
        let guess: RawGuess =
            serde_json::from_str(json).map_err(|_| OracleError::Malformed(raw.to_string()))?;
        debug!(
            "vision guess: type={} value={} confidence={}",
            guess.kind,
            guess.value,
            guess.confidence.unwrap_or(1.0)
        );
        match guess.kind.as_str() {
            "selector" => Ok(VisionGuess::Selector(guess.value)),
            "text" => Ok(VisionGuess::Text(guess.value)),
            "description" => Ok(VisionGuess::Description(guess.value)),
            _ => Err(OracleError::UnknownTag(guess.kind)),
        }
    }
}

/// Oracle client. Owns the model and the reduction budget.
pub struct SelectorOracle {
    llm: Box<dyn Llm>,
    reducer: Reducer,
}

impl SelectorOracle {
    pub fn new(llm: impl Llm + 'static, budget: usize) -> Self {
        Self {
            llm: Box::new(llm),
            reducer: Reducer::new(budget),
        }
    }

    /// Reduce raw HTML to the size this oracle embeds in prompts.
    pub fn reduce(&self, html: &str) -> ReducedDocument {
        self.reducer.reduce(html)
    }

    fn snippet<'a>(&self, doc: &'a ReducedDocument) -> &'a str {
        doc.prefix(self.reducer.budget())
    }

    async fn ask(&self, what: &str, prompt: &str) -> Option<String> {
        match self.llm.complete(prompt).await {
            Ok(reply) => {
                debug!("oracle {} reply: {}", what, preview(&reply));
                Some(reply)
            }
            Err(e) => {
                warn!("oracle {} failed: {}", what, e);
                None
            }
        }
    }

    /// Resolve `target` to a selector in `doc`.
    pub async fn resolve(&self, doc: &ReducedDocument, target: &str) -> LocatorResult {
        let prompt = format!(
            r#"You locate elements in web pages for a browser automation tool.

HTML (reduced):
{html}

Target element: "{target}"

Reply with the most specific CSS selector that matches exactly this element.
Prefer id, name, type or placeholder attributes when present.
If no such element exists reply with the single word null.
No explanation, no markdown, no quotes."#,
            html = self.snippet(doc),
            target = target
        );

        let Some(raw) = self.ask("resolve", &prompt).await else {
            return LocatorResult::NoAnswer;
        };
        let result = validate_selector(&raw);
        match result {
            LocatorResult::Invalid(_) => warn!("'{}': reply is not a selector: {}", target, raw),
            _ => info!("'{}' -> {}", target, result),
        }
        result
    }

    /// Judge whether the page has a login and what kind of site it is.
    /// Unparseable replies are retried; after the last attempt the profile is unknown.
    pub async fn classify(&self, doc: &ReducedDocument) -> SiteProfile {
        let prompt = format!(
            r#"You are analysing the purpose and structure of a web page.

HTML (reduced):
{html}

Return a JSON object with exactly these fields:
- has_login: true if a login form or a clearly labelled "Login"/"Sign in" link is present
- site_type: one lowercase word ("marketplace", "blog", "saas", "affiliate", ...) or "unknown"

Example: {{"has_login": true, "site_type": "marketplace"}}
Return only the JSON object."#,
            html = self.snippet(doc)
        );

        for attempt in 1..=CLASSIFY_ATTEMPTS {
            let Some(raw) = self.ask("classify", &prompt).await else {
                continue;
            };
            match parse_json::<SiteProfile>(&raw) {
                Some(profile) => {
                    info!(
                        "classified: site_type={} has_login={}",
                        profile.site_type, profile.has_login
                    );
                    return profile;
                }
                None => warn!(
                    "classify attempt {}/{}: unparseable reply",
                    attempt, CLASSIFY_ATTEMPTS
                ),
            }
        }
        warn!("classify gave up after {} attempts", CLASSIFY_ATTEMPTS);
        SiteProfile::default()
    }

    /// Two prompts: free-text reasoning first, then target names distilled from it.
    pub async fn plan_strategy(&self, doc: &ReducedDocument, site_type: &str) -> StrategyPlan {
        let reasoning_prompt = format!(
            r#"You plan scraping runs for a browser automation tool.
The site has been identified as: {site_type}

HTML (reduced):
{html}

Answer in three short plain-text paragraphs:
1. What the page contains (listing grid, product cards, dashboard, ...).
2. Which data is worth extracting, named by UI element ("product cards", "pagination links", "sales page links", "expand buttons").
3. The next two or three actions a scraper should take."#,
            site_type = site_type,
            html = self.snippet(doc)
        );

        let Some(reasoning) = self.ask("strategy", &reasoning_prompt).await else {
            return StrategyPlan::default();
        };
        let reasoning = reasoning.trim().to_string();
        if reasoning.is_empty() {
            return StrategyPlan::default();
        }

        let targets_prompt = format!(
            r#"Based on this scraping strategy, list the UI elements the scraper has to locate with CSS selectors, in the order it will need them.

Strategy:
{reasoning}

Reply with a JSON array of snake_case names only, for example:
["product_card", "pagination_link", "sales_page_link"]"#,
            reasoning = reasoning
        );

        let targets = match self.ask("targets", &targets_prompt).await {
            Some(raw) => parse_json::<Vec<String>>(&raw).unwrap_or_else(|| {
                warn!("target list unparseable: {}", preview(&raw));
                Vec::new()
            }),
            None => Vec::new(),
        };
        let targets = targets
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        StrategyPlan { reasoning, targets }
    }

    /// Resolve every planned target in order. Underscores read as spaces.
    pub async fn resolve_plan(
        &self,
        doc: &ReducedDocument,
        plan: &StrategyPlan,
    ) -> Vec<(String, LocatorResult)> {
        let mut out = Vec::with_capacity(plan.targets.len());
        for target in &plan.targets {
            let result = self.resolve(doc, &target.replace('_', " ")).await;
            out.push((target.clone(), result));
        }
        out
    }

    /// Field names worth scraping from one item's markup.
    pub async fn suggest_fields(&self, item_html: &str) -> Vec<String> {
        let doc = Reducer::new(FIELD_SNIPPET_BUDGET.min(self.reducer.budget())).reduce(item_html);
        let prompt = format!(
            r#"Below is the markup of one item from a marketplace listing.
Return a JSON array with the names of the fields worth extracting to evaluate and promote this item
(title, price, commission, vendor, category, description, sales page URL, ...).
Skip layout and UI chrome. Return only the JSON array.

HTML:
{html}"#,
            html = doc.as_str()
        );
        match self.ask("fields", &prompt).await {
            Some(raw) => parse_json(&raw).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Whether a snapshot shows real content rather than banners or loaders.
    /// `None` when the model gave no usable answer.
    pub async fn looks_useful(&self, doc: &ReducedDocument) -> Option<bool> {
        #[derive(Deserialize)]
        struct Verdict {
            valid: bool,
        }

        let prompt = format!(
            r#"Decide whether this HTML snapshot is useful for analysing the site.
It is not useful when it is mostly cookie banners, loading screens, modals or empty markup.
It is useful when it shows text content, navigation, forms or listings.

HTML (reduced):
{html}

Answer {{"valid": true}} or {{"valid": false}} and nothing else."#,
            html = self.snippet(doc)
        );
        let raw = self.ask("usefulness", &prompt).await?;
        parse_json::<Verdict>(&raw).map(|v| v.valid)
    }

    /// Ask where `question` is on a screenshot. Returns the raw reply;
    /// [`VisionGuess::parse`] turns it into something clickable.
    pub async fn locate_from_vision(&self, png: &[u8], question: &str) -> Result<String, OracleError> {
        let prompt = format!(
            r#"You are looking at a screenshot of a web page. Locate the element matching this instruction:

"{question}"

Reply only with a JSON object:
{{"type": "selector" | "text" | "description", "value": "...", "confidence": 0.0-1.0}}

Give a CSS selector when you can; otherwise the exact visible text, or failing that a short visual description.
No markdown."#,
            question = question
        );
        let raw = self.llm.complete_with_image(&prompt, png).await?;
        debug!("oracle vision reply: {}", preview(&raw));
        Ok(raw)
    }

    /// Ask for a repaired locator policy. Returns the raw reply, unvalidated.
    pub async fn propose_policy(&self, failure: &str, current_policy: &str) -> Option<String> {
        let prompt = format!(
            r#"A browser scraper failed. Its element locators come from the YAML policy below.

Failure log:
{failure}

Current policy:
{policy}

Return a complete replacement policy in the same YAML shape:
version: <integer>
locators:
  <name>: <css selector>

Only change locators that the failure implicates. Reply with the YAML document only."#,
            failure = failure,
            policy = current_policy
        );
        self.ask("patch", &prompt).await
    }
}

/// Clean up a raw selector reply and decide whether to trust it.
pub fn validate_selector(raw: &str) -> LocatorResult {
    let cleaned = strip_artifacts(raw);
    if cleaned.is_empty() {
        return LocatorResult::Invalid(raw.trim().to_string());
    }
    if matches!(
        cleaned.to_ascii_lowercase().as_str(),
        "null" | "none" | "not found" | "not_found"
    ) {
        return LocatorResult::NotFound;
    }
    if is_plausible_selector(cleaned) {
        LocatorResult::Selector(cleaned.to_string())
    } else {
        LocatorResult::Invalid(cleaned.to_string())
    }
}

/// A selector we accept names an id, class or attribute and parses as CSS.
pub fn is_plausible_selector(s: &str) -> bool {
    if !(s.contains('#') || s.contains('.') || s.contains('[')) {
        return false;
    }
    if s.contains('\n') || s.ends_with('.') || s.contains(". ") || s.contains(": ") {
        return false;
    }
    // Bare words must be lowercase tag names; capitalised words are prose.
    let prose = s
        .split(|c: char| c.is_whitespace() || c == '>' || c == '+' || c == '~' || c == ',')
        .filter(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_alphabetic()))
        .any(|w| w.chars().any(|c| c.is_ascii_uppercase()));
    if prose {
        return false;
    }
    scraper::Selector::parse(s).is_ok()
}

fn strip_artifacts(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```") {
        // drop the language tag line
        s = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
        s = s.trim_end().trim_end_matches("```");
    }
    s.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
}

/// Slice from the first `{`/`[` to the last matching closer.
pub fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find(['{', '['])?;
    let close = if raw[start..].starts_with('{') { '}' } else { ']' };
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..=end])
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_str(raw.trim())
        .ok()
        .or_else(|| extract_json(raw).and_then(|j| serde_json::from_str(j).ok()))
}

fn preview(s: &str) -> &str {
    let mut end = s.len().min(200);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays canned replies; `None` entries are transport failures.
    struct Scripted {
        replies: Mutex<VecDeque<Option<String>>>,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(replies: &[Option<&str>]) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let llm = Self {
                replies: Mutex::new(replies.iter().map(|r| r.map(String::from)).collect()),
                calls: calls.clone(),
            };
            (llm, calls)
        }
    }

    #[async_trait]
    impl Llm for Scripted {
        async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.lock().unwrap().pop_front() {
                Some(Some(r)) => Ok(r),
                _ => Err(OracleError::Transport("offline".into())),
            }
        }

        async fn complete_with_image(&self, prompt: &str, _png: &[u8]) -> Result<String, OracleError> {
            self.complete(prompt).await
        }
    }

    fn oracle(replies: &[Option<&str>]) -> (SelectorOracle, Arc<AtomicUsize>) {
        let (llm, calls) = Scripted::new(replies);
        (SelectorOracle::new(llm, 7000), calls)
    }

    #[tokio::test]
    async fn resolves_login_email_field() {
        let (oracle, _) = oracle(&[Some("#login-email")]);
        let doc = oracle.reduce(
            r#"<form><label for="login-email">Email</label><input id="login-email" type="email"></form>"#,
        );
        assert!(doc.as_str().contains(r#"id="login-email""#));
        let result = oracle.resolve(&doc, "email input field for login").await;
        assert_eq!(result, LocatorResult::Selector("#login-email".into()));
    }

    #[tokio::test]
    async fn null_token_is_not_found() {
        for reply in ["null", " NULL ", "\"null\"", "`null`"] {
            let (oracle, _) = oracle(&[Some(reply)]);
            let doc = oracle.reduce("<div>nothing here</div>");
            assert_eq!(oracle.resolve(&doc, "next page button").await, LocatorResult::NotFound);
        }
    }

    #[tokio::test]
    async fn prose_is_never_trusted() {
        for reply in [
            "button",
            "The login button in the header",
            "Click the blue button.",
            "I could not find it: sorry",
        ] {
            let (oracle, _) = oracle(&[Some(reply)]);
            let doc = oracle.reduce("<button>Go</button>");
            let result = oracle.resolve(&doc, "submit button").await;
            assert!(result.selector().is_none(), "{reply} -> {result:?}");
        }
    }

    #[tokio::test]
    async fn transport_failure_is_no_answer() {
        let (oracle, _) = oracle(&[None]);
        let doc = oracle.reduce("<div></div>");
        assert_eq!(oracle.resolve(&doc, "anything").await, LocatorResult::NoAnswer);
    }

    #[test]
    fn strips_quotes_and_fences() {
        assert_eq!(
            validate_selector("```css\ninput[name=\"email\"]\n```"),
            LocatorResult::Selector("input[name=\"email\"]".into())
        );
        assert_eq!(
            validate_selector("'.product-list-entry'"),
            LocatorResult::Selector(".product-list-entry".into())
        );
        assert_eq!(
            validate_selector("form.login > button[type=submit]"),
            LocatorResult::Selector("form.login > button[type=submit]".into())
        );
    }

    #[test]
    fn rejects_unparseable_css() {
        assert!(matches!(validate_selector("#"), LocatorResult::Invalid(_)));
        assert!(matches!(validate_selector("div[class="), LocatorResult::Invalid(_)));
    }

    #[tokio::test]
    async fn classify_succeeds_on_fifth_attempt() {
        let (oracle, calls) = oracle(&[
            Some("not json"),
            Some("{response}"),
            Some("{\"has_login\": tru"),
            Some("Sure! Here you go"),
            Some("{\"has_login\": true, \"site_type\": \"marketplace\"}"),
        ]);
        let doc = oracle.reduce("<a href=\"/login\">Login</a>");
        let profile = oracle.classify(&doc).await;
        assert!(profile.has_login);
        assert_eq!(profile.site_type, "marketplace");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn classify_gives_up_after_five() {
        let (oracle, calls) = oracle(&[Some("x"); 6]);
        let doc = oracle.reduce("<div></div>");
        let profile = oracle.classify(&doc).await;
        assert!(profile.is_unknown());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn classify_counts_transport_errors_as_attempts() {
        let (oracle, calls) = oracle(&[None, None, None, None, None]);
        let doc = oracle.reduce("<div></div>");
        assert!(oracle.classify(&doc).await.is_unknown());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn classify_accepts_json_wrapped_in_prose() {
        let (oracle, _) = oracle(&[Some(
            "Here is the analysis:\n{\"has_login\": false, \"site_type\": \"blog\"}\nThanks",
        )]);
        let doc = oracle.reduce("<p>post</p>");
        assert_eq!(oracle.classify(&doc).await.site_type, "blog");
    }

    #[tokio::test]
    async fn plan_strategy_runs_two_stages() {
        let (oracle, calls) = oracle(&[
            Some("The page is a product listing grid with pagination links."),
            Some("[\"product_card\", \"pagination_link\", \"sales_page_link\"]"),
        ]);
        let doc = oracle.reduce("<div class=\"grid\"></div>");
        let plan = oracle.plan_strategy(&doc, "marketplace").await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(plan.reasoning.contains("listing grid"));
        assert_eq!(
            plan.targets,
            vec!["product_card", "pagination_link", "sales_page_link"]
        );
    }

    #[tokio::test]
    async fn plan_strategy_stops_without_reasoning() {
        let (oracle, calls) = oracle(&[None, Some("[\"never_asked\"]")]);
        let doc = oracle.reduce("<div></div>");
        assert!(oracle.plan_strategy(&doc, "unknown").await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolve_plan_keeps_order_and_gaps() {
        let (oracle, _) = oracle(&[Some(".card"), Some("null")]);
        let plan = StrategyPlan {
            reasoning: String::new(),
            targets: vec!["product_card".into(), "next_page_button".into()],
        };
        let doc = oracle.reduce("<div class=\"card\"></div>");
        let resolved = oracle.resolve_plan(&doc, &plan).await;
        assert_eq!(resolved[0], ("product_card".into(), LocatorResult::Selector(".card".into())));
        assert_eq!(resolved[1], ("next_page_button".into(), LocatorResult::NotFound));
    }

    #[tokio::test]
    async fn suggest_fields_tolerates_garbage() {
        let (oracle, _) = oracle(&[Some("[\"Price\", \"Commission\"]"), Some("nope")]);
        assert_eq!(oracle.suggest_fields("<div>item</div>").await, vec!["Price", "Commission"]);
        assert!(oracle.suggest_fields("<div>item</div>").await.is_empty());
    }

    #[tokio::test]
    async fn looks_useful_reads_verdict() {
        let (oracle, _) = oracle(&[Some("{\"valid\": false}"), Some("maybe")]);
        let doc = oracle.reduce("<div>Accept cookies</div>");
        assert_eq!(oracle.looks_useful(&doc).await, Some(false));
        assert_eq!(oracle.looks_useful(&doc).await, None);
    }

    #[test]
    fn vision_guess_is_a_closed_set() {
        assert_eq!(
            VisionGuess::parse("{\"type\": \"text\", \"value\": \"Sales page\"}").unwrap(),
            VisionGuess::Text("Sales page".into())
        );
        assert_eq!(
            VisionGuess::parse("Sure:\n```json\n{\"type\": \"selector\", \"value\": \"#go\", \"confidence\": 0.7}\n```")
                .unwrap(),
            VisionGuess::Selector("#go".into())
        );
        assert_eq!(
            VisionGuess::parse("{\"type\": \"xpath\", \"value\": \"//a\"}"),
            Err(OracleError::UnknownTag("xpath".into()))
        );
        assert!(matches!(
            VisionGuess::parse("no json at all"),
            Err(OracleError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn vision_unsupported_by_text_only_model() {
        struct TextOnly;

        #[async_trait]
        impl Llm for TextOnly {
            async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
                Ok(String::new())
            }
        }

        let oracle = SelectorOracle::new(TextOnly, 7000);
        assert!(matches!(
            oracle.locate_from_vision(&[0u8; 4], "login button").await,
            Err(OracleError::Unsupported(_))
        ));
    }

    #[test]
    fn extract_json_finds_outer_object() {
        assert_eq!(extract_json("x {\"a\": {\"b\": 1}} y"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json("list: [1, 2]"), Some("[1, 2]"));
        assert_eq!(extract_json("none"), None);
    }
}
