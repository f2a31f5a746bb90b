//! In-memory browser, scripted model and stub process runner shared by the
//! integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use eoka_harvest::driver::DriverResult;
use eoka_harvest::{
    BrowserDriver, Config, DriverError, ElementRef, Llm, Locator, OracleError, ProcessOutcome,
    ProcessOutput, ProcessRunner,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    pub children: Vec<Node>,
}

/// `el("button.primary#go")`
pub fn el(spec: &str) -> Node {
    let mut node = Node::default();
    let mut rest = spec;
    let end = rest.find(|c| c == '.' || c == '#').unwrap_or(rest.len());
    node.tag = rest[..end].to_string();
    rest = &rest[end..];
    while let Some(first) = rest.chars().next() {
        let body = &rest[1..];
        let end = body.find(|c| c == '.' || c == '#').unwrap_or(body.len());
        let name = body[..end].to_string();
        match first {
            '.' => node.classes.push(name),
            _ => node.id = Some(name),
        }
        rest = &body[end..];
    }
    node
}

impl Node {
    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }
}

#[derive(Debug, Clone)]
struct Flat {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: BTreeMap<String, String>,
    text: String,
    parent: Option<usize>,
    children: Vec<usize>,
}

fn flatten(nodes: &[Node]) -> Vec<Flat> {
    let mut out = vec![Flat {
        tag: "body".into(),
        id: None,
        classes: Vec::new(),
        attrs: BTreeMap::new(),
        text: String::new(),
        parent: None,
        children: Vec::new(),
    }];
    for node in nodes {
        push(&mut out, node, 0);
    }
    out
}

fn push(out: &mut Vec<Flat>, node: &Node, parent: usize) {
    let idx = out.len();
    out.push(Flat {
        tag: node.tag.clone(),
        id: node.id.clone(),
        classes: node.classes.clone(),
        attrs: node.attrs.clone(),
        text: node.text.clone(),
        parent: Some(parent),
        children: Vec::new(),
    });
    out[parent].children.push(idx);
    for child in &node.children {
        push(out, child, idx);
    }
}

/// One compound selector: `tag.class#id[attr*="v"]`.
#[derive(Debug, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, String, Option<String>)>,
}

fn parse_compound(s: &str) -> Compound {
    let mut c = Compound::default();
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    let ident = |i: &mut usize| {
        let start = *i;
        while *i < chars.len() && (chars[*i].is_alphanumeric() || chars[*i] == '-' || chars[*i] == '_') {
            *i += 1;
        }
        chars[start..*i].iter().collect::<String>()
    };
    if i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '*') {
        if chars[i] == '*' {
            i += 1;
        } else {
            c.tag = Some(ident(&mut i));
        }
    }
    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                c.classes.push(ident(&mut i));
            }
            '#' => {
                i += 1;
                c.id = Some(ident(&mut i));
            }
            '[' => {
                let close = chars[i..].iter().position(|&ch| ch == ']').map(|p| i + p).unwrap_or(chars.len());
                let inner: String = chars[i + 1..close].iter().collect();
                let (name, op, value) = if let Some((n, v)) = inner.split_once("*=") {
                    (n, "*=", Some(v))
                } else if let Some((n, v)) = inner.split_once("^=") {
                    (n, "^=", Some(v))
                } else if let Some((n, v)) = inner.split_once('=') {
                    (n, "=", Some(v))
                } else {
                    (inner.as_str(), "", None)
                };
                c.attrs.push((
                    name.trim().to_string(),
                    op.to_string(),
                    value.map(|v| v.trim().trim_matches(|q| q == '"' || q == '\'').to_string()),
                ));
                i = close + 1;
            }
            _ => {
                // unsupported syntax never matches
                c.tag = Some("\u{0}".into());
                break;
            }
        }
    }
    c
}

fn attr_of<'a>(node: &'a Flat, name: &str) -> Option<&'a str> {
    match name {
        "id" => node.id.as_deref(),
        _ => node.attrs.get(name).map(String::as_str),
    }
}

fn matches_compound(node: &Flat, c: &Compound) -> bool {
    if let Some(ref tag) = c.tag {
        if !node.tag.eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    if c.id.is_some() && node.id != c.id {
        return false;
    }
    if !c.classes.iter().all(|cls| node.classes.contains(cls)) {
        return false;
    }
    c.attrs.iter().all(|(name, op, value)| {
        let Some(actual) = attr_of(node, name) else {
            return false;
        };
        match (op.as_str(), value) {
            ("*=", Some(v)) => actual.contains(v.as_str()),
            ("^=", Some(v)) => actual.starts_with(v.as_str()),
            ("=", Some(v)) => actual == v,
            _ => true,
        }
    })
}

// ---------------------------------------------------------------------------
// Fake driver
// ---------------------------------------------------------------------------

struct State {
    url: String,
    doc: Vec<Flat>,
    generation: u64,
    refs: HashMap<u64, (u64, usize)>,
    next_ref: u64,
    queries: usize,
    click_faults: Vec<(String, DriverError)>,
    clicks: Vec<String>,
    fills: Vec<(String, String)>,
    navigations: Vec<String>,
    cookies: Vec<(String, String)>,
}

/// A browser over a fixed set of pages keyed by URL. Clicking anything
/// with an `href` or `data-goto` present in the site loads that page.
///
/// Nodes with `data-appear-after="N"` stay invisible until the driver has
/// answered N queries.
pub struct FakeDriver {
    site: HashMap<String, Vec<Node>>,
    state: Mutex<State>,
}

impl FakeDriver {
    pub fn new(site: HashMap<String, Vec<Node>>) -> Self {
        Self {
            site,
            state: Mutex::new(State {
                url: "about:blank".into(),
                doc: flatten(&[]),
                generation: 0,
                refs: HashMap::new(),
                next_ref: 1,
                queries: 0,
                click_faults: Vec::new(),
                clicks: Vec::new(),
                fills: Vec::new(),
                navigations: Vec::new(),
                cookies: Vec::new(),
            }),
        }
    }

    /// A single page at `url`, already loaded.
    pub fn page(url: &str, nodes: Vec<Node>) -> Self {
        let mut site = HashMap::new();
        site.insert(url.to_string(), nodes);
        let driver = Self::new(site);
        driver.load(url);
        driver
    }

    /// The next click on an element whose label contains `key` fails with
    /// `error`. Faults queue up in order.
    pub fn with_click_fault(self, key: &str, error: DriverError) -> Self {
        self.state().click_faults.push((key.to_string(), error));
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn load(&self, url: &str) -> bool {
        let Some(nodes) = self.site.get(url) else {
            return false;
        };
        let mut st = self.state();
        st.url = url.to_string();
        st.doc = flatten(nodes);
        st.generation += 1;
        st.navigations.push(url.to_string());
        true
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state().clicks.clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.state().fills.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state().navigations.clone()
    }

    pub fn cookies(&self) -> Vec<(String, String)> {
        self.state().cookies.clone()
    }

    pub fn current_url(&self) -> String {
        self.state().url.clone()
    }
}

fn text_content(doc: &[Flat], idx: usize) -> String {
    let mut parts = Vec::new();
    if !doc[idx].text.is_empty() {
        parts.push(doc[idx].text.clone());
    }
    for &c in &doc[idx].children {
        let t = text_content(doc, c);
        if !t.is_empty() {
            parts.push(t);
        }
    }
    parts.join("\n")
}

fn is_ancestor(doc: &[Flat], ancestor: usize, mut idx: usize) -> bool {
    while let Some(p) = doc[idx].parent {
        if p == ancestor {
            return true;
        }
        idx = p;
    }
    false
}

fn visible(node: &Flat, queries: usize) -> bool {
    node.attrs
        .get("data-appear-after")
        .and_then(|n| n.parse::<usize>().ok())
        .map_or(true, |n| queries >= n)
}

fn label(doc: &[Flat], idx: usize) -> String {
    let text = text_content(doc, idx);
    if !text.is_empty() {
        return text;
    }
    doc[idx]
        .id
        .as_ref()
        .map(|id| format!("#{}", id))
        .unwrap_or_else(|| doc[idx].tag.clone())
}

fn css_matches(doc: &[Flat], idx: usize, selector: &str) -> bool {
    selector.split(',').any(|group| {
        let parts: Vec<Compound> = group.split_whitespace().map(parse_compound).collect();
        let Some((last, ancestors)) = parts.split_last() else {
            return false;
        };
        if !matches_compound(&doc[idx], last) {
            return false;
        }
        let mut cursor = doc[idx].parent;
        for want in ancestors.iter().rev() {
            loop {
                let Some(p) = cursor else {
                    return false;
                };
                cursor = doc[p].parent;
                if matches_compound(&doc[p], want) {
                    break;
                }
            }
        }
        true
    })
}

fn query(st: &mut State, scope: Option<ElementRef>, locator: &Locator) -> DriverResult<Vec<usize>> {
    st.queries += 1;
    let scope_idx = match scope {
        Some(r) => Some(resolve(st, r)?),
        None => None,
    };
    let doc = &st.doc;
    let in_scope = |i: usize| i != 0 && scope_idx.map_or(true, |s| is_ancestor(doc, s, i));
    let candidates: Vec<usize> = (0..doc.len())
        .filter(|&i| in_scope(i) && visible(&doc[i], st.queries))
        .collect();

    let found = match locator {
        Locator::Css(sel) => candidates
            .into_iter()
            .filter(|&i| css_matches(doc, i, sel))
            .collect(),
        Locator::Text(t) => {
            let needle = t.to_lowercase();
            let hits: Vec<usize> = candidates
                .into_iter()
                .filter(|&i| {
                    text_content(doc, i).to_lowercase().contains(&needle)
                        || ["aria-label", "value"].iter().any(|a| {
                            doc[i]
                                .attrs
                                .get(*a)
                                .is_some_and(|v| v.to_lowercase().contains(&needle))
                        })
                })
                .collect();
            hits.iter()
                .copied()
                .filter(|&i| !hits.iter().any(|&j| j != i && is_ancestor(doc, i, j)))
                .collect()
        }
        Locator::Placeholder(p) => candidates
            .into_iter()
            .filter(|&i| doc[i].attrs.get("placeholder") == Some(p))
            .collect(),
        Locator::Role(r) => candidates
            .into_iter()
            .filter(|&i| doc[i].tag == *r || doc[i].attrs.get("role") == Some(r))
            .collect(),
        Locator::Id(id) => candidates
            .into_iter()
            .filter(|&i| doc[i].id.as_ref() == Some(id))
            .collect(),
    };
    Ok(found)
}

fn alloc(st: &mut State, idx: usize) -> ElementRef {
    let r = st.next_ref;
    st.next_ref += 1;
    st.refs.insert(r, (st.generation, idx));
    ElementRef(r)
}

fn resolve(st: &State, element: ElementRef) -> DriverResult<usize> {
    match st.refs.get(&element.0) {
        Some(&(generation, idx)) if generation == st.generation => Ok(idx),
        _ => Err(DriverError::Stale(element.to_string())),
    }
}

fn serialize(doc: &[Flat], idx: usize, out: &mut String) {
    let node = &doc[idx];
    out.push('<');
    out.push_str(&node.tag);
    if let Some(ref id) = node.id {
        out.push_str(&format!(" id=\"{}\"", id));
    }
    if !node.classes.is_empty() {
        out.push_str(&format!(" class=\"{}\"", node.classes.join(" ")));
    }
    for (k, v) in &node.attrs {
        out.push_str(&format!(" {}=\"{}\"", k, v));
    }
    out.push('>');
    out.push_str(&node.text);
    for &c in &node.children {
        serialize(doc, c, out);
    }
    out.push_str(&format!("</{}>", node.tag));
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        if self.load(url) {
            Ok(())
        } else {
            Err(DriverError::Browser(format!("no page at {}", url)))
        }
    }

    async fn url(&self) -> DriverResult<String> {
        Ok(self.current_url())
    }

    async fn html(&self) -> DriverResult<String> {
        let st = self.state();
        let mut out = String::from("<html><head><script>var tracking = 1;</script></head>");
        serialize(&st.doc, 0, &mut out);
        out.push_str("</html>");
        Ok(out)
    }

    async fn find_element(
        &self,
        scope: Option<ElementRef>,
        locator: &Locator,
    ) -> DriverResult<ElementRef> {
        let mut st = self.state();
        let found = query(&mut st, scope, locator)?;
        match found.first() {
            Some(&idx) => Ok(alloc(&mut st, idx)),
            None => Err(DriverError::NotFound(locator.to_string())),
        }
    }

    async fn find_all(
        &self,
        scope: Option<ElementRef>,
        locator: &Locator,
    ) -> DriverResult<Vec<ElementRef>> {
        let mut st = self.state();
        let found = query(&mut st, scope, locator)?;
        Ok(found.into_iter().map(|idx| alloc(&mut st, idx)).collect())
    }

    async fn click(&self, element: ElementRef) -> DriverResult<()> {
        let target = {
            let mut st = self.state();
            let idx = resolve(&st, element)?;
            let label = label(&st.doc, idx);
            if let Some(pos) = st.click_faults.iter().position(|(key, _)| label.contains(key.as_str())) {
                let (_, err) = st.click_faults.remove(pos);
                return Err(err);
            }
            st.clicks.push(label);
            let node = &st.doc[idx];
            node.attrs
                .get("href")
                .or_else(|| node.attrs.get("data-goto"))
                .cloned()
        };
        if let Some(url) = target {
            self.load(&url);
        }
        Ok(())
    }

    async fn hover(&self, element: ElementRef) -> DriverResult<()> {
        resolve(&self.state(), element).map(|_| ())
    }

    async fn fill(&self, element: ElementRef, text: &str) -> DriverResult<()> {
        let mut st = self.state();
        let idx = resolve(&st, element)?;
        st.doc[idx].attrs.insert("value".into(), text.to_string());
        let name = st.doc[idx]
            .id
            .clone()
            .or_else(|| st.doc[idx].attrs.get("name").cloned())
            .unwrap_or_default();
        st.fills.push((name, text.to_string()));
        Ok(())
    }

    async fn read_text(&self, element: ElementRef) -> DriverResult<String> {
        let st = self.state();
        let idx = resolve(&st, element)?;
        Ok(text_content(&st.doc, idx))
    }

    async fn read_attribute(&self, element: ElementRef, name: &str) -> DriverResult<Option<String>> {
        let st = self.state();
        let idx = resolve(&st, element)?;
        Ok(attr_of(&st.doc[idx], name).map(String::from))
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn is_stale(&self, element: ElementRef) -> DriverResult<bool> {
        Ok(resolve(&self.state(), element).is_err())
    }

    async fn set_cookie(
        &self,
        name: &str,
        value: &str,
        _domain: Option<&str>,
        _path: Option<&str>,
    ) -> DriverResult<()> {
        self.state().cookies.push((name.to_string(), value.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Listing fixtures
// ---------------------------------------------------------------------------

pub const MARKET: &str = "https://shop.test/market";
pub const LOGIN: &str = "https://shop.test/login";

pub fn page_url(page: usize) -> String {
    format!("{}?page={}", MARKET, page)
}

/// `count` titles `"{prefix} {n}"`.
pub fn titles(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|n| format!("{} {}", prefix, n)).collect()
}

/// A product card. An empty title leaves the title element out.
pub fn offer_card(title: &str) -> Node {
    let mut card = el("div.product-list-entry");
    if !title.is_empty() {
        card = card.child(el("h3.product-title").text(title));
    }
    card.children([
        el("button.show-more").text("Show more"),
        el("div.product-stat").children([
            el("span.label").text("Commission:"),
            el("span.value").text("50%"),
        ]),
        el("div.product-stat").children([
            el("span.label").text("Gravity"),
            el("span.value").text("120.5"),
        ]),
        el("p.product-description")
            .text("Top converting offer. See https://vendor.test/x or mail help@vendor.test"),
        el("a")
            .attr("href", &format!("https://vendor.test/sales/{}", title.replace(' ', "-")))
            .text("Sales page"),
    ])
}

/// Numbered page links plus "Next »" when a further page exists.
fn pager(page: usize, last: usize) -> Node {
    let mut nav = el("nav.pagination");
    for p in 1..=last {
        nav = nav.child(el("a").attr("href", &page_url(p)).text(&p.to_string()));
    }
    if page < last {
        nav = nav.child(el("a.next").attr("href", &page_url(page + 1)).text("Next »"));
    }
    nav
}

/// One listing page per entry of `pages`. A single page gets no pager.
pub fn listing_site(pages: &[Vec<String>]) -> HashMap<String, Vec<Node>> {
    let last = pages.len();
    pages
        .iter()
        .enumerate()
        .map(|(i, titles)| {
            let page = i + 1;
            let mut nodes: Vec<Node> = titles.iter().map(|t| offer_card(t)).collect();
            if last > 1 {
                nodes.push(pager(page, last));
            }
            (page_url(page), nodes)
        })
        .collect()
}

pub fn login_page() -> Vec<Node> {
    vec![el("form#login").children([
        el("input#login-email").attr("type", "email").attr("name", "email"),
        el("input#login-password").attr("type", "password").attr("name", "password"),
        el("button")
            .attr("type", "submit")
            .attr("data-goto", &page_url(1))
            .text("Sign in"),
    ])]
}

/// Listing config with short timeouts for the fake driver.
pub fn test_config(dir: &std::path::Path, extra: &str) -> Config {
    let yaml = format!(
        r#"
name: "Fake market"
target:
  url: "{url}"
listing:
  card: ".product-list-entry"
  title: ".product-title"
  expand: "text:Show more"
  field_label: ".label"
  field_value: ".value"
  description: ".product-description"
  full_page: 100
  card_timeout_ms: 200
  stale_timeout_ms: 200
interaction:
  click_delay_ms: 5
  poll_ms: 5
  text_delay_ms: 5
output:
  records: "{records}"
  diagnostics: "{diag}"
{extra}
"#,
        url = page_url(1),
        records = dir.join("offers.jsonl").display(),
        diag = dir.join("diagnostics").display(),
        extra = extra
    );
    Config::parse(&yaml).unwrap()
}

pub fn files_in(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Scripted model
// ---------------------------------------------------------------------------

/// Replies in order; an exhausted script is a transport error. Clones share
/// the script, so a test keeps a handle after giving one to the oracle.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    replies: Arc<Mutex<VecDeque<Result<String, OracleError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    image_prompts: Arc<Mutex<Vec<String>>>,
    vision: bool,
}

impl ScriptedLlm {
    pub fn new<'a>(replies: impl IntoIterator<Item = &'a str>) -> Self {
        let llm = Self::default();
        for r in replies {
            llm.reply(r);
        }
        llm
    }

    /// Accept image prompts too.
    pub fn with_vision(mut self) -> Self {
        self.vision = true;
        self
    }

    pub fn reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn fail(&self, error: OracleError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn image_prompts(&self) -> Vec<String> {
        self.image_prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len() + self.image_prompts.lock().unwrap().len()
    }

    fn next(&self) -> Result<String, OracleError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Transport("script exhausted".into())))
    }
}

#[async_trait]
impl Llm for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.next()
    }

    async fn complete_with_image(&self, prompt: &str, _png: &[u8]) -> Result<String, OracleError> {
        if !self.vision {
            return Err(OracleError::Unsupported("image input"));
        }
        self.image_prompts.lock().unwrap().push(prompt.to_string());
        self.next()
    }
}

// ---------------------------------------------------------------------------
// Process runners
// ---------------------------------------------------------------------------

pub fn finished(status: i32, stderr: &str) -> ProcessOutcome {
    ProcessOutcome::Finished(ProcessOutput {
        status: Some(status),
        stdout: String::new(),
        stderr: stderr.to_string(),
    })
}

/// Returns the same outcome every run.
pub struct StubRunner {
    outcome: ProcessOutcome,
    runs: AtomicUsize,
}

impl StubRunner {
    pub fn new(outcome: ProcessOutcome) -> Self {
        Self {
            outcome,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessRunner for StubRunner {
    async fn run(&self, _command: &[String], _timeout: Duration) -> eoka_harvest::Result<ProcessOutcome> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

/// Succeeds once the live policy file mentions `needle`; fails with
/// `stderr` until then.
pub struct PolicyAwareRunner {
    pub policy: PathBuf,
    pub needle: String,
    pub stderr: String,
}

#[async_trait]
impl ProcessRunner for PolicyAwareRunner {
    async fn run(&self, _command: &[String], _timeout: Duration) -> eoka_harvest::Result<ProcessOutcome> {
        let live = std::fs::read_to_string(&self.policy).unwrap_or_default();
        if live.contains(&self.needle) {
            Ok(finished(0, ""))
        } else {
            Ok(finished(1, &self.stderr))
        }
    }
}
