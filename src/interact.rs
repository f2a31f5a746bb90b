//! Retrying element operations and the click escalation chain.

use crate::config::InteractionConfig;
use crate::driver::{wait_for_condition, BrowserDriver, DriverError, DriverResult, ElementRef, Locator};
use crate::oracle::{OracleError, SelectorOracle, VisionGuess};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Elements the fuzzy step considers clickable.
const FUZZY_TAGS: &str =
    "button, a, select, option, label, input, [role=\"button\"], [onclick], div, span";

/// Upper bound on elements inspected by the fuzzy step.
const FUZZY_SCAN: usize = 400;

/// How long to keep looking for an element that is not there yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Fixed number of polls (content settling after an animation).
    Attempts(u32),
    /// Wall-clock bound (content arriving over the network).
    Timeout(Duration),
}

/// A click target that may need more than one strategy.
#[derive(Debug, Clone, Default)]
pub struct Escalation {
    pub selector: Option<String>,
    pub text: Option<String>,
    /// Natural-language description for the fuzzy and vision steps.
    pub description: String,
}

impl Escalation {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Which escalation step landed the click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickedBy {
    Selector,
    Text,
    Fuzzy,
    Vision,
}

/// Retrying operations against one driver.
pub struct Interactor<'a> {
    driver: &'a dyn BrowserDriver,
    config: InteractionConfig,
}

impl<'a> Interactor<'a> {
    pub fn new(driver: &'a dyn BrowserDriver, config: &InteractionConfig) -> Self {
        Self {
            driver,
            config: config.clone(),
        }
    }

    pub fn driver(&self) -> &'a dyn BrowserDriver {
        self.driver
    }

    /// The attempt-bounded wait from config.
    pub fn attempts(&self) -> Wait {
        Wait::Attempts(self.config.find_attempts)
    }

    fn poll(&self) -> Duration {
        Duration::from_millis(self.config.poll_ms)
    }

    /// Click the first match, retrying only while the click is intercepted.
    /// A missing element fails immediately.
    pub async fn click(&self, locator: &Locator) -> DriverResult<()> {
        let mut last = None;
        for attempt in 1..=self.config.click_attempts {
            let element = self.driver.find_element(None, locator).await?;
            match self.driver.click(element).await {
                Ok(()) => return Ok(()),
                Err(DriverError::Intercepted(by)) => {
                    debug!(
                        "click {} intercepted by {} ({}/{})",
                        locator, by, attempt, self.config.click_attempts
                    );
                    last = Some(DriverError::Intercepted(by));
                    tokio::time::sleep(Duration::from_millis(self.config.click_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| DriverError::Intercepted(locator.to_string())))
    }

    /// Click a known element, retrying only while the click is intercepted.
    pub async fn click_element(&self, element: ElementRef) -> DriverResult<()> {
        let mut last = None;
        for _ in 0..self.config.click_attempts {
            match self.driver.click(element).await {
                Ok(()) => return Ok(()),
                Err(e @ DriverError::Intercepted(_)) => {
                    last = Some(e);
                    tokio::time::sleep(Duration::from_millis(self.config.click_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| DriverError::Intercepted(element.to_string())))
    }

    /// Find one element, polling while it is not found.
    pub async fn find(
        &self,
        scope: Option<ElementRef>,
        locator: &Locator,
        wait: Wait,
    ) -> DriverResult<ElementRef> {
        match wait {
            Wait::Attempts(n) => {
                let mut last = DriverError::NotFound(locator.to_string());
                for attempt in 1..=n.max(1) {
                    match self.driver.find_element(scope, locator).await {
                        Ok(el) => return Ok(el),
                        Err(e) if e.is_not_found() => {
                            last = e;
                            if attempt < n {
                                tokio::time::sleep(self.poll()).await;
                            }
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(last)
            }
            Wait::Timeout(timeout) => {
                wait_for_condition(timeout, self.poll(), move || async move {
                    match self.driver.find_element(scope, locator).await {
                        Ok(el) => Ok(Some(el)),
                        Err(e) if e.is_not_found() => Ok(None),
                        Err(e) => Err(e),
                    }
                })
                .await
                .map_err(|e| match e {
                    DriverError::Timeout(_) => DriverError::NotFound(format!(
                        "{} (after {}ms)",
                        locator,
                        timeout.as_millis()
                    )),
                    other => other,
                })
            }
        }
    }

    /// Find all matches, waiting until there is at least one.
    pub async fn find_all(
        &self,
        scope: Option<ElementRef>,
        locator: &Locator,
        wait: Wait,
    ) -> DriverResult<Vec<ElementRef>> {
        self.find(scope, locator, wait).await?;
        self.driver.find_all(scope, locator).await
    }

    /// Trimmed text of the first match inside `context`.
    pub async fn read_text(
        &self,
        context: Option<ElementRef>,
        locator: &Locator,
        wait: Wait,
    ) -> DriverResult<String> {
        let element = self.find(context, locator, wait).await?;
        Ok(self.driver.read_text(element).await?.trim().to_string())
    }

    /// Trimmed text of an element, retried while it is briefly unreadable.
    pub async fn text_of(&self, element: ElementRef) -> DriverResult<String> {
        let mut last = None;
        for _ in 0..self.config.text_attempts.max(1) {
            match self.driver.read_text(element).await {
                Ok(t) => return Ok(t.trim().to_string()),
                Err(e @ DriverError::Stale(_)) => return Err(e),
                Err(e) => {
                    last = Some(e);
                    tokio::time::sleep(Duration::from_millis(self.config.text_delay_ms)).await;
                }
            }
        }
        Err(last.unwrap_or_else(|| DriverError::NotFound(element.to_string())))
    }

    /// Find and fill an input.
    pub async fn fill(&self, locator: &Locator, text: &str, wait: Wait) -> DriverResult<()> {
        let element = self.find(None, locator, wait).await?;
        self.driver.fill(element, text).await
    }

    /// Click `target`, escalating selector → text → fuzzy → vision.
    pub async fn escalate(
        &self,
        target: &Escalation,
        oracle: &SelectorOracle,
        diagnostics: &Diagnostics,
    ) -> DriverResult<ClickedBy> {
        if let Some(ref selector) = target.selector {
            match self.click(&Locator::parse(selector)).await {
                Ok(()) => return Ok(ClickedBy::Selector),
                Err(e) => debug!("escalate '{}': selector failed: {}", target.description, e),
            }
        }
        if let Some(ref text) = target.text {
            match self.click(&Locator::text(text.as_str())).await {
                Ok(()) => return Ok(ClickedBy::Text),
                Err(e) => debug!("escalate '{}': text failed: {}", target.description, e),
            }
        }
        if self.fuzzy_click(&target.description, diagnostics).await? {
            return Ok(ClickedBy::Fuzzy);
        }

        info!("escalate '{}': asking vision", target.description);
        let mut question = target.description.clone();
        for round in 0..2 {
            if round == 1 {
                question = format!("(Retry, previous answer did not work) {}", target.description);
            }
            let png = self.driver.screenshot().await.unwrap_or_default();
            let raw = match oracle.locate_from_vision(&png, &question).await {
                Ok(raw) => raw,
                Err(e) => {
                    diagnostics.record_vision_failure(&png, &question, "", &e.to_string());
                    if matches!(e, OracleError::Unsupported(_)) {
                        break;
                    }
                    continue;
                }
            };
            match self.dispatch_guess(&raw, diagnostics).await {
                Ok(()) => return Ok(ClickedBy::Vision),
                Err(e) => {
                    warn!("vision round {} failed: {}", round + 1, e);
                    diagnostics.record_vision_failure(&png, &question, &raw, &e);
                }
            }
        }

        Err(DriverError::NotFound(format!(
            "no strategy could click '{}'",
            target.description
        )))
    }

    async fn dispatch_guess(&self, raw: &str, diagnostics: &Diagnostics) -> Result<(), String> {
        let guess = VisionGuess::parse(raw).map_err(|e| e.to_string())?;
        match guess {
            VisionGuess::Selector(s) => self
                .click(&Locator::css(s))
                .await
                .map_err(|e| e.to_string()),
            VisionGuess::Text(t) => self
                .click(&Locator::text(t))
                .await
                .map_err(|e| e.to_string()),
            VisionGuess::Description(d) => match self.fuzzy_click(&d, diagnostics).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(format!("no candidate matched '{}'", d)),
                Err(e) => Err(e.to_string()),
            },
        }
    }

    /// Rank interactive elements against `description` and hover+click each
    /// in turn. `Ok(false)` when no candidate took the click.
    pub async fn fuzzy_click(&self, description: &str, diagnostics: &Diagnostics) -> DriverResult<bool> {
        let elements = self
            .driver
            .find_all(None, &Locator::css(FUZZY_TAGS))
            .await?;
        let terms = terms(description);

        let mut candidates = Vec::new();
        for (index, element) in elements.into_iter().take(FUZZY_SCAN).enumerate() {
            let Ok(candidate) = self.describe(index, element, &terms, description).await else {
                continue;
            };
            if candidate.score > 0.0 {
                candidates.push((element, candidate));
            }
        }
        candidates.sort_by(|a, b| b.1.score.total_cmp(&a.1.score));
        candidates.truncate(self.config.fuzzy_limit);

        let dump: Vec<&Candidate> = candidates.iter().map(|(_, c)| c).collect();
        diagnostics.dump_candidates(description, &dump);
        debug!("fuzzy '{}': {} candidates", description, candidates.len());

        for (element, candidate) in &candidates {
            if self.driver.hover(*element).await.is_err() {
                continue;
            }
            if self.driver.click(*element).await.is_ok() {
                info!(
                    "fuzzy click on '{}' (score {:.2})",
                    candidate.text, candidate.score
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn describe(
        &self,
        index: usize,
        element: ElementRef,
        terms: &[String],
        description: &str,
    ) -> DriverResult<Candidate> {
        let text = self.driver.read_text(element).await?.trim().to_string();
        let aria = self.driver.read_attribute(element, "aria-label").await?;
        let title = self.driver.read_attribute(element, "title").await?;
        let alt = self.driver.read_attribute(element, "alt").await?;
        let value = self.driver.read_attribute(element, "value").await?;

        let haystack = [Some(&text), aria.as_ref(), title.as_ref(), alt.as_ref(), value.as_ref()]
            .into_iter()
            .flatten()
            .map(|s| s.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let score = score(&haystack, terms, description);
        Ok(Candidate {
            index,
            text,
            aria,
            title,
            alt,
            value,
            score,
        })
    }
}

/// One fuzzy-step candidate, as written to the candidate dump.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub index: usize,
    pub text: String,
    pub aria: Option<String>,
    pub title: Option<String>,
    pub alt: Option<String>,
    pub value: Option<String>,
    pub score: f64,
}

fn terms(description: &str) -> Vec<String> {
    description
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(String::from)
        .collect()
}

/// Share of description terms present, plus one for a whole-phrase hit.
/// Short texts win ties over containers that merely include the words.
fn score(haystack: &str, terms: &[String], description: &str) -> f64 {
    if haystack.is_empty() || terms.is_empty() {
        return 0.0;
    }
    let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    if hits == 0 {
        return 0.0;
    }
    let mut score = hits as f64 / terms.len() as f64;
    if haystack.contains(&description.to_lowercase()) {
        score += 1.0;
    }
    score - (haystack.len() as f64 / 10_000.0).min(0.5)
}

/// Diagnostic artifacts for offline review. Writing is best-effort:
/// failures are logged and never interrupt a run.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
    seq: Arc<AtomicUsize>,
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Time plus a sequence number, unique within this run.
    fn stamp(&self) -> String {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:03}", chrono::Local::now().format("%Y%m%d-%H%M%S"), n)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Option<PathBuf> {
        let path = self.dir.join(name);
        let res = std::fs::create_dir_all(&self.dir).and_then(|()| std::fs::write(&path, bytes));
        match res {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("could not write {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Screenshot plus the oracle's raw answer for a failed vision round.
    pub fn record_vision_failure(&self, png: &[u8], question: &str, raw: &str, error: &str) {
        let stamp = self.stamp();
        if !png.is_empty() {
            self.write(&format!("vision-{}.png", stamp), png);
        }
        let record = serde_json::json!({
            "question": question,
            "raw": raw,
            "error": error,
        });
        if let Ok(body) = serde_json::to_vec_pretty(&record) {
            self.write(&format!("vision-{}.json", stamp), &body);
        }
    }

    /// Ranked fuzzy candidates for one description.
    pub fn dump_candidates(&self, description: &str, candidates: &[&Candidate]) {
        let record = serde_json::json!({
            "description": description,
            "candidates": candidates,
        });
        if let Ok(body) = serde_json::to_vec_pretty(&record) {
            self.write(&format!("candidates-{}.json", self.stamp()), &body);
        }
    }

    /// Screenshot and HTML of the current page, for traversal-fatal errors.
    pub async fn page_dump(&self, driver: &dyn BrowserDriver, label: &str) {
        let stamp = self.stamp();
        match driver.screenshot().await {
            Ok(png) => {
                self.write(&format!("{}-{}.png", label, stamp), &png);
            }
            Err(e) => warn!("screenshot for {} failed: {}", label, e),
        }
        match driver.html().await {
            Ok(html) => {
                let url = driver.url().await.unwrap_or_else(|_| "unknown".into());
                let dump = format!("<!-- {} -->\n{}", url, html);
                self.write(&format!("{}-{}.html", label, stamp), dump.as_bytes());
            }
            Err(e) => warn!("page dump for {} failed: {}", label, e),
        }
    }
}
