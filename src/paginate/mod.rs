//! Listing traversal: walks every page once, extracting each distinct item.
//!
//! ```text
//! LoadingPage → Extracting → CheckingForNewItems ─┬→ AdvancingPage → LoadingPage
//!                                                 └→ Done
//! ```

mod record;

pub use record::{OfferRecord, SeenSet};

use crate::config::{InteractionConfig, ListingConfig, PromoteConfig};
use crate::driver::{BrowserDriver, DriverError, DriverResult, ElementRef, Locator};
use crate::interact::{Diagnostics, Interactor, Wait};
use crate::patch::Policy;
use crate::sink::RecordSink;
use crate::{Error, Result};
use record::{field_key, Cleaner};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Traversal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalState {
    LoadingPage,
    Extracting,
    CheckingForNewItems,
    AdvancingPage,
    Done,
}

/// Why a traversal ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A page contributed no unseen identities.
    NoNewItems,
    /// A page held fewer cards than a full page.
    ShortPage,
    /// No page links to advance with.
    NoPageLinks,
    /// Traversal-fatal error. Records collected so far are kept.
    Aborted(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::NoNewItems => write!(f, "no new items"),
            StopReason::ShortPage => write!(f, "short page"),
            StopReason::NoPageLinks => write!(f, "no page links"),
            StopReason::Aborted(why) => write!(f, "aborted: {}", why),
        }
    }
}

/// Decide whether the page just extracted was the last one.
///
/// Either signal alone ends the walk: no unseen identities, or fewer cards
/// than a full page.
pub fn stop_reason(new_identities: usize, cards: usize, full_page: usize) -> Option<StopReason> {
    if new_identities == 0 {
        Some(StopReason::NoNewItems)
    } else if cards < full_page {
        Some(StopReason::ShortPage)
    } else {
        None
    }
}

/// Result of one traversal.
#[derive(Debug, Clone)]
pub struct Traversal {
    pub records: Vec<OfferRecord>,
    /// Page numbers in visiting order, starting at 1.
    pub pages_visited: Vec<usize>,
    pub end: StopReason,
}

impl Traversal {
    pub fn is_complete(&self) -> bool {
        !matches!(self.end, StopReason::Aborted(_))
    }
}

/// Locators and limits for one listing, after policy overrides.
#[derive(Debug, Clone)]
pub struct ListingSpec {
    pub card: Locator,
    pub title: Locator,
    pub expand: Option<Locator>,
    pub field_label: Option<Locator>,
    pub field_value: Option<Locator>,
    pub description: Option<Locator>,
    pub page_link: Locator,
    pub link_label: String,
    pub full_page: usize,
    pub card_timeout: Duration,
    pub stale_timeout: Duration,
    pub promote: Option<PromoteConfig>,
}

impl ListingSpec {
    pub fn from_config(config: &ListingConfig) -> Self {
        let opt = |s: &Option<String>| s.as_deref().map(Locator::parse);
        Self {
            card: Locator::parse(&config.card),
            title: Locator::parse(&config.title),
            expand: opt(&config.expand),
            field_label: opt(&config.field_label),
            field_value: opt(&config.field_value),
            description: opt(&config.description),
            page_link: Locator::parse(&config.page_link),
            link_label: config.link_label.clone(),
            full_page: config.full_page,
            card_timeout: Duration::from_millis(config.card_timeout_ms),
            stale_timeout: Duration::from_millis(config.stale_timeout_ms),
            promote: config.promote.clone(),
        }
    }

    /// Replace locators the policy names.
    pub fn with_policy(mut self, policy: &Policy) -> Self {
        for (name, value) in &policy.locators {
            let loc = Locator::parse(value);
            match name.as_str() {
                "card" => self.card = loc,
                "title" => self.title = loc,
                "expand" => self.expand = Some(loc),
                "field_label" => self.field_label = Some(loc),
                "field_value" => self.field_value = Some(loc),
                "description" => self.description = Some(loc),
                "page_link" => self.page_link = loc,
                _ => continue,
            }
            debug!("policy v{}: {} = {}", policy.version, name, value);
        }
        self
    }
}

/// Drives one listing traversal over a live page.
pub struct Paginator<'a> {
    interactor: Interactor<'a>,
    spec: ListingSpec,
    diagnostics: Diagnostics,
    cleaner: Cleaner,
}

impl<'a> Paginator<'a> {
    pub fn new(
        driver: &'a dyn BrowserDriver,
        interaction: &InteractionConfig,
        spec: ListingSpec,
        diagnostics: Diagnostics,
    ) -> Result<Self> {
        let cleaner = Cleaner::new().map_err(|e| Error::Config(format!("cleanup rules: {}", e)))?;
        Ok(Self {
            interactor: Interactor::new(driver, interaction),
            spec,
            diagnostics,
            cleaner,
        })
    }

    fn driver(&self) -> &'a dyn BrowserDriver {
        self.interactor.driver()
    }

    /// Walk the listing from the current page. Never fails as a whole:
    /// errors end the walk with [`StopReason::Aborted`] and keep what was
    /// collected.
    pub async fn traverse(&self, sink: &mut dyn RecordSink) -> Traversal {
        let mut seen = SeenSet::new();
        let mut records = Vec::new();
        let mut pages_visited = Vec::new();
        let mut page = 1;
        let mut cards: Vec<ElementRef> = Vec::new();
        let mut new_on_page = 0;
        let mut state = TraversalState::LoadingPage;
        let mut end = None;

        while state != TraversalState::Done {
            debug!("page {}: {:?}", page, state);
            state = match state {
                TraversalState::LoadingPage => match self.load_cards().await {
                    Ok(found) => {
                        info!("page {}: {} cards", page, found.len());
                        pages_visited.push(page);
                        cards = found;
                        TraversalState::Extracting
                    }
                    Err(e) => {
                        self.diagnostics.page_dump(self.driver(), "no-cards").await;
                        end = Some(StopReason::Aborted(format!("page {}: no cards: {}", page, e)));
                        TraversalState::Done
                    }
                },

                TraversalState::Extracting => {
                    new_on_page = 0;
                    let mut next = TraversalState::CheckingForNewItems;
                    for (i, &card) in cards.iter().enumerate() {
                        match self.extract_card(card, page, &mut seen).await {
                            Ok(Some(record)) => {
                                new_on_page += 1;
                                let emitted = sink.emit(&record);
                                records.push(record);
                                if let Err(e) = emitted {
                                    end = Some(StopReason::Aborted(format!("record sink: {}", e)));
                                    next = TraversalState::Done;
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!("page {} card {}: {}", page, i + 1, e),
                        }
                    }
                    next
                }

                TraversalState::CheckingForNewItems => {
                    debug!(
                        "page {}: {} new of {} (seen {})",
                        page,
                        new_on_page,
                        cards.len(),
                        seen.len()
                    );
                    match stop_reason(new_on_page, cards.len(), self.spec.full_page) {
                        Some(reason) => {
                            end = Some(reason);
                            TraversalState::Done
                        }
                        None => TraversalState::AdvancingPage,
                    }
                }

                TraversalState::AdvancingPage => {
                    let advanced = match cards.first() {
                        Some(&reference) => self.advance(reference).await,
                        None => Err(DriverError::NotFound("reference card".into())),
                    };
                    match advanced {
                        Ok(true) => {
                            page += 1;
                            TraversalState::LoadingPage
                        }
                        Ok(false) => {
                            end = Some(StopReason::NoPageLinks);
                            TraversalState::Done
                        }
                        Err(e) => {
                            self.diagnostics.page_dump(self.driver(), "advance").await;
                            end = Some(StopReason::Aborted(format!("page {}: advance: {}", page, e)));
                            TraversalState::Done
                        }
                    }
                }

                TraversalState::Done => TraversalState::Done,
            };
        }
        let end = end.unwrap_or(StopReason::NoNewItems);

        info!(
            "traversal done: {} records over {} pages ({})",
            records.len(),
            pages_visited.len(),
            end
        );
        Traversal {
            records,
            pages_visited,
            end,
        }
    }

    async fn load_cards(&self) -> DriverResult<Vec<ElementRef>> {
        self.interactor
            .find_all(None, &self.spec.card, Wait::Timeout(self.spec.card_timeout))
            .await
    }

    /// Click the last page link and wait until the old page is gone.
    /// `Ok(false)` when there are no page links.
    async fn advance(&self, reference: ElementRef) -> DriverResult<bool> {
        let driver = self.driver();
        let links = driver.find_all(None, &self.spec.page_link).await?;
        let Some(&next) = links.last() else {
            return Ok(false);
        };

        match self.interactor.click_element(next).await {
            Ok(()) => {}
            Err(DriverError::Stale(_)) => {
                debug!("page link went stale, locating it again");
                let links = driver.find_all(None, &self.spec.page_link).await?;
                let Some(&next) = links.last() else {
                    return Ok(false);
                };
                self.interactor.click_element(next).await?;
            }
            Err(e) => return Err(e),
        }

        driver
            .wait_for_staleness(reference, self.spec.stale_timeout)
            .await?;
        Ok(true)
    }

    /// `Ok(None)` for an identity already seen.
    async fn extract_card(
        &self,
        card: ElementRef,
        page: usize,
        seen: &mut SeenSet,
    ) -> DriverResult<Option<OfferRecord>> {
        let title = self.driver().find_element(Some(card), &self.spec.title).await?;
        let raw_name = self.interactor.text_of(title).await?;
        if raw_name.is_empty() {
            return Err(DriverError::NotFound("empty title".into()));
        }
        if !seen.insert(&raw_name) {
            debug!("duplicate: {}", raw_name);
            return Ok(None);
        }

        if let Some(ref expand) = self.spec.expand {
            if let Err(e) = self.expand(card, expand).await {
                debug!("no expand for '{}': {}", raw_name, e);
            }
        }

        let fields = self.fields(card).await.unwrap_or_else(|e| {
            warn!("fields for '{}': {}", raw_name, e);
            BTreeMap::new()
        });
        let description = match self.description(card).await {
            Ok(d) => d,
            Err(e) => {
                warn!("description for '{}': {}", raw_name, e);
                None
            }
        };
        let url = self.outbound_link(card).await;

        let mut record = OfferRecord::new(raw_name, page)
            .with_url(url)
            .with_description(description)
            .with_fields(fields);

        if let Some(ref promote) = self.spec.promote {
            match self.promotion_link(card, promote).await {
                Ok(Some(link)) => record.set_promotion_link(link),
                Ok(None) => {}
                Err(e) => warn!("promotion link for '{}': {}", record.name(), e),
            }
        }
        Ok(Some(record))
    }

    async fn expand(&self, card: ElementRef, expand: &Locator) -> DriverResult<()> {
        let button = self.driver().find_element(Some(card), expand).await?;
        self.interactor.click_element(button).await
    }

    /// Label/value pairs by position; falls back to `Label: value` lines.
    async fn fields(&self, card: ElementRef) -> DriverResult<BTreeMap<String, String>> {
        let driver = self.driver();
        let mut fields = BTreeMap::new();
        if let (Some(label), Some(value)) = (&self.spec.field_label, &self.spec.field_value) {
            let labels = driver.find_all(Some(card), label).await?;
            let values = driver.find_all(Some(card), value).await?;
            for (l, v) in labels.into_iter().zip(values) {
                let key = field_key(&driver.read_text(l).await?);
                let val = record::collapse(&driver.read_text(v).await?);
                if !key.is_empty() && !val.is_empty() {
                    fields.insert(key, val);
                }
            }
        }
        if fields.is_empty() {
            let text = driver.read_text(card).await?;
            fields = self.cleaner.fields_from_text(&text);
        }
        Ok(fields)
    }

    async fn description(&self, card: ElementRef) -> DriverResult<Option<String>> {
        let Some(ref locator) = self.spec.description else {
            return Ok(None);
        };
        match self.driver().find_element(Some(card), locator).await {
            Ok(el) => {
                let text = self.driver().read_text(el).await?;
                Ok(Some(self.cleaner.description(&text)))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `href` of the anchor whose text matches the outbound link label.
    async fn outbound_link(&self, card: ElementRef) -> Option<String> {
        let locator = Locator::text(self.spec.link_label.as_str());
        let link = self.driver().find_element(Some(card), &locator).await.ok()?;
        self.driver()
            .read_attribute(link, "href")
            .await
            .ok()
            .flatten()
            .filter(|h| !h.is_empty())
    }

    async fn promotion_link(
        &self,
        card: ElementRef,
        promote: &PromoteConfig,
    ) -> DriverResult<Option<String>> {
        let driver = self.driver();
        let button = driver
            .find_element(Some(card), &Locator::text(promote.button_text.as_str()))
            .await?;
        self.interactor.click_element(button).await?;

        let field = self
            .interactor
            .find(
                None,
                &Locator::parse(&promote.link_selector),
                Wait::Timeout(Duration::from_millis(promote.timeout_ms)),
            )
            .await?;
        let link = driver
            .read_attribute(field, "value")
            .await?
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        if let Some(ref close) = promote.close_text {
            if let Err(e) = self.interactor.click(&Locator::text(close.as_str())).await {
                debug!("closing promotion dialog: {}", e);
            }
        }
        Ok(link)
    }
}
