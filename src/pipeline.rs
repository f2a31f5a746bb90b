//! One harvest end to end: consent, login, listing traversal.
//! Also the exploration pass that seeds a locator policy for a new site.

use crate::config::Config;
use crate::driver::{BrowserDriver, Locator};
use crate::interact::{Diagnostics, Escalation, Interactor, Wait};
use crate::oracle::{LocatorResult, SelectorOracle, SiteProfile, StrategyPlan};
use crate::paginate::{ListingSpec, Paginator, Traversal};
use crate::patch::Policy;
use crate::reduce::ReducedDocument;
use crate::sink::{JsonlSink, RecordSink};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause before re-reading a page the oracle judged not useful yet.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// What the oracle made of a site.
#[derive(Debug, Clone, Serialize)]
pub struct Exploration {
    pub url: String,
    /// `None` when the oracle gave no verdict.
    pub useful: Option<bool>,
    pub profile: SiteProfile,
    pub plan: StrategyPlan,
    pub locators: Vec<(String, LocatorResult)>,
}

impl Exploration {
    /// Resolved selectors as a version-1 policy. `None` when nothing resolved.
    pub fn to_policy(&self) -> Option<Policy> {
        let locators: BTreeMap<String, String> = self
            .locators
            .iter()
            .filter_map(|(name, result)| Some((name.clone(), result.selector()?.to_string())))
            .collect();
        (!locators.is_empty()).then_some(Policy {
            version: 1,
            locators,
        })
    }
}

pub struct Harvester<'a> {
    driver: &'a dyn BrowserDriver,
    oracle: &'a SelectorOracle,
    config: &'a Config,
    policy: Policy,
    diagnostics: Diagnostics,
}

impl<'a> Harvester<'a> {
    pub fn new(driver: &'a dyn BrowserDriver, oracle: &'a SelectorOracle, config: &'a Config) -> Self {
        Self {
            driver,
            oracle,
            config,
            policy: Policy::default(),
            diagnostics: Diagnostics::new(&config.output.diagnostics),
        }
    }

    /// Locator overrides applied on top of the config.
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    fn interactor(&self) -> Interactor<'a> {
        Interactor::new(self.driver, &self.config.interaction)
    }

    async fn snapshot(&self) -> Result<ReducedDocument> {
        Ok(self.oracle.reduce(&self.driver.html().await?))
    }

    /// Look at the listing page and ask the oracle what is on it.
    pub async fn explore(&self) -> Result<Exploration> {
        let url = &self.config.target.url;
        info!("Exploring {}", url);
        self.driver.navigate(url).await?;
        self.dismiss_consent().await;

        let mut doc = self.snapshot().await?;
        let mut useful = self.oracle.looks_useful(&doc).await;
        if useful == Some(false) {
            debug!("snapshot not useful yet, reading again");
            tokio::time::sleep(SETTLE_DELAY).await;
            doc = self.snapshot().await?;
            useful = self.oracle.looks_useful(&doc).await;
        }

        let profile = self.oracle.classify(&doc).await;
        info!("Site: {} (login: {})", profile.site_type, profile.has_login);
        let plan = self.oracle.plan_strategy(&doc, &profile.site_type).await;
        let locators = self.oracle.resolve_plan(&doc, &plan).await;

        Ok(Exploration {
            url: url.clone(),
            useful,
            profile,
            plan,
            locators,
        })
    }

    /// Click the first consent button that is present. Best-effort.
    pub async fn dismiss_consent(&self) -> bool {
        let interactor = self.interactor();
        for text in &self.config.target.dismiss {
            match interactor.click(&Locator::text(text.as_str())).await {
                Ok(()) => {
                    info!("Dismissed overlay via '{}'", text);
                    return true;
                }
                Err(e) => debug!("no consent button '{}': {}", text, e),
            }
        }
        false
    }

    /// Sign in with the configured credentials. No-op without credentials.
    pub async fn login(&self) -> Result<()> {
        let Some(ref creds) = self.config.credentials else {
            return Ok(());
        };
        if let Some(ref url) = self.config.target.login_url {
            self.driver.navigate(url).await?;
        }
        self.dismiss_consent().await;

        let result = self.submit_credentials(&creds.email, &creds.password).await;
        if let Err(ref e) = result {
            warn!("Login failed: {}", e);
            self.diagnostics.page_dump(self.driver, "login").await;
        }
        result
    }

    async fn submit_credentials(&self, email: &str, password: &str) -> Result<()> {
        let interactor = self.interactor();
        let wait = Wait::Timeout(Duration::from_millis(self.config.listing.card_timeout_ms));
        let mut doc = None;

        let email_field = self
            .locate("login_email", "email input field for login", &mut doc)
            .await?;
        interactor
            .fill(&email_field, email, wait)
            .await
            .map_err(|e| Error::Login(format!("email field: {}", e)))?;

        let password_field = self
            .locate("login_password", "password input field for login", &mut doc)
            .await?;
        interactor
            .fill(&password_field, password, wait)
            .await
            .map_err(|e| Error::Login(format!("password field: {}", e)))?;

        let mut submit = Escalation::new("log in submit button");
        if let Ok(locator) = self.locate("login_submit", "login submit button", &mut doc).await {
            submit.selector = Some(locator.to_string());
        }
        let clicked = interactor
            .escalate(&submit, self.oracle, &self.diagnostics)
            .await
            .map_err(|e| Error::Login(format!("submit: {}", e)))?;
        info!("Submitted login ({:?})", clicked);
        Ok(())
    }

    /// Policy override first, oracle second. The snapshot is taken once and
    /// shared between lookups.
    async fn locate(
        &self,
        key: &str,
        description: &str,
        doc: &mut Option<ReducedDocument>,
    ) -> Result<Locator> {
        if let Some(value) = self.policy.get(key) {
            debug!("{} from policy v{}: {}", key, self.policy.version, value);
            return Ok(Locator::parse(value));
        }
        let snapshot = match doc.take() {
            Some(d) => d,
            None => self.snapshot().await?,
        };
        let result = self.oracle.resolve(&snapshot, description).await;
        *doc = Some(snapshot);
        match result {
            LocatorResult::Selector(s) => Ok(Locator::css(s)),
            other => Err(Error::Login(format!("could not locate {}: {}", description, other))),
        }
    }

    /// Log in if configured, then walk the listing into the configured
    /// JSONL file.
    pub async fn harvest(&self) -> Result<Traversal> {
        let mut sink = JsonlSink::create(&self.config.output.records)?;
        let traversal = self.harvest_into(&mut sink).await?;
        info!("Wrote {} records to {}", sink.written(), sink.path().display());
        Ok(traversal)
    }

    /// Like [`harvest`](Self::harvest) with a caller-supplied sink.
    pub async fn harvest_into(&self, sink: &mut dyn RecordSink) -> Result<Traversal> {
        self.login().await?;

        self.driver.navigate(&self.config.target.url).await?;
        self.dismiss_consent().await;

        let spec = ListingSpec::from_config(&self.config.listing).with_policy(&self.policy);
        let paginator = Paginator::new(
            self.driver,
            &self.config.interaction,
            spec,
            self.diagnostics.clone(),
        )?;
        Ok(paginator.traverse(sink).await)
    }
}
