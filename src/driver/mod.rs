//! Browser driver capability and the locator vocabulary shared by all layers.
//!
//! The scraping core only talks to [`BrowserDriver`]. [`EokaDriver`] is the
//! production implementation; tests drive the core with in-memory fakes.

mod eoka;

pub use self::eoka::EokaDriver;

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

/// How to find an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// `css:form button` - structural selector
    Css(String),
    /// `text:Sales page` - visible text, case-insensitive substring
    Text(String),
    /// `placeholder:Enter email`
    Placeholder(String),
    /// `role:button` - tag name or ARIA role
    Role(String),
    /// `id:login-email`
    Id(String),
}

impl Locator {
    /// Parse a prefixed locator. Unprefixed strings are CSS.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Some(v) = s.strip_prefix("text:") {
            return Locator::Text(v.into());
        }
        if let Some(v) = s.strip_prefix("placeholder:") {
            return Locator::Placeholder(v.into());
        }
        if let Some(v) = s.strip_prefix("role:") {
            return Locator::Role(v.into());
        }
        if let Some(v) = s.strip_prefix("id:") {
            return Locator::Id(v.into());
        }
        if let Some(v) = s.strip_prefix("css:") {
            return Locator::Css(v.into());
        }
        Locator::Css(s.into())
    }

    pub fn css(s: impl Into<String>) -> Self {
        Locator::Css(s.into())
    }

    pub fn text(s: impl Into<String>) -> Self {
        Locator::Text(s.into())
    }

    pub(crate) fn kind_and_value(&self) -> (&'static str, &str) {
        match self {
            Locator::Css(v) => ("css", v),
            Locator::Text(v) => ("text", v),
            Locator::Placeholder(v) => ("placeholder", v),
            Locator::Role(v) => ("role", v),
            Locator::Id(v) => ("id", v),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, value) = self.kind_and_value();
        write!(f, "{}:{}", kind, value)
    }
}

/// Opaque handle to a live element. It goes stale when the element leaves
/// the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef(pub u64);

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

/// Failure classes the retry policy distinguishes between.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("element not found: {0}")]
    NotFound(String),

    #[error("click intercepted: {0}")]
    Intercepted(String),

    #[error("stale element reference: {0}")]
    Stale(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl DriverError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound(_))
    }
}

impl From<::eoka::Error> for DriverError {
    fn from(e: ::eoka::Error) -> Self {
        match e {
            ::eoka::Error::ElementNotFound(what) => DriverError::NotFound(what),
            other => DriverError::Browser(other.to_string()),
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// A browser session bound to one page.
///
/// `scope` restricts a search to the subtree of an earlier element.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> DriverResult<()>;

    /// Current URL.
    async fn url(&self) -> DriverResult<String>;

    /// Full serialized document.
    async fn html(&self) -> DriverResult<String>;

    /// First match, or `NotFound`.
    async fn find_element(
        &self,
        scope: Option<ElementRef>,
        locator: &Locator,
    ) -> DriverResult<ElementRef>;

    /// All matches in document order (possibly empty).
    async fn find_all(
        &self,
        scope: Option<ElementRef>,
        locator: &Locator,
    ) -> DriverResult<Vec<ElementRef>>;

    /// Fails with `Intercepted` when another element would receive the click.
    async fn click(&self, element: ElementRef) -> DriverResult<()>;

    async fn hover(&self, element: ElementRef) -> DriverResult<()>;

    async fn fill(&self, element: ElementRef, text: &str) -> DriverResult<()>;

    async fn read_text(&self, element: ElementRef) -> DriverResult<String>;

    async fn read_attribute(&self, element: ElementRef, name: &str)
        -> DriverResult<Option<String>>;

    /// PNG bytes of the viewport.
    async fn screenshot(&self) -> DriverResult<Vec<u8>>;

    async fn is_stale(&self, element: ElementRef) -> DriverResult<bool>;

    async fn set_cookie(
        &self,
        name: &str,
        value: &str,
        domain: Option<&str>,
        path: Option<&str>,
    ) -> DriverResult<()>;

    /// Poll until `element` has left the document.
    async fn wait_for_staleness(&self, element: ElementRef, timeout: Duration) -> DriverResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_stale(element).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout(format!(
                    "{} still attached after {}ms",
                    element,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(STALE_POLL).await;
        }
    }

    /// Install saved session cookies.
    async fn apply_cookies(&self, cookies: &[Cookie]) -> DriverResult<()> {
        for c in cookies {
            self.set_cookie(&c.name, &c.value, c.domain.as_deref(), c.path.as_deref())
                .await?;
        }
        Ok(())
    }
}

/// One entry of a saved browser profile.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
}

/// Read a cookie profile. JSON files parse too, YAML being a superset.
pub fn load_profile(path: &Path) -> crate::Result<Vec<Cookie>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

const STALE_POLL: Duration = Duration::from_millis(100);

/// Poll `predicate` until it yields a value or `timeout` elapses.
/// Errors from the predicate end the wait immediately.
pub async fn wait_for_condition<T, F, Fut>(
    timeout: Duration,
    poll: Duration,
    mut predicate: F,
) -> DriverResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DriverResult<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(v) = predicate().await? {
            return Ok(v);
        }
        if Instant::now() >= deadline {
            return Err(DriverError::Timeout(format!(
                "condition not met within {}ms",
                timeout.as_millis()
            )));
        }
        tokio::time::sleep(poll).await;
    }
}
