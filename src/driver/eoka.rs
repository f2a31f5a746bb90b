use super::{BrowserDriver, DriverError, DriverResult, ElementRef, Locator};
use crate::config::BrowserConfig;
use async_trait::async_trait;
use eoka::{Browser, Page};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Attribute used to pin element handles to live DOM nodes.
const REF_ATTR: &str = "data-eh-ref";

/// Finds elements and tags each one with a unique ref number.
/// Numbers come from the driver, so they never repeat across navigations.
const FIND_JS: &str = r#"(() => {
    const kind = __KIND__;
    const value = __VALUE__;
    const scopeRef = __SCOPE__;
    let next = __NEXT__;
    const root = scopeRef === null
        ? document
        : document.querySelector('[data-eh-ref="' + scopeRef + '"]');
    if (!root) return { stale: true, refs: [], next: next };

    const lower = value.toLowerCase();
    const ownText = (el) => {
        const t = el.getAttribute('aria-label') || el.textContent || el.value || '';
        return t.trim().replace(/\s+/g, ' ').toLowerCase();
    };
    let found = [];
    if (kind === 'css') {
        try {
            found = Array.from(root.querySelectorAll(value));
        } catch (e) {
            return { error: String(e), refs: [], next: next };
        }
    } else if (kind === 'id') {
        found = Array.from(root.querySelectorAll('[id]')).filter(el => el.id === value);
    } else if (kind === 'placeholder') {
        found = Array.from(root.querySelectorAll('[placeholder]'))
            .filter(el => el.getAttribute('placeholder').toLowerCase().includes(lower));
    } else if (kind === 'role') {
        found = Array.from(root.querySelectorAll('*')).filter(el =>
            el.tagName.toLowerCase() === lower ||
            (el.getAttribute('role') || '').toLowerCase() === lower);
    } else if (kind === 'text') {
        found = Array.from(root.querySelectorAll('*')).filter(el => {
            if (['SCRIPT', 'STYLE', 'HEAD', 'HTML', 'BODY'].includes(el.tagName)) return false;
            if (!ownText(el).includes(lower)) return false;
            return !Array.from(el.children).some(c => ownText(c).includes(lower));
        });
    }

    const refs = found.map(el => {
        let r = el.getAttribute('data-eh-ref');
        if (!r) {
            r = String(next++);
            el.setAttribute('data-eh-ref', r);
        }
        return Number(r);
    });
    return { stale: false, refs: refs, next: next };
})()"#;

/// Hit-tests the element's centre before a click.
const PROBE_CLICK_JS: &str = r#"(() => {
    const el = document.querySelector(__SEL__);
    if (!el) return 'stale';
    el.scrollIntoView({ block: 'center', inline: 'center' });
    const r = el.getBoundingClientRect();
    if (r.width < 1 || r.height < 1) return 'invisible';
    const hit = document.elementFromPoint(r.x + r.width / 2, r.y + r.height / 2);
    if (!hit || hit === el || el.contains(hit) || hit.contains(el)) return 'ok';
    let desc = hit.tagName.toLowerCase();
    if (hit.id) desc += '#' + hit.id;
    if (typeof hit.className === 'string' && hit.className.trim()) {
        desc += '.' + hit.className.trim().split(/\s+/).join('.');
    }
    return 'intercepted:' + desc;
})()"#;

#[derive(Deserialize)]
struct FindResult {
    stale: bool,
    #[serde(default)]
    error: Option<String>,
    refs: Vec<u64>,
    next: u64,
}

#[derive(Deserialize)]
struct AttrResult {
    stale: bool,
    value: Option<String>,
}

#[derive(Deserialize)]
struct Centre {
    x: f64,
    y: f64,
}

/// [`BrowserDriver`] over a single eoka page.
pub struct EokaDriver {
    browser: Browser,
    page: Page,
    next_ref: AtomicU64,
}

impl EokaDriver {
    /// Launch a browser and apply the saved cookie profile, if any.
    pub async fn launch(config: &BrowserConfig) -> crate::Result<Self> {
        let stealth = eoka::StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport.as_ref().map(|v| v.width).unwrap_or(1280),
            viewport_height: config.viewport.as_ref().map(|v| v.height).unwrap_or(720),
            ..Default::default()
        };

        debug!(
            "Launching browser (headless: {}, proxy: {:?})",
            config.headless, config.proxy
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;
        let driver = Self {
            browser,
            page,
            next_ref: AtomicU64::new(1),
        };

        if let Some(ref profile) = config.profile {
            let cookies = super::load_profile(profile)?;
            info!("Applying {} cookies from {}", cookies.len(), profile.display());
            driver.apply_cookies(&cookies).await?;
        }
        Ok(driver)
    }

    /// The underlying page.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Close the browser.
    pub async fn close(self) -> crate::Result<()> {
        self.browser.close().await?;
        Ok(())
    }

    async fn query(
        &self,
        scope: Option<ElementRef>,
        locator: &Locator,
    ) -> DriverResult<Vec<ElementRef>> {
        let (kind, value) = locator.kind_and_value();
        let scope_js = match scope {
            Some(r) => r.0.to_string(),
            None => "null".to_string(),
        };
        let js = FIND_JS
            .replace("__KIND__", &js_str(kind))
            .replace("__VALUE__", &js_str(value))
            .replace("__SCOPE__", &scope_js)
            .replace("__NEXT__", &self.next_ref.load(Ordering::SeqCst).to_string());

        let result: FindResult = self.page.evaluate(&js).await?;
        self.next_ref.store(result.next, Ordering::SeqCst);

        if result.stale {
            let scope = scope.map(|s| s.to_string()).unwrap_or_default();
            return Err(DriverError::Stale(scope));
        }
        if let Some(err) = result.error {
            return Err(DriverError::Browser(format!("bad locator {}: {}", locator, err)));
        }
        Ok(result.refs.into_iter().map(ElementRef).collect())
    }

    /// `document.querySelector(...)` for a tagged element, as JS source.
    fn lookup(element: ElementRef) -> String {
        format!("document.querySelector({})", js_str(&ref_selector(element)))
    }
}

#[async_trait]
impl BrowserDriver for EokaDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        info!("goto: {}", url);
        self.page.goto(url).await?;
        Ok(())
    }

    async fn url(&self) -> DriverResult<String> {
        Ok(self.page.url().await?)
    }

    async fn html(&self) -> DriverResult<String> {
        Ok(self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await?)
    }

    async fn find_element(
        &self,
        scope: Option<ElementRef>,
        locator: &Locator,
    ) -> DriverResult<ElementRef> {
        self.query(scope, locator)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::NotFound(locator.to_string()))
    }

    async fn find_all(
        &self,
        scope: Option<ElementRef>,
        locator: &Locator,
    ) -> DriverResult<Vec<ElementRef>> {
        self.query(scope, locator).await
    }

    async fn click(&self, element: ElementRef) -> DriverResult<()> {
        let selector = ref_selector(element);
        let js = PROBE_CLICK_JS.replace("__SEL__", &js_str(&selector));
        let probe: String = self.page.evaluate(&js).await?;
        match probe.as_str() {
            "ok" => {
                debug!("click: {}", element);
                self.page.click(&selector).await.map_err(|e| stale_if_missing(e, element))
            }
            "invisible" => {
                // Zero-size elements cannot take a real mouse click.
                debug!("click (dom): {}", element);
                self.page
                    .execute(&format!("{}.click()", Self::lookup(element)))
                    .await?;
                Ok(())
            }
            "stale" => Err(DriverError::Stale(element.to_string())),
            other => Err(DriverError::Intercepted(
                other.trim_start_matches("intercepted:").to_string(),
            )),
        }
    }

    async fn hover(&self, element: ElementRef) -> DriverResult<()> {
        let js = format!(
            r#"(() => {{
                const el = {};
                if (!el) return null;
                el.scrollIntoView({{ block: 'center' }});
                const rect = el.getBoundingClientRect();
                return {{ x: rect.x + rect.width / 2, y: rect.y + rect.height / 2 }};
            }})()"#,
            Self::lookup(element)
        );
        let centre: Option<Centre> = self.page.evaluate(&js).await?;
        let Some(c) = centre else {
            return Err(DriverError::Stale(element.to_string()));
        };
        self.page
            .session()
            .dispatch_mouse_event(eoka::cdp::MouseEventType::MouseMoved, c.x, c.y, None, None)
            .await?;
        self.page.wait(100).await;
        Ok(())
    }

    async fn fill(&self, element: ElementRef, text: &str) -> DriverResult<()> {
        self.page
            .fill(&ref_selector(element), text)
            .await
            .map_err(|e| stale_if_missing(e, element))
    }

    async fn read_text(&self, element: ElementRef) -> DriverResult<String> {
        let js = format!(
            "(() => {{ const el = {}; return el ? (el.innerText || el.textContent || '') : null; }})()",
            Self::lookup(element)
        );
        let text: Option<String> = self.page.evaluate(&js).await?;
        text.ok_or_else(|| DriverError::Stale(element.to_string()))
    }

    async fn read_attribute(
        &self,
        element: ElementRef,
        name: &str,
    ) -> DriverResult<Option<String>> {
        let js = format!(
            r#"(() => {{
                const el = {};
                const name = {};
                if (!el) return {{ stale: true, value: null }};
                if (name === 'value' && 'value' in el) return {{ stale: false, value: el.value }};
                return {{ stale: false, value: el.getAttribute(name) }};
            }})()"#,
            Self::lookup(element),
            js_str(name)
        );
        let result: AttrResult = self.page.evaluate(&js).await?;
        if result.stale {
            return Err(DriverError::Stale(element.to_string()));
        }
        Ok(result.value)
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        Ok(self.page.screenshot().await?)
    }

    async fn is_stale(&self, element: ElementRef) -> DriverResult<bool> {
        let js = format!("!{}", Self::lookup(element));
        Ok(self.page.evaluate(&js).await?)
    }

    async fn set_cookie(
        &self,
        name: &str,
        value: &str,
        domain: Option<&str>,
        path: Option<&str>,
    ) -> DriverResult<()> {
        debug!("set_cookie: {}", name);
        self.page.set_cookie(name, value, domain, path).await?;
        Ok(())
    }
}

fn ref_selector(element: ElementRef) -> String {
    format!("[{}=\"{}\"]", REF_ATTR, element.0)
}

fn js_str(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

/// A handle whose node is gone reads as stale, not as "not found".
fn stale_if_missing(e: eoka::Error, element: ElementRef) -> DriverError {
    match DriverError::from(e) {
        DriverError::NotFound(_) => DriverError::Stale(element.to_string()),
        other => other,
    }
}
