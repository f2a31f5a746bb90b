//! # eoka-harvest
//!
//! Listing scraper whose locators come from a language model instead of being
//! hardcoded, so it keeps working when the site's markup drifts.
//!
//! ## Pipeline
//!
//! ```text
//! HTML → reduce() → SelectorOracle → Interactor → Traversal → OfferRecords
//!                          ↑
//!                 PatchLoop (repairs the locator policy between runs)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eoka_harvest::{Config, EokaDriver, Harvester, HttpLlm, SelectorOracle};
//!
//! # #[tokio::main]
//! # async fn main() -> eoka_harvest::Result<()> {
//! let config = Config::load("harvest.yaml")?;
//! let driver = EokaDriver::launch(&config.browser).await?;
//! let oracle = SelectorOracle::new(HttpLlm::new(&config.oracle)?, config.oracle.token_budget);
//! let harvester = Harvester::new(&driver, &oracle, &config);
//! let traversal = harvester.harvest().await?;
//! println!("{} offers", traversal.records.len());
//! # Ok(())
//! # }
//! ```

mod config;
pub mod driver;
pub mod interact;
pub mod oracle;
pub mod paginate;
pub mod patch;
pub mod pipeline;
pub mod reduce;
pub mod sink;

pub use config::{
    BrowserConfig, Config, Credentials, InteractionConfig, ListingConfig, OracleConfig,
    OutputConfig, ParamDef, Params, PatchConfig, PromoteConfig, Provider, TargetUrl, Viewport,
};
pub use driver::{BrowserDriver, Cookie, DriverError, ElementRef, EokaDriver, Locator};
pub use interact::{ClickedBy, Diagnostics, Escalation, Interactor, Wait};
pub use oracle::{
    HttpLlm, Llm, LocatorResult, OracleError, SelectorOracle, SiteProfile, StrategyPlan,
    VisionGuess,
};
pub use paginate::{
    stop_reason, ListingSpec, OfferRecord, Paginator, SeenSet, StopReason, Traversal,
    TraversalState,
};
pub use patch::{
    PatchLoop, PatchOutcome, PatchReport, Policy, ProcessOutcome, ProcessOutput, ProcessRunner,
    TokioProcessRunner,
};
pub use pipeline::{Exploration, Harvester};
pub use reduce::{reduce, ReducedDocument, Reducer};
pub use sink::{JsonlSink, RecordSink};

/// Result type for eoka-harvest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during config loading, scraping or patching.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("traversal failed: {0}")]
    Traversal(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("patch loop: {0}")]
    Patch(String),
}

impl From<eoka::Error> for Error {
    fn from(e: eoka::Error) -> Self {
        Error::Driver(DriverError::from(e))
    }
}
