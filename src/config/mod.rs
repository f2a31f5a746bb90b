pub mod params;
pub mod schema;

pub use params::{ParamDef, Params};
pub use schema::{
    BrowserConfig, Config, Credentials, InteractionConfig, ListingConfig, OracleConfig,
    OutputConfig, PatchConfig, PromoteConfig, Provider, TargetUrl, Viewport,
};
