pub mod app_config;
pub mod config;
pub mod model;
pub mod storefronts;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use model::{
    truncate_diagnostic, ErrorClass, FulfillmentPoint, GeoPoint, ProbeResult, ProbeTask,
    ResultIdentity, TrackedItem,
};
pub use storefronts::{
    load_storefronts, parse_storefronts, AvailabilityRule, FulfillmentMode, SalesChannel, Storefront,
    StorefrontsFile,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read storefronts file {path}: {source}")]
    StorefrontsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse storefronts file: {0}")]
    StorefrontsFileParse(#[from] serde_yaml::Error),

    #[error("storefront config validation failed: {0}")]
    Validation(String),
}
