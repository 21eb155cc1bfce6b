pub mod catalog;
pub mod client;
pub mod driver;
pub mod error;
pub mod governor;
pub mod orchestrator;
pub mod parse;
pub mod retry;
pub mod session;
pub mod sink;
pub mod types;

pub use catalog::{Catalog, CatalogError, InMemoryCatalog};
pub use client::{build_http_client, StorefrontClient};
pub use driver::{candidate_shapes, ProbeDriver, ProbeReport, ProbeRequest, ProbeStage};
pub use error::{FailureClass, ProbeError};
pub use governor::{GovernorConfig, Lease, RateGovernor};
pub use orchestrator::{
    Orchestrator, RunSummary, SingleProbe, StorefrontSummary, SweepConfig, SweepError,
};
pub use parse::{ItemVerdict, ShippingShape};
pub use retry::{run_with_retry, RetryOutcome, RetryPolicy};
pub use session::{bind_sales_channel, SessionContext, SessionStore, SharedSession, WarmupReport};
pub use sink::{InMemorySink, ResultSink, SinkError, UpsertOutcome};
