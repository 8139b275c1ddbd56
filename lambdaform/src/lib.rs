//! # Lambdaform
//!
//! A reconciliation engine that deploys a web application to serverless
//! compute behind a routing API.
//!
//! Lambdaform keeps a small, fixed graph of remote resources in sync with a
//! desired configuration:
//!
//! - **Identities**: an execution role and an optional metrics reader role
//! - **Compute**: a function, updated in place, and an alias that can split
//!   traffic between versions
//! - **Routing**: a catch-all HTTP API or a REST API whose endpoint set is
//!   diffed against the provider
//! - **Domain**: an optional custom domain with a DNS-validated certificate
//!
//! Every provider call goes through a retry policy that knows which errors
//! are transient, and instance state is persisted after every stage so a
//! failed run resumes where it stopped.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lambdaform::prelude::*;
//!
//! let deployer = Deployer::new(clients, store, packager)
//!     .with_config(EngineConfig::from_json_file("engine.json").await?)
//!     .with_event_sink(Arc::new(LoggingEventSink::default()));
//!
//! let outputs = deployer
//!     .deploy(&DesiredConfig::new().with_src("./app").with_domain("api.example.com"))
//!     .await?;
//! println!("{}", outputs.url);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod domain;
pub mod drivers;
pub mod endpoints;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod observability;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod state;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, TaskGroup};
    pub use crate::config::{DesiredConfig, EndpointSpec, EngineConfig, RoutingStyle};
    pub use crate::drivers::{
        DriverCapabilities, DriverContext, ReconcileAction, Reconciled, Removal, ResourceDriver,
        ResourceKind,
    };
    pub use crate::errors::{DeployError, ErrorCategory, ErrorInfo, RemoteError};
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, ProgressEvent,
    };
    pub use crate::metrics::{MetricSeries, MetricsRange, MetricsReport};
    pub use crate::orchestrator::{DeployOutputs, Deployer};
    pub use crate::provider::{ArtifactPackager, PackagedArtifact, ProviderClients};
    pub use crate::retry::{RetryConfig, RetryOn, RetryPolicy};
    pub use crate::state::{FileStateStore, InMemoryStateStore, InstanceState, StateStore};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_exposes_defaults() {
        let config = EngineConfig::new();
        assert!(config.retry.max_attempts >= 1);
        assert!(DesiredConfig::new().validate(&config).is_ok());
    }
}
