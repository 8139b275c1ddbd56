//! Progress events emitted while reconciling an instance.
//!
//! Sinks are injected into the [`Deployer`](crate::orchestrator::Deployer)
//! rather than installed globally, so concurrent deployments in one process
//! never interleave their output.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, ProgressEvent};
