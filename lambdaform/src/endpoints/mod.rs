//! Explicit endpoint sets on REST APIs.
//!
//! [`plan`] classifies desired endpoints against the ones this instance
//! recorded; [`EndpointReconciler`] applies the result to the provider.

mod plan;
mod reconciler;

pub use plan::{
    classify, path_depth, path_prefixes, plan, EndpointPlan, EndpointState, ResolvedEndpoint,
};
pub use reconciler::{EndpointOutcome, EndpointReconciler, AUTHORIZER_IDENTITY_SOURCE};
