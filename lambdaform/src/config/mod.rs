//! Configuration: engine settings and per-instance desired state.

mod desired;
mod engine;

pub use desired::{DesiredConfig, EndpointSpec, RoutingStyle, VALID_METHODS};
pub use engine::{CertificatePolling, EngineConfig, FunctionDefaults, GatewayCapabilities};
