//! Instance state: what has been created, and where it is persisted.

mod records;
mod store;

pub use records::{
    AliasRecord, ApiProtocol, ApiRecord, AuthorizerRecord, DomainRecord, EndpointRecord,
    FunctionRecord, InstanceState, IntegrationTarget, MetaRoleRecord, RoleRecord,
};
pub use store::{FileStateStore, InMemoryStateStore, StateStore};
