//! Testing utilities for reconciliation.
//!
//! This module provides:
//! - An in-memory control plane implementing every provider client
//! - A deterministic artifact packager

mod fake_cloud;
mod packager;

pub use fake_cloud::{FakeCloud, FAKE_ACCOUNT, FAKE_REGION, FAKE_TARGET_ZONE};
pub use packager::{StaticPackager, STATIC_HANDLER};
