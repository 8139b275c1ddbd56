//! Naming and hashing helpers shared by the drivers.

pub mod hashing;
pub mod naming;

pub use hashing::{code_sha256, file_code_sha256};
