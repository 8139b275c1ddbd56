//! Artifact packaging.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::DeployError;

/// A packaged deployment artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedArtifact {
    /// Path to the archive.
    pub path: PathBuf,
    /// Entry point of the bundled shim, e.g. `_express/handler.handler`.
    pub handler: String,
    /// Base64 SHA-256 of the archive.
    pub code_sha256: String,
}

/// Bundles user source with the fixed request-adapter shim.
///
/// Must be deterministic: identical input yields an identical hash. When
/// `source` is `None` a default app is bundled.
#[async_trait]
pub trait ArtifactPackager: Send + Sync {
    /// Produces an artifact.
    async fn package(
        &self,
        source: Option<&str>,
        extra_files: &[String],
    ) -> Result<PackagedArtifact, DeployError>;
}
