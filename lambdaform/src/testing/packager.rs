//! Deterministic packager for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::DeployError;
use crate::provider::{ArtifactPackager, PackagedArtifact};
use crate::utils::hashing::code_sha256;

/// Handler every static artifact declares.
pub const STATIC_HANDLER: &str = "shim.handler";

/// Packager that returns an artifact for fixed bytes.
///
/// The bytes can be swapped between deploys to simulate a code change.
#[derive(Debug, Clone)]
pub struct StaticPackager {
    code: Arc<Mutex<Vec<u8>>>,
}

impl StaticPackager {
    /// Creates a packager that bundles `code`.
    #[must_use]
    pub fn new(code: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Arc::new(Mutex::new(code.into())),
        }
    }

    /// Replaces the bundled bytes.
    pub fn set_code(&self, code: impl Into<Vec<u8>>) {
        *self.code.lock() = code.into();
    }

    /// The artifact this packager produces for `code`.
    #[must_use]
    pub fn artifact_for(code: &[u8]) -> PackagedArtifact {
        PackagedArtifact {
            path: PathBuf::from("/tmp/lambdaform-static.zip"),
            handler: STATIC_HANDLER.to_string(),
            code_sha256: code_sha256(code),
        }
    }
}

impl Default for StaticPackager {
    fn default() -> Self {
        Self::new(b"exports.handler = () => {}".to_vec())
    }
}

#[async_trait]
impl ArtifactPackager for StaticPackager {
    async fn package(
        &self,
        _source: Option<&str>,
        _extra_files: &[String],
    ) -> Result<PackagedArtifact, DeployError> {
        let code = self.code.lock().clone();
        Ok(Self::artifact_for(&code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_ne;

    #[tokio::test]
    async fn test_set_code_changes_hash() {
        let packager = StaticPackager::default();
        let before = packager.package(None, &[]).await.unwrap();
        packager.set_code(b"v2".to_vec());
        let after = packager.package(None, &[]).await.unwrap();
        assert_ne!(before.code_sha256, after.code_sha256);
        assert_eq!(after.handler, STATIC_HANDLER);
    }
}
