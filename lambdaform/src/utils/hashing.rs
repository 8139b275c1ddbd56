//! Content hashes for deployment artifacts.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Base64-encoded SHA-256 of `bytes`, the format the compute service
/// reports for deployed code.
#[must_use]
pub fn code_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    STANDARD.encode(hasher.finalize())
}

/// Hashes an artifact on disk.
pub async fn file_code_sha256(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(code_sha256(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_code_sha256_known_value() {
        assert_eq!(
            code_sha256(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
        assert_ne!(code_sha256(b"a"), code_sha256(b"b"));
    }

    #[tokio::test]
    async fn test_file_code_sha256_matches_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"bundle").unwrap();

        let hash = file_code_sha256(file.path()).await.unwrap();
        assert_eq!(hash, code_sha256(b"bundle"));
    }
}
