//! Content fingerprints for idempotency.
//!
//! The fingerprint depends only on file bytes, never on name, path or mtime.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::domain::Fingerprint;

const READ_CHUNK: usize = 64 * 1024;

/// Compute the SHA256 fingerprint of a file, streaming its content
pub async fn fingerprint_file(path: &Path) -> Result<Fingerprint, std::io::Error> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Fingerprint::from_hex(hex::encode(hasher.finalize())))
}

/// Fingerprint of an in-memory buffer
pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    Fingerprint::from_hex(hex::encode(Sha256::digest(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fingerprint_ignores_name_and_location() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("2025-12-29 Spin.m4a");
        let nested = temp.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        let b = nested.join("renamed.m4a");

        tokio::fs::write(&a, b"same audio bytes").await.unwrap();
        tokio::fs::write(&b, b"same audio bytes").await.unwrap();

        let fa = fingerprint_file(&a).await.unwrap();
        let fb = fingerprint_file(&b).await.unwrap();
        assert_eq!(fa, fb);
        assert_eq!(fa.as_str().len(), 64);
        assert_eq!(fa, fingerprint_bytes(b"same audio bytes"));
    }

    #[tokio::test]
    async fn test_fingerprint_changes_with_content() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.m4a");
        tokio::fs::write(&a, b"one").await.unwrap();
        let first = fingerprint_file(&a).await.unwrap();

        tokio::fs::write(&a, b"two").await.unwrap();
        let second = fingerprint_file(&a).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_fingerprint_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let err = fingerprint_file(&temp.path().join("gone.m4a")).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_empty_input_has_known_digest() {
        assert_eq!(
            fingerprint_bytes(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
