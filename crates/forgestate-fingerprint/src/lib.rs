//! Content hashing.
//!
//! Hashes are always formatted `"sha256:" + lowercase hex`, matching the
//! wire format the state document stores template and file hashes in.

use camino::Utf8Path;
use sha2::{Digest, Sha256};
use std::io::Read;

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

const READ_BUF_SIZE: usize = 64 * 1024;

/// Hash the contents of a file in a single streaming pass.
pub fn hash_file(path: &Utf8Path) -> Result<String, FingerprintError> {
    let mut file = std::fs::File::open(path.as_std_path()).map_err(|source| FingerprintError::Io {
        path: path.to_string(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|source| FingerprintError::Io {
            path: path.to_string(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format_digest(hasher))
}

/// Hash an in-memory string.
pub fn hash_string(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format_digest(hasher)
}

fn format_digest(hasher: Sha256) -> String {
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_string_is_deterministic_and_prefixed() {
        let a = hash_string("hello world");
        let b = hash_string("hello world");
        assert_eq!(a, b);
        assert!(a.starts_with("sha256:"));
        assert_eq!(a.len(), "sha256:".len() + 64);
    }

    #[test]
    fn hash_string_changes_with_content() {
        assert_ne!(hash_string("a"), hash_string("b"));
    }

    #[test]
    fn hash_file_matches_hash_string_for_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path_buf = dir.path().join("f.txt");
        let mut f = std::fs::File::create(&path_buf).unwrap();
        f.write_all(b"same content").unwrap();
        drop(f);

        let path = camino::Utf8Path::from_path(&path_buf).unwrap();
        assert_eq!(hash_file(path).unwrap(), hash_string("same content"));
    }

    #[test]
    fn hash_file_missing_returns_io_error() {
        let path = camino::Utf8Path::new("/nonexistent/path/for/fingerprint/test");
        assert!(matches!(
            hash_file(path),
            Err(FingerprintError::Io { .. })
        ));
    }
}
