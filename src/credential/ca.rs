//! Trust anchors: the known CA hashes and the chain validator boundary.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::credential::chain::CertificateChain;
use crate::error::CredentialError;

/// Validates a certificate chain against the local trust anchors.
///
/// Implemented by the embedding application on top of its X.509 library.
///
/// 根据本地信任锚验证证书链。由嵌入应用基于其 X.509 库实现。
pub trait ChainValidator: Debug + Send + Sync {
    fn validate(&self, chain: &CertificateChain) -> Result<(), CredentialError>;
}

/// The set of CA subject hashes trusted locally.
pub trait CaHashDirectory: Debug + Send + Sync {
    fn is_known(&self, hash: &str) -> bool;

    /// All known hashes, in a stable order.
    fn known_hashes(&self) -> Vec<String>;
}

/// A fixed set of CA hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticCaHashes {
    hashes: BTreeSet<String>,
}

impl StaticCaHashes {
    pub fn new<I, S>(hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hashes: hashes.into_iter().map(Into::into).collect(),
        }
    }
}

impl CaHashDirectory for StaticCaHashes {
    fn is_known(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    fn known_hashes(&self) -> Vec<String> {
        self.hashes.iter().cloned().collect()
    }
}

/// A grid certificates directory (`/etc/grid-security/certificates` layout).
///
/// CA certificates are stored as `<hash>.<n>`, where `<hash>` is the eight
/// digit subject hash and `<n>` a small collision counter. The directory is
/// scanned once when opened.
#[derive(Debug, Clone)]
pub struct CaCertificateDirectory {
    path: PathBuf,
    hashes: BTreeSet<String>,
}

impl CaCertificateDirectory {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref().to_path_buf();
        let io_error = |source| CredentialError::Io {
            path: path.clone(),
            source,
        };

        let mut hashes = BTreeSet::new();
        for entry in fs::read_dir(&path).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            if let Some(hash) = entry.file_name().to_str().and_then(ca_file_hash) {
                hashes.insert(hash.to_string());
            }
        }
        debug!(path = %path.display(), count = hashes.len(), "scanned CA directory");
        Ok(Self { path, hashes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaHashDirectory for CaCertificateDirectory {
    fn is_known(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    fn known_hashes(&self) -> Vec<String> {
        self.hashes.iter().cloned().collect()
    }
}

/// Returns the hash part of a `<8 hex>.<digits>` file name.
fn ca_file_hash(name: &str) -> Option<&str> {
    let (hash, counter) = name.split_once('.')?;
    let is_hash = hash.len() == 8 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    let is_counter = !counter.is_empty() && counter.bytes().all(|b| b.is_ascii_digit());
    (is_hash && is_counter).then_some(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_hash_named_files_count() {
        assert_eq!(ca_file_hash("5c278efe.0"), Some("5c278efe"));
        assert_eq!(ca_file_hash("5c278efe.12"), Some("5c278efe"));
        assert_eq!(ca_file_hash("5c278efe.signing_policy"), None);
        assert_eq!(ca_file_hash("5c278efe.r0"), None);
        assert_eq!(ca_file_hash("5C278EFE.0"), None);
        assert_eq!(ca_file_hash("ca.pem"), None);
    }

    #[test]
    fn directory_scan_collects_hashes() {
        let dir = std::env::temp_dir().join(format!("gsi-ca-scan-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for name in ["5c278efe.0", "5c278efe.1", "0a1b2c3d.0", "5c278efe.namespaces"] {
            fs::write(dir.join(name), b"").unwrap();
        }

        let ca = CaCertificateDirectory::open(&dir).unwrap();
        assert_eq!(ca.known_hashes(), ["0a1b2c3d", "5c278efe"]);
        assert!(ca.is_known("5c278efe"));
        assert!(!ca.is_known("ffffffff"));

        fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(
            CaCertificateDirectory::open(&dir),
            Err(CredentialError::Io { .. })
        ));
    }
}
