//! OpenSSL-compatible principal name hashes.
//!
//! Grid CA directories name their files after the hash OpenSSL computes over
//! a canonical form of the CA subject. The peers exchange the same hashes in
//! `issuer_hash` buckets, so this has to match OpenSSL bit for bit:
//!
//! 1. every string-typed attribute value is converted to UTF-8, stripped of
//!    leading and trailing whitespace, internal whitespace runs are collapsed
//!    to one space, ASCII letters are lowercased, and the value is re-encoded
//!    as `UTF8String`;
//! 2. each RDN `SET` is DER-encoded and the encodings are concatenated,
//!    without the outer `SEQUENCE`;
//! 3. the first four bytes of the SHA-1 digest are read little-endian and
//!    printed as eight lowercase hex digits.
//!
//! 与 OpenSSL 兼容的主体名称哈希。

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use der::asn1::{Any, SetOfVec};
use der::{Encode, Tag, Tagged};
use sha1::{Digest, Sha1};
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{Name, RelativeDistinguishedName};
use x509_cert::Certificate;

use crate::error::CredentialError;

/// Default number of cached names before the cache is emptied.
pub const DEFAULT_HASH_CACHE_CAPACITY: usize = 256;

fn canonical_error(err: der::Error) -> CredentialError {
    CredentialError::Certificate(format!("cannot canonicalize name: {err}"))
}

/// Applies the OpenSSL whitespace and case folding to a decoded value.
pub fn canonical_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for word in value.split_ascii_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().map(|c| c.to_ascii_lowercase()));
    }
    out
}

fn decode_string_value(value: &Any) -> Result<Option<String>, CredentialError> {
    let bytes = value.value();
    let text = match value.tag() {
        Tag::Utf8String | Tag::PrintableString | Tag::Ia5String | Tag::VisibleString => {
            String::from_utf8(bytes.to_vec())
                .map_err(|_| CredentialError::Certificate("name value is not UTF-8".into()))?
        }
        // T61 strings are treated as Latin-1.
        Tag::TeletexString => bytes.iter().map(|&b| char::from(b)).collect(),
        Tag::BmpString => {
            if bytes.len() % 2 != 0 {
                return Err(CredentialError::Certificate("odd-length BMPString".into()));
            }
            let units = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            char::decode_utf16(units)
                .collect::<Result<String, _>>()
                .map_err(|_| CredentialError::Certificate("invalid BMPString".into()))?
        }
        _ => return Ok(None),
    };
    Ok(Some(text))
}

fn canonical_attribute(atv: &AttributeTypeAndValue) -> Result<AttributeTypeAndValue, CredentialError> {
    let value = match decode_string_value(&atv.value)? {
        Some(text) => {
            Any::new(Tag::Utf8String, canonical_text(&text).as_bytes()).map_err(canonical_error)?
        }
        None => atv.value.clone(),
    };
    Ok(AttributeTypeAndValue {
        oid: atv.oid,
        value,
    })
}

/// Computes the OpenSSL name hash of `name`.
pub fn name_hash(name: &Name) -> Result<String, CredentialError> {
    let mut hasher = Sha1::new();
    for rdn in name.0.iter() {
        let attributes = rdn
            .0
            .iter()
            .map(canonical_attribute)
            .collect::<Result<Vec<_>, _>>()?;
        let set = SetOfVec::try_from(attributes).map_err(canonical_error)?;
        let encoded = RelativeDistinguishedName(set)
            .to_der()
            .map_err(canonical_error)?;
        hasher.update(&encoded);
    }
    let digest = hasher.finalize();
    let value = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    Ok(format!("{value:08x}"))
}

/// A bounded cache of principal hashes keyed by the DER encoding of a name.
///
/// When the cache reaches its capacity it is emptied before the next insert.
#[derive(Debug)]
pub struct PrincipalHashCache {
    capacity: usize,
    entries: Mutex<HashMap<Vec<u8>, String>>,
}

impl Default for PrincipalHashCache {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_CACHE_CAPACITY)
    }
}

impl PrincipalHashCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn hash(&self, name: &Name) -> Result<String, CredentialError> {
        let key = name.to_der().map_err(canonical_error)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hash) = entries.get(&key) {
            return Ok(hash.clone());
        }

        let hash = name_hash(name)?;
        if entries.len() >= self.capacity {
            entries.clear();
        }
        entries.insert(key, hash.clone());
        Ok(hash)
    }

    pub fn subject_hash(&self, certificate: &Certificate) -> Result<String, CredentialError> {
        self.hash(&certificate.tbs_certificate.subject)
    }

    pub fn issuer_hash(&self, certificate: &Certificate) -> Result<String, CredentialError> {
        self.hash(&certificate.tbs_certificate.issuer)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::chain::CertificateChain;
    use std::str::FromStr;

    const CA_CERT: &str = include_str!("../../tests/fixtures/ca.pem");
    const HOST_CERT: &str = include_str!("../../tests/fixtures/hostcert.pem");

    #[test]
    fn whitespace_and_case_are_folded() {
        assert_eq!(canonical_text("  Example \t Grid   CA "), "example grid ca");
        assert_eq!(canonical_text(""), "");
        assert_eq!(canonical_text("Ünïcode STAYS"), "Ünïcode stays");
    }

    #[test]
    fn ca_subject_hash_matches_openssl() {
        let cache = PrincipalHashCache::default();
        let ca = CertificateChain::from_pem(CA_CERT).unwrap();
        let host = CertificateChain::from_pem(HOST_CERT).unwrap();

        assert_eq!(cache.subject_hash(ca.leaf()).unwrap(), "5c278efe");
        assert_eq!(cache.issuer_hash(host.leaf()).unwrap(), "5c278efe");
    }

    #[test]
    fn equivalent_names_share_a_hash() {
        let upper = Name::from_str("CN=Jane Doe,O=Grid").unwrap();
        let lower = Name::from_str("CN=jane doe,O=grid").unwrap();
        let other = Name::from_str("CN=John Doe,O=Grid").unwrap();
        assert_eq!(name_hash(&upper).unwrap(), name_hash(&lower).unwrap());
        assert_ne!(name_hash(&upper).unwrap(), name_hash(&other).unwrap());
    }

    #[test]
    fn cache_is_cleared_when_full() {
        let cache = PrincipalHashCache::new(2);
        for cn in ["a", "b"] {
            cache.hash(&Name::from_str(&format!("CN={cn}")).unwrap()).unwrap();
        }
        assert_eq!(cache.len(), 2);

        cache.hash(&Name::from_str("CN=c").unwrap()).unwrap();
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
