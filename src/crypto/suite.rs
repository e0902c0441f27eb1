//! Cipher and digest negotiation.
//!
//! The server advertises colon-separated lists; the client answers with the
//! single entry it picked. A cipher entry may carry the IV length after a
//! `#`, e.g. `aes-128-cbc#16`; without it the IV length is 0.
//!
//! 密码与摘要算法协商。

use std::fmt;
use std::str::FromStr;

use crate::error::CryptoError;
use crate::protocol::constants::{CIPHER_AES_128_CBC, LIST_SEPARATOR};

/// A parsed `"<cipher>#<ivlen>"` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSpec {
    name: String,
    iv_len: usize,
}

impl CipherSpec {
    pub fn new(name: impl Into<String>, iv_len: usize) -> Self {
        Self {
            name: name.into(),
            iv_len,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn iv_len(&self) -> usize {
        self.iv_len
    }

    pub fn is_supported(&self) -> bool {
        self.name == CIPHER_AES_128_CBC
    }
}

impl FromStr for CipherSpec {
    type Err = CryptoError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let malformed = || CryptoError::new(format!("malformed cipher spec '{spec}'"));
        let (name, iv_len) = match spec.split_once('#') {
            Some((name, iv)) => (name, iv.parse::<usize>().map_err(|_| malformed())?),
            None => (spec, 0),
        };
        if name.is_empty() {
            return Err(malformed());
        }
        Ok(CipherSpec::new(name, iv_len))
    }
}

impl fmt::Display for CipherSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.iv_len == 0 {
            f.write_str(&self.name)
        } else {
            write!(f, "{}#{}", self.name, self.iv_len)
        }
    }
}

/// Picks the first supported cipher from an offered list.
///
/// Entries that fail to parse are skipped; the result is `None` if nothing
/// usable was offered.
pub fn select_cipher(offered: &str) -> Option<CipherSpec> {
    offered
        .split(LIST_SEPARATOR)
        .filter_map(|entry| entry.trim().parse::<CipherSpec>().ok())
        .find(CipherSpec::is_supported)
}

/// Message digests the GSI exchange knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Md5,
}

impl DigestAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Md5 => "md5",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "sha1" => Some(DigestAlgorithm::Sha1),
            "md5" => Some(DigestAlgorithm::Md5),
            _ => None,
        }
    }
}

/// Picks the first known digest from an offered list.
pub fn select_digest(offered: &str) -> Option<DigestAlgorithm> {
    offered
        .split(LIST_SEPARATOR)
        .find_map(DigestAlgorithm::from_name)
}

/// The cipher and digest agreed for one handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedSuite {
    pub cipher: CipherSpec,
    pub digest: DigestAlgorithm,
}
