//! Certificate chains and the credentials built from them.
//!
//! 证书链以及由其构成的凭据。

use std::fmt;
use std::time::SystemTime;

use der::{Decode, Encode};
use pem::{EncodeConfig, LineEnding, Pem};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use x509_cert::Certificate;

use crate::error::CredentialError;

const CERTIFICATE_LABEL: &str = "CERTIFICATE";
const PKCS8_KEY_LABEL: &str = "PRIVATE KEY";
const PKCS1_KEY_LABEL: &str = "RSA PRIVATE KEY";

/// Re-encodes a block with LF line endings, whatever the source used.
fn encode_block(block: &Pem) -> String {
    pem::encode_config(block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

/// Parses an RSA private key from PKCS#8 or PKCS#1 PEM.
pub fn parse_private_key(text: &str) -> Result<RsaPrivateKey, CredentialError> {
    let blocks = pem::parse_many(text)
        .map_err(|err| CredentialError::PrivateKey(format!("malformed PEM: {err}")))?;
    let block = blocks
        .iter()
        .find(|block| block.tag() == PKCS8_KEY_LABEL || block.tag() == PKCS1_KEY_LABEL)
        .ok_or_else(|| CredentialError::PrivateKey("no private key block found".into()))?;

    if block.tag() == PKCS8_KEY_LABEL {
        RsaPrivateKey::from_pkcs8_der(block.contents())
            .map_err(|err| CredentialError::PrivateKey(err.to_string()))
    } else {
        RsaPrivateKey::from_pkcs1_der(block.contents())
            .map_err(|err| CredentialError::PrivateKey(err.to_string()))
    }
}

/// An X.509 chain ordered leaf first, with the PEM it was parsed from.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateChain {
    certificates: Vec<Certificate>,
    /// One LF-encoded block per certificate, in chain order.
    blocks: Vec<String>,
    pem: String,
}

impl CertificateChain {
    /// Parses every `CERTIFICATE` block of `text`; other blocks are skipped.
    ///
    /// The retained PEM holds the certificates only, never key material.
    pub fn from_pem(text: &str) -> Result<Self, CredentialError> {
        let parsed = pem::parse_many(text)
            .map_err(|err| CredentialError::Certificate(format!("malformed PEM: {err}")))?;
        let mut certificates = Vec::new();
        let mut blocks = Vec::new();
        for block in parsed.iter().filter(|block| block.tag() == CERTIFICATE_LABEL) {
            let certificate = Certificate::from_der(block.contents())
                .map_err(|err| CredentialError::Certificate(err.to_string()))?;
            certificates.push(certificate);
            blocks.push(encode_block(block));
        }
        if certificates.is_empty() {
            return Err(CredentialError::Certificate("no certificate found".into()));
        }
        Ok(Self::from_parts(certificates, blocks))
    }

    fn from_parts(certificates: Vec<Certificate>, blocks: Vec<String>) -> Self {
        let pem = blocks.concat();
        Self {
            certificates,
            blocks,
            pem,
        }
    }

    pub fn leaf(&self) -> &Certificate {
        &self.certificates[0]
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// RFC 4514 rendering of the leaf subject.
    pub fn subject(&self) -> String {
        self.leaf().tbs_certificate.subject.to_string()
    }

    pub fn issuer(&self) -> String {
        self.leaf().tbs_certificate.issuer.to_string()
    }

    /// The RSA public key of the leaf certificate.
    pub fn leaf_public_key(&self) -> Result<RsaPublicKey, CredentialError> {
        let spki = self
            .leaf()
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|err| CredentialError::Certificate(err.to_string()))?;
        RsaPublicKey::from_public_key_der(&spki)
            .map_err(|err| CredentialError::Certificate(format!("leaf key is not RSA: {err}")))
    }

    pub fn leaf_not_after(&self) -> SystemTime {
        self.leaf().tbs_certificate.validity.not_after.to_system_time()
    }

    /// A new chain with the leaf of `signed` placed in front of this one.
    pub fn extended_by(&self, signed: &CertificateChain) -> CertificateChain {
        let mut certificates = Vec::with_capacity(self.len() + 1);
        certificates.push(signed.leaf().clone());
        certificates.extend_from_slice(&self.certificates);
        let mut blocks = Vec::with_capacity(self.len() + 1);
        blocks.push(signed.blocks[0].clone());
        blocks.extend_from_slice(&self.blocks);
        CertificateChain::from_parts(certificates, blocks)
    }

    /// Fails if the leaf certificate expired before `now`.
    pub fn check_not_expired(&self, now: SystemTime) -> Result<(), CredentialError> {
        if self.leaf_not_after() < now {
            return Err(CredentialError::Expired {
                subject: self.subject(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for CertificateChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateChain")
            .field("subject", &self.subject())
            .field("len", &self.len())
            .finish()
    }
}

/// A certificate chain and the private key of its leaf.
///
/// 证书链及其叶证书的私钥。
pub struct Credential {
    chain: CertificateChain,
    private_key: RsaPrivateKey,
    loaded_at: SystemTime,
}

impl Credential {
    pub fn new(chain: CertificateChain, private_key: RsaPrivateKey, loaded_at: SystemTime) -> Self {
        Self {
            chain,
            private_key,
            loaded_at,
        }
    }

    /// Builds a credential from separate certificate and key PEM texts.
    pub fn from_pem(
        certificates: &str,
        private_key: &str,
        loaded_at: SystemTime,
    ) -> Result<Self, CredentialError> {
        Ok(Self::new(
            CertificateChain::from_pem(certificates)?,
            parse_private_key(private_key)?,
            loaded_at,
        ))
    }

    /// Builds a credential from one PEM holding both certificates and key,
    /// the layout of a grid proxy file.
    pub fn from_combined_pem(text: &str, loaded_at: SystemTime) -> Result<Self, CredentialError> {
        Self::from_pem(text, text, loaded_at)
    }

    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    pub fn subject(&self) -> String {
        self.chain.subject()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("chain", &self.chain)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}
