//! The per-handshake cryptographic session.
//!
//! Holds the local signing session, the peer verification session and the DH
//! session. The DH session is created exactly once per handshake.
//!
//! 每次握手的密码学会话。

use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::crypto::asymmetric::RsaSession;
use crate::crypto::dh::DhSession;
use crate::crypto::suite::CipherSpec;
use crate::error::CryptoError;

/// Length of a signed-hash payload after decryption.
pub const SIGNED_HASH_LEN: usize = 32;

/// Extra bytes appended to signed-hash payloads before symmetric encryption.
///
/// Some clients pad signed hashes with an additional full PKCS#7 block before
/// handing them to the cipher. Peers on the wire expect exactly these bytes.
pub const SIGNED_HASH_PADDING: [u8; 16] = [0x10; 16];

#[derive(Debug, Default)]
pub struct CryptoSession {
    signer: Option<RsaSession>,
    verifier: Option<RsaSession>,
    dh: Option<DhSession>,
}

impl CryptoSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_signing_key(&mut self, key: RsaPrivateKey) {
        self.signer = Some(RsaSession::for_signing(key));
    }

    pub fn set_peer_key(&mut self, key: RsaPublicKey) {
        self.verifier = Some(RsaSession::for_verifying(key));
    }

    /// Encrypts with the local private key.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.signer
            .as_ref()
            .ok_or_else(|| CryptoError::new("no local private key in session"))?
            .encrypt(data)
    }

    /// Decrypts with the peer public key, returning the signed bytes.
    pub fn verify(&self, signed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.verifier
            .as_ref()
            .ok_or_else(|| CryptoError::new("no peer public key in session"))?
            .decrypt(signed)
    }

    /// Creates our DH session on the built-in group and returns its material.
    pub fn start_key_agreement(&mut self) -> Result<String, CryptoError> {
        self.install_dh(DhSession::new()?)
    }

    /// Creates our DH session on the peer's group and returns its material.
    pub fn join_key_agreement(&mut self, peer_material: &str) -> Result<String, CryptoError> {
        self.install_dh(DhSession::from_peer_material(peer_material)?)
    }

    fn install_dh(&mut self, dh: DhSession) -> Result<String, CryptoError> {
        if self.dh.is_some() {
            return Err(CryptoError::new("DH session already created for this handshake"));
        }
        let material = dh.public_material()?;
        self.dh = Some(dh);
        Ok(material)
    }

    pub fn finalize_key_agreement(
        &mut self,
        peer_material: &str,
        cipher: &CipherSpec,
    ) -> Result<(), CryptoError> {
        self.dh
            .as_mut()
            .ok_or_else(|| CryptoError::new("no DH session to finalize"))?
            .finalize(peer_material, cipher)
    }

    pub fn has_session_key(&self) -> bool {
        self.dh.as_ref().is_some_and(DhSession::is_finalized)
    }

    fn dh(&self) -> Result<&DhSession, CryptoError> {
        self.dh
            .as_ref()
            .ok_or_else(|| CryptoError::new("no session key: DH exchange not started"))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.dh()?.encrypt(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.dh()?.decrypt(ciphertext)
    }

    /// Encrypts a signed-hash payload with the wire padding appended.
    pub fn encrypt_signed_hash(&self, hash: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut padded = Vec::with_capacity(hash.len() + SIGNED_HASH_PADDING.len());
        padded.extend_from_slice(hash);
        padded.extend_from_slice(&SIGNED_HASH_PADDING);
        self.encrypt(&padded)
    }

    /// Decrypts a signed-hash payload, keeping only the leading hash bytes.
    pub fn decrypt_signed_hash(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut plaintext = self.decrypt(ciphertext)?;
        plaintext.truncate(SIGNED_HASH_LEN);
        Ok(plaintext)
    }
}

/// Hash sealed by each peer to prove it holds the session key.
pub fn seal_hash(server_material: &str, client_material: &str) -> [u8; SIGNED_HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(server_material.as_bytes());
    hasher.update(client_material.as_bytes());
    hasher.finalize().into()
}
