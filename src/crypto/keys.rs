//! Derivation of the symmetric session key from the DH shared secret.
//!
//! Both peers left-pad the shared secret to the modulus length and take the
//! leading bytes as the AES key, so they end up with identical keys.
//!
//! 从 DH 共享密钥派生对称会话密钥。

use rsa::BigUint;
use zeroize::{Zeroize, Zeroizing};

/// AES-128 key length.
pub const SESSION_KEY_LEN: usize = 16;

/// Symmetric key material for an established session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_LEN],
    iv_len: usize,
}

impl SessionKey {
    pub fn key(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.key
    }

    pub fn iv_len(&self) -> usize {
        self.iv_len
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("iv_len", &self.iv_len)
            .finish_non_exhaustive()
    }
}

impl Zeroize for SessionKey {
    fn zeroize(&mut self) {
        self.key.zeroize();
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Derives the session key from the DH shared secret.
pub fn derive_session_key(shared_secret: &BigUint, modulus_len: usize, iv_len: usize) -> SessionKey {
    let secret = Zeroizing::new(shared_secret.to_bytes_be());
    let mut padded = Zeroizing::new(vec![0u8; modulus_len.saturating_sub(secret.len())]);
    padded.extend_from_slice(&secret);

    let mut key = [0u8; SESSION_KEY_LEN];
    for (slot, byte) in key.iter_mut().zip(padded.iter()) {
        *slot = *byte;
    }
    SessionKey { key, iv_len }
}
