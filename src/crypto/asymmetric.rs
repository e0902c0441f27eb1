//! One-directional RSA sessions used to sign and verify handshake payloads.
//!
//! GSI "signs" by encrypting with the private key under PKCS#1 v1.5 type-1
//! padding and "verifies" by decrypting with the public key, recovering the
//! original bytes. Payloads such as PEM certificates span several RSA blocks,
//! so both directions work block by block.
//!
//! 单向 RSA 会话：用私钥加密即签名，用公钥解密即验证。

use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};

use crate::error::CryptoError;

/// Bytes of PKCS#1 v1.5 padding overhead per block.
pub const PKCS1_PADDING_OVERHEAD: usize = 11;

/// Minimum number of `0xFF` filler bytes in a type-1 block.
const MIN_FILLER: usize = 8;

/// An RSA context initialised for exactly one direction.
#[derive(Debug, Clone)]
pub enum RsaSession {
    /// Private key: encrypts (signs).
    Encrypt(RsaPrivateKey),
    /// Peer public key: decrypts (verifies).
    Decrypt(RsaPublicKey),
}

impl RsaSession {
    pub fn for_signing(key: RsaPrivateKey) -> Self {
        RsaSession::Encrypt(key)
    }

    pub fn for_verifying(key: RsaPublicKey) -> Self {
        RsaSession::Decrypt(key)
    }

    fn modulus_len(&self) -> usize {
        match self {
            RsaSession::Encrypt(key) => key.size(),
            RsaSession::Decrypt(key) => key.size(),
        }
    }

    /// Largest plaintext chunk one encrypted block can carry.
    pub fn encrypt_block_size(&self) -> usize {
        self.modulus_len() - PKCS1_PADDING_OVERHEAD
    }

    /// Size of one ciphertext block.
    pub fn decrypt_block_size(&self) -> usize {
        self.modulus_len()
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let RsaSession::Encrypt(key) = self else {
            return Err(CryptoError::new(
                "RSA session is initialised for decryption only",
            ));
        };

        let block = self.encrypt_block_size();
        let blocks = plaintext.len().div_ceil(block).max(1);
        let mut out = Vec::with_capacity(blocks * self.modulus_len());
        if plaintext.is_empty() {
            out.extend_from_slice(&key.sign(Pkcs1v15Sign::new_unprefixed(), &[])?);
            return Ok(out);
        }
        for chunk in plaintext.chunks(block) {
            out.extend_from_slice(&key.sign(Pkcs1v15Sign::new_unprefixed(), chunk)?);
        }
        Ok(out)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let RsaSession::Decrypt(key) = self else {
            return Err(CryptoError::new(
                "RSA session is initialised for encryption only",
            ));
        };

        let block = self.decrypt_block_size();
        if ciphertext.is_empty() || ciphertext.len() % block != 0 {
            return Err(CryptoError::new(format!(
                "ciphertext of {} bytes is not a multiple of the {block}-byte RSA block",
                ciphertext.len()
            )));
        }

        let mut out = Vec::with_capacity(ciphertext.len());
        for chunk in ciphertext.chunks(block) {
            let c = BigUint::from_bytes_be(chunk);
            if &c >= key.n() {
                return Err(CryptoError::new("RSA block out of range for the modulus"));
            }
            let m = c.modpow(key.e(), key.n()).to_bytes_be();
            let mut em = vec![0u8; block - m.len()];
            em.extend_from_slice(&m);
            out.extend_from_slice(strip_type1_padding(&em)?);
        }
        Ok(out)
    }
}

/// Removes `00 01 FF.. 00` from a decrypted block.
fn strip_type1_padding(em: &[u8]) -> Result<&[u8], CryptoError> {
    let bad = || CryptoError::new("invalid PKCS#1 type 1 padding");
    if em.len() < PKCS1_PADDING_OVERHEAD || em[0] != 0x00 || em[1] != 0x01 {
        return Err(bad());
    }
    let filler = em[2..].iter().take_while(|&&b| b == 0xFF).count();
    let separator = 2 + filler;
    if filler < MIN_FILLER || em.get(separator) != Some(&0x00) {
        return Err(bad());
    }
    Ok(&em[separator + 1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::DecodeRsaPrivateKey;
    use rsa::pkcs8::DecodePrivateKey;

    fn key_1024() -> RsaPrivateKey {
        RsaPrivateKey::from_pkcs8_pem(include_str!("../../tests/fixtures/userkey.pem")).unwrap()
    }

    fn key_2048() -> RsaPrivateKey {
        RsaPrivateKey::from_pkcs1_pem(include_str!("../../tests/fixtures/hostkey.pem")).unwrap()
    }

    #[test]
    fn multi_block_payloads_survive_for_both_key_sizes() {
        for key in [key_1024(), key_2048()] {
            let signer = RsaSession::for_signing(key.clone());
            let verifier = RsaSession::for_verifying(key.to_public_key());
            assert_eq!(signer.encrypt_block_size(), key.size() - 11);
            assert_eq!(verifier.decrypt_block_size(), key.size());

            let plaintext: Vec<u8> = (0..signer.encrypt_block_size() * 2 + 17)
                .map(|i| (i % 251) as u8)
                .collect();
            let ciphertext = signer.encrypt(&plaintext).unwrap();
            assert_eq!(ciphertext.len(), 3 * key.size());
            assert_eq!(verifier.decrypt(&ciphertext).unwrap(), plaintext);
        }
    }

    #[test]
    fn exact_block_boundary_uses_one_block() {
        let key = key_1024();
        let signer = RsaSession::for_signing(key.clone());
        let plaintext = vec![0x42; signer.encrypt_block_size()];
        let ciphertext = signer.encrypt(&plaintext).unwrap();
        assert_eq!(ciphertext.len(), key.size());
        let verifier = RsaSession::for_verifying(key.to_public_key());
        assert_eq!(verifier.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn wrong_direction_and_wrong_key_fail() {
        let key = key_1024();
        let signer = RsaSession::for_signing(key.clone());
        let verifier = RsaSession::for_verifying(key.to_public_key());
        assert!(signer.decrypt(&[0u8; 128]).is_err());
        assert!(verifier.encrypt(b"data").is_err());

        let ciphertext = signer.encrypt(b"challenge").unwrap();
        let other = RsaSession::for_verifying(key_2048().to_public_key());
        assert!(other.decrypt(&ciphertext).is_err());
        assert!(verifier.decrypt(&ciphertext[..100]).is_err());
    }
}
