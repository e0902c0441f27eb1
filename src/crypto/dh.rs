//! Diffie-Hellman key agreement and the symmetric session cipher it keys.
//!
//! The public material exchanged in the `puk` bucket is a PEM `DH PARAMETERS`
//! block followed by `---BPUB---<hex public value>---EPUB---`.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use der::asn1::Uint;
use der::pem::{LineEnding, PemLabel};
use der::{DecodePem, EncodePem, Sequence};
use rand::RngCore;
use rsa::BigUint;

use crate::crypto::keys::{derive_session_key, SessionKey};
use crate::crypto::suite::CipherSpec;
use crate::error::CryptoError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const AES_BLOCK_LEN: usize = 16;
const PUBLIC_BEGIN: &str = "---BPUB---";
const PUBLIC_END: &str = "---EPUB---";
const PRIVATE_EXPONENT_LEN: usize = 32;
/// Smallest prime accepted from a peer.
const MIN_PRIME_BITS: usize = 1024;

/// RFC 3526 group 14 (2048-bit MODP), generator 2.
const MODP_2048_PRIME: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);
const MODP_2048_GENERATOR: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Sequence)]
struct DhParameters {
    prime: Uint,
    generator: Uint,
}

impl PemLabel for DhParameters {
    const PEM_LABEL: &'static str = "DH PARAMETERS";
}

fn der_error(err: der::Error) -> CryptoError {
    CryptoError::new(format!("DH parameters: {err}"))
}

/// Parsed form of a peer's `puk` material.
#[derive(Debug, Clone)]
struct PeerMaterial {
    prime: BigUint,
    generator: BigUint,
    public: BigUint,
}

impl PeerMaterial {
    fn parse(material: &str) -> Result<Self, CryptoError> {
        let (params_pem, rest) = material
            .split_once(PUBLIC_BEGIN)
            .ok_or_else(|| CryptoError::new("DH material lacks a public value"))?;
        let hex = rest
            .split_once(PUBLIC_END)
            .map(|(hex, _)| hex)
            .ok_or_else(|| CryptoError::new("DH public value is not terminated"))?;

        let params = DhParameters::from_pem(params_pem.trim_start()).map_err(der_error)?;
        let public = BigUint::parse_bytes(hex.trim().as_bytes(), 16)
            .ok_or_else(|| CryptoError::new("DH public value is not hexadecimal"))?;
        let peer = PeerMaterial {
            prime: BigUint::from_bytes_be(params.prime.as_bytes()),
            generator: BigUint::from_bytes_be(params.generator.as_bytes()),
            public,
        };
        peer.check_group()?;
        Ok(peer)
    }

    /// The prime must be odd and large enough, and `1 < g < p-1`.
    fn check_group(&self) -> Result<(), CryptoError> {
        if self.prime.bits() < MIN_PRIME_BITS {
            return Err(CryptoError::new(format!(
                "DH prime of {} bits is below the {MIN_PRIME_BITS}-bit minimum",
                self.prime.bits()
            )));
        }
        let odd = self.prime.to_bytes_be().last().is_some_and(|byte| byte & 1 == 1);
        if !odd {
            return Err(CryptoError::new("DH prime is even"));
        }
        let one = BigUint::from(1u32);
        if self.generator <= one || self.generator >= &self.prime - &one {
            return Err(CryptoError::new("DH generator out of range"));
        }
        Ok(())
    }
}

/// One side of a DH exchange plus the session key once agreed.
///
/// DH 交换的一方，以及协商完成后的会话密钥。
pub struct DhSession {
    prime: BigUint,
    generator: BigUint,
    private: BigUint,
    public: BigUint,
    key: Option<SessionKey>,
}

impl std::fmt::Debug for DhSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhSession")
            .field("modulus_bits", &self.prime.bits())
            .field("finalized", &self.key.is_some())
            .finish_non_exhaustive()
    }
}

impl DhSession {
    /// Starts a session on the built-in 2048-bit group.
    pub fn new() -> Result<Self, CryptoError> {
        let prime = BigUint::parse_bytes(MODP_2048_PRIME.as_bytes(), 16)
            .ok_or_else(|| CryptoError::new("invalid built-in DH prime"))?;
        Ok(Self::with_group(prime, BigUint::from(MODP_2048_GENERATOR)))
    }

    /// Starts a session on the group chosen by the peer.
    pub fn from_peer_material(material: &str) -> Result<Self, CryptoError> {
        let peer = PeerMaterial::parse(material)?;
        Ok(Self::with_group(peer.prime, peer.generator))
    }

    fn with_group(prime: BigUint, generator: BigUint) -> Self {
        let mut bytes = [0u8; PRIVATE_EXPONENT_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[0] |= 0x80;
        let private = BigUint::from_bytes_be(&bytes);
        let public = generator.modpow(&private, &prime);
        Self {
            prime,
            generator,
            private,
            public,
            key: None,
        }
    }

    fn modulus_len(&self) -> usize {
        self.prime.bits().div_ceil(8)
    }

    /// Encodes the parameters and our public value for the `puk` bucket.
    pub fn public_material(&self) -> Result<String, CryptoError> {
        let params = DhParameters {
            prime: Uint::new(&self.prime.to_bytes_be()).map_err(der_error)?,
            generator: Uint::new(&self.generator.to_bytes_be()).map_err(der_error)?,
        };
        let pem = params.to_pem(LineEnding::LF).map_err(der_error)?;
        Ok(format!(
            "{pem}{PUBLIC_BEGIN}{}{PUBLIC_END}",
            self.public.to_str_radix(16)
        ))
    }

    pub fn is_finalized(&self) -> bool {
        self.key.is_some()
    }

    /// Consumes the peer's public value and derives the session key.
    pub fn finalize(&mut self, peer_material: &str, cipher: &CipherSpec) -> Result<(), CryptoError> {
        if self.key.is_some() {
            return Err(CryptoError::new("DH session is already finalized"));
        }
        if !cipher.is_supported() {
            return Err(CryptoError::new(format!("unsupported cipher '{cipher}'")));
        }
        if cipher.iv_len() != 0 && cipher.iv_len() != AES_BLOCK_LEN {
            return Err(CryptoError::new(format!(
                "IV length {} does not match the cipher block",
                cipher.iv_len()
            )));
        }

        let peer = PeerMaterial::parse(peer_material)?;
        if peer.prime != self.prime || peer.generator != self.generator {
            return Err(CryptoError::new("peer uses different DH parameters"));
        }
        let one = BigUint::from(1u32);
        let upper = &self.prime - &one;
        if peer.public <= one || peer.public >= upper {
            return Err(CryptoError::new("peer DH public value out of range"));
        }

        let shared = peer.public.modpow(&self.private, &self.prime);
        self.key = Some(derive_session_key(
            &shared,
            self.modulus_len(),
            cipher.iv_len(),
        ));
        Ok(())
    }

    fn session_key(&self) -> Result<&SessionKey, CryptoError> {
        self.key
            .as_ref()
            .ok_or_else(|| CryptoError::new("no session key: DH exchange not finalized"))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self.session_key()?;
        let mut iv = [0u8; AES_BLOCK_LEN];
        if key.iv_len() > 0 {
            rand::thread_rng().fill_bytes(&mut iv);
        }
        let cipher = Aes128CbcEnc::new_from_slices(key.key(), &iv)
            .map_err(|_| CryptoError::new("invalid session key length"))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut out = Vec::with_capacity(key.iv_len() + ciphertext.len());
        if key.iv_len() > 0 {
            out.extend_from_slice(&iv);
        }
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self.session_key()?;
        let mut iv = [0u8; AES_BLOCK_LEN];
        let body = if key.iv_len() > 0 {
            if ciphertext.len() < AES_BLOCK_LEN {
                return Err(CryptoError::new("ciphertext shorter than its IV"));
            }
            let (prefix, body) = ciphertext.split_at(AES_BLOCK_LEN);
            iv.copy_from_slice(prefix);
            body
        } else {
            ciphertext
        };
        let cipher = Aes128CbcDec::new_from_slices(key.key(), &iv)
            .map_err(|_| CryptoError::new("invalid session key length"))?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| CryptoError::new("session decryption failed: bad padding"))
    }
}
