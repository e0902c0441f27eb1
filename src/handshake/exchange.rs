//! Checks and bucket transformations shared by the client and server steps.

use std::time::{Duration, SystemTime};

use rand::RngCore;

use crate::crypto::session::seal_hash;
use crate::crypto::CryptoSession;
use crate::error::{CryptoError, ProtocolError, Result};
use crate::protocol::{Bucket, BucketType, NestedBucket};

/// Length of the random challenges (`rtag`).
pub(crate) const RTAG_LEN: usize = 16;

pub(crate) fn random_rtag() -> Vec<u8> {
    let mut rtag = vec![0u8; RTAG_LEN];
    rand::thread_rng().fill_bytes(&mut rtag);
    rtag
}

pub(crate) fn check_protocol(expected: &str, found: &str) -> Result<()> {
    if expected != found {
        return Err(ProtocolError::WrongProtocol {
            expected: expected.to_string(),
            found: found.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Tracks the arrival time of the previous inbound message.
#[derive(Debug, Clone, Default)]
pub(crate) struct SkewGuard {
    last_inbound: Option<SystemTime>,
}

impl SkewGuard {
    /// Records `now`, failing if the previous message is older than `allowed`.
    pub(crate) fn check(&mut self, now: SystemTime, allowed: Duration) -> Result<()> {
        if let Some(previous) = self.last_inbound {
            let elapsed = now.duration_since(previous).unwrap_or(Duration::ZERO);
            if elapsed > allowed {
                return Err(ProtocolError::Expired { elapsed, allowed }.into());
            }
        }
        self.last_inbound = Some(now);
        Ok(())
    }
}

/// Encrypts a nested `main` into its raw wire form.
pub(crate) fn encrypt_main(session: &CryptoSession, main: &NestedBucket) -> Result<Bucket> {
    let ciphertext = session.encrypt(&main.payload_bytes())?;
    Ok(Bucket::Raw(BucketType::Main, ciphertext))
}

/// Decrypts an encrypted `main` and checks its protocol and step.
pub(crate) fn decrypt_main(
    session: &CryptoSession,
    main: &Bucket,
    protocol: &str,
    step: i32,
    state: &'static str,
) -> Result<NestedBucket> {
    let ciphertext = match main {
        Bucket::Raw(_, ciphertext) => ciphertext,
        Bucket::Nested(_) => return Err(ProtocolError::CleartextMain.into()),
        _ => return Err(ProtocolError::WrongShape(BucketType::Main).into()),
    };
    let plaintext = session.decrypt(ciphertext)?;
    let nested = NestedBucket::deserialize(BucketType::Main, &plaintext)?;
    check_protocol(protocol, nested.protocol())?;
    if nested.step() != step {
        return Err(ProtocolError::UnexpectedStep {
            step: nested.step(),
            state,
        }
        .into());
    }
    Ok(nested)
}

/// Checks that the peer signed the challenge we issued.
pub(crate) fn verify_challenge(
    session: &CryptoSession,
    signed: &[u8],
    issued: Option<&[u8]>,
) -> Result<()> {
    let issued = issued.ok_or_else(|| CryptoError::new("no challenge outstanding"))?;
    if session.verify(signed)? != issued {
        return Err(CryptoError::new("challenge signature does not match").into());
    }
    Ok(())
}

/// Produces the encrypted seal over both DH materials.
pub(crate) fn make_seal(
    session: &CryptoSession,
    server_material: &str,
    client_material: &str,
) -> Result<Vec<u8>> {
    Ok(session.encrypt_signed_hash(&seal_hash(server_material, client_material))?)
}

/// Checks a seal produced by [`make_seal`] on the other side.
pub(crate) fn check_seal(
    session: &CryptoSession,
    seal: &[u8],
    server_material: &str,
    client_material: &str,
) -> Result<()> {
    let received = session.decrypt_signed_hash(seal)?;
    if received != seal_hash(server_material, client_material) {
        return Err(CryptoError::new("session seal does not match").into());
    }
    Ok(())
}

/// Encodes our DH material for the `puk` bucket, signing it when asked.
pub(crate) fn encode_puk(session: &CryptoSession, material: &str, signed: bool) -> Result<Vec<u8>> {
    if signed {
        Ok(session.sign(material.as_bytes())?)
    } else {
        Ok(material.as_bytes().to_vec())
    }
}

/// Recovers the peer's DH material from a `puk` bucket.
pub(crate) fn decode_puk(session: &CryptoSession, puk: &[u8], signed: bool) -> Result<String> {
    let bytes = if signed {
        session.verify(puk)?
    } else {
        puk.to_vec()
    };
    String::from_utf8(bytes).map_err(|_| CryptoError::new("DH material is not text").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skew_guard_measures_from_the_previous_message() {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let allowed = Duration::from_secs(30);
        let mut guard = SkewGuard::default();

        guard.check(start, allowed).unwrap();
        guard.check(start + Duration::from_secs(30), allowed).unwrap();
        let err = guard
            .check(start + Duration::from_secs(61), allowed)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::GsiError::Protocol(ProtocolError::Expired { .. })
        ));
    }

    #[test]
    fn plaintext_main_is_refused_once_keys_exist() {
        let session = CryptoSession::new();
        let main = Bucket::Nested(NestedBucket::new(BucketType::Main, "gsi", 1001));
        assert!(matches!(
            decrypt_main(&session, &main, "gsi", 1001, "test"),
            Err(crate::error::GsiError::Protocol(ProtocolError::CleartextMain))
        ));
    }
}
