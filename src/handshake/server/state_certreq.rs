use super::ServerHandshake;
use crate::crypto::CipherSpec;
use crate::error::{ProtocolError, Result};
use crate::handshake::exchange::{encode_puk, random_rtag};
use crate::handshake::ServerReply;
use crate::protocol::constants::{HASH_SEPARATOR, SERVER_CERT};
use crate::protocol::message::{require_plain_main, require_raw};
use crate::protocol::{
    Bucket, BucketType, HandshakeStepData, NestedBucket, ProtocolVariant, ServerState,
};

impl ServerHandshake {
    /// Handles `certreq`: fixes the variant, answers the client challenge
    /// and opens the DH exchange.
    pub(super) fn process_certreq(&mut self, message: &HandshakeStepData) -> Result<ServerReply> {
        let (variant, version) = ProtocolVariant::negotiate(self.config.version, message.version());
        self.variant = Some(variant);
        self.version = version;

        let crypto_mode = message.require_string(BucketType::CryptoMode)?;
        if crypto_mode != self.config.crypto_mode {
            return Err(ProtocolError::Unsupported {
                what: "crypto mode",
                value: crypto_mode.to_string(),
            }
            .into());
        }

        let offered = message.require_string(BucketType::IssuerHash)?;
        let known = offered
            .split(HASH_SEPARATOR)
            .map(str::trim)
            .any(|hash| self.ca.is_known(hash));
        if !known {
            return Err(ProtocolError::UnknownCa(offered.to_string()).into());
        }

        let main = require_plain_main(message.main()?)?;
        let client_rtag = require_raw(main.buckets(), BucketType::Rtag)?;

        let host = self.store.host_credential()?;
        self.session.set_signing_key(host.private_key().clone());
        let signed_rtag = self.session.sign(client_rtag)?;
        let rtag = random_rtag();

        let material = self.session.start_key_agreement()?;
        let puk = encode_puk(&self.session, &material, variant.signs_dh_material())?;
        let cipher = CipherSpec::new(self.config.cipher.as_str(), variant.iv_len());
        let issuer_hash = self.store.hashes().issuer_hash(host.chain().leaf())?;

        let protocol = self.config.protocol.as_str();
        let main = NestedBucket::new(BucketType::Main, protocol, SERVER_CERT)
            .with(Bucket::Raw(BucketType::SignedRtag, signed_rtag))
            .with(Bucket::Raw(BucketType::Rtag, rtag.clone()));
        let reply = HandshakeStepData::new(protocol, SERVER_CERT)
            .with(Bucket::UInt(BucketType::Version, version))
            .with(Bucket::Str(BucketType::CryptoMode, self.config.crypto_mode.clone()))
            .with(Bucket::Raw(BucketType::Puk, puk))
            .with(Bucket::Str(BucketType::CipherAlg, cipher.to_string()))
            .with(Bucket::Str(BucketType::MdAlg, self.config.digests.clone()))
            .with(Bucket::Str(BucketType::X509, host.chain().pem().to_string()))
            .with(Bucket::Str(BucketType::IssuerHash, issuer_hash))
            .with(Bucket::Nested(main));

        self.challenge = Some(rtag);
        self.server_material = Some(material);
        self.state = ServerState::AwaitingCert;
        Ok(ServerReply::More(reply.to_bytes()))
    }
}
