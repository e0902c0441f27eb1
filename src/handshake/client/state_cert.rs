use super::{ClientAction, ClientHandshake};
use crate::credential::CertificateChain;
use crate::crypto::suite::{select_cipher, select_digest};
use crate::crypto::NegotiatedSuite;
use crate::error::{ProtocolError, Result};
use crate::handshake::exchange::{
    decode_puk, encode_puk, encrypt_main, make_seal, random_rtag, verify_challenge,
};
use crate::protocol::constants::{CLIENT_CERT, SERVER_CERT};
use crate::protocol::message::{require_plain_main, require_raw};
use crate::protocol::{
    Bucket, BucketType, ClientState, HandshakeStepData, NestedBucket, ProtocolVariant,
};

impl ClientHandshake {
    /// Handles the server `cert` reply and answers with our own `cert`.
    pub(super) fn process_server_cert(&mut self, message: &HandshakeStepData) -> Result<ClientAction> {
        let (variant, version) = ProtocolVariant::negotiate(self.config.version, message.version());
        self.variant = Some(variant);

        if let Some(mode) = message.buckets().string(BucketType::CryptoMode) {
            if mode != self.config.crypto_mode {
                return Err(ProtocolError::Unsupported {
                    what: "crypto mode",
                    value: mode.to_string(),
                }
                .into());
            }
        }

        let chain = CertificateChain::from_pem(message.require_string(BucketType::X509)?)?;
        self.check_server_chain(message, &chain)?;
        self.session.set_peer_key(chain.leaf_public_key()?);

        let main = require_plain_main(message.main()?)?;
        if main.step() != SERVER_CERT {
            return Err(ProtocolError::UnexpectedStep {
                step: main.step(),
                state: self.state.describe(),
            }
            .into());
        }
        verify_challenge(
            &self.session,
            require_raw(main.buckets(), BucketType::SignedRtag)?,
            self.challenge.as_deref(),
        )?;
        let server_rtag = require_raw(main.buckets(), BucketType::Rtag)?;

        let server_material = decode_puk(
            &self.session,
            message.require_raw(BucketType::Puk)?,
            variant.signs_dh_material(),
        )?;
        let cipher_list = message.require_string(BucketType::CipherAlg)?;
        let cipher = select_cipher(cipher_list).ok_or_else(|| ProtocolError::Unsupported {
            what: "cipher",
            value: cipher_list.to_string(),
        })?;
        let digest_list = message.require_string(BucketType::MdAlg)?;
        let digest = select_digest(digest_list).ok_or_else(|| ProtocolError::Unsupported {
            what: "digest",
            value: digest_list.to_string(),
        })?;

        let client_material = self.session.join_key_agreement(&server_material)?;
        self.session
            .finalize_key_agreement(&server_material, &cipher)?;

        let proxy = self.store.client_proxy()?;
        self.session.set_signing_key(proxy.private_key().clone());
        let signed_rtag = self.session.sign(server_rtag)?;
        let rtag = random_rtag();

        let protocol = self.config.protocol.as_str();
        let mut inner = NestedBucket::new(BucketType::Main, protocol, CLIENT_CERT)
            .with(Bucket::Raw(BucketType::SignedRtag, signed_rtag))
            .with(Bucket::Raw(BucketType::Rtag, rtag.clone()))
            .with(Bucket::UInt(BucketType::ClntOpts, self.client_options()));
        if variant.uses_seals() {
            let seal = make_seal(&self.session, &server_material, &client_material)?;
            inner
                .buckets_mut()
                .insert(Bucket::Raw(BucketType::ClntSeal, seal));
        }

        let puk = encode_puk(&self.session, &client_material, variant.signs_dh_material())?;
        let mut reply = HandshakeStepData::new(protocol, CLIENT_CERT)
            .with(Bucket::Str(BucketType::CryptoMode, self.config.crypto_mode.clone()))
            .with(Bucket::UInt(BucketType::Version, version))
            .with(Bucket::Raw(BucketType::Puk, puk))
            .with(Bucket::Str(BucketType::CipherAlg, cipher.to_string()))
            .with(Bucket::Str(BucketType::MdAlg, digest.name().to_string()))
            .with(Bucket::Str(BucketType::X509, proxy.chain().pem().to_string()))
            .with(encrypt_main(&self.session, &inner)?);
        if let Some(user) = &self.user {
            reply.insert(Bucket::Str(BucketType::User, user.clone()));
        }

        self.challenge = Some(rtag);
        self.server_material = Some(server_material);
        self.client_material = Some(client_material);
        self.proxy = Some(proxy);
        self.server_chain = Some(chain);
        self.suite = Some(NegotiatedSuite { cipher, digest });
        self.state = ClientState::AwaitingCertAck;
        Ok(ClientAction::Send(reply.to_bytes()))
    }

    /// The server chain must be issued by a CA we know and, when asked, pass
    /// validation.
    fn check_server_chain(&self, message: &HandshakeStepData, chain: &CertificateChain) -> Result<()> {
        let advertised = message.require_string(BucketType::IssuerHash)?;
        let computed = self.store.hashes().issuer_hash(chain.leaf())?;
        if advertised != computed || !self.ca.is_known(&computed) {
            return Err(ProtocolError::UnknownCa(advertised.to_string()).into());
        }
        if self.config.verify_peer {
            self.store.validate_chain(chain)?;
        }
        Ok(())
    }
}
