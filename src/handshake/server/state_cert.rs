use tracing::debug;

use super::ServerHandshake;
use crate::credential::CertificateChain;
use crate::crypto::{CipherSpec, DigestAlgorithm, NegotiatedSuite};
use crate::error::{CryptoError, DelegationError, ProtocolError, Result};
use crate::handshake::exchange::{
    check_seal, decode_puk, decrypt_main, encrypt_main, make_seal, random_rtag, verify_challenge,
};
use crate::handshake::ServerReply;
use crate::protocol::constants::{CLIENT_CERT, LIST_SEPARATOR, OPTS_DELEGATE_PROXY, SERVER_PXYREQ};
use crate::protocol::message::require_raw;
use crate::protocol::{Bucket, BucketType, HandshakeStepData, NestedBucket, ServerState};

impl ServerHandshake {
    /// Handles `cert`: authenticates the client and completes the key
    /// exchange, then either finishes or asks for a delegated proxy.
    pub(super) fn process_cert(&mut self, message: &HandshakeStepData) -> Result<ServerReply> {
        let variant = self.current_variant()?;

        let chain = CertificateChain::from_pem(message.require_string(BucketType::X509)?)?;
        self.session.set_peer_key(chain.leaf_public_key()?);

        let client_material = decode_puk(
            &self.session,
            message.require_raw(BucketType::Puk)?,
            variant.signs_dh_material(),
        )?;
        let suite = self.check_suite(message)?;
        if suite.cipher.iv_len() != variant.iv_len() {
            return Err(ProtocolError::Unsupported {
                what: "cipher",
                value: suite.cipher.to_string(),
            }
            .into());
        }
        self.session
            .finalize_key_agreement(&client_material, &suite.cipher)?;

        let main = decrypt_main(
            &self.session,
            message.main()?,
            &self.config.protocol,
            CLIENT_CERT,
            self.state.describe(),
        )?;
        verify_challenge(
            &self.session,
            require_raw(main.buckets(), BucketType::SignedRtag)?,
            self.challenge.as_deref(),
        )?;
        if self.config.verify_peer {
            self.store.validate_chain(&chain)?;
        }

        let server_material = self
            .server_material
            .clone()
            .ok_or_else(|| CryptoError::new("server DH material missing"))?;
        if variant.uses_seals() {
            check_seal(
                &self.session,
                require_raw(main.buckets(), BucketType::ClntSeal)?,
                &server_material,
                &client_material,
            )?;
        }

        let options = main.buckets().uint(BucketType::ClntOpts).unwrap_or(0);
        let wants_proxy = variant.supports_delegation() && options & OPTS_DELEGATE_PROXY != 0;
        let proxy_request = if wants_proxy && self.delegation.is_some() {
            let client_rtag = require_raw(main.buckets(), BucketType::Rtag)?;
            Some(self.request_proxy(&chain, client_rtag, &server_material, &client_material)?)
        } else {
            None
        };

        self.peer_user = message.buckets().string(BucketType::User).map(str::to_string);
        self.suite = Some(suite);
        self.peer_chain = Some(chain);

        match proxy_request {
            Some(reply) => Ok(reply),
            None => {
                if wants_proxy {
                    debug!("client offered a proxy but no delegation client is configured");
                }
                self.finish();
                Ok(ServerReply::Ok)
            }
        }
    }

    /// Validates the cipher and digest the client picked.
    fn check_suite(&self, message: &HandshakeStepData) -> Result<NegotiatedSuite> {
        let cipher_name = message.require_string(BucketType::CipherAlg)?;
        let cipher: CipherSpec = cipher_name.parse()?;
        if !cipher.is_supported() || cipher.name() != self.config.cipher {
            return Err(ProtocolError::Unsupported {
                what: "cipher",
                value: cipher_name.to_string(),
            }
            .into());
        }

        let digest_name = message.require_string(BucketType::MdAlg)?;
        let offered = self
            .config
            .digests
            .split(LIST_SEPARATOR)
            .any(|name| name == digest_name);
        let digest = DigestAlgorithm::from_name(digest_name)
            .filter(|_| offered)
            .ok_or_else(|| ProtocolError::Unsupported {
                what: "digest",
                value: digest_name.to_string(),
            })?;

        Ok(NegotiatedSuite { cipher, digest })
    }

    /// Sends `pxyreq` carrying a CSR from the delegation client.
    fn request_proxy(
        &mut self,
        chain: &CertificateChain,
        client_rtag: &[u8],
        server_material: &str,
        client_material: &str,
    ) -> Result<ServerReply> {
        let delegation = self
            .delegation
            .as_mut()
            .ok_or(DelegationError::NotConfigured)?;
        let csr = delegation.request(chain)?.csr_pem().to_string();

        let seal = make_seal(&self.session, server_material, client_material)?;
        let signed_rtag = self.session.sign(client_rtag)?;
        let rtag = random_rtag();

        let protocol = self.config.protocol.as_str();
        let main = NestedBucket::new(BucketType::Main, protocol, SERVER_PXYREQ)
            .with(Bucket::Raw(BucketType::Rtag, rtag.clone()))
            .with(Bucket::Raw(BucketType::SignedRtag, signed_rtag))
            .with(Bucket::Str(BucketType::X509Req, csr))
            .with(Bucket::Raw(BucketType::SrvSeal, seal));
        let reply = HandshakeStepData::new(protocol, SERVER_PXYREQ)
            .with(encrypt_main(&self.session, &main)?);

        self.challenge = Some(rtag);
        self.state = ServerState::AwaitingSigPxy;
        Ok(ServerReply::More(reply.to_bytes()))
    }
}
