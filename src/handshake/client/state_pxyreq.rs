use tracing::debug;

use super::{ClientAction, ClientHandshake};
use crate::error::{CryptoError, DelegationError, ProtocolError, Result};
use crate::handshake::exchange::{check_seal, decrypt_main, encrypt_main, verify_challenge};
use crate::protocol::constants::{CLIENT_SIGPXY, SERVER_PXYREQ};
use crate::protocol::message::{require_raw, require_string};
use crate::protocol::{Bucket, BucketType, ClientState, HandshakeStepData, NestedBucket};

impl ClientHandshake {
    /// Handles a proxy request by signing the server's CSR with our proxy.
    ///
    /// Refused unless proxy signing was enabled and a signer configured.
    pub(super) fn process_pxyreq(&mut self, message: &HandshakeStepData) -> Result<ClientAction> {
        let signer = match (&self.signer, self.config.accept_proxy_requests) {
            (Some(signer), true) => signer.clone(),
            _ => {
                return Err(ProtocolError::Unsupported {
                    what: "request",
                    value: "proxy signing is disabled".to_string(),
                }
                .into());
            }
        };
        let variant = self.current_variant()?;
        if !variant.supports_delegation() {
            return Err(ProtocolError::UnexpectedStep {
                step: SERVER_PXYREQ,
                state: self.state.describe(),
            }
            .into());
        }

        let main = decrypt_main(
            &self.session,
            message.main()?,
            &self.config.protocol,
            SERVER_PXYREQ,
            self.state.describe(),
        )?;
        verify_challenge(
            &self.session,
            require_raw(main.buckets(), BucketType::SignedRtag)?,
            self.challenge.as_deref(),
        )?;
        if variant.uses_seals() {
            let server_material = self.server_material.as_deref().unwrap_or_default();
            let client_material = self.client_material.as_deref().unwrap_or_default();
            check_seal(
                &self.session,
                require_raw(main.buckets(), BucketType::SrvSeal)?,
                server_material,
                client_material,
            )?;
        }

        let csr = require_string(main.buckets(), BucketType::X509Req)?;
        let server_rtag = require_raw(main.buckets(), BucketType::Rtag)?;
        let proxy = self
            .proxy
            .clone()
            .ok_or_else(|| CryptoError::new("no proxy loaded for signing"))?;
        let signed_cert = signer.sign(csr, &proxy).map_err(|err| match err {
            DelegationError::Signing(_) => err,
            other => DelegationError::Signing(other.to_string()),
        })?;
        debug!(subject = %proxy.subject(), "signed proxy request from server");

        let protocol = self.config.protocol.as_str();
        let inner = NestedBucket::new(BucketType::Main, protocol, CLIENT_SIGPXY)
            .with(Bucket::Str(BucketType::X509, signed_cert))
            .with(Bucket::Raw(BucketType::SignedRtag, self.session.sign(server_rtag)?));
        let reply = HandshakeStepData::new(protocol, CLIENT_SIGPXY)
            .with(encrypt_main(&self.session, &inner)?);

        self.challenge = None;
        self.state = ClientState::AwaitingPxyReqResponse;
        Ok(ClientAction::Send(reply.to_bytes()))
    }
}
