use super::ServerHandshake;
use crate::error::{DelegationError, Result};
use crate::handshake::exchange::{decrypt_main, verify_challenge};
use crate::handshake::ServerReply;
use crate::protocol::constants::CLIENT_SIGPXY;
use crate::protocol::message::{require_raw, require_string};
use crate::protocol::{BucketType, HandshakeStepData};

impl ServerHandshake {
    /// Handles `sigpxy`: stores the proxy the client signed for us.
    pub(super) fn process_sigpxy(&mut self, message: &HandshakeStepData) -> Result<ServerReply> {
        let main = decrypt_main(
            &self.session,
            message.main()?,
            &self.config.protocol,
            CLIENT_SIGPXY,
            self.state.describe(),
        )?;
        verify_challenge(
            &self.session,
            require_raw(main.buckets(), BucketType::SignedRtag)?,
            self.challenge.as_deref(),
        )?;

        let signed_cert = require_string(main.buckets(), BucketType::X509)?;
        let delegation = self
            .delegation
            .as_mut()
            .ok_or(DelegationError::NotConfigured)?;
        self.delegated = Some(delegation.finalize(signed_cert)?);

        self.finish();
        Ok(ServerReply::Ok)
    }
}
