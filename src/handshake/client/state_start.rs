use super::ClientHandshake;
use crate::error::Result;
use crate::handshake::exchange::random_rtag;
use crate::protocol::constants::{CLIENT_CERTREQ, HASH_SEPARATOR, OPTS_DELEGATE_PROXY};
use crate::protocol::{Bucket, BucketType, ClientState, HandshakeStepData, NestedBucket};

impl ClientHandshake {
    /// Options advertised in `clnt_opts`.
    pub(super) fn client_options(&self) -> u32 {
        if self.config.request_delegation {
            OPTS_DELEGATE_PROXY
        } else {
            0
        }
    }

    pub(super) fn build_certreq(&mut self) -> Result<Vec<u8>> {
        let rtag = random_rtag();
        let issuer_hashes = self
            .ca
            .known_hashes()
            .join(&HASH_SEPARATOR.to_string());

        let protocol = self.config.protocol.as_str();
        let main = NestedBucket::new(BucketType::Main, protocol, CLIENT_CERTREQ)
            .with(Bucket::Raw(BucketType::Rtag, rtag.clone()))
            .with(Bucket::UInt(BucketType::ClntOpts, self.client_options()));
        let message = HandshakeStepData::new(protocol, CLIENT_CERTREQ)
            .with(Bucket::UInt(BucketType::Version, self.config.version))
            .with(Bucket::Str(BucketType::CryptoMode, self.config.crypto_mode.clone()))
            .with(Bucket::Str(BucketType::IssuerHash, issuer_hashes))
            .with(Bucket::Nested(main));

        // The reply must arrive within the skew window of this request.
        self.skew
            .check(self.clock.now(), self.config.max_time_skew())?;
        self.challenge = Some(rtag);
        self.state = ClientState::AwaitingCertResponse;
        Ok(message.to_bytes())
    }
}
