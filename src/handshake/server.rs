//! Implements the server side of the GSI handshake.
//! 实现 GSI 握手的服务器端。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::credential::{CaHashDirectory, CertificateChain, CredentialStore};
use crate::crypto::{CryptoSession, NegotiatedSuite};
use crate::delegation::ProxyDelegation;
use crate::error::{GsiError, ProtocolError, Result};
use crate::protocol::constants::step_name;
use crate::protocol::{HandshakeStepData, ProtocolVariant, SecurityToken, ServerState};

use super::exchange::{check_protocol, SkewGuard};
use super::{GsiConfig, Missing, ServerReply};

mod builder;
mod state_cert;
mod state_certreq;
mod state_sigpxy;

pub use builder::ServerHandshakeBuilder;

/// The server-side handshake state machine for one connection.
///
/// Each inbound request moves the machine forward by one step. Any error
/// leaves it in [`ServerState::Failed`], after which every call is refused.
///
/// 单条连接的服务器端握手状态机。
///
/// 每个入站请求使状态机前进一步。任何错误都会使其进入 [`ServerState::Failed`]，
/// 之后的所有调用都会被拒绝。
#[derive(Debug)]
pub struct ServerHandshake {
    config: GsiConfig,
    store: Arc<CredentialStore>,
    ca: Arc<dyn CaHashDirectory>,
    clock: Arc<dyn Clock>,
    /// Present only when a delegation client was configured.
    delegation: Option<ProxyDelegation>,
    state: ServerState,
    /// Fixed by the first message.
    variant: Option<ProtocolVariant>,
    version: u32,
    session: CryptoSession,
    skew: SkewGuard,
    /// The last challenge sent to the client.
    challenge: Option<Vec<u8>>,
    server_material: Option<String>,
    peer_chain: Option<CertificateChain>,
    peer_user: Option<String>,
    suite: Option<NegotiatedSuite>,
    delegated: Option<CertificateChain>,
}

impl ServerHandshake {
    pub fn builder() -> ServerHandshakeBuilder<Missing, Missing> {
        ServerHandshakeBuilder::new()
    }

    /// Processes one client request.
    pub fn handle(&mut self, request: &[u8]) -> Result<ServerReply> {
        match self.state {
            ServerState::Finished | ServerState::Failed => {
                return Err(ProtocolError::Terminated(self.state.describe()).into());
            }
            _ => {}
        }
        match self.step(request) {
            Ok(reply) => Ok(reply),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Like [`handle`](Self::handle), turning failures into an error reply.
    pub fn respond(&mut self, request: &[u8]) -> ServerReply {
        self.handle(request)
            .unwrap_or_else(|err| ServerReply::from_error(&err))
    }

    /// Abandons the handshake, releasing any outstanding proxy request.
    pub fn cancel(&mut self) {
        if let Some(delegation) = self.delegation.as_mut() {
            delegation.cancel();
        }
        if self.state != ServerState::Finished {
            self.state = ServerState::Failed;
        }
    }

    /// The token advertised in the login response.
    pub fn login_token(&self) -> SecurityToken {
        SecurityToken {
            protocol: self.config.protocol.clone(),
            version: self.config.version,
            crypto_mode: self.config.crypto_mode.clone(),
            ca_hashes: self.ca.known_hashes(),
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == ServerState::Finished
    }

    pub fn variant(&self) -> Option<ProtocolVariant> {
        self.variant
    }

    /// The authenticated client chain, once the `cert` step succeeded.
    pub fn peer_chain(&self) -> Option<&CertificateChain> {
        self.peer_chain.as_ref()
    }

    pub fn peer_subject(&self) -> Option<String> {
        self.peer_chain.as_ref().map(CertificateChain::subject)
    }

    /// The user name the client asked to be mapped to, if it sent one.
    pub fn peer_user(&self) -> Option<&str> {
        self.peer_user.as_deref()
    }

    pub fn negotiated_suite(&self) -> Option<&NegotiatedSuite> {
        self.suite.as_ref()
    }

    /// The proxy chain delegated by the client, if delegation took place.
    pub fn delegated_chain(&self) -> Option<&CertificateChain> {
        self.delegated.as_ref()
    }

    fn step(&mut self, request: &[u8]) -> Result<ServerReply> {
        let message = HandshakeStepData::parse(request)?;
        check_protocol(&self.config.protocol, message.protocol())?;
        self.skew
            .check(self.clock.now(), self.config.max_time_skew())?;

        let expected = self.expected_step();
        if expected != Some(message.step()) {
            return Err(ProtocolError::UnexpectedStep {
                step: message.step(),
                state: self.state.describe(),
            }
            .into());
        }
        self.check_variant(&message)?;
        debug!(
            step = step_name(message.step()),
            state = self.state.describe(),
            "server processing GSI step"
        );

        match self.state {
            ServerState::AwaitingCertReq => self.process_certreq(&message),
            ServerState::AwaitingCert => self.process_cert(&message),
            ServerState::AwaitingSigPxy => self.process_sigpxy(&message),
            ServerState::Finished | ServerState::Failed => {
                Err(ProtocolError::Terminated(self.state.describe()).into())
            }
        }
    }

    /// The client step accepted in the current state.
    fn expected_step(&self) -> Option<i32> {
        let index = self.state.step_index()?;
        let variant = self.variant.unwrap_or(ProtocolVariant::Legacy);
        variant.server_steps().get(index).copied()
    }

    /// Rejects a `version` bucket that would select another variant.
    fn check_variant(&self, message: &HandshakeStepData) -> Result<()> {
        if let (Some(variant), Some(peer)) = (self.variant, message.version()) {
            let (requested, _) = ProtocolVariant::negotiate(self.config.version, Some(peer));
            if requested != variant {
                return Err(ProtocolError::VariantSwitch(peer).into());
            }
        }
        Ok(())
    }

    fn current_variant(&self) -> Result<ProtocolVariant> {
        self.variant.ok_or_else(|| {
            ProtocolError::UnexpectedStep {
                step: 0,
                state: self.state.describe(),
            }
            .into()
        })
    }

    fn finish(&mut self) {
        self.state = ServerState::Finished;
        info!(
            subject = self.peer_subject().as_deref().unwrap_or("unknown"),
            delegated = self.delegated.is_some(),
            "GSI client authenticated"
        );
    }

    fn fail(&mut self, err: &GsiError) {
        warn!(error = %err, state = self.state.describe(), "GSI handshake failed");
        self.state = ServerState::Failed;
        if let Some(delegation) = self.delegation.as_mut() {
            delegation.cancel();
        }
    }
}
