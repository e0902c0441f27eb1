//! Implements the client side of the GSI handshake.
//! 实现 GSI 握手的客户端。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::credential::{CaHashDirectory, CertificateChain, Credential, CredentialStore};
use crate::crypto::{CryptoSession, NegotiatedSuite};
use crate::delegation::ProxySigner;
use crate::error::{GsiError, ProtocolError, Result};
use crate::protocol::constants::{step_name, KXR_OK, SERVER_CERT, SERVER_PXYREQ};
use crate::protocol::{ClientState, HandshakeStepData, ProtocolVariant};

use super::exchange::{check_protocol, SkewGuard};
use super::{GsiConfig, Missing, ServerReply};

mod builder;
mod state_cert;
mod state_pxyreq;
mod state_start;

pub use builder::ClientHandshakeBuilder;

/// What the client does after a server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Send these bytes as the next authentication request.
    Send(Vec<u8>),
    /// The server accepted us; nothing more to send.
    Done,
}

/// The client-side handshake state machine for one connection.
///
/// 单条连接的客户端握手状态机。
#[derive(Debug)]
pub struct ClientHandshake {
    config: GsiConfig,
    store: Arc<CredentialStore>,
    ca: Arc<dyn CaHashDirectory>,
    clock: Arc<dyn Clock>,
    signer: Option<Arc<dyn ProxySigner>>,
    user: Option<String>,
    state: ClientState,
    variant: Option<ProtocolVariant>,
    session: CryptoSession,
    skew: SkewGuard,
    /// The last challenge sent to the server.
    challenge: Option<Vec<u8>>,
    server_material: Option<String>,
    client_material: Option<String>,
    proxy: Option<Arc<Credential>>,
    server_chain: Option<CertificateChain>,
    suite: Option<NegotiatedSuite>,
}

impl ClientHandshake {
    pub fn builder() -> ClientHandshakeBuilder<Missing, Missing> {
        ClientHandshakeBuilder::new()
    }

    /// Builds the opening `certreq` message.
    pub fn start(&mut self) -> Result<Vec<u8>> {
        if self.state != ClientState::Start {
            return Err(ProtocolError::Terminated(self.state.describe()).into());
        }
        match self.build_certreq() {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Consumes one server reply and says what to do next.
    pub fn process(&mut self, reply: &ServerReply) -> Result<ClientAction> {
        match self.state {
            ClientState::Finished | ClientState::Failed => {
                return Err(ProtocolError::Terminated(self.state.describe()).into());
            }
            _ => {}
        }
        match self.step(reply) {
            Ok(action) => Ok(action),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == ClientState::Finished
    }

    pub fn variant(&self) -> Option<ProtocolVariant> {
        self.variant
    }

    /// The authenticated server chain.
    pub fn server_chain(&self) -> Option<&CertificateChain> {
        self.server_chain.as_ref()
    }

    pub fn server_subject(&self) -> Option<String> {
        self.server_chain.as_ref().map(CertificateChain::subject)
    }

    pub fn negotiated_suite(&self) -> Option<&NegotiatedSuite> {
        self.suite.as_ref()
    }

    fn step(&mut self, reply: &ServerReply) -> Result<ClientAction> {
        let bytes = match reply {
            ServerReply::Error { code, message } => {
                return Err(ProtocolError::Rejected {
                    code: *code,
                    message: message.clone(),
                }
                .into());
            }
            ServerReply::Ok => return self.accept(),
            ServerReply::More(bytes) => bytes,
        };

        let message = HandshakeStepData::parse(bytes)?;
        check_protocol(&self.config.protocol, message.protocol())?;
        self.skew
            .check(self.clock.now(), self.config.max_time_skew())?;
        if let (Some(variant), Some(peer)) = (self.variant, message.version()) {
            if ProtocolVariant::negotiate(self.config.version, Some(peer)).0 != variant {
                return Err(ProtocolError::VariantSwitch(peer).into());
            }
        }
        debug!(
            step = step_name(message.step()),
            state = self.state.describe(),
            "client processing GSI step"
        );

        match (self.state, message.step()) {
            (ClientState::AwaitingCertResponse, SERVER_CERT) => self.process_server_cert(&message),
            (ClientState::AwaitingCertAck, SERVER_PXYREQ) => self.process_pxyreq(&message),
            (state, step) => Err(ProtocolError::UnexpectedStep {
                step,
                state: state.describe(),
            }
            .into()),
        }
    }

    /// Handles `kXR_ok`, which is only valid once our certificate was sent.
    fn accept(&mut self) -> Result<ClientAction> {
        match self.state {
            ClientState::AwaitingCertAck | ClientState::AwaitingPxyReqResponse => {
                self.state = ClientState::Finished;
                info!(
                    server = self.server_subject().as_deref().unwrap_or("unknown"),
                    "GSI server accepted our credentials"
                );
                Ok(ClientAction::Done)
            }
            state => Err(ProtocolError::UnexpectedStep {
                step: i32::from(KXR_OK),
                state: state.describe(),
            }
            .into()),
        }
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

    fn fail(&mut self, err: &GsiError) {
        warn!(error = %err, state = self.state.describe(), "GSI handshake failed");
        self.state = ClientState::Failed;
    }
}
