//! States of the handshake state machines and the protocol variants.
//!
//! A variant is fixed once the peer's version is known; each variant carries
//! the ordered table of steps a server accepts.

use crate::protocol::constants::{
    CLIENT_CERT, CLIENT_CERTREQ, CLIENT_SIGPXY, DH_SIGNED_IV_LEN, PROTOCOL_VERSION_DH_SIGNED,
    PROTOCOL_VERSION_LEGACY,
};

/// The two wire-incompatible flavours of the GSI exchange.
///
/// GSI 交换的两种线上不兼容的变体。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// DH material unsigned, no IV, no seals, no delegation.
    Legacy,
    /// DH material RSA-signed, 16-byte IV, seals and proxy delegation.
    DhSigned,
}

const LEGACY_SERVER_STEPS: &[i32] = &[CLIENT_CERTREQ, CLIENT_CERT];
const DH_SIGNED_SERVER_STEPS: &[i32] = &[CLIENT_CERTREQ, CLIENT_CERT, CLIENT_SIGPXY];

impl ProtocolVariant {
    /// Selects the variant both peers can speak.
    ///
    /// A peer that does not advertise a version speaks the legacy protocol.
    pub fn negotiate(own_version: u32, peer_version: Option<u32>) -> (Self, u32) {
        let version = peer_version
            .unwrap_or(PROTOCOL_VERSION_LEGACY)
            .min(own_version);
        (Self::for_version(version), version)
    }

    pub fn for_version(version: u32) -> Self {
        if version >= PROTOCOL_VERSION_DH_SIGNED {
            ProtocolVariant::DhSigned
        } else {
            ProtocolVariant::Legacy
        }
    }

    /// Client steps the server accepts, in order.
    pub fn server_steps(self) -> &'static [i32] {
        match self {
            ProtocolVariant::Legacy => LEGACY_SERVER_STEPS,
            ProtocolVariant::DhSigned => DH_SIGNED_SERVER_STEPS,
        }
    }

    pub fn signs_dh_material(self) -> bool {
        self == ProtocolVariant::DhSigned
    }

    pub fn uses_seals(self) -> bool {
        self == ProtocolVariant::DhSigned
    }

    pub fn supports_delegation(self) -> bool {
        self == ProtocolVariant::DhSigned
    }

    pub fn iv_len(self) -> usize {
        match self {
            ProtocolVariant::Legacy => 0,
            ProtocolVariant::DhSigned => DH_SIGNED_IV_LEN,
        }
    }
}

/// Server side states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    AwaitingCertReq,
    AwaitingCert,
    AwaitingSigPxy,
    Finished,
    Failed,
}

impl ServerState {
    /// Position in the variant's step table, for states that accept input.
    pub fn step_index(self) -> Option<usize> {
        match self {
            ServerState::AwaitingCertReq => Some(0),
            ServerState::AwaitingCert => Some(1),
            ServerState::AwaitingSigPxy => Some(2),
            ServerState::Finished | ServerState::Failed => None,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ServerState::AwaitingCertReq => "awaiting certreq",
            ServerState::AwaitingCert => "awaiting cert",
            ServerState::AwaitingSigPxy => "awaiting sigpxy",
            ServerState::Finished => "finished",
            ServerState::Failed => "failed",
        }
    }
}

/// Client side states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Start,
    /// `certreq` sent, waiting for the server certificate.
    AwaitingCertResponse,
    /// `cert` sent, waiting for `ok` or a proxy request.
    AwaitingCertAck,
    /// `sigpxy` sent, waiting for the final `ok`.
    AwaitingPxyReqResponse,
    Finished,
    Failed,
}

impl ClientState {
    pub fn describe(self) -> &'static str {
        match self {
            ClientState::Start => "not started",
            ClientState::AwaitingCertResponse => "awaiting server certificate",
            ClientState::AwaitingCertAck => "awaiting certificate acknowledgement",
            ClientState::AwaitingPxyReqResponse => "awaiting proxy acknowledgement",
            ClientState::Finished => "finished",
            ClientState::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_follows_the_lower_version() {
        assert_eq!(
            ProtocolVariant::negotiate(PROTOCOL_VERSION_DH_SIGNED, Some(PROTOCOL_VERSION_LEGACY)).0,
            ProtocolVariant::Legacy
        );
        assert_eq!(
            ProtocolVariant::negotiate(PROTOCOL_VERSION_LEGACY, Some(PROTOCOL_VERSION_DH_SIGNED)).0,
            ProtocolVariant::Legacy
        );
        assert_eq!(
            ProtocolVariant::negotiate(PROTOCOL_VERSION_DH_SIGNED, Some(10500)),
            (ProtocolVariant::DhSigned, PROTOCOL_VERSION_DH_SIGNED)
        );
        assert_eq!(
            ProtocolVariant::negotiate(PROTOCOL_VERSION_DH_SIGNED, None),
            (ProtocolVariant::Legacy, PROTOCOL_VERSION_LEGACY)
        );
    }

    #[test]
    fn only_the_dh_signed_variant_accepts_sigpxy() {
        assert!(!ProtocolVariant::Legacy.server_steps().contains(&CLIENT_SIGPXY));
        assert_eq!(ProtocolVariant::DhSigned.server_steps()[2], CLIENT_SIGPXY);
    }
}
