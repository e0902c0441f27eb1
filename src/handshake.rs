//! The GSI authentication state machines.
//!
//! [`ServerHandshake`] and [`ClientHandshake`] each own one handshake on one
//! connection. The transport feeds them raw request buffers and server
//! replies; they answer with the buffers to send next.
//!
//! GSI 认证状态机。每个实例只负责一条连接上的一次握手。

use std::time::Duration;

use serde::Deserialize;
use tracing::error;

use crate::error::{GsiError, ProtocolError};
use crate::protocol::bucket::PROTOCOL_TAG_LEN;
use crate::protocol::constants::{
    CIPHER_AES_128_CBC, CRYPTO_MODE_SSL, KXR_AUTHMORE, KXR_ERROR, KXR_INVALID_REQUEST,
    KXR_NOT_AUTHORIZED, KXR_OK, KXR_SERVER_ERROR, PROTOCOL_NAME, PROTOCOL_VERSION_DH_SIGNED,
    SUPPORTED_DIGESTS,
};

pub mod client;
mod exchange;
pub mod server;

pub use client::{ClientAction, ClientHandshake, ClientHandshakeBuilder};
pub use server::{ServerHandshake, ServerHandshakeBuilder};

/// Marker type for a missing field in the builders.
///
/// 用于在构建器中标记缺失字段的类型。
#[derive(Debug, Clone, Copy, Default)]
pub struct Missing;

/// Protocol parameters shared by both roles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GsiConfig {
    /// Protocol tag carried in every message.
    pub protocol: String,
    /// Highest protocol version this side speaks.
    pub version: u32,
    pub crypto_mode: String,
    /// Longest allowed gap between two inbound messages.
    pub max_time_skew_secs: u64,
    /// Cipher offered by the server; the IV length is added per variant.
    pub cipher: String,
    /// Colon-separated digest list.
    pub digests: String,
    /// Validate the peer chain with the credential store's validator.
    pub verify_peer: bool,
    /// Client: ask the server to delegate a proxy.
    pub request_delegation: bool,
    /// Client: sign proxy requests coming from the server.
    pub accept_proxy_requests: bool,
}

impl Default for GsiConfig {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION_DH_SIGNED,
            crypto_mode: CRYPTO_MODE_SSL.to_string(),
            max_time_skew_secs: 300,
            cipher: CIPHER_AES_128_CBC.to_string(),
            digests: SUPPORTED_DIGESTS.to_string(),
            verify_peer: true,
            request_delegation: false,
            accept_proxy_requests: false,
        }
    }
}

impl GsiConfig {
    pub fn max_time_skew(&self) -> Duration {
        Duration::from_secs(self.max_time_skew_secs)
    }

    /// The protocol name must fit the 4-byte ASCII tag of every message.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let name = self.protocol.as_str();
        if name.is_empty() || name.len() > PROTOCOL_TAG_LEN || !name.is_ascii() {
            return Err(ProtocolError::Unsupported {
                what: "protocol name",
                value: name.to_string(),
            });
        }
        Ok(())
    }
}

/// What the server sends back for one client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReply {
    /// `kXR_authmore` with the next message.
    More(Vec<u8>),
    /// `kXR_ok`: the client is authenticated.
    Ok,
    /// `kXR_error` with an xrootd error code.
    Error { code: i32, message: String },
}

impl ServerReply {
    /// The xrootd response status for this reply.
    pub fn status(&self) -> u16 {
        match self {
            ServerReply::More(_) => KXR_AUTHMORE,
            ServerReply::Ok => KXR_OK,
            ServerReply::Error { .. } => KXR_ERROR,
        }
    }

    /// Maps a handshake failure to the error reply sent to the peer.
    ///
    /// Cryptographic and credential failures are reported generically; their
    /// cause is logged locally only.
    pub fn from_error(err: &GsiError) -> Self {
        match err {
            GsiError::Protocol(_) | GsiError::Bucket(_) => ServerReply::Error {
                code: KXR_INVALID_REQUEST,
                message: err.to_string(),
            },
            GsiError::Crypto(_) | GsiError::Credential(_) => {
                error!(error = %err, "GSI authentication failed");
                ServerReply::Error {
                    code: KXR_NOT_AUTHORIZED,
                    message: "authentication failed".to_string(),
                }
            }
            GsiError::Delegation(_) => ServerReply::Error {
                code: KXR_SERVER_ERROR,
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CryptoError, DelegationError, ProtocolError};

    #[test]
    fn errors_map_to_xrootd_codes() {
        let protocol: GsiError = ProtocolError::CleartextMain.into();
        assert!(matches!(
            ServerReply::from_error(&protocol),
            ServerReply::Error { code: KXR_INVALID_REQUEST, .. }
        ));

        let crypto: GsiError = CryptoError::new("padding oracle detail").into();
        assert_eq!(
            ServerReply::from_error(&crypto),
            ServerReply::Error {
                code: KXR_NOT_AUTHORIZED,
                message: "authentication failed".into()
            }
        );

        let delegation: GsiError = DelegationError::NotConfigured.into();
        assert_eq!(ServerReply::from_error(&delegation).status(), KXR_ERROR);
        assert!(matches!(
            ServerReply::from_error(&delegation),
            ServerReply::Error { code: KXR_SERVER_ERROR, .. }
        ));
    }

    #[test]
    fn config_defaults_speak_the_current_version() {
        let config = GsiConfig::default();
        assert_eq!(config.protocol, "gsi");
        assert_eq!(config.version, PROTOCOL_VERSION_DH_SIGNED);
        assert_eq!(config.max_time_skew(), Duration::from_secs(300));
        assert!(!config.accept_proxy_requests);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn protocol_name_must_fit_the_wire_tag() {
        for name in ["", "gsi-x509", "gsï"] {
            let config = GsiConfig {
                protocol: name.to_string(),
                ..GsiConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ProtocolError::Unsupported { what: "protocol name", .. })
            ));
        }
    }
}
