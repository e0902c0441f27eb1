use std::sync::Arc;

use super::ClientHandshake;
use crate::clock::{Clock, SystemClock};
use crate::credential::{CaHashDirectory, CredentialStore};
use crate::crypto::CryptoSession;
use crate::delegation::ProxySigner;
use crate::error::Result;
use crate::handshake::exchange::SkewGuard;
use crate::handshake::{GsiConfig, Missing};
use crate::protocol::{ClientState, SecurityToken};

/// A builder for creating a `ClientHandshake`.
///
/// 用于创建 `ClientHandshake` 的构建器。
pub struct ClientHandshakeBuilder<Store, Ca> {
    store: Store,
    ca: Ca,
    config: GsiConfig,
    clock: Option<Arc<dyn Clock>>,
    signer: Option<Arc<dyn ProxySigner>>,
    user: Option<String>,
}

impl ClientHandshakeBuilder<Missing, Missing> {
    /// Creates a new `ClientHandshakeBuilder`.
    pub fn new() -> Self {
        Self {
            store: Missing,
            ca: Missing,
            config: GsiConfig::default(),
            clock: None,
            signer: None,
            user: None,
        }
    }
}

impl Default for ClientHandshakeBuilder<Missing, Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, C> ClientHandshakeBuilder<S, C> {
    /// Sets the store providing the client proxy.
    ///
    /// 设置提供客户端代理凭据的存储。
    pub fn credentials(self, store: Arc<CredentialStore>) -> ClientHandshakeBuilder<Arc<CredentialStore>, C> {
        ClientHandshakeBuilder {
            store,
            ca: self.ca,
            config: self.config,
            clock: self.clock,
            signer: self.signer,
            user: self.user,
        }
    }

    /// Sets the CAs the client trusts; their hashes are offered in `certreq`.
    ///
    /// 设置客户端信任的 CA；其哈希在 `certreq` 中提供给服务器。
    pub fn ca_hashes(
        self,
        ca: Arc<dyn CaHashDirectory>,
    ) -> ClientHandshakeBuilder<S, Arc<dyn CaHashDirectory>> {
        ClientHandshakeBuilder {
            store: self.store,
            ca,
            config: self.config,
            clock: self.clock,
            signer: self.signer,
            user: self.user,
        }
    }

    pub fn config(mut self, config: GsiConfig) -> Self {
        self.config = config;
        self
    }

    /// Adopts the protocol parameters the server advertised at login.
    ///
    /// The version never rises above the one configured locally.
    pub fn security_token(mut self, token: &SecurityToken) -> Self {
        self.config.protocol = token.protocol.clone();
        self.config.version = self.config.version.min(token.version);
        if !token.crypto_mode.is_empty() {
            self.config.crypto_mode = token.crypto_mode.clone();
        }
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Signs proxy requests from the server. Only consulted when
    /// `accept_proxy_requests` is enabled in the config.
    ///
    /// 为服务器的代理请求签名。仅在配置启用 `accept_proxy_requests` 时使用。
    pub fn proxy_signer(mut self, signer: Arc<dyn ProxySigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Local user name sent with the certificate.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

impl ClientHandshakeBuilder<Arc<CredentialStore>, Arc<dyn CaHashDirectory>> {
    /// Builds the `ClientHandshake`.
    /// Fails if the configured protocol name does not fit the wire tag.
    ///
    /// 构建 `ClientHandshake`。协议名称超出线上标签长度时失败。
    pub fn build(self) -> Result<ClientHandshake> {
        self.config.validate()?;
        Ok(ClientHandshake {
            config: self.config,
            store: self.store,
            ca: self.ca,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
            signer: self.signer,
            user: self.user,
            state: ClientState::Start,
            variant: None,
            session: CryptoSession::new(),
            skew: SkewGuard::default(),
            challenge: None,
            server_material: None,
            client_material: None,
            proxy: None,
            server_chain: None,
            suite: None,
        })
    }
}
