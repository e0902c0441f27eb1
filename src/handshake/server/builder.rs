use std::sync::Arc;

use super::ServerHandshake;
use crate::clock::{Clock, SystemClock};
use crate::credential::{CaHashDirectory, CredentialStore};
use crate::crypto::CryptoSession;
use crate::delegation::{DelegationClient, ProxyDelegation};
use crate::error::Result;
use crate::handshake::exchange::SkewGuard;
use crate::handshake::{GsiConfig, Missing};
use crate::protocol::ServerState;

/// A builder for creating a `ServerHandshake`.
///
/// The credential store and the CA hash directory are required; `build` is
/// only available once both have been provided.
///
/// 用于创建 `ServerHandshake` 的构建器。
///
/// 凭据存储和 CA 哈希目录是必需的；只有两者都提供后才能调用 `build`。
pub struct ServerHandshakeBuilder<Store, Ca> {
    store: Store,
    ca: Ca,
    config: GsiConfig,
    clock: Option<Arc<dyn Clock>>,
    delegation_client: Option<Arc<dyn DelegationClient>>,
}

impl ServerHandshakeBuilder<Missing, Missing> {
    /// Creates a new `ServerHandshakeBuilder`.
    pub fn new() -> Self {
        Self {
            store: Missing,
            ca: Missing,
            config: GsiConfig::default(),
            clock: None,
            delegation_client: None,
        }
    }
}

impl Default for ServerHandshakeBuilder<Missing, Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, C> ServerHandshakeBuilder<S, C> {
    /// Sets the store providing the host credential.
    ///
    /// 设置提供主机凭据的存储。
    pub fn credentials(self, store: Arc<CredentialStore>) -> ServerHandshakeBuilder<Arc<CredentialStore>, C> {
        ServerHandshakeBuilder {
            store,
            ca: self.ca,
            config: self.config,
            clock: self.clock,
            delegation_client: self.delegation_client,
        }
    }

    /// Sets the CA hashes the server accepts in `certreq`.
    ///
    /// 设置服务器在 `certreq` 中接受的 CA 哈希。
    pub fn ca_hashes(
        self,
        ca: Arc<dyn CaHashDirectory>,
    ) -> ServerHandshakeBuilder<S, Arc<dyn CaHashDirectory>> {
        ServerHandshakeBuilder {
            store: self.store,
            ca,
            config: self.config,
            clock: self.clock,
            delegation_client: self.delegation_client,
        }
    }

    pub fn config(mut self, config: GsiConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enables proxy delegation through `client`.
    /// Without it the server never sends a proxy request.
    ///
    /// 通过 `client` 启用代理委托。未设置时服务器不会发送代理请求。
    pub fn delegation_client(mut self, client: Arc<dyn DelegationClient>) -> Self {
        self.delegation_client = Some(client);
        self
    }
}

impl ServerHandshakeBuilder<Arc<CredentialStore>, Arc<dyn CaHashDirectory>> {
    /// Builds the `ServerHandshake`.
    /// Fails if the configured protocol name does not fit the wire tag.
    ///
    /// 构建 `ServerHandshake`。协议名称超出线上标签长度时失败。
    pub fn build(self) -> Result<ServerHandshake> {
        self.config.validate()?;
        Ok(ServerHandshake {
            config: self.config,
            store: self.store,
            ca: self.ca,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
            delegation: self.delegation_client.map(ProxyDelegation::new),
            state: ServerState::AwaitingCertReq,
            variant: None,
            version: 0,
            session: CryptoSession::new(),
            skew: SkewGuard::default(),
            challenge: None,
            server_material: None,
            peer_chain: None,
            peer_user: None,
            suite: None,
            delegated: None,
        })
    }
}
