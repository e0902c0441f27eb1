//! The shared, lazily refreshed credential store.
//!
//! A store is created once per process (or per security domain) and shared by
//! every handshake through an `Arc`. Reads take a shared lock; a reload holds a
//! store-wide mutex so concurrent callers never reload the same credential
//! twice.
//!
//! 共享的、惰性刷新的凭据存储。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use serde::Deserialize;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::credential::ca::ChainValidator;
use crate::credential::chain::{CertificateChain, Credential};
use crate::credential::hash::{PrincipalHashCache, DEFAULT_HASH_CACHE_CAPACITY};
use crate::error::CredentialError;

/// Synthesizes a short-lived proxy from a user certificate and key.
///
/// The returned credential's chain must start with the new proxy certificate
/// followed by the user chain.
pub trait ProxyGenerator: std::fmt::Debug + Send + Sync {
    fn generate(&self, user: &Credential, lifetime: Duration) -> Result<Credential, CredentialError>;
}

/// File locations and refresh policy of a [`CredentialStore`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    pub host_cert: Option<PathBuf>,
    pub host_key: Option<PathBuf>,
    /// A ready-made proxy: certificates and key in one PEM file.
    pub proxy_file: Option<PathBuf>,
    pub user_cert: Option<PathBuf>,
    pub user_key: Option<PathBuf>,
    pub host_refresh_secs: u64,
    pub client_refresh_secs: u64,
    pub proxy_lifetime_secs: u64,
    pub verify_host: bool,
    pub verify_client: bool,
    pub hash_cache_capacity: usize,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            host_cert: None,
            host_key: None,
            proxy_file: None,
            user_cert: None,
            user_key: None,
            host_refresh_secs: 60 * 60,
            client_refresh_secs: 10 * 60,
            proxy_lifetime_secs: 12 * 60 * 60,
            verify_host: false,
            verify_client: false,
            hash_cache_capacity: DEFAULT_HASH_CACHE_CAPACITY,
        }
    }
}

impl CredentialConfig {
    pub fn host_refresh(&self) -> Duration {
        Duration::from_secs(self.host_refresh_secs)
    }

    pub fn client_refresh(&self) -> Duration {
        Duration::from_secs(self.client_refresh_secs)
    }

    pub fn proxy_lifetime(&self) -> Duration {
        Duration::from_secs(self.proxy_lifetime_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredentialKind {
    Host,
    Client,
}

impl CredentialKind {
    fn name(self) -> &'static str {
        match self {
            CredentialKind::Host => "host",
            CredentialKind::Client => "client",
        }
    }
}

type Slot = RwLock<Option<Arc<Credential>>>;

/// Loads and caches the host and client credentials.
///
/// 加载并缓存主机凭据和客户端凭据。
#[derive(Debug)]
pub struct CredentialStore {
    config: CredentialConfig,
    clock: Arc<dyn Clock>,
    validator: Option<Arc<dyn ChainValidator>>,
    proxy_generator: Option<Arc<dyn ProxyGenerator>>,
    host: Slot,
    client: Slot,
    reload: Mutex<()>,
    load_count: AtomicUsize,
    hashes: PrincipalHashCache,
}

impl CredentialStore {
    pub fn new(config: CredentialConfig) -> Self {
        let hashes = PrincipalHashCache::new(config.hash_cache_capacity);
        Self {
            config,
            clock: Arc::new(SystemClock),
            validator: None,
            proxy_generator: None,
            host: RwLock::new(None),
            client: RwLock::new(None),
            reload: Mutex::new(()),
            load_count: AtomicUsize::new(0),
            hashes,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ChainValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_proxy_generator(mut self, generator: Arc<dyn ProxyGenerator>) -> Self {
        self.proxy_generator = Some(generator);
        self
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    pub fn hashes(&self) -> &PrincipalHashCache {
        &self.hashes
    }

    /// Number of successful credential loads so far.
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    /// The server identity, reloaded when older than the host refresh interval.
    pub fn host_credential(&self) -> Result<Arc<Credential>, CredentialError> {
        self.current(CredentialKind::Host)
    }

    /// The client proxy, reloaded when older than the client refresh interval.
    pub fn client_proxy(&self) -> Result<Arc<Credential>, CredentialError> {
        self.current(CredentialKind::Client)
    }

    /// Validates a peer chain when `verify` is requested.
    pub fn validate_chain(&self, chain: &CertificateChain) -> Result<(), CredentialError> {
        self.validator
            .as_ref()
            .ok_or(CredentialError::NoValidator)?
            .validate(chain)
    }

    fn slot(&self, kind: CredentialKind) -> &Slot {
        match kind {
            CredentialKind::Host => &self.host,
            CredentialKind::Client => &self.client,
        }
    }

    fn refresh_interval(&self, kind: CredentialKind) -> Duration {
        match kind {
            CredentialKind::Host => self.config.host_refresh(),
            CredentialKind::Client => self.config.client_refresh(),
        }
    }

    fn cached(&self, kind: CredentialKind) -> Option<Arc<Credential>> {
        self.slot(kind)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fresh(&self, kind: CredentialKind) -> Option<Arc<Credential>> {
        let credential = self.cached(kind)?;
        let age = self
            .clock
            .now()
            .duration_since(credential.loaded_at())
            .unwrap_or(Duration::ZERO);
        (age <= self.refresh_interval(kind)).then_some(credential)
    }

    fn current(&self, kind: CredentialKind) -> Result<Arc<Credential>, CredentialError> {
        if let Some(credential) = self.fresh(kind) {
            return Ok(credential);
        }

        let _reload = self.reload.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have reloaded while we waited for the lock.
        if let Some(credential) = self.fresh(kind) {
            return Ok(credential);
        }

        match self.load(kind) {
            Ok(credential) => {
                let credential = Arc::new(credential);
                *self
                    .slot(kind)
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&credential));
                self.load_count.fetch_add(1, Ordering::SeqCst);
                info!(
                    kind = kind.name(),
                    subject = %credential.subject(),
                    "loaded credential"
                );
                Ok(credential)
            }
            Err(err) => match self.cached(kind) {
                Some(previous) => {
                    warn!(
                        kind = kind.name(),
                        error = %err,
                        "credential reload failed, keeping the previous credential"
                    );
                    Ok(previous)
                }
                None => Err(err),
            },
        }
    }

    fn load(&self, kind: CredentialKind) -> Result<Credential, CredentialError> {
        let now = self.clock.now();
        let credential = match kind {
            CredentialKind::Host => {
                let cert = required(&self.config.host_cert, "host certificate")?;
                let key = required(&self.config.host_key, "host key")?;
                Credential::from_pem(&read_file(cert)?, &read_file(key)?, now)?
            }
            CredentialKind::Client => self.load_client(now)?,
        };

        credential.chain().check_not_expired(now)?;
        let verify = match kind {
            CredentialKind::Host => self.config.verify_host,
            CredentialKind::Client => self.config.verify_client,
        };
        if verify {
            self.validate_chain(credential.chain())?;
        }
        Ok(credential)
    }

    fn load_client(&self, now: SystemTime) -> Result<Credential, CredentialError> {
        let proxy = match &self.config.proxy_file {
            Some(path) => Credential::from_combined_pem(&read_file(path)?, now)?,
            None => {
                let cert = required(&self.config.user_cert, "user certificate")?;
                let key = required(&self.config.user_key, "user key")?;
                let user = Credential::from_pem(&read_file(cert)?, &read_file(key)?, now)?;
                self.proxy_generator
                    .as_ref()
                    .ok_or(CredentialError::NotConfigured("proxy generator"))?
                    .generate(&user, self.config.proxy_lifetime())?
            }
        };
        if proxy.chain().len() < 2 {
            return Err(CredentialError::NotAProxy(proxy.chain().len()));
        }
        Ok(proxy)
    }
}

fn required<'a>(path: &'a Option<PathBuf>, what: &'static str) -> Result<&'a Path, CredentialError> {
    path.as_deref().ok_or(CredentialError::NotConfigured(what))
}

fn read_file(path: &Path) -> Result<String, CredentialError> {
    fs::read_to_string(path).map_err(|source| CredentialError::Io {
        path: path.to_path_buf(),
        source,
    })
}
