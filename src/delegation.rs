//! Proxy delegation: the CSR sub-protocol run inside the handshake.
//!
//! On the server, [`ProxyDelegation`] asks a [`DelegationClient`] for a
//! certificate signing request, holds the single outstanding request and
//! later finalizes or cancels it. On the client, a [`ProxySigner`] signs the
//! request with the local proxy.
//!
//! 代理委托：在握手内部运行的 CSR 子协议。

use std::fmt::Debug;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::credential::{CertificateChain, Credential};
use crate::error::{DelegationError, Result};

/// What a delegation client returns for a new CSR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Opaque identifier the delegation client uses to find its key pair.
    pub session_id: String,
    pub csr_pem: String,
}

/// An outstanding CSR and the client chain it will extend.
#[derive(Debug, Clone)]
pub struct ProxyRequestRecord {
    request: PendingRequest,
    client_chain: CertificateChain,
}

impl ProxyRequestRecord {
    pub fn session_id(&self) -> &str {
        &self.request.session_id
    }

    pub fn csr_pem(&self) -> &str {
        &self.request.csr_pem
    }

    pub fn client_chain(&self) -> &CertificateChain {
        &self.client_chain
    }
}

/// The external service that owns delegated key pairs.
///
/// 持有委托密钥对的外部服务。
pub trait DelegationClient: Debug + Send + Sync {
    /// Generates a key pair and returns a CSR for a proxy of `chain`.
    fn request_csr(&self, chain: &CertificateChain) -> std::result::Result<PendingRequest, DelegationError>;

    /// Stores the completed proxy chain (signed proxy first).
    fn finalize(
        &self,
        request: &ProxyRequestRecord,
        chain: &CertificateChain,
    ) -> std::result::Result<(), DelegationError>;

    /// Releases whatever the request holds.
    fn cancel(&self, request: &ProxyRequestRecord) -> std::result::Result<(), DelegationError>;
}

/// Signs a proxy CSR received from the server with the local proxy.
pub trait ProxySigner: Debug + Send + Sync {
    /// Returns the signed certificate as PEM.
    fn sign(&self, csr_pem: &str, proxy: &Credential) -> std::result::Result<String, DelegationError>;
}

/// Server-side coordinator holding at most one outstanding request.
#[derive(Debug)]
pub struct ProxyDelegation {
    client: Arc<dyn DelegationClient>,
    pending: Option<ProxyRequestRecord>,
}

impl ProxyDelegation {
    pub fn new(client: Arc<dyn DelegationClient>) -> Self {
        Self {
            client,
            pending: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&ProxyRequestRecord> {
        self.pending.as_ref()
    }

    /// Requests a CSR for `chain` and records it as outstanding.
    pub fn request(&mut self, chain: &CertificateChain) -> Result<&ProxyRequestRecord> {
        if self.pending.is_some() {
            return Err(DelegationError::AlreadyPending.into());
        }
        let request = self.client.request_csr(chain)?;
        debug!(session = %request.session_id, subject = %chain.subject(), "requested proxy CSR");
        Ok(self.pending.insert(ProxyRequestRecord {
            request,
            client_chain: chain.clone(),
        }))
    }

    /// Completes the outstanding request with the certificate the client signed.
    ///
    /// The returned chain is the signed proxy followed by the stored client
    /// chain. The request is consumed whether or not this succeeds; on failure
    /// the delegation client is told to release it.
    pub fn finalize(&mut self, signed_cert_pem: &str) -> Result<CertificateChain> {
        let record = self
            .pending
            .take()
            .ok_or(DelegationError::NoPendingRequest)?;

        let chain = match CertificateChain::from_pem(signed_cert_pem) {
            Ok(signed) => record.client_chain.extended_by(&signed),
            Err(err) => {
                self.notify_cancel(&record);
                return Err(err.into());
            }
        };
        if let Err(err) = self.client.finalize(&record, &chain) {
            self.notify_cancel(&record);
            return Err(err.into());
        }
        debug!(session = %record.session_id(), subject = %chain.subject(), "finalized delegated proxy");
        Ok(chain)
    }

    /// Drops the outstanding request, if any, and tells the delegation client.
    pub fn cancel(&mut self) {
        if let Some(record) = self.pending.take() {
            self.notify_cancel(&record);
        }
    }

    fn notify_cancel(&self, record: &ProxyRequestRecord) {
        if let Err(err) = self.client.cancel(record) {
            warn!(session = %record.session_id(), error = %err, "failed to cancel proxy request");
        }
    }
}
