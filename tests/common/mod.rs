//! Shared fixtures and fakes for the integration tests.
//! 集成测试共享的测试数据与替身实现。

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use gsi_handshake::clock::Clock;
use gsi_handshake::credential::{
    CaHashDirectory, CertificateChain, ChainValidator, Credential, CredentialConfig,
    CredentialStore, ProxyGenerator, StaticCaHashes,
};
use gsi_handshake::delegation::{DelegationClient, PendingRequest, ProxyRequestRecord, ProxySigner};
use gsi_handshake::error::{CredentialError, DelegationError};

/// Hash of the test CA subject.
pub const CA_HASH: &str = "5c278efe";

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn read_fixture(name: &str) -> String {
    std::fs::read_to_string(fixture(name)).unwrap()
}

/// A clock the test moves by hand.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(SystemTime::now()),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug)]
pub struct AcceptAll;

impl ChainValidator for AcceptAll {
    fn validate(&self, _chain: &CertificateChain) -> Result<(), CredentialError> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct RejectAll;

impl ChainValidator for RejectAll {
    fn validate(&self, chain: &CertificateChain) -> Result<(), CredentialError> {
        Err(CredentialError::Validation(format!("{} is not trusted", chain.subject())))
    }
}

/// Hands out the fixture CSR and records what the handshake did with it.
#[derive(Debug, Default)]
pub struct RecordingDelegationClient {
    pub events: Mutex<Vec<String>>,
}

impl DelegationClient for RecordingDelegationClient {
    fn request_csr(&self, chain: &CertificateChain) -> Result<PendingRequest, DelegationError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("request {}", chain.len()));
        Ok(PendingRequest {
            session_id: "delegation-1".into(),
            csr_pem: read_fixture("delegated.csr"),
        })
    }

    fn finalize(&self, request: &ProxyRequestRecord, chain: &CertificateChain) -> Result<(), DelegationError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("finalize {} {}", request.session_id(), chain.len()));
        Ok(())
    }

    fn cancel(&self, request: &ProxyRequestRecord) -> Result<(), DelegationError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("cancel {}", request.session_id()));
        Ok(())
    }
}

/// Answers every CSR with the pre-signed fixture certificate.
#[derive(Debug, Default)]
pub struct FixtureSigner {
    pub signed: Mutex<Vec<String>>,
}

impl ProxySigner for FixtureSigner {
    fn sign(&self, csr_pem: &str, proxy: &Credential) -> Result<String, DelegationError> {
        if !csr_pem.contains("CERTIFICATE REQUEST") {
            return Err(DelegationError::Signing("not a CSR".into()));
        }
        self.signed.lock().unwrap().push(proxy.subject());
        Ok(read_fixture("delegatedcert.pem"))
    }
}

/// Returns the fixture proxy regardless of the user credential.
#[derive(Debug, Default)]
pub struct FixtureProxyGenerator {
    pub calls: Mutex<usize>,
}

impl ProxyGenerator for FixtureProxyGenerator {
    fn generate(&self, _user: &Credential, _lifetime: Duration) -> Result<Credential, CredentialError> {
        *self.calls.lock().unwrap() += 1;
        Credential::from_combined_pem(&read_fixture("x509up.pem"), SystemTime::now())
    }
}

pub fn known_cas() -> Arc<dyn CaHashDirectory> {
    Arc::new(StaticCaHashes::new([CA_HASH]))
}

pub fn host_config() -> CredentialConfig {
    CredentialConfig {
        host_cert: Some(fixture("hostcert.pem")),
        host_key: Some(fixture("hostkey.pem")),
        ..CredentialConfig::default()
    }
}

pub fn client_config() -> CredentialConfig {
    CredentialConfig {
        proxy_file: Some(fixture("x509up.pem")),
        ..CredentialConfig::default()
    }
}

pub fn host_store(clock: Arc<dyn Clock>) -> Arc<CredentialStore> {
    Arc::new(
        CredentialStore::new(host_config())
            .with_clock(clock)
            .with_validator(Arc::new(AcceptAll)),
    )
}

pub fn client_store(clock: Arc<dyn Clock>) -> Arc<CredentialStore> {
    Arc::new(
        CredentialStore::new(client_config())
            .with_clock(clock)
            .with_validator(Arc::new(AcceptAll)),
    )
}
