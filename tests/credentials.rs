//! Integration tests for the shared credential store.
//! 共享凭据存储的集成测试。

mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use gsi_handshake::credential::{CertificateChain, CredentialConfig, CredentialStore};
use gsi_handshake::error::CredentialError;

use common::{
    client_config, fixture, host_config, read_fixture, FixtureProxyGenerator, ManualClock, RejectAll,
};

fn scratch_file(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gsi-store-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn concurrent_callers_share_one_load() {
    let clock = ManualClock::new();
    let store = Arc::new(CredentialStore::new(host_config()).with_clock(clock));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.host_credential().unwrap()
            })
        })
        .collect();
    let credentials: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(store.load_count(), 1);
    assert!(credentials.iter().all(|c| Arc::ptr_eq(c, &credentials[0])));
    assert!(credentials[0].subject().contains("CN=door.example.org"));
}

#[test]
fn stale_proxy_is_reloaded() {
    let clock = ManualClock::new();
    let store = CredentialStore::new(client_config()).with_clock(clock.clone());

    let first = store.client_proxy().unwrap();
    clock.advance(Duration::from_secs(60));
    assert!(Arc::ptr_eq(&first, &store.client_proxy().unwrap()));
    assert_eq!(store.load_count(), 1);

    clock.advance(Duration::from_secs(10 * 60));
    let second = store.client_proxy().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(store.load_count(), 2);
    assert_eq!(first.subject(), second.subject());
}

#[test]
fn failed_reload_keeps_previous_credential() {
    let clock = ManualClock::new();
    let path = scratch_file("x509up_keep", &read_fixture("x509up.pem"));
    let store = CredentialStore::new(CredentialConfig {
        proxy_file: Some(path.clone()),
        ..CredentialConfig::default()
    })
    .with_clock(clock.clone());

    let first = store.client_proxy().unwrap();
    fs::write(&path, "corrupted").unwrap();
    clock.advance(Duration::from_secs(11 * 60));

    let second = store.client_proxy().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(store.load_count(), 1);
    fs::remove_file(&path).unwrap();
}

#[test]
fn end_entity_certificate_is_not_a_proxy() {
    let combined = read_fixture("usercert.pem") + &read_fixture("userkey.pem");
    let path = scratch_file("x509up_leaf", &combined);
    let store = CredentialStore::new(CredentialConfig {
        proxy_file: Some(path.clone()),
        ..CredentialConfig::default()
    });

    assert!(matches!(store.client_proxy(), Err(CredentialError::NotAProxy(1))));
    fs::remove_file(&path).unwrap();
}

#[test]
fn user_credential_goes_through_the_proxy_generator() {
    let config = CredentialConfig {
        user_cert: Some(fixture("usercert.pem")),
        user_key: Some(fixture("userkey.pem")),
        ..CredentialConfig::default()
    };

    let without = CredentialStore::new(config.clone());
    assert!(matches!(
        without.client_proxy(),
        Err(CredentialError::NotConfigured("proxy generator"))
    ));

    let generator = Arc::new(FixtureProxyGenerator::default());
    let store = CredentialStore::new(config).with_proxy_generator(generator.clone());
    let proxy = store.client_proxy().unwrap();
    assert_eq!(proxy.chain().len(), 2);
    assert_eq!(*generator.calls.lock().unwrap(), 1);
}

#[test]
fn missing_configuration_is_reported() {
    let store = CredentialStore::new(CredentialConfig::default());
    assert!(matches!(
        store.host_credential(),
        Err(CredentialError::NotConfigured("host certificate"))
    ));

    let chain = CertificateChain::from_pem(&read_fixture("x509up.pem")).unwrap();
    assert!(matches!(store.validate_chain(&chain), Err(CredentialError::NoValidator)));
}

#[test]
fn host_verification_uses_the_validator() {
    let store = CredentialStore::new(CredentialConfig {
        verify_host: true,
        ..host_config()
    })
    .with_validator(Arc::new(RejectAll));

    assert!(matches!(store.host_credential(), Err(CredentialError::Validation(_))));
    assert_eq!(store.load_count(), 0);
}
