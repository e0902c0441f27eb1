//! Certificates, keys and the store that keeps them fresh.

pub mod ca;
pub mod chain;
pub mod hash;
pub mod store;

pub use ca::{CaCertificateDirectory, CaHashDirectory, ChainValidator, StaticCaHashes};
pub use chain::{CertificateChain, Credential};
pub use hash::PrincipalHashCache;
pub use store::{CredentialConfig, CredentialStore, ProxyGenerator};
