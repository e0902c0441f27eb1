//! The cryptographic session engine.

pub mod asymmetric;
pub mod dh;
pub mod keys;
pub mod session;
pub mod suite;

pub use asymmetric::RsaSession;
pub use dh::DhSession;
pub use session::CryptoSession;
pub use suite::{CipherSpec, DigestAlgorithm, NegotiatedSuite};
