use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::bucket::BucketType;

/// An error raised while encoding or decoding bucket buffers.
///
/// 编码或解码 bucket 缓冲区时产生的错误。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BucketError {
    #[error("buffer truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("unknown bucket type code {0}")]
    UnknownType(i32),

    #[error("negative length {length} for bucket {kind:?}")]
    NegativeLength { kind: BucketType, length: i32 },

    /// The step code embedded in a nested bucket is not a handshake step.
    /// Callers use this to reinterpret the payload as opaque ciphertext.
    ///
    /// 嵌套 bucket 中的步骤码不属于握手步骤。调用方据此将负载视为不透明的密文。
    #[error("step code {0} is outside the handshake step range")]
    StepOutOfRange(i32),

    #[error("bucket {kind:?} carries {length} bytes, expected {expected}")]
    BadLength {
        kind: BucketType,
        length: usize,
        expected: usize,
    },

    #[error("bucket {0:?} is not valid ASCII text")]
    NotAscii(BucketType),

    #[error("protocol tag is not valid ASCII")]
    BadProtocolTag,

    #[error("{0} trailing bytes after the bucket terminator")]
    TrailingBytes(usize),
}

/// A failure inside the cryptographic session engine.
///
/// The message is meant for local logs only; peers receive a generic text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cryptographic failure: {message}")]
pub struct CryptoError {
    message: String,
}

impl CryptoError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<rsa::Error> for CryptoError {
    fn from(err: rsa::Error) -> Self {
        CryptoError::new(format!("rsa: {err}"))
    }
}

/// Errors from loading or validating certificates and keys.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed certificate data: {0}")]
    Certificate(String),

    #[error("malformed private key: {0}")]
    PrivateKey(String),

    #[error("no {0} configured")]
    NotConfigured(&'static str),

    #[error("certificate chain of length {0} is not a proxy chain")]
    NotAProxy(usize),

    #[error("certificate '{subject}' has expired")]
    Expired { subject: String },

    #[error("chain validation failed: {0}")]
    Validation(String),

    #[error("verification requested but no chain validator is configured")]
    NoValidator,

    #[error("proxy generation failed: {0}")]
    ProxyGeneration(String),
}

/// Errors from the proxy delegation sub-protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DelegationError {
    #[error("no delegation client configured")]
    NotConfigured,

    #[error("a proxy request is already outstanding")]
    AlreadyPending,

    #[error("no proxy request is outstanding")]
    NoPendingRequest,

    #[error("delegation client failed: {0}")]
    Client(String),

    #[error("proxy signing failed: {0}")]
    Signing(String),
}

/// Violations of the GSI message flow.
///
/// 违反 GSI 消息流程的错误。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("protocol mismatch: expected '{expected}', got '{found}'")]
    WrongProtocol { expected: String, found: String },

    #[error("unexpected step {step} while {state}")]
    UnexpectedStep { step: i32, state: &'static str },

    #[error("request expired: {elapsed:?} since the previous step exceeds {allowed:?}")]
    Expired { elapsed: Duration, allowed: Duration },

    #[error("unsupported {what}: '{value}'")]
    Unsupported { what: &'static str, value: String },

    #[error("missing {0:?} bucket")]
    MissingBucket(BucketType),

    #[error("bucket {0:?} has the wrong shape")]
    WrongShape(BucketType),

    #[error("none of the offered CA hashes is known: '{0}'")]
    UnknownCa(String),

    #[error("peer switched protocol variant mid-handshake (version {0})")]
    VariantSwitch(u32),

    #[error("main bucket must be encrypted once the session key is established")]
    CleartextMain,

    #[error("peer rejected the handshake ({code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("handshake already {0}")]
    Terminated(&'static str),

    #[error("malformed security token: {0}")]
    BadToken(String),
}

#[derive(Debug, Error)]
pub enum GsiError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Delegation(#[from] DelegationError),

    #[error("bucket codec: {0}")]
    Bucket(#[from] BucketError),
}

impl From<rsa::Error> for GsiError {
    fn from(err: rsa::Error) -> Self {
        GsiError::Crypto(err.into())
    }
}

pub type Result<T> = std::result::Result<T, GsiError>;
