//! Wire constants shared by both handshake roles.

/// Name of the security protocol as advertised at login.
pub const PROTOCOL_NAME: &str = "gsi";

/// Crypto module expected in the `cryptomod` bucket.
pub const CRYPTO_MODE_SSL: &str = "ssl";

/// Last protocol version without signed DH material and delegation.
pub const PROTOCOL_VERSION_LEGACY: u32 = 10300;

/// First protocol version that signs DH material and supports proxy delegation.
pub const PROTOCOL_VERSION_DH_SIGNED: u32 = 10400;

// Client steps (messages sent by the client).
pub const CLIENT_CERTREQ: i32 = 1000;
pub const CLIENT_CERT: i32 = 1001;
pub const CLIENT_SIGPXY: i32 = 1002;

// Server steps (messages sent by the server).
pub const SERVER_INIT: i32 = 2000;
pub const SERVER_CERT: i32 = 2001;
pub const SERVER_PXYREQ: i32 = 2002;

/// Client option: the client is willing to sign a proxy request.
pub const OPTS_DELEGATE_PROXY: u32 = 0x0001;

/// Symmetric cipher offered by this implementation.
pub const CIPHER_AES_128_CBC: &str = "aes-128-cbc";

/// IV length carried in the cipher spec of the DH-signed variant.
pub const DH_SIGNED_IV_LEN: usize = 16;

/// Digests advertised in the `md_alg` bucket, in order of preference.
pub const SUPPORTED_DIGESTS: &str = "sha1:md5";

/// Separator used in cipher and digest lists.
pub const LIST_SEPARATOR: char = ':';

/// Separator used in CA hash lists.
pub const HASH_SEPARATOR: char = '|';

// xrootd response status and error codes.
pub const KXR_OK: u16 = 0;
pub const KXR_AUTHMORE: u16 = 4002;
pub const KXR_ERROR: u16 = 4003;
pub const KXR_INVALID_REQUEST: i32 = 3006;
pub const KXR_NOT_AUTHORIZED: i32 = 3010;
pub const KXR_SERVER_ERROR: i32 = 3012;

pub fn is_handshake_step(step: i32) -> bool {
    matches!(step, CLIENT_CERTREQ..=CLIENT_SIGPXY | SERVER_INIT..=SERVER_PXYREQ)
}

pub fn step_name(step: i32) -> &'static str {
    match step {
        CLIENT_CERTREQ => "kXGC_certreq",
        CLIENT_CERT => "kXGC_cert",
        CLIENT_SIGPXY => "kXGC_sigpxy",
        SERVER_INIT => "kXGS_init",
        SERVER_CERT => "kXGS_cert",
        SERVER_PXYREQ => "kXGS_pxyreq",
        _ => "unknown",
    }
}
