//! GSI mutual authentication for the xrootd protocol.
//! xrootd 协议的 GSI 双向认证。

pub mod clock;
pub mod credential;
pub mod crypto;
pub mod delegation;
pub mod error;
pub mod handshake;
pub mod protocol;

pub use error::{GsiError, Result};
pub use handshake::{ClientAction, ClientHandshake, GsiConfig, ServerHandshake, ServerReply};
