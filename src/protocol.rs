//! GSI wire format: buckets, step messages, constants and state definitions.

pub mod bucket;
pub mod constants;
pub mod message;
pub mod state;
pub mod token;

pub use bucket::{deserialize_sequence, Bucket, BucketMap, BucketShape, BucketType, NestedBucket};
pub use message::HandshakeStepData;
pub use state::{ClientState, ProtocolVariant, ServerState};
pub use token::SecurityToken;
