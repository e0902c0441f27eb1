use crate::error::{BucketError, ProtocolError, Result};
use crate::protocol::bucket::{
    deserialize_sequence, read_i32, read_protocol_tag, write_i32, write_protocol_tag, Bucket,
    BucketMap, BucketType, NestedBucket, PROTOCOL_TAG_LEN,
};

/// One handshake message: protocol tag, step code and its buckets.
///
/// Parsed fresh for every inbound message and also used to assemble
/// outbound ones.
///
/// 一条握手消息：协议标签、步骤码及其 bucket。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeStepData {
    protocol: String,
    step: i32,
    buckets: BucketMap,
}

impl HandshakeStepData {
    pub fn new(protocol: impl Into<String>, step: i32) -> Self {
        Self {
            protocol: protocol.into(),
            step,
            buckets: BucketMap::new(),
        }
    }

    pub fn with(mut self, bucket: Bucket) -> Self {
        self.buckets.insert(bucket);
        self
    }

    pub fn insert(&mut self, bucket: Bucket) {
        self.buckets.insert(bucket);
    }

    /// Parses a complete message buffer.
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, BucketError> {
        let mut cursor = bytes;
        let protocol = read_protocol_tag(&mut cursor)?;
        let step = read_i32(&mut cursor)?;
        let buckets = deserialize_sequence(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(BucketError::TrailingBytes(cursor.len()));
        }
        Ok(Self {
            protocol,
            step,
            buckets,
        })
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    /// The version advertised by the peer, if any.
    pub fn version(&self) -> Option<u32> {
        self.buckets.uint(BucketType::Version)
    }

    pub fn buckets(&self) -> &BucketMap {
        &self.buckets
    }

    pub fn wire_size(&self) -> usize {
        PROTOCOL_TAG_LEN + 4 + self.buckets.wire_size()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_size());
        write_protocol_tag(&mut out, &self.protocol);
        write_i32(&mut out, self.step);
        self.buckets.serialize_into(&mut out);
        debug_assert_eq!(out.len(), self.wire_size());
        out
    }

    pub fn require_raw(&self, kind: BucketType) -> Result<&[u8]> {
        require_raw(&self.buckets, kind)
    }

    pub fn require_string(&self, kind: BucketType) -> Result<&str> {
        require_string(&self.buckets, kind)
    }

    pub fn main(&self) -> Result<&Bucket> {
        self.buckets
            .get(BucketType::Main)
            .ok_or_else(|| ProtocolError::MissingBucket(BucketType::Main).into())
    }
}

pub fn require_raw(buckets: &BucketMap, kind: BucketType) -> Result<&[u8]> {
    match buckets.get(kind) {
        None => Err(ProtocolError::MissingBucket(kind).into()),
        Some(_) => buckets
            .raw(kind)
            .ok_or_else(|| ProtocolError::WrongShape(kind).into()),
    }
}

pub fn require_string(buckets: &BucketMap, kind: BucketType) -> Result<&str> {
    match buckets.get(kind) {
        None => Err(ProtocolError::MissingBucket(kind).into()),
        Some(_) => buckets
            .string(kind)
            .ok_or_else(|| ProtocolError::WrongShape(kind).into()),
    }
}

/// Reads a `main` bucket that must still be plaintext.
pub fn require_plain_main(main: &Bucket) -> Result<&NestedBucket> {
    match main {
        Bucket::Nested(nested) => Ok(nested),
        _ => Err(ProtocolError::WrongShape(BucketType::Main).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{CLIENT_CERTREQ, PROTOCOL_NAME};

    #[test]
    fn message_round_trip_recovers_header_and_version() {
        let message = HandshakeStepData::new(PROTOCOL_NAME, CLIENT_CERTREQ)
            .with(Bucket::UInt(BucketType::Version, 10400))
            .with(Bucket::Str(BucketType::CryptoMode, "ssl".into()))
            .with(Bucket::Nested(
                NestedBucket::new(BucketType::Main, PROTOCOL_NAME, CLIENT_CERTREQ)
                    .with(Bucket::Raw(BucketType::Rtag, vec![1; 8])),
            ));
        let bytes = message.to_bytes();
        assert_eq!(&bytes[..4], b"gsi\0");

        let parsed = HandshakeStepData::parse(&bytes).unwrap();
        assert_eq!(parsed, message);
        assert_eq!(parsed.version(), Some(10400));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = HandshakeStepData::new(PROTOCOL_NAME, CLIENT_CERTREQ).to_bytes();
        bytes.push(0);
        assert_eq!(
            HandshakeStepData::parse(&bytes),
            Err(BucketError::TrailingBytes(1))
        );
    }
}
