//! The GSI bucket codec.
//!
//! Every handshake field travels as a bucket: a big-endian `i32` type code, an
//! `i32` length and the payload. A sequence of buckets is closed by the `none`
//! type code written on its own. The `main` bucket nests a complete
//! `(protocol, step, sequence)` triple in its payload.
//!
//! GSI bucket 编解码器。每个握手字段都以 bucket 形式传输：类型码、长度和负载。

use std::collections::BTreeMap;

use crate::error::BucketError;
use crate::protocol::constants::is_handshake_step;

/// Size of a type code or a length prefix on the wire.
const INT_LEN: usize = 4;

/// Size of the zero-padded protocol tag.
pub const PROTOCOL_TAG_LEN: usize = 4;

/// The closed set of bucket type codes.
///
/// Codes from `CryptoMode` onwards are consecutive starting at 3000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum BucketType {
    None = 0,
    Inactive = 1,
    CryptoMode = 3000,
    Main,
    SrvSeal,
    ClntSeal,
    Puk,
    Cipher,
    Rtag,
    SignedRtag,
    User,
    Host,
    Creds,
    Message,
    SrvId,
    SessionId,
    Version,
    Status,
    LocalStatus,
    OtherCreds,
    CacheIdx,
    ClntOpts,
    ErrorCode,
    Timestamp,
    X509,
    IssuerHash,
    X509Req,
    CipherAlg,
    MdAlg,
    AfsInfo,
    Reserved,
}

/// How the payload of a bucket type is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketShape {
    Raw,
    Str,
    UnsignedInt,
    Nested,
}

const TYPES: [BucketType; 31] = [
    BucketType::None,
    BucketType::Inactive,
    BucketType::CryptoMode,
    BucketType::Main,
    BucketType::SrvSeal,
    BucketType::ClntSeal,
    BucketType::Puk,
    BucketType::Cipher,
    BucketType::Rtag,
    BucketType::SignedRtag,
    BucketType::User,
    BucketType::Host,
    BucketType::Creds,
    BucketType::Message,
    BucketType::SrvId,
    BucketType::SessionId,
    BucketType::Version,
    BucketType::Status,
    BucketType::LocalStatus,
    BucketType::OtherCreds,
    BucketType::CacheIdx,
    BucketType::ClntOpts,
    BucketType::ErrorCode,
    BucketType::Timestamp,
    BucketType::X509,
    BucketType::IssuerHash,
    BucketType::X509Req,
    BucketType::CipherAlg,
    BucketType::MdAlg,
    BucketType::AfsInfo,
    BucketType::Reserved,
];

impl BucketType {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Result<Self, BucketError> {
        TYPES
            .iter()
            .copied()
            .find(|kind| kind.code() == code)
            .ok_or(BucketError::UnknownType(code))
    }

    pub fn shape(self) -> BucketShape {
        use BucketType::*;
        match self {
            Main => BucketShape::Nested,
            Version | Status | LocalStatus | CacheIdx | ClntOpts | ErrorCode | Timestamp => {
                BucketShape::UnsignedInt
            }
            CryptoMode | User | Host | Message | SrvId | SessionId | X509 | IssuerHash
            | X509Req | CipherAlg | MdAlg => BucketShape::Str,
            _ => BucketShape::Raw,
        }
    }
}

/// A single tagged value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bucket {
    Raw(BucketType, Vec<u8>),
    Str(BucketType, String),
    UInt(BucketType, u32),
    Nested(NestedBucket),
}

impl Bucket {
    pub fn kind(&self) -> BucketType {
        match self {
            Bucket::Raw(kind, _) | Bucket::Str(kind, _) | Bucket::UInt(kind, _) => *kind,
            Bucket::Nested(nested) => nested.kind,
        }
    }

    /// Number of bytes `serialize_into` writes for this bucket.
    pub fn wire_size(&self) -> usize {
        INT_LEN
            + INT_LEN
            + match self {
                Bucket::Raw(_, data) => data.len(),
                Bucket::Str(_, text) => text.len(),
                Bucket::UInt(..) => INT_LEN,
                Bucket::Nested(nested) => nested.payload_size(),
            }
    }

    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        let start = out.len();
        write_i32(out, self.kind().code());
        match self {
            Bucket::Raw(_, data) => {
                write_len(out, data.len());
                out.extend_from_slice(data);
            }
            Bucket::Str(_, text) => {
                write_len(out, text.len());
                out.extend_from_slice(text.as_bytes());
            }
            Bucket::UInt(_, value) => {
                write_len(out, INT_LEN);
                out.extend_from_slice(&value.to_be_bytes());
            }
            Bucket::Nested(nested) => {
                write_len(out, nested.payload_size());
                nested.serialize_payload(out);
            }
        }
        debug_assert_eq!(out.len() - start, self.wire_size());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_size());
        self.serialize_into(&mut out);
        out
    }

    /// Decodes the payload of a bucket of the given type.
    ///
    /// A `main` payload is first tried as a nested bucket; if its step code is
    /// not a handshake step the payload is kept as raw (encrypted) bytes.
    pub fn deserialize(kind: BucketType, payload: &[u8]) -> Result<Bucket, BucketError> {
        match kind.shape() {
            BucketShape::Raw => Ok(Bucket::Raw(kind, payload.to_vec())),
            BucketShape::Str => {
                if !payload.is_ascii() {
                    return Err(BucketError::NotAscii(kind));
                }
                let text = String::from_utf8(payload.to_vec())
                    .map_err(|_| BucketError::NotAscii(kind))?;
                Ok(Bucket::Str(kind, text))
            }
            BucketShape::UnsignedInt => {
                let bytes: [u8; INT_LEN] =
                    payload.try_into().map_err(|_| BucketError::BadLength {
                        kind,
                        length: payload.len(),
                        expected: INT_LEN,
                    })?;
                Ok(Bucket::UInt(kind, u32::from_be_bytes(bytes)))
            }
            BucketShape::Nested => match NestedBucket::deserialize(kind, payload) {
                Ok(nested) => Ok(Bucket::Nested(nested)),
                Err(BucketError::StepOutOfRange(_)) => Ok(Bucket::Raw(kind, payload.to_vec())),
                Err(err) => Err(err),
            },
        }
    }
}

/// A bucket that embeds its own protocol tag, step code and child buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedBucket {
    kind: BucketType,
    protocol: String,
    step: i32,
    buckets: BucketMap,
}

impl NestedBucket {
    pub fn new(kind: BucketType, protocol: impl Into<String>, step: i32) -> Self {
        Self {
            kind,
            protocol: protocol.into(),
            step,
            buckets: BucketMap::new(),
        }
    }

    pub fn with(mut self, bucket: Bucket) -> Self {
        self.buckets.insert(bucket);
        self
    }

    pub fn kind(&self) -> BucketType {
        self.kind
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn buckets(&self) -> &BucketMap {
        &self.buckets
    }

    pub fn buckets_mut(&mut self) -> &mut BucketMap {
        &mut self.buckets
    }

    /// Size of the payload: protocol tag, step and the terminated child sequence.
    pub fn payload_size(&self) -> usize {
        PROTOCOL_TAG_LEN + INT_LEN + self.buckets.wire_size()
    }

    pub fn serialize_payload(&self, out: &mut Vec<u8>) {
        write_protocol_tag(out, &self.protocol);
        write_i32(out, self.step);
        self.buckets.serialize_into(out);
    }

    /// The payload alone, as it is fed to the session cipher.
    pub fn payload_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload_size());
        self.serialize_payload(&mut out);
        out
    }

    /// Parses a nested payload.
    ///
    /// Fails with [`BucketError::StepOutOfRange`] when the embedded step is not
    /// a handshake step, which is how ciphertext is told apart from plaintext.
    pub fn deserialize(kind: BucketType, payload: &[u8]) -> Result<NestedBucket, BucketError> {
        let mut cursor = payload;
        let mut tag = take(&mut cursor, PROTOCOL_TAG_LEN)?;
        let step = read_i32(&mut cursor)?;
        // The step is checked before the tag so that ciphertext never fails
        // on its first bytes.
        if !is_handshake_step(step) {
            return Err(BucketError::StepOutOfRange(step));
        }
        let protocol = read_protocol_tag(&mut tag)?;
        let buckets = deserialize_sequence(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(BucketError::TrailingBytes(cursor.len()));
        }
        Ok(NestedBucket {
            kind,
            protocol,
            step,
            buckets,
        })
    }
}

/// Buckets of one message keyed by type, iterated in type-code order.
///
/// Inserting a type that is already present replaces the earlier bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketMap {
    entries: BTreeMap<BucketType, Bucket>,
}

impl BucketMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bucket: Bucket) {
        self.entries.insert(bucket.kind(), bucket);
    }

    pub fn get(&self, kind: BucketType) -> Option<&Bucket> {
        self.entries.get(&kind)
    }

    pub fn remove(&mut self, kind: BucketType) -> Option<Bucket> {
        self.entries.remove(&kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.entries.values()
    }

    pub fn raw(&self, kind: BucketType) -> Option<&[u8]> {
        match self.get(kind)? {
            Bucket::Raw(_, data) => Some(data),
            Bucket::Str(_, text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    pub fn string(&self, kind: BucketType) -> Option<&str> {
        match self.get(kind)? {
            Bucket::Str(_, text) => Some(text),
            _ => None,
        }
    }

    pub fn uint(&self, kind: BucketType) -> Option<u32> {
        match self.get(kind)? {
            Bucket::UInt(_, value) => Some(*value),
            _ => None,
        }
    }

    /// Size of all buckets plus the terminating `none` code.
    pub fn wire_size(&self) -> usize {
        self.entries.values().map(Bucket::wire_size).sum::<usize>() + INT_LEN
    }

    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        for bucket in self.entries.values() {
            bucket.serialize_into(out);
        }
        write_i32(out, BucketType::None.code());
    }
}

/// Reads `(type, length, payload)` triples until the `none` terminator.
///
/// The cursor ends up just past the terminator.
pub fn deserialize_sequence(cursor: &mut &[u8]) -> Result<BucketMap, BucketError> {
    let mut map = BucketMap::new();
    loop {
        let code = read_i32(cursor)?;
        let kind = BucketType::from_code(code)?;
        if kind == BucketType::None {
            return Ok(map);
        }
        let length = read_i32(cursor)?;
        let length =
            usize::try_from(length).map_err(|_| BucketError::NegativeLength { kind, length })?;
        let payload = take(cursor, length)?;
        map.insert(Bucket::deserialize(kind, payload)?);
    }
}

pub(crate) fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    // Bucket payloads are bounded by xrootd request sizes, far below i32::MAX.
    write_i32(out, len as i32);
}

pub(crate) fn write_protocol_tag(out: &mut Vec<u8>, protocol: &str) {
    let mut tag = [0u8; PROTOCOL_TAG_LEN];
    for (slot, byte) in tag.iter_mut().zip(protocol.bytes()) {
        *slot = byte;
    }
    out.extend_from_slice(&tag);
}

pub(crate) fn read_protocol_tag(cursor: &mut &[u8]) -> Result<String, BucketError> {
    let raw = take(cursor, PROTOCOL_TAG_LEN)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let tag = &raw[..end];
    if !tag.is_ascii() {
        return Err(BucketError::BadProtocolTag);
    }
    String::from_utf8(tag.to_vec()).map_err(|_| BucketError::BadProtocolTag)
}

pub(crate) fn read_i32(cursor: &mut &[u8]) -> Result<i32, BucketError> {
    let bytes = take(cursor, INT_LEN)?;
    let mut buf = [0u8; INT_LEN];
    buf.copy_from_slice(bytes);
    Ok(i32::from_be_bytes(buf))
}

fn take<'a>(cursor: &mut &'a [u8], len: usize) -> Result<&'a [u8], BucketError> {
    if cursor.len() < len {
        return Err(BucketError::Truncated {
            needed: len,
            remaining: cursor.len(),
        });
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{CLIENT_CERTREQ, SERVER_CERT};

    fn round_trip(bucket: &Bucket) -> Bucket {
        let bytes = bucket.to_bytes();
        assert_eq!(bytes.len(), bucket.wire_size());
        let mut cursor = &bytes[..];
        let kind = BucketType::from_code(read_i32(&mut cursor).unwrap()).unwrap();
        let length = read_i32(&mut cursor).unwrap() as usize;
        assert_eq!(length, cursor.len());
        Bucket::deserialize(kind, cursor).unwrap()
    }

    #[test]
    fn every_shape_round_trips() {
        let buckets = [
            Bucket::Raw(BucketType::Rtag, vec![0, 1, 2, 250]),
            Bucket::Raw(BucketType::SignedRtag, Vec::new()),
            Bucket::Str(BucketType::CipherAlg, "aes-128-cbc#16".into()),
            Bucket::UInt(BucketType::Version, 10400),
            Bucket::Nested(
                NestedBucket::new(BucketType::Main, "gsi", CLIENT_CERTREQ)
                    .with(Bucket::Raw(BucketType::Rtag, b"challenge".to_vec())),
            ),
        ];
        for bucket in &buckets {
            assert_eq!(&round_trip(bucket), bucket);
        }
    }

    #[test]
    fn unsigned_int_is_big_endian_with_length_four() {
        let bytes = Bucket::UInt(BucketType::ClntOpts, 0x0102_0304).to_bytes();
        assert_eq!(
            bytes,
            [0, 0, 0x0B, 0xCB, 0, 0, 0, 4, 1, 2, 3, 4],
            "type 3019, length 4, value"
        );
    }

    #[test]
    fn nested_length_field_matches_payload() {
        let nested = NestedBucket::new(BucketType::Main, "gsi", SERVER_CERT)
            .with(Bucket::Raw(BucketType::Rtag, vec![7; 16]))
            .with(Bucket::Str(BucketType::X509, "-----BEGIN CERTIFICATE-----".into()))
            .with(Bucket::UInt(BucketType::ClntOpts, 1))
            .with(Bucket::Raw(BucketType::SignedRtag, vec![9; 128]));
        let bucket = Bucket::Nested(nested.clone());
        let bytes = bucket.to_bytes();

        let recorded = i32::from_be_bytes(bytes[4..8].try_into().unwrap()) as usize;
        assert_eq!(recorded, bytes.len() - 8);
        assert_eq!(recorded, nested.payload_size());

        let decoded = NestedBucket::deserialize(BucketType::Main, &bytes[8..]).unwrap();
        assert_eq!(decoded.protocol(), "gsi");
        assert_eq!(decoded.step(), SERVER_CERT);
        assert_eq!(decoded.buckets().len(), 4);
        assert_eq!(decoded, nested);
    }

    #[test]
    fn out_of_range_step_is_distinguishable() {
        let mut payload = Vec::new();
        write_protocol_tag(&mut payload, "gsi");
        write_i32(&mut payload, 0x5a5a_5a5a);
        payload.extend_from_slice(&[0xAB; 20]);

        assert_eq!(
            NestedBucket::deserialize(BucketType::Main, &payload),
            Err(BucketError::StepOutOfRange(0x5a5a_5a5a))
        );
        assert_eq!(
            Bucket::deserialize(BucketType::Main, &payload).unwrap(),
            Bucket::Raw(BucketType::Main, payload.clone())
        );

        let ciphertext = [0xF1, 0x80, 0x93, 0xC7, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        assert_eq!(
            Bucket::deserialize(BucketType::Main, &ciphertext).unwrap(),
            Bucket::Raw(BucketType::Main, ciphertext.to_vec())
        );
    }

    #[test]
    fn sequence_stops_at_terminator_and_advances_cursor() {
        let mut map = BucketMap::new();
        map.insert(Bucket::Str(BucketType::CryptoMode, "ssl".into()));
        map.insert(Bucket::UInt(BucketType::Version, 10300));
        let mut bytes = Vec::new();
        map.serialize_into(&mut bytes);
        assert_eq!(bytes.len(), map.wire_size());
        bytes.extend_from_slice(b"tail");

        let mut cursor = &bytes[..];
        let decoded = deserialize_sequence(&mut cursor).unwrap();
        assert_eq!(decoded, map);
        assert_eq!(cursor, b"tail");
    }

    #[test]
    fn duplicate_types_keep_the_last_value() {
        let mut bytes = Vec::new();
        Bucket::Raw(BucketType::Rtag, vec![1]).serialize_into(&mut bytes);
        Bucket::Raw(BucketType::Rtag, vec![2]).serialize_into(&mut bytes);
        write_i32(&mut bytes, 0);

        let decoded = deserialize_sequence(&mut &bytes[..]).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.raw(BucketType::Rtag), Some(&[2u8][..]));
    }

    #[test]
    fn malformed_input_is_rejected() {
        let missing_terminator = Bucket::Raw(BucketType::Rtag, vec![1, 2]).to_bytes();
        assert!(matches!(
            deserialize_sequence(&mut &missing_terminator[..]),
            Err(BucketError::Truncated { .. })
        ));

        let mut unknown = Vec::new();
        write_i32(&mut unknown, 4242);
        assert_eq!(
            deserialize_sequence(&mut &unknown[..]),
            Err(BucketError::UnknownType(4242))
        );

        assert_eq!(
            Bucket::deserialize(BucketType::User, &[0xC3, 0xA9]),
            Err(BucketError::NotAscii(BucketType::User))
        );
        assert!(matches!(
            Bucket::deserialize(BucketType::Version, &[1, 2]),
            Err(BucketError::BadLength { .. })
        ));
    }
}
