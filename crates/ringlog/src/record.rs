//! Queue record layout and argument (de)serialization.
//!
//! A record written by the frontend is one contiguous byte span:
//!
//! ```text
//! [u32 frame_len][u64 timestamp][usize metadata_ptr][usize logger_ptr][usize decode_fn_ptr]{payload}
//! ```
//!
//! `frame_len` covers everything after itself (header tail + payload).
//! `frame_len == PAD_SENTINEL` marks a wrap-to-start pad record consumed by
//! [`crate::queue::SpscQueue`] directly; `frame_len == 0` is corrupt framing.

use crate::metadata::MacroMetadata;
use crate::logger::Logger;

/// Sentinel frame length meaning "skip to the start of the buffer".
pub(crate) const PAD_SENTINEL: u32 = u32::MAX;

const PTR_SIZE: usize = std::mem::size_of::<usize>();
/// Bytes occupied by the header fields that follow `frame_len` (timestamp +
/// three pointers).
pub(crate) const HEADER_TAIL_LEN: usize = 8 + PTR_SIZE * 3;
/// Total header size including the leading `frame_len` field.
pub(crate) const HEADER_LEN: usize = 4 + HEADER_TAIL_LEN;

/// A decoded argument value, the type the formatter contract consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Char(char),
    Str(String),
}

impl std::fmt::Display for ArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgValue::I64(v) => write!(f, "{v}"),
            ArgValue::U64(v) => write!(f, "{v}"),
            ArgValue::F64(v) => write!(f, "{v}"),
            ArgValue::Bool(v) => write!(f, "{v}"),
            ArgValue::Char(v) => write!(f, "{v}"),
            ArgValue::Str(v) => write!(f, "{v}"),
        }
    }
}

/// Per-argument wire encoding.
///
/// Trivially-copyable scalars are memcpy'd (here: little-endian byte
/// copies); strings are length-prefixed and copied in full. Implemented for
/// the scalar types and string-like types the frontend accepts; user types
/// must be reduced to one of these by the caller.
pub trait Encode {
    /// Bytes this value occupies on the wire.
    fn encoded_len(&self) -> usize;
    /// Appends this value's wire encoding to `buf`.
    fn encode_into(&self, buf: &mut Vec<u8>);
    /// Decodes one value from the front of `buf`, returning it and the
    /// unconsumed remainder.
    fn decode_from(buf: &[u8]) -> (ArgValue, &[u8]);
}

macro_rules! impl_encode_int {
    ($t:ty, $variant:ident, $conv:ty) => {
        impl Encode for $t {
            fn encoded_len(&self) -> usize {
                std::mem::size_of::<$t>()
            }
            fn encode_into(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }
            fn decode_from(buf: &[u8]) -> (ArgValue, &[u8]) {
                let n = std::mem::size_of::<$t>();
                let mut bytes = [0u8; std::mem::size_of::<$t>()];
                bytes.copy_from_slice(&buf[..n]);
                (ArgValue::$variant(<$t>::from_le_bytes(bytes) as $conv), &buf[n..])
            }
        }
    };
}

impl_encode_int!(i8, I64, i64);
impl_encode_int!(i16, I64, i64);
impl_encode_int!(i32, I64, i64);
impl_encode_int!(i64, I64, i64);
impl_encode_int!(u8, U64, u64);
impl_encode_int!(u16, U64, u64);
impl_encode_int!(u32, U64, u64);
impl_encode_int!(u64, U64, u64);
impl_encode_int!(f32, F64, f64);
impl_encode_int!(f64, F64, f64);

impl Encode for bool {
    fn encoded_len(&self) -> usize {
        1
    }
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(u8::from(*self));
    }
    fn decode_from(buf: &[u8]) -> (ArgValue, &[u8]) {
        (ArgValue::Bool(buf[0] != 0), &buf[1..])
    }
}

impl Encode for char {
    fn encoded_len(&self) -> usize {
        4
    }
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(*self as u32).to_le_bytes());
    }
    fn decode_from(buf: &[u8]) -> (ArgValue, &[u8]) {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&buf[..4]);
        let c = char::from_u32(u32::from_le_bytes(bytes)).unwrap_or('\u{FFFD}');
        (ArgValue::Char(c), &buf[4..])
    }
}

impl Encode for &str {
    fn encoded_len(&self) -> usize {
        4 + self.len()
    }
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.as_bytes());
    }
    fn decode_from(buf: &[u8]) -> (ArgValue, &[u8]) {
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&buf[..4]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        let s = String::from_utf8_lossy(&buf[4..4 + len]).into_owned();
        (ArgValue::Str(s), &buf[4 + len..])
    }
}

impl Encode for String {
    fn encoded_len(&self) -> usize {
        self.as_str().encoded_len()
    }
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.as_str().encode_into(buf)
    }
    fn decode_from(buf: &[u8]) -> (ArgValue, &[u8]) {
        <&str as Encode>::decode_from(buf)
    }
}

/// An argument list known at a call site, encodable/decodable as a unit.
///
/// The frontend's decoder function pointer is a monomorphized instance of
/// [`decode_dispatch`] for a concrete `ArgTuple` impl, built from ordinary
/// generics instead of a proc-macro.
pub trait ArgTuple {
    fn total_len(&self) -> usize;
    fn encode_into(&self, buf: &mut Vec<u8>);
    fn decode_into(buf: &[u8]) -> Vec<ArgValue>;
}

impl ArgTuple for () {
    fn total_len(&self) -> usize {
        0
    }
    fn encode_into(&self, _buf: &mut Vec<u8>) {}
    fn decode_into(_buf: &[u8]) -> Vec<ArgValue> {
        Vec::new()
    }
}

macro_rules! impl_arg_tuple {
    ($($t:ident : $idx:tt),+) => {
        impl<$($t: Encode),+> ArgTuple for ($($t,)+) {
            fn total_len(&self) -> usize {
                0 $(+ self.$idx.encoded_len())+
            }
            fn encode_into(&self, buf: &mut Vec<u8>) {
                $(self.$idx.encode_into(buf);)+
            }
            fn decode_into(buf: &[u8]) -> Vec<ArgValue> {
                let mut rest = buf;
                let mut out = Vec::new();
                $(
                    let (value, remainder) = $t::decode_from(rest);
                    out.push(value);
                    rest = remainder;
                )+
                out
            }
        }
    };
}

impl_arg_tuple!(A0: 0);
impl_arg_tuple!(A0: 0, A1: 1);
impl_arg_tuple!(A0: 0, A1: 1, A2: 2);
impl_arg_tuple!(A0: 0, A1: 1, A2: 2, A3: 3);
impl_arg_tuple!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
impl_arg_tuple!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);

/// Decodes the payload of a queue record given its static argument-tuple
/// type. Monomorphized per call site and stored as a plain `fn` pointer in
/// the record header.
pub fn decode_dispatch<T: ArgTuple>(buf: &[u8]) -> Vec<ArgValue> {
    T::decode_into(buf)
}

pub(crate) type DecodeFn = fn(&[u8]) -> Vec<ArgValue>;

/// Fields decoded from a record's fixed header, before payload decoding.
pub(crate) struct RecordHeader {
    pub frame_len: u32,
    pub timestamp: u64,
    pub metadata: *const MacroMetadata,
    pub logger: *const Logger,
    pub decode_fn: DecodeFn,
}

/// Writes a record header into `buf[..HEADER_LEN]`. Caller guarantees `buf`
/// is at least `HEADER_LEN` bytes.
pub(crate) fn write_header(
    buf: &mut [u8],
    payload_len: usize,
    timestamp: u64,
    metadata: *const MacroMetadata,
    logger: *const Logger,
    decode_fn: DecodeFn,
) {
    let frame_len = (HEADER_TAIL_LEN + payload_len) as u32;
    buf[0..4].copy_from_slice(&frame_len.to_le_bytes());
    buf[4..12].copy_from_slice(&timestamp.to_le_bytes());
    let mut off = 12;
    buf[off..off + PTR_SIZE].copy_from_slice(&(metadata as usize).to_le_bytes());
    off += PTR_SIZE;
    buf[off..off + PTR_SIZE].copy_from_slice(&(logger as usize).to_le_bytes());
    off += PTR_SIZE;
    buf[off..off + PTR_SIZE].copy_from_slice(&(decode_fn as usize).to_le_bytes());
}

/// Reads the `frame_len` sentinel without decoding the rest of the header.
/// Used by the queue to detect pad records during consumption.
pub(crate) fn read_frame_len(buf: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[0..4]);
    u32::from_le_bytes(bytes)
}

/// Reads a full header out of `buf`. `buf` must be at least `HEADER_LEN`
/// bytes and must not be a pad record.
pub(crate) fn read_header(buf: &[u8]) -> RecordHeader {
    let frame_len = read_frame_len(buf);
    let mut ts_bytes = [0u8; 8];
    ts_bytes.copy_from_slice(&buf[4..12]);
    let timestamp = u64::from_le_bytes(ts_bytes);

    let mut off = 12;
    let metadata = read_ptr(buf, off) as *const MacroMetadata;
    off += PTR_SIZE;
    let logger = read_ptr(buf, off) as *const Logger;
    off += PTR_SIZE;
    let decode_fn_raw = read_ptr(buf, off);

    // Safety: decode_fn_raw was produced by `write_header` from a real `fn`
    // pointer of type `DecodeFn` cast to `usize`; transmuting it back is the
    // inverse of that cast.
    let decode_fn: DecodeFn = unsafe { std::mem::transmute(decode_fn_raw) };

    RecordHeader {
        frame_len,
        timestamp,
        metadata,
        logger,
        decode_fn,
    }
}

fn read_ptr(buf: &[u8], off: usize) -> usize {
    let mut bytes = [0u8; PTR_SIZE];
    bytes.copy_from_slice(&buf[off..off + PTR_SIZE]);
    usize::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalar_tuple() {
        let args: (i32, f64, bool) = (-7, 3.5, true);
        let mut buf = Vec::new();
        args.encode_into(&mut buf);
        assert_eq!(buf.len(), args.total_len());

        let decoded = <(i32, f64, bool) as ArgTuple>::decode_into(&buf);
        assert_eq!(
            decoded,
            vec![ArgValue::I64(-7), ArgValue::F64(3.5), ArgValue::Bool(true)]
        );
    }

    #[test]
    fn round_trips_string_arg() {
        let args: (&str,) = ("i=0",);
        let mut buf = Vec::new();
        args.encode_into(&mut buf);
        let decoded = <(&str,) as ArgTuple>::decode_into(&buf);
        assert_eq!(decoded, vec![ArgValue::Str("i=0".to_string())]);
    }

    #[test]
    fn empty_tuple_encodes_to_nothing() {
        let args: () = ();
        assert_eq!(args.total_len(), 0);
        let decoded = <() as ArgTuple>::decode_into(&[]);
        assert!(decoded.is_empty());
    }

    #[test]
    fn header_round_trips() {
        let mut buf = vec![0u8; HEADER_LEN + 4];
        let decode_fn: DecodeFn = decode_dispatch::<(i32,)>;
        write_header(&mut buf, 4, 123_456, std::ptr::null(), std::ptr::null(), decode_fn);
        let header = read_header(&buf);
        assert_eq!(header.timestamp, 123_456);
        assert_eq!(header.frame_len as usize, HEADER_TAIL_LEN + 4);
        assert_eq!(header.decode_fn as usize, decode_fn as usize);
    }
}
