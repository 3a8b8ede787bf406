//! # Plugpack
//!
//! A small, strict, marker-delimited binary codec.
//!
//! ## Philosophy
//!
//! - **Self-describing**: every primitive carries a fixed type marker, so a reader
//!   that drifts out of step with the writer fails loudly instead of misreading.
//! - **Guarded records**: compound records write their own marker before and after
//!   the body. A mismatch on either side means corruption or protocol-version drift.
//! - **Bounded**: decoders are bounds-checked cursors over a borrowed slice.
//!
//! ## Format
//!
//! - **Integers**: `[Marker: i64][Value: 4 or 8 bytes]`
//! - **Bools**: `[Marker: i64][Value: 1 byte]`
//! - **Strings**: `[Marker: i64][Len: i32][UTF-8: Len]`, `Len = -1` means absent
//! - **Presence flags**: `[0 | 1]`, one raw byte, no marker
//! - **Records**: `[Marker: i64][Fields...][Marker: i64]`
//!
//! All integers are Big-Endian.

#[cfg(test)]
mod tests;

/// Marker written before every `i64`.
pub const LONG_MARKER: i64 = 1_221_312_393;
/// Marker written before every `i32`.
pub const INT_MARKER: i64 = 122_134_568;
/// Marker written before every string, present or absent.
pub const STRING_MARKER: i64 = 123_798_371_293;
/// Marker written before every bool.
pub const BOOL_MARKER: i64 = 1_337_900_331;

/// Length sentinel that encodes an absent string.
const NULL_LENGTH: i32 = -1;

/// Plugpack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A marker did not match the one the reader expected.
    MarkerMismatch { expected: i64, found: i64 },
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// A presence flag byte was neither 0 nor 1.
    InvalidFlag(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// A length prefix was negative (other than the absent sentinel).
    InvalidLength(i32),
    /// A required string was encoded as absent.
    UnexpectedNull,
    /// A string or sequence is too long for an `i32` length prefix.
    TooLarge(usize),
    /// Bytes remained after the top-level value was decoded.
    TrailingBytes(usize),
    /// A record body held a value the record cannot represent.
    Malformed(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MarkerMismatch { expected, found } => {
                write!(f, "Marker mismatch: expected {}, found {}", expected, found)
            }
            Error::UnexpectedEnd => write!(f, "Unexpected end of buffer"),
            Error::InvalidFlag(b) => write!(f, "Invalid presence flag byte: {:#04x}", b),
            Error::InvalidUtf8 => write!(f, "String data is not valid UTF-8"),
            Error::InvalidLength(len) => write!(f, "Invalid length prefix: {}", len),
            Error::UnexpectedNull => write!(f, "Required string was absent"),
            Error::TooLarge(len) => write!(f, "Value of {} bytes exceeds i32 length prefix", len),
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes after value", n),
            Error::Malformed(msg) => write!(f, "Malformed record: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Plugpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A compound value with its own guard marker.
///
/// Implementors only describe their fields; `encode` and `decode` write and
/// check the marker on both sides of the body.
pub trait Record: Sized {
    /// Guard marker, unique per record kind.
    const MARKER: i64;

    /// Writes the record body (without guards).
    fn encode_fields(&self, enc: &mut Encoder) -> Result<()>;

    /// Reads the record body (without guards).
    fn decode_fields(dec: &mut Decoder<'_>) -> Result<Self>;

    /// Writes `[MARKER][body][MARKER]`.
    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.marker(Self::MARKER);
        self.encode_fields(enc)?;
        enc.marker(Self::MARKER);
        Ok(())
    }

    /// Reads and validates `[MARKER][body][MARKER]`.
    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.expect_marker(Self::MARKER)?;
        let value = Self::decode_fields(dec)?;
        dec.expect_marker(Self::MARKER)?;
        Ok(value)
    }

    /// Encodes the record as a standalone buffer.
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes())
    }

    /// Decodes a standalone buffer that must hold exactly one record.
    fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(buf);
        let value = Self::decode(&mut dec)?;
        dec.finish()?;
        Ok(value)
    }
}

/// An append-only encoder.
///
/// Writes never reorder or patch earlier bytes; the only failure is a value too
/// long for its `i32` length prefix.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Creates a new encoder with default capacity.
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    /// Consumes the encoder and returns the final byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Returns a view of the current buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Writes a raw marker with no value.
    pub fn marker(&mut self, marker: i64) {
        self.buf.extend_from_slice(&marker.to_be_bytes());
    }

    /// Writes a raw presence flag (`0` or `1`), no marker.
    pub fn flag(&mut self, present: bool) {
        self.buf.push(u8::from(present));
    }

    /// Encodes a signed 64-bit integer.
    pub fn i64(&mut self, v: i64) { self.marker(LONG_MARKER); self.buf.extend_from_slice(&v.to_be_bytes()); }
    /// Encodes a signed 32-bit integer.
    pub fn i32(&mut self, v: i32) { self.marker(INT_MARKER); self.buf.extend_from_slice(&v.to_be_bytes()); }
    /// Encodes a bool.
    pub fn bool(&mut self, v: bool) { self.marker(BOOL_MARKER); self.buf.push(u8::from(v)); }

    /// Encodes a present UTF-8 string.
    pub fn str(&mut self, v: &str) -> Result<()> {
        let len = i32::try_from(v.len()).map_err(|_| Error::TooLarge(v.len()))?;
        self.marker(STRING_MARKER);
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(v.as_bytes());
        Ok(())
    }

    /// Encodes a nullable string; `None` uses the `-1` length sentinel.
    pub fn opt_str(&mut self, v: Option<&str>) -> Result<()> {
        match v {
            Some(s) => self.str(s),
            None => {
                self.marker(STRING_MARKER);
                self.buf.extend_from_slice(&NULL_LENGTH.to_be_bytes());
                Ok(())
            }
        }
    }

    /// Encodes a sequence length as an `i32`.
    pub fn count(&mut self, n: usize) -> Result<()> {
        let n = i32::try_from(n).map_err(|_| Error::TooLarge(n))?;
        self.i32(n);
        Ok(())
    }

    /// Encodes a nested record.
    pub fn record<R: Record>(&mut self, v: &R) -> Result<()> {
        v.encode(self)
    }

    /// Encodes a presence flag followed by the record, if any.
    pub fn opt_record<R: Record>(&mut self, v: Option<&R>) -> Result<()> {
        self.flag(v.is_some());
        match v {
            Some(r) => r.encode(self),
            None => Ok(()),
        }
    }
}

/// A bounds-checked cursor over a byte slice.
///
/// Reading advances the internal cursor. Every typed read validates the marker
/// before touching the value.
///
/// # Errors
/// All read operations return `Error::UnexpectedEnd` if the buffer is exhausted.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over the slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the remaining bytes in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Fails with `Error::TrailingBytes` unless the buffer is fully consumed.
    pub fn finish(&self) -> Result<()> {
        if self.buf.is_empty() { Ok(()) } else { Err(Error::TrailingBytes(self.buf.len())) }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() { return Err(Error::UnexpectedEnd); }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_raw_i64(&mut self) -> Result<i64> { Ok(i64::from_be_bytes(self.read_array()?)) }
    fn read_raw_i32(&mut self) -> Result<i32> { Ok(i32::from_be_bytes(self.read_array()?)) }

    /// Peeks the next marker without advancing.
    pub fn peek_marker(&self) -> Result<i64> {
        self.clone().read_raw_i64()
    }

    /// Consumes a marker and checks it.
    pub fn expect_marker(&mut self, expected: i64) -> Result<()> {
        let found = self.read_raw_i64()?;
        if found == expected {
            Ok(())
        } else {
            Err(Error::MarkerMismatch { expected, found })
        }
    }

    /// Decodes a raw presence flag.
    pub fn flag(&mut self) -> Result<bool> {
        match self.read_array::<1>()?[0] {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::InvalidFlag(b)),
        }
    }

    /// Decodes an `i64`.
    pub fn i64(&mut self) -> Result<i64> { self.expect_marker(LONG_MARKER)?; self.read_raw_i64() }
    /// Decodes an `i32`.
    pub fn i32(&mut self) -> Result<i32> { self.expect_marker(INT_MARKER)?; self.read_raw_i32() }

    /// Decodes a bool.
    pub fn bool(&mut self) -> Result<bool> {
        self.expect_marker(BOOL_MARKER)?;
        match self.read_array::<1>()?[0] {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::InvalidFlag(b)),
        }
    }

    /// Decodes a nullable string.
    pub fn opt_str(&mut self) -> Result<Option<&'a str>> {
        self.expect_marker(STRING_MARKER)?;
        let len = self.read_raw_i32()?;
        if len == NULL_LENGTH {
            return Ok(None);
        }
        let len = usize::try_from(len).map_err(|_| Error::InvalidLength(len))?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map(Some).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a string that must be present.
    pub fn str(&mut self) -> Result<&'a str> {
        self.opt_str()?.ok_or(Error::UnexpectedNull)
    }

    /// Decodes a sequence length.
    pub fn count(&mut self) -> Result<usize> {
        let n = self.i32()?;
        usize::try_from(n).map_err(|_| Error::InvalidLength(n))
    }

    /// Decodes a nested record.
    pub fn record<R: Record>(&mut self) -> Result<R> {
        R::decode(self)
    }

    /// Decodes a presence flag followed by the record, if any.
    pub fn opt_record<R: Record>(&mut self) -> Result<Option<R>> {
        if self.flag()? {
            Ok(Some(R::decode(self)?))
        } else {
            Ok(None)
        }
    }
}
