//! Minimal ASN.1 DER encoding/decoding
//!
//! Only the primitives needed by the RFC 3161 provider and the Ed25519
//! SubjectPublicKeyInfo encoding: SEQUENCE, INTEGER, OCTET STRING,
//! BIT STRING, BOOLEAN, NULL, OBJECT IDENTIFIER, and definite lengths
//! (short form plus long form up to four length octets). No external
//! ASN.1 library is used.

use thiserror::Error;

/// Universal class tags used by this crate
pub mod tag {
    pub const BOOLEAN: u8 = 0x01;
    pub const INTEGER: u8 = 0x02;
    pub const BIT_STRING: u8 = 0x03;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OBJECT_IDENTIFIER: u8 = 0x06;
    pub const GENERALIZED_TIME: u8 = 0x18;
    pub const SEQUENCE: u8 = 0x30;
}

/// DER structural errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Asn1Error {
    /// Input ended before a complete TLV
    #[error("truncated DER input")]
    Truncated,

    /// Found a different tag than the structure requires
    #[error("unexpected tag: expected 0x{expected:02x}, found 0x{found:02x}")]
    UnexpectedTag { expected: u8, found: u8 },

    /// Length field uses a form this decoder does not support
    #[error("unsupported length encoding")]
    UnsupportedLength,

    /// INTEGER does not fit in an i64
    #[error("integer too large")]
    IntegerOverflow,

    /// BOOLEAN content octet is not 0x00 or 0xFF
    #[error("invalid boolean octet 0x{0:02x}")]
    InvalidBoolean(u8),
}

/// Encode a definite length (short or long form)
pub fn encode_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    let mut out = Vec::with_capacity(1 + bytes.len() - first);
    out.push(0x80 | (bytes.len() - first) as u8);
    out.extend_from_slice(&bytes[first..]);
    out
}

/// Encode one tag-length-value triple
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + content.len());
    out.push(tag);
    out.extend_from_slice(&encode_len(content.len()));
    out.extend_from_slice(content);
    out
}

/// SEQUENCE wrapping already-encoded elements
pub fn sequence(content: &[u8]) -> Vec<u8> {
    tlv(tag::SEQUENCE, content)
}

/// INTEGER from a small non-negative value
pub fn integer_i64(value: i64) -> Vec<u8> {
    debug_assert!(value >= 0, "only non-negative integers are encoded");
    let bytes = value.to_be_bytes();
    let first = bytes
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(bytes.len() - 1);
    integer_unsigned(&bytes[first..])
}

/// INTEGER from big-endian unsigned bytes
///
/// Strips redundant leading zeros, then prepends one zero octet if the top
/// bit is set so the value stays positive.
pub fn integer_unsigned(bytes: &[u8]) -> Vec<u8> {
    let mut start = 0;
    while start + 1 < bytes.len() && bytes[start] == 0 && bytes[start + 1] < 0x80 {
        start += 1;
    }
    let trimmed = &bytes[start..];
    let mut content = Vec::with_capacity(trimmed.len() + 1);
    if trimmed.is_empty() || trimmed[0] >= 0x80 {
        content.push(0);
    }
    content.extend_from_slice(trimmed);
    tlv(tag::INTEGER, &content)
}

/// OCTET STRING
pub fn octet_string(bytes: &[u8]) -> Vec<u8> {
    tlv(tag::OCTET_STRING, bytes)
}

/// BIT STRING with zero unused bits
pub fn bit_string(bytes: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(bytes.len() + 1);
    content.push(0);
    content.extend_from_slice(bytes);
    tlv(tag::BIT_STRING, &content)
}

/// BOOLEAN (DER: TRUE is 0xFF)
pub fn boolean(value: bool) -> Vec<u8> {
    tlv(tag::BOOLEAN, &[if value { 0xFF } else { 0x00 }])
}

/// NULL
pub fn null() -> Vec<u8> {
    tlv(tag::NULL, &[])
}

/// OBJECT IDENTIFIER from pre-encoded content octets
///
/// The OIDs this crate needs are fixed constants, so no general
/// component encoder is required.
pub fn oid(content: &[u8]) -> Vec<u8> {
    tlv(tag::OBJECT_IDENTIFIER, content)
}

/// Cursor-based DER reader
pub struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Remaining unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Look at the next tag without consuming it
    pub fn peek_tag(&self) -> Result<u8, Asn1Error> {
        self.data.get(self.pos).copied().ok_or(Asn1Error::Truncated)
    }

    fn read_len(&mut self) -> Result<usize, Asn1Error> {
        let first = *self.data.get(self.pos).ok_or(Asn1Error::Truncated)?;
        self.pos += 1;
        if first < 0x80 {
            return Ok(first as usize);
        }
        let count = (first & 0x7f) as usize;
        if count == 0 || count > 4 {
            // Indefinite lengths and absurdly wide lengths are not DER
            return Err(Asn1Error::UnsupportedLength);
        }
        if self.pos + count > self.data.len() {
            return Err(Asn1Error::Truncated);
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | self.data[self.pos] as usize;
            self.pos += 1;
        }
        Ok(len)
    }

    /// Read the next TLV, returning its tag and content slice
    pub fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), Asn1Error> {
        let tag = self.peek_tag()?;
        self.pos += 1;
        let len = self.read_len()?;
        if self.pos + len > self.data.len() {
            return Err(Asn1Error::Truncated);
        }
        let content = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok((tag, content))
    }

    /// Read a TLV and require a specific tag
    pub fn expect(&mut self, expected: u8) -> Result<&'a [u8], Asn1Error> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Asn1Error::UnexpectedTag { expected, found });
        }
        let (_, content) = self.read_tlv()?;
        Ok(content)
    }

    /// Descend into a SEQUENCE, returning a reader over its content
    pub fn sequence(&mut self) -> Result<DerReader<'a>, Asn1Error> {
        Ok(DerReader::new(self.expect(tag::SEQUENCE)?))
    }

    /// Read an INTEGER as raw content octets
    pub fn integer_bytes(&mut self) -> Result<&'a [u8], Asn1Error> {
        self.expect(tag::INTEGER)
    }

    /// Read a small INTEGER as i64
    pub fn integer(&mut self) -> Result<i64, Asn1Error> {
        let content = self.integer_bytes()?;
        if content.is_empty() || content.len() > 8 {
            return Err(Asn1Error::IntegerOverflow);
        }
        let mut value: i64 = if content[0] >= 0x80 { -1 } else { 0 };
        for &b in content {
            value = (value << 8) | b as i64;
        }
        Ok(value)
    }

    /// Read an OCTET STRING
    pub fn octet_string(&mut self) -> Result<&'a [u8], Asn1Error> {
        self.expect(tag::OCTET_STRING)
    }

    /// Read a BOOLEAN
    pub fn boolean(&mut self) -> Result<bool, Asn1Error> {
        let content = self.expect(tag::BOOLEAN)?;
        match content {
            [0x00] => Ok(false),
            [0xFF] => Ok(true),
            [other] => Err(Asn1Error::InvalidBoolean(*other)),
            _ => Err(Asn1Error::Truncated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_len_short_form() {
        assert_eq!(encode_len(0), vec![0x00]);
        assert_eq!(encode_len(0x7f), vec![0x7f]);
    }

    #[test]
    fn test_encode_len_long_form() {
        assert_eq!(encode_len(0x80), vec![0x81, 0x80]);
        assert_eq!(encode_len(0x1234), vec![0x82, 0x12, 0x34]);
    }

    #[test]
    fn test_integer_small_values() {
        assert_eq!(integer_i64(0), vec![0x02, 0x01, 0x00]);
        assert_eq!(integer_i64(1), vec![0x02, 0x01, 0x01]);
        assert_eq!(integer_i64(127), vec![0x02, 0x01, 0x7f]);
    }

    #[test]
    fn test_integer_high_bit_gets_zero_prefix() {
        assert_eq!(integer_i64(128), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(integer_unsigned(&[0xff]), vec![0x02, 0x02, 0x00, 0xff]);
    }

    #[test]
    fn test_integer_unsigned_trims_redundant_zeros() {
        assert_eq!(integer_unsigned(&[0x00, 0x01]), vec![0x02, 0x01, 0x01]);
        // A zero that protects a high bit is kept
        assert_eq!(
            integer_unsigned(&[0x00, 0x80]),
            vec![0x02, 0x02, 0x00, 0x80]
        );
    }

    #[test]
    fn test_boolean_encoding() {
        assert_eq!(boolean(true), vec![0x01, 0x01, 0xff]);
        assert_eq!(boolean(false), vec![0x01, 0x01, 0x00]);
    }

    #[test]
    fn test_null_encoding() {
        assert_eq!(null(), vec![0x05, 0x00]);
    }

    #[test]
    fn test_bit_string_prepends_unused_bits_octet() {
        let encoded = bit_string(&[0xab, 0xcd]);
        assert_eq!(encoded, vec![0x03, 0x03, 0x00, 0xab, 0xcd]);
    }

    #[test]
    fn test_sequence_roundtrip() {
        let mut content = Vec::new();
        content.extend_from_slice(&integer_i64(1));
        content.extend_from_slice(&octet_string(b"hello"));
        let encoded = sequence(&content);

        let mut reader = DerReader::new(&encoded);
        let mut inner = reader.sequence().unwrap();
        assert_eq!(inner.integer().unwrap(), 1);
        assert_eq!(inner.octet_string().unwrap(), b"hello");
        assert!(inner.is_empty());
        assert!(reader.is_empty());
    }

    #[test]
    fn test_long_form_roundtrip() {
        let payload = vec![0x42u8; 300];
        let encoded = octet_string(&payload);
        let mut reader = DerReader::new(&encoded);
        assert_eq!(reader.octet_string().unwrap(), payload.as_slice());
    }

    #[test]
    fn test_reader_truncated_input() {
        let mut reader = DerReader::new(&[0x30, 0x05, 0x02]);
        assert_eq!(reader.read_tlv().unwrap_err(), Asn1Error::Truncated);
    }

    #[test]
    fn test_reader_unexpected_tag() {
        let encoded = integer_i64(7);
        let mut reader = DerReader::new(&encoded);
        let err = reader.octet_string().unwrap_err();
        assert_eq!(
            err,
            Asn1Error::UnexpectedTag {
                expected: tag::OCTET_STRING,
                found: tag::INTEGER
            }
        );
    }

    #[test]
    fn test_reader_boolean_values() {
        let yes = boolean(true);
        let mut reader = DerReader::new(&yes);
        assert!(reader.boolean().unwrap());
        let no = boolean(false);
        let mut reader = DerReader::new(&no);
        assert!(!reader.boolean().unwrap());
        let mut reader = DerReader::new(&[0x01, 0x01, 0x2a]);
        assert_eq!(
            reader.boolean().unwrap_err(),
            Asn1Error::InvalidBoolean(0x2a)
        );
    }

    #[test]
    fn test_integer_bytes_preserved() {
        let encoded = integer_unsigned(&[0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0x0f]);
        let mut reader = DerReader::new(&encoded);
        assert_eq!(
            reader.integer_bytes().unwrap(),
            &[0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0x0f]
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(Asn1Error::Truncated.to_string(), "truncated DER input");
        let err = Asn1Error::UnexpectedTag {
            expected: 0x30,
            found: 0x02,
        };
        assert_eq!(
            err.to_string(),
            "unexpected tag: expected 0x30, found 0x02"
        );
    }
}
