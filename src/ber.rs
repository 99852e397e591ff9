//! BER primitives for the LDAP subset of ASN.1
//!
//! LDAP only uses short-form tags and definite lengths, which keeps this layer
//! small: one identifier octet, one to five length octets, then content. The
//! read side works on plain byte slices and reports incompleteness as a value
//! (`Ok(None)`) so the streaming decoder can suspend and resume at any TLV
//! boundary. The write side fills a pre-sized buffer; running past its
//! capacity is an encoder bug, not an I/O condition.

use crate::error::EncodeError;

/// Largest length accepted on the wire (maxInt, 2^31 - 1).
pub(crate) const MAX_LENGTH: u64 = 2_147_483_647;

/// Errors raised by the BER layer.
///
/// All of these are fatal to the PDU being decoded and to the connection,
/// since resynchronizing a BER stream after a framing error is not possible.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BerError {
    #[error("long-form tag (LDAP uses short-form tags only)")]
    LongFormTag,

    #[error("indefinite length (LDAP uses definite lengths only)")]
    IndefiniteLength,

    #[error("length does not fit in 31 bits")]
    LengthOverflow,

    #[error("integer value has no content octets")]
    EmptyInteger,

    #[error("integer value exceeds {0} content octets")]
    IntegerTooLong(usize),

    #[error("boolean value must be exactly one octet")]
    InvalidBooleanLength,

    #[error("invalid UTF-8 where a string is required")]
    InvalidUtf8,

    #[error("child element overruns its parent length")]
    ParentOverrun,
}

/// One decoded tag-length header.
///
/// `header_len` is the number of octets consumed by the identifier and length
/// octets together; the content begins right after it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct TlvHeader {
    pub raw_tag: u8,
    pub constructed: bool,
    pub length: usize,
    pub header_len: usize,
}

/// Read a TLV header from the start of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold the complete header;
/// no bytes are considered consumed in that case.
pub(crate) fn read_header(buf: &[u8]) -> Result<Option<TlvHeader>, BerError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let raw_tag = buf[0];
    if raw_tag & 0x1f == 0x1f {
        return Err(BerError::LongFormTag);
    }
    let constructed = raw_tag & 0x20 != 0;
    if buf.len() < 2 {
        return Ok(None);
    }
    let first = buf[1];
    if first == 0x80 {
        return Err(BerError::IndefiniteLength);
    }
    if first & 0x80 == 0 {
        return Ok(Some(TlvHeader {
            raw_tag,
            constructed,
            length: usize::from(first),
            header_len: 2,
        }));
    }
    let nb_octets = usize::from(first & 0x7f);
    if nb_octets > 4 {
        return Err(BerError::LengthOverflow);
    }
    if buf.len() < 2 + nb_octets {
        return Ok(None);
    }
    let mut length: u64 = 0;
    for &b in &buf[2..2 + nb_octets] {
        length = (length << 8) | u64::from(b);
    }
    if length > MAX_LENGTH {
        return Err(BerError::LengthOverflow);
    }
    Ok(Some(TlvHeader {
        raw_tag,
        constructed,
        length: length as usize,
        header_len: 2 + nb_octets,
    }))
}

/// Decode a two's-complement integer from content octets.
///
/// Minimal encoding is not enforced: redundant sign-extension octets are
/// skipped before applying `max_octets`, so a peer padding a messageID with
/// leading zeros is still accepted. Range checks belong to the caller.
pub(crate) fn decode_integer(content: &[u8], max_octets: usize) -> Result<i64, BerError> {
    if content.is_empty() {
        return Err(BerError::EmptyInteger);
    }
    let mut octets = content;
    while octets.len() > 1
        && ((octets[0] == 0x00 && octets[1] & 0x80 == 0)
            || (octets[0] == 0xff && octets[1] & 0x80 != 0))
    {
        octets = &octets[1..];
    }
    if octets.len() > max_octets {
        return Err(BerError::IntegerTooLong(max_octets));
    }
    let mut value: i64 = if octets[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in octets {
        value = (value << 8) | i64::from(b);
    }
    Ok(value)
}

/// Decode an ENUMERATED value (same content encoding as INTEGER).
pub(crate) fn decode_enumerated(content: &[u8]) -> Result<i64, BerError> {
    decode_integer(content, 4)
}

/// Decode a BOOLEAN value.
///
/// RFC 4511 wants `0xFF` for TRUE but deployed servers emit other non-zero
/// octets; those are accepted with a warning.
pub(crate) fn decode_boolean(content: &[u8]) -> Result<bool, BerError> {
    if content.len() != 1 {
        return Err(BerError::InvalidBooleanLength);
    }
    let octet = content[0];
    if octet != 0x00 && octet != 0xff {
        log::warn!("boolean TRUE encoded as {octet:#04x} instead of 0xff");
    }
    Ok(octet != 0x00)
}

/// Decode a UTF-8 string value.
pub(crate) fn decode_utf8(content: &[u8]) -> Result<String, BerError> {
    match std::str::from_utf8(content) {
        Ok(s) => Ok(s.to_owned()),
        Err(_) => Err(BerError::InvalidUtf8),
    }
}

/// Check that `s` is a well-formed dotted-decimal OID (RFC 4512 numericoid):
/// at least two components, decimal digits only, no redundant leading zeros.
pub(crate) fn is_valid_oid(s: &str) -> bool {
    let mut components = 0;
    for component in s.split('.') {
        if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        if component.len() > 1 && component.starts_with('0') {
            return false;
        }
        components += 1;
    }
    components >= 2
}

/// Number of content octets of the minimal two's-complement encoding of `v`.
/// Zero encodes as a single `0x00` octet.
pub(crate) fn int_len(v: i64) -> usize {
    let mut n = 1;
    let mut x = v;
    while !(-128..=127).contains(&x) {
        x >>= 8;
        n += 1;
    }
    n
}

/// Number of octets of the length field encoding `len`.
pub(crate) fn len_len(len: usize) -> usize {
    if len < 128 {
        1
    } else {
        let mut n = 0;
        let mut x = len;
        while x > 0 {
            n += 1;
            x >>= 8;
        }
        1 + n
    }
}

/// Total size of a TLV with `content_len` content octets (short-form tag).
pub(crate) fn tlv_len(content_len: usize) -> usize {
    1 + len_len(content_len) + content_len
}

/// Total size of an INTEGER TLV holding `v`.
pub(crate) fn int_tlv_len(v: i64) -> usize {
    // int_len is at most 8, so the length field is always one octet
    2 + int_len(v)
}

/// Serialization cursor over a buffer of fixed capacity.
///
/// The encoder sizes the buffer during its length pass; any write past the
/// capacity means the two passes disagree and is surfaced as an internal
/// encoder error.
#[derive(Debug)]
pub(crate) struct BerWriter {
    buf: Vec<u8>,
    cap: usize,
}

impl BerWriter {
    pub(crate) fn with_capacity(cap: usize) -> Self {
        BerWriter {
            buf: Vec::with_capacity(cap),
            cap,
        }
    }

    pub(crate) fn put_u8(&mut self, b: u8) -> Result<(), EncodeError> {
        if self.buf.len() + 1 > self.cap {
            return Err(EncodeError("write past computed PDU length"));
        }
        self.buf.push(b);
        Ok(())
    }

    pub(crate) fn put_slice(&mut self, s: &[u8]) -> Result<(), EncodeError> {
        if self.buf.len() + s.len() > self.cap {
            return Err(EncodeError("write past computed PDU length"));
        }
        self.buf.extend_from_slice(s);
        Ok(())
    }

    /// Write a tag octet followed by a definite length.
    pub(crate) fn put_header(&mut self, tag: u8, len: usize) -> Result<(), EncodeError> {
        self.put_u8(tag)?;
        if len < 128 {
            self.put_u8(len as u8)
        } else {
            let mut n = 0;
            let mut x = len;
            while x > 0 {
                n += 1;
                x >>= 8;
            }
            self.put_u8(0x80 | n as u8)?;
            for i in (0..n).rev() {
                self.put_u8((len >> (8 * i)) as u8)?;
            }
            Ok(())
        }
    }

    /// Write an INTEGER (or ENUMERATED, or implicitly tagged integer) TLV
    /// with minimal two's-complement content.
    pub(crate) fn put_integer(&mut self, tag: u8, v: i64) -> Result<(), EncodeError> {
        let n = int_len(v);
        self.put_header(tag, n)?;
        for i in (0..n).rev() {
            self.put_u8((v >> (8 * i)) as u8)?;
        }
        Ok(())
    }

    /// Write a BOOLEAN TLV; always exactly three octets, TRUE is `0xFF`.
    pub(crate) fn put_boolean(&mut self, tag: u8, v: bool) -> Result<(), EncodeError> {
        self.put_header(tag, 1)?;
        self.put_u8(if v { 0xff } else { 0x00 })
    }

    /// Write an OCTET STRING (or any implicitly tagged string) TLV.
    pub(crate) fn put_octet_string(&mut self, tag: u8, content: &[u8]) -> Result<(), EncodeError> {
        self.put_header(tag, content.len())?;
        self.put_slice(content)
    }

    /// Finish serialization; the buffer must be exactly full.
    pub(crate) fn finish(self) -> Result<Vec<u8>, EncodeError> {
        if self.buf.len() != self.cap {
            return Err(EncodeError("PDU shorter than its computed length"));
        }
        Ok(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_read_header_short_form() {
        let h = read_header(&hex!("30 06 02 01 03")).unwrap().unwrap();
        assert_eq!(h.raw_tag, 0x30);
        assert!(h.constructed);
        assert_eq!(h.length, 6);
        assert_eq!(h.header_len, 2);
    }

    #[test]
    fn test_read_header_long_form_length() {
        let h = read_header(&hex!("04 82 01 00 ff")).unwrap().unwrap();
        assert_eq!(h.length, 256);
        assert_eq!(h.header_len, 4);
        assert!(!h.constructed);
    }

    #[test]
    fn test_read_header_incomplete() {
        assert_eq!(read_header(&[]).unwrap(), None);
        assert_eq!(read_header(&hex!("30")).unwrap(), None);
        assert_eq!(read_header(&hex!("04 82 01")).unwrap(), None);
    }

    #[test]
    fn test_read_header_rejects_long_form_tag() {
        assert_eq!(read_header(&hex!("1f 85 01 00")), Err(BerError::LongFormTag));
    }

    #[test]
    fn test_read_header_rejects_indefinite() {
        assert_eq!(read_header(&hex!("30 80")), Err(BerError::IndefiniteLength));
    }

    #[test]
    fn test_read_header_rejects_oversized_length() {
        assert_eq!(
            read_header(&hex!("04 84 80 00 00 00")),
            Err(BerError::LengthOverflow)
        );
        assert_eq!(
            read_header(&hex!("04 85 01 00 00 00 00")),
            Err(BerError::LengthOverflow)
        );
    }

    #[test]
    fn test_decode_integer() {
        assert_eq!(decode_integer(&hex!("00"), 4).unwrap(), 0);
        assert_eq!(decode_integer(&hex!("7f"), 4).unwrap(), 127);
        assert_eq!(decode_integer(&hex!("00 80"), 4).unwrap(), 128);
        assert_eq!(decode_integer(&hex!("ff"), 4).unwrap(), -1);
        assert_eq!(decode_integer(&hex!("80"), 4).unwrap(), -128);
        assert_eq!(
            decode_integer(&hex!("7f ff ff ff"), 4).unwrap(),
            2_147_483_647
        );
        assert_eq!(decode_integer(&[], 4), Err(BerError::EmptyInteger));
    }

    #[test]
    fn test_decode_integer_tolerates_leading_zeros() {
        assert_eq!(decode_integer(&hex!("00 00 00 00 2a"), 4).unwrap(), 42);
        assert_eq!(decode_integer(&hex!("ff ff ff"), 4).unwrap(), -1);
    }

    #[test]
    fn test_decode_integer_too_long() {
        assert_eq!(
            decode_integer(&hex!("01 00 00 00 00"), 4),
            Err(BerError::IntegerTooLong(4))
        );
    }

    #[test]
    fn test_decode_boolean() {
        assert_eq!(decode_boolean(&hex!("00")).unwrap(), false);
        assert_eq!(decode_boolean(&hex!("ff")).unwrap(), true);
        // tolerated with a warning
        assert_eq!(decode_boolean(&hex!("01")).unwrap(), true);
        assert_eq!(decode_boolean(&[]), Err(BerError::InvalidBooleanLength));
        assert_eq!(
            decode_boolean(&hex!("ff ff")),
            Err(BerError::InvalidBooleanLength)
        );
    }

    #[test]
    fn test_is_valid_oid() {
        assert!(is_valid_oid("1.3.6.1.4.1.4203.1.11.1"));
        assert!(is_valid_oid("2.16.840.1.113730.3.4.2"));
        assert!(is_valid_oid("0.0"));
        assert!(!is_valid_oid(""));
        assert!(!is_valid_oid("1"));
        assert!(!is_valid_oid("1..2"));
        assert!(!is_valid_oid("1.02"));
        assert!(!is_valid_oid("1.a"));
        assert!(!is_valid_oid(".1.2"));
    }

    #[test]
    fn test_int_len() {
        assert_eq!(int_len(0), 1);
        assert_eq!(int_len(127), 1);
        assert_eq!(int_len(128), 2);
        assert_eq!(int_len(-128), 1);
        assert_eq!(int_len(-129), 2);
        assert_eq!(int_len(2_147_483_647), 4);
    }

    #[test]
    fn test_len_len() {
        assert_eq!(len_len(0), 1);
        assert_eq!(len_len(127), 1);
        assert_eq!(len_len(128), 2);
        assert_eq!(len_len(255), 2);
        assert_eq!(len_len(256), 3);
        assert_eq!(len_len(65_536), 4);
    }

    #[test]
    fn test_writer_round_trip() {
        let mut w = BerWriter::with_capacity(8);
        w.put_header(0x30, 6).unwrap();
        w.put_integer(0x02, 3).unwrap();
        w.put_integer(0x50, 2).unwrap();
        assert_eq!(w.finish().unwrap(), hex!("30 06 02 01 03 50 01 02"));
    }

    #[test]
    fn test_writer_detects_overflow() {
        let mut w = BerWriter::with_capacity(2);
        assert!(w.put_header(0x04, 4).is_ok());
        assert!(w.put_slice(b"abcd").is_err());
    }

    #[test]
    fn test_writer_detects_underflow() {
        let w = BerWriter::with_capacity(4);
        assert!(w.finish().is_err());
    }

    #[test]
    fn test_boolean_always_three_octets() {
        let mut w = BerWriter::with_capacity(3);
        w.put_boolean(0x01, true).unwrap();
        assert_eq!(w.finish().unwrap(), hex!("01 01 ff"));
    }
}
