//! LDAP controls and their value codecs
//!
//! A control rides on any message as `{ oid, criticality, value }`. The value
//! octets stay opaque unless a codec is registered for the OID, in which case
//! they are decoded on the spot into a typed payload. On encode the typed
//! payload wins over retained opaque bytes, so mutating a typed control is
//! visible on the wire.
//!
//! Control values are complete little buffers, so their inner grammars are
//! plain recursive-descent parsers.

use crate::ber::{self, BerWriter};
use crate::error::EncodeError;
use crate::ldap::{LdapOid, ResultCode};
use asn1_rs::nom::combinator::complete;
use asn1_rs::nom::multi::many0;
use asn1_rs::nom::Err;
use asn1_rs::{Class, Enumerated, FromBer, OptTaggedParser, ParseResult, Sequence, Tag};

/// Paged results control, RFC 2696.
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";
/// Proxied authorization control, RFC 4370.
pub const PROXIED_AUTHORIZATION_OID: &str = "2.16.840.1.113730.3.4.18";
/// ManageDsaIT control, RFC 3296.
pub const MANAGE_DSA_IT_OID: &str = "2.16.840.1.113730.3.4.2";
/// Server-side sort request control, RFC 2891.
pub const SORT_REQUEST_OID: &str = "1.2.840.113556.1.4.473";
/// Server-side sort response control, RFC 2891.
pub const SORT_RESPONSE_OID: &str = "1.2.840.113556.1.4.474";

/// A decode failure for a control or extended-operation value.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("malformed value")]
    Malformed,

    #[error("invalid UTF-8 in value")]
    InvalidUtf8,

    #[error("trailing octets after value")]
    Trailing,

    #[error("value present on a valueless operation")]
    UnexpectedValue,
}

// Control ::= SEQUENCE {
//     controlType             LDAPOID,
//     criticality             BOOLEAN DEFAULT FALSE,
//     controlValue            OCTET STRING OPTIONAL }
/// One control attached to a message.
#[derive(Clone, Debug)]
pub struct Control {
    pub oid: LdapOid,
    pub criticality: bool,
    /// Opaque value octets as decoded from (or destined for) the wire.
    pub value: Option<Vec<u8>>,
    /// Typed payload, present when a codec is registered for `oid`.
    pub payload: Option<ControlPayload>,
}

impl Control {
    /// A non-critical control without value or payload.
    pub fn new(oid: &str) -> Self {
        Control {
            oid: oid.into(),
            criticality: false,
            value: None,
            payload: None,
        }
    }

    /// A control built from a typed payload.
    pub fn from_payload(payload: ControlPayload) -> Self {
        Control {
            oid: payload.oid().into(),
            criticality: false,
            value: None,
            payload: Some(payload),
        }
    }

    /// The value that will be sent on the wire: the typed payload when one is
    /// attached, the retained opaque octets otherwise.
    pub fn effective_value(&self) -> Option<Vec<u8>> {
        match &self.payload {
            Some(p) => p.encode_value(),
            None => self.value.clone(),
        }
    }
}

impl PartialEq for Control {
    fn eq(&self, other: &Self) -> bool {
        self.oid == other.oid
            && self.criticality == other.criticality
            && self.effective_value() == other.effective_value()
    }
}

impl Eq for Control {}

/// Typed control payloads this crate ships codecs for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlPayload {
    PagedResults(PagedResults),
    ProxiedAuthorization(ProxiedAuthorization),
    ManageDsaIt,
    SortRequest(Vec<SortKey>),
    SortResponse(SortResult),
}

impl ControlPayload {
    /// OID of the control this payload belongs to.
    pub fn oid(&self) -> &'static str {
        match self {
            ControlPayload::PagedResults(_) => PAGED_RESULTS_OID,
            ControlPayload::ProxiedAuthorization(_) => PROXIED_AUTHORIZATION_OID,
            ControlPayload::ManageDsaIt => MANAGE_DSA_IT_OID,
            ControlPayload::SortRequest(_) => SORT_REQUEST_OID,
            ControlPayload::SortResponse(_) => SORT_RESPONSE_OID,
        }
    }

    /// Re-encode the payload into control-value octets.
    pub fn encode_value(&self) -> Option<Vec<u8>> {
        match self {
            ControlPayload::PagedResults(p) => p.encode().ok(),
            ControlPayload::ProxiedAuthorization(p) => Some(p.authorization_id.clone().into_bytes()),
            ControlPayload::ManageDsaIt => None,
            ControlPayload::SortRequest(keys) => encode_sort_request(keys).ok(),
            ControlPayload::SortResponse(r) => r.encode().ok(),
        }
    }
}

// realSearchControlValue ::= SEQUENCE {
//         size            INTEGER (0..maxInt),
//         cookie          OCTET STRING }
/// Paged results control value (RFC 2696).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PagedResults {
    /// Requested page size (request) or result-set estimate (response).
    pub size: u32,
    /// Server paging cookie; empty on the first request and the last page.
    pub cookie: Vec<u8>,
}

impl PagedResults {
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let content = ber::int_tlv_len(i64::from(self.size)) + ber::tlv_len(self.cookie.len());
        let mut w = BerWriter::with_capacity(ber::tlv_len(content));
        w.put_header(0x30, content)?;
        w.put_integer(0x02, i64::from(self.size))?;
        w.put_octet_string(0x04, &self.cookie)?;
        w.finish()
    }
}

pub(crate) fn decode_paged_results(raw: &[u8]) -> Result<ControlPayload, ValueError> {
    let (rem, (size, cookie)) = Sequence::from_ber_and_then(raw, |i| {
        let (i, size) = <u32>::from_ber(i)?;
        let (i, cookie) = <&[u8]>::from_ber(i)?;
        Ok((i, (size, cookie)))
    })
    .map_err(|_: Err<asn1_rs::Error>| ValueError::Malformed)?;
    if !rem.is_empty() {
        return Err(ValueError::Trailing);
    }
    Ok(ControlPayload::PagedResults(PagedResults {
        size,
        cookie: cookie.to_vec(),
    }))
}

/// Proxied authorization control value (RFC 4370): the raw authzId, with no
/// inner TLV wrapping.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProxiedAuthorization {
    /// `dn:...`/`u:...` authorization identity; empty requests anonymous
    /// authorization.
    pub authorization_id: String,
}

pub(crate) fn decode_proxied_authorization(raw: &[u8]) -> Result<ControlPayload, ValueError> {
    let authorization_id = std::str::from_utf8(raw)
        .map_err(|_| ValueError::InvalidUtf8)?
        .to_owned();
    Ok(ControlPayload::ProxiedAuthorization(ProxiedAuthorization {
        authorization_id,
    }))
}

pub(crate) fn decode_manage_dsa_it(raw: &[u8]) -> Result<ControlPayload, ValueError> {
    if !raw.is_empty() {
        return Err(ValueError::UnexpectedValue);
    }
    Ok(ControlPayload::ManageDsaIt)
}

// SortKeyList ::= SEQUENCE OF SEQUENCE {
//     attributeType   AttributeDescription,
//     orderingRule    [0] MatchingRuleId OPTIONAL,
//     reverseOrder    [1] BOOLEAN DEFAULT FALSE }
/// One key of a server-side sort request (RFC 2891).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SortKey {
    pub attribute_type: String,
    pub ordering_rule: Option<String>,
    pub reverse_order: bool,
}

fn parse_sort_key(bytes: &[u8]) -> ParseResult<'_, SortKey, asn1_rs::Error> {
    Sequence::from_ber_and_then(bytes, |i| {
        let (i, attr) = <&[u8]>::from_ber(i)?;
        let (i, rule) = OptTaggedParser::new(Class::ContextSpecific, Tag(0))
            .parse_ber(i, |_, data| Ok((&b""[..], data.to_vec())))?;
        let (i, reverse) = OptTaggedParser::new(Class::ContextSpecific, Tag(1))
            .parse_ber(i, |_, data| Ok((&b""[..], data.to_vec())))?;
        let key = SortKey {
            attribute_type: String::from_utf8_lossy(attr).into_owned(),
            ordering_rule: rule.map(|r| String::from_utf8_lossy(&r).into_owned()),
            reverse_order: reverse.is_some_and(|b| b.first().copied().unwrap_or(0) != 0),
        };
        Ok((i, key))
    })
}

pub(crate) fn decode_sort_request(raw: &[u8]) -> Result<ControlPayload, ValueError> {
    let (rem, keys) = Sequence::from_ber_and_then(raw, many0(complete(parse_sort_key)))
        .map_err(|_: Err<asn1_rs::Error>| ValueError::Malformed)?;
    if !rem.is_empty() {
        return Err(ValueError::Trailing);
    }
    if keys.is_empty() {
        return Err(ValueError::Malformed);
    }
    Ok(ControlPayload::SortRequest(keys))
}

fn encode_sort_request(keys: &[SortKey]) -> Result<Vec<u8>, EncodeError> {
    let mut content = 0;
    for key in keys {
        content += ber::tlv_len(sort_key_content(key));
    }
    let mut w = BerWriter::with_capacity(ber::tlv_len(content));
    w.put_header(0x30, content)?;
    for key in keys {
        w.put_header(0x30, sort_key_content(key))?;
        w.put_octet_string(0x04, key.attribute_type.as_bytes())?;
        if let Some(rule) = &key.ordering_rule {
            w.put_octet_string(0x80, rule.as_bytes())?;
        }
        if key.reverse_order {
            w.put_boolean(0x81, true)?;
        }
    }
    w.finish()
}

fn sort_key_content(key: &SortKey) -> usize {
    let mut n = ber::tlv_len(key.attribute_type.len());
    if let Some(rule) = &key.ordering_rule {
        n += ber::tlv_len(rule.len());
    }
    if key.reverse_order {
        n += 3;
    }
    n
}

// SortResult ::= SEQUENCE {
//     sortResult  ENUMERATED { success (0), operationsError (1), ... },
//     attributeType [0] AttributeDescription OPTIONAL }
/// Outcome of a server-side sort (RFC 2891).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SortResult {
    pub sort_result: ResultCode,
    /// First attribute the server could not sort on, when it names one.
    pub attribute_type: Option<String>,
}

impl SortResult {
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut content = ber::int_tlv_len(i64::from(self.sort_result.0));
        if let Some(attr) = &self.attribute_type {
            content += ber::tlv_len(attr.len());
        }
        let mut w = BerWriter::with_capacity(ber::tlv_len(content));
        w.put_header(0x30, content)?;
        w.put_integer(0x0a, i64::from(self.sort_result.0))?;
        if let Some(attr) = &self.attribute_type {
            w.put_octet_string(0x80, attr.as_bytes())?;
        }
        w.finish()
    }
}

pub(crate) fn decode_sort_response(raw: &[u8]) -> Result<ControlPayload, ValueError> {
    let (rem, result) = Sequence::from_ber_and_then(raw, |i| {
        let (i, code) = Enumerated::from_ber(i)?;
        let (i, attr) = OptTaggedParser::new(Class::ContextSpecific, Tag(0))
            .parse_ber(i, |_, data| Ok((&b""[..], data.to_vec())))?;
        let result = SortResult {
            sort_result: ResultCode(code.0),
            attribute_type: attr.map(|a| String::from_utf8_lossy(&a).into_owned()),
        };
        Ok((i, result))
    })
    .map_err(|_: Err<asn1_rs::Error>| ValueError::Malformed)?;
    if !rem.is_empty() {
        return Err(ValueError::Trailing);
    }
    Ok(ControlPayload::SortResponse(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_paged_results_decode() {
        let raw = hex!("30 08 02 01 64 04 03 61 62 63");
        match decode_paged_results(&raw).unwrap() {
            ControlPayload::PagedResults(p) => {
                assert_eq!(p.size, 100);
                assert_eq!(p.cookie, b"abc");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_paged_results_encode() {
        let p = PagedResults {
            size: 100,
            cookie: Vec::new(),
        };
        assert_eq!(p.encode().unwrap(), hex!("30 05 02 01 64 04 00"));
    }

    #[test]
    fn test_paged_results_round_trip() {
        let payload = ControlPayload::PagedResults(PagedResults {
            size: 512,
            cookie: vec![1, 2, 3, 4],
        });
        let raw = payload.encode_value().unwrap();
        assert_eq!(decode_paged_results(&raw).unwrap(), payload);
    }

    #[test]
    fn test_paged_results_rejects_garbage() {
        assert!(decode_paged_results(&hex!("30 03 02 01 64")).is_err());
        assert!(decode_paged_results(&hex!("04 00")).is_err());
        // trailing octets after the sequence
        assert!(decode_paged_results(&hex!("30 05 02 01 64 04 00 00")).is_err());
    }

    #[test]
    fn test_manage_dsa_it_is_valueless() {
        assert_eq!(decode_manage_dsa_it(&[]), Ok(ControlPayload::ManageDsaIt));
        assert_eq!(
            decode_manage_dsa_it(&hex!("04 00")),
            Err(ValueError::UnexpectedValue)
        );
    }

    #[test]
    fn test_sort_request_round_trip() {
        let payload = ControlPayload::SortRequest(vec![
            SortKey {
                attribute_type: "sn".to_owned(),
                ordering_rule: Some("caseIgnoreOrderingMatch".to_owned()),
                reverse_order: true,
            },
            SortKey {
                attribute_type: "givenName".to_owned(),
                ordering_rule: None,
                reverse_order: false,
            },
        ]);
        let raw = payload.encode_value().unwrap();
        assert_eq!(decode_sort_request(&raw).unwrap(), payload);
    }

    #[test]
    fn test_sort_request_rejects_empty_key_list() {
        assert_eq!(decode_sort_request(&hex!("30 00")), Err(ValueError::Malformed));
    }

    #[test]
    fn test_sort_response_decode() {
        // sortResult unwillingToPerform (53), attributeType "cn"
        let raw = hex!("30 07 0a 01 35 80 02 63 6e");
        match decode_sort_response(&raw).unwrap() {
            ControlPayload::SortResponse(r) => {
                assert_eq!(r.sort_result, ResultCode::UnwillingToPerform);
                assert_eq!(r.attribute_type.as_deref(), Some("cn"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_sort_response_round_trip() {
        let payload = ControlPayload::SortResponse(SortResult {
            sort_result: ResultCode::Success,
            attribute_type: None,
        });
        let raw = payload.encode_value().unwrap();
        assert_eq!(decode_sort_response(&raw).unwrap(), payload);
    }

    #[test]
    fn test_typed_payload_wins_over_opaque_value() {
        let mut control = Control::from_payload(ControlPayload::PagedResults(PagedResults {
            size: 10,
            cookie: Vec::new(),
        }));
        control.value = Some(hex!("30 05 02 01 63 04 00").to_vec());
        // the mutated typed payload, not the stale octets, reaches the wire
        assert_eq!(
            control.effective_value().unwrap(),
            hex!("30 05 02 01 0a 04 00")
        );
    }
}
