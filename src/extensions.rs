//! Extended operations and the OID registry
//!
//! The registry maps OIDs to value codecs for controls, extended operations
//! and unsolicited notifications. It is built once at initialization and then
//! shared read-only by every decoder; unknown OIDs simply keep their opaque
//! value octets. Codecs are plain functions dispatching over closed payload
//! enums, keeping lookups cheap and the table trivially shareable.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::ber::{self, BerWriter};
use crate::controls::{
    decode_manage_dsa_it, decode_paged_results, decode_proxied_authorization,
    decode_sort_request, decode_sort_response, ControlPayload, ValueError, MANAGE_DSA_IT_OID,
    PAGED_RESULTS_OID, PROXIED_AUTHORIZATION_OID, SORT_REQUEST_OID, SORT_RESPONSE_OID,
};
use crate::error::EncodeError;
use asn1_rs::nom::Err;
use asn1_rs::{Class, FromBer, OptTaggedParser, Sequence, Tag};

/// Password modify extended operation, RFC 3062.
pub const PASSWORD_MODIFY_OID: &str = "1.3.6.1.4.1.4203.1.11.1";
/// "Who am I?" extended operation, RFC 4532.
pub const WHO_AM_I_OID: &str = "1.3.6.1.4.1.4203.1.11.3";
/// StartTLS extended operation, RFC 4511 §4.14.
pub const START_TLS_OID: &str = "1.3.6.1.4.1.1466.20037";
/// Cancel extended operation, RFC 3909.
pub const CANCEL_OID: &str = "1.3.6.1.1.8";
/// Notice of disconnection unsolicited notification, RFC 4511 §4.4.1.
pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";

/// Typed extended-operation payloads this crate ships codecs for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExtendedPayload {
    PasswordModifyRequest(PasswordModifyRequest),
    PasswordModifyResponse(PasswordModifyResponse),
    WhoAmIRequest,
    WhoAmIResponse(WhoAmIResponse),
    StartTlsRequest,
    StartTlsResponse,
    CancelRequest(CancelRequest),
    /// Notice of disconnection; the whole payload is its response name.
    DisconnectionNotice,
}

impl ExtendedPayload {
    /// OID of the operation this payload belongs to.
    pub fn oid(&self) -> &'static str {
        match self {
            ExtendedPayload::PasswordModifyRequest(_)
            | ExtendedPayload::PasswordModifyResponse(_) => PASSWORD_MODIFY_OID,
            ExtendedPayload::WhoAmIRequest | ExtendedPayload::WhoAmIResponse(_) => WHO_AM_I_OID,
            ExtendedPayload::StartTlsRequest | ExtendedPayload::StartTlsResponse => START_TLS_OID,
            ExtendedPayload::CancelRequest(_) => CANCEL_OID,
            ExtendedPayload::DisconnectionNotice => NOTICE_OF_DISCONNECTION_OID,
        }
    }

    /// Re-encode the payload into request/response value octets.
    pub fn encode_value(&self) -> Option<Vec<u8>> {
        match self {
            ExtendedPayload::PasswordModifyRequest(p) => p.encode().ok(),
            ExtendedPayload::PasswordModifyResponse(p) => p.encode().ok().flatten(),
            ExtendedPayload::WhoAmIRequest => None,
            ExtendedPayload::WhoAmIResponse(p) => {
                if p.authz_id.is_empty() {
                    None
                } else {
                    Some(p.authz_id.clone().into_bytes())
                }
            }
            ExtendedPayload::StartTlsRequest | ExtendedPayload::StartTlsResponse => None,
            ExtendedPayload::CancelRequest(p) => p.encode().ok(),
            ExtendedPayload::DisconnectionNotice => None,
        }
    }
}

// PasswdModifyRequestValue ::= SEQUENCE {
//     userIdentity    [0]  OCTET STRING OPTIONAL
//     oldPasswd       [1]  OCTET STRING OPTIONAL
//     newPasswd       [2]  OCTET STRING OPTIONAL }
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PasswordModifyRequest {
    pub user_identity: Option<String>,
    pub old_password: Option<Vec<u8>>,
    pub new_password: Option<Vec<u8>>,
}

impl PasswordModifyRequest {
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut content = 0;
        if let Some(u) = &self.user_identity {
            content += ber::tlv_len(u.len());
        }
        if let Some(o) = &self.old_password {
            content += ber::tlv_len(o.len());
        }
        if let Some(n) = &self.new_password {
            content += ber::tlv_len(n.len());
        }
        let mut w = BerWriter::with_capacity(ber::tlv_len(content));
        w.put_header(0x30, content)?;
        if let Some(u) = &self.user_identity {
            w.put_octet_string(0x80, u.as_bytes())?;
        }
        if let Some(o) = &self.old_password {
            w.put_octet_string(0x81, o)?;
        }
        if let Some(n) = &self.new_password {
            w.put_octet_string(0x82, n)?;
        }
        w.finish()
    }
}

// PasswdModifyResponseValue ::= SEQUENCE {
//     genPasswd       [0]     OCTET STRING OPTIONAL }
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PasswordModifyResponse {
    pub gen_password: Option<Vec<u8>>,
}

impl PasswordModifyResponse {
    fn encode(&self) -> Result<Option<Vec<u8>>, EncodeError> {
        let gen = match &self.gen_password {
            Some(g) => g,
            None => return Ok(None),
        };
        let content = ber::tlv_len(gen.len());
        let mut w = BerWriter::with_capacity(ber::tlv_len(content));
        w.put_header(0x30, content)?;
        w.put_octet_string(0x80, gen)?;
        w.finish().map(Some)
    }
}

/// "Who am I?" response payload: the authorization identity of the bound
/// session, empty for an anonymous one.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WhoAmIResponse {
    pub authz_id: String,
}

// cancelRequestValue ::= SEQUENCE {
//     cancelID        MessageID }
/// Cancel request payload (RFC 3909): the id of the operation to cancel.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CancelRequest {
    pub cancel_id: u32,
}

impl CancelRequest {
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let content = ber::int_tlv_len(i64::from(self.cancel_id));
        let mut w = BerWriter::with_capacity(ber::tlv_len(content));
        w.put_header(0x30, content)?;
        w.put_integer(0x02, i64::from(self.cancel_id))?;
        w.finish()
    }
}

fn decode_cancel_request(value: Option<&[u8]>) -> Result<ExtendedPayload, ValueError> {
    let raw = match value {
        Some(raw) => raw,
        None => return Err(ValueError::Malformed),
    };
    let (rem, cancel_id) = Sequence::from_ber_and_then(raw, |i| {
        let (i, id) = <u32>::from_ber(i)?;
        Ok((i, id))
    })
    .map_err(|_: Err<asn1_rs::Error>| ValueError::Malformed)?;
    if !rem.is_empty() {
        return Err(ValueError::Trailing);
    }
    Ok(ExtendedPayload::CancelRequest(CancelRequest { cancel_id }))
}

fn decode_start_tls_request(value: Option<&[u8]>) -> Result<ExtendedPayload, ValueError> {
    match value {
        Some(_) => Err(ValueError::UnexpectedValue),
        None => Ok(ExtendedPayload::StartTlsRequest),
    }
}

fn decode_start_tls_response(value: Option<&[u8]>) -> Result<ExtendedPayload, ValueError> {
    match value {
        Some(_) => Err(ValueError::UnexpectedValue),
        None => Ok(ExtendedPayload::StartTlsResponse),
    }
}

fn decode_password_modify_request(value: Option<&[u8]>) -> Result<ExtendedPayload, ValueError> {
    let raw = match value {
        Some(raw) => raw,
        // all three fields are optional, so the whole value may be absent
        None => return Ok(ExtendedPayload::PasswordModifyRequest(Default::default())),
    };
    let (rem, (user, old, new)) = Sequence::from_ber_and_then(raw, |i| {
        let (i, user) = OptTaggedParser::new(Class::ContextSpecific, Tag(0))
            .parse_ber(i, |_, data| Ok((&b""[..], data.to_vec())))?;
        let (i, old) = OptTaggedParser::new(Class::ContextSpecific, Tag(1))
            .parse_ber(i, |_, data| Ok((&b""[..], data.to_vec())))?;
        let (i, new) = OptTaggedParser::new(Class::ContextSpecific, Tag(2))
            .parse_ber(i, |_, data| Ok((&b""[..], data.to_vec())))?;
        Ok((i, (user, old, new)))
    })
    .map_err(|_: Err<asn1_rs::Error>| ValueError::Malformed)?;
    if !rem.is_empty() {
        return Err(ValueError::Trailing);
    }
    let user_identity = match user {
        Some(u) => Some(String::from_utf8(u).map_err(|_| ValueError::InvalidUtf8)?),
        None => None,
    };
    Ok(ExtendedPayload::PasswordModifyRequest(
        PasswordModifyRequest {
            user_identity,
            old_password: old,
            new_password: new,
        },
    ))
}

fn decode_password_modify_response(value: Option<&[u8]>) -> Result<ExtendedPayload, ValueError> {
    let raw = match value {
        Some(raw) => raw,
        None => return Ok(ExtendedPayload::PasswordModifyResponse(Default::default())),
    };
    let (rem, gen) = Sequence::from_ber_and_then(raw, |i| {
        OptTaggedParser::new(Class::ContextSpecific, Tag(0))
            .parse_ber(i, |_, data| Ok((&b""[..], data.to_vec())))
    })
    .map_err(|_: Err<asn1_rs::Error>| ValueError::Malformed)?;
    if !rem.is_empty() {
        return Err(ValueError::Trailing);
    }
    Ok(ExtendedPayload::PasswordModifyResponse(
        PasswordModifyResponse { gen_password: gen },
    ))
}

fn decode_who_am_i_request(value: Option<&[u8]>) -> Result<ExtendedPayload, ValueError> {
    match value {
        Some(_) => Err(ValueError::UnexpectedValue),
        None => Ok(ExtendedPayload::WhoAmIRequest),
    }
}

fn decode_who_am_i_response(value: Option<&[u8]>) -> Result<ExtendedPayload, ValueError> {
    let authz_id = match value {
        Some(raw) => std::str::from_utf8(raw)
            .map_err(|_| ValueError::InvalidUtf8)?
            .to_owned(),
        None => String::new(),
    };
    Ok(ExtendedPayload::WhoAmIResponse(WhoAmIResponse { authz_id }))
}

fn decode_disconnection_notice(value: Option<&[u8]>) -> Result<ExtendedPayload, ValueError> {
    match value {
        Some(_) => Err(ValueError::UnexpectedValue),
        None => Ok(ExtendedPayload::DisconnectionNotice),
    }
}

/// Decoder for a control value.
pub type ControlValueDecoder = fn(&[u8]) -> Result<ControlPayload, ValueError>;
/// Decoder for an extended request or response value (absent values are
/// meaningful for several operations, hence the `Option`).
pub type ExtendedValueDecoder = fn(Option<&[u8]>) -> Result<ExtendedPayload, ValueError>;

/// Request/response codec pair for one extended operation OID.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExtendedCodec {
    pub decode_request: Option<ExtendedValueDecoder>,
    pub decode_response: Option<ExtendedValueDecoder>,
}

/// Process-wide mapping from OID to value codecs.
///
/// Registration happens at initialization; afterwards the registry is shared
/// by immutable reference and lookups are read-only.
#[derive(Debug, Default)]
pub struct Registry {
    controls: HashMap<String, ControlValueDecoder>,
    extended: HashMap<String, ExtendedCodec>,
    unsolicited: HashMap<String, ExtendedValueDecoder>,
}

impl Registry {
    /// An empty registry: every control and extended operation stays opaque.
    pub fn empty() -> Self {
        Registry::default()
    }

    /// A registry loaded with the codecs shipped by this crate.
    pub fn with_defaults() -> Self {
        let mut r = Registry::default();
        r.register_control(PAGED_RESULTS_OID, decode_paged_results);
        r.register_control(PROXIED_AUTHORIZATION_OID, decode_proxied_authorization);
        r.register_control(MANAGE_DSA_IT_OID, decode_manage_dsa_it);
        r.register_control(SORT_REQUEST_OID, decode_sort_request);
        r.register_control(SORT_RESPONSE_OID, decode_sort_response);
        r.register_extended(
            PASSWORD_MODIFY_OID,
            ExtendedCodec {
                decode_request: Some(decode_password_modify_request),
                decode_response: Some(decode_password_modify_response),
            },
        );
        r.register_extended(
            WHO_AM_I_OID,
            ExtendedCodec {
                decode_request: Some(decode_who_am_i_request),
                decode_response: Some(decode_who_am_i_response),
            },
        );
        r.register_extended(
            START_TLS_OID,
            ExtendedCodec {
                decode_request: Some(decode_start_tls_request),
                decode_response: Some(decode_start_tls_response),
            },
        );
        r.register_extended(
            CANCEL_OID,
            ExtendedCodec {
                decode_request: Some(decode_cancel_request),
                decode_response: None,
            },
        );
        r.register_unsolicited(NOTICE_OF_DISCONNECTION_OID, decode_disconnection_notice);
        r
    }

    /// Register (or replace) the codec for a control OID.
    pub fn register_control(&mut self, oid: &str, decoder: ControlValueDecoder) {
        self.controls.insert(oid.to_owned(), decoder);
    }

    /// Register (or replace) the codec pair for an extended operation OID.
    pub fn register_extended(&mut self, oid: &str, codec: ExtendedCodec) {
        self.extended.insert(oid.to_owned(), codec);
    }

    /// Register (or replace) the codec for an unsolicited notification OID.
    pub fn register_unsolicited(&mut self, oid: &str, decoder: ExtendedValueDecoder) {
        self.unsolicited.insert(oid.to_owned(), decoder);
    }

    pub(crate) fn decode_control_value(
        &self,
        oid: &str,
        raw: &[u8],
    ) -> Option<Result<ControlPayload, ValueError>> {
        self.controls.get(oid).map(|dec| dec(raw))
    }

    pub(crate) fn decode_extended_request(
        &self,
        oid: &str,
        value: Option<&[u8]>,
    ) -> Option<Result<ExtendedPayload, ValueError>> {
        self.extended
            .get(oid)
            .and_then(|codec| codec.decode_request)
            .map(|dec| dec(value))
    }

    pub(crate) fn decode_extended_response(
        &self,
        oid: &str,
        value: Option<&[u8]>,
        unsolicited: bool,
    ) -> Option<Result<ExtendedPayload, ValueError>> {
        if unsolicited {
            if let Some(dec) = self.unsolicited.get(oid) {
                return Some(dec(value));
            }
        }
        self.extended
            .get(oid)
            .and_then(|codec| codec.decode_response)
            .map(|dec| dec(value))
    }
}

/// The lazily built registry shared by decoders that do not supply their own.
pub(crate) fn default_registry() -> Arc<Registry> {
    static SHARED: OnceLock<Arc<Registry>> = OnceLock::new();
    SHARED
        .get_or_init(|| Arc::new(Registry::with_defaults()))
        .clone()
}
