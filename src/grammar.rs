//! LDAP message grammar: transition table and reducers
//!
//! The grammar is the `(state, tag octet)` relation of RFC 4511, written as
//! one match per transition. Each transition names the follow-up state, the
//! expected element shape and the reducer to run; constructed transitions
//! also carry the close action for the frame they open. Reducers are a flat
//! enum dispatched in [`apply`], so the whole automaton is data plus two
//! `match` expressions.
//!
//! The filter sub-grammar lives in [`crate::filter_grammar`]; lookups fall
//! through to it for the states it owns.

use crate::ber;
use crate::controls::Control;
use crate::decoder::{AttrScratch, Close, Container, ControlScratch, OpScratch, State};
use crate::decoder::{
    AddScratch, BindScratch, CompareScratch, EntryScratch, ExtendedScratch, IntermediateScratch,
    ModDnScratch, ModifyScratch, ResultScratch, SearchScratch,
};
use crate::error::{DecodeError, ResponseCarryingError};
use crate::extensions::Registry;
use crate::filter::{Attribute, AttributeValue, PartialAttribute};
use crate::filter_grammar;
use crate::ldap::{
    AddRequest, AuthenticationChoice, BindRequest, BindResponse, Change, CompareRequest,
    DerefAliases, ExtendedRequest, ExtendedResponse, IntermediateResponse, LdapDn, LdapMessage,
    LdapOid, LdapResult, LdapString, MessageId, ModDnRequest, ModifyOperation, ModifyRequest,
    ProtocolOp, RelativeLdapDn, ResultCode, SaslCredentials, SearchRequest, SearchResultEntry,
    SearchScope, MAX_INT,
};

/// Expected element shape for a transition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Shape {
    Primitive,
    Constructed(Close),
}

/// One entry of the transition table.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Transition {
    pub(crate) next: State,
    pub(crate) shape: Shape,
    pub(crate) action: Action,
}

const fn prim(next: State, action: Action) -> Transition {
    Transition {
        next,
        shape: Shape::Primitive,
        action,
    }
}

const fn cons(next: State, close: Close, action: Action) -> Transition {
    Transition {
        next,
        shape: Shape::Constructed(close),
        action,
    }
}

/// Reducer kinds; one per grammar production that stores data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Action {
    NoOp,
    InitMessage,
    ReadMessageId,
    InitOp,
    ReadUnbind,
    ReadDelRequest,
    ReadAbandon,
    // bind request
    ReadBindVersion,
    ReadBindName,
    ReadSimpleCreds,
    ReadSaslMechanism,
    ReadSaslCreds,
    // LDAPResult chain
    ReadResultCode,
    ReadMatchedDn,
    ReadDiagMsg,
    InitReferral,
    ReadReferralUri,
    ReadServerSaslCreds,
    ReadResponseName,
    ReadResponseValue,
    // search request
    ReadSearchBase,
    ReadScope,
    ReadDeref,
    ReadSizeLimit,
    ReadTimeLimit,
    ReadTypesOnly,
    ReadSelector,
    // attributes (entry, add, modify)
    ReadEntryName,
    InitAttr,
    ReadAttrType,
    ReadAttrValue,
    // modify request
    ReadModifyObject,
    InitChange,
    ReadChangeOp,
    // add request
    ReadAddEntry,
    // modify dn request
    ReadModDnEntry,
    ReadModDnNewRdn,
    ReadModDnDeleteOld,
    ReadModDnNewSuperior,
    // compare request
    ReadCompareEntry,
    ReadCompareAvaDesc,
    ReadCompareAvaValue,
    // search result reference
    ReadReferenceUri,
    // extended / intermediate
    ReadExtReqName,
    ReadExtReqValue,
    ReadIntermediateName,
    ReadIntermediateValue,
    // controls
    InitControls,
    InitControl,
    ReadControlOid,
    ReadControlCrit,
    ReadControlValue,
    // filter sub-grammar
    InitFilterAnd,
    InitFilterOr,
    InitFilterNot,
    InitFilterAva,
    ReadPresent,
    InitSubstrings,
    ReadSubstrType,
    ReadSubstrInitial,
    ReadSubstrAny,
    ReadSubstrFinal,
    InitExtensible,
    ReadMatchingRule,
    ReadExtRuleType,
    ReadMatchValue,
    ReadDnAttributes,
    ReadFilterAvaDesc,
    ReadFilterAvaValue,
}

// LDAPMessage ::= SEQUENCE {
//      messageID       MessageID,
//      protocolOp      CHOICE { ... },
//      controls       [0] Controls OPTIONAL }
/// Look up the transition for `(state, tag)`; `None` is a protocol error.
pub(crate) fn transition(state: State, tag: u8) -> Option<Transition> {
    use State::*;
    let t = match (state, tag) {
        (Start, 0x30) => cons(MsgId, Close::Message, Action::InitMessage),
        (MsgId, 0x02) => prim(OpDispatch, Action::ReadMessageId),
        // protocolOp dispatch on the application tag
        (OpDispatch, 0x60) => cons(BindVersion, Close::Op, Action::InitOp),
        (OpDispatch, 0x61) => cons(ResCode, Close::Op, Action::InitOp),
        (OpDispatch, 0x42) => prim(AwaitControls, Action::ReadUnbind),
        (OpDispatch, 0x63) => cons(SearchBase, Close::Op, Action::InitOp),
        (OpDispatch, 0x64) => cons(EntryName, Close::Op, Action::InitOp),
        (OpDispatch, 0x65) => cons(ResCode, Close::Op, Action::InitOp),
        (OpDispatch, 0x66) => cons(ModifyObject, Close::Op, Action::InitOp),
        (OpDispatch, 0x67) => cons(ResCode, Close::Op, Action::InitOp),
        (OpDispatch, 0x68) => cons(AddEntry, Close::Op, Action::InitOp),
        (OpDispatch, 0x69) => cons(ResCode, Close::Op, Action::InitOp),
        (OpDispatch, 0x4a) => prim(AwaitControls, Action::ReadDelRequest),
        (OpDispatch, 0x6b) => cons(ResCode, Close::Op, Action::InitOp),
        (OpDispatch, 0x6c) => cons(ModDnEntry, Close::Op, Action::InitOp),
        (OpDispatch, 0x6d) => cons(ResCode, Close::Op, Action::InitOp),
        (OpDispatch, 0x6e) => cons(CompareEntry, Close::Op, Action::InitOp),
        (OpDispatch, 0x6f) => cons(ResCode, Close::Op, Action::InitOp),
        (OpDispatch, 0x50) => prim(AwaitControls, Action::ReadAbandon),
        (OpDispatch, 0x73) => cons(ReferenceUri, Close::Op, Action::InitOp),
        (OpDispatch, 0x77) => cons(ExtReqName, Close::Op, Action::InitOp),
        (OpDispatch, 0x78) => cons(ResCode, Close::Op, Action::InitOp),
        (OpDispatch, 0x79) => cons(IntermediateInit, Close::Op, Action::InitOp),
        // BindRequest ::= [APPLICATION 0] SEQUENCE {
        //      version                 INTEGER (1 ..  127),
        //      name                    LDAPDN,
        //      authentication          AuthenticationChoice }
        (BindVersion, 0x02) => prim(BindName, Action::ReadBindVersion),
        (BindName, 0x04) => prim(BindAuth, Action::ReadBindName),
        // AuthenticationChoice ::= CHOICE {
        //      simple                  [0] OCTET STRING,
        //      sasl                    [3] SaslCredentials }
        (BindAuth, 0x80) => prim(BindSimpleDone, Action::ReadSimpleCreds),
        (BindAuth, 0xa3) => cons(SaslMechanism, Close::Sasl, Action::NoOp),
        // SaslCredentials ::= SEQUENCE {
        //      mechanism               LDAPString,
        //      credentials             OCTET STRING OPTIONAL }
        (SaslMechanism, 0x04) => prim(SaslCreds, Action::ReadSaslMechanism),
        (SaslCreds, 0x04) => prim(SaslCredsDone, Action::ReadSaslCreds),
        // LDAPResult ::= SEQUENCE {
        //      resultCode         ENUMERATED { ... },
        //      matchedDN          LDAPDN,
        //      diagnosticMessage  LDAPString,
        //      referral           [3] Referral OPTIONAL }
        (ResCode, 0x0a) => prim(ResultMatchedDn, Action::ReadResultCode),
        (ResultMatchedDn, 0x04) => prim(ResultDiagMsg, Action::ReadMatchedDn),
        (ResultDiagMsg, 0x04) => prim(AfterResult, Action::ReadDiagMsg),
        // Referral ::= SEQUENCE SIZE (1..MAX) OF uri URI
        (AfterResult, 0xa3) => cons(ReferralUri, Close::Referral, Action::InitReferral),
        (ReferralUri, 0x04) => prim(ReferralUri, Action::ReadReferralUri),
        // BindResponse serverSaslCreds [7], ExtendedResponse responseName
        // [10] / responseValue [11]; reducers pin them to the right op
        (AfterResult, 0x87) => prim(BindSaslCredsDone, Action::ReadServerSaslCreds),
        (AfterResult, 0x8a) => prim(ExtRespName, Action::ReadResponseName),
        (AfterResult, 0x8b) => prim(ExtRespValue, Action::ReadResponseValue),
        (ExtRespName, 0x8b) => prim(ExtRespValue, Action::ReadResponseValue),
        // SearchRequest ::= [APPLICATION 3] SEQUENCE {
        //      baseObject, scope, derefAliases, sizeLimit, timeLimit,
        //      typesOnly, filter, attributes }
        (SearchBase, 0x04) => prim(Scope, Action::ReadSearchBase),
        (Scope, 0x0a) => prim(SearchDeref, Action::ReadScope),
        (SearchDeref, 0x0a) => prim(SearchSizeLimit, Action::ReadDeref),
        (SearchSizeLimit, 0x02) => prim(SearchTimeLimit, Action::ReadSizeLimit),
        (SearchTimeLimit, 0x02) => prim(SearchTypesOnly, Action::ReadTimeLimit),
        (SearchTypesOnly, 0x01) => prim(FilterDispatch, Action::ReadTypesOnly),
        // AttributeSelection ::= SEQUENCE OF selector LDAPString
        (SearchAttrs, 0x30) => cons(SearchSelector, Close::AttrSelection, Action::NoOp),
        (SearchSelector, 0x04) => prim(SearchSelector, Action::ReadSelector),
        // SearchResultEntry ::= [APPLICATION 4] SEQUENCE {
        //     objectName      LDAPDN,
        //     attributes      PartialAttributeList }
        (EntryName, 0x04) => prim(EntryAttrs, Action::ReadEntryName),
        (EntryAttrs, 0x30) => cons(AttrList, Close::AttrList, Action::NoOp),
        // PartialAttribute ::= SEQUENCE {
        //      type       AttributeDescription,
        //      vals       SET OF value AttributeValue }
        (AttrList, 0x30) => cons(AttrType, Close::Attr, Action::InitAttr),
        (AttrType, 0x04) => prim(AttrVals, Action::ReadAttrType),
        (AttrVals, 0x31) => cons(AttrValue, Close::Vals, Action::NoOp),
        (AttrValue, 0x04) => prim(AttrValue, Action::ReadAttrValue),
        // ModifyRequest ::= [APPLICATION 6] SEQUENCE {
        //     object          LDAPDN,
        //     changes         SEQUENCE OF change SEQUENCE {
        //          operation       ENUMERATED { add (0), delete (1), replace (2) },
        //          modification    PartialAttribute } }
        (ModifyObject, 0x04) => prim(ModifyChanges, Action::ReadModifyObject),
        (ModifyChanges, 0x30) => cons(ChangeItem, Close::ChangeList, Action::NoOp),
        (ChangeItem, 0x30) => cons(ChangeOp, Close::Change, Action::InitChange),
        (ChangeOp, 0x0a) => prim(ChangeAttrSeq, Action::ReadChangeOp),
        (ChangeAttrSeq, 0x30) => cons(AttrType, Close::Attr, Action::InitAttr),
        // AddRequest ::= [APPLICATION 8] SEQUENCE {
        //     entry           LDAPDN,
        //     attributes      AttributeList }
        (AddEntry, 0x04) => prim(AddAttrs, Action::ReadAddEntry),
        (AddAttrs, 0x30) => cons(AttrList, Close::AttrList, Action::NoOp),
        // ModifyDNRequest ::= [APPLICATION 12] SEQUENCE {
        //     entry, newrdn, deleteoldrdn, newSuperior [0] OPTIONAL }
        (ModDnEntry, 0x04) => prim(ModDnNewRdn, Action::ReadModDnEntry),
        (ModDnNewRdn, 0x04) => prim(ModDnDeleteOld, Action::ReadModDnNewRdn),
        (ModDnDeleteOld, 0x01) => prim(ModDnDone, Action::ReadModDnDeleteOld),
        (ModDnDone, 0x80) => prim(ModDnSuperiorDone, Action::ReadModDnNewSuperior),
        // CompareRequest ::= [APPLICATION 14] SEQUENCE {
        //     entry           LDAPDN,
        //     ava             AttributeValueAssertion }
        (CompareEntry, 0x04) => prim(CompareAva, Action::ReadCompareEntry),
        (CompareAva, 0x30) => cons(CompareAvaDesc, Close::CompareAva, Action::NoOp),
        (CompareAvaDesc, 0x04) => prim(CompareAvaValue, Action::ReadCompareAvaDesc),
        (CompareAvaValue, 0x04) => prim(CompareAvaRead, Action::ReadCompareAvaValue),
        // SearchResultReference ::= [APPLICATION 19] SEQUENCE
        //                                   SIZE (1..MAX) OF uri URI
        (ReferenceUri, 0x04) => prim(ReferenceUri, Action::ReadReferenceUri),
        // ExtendedRequest ::= [APPLICATION 23] SEQUENCE {
        //     requestName      [0] LDAPOID,
        //     requestValue     [1] OCTET STRING OPTIONAL }
        (ExtReqName, 0x80) => prim(ExtReqAfterName, Action::ReadExtReqName),
        (ExtReqAfterName, 0x81) => prim(ExtReqDone, Action::ReadExtReqValue),
        // IntermediateResponse ::= [APPLICATION 25] SEQUENCE {
        //      responseName     [0] LDAPOID OPTIONAL,
        //      responseValue    [1] OCTET STRING OPTIONAL }
        (IntermediateInit, 0x80) => prim(IntermediateName, Action::ReadIntermediateName),
        (IntermediateInit, 0x81) => prim(IntermediateValue, Action::ReadIntermediateValue),
        (IntermediateName, 0x81) => prim(IntermediateValue, Action::ReadIntermediateValue),
        // Controls ::= SEQUENCE OF control Control
        (AwaitControls, 0xa0) => cons(ControlItem, Close::Controls, Action::InitControls),
        // Control ::= SEQUENCE {
        //     controlType             LDAPOID,
        //     criticality             BOOLEAN DEFAULT FALSE,
        //     controlValue            OCTET STRING OPTIONAL }
        (ControlItem, 0x30) => cons(ControlOid, Close::Control, Action::InitControl),
        (ControlOid, 0x04) => prim(ControlCrit, Action::ReadControlOid),
        (ControlCrit, 0x01) => prim(ControlValue, Action::ReadControlCrit),
        (ControlCrit, 0x04) => prim(ControlDone, Action::ReadControlValue),
        (ControlValue, 0x04) => prim(ControlDone, Action::ReadControlValue),
        _ => return filter_grammar::transition(state, tag),
    };
    Some(t)
}

fn state_mismatch() -> DecodeError {
    DecodeError::protocol("internal decoder state mismatch")
}

/// Build a recoverable error carrying a response of the kind matching the
/// operation being decoded.
fn carrying(c: &Container, code: ResultCode, cause: impl Into<String>) -> DecodeError {
    let cause = cause.into();
    let result = LdapResult {
        result_code: code,
        matched_dn: LdapDn::default(),
        diagnostic_message: LdapString(cause.clone()),
        referral: None,
    };
    let response = match c.op_tag {
        0x60 => ProtocolOp::BindResponse(BindResponse {
            result,
            server_sasl_creds: None,
        }),
        0x63 => ProtocolOp::SearchResultDone(result),
        0x66 => ProtocolOp::ModifyResponse(result),
        0x68 => ProtocolOp::AddResponse(result),
        0x4a => ProtocolOp::DelResponse(result),
        0x6c => ProtocolOp::ModDnResponse(result),
        0x6e => ProtocolOp::CompareResponse(result),
        // extended requests and anything without a dedicated response kind
        _ => ProtocolOp::ExtendedResponse(ExtendedResponse {
            result,
            response_name: None,
            response_value: None,
            payload: None,
        }),
    };
    ResponseCarryingError {
        message_id: MessageId(c.message_id),
        response,
        result_code: code,
        cause,
    }
    .into()
}

/// Validate a request DN, mapping failures to a response-carrying error with
/// the suggested result code.
fn check_dn(c: &Container, s: &str, code: ResultCode) -> Result<(), DecodeError> {
    match crate::dn::parse_dn(s) {
        Ok(_) => Ok(()),
        Err(e) => Err(carrying(c, code, e.to_string())),
    }
}

fn bind_mut(c: &mut Container) -> Result<&mut BindScratch, DecodeError> {
    match &mut c.op {
        OpScratch::Bind(b) => Ok(b),
        _ => Err(state_mismatch()),
    }
}

fn result_mut(c: &mut Container) -> Result<&mut ResultScratch, DecodeError> {
    match &mut c.op {
        OpScratch::Result(r) => Ok(r),
        _ => Err(state_mismatch()),
    }
}

fn search_mut(c: &mut Container) -> Result<&mut SearchScratch, DecodeError> {
    match &mut c.op {
        OpScratch::Search(s) => Ok(s),
        _ => Err(state_mismatch()),
    }
}

fn modify_mut(c: &mut Container) -> Result<&mut ModifyScratch, DecodeError> {
    match &mut c.op {
        OpScratch::Modify(m) => Ok(m),
        _ => Err(state_mismatch()),
    }
}

fn moddn_mut(c: &mut Container) -> Result<&mut ModDnScratch, DecodeError> {
    match &mut c.op {
        OpScratch::ModDn(m) => Ok(m),
        _ => Err(state_mismatch()),
    }
}

fn compare_mut(c: &mut Container) -> Result<&mut CompareScratch, DecodeError> {
    match &mut c.op {
        OpScratch::Compare(m) => Ok(m),
        _ => Err(state_mismatch()),
    }
}

/// Run the reducer of a transition. `content` is empty for constructed
/// elements and holds the full value octets for primitive ones.
pub(crate) fn apply(
    c: &mut Container,
    action: Action,
    content: &[u8],
) -> Result<(), DecodeError> {
    match action {
        Action::NoOp | Action::InitMessage => (),
        Action::ReadMessageId => {
            let v = ber::decode_integer(content, 8)?;
            if !(0..=i64::from(MAX_INT)).contains(&v) {
                return Err(DecodeError::protocol("messageID out of range"));
            }
            c.message_id = v as u32;
        }
        Action::InitOp => {
            c.op = match c.op_tag {
                0x60 => OpScratch::Bind(BindScratch::default()),
                0x61 | 0x65 | 0x67 | 0x69 | 0x6b | 0x6d | 0x6f | 0x78 => {
                    OpScratch::Result(ResultScratch::default())
                }
                0x63 => OpScratch::Search(SearchScratch::default()),
                0x64 => OpScratch::Entry(EntryScratch::default()),
                0x66 => OpScratch::Modify(ModifyScratch::default()),
                0x68 => OpScratch::Add(AddScratch::default()),
                0x6c => OpScratch::ModDn(ModDnScratch::default()),
                0x6e => OpScratch::Compare(CompareScratch::default()),
                0x73 => OpScratch::Reference(Vec::new()),
                0x77 => OpScratch::Extended(ExtendedScratch::default()),
                0x79 => OpScratch::Intermediate(IntermediateScratch::default()),
                _ => return Err(state_mismatch()),
            };
        }
        // UnbindRequest ::= [APPLICATION 2] NULL
        Action::ReadUnbind => {
            if !content.is_empty() {
                return Err(DecodeError::protocol("unbind request must be empty"));
            }
            c.op = OpScratch::Done(ProtocolOp::UnbindRequest);
        }
        // DelRequest ::= [APPLICATION 10] LDAPDN
        Action::ReadDelRequest => {
            let s = ber::decode_utf8(content)?;
            check_dn(c, &s, ResultCode::InvalidDNSyntax)?;
            c.op = OpScratch::Done(ProtocolOp::DelRequest(LdapDn(s)));
        }
        // AbandonRequest ::= [APPLICATION 16] MessageID
        Action::ReadAbandon => {
            let v = ber::decode_integer(content, 8)?;
            if !(0..=i64::from(MAX_INT)).contains(&v) {
                return Err(DecodeError::protocol("abandoned message id out of range"));
            }
            c.op = OpScratch::Done(ProtocolOp::AbandonRequest(MessageId(v as u32)));
        }
        Action::ReadBindVersion => {
            let v = ber::decode_integer(content, 4)?;
            if !(1..=127).contains(&v) {
                return Err(carrying(
                    c,
                    ResultCode::ProtocolError,
                    format!("bind version {v} out of range"),
                ));
            }
            bind_mut(c)?.version = v as u8;
        }
        Action::ReadBindName => {
            let s = ber::decode_utf8(content)?;
            check_dn(c, &s, ResultCode::InvalidDNSyntax)?;
            bind_mut(c)?.name = LdapDn(s);
        }
        Action::ReadSimpleCreds => {
            bind_mut(c)?.auth = Some(AuthenticationChoice::Simple(content.to_vec()));
        }
        Action::ReadSaslMechanism => {
            bind_mut(c)?.mechanism = Some(LdapString(ber::decode_utf8(content)?));
        }
        Action::ReadSaslCreds => {
            bind_mut(c)?.sasl_credentials = Some(content.to_vec());
        }
        Action::ReadResultCode => {
            let v = ber::decode_enumerated(content)?;
            if v < 0 {
                return Err(DecodeError::protocol("negative result code"));
            }
            result_mut(c)?.result.result_code = ResultCode(v as u32);
        }
        Action::ReadMatchedDn => {
            result_mut(c)?.result.matched_dn = LdapDn(ber::decode_utf8(content)?);
        }
        Action::ReadDiagMsg => {
            result_mut(c)?.result.diagnostic_message = LdapString(ber::decode_utf8(content)?);
        }
        Action::InitReferral => {
            let r = result_mut(c)?;
            if r.result.referral.is_some() {
                return Err(DecodeError::protocol("duplicate referral"));
            }
            r.result.referral = Some(Vec::new());
        }
        Action::ReadReferralUri => {
            let uri = LdapString(ber::decode_utf8(content)?);
            result_mut(c)?
                .result
                .referral
                .as_mut()
                .ok_or_else(state_mismatch)?
                .push(uri);
        }
        Action::ReadServerSaslCreds => {
            if c.op_tag != 0x61 {
                return Err(DecodeError::protocol(
                    "serverSaslCreds outside a bind response",
                ));
            }
            result_mut(c)?.server_sasl_creds = Some(content.to_vec());
        }
        Action::ReadResponseName => {
            if c.op_tag != 0x78 {
                return Err(DecodeError::protocol(
                    "responseName outside an extended response",
                ));
            }
            let s = ber::decode_utf8(content)?;
            if !ber::is_valid_oid(&s) {
                return Err(DecodeError::Protocol(format!(
                    "invalid responseName OID {s:?}"
                )));
            }
            result_mut(c)?.response_name = Some(LdapOid(s));
        }
        Action::ReadResponseValue => {
            if c.op_tag != 0x78 {
                return Err(DecodeError::protocol(
                    "responseValue outside an extended response",
                ));
            }
            result_mut(c)?.response_value = Some(content.to_vec());
        }
        Action::ReadSearchBase => {
            let s = ber::decode_utf8(content)?;
            check_dn(c, &s, ResultCode::InvalidDNSyntax)?;
            search_mut(c)?.base_object = LdapDn(s);
        }
        Action::ReadScope => {
            let v = ber::decode_enumerated(content)?;
            if !(0..=2).contains(&v) {
                return Err(DecodeError::Protocol(format!("invalid search scope {v}")));
            }
            search_mut(c)?.scope = v as u32;
        }
        Action::ReadDeref => {
            let v = ber::decode_enumerated(content)?;
            if !(0..=3).contains(&v) {
                return Err(DecodeError::Protocol(format!(
                    "invalid derefAliases value {v}"
                )));
            }
            search_mut(c)?.deref_aliases = v as u32;
        }
        Action::ReadSizeLimit => {
            // decoded through the wide path: some deployments exceed maxInt
            let v = ber::decode_integer(content, 8)?;
            if v < 0 {
                return Err(DecodeError::protocol("negative sizeLimit"));
            }
            search_mut(c)?.size_limit = v as u64;
        }
        Action::ReadTimeLimit => {
            let v = ber::decode_integer(content, 8)?;
            if !(0..=i64::from(MAX_INT)).contains(&v) {
                return Err(DecodeError::protocol("timeLimit out of range"));
            }
            search_mut(c)?.time_limit = v as u32;
        }
        Action::ReadTypesOnly => {
            search_mut(c)?.types_only = ber::decode_boolean(content)?;
        }
        Action::ReadSelector => {
            let s = LdapString(ber::decode_utf8(content)?);
            search_mut(c)?.attributes.push(s);
        }
        Action::ReadEntryName => {
            // server-supplied DNs pass through without validation
            let s = ber::decode_utf8(content)?;
            match &mut c.op {
                OpScratch::Entry(e) => e.object_name = LdapDn(s),
                _ => return Err(state_mismatch()),
            }
        }
        Action::InitAttr => {
            c.attr = AttrScratch::default();
        }
        Action::ReadAttrType => {
            let s = ber::decode_utf8(content)?;
            if s.is_empty() {
                match c.op {
                    OpScratch::Add(_) | OpScratch::Modify(_) => {
                        return Err(carrying(
                            c,
                            ResultCode::InvalidAttributeSyntax,
                            "empty attribute description",
                        ));
                    }
                    _ => (),
                }
            }
            c.attr.attr_type = Some(LdapString(s));
        }
        Action::ReadAttrValue => {
            c.attr.attr_vals.push(AttributeValue::from_wire(content));
        }
        Action::ReadModifyObject => {
            let s = ber::decode_utf8(content)?;
            check_dn(c, &s, ResultCode::InvalidDNSyntax)?;
            modify_mut(c)?.object = LdapDn(s);
        }
        Action::InitChange => {
            let m = modify_mut(c)?;
            m.operation = None;
            m.modification = None;
        }
        Action::ReadChangeOp => {
            let v = ber::decode_enumerated(content)?;
            if !(0..=2).contains(&v) {
                return Err(DecodeError::Protocol(format!(
                    "invalid modify operation {v}"
                )));
            }
            modify_mut(c)?.operation = Some(v as u32);
        }
        Action::ReadAddEntry => {
            let s = ber::decode_utf8(content)?;
            check_dn(c, &s, ResultCode::NamingViolation)?;
            match &mut c.op {
                OpScratch::Add(a) => a.entry = LdapDn(s),
                _ => return Err(state_mismatch()),
            }
        }
        Action::ReadModDnEntry => {
            let s = ber::decode_utf8(content)?;
            check_dn(c, &s, ResultCode::InvalidDNSyntax)?;
            moddn_mut(c)?.entry = LdapDn(s);
        }
        Action::ReadModDnNewRdn => {
            let s = ber::decode_utf8(content)?;
            match crate::dn::parse_dn(&s) {
                Ok(dn) if dn.len() == 1 => (),
                Ok(_) => {
                    return Err(carrying(
                        c,
                        ResultCode::InvalidDNSyntax,
                        "newrdn must be a single RDN",
                    ));
                }
                Err(e) => return Err(carrying(c, ResultCode::InvalidDNSyntax, e.to_string())),
            }
            moddn_mut(c)?.new_rdn = RelativeLdapDn(s);
        }
        Action::ReadModDnDeleteOld => {
            moddn_mut(c)?.delete_old_rdn = ber::decode_boolean(content)?;
        }
        Action::ReadModDnNewSuperior => {
            let s = ber::decode_utf8(content)?;
            if s.is_empty() {
                if moddn_mut(c)?.delete_old_rdn {
                    return Err(carrying(
                        c,
                        ResultCode::InvalidDNSyntax,
                        "empty newSuperior with deleteoldrdn set",
                    ));
                }
                // empty superior means "keep the current parent"
                log::warn!("empty newSuperior on a ModifyDN request, keeping current parent");
            } else {
                check_dn(c, &s, ResultCode::InvalidDNSyntax)?;
            }
            moddn_mut(c)?.new_superior = Some(LdapDn(s));
        }
        Action::ReadCompareEntry => {
            let s = ber::decode_utf8(content)?;
            check_dn(c, &s, ResultCode::InvalidDNSyntax)?;
            compare_mut(c)?.entry = LdapDn(s);
        }
        Action::ReadCompareAvaDesc => {
            let s = ber::decode_utf8(content)?;
            if s.is_empty() {
                return Err(carrying(
                    c,
                    ResultCode::InvalidAttributeSyntax,
                    "empty attribute description",
                ));
            }
            compare_mut(c)?.attribute_desc = Some(LdapString(s));
        }
        Action::ReadCompareAvaValue => {
            compare_mut(c)?.assertion_value = Some(content.to_vec());
        }
        Action::ReadReferenceUri => {
            let uri = LdapString(ber::decode_utf8(content)?);
            match &mut c.op {
                OpScratch::Reference(uris) => uris.push(uri),
                _ => return Err(state_mismatch()),
            }
        }
        Action::ReadExtReqName => {
            let s = ber::decode_utf8(content)?;
            if !ber::is_valid_oid(&s) {
                return Err(carrying(
                    c,
                    ResultCode::ProtocolError,
                    format!("invalid extended request name {s:?}"),
                ));
            }
            match &mut c.op {
                OpScratch::Extended(e) => e.request_name = LdapOid(s),
                _ => return Err(state_mismatch()),
            }
        }
        Action::ReadExtReqValue => match &mut c.op {
            OpScratch::Extended(e) => e.request_value = Some(content.to_vec()),
            _ => return Err(state_mismatch()),
        },
        Action::ReadIntermediateName => {
            let s = ber::decode_utf8(content)?;
            if !ber::is_valid_oid(&s) {
                return Err(DecodeError::Protocol(format!(
                    "invalid intermediate response name {s:?}"
                )));
            }
            match &mut c.op {
                OpScratch::Intermediate(i) => i.response_name = Some(LdapOid(s)),
                _ => return Err(state_mismatch()),
            }
        }
        Action::ReadIntermediateValue => match &mut c.op {
            OpScratch::Intermediate(i) => i.response_value = Some(content.to_vec()),
            _ => return Err(state_mismatch()),
        },
        Action::InitControls => {
            c.controls = Some(Vec::new());
        }
        Action::InitControl => {
            c.control = ControlScratch::default();
        }
        Action::ReadControlOid => {
            let s = ber::decode_utf8(content)?;
            if !ber::is_valid_oid(&s) {
                return Err(DecodeError::Protocol(format!("invalid control OID {s:?}")));
            }
            c.control.oid = Some(LdapOid(s));
        }
        Action::ReadControlCrit => {
            c.control.criticality = ber::decode_boolean(content)?;
        }
        Action::ReadControlValue => {
            c.control.value = Some(content.to_vec());
        }
        // filter sub-grammar reducers
        Action::InitFilterAnd
        | Action::InitFilterOr
        | Action::InitFilterNot
        | Action::InitFilterAva
        | Action::ReadPresent
        | Action::InitSubstrings
        | Action::ReadSubstrType
        | Action::ReadSubstrInitial
        | Action::ReadSubstrAny
        | Action::ReadSubstrFinal
        | Action::InitExtensible
        | Action::ReadMatchingRule
        | Action::ReadExtRuleType
        | Action::ReadMatchValue
        | Action::ReadDnAttributes
        | Action::ReadFilterAvaDesc
        | Action::ReadFilterAvaValue => filter_grammar::apply(c, action, content)?,
    }
    Ok(())
}

/// Run a frame close action; `Some` is the finished message.
pub(crate) fn run_close(
    c: &mut Container,
    close: Close,
    registry: &Registry,
) -> Result<Option<LdapMessage>, DecodeError> {
    match close {
        Close::Message => return finish_message(c, registry).map(Some),
        Close::Op => end_op(c)?,
        Close::Sasl => {
            let mechanism = bind_mut(c)?.mechanism.take();
            match mechanism {
                None => {
                    return Err(carrying(
                        c,
                        ResultCode::InvalidCredentials,
                        "zero-length SASL credentials",
                    ));
                }
                Some(mechanism) => {
                    let b = bind_mut(c)?;
                    let credentials = b.sasl_credentials.take();
                    b.auth = Some(AuthenticationChoice::Sasl(SaslCredentials {
                        mechanism,
                        credentials,
                    }));
                }
            }
            c.state = State::BindAuthDone;
        }
        Close::Referral => {
            let r = result_mut(c)?;
            match &r.result.referral {
                Some(uris) if !uris.is_empty() => (),
                _ => return Err(DecodeError::protocol("referral without any URI")),
            }
            c.state = State::AfterResult;
        }
        Close::AttrSelection => {
            c.state = State::SearchAttrsDone;
        }
        Close::AttrList => {
            c.state = State::AttrListDone;
        }
        Close::Attr => {
            if c.state != State::AttrValsDone {
                return Err(DecodeError::protocol("attribute without a values SET"));
            }
            let attr = std::mem::take(&mut c.attr);
            let attr_type = attr.attr_type.ok_or_else(state_mismatch)?;
            let attr_vals = attr.attr_vals;
            if matches!(c.op, OpScratch::Add(_)) && attr_vals.is_empty() {
                return Err(carrying(
                    c,
                    ResultCode::InvalidAttributeSyntax,
                    "attribute without any value",
                ));
            }
            match &mut c.op {
                OpScratch::Entry(e) => {
                    e.attributes.push(PartialAttribute {
                        attr_type,
                        attr_vals,
                    });
                    c.state = State::AttrList;
                }
                OpScratch::Add(a) => {
                    a.attributes.push(Attribute {
                        attr_type,
                        attr_vals,
                    });
                    c.state = State::AttrList;
                }
                OpScratch::Modify(m) => {
                    m.modification = Some(PartialAttribute {
                        attr_type,
                        attr_vals,
                    });
                    c.state = State::ChangeAttrDone;
                }
                _ => return Err(state_mismatch()),
            }
        }
        Close::Vals => {
            c.state = State::AttrValsDone;
        }
        Close::ChangeList => {
            c.state = State::ChangesDone;
        }
        Close::Change => {
            let m = modify_mut(c)?;
            let operation = m.operation.take();
            let modification = m.modification.take();
            match (operation, modification) {
                (Some(op), Some(modification)) => m.changes.push(Change {
                    operation: ModifyOperation(op),
                    modification,
                }),
                _ => return Err(DecodeError::protocol("incomplete modify change")),
            }
            c.state = State::ChangeItem;
        }
        Close::CompareAva => {
            if c.state != State::CompareAvaRead {
                return Err(DecodeError::protocol(
                    "truncated attribute value assertion",
                ));
            }
            c.state = State::CompareDone;
        }
        Close::Controls => {
            c.state = State::ControlsDone;
        }
        Close::Control => {
            let ctl = std::mem::take(&mut c.control);
            let oid = ctl
                .oid
                .ok_or_else(|| DecodeError::protocol("control without a controlType"))?;
            let mut payload = None;
            if let Some(raw) = ctl.value.as_deref() {
                if let Some(decoded) = registry.decode_control_value(&oid.0, raw) {
                    match decoded {
                        Ok(p) => payload = Some(p),
                        Err(e) => {
                            return Err(DecodeError::Protocol(format!(
                                "malformed {} control value: {e}",
                                oid.0
                            )));
                        }
                    }
                }
            }
            c.controls
                .as_mut()
                .ok_or_else(state_mismatch)?
                .push(Control {
                    oid,
                    criticality: ctl.criticality,
                    value: ctl.value,
                    payload,
                });
            c.state = State::ControlItem;
        }
        Close::FilterComposite
        | Close::FilterAva(_)
        | Close::FilterSubstrings
        | Close::SubstrSeq
        | Close::FilterExtensible => filter_grammar::run_close(c, close)?,
    }
    Ok(None)
}

fn op_name(tag: u8) -> &'static str {
    match tag {
        0x60 => "bind request",
        0x61 => "bind response",
        0x63 => "search request",
        0x64 => "search result entry",
        0x65 => "search result done",
        0x66 => "modify request",
        0x67 => "modify response",
        0x68 => "add request",
        0x69 => "add response",
        0x6b => "del response",
        0x6c => "modify dn request",
        0x6d => "modify dn response",
        0x6e => "compare request",
        0x6f => "compare response",
        0x73 => "search result reference",
        0x77 => "extended request",
        0x78 => "extended response",
        0x79 => "intermediate response",
        _ => "operation",
    }
}

/// Check that the operation frame closed in a legal terminal state.
fn end_op(c: &mut Container) -> Result<(), DecodeError> {
    use State::*;
    let ok = match c.op_tag {
        0x60 => matches!(c.state, BindSimpleDone | BindAuthDone),
        0x61 => matches!(c.state, AfterResult | BindSaslCredsDone),
        0x65 | 0x67 | 0x69 | 0x6b | 0x6d | 0x6f => matches!(c.state, AfterResult),
        0x78 => matches!(c.state, AfterResult | ExtRespName | ExtRespValue),
        0x63 => matches!(c.state, SearchAttrsDone),
        0x64 | 0x68 => matches!(c.state, AttrListDone),
        0x66 => matches!(c.state, ChangesDone),
        0x6c => matches!(c.state, ModDnDone | ModDnSuperiorDone),
        0x6e => matches!(c.state, CompareDone),
        0x73 => match &c.op {
            OpScratch::Reference(uris) => !uris.is_empty(),
            _ => false,
        },
        0x77 => matches!(c.state, ExtReqAfterName | ExtReqDone),
        0x79 => matches!(c.state, IntermediateInit | IntermediateName | IntermediateValue),
        _ => false,
    };
    if !ok {
        return Err(DecodeError::Protocol(format!(
            "truncated {}",
            op_name(c.op_tag)
        )));
    }
    c.state = AwaitControls;
    Ok(())
}

/// Assemble the finished [`LdapMessage`] once the outer frame closes.
fn finish_message(
    c: &mut Container,
    registry: &Registry,
) -> Result<LdapMessage, DecodeError> {
    if !matches!(c.state, State::AwaitControls | State::ControlsDone) {
        return Err(DecodeError::protocol("truncated LDAP message"));
    }
    let op_tag = c.op_tag;
    let message_id = c.message_id;
    let protocol_op = match std::mem::take(&mut c.op) {
        OpScratch::Done(op) => op,
        OpScratch::Bind(b) => ProtocolOp::BindRequest(BindRequest {
            version: b.version,
            name: b.name,
            authentication: b.auth.ok_or_else(state_mismatch)?,
        }),
        OpScratch::Result(r) => result_op(r, op_tag, message_id, registry)?,
        OpScratch::Search(s) => ProtocolOp::SearchRequest(SearchRequest {
            base_object: s.base_object,
            scope: SearchScope(s.scope),
            deref_aliases: DerefAliases(s.deref_aliases),
            size_limit: s.size_limit,
            time_limit: s.time_limit,
            types_only: s.types_only,
            filter: s.filter.ok_or_else(state_mismatch)?,
            attributes: s.attributes,
        }),
        OpScratch::Entry(e) => ProtocolOp::SearchResultEntry(SearchResultEntry {
            object_name: e.object_name,
            attributes: e.attributes,
        }),
        OpScratch::Modify(m) => ProtocolOp::ModifyRequest(ModifyRequest {
            object: m.object,
            changes: m.changes,
        }),
        OpScratch::Add(a) => ProtocolOp::AddRequest(AddRequest {
            entry: a.entry,
            attributes: a.attributes,
        }),
        OpScratch::ModDn(m) => ProtocolOp::ModDnRequest(ModDnRequest {
            entry: m.entry,
            new_rdn: m.new_rdn,
            delete_old_rdn: m.delete_old_rdn,
            new_superior: m.new_superior,
        }),
        OpScratch::Compare(m) => ProtocolOp::CompareRequest(CompareRequest {
            entry: m.entry,
            ava: crate::filter::AttributeValueAssertion {
                attribute_desc: m.attribute_desc.ok_or_else(state_mismatch)?,
                assertion_value: m.assertion_value.ok_or_else(state_mismatch)?,
            },
        }),
        OpScratch::Reference(uris) => ProtocolOp::SearchResultReference(uris),
        OpScratch::Extended(e) => {
            let payload =
                match registry.decode_extended_request(&e.request_name.0, e.request_value.as_deref())
                {
                    Some(Ok(p)) => Some(p),
                    Some(Err(err)) => {
                        return Err(carrying(
                            c,
                            ResultCode::ProtocolError,
                            format!("malformed {} request value: {err}", e.request_name.0),
                        ));
                    }
                    None => None,
                };
            ProtocolOp::ExtendedRequest(ExtendedRequest {
                request_name: e.request_name,
                request_value: e.request_value,
                payload,
            })
        }
        OpScratch::Intermediate(i) => ProtocolOp::IntermediateResponse(IntermediateResponse {
            response_name: i.response_name,
            response_value: i.response_value,
        }),
        OpScratch::None => return Err(state_mismatch()),
    };
    Ok(LdapMessage {
        message_id: MessageId(message_id),
        protocol_op,
        controls: c.controls.take(),
    })
}

fn result_op(
    r: ResultScratch,
    op_tag: u8,
    message_id: u32,
    registry: &Registry,
) -> Result<ProtocolOp, DecodeError> {
    let op = match op_tag {
        0x61 => ProtocolOp::BindResponse(BindResponse {
            result: r.result,
            server_sasl_creds: r.server_sasl_creds,
        }),
        0x65 => ProtocolOp::SearchResultDone(r.result),
        0x67 => ProtocolOp::ModifyResponse(r.result),
        0x69 => ProtocolOp::AddResponse(r.result),
        0x6b => ProtocolOp::DelResponse(r.result),
        0x6d => ProtocolOp::ModDnResponse(r.result),
        0x6f => ProtocolOp::CompareResponse(r.result),
        0x78 => {
            let unsolicited = message_id == 0;
            let payload = match r.response_name.as_ref().and_then(|name| {
                registry.decode_extended_response(&name.0, r.response_value.as_deref(), unsolicited)
            }) {
                Some(Ok(p)) => Some(p),
                Some(Err(e)) => {
                    return Err(DecodeError::Protocol(format!(
                        "malformed extended response value: {e}"
                    )));
                }
                None => None,
            };
            ProtocolOp::ExtendedResponse(ExtendedResponse {
                result: r.result,
                response_name: r.response_name,
                response_value: r.response_value,
                payload,
            })
        }
        _ => return Err(state_mismatch()),
    };
    Ok(op)
}
