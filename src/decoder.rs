//! Streaming LDAP message decoder
//!
//! The decoder is a pushdown automaton over TLVs. Each step peeks one tag
//! octet, looks up the `(state, tag)` transition, reads the TLV and runs its
//! reducer; constructed elements push a frame carrying their declared length
//! and a close action. Every consumed TLV is charged to its parent frame and
//! frames whose consumed count reaches the declared length are closed in
//! cascade, which is where lists end, filters fold and the finished message
//! is emitted.
//!
//! Input arrives in arbitrary chunks: whenever the next TLV is not fully
//! buffered, `decode` returns `Ok(None)` and resumes at the same byte
//! position on the next call. Reducers only ever run on complete values.

use std::sync::Arc;

use bytes::{Buf, BytesMut};

use crate::ber::{self, BerError};
use crate::controls::Control;
use crate::error::DecodeError;
use crate::extensions::{default_registry, Registry};
use crate::filter::{AttributeValue, Filter, PartialAttribute, Substring};
use crate::grammar::{self, Shape};
use crate::ldap::{
    AuthenticationChoice, Change, LdapDn, LdapMessage, LdapOid, LdapResult, LdapString,
    ProtocolOp, RelativeLdapDn,
};

/// Decoder states, one per position in the LDAP message grammar.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum State {
    Start,
    MsgId,
    OpDispatch,
    // bind request
    BindVersion,
    BindName,
    BindAuth,
    BindSimpleDone,
    SaslMechanism,
    SaslCreds,
    SaslCredsDone,
    BindAuthDone,
    // shared LDAPResult chain
    ResCode,
    ResultMatchedDn,
    ResultDiagMsg,
    AfterResult,
    ReferralUri,
    BindSaslCredsDone,
    ExtRespName,
    ExtRespValue,
    // search request
    SearchBase,
    Scope,
    SearchDeref,
    SearchSizeLimit,
    SearchTimeLimit,
    SearchTypesOnly,
    // filter sub-grammar
    FilterDispatch,
    FilterAvaDesc,
    FilterAvaValue,
    FilterAvaDone,
    SubstrType,
    SubstrSeq,
    SubstrPart,
    SubstrDone,
    ExtensibleInit,
    ExtensibleAfterRule,
    ExtensibleAfterType,
    ExtensibleAfterValue,
    ExtensibleDone,
    SearchAttrs,
    SearchSelector,
    SearchAttrsDone,
    // search result entry / add request attributes
    EntryName,
    EntryAttrs,
    AttrList,
    AttrType,
    AttrVals,
    AttrValue,
    AttrValsDone,
    AttrListDone,
    // modify request
    ModifyObject,
    ModifyChanges,
    ChangeItem,
    ChangeOp,
    ChangeAttrSeq,
    ChangeAttrDone,
    ChangesDone,
    // add request
    AddEntry,
    AddAttrs,
    // modify dn request
    ModDnEntry,
    ModDnNewRdn,
    ModDnDeleteOld,
    ModDnDone,
    ModDnSuperiorDone,
    // compare request
    CompareEntry,
    CompareAva,
    CompareAvaDesc,
    CompareAvaValue,
    CompareAvaRead,
    CompareDone,
    // search result reference
    ReferenceUri,
    // extended request
    ExtReqName,
    ExtReqAfterName,
    ExtReqDone,
    // intermediate response
    IntermediateInit,
    IntermediateName,
    IntermediateValue,
    // controls
    AwaitControls,
    ControlItem,
    ControlOid,
    ControlCrit,
    ControlValue,
    ControlDone,
    ControlsDone,
}

/// Action run when a constructed frame has consumed its declared length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Close {
    Message,
    Op,
    Sasl,
    Referral,
    AttrSelection,
    AttrList,
    Attr,
    Vals,
    ChangeList,
    Change,
    CompareAva,
    Controls,
    Control,
    FilterComposite,
    FilterAva(AvaKind),
    FilterSubstrings,
    SubstrSeq,
    FilterExtensible,
}

/// The four filter alternatives sharing the AttributeValueAssertion layout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AvaKind {
    Equality,
    GreaterOrEqual,
    LessOrEqual,
    Approx,
}

/// One TLV frame: declared content length, octets consumed so far, and the
/// action to run when they meet.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Frame {
    pub(crate) expected: usize,
    pub(crate) consumed: usize,
    pub(crate) close: Close,
}

#[derive(Debug, Default)]
pub(crate) struct BindScratch {
    pub(crate) version: u8,
    pub(crate) name: LdapDn,
    pub(crate) auth: Option<AuthenticationChoice>,
    pub(crate) mechanism: Option<LdapString>,
    pub(crate) sasl_credentials: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub(crate) struct ResultScratch {
    pub(crate) result: LdapResult,
    pub(crate) server_sasl_creds: Option<Vec<u8>>,
    pub(crate) response_name: Option<LdapOid>,
    pub(crate) response_value: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub(crate) struct SearchScratch {
    pub(crate) base_object: LdapDn,
    pub(crate) scope: u32,
    pub(crate) deref_aliases: u32,
    pub(crate) size_limit: u64,
    pub(crate) time_limit: u32,
    pub(crate) types_only: bool,
    pub(crate) filter: Option<Filter>,
    pub(crate) attributes: Vec<LdapString>,
}

#[derive(Debug, Default)]
pub(crate) struct EntryScratch {
    pub(crate) object_name: LdapDn,
    pub(crate) attributes: Vec<PartialAttribute>,
}

#[derive(Debug, Default)]
pub(crate) struct ModifyScratch {
    pub(crate) object: LdapDn,
    pub(crate) changes: Vec<Change>,
    pub(crate) operation: Option<u32>,
    pub(crate) modification: Option<PartialAttribute>,
}

#[derive(Debug, Default)]
pub(crate) struct AddScratch {
    pub(crate) entry: LdapDn,
    pub(crate) attributes: Vec<crate::filter::Attribute>,
}

#[derive(Debug, Default)]
pub(crate) struct ModDnScratch {
    pub(crate) entry: LdapDn,
    pub(crate) new_rdn: RelativeLdapDn,
    pub(crate) delete_old_rdn: bool,
    pub(crate) new_superior: Option<LdapDn>,
}

#[derive(Debug, Default)]
pub(crate) struct CompareScratch {
    pub(crate) entry: LdapDn,
    pub(crate) attribute_desc: Option<LdapString>,
    pub(crate) assertion_value: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub(crate) struct ExtendedScratch {
    pub(crate) request_name: LdapOid,
    pub(crate) request_value: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub(crate) struct IntermediateScratch {
    pub(crate) response_name: Option<LdapOid>,
    pub(crate) response_value: Option<Vec<u8>>,
}

/// Partial data for the operation being decoded.
#[derive(Debug, Default)]
pub(crate) enum OpScratch {
    #[default]
    None,
    Bind(BindScratch),
    Result(ResultScratch),
    Search(SearchScratch),
    Entry(EntryScratch),
    Modify(ModifyScratch),
    Add(AddScratch),
    ModDn(ModDnScratch),
    Compare(CompareScratch),
    Reference(Vec<LdapString>),
    Extended(ExtendedScratch),
    Intermediate(IntermediateScratch),
    /// Primitive operations complete in one reducer.
    Done(ProtocolOp),
}

#[derive(Debug, Default)]
pub(crate) struct AttrScratch {
    pub(crate) attr_type: Option<LdapString>,
    pub(crate) attr_vals: Vec<AttributeValue>,
}

#[derive(Debug, Default)]
pub(crate) struct ControlScratch {
    pub(crate) oid: Option<LdapOid>,
    pub(crate) criticality: bool,
    pub(crate) value: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub(crate) struct AvaScratch {
    pub(crate) attribute_desc: Option<LdapString>,
    pub(crate) assertion_value: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub(crate) struct SubstringScratch {
    pub(crate) filter_type: Option<LdapString>,
    pub(crate) parts: Vec<Substring>,
    pub(crate) seen_final: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ExtensibleScratch {
    pub(crate) matching_rule: Option<LdapString>,
    pub(crate) rule_type: Option<LdapString>,
    pub(crate) assertion_value: Option<Vec<u8>>,
    pub(crate) dn_attributes: bool,
}

/// A composite filter whose children are still being decoded.
#[derive(Debug)]
pub(crate) enum PendingFilter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Vec<Filter>),
}

#[derive(Debug, Default)]
pub(crate) struct FilterScratch {
    /// Stack of in-progress composite filters, innermost last.
    pub(crate) pending: Vec<PendingFilter>,
    pub(crate) ava: AvaScratch,
    pub(crate) substring: SubstringScratch,
    pub(crate) extensible: ExtensibleScratch,
}

/// Everything threaded through one message decode: automaton state, TLV
/// frames and the message under construction.
#[derive(Debug)]
pub(crate) struct Container {
    pub(crate) state: State,
    pub(crate) frames: Vec<Frame>,
    pub(crate) message_id: u32,
    pub(crate) op_tag: u8,
    pub(crate) op: OpScratch,
    pub(crate) controls: Option<Vec<Control>>,
    pub(crate) control: ControlScratch,
    pub(crate) attr: AttrScratch,
    pub(crate) filter: FilterScratch,
    /// Full size of the current PDU, known once its header is read.
    pub(crate) pdu_total: usize,
}

impl Container {
    fn new() -> Self {
        Container {
            state: State::Start,
            frames: Vec::new(),
            message_id: 0,
            op_tag: 0,
            op: OpScratch::None,
            controls: None,
            control: ControlScratch::default(),
            attr: AttrScratch::default(),
            filter: FilterScratch::default(),
            pdu_total: 0,
        }
    }
}

enum Step {
    NeedMore,
    Continue,
    Done(LdapMessage),
}

/// Streaming decoder turning a byte stream into [`LdapMessage`]s.
///
/// Feed-style API: each `decode` call appends the input to an internal buffer
/// and yields at most one message; call it again with an empty slice to drain
/// further buffered PDUs.
///
/// ```rust
/// use ldap_codec::MessageDecoder;
/// use ldap_codec::ldap::{MessageId, ProtocolOp};
///
/// let mut decoder = MessageDecoder::new();
/// // abandonRequest(2) in a message with id 3
/// let pdu = [0x30, 0x06, 0x02, 0x01, 0x03, 0x50, 0x01, 0x02];
/// let msg = decoder.decode(&pdu).expect("decoding failed").expect("message is complete");
/// assert_eq!(msg.message_id, MessageId(3));
/// assert!(matches!(msg.protocol_op, ProtocolOp::AbandonRequest(MessageId(2))));
/// ```
#[derive(Debug)]
pub struct MessageDecoder {
    buf: BytesMut,
    pos: usize,
    container: Container,
    registry: Arc<Registry>,
    /// Octets of a recoverably failed PDU still to discard.
    skip: usize,
    dead: bool,
}

impl MessageDecoder {
    /// A decoder using the registry of codecs shipped with this crate.
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    /// A decoder using a caller-built registry.
    pub fn with_registry(registry: Arc<Registry>) -> Self {
        MessageDecoder {
            buf: BytesMut::new(),
            pos: 0,
            container: Container::new(),
            registry,
            skip: 0,
            dead: false,
        }
    }

    /// Append `input` and try to decode one message.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On
    /// [`DecodeError::ResponseCarrying`] the rest of the offending PDU is
    /// skipped and the decoder stays usable; any other error is fatal to the
    /// connection and the decoder refuses further input.
    pub fn decode(&mut self, input: &[u8]) -> Result<Option<LdapMessage>, DecodeError> {
        if self.dead {
            return Err(DecodeError::protocol("decoder is in a failed state"));
        }
        if !input.is_empty() {
            self.buf.extend_from_slice(input);
        }
        if self.skip > 0 {
            let n = self.skip.min(self.buf.len());
            self.buf.advance(n);
            self.skip -= n;
            if self.skip > 0 {
                return Ok(None);
            }
        }
        loop {
            match self.step() {
                Ok(Step::Continue) => (),
                Ok(Step::NeedMore) => return Ok(None),
                Ok(Step::Done(msg)) => {
                    let consumed = self.pos;
                    self.buf.advance(consumed);
                    self.pos = 0;
                    self.container = Container::new();
                    return Ok(Some(msg));
                }
                Err(e @ DecodeError::ResponseCarrying(_)) => {
                    let total = self.container.pdu_total.max(self.pos);
                    let buffered = total.min(self.buf.len());
                    self.buf.advance(buffered);
                    self.skip = total - buffered;
                    self.pos = 0;
                    self.container = Container::new();
                    return Err(e);
                }
                Err(e) => {
                    self.dead = true;
                    return Err(e);
                }
            }
        }
    }

    /// Run one TLV through the automaton.
    fn step(&mut self) -> Result<Step, DecodeError> {
        let avail = &self.buf[self.pos..];
        let header = match ber::read_header(avail)? {
            Some(h) => h,
            None => return Ok(Step::NeedMore),
        };
        let tag = header.raw_tag;
        let c = &mut self.container;
        if c.state == State::OpDispatch && c.message_id == 0 && tag != 0x78 {
            return Err(DecodeError::protocol(
                "message id 0 is reserved for unsolicited notifications",
            ));
        }
        let tr = grammar::transition(c.state, tag).ok_or_else(|| {
            DecodeError::Protocol(format!(
                "unexpected tag {:#04x} in state {:?}",
                tag, c.state
            ))
        })?;
        if c.state == State::OpDispatch {
            c.op_tag = tag;
        }
        match tr.shape {
            Shape::Primitive => {
                if header.constructed {
                    return Err(DecodeError::Protocol(format!(
                        "constructed encoding for primitive element {tag:#04x}"
                    )));
                }
                let total = header.header_len + header.length;
                if avail.len() < total {
                    return Ok(Step::NeedMore);
                }
                let content = &avail[header.header_len..total];
                charge(&mut c.frames, total)?;
                c.state = tr.next;
                grammar::apply(c, tr.action, content)?;
                self.pos += total;
            }
            Shape::Constructed(close) => {
                if !header.constructed {
                    return Err(DecodeError::Protocol(format!(
                        "primitive encoding for constructed element {tag:#04x}"
                    )));
                }
                charge(&mut c.frames, header.header_len + header.length)?;
                c.state = tr.next;
                grammar::apply(c, tr.action, &[])?;
                if matches!(close, Close::Message) {
                    c.pdu_total = header.header_len + header.length;
                }
                c.frames.push(Frame {
                    expected: header.length,
                    consumed: 0,
                    close,
                });
                self.pos += header.header_len;
            }
        }
        // cascade: close every frame whose declared length is consumed
        loop {
            let complete = matches!(
                self.container.frames.last(),
                Some(f) if f.consumed == f.expected
            );
            if !complete {
                break;
            }
            let frame = match self.container.frames.pop() {
                Some(f) => f,
                None => break,
            };
            if let Some(msg) =
                grammar::run_close(&mut self.container, frame.close, &self.registry)?
            {
                return Ok(Step::Done(msg));
            }
        }
        Ok(Step::Continue)
    }
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Charge a consumed TLV to its enclosing frame.
fn charge(frames: &mut [Frame], nb: usize) -> Result<(), DecodeError> {
    if let Some(f) = frames.last_mut() {
        f.consumed += nb;
        if f.consumed > f.expected {
            return Err(DecodeError::Malformed(BerError::ParentOverrun));
        }
    }
    Ok(())
}
