//! Definitions for LDAP types
//!
//! The message model is owned (no borrowed data): the streaming decoder
//! materializes messages across several partial reads, and outbound messages
//! are built by user code long before any buffer exists.

use crate::controls::Control;
use rusticata_macros::newtype_enum;

/// maxInt from RFC 4511 (2^31 - 1), the ceiling for message ids and limits.
pub const MAX_INT: u32 = 2_147_483_647;

#[derive(Debug, Default, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct ProtocolOpTag(pub u32);

newtype_enum! {
impl display ProtocolOpTag {
    BindRequest = 0,
    BindResponse = 1,
    UnbindRequest = 2,
    SearchRequest = 3,
    SearchResultEntry = 4,
    SearchResultDone = 5,
    ModifyRequest = 6,
    ModifyResponse = 7,
    AddRequest = 8,
    AddResponse = 9,
    DelRequest = 10,
    DelResponse = 11,
    ModDnRequest = 12,
    ModDnResponse = 13,
    CompareRequest = 14,
    CompareResponse = 15,
    AbandonRequest = 16,
    SearchResultReference = 19,
    ExtendedRequest = 23,
    ExtendedResponse = 24,
    IntermediateResponse = 25,
}
}

#[derive(Default, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct ResultCode(pub u32);

newtype_enum! {
impl debug ResultCode {
    Success = 0,
    OperationsError = 1,
    ProtocolError = 2,
    TimeLimitExceeded = 3,
    SizeLimitExceeded = 4,
    CompareFalse = 5,
    CompareTrue = 6,
    AuthMethodNotSupported = 7,
    StrongerAuthRequired = 8,
    // -- 9 reserved --
    Referral = 10,
    AdminLimitExceeded = 11,
    UnavailableCriticalExtension = 12,
    ConfidentialityRequired = 13,
    SaslBindInProgress = 14,
    NoSuchAttribute = 16,
    UndefinedAttributeType = 17,
    InappropriateMatching = 18,
    ConstraintViolation = 19,
    AttributeOrValueExists = 20,
    InvalidAttributeSyntax = 21,
    // -- 22-31 unused --
    NoSuchObject = 32,
    AliasProblem = 33,
    InvalidDNSyntax = 34,
    // -- 35 reserved for undefined isLeaf --
    AliasDereferencingProblem = 36,
    // -- 37-47 unused --
    InappropriateAuthentication = 48,
    InvalidCredentials = 49,
    InsufficientAccessRights = 50,
    Busy = 51,
    Unavailable = 52,
    UnwillingToPerform = 53,
    LoopDetect = 54,
    // -- 55-63 unused --
    NamingViolation = 64,
    ObjectClassViolation = 65,
    NotAllowedOnNonLeaf = 66,
    NotAllowedOnRDN = 67,
    EntryAlreadyExists = 68,
    ObjectClassModsProhibited = 69,
    // -- 70 reserved for CLDAP --
    AffectsMultipleDSAs = 71,
    // -- 72-79 unused --
    Other = 80,
}
}

/// MessageID ::= INTEGER (0 ..  maxInt)
///
/// Zero is reserved for unsolicited notifications (server to client only).
#[derive(Debug, Default, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct MessageId(pub u32);

#[derive(PartialEq, Eq, Clone, Copy)]
pub struct SearchScope(pub u32);

newtype_enum! {
impl debug SearchScope {
    BaseObject = 0,
    SingleLevel = 1,
    WholeSubtree = 2,
}
}

#[derive(PartialEq, Eq, Clone, Copy)]
pub struct DerefAliases(pub u32);

newtype_enum! {
impl debug DerefAliases {
    NeverDerefAliases = 0,
    DerefInSearching = 1,
    DerefFindingBaseObj = 2,
    DerefAlways = 3,
}
}

#[derive(PartialEq, Eq, Clone, Copy)]
pub struct ModifyOperation(pub u32);

newtype_enum! {
impl debug ModifyOperation {
    Add = 0,
    Delete = 1,
    Replace = 2,
}
}

/// LDAPString ::= OCTET STRING -- UTF-8 encoded
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct LdapString(pub String);

impl From<&str> for LdapString {
    fn from(s: &str) -> Self {
        LdapString(s.to_owned())
    }
}

/// LDAPDN ::= LDAPString -- Constrained to <distinguishedName> [RFC4514]
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct LdapDn(pub String);

impl From<&str> for LdapDn {
    fn from(s: &str) -> Self {
        LdapDn(s.to_owned())
    }
}

/// RelativeLDAPDN ::= LDAPString -- Constrained to <name-component> [RFC4514]
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct RelativeLdapDn(pub String);

impl From<&str> for RelativeLdapDn {
    fn from(s: &str) -> Self {
        RelativeLdapDn(s.to_owned())
    }
}

/// LDAPOID ::= OCTET STRING -- Constrained to <numericoid> [RFC4512]
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct LdapOid(pub String);

impl From<&str> for LdapOid {
    fn from(s: &str) -> Self {
        LdapOid(s.to_owned())
    }
}

// LDAPResult ::= SEQUENCE {
//      resultCode         ENUMERATED { ... },
//      matchedDN          LDAPDN,
//      diagnosticMessage  LDAPString,
//      referral           [3] Referral OPTIONAL }
//
// Referral ::= SEQUENCE SIZE (1..MAX) OF uri URI
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LdapResult {
    pub result_code: ResultCode,
    pub matched_dn: LdapDn,
    pub diagnostic_message: LdapString,
    /// Present referrals are never empty.
    pub referral: Option<Vec<LdapString>>,
}

impl LdapResult {
    /// A result with the given code and diagnostic message and no referral.
    pub fn new(result_code: ResultCode, diagnostic_message: &str) -> Self {
        LdapResult {
            result_code,
            matched_dn: LdapDn::default(),
            diagnostic_message: diagnostic_message.into(),
            referral: None,
        }
    }
}

// BindRequest ::= [APPLICATION 0] SEQUENCE {
//      version                 INTEGER (1 ..  127),
//      name                    LDAPDN,
//      authentication          AuthenticationChoice }
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BindRequest {
    pub version: u8,
    pub name: LdapDn,
    pub authentication: AuthenticationChoice,
}

impl BindRequest {
    /// Whether the request announces LDAPv3, the only version this codec
    /// accepts at the semantic level.
    pub fn is_version3(&self) -> bool {
        self.version == 3
    }
}

// AuthenticationChoice ::= CHOICE {
//      simple                  [0] OCTET STRING,
//                              -- 1 and 2 reserved
//      sasl                    [3] SaslCredentials,
//      ...  }
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthenticationChoice {
    Simple(Vec<u8>),
    Sasl(SaslCredentials),
}

// SaslCredentials ::= SEQUENCE {
//      mechanism               LDAPString,
//      credentials             OCTET STRING OPTIONAL }
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SaslCredentials {
    pub mechanism: LdapString,
    pub credentials: Option<Vec<u8>>,
}

// BindResponse ::= [APPLICATION 1] SEQUENCE {
//      COMPONENTS OF LDAPResult,
//      serverSaslCreds    [7] OCTET STRING OPTIONAL }
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BindResponse {
    pub result: LdapResult,
    pub server_sasl_creds: Option<Vec<u8>>,
}

// SearchRequest ::= [APPLICATION 3] SEQUENCE {
//      baseObject      LDAPDN,
//      scope           ENUMERATED { baseObject (0), singleLevel (1), wholeSubtree (2) },
//      derefAliases    ENUMERATED { neverDerefAliases (0), derefInSearching (1),
//                                   derefFindingBaseObj (2), derefAlways (3) },
//      sizeLimit       INTEGER (0 ..  maxInt),
//      timeLimit       INTEGER (0 ..  maxInt),
//      typesOnly       BOOLEAN,
//      filter          Filter,
//      attributes      AttributeSelection }
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SearchRequest {
    pub base_object: LdapDn,
    pub scope: SearchScope,
    pub deref_aliases: DerefAliases,
    /// Decoded through the wide-integer path: some deployments exceed the
    /// 32-bit range here.
    pub size_limit: u64,
    pub time_limit: u32,
    pub types_only: bool,
    pub filter: crate::filter::Filter,
    pub attributes: Vec<LdapString>,
}

// SearchResultEntry ::= [APPLICATION 4] SEQUENCE {
//     objectName      LDAPDN,
//     attributes      PartialAttributeList }
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SearchResultEntry {
    pub object_name: LdapDn,
    pub attributes: Vec<crate::filter::PartialAttribute>,
}

// ModifyRequest ::= [APPLICATION 6] SEQUENCE {
//     object          LDAPDN,
//     changes         SEQUENCE OF change SEQUENCE {
//          operation       ENUMERATED { add (0), delete (1), replace (2) },
//          modification    PartialAttribute } }
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModifyRequest {
    pub object: LdapDn,
    pub changes: Vec<Change>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Change {
    pub operation: ModifyOperation,
    pub modification: crate::filter::PartialAttribute,
}

// AddRequest ::= [APPLICATION 8] SEQUENCE {
//     entry           LDAPDN,
//     attributes      AttributeList }
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddRequest {
    pub entry: LdapDn,
    pub attributes: Vec<crate::filter::Attribute>,
}

// ModifyDNRequest ::= [APPLICATION 12] SEQUENCE {
//     entry           LDAPDN,
//     newrdn          RelativeLDAPDN,
//     deleteoldrdn    BOOLEAN,
//     newSuperior     [0] LDAPDN OPTIONAL }
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModDnRequest {
    pub entry: LdapDn,
    pub new_rdn: RelativeLdapDn,
    pub delete_old_rdn: bool,
    pub new_superior: Option<LdapDn>,
}

// CompareRequest ::= [APPLICATION 14] SEQUENCE {
//     entry           LDAPDN,
//     ava             AttributeValueAssertion }
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompareRequest {
    pub entry: LdapDn,
    pub ava: crate::filter::AttributeValueAssertion,
}

// ExtendedRequest ::= [APPLICATION 23] SEQUENCE {
//     requestName      [0] LDAPOID,
//     requestValue     [1] OCTET STRING OPTIONAL }
#[derive(Clone, Debug)]
pub struct ExtendedRequest {
    pub request_name: LdapOid,
    pub request_value: Option<Vec<u8>>,
    /// Decoded payload when a factory is registered for `request_name`.
    pub payload: Option<crate::extensions::ExtendedPayload>,
}

impl ExtendedRequest {
    /// The value that would be sent on the wire: the typed payload when one
    /// is attached, the retained opaque bytes otherwise.
    pub fn effective_value(&self) -> Option<Vec<u8>> {
        match &self.payload {
            Some(p) => p.encode_value(),
            None => self.request_value.clone(),
        }
    }
}

impl PartialEq for ExtendedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.request_name == other.request_name
            && self.effective_value() == other.effective_value()
    }
}

impl Eq for ExtendedRequest {}

// ExtendedResponse ::= [APPLICATION 24] SEQUENCE {
//     COMPONENTS OF LDAPResult,
//     responseName     [10] LDAPOID OPTIONAL,
//     responseValue    [11] OCTET STRING OPTIONAL }
#[derive(Clone, Debug)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    pub response_name: Option<LdapOid>,
    pub response_value: Option<Vec<u8>>,
    /// Decoded payload when a factory is registered for `response_name`.
    pub payload: Option<crate::extensions::ExtendedPayload>,
}

impl ExtendedResponse {
    /// The value that would be sent on the wire: the typed payload when one
    /// is attached, the retained opaque bytes otherwise.
    pub fn effective_value(&self) -> Option<Vec<u8>> {
        match &self.payload {
            Some(p) => p.encode_value(),
            None => self.response_value.clone(),
        }
    }
}

impl PartialEq for ExtendedResponse {
    fn eq(&self, other: &Self) -> bool {
        self.result == other.result
            && self.response_name == other.response_name
            && self.effective_value() == other.effective_value()
    }
}

impl Eq for ExtendedResponse {}

// IntermediateResponse ::= [APPLICATION 25] SEQUENCE {
//      responseName     [0] LDAPOID OPTIONAL,
//      responseValue    [1] OCTET STRING OPTIONAL }
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IntermediateResponse {
    pub response_name: Option<LdapOid>,
    pub response_value: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProtocolOp {
    BindRequest(BindRequest),
    BindResponse(BindResponse),
    UnbindRequest,
    SearchRequest(SearchRequest),
    SearchResultEntry(SearchResultEntry),
    SearchResultDone(LdapResult),
    SearchResultReference(Vec<LdapString>),
    ModifyRequest(ModifyRequest),
    ModifyResponse(LdapResult),
    AddRequest(AddRequest),
    AddResponse(LdapResult),
    DelRequest(LdapDn),
    DelResponse(LdapResult),
    ModDnRequest(ModDnRequest),
    ModDnResponse(LdapResult),
    CompareRequest(CompareRequest),
    CompareResponse(LdapResult),
    //
    AbandonRequest(MessageId),
    ExtendedRequest(ExtendedRequest),
    ExtendedResponse(ExtendedResponse),
    IntermediateResponse(IntermediateResponse),
}

impl ProtocolOp {
    /// Get tag number associated with the operation
    pub fn tag(&self) -> ProtocolOpTag {
        let op = match self {
            ProtocolOp::BindRequest(_) => 0,
            ProtocolOp::BindResponse(_) => 1,
            ProtocolOp::UnbindRequest => 2,
            ProtocolOp::SearchRequest(_) => 3,
            ProtocolOp::SearchResultEntry(_) => 4,
            ProtocolOp::SearchResultDone(_) => 5,
            ProtocolOp::ModifyRequest(_) => 6,
            ProtocolOp::ModifyResponse(_) => 7,
            ProtocolOp::AddRequest(_) => 8,
            ProtocolOp::AddResponse(_) => 9,
            ProtocolOp::DelRequest(_) => 10,
            ProtocolOp::DelResponse(_) => 11,
            ProtocolOp::ModDnRequest(_) => 12,
            ProtocolOp::ModDnResponse(_) => 13,
            ProtocolOp::CompareRequest(_) => 14,
            ProtocolOp::CompareResponse(_) => 15,
            ProtocolOp::AbandonRequest(_) => 16,
            ProtocolOp::SearchResultReference(_) => 19,
            ProtocolOp::ExtendedRequest(_) => 23,
            ProtocolOp::ExtendedResponse(_) => 24,
            ProtocolOp::IntermediateResponse(_) => 25,
        };
        ProtocolOpTag(op)
    }

    /// Get the LDAP result, if present
    pub fn result(&self) -> Option<&LdapResult> {
        match self {
            ProtocolOp::BindResponse(r) => Some(&r.result),
            ProtocolOp::ExtendedResponse(r) => Some(&r.result),
            ProtocolOp::SearchResultDone(ref r)
            | ProtocolOp::ModifyResponse(ref r)
            | ProtocolOp::AddResponse(ref r)
            | ProtocolOp::DelResponse(ref r)
            | ProtocolOp::ModDnResponse(ref r)
            | ProtocolOp::CompareResponse(ref r) => Some(r),
            _ => None,
        }
    }
}

// LDAPMessage ::= SEQUENCE {
//      messageID       MessageID,
//      protocolOp      CHOICE { ... },
//      controls       [0] Controls OPTIONAL }
/// An LDAP Message according to RFC 4511.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LdapMessage {
    /// Message Identifier (32-bits unsigned integer)
    ///
    /// The messageID of a request MUST have a non-zero value different from
    /// the messageID of any other request in progress in the same LDAP
    /// session. The zero value is reserved for the unsolicited notification
    /// message.
    pub message_id: MessageId,
    /// The LDAP operation from this LDAP message
    pub protocol_op: ProtocolOp,
    /// Message controls (optional)
    ///
    /// Controls keep their decoded (or insertion) order; duplicates with the
    /// same OID are permitted by the protocol and preserved.
    pub controls: Option<Vec<Control>>,
}

impl LdapMessage {
    /// A message without controls.
    pub fn new(message_id: MessageId, protocol_op: ProtocolOp) -> Self {
        LdapMessage {
            message_id,
            protocol_op,
            controls: None,
        }
    }

    /// First control carrying the given OID, if any.
    pub fn control(&self, oid: &str) -> Option<&Control> {
        self.controls
            .as_deref()
            .and_then(|cs| cs.iter().find(|c| c.oid.0 == oid))
    }
}
