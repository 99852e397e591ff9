//! LDAP codec errors

use crate::ldap::{LdapMessage, MessageId, ProtocolOp, ResultCode};

pub use crate::ber::BerError;

/// An error raised while decoding a PDU.
///
/// `Malformed` and `Protocol` are fatal: the byte stream cannot be
/// resynchronized and the caller must drop the connection. `ResponseCarrying`
/// is recoverable: the remainder of the offending PDU is skipped internally,
/// the caller may send the embedded response and keep decoding.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// A BER framing violation (truncated or ill-formed TLV structure).
    #[error("malformed BER element: {0}")]
    Malformed(#[from] BerError),

    /// A violation of the RFC 4511 message structure.
    #[error("LDAP protocol violation: {0}")]
    Protocol(String),

    /// A semantic violation inside an otherwise well-framed request, with a
    /// prefabricated response the caller can send back.
    #[error("{0}")]
    ResponseCarrying(Box<ResponseCarryingError>),
}

impl DecodeError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        DecodeError::Protocol(msg.into())
    }
}

impl From<ResponseCarryingError> for DecodeError {
    fn from(e: ResponseCarryingError) -> Self {
        DecodeError::ResponseCarrying(Box::new(e))
    }
}

/// A recoverable decode failure carrying the response to send.
///
/// The embedded `response` is of the kind matching the failed request (for
/// example an `AddResponse` for a bad `AddRequest`) and already carries the
/// suggested result code and a diagnostic message.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{cause}")]
pub struct ResponseCarryingError {
    /// Identifier of the message that failed to decode.
    pub message_id: MessageId,
    /// Prefabricated response of the appropriate kind.
    pub response: ProtocolOp,
    /// Suggested result code (also present inside `response`).
    pub result_code: ResultCode,
    /// Human-readable cause.
    pub cause: String,
}

impl ResponseCarryingError {
    /// Wrap the prefabricated response in a sendable message, reusing the
    /// failed request's message id.
    pub fn response_message(&self) -> LdapMessage {
        LdapMessage {
            message_id: self.message_id,
            protocol_op: self.response.clone(),
            controls: None,
        }
    }
}

/// An internal encoder failure.
///
/// The serialize pass writes into a buffer sized by the length pass; any
/// disagreement between the two is a bug in the codec, never a condition a
/// well-formed message can trigger.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("internal encoder error: {0}")]
pub struct EncodeError(pub(crate) &'static str);
