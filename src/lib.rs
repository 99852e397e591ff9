//! # LDAP Codec
//!
//! A bidirectional Lightweight Directory Access Protocol (LDAP) ([RFC4511])
//! wire codec: a streaming BER decoder turning byte chunks into typed
//! [`ldap::LdapMessage`]s, and a two-phase encoder producing exactly one
//! contiguous PDU per message.
//!
//! It is written in pure Rust and aims to be panic-free. The decoder is a
//! pushdown automaton over TLVs: it accepts arbitrarily split input, suspends
//! between any two bytes, and never runs a reducer on a partial value.
//! Semantic violations inside well-framed requests (a bad DN in an add
//! request, a zero-length SASL sequence) come back as
//! [`error::ResponseCarryingError`] bundling a prefabricated response, so a
//! server can answer and keep the connection.
//!
//! Controls and extended operations are decoded through an OID-keyed
//! [`extensions::Registry`] of value codecs; unknown OIDs keep their opaque
//! value octets.
//!
//! [RFC4511]: https://tools.ietf.org/html/rfc4511

#![deny(unstable_features, unused_import_braces, unused_qualifications)]
#![warn(missing_debug_implementations, unreachable_pub)]
#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod ber;
mod filter_grammar;
mod grammar;

pub mod controls;
pub mod decoder;
pub mod dn;
pub mod encoder;
pub mod error;
pub mod extensions;
pub mod filter;
pub mod ldap;

pub use decoder::MessageDecoder;
pub use encoder::encode;
pub use error::{BerError, DecodeError, EncodeError, ResponseCarryingError};
pub use extensions::Registry;
