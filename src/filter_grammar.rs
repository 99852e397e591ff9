//! Filter sub-grammar: states, reducers and bottom-up folding
//!
//! Filters are built bottom-up. Composite alternatives (`and`, `or`, `not`)
//! push a pending node and keep the automaton in the dispatch state; leaves
//! fill a scratch area and become nodes when their frame closes. Attaching a
//! completed node to its parent happens through [`attach`], and the frame
//! cascade in the engine unstacks every composite whose declared length has
//! been consumed, so arbitrary nesting depth only grows the heap.

use crate::ber;
use crate::decoder::{AvaKind, Close, Container, OpScratch, PendingFilter, State};
use crate::error::DecodeError;
use crate::filter::{
    AttributeValueAssertion, Filter, MatchingRuleAssertion, SubstringFilter, Substring,
};
use crate::grammar::{Action, Transition};
use crate::ldap::LdapString;

const fn prim(next: State, action: Action) -> Transition {
    Transition {
        next,
        shape: crate::grammar::Shape::Primitive,
        action,
    }
}

const fn cons(next: State, close: Close, action: Action) -> Transition {
    Transition {
        next,
        shape: crate::grammar::Shape::Constructed(close),
        action,
    }
}

// Filter ::= CHOICE {
//     and             [0] SET SIZE (1..MAX) OF filter Filter,
//     or              [1] SET SIZE (1..MAX) OF filter Filter,
//     not             [2] Filter,
//     equalityMatch   [3] AttributeValueAssertion,
//     substrings      [4] SubstringFilter,
//     greaterOrEqual  [5] AttributeValueAssertion,
//     lessOrEqual     [6] AttributeValueAssertion,
//     present         [7] AttributeDescription,
//     approxMatch     [8] AttributeValueAssertion,
//     extensibleMatch [9] MatchingRuleAssertion,
//     ...  }
pub(crate) fn transition(state: State, tag: u8) -> Option<Transition> {
    use State::*;
    let t = match (state, tag) {
        (FilterDispatch, 0xa0) => cons(FilterDispatch, Close::FilterComposite, Action::InitFilterAnd),
        (FilterDispatch, 0xa1) => cons(FilterDispatch, Close::FilterComposite, Action::InitFilterOr),
        (FilterDispatch, 0xa2) => cons(FilterDispatch, Close::FilterComposite, Action::InitFilterNot),
        (FilterDispatch, 0xa3) => cons(
            FilterAvaDesc,
            Close::FilterAva(AvaKind::Equality),
            Action::InitFilterAva,
        ),
        (FilterDispatch, 0xa4) => cons(SubstrType, Close::FilterSubstrings, Action::InitSubstrings),
        (FilterDispatch, 0xa5) => cons(
            FilterAvaDesc,
            Close::FilterAva(AvaKind::GreaterOrEqual),
            Action::InitFilterAva,
        ),
        (FilterDispatch, 0xa6) => cons(
            FilterAvaDesc,
            Close::FilterAva(AvaKind::LessOrEqual),
            Action::InitFilterAva,
        ),
        (FilterDispatch, 0x87) => prim(FilterDispatch, Action::ReadPresent),
        (FilterDispatch, 0xa8) => cons(
            FilterAvaDesc,
            Close::FilterAva(AvaKind::Approx),
            Action::InitFilterAva,
        ),
        (FilterDispatch, 0xa9) => cons(ExtensibleInit, Close::FilterExtensible, Action::InitExtensible),
        // AttributeValueAssertion ::= SEQUENCE {
        //      attributeDesc   AttributeDescription,
        //      assertionValue  AssertionValue }
        (FilterAvaDesc, 0x04) => prim(FilterAvaValue, Action::ReadFilterAvaDesc),
        (FilterAvaValue, 0x04) => prim(FilterAvaDone, Action::ReadFilterAvaValue),
        // SubstringFilter ::= SEQUENCE {
        //      type           AttributeDescription,
        //      substrings     SEQUENCE SIZE (1..MAX) OF substring CHOICE {
        //           initial [0] AssertionValue,  -- can occur at most once
        //           any     [1] AssertionValue,
        //           final   [2] AssertionValue } -- can occur at most once
        //      }
        (SubstrType, 0x04) => prim(SubstrSeq, Action::ReadSubstrType),
        (SubstrSeq, 0x30) => cons(SubstrPart, Close::SubstrSeq, Action::NoOp),
        (SubstrPart, 0x80) => prim(SubstrPart, Action::ReadSubstrInitial),
        (SubstrPart, 0x81) => prim(SubstrPart, Action::ReadSubstrAny),
        (SubstrPart, 0x82) => prim(SubstrPart, Action::ReadSubstrFinal),
        // MatchingRuleAssertion ::= SEQUENCE {
        //     matchingRule    [1] MatchingRuleId OPTIONAL,
        //     type            [2] AttributeDescription OPTIONAL,
        //     matchValue      [3] AssertionValue,
        //     dnAttributes    [4] BOOLEAN DEFAULT FALSE }
        (ExtensibleInit, 0x81) => prim(ExtensibleAfterRule, Action::ReadMatchingRule),
        (ExtensibleInit, 0x82) => prim(ExtensibleAfterType, Action::ReadExtRuleType),
        (ExtensibleInit, 0x83) => prim(ExtensibleAfterValue, Action::ReadMatchValue),
        (ExtensibleAfterRule, 0x82) => prim(ExtensibleAfterType, Action::ReadExtRuleType),
        (ExtensibleAfterRule, 0x83) => prim(ExtensibleAfterValue, Action::ReadMatchValue),
        (ExtensibleAfterType, 0x83) => prim(ExtensibleAfterValue, Action::ReadMatchValue),
        (ExtensibleAfterValue, 0x84) => prim(ExtensibleDone, Action::ReadDnAttributes),
        _ => return None,
    };
    Some(t)
}

pub(crate) fn apply(c: &mut Container, action: Action, content: &[u8]) -> Result<(), DecodeError> {
    match action {
        Action::InitFilterAnd => c.filter.pending.push(PendingFilter::And(Vec::new())),
        Action::InitFilterOr => c.filter.pending.push(PendingFilter::Or(Vec::new())),
        Action::InitFilterNot => c.filter.pending.push(PendingFilter::Not(Vec::new())),
        Action::InitFilterAva => c.filter.ava = Default::default(),
        Action::InitSubstrings => c.filter.substring = Default::default(),
        Action::InitExtensible => c.filter.extensible = Default::default(),
        Action::ReadPresent => {
            let node = Filter::Present(LdapString(ber::decode_utf8(content)?));
            attach(c, node)?;
        }
        Action::ReadFilterAvaDesc => {
            c.filter.ava.attribute_desc = Some(LdapString(ber::decode_utf8(content)?));
        }
        Action::ReadFilterAvaValue => {
            c.filter.ava.assertion_value = Some(content.to_vec());
        }
        Action::ReadSubstrType => {
            c.filter.substring.filter_type = Some(LdapString(ber::decode_utf8(content)?));
        }
        Action::ReadSubstrInitial => {
            let s = &mut c.filter.substring;
            if !s.parts.is_empty() {
                return Err(DecodeError::protocol(
                    "'initial' substring must be the first part",
                ));
            }
            s.parts.push(Substring::Initial(content.to_vec()));
        }
        Action::ReadSubstrAny => {
            let s = &mut c.filter.substring;
            if s.seen_final {
                return Err(DecodeError::protocol(
                    "'final' substring must be the last part",
                ));
            }
            s.parts.push(Substring::Any(content.to_vec()));
        }
        Action::ReadSubstrFinal => {
            let s = &mut c.filter.substring;
            if s.seen_final {
                return Err(DecodeError::protocol("duplicate 'final' substring"));
            }
            s.seen_final = true;
            s.parts.push(Substring::Final(content.to_vec()));
        }
        Action::ReadMatchingRule => {
            c.filter.extensible.matching_rule = Some(LdapString(ber::decode_utf8(content)?));
        }
        Action::ReadExtRuleType => {
            c.filter.extensible.rule_type = Some(LdapString(ber::decode_utf8(content)?));
        }
        Action::ReadMatchValue => {
            c.filter.extensible.assertion_value = Some(content.to_vec());
        }
        Action::ReadDnAttributes => {
            c.filter.extensible.dn_attributes = ber::decode_boolean(content)?;
        }
        _ => return Err(DecodeError::protocol("internal decoder state mismatch")),
    }
    Ok(())
}

pub(crate) fn run_close(c: &mut Container, close: Close) -> Result<(), DecodeError> {
    match close {
        Close::FilterComposite => {
            let pending = c
                .filter
                .pending
                .pop()
                .ok_or_else(|| DecodeError::protocol("internal decoder state mismatch"))?;
            let node = match pending {
                PendingFilter::And(children) => {
                    if children.is_empty() {
                        return Err(DecodeError::protocol("empty 'and' filter"));
                    }
                    Filter::And(children)
                }
                PendingFilter::Or(children) => {
                    if children.is_empty() {
                        return Err(DecodeError::protocol("empty 'or' filter"));
                    }
                    Filter::Or(children)
                }
                PendingFilter::Not(mut children) => match children.pop() {
                    Some(child) if children.is_empty() => Filter::Not(Box::new(child)),
                    _ => {
                        return Err(DecodeError::protocol(
                            "'not' filter requires exactly one filter",
                        ));
                    }
                },
            };
            attach(c, node)?;
        }
        Close::FilterAva(kind) => {
            let ava = std::mem::take(&mut c.filter.ava);
            let assertion = match (ava.attribute_desc, ava.assertion_value) {
                (Some(attribute_desc), Some(assertion_value)) => AttributeValueAssertion {
                    attribute_desc,
                    assertion_value,
                },
                _ => {
                    return Err(DecodeError::protocol(
                        "truncated attribute value assertion",
                    ));
                }
            };
            let node = match kind {
                AvaKind::Equality => Filter::EqualityMatch(assertion),
                AvaKind::GreaterOrEqual => Filter::GreaterOrEqual(assertion),
                AvaKind::LessOrEqual => Filter::LessOrEqual(assertion),
                AvaKind::Approx => Filter::ApproxMatch(assertion),
            };
            attach(c, node)?;
        }
        Close::SubstrSeq => {
            if c.filter.substring.parts.is_empty() {
                return Err(DecodeError::protocol("empty substring sequence"));
            }
            c.state = State::SubstrDone;
        }
        Close::FilterSubstrings => {
            if c.state != State::SubstrDone {
                return Err(DecodeError::protocol(
                    "substring filter without a substring sequence",
                ));
            }
            let s = std::mem::take(&mut c.filter.substring);
            let node = Filter::Substrings(SubstringFilter {
                filter_type: s
                    .filter_type
                    .ok_or_else(|| DecodeError::protocol("substring filter without a type"))?,
                substrings: s.parts,
            });
            attach(c, node)?;
        }
        Close::FilterExtensible => {
            let e = std::mem::take(&mut c.filter.extensible);
            let assertion_value = e.assertion_value.ok_or_else(|| {
                DecodeError::protocol("extensibleMatch filter without a matchValue")
            })?;
            let node = Filter::ExtensibleMatch(MatchingRuleAssertion {
                matching_rule: e.matching_rule,
                rule_type: e.rule_type,
                assertion_value,
                dn_attributes: e.dn_attributes,
            });
            attach(c, node)?;
        }
        _ => return Err(DecodeError::protocol("internal decoder state mismatch")),
    }
    Ok(())
}

/// Attach a completed filter node to its innermost pending composite, or hand
/// it to the search request when the tree is complete. Also decides the next
/// automaton state, which depends on whether composites remain open.
pub(crate) fn attach(c: &mut Container, node: Filter) -> Result<(), DecodeError> {
    if let Some(parent) = c.filter.pending.last_mut() {
        match parent {
            PendingFilter::Not(children) if !children.is_empty() => {
                return Err(DecodeError::protocol(
                    "'not' filter requires exactly one filter",
                ));
            }
            PendingFilter::And(children)
            | PendingFilter::Or(children)
            | PendingFilter::Not(children) => children.push(node),
        }
        c.state = State::FilterDispatch;
    } else {
        match &mut c.op {
            OpScratch::Search(s) => {
                if s.filter.is_some() {
                    return Err(DecodeError::protocol("internal decoder state mismatch"));
                }
                s.filter = Some(node);
            }
            _ => return Err(DecodeError::protocol("internal decoder state mismatch")),
        }
        c.state = State::SearchAttrs;
    }
    Ok(())
}
