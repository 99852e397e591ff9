//! Two-phase LDAP message encoder
//!
//! Phase one walks the message bottom-up and records the content length of
//! every constructed element in a pre-order cache, together with the
//! materialized control and extended-operation values (the typed payload wins
//! over retained opaque octets). Phase two allocates one buffer of the exact
//! PDU size and serializes in the same order, reading lengths back from the
//! cache. The phases share no other state; any disagreement between them
//! trips the writer's capacity checks and surfaces as [`EncodeError`], the
//! only way encoding can fail.

use crate::ber::{self, BerWriter};
use crate::controls::Control;
use crate::error::EncodeError;
use crate::filter::{AttributeValue, Filter, Substring};
use crate::ldap::{
    AuthenticationChoice, LdapMessage, LdapResult, LdapString, ProtocolOp,
};

/// Encode one message into a single contiguous PDU.
///
/// ```rust
/// use ldap_codec::encode;
/// use ldap_codec::ldap::{LdapMessage, MessageId, ProtocolOp};
///
/// let msg = LdapMessage::new(MessageId(3), ProtocolOp::AbandonRequest(MessageId(2)));
/// assert_eq!(encode(&msg).unwrap(), [0x30, 0x06, 0x02, 0x01, 0x03, 0x50, 0x01, 0x02]);
/// ```
pub fn encode(msg: &LdapMessage) -> Result<Vec<u8>, EncodeError> {
    let mut cache = LengthCache::default();
    let total = compute_message(msg, &mut cache);
    let mut w = BerWriter::with_capacity(total);
    let mut cur = CacheCursor::new(&cache);
    write_message(msg, &mut w, &mut cur)?;
    w.finish()
}

/// Lengths of every constructed element in pre-order, plus the materialized
/// control/extended values, computed once and consumed once.
#[derive(Debug, Default)]
struct LengthCache {
    lens: Vec<usize>,
    values: Vec<Option<Vec<u8>>>,
}

impl LengthCache {
    fn reserve(&mut self) -> usize {
        self.lens.push(0);
        self.lens.len() - 1
    }

    fn set(&mut self, idx: usize, len: usize) {
        self.lens[idx] = len;
    }

    fn push_value(&mut self, value: Option<Vec<u8>>) {
        self.values.push(value);
    }
}

/// Read cursor over a [`LengthCache`], consumed by the serialize pass.
#[derive(Debug)]
struct CacheCursor<'a> {
    cache: &'a LengthCache,
    next_len: usize,
    next_value: usize,
}

impl<'a> CacheCursor<'a> {
    fn new(cache: &'a LengthCache) -> Self {
        CacheCursor {
            cache,
            next_len: 0,
            next_value: 0,
        }
    }

    fn len(&mut self) -> Result<usize, EncodeError> {
        let len = self
            .cache
            .lens
            .get(self.next_len)
            .copied()
            .ok_or(EncodeError("length cache exhausted"))?;
        self.next_len += 1;
        Ok(len)
    }

    fn value(&mut self) -> Result<&'a Option<Vec<u8>>, EncodeError> {
        let value = self
            .cache
            .values
            .get(self.next_value)
            .ok_or(EncodeError("value cache exhausted"))?;
        self.next_value += 1;
        Ok(value)
    }
}

// LDAPMessage ::= SEQUENCE {
//      messageID       MessageID,
//      protocolOp      CHOICE { ... },
//      controls       [0] Controls OPTIONAL }
fn compute_message(msg: &LdapMessage, cache: &mut LengthCache) -> usize {
    let idx = cache.reserve();
    let mut content = ber::int_tlv_len(i64::from(msg.message_id.0));
    content += compute_op(&msg.protocol_op, cache);
    if let Some(controls) = &msg.controls {
        content += compute_controls(controls, cache);
    }
    cache.set(idx, content);
    ber::tlv_len(content)
}

fn write_message(
    msg: &LdapMessage,
    w: &mut BerWriter,
    cur: &mut CacheCursor,
) -> Result<(), EncodeError> {
    let content = cur.len()?;
    w.put_header(0x30, content)?;
    w.put_integer(0x02, i64::from(msg.message_id.0))?;
    write_op(&msg.protocol_op, w, cur)?;
    if let Some(controls) = &msg.controls {
        write_controls(controls, w, cur)?;
    }
    Ok(())
}

fn compute_op(op: &ProtocolOp, cache: &mut LengthCache) -> usize {
    match op {
        ProtocolOp::BindRequest(b) => {
            let idx = cache.reserve();
            let mut n = ber::int_tlv_len(i64::from(b.version)) + ber::tlv_len(b.name.0.len());
            n += match &b.authentication {
                AuthenticationChoice::Simple(creds) => ber::tlv_len(creds.len()),
                AuthenticationChoice::Sasl(sasl) => {
                    let sidx = cache.reserve();
                    let mut m = ber::tlv_len(sasl.mechanism.0.len());
                    if let Some(creds) = &sasl.credentials {
                        m += ber::tlv_len(creds.len());
                    }
                    cache.set(sidx, m);
                    ber::tlv_len(m)
                }
            };
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        ProtocolOp::BindResponse(b) => {
            let idx = cache.reserve();
            let mut n = compute_result_content(&b.result, cache);
            if let Some(creds) = &b.server_sasl_creds {
                n += ber::tlv_len(creds.len());
            }
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        ProtocolOp::UnbindRequest => 2,
        ProtocolOp::SearchRequest(s) => {
            let idx = cache.reserve();
            let mut n = ber::tlv_len(s.base_object.0.len())
                + ber::int_tlv_len(i64::from(s.scope.0))
                + ber::int_tlv_len(i64::from(s.deref_aliases.0))
                + ber::int_tlv_len(clamp_u64(s.size_limit))
                + ber::int_tlv_len(i64::from(s.time_limit))
                + 3;
            n += compute_filter(&s.filter, cache);
            let aidx = cache.reserve();
            let attrs: usize = s.attributes.iter().map(|a| ber::tlv_len(a.0.len())).sum();
            cache.set(aidx, attrs);
            n += ber::tlv_len(attrs);
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        ProtocolOp::SearchResultEntry(e) => {
            let idx = cache.reserve();
            let mut n = ber::tlv_len(e.object_name.0.len());
            let lidx = cache.reserve();
            let mut list = 0;
            for attr in &e.attributes {
                list += compute_attribute(&attr.attr_type, &attr.attr_vals, cache);
            }
            cache.set(lidx, list);
            n += ber::tlv_len(list);
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        ProtocolOp::SearchResultDone(r)
        | ProtocolOp::ModifyResponse(r)
        | ProtocolOp::AddResponse(r)
        | ProtocolOp::DelResponse(r)
        | ProtocolOp::ModDnResponse(r)
        | ProtocolOp::CompareResponse(r) => {
            let idx = cache.reserve();
            let n = compute_result_content(r, cache);
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        ProtocolOp::SearchResultReference(uris) => {
            let idx = cache.reserve();
            let n: usize = uris.iter().map(|u| ber::tlv_len(u.0.len())).sum();
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        ProtocolOp::ModifyRequest(m) => {
            let idx = cache.reserve();
            let mut n = ber::tlv_len(m.object.0.len());
            let lidx = cache.reserve();
            let mut list = 0;
            for change in &m.changes {
                let cidx = cache.reserve();
                let mut ch = ber::int_tlv_len(i64::from(change.operation.0));
                ch += compute_attribute(
                    &change.modification.attr_type,
                    &change.modification.attr_vals,
                    cache,
                );
                cache.set(cidx, ch);
                list += ber::tlv_len(ch);
            }
            cache.set(lidx, list);
            n += ber::tlv_len(list);
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        ProtocolOp::AddRequest(a) => {
            let idx = cache.reserve();
            let mut n = ber::tlv_len(a.entry.0.len());
            let lidx = cache.reserve();
            let mut list = 0;
            for attr in &a.attributes {
                list += compute_attribute(&attr.attr_type, &attr.attr_vals, cache);
            }
            cache.set(lidx, list);
            n += ber::tlv_len(list);
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        ProtocolOp::DelRequest(dn) => ber::tlv_len(dn.0.len()),
        ProtocolOp::ModDnRequest(m) => {
            let idx = cache.reserve();
            let mut n = ber::tlv_len(m.entry.0.len()) + ber::tlv_len(m.new_rdn.0.len()) + 3;
            if let Some(superior) = &m.new_superior {
                n += ber::tlv_len(superior.0.len());
            }
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        ProtocolOp::CompareRequest(cmp) => {
            let idx = cache.reserve();
            let mut n = ber::tlv_len(cmp.entry.0.len());
            let aidx = cache.reserve();
            let ava = ber::tlv_len(cmp.ava.attribute_desc.0.len())
                + ber::tlv_len(cmp.ava.assertion_value.len());
            cache.set(aidx, ava);
            n += ber::tlv_len(ava);
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        ProtocolOp::AbandonRequest(id) => ber::int_tlv_len(i64::from(id.0)),
        ProtocolOp::ExtendedRequest(e) => {
            let idx = cache.reserve();
            let mut n = ber::tlv_len(e.request_name.0.len());
            let value = e.effective_value();
            if let Some(v) = &value {
                n += ber::tlv_len(v.len());
            }
            cache.push_value(value);
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        ProtocolOp::ExtendedResponse(e) => {
            let idx = cache.reserve();
            let mut n = compute_result_content(&e.result, cache);
            if let Some(name) = &e.response_name {
                n += ber::tlv_len(name.0.len());
            }
            let value = e.effective_value();
            if let Some(v) = &value {
                n += ber::tlv_len(v.len());
            }
            cache.push_value(value);
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        ProtocolOp::IntermediateResponse(i) => {
            let idx = cache.reserve();
            let mut n = 0;
            if let Some(name) = &i.response_name {
                n += ber::tlv_len(name.0.len());
            }
            if let Some(v) = &i.response_value {
                n += ber::tlv_len(v.len());
            }
            cache.set(idx, n);
            ber::tlv_len(n)
        }
    }
}

fn write_op(op: &ProtocolOp, w: &mut BerWriter, cur: &mut CacheCursor) -> Result<(), EncodeError> {
    match op {
        ProtocolOp::BindRequest(b) => {
            w.put_header(0x60, cur.len()?)?;
            w.put_integer(0x02, i64::from(b.version))?;
            w.put_octet_string(0x04, b.name.0.as_bytes())?;
            match &b.authentication {
                AuthenticationChoice::Simple(creds) => w.put_octet_string(0x80, creds)?,
                AuthenticationChoice::Sasl(sasl) => {
                    w.put_header(0xa3, cur.len()?)?;
                    w.put_octet_string(0x04, sasl.mechanism.0.as_bytes())?;
                    if let Some(creds) = &sasl.credentials {
                        w.put_octet_string(0x04, creds)?;
                    }
                }
            }
        }
        ProtocolOp::BindResponse(b) => {
            w.put_header(0x61, cur.len()?)?;
            write_result_content(&b.result, w, cur)?;
            if let Some(creds) = &b.server_sasl_creds {
                w.put_octet_string(0x87, creds)?;
            }
        }
        ProtocolOp::UnbindRequest => w.put_header(0x42, 0)?,
        ProtocolOp::SearchRequest(s) => {
            w.put_header(0x63, cur.len()?)?;
            w.put_octet_string(0x04, s.base_object.0.as_bytes())?;
            w.put_integer(0x0a, i64::from(s.scope.0))?;
            w.put_integer(0x0a, i64::from(s.deref_aliases.0))?;
            w.put_integer(0x02, clamp_u64(s.size_limit))?;
            w.put_integer(0x02, i64::from(s.time_limit))?;
            w.put_boolean(0x01, s.types_only)?;
            write_filter(&s.filter, w, cur)?;
            w.put_header(0x30, cur.len()?)?;
            for attr in &s.attributes {
                w.put_octet_string(0x04, attr.0.as_bytes())?;
            }
        }
        ProtocolOp::SearchResultEntry(e) => {
            w.put_header(0x64, cur.len()?)?;
            w.put_octet_string(0x04, e.object_name.0.as_bytes())?;
            w.put_header(0x30, cur.len()?)?;
            for attr in &e.attributes {
                write_attribute(&attr.attr_type, &attr.attr_vals, w, cur)?;
            }
        }
        ProtocolOp::SearchResultDone(r) => {
            w.put_header(0x65, cur.len()?)?;
            write_result_content(r, w, cur)?;
        }
        ProtocolOp::ModifyResponse(r) => {
            w.put_header(0x67, cur.len()?)?;
            write_result_content(r, w, cur)?;
        }
        ProtocolOp::AddResponse(r) => {
            w.put_header(0x69, cur.len()?)?;
            write_result_content(r, w, cur)?;
        }
        ProtocolOp::DelResponse(r) => {
            w.put_header(0x6b, cur.len()?)?;
            write_result_content(r, w, cur)?;
        }
        ProtocolOp::ModDnResponse(r) => {
            w.put_header(0x6d, cur.len()?)?;
            write_result_content(r, w, cur)?;
        }
        ProtocolOp::CompareResponse(r) => {
            w.put_header(0x6f, cur.len()?)?;
            write_result_content(r, w, cur)?;
        }
        ProtocolOp::SearchResultReference(uris) => {
            w.put_header(0x73, cur.len()?)?;
            for uri in uris {
                w.put_octet_string(0x04, uri.0.as_bytes())?;
            }
        }
        ProtocolOp::ModifyRequest(m) => {
            w.put_header(0x66, cur.len()?)?;
            w.put_octet_string(0x04, m.object.0.as_bytes())?;
            w.put_header(0x30, cur.len()?)?;
            for change in &m.changes {
                w.put_header(0x30, cur.len()?)?;
                w.put_integer(0x0a, i64::from(change.operation.0))?;
                write_attribute(
                    &change.modification.attr_type,
                    &change.modification.attr_vals,
                    w,
                    cur,
                )?;
            }
        }
        ProtocolOp::AddRequest(a) => {
            w.put_header(0x68, cur.len()?)?;
            w.put_octet_string(0x04, a.entry.0.as_bytes())?;
            w.put_header(0x30, cur.len()?)?;
            for attr in &a.attributes {
                write_attribute(&attr.attr_type, &attr.attr_vals, w, cur)?;
            }
        }
        ProtocolOp::DelRequest(dn) => w.put_octet_string(0x4a, dn.0.as_bytes())?,
        ProtocolOp::ModDnRequest(m) => {
            w.put_header(0x6c, cur.len()?)?;
            w.put_octet_string(0x04, m.entry.0.as_bytes())?;
            w.put_octet_string(0x04, m.new_rdn.0.as_bytes())?;
            w.put_boolean(0x01, m.delete_old_rdn)?;
            if let Some(superior) = &m.new_superior {
                w.put_octet_string(0x80, superior.0.as_bytes())?;
            }
        }
        ProtocolOp::CompareRequest(cmp) => {
            w.put_header(0x6e, cur.len()?)?;
            w.put_octet_string(0x04, cmp.entry.0.as_bytes())?;
            w.put_header(0x30, cur.len()?)?;
            w.put_octet_string(0x04, cmp.ava.attribute_desc.0.as_bytes())?;
            w.put_octet_string(0x04, &cmp.ava.assertion_value)?;
        }
        ProtocolOp::AbandonRequest(id) => w.put_integer(0x50, i64::from(id.0))?,
        ProtocolOp::ExtendedRequest(e) => {
            w.put_header(0x77, cur.len()?)?;
            w.put_octet_string(0x80, e.request_name.0.as_bytes())?;
            if let Some(v) = cur.value()? {
                w.put_octet_string(0x81, v)?;
            }
        }
        ProtocolOp::ExtendedResponse(e) => {
            w.put_header(0x78, cur.len()?)?;
            write_result_content(&e.result, w, cur)?;
            if let Some(name) = &e.response_name {
                w.put_octet_string(0x8a, name.0.as_bytes())?;
            }
            if let Some(v) = cur.value()? {
                w.put_octet_string(0x8b, v)?;
            }
        }
        ProtocolOp::IntermediateResponse(i) => {
            w.put_header(0x79, cur.len()?)?;
            if let Some(name) = &i.response_name {
                w.put_octet_string(0x80, name.0.as_bytes())?;
            }
            if let Some(v) = &i.response_value {
                w.put_octet_string(0x81, v)?;
            }
        }
    }
    Ok(())
}

// LDAPResult ::= SEQUENCE {
//      resultCode, matchedDN, diagnosticMessage, referral [3] OPTIONAL }
fn compute_result_content(r: &LdapResult, cache: &mut LengthCache) -> usize {
    let mut n = ber::int_tlv_len(i64::from(r.result_code.0))
        + ber::tlv_len(matched_dn(r).len())
        + ber::tlv_len(r.diagnostic_message.0.len());
    if let Some(uris) = &r.referral {
        // a present referral is never empty; an empty one encodes as absent
        if !uris.is_empty() {
            let idx = cache.reserve();
            let m: usize = uris.iter().map(|u| ber::tlv_len(u.0.len())).sum();
            cache.set(idx, m);
            n += ber::tlv_len(m);
        }
    }
    n
}

fn write_result_content(
    r: &LdapResult,
    w: &mut BerWriter,
    cur: &mut CacheCursor,
) -> Result<(), EncodeError> {
    w.put_integer(0x0a, i64::from(r.result_code.0))?;
    w.put_octet_string(0x04, matched_dn(r).as_bytes())?;
    w.put_octet_string(0x04, r.diagnostic_message.0.as_bytes())?;
    if let Some(uris) = &r.referral {
        if !uris.is_empty() {
            w.put_header(0xa3, cur.len()?)?;
            for uri in uris {
                w.put_octet_string(0x04, uri.0.as_bytes())?;
            }
        }
    }
    Ok(())
}

/// Leading whitespace of matchedDN is trimmed (legacy peer compatibility);
/// both passes must agree on the trimmed form.
fn matched_dn(r: &LdapResult) -> &str {
    r.matched_dn.0.trim_start()
}

// PartialAttribute ::= SEQUENCE {
//      type       AttributeDescription,
//      vals       SET OF value AttributeValue }
fn compute_attribute(
    attr_type: &LdapString,
    vals: &[AttributeValue],
    cache: &mut LengthCache,
) -> usize {
    let idx = cache.reserve();
    let vidx = cache.reserve();
    let set: usize = vals.iter().map(|v| ber::tlv_len(v.as_bytes().len())).sum();
    cache.set(vidx, set);
    let n = ber::tlv_len(attr_type.0.len()) + ber::tlv_len(set);
    cache.set(idx, n);
    ber::tlv_len(n)
}

fn write_attribute(
    attr_type: &LdapString,
    vals: &[AttributeValue],
    w: &mut BerWriter,
    cur: &mut CacheCursor,
) -> Result<(), EncodeError> {
    w.put_header(0x30, cur.len()?)?;
    w.put_octet_string(0x04, attr_type.0.as_bytes())?;
    w.put_header(0x31, cur.len()?)?;
    for v in vals {
        w.put_octet_string(0x04, v.as_bytes())?;
    }
    Ok(())
}

// Filter ::= CHOICE { and [0], or [1], not [2], equalityMatch [3],
//     substrings [4], greaterOrEqual [5], lessOrEqual [6], present [7],
//     approxMatch [8], extensibleMatch [9] }
fn compute_filter(f: &Filter, cache: &mut LengthCache) -> usize {
    match f {
        Filter::And(children) | Filter::Or(children) => {
            let idx = cache.reserve();
            let n: usize = children.iter().map(|c| compute_filter(c, cache)).sum();
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        Filter::Not(inner) => {
            let idx = cache.reserve();
            let n = compute_filter(inner, cache);
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        Filter::EqualityMatch(ava)
        | Filter::GreaterOrEqual(ava)
        | Filter::LessOrEqual(ava)
        | Filter::ApproxMatch(ava) => {
            let idx = cache.reserve();
            let n = ber::tlv_len(ava.attribute_desc.0.len())
                + ber::tlv_len(ava.assertion_value.len());
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        Filter::Substrings(s) => {
            let idx = cache.reserve();
            let sidx = cache.reserve();
            let parts: usize = s
                .substrings
                .iter()
                .map(|p| ber::tlv_len(substring_bytes(p).len()))
                .sum();
            cache.set(sidx, parts);
            let n = ber::tlv_len(s.filter_type.0.len()) + ber::tlv_len(parts);
            cache.set(idx, n);
            ber::tlv_len(n)
        }
        Filter::Present(attr) => ber::tlv_len(attr.0.len()),
        Filter::ExtensibleMatch(m) => {
            let idx = cache.reserve();
            let mut n = ber::tlv_len(m.assertion_value.len());
            if let Some(rule) = &m.matching_rule {
                n += ber::tlv_len(rule.0.len());
            }
            if let Some(rule_type) = &m.rule_type {
                n += ber::tlv_len(rule_type.0.len());
            }
            // DEFAULT FALSE: only encoded when set
            if m.dn_attributes {
                n += 3;
            }
            cache.set(idx, n);
            ber::tlv_len(n)
        }
    }
}

fn write_filter(f: &Filter, w: &mut BerWriter, cur: &mut CacheCursor) -> Result<(), EncodeError> {
    match f {
        Filter::And(children) => {
            w.put_header(0xa0, cur.len()?)?;
            for child in children {
                write_filter(child, w, cur)?;
            }
        }
        Filter::Or(children) => {
            w.put_header(0xa1, cur.len()?)?;
            for child in children {
                write_filter(child, w, cur)?;
            }
        }
        Filter::Not(inner) => {
            w.put_header(0xa2, cur.len()?)?;
            write_filter(inner, w, cur)?;
        }
        Filter::EqualityMatch(ava) => write_ava_filter(0xa3, ava, w, cur)?,
        Filter::GreaterOrEqual(ava) => write_ava_filter(0xa5, ava, w, cur)?,
        Filter::LessOrEqual(ava) => write_ava_filter(0xa6, ava, w, cur)?,
        Filter::ApproxMatch(ava) => write_ava_filter(0xa8, ava, w, cur)?,
        Filter::Substrings(s) => {
            w.put_header(0xa4, cur.len()?)?;
            w.put_octet_string(0x04, s.filter_type.0.as_bytes())?;
            w.put_header(0x30, cur.len()?)?;
            for part in &s.substrings {
                let tag = match part {
                    Substring::Initial(_) => 0x80,
                    Substring::Any(_) => 0x81,
                    Substring::Final(_) => 0x82,
                };
                w.put_octet_string(tag, substring_bytes(part))?;
            }
        }
        Filter::Present(attr) => w.put_octet_string(0x87, attr.0.as_bytes())?,
        Filter::ExtensibleMatch(m) => {
            w.put_header(0xa9, cur.len()?)?;
            if let Some(rule) = &m.matching_rule {
                w.put_octet_string(0x81, rule.0.as_bytes())?;
            }
            if let Some(rule_type) = &m.rule_type {
                w.put_octet_string(0x82, rule_type.0.as_bytes())?;
            }
            w.put_octet_string(0x83, &m.assertion_value)?;
            if m.dn_attributes {
                w.put_boolean(0x84, true)?;
            }
        }
    }
    Ok(())
}

fn write_ava_filter(
    tag: u8,
    ava: &crate::filter::AttributeValueAssertion,
    w: &mut BerWriter,
    cur: &mut CacheCursor,
) -> Result<(), EncodeError> {
    w.put_header(tag, cur.len()?)?;
    w.put_octet_string(0x04, ava.attribute_desc.0.as_bytes())?;
    w.put_octet_string(0x04, &ava.assertion_value)
}

fn substring_bytes(part: &Substring) -> &[u8] {
    match part {
        Substring::Initial(b) | Substring::Any(b) | Substring::Final(b) => b,
    }
}

// Controls ::= SEQUENCE OF control SEQUENCE {
//     controlType             LDAPOID,
//     criticality             BOOLEAN DEFAULT FALSE,
//     controlValue            OCTET STRING OPTIONAL }
fn compute_controls(controls: &[Control], cache: &mut LengthCache) -> usize {
    let idx = cache.reserve();
    let mut n = 0;
    for control in controls {
        let cidx = cache.reserve();
        let mut m = ber::tlv_len(control.oid.0.len());
        // DEFAULT FALSE: only encoded when set
        if control.criticality {
            m += 3;
        }
        let value = control.effective_value();
        if let Some(v) = &value {
            m += ber::tlv_len(v.len());
        }
        cache.push_value(value);
        cache.set(cidx, m);
        n += ber::tlv_len(m);
    }
    cache.set(idx, n);
    ber::tlv_len(n)
}

fn write_controls(
    controls: &[Control],
    w: &mut BerWriter,
    cur: &mut CacheCursor,
) -> Result<(), EncodeError> {
    w.put_header(0xa0, cur.len()?)?;
    for control in controls {
        w.put_header(0x30, cur.len()?)?;
        w.put_octet_string(0x04, control.oid.0.as_bytes())?;
        if control.criticality {
            w.put_boolean(0x01, true)?;
        }
        if let Some(v) = cur.value()? {
            w.put_octet_string(0x04, v)?;
        }
    }
    Ok(())
}

/// sizeLimit travels as a (wide) INTEGER; values past i64 cannot be encoded
/// and saturate.
fn clamp_u64(v: u64) -> i64 {
    v.min(i64::MAX as u64) as i64
}
