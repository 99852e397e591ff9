use hex_literal::hex;

use ldap_codec::controls::{
    Control, ControlPayload, PagedResults, SortKey, PAGED_RESULTS_OID, SORT_REQUEST_OID,
};
use ldap_codec::extensions::{
    ExtendedPayload, PasswordModifyRequest, NOTICE_OF_DISCONNECTION_OID, PASSWORD_MODIFY_OID,
    START_TLS_OID,
};
use ldap_codec::filter::{
    Attribute, AttributeValue, AttributeValueAssertion, Filter, MatchingRuleAssertion,
    PartialAttribute, Substring, SubstringFilter,
};
use ldap_codec::ldap::{
    AddRequest, AuthenticationChoice, BindRequest, BindResponse, Change, CompareRequest,
    DerefAliases, ExtendedRequest, ExtendedResponse, IntermediateResponse, LdapMessage,
    LdapResult, MessageId, ModDnRequest, ModifyOperation, ModifyRequest, ProtocolOp,
    ResultCode, SaslCredentials, SearchRequest, SearchResultEntry, SearchScope,
};
use ldap_codec::{encode, DecodeError, MessageDecoder};

/// Wrap content octets into one TLV (tests only deal in short PDUs).
fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    assert!(content.len() < 128);
    let mut out = vec![tag, content.len() as u8];
    out.extend_from_slice(content);
    out
}

/// Wrap a protocol op (and optional controls) into an LDAPMessage PDU.
fn message_pdu(id: u8, parts: &[&[u8]]) -> Vec<u8> {
    let mut content = tlv(0x02, &[id]);
    for part in parts {
        content.extend_from_slice(part);
    }
    tlv(0x30, &content)
}

fn decode_one(pdu: &[u8]) -> Result<Option<LdapMessage>, DecodeError> {
    MessageDecoder::new().decode(pdu)
}

fn round_trip(msg: &LdapMessage) {
    let pdu = encode(msg).expect("encoding failed");
    let decoded = decode_one(&pdu)
        .expect("decoding failed")
        .expect("message is complete");
    assert_eq!(&decoded, msg);
    // re-encoding a decoded message is byte-identical
    assert_eq!(encode(&decoded).expect("re-encoding failed"), pdu);
}

fn search_request(filter: Filter) -> LdapMessage {
    LdapMessage::new(
        MessageId(2),
        ProtocolOp::SearchRequest(SearchRequest {
            base_object: "".into(),
            scope: SearchScope::WholeSubtree,
            deref_aliases: DerefAliases::NeverDerefAliases,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter,
            attributes: vec!["cn".into(), "sn".into()],
        }),
    )
}

#[test]
fn test_abandon_round_trip() {
    static DATA: &[u8] = &hex!("30 06 02 01 03 50 01 02");

    let msg = decode_one(DATA).expect("decoding failed").expect("complete");
    assert_eq!(msg.message_id, MessageId(3));
    assert!(matches!(
        msg.protocol_op,
        ProtocolOp::AbandonRequest(MessageId(2))
    ));
    assert!(msg.controls.is_none());
    assert_eq!(encode(&msg).expect("encoding failed"), DATA);
}

#[test]
fn test_simple_bind_round_trip() {
    let msg = LdapMessage::new(
        MessageId(1),
        ProtocolOp::BindRequest(BindRequest {
            version: 3,
            name: "uid=admin,ou=system".into(),
            authentication: AuthenticationChoice::Simple(b"secret".to_vec()),
        }),
    );
    let pdu = encode(&msg).expect("encoding failed");
    assert_eq!(
        pdu,
        hex!(
            "30 25 02 01 01 60 20 02 01 03"
            "04 13 75 69 64 3d 61 64 6d 69 6e 2c 6f 75 3d 73 79 73 74 65 6d"
            "80 06 73 65 63 72 65 74"
        )
    );
    let decoded = decode_one(&pdu).expect("decoding failed").expect("complete");
    assert_eq!(decoded, msg);
    match &decoded.protocol_op {
        ProtocolOp::BindRequest(req) => assert!(req.is_version3()),
        other => panic!("unexpected operation: {other:?}"),
    }
}

#[test]
fn test_search_request_filter_bytes() {
    // (&(cn=a)(|(sn=b)(sn=c)))
    let filter = Filter::And(vec![
        Filter::EqualityMatch(AttributeValueAssertion::new("cn", b"a")),
        Filter::Or(vec![
            Filter::EqualityMatch(AttributeValueAssertion::new("sn", b"b")),
            Filter::EqualityMatch(AttributeValueAssertion::new("sn", b"c")),
        ]),
    ]);
    let msg = search_request(filter);
    let pdu = encode(&msg).expect("encoding failed");
    assert_eq!(
        pdu,
        hex!(
            "30 3f 02 01 02 63 3a 04 00 0a 01 02 0a 01 00"
            "02 01 00 02 01 00 01 01 00"
            "a0 1d"
            "a3 07 04 02 63 6e 04 01 61"
            "a1 12"
            "a3 07 04 02 73 6e 04 01 62"
            "a3 07 04 02 73 6e 04 01 63"
            "30 08 04 02 63 6e 04 02 73 6e"
        )
    );
    round_trip(&msg);
}

#[test]
fn test_search_request_split_buffer_byte_by_byte() {
    let msg = search_request(Filter::Present("objectClass".into()));
    let pdu = encode(&msg).expect("encoding failed");
    let mut decoder = MessageDecoder::new();
    for &b in &pdu[..pdu.len() - 1] {
        assert!(decoder.decode(&[b]).expect("decoding failed").is_none());
    }
    let decoded = decoder
        .decode(&pdu[pdu.len() - 1..])
        .expect("decoding failed")
        .expect("message completes on the final byte");
    assert_eq!(decoded, msg);
}

#[test]
fn test_split_at_every_offset() {
    let msg = LdapMessage::new(
        MessageId(1),
        ProtocolOp::BindRequest(BindRequest {
            version: 3,
            name: "uid=admin,ou=system".into(),
            authentication: AuthenticationChoice::Simple(b"secret".to_vec()),
        }),
    );
    let pdu = encode(&msg).expect("encoding failed");
    for split in 0..pdu.len() {
        let mut decoder = MessageDecoder::new();
        let first = decoder.decode(&pdu[..split]).expect("decoding failed");
        assert!(first.is_none(), "complete before the last byte (split {split})");
        let second = decoder
            .decode(&pdu[split..])
            .expect("decoding failed")
            .expect("message is complete");
        assert_eq!(second, msg);
    }
}

#[test]
fn test_add_request_with_invalid_dn() {
    let op = tlv(0x68, &[tlv(0x04, b"not a dn"), tlv(0x30, &[])].concat());
    let pdu = message_pdu(5, &[&op]);
    match decode_one(&pdu) {
        Err(DecodeError::ResponseCarrying(e)) => {
            assert_eq!(e.message_id, MessageId(5));
            assert_eq!(e.result_code, ResultCode::NamingViolation);
            match &e.response {
                ProtocolOp::AddResponse(r) => {
                    assert_eq!(r.result_code, ResultCode::NamingViolation)
                }
                other => panic!("unexpected response kind: {other:?}"),
            }
            let reply = e.response_message();
            assert_eq!(reply.message_id, MessageId(5));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_decoder_survives_response_carrying_error() {
    let op = tlv(0x68, &[tlv(0x04, b"not a dn"), tlv(0x30, &[])].concat());
    let bad = message_pdu(5, &[&op]);
    let good = hex!("30 06 02 01 03 50 01 02");
    let mut decoder = MessageDecoder::new();
    assert!(matches!(
        decoder.decode(&bad),
        Err(DecodeError::ResponseCarrying(_))
    ));
    // the offending PDU was skipped; the connection stays usable
    let msg = decoder
        .decode(&good)
        .expect("decoding failed")
        .expect("complete");
    assert_eq!(msg.message_id, MessageId(3));
}

#[test]
fn test_bind_response_with_referrals() {
    let msg = LdapMessage::new(
        MessageId(4),
        ProtocolOp::BindResponse(BindResponse {
            result: LdapResult {
                result_code: ResultCode::Referral,
                matched_dn: "".into(),
                diagnostic_message: "try elsewhere".into(),
                referral: Some(vec!["ldap://host1".into(), "ldap://host2".into()]),
            },
            server_sasl_creds: None,
        }),
    );
    let pdu = encode(&msg).expect("encoding failed");
    let decoded = decode_one(&pdu).expect("decoding failed").expect("complete");
    match &decoded.protocol_op {
        ProtocolOp::BindResponse(resp) => {
            let uris = resp.result.referral.as_ref().expect("referral is present");
            assert_eq!(uris.len(), 2);
            assert_eq!(uris[0].0, "ldap://host1");
            assert_eq!(uris[1].0, "ldap://host2");
        }
        other => panic!("unexpected operation: {other:?}"),
    }
    round_trip(&msg);
}

#[test]
fn test_empty_referral_is_rejected() {
    // referral [3] must hold at least one URI
    let result = [
        tlv(0x0a, &[0x0a]),
        tlv(0x04, b""),
        tlv(0x04, b""),
        tlv(0xa3, &[]),
    ]
    .concat();
    let pdu = message_pdu(4, &[&tlv(0x61, &result)]);
    assert!(matches!(decode_one(&pdu), Err(DecodeError::Protocol(_))));
}

#[test]
fn test_sasl_bind_round_trip() {
    let msg = LdapMessage::new(
        MessageId(1),
        ProtocolOp::BindRequest(BindRequest {
            version: 3,
            name: "".into(),
            authentication: AuthenticationChoice::Sasl(SaslCredentials {
                mechanism: "GSS-SPNEGO".into(),
                credentials: Some(b"\x01\x02\x03".to_vec()),
            }),
        }),
    );
    round_trip(&msg);
}

#[test]
fn test_empty_bind_dn_is_accepted() {
    let op = tlv(
        0x60,
        &[tlv(0x02, &[0x03]), tlv(0x04, b""), tlv(0x80, b"")].concat(),
    );
    let pdu = message_pdu(1, &[&op]);
    let msg = decode_one(&pdu).expect("decoding failed").expect("complete");
    match &msg.protocol_op {
        ProtocolOp::BindRequest(req) => {
            assert_eq!(req.name.0, "");
            assert_eq!(
                req.authentication,
                AuthenticationChoice::Simple(Vec::new())
            );
        }
        other => panic!("unexpected operation: {other:?}"),
    }
}

#[test]
fn test_zero_length_sasl_sequence() {
    let op = tlv(
        0x60,
        &[tlv(0x02, &[0x03]), tlv(0x04, b""), tlv(0xa3, b"")].concat(),
    );
    let pdu = message_pdu(1, &[&op]);
    match decode_one(&pdu) {
        Err(DecodeError::ResponseCarrying(e)) => {
            assert_eq!(e.result_code, ResultCode::InvalidCredentials);
            assert!(matches!(e.response, ProtocolOp::BindResponse(_)));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_message_id_zero_is_reserved() {
    // a request with message id 0 is a protocol error...
    let pdu = hex!("30 06 02 01 00 50 01 02");
    let mut decoder = MessageDecoder::new();
    assert!(matches!(
        decoder.decode(&pdu),
        Err(DecodeError::Protocol(_))
    ));
    // ...and the decoder is dead afterwards
    assert!(decoder.decode(&[]).is_err());
}

#[test]
fn test_unsolicited_notice_of_disconnection() {
    let msg = LdapMessage::new(
        MessageId(0),
        ProtocolOp::ExtendedResponse(ExtendedResponse {
            result: LdapResult::new(ResultCode::Unavailable, "shutting down"),
            response_name: Some(NOTICE_OF_DISCONNECTION_OID.into()),
            response_value: None,
            payload: None,
        }),
    );
    let pdu = encode(&msg).expect("encoding failed");
    let decoded = decode_one(&pdu).expect("decoding failed").expect("complete");
    match &decoded.protocol_op {
        ProtocolOp::ExtendedResponse(resp) => {
            assert_eq!(
                resp.payload,
                Some(ExtendedPayload::DisconnectionNotice)
            );
        }
        other => panic!("unexpected operation: {other:?}"),
    }
}

#[test]
fn test_max_message_id() {
    let msg = LdapMessage::new(
        MessageId(2_147_483_647),
        ProtocolOp::AbandonRequest(MessageId(2)),
    );
    round_trip(&msg);
}

#[test]
fn test_control_with_non_canonical_criticality() {
    // criticality 0x01 instead of 0xff: accepted (with a warning logged)
    let control = tlv(
        0x30,
        &[tlv(0x04, b"2.16.840.1.113730.3.4.2"), tlv(0x01, &[0x01])].concat(),
    );
    let controls = tlv(0xa0, &control);
    let op = tlv(0x4a, b"dc=org");
    let pdu = message_pdu(9, &[&op, &controls]);
    let msg = decode_one(&pdu).expect("decoding failed").expect("complete");
    let controls = msg.controls.as_ref().expect("controls are present");
    assert_eq!(controls.len(), 1);
    assert_eq!(controls[0].oid.0, "2.16.840.1.113730.3.4.2");
    assert!(controls[0].criticality);
}

#[test]
fn test_controls_preserve_order_and_duplicates() {
    let first = Control::from_payload(ControlPayload::PagedResults(PagedResults {
        size: 100,
        cookie: b"aa".to_vec(),
    }));
    let second = Control::from_payload(ControlPayload::PagedResults(PagedResults {
        size: 200,
        cookie: b"bb".to_vec(),
    }));
    let mut msg = search_request(Filter::Present("cn".into()));
    msg.controls = Some(vec![first, second]);
    let pdu = encode(&msg).expect("encoding failed");
    let decoded = decode_one(&pdu).expect("decoding failed").expect("complete");
    let controls = decoded.controls.as_ref().expect("controls are present");
    assert_eq!(controls.len(), 2);
    match (&controls[0].payload, &controls[1].payload) {
        (
            Some(ControlPayload::PagedResults(a)),
            Some(ControlPayload::PagedResults(b)),
        ) => {
            assert_eq!((a.size, b.size), (100, 200));
            assert_eq!((&a.cookie[..], &b.cookie[..]), (&b"aa"[..], &b"bb"[..]));
        }
        other => panic!("unexpected payloads: {other:?}"),
    }
    assert_eq!(encode(&decoded).expect("re-encoding failed"), pdu);
}

#[test]
fn test_mutated_typed_control_reaches_the_wire() {
    let mut msg = search_request(Filter::Present("cn".into()));
    msg.controls = Some(vec![Control::from_payload(ControlPayload::PagedResults(
        PagedResults {
            size: 100,
            cookie: Vec::new(),
        },
    ))]);
    let pdu = encode(&msg).expect("encoding failed");
    let mut decoded = decode_one(&pdu).expect("decoding failed").expect("complete");
    {
        let controls = decoded.controls.as_mut().expect("controls are present");
        match &mut controls[0].payload {
            Some(ControlPayload::PagedResults(p)) => p.size = 7,
            other => panic!("unexpected payload: {other:?}"),
        }
    }
    let pdu2 = encode(&decoded).expect("re-encoding failed");
    let again = decode_one(&pdu2).expect("decoding failed").expect("complete");
    match &again.controls.as_ref().expect("controls")[0].payload {
        Some(ControlPayload::PagedResults(p)) => assert_eq!(p.size, 7),
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[test]
fn test_filter_depth_past_one_hundred() {
    let mut filter = Filter::Present("cn".into());
    for _ in 0..120 {
        filter = Filter::Not(Box::new(filter));
    }
    round_trip(&search_request(filter));
}

#[test]
fn test_empty_and_filter_is_rejected() {
    let search_content = [
        tlv(0x04, b""),
        tlv(0x0a, &[0x02]),
        tlv(0x0a, &[0x00]),
        tlv(0x02, &[0x00]),
        tlv(0x02, &[0x00]),
        tlv(0x01, &[0x00]),
        tlv(0xa0, &[]), // and with no children
        tlv(0x30, &[]),
    ]
    .concat();
    let pdu = message_pdu(2, &[&tlv(0x63, &search_content)]);
    assert!(matches!(decode_one(&pdu), Err(DecodeError::Protocol(_))));
}

#[test]
fn test_substring_misordering_is_rejected() {
    // two 'final' parts in one substring filter
    let parts = [tlv(0x82, b"x"), tlv(0x82, b"y")].concat();
    let filter = tlv(0xa4, &[tlv(0x04, b"cn"), tlv(0x30, &parts)].concat());
    let search_content = [
        tlv(0x04, b""),
        tlv(0x0a, &[0x02]),
        tlv(0x0a, &[0x00]),
        tlv(0x02, &[0x00]),
        tlv(0x02, &[0x00]),
        tlv(0x01, &[0x00]),
        filter,
        tlv(0x30, &[]),
    ]
    .concat();
    let pdu = message_pdu(2, &[&tlv(0x63, &search_content)]);
    assert!(matches!(decode_one(&pdu), Err(DecodeError::Protocol(_))));
}

#[test]
fn test_truncated_bind_request_is_rejected() {
    // authentication choice is required
    let op = tlv(0x60, &[tlv(0x02, &[0x03]), tlv(0x04, b"")].concat());
    let pdu = message_pdu(1, &[&op]);
    assert!(matches!(decode_one(&pdu), Err(DecodeError::Protocol(_))));
}

#[test]
fn test_unknown_application_tag_is_rejected() {
    // [APPLICATION 17] is not an LDAP operation
    let pdu = message_pdu(1, &[&tlv(0x71, b"")]);
    assert!(matches!(decode_one(&pdu), Err(DecodeError::Protocol(_))));
}

#[test]
fn test_two_pdus_in_one_buffer() {
    let first = encode(&LdapMessage::new(
        MessageId(3),
        ProtocolOp::AbandonRequest(MessageId(2)),
    ))
    .expect("encoding failed");
    let second = encode(&LdapMessage::new(MessageId(4), ProtocolOp::UnbindRequest))
        .expect("encoding failed");
    let mut decoder = MessageDecoder::new();
    let stream = [first, second].concat();
    let a = decoder.decode(&stream).expect("decoding failed").expect("first");
    assert_eq!(a.message_id, MessageId(3));
    let b = decoder.decode(&[]).expect("decoding failed").expect("second");
    assert_eq!(b.message_id, MessageId(4));
    assert!(matches!(b.protocol_op, ProtocolOp::UnbindRequest));
}

#[test]
fn test_modify_dn_empty_superior_kept_without_delete_old_rdn() {
    let op = tlv(
        0x6c,
        &[
            tlv(0x04, b"cn=aa,dc=org"),
            tlv(0x04, b"cn=bb"),
            tlv(0x01, &[0x00]),
            tlv(0x80, b""),
        ]
        .concat(),
    );
    let pdu = message_pdu(6, &[&op]);
    let msg = decode_one(&pdu).expect("decoding failed").expect("complete");
    match &msg.protocol_op {
        ProtocolOp::ModDnRequest(req) => {
            assert!(!req.delete_old_rdn);
            assert_eq!(req.new_superior.as_ref().map(|dn| dn.0.as_str()), Some(""));
        }
        other => panic!("unexpected operation: {other:?}"),
    }
}

#[test]
fn test_modify_dn_empty_superior_rejected_with_delete_old_rdn() {
    let op = tlv(
        0x6c,
        &[
            tlv(0x04, b"cn=aa,dc=org"),
            tlv(0x04, b"cn=bb"),
            tlv(0x01, &[0xff]),
            tlv(0x80, b""),
        ]
        .concat(),
    );
    let pdu = message_pdu(6, &[&op]);
    match decode_one(&pdu) {
        Err(DecodeError::ResponseCarrying(e)) => {
            assert_eq!(e.result_code, ResultCode::InvalidDNSyntax);
            assert!(matches!(e.response, ProtocolOp::ModDnResponse(_)));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_modify_dn_multi_rdn_newrdn_is_rejected() {
    let op = tlv(
        0x6c,
        &[
            tlv(0x04, b"cn=aa,dc=org"),
            tlv(0x04, b"cn=bb,dc=org"),
            tlv(0x01, &[0x00]),
        ]
        .concat(),
    );
    let pdu = message_pdu(6, &[&op]);
    match decode_one(&pdu) {
        Err(DecodeError::ResponseCarrying(e)) => {
            assert_eq!(e.result_code, ResultCode::InvalidDNSyntax);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_password_modify_request_payload() {
    let msg = LdapMessage::new(
        MessageId(8),
        ProtocolOp::ExtendedRequest(ExtendedRequest {
            request_name: PASSWORD_MODIFY_OID.into(),
            request_value: None,
            payload: Some(ExtendedPayload::PasswordModifyRequest(
                PasswordModifyRequest {
                    user_identity: Some("uid=admin,ou=system".to_owned()),
                    old_password: Some(b"old".to_vec()),
                    new_password: Some(b"new".to_vec()),
                },
            )),
        }),
    );
    let pdu = encode(&msg).expect("encoding failed");
    let decoded = decode_one(&pdu).expect("decoding failed").expect("complete");
    match &decoded.protocol_op {
        ProtocolOp::ExtendedRequest(req) => match &req.payload {
            Some(ExtendedPayload::PasswordModifyRequest(p)) => {
                assert_eq!(p.user_identity.as_deref(), Some("uid=admin,ou=system"));
                assert_eq!(p.new_password.as_deref(), Some(&b"new"[..]));
            }
            other => panic!("unexpected payload: {other:?}"),
        },
        other => panic!("unexpected operation: {other:?}"),
    }
    assert_eq!(decoded, msg);
}

#[test]
fn test_invalid_extended_request_name() {
    let op = tlv(0x77, &tlv(0x80, b"not-an-oid"));
    let pdu = message_pdu(7, &[&op]);
    match decode_one(&pdu) {
        Err(DecodeError::ResponseCarrying(e)) => {
            assert_eq!(e.result_code, ResultCode::ProtocolError);
            assert!(matches!(e.response, ProtocolOp::ExtendedResponse(_)));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_round_trip_every_operation() {
    let result = LdapResult::new(ResultCode::Success, "ok");
    let corpus = vec![
        LdapMessage::new(MessageId(1), ProtocolOp::UnbindRequest),
        LdapMessage::new(
            MessageId(2),
            ProtocolOp::DelRequest("cn=gone,dc=org".into()),
        ),
        LdapMessage::new(MessageId(3), ProtocolOp::DelResponse(result.clone())),
        LdapMessage::new(
            MessageId(4),
            ProtocolOp::SearchResultEntry(SearchResultEntry {
                object_name: "cn=a,dc=org".into(),
                attributes: vec![
                    PartialAttribute {
                        attr_type: "cn".into(),
                        attr_vals: vec!["a".into()],
                    },
                    PartialAttribute {
                        attr_type: "jpegPhoto".into(),
                        attr_vals: vec![AttributeValue::Binary(vec![0xff, 0xd8, 0x00])],
                    },
                    PartialAttribute {
                        attr_type: "seeAlso".into(),
                        attr_vals: Vec::new(),
                    },
                ],
            }),
        ),
        LdapMessage::new(MessageId(5), ProtocolOp::SearchResultDone(result.clone())),
        LdapMessage::new(
            MessageId(6),
            ProtocolOp::SearchResultReference(vec![
                "ldap://host1/dc=org".into(),
                "ldap://host2/dc=org".into(),
            ]),
        ),
        LdapMessage::new(
            MessageId(7),
            ProtocolOp::ModifyRequest(ModifyRequest {
                object: "cn=a,dc=org".into(),
                changes: vec![
                    Change {
                        operation: ModifyOperation::Replace,
                        modification: PartialAttribute {
                            attr_type: "description".into(),
                            attr_vals: vec!["updated".into()],
                        },
                    },
                    Change {
                        operation: ModifyOperation::Delete,
                        modification: PartialAttribute {
                            attr_type: "seeAlso".into(),
                            attr_vals: Vec::new(),
                        },
                    },
                ],
            }),
        ),
        LdapMessage::new(MessageId(8), ProtocolOp::ModifyResponse(result.clone())),
        LdapMessage::new(
            MessageId(9),
            ProtocolOp::AddRequest(AddRequest {
                entry: "cn=b,dc=org".into(),
                attributes: vec![Attribute {
                    attr_type: "objectClass".into(),
                    attr_vals: vec!["person".into(), "top".into()],
                }],
            }),
        ),
        LdapMessage::new(MessageId(10), ProtocolOp::AddResponse(result.clone())),
        LdapMessage::new(
            MessageId(11),
            ProtocolOp::ModDnRequest(ModDnRequest {
                entry: "cn=a,dc=org".into(),
                new_rdn: "cn=b".into(),
                delete_old_rdn: true,
                new_superior: Some("ou=people,dc=org".into()),
            }),
        ),
        LdapMessage::new(MessageId(12), ProtocolOp::ModDnResponse(result.clone())),
        LdapMessage::new(
            MessageId(13),
            ProtocolOp::CompareRequest(CompareRequest {
                entry: "cn=a,dc=org".into(),
                ava: AttributeValueAssertion::new("cn", b"a"),
            }),
        ),
        LdapMessage::new(MessageId(14), ProtocolOp::CompareResponse(result.clone())),
        LdapMessage::new(
            MessageId(15),
            ProtocolOp::BindResponse(BindResponse {
                result: result.clone(),
                server_sasl_creds: Some(b"challenge".to_vec()),
            }),
        ),
        LdapMessage::new(
            MessageId(16),
            ProtocolOp::IntermediateResponse(IntermediateResponse {
                response_name: Some("1.3.6.1.4.1.4203.1.9.1.4".into()),
                response_value: Some(b"cookie".to_vec()),
            }),
        ),
        LdapMessage::new(
            MessageId(17),
            ProtocolOp::ExtendedResponse(ExtendedResponse {
                result,
                response_name: None,
                response_value: None,
                payload: None,
            }),
        ),
        search_request(Filter::Substrings(SubstringFilter {
            filter_type: "cn".into(),
            substrings: vec![
                Substring::Initial(b"ad".to_vec()),
                Substring::Any(b"mi".to_vec()),
                Substring::Final(b"n".to_vec()),
            ],
        })),
        search_request(Filter::ExtensibleMatch(MatchingRuleAssertion {
            matching_rule: Some("caseIgnoreMatch".into()),
            rule_type: Some("cn".into()),
            assertion_value: b"fred".to_vec(),
            dn_attributes: true,
        })),
        search_request(Filter::GreaterOrEqual(AttributeValueAssertion::new(
            "uidNumber",
            b"1000",
        ))),
    ];
    for msg in &corpus {
        round_trip(msg);
    }
}

#[test]
fn test_sorted_search_round_trip() {
    let mut msg = search_request(Filter::Present("cn".into()));
    let mut sort = Control::from_payload(ControlPayload::SortRequest(vec![SortKey {
        attribute_type: "sn".to_owned(),
        ordering_rule: None,
        reverse_order: true,
    }]));
    sort.criticality = true;
    msg.controls = Some(vec![sort]);
    let pdu = encode(&msg).expect("encoding failed");
    let decoded = decode_one(&pdu).expect("decoding failed").expect("complete");
    let control = decoded.control(SORT_REQUEST_OID).expect("control is present");
    assert!(control.criticality);
    match &control.payload {
        Some(ControlPayload::SortRequest(keys)) => {
            assert_eq!(keys.len(), 1);
            assert_eq!(keys[0].attribute_type, "sn");
            assert!(keys[0].reverse_order);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
    assert_eq!(encode(&decoded).expect("re-encoding failed"), pdu);
}

#[test]
fn test_start_tls_round_trip() {
    let msg = LdapMessage::new(
        MessageId(1),
        ProtocolOp::ExtendedRequest(ExtendedRequest {
            request_name: START_TLS_OID.into(),
            request_value: None,
            payload: None,
        }),
    );
    let pdu = encode(&msg).expect("encoding failed");
    let decoded = decode_one(&pdu).expect("decoding failed").expect("complete");
    match &decoded.protocol_op {
        ProtocolOp::ExtendedRequest(req) => {
            assert_eq!(req.payload, Some(ExtendedPayload::StartTlsRequest));
        }
        other => panic!("unexpected operation: {other:?}"),
    }
    assert_eq!(encode(&decoded).expect("re-encoding failed"), pdu);
}

#[test]
fn test_paged_search_control_value() {
    // a paged search as emitted by real clients: size 100, empty cookie
    let control_value = hex!("30 05 02 01 64 04 00");
    let control = tlv(
        0x30,
        &[
            tlv(0x04, PAGED_RESULTS_OID.as_bytes()),
            tlv(0x04, &control_value),
        ]
        .concat(),
    );
    let controls = tlv(0xa0, &control);
    let op = tlv(0x4a, b"dc=org");
    let pdu = message_pdu(20, &[&op, &controls]);
    let msg = decode_one(&pdu).expect("decoding failed").expect("complete");
    let control = msg.control(PAGED_RESULTS_OID).expect("control is present");
    assert_eq!(control.value.as_deref(), Some(&control_value[..]));
    match &control.payload {
        Some(ControlPayload::PagedResults(p)) => {
            assert_eq!(p.size, 100);
            assert!(p.cookie.is_empty());
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[test]
fn test_malformed_registered_control_value() {
    let control = tlv(
        0x30,
        &[
            tlv(0x04, PAGED_RESULTS_OID.as_bytes()),
            tlv(0x04, &hex!("30 01 02")),
        ]
        .concat(),
    );
    let controls = tlv(0xa0, &control);
    let op = tlv(0x4a, b"dc=org");
    let pdu = message_pdu(21, &[&op, &controls]);
    assert!(matches!(decode_one(&pdu), Err(DecodeError::Protocol(_))));
}
