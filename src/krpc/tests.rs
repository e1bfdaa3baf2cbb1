use super::*;
use crate::dht::{CompactContact, NodeId, PeerAddress};
use bytes::Bytes;
use std::net::Ipv4Addr;

const NID: [u8; 20] = [0x42; 20];

fn bstr(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{}:", data.len()).into_bytes();
    out.extend_from_slice(data);
    out
}

fn kv(key: &str, value: &[u8]) -> Vec<u8> {
    let mut out = bstr(key.as_bytes());
    out.extend_from_slice(&bstr(value));
    out
}

fn query(q: &str, args: &[u8], t: &[u8]) -> Vec<u8> {
    let mut out = b"d1:ad".to_vec();
    out.extend_from_slice(&kv("id", &NID));
    out.extend_from_slice(args);
    out.extend_from_slice(b"e1:q");
    out.extend_from_slice(&bstr(q.as_bytes()));
    out.extend_from_slice(b"1:t");
    out.extend_from_slice(&bstr(t));
    out.extend_from_slice(b"1:y1:qe");
    out
}

fn reply(body: &[u8], t: &[u8]) -> Vec<u8> {
    let mut out = b"d1:rd".to_vec();
    out.extend_from_slice(&kv("id", &NID));
    out.extend_from_slice(body);
    out.extend_from_slice(b"e1:t");
    out.extend_from_slice(&bstr(t));
    out.extend_from_slice(b"1:y1:re");
    out
}

fn contact(first: u8) -> CompactContact {
    let mut id = [0x11; 20];
    id[0] = first;
    CompactContact::new(NodeId(id), PeerAddress::new(Ipv4Addr::new(1, 2, 3, first), 6881))
}

fn nodes_value(count: u8) -> Vec<u8> {
    (1..=count).flat_map(|i| contact(i).to_compact()).collect()
}

fn gp_tok(token: u16) -> Vec<u8> {
    let [lo, hi] = token.to_le_bytes();
    vec![lo, hi, 0x78]
}

#[test]
fn test_literal_ping_query() {
    let mut msg = b"d1:ad2:id20:".to_vec();
    msg.extend_from_slice(&NID);
    msg.extend_from_slice(b"e1:q4:ping1:t1:\x88e");

    let krpc = decode(&msg).unwrap();
    assert_eq!(krpc.method, Method::Ping);
    assert_eq!(krpc.nid, NodeId(NID));
    assert_eq!(krpc.tok, b"\x88");
}

#[test]
fn test_find_node_without_target() {
    let mut msg = b"d1:ad2:id20:".to_vec();
    msg.extend_from_slice(&NID);
    msg.extend_from_slice(b"e1:q9:find_node1:t1:\x88e");

    assert_eq!(decode(&msg), Err(DecodeError::MissingTarget));
}

#[test]
fn test_find_node_query() {
    let target = [0x99; 20];
    let msg = query("find_node", &kv("target", &target), b"aa");

    let krpc = decode(&msg).unwrap();
    assert_eq!(krpc.method, Method::FindNode);
    assert_eq!(krpc.target, Some(NodeId(target)));
    assert_eq!(krpc.tok, b"aa");
}

#[test]
fn test_get_peers_query() {
    let ih = [0xab; 20];
    let msg = query("get_peers", &kv("info_hash", &ih), b"xy");

    let krpc = decode(&msg).unwrap();
    assert_eq!(krpc.method, Method::GetPeers);
    assert_eq!(krpc.info_hash, Some(NodeId(ih)));
}

#[test]
fn test_get_peers_query_without_info_hash() {
    let msg = query("get_peers", b"", b"xy");
    assert_eq!(decode(&msg), Err(DecodeError::MissingInfoHash));
}

#[test]
fn test_announce_peer_query() {
    let mut args = kv("info_hash", &[0xcd; 20]);
    args.extend_from_slice(&kv("name", b"ubuntu.iso"));
    args.extend_from_slice(b"4:porti51413e");
    args.extend_from_slice(&kv("token", b"\x88"));
    let msg = query("announce_peer", &args, b"ap");

    let krpc = decode(&msg).unwrap();
    assert_eq!(krpc.method, Method::AnnouncePeer);
    assert_eq!(krpc.info_hash, Some(NodeId([0xcd; 20])));
    assert_eq!(krpc.port, Some(51413));
    assert!(!krpc.implied_port);
    assert_eq!(krpc.name, Some(&b"ubuntu.iso"[..]));
    assert_eq!(krpc.token, Some(&b"\x88"[..]));
}

#[test]
fn test_announce_peer_implied_port() {
    let mut args = b"12:implied_porti1e".to_vec();
    args.extend_from_slice(&kv("info_hash", &[0xcd; 20]));
    args.extend_from_slice(&kv("token", b"\x88"));
    let msg = query("announce_peer", &args, b"ap");

    let krpc = decode(&msg).unwrap();
    assert!(krpc.implied_port);
    assert_eq!(krpc.port, None);
}

#[test]
fn test_announce_peer_rejections() {
    let mut no_port = kv("info_hash", &[0xcd; 20]);
    no_port.extend_from_slice(&kv("token", b"\x88"));
    assert_eq!(
        decode(&query("announce_peer", &no_port, b"ap")),
        Err(DecodeError::MissingPort)
    );

    let mut foreign_token = kv("info_hash", &[0xcd; 20]);
    foreign_token.extend_from_slice(b"4:porti6881e");
    foreign_token.extend_from_slice(&kv("token", b"\x01\x02\x03\x04"));
    let msg = query("announce_peer", &foreign_token, b"ap");
    assert_eq!(decode(&msg), Err(DecodeError::TokenUnrecognized));

    let lenient = Decoder::new(TokenPolicy {
        require_announce_token: false,
        ..TokenPolicy::default()
    });
    assert_eq!(lenient.decode(&msg).unwrap().method, Method::AnnouncePeer);
}

#[test]
fn test_announce_long_name_is_ignored() {
    let mut args = kv("info_hash", &[0xcd; 20]);
    args.extend_from_slice(&kv("name", &[b'n'; 300]));
    args.extend_from_slice(b"4:porti6881e");
    args.extend_from_slice(&kv("token", b"\x88"));

    let msg = query("announce_peer", &args, b"ap");
    let krpc = decode(&msg).unwrap();
    assert_eq!(krpc.name, None);
}

#[test]
fn test_port_overflow() {
    let mut args = kv("info_hash", &[0xcd; 20]);
    args.extend_from_slice(b"4:porti70000e");
    args.extend_from_slice(&kv("token", b"\x88"));

    assert_eq!(
        decode(&query("announce_peer", &args, b"ap")),
        Err(DecodeError::PortOverflow)
    );
}

#[test]
fn test_negative_int() {
    let mut args = kv("info_hash", &[0xcd; 20]);
    args.extend_from_slice(b"4:porti-1e");

    assert_eq!(
        decode(&query("announce_peer", &args, b"ap")),
        Err(DecodeError::NegativeInt)
    );
}

#[test]
fn test_ping_with_body_is_rejected() {
    let msg = query("ping", &kv("token", b"abc"), b"pg");
    assert_eq!(decode(&msg), Err(DecodeError::PingBody));
}

#[test]
fn test_unknown_query() {
    let msg = query("vote", b"", b"vv");
    assert_eq!(decode(&msg), Err(DecodeError::UnknownQuery));
}

#[test]
fn test_error_messages_are_rejected() {
    let mut msg = b"d1:ad".to_vec();
    msg.extend_from_slice(&kv("id", &NID));
    msg.extend_from_slice(b"e1:t2:aa1:y1:ee");

    assert_eq!(decode(&msg), Err(DecodeError::ErrorType));
}

#[test]
fn test_missing_id_and_transaction() {
    let mut no_id = b"d1:ad".to_vec();
    no_id.extend_from_slice(&kv("target", &[7; 20]));
    no_id.extend_from_slice(b"e1:q9:find_node1:t2:aae");
    assert_eq!(decode(&no_id), Err(DecodeError::MissingNid));

    let mut no_t = b"d1:ad".to_vec();
    no_t.extend_from_slice(&kv("id", &NID));
    no_t.extend_from_slice(b"e1:q4:pinge");
    assert_eq!(decode(&no_t), Err(DecodeError::MissingTransaction));
}

#[test]
fn test_bad_lengths() {
    let msg = query("find_node", &kv("target", &[1; 19]), b"aa");
    assert_eq!(decode(&msg), Err(DecodeError::BadLengthTarget));

    let msg = query("get_peers", &kv("info_hash", &[1; 21]), b"aa");
    assert_eq!(decode(&msg), Err(DecodeError::BadLengthInfoHash));

    let mut msg = b"d1:ad".to_vec();
    msg.extend_from_slice(&kv("id", &[1; 8]));
    msg.extend_from_slice(b"e1:q4:ping1:t2:aae");
    assert_eq!(decode(&msg), Err(DecodeError::BadLengthNid));

    let msg = reply(&kv("nodes", &[1; 30]), &[0x79]);
    assert_eq!(decode(&msg), Err(DecodeError::BadLengthNodes));
}

#[test]
fn test_transaction_and_token_limits() {
    let msg = query("ping", b"", &[7; 33]);
    assert_eq!(decode(&msg), Err(DecodeError::TransactionTooLong));

    let mut body = kv("nodes", &nodes_value(1));
    body.extend_from_slice(&kv("token", &[7; 33]));
    assert_eq!(decode(&reply(&body, &gp_tok(1))), Err(DecodeError::TokenTooLong));
}

#[test]
fn test_structural_errors() {
    let mut too_long = query("ping", b"", b"aa");
    too_long.resize(1025, b'e');
    assert_eq!(decode(&too_long), Err(DecodeError::MessageTooLong));

    assert_eq!(decode(b"i42e"), Err(DecodeError::NakedValue));
    assert_eq!(decode(b"4:spam"), Err(DecodeError::NakedValue));
    assert_eq!(decode(b"d1:tl1:aee"), Err(DecodeError::UnexpectedList));
    assert_eq!(decode(b"dd1:aee"), Err(DecodeError::DictIsKey));
    assert_eq!(decode(b"d1:ad2:idd1:xi1eeee"), Err(DecodeError::DictsTooDeep));
    assert_eq!(decode(b"d1:ad2:idli1eeee"), Err(DecodeError::RogueInt));
    assert_eq!(decode(b"d1:ad1:x!ee"), Err(DecodeError::BadChar));
    assert_eq!(decode(b"d1:t2:aa"), Err(DecodeError::BadEndOfMessage));
    assert_eq!(decode(b"d1:t9:aae"), Err(DecodeError::BadEndOfMessage));
    assert_eq!(decode(b"d1:ti99999999999999ee"), Err(DecodeError::MessageTooLong));
    assert_eq!(decode(b""), Err(DecodeError::BadEndOfMessage));
}

#[test]
fn test_unterminated_message() {
    let mut msg = query("ping", b"", b"aa");
    msg.pop();
    assert_eq!(decode(&msg), Err(DecodeError::BadEndOfMessage));
}

#[test]
fn test_query_and_reply_keys_conflict() {
    let mut msg = b"d1:ad".to_vec();
    msg.extend_from_slice(&kv("id", &NID));
    msg.extend_from_slice(b"e1:rd");
    msg.extend_from_slice(&kv("id", &NID));
    msg.extend_from_slice(b"e1:t1:\x771:y1:re");
    assert_eq!(decode(&msg), Err(DecodeError::InconsistentType));

    let mut msg = b"d1:rd".to_vec();
    msg.extend_from_slice(&kv("id", &NID));
    msg.extend_from_slice(b"e1:q4:ping1:t1:\x77e");
    assert_eq!(decode(&msg), Err(DecodeError::InconsistentType));
}

#[test]
fn test_reply_with_query_only_keys_is_incongruous() {
    let msg = reply(&kv("target", &[3; 20]), &[0x77]);
    assert_eq!(decode(&msg), Err(DecodeError::Incongruous));

    let msg = reply(&kv("info_hash", &[3; 20]), &[0x77]);
    assert_eq!(decode(&msg), Err(DecodeError::Incongruous));
}

#[test]
fn test_nodes_on_ping_reply() {
    let msg = reply(&kv("nodes", &nodes_value(1)), &[0x77]);
    assert_eq!(decode(&msg), Err(DecodeError::BadTagFindNode));
}

#[test]
fn test_ping_reply() {
    let msg = reply(b"", &[0x77]);
    let krpc = decode(&msg).unwrap();
    assert_eq!(krpc.method, Method::ReplyPing);
    assert_eq!(krpc.nid, NodeId(NID));
}

#[test]
fn test_find_node_reply_truncates_nodes() {
    let msg = reply(&kv("nodes", &nodes_value(10)), &[0x79]);

    let krpc = decode(&msg).unwrap();
    assert_eq!(krpc.method, Method::ReplyFindNode);
    assert_eq!(krpc.nodes.len(), 8);
    assert_eq!(krpc.nodes[0], contact(1));
    assert_eq!(krpc.nodes[7], contact(8));
}

#[test]
fn test_get_peers_reply_with_values() {
    let mut values = b"6:values".to_vec();
    values.push(b'l');
    for i in 0..40u8 {
        values.extend_from_slice(&bstr(&[8, 8, 4, i, 0x1a, 0xe1]));
    }
    values.push(b'e');
    let mut body = kv("token", b"opaque");
    body.extend_from_slice(&values);

    let msg = reply(&body, &gp_tok(0x1234));
    let krpc = decode(&msg).unwrap();
    assert_eq!(krpc.method, Method::ReplyGetPeers);
    assert_eq!(krpc.peers.len(), 36);
    assert_eq!(krpc.peers[3], PeerAddress::new(Ipv4Addr::new(8, 8, 4, 3), 6881));
    assert_eq!(krpc.token, Some(&b"opaque"[..]));
    assert_eq!(krpc.pursuit_token(), Some(0x1234));
}

#[test]
fn test_get_peers_reply_rejections() {
    let mut body = kv("token", b"tt");
    body.extend_from_slice(b"6:valuesle");
    assert_eq!(
        decode(&reply(&body, &gp_tok(1))),
        Err(DecodeError::EmptyGetPeersReply)
    );

    let body = b"6:valuesl6:abcdefe".to_vec();
    assert_eq!(
        decode(&reply(&body, &gp_tok(1))),
        Err(DecodeError::ValuesWithoutToken)
    );

    let mut body = kv("token", b"tt");
    body.extend_from_slice(b"6:valuesl5:abcdee");
    assert_eq!(
        decode(&reply(&body, &gp_tok(1))),
        Err(DecodeError::BadLengthPeer)
    );

    let mut body = kv("token", b"tt");
    body.extend_from_slice(b"5:nodesl6:abcdefe");
    assert_eq!(
        decode(&reply(&body, &gp_tok(1))),
        Err(DecodeError::UnexpectedList)
    );
}

#[test]
fn test_replies_with_foreign_tags_are_rejected() {
    let ping = reply(b"", &[0x01]);
    assert_eq!(decode(&ping), Err(DecodeError::BadTagPing));

    let find_node = reply(&kv("nodes", &nodes_value(2)), &[0x01]);
    assert_eq!(decode(&find_node), Err(DecodeError::BadTagFindNode));

    let mut body = kv("nodes", &nodes_value(2));
    body.extend_from_slice(&kv("token", b"tt"));
    let get_peers = reply(&body, &[0x12, 0x34, 0x01]);
    assert_eq!(decode(&get_peers), Err(DecodeError::BadTagGetPeers));

    // right tag, wrong length
    assert_eq!(decode(&reply(b"", &[0x77, 0x77])), Err(DecodeError::BadTagPing));
    assert_eq!(decode(&reply(&body, &[0x78])), Err(DecodeError::BadTagGetPeers));
}

#[test]
fn test_custom_tags() {
    let decoder = Decoder::new(TokenPolicy {
        ping_tag: 0x01,
        ..TokenPolicy::default()
    });

    assert_eq!(decoder.decode(&reply(b"", &[0x01])).unwrap().method, Method::ReplyPing);
    assert_eq!(
        decoder.decode(&reply(b"", &[0x77])),
        Err(DecodeError::BadTagPing)
    );
}

#[test]
fn test_unknown_keys_are_skipped() {
    let mut args = kv("target", &[9; 20]);
    args.extend_from_slice(&kv("want", b"n4"));
    args.extend_from_slice(b"3:fooi12e");
    let mut msg = query("find_node", &args, b"aa");
    // unknown outer key before the closing `e`
    msg.pop();
    msg.extend_from_slice(b"1:v4:UT01e");

    let krpc = decode(&msg).unwrap();
    assert_eq!(krpc.method, Method::FindNode);
}

#[test]
fn test_mask_has_exactly_one_bit() {
    let mut ap = kv("info_hash", &[0xcd; 20]);
    ap.extend_from_slice(b"4:porti6881e");
    ap.extend_from_slice(&kv("token", b"\x88"));
    let mut gp_body = kv("nodes", &nodes_value(3));
    gp_body.extend_from_slice(&kv("token", b"tt"));

    let messages = vec![
        query("ping", b"", b"a"),
        query("find_node", &kv("target", &[1; 20]), b"a"),
        query("get_peers", &kv("info_hash", &[1; 20]), b"a"),
        query("announce_peer", &ap, b"a"),
        reply(b"", &[0x77]),
        reply(&kv("nodes", &nodes_value(3)), &[0x79]),
        reply(&gp_body, &gp_tok(7)),
    ];

    for msg in &messages {
        let krpc = decode(msg).unwrap();
        assert_eq!(krpc.mask.bits().count_ones(), 1);
        assert_eq!(krpc.mask.single(), Some(krpc.method));
    }
}

#[test]
fn test_error_classes() {
    assert_eq!(DecodeError::BadChar.class(), ErrorClass::Malformed);
    assert_eq!(DecodeError::DictsTooDeep.class(), ErrorClass::Malformed);
    assert_eq!(DecodeError::MissingTarget.class(), ErrorClass::Protocol);
    assert_eq!(DecodeError::InconsistentType.class(), ErrorClass::Protocol);
    assert_eq!(DecodeError::BadTagPing.class(), ErrorClass::Policy);
    assert_eq!(DecodeError::PingBody.class(), ErrorClass::Policy);
}

#[test]
fn test_encoded_queries_decode() {
    let our_id = NodeId([0x5a; 20]);
    let encoder = Encoder::new(our_id, TokenPolicy::default());
    let to = NodeId([0x10; 20]);
    let target = NodeId([0x20; 20]);

    let ping = encoder.to_bytes(&Outgoing::Ping { to });
    let krpc = decode(&ping).unwrap();
    assert_eq!(krpc.method, Method::Ping);
    assert_eq!(krpc.nid, our_id.close_to(&to));
    assert_eq!(krpc.tok, &[0x77]);

    let find_node = encoder.to_bytes(&Outgoing::FindNode { to, target });
    let krpc = decode(&find_node).unwrap();
    assert_eq!(krpc.method, Method::FindNode);
    assert_eq!(krpc.target, Some(target));
    assert_eq!(krpc.tok, &[0x79]);

    let get_peers = encoder.to_bytes(&Outgoing::GetPeers {
        to,
        info_hash: target,
        token: 0xbeef,
    });
    let krpc = decode(&get_peers).unwrap();
    assert_eq!(krpc.method, Method::GetPeers);
    assert_eq!(krpc.info_hash, Some(target));
    assert_eq!(krpc.tok, &[0xef, 0xbe, 0x78]);
}

#[test]
fn test_encoded_replies_decode() {
    let our_id = NodeId([0x5a; 20]);
    let encoder = Encoder::new(our_id, TokenPolicy::default());
    let to = NodeId([0x10; 20]);
    let neighbor = contact(9);

    let ping = encoder.to_bytes(&Outgoing::PingReply {
        to,
        tok: Bytes::from_static(&[0x77]),
    });
    let krpc = decode(&ping).unwrap();
    assert_eq!(krpc.method, Method::ReplyPing);
    assert_eq!(krpc.nid, our_id.close_to(&to));

    let announce = encoder.to_bytes(&Outgoing::AnnounceReply {
        to,
        tok: Bytes::from_static(&[0x77]),
    });
    assert_eq!(decode(&announce).unwrap().method, Method::ReplyPing);

    let find_node = encoder.to_bytes(&Outgoing::FindNodeReply {
        to,
        tok: Bytes::from_static(&[0x79]),
        contact: neighbor,
    });
    let krpc = decode(&find_node).unwrap();
    assert_eq!(krpc.method, Method::ReplyFindNode);
    assert_eq!(krpc.nodes, vec![neighbor]);

    let get_peers = encoder.to_bytes(&Outgoing::GetPeersReply {
        to,
        tok: Bytes::from(gp_tok(3)),
        contact: neighbor,
    });
    let krpc = decode(&get_peers).unwrap();
    assert_eq!(krpc.method, Method::ReplyGetPeers);
    assert_eq!(krpc.nodes, vec![neighbor]);
    assert_eq!(krpc.token, Some(&[0x88][..]));
    assert_eq!(krpc.pursuit_token(), Some(3));
}

#[test]
fn test_outgoing_fits_send_buffer() {
    let encoder = Encoder::new(NodeId([1; 20]), TokenPolicy::default());
    let msg = Outgoing::GetPeersReply {
        to: NodeId([2; 20]),
        tok: Bytes::from(vec![0u8; 32]),
        contact: contact(1),
    };

    assert!(encoder.to_bytes(&msg).len() <= crate::constants::SEND_BUF_LEN);
}
