use super::decode::TokenPolicy;
use super::method::Method;
use crate::constants::CONTACT_LEN;
use crate::dht::{CompactContact, NodeId};
use bytes::{BufMut, Bytes, BytesMut};

/// A message we want to send, before it is laid out on the wire.
///
/// `to` is the node the message is addressed to: queries go to it, replies
/// answer its query. Our sender id is derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Ping {
        to: NodeId,
    },
    FindNode {
        to: NodeId,
        target: NodeId,
    },
    GetPeers {
        to: NodeId,
        info_hash: NodeId,
        token: u16,
    },
    PingReply {
        to: NodeId,
        tok: Bytes,
    },
    FindNodeReply {
        to: NodeId,
        tok: Bytes,
        contact: CompactContact,
    },
    GetPeersReply {
        to: NodeId,
        tok: Bytes,
        contact: CompactContact,
    },
    AnnounceReply {
        to: NodeId,
        tok: Bytes,
    },
}

impl Outgoing {
    /// The method the receiving end will decode this as.
    pub fn method(&self) -> Method {
        match self {
            Outgoing::Ping { .. } => Method::Ping,
            Outgoing::FindNode { .. } => Method::FindNode,
            Outgoing::GetPeers { .. } => Method::GetPeers,
            Outgoing::PingReply { .. } | Outgoing::AnnounceReply { .. } => Method::ReplyPing,
            Outgoing::FindNodeReply { .. } => Method::ReplyFindNode,
            Outgoing::GetPeersReply { .. } => Method::ReplyGetPeers,
        }
    }
}

/// Lays out our outgoing messages. Keys are written in canonical bencode
/// order, so every message has one fixed shape per method.
#[derive(Debug, Clone)]
pub struct Encoder {
    our_id: NodeId,
    policy: TokenPolicy,
}

impl Encoder {
    pub fn new(our_id: NodeId, policy: TokenPolicy) -> Self {
        Self { our_id, policy }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    pub fn encode(&self, msg: &Outgoing, buf: &mut BytesMut) {
        match msg {
            Outgoing::Ping { to } => {
                self.query_head(buf, to);
                buf.put_slice(b"e1:q4:ping1:t");
                put_bytes(buf, &[self.policy.ping_tag]);
                query_tail(buf);
            }
            Outgoing::FindNode { to, target } => {
                self.query_head(buf, to);
                buf.put_slice(b"6:target");
                put_bytes(buf, target.as_bytes());
                buf.put_slice(b"e1:q9:find_node1:t");
                put_bytes(buf, &[self.policy.find_node_tag]);
                query_tail(buf);
            }
            Outgoing::GetPeers {
                to,
                info_hash,
                token,
            } => {
                self.query_head(buf, to);
                buf.put_slice(b"9:info_hash");
                put_bytes(buf, info_hash.as_bytes());
                buf.put_slice(b"e1:q9:get_peers1:t");
                let [lo, hi] = token.to_le_bytes();
                put_bytes(buf, &[lo, hi, self.policy.get_peers_tag]);
                query_tail(buf);
            }
            Outgoing::PingReply { to, tok } | Outgoing::AnnounceReply { to, tok } => {
                self.reply_head(buf, to);
                reply_tail(buf, tok);
            }
            Outgoing::FindNodeReply { to, tok, contact } => {
                self.reply_head(buf, to);
                put_contact(buf, contact);
                reply_tail(buf, tok);
            }
            Outgoing::GetPeersReply { to, tok, contact } => {
                self.reply_head(buf, to);
                put_contact(buf, contact);
                buf.put_slice(b"5:token");
                put_bytes(buf, &[self.policy.announce_token]);
                reply_tail(buf, tok);
            }
        }
    }

    pub fn to_bytes(&self, msg: &Outgoing) -> Bytes {
        let mut buf = BytesMut::with_capacity(crate::constants::SEND_BUF_LEN);
        self.encode(msg, &mut buf);
        buf.freeze()
    }

    fn query_head(&self, buf: &mut BytesMut, to: &NodeId) {
        buf.put_slice(b"d1:ad2:id");
        put_bytes(buf, self.our_id.close_to(to).as_bytes());
    }

    fn reply_head(&self, buf: &mut BytesMut, to: &NodeId) {
        buf.put_slice(b"d1:rd2:id");
        put_bytes(buf, self.our_id.close_to(to).as_bytes());
    }
}

fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_slice(data.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(data);
}

fn put_contact(buf: &mut BytesMut, contact: &CompactContact) {
    buf.put_slice(b"5:nodes");
    let compact: [u8; CONTACT_LEN] = contact.to_compact();
    put_bytes(buf, &compact);
}

fn query_tail(buf: &mut BytesMut) {
    buf.put_slice(b"1:y1:qe");
}

fn reply_tail(buf: &mut BytesMut, tok: &[u8]) {
    buf.put_slice(b"e1:t");
    put_bytes(buf, tok);
    buf.put_slice(b"1:y1:re");
}
