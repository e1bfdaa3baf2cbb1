use super::error::DecodeError;
use super::method::{Method, MethodMask};
use crate::constants::{
    ANNOUNCE_TOKEN, CONTACT_LEN, MAX_MSG_LEN, MAX_NAME_LEN, MAX_NODES, MAX_PEERS,
    MAX_TOKEN_LEN, MAX_TRANSACTION_LEN, PEER_LEN, TAG_FIND_NODE, TAG_GET_PEERS, TAG_PING,
};
use crate::dht::{CompactContact, NodeId, PeerAddress};

/// The tag bytes we put in our own transaction ids, and what we require of
/// incoming announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPolicy {
    pub ping_tag: u8,
    pub get_peers_tag: u8,
    pub find_node_tag: u8,
    pub announce_token: u8,
    pub require_announce_token: bool,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            ping_tag: TAG_PING,
            get_peers_tag: TAG_GET_PEERS,
            find_node_tag: TAG_FIND_NODE,
            announce_token: ANNOUNCE_TOKEN,
            require_announce_token: true,
        }
    }
}

/// A decoded and validated KRPC message.
///
/// Byte-string fields borrow from the datagram; nothing outlives the handling
/// of that datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Krpc<'a> {
    pub method: Method,
    /// What is left of the method mask after validation; always exactly the
    /// bit of `method`.
    pub mask: MethodMask,
    pub nid: NodeId,
    pub tok: &'a [u8],
    pub target: Option<NodeId>,
    pub info_hash: Option<NodeId>,
    pub nodes: Vec<CompactContact>,
    pub peers: Vec<PeerAddress>,
    pub token: Option<&'a [u8]>,
    pub port: Option<u16>,
    pub implied_port: bool,
    pub name: Option<&'a [u8]>,
}

impl<'a> Krpc<'a> {
    /// The pursuit slot index carried in the `t` of a `get_peers` reply.
    pub fn pursuit_token(&self) -> Option<u16> {
        match self.tok {
            [lo, hi, _] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }
}

/// Decodes with the default [`TokenPolicy`].
pub fn decode(data: &[u8]) -> Result<Krpc<'_>, DecodeError> {
    Decoder::default().decode(data)
}

#[derive(Debug, Clone, Default)]
pub struct Decoder {
    policy: TokenPolicy,
}

impl Decoder {
    pub fn new(policy: TokenPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Scans `data` once, left to right, narrowing the set of possible
    /// methods as keys and values go by, then checks the extracted fields.
    pub fn decode<'a>(&self, data: &'a [u8]) -> Result<Krpc<'a>, DecodeError> {
        if data.len() > MAX_MSG_LEN {
            return Err(DecodeError::MessageTooLong);
        }

        let mut scanner = Scanner::new(data);
        scanner.scan()?;
        scanner.validate(&self.policy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    OuterKey,
    OuterValue,
    InnerKey,
    InnerValue,
    InnerList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    None,
    Values,
    Nodes,
    Token,
    InfoHash,
    Id,
    Target,
    ImpliedPort,
    Port,
    Name,
    A,
    T,
    Q,
    R,
    Y,
}

impl Key {
    const fn bit(self) -> u16 {
        match self {
            Key::None => 0,
            Key::Values => 1,
            Key::Nodes => 1 << 1,
            Key::Token => 1 << 2,
            Key::InfoHash => 1 << 3,
            Key::Id => 1 << 4,
            Key::Target => 1 << 5,
            Key::ImpliedPort => 1 << 6,
            Key::Port => 1 << 7,
            Key::Name => 1 << 8,
            Key::A => 1 << 9,
            Key::T => 1 << 10,
            Key::Q => 1 << 11,
            Key::R => 1 << 12,
            Key::Y => 1 << 13,
        }
    }
}

const NON_TOKEN_BODY: u16 =
    Key::Nodes.bit() | Key::Values.bit() | Key::InfoHash.bit() | Key::Target.bit();
const ANY_BODY: u16 = NON_TOKEN_BODY | Key::Token.bit();

struct Scanner<'a> {
    data: &'a [u8],
    pos: usize,
    state: State,
    key: Key,
    seen: u16,
    mask: MethodMask,

    nid: Option<NodeId>,
    tok: Option<&'a [u8]>,
    target: Option<NodeId>,
    info_hash: Option<NodeId>,
    nodes: Vec<CompactContact>,
    peers: Vec<PeerAddress>,
    token: Option<&'a [u8]>,
    port: Option<u16>,
    implied_port: bool,
    name: Option<&'a [u8]>,
}

impl<'a> Scanner<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            state: State::Start,
            key: Key::None,
            seen: 0,
            mask: MethodMask::ANY,
            nid: None,
            tok: None,
            target: None,
            info_hash: None,
            nodes: Vec::new(),
            peers: Vec::new(),
            token: None,
            port: None,
            implied_port: false,
            name: None,
        }
    }

    fn has(&self, key: Key) -> bool {
        self.seen & key.bit() != 0
    }

    fn mark(&mut self, key: Key) {
        self.key = key;
        self.seen |= key.bit();
    }

    fn scan(&mut self) -> Result<(), DecodeError> {
        use State::*;

        loop {
            let Some(&c) = self.data.get(self.pos) else {
                return Err(DecodeError::BadEndOfMessage);
            };

            match c {
                b'd' => match self.state {
                    Start => {
                        self.state = OuterKey;
                        self.pos += 1;
                    }
                    OuterValue => {
                        self.state = InnerKey;
                        self.pos += 1;
                    }
                    OuterKey | InnerKey => return Err(DecodeError::DictIsKey),
                    InnerValue | InnerList => return Err(DecodeError::DictsTooDeep),
                },
                b'e' => match self.state {
                    OuterKey => return Ok(()),
                    InnerKey => {
                        self.state = OuterKey;
                        self.pos += 1;
                    }
                    InnerList => {
                        self.state = InnerKey;
                        self.pos += 1;
                    }
                    Start | OuterValue | InnerValue => {
                        return Err(DecodeError::BadEndOfMessage)
                    }
                },
                b'i' => match self.state {
                    OuterValue => {
                        self.pos += 1;
                        read_uint(self.data, &mut self.pos, b'e')?;
                        self.state = OuterKey;
                    }
                    InnerValue => {
                        self.pos += 1;
                        let value = read_uint(self.data, &mut self.pos, b'e')?;
                        self.inner_int(value)?;
                        self.state = InnerKey;
                    }
                    Start => return Err(DecodeError::NakedValue),
                    OuterKey | InnerKey | InnerList => return Err(DecodeError::RogueInt),
                },
                b'l' => match self.state {
                    InnerValue => {
                        self.state = InnerList;
                        self.pos += 1;
                    }
                    _ => return Err(DecodeError::UnexpectedList),
                },
                b'0'..=b'9' => {
                    if self.state == Start {
                        return Err(DecodeError::NakedValue);
                    }

                    let len = read_uint(self.data, &mut self.pos, b':')? as usize;
                    let start = self.pos;
                    let end = start
                        .checked_add(len)
                        .filter(|&end| end <= self.data.len())
                        .ok_or(DecodeError::BadEndOfMessage)?;
                    self.pos = end;
                    let s = &self.data[start..end];

                    match self.state {
                        OuterKey => {
                            self.state = OuterValue;
                            self.outer_key(s)?;
                        }
                        OuterValue => {
                            self.state = OuterKey;
                            self.outer_value(s)?;
                        }
                        InnerKey => {
                            self.state = InnerValue;
                            self.inner_key(s);
                        }
                        InnerValue => {
                            self.state = InnerKey;
                            self.inner_value(s)?;
                        }
                        InnerList => self.list_item(s)?,
                        Start => return Err(DecodeError::NakedValue),
                    }
                }
                _ => return Err(DecodeError::BadChar),
            }
        }
    }

    fn outer_key(&mut self, s: &[u8]) -> Result<(), DecodeError> {
        self.key = Key::None;

        match s {
            b"a" => {
                if self.has(Key::R) {
                    return Err(DecodeError::InconsistentType);
                }
                self.mask.narrow(MethodMask::QUERIES);
                self.mark(Key::A);
            }
            b"r" => {
                if self.has(Key::A) || self.has(Key::Q) {
                    return Err(DecodeError::InconsistentType);
                }
                self.mask.narrow(MethodMask::REPLIES);
                self.mark(Key::R);
            }
            b"q" => {
                if self.has(Key::R) {
                    return Err(DecodeError::InconsistentType);
                }
                self.mask.narrow(MethodMask::QUERIES);
                self.mark(Key::Q);
            }
            b"t" => self.mark(Key::T),
            b"y" => self.mark(Key::Y),
            _ => {}
        }

        Ok(())
    }

    fn outer_value(&mut self, s: &'a [u8]) -> Result<(), DecodeError> {
        match self.key {
            Key::Q => {
                let method = match s {
                    b"ping" => Method::Ping,
                    b"find_node" => Method::FindNode,
                    b"get_peers" => Method::GetPeers,
                    b"announce_peer" => Method::AnnouncePeer,
                    _ => return Err(DecodeError::UnknownQuery),
                };
                self.mask.narrow(method.into());
            }
            Key::T => {
                if s.len() > MAX_TRANSACTION_LEN {
                    return Err(DecodeError::TransactionTooLong);
                }
                self.tok = Some(s);
            }
            Key::Y => match s {
                b"q" => self.mask.narrow(MethodMask::QUERIES),
                b"r" => self.mask.narrow(MethodMask::REPLIES),
                b"e" => return Err(DecodeError::ErrorType),
                _ => return Err(DecodeError::UnknownType),
            },
            _ => {}
        }

        Ok(())
    }

    fn inner_key(&mut self, s: &[u8]) {
        self.key = Key::None;

        match s {
            b"id" => self.mark(Key::Id),
            b"name" if self.mask.contains(Method::AnnouncePeer) => {
                self.mask = Method::AnnouncePeer.into();
                self.mark(Key::Name);
            }
            // other messages may carry a port as extra data, so no narrowing
            b"port" => self.mark(Key::Port),
            b"nodes" => {
                self.mask
                    .narrow(MethodMask::of(&[Method::ReplyFindNode, Method::ReplyGetPeers]));
                self.mark(Key::Nodes);
            }
            // plenty of stray queries include a token; only find_node is ruled out
            b"token" => {
                self.mask = self.mask.without(Method::FindNode);
                self.mark(Key::Token);
            }
            b"values" => {
                self.mask.narrow(Method::ReplyGetPeers.into());
                self.mark(Key::Values);
            }
            b"target" => {
                self.mask.narrow(Method::FindNode.into());
                self.mark(Key::Target);
            }
            b"info_hash" => {
                self.mask
                    .narrow(MethodMask::of(&[Method::GetPeers, Method::AnnouncePeer]));
                self.mark(Key::InfoHash);
            }
            b"implied_port" => {
                self.mask.narrow(Method::AnnouncePeer.into());
                self.mark(Key::ImpliedPort);
            }
            _ => {}
        }
    }

    fn inner_int(&mut self, value: u32) -> Result<(), DecodeError> {
        match self.key {
            Key::Port => {
                let port = u16::try_from(value).map_err(|_| DecodeError::PortOverflow)?;
                self.port = Some(port);
            }
            Key::ImpliedPort => self.implied_port = value != 0,
            _ => {}
        }

        Ok(())
    }

    fn inner_value(&mut self, s: &'a [u8]) -> Result<(), DecodeError> {
        match self.key {
            Key::Nodes => {
                if s.is_empty() || s.len() % CONTACT_LEN != 0 {
                    return Err(DecodeError::BadLengthNodes);
                }
                self.nodes = s
                    .chunks_exact(CONTACT_LEN)
                    .take(MAX_NODES)
                    .filter_map(CompactContact::from_compact)
                    .collect();
            }
            Key::Token => {
                if s.len() > MAX_TOKEN_LEN {
                    return Err(DecodeError::TokenTooLong);
                }
                self.token = Some(s);
            }
            Key::Target => {
                let target = NodeId::from_bytes(s).map_err(|_| DecodeError::BadLengthTarget)?;
                self.target = Some(target);
            }
            Key::Id => {
                let nid = NodeId::from_bytes(s).map_err(|_| DecodeError::BadLengthNid)?;
                self.nid = Some(nid);
            }
            Key::InfoHash => {
                let ih = NodeId::from_bytes(s).map_err(|_| DecodeError::BadLengthInfoHash)?;
                self.info_hash = Some(ih);
            }
            // overlong names are ignored, not fatal
            Key::Name if s.len() <= MAX_NAME_LEN => self.name = Some(s),
            _ => {}
        }

        Ok(())
    }

    fn list_item(&mut self, s: &[u8]) -> Result<(), DecodeError> {
        if self.key != Key::Values {
            return Err(DecodeError::UnexpectedList);
        }
        // one odd entry means the whole message is suspect
        if s.len() != PEER_LEN {
            return Err(DecodeError::BadLengthPeer);
        }
        if self.peers.len() < MAX_PEERS {
            if let Some(peer) = PeerAddress::from_bytes(s) {
                self.peers.push(peer);
            }
        }

        Ok(())
    }

    fn validate(self, policy: &TokenPolicy) -> Result<Krpc<'a>, DecodeError> {
        let nid = self.nid.ok_or(DecodeError::MissingNid)?;
        let tok = self.tok.ok_or(DecodeError::MissingTransaction)?;

        let method = if self.mask.intersects(MethodMask::QUERIES) {
            self.resolve_query(policy)?
        } else if self.mask.intersects(MethodMask::REPLIES) {
            self.resolve_reply(tok, policy)?
        } else {
            return Err(DecodeError::Incongruous);
        };

        let mut mask = self.mask;
        mask.narrow(method.into());
        if mask.is_empty() {
            return Err(DecodeError::Incongruous);
        }

        Ok(Krpc {
            method,
            mask,
            nid,
            tok,
            target: self.target,
            info_hash: self.info_hash,
            nodes: self.nodes,
            peers: self.peers,
            token: self.token,
            port: self.port,
            implied_port: self.implied_port,
            name: self.name,
        })
    }

    fn resolve_query(&self, policy: &TokenPolicy) -> Result<Method, DecodeError> {
        match self.mask.single() {
            Some(method @ (Method::GetPeers | Method::AnnouncePeer)) => {
                if self.info_hash.is_none() {
                    return Err(DecodeError::MissingInfoHash);
                }
                if method == Method::AnnouncePeer {
                    if !self.has(Key::Port) && !self.has(Key::ImpliedPort) {
                        return Err(DecodeError::MissingPort);
                    }
                    if policy.require_announce_token
                        && self.token != Some(&[policy.announce_token][..])
                    {
                        return Err(DecodeError::TokenUnrecognized);
                    }
                }
                Ok(method)
            }
            Some(Method::FindNode) => {
                if self.target.is_none() {
                    return Err(DecodeError::MissingTarget);
                }
                Ok(Method::FindNode)
            }
            Some(Method::Ping) => {
                if self.seen & ANY_BODY != 0 {
                    return Err(DecodeError::PingBody);
                }
                Ok(Method::Ping)
            }
            _ => Err(DecodeError::UnknownQuery),
        }
    }

    fn resolve_reply(&self, tok: &[u8], policy: &TokenPolicy) -> Result<Method, DecodeError> {
        if self.has(Key::Token) && (self.has(Key::Values) || self.has(Key::Nodes)) {
            if !matches!(tok, [_, _, tag] if *tag == policy.get_peers_tag) {
                return Err(DecodeError::BadTagGetPeers);
            }
            if self.nodes.is_empty() && self.peers.is_empty() {
                return Err(DecodeError::EmptyGetPeersReply);
            }
            Ok(Method::ReplyGetPeers)
        } else if self.has(Key::Values) {
            Err(DecodeError::ValuesWithoutToken)
        } else if self.has(Key::Nodes) {
            if tok != [policy.find_node_tag] {
                return Err(DecodeError::BadTagFindNode);
            }
            Ok(Method::ReplyFindNode)
        } else {
            if self.seen & NON_TOKEN_BODY != 0 {
                return Err(DecodeError::PingBody);
            }
            if tok != [policy.ping_tag] {
                return Err(DecodeError::BadTagPing);
            }
            Ok(Method::ReplyPing)
        }
    }
}

/// Reads a non-negative decimal terminated by `term`, consuming the
/// terminator. `pos` must point at the first digit.
fn read_uint(data: &[u8], pos: &mut usize, term: u8) -> Result<u32, DecodeError> {
    let mut out: u32 = 0;

    while let Some(&c) = data.get(*pos) {
        if out >= u32::MAX >> 4 {
            return Err(DecodeError::MessageTooLong);
        }
        *pos += 1;

        match c {
            b'0'..=b'9' => out = 10 * out + (c - b'0') as u32,
            b'-' => return Err(DecodeError::NegativeInt),
            c if c == term => return Ok(out),
            _ => return Err(DecodeError::BadChar),
        }
    }

    Err(DecodeError::BadEndOfMessage)
}
