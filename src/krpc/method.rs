use std::fmt;

/// The closed set of KRPC methods we understand, queries and replies.
///
/// Announce replies are indistinguishable from ping replies on the wire and
/// are never solicited by us, so there is no `ReplyAnnouncePeer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Method {
    AnnouncePeer = 1,
    FindNode = 1 << 1,
    GetPeers = 1 << 2,
    Ping = 1 << 3,
    ReplyFindNode = 1 << 5,
    ReplyGetPeers = 1 << 6,
    ReplyPing = 1 << 7,
}

impl Method {
    pub const ALL: [Method; 7] = [
        Method::AnnouncePeer,
        Method::FindNode,
        Method::GetPeers,
        Method::Ping,
        Method::ReplyFindNode,
        Method::ReplyGetPeers,
        Method::ReplyPing,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }

    pub fn is_query(self) -> bool {
        MethodMask::QUERIES.contains(self)
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::AnnouncePeer => "q_ap",
            Method::FindNode => "q_fn",
            Method::GetPeers => "q_gp",
            Method::Ping => "q_pg",
            Method::ReplyFindNode => "r_fn",
            Method::ReplyGetPeers => "r_gp",
            Method::ReplyPing => "r_pg",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of methods still compatible with what the scanner has seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodMask(u8);

impl MethodMask {
    pub const QUERIES: MethodMask = MethodMask(
        Method::AnnouncePeer as u8
            | Method::FindNode as u8
            | Method::GetPeers as u8
            | Method::Ping as u8,
    );
    pub const REPLIES: MethodMask = MethodMask(
        Method::ReplyFindNode as u8 | Method::ReplyGetPeers as u8 | Method::ReplyPing as u8,
    );
    pub const ANY: MethodMask = MethodMask(Self::QUERIES.0 | Self::REPLIES.0);
    pub const EMPTY: MethodMask = MethodMask(0);

    pub fn of(methods: &[Method]) -> Self {
        MethodMask(methods.iter().fold(0, |acc, m| acc | m.bit()))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn narrow(&mut self, other: MethodMask) {
        self.0 &= other.0;
    }

    pub fn without(self, method: Method) -> Self {
        MethodMask(self.0 & !method.bit())
    }

    pub fn contains(self, method: Method) -> bool {
        self.0 & method.bit() != 0
    }

    pub fn intersects(self, other: MethodMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The method, if exactly one remains.
    pub fn single(self) -> Option<Method> {
        if self.0.count_ones() != 1 {
            return None;
        }
        Method::ALL.iter().copied().find(|m| m.bit() == self.0)
    }
}

impl From<Method> for MethodMask {
    fn from(method: Method) -> Self {
        MethodMask(method.bit())
    }
}
