use super::error::DhtError;
use crate::constants::{CONTACT_LEN, ID_LEN, PEER_LEN};
use rand::Rng as _;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

const CONTROL_BYTE: usize = 10;
const CHECKSUM_OFFSET: usize = 16;

/// A 160-bit node id or infohash.
///
/// Opaque apart from a few fixed offsets: the leading bytes index the routing
/// table, byte 10 feeds the ping controller and the trailing four bytes form a
/// cheap checksum.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId(pub [u8; ID_LEN]);

impl NodeId {
    pub const ZERO: NodeId = NodeId([0u8; ID_LEN]);

    pub fn generate() -> Self {
        let mut id = [0u8; ID_LEN];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        if bytes.len() != ID_LEN {
            return Err(DhtError::InvalidNodeId);
        }
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; ID_LEN]
    }

    /// Routing table index of this id for a table `depth` bytes deep.
    pub fn prefix(&self, depth: usize) -> usize {
        self.0[..depth]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize)
    }

    pub fn control_byte(&self) -> u8 {
        self.0[CONTROL_BYTE]
    }

    /// Fast fingerprint of the id. Not a hash: just the last four bytes.
    pub fn checksum(&self) -> u32 {
        let mut tail = [0u8; 4];
        tail.copy_from_slice(&self.0[CHECKSUM_OFFSET..]);
        u32::from_le_bytes(tail)
    }

    pub fn distance(&self, other: &NodeId) -> [u8; ID_LEN] {
        let mut dist = [0u8; ID_LEN];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        dist
    }

    /// Kademlia log-distance: 160 minus the length of the common bit prefix.
    pub fn log_distance(&self, other: &NodeId) -> u8 {
        let dist = self.distance(other);

        for (i, &byte) in dist.iter().enumerate() {
            if byte != 0 {
                let common = i * 8 + byte.leading_zeros() as usize;
                return (ID_LEN * 8 - common) as u8;
            }
        }

        0
    }

    /// The id we present to `addressee`: its first three bytes followed by our
    /// own suffix, so that we look close to whoever we talk to.
    pub fn close_to(&self, addressee: &NodeId) -> NodeId {
        let mut id = self.0;
        id[..3].copy_from_slice(&addressee.0[..3]);
        NodeId(id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// An IPv4 address and port, both kept in network byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PeerAddress(pub [u8; PEER_LEN]);

impl PeerAddress {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        let mut raw = [0u8; PEER_LEN];
        raw[..4].copy_from_slice(&ip.octets());
        raw[4..].copy_from_slice(&port.to_be_bytes());
        Self(raw)
    }

    pub fn from_socket_addr(addr: &SocketAddr) -> Option<Self> {
        match addr {
            SocketAddr::V4(v4) => Some(Self::new(*v4.ip(), v4.port())),
            SocketAddr::V6(_) => None,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != PEER_LEN {
            return None;
        }
        let mut raw = [0u8; PEER_LEN];
        raw.copy_from_slice(bytes);
        Some(Self(raw))
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[0], self.0[1], self.0[2], self.0[3])
    }

    pub fn port(&self) -> u16 {
        u16::from_be_bytes([self.0[4], self.0[5]])
    }

    /// The address as a big-endian integer, used as a rate limiter key.
    pub fn ip_key(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip(), self.port()))
    }

    /// Whether we are willing to talk to this address at all. Privileged
    /// ports, private networks and reserved ranges are refused.
    pub fn is_routable(&self) -> bool {
        let [a, b, c, d, _, _] = self.0;

        if self.port() <= 1024 {
            return false;
        }

        !((a & 0xf0) == 240
            || a == 0
            || a == 10
            || a == 127
            || (a == 100 && (b & 0xc0) == 64)
            || (a == 172 && (b & 0xf0) == 16)
            || (a == 198 && (b & 0xfe) == 18)
            || (a == 169 && b == 254)
            || (a == 192 && b == 168)
            || (a == 192 && b == 0 && c == 0)
            || (a == 192 && b == 0 && c == 2)
            || (a == 192 && b == 31 && c == 196)
            || (a == 192 && b == 51 && c == 100)
            || (a == 192 && b == 52 && c == 193)
            || (a == 192 && b == 175 && c == 48)
            || (a == 198 && b == 51 && c == 100)
            || (a == 203 && b == 0 && c == 113)
            || (a == 255 && b == 255 && c == 255 && d == 255))
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddress({})", self)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port())
    }
}

/// Compact node info: a node id followed by its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactContact {
    pub id: NodeId,
    pub addr: PeerAddress,
}

impl CompactContact {
    pub fn new(id: NodeId, addr: PeerAddress) -> Self {
        Self { id, addr }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    pub fn from_compact(data: &[u8]) -> Option<Self> {
        if data.len() != CONTACT_LEN {
            return None;
        }

        let id = NodeId::from_bytes(&data[..ID_LEN]).ok()?;
        let addr = PeerAddress::from_bytes(&data[ID_LEN..])?;

        Some(Self { id, addr })
    }

    pub fn to_compact(&self) -> [u8; CONTACT_LEN] {
        let mut compact = [0u8; CONTACT_LEN];
        compact[..ID_LEN].copy_from_slice(&self.id.0);
        compact[ID_LEN..].copy_from_slice(&self.addr.0);
        compact
    }
}
