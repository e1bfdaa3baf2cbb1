//! Protocol constants and tuning parameters.
//!
//! This module collects the wire limits of the KRPC subset we speak, the tag
//! bytes we embed in our transaction ids, and the defaults for every table and
//! limiter. [`DhtConfig`](crate::config::DhtConfig) starts from these values;
//! anything that an operator may reasonably want to change is exposed there
//! instead of being read from here directly.

use std::net::Ipv4Addr;
use std::time::Duration;

// ============================================================================
// Wire format
// ============================================================================

/// Length of a node id or infohash.
pub const ID_LEN: usize = 20;

/// Length of a compact IPv4 peer address (4 bytes ip, 2 bytes port).
pub const PEER_LEN: usize = 6;

/// Length of a compact node info entry.
pub const CONTACT_LEN: usize = ID_LEN + PEER_LEN;

/// Largest datagram the decoder accepts. Anything longer is rejected.
pub const MAX_MSG_LEN: usize = 1024;

/// Shortest message that can possibly be a valid KRPC reply.
pub const MIN_MSG_LEN: usize = b"d1:rd2:id20:mnopqrstuvwxyz123456e1:t0:1:y1:re".len();

/// Size of the buffer our encoder writes into.
pub const SEND_BUF_LEN: usize = 512;

/// Maximum length of the KRPC transaction id `t`.
pub const MAX_TRANSACTION_LEN: usize = 32;

/// Maximum length of the `token` value of `get_peers`/`announce_peer`.
pub const MAX_TOKEN_LEN: usize = 32;

/// Maximum announce `name` we keep; longer names are dropped.
pub const MAX_NAME_LEN: usize = 256;

/// Maximum compact contacts kept from a `nodes` value.
pub const MAX_NODES: usize = 8;

/// Maximum peers kept from a `values` list.
pub const MAX_PEERS: usize = 36;

// ============================================================================
// Our tags
// ============================================================================

/// Trailing byte of the `t` of every `ping` we send.
pub const TAG_PING: u8 = 0x77;

/// Trailing byte of the `t` of every `get_peers` we send.
pub const TAG_GET_PEERS: u8 = 0x78;

/// Trailing byte of the `t` of every `find_node` we send.
pub const TAG_FIND_NODE: u8 = 0x79;

/// The `token` we hand out in `get_peers` replies and expect back in
/// `announce_peer` queries.
pub const ANNOUNCE_TOKEN: u8 = 0x88;

// ============================================================================
// Routing table
// ============================================================================

/// Width of the quality counter of a routing cell.
pub const QUALITY_BITS: u8 = 3;

/// Highest quality a routing cell can reach.
pub const MAX_QUALITY: u8 = (1 << QUALITY_BITS) - 1;

/// On-disk stride of a routing cell. Power of two for alignment.
pub const CELL_SIZE: usize = 32;

/// Default routing table file.
pub const DEFAULT_RT_PATH: &str = "./data/rt.dat";

// ============================================================================
// Get-peers pursuits
// ============================================================================

/// Number of pursuit slots, one per 16-bit token.
pub const PURSUIT_SLOTS: usize = 1 << 16;

/// A pursuit slot idle for longer than this may be reclaimed.
pub const PURSUIT_EXPIRY: Duration = Duration::from_millis(200);

/// Pursuits are abandoned past this many hops.
pub const MAX_PURSUIT_HOPS: u8 = 8;

/// Number of contacts pursued from each `get_peers` reply.
pub const NEXT_HOPS: usize = 2;

/// Log-distances at or below this are overwhelmingly improbable and treated as
/// poisoned entries.
pub const TOO_CLOSE_DISTANCE: u8 = 100;

// ============================================================================
// Rate limiting
// ============================================================================

/// Inbound datagram limiter: bucket key width (bits of the IPv4 address).
pub const RX_KEYWIDTH: u8 = 8;

/// Inbound datagram limiter: tokens per address.
pub const RX_MAX_TOKENS: u8 = 8;

/// Outbound ping limiter: bucket key width.
pub const PING_KEYWIDTH: u8 = 10;

/// Outbound ping limiter: tokens per address.
pub const PING_MAX_TOKENS: u8 = 15;

/// Outbound ping limiter: cost of one ping. One ping per address drains it.
pub const PING_COST: u8 = 15;

/// Get-peers pursuit limiter: bucket key width.
pub const GET_PEERS_KEYWIDTH: u8 = 10;

/// Get-peers pursuit limiter: tokens per (address, infohash) key.
pub const GET_PEERS_MAX_TOKENS: u8 = 4;

/// Widest bucket key any limiter may use. Wider configurations are clamped.
pub const MAX_KEYWIDTH: u8 = 16;

/// Tokens returned to every limited key on each replenish epoch.
pub const REPLENISH_INCREMENT: u8 = 1;

// ============================================================================
// Timers and control
// ============================================================================

/// Interval between limiter replenish epochs.
pub const REPLENISH_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between bootstrap `find_node` queries.
pub const BOOTSTRAP_INTERVAL: Duration = Duration::from_millis(500);

/// Default control byte threshold for pinging returned nodes.
pub const DEFAULT_PING_THRESHOLD: u8 = 0;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 6881;

/// Id of the node we bootstrap from (router.bittorrent.com).
pub const BOOTSTRAP_ID: [u8; ID_LEN] = [
    0x32, 0xf5, 0x4e, 0x69, 0x73, 0x51, 0xff, 0x4a, 0xec, 0x29, 0xcd, 0xba, 0xab, 0xf2, 0xfb,
    0xe3, 0x46, 0x7c, 0xc2, 0x67,
];

/// Address of the node we bootstrap from.
pub const BOOTSTRAP_IP: Ipv4Addr = Ipv4Addr::new(67, 215, 246, 10);

/// Port of the node we bootstrap from.
pub const BOOTSTRAP_PORT: u16 = 6881;

/// Default routing table depth in bytes of id prefix.
pub const DEFAULT_RT_DEPTH: usize = 2;
