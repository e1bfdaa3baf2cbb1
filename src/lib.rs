//! mldht - a Mainline DHT node
//!
//! A BitTorrent DHT node built around four fixed-size tables: a direct-mapped
//! routing table kept in a memory-mapped file, a table of forwarded
//! `get_peers` lookups indexed by transaction token, and token bucket rate
//! limiters for inbound and outbound traffic. Untrusted datagrams go through a
//! single-pass KRPC decoder before they reach any of them.
//!
//! # Modules
//!
//! - [`krpc`] - KRPC message decoding and encoding
//! - [`dht`] - Routing table, pursuits, rate limiting and the UDP server
//! - [`config`] - Node configuration
//! - [`constants`] - Wire limits and tuning defaults

pub mod config;
pub mod constants;
pub mod dht;
pub mod krpc;

pub use config::DhtConfig;
pub use dht::{
    CompactContact, DhtError, DhtServer, Dispatcher, NodeId, Outbound, PeerAddress,
    RoutingTable,
};
pub use krpc::{decode, DecodeError, Krpc, Method};
