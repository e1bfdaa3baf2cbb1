//! Node configuration.
//!
//! Every field defaults to the value in [`constants`](crate::constants), so a
//! [`DhtConfig::default()`] is a working node listening on port 6881.

use crate::constants::{
    BOOTSTRAP_ID, BOOTSTRAP_INTERVAL, BOOTSTRAP_IP, BOOTSTRAP_PORT, DEFAULT_PING_THRESHOLD,
    DEFAULT_PORT, DEFAULT_RT_DEPTH, DEFAULT_RT_PATH, MAX_PURSUIT_HOPS, PURSUIT_EXPIRY,
    REPLENISH_INTERVAL,
};
use crate::dht::{CompactContact, LimiterConfig, NodeId, PeerAddress};
use crate::krpc::TokenPolicy;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Our node id. Generated at startup when unset.
    pub node_id: Option<NodeId>,
    pub bind: SocketAddr,

    /// Routing table file.
    pub rt_path: PathBuf,
    /// Bytes of id prefix indexing the routing table: 2 or 3.
    pub rt_depth: usize,

    /// Idle time after which a pursuit slot may be reclaimed.
    pub pursuit_expiry: Duration,
    pub max_hops: u8,

    pub rx_limiter: LimiterConfig,
    pub ping_limiter: LimiterConfig,
    pub get_peers_limiter: LimiterConfig,

    pub token_policy: TokenPolicy,

    /// Node sent a `find_node` every bootstrap interval. `None` disables
    /// bootstrapping.
    pub bootstrap: Option<CompactContact>,
    pub bootstrap_interval: Duration,
    pub replenish_interval: Duration,

    /// Minimum control byte of a node id we are willing to ping.
    pub ping_threshold: u8,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            bind: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            rt_path: PathBuf::from(DEFAULT_RT_PATH),
            rt_depth: DEFAULT_RT_DEPTH,
            pursuit_expiry: PURSUIT_EXPIRY,
            max_hops: MAX_PURSUIT_HOPS,
            rx_limiter: LimiterConfig::rx(),
            ping_limiter: LimiterConfig::ping(),
            get_peers_limiter: LimiterConfig::get_peers(),
            token_policy: TokenPolicy::default(),
            bootstrap: Some(CompactContact::new(
                NodeId(BOOTSTRAP_ID),
                PeerAddress::new(BOOTSTRAP_IP, BOOTSTRAP_PORT),
            )),
            bootstrap_interval: BOOTSTRAP_INTERVAL,
            replenish_interval: REPLENISH_INTERVAL,
            ping_threshold: DEFAULT_PING_THRESHOLD,
        }
    }
}
