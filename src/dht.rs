//! Mainline DHT node ([BEP-5]).
//!
//! The node keeps one contact per id prefix in a memory-mapped
//! [`RoutingTable`], answers `ping`, `find_node`, `get_peers` and
//! `announce_peer` queries, and forwards `get_peers` lookups hop by hop,
//! tracking each chain in the [`PursuitManager`]. Token bucket
//! [`RateLimiter`]s bound the work any one address can cause.
//!
//! [`Dispatcher`] holds all of this state and maps each decoded message to
//! the messages to send in return. [`DhtServer`] drives it from a UDP socket.
//!
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html

mod control;
mod dispatch;
mod error;
mod node;
mod pursuit;
mod routing;
mod server;
mod spam;

pub use control::{PingControl, ThresholdControl};
pub use dispatch::{Dispatcher, Outbound};
pub use error::{DhtError, PursuitError};
pub use node::{CompactContact, NodeId, PeerAddress};
pub use pursuit::{NextHop, PursuitManager};
pub use routing::{check_evict, InsertOutcome, RoutingCell, RoutingTable};
pub use server::DhtServer;
pub use spam::{get_peers_key, LimiterConfig, RateLimiter};
