use super::control::{PingControl, ThresholdControl};
use super::node::{CompactContact, NodeId, PeerAddress};
use super::pursuit::PursuitManager;
use super::routing::{InsertOutcome, RoutingTable};
use super::spam::{get_peers_key, RateLimiter};
use crate::config::DhtConfig;
use crate::krpc::{Krpc, Method, Outgoing};
use bytes::Bytes;
use tracing::{debug, trace};

const QUALITY_PING: u8 = 0;
const QUALITY_FIND_NODE: u8 = 0;
const QUALITY_GET_PEERS: u8 = 1;
const QUALITY_PING_REPLY: u8 = 2;
const QUALITY_PEERS_REPLY: u8 = 4;

/// Something the node wants done after handling a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send `message` to `dest`.
    Send { dest: PeerAddress, message: Outgoing },
    /// A `get_peers` reply carried peers. `info_hash` is known only when the
    /// reply answered one of our live pursuits.
    FoundPeers {
        info_hash: Option<NodeId>,
        from: PeerAddress,
        peers: Vec<PeerAddress>,
    },
    /// A node announced itself as a peer for `info_hash`.
    Announced {
        info_hash: NodeId,
        peer: PeerAddress,
        name: Option<String>,
    },
}

impl Outbound {
    fn send(dest: PeerAddress, message: Outgoing) -> Self {
        Outbound::Send { dest, message }
    }
}

/// Turns decoded messages into table updates and outbound messages.
///
/// Owns every table the node keeps. Handling is synchronous and runs to
/// completion, so a token reserved while handling a message is registered
/// before anything else can reserve it.
pub struct Dispatcher {
    our_id: NodeId,
    routing: RoutingTable,
    pursuits: PursuitManager,
    rx_limiter: RateLimiter,
    ping_limiter: RateLimiter,
    get_peers_limiter: RateLimiter,
    control: Box<dyn PingControl>,
    bootstrap: Option<CompactContact>,
}

impl Dispatcher {
    pub fn new(our_id: NodeId, routing: RoutingTable, config: &DhtConfig) -> Self {
        Self {
            our_id,
            routing,
            pursuits: PursuitManager::new(config.pursuit_expiry, config.max_hops),
            rx_limiter: RateLimiter::new(config.rx_limiter),
            ping_limiter: RateLimiter::new(config.ping_limiter),
            get_peers_limiter: RateLimiter::new(config.get_peers_limiter),
            control: Box::new(ThresholdControl::new(config.ping_threshold)),
            bootstrap: config.bootstrap,
        }
    }

    /// Replaces the ping controller.
    pub fn with_control(mut self, control: impl PingControl + 'static) -> Self {
        self.control = Box::new(control);
        self
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn routing_mut(&mut self) -> &mut RoutingTable {
        &mut self.routing
    }

    pub fn pursuits(&self) -> &PursuitManager {
        &self.pursuits
    }

    pub fn pursuits_mut(&mut self) -> &mut PursuitManager {
        &mut self.pursuits
    }

    /// Charges a datagram from `from` to the inbound limiter.
    pub fn admit(&mut self, from: &PeerAddress) -> bool {
        self.rx_limiter.check(from.ip_key())
    }

    /// One replenish epoch on every limiter.
    pub fn replenish(&mut self) {
        self.rx_limiter.replenish_epoch();
        self.ping_limiter.replenish_epoch();
        self.get_peers_limiter.replenish_epoch();
    }

    /// A `find_node` for a random target to the bootstrap node, if any.
    pub fn bootstrap(&self) -> Option<Outbound> {
        let node = self.bootstrap?;
        Some(Outbound::send(
            node.addr,
            Outgoing::FindNode {
                to: node.id,
                target: NodeId::generate(),
            },
        ))
    }

    pub fn handle(&mut self, krpc: &Krpc<'_>, from: &PeerAddress) -> Vec<Outbound> {
        trace!("{} from {} ({})", krpc.method, from, krpc.nid);

        let mut out = Vec::new();
        let tok = Bytes::copy_from_slice(krpc.tok);

        match krpc.method {
            Method::Ping => {
                out.push(Outbound::send(*from, Outgoing::PingReply { to: krpc.nid, tok }));
                self.insert(krpc, from, QUALITY_PING);
            }
            Method::FindNode => {
                let neighbor = krpc
                    .target
                    .and_then(|target| self.routing.lookup_neighbor(&target));
                if let Some(contact) = neighbor {
                    out.push(Outbound::send(
                        *from,
                        Outgoing::FindNodeReply {
                            to: krpc.nid,
                            tok,
                            contact,
                        },
                    ));
                }
                self.insert(krpc, from, QUALITY_FIND_NODE);
            }
            Method::GetPeers => {
                if let Some(info_hash) = krpc.info_hash {
                    self.pursue(&info_hash, &krpc.nid, from, &mut out);
                }
                if let Some(contact) = self.routing.lookup_neighbor(&krpc.nid) {
                    out.push(Outbound::send(
                        *from,
                        Outgoing::GetPeersReply {
                            to: krpc.nid,
                            tok,
                            contact,
                        },
                    ));
                }
                self.insert(krpc, from, QUALITY_GET_PEERS);
            }
            Method::AnnouncePeer => self.handle_announce(krpc, from, tok, &mut out),
            Method::ReplyFindNode => self.ping_sweep(&krpc.nodes, &mut out),
            Method::ReplyGetPeers => self.handle_get_peers_reply(krpc, from, &mut out),
            Method::ReplyPing => {
                self.insert(krpc, from, QUALITY_PING_REPLY);
                self.routing.adjust_quality(&krpc.nid, 1);
            }
        }

        out
    }

    fn insert(&mut self, krpc: &Krpc<'_>, from: &PeerAddress, quality: u8) {
        let outcome = self.routing.insert(&krpc.nid, from, quality);
        if outcome != InsertOutcome::Accepted {
            trace!("insert of {} at {}: {:?}", krpc.nid, from, outcome);
        }
    }

    /// Forwards a `get_peers` for `info_hash` to the closest node we know, or
    /// to a random one if the closest is the node asking.
    fn pursue(
        &mut self,
        info_hash: &NodeId,
        asker: &NodeId,
        from: &PeerAddress,
        out: &mut Vec<Outbound>,
    ) {
        if !self
            .get_peers_limiter
            .check(get_peers_key(from.ip_key(), info_hash))
        {
            trace!("not pursuing {} for {}: rate limited", info_hash, from);
            return;
        }

        let Some(mut neighbor) = self.routing.lookup_neighbor(info_hash) else {
            return;
        };
        if neighbor.id.checksum() == asker.checksum() {
            match self.routing.random_valid_contact() {
                Some(other) if other.id.checksum() != asker.checksum() => neighbor = other,
                _ => return,
            }
        }
        let token = match self.pursuits.reserve_token() {
            Ok(token) => token,
            Err(e) => {
                debug!("not pursuing {}: {}", info_hash, e);
                return;
            }
        };

        if self.pursuits.register(token, &neighbor.id, info_hash, 0) {
            out.push(Outbound::send(
                neighbor.addr,
                Outgoing::GetPeers {
                    to: neighbor.id,
                    info_hash: *info_hash,
                    token,
                },
            ));
        }
    }

    fn handle_announce(
        &mut self,
        krpc: &Krpc<'_>,
        from: &PeerAddress,
        tok: Bytes,
        out: &mut Vec<Outbound>,
    ) {
        let name = match krpc.name.map(std::str::from_utf8) {
            Some(Err(_)) => {
                debug!("announce from {} with a name that is not utf-8", from);
                return;
            }
            Some(Ok(name)) => Some(name.to_owned()),
            None => None,
        };

        if let (Some(info_hash), Some(port)) = (krpc.info_hash, self.announced_port(krpc, from)) {
            out.push(Outbound::Announced {
                info_hash,
                peer: PeerAddress::new(from.ip(), port),
                name,
            });
        }
        out.push(Outbound::send(*from, Outgoing::AnnounceReply { to: krpc.nid, tok }));
    }

    fn announced_port(&self, krpc: &Krpc<'_>, from: &PeerAddress) -> Option<u16> {
        if krpc.implied_port {
            Some(from.port())
        } else {
            krpc.port
        }
    }

    fn handle_get_peers_reply(&mut self, krpc: &Krpc<'_>, from: &PeerAddress, out: &mut Vec<Outbound>) {
        if !krpc.peers.is_empty() {
            if let Some(hops) = self.pursuits.hops_of(krpc) {
                debug!("{} peers from {} after {} hops", krpc.peers.len(), from, hops);
            }
            let info_hash = self.pursuits.clear(krpc);
            out.push(Outbound::FoundPeers {
                info_hash,
                from: *from,
                peers: krpc.peers.clone(),
            });

            if !self.routing.adjust_quality(&krpc.nid, 1) {
                self.insert(krpc, from, QUALITY_PEERS_REPLY);
            }
        }

        if krpc.nodes.is_empty() {
            return;
        }

        self.ping_sweep(&krpc.nodes, out);

        let Some(next) = self.pursuits.extract(krpc) else {
            return;
        };
        let hop = next.hop.saturating_add(1);

        for contact in &next.contacts {
            if !self
                .get_peers_limiter
                .check(get_peers_key(contact.addr.ip_key(), &next.info_hash))
            {
                trace!("not pursuing {} at {}: rate limited", next.info_hash, contact.addr);
                continue;
            }
            let Ok(token) = self.pursuits.reserve_token() else {
                break;
            };
            if !self.pursuits.register(token, &contact.id, &next.info_hash, hop) {
                break;
            }
            out.push(Outbound::send(
                contact.addr,
                Outgoing::GetPeers {
                    to: contact.id,
                    info_hash: next.info_hash,
                    token,
                },
            ));
        }
    }

    /// Pings the returned nodes the controller and the ping limiter allow.
    fn ping_sweep(&mut self, nodes: &[CompactContact], out: &mut Vec<Outbound>) {
        for node in nodes {
            if !node.addr.is_routable() || !self.control.decide_ping(&node.id) {
                continue;
            }
            if !self.ping_limiter.check(node.addr.ip_key()) {
                trace!("not pinging {}: rate limited", node.addr);
                continue;
            }
            out.push(Outbound::send(node.addr, Outgoing::Ping { to: node.id }));
        }
    }
}
