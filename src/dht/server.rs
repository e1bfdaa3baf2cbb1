use super::dispatch::{Dispatcher, Outbound};
use super::error::DhtError;
use super::node::{NodeId, PeerAddress};
use super::routing::RoutingTable;
use crate::config::DhtConfig;
use crate::constants::MIN_MSG_LEN;
use crate::krpc::{Decoder, Encoder};
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

const RECV_BUF_LEN: usize = 1500;

/// A Mainline DHT node on a UDP socket.
///
/// The node answers queries, keeps its routing table populated and forwards
/// `get_peers` lookups on behalf of others. It never starts lookups of its
/// own.
///
/// # Examples
///
/// ```no_run
/// use mldht::config::DhtConfig;
/// use mldht::dht::DhtServer;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let server = DhtServer::bind(DhtConfig::default()).await?;
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct DhtServer {
    socket: UdpSocket,
    dispatcher: Mutex<Dispatcher>,
    decoder: Decoder,
    encoder: Encoder,
    bootstrap_interval: Duration,
    replenish_interval: Duration,
}

impl DhtServer {
    /// Opens the routing table and binds the socket. Failing to open the
    /// routing table is fatal.
    pub async fn bind(config: DhtConfig) -> Result<Self, DhtError> {
        let routing = RoutingTable::open(&config.rt_path, config.rt_depth)?;
        let our_id = config.node_id.unwrap_or_else(NodeId::generate);

        let socket = UdpSocket::bind(config.bind).await?;
        let local_addr = socket.local_addr()?;
        if !local_addr.is_ipv4() {
            return Err(DhtError::Ipv6Unsupported);
        }

        info!("DHT node {} bound to {}", our_id, local_addr);

        Ok(Self {
            socket,
            dispatcher: Mutex::new(Dispatcher::new(our_id, routing, &config)),
            decoder: Decoder::new(config.token_policy.clone()),
            encoder: Encoder::new(our_id, config.token_policy.clone()),
            bootstrap_interval: config.bootstrap_interval,
            replenish_interval: config.replenish_interval,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DhtError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn our_id(&self) -> NodeId {
        *self.encoder.our_id()
    }

    pub fn dispatcher(&self) -> &Mutex<Dispatcher> {
        &self.dispatcher
    }

    pub async fn run(&self) -> Result<(), DhtError> {
        let mut buf = [0u8; RECV_BUF_LEN];
        let mut replenish_interval = tokio::time::interval(self.replenish_interval);
        let mut bootstrap_interval = tokio::time::interval(self.bootstrap_interval);

        replenish_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        bootstrap_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        replenish_interval.tick().await;

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    let (len, addr) = result?;
                    for (dest, data) in self.handle_datagram(&buf[..len], addr) {
                        self.send(dest, &data).await;
                    }
                }
                _ = replenish_interval.tick() => {
                    self.dispatcher.lock().replenish();
                }
                _ = bootstrap_interval.tick() => {
                    let outbound = self.dispatcher.lock().bootstrap();
                    if let Some((dest, data)) = outbound.and_then(|o| self.encode(o)) {
                        self.send(dest, &data).await;
                    }
                }
            }
        }
    }

    /// Runs one datagram through the limiter, decoder and dispatcher, and
    /// returns what should be sent in response.
    pub fn handle_datagram(&self, data: &[u8], addr: SocketAddr) -> Vec<(SocketAddr, Bytes)> {
        if data.len() < MIN_MSG_LEN {
            trace!("dropping {} byte runt from {}", data.len(), addr);
            return Vec::new();
        }
        let Some(from) = PeerAddress::from_socket_addr(&addr) else {
            return Vec::new();
        };

        let mut dispatcher = self.dispatcher.lock();
        if !dispatcher.admit(&from) {
            trace!("dropping datagram from {}: rate limited", from);
            return Vec::new();
        }

        let krpc = match self.decoder.decode(data) {
            Ok(krpc) => krpc,
            Err(e) => {
                debug!("failed to decode message from {}: {} ({:?})", from, e, e.class());
                return Vec::new();
            }
        };

        let outbound = dispatcher.handle(&krpc, &from);
        drop(dispatcher);

        outbound.into_iter().filter_map(|o| self.encode(o)).collect()
    }

    fn encode(&self, outbound: Outbound) -> Option<(SocketAddr, Bytes)> {
        match outbound {
            Outbound::Send { dest, message } => {
                if !dest.is_routable() {
                    trace!("not sending {} to unroutable {}", message.method(), dest);
                    return None;
                }
                Some((dest.to_socket_addr(), self.encoder.to_bytes(&message)))
            }
            Outbound::FoundPeers {
                info_hash,
                from,
                peers,
            } => {
                match info_hash {
                    Some(info_hash) => info!("{} peers for {} from {}", peers.len(), info_hash, from),
                    None => debug!("{} unsolicited peers from {}", peers.len(), from),
                }
                None
            }
            Outbound::Announced {
                info_hash,
                peer,
                name,
            } => {
                info!("{} announced {} ({})", peer, info_hash, name.as_deref().unwrap_or("-"));
                None
            }
        }
    }

    async fn send(&self, dest: SocketAddr, data: &[u8]) {
        if let Err(e) = self.socket.send_to(data, dest).await {
            warn!("failed to send to {}: {}", dest, e);
        }
    }
}
