use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use mldht::config::DhtConfig;
use mldht::constants::{DEFAULT_RT_DEPTH, DEFAULT_RT_PATH, MAX_PURSUIT_HOPS};
use mldht::dht::{CompactContact, DhtServer, NodeId, PeerAddress};

#[derive(Clone, Debug)]
struct HexId(NodeId);

impl FromStr for HexId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).context("invalid hex node id")?;
        let id = NodeId::from_bytes(&bytes).context("node id must be 40 hex characters")?;
        Ok(HexId(id))
    }
}

#[derive(Clone, Debug)]
struct BootstrapNode(CompactContact);

impl FromStr for BootstrapNode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr_part, id_part) = s
            .rsplit_once('/')
            .context("bootstrap node must include its id (format: IP:PORT/ID)")?;

        let addr: SocketAddr = addr_part.parse().context("invalid socket address")?;
        let addr = PeerAddress::from_socket_addr(&addr).context("bootstrap node must be IPv4")?;
        let HexId(id) = id_part.parse()?;

        Ok(BootstrapNode(CompactContact::new(id, addr)))
    }
}

#[derive(Parser, Debug)]
#[command(name = "mldht")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0:6881")]
    bind: SocketAddr,

    /// Routing table file, created if missing.
    #[arg(long, default_value = DEFAULT_RT_PATH)]
    rt_path: PathBuf,

    /// Bytes of id prefix indexing the routing table (2 or 3).
    #[arg(long, default_value_t = DEFAULT_RT_DEPTH)]
    rt_depth: usize,

    /// Our node id as 40 hex characters. Random when omitted.
    #[arg(long, value_name = "ID")]
    node_id: Option<HexId>,

    /// Bootstrap node, replacing the default router.
    #[arg(short = 'B', long = "bootstrap", value_name = "IP:PORT/ID")]
    bootstrap: Option<BootstrapNode>,

    #[arg(long, conflicts_with = "bootstrap")]
    no_bootstrap: bool,

    /// Minimum control byte of returned nodes we ping.
    #[arg(long, default_value_t = 0)]
    ping_threshold: u8,

    #[arg(long, default_value_t = MAX_PURSUIT_HOPS)]
    max_hops: u8,

    /// Idle milliseconds after which a pursuit slot may be reused.
    #[arg(long, default_value_t = 200)]
    pursuit_expiry_ms: u64,

    /// Accept announces that do not carry our token.
    #[arg(long)]
    lenient_announce: bool,
}

impl Args {
    fn into_config(self) -> DhtConfig {
        let mut config = DhtConfig {
            node_id: self.node_id.map(|HexId(id)| id),
            bind: self.bind,
            rt_path: self.rt_path,
            rt_depth: self.rt_depth,
            pursuit_expiry: Duration::from_millis(self.pursuit_expiry_ms),
            max_hops: self.max_hops,
            ping_threshold: self.ping_threshold,
            ..DhtConfig::default()
        };

        if self.no_bootstrap {
            config.bootstrap = None;
        } else if let Some(BootstrapNode(contact)) = self.bootstrap {
            config.bootstrap = Some(contact);
        }
        config.token_policy.require_announce_token = !self.lenient_announce;

        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    let config = args.into_config();
    let server = DhtServer::bind(config)
        .await
        .context("failed to start DHT node")?;

    tokio::select! {
        result = server.run() => result.context("DHT node stopped")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, exiting gracefully");
        }
    }

    Ok(())
}
