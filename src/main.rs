//! Tether agent - edge-side connectivity agent for the cloud hub control plane

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tether::bus::ChannelBus;
use tether::config::{GroupMap, HubConfig};
use tether::hub::HubController;
use tether::transport::{DefaultTransportFactory, TransportKind};
use tether::{MODULE_GROUP, MODULE_NAME};

/// Tether - edge-side connectivity agent for the cloud hub control plane
#[derive(Parser, Debug)]
#[command(name = "tether", version, about, long_about = None)]
struct Cli {
    /// Project identifier (identity tuple half)
    #[arg(long, env = "TETHER_PROJECT_ID", default_value = "")]
    project_id: String,

    /// Node identifier (identity tuple half)
    #[arg(long, env = "TETHER_NODE_ID", default_value = "")]
    node_id: String,

    /// Placement service endpoint returning the cloud hub base URL
    #[arg(long, env = "TETHER_PLACEMENT_URL", default_value = "")]
    placement_url: String,

    /// Direct cloud hub URL (test mode only)
    #[arg(long, env = "TETHER_WS_URL", default_value = "")]
    ws_url: String,

    /// Path to the node's client certificate
    #[arg(long, env = "TETHER_CERT_FILE", default_value = "/etc/tether/certs/edge.crt")]
    cert_file: PathBuf,

    /// Path to the node's client private key
    #[arg(long, env = "TETHER_KEY_FILE", default_value = "/etc/tether/certs/edge.key")]
    key_file: PathBuf,

    /// Keepalive interval in seconds; also the sync-reply deadline
    #[arg(long, default_value_t = tether::DEFAULT_HEARTBEAT_SECS)]
    heartbeat_secs: u64,

    /// Transport handshake timeout in seconds
    #[arg(long, default_value_t = tether::DEFAULT_HANDSHAKE_TIMEOUT_SECS)]
    handshake_timeout_secs: u64,

    /// Transport write deadline in seconds
    #[arg(long, default_value_t = tether::DEFAULT_WRITE_DEADLINE_SECS)]
    write_deadline_secs: u64,

    /// Skip placement lookup and connect to --ws-url directly
    #[arg(long)]
    test_mode: bool,

    /// Transport kind (currently: websocket)
    #[arg(long, default_value = "websocket")]
    transport: String,

    /// Group map overrides as `cloud-group=local-group` pairs; replaces the
    /// default table when present
    #[arg(long, value_delimiter = ',')]
    group_map: Vec<String>,
}

fn parse_group_map(pairs: &[String]) -> anyhow::Result<Option<GroupMap>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut entries = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("bad group map entry {pair:?}, expected key=value"))?;
        entries.insert(key.to_string(), value.to_string());
    }
    Ok(Some(GroupMap::new(entries)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install crypto provider");

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let transport = cli
        .transport
        .parse::<TransportKind>()
        .map_err(|e| anyhow::anyhow!(e))?;

    let config = HubConfig {
        project_id: cli.project_id,
        node_id: cli.node_id,
        placement_url: cli.placement_url,
        ws_url: cli.ws_url,
        cert_file: cli.cert_file,
        key_file: cli.key_file,
        heartbeat_period: Duration::from_secs(cli.heartbeat_secs),
        handshake_timeout: Duration::from_secs(cli.handshake_timeout_secs),
        write_deadline: Duration::from_secs(cli.write_deadline_secs),
        test_mode: cli.test_mode,
        transport,
        group_map: parse_group_map(&cli.group_map)?.unwrap_or_default(),
    };
    config.validate()?;

    let bus = Arc::new(ChannelBus::new());
    bus.register(MODULE_NAME, MODULE_GROUP).await;

    info!(node_id = %config.node_id, test_mode = config.test_mode, "starting tether agent");
    let controller = HubController::new(config, bus, Arc::new(DefaultTransportFactory));

    tokio::select! {
        result = controller.start() => {
            // Only a fatal configuration error gets here.
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            controller.cleanup().await;
        }
    }

    Ok(())
}
