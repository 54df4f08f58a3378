//! Station daemon.
//!
//! Without real radio hardware attached this binary runs a loopback
//! bench: two stations back to back over an in-memory audio link,
//! exercising the full stack end to end. Wiring a sound-card or SDR
//! driver means implementing `RadioInterface` and handing it to
//! `Station::set_radio`.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use clap::Parser;
use skywave_content::{Node, PropValue};
use skywave_core::StackConfig;
use skywave_modem::ModemConfig;
use skywave_proto::Callsign;
use skywave_station::{HandlerReply, LoopbackRadio, Station, StationError};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "skywave-station", about = "Packet-radio HTTP station")]
struct Args {
    /// Station callsign.
    #[arg(long, default_value = "KA1ABC")]
    callsign: String,

    /// Peer callsign for the loopback bench.
    #[arg(long, default_value = "W2DEF")]
    peer: String,

    /// Maximum on-wire packet size, header included.
    #[arg(long, default_value_t = 256)]
    max_packet: usize,

    /// ACK retry count before a send fails.
    #[arg(long, default_value_t = 3)]
    ack_retries: u8,

    /// ACK timeout in milliseconds (doubles per retry).
    #[arg(long, default_value_t = 200)]
    ack_timeout_ms: u64,

    /// Reassembly timeout in seconds.
    #[arg(long, default_value_t = 30)]
    reassembly_timeout_s: u64,

    /// Route lifetime in seconds.
    #[arg(long, default_value_t = 120)]
    route_lifetime_s: u64,

    /// Requests to send in bench mode.
    #[arg(long, default_value_t = 3)]
    bench_requests: u32,
}

fn stack_config(callsign: &str, args: &Args) -> Result<StackConfig, StationError> {
    let callsign = Callsign::parse(callsign)
        .map_err(|e| StationError::Protocol(e.to_string()))?;
    let mut config = StackConfig::new(callsign);
    config.max_packet_len = args.max_packet;
    config.ack_retries = args.ack_retries;
    config.ack_timeout = Duration::from_millis(args.ack_timeout_ms);
    config.reassembly_timeout = Duration::from_secs(args.reassembly_timeout_s);
    config.route_lifetime = Duration::from_secs(args.route_lifetime_s);
    Ok(config)
}

fn bench_page(counter: u32) -> Node {
    Node::new("html")
        .with_child(
            Node::new("body")
                .with_prop("class", PropValue::Text("bench".to_string()))
                .with_child(Node::new("h1").with_text("skywave bench"))
                .with_child(Node::new("p").with_text(format!("hit {counter}"))),
        )
}

#[tokio::main]
async fn main() -> Result<(), StationError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let (radio_local, radio_peer) = LoopbackRadio::pair();

    let local = Station::new(stack_config(&args.callsign, &args)?, ModemConfig::default())?;
    local.set_radio(Arc::new(radio_local));
    local.start()?;

    let peer = Station::new(stack_config(&args.peer, &args)?, ModemConfig::default())?;
    peer.set_radio(Arc::new(radio_peer));
    let hits = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let hit_counter = Arc::clone(&hits);
    peer.on_request(move |request| {
        let count = hit_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        info!(method = %request.method, path = %request.path, "peer handling request");
        async move {
            HandlerReply::Page {
                status: 200,
                headers: BTreeMap::new(),
                tree: bench_page(count),
            }
        }
    });
    peer.start()?;

    info!(local = %local.callsign(), peer = %peer.callsign(), "loopback bench starting");

    for i in 0..args.bench_requests {
        let response = local
            .send_request("GET", "/bench", BTreeMap::new(), None, peer.callsign())
            .await?;
        info!(
            round = i,
            status = response.status,
            bytes = response.body.len(),
            "response received"
        );
    }

    let status = local.status();
    let counters = local.counters();
    info!(
        modulation = ?status.modulation,
        snr_db = ?status.snr_db,
        requests = counters.requests_sent,
        responses = counters.responses_received,
        deltas = counters.deltas_received,
        "bench complete"
    );

    local.shutdown();
    peer.shutdown();
    Ok(())
}
