use std::time::Duration;

use tracing_subscriber::EnvFilter;

use telemetry_ws::storage::FileStorage;
use telemetry_ws::{RealtimeClient, RealtimeConfig};

fn usage() -> &'static str {
    "live_feed\n\
  Connects to the telemetry service and prints dashboard state as it changes.\n\
\n\
USAGE:\n\
  cargo run --example live_feed -- [--config <toml>] [--url <ws-url>] [--state <json-file>] [--secs <N>]\n\
\n\
ENVIRONMENT:\n\
  TELEMETRY_WS_URL, TELEMETRY_HOST, TELEMETRY_SECURE, RUST_LOG\n"
}

struct Args {
    config: Option<String>,
    url: Option<String>,
    state: String,
    secs: u64,
}

fn parse_args() -> Args {
    let mut args = Args {
        config: None,
        url: None,
        state: ".telemetry-ws/state.json".to_string(),
        secs: 60,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next(),
            "--url" => args.url = it.next(),
            "--state" => {
                if let Some(path) = it.next() {
                    args.state = path;
                }
            }
            "--secs" => {
                if let Some(secs) = it.next().and_then(|s| s.parse().ok()) {
                    args.secs = secs;
                }
            }
            "-h" | "--help" => {
                print!("{}", usage());
                std::process::exit(0);
            }
            other => {
                eprintln!("unknown argument: {other}\n\n{}", usage());
                std::process::exit(2);
            }
        }
    }
    args
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args();
    let mut config = match &args.config {
        Some(path) => RealtimeConfig::load(path)?,
        None => RealtimeConfig::from_env()?,
    };
    if let Some(url) = args.url {
        config = config.with_endpoint(url);
    }

    let client = RealtimeClient::builder(config)
        .storage(std::sync::Arc::new(FileStorage::open(&args.state)))
        .spawn()?;
    println!("connect: {:?}", client.connect().await?);

    let mut rx = client.subscribe();
    let deadline = tokio::time::sleep(Duration::from_secs(args.secs));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                let cpu = state.metrics.as_ref().map(|m| m.system.cpu.percent);
                println!(
                    "[{}] attempts={} cpu={:?} connections={} alerts={} blocked={} error={:?}",
                    state.connection.lifecycle,
                    state.connection.attempt_count,
                    cpu,
                    state.connections.len(),
                    state.alerts.len(),
                    state.blocked.len(),
                    state.connection.last_error,
                );
            }
        }
    }

    let stats = client.link_stats().await?;
    println!(
        "frames_in={} applied={} ignored={} malformed={} reconnects={} transport_errors={} protocol_errors={}",
        stats.frames_in,
        stats.applied,
        stats.ignored,
        stats.malformed,
        stats.reconnects_scheduled,
        stats.transport_errors,
        stats.protocol_errors
    );
    client.disconnect().await?;
    client.shutdown().await?;
    Ok(())
}
