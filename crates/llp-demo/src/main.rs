use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use eyre::WrapErr;
use llp::reactor::PollReactor;
use llp::{LlpAdapter, LlpConfig, LocalAddr, ProtocolEngine, SocketKind};
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(250);
const PREVIEW_LEN: usize = 16;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Raw,
    Datagram,
}

impl From<Kind> for SocketKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Raw => SocketKind::Raw,
            Kind::Datagram => SocketKind::Datagram,
        }
    }
}

/// Bind an LLP adapter and log every datagram it receives
#[derive(Debug, Parser)]
struct Args {
    /// Local IPv4 address to bind
    #[clap(short, long, default_value = "127.0.0.1")]
    local: LocalAddr,

    /// TOML adapter configuration
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Socket kind, overriding the configuration
    #[clap(long, value_enum)]
    kind: Option<Kind>,

    /// IP protocol number for raw sockets, overriding the configuration
    #[clap(long)]
    protocol: Option<u8>,

    /// Local port for datagram sockets, overriding the configuration
    #[clap(short, long)]
    port: Option<u16>,

    /// Receive buffer size in bytes, overriding the configuration
    #[clap(long)]
    buffer_capacity: Option<usize>,

    /// Send one datagram to this peer after startup
    #[clap(long)]
    send: Option<SocketAddrV4>,

    /// Payload for --send
    #[clap(long, default_value = "hello")]
    payload: String,

    /// Stop after this many seconds; Ctrl-C also stops cleanly
    #[clap(short, long)]
    duration: Option<u64>,

    /// Log as JSON
    #[clap(long)]
    json: bool,
}

impl Args {
    fn adapter_config(&self) -> eyre::Result<LlpConfig> {
        let mut config = match &self.config {
            Some(path) => LlpConfig::load(path)
                .wrap_err_with(|| format!("loading configuration from {}", path.display()))?,
            None => LlpConfig::default(),
        };
        if let Some(kind) = self.kind {
            config.socket_kind = kind.into();
        }
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(port) = self.port {
            config.local_port = port;
        }
        if let Some(capacity) = self.buffer_capacity {
            config.buffer_capacity = capacity;
        }
        config.validate().wrap_err("validating configuration")?;
        Ok(config)
    }
}

/// Engine that only logs what arrives.
#[derive(Default)]
struct LoggingEngine {
    datagrams: AtomicU64,
}

impl ProtocolEngine for LoggingEngine {
    fn process_inbound_data(&self, data: &[u8]) -> eyre::Result<()> {
        let n = self.datagrams.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(n, len = data.len(), preview = %hex_preview(data), "inbound datagram");
        Ok(())
    }
}

fn hex_preview(data: &[u8]) -> String {
    let mut out: String = data
        .iter()
        .take(PREVIEW_LEN)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ");
    if data.len() > PREVIEW_LEN {
        out.push_str(" ..");
    }
    out
}

/// Flag for the reactor loop, set on Ctrl-C or once `duration` elapses.
fn stop_flag(duration: Option<Duration>) -> eyre::Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let interrupted = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        tracing::info!("interrupted, shutting down");
        interrupted.store(true, Ordering::SeqCst);
    })
    .wrap_err("installing Ctrl-C handler")?;

    if let Some(duration) = duration {
        stop_after(Arc::clone(&stop), duration);
    }
    Ok(stop)
}

fn stop_after(stop: Arc<AtomicBool>, duration: Duration) {
    thread::spawn(move || {
        thread::sleep(duration);
        stop.store(true, Ordering::SeqCst);
    });
}

fn main() -> eyre::Result<()> {
    let args = Args::parse();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if args.json {
        builder.json().init();
    } else {
        builder.init();
    }
    color_eyre::install()?;

    tracing::debug!(?args, "parsed command line arguments");

    let config = args.adapter_config()?;
    let reactor = Arc::new(PollReactor::new().wrap_err("creating reactor")?);
    let engine = Arc::new(LoggingEngine::default());

    // configuration errors end the process here
    let adapter = LlpAdapter::initialize(engine.clone(), args.local, reactor.clone(), &config)
        .wrap_err_with(|| format!("initializing adapter on {}", args.local))?;
    tracing::info!(local = %adapter.local_addr(), kind = ?config.socket_kind, "adapter ready");

    if let Some(peer) = args.send {
        // a failed send is reported but does not stop the demo
        if let Err(e) = adapter.send_to(args.payload.as_bytes(), peer) {
            tracing::error!(error = %e, %peer, "initial data request failed");
        }
    }

    let stop = stop_flag(args.duration.map(Duration::from_secs))?;
    let dispatched = reactor.run_until(&stop, TICK).wrap_err("running reactor")?;

    adapter.destroy().wrap_err("destroying adapter")?;
    let stats = adapter.stats();
    tracing::info!(
        dispatched,
        inbound = engine.datagrams.load(Ordering::Relaxed),
        ?stats,
        "adapter stopped"
    );

    Ok(())
}
