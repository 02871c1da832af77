use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error};
use tracing_subscriber::EnvFilter;

use jitroute::config::PeersFile;
use jitroute::net::{NetworkStack, SystemStack};
use jitroute::proxy::{self, ProxyConfig};
use jitroute::routes::PeerDirectory;

#[derive(Parser)]
#[command(name = "jitroute")]
#[command(about = "DNS proxy that routes resolved addresses through per-domain peers", long_about = None)]
struct Args {
    /// Peer file (TOML)
    #[arg(long)]
    peers: PathBuf,

    /// Local port to listen on
    #[arg(short, long, default_value = "5353")]
    port: u16,

    /// Bind address (IPv4 or IPv6)
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Upstream DNS server for other queries (host:port, repeatable)
    #[arg(short, long, default_value = "8.8.8.8:53")]
    upstream: Vec<SocketAddr>,

    /// Timeout for each upstream round trip, in milliseconds
    #[arg(long, default_value = "2500")]
    timeout_ms: u64,

    /// Validate the peer file and exit
    #[arg(long)]
    check: bool,

    /// Log every query
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args) -> Result<(), String> {
    let bind_addr = SocketAddr::new(args.bind, args.port);

    let stack: Arc<dyn NetworkStack> = Arc::new(SystemStack::new());
    let file = PeersFile::from_path(&args.peers).map_err(|e| e.to_string())?;
    let directory = PeerDirectory::load(&file, stack.as_ref())
        .await
        .map_err(|e| e.to_string())?;
    directory.log_summary();

    if args.check {
        return Ok(());
    }

    let config = ProxyConfig {
        bind_addr,
        upstreams: args.upstream,
        timeout: Duration::from_millis(args.timeout_ms),
    };

    proxy::run(config, Arc::new(directory), stack)
        .await
        .map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
