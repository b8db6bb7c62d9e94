use clap::Parser;
use floorview_server::ViewerConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// Local viewer for a remote warehouse robot simulator.
#[derive(Parser, Debug)]
#[command(name = "floorview-server", version)]
struct Args {
    /// Base URL of the simulator (serves /init, /update, /add_task, /reset_shift).
    #[arg(long, env = "FLOORVIEW_SIMULATOR", default_value = "http://127.0.0.1:5000")]
    simulator: String,

    /// Address the viewer dashboard listens on.
    #[arg(long, env = "FLOORVIEW_LISTEN", default_value = "127.0.0.1:39334")]
    listen: SocketAddr,

    /// Per-request timeout for simulator calls, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    request_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = ViewerConfig {
        simulator_url: args.simulator,
        request_timeout: Duration::from_millis(args.request_timeout_ms.max(1)),
    };
    tracing::info!(
        listen = %args.listen,
        simulator = %config.simulator_url,
        "starting floorview viewer on http://{}",
        args.listen
    );
    floorview_server::serve(args.listen, config).await
}
