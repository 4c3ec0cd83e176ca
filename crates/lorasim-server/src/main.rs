use std::net::SocketAddr;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lorasim_core::Pool;
use lorasim_server::http;

#[derive(Parser)]
#[command(name = "lorasim")]
#[command(about = "LoRaWAN end-device and gateway simulator")]
#[command(version)]
struct Cli {
    /// Control-plane bind address
    #[arg(short, long, default_value = "127.0.0.1:2208", env = "LORASIM_BIND")]
    bind: SocketAddr,

    /// Log filter (tracing syntax, e.g. "info,lorasim_core=debug")
    #[arg(short, long, default_value = "info", env = "LORASIM_LOG")]
    log: String,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log)))
        .init();

    info!("lorasim v{}", env!("CARGO_PKG_VERSION"));

    let pool = Pool::new();
    let app = http::router(pool);

    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    info!("control plane listening on {}", cli.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
}
