use anyhow::Context;
use chunkpause::{
    config::{self, ChunkPause, ServerConfig},
    logging, AssetStore, Server,
};
use clap::Parser;
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tokio::signal;
use tracing::{error, info, warn};

/// HTTP/1.x server demonstrating chunked transfer encoding with a delayed
/// final chunk.
#[derive(Parser, Debug)]
#[command(name = "chunkpause", version, about, long_about = None)]
struct Cli {
    /// Port to listen on, overrides `server.port`
    #[arg(short, long)]
    port: Option<u16>,

    /// TOML config file, re-read for `server.chunk.pause` on SIGHUP
    #[arg(short, long, env = "CHUNKPAUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory served under the virtual `/web` root
    #[arg(
        short,
        long,
        env = "CHUNKPAUSE_WEB_ROOT",
        default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/web")
    )]
    web_root: PathBuf,

    /// Milliseconds before the delayed tail, overrides `server.chunk.pause`
    #[arg(long)]
    chunk_pause: Option<u64>,

    /// Log filter used when `RUST_LOG` is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);
    logging::install_panic_hook();

    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ms) = cli.chunk_pause {
        config.chunk_pause.set(Duration::from_millis(ms));
    }

    let assets = AssetStore::load_dir(&cli.web_root)
        .with_context(|| format!("loading assets from {}", cli.web_root.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.worker_threads)
        .thread_name_fn(|| {
            static ID: AtomicUsize = AtomicUsize::new(1);
            format!("ChunkingServer-Worker-{}", ID.fetch_add(1, Ordering::Relaxed))
        })
        .enable_all()
        .build()
        .context("building runtime")?;

    let grace = config.server.shutdown_grace;
    let result = runtime.block_on(serve(config, assets, cli.config));

    info!(?grace, "shutting down runtime");
    runtime.shutdown_timeout(grace);
    result
}

async fn serve(
    config: ServerConfig,
    assets: AssetStore,
    config_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = Server::bind(addr, config.server.backlog)
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, worker_threads = config.server.worker_threads, "listening");

    let pause = config.chunk_pause.clone();
    let server = Server::builder()
        .listener(listener)
        .assets(assets)
        .config(config)
        .build();

    #[cfg(unix)]
    {
        if let Some(path) = config_file {
            tokio::spawn(reload_on_hangup(path, pause));
        }
    }
    #[cfg(not(unix))]
    let _ = (config_file, pause);

    let handle = server.shutdown_handle();
    tokio::spawn(async move {
        loop {
            shutdown_signal().await;
            handle.shutdown();
        }
    });

    server.launch().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received"),
        _ = terminate => info!("terminate received"),
    }
}

/// Applies `server.chunk.pause` from `path` on every SIGHUP.
#[cfg(unix)]
async fn reload_on_hangup(path: PathBuf, pause: ChunkPause) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "SIGHUP reload disabled");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        match read_pause(&path) {
            Ok(Some(value)) => {
                pause.set(value);
                info!(
                    path = %path.display(),
                    pause_ms = value.as_millis() as u64,
                    "chunk pause reloaded; other keys apply on restart"
                );
            }
            Ok(None) => info!(path = %path.display(), "no chunk pause in reloaded file"),
            Err(e) => warn!(path = %path.display(), error = %e, "reload failed"),
        }
    }
}

#[cfg(unix)]
fn read_pause(path: &Path) -> chunkpause::Result<Option<Duration>> {
    let text = std::fs::read_to_string(path)?;
    config::chunk_pause_from_toml(&text)
}
