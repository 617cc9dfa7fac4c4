use clap::Parser;
use regiond::region::LoaderCatalog;
use regiond::server::{Daemon, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "regiond", about = "Partitioned cache server", version)]
struct Args {
  #[arg(short, long)]
  config: Option<String>,
  #[arg(long)]
  host: Option<String>,
  #[arg(short, long, env = "REGIOND_PORT")]
  port: Option<u16>,
  #[arg(long)]
  log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();

  // Load config: explicit path > auto-detect > defaults
  let mut config = if let Some(path) = &args.config {
    ServerConfig::from_file(path)?
  } else {
    ServerConfig::find_and_load()?.unwrap_or_default()
  };

  // CLI args override config file
  if let Some(port) = args.port {
    config.server.port = port;
  }
  if let Some(host) = args.host {
    config.server.host = host;
  }
  if let Some(level) = args.log_level {
    config.logging.level = level;
  }

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  // Register before serving so a signal sent once the server is ready is
  // never missed.
  let shutdown = ShutdownSignal::install()?;

  let daemon = match Daemon::start(config, &LoaderCatalog::builtin()).await {
    Ok(daemon) => daemon,
    Err(e) => {
      tracing::error!("Failed to start cache server: {}", e);
      std::process::exit(1);
    }
  };
  tracing::info!("Cache server ready on {}", daemon.local_addr());

  shutdown.recv().await;
  daemon.stop().await;
  tracing::info!("Shutdown complete");
  Ok(())
}

struct ShutdownSignal {
  #[cfg(unix)]
  terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
  fn install() -> Result<Self, anyhow::Error> {
    Ok(Self {
      #[cfg(unix)]
      terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
    })
  }

  async fn recv(self) {
    #[cfg(unix)]
    let mut terminate = self.terminate;
    #[cfg(unix)]
    let terminate = terminate.recv();
    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    let ctrl_c = async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
      }
    };

    tokio::select! {
      _ = ctrl_c => tracing::info!("Received SIGINT"),
      _ = terminate => tracing::info!("Received SIGTERM"),
    }
  }
}
