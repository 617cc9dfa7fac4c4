use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::{ServerConfig, TcpServer};
use crate::error::CacheError;
use crate::region::{LoaderCatalog, RegionRegistry};

/// A running cache server: the region registry plus the endpoint serving it.
pub struct Daemon {
  registry: Arc<RegionRegistry>,
  local_addr: SocketAddr,
  shutdown_tx: broadcast::Sender<()>,
  server: JoinHandle<()>,
}

impl Daemon {
  /// Create the configured regions, then start serving them.
  pub async fn start(config: ServerConfig, catalog: &LoaderCatalog) -> Result<Self, CacheError> {
    Self::start_with(Arc::new(RegionRegistry::new()), config, catalog).await
  }

  /// Like [`Daemon::start`], but declares the regions in `registry`.
  ///
  /// On any failure every region in `registry` is released before the
  /// error is returned, so no partially started server is left behind.
  pub async fn start_with(
    registry: Arc<RegionRegistry>,
    config: ServerConfig,
    catalog: &LoaderCatalog,
  ) -> Result<Self, CacheError> {
    for definition in &config.regions {
      if let Err(e) = catalog.create_region(&registry, definition) {
        tracing::error!("Failed to create region '{}': {}", definition.name, e);
        registry.close();
        return Err(e);
      }
    }
    registry.seal();
    for d in registry.descriptors() {
      tracing::info!(
        "Region '{}' ready: key={}, value={}, partitions={}, loader={}, eviction={}",
        d.name,
        d.key_type,
        d.value_type,
        d.partitions,
        d.has_loader,
        d.eviction
      );
    }

    let tcp = match TcpServer::bind(registry.clone(), config).await {
      Ok(tcp) => tcp,
      Err(e) => {
        tracing::error!("{}", e);
        registry.close();
        return Err(e);
      }
    };
    let local_addr = tcp.local_addr();

    let (shutdown_tx, _) = broadcast::channel(1);
    let shutdown_rx = shutdown_tx.subscribe();
    let server = tokio::spawn(tcp.run(shutdown_rx));

    Ok(Self {
      registry,
      local_addr,
      shutdown_tx,
      server,
    })
  }

  /// Address the endpoint is actually bound to.
  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  pub fn registry(&self) -> &Arc<RegionRegistry> {
    &self.registry
  }

  /// Signal the endpoint to stop accepting connections.
  pub fn shutdown(&self) {
    tracing::info!("Initiating graceful shutdown...");
    let _ = self.shutdown_tx.send(());
  }

  /// Stop serving, wait for open connections to drain, then release regions.
  pub async fn stop(self) {
    self.shutdown();
    if let Err(e) = self.server.await {
      tracing::error!("Cache server task failed: {}", e);
    }
    self.registry.close();
    tracing::info!("Cache server stopped");
  }
}
