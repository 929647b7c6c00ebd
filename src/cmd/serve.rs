use bootherd_dhcp::{arp, DhcpServer, InterfaceDirectory, ProtocolEngine, SystemInterfaces};
use bootherd_store::{DirectoryPersistence, Registry};
use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::DaemonConfig;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Configuration file (defaults to the first of /etc/bootherd, ~/.config/bootherd, ./)
    #[arg(long, env = "BOOTHERD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to bind the DHCP listener to
    #[arg(long)]
    pub address: Option<Ipv4Addr>,

    /// UDP port for the DHCP listener
    #[arg(long)]
    pub port: Option<u16>,

    /// Only serve requests arriving on this interface
    #[arg(long)]
    pub interface: Option<String>,

    /// Directory of record manifests to load at startup
    #[arg(long)]
    pub manifests: Option<PathBuf>,

    /// Directory records are persisted to
    #[arg(long)]
    pub persistence: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(address) = self.address {
            config.dhcp.address = address;
        }
        if let Some(port) = self.port {
            config.dhcp.port = port;
        }
        if let Some(interface) = &self.interface {
            config.dhcp.interface = Some(interface.clone());
        }
        if let Some(dir) = &self.manifests {
            config.store.manifests = Some(dir.clone());
        }
        if let Some(dir) = &self.persistence {
            config.store.persistence = Some(dir.clone());
        }
    }
}

pub async fn run_serve(args: ServeArgs, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let (mut config, source) = DaemonConfig::load(args.config.as_deref())?;
    match &source {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => info!("No configuration file found, using defaults"),
    }
    args.apply(&mut config);

    let registry = Arc::new(build_registry(&config)?);
    info!(records = registry.len(), "Registry ready");

    if !config.dhcp.enabled {
        info!("DHCP disabled, idling until shutdown");
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        return Ok(());
    }

    let interfaces = Arc::new(SystemInterfaces);
    let mut engine = ProtocolEngine::new(registry, arp::system_injector(), interfaces.clone())
        .with_chainloaders(config.dhcp.chainloaders.clone());
    if let Some(name) = &config.dhcp.interface {
        let interface = interfaces
            .by_name(name)
            .wrap_err_with(|| format!("interface {} not found", name))?;
        engine = engine.with_bound_interface(interface);
    }

    let server = DhcpServer::new(config.dhcp_config(), Arc::new(engine));
    server.run(shutdown).await.wrap_err("DHCP server failed")?;

    info!("Shutdown complete");
    Ok(())
}

fn build_registry(config: &DaemonConfig) -> Result<Registry> {
    let registry = match &config.store.persistence {
        Some(dir) => {
            let persistence = DirectoryPersistence::new(dir)
                .wrap_err_with(|| format!("cannot use persistence directory {}", dir.display()))?;
            Registry::with_persistence(Arc::new(persistence))
        }
        None => Registry::new(),
    };

    // Previously persisted records first, so manifests on disk win
    if let Some(dir) = &config.store.persistence {
        if config.store.manifests.as_deref() != Some(dir.as_path()) {
            load(&registry, dir)?;
        }
    }
    if let Some(dir) = &config.store.manifests {
        load(&registry, dir)?;
    }

    Ok(registry)
}

fn load(registry: &Registry, dir: &Path) -> Result<()> {
    let report = registry
        .load_from_directory(dir)
        .wrap_err_with(|| format!("failed to load manifests from {}", dir.display()))?;

    for (path, reason) in &report.skipped {
        warn!(path = %path.display(), reason = %reason, "Skipped manifest");
    }
    info!(
        dir = %dir.display(),
        loaded = report.loaded.len(),
        skipped = report.skipped.len(),
        "Loaded manifests"
    );
    Ok(())
}
