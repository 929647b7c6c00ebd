use bootherd_dhcp::{arp, NeighborEntry};
use bootherd_manifest::HardwareAddr;
use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use std::net::Ipv4Addr;
use tracing::info;

#[derive(Args, Debug)]
pub struct ArpArgs {
    /// IPv4 address of the neighbor
    #[arg(long)]
    pub ip: Ipv4Addr,

    /// Hardware address (aa:bb:cc:dd:ee:ff)
    #[arg(long)]
    pub mac: HardwareAddr,

    /// Interface the neighbor is reachable on
    #[arg(long)]
    pub device: String,

    /// Keep the entry until removed instead of letting it age out
    #[arg(long, default_value_t = false)]
    pub permanent: bool,
}

pub fn run_arp_inject(args: ArpArgs) -> Result<()> {
    let mut entry = NeighborEntry::new(args.ip, &args.mac, &args.device);
    if args.permanent {
        entry = entry.permanent();
    }

    arp::system_injector()
        .inject(&entry)
        .wrap_err_with(|| format!("failed to inject {}", entry))?;

    info!(entry = %entry, flags = ?entry.flags, "Injected neighbor entry");
    println!("Injected {}", entry);
    Ok(())
}
