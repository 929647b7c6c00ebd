//! Bootherd DHCP engine
//!
//! Answers DHCPDISCOVER/DHCPREQUEST from machines that have a provisioning
//! record, handing out the record's address together with PXE/iPXE boot
//! options. Unknown clients are never answered.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    DhcpServer                        │
//! │   UDP :67 ─ recv (IP_PKTINFO) ─ task per datagram    │
//! │                       │                              │
//! │                       ▼                              │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │               ProtocolEngine                   │  │
//! │  │  parse → classify → Registry::find_by_mac →    │  │
//! │  │  build options → resolve destination           │  │
//! │  └────────────────────────────────────────────────┘  │
//! │          │                          │                │
//! │          ▼                          ▼                │
//! │  InterfaceDirectory          AddressInjector         │
//! │  (local IPv4 per ifindex)    (SIOCSARP before        │
//! │                               unicast to new hosts)  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use bootherd_dhcp::{arp, DhcpConfig, DhcpServer, ProtocolEngine, SystemInterfaces};
//! use bootherd_store::Registry;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(Registry::new());
//! let engine = ProtocolEngine::new(registry, arp::system_injector(), Arc::new(SystemInterfaces));
//! let server = DhcpServer::new(DhcpConfig::default().with_interface("eth0"), Arc::new(engine));
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! server.run(shutdown_rx).await?;
//! ```

pub mod arp;
pub mod config;
pub mod engine;
pub mod error;
pub mod iface;
pub mod packet;
pub mod server;

pub use arp::{AddressInjector, ArpError, ArpFlags, NeighborEntry};
pub use config::*;
pub use engine::*;
pub use error::*;
pub use iface::*;
pub use packet::*;
pub use server::*;
