//! DHCP server implementation
//!
//! Owns the UDP socket, hands each datagram to the [`ProtocolEngine`] on its
//! own task and sends whatever reply comes back. On Linux the socket reports
//! the receiving interface (`IP_PKTINFO`) and broadcast replies are pinned
//! to that interface on the way out.

use crate::config::DhcpConfig;
use crate::engine::{Inbound, Outbound, Outcome, ProtocolEngine};
use crate::error::{DhcpError, Result};
use bootherd_manifest::HardwareAddr;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::AsFd;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

const MAX_DATAGRAM: usize = 1500;

/// Event emitted by the DHCP server
#[derive(Debug, Clone)]
pub enum DhcpEvent {
    /// Server started
    Started { bind_addr: SocketAddr },
    /// Sent a DHCP response
    Response {
        mac: HardwareAddr,
        message_type: String,
        offered_ip: Ipv4Addr,
        destination: SocketAddrV4,
    },
    /// Datagram produced no reply
    Dropped { peer: SocketAddr, reason: String },
    /// Reply could not be sent
    SendFailed { mac: HardwareAddr, error: String },
    /// Server stopped
    Stopped,
}

/// DHCP server
pub struct DhcpServer {
    config: DhcpConfig,
    engine: Arc<ProtocolEngine>,
    event_sender: broadcast::Sender<DhcpEvent>,
}

impl DhcpServer {
    /// Create a new DHCP server
    pub fn new(config: DhcpConfig, engine: Arc<ProtocolEngine>) -> Self {
        let (event_sender, _) = broadcast::channel(1024);
        Self {
            config,
            engine,
            event_sender,
        }
    }

    /// Subscribe to server events
    pub fn subscribe(&self) -> broadcast::Receiver<DhcpEvent> {
        self.event_sender.subscribe()
    }

    pub fn config(&self) -> &DhcpConfig {
        &self.config
    }

    /// Run the DHCP server until `shutdown` flips to true
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let bind_addr = self.config.bind_addr();
        let socket = Arc::new(create_socket(bind_addr, self.config.interface.as_deref())?);
        self.serve(socket, shutdown).await
    }

    /// Serve on an already bound socket
    pub async fn serve(
        &self,
        socket: Arc<UdpSocket>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let bind_addr = socket.local_addr()?;
        info!(addr = %bind_addr, interface = ?self.config.interface, "DHCP server started");
        let _ = self.event_sender.send(DhcpEvent::Started { bind_addr });

        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                result = recv_datagram(&socket, &mut buf) => {
                    match result {
                        Ok(datagram) if datagram.truncated => {
                            warn!(peer = %datagram.peer, limit = MAX_DATAGRAM, "Dropped truncated datagram");
                            let _ = self.event_sender.send(DhcpEvent::Dropped {
                                peer: datagram.peer,
                                reason: "datagram truncated".to_string(),
                            });
                        }
                        Ok(datagram) => {
                            let engine = Arc::clone(&self.engine);
                            let socket = Arc::clone(&socket);
                            let events = self.event_sender.clone();
                            tokio::spawn(async move {
                                handle_datagram(&engine, &socket, datagram, &events).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error receiving packet");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    // a dropped sender also means shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        info!("DHCP server shutting down");
                        let _ = self.event_sender.send(DhcpEvent::Stopped);
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for DhcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhcpServer")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Datagram {
    data: Vec<u8>,
    peer: SocketAddr,
    if_index: Option<u32>,
    /// Larger than the receive buffer; `data` holds only a prefix
    truncated: bool,
}

async fn handle_datagram(
    engine: &ProtocolEngine,
    socket: &UdpSocket,
    datagram: Datagram,
    events: &broadcast::Sender<DhcpEvent>,
) {
    let inbound = Inbound {
        data: &datagram.data,
        peer: datagram.peer,
        if_index: datagram.if_index,
        socket: Some(socket.as_fd()),
    };

    let outbound = match engine.handle(&inbound) {
        Outcome::Reply(outbound) => outbound,
        Outcome::Dropped(reason) => {
            debug!(peer = %datagram.peer, reason = %reason, "Dropped DHCP packet");
            let _ = events.send(DhcpEvent::Dropped {
                peer: datagram.peer,
                reason: reason.to_string(),
            });
            return;
        }
    };

    match send_datagram(socket, &outbound).await {
        Ok(_) => {
            info!(
                mac = %outbound.mac,
                msg_type = ?outbound.message_type,
                offered_ip = %outbound.offered_ip,
                dest = %outbound.destination,
                pinned = ?outbound.pin_interface,
                "Sent DHCP response"
            );
            let _ = events.send(DhcpEvent::Response {
                mac: outbound.mac,
                message_type: format!("{:?}", outbound.message_type),
                offered_ip: outbound.offered_ip,
                destination: outbound.destination,
            });
        }
        Err(e) => {
            error!(mac = %outbound.mac, dest = %outbound.destination, error = %e, "Failed to send DHCP response");
            let _ = events.send(DhcpEvent::SendFailed {
                mac: outbound.mac,
                error: e.to_string(),
            });
        }
    }
}

/// Create and configure the UDP socket
pub fn create_socket(bind_addr: SocketAddrV4, interface: Option<&str>) -> Result<UdpSocket> {
    let bind_failed = |source: io::Error| DhcpError::BindFailed {
        addr: bind_addr.into(),
        source,
    };

    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )
    .map_err(bind_failed)?;

    // Allow address reuse
    socket.set_reuse_address(true).ok();

    // Set broadcast option
    socket.set_broadcast(true).ok();

    #[cfg(target_os = "linux")]
    {
        if let Some(name) = interface {
            socket.bind_device(Some(name.as_bytes())).map_err(bind_failed)?;
        }
        nix::sys::socket::setsockopt(&socket, nix::sys::socket::sockopt::Ipv4PacketInfo, &true)
            .map_err(|e| bind_failed(e.into()))?;
    }
    #[cfg(not(target_os = "linux"))]
    {
        if let Some(name) = interface {
            tracing::warn!(interface = name, "Device binding unavailable on this platform");
        }
    }

    socket.bind(&bind_addr.into()).map_err(bind_failed)?;

    // Set non-blocking for tokio
    socket.set_nonblocking(true).map_err(bind_failed)?;

    // Convert to tokio socket
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(bind_failed)
}

#[cfg(target_os = "linux")]
async fn recv_datagram(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<Datagram> {
    use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, SockaddrIn};
    use std::io::IoSliceMut;
    use std::os::fd::AsRawFd;
    use tokio::io::Interest;

    let (len, peer, if_index, truncated) = socket
        .async_io(Interest::READABLE, || {
            let mut iov = [IoSliceMut::new(&mut *buf)];
            let mut cmsg = nix::cmsg_space!(libc::in_pktinfo);
            let msg = recvmsg::<SockaddrIn>(
                socket.as_raw_fd(),
                &mut iov,
                Some(&mut cmsg),
                MsgFlags::empty(),
            )?;

            let mut if_index = None;
            for cmsg in msg.cmsgs()? {
                if let ControlMessageOwned::Ipv4PacketInfo(info) = cmsg {
                    if_index = u32::try_from(info.ipi_ifindex).ok().filter(|index| *index != 0);
                }
            }

            let peer = msg
                .address
                .map(|addr| SocketAddr::V4(SocketAddrV4::from(addr)))
                .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
            let truncated = msg.flags.contains(MsgFlags::MSG_TRUNC);
            Ok((msg.bytes, peer, if_index, truncated))
        })
        .await?;

    Ok(Datagram {
        data: buf[..len].to_vec(),
        peer,
        if_index,
        truncated,
    })
}

#[cfg(not(target_os = "linux"))]
async fn recv_datagram(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<Datagram> {
    // recv_from cannot report truncation; a full buffer is treated as cut
    let (len, peer) = socket.recv_from(buf).await?;
    Ok(Datagram {
        data: buf[..len].to_vec(),
        peer,
        if_index: None,
        truncated: len == buf.len(),
    })
}

#[cfg(target_os = "linux")]
async fn send_datagram(socket: &UdpSocket, outbound: &Outbound) -> io::Result<usize> {
    use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags, SockaddrIn};
    use std::io::IoSlice;
    use std::os::fd::AsRawFd;
    use tokio::io::Interest;

    let Some(index) = outbound.pin_interface else {
        return socket.send_to(&outbound.payload, outbound.destination).await;
    };

    let info = libc::in_pktinfo {
        ipi_ifindex: index as libc::c_int,
        ipi_spec_dst: libc::in_addr { s_addr: 0 },
        ipi_addr: libc::in_addr { s_addr: 0 },
    };
    let addr = SockaddrIn::from(outbound.destination);

    socket
        .async_io(Interest::WRITABLE, || {
            let iov = [IoSlice::new(&outbound.payload)];
            let cmsgs = [ControlMessage::Ipv4PacketInfo(&info)];
            sendmsg(socket.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), Some(&addr))
                .map_err(io::Error::from)
        })
        .await
}

#[cfg(not(target_os = "linux"))]
async fn send_datagram(socket: &UdpSocket, outbound: &Outbound) -> io::Result<usize> {
    socket.send_to(&outbound.payload, outbound.destination).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arp::UnsupportedPlatform;
    use crate::iface::{InterfaceDirectory, InterfaceInfo};
    use bootherd_manifest::Record;
    use bootherd_store::Registry;
    use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode};
    use dhcproto::Encodable;
    use std::time::Duration;

    const MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x00, 0x00, 0x02];

    /// Every index resolves to loopback
    struct Loopback;

    impl InterfaceDirectory for Loopback {
        fn by_index(&self, index: u32) -> Result<InterfaceInfo> {
            Ok(InterfaceInfo {
                index,
                name: "lo".to_string(),
            })
        }

        fn by_name(&self, name: &str) -> Result<InterfaceInfo> {
            Ok(InterfaceInfo {
                index: 1,
                name: name.to_string(),
            })
        }

        fn ipv4_address(&self, _index: u32) -> Result<Ipv4Addr> {
            Ok(Ipv4Addr::LOCALHOST)
        }
    }

    fn server() -> DhcpServer {
        let registry = Arc::new(Registry::new());
        registry
            .put(
                Record::new("node-2", "127.0.0.1/8".parse().unwrap())
                    .with_mac(HardwareAddr::from(MAC)),
            )
            .unwrap();
        let engine = ProtocolEngine::new(registry, Arc::new(UnsupportedPlatform), Arc::new(Loopback))
            .with_bound_interface(InterfaceInfo {
                index: 1,
                name: "lo".to_string(),
            });
        DhcpServer::new(DhcpConfig::default(), Arc::new(engine))
    }

    #[test]
    fn test_dhcp_server_new() {
        let server = server();
        assert_eq!(server.config().port, 67);
        let _receiver = server.subscribe();
    }

    #[tokio::test]
    async fn test_create_socket_ephemeral() {
        let socket = create_socket(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), None).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_serve_replies_to_renewing_client() {
        let server = server();
        let mut events = server.subscribe();

        let socket =
            Arc::new(create_socket(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), None).unwrap());
        let server_addr = socket.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut msg = Message::default();
        msg.set_opcode(Opcode::BootRequest);
        msg.set_xid(42);
        msg.set_chaddr(&MAC);
        msg.set_ciaddr(Ipv4Addr::LOCALHOST);
        msg.opts_mut()
            .insert(DhcpOption::MessageType(MessageType::Request));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let socket = Arc::clone(&socket);
            tokio::spawn(async move { server.serve(socket, shutdown_rx).await })
        };

        client
            .send_to(&msg.to_vec().unwrap(), server_addr)
            .await
            .unwrap();

        let response = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await.unwrap() {
                    DhcpEvent::Response { .. } | DhcpEvent::SendFailed { .. } => break,
                    _ => continue,
                }
            }
        })
        .await;
        assert!(response.is_ok());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_datagram_dropped() {
        let server = server();
        let mut events = server.subscribe();

        let socket =
            Arc::new(create_socket(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), None).unwrap());
        let server_addr = socket.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let socket = Arc::clone(&socket);
            tokio::spawn(async move { server.serve(socket, shutdown_rx).await })
        };

        client
            .send_to(&[0u8; MAX_DATAGRAM + 100], server_addr)
            .await
            .unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let DhcpEvent::Dropped { reason, .. } = events.recv().await.unwrap() {
                    break reason;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reason, "datagram truncated");

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_client_emits_drop() {
        let server = server();
        let mut events = server.subscribe();

        let socket =
            Arc::new(create_socket(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), None).unwrap());
        let server_addr = socket.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut msg = Message::default();
        msg.set_opcode(Opcode::BootRequest);
        msg.set_chaddr(&[0x52, 0x54, 0x00, 0xff, 0xff, 0xff]);
        msg.opts_mut()
            .insert(DhcpOption::MessageType(MessageType::Discover));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let socket = Arc::clone(&socket);
            tokio::spawn(async move { server.serve(socket, shutdown_rx).await })
        };

        client
            .send_to(&msg.to_vec().unwrap(), server_addr)
            .await
            .unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let DhcpEvent::Dropped { reason, .. } = events.recv().await.unwrap() {
                    break reason;
                }
            }
        })
        .await
        .unwrap();
        assert!(reason.starts_with("unknown client"));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        // nothing was sent back
        let mut buf = [0u8; MAX_DATAGRAM];
        let received = tokio::time::timeout(Duration::from_millis(100), client.recv_from(&mut buf)).await;
        assert!(received.is_err());
    }
}
