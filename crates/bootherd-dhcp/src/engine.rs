//! Request handling
//!
//! [`ProtocolEngine::handle`] turns one inbound datagram into either a reply
//! with its destination or a drop reason. It performs no socket I/O apart
//! from neighbor injection, so the server loop owns all sends.
//!
//! Replies go out only to clients with a provisioning record. The record
//! supplies the address, mask and lease, plus hostname, domain, DNS, router
//! and NTP options when the client asked for them. Unless the record is
//! suspended, the boot server name and boot file are offered as well.

use crate::arp::{AddressInjector, NeighborEntry};
use crate::config::{Chainloaders, CLIENT_PORT, SERVER_PORT};
use crate::error::{DhcpError, Result};
use crate::iface::{InterfaceDirectory, InterfaceInfo};
use crate::packet::{self, DhcpRequest, IPXE_NO_PXEDHCP};
use bootherd_manifest::{HardwareAddr, Record};
use bootherd_store::Registry;
use dhcproto::v4::{DhcpOption, Message, MessageType, OptionCode, UnknownOption};
use dhcproto::Encodable;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use tracing::{debug, warn};

/// A datagram as received by the listener
#[derive(Debug, Clone, Copy)]
pub struct Inbound<'a> {
    pub data: &'a [u8],
    pub peer: SocketAddr,
    /// Index of the interface the datagram arrived on, when the socket reported it
    pub if_index: Option<u32>,
    /// Listening socket, reused for neighbor injection
    pub socket: Option<BorrowedFd<'a>>,
}

/// A reply ready to send
#[derive(Debug, Clone)]
pub struct Outbound {
    pub payload: Vec<u8>,
    pub destination: SocketAddrV4,
    /// Interface a broadcast or link-local send must leave through
    pub pin_interface: Option<u32>,
    pub message_type: MessageType,
    pub mac: HardwareAddr,
    pub offered_ip: Ipv4Addr,
}

/// Why no reply was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Datagram is not a decodable DHCP message
    Malformed(String),
    /// Opcode is not BOOTREQUEST
    NotBootRequest,
    /// Client released its lease
    Release,
    /// Message type this server does not answer
    UnsupportedMessageType(String),
    /// Local address of the receiving interface is unknown
    NoLocalAddress(String),
    /// No record carries the client hardware address
    UnknownClient(HardwareAddr),
    /// Client selected another server
    ForeignServer(Ipv4Addr),
    /// Record has no IPv4 address
    NoAddress(String),
    /// Reply could not be encoded
    Encode(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Malformed(e) => write!(f, "malformed packet: {}", e),
            DropReason::NotBootRequest => write!(f, "not a boot request"),
            DropReason::Release => write!(f, "release"),
            DropReason::UnsupportedMessageType(mt) => write!(f, "unsupported message type {}", mt),
            DropReason::NoLocalAddress(e) => write!(f, "no local address: {}", e),
            DropReason::UnknownClient(mac) => write!(f, "unknown client {}", mac),
            DropReason::ForeignServer(ip) => write!(f, "client selected server {}", ip),
            DropReason::NoAddress(id) => write!(f, "record {} has no address", id),
            DropReason::Encode(e) => write!(f, "encode failed: {}", e),
        }
    }
}

/// Result of handling one datagram
#[derive(Debug, Clone)]
pub enum Outcome {
    Reply(Outbound),
    Dropped(DropReason),
}

/// DHCP request state machine
pub struct ProtocolEngine {
    registry: Arc<Registry>,
    injector: Arc<dyn AddressInjector>,
    interfaces: Arc<dyn InterfaceDirectory>,
    bound: Option<InterfaceInfo>,
    chainloaders: Chainloaders,
}

impl ProtocolEngine {
    pub fn new(
        registry: Arc<Registry>,
        injector: Arc<dyn AddressInjector>,
        interfaces: Arc<dyn InterfaceDirectory>,
    ) -> Self {
        Self {
            registry,
            injector,
            interfaces,
            bound: None,
            chainloaders: Chainloaders::default(),
        }
    }

    /// Answer as the given interface regardless of packet info
    pub fn with_bound_interface(mut self, interface: InterfaceInfo) -> Self {
        self.bound = Some(interface);
        self
    }

    pub fn with_chainloaders(mut self, chainloaders: Chainloaders) -> Self {
        self.chainloaders = chainloaders;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle one inbound datagram
    pub fn handle(&self, inbound: &Inbound<'_>) -> Outcome {
        match self.process(inbound) {
            Ok(outbound) => Outcome::Reply(outbound),
            Err(reason) => Outcome::Dropped(reason),
        }
    }

    fn process(&self, inbound: &Inbound<'_>) -> std::result::Result<Outbound, DropReason> {
        let request =
            DhcpRequest::parse(inbound.data).map_err(|e| DropReason::Malformed(e.to_string()))?;

        if !request.is_boot_request() {
            return Err(DropReason::NotBootRequest);
        }

        let reply_type = match request.message_type {
            MessageType::Discover => MessageType::Offer,
            MessageType::Request => MessageType::Ack,
            MessageType::Release => return Err(DropReason::Release),
            ref other => return Err(DropReason::UnsupportedMessageType(format!("{:?}", other))),
        };

        let if_index = self.bound.as_ref().map(|iface| iface.index).or(inbound.if_index);
        let local_ip = match if_index {
            Some(index) => self
                .interfaces
                .ipv4_address(index)
                .map_err(|e| DropReason::NoLocalAddress(e.to_string()))?,
            None => {
                return Err(DropReason::NoLocalAddress(
                    "receiving interface not reported".to_string(),
                ))
            }
        };

        let record = self
            .registry
            .find_by_mac(&request.mac)
            .ok_or_else(|| DropReason::UnknownClient(request.mac.clone()))?;

        // 0.0.0.0 counts as no selection
        if let Some(selected) = request.server_identifier.filter(|ip| !ip.is_unspecified()) {
            if selected != local_ip {
                return Err(DropReason::ForeignServer(selected));
            }
        }

        let (Some(offered_ip), Some(mask)) = (record.address(), record.subnet_mask()) else {
            return Err(DropReason::NoAddress(record.id.clone()));
        };

        let reply = self.build_reply(&request, &record, reply_type.clone(), local_ip, offered_ip, mask);
        let payload = reply.to_vec().map_err(|e| DropReason::Encode(e.to_string()))?;

        let (destination, pin_interface) =
            self.destination(&request, inbound, &reply_type, offered_ip, if_index);

        Ok(Outbound {
            payload,
            destination,
            pin_interface,
            message_type: reply_type,
            mac: request.mac,
            offered_ip,
        })
    }

    fn build_reply(
        &self,
        request: &DhcpRequest,
        record: &Record,
        reply_type: MessageType,
        local_ip: Ipv4Addr,
        offered_ip: Ipv4Addr,
        mask: Ipv4Addr,
    ) -> Message {
        let mut reply = packet::reply_to(request);
        reply.set_siaddr(local_ip);
        reply.set_yiaddr(offered_ip);

        let opts = reply.opts_mut();
        opts.insert(DhcpOption::MessageType(reply_type));
        opts.insert(DhcpOption::ServerIdentifier(local_ip));
        opts.insert(DhcpOption::SubnetMask(mask));

        if record.lease_duration != 0 {
            opts.insert(DhcpOption::AddressLeaseTime(record.lease_duration));
        }

        if request.requests(OptionCode::Hostname) && !record.hostname.is_empty() {
            opts.insert(DhcpOption::Hostname(record.hostname.clone()));
        }
        if request.requests(OptionCode::DomainName) && !record.domain.is_empty() {
            opts.insert(DhcpOption::DomainName(record.domain.clone()));
        }
        if request.requests(OptionCode::DomainNameServer) && !record.dns.is_empty() {
            opts.insert(DhcpOption::DomainNameServer(record.dns.clone()));
        }
        if request.requests(OptionCode::Router) && !record.router.is_empty() {
            opts.insert(DhcpOption::Router(record.router.clone()));
        }
        if request.requests(OptionCode::NtpServers) && !record.ntp.is_empty() {
            opts.insert(DhcpOption::NtpServers(record.ntp.clone()));
        }

        if !record.suspended {
            if request.requests(OptionCode::TFTPServerName) {
                opts.insert(DhcpOption::TFTPServerName(local_ip.to_string().into_bytes()));
            }
            if request.requests(OptionCode::BootfileName) {
                let boot_file = self.select_boot_file(request, record);
                if !boot_file.is_empty() {
                    opts.insert(DhcpOption::BootfileName(boot_file.as_bytes().to_vec()));
                }
            }
        }

        if request.is_ipxe() {
            opts.insert(DhcpOption::Unknown(UnknownOption::new(
                OptionCode::from(IPXE_NO_PXEDHCP),
                vec![0, 1],
            )));
        }

        reply
    }

    /// Boot file for this client
    ///
    /// iPXE clients, and records that opt out of chainloading, get the
    /// record's own boot file. Firmware PXE clients get the chainloader
    /// matching their architecture.
    pub fn select_boot_file<'a>(&'a self, request: &DhcpRequest, record: &'a Record) -> &'a str {
        if request.is_ipxe() || !record.ipxe {
            return &record.boot_filename;
        }

        if request.is_uefi() {
            if request.is_arm64_uefi() {
                &self.chainloaders.arm64_uefi
            } else {
                &self.chainloaders.uefi
            }
        } else {
            &self.chainloaders.bios
        }
    }

    fn destination(
        &self,
        request: &DhcpRequest,
        inbound: &Inbound<'_>,
        reply_type: &MessageType,
        offered_ip: Ipv4Addr,
        if_index: Option<u32>,
    ) -> (SocketAddrV4, Option<u32>) {
        let broadcast = SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT);

        let destination = if !request.relay_ip.is_unspecified() {
            SocketAddrV4::new(request.relay_ip, SERVER_PORT)
        } else if *reply_type == MessageType::Nak {
            broadcast
        } else if !request.client_ip.is_unspecified() {
            SocketAddrV4::new(request.client_ip, CLIENT_PORT)
        } else if request.is_broadcast() {
            broadcast
        } else {
            match self.inject_neighbor(&request.mac, offered_ip, if_index, inbound.socket) {
                Ok(()) => SocketAddrV4::new(offered_ip, CLIENT_PORT),
                Err(e) => {
                    warn!(mac = %request.mac, ip = %offered_ip, error = %e, "Falling back to broadcast reply");
                    broadcast
                }
            }
        };

        let ip = destination.ip();
        let pin = if ip.is_broadcast() || ip.is_link_local() {
            if if_index.is_none() {
                warn!(destination = %destination, "Receiving interface unknown, sending unpinned");
            }
            if_index
        } else {
            None
        };

        (destination, pin)
    }

    fn inject_neighbor(
        &self,
        mac: &HardwareAddr,
        ip: Ipv4Addr,
        if_index: Option<u32>,
        socket: Option<BorrowedFd<'_>>,
    ) -> Result<()> {
        let name = match (&self.bound, if_index) {
            (Some(bound), _) => bound.name.clone(),
            (None, Some(index)) => self.interfaces.by_index(index)?.name,
            (None, None) => {
                return Err(DhcpError::InterfaceNotFound(
                    "receiving interface not reported".to_string(),
                ))
            }
        };

        let entry = NeighborEntry::new(ip, mac, &name);
        match socket {
            Some(fd) => self.injector.inject_with(fd, &entry)?,
            None => self.injector.inject(&entry)?,
        }
        debug!(entry = %entry, "Neighbor entry written before unicast reply");
        Ok(())
    }
}

impl fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("bound", &self.bound)
            .field("chainloaders", &self.chainloaders)
            .field("records", &self.registry.len())
            .finish_non_exhaustive()
    }
}
