//! Neighbor-table injection
//!
//! A client that has not yet accepted its address cannot answer ARP, so a
//! unicast reply to the offered address would never leave the host. Writing
//! the (ip, mac) pair into the kernel ARP table first lets the reply go out
//! as unicast.

use bitflags::bitflags;
use bootherd_manifest::HardwareAddr;
use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while writing a neighbor entry
#[derive(Debug, Error)]
pub enum ArpError {
    /// The platform has no supported injection mechanism
    #[error("address injection is not supported on {0}")]
    Unsupported(&'static str),

    /// Device name is empty or too long for the kernel
    #[error("invalid interface name: {0:?}")]
    InvalidInterface(String),

    /// Hardware address does not fit the request structure
    #[error("hardware address {0} does not fit an ARP entry")]
    InvalidHardwareAddress(String),

    /// Control socket could not be opened
    #[error("failed to open control socket: {0}")]
    Socket(#[source] io::Error),

    /// The kernel rejected the request
    #[error("SIOCSARP on {interface} failed: {source}")]
    Ioctl {
        interface: String,
        #[source]
        source: io::Error,
    },
}

bitflags! {
    /// ARP entry flags, matching the kernel's `ATF_*` values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ArpFlags: i32 {
        const COMPLETED = 0x02;
        const PERMANENT = 0x04;
        const PUBLISHED = 0x08;
        const USE_TRAILERS = 0x10;
        const NETMASK = 0x20;
        const DONT_PUBLISH = 0x40;
    }
}

/// One neighbor-table entry to write.
#[derive(Debug, Clone, Copy)]
pub struct NeighborEntry<'a> {
    pub ip: Ipv4Addr,
    pub mac: &'a HardwareAddr,
    pub interface: &'a str,
    pub flags: ArpFlags,
}

impl<'a> NeighborEntry<'a> {
    /// Completed, non-permanent entry.
    pub fn new(ip: Ipv4Addr, mac: &'a HardwareAddr, interface: &'a str) -> Self {
        Self {
            ip,
            mac,
            interface,
            flags: ArpFlags::COMPLETED,
        }
    }

    pub fn permanent(mut self) -> Self {
        self.flags |= ArpFlags::PERMANENT;
        self
    }
}

impl fmt::Display for NeighborEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} on {}", self.ip, self.mac, self.interface)
    }
}

/// Writes entries into the host neighbor table.
pub trait AddressInjector: Send + Sync {
    /// Inject using a freshly opened control socket.
    fn inject(&self, entry: &NeighborEntry<'_>) -> Result<(), ArpError>;

    /// Inject through an already-open IPv4 datagram socket.
    fn inject_with(&self, socket: BorrowedFd<'_>, entry: &NeighborEntry<'_>)
        -> Result<(), ArpError>;
}

/// Injector for the current platform.
pub fn system_injector() -> Arc<dyn AddressInjector> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(KernelArpTable)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnsupportedPlatform)
    }
}

/// Reports [`ArpError::Unsupported`] for every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedPlatform;

impl AddressInjector for UnsupportedPlatform {
    fn inject(&self, _entry: &NeighborEntry<'_>) -> Result<(), ArpError> {
        Err(ArpError::Unsupported(std::env::consts::OS))
    }

    fn inject_with(
        &self,
        _socket: BorrowedFd<'_>,
        _entry: &NeighborEntry<'_>,
    ) -> Result<(), ArpError> {
        Err(ArpError::Unsupported(std::env::consts::OS))
    }
}

#[cfg(target_os = "linux")]
pub use linux::KernelArpTable;

#[cfg(target_os = "linux")]
mod linux {
    use super::{AddressInjector, ArpError, NeighborEntry};
    use socket2::{Domain, Protocol, Socket, Type};
    use std::io;
    use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

    const ETHER_ADDR_LEN: usize = 6;

    /// Linux ARP table, written with `SIOCSARP`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct KernelArpTable;

    impl AddressInjector for KernelArpTable {
        fn inject(&self, entry: &NeighborEntry<'_>) -> Result<(), ArpError> {
            let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
                .map_err(ArpError::Socket)?;
            self.inject_with(socket.as_fd(), entry)
        }

        fn inject_with(
            &self,
            socket: BorrowedFd<'_>,
            entry: &NeighborEntry<'_>,
        ) -> Result<(), ArpError> {
            let request = arp_request(entry)?;

            // SAFETY: `request` is a fully initialised arpreq that outlives the call.
            let rc = unsafe {
                libc::ioctl(
                    socket.as_raw_fd(),
                    libc::SIOCSARP as _,
                    &request as *const libc::arpreq,
                )
            };
            if rc < 0 {
                return Err(ArpError::Ioctl {
                    interface: entry.interface.to_string(),
                    source: io::Error::last_os_error(),
                });
            }

            tracing::debug!(entry = %entry, "Injected neighbor entry");
            Ok(())
        }
    }

    pub(super) fn arp_request(entry: &NeighborEntry<'_>) -> Result<libc::arpreq, ArpError> {
        let device = entry.interface.as_bytes();
        if device.is_empty() || device.len() >= libc::IFNAMSIZ || device.contains(&0) {
            return Err(ArpError::InvalidInterface(entry.interface.to_string()));
        }

        // SAFETY: arpreq is plain old data; all-zero is a valid value.
        let mut request: libc::arpreq = unsafe { std::mem::zeroed() };

        // Entries are written as ARPHRD_ETHER
        let hw = entry.mac.as_bytes();
        if hw.len() != ETHER_ADDR_LEN {
            return Err(ArpError::InvalidHardwareAddress(entry.mac.to_string()));
        }

        let protocol = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 0,
            sin_addr: libc::in_addr {
                s_addr: u32::from(entry.ip).to_be(),
            },
            sin_zero: [0; 8],
        };
        // SAFETY: sockaddr_in and sockaddr have the same size; the write is unaligned-safe.
        unsafe {
            std::ptr::write_unaligned(
                &mut request.arp_pa as *mut libc::sockaddr as *mut libc::sockaddr_in,
                protocol,
            );
        }

        request.arp_ha.sa_family = libc::ARPHRD_ETHER;
        for (dst, src) in request.arp_ha.sa_data.iter_mut().zip(hw) {
            *dst = *src as libc::c_char;
        }

        request.arp_flags = entry.flags.bits();

        for (dst, src) in request.arp_dev.iter_mut().zip(device) {
            *dst = *src as libc::c_char;
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> HardwareAddr {
        HardwareAddr::from([0x52, 0x54, 0x00, 0xab, 0xcd, 0xef])
    }

    #[test]
    fn test_entry_flags() {
        let mac = mac();
        let entry = NeighborEntry::new(Ipv4Addr::new(10, 0, 0, 20), &mac, "eth0");
        assert_eq!(entry.flags, ArpFlags::COMPLETED);

        let entry = entry.permanent();
        assert!(entry.flags.contains(ArpFlags::COMPLETED | ArpFlags::PERMANENT));
        assert_eq!(entry.flags.bits(), 0x06);
    }

    #[test]
    fn test_entry_display() {
        let mac = mac();
        let entry = NeighborEntry::new(Ipv4Addr::new(10, 0, 0, 20), &mac, "eth0");
        assert_eq!(entry.to_string(), "10.0.0.20 -> 52:54:00:ab:cd:ef on eth0");
    }

    #[test]
    fn test_unsupported_platform() {
        let mac = mac();
        let entry = NeighborEntry::new(Ipv4Addr::new(10, 0, 0, 20), &mac, "eth0");
        let err = UnsupportedPlatform.inject(&entry).unwrap_err();
        assert!(matches!(err, ArpError::Unsupported(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_arp_request_layout() {
        let mac = mac();
        let entry = NeighborEntry::new(Ipv4Addr::new(10, 0, 0, 20), &mac, "eth0");
        let request = linux::arp_request(&entry).unwrap();

        assert_eq!(request.arp_ha.sa_family, libc::ARPHRD_ETHER);
        assert_eq!(request.arp_ha.sa_data[0] as u8, 0x52);
        assert_eq!(request.arp_ha.sa_data[5] as u8, 0xef);
        assert_eq!(request.arp_flags, libc::ATF_COM);
        assert_eq!(request.arp_dev[0] as u8, b'e');
        assert_eq!(request.arp_dev[4], 0);

        let pa = unsafe {
            std::ptr::read_unaligned(&request.arp_pa as *const libc::sockaddr as *const libc::sockaddr_in)
        };
        assert_eq!(pa.sin_family, libc::AF_INET as libc::sa_family_t);
        assert_eq!(u32::from_be(pa.sin_addr.s_addr), u32::from(Ipv4Addr::new(10, 0, 0, 20)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_arp_request_rejects_bad_input() {
        let mac = mac();
        let entry = NeighborEntry::new(Ipv4Addr::new(10, 0, 0, 20), &mac, "");
        assert!(matches!(
            linux::arp_request(&entry),
            Err(ArpError::InvalidInterface(_))
        ));

        let entry = NeighborEntry::new(Ipv4Addr::new(10, 0, 0, 20), &mac, "an-interface-name-too-long");
        assert!(matches!(
            linux::arp_request(&entry),
            Err(ArpError::InvalidInterface(_))
        ));

        let eui64 = HardwareAddr::new(vec![0x11; 8]);
        let entry = NeighborEntry::new(Ipv4Addr::new(10, 0, 0, 20), &eui64, "eth0");
        assert!(matches!(
            linux::arp_request(&entry),
            Err(ArpError::InvalidHardwareAddress(_))
        ));

        let long = HardwareAddr::new(vec![0x11; 20]);
        let entry = NeighborEntry::new(Ipv4Addr::new(10, 0, 0, 20), &long, "ib0");
        assert!(matches!(
            linux::arp_request(&entry),
            Err(ArpError::InvalidHardwareAddress(_))
        ));
    }
}
