//! Error types for the DHCP engine
//!
//! Per-datagram failures never leave the engine; these errors surface from
//! socket setup, interface discovery and packet parsing.

use std::net::SocketAddr;
use thiserror::Error;

/// Error type for DHCP operations
#[derive(Debug, Error)]
pub enum DhcpError {
    /// Failed to bind to socket
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse DHCP packet
    #[error("failed to parse DHCP packet: {0}")]
    ParseError(String),

    /// Interface not found
    #[error("network interface not found: {0}")]
    InterfaceNotFound(String),

    /// Interface has no usable IPv4 address
    #[error("no IPv4 address on interface {0}")]
    NoInterfaceAddress(String),

    /// Interfaces could not be enumerated
    #[error("failed to list network interfaces: {0}")]
    InterfaceQuery(String),

    /// Neighbor entry could not be written
    #[error("address injection failed: {0}")]
    Arp(#[from] crate::arp::ArpError),

    /// Socket send error
    #[error("failed to send packet: {0}")]
    SendError(#[from] std::io::Error),
}

/// Result type for DHCP operations
pub type Result<T> = std::result::Result<T, DhcpError>;
