//! DHCP packet handling
//!
//! Parsing of client requests into the fields the engine decides on, and
//! construction of the reply skeleton.

use crate::error::{DhcpError, Result};
use bootherd_manifest::HardwareAddr;
use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, OptionCode};
use dhcproto::Decodable;
use std::net::Ipv4Addr;

/// User class sent by iPXE
pub const IPXE_USER_CLASS: &str = "iPXE";

/// Vendor class fragment identifying ARM64 UEFI firmware
pub const ARM64_UEFI_VENDOR_CLASS: &str = "PXEClient:Arch:00011";

/// iPXE `no-pxedhcp` option: skip waiting for ProxyDHCP offers
pub const IPXE_NO_PXEDHCP: u8 = 176;

const VENDOR_CLASS_ARCH_PREFIX: &str = "PXEClient:Arch:";

const HLEN_OFFSET: usize = 2;
const CHADDR_OFFSET: usize = 28;
const CHADDR_LEN: usize = 16;

/// Client architecture types (RFC 4578)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientArch {
    /// Intel x86 BIOS
    IntelX86Bios,
    /// EFI x86
    EfiX86,
    /// EFI x86_64
    EfiX64,
    /// EFI ARM32
    EfiArm32,
    /// EFI ARM64
    EfiArm64,
    /// Any other registered or vendor code
    Other(u16),
}

impl From<u16> for ClientArch {
    fn from(value: u16) -> Self {
        match value {
            0 => ClientArch::IntelX86Bios,
            6 => ClientArch::EfiX86,
            7 => ClientArch::EfiX64,
            10 => ClientArch::EfiArm32,
            11 => ClientArch::EfiArm64,
            other => ClientArch::Other(other),
        }
    }
}

impl ClientArch {
    pub fn code(&self) -> u16 {
        match self {
            ClientArch::IntelX86Bios => 0,
            ClientArch::EfiX86 => 6,
            ClientArch::EfiX64 => 7,
            ClientArch::EfiArm32 => 10,
            ClientArch::EfiArm64 => 11,
            ClientArch::Other(code) => *code,
        }
    }

    /// Every code other than legacy BIOS is booted as UEFI
    pub fn is_uefi(&self) -> bool {
        self.code() != 0
    }
}

/// Parsed DHCP request with extracted information
#[derive(Debug, Clone)]
pub struct DhcpRequest {
    /// Original message
    pub message: Message,

    /// Message type (DISCOVER, REQUEST, etc.)
    pub message_type: MessageType,

    /// Client hardware address, `hlen` octets of chaddr
    pub mac: HardwareAddr,

    /// Client architecture (from option 93)
    pub client_arch: Option<ClientArch>,

    /// User classes (option 77)
    pub user_classes: Vec<String>,

    /// Vendor class identifier (option 60)
    pub vendor_class: Option<String>,

    /// Server identifier the client selected (option 54)
    pub server_identifier: Option<Ipv4Addr>,

    /// Parameter request list (option 55)
    pub requested_options: Vec<OptionCode>,

    /// Transaction ID
    pub xid: u32,

    /// Client IP (ciaddr)
    pub client_ip: Ipv4Addr,

    /// Gateway IP (giaddr) for relayed requests
    pub relay_ip: Ipv4Addr,
}

impl DhcpRequest {
    /// Parse a DHCP request from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let message =
            Message::from_bytes(data).map_err(|e| DhcpError::ParseError(e.to_string()))?;

        let message_type = match message.opts().get(OptionCode::MessageType) {
            Some(DhcpOption::MessageType(mt)) => mt.clone(),
            _ => return Err(DhcpError::ParseError("missing message type".to_string())),
        };

        let mac = HardwareAddr::from(client_hardware_address(data)?);

        let client_arch = match message.opts().get(OptionCode::ClientSystemArchitecture) {
            Some(DhcpOption::ClientSystemArchitecture(arch)) => {
                Some(ClientArch::from(u16::from(*arch)))
            }
            _ => None,
        };

        let user_classes = match message.opts().get(OptionCode::UserClass) {
            Some(DhcpOption::UserClass(data)) => parse_user_classes(data),
            _ => Vec::new(),
        };

        let vendor_class = match message.opts().get(OptionCode::ClassIdentifier) {
            Some(DhcpOption::ClassIdentifier(class)) => {
                Some(String::from_utf8_lossy(class).into_owned())
            }
            _ => None,
        };

        let server_identifier = match message.opts().get(OptionCode::ServerIdentifier) {
            Some(DhcpOption::ServerIdentifier(ip)) => Some(*ip),
            _ => None,
        };

        let requested_options = match message.opts().get(OptionCode::ParameterRequestList) {
            Some(DhcpOption::ParameterRequestList(codes)) => codes.clone(),
            _ => Vec::new(),
        };

        Ok(Self {
            xid: message.xid(),
            client_ip: message.ciaddr(),
            relay_ip: message.giaddr(),
            message,
            message_type,
            mac,
            client_arch,
            user_classes,
            vendor_class,
            server_identifier,
            requested_options,
        })
    }

    pub fn is_boot_request(&self) -> bool {
        self.message.opcode() == Opcode::BootRequest
    }

    /// Whether option `code` appears in the parameter request list
    pub fn requests(&self, code: OptionCode) -> bool {
        self.requested_options.contains(&code)
    }

    /// True only when the user class list is exactly `["iPXE"]`
    pub fn is_ipxe(&self) -> bool {
        matches!(self.user_classes.as_slice(), [class] if class == IPXE_USER_CLASS)
    }

    pub fn is_broadcast(&self) -> bool {
        self.message.flags().broadcast()
    }

    pub fn is_arm64_uefi(&self) -> bool {
        self.vendor_class
            .as_deref()
            .is_some_and(|class| class.contains(ARM64_UEFI_VENDOR_CLASS))
    }

    /// Architecture from option 93, else from a `PXEClient:Arch:NNNNN` vendor class
    pub fn arch(&self) -> Option<ClientArch> {
        self.client_arch.or_else(|| {
            let class = self.vendor_class.as_deref()?;
            let start = class.find(VENDOR_CLASS_ARCH_PREFIX)? + VENDOR_CLASS_ARCH_PREFIX.len();
            let digits = class.get(start..start + 5)?;
            digits.parse::<u16>().ok().map(ClientArch::from)
        })
    }

    pub fn is_uefi(&self) -> bool {
        self.arch().is_some_and(|arch| arch.is_uefi())
    }
}

/// The first `hlen` octets of chaddr, read from the raw datagram; Ethernet
/// length when hlen is zero
fn client_hardware_address(data: &[u8]) -> Result<&[u8]> {
    let hlen = data.get(HLEN_OFFSET).copied().unwrap_or(0);
    let len = match usize::from(hlen) {
        0 => 6,
        n if n > CHADDR_LEN => {
            return Err(DhcpError::ParseError(format!(
                "hardware address length {} exceeds {}",
                n, CHADDR_LEN
            )))
        }
        n => n,
    };
    data.get(CHADDR_OFFSET..CHADDR_OFFSET + len)
        .ok_or_else(|| DhcpError::ParseError("truncated chaddr".to_string()))
}

/// RFC 3004 length-prefixed list when the framing consumes the data exactly,
/// otherwise the whole payload as one class.
pub fn parse_user_classes(data: &[u8]) -> Vec<String> {
    let mut classes = Vec::new();
    let mut rest = data;

    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::from(len);
        if len == 0 || len > tail.len() {
            return vec![String::from_utf8_lossy(data).into_owned()];
        }
        classes.push(String::from_utf8_lossy(&tail[..len]).into_owned());
        rest = &tail[len..];
    }

    classes
}

/// Reply skeleton echoing the request's addressing fields
pub fn reply_to(request: &DhcpRequest) -> Message {
    let mut reply = Message::default();
    reply.set_opcode(Opcode::BootReply);
    reply.set_htype(request.message.htype());
    reply.set_xid(request.xid);
    reply.set_flags(request.message.flags());
    reply.set_chaddr(request.mac.as_bytes());
    reply.set_giaddr(request.relay_ip);
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcproto::v4::{Architecture, Flags};
    use dhcproto::Encodable;

    fn discover() -> Message {
        let mut msg = Message::default();
        msg.set_opcode(Opcode::BootRequest);
        msg.set_xid(0x12345678);
        msg.set_chaddr(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        msg.opts_mut()
            .insert(DhcpOption::MessageType(MessageType::Discover));
        msg
    }

    fn parse(msg: &Message) -> DhcpRequest {
        DhcpRequest::parse(&msg.to_vec().unwrap()).unwrap()
    }

    #[test]
    fn test_client_arch_from_u16() {
        assert_eq!(ClientArch::from(0), ClientArch::IntelX86Bios);
        assert_eq!(ClientArch::from(7), ClientArch::EfiX64);
        assert_eq!(ClientArch::from(11), ClientArch::EfiArm64);
        assert_eq!(ClientArch::from(16), ClientArch::Other(16));
        assert_eq!(ClientArch::Other(16).code(), 16);
    }

    #[test]
    fn test_client_arch_is_uefi() {
        assert!(!ClientArch::IntelX86Bios.is_uefi());
        assert!(ClientArch::EfiX64.is_uefi());
        assert!(ClientArch::EfiArm64.is_uefi());
        assert!(ClientArch::Other(16).is_uefi());
    }

    #[test]
    fn test_parse_discover() {
        let request = parse(&discover());

        assert_eq!(request.message_type, MessageType::Discover);
        assert_eq!(request.mac.to_string(), "00:11:22:33:44:55");
        assert_eq!(request.xid, 0x12345678);
        assert!(request.is_boot_request());
        assert!(!request.is_broadcast());
        assert!(!request.is_ipxe());
        assert!(request.server_identifier.is_none());
        assert!(request.requested_options.is_empty());
    }

    #[test]
    fn test_parse_missing_message_type() {
        let mut msg = Message::default();
        msg.set_opcode(Opcode::BootRequest);
        msg.set_chaddr(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

        let err = DhcpRequest::parse(&msg.to_vec().unwrap()).unwrap_err();
        assert!(matches!(err, DhcpError::ParseError(_)));
    }

    #[test]
    fn test_parse_hardware_length() {
        let mut data = discover().to_vec().unwrap();
        data[2] = 0;
        let request = DhcpRequest::parse(&data).unwrap();
        assert_eq!(request.mac.to_string(), "00:11:22:33:44:55");

        data[2] = 17;
        let err = DhcpRequest::parse(&data).unwrap_err();
        assert!(matches!(err, DhcpError::ParseError(_)));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(DhcpRequest::parse(&[0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn test_requested_options_and_server_id() {
        let mut msg = discover();
        msg.opts_mut().insert(DhcpOption::ParameterRequestList(vec![
            OptionCode::SubnetMask,
            OptionCode::BootfileName,
        ]));
        msg.opts_mut()
            .insert(DhcpOption::ServerIdentifier(Ipv4Addr::new(10, 0, 0, 1)));
        msg.set_flags(Flags::default().set_broadcast());

        let request = parse(&msg);
        assert!(request.requests(OptionCode::BootfileName));
        assert!(!request.requests(OptionCode::Hostname));
        assert_eq!(request.server_identifier, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(request.is_broadcast());
    }

    #[test]
    fn test_user_class_framing() {
        assert_eq!(parse_user_classes(b"\x04iPXE"), vec!["iPXE"]);
        assert_eq!(parse_user_classes(b"iPXE"), vec!["iPXE"]);
        assert_eq!(parse_user_classes(b"\x04iPXE\x03foo"), vec!["iPXE", "foo"]);
        // trailing bytes break the framing
        assert_eq!(parse_user_classes(b"\x04iPXEx"), vec!["\u{4}iPXEx"]);
        assert!(parse_user_classes(b"").is_empty());
    }

    #[test]
    fn test_is_ipxe_requires_single_class() {
        let mut msg = discover();
        msg.opts_mut()
            .insert(DhcpOption::UserClass(b"\x04iPXE".to_vec()));
        assert!(parse(&msg).is_ipxe());

        let mut msg = discover();
        msg.opts_mut()
            .insert(DhcpOption::UserClass(b"\x04iPXE\x03foo".to_vec()));
        assert!(!parse(&msg).is_ipxe());

        let mut msg = discover();
        msg.opts_mut()
            .insert(DhcpOption::UserClass(b"gPXE".to_vec()));
        assert!(!parse(&msg).is_ipxe());
    }

    #[test]
    fn test_arch_detection() {
        let mut msg = discover();
        msg.opts_mut().insert(DhcpOption::ClientSystemArchitecture(
            Architecture::from(7u16),
        ));
        let request = parse(&msg);
        assert_eq!(request.arch(), Some(ClientArch::EfiX64));
        assert!(request.is_uefi());
        assert!(!request.is_arm64_uefi());

        let mut msg = discover();
        msg.opts_mut().insert(DhcpOption::ClassIdentifier(
            b"PXEClient:Arch:00011:UNDI:003016".to_vec(),
        ));
        let request = parse(&msg);
        assert!(request.is_arm64_uefi());
        assert_eq!(request.arch(), Some(ClientArch::EfiArm64));

        let mut msg = discover();
        msg.opts_mut().insert(DhcpOption::ClassIdentifier(
            b"PXEClient:Arch:00000:UNDI:002001".to_vec(),
        ));
        let request = parse(&msg);
        assert!(!request.is_uefi());
    }

    #[test]
    fn test_reply_to_echoes_request() {
        let mut msg = discover();
        msg.set_giaddr(Ipv4Addr::new(10, 9, 0, 1));
        msg.set_flags(Flags::default().set_broadcast());
        let request = parse(&msg);

        let reply = reply_to(&request);
        assert_eq!(reply.opcode(), Opcode::BootReply);
        assert_eq!(reply.xid(), 0x12345678);
        assert_eq!(reply.giaddr(), Ipv4Addr::new(10, 9, 0, 1));
        assert!(reply.flags().broadcast());
        assert_eq!(&reply.chaddr()[..6], &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    }
}
