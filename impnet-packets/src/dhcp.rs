use crate::*;
use std::convert::{TryFrom, TryInto};
use std::net::Ipv4Addr;

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

/// "DHCP" magic cookie that follows the fixed BOOTP region.
pub const DHCP_MAGIC: u32 = 0x6382_5363;

/// Broadcast bit in the BOOTP flags word.
const FLAG_BROADCAST: u16 = 0x8000;

/// Offset of the magic cookie within the datagram; the fixed BOOTP region
/// is 236 bytes.
const COOKIE_OFFSET: usize = 236;
const OPTIONS_OFFSET: usize = 240;

const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_PARAMETER_LIST: u8 = 55;
const OPT_RENEWAL_TIME: u8 = 58;
const OPT_REBINDING_TIME: u8 = 59;
const OPT_END: u8 = 255;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl TryFrom<u8> for DhcpMessageType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DhcpMessageType::Discover),
            2 => Ok(DhcpMessageType::Offer),
            3 => Ok(DhcpMessageType::Request),
            4 => Ok(DhcpMessageType::Decline),
            5 => Ok(DhcpMessageType::Ack),
            6 => Ok(DhcpMessageType::Nak),
            7 => Ok(DhcpMessageType::Release),
            8 => Ok(DhcpMessageType::Inform),
            _ => Err("Unknown DHCP message type"),
        }
    }
}

impl From<DhcpMessageType> for u8 {
    fn from(message_type: DhcpMessageType) -> Self {
        match message_type {
            DhcpMessageType::Discover => 1,
            DhcpMessageType::Offer => 2,
            DhcpMessageType::Request => 3,
            DhcpMessageType::Decline => 4,
            DhcpMessageType::Ack => 5,
            DhcpMessageType::Nak => 6,
            DhcpMessageType::Release => 7,
            DhcpMessageType::Inform => 8,
        }
    }
}

/// A decoded BOOTP/DHCP datagram (the UDP payload only). The fixed BOOTP
/// fields are always present; option-carried values are `Option`s.
#[derive(Clone, Debug)]
pub struct DhcpMessage {
    pub op: u8,
    pub xid: u32,
    pub secs: u16,
    pub broadcast: bool,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: MacAddr,
    pub message_type: Option<DhcpMessageType>,
    pub requested_ip: Option<Ipv4Addr>,
    pub server_id: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub router: Option<Ipv4Addr>,
    pub lease_seconds: Option<u32>,
    pub renewal_seconds: Option<u32>,
    pub rebinding_seconds: Option<u32>,
    pub parameter_request_list: Option<Vec<u8>>,
}

impl DhcpMessage {
    /// A BOOTREQUEST skeleton for client-originated messages, with the
    /// broadcast flag set and all addresses zeroed.
    pub fn client_request(xid: u32, chaddr: MacAddr) -> DhcpMessage {
        DhcpMessage {
            op: BOOTREQUEST,
            xid,
            secs: 0,
            broadcast: true,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            message_type: None,
            requested_ip: None,
            server_id: None,
            subnet_mask: None,
            router: None,
            lease_seconds: None,
            renewal_seconds: None,
            rebinding_seconds: None,
            parameter_request_list: Some(vec![OPT_SUBNET_MASK, OPT_ROUTER]),
        }
    }

    pub fn decode(payload: &[u8]) -> Result<DhcpMessage, &'static str> {
        if payload.len() < OPTIONS_OFFSET {
            return Err("Datagram too short to be DHCP");
        }

        let magic = u32::from_be_bytes(
            payload[COOKIE_OFFSET..COOKIE_OFFSET + 4]
                .try_into()
                .unwrap(),
        );
        if magic != DHCP_MAGIC {
            return Err("Datagram is missing the DHCP magic cookie");
        }

        let op = payload[0];
        if op != BOOTREQUEST && op != BOOTREPLY {
            return Err("Datagram has an invalid BOOTP op code");
        }
        if payload[1] != 1 || payload[2] != 6 {
            return Err("Datagram is not for Ethernet hardware addresses");
        }

        let chaddr_bytes: [u8; 6] = payload[28..34].try_into().unwrap();
        let mut message = DhcpMessage {
            op,
            xid: u32::from_be_bytes(payload[4..8].try_into().unwrap()),
            secs: u16::from_be_bytes(payload[8..10].try_into().unwrap()),
            broadcast: u16::from_be_bytes(payload[10..12].try_into().unwrap()) & FLAG_BROADCAST
                != 0,
            ciaddr: ipv4_field(payload, 12),
            yiaddr: ipv4_field(payload, 16),
            siaddr: ipv4_field(payload, 20),
            giaddr: ipv4_field(payload, 24),
            chaddr: MacAddr::new(chaddr_bytes),
            message_type: None,
            requested_ip: None,
            server_id: None,
            subnet_mask: None,
            router: None,
            lease_seconds: None,
            renewal_seconds: None,
            rebinding_seconds: None,
            parameter_request_list: None,
        };

        let mut at = OPTIONS_OFFSET;
        while at < payload.len() {
            let code = payload[at];
            if code == OPT_END {
                break;
            }
            if code == OPT_PAD {
                at += 1;
                continue;
            }
            if at + 1 >= payload.len() {
                return Err("Datagram has a truncated option header");
            }
            let len = payload[at + 1] as usize;
            if at + 2 + len > payload.len() {
                return Err("Datagram has a truncated option body");
            }
            let body = &payload[at + 2..at + 2 + len];
            match code {
                OPT_MESSAGE_TYPE if len == 1 => {
                    message.message_type = DhcpMessageType::try_from(body[0]).ok();
                }
                OPT_SUBNET_MASK if len == 4 => message.subnet_mask = Some(ipv4_field(body, 0)),
                OPT_ROUTER if len >= 4 => message.router = Some(ipv4_field(body, 0)),
                OPT_REQUESTED_IP if len == 4 => message.requested_ip = Some(ipv4_field(body, 0)),
                OPT_SERVER_ID if len == 4 => message.server_id = Some(ipv4_field(body, 0)),
                OPT_LEASE_TIME if len == 4 => message.lease_seconds = Some(u32_field(body)),
                OPT_RENEWAL_TIME if len == 4 => message.renewal_seconds = Some(u32_field(body)),
                OPT_REBINDING_TIME if len == 4 => {
                    message.rebinding_seconds = Some(u32_field(body))
                }
                OPT_PARAMETER_LIST => message.parameter_request_list = Some(body.to_vec()),
                _ => {} // Unrecognized options are skipped, not an error.
            }
            at += 2 + len;
        }

        Ok(message)
    }

    /// Encodes to a UDP payload: fixed BOOTP region, cookie, options.
    pub fn encode(&self) -> PacketData {
        let mut payload = vec![0u8; OPTIONS_OFFSET];
        payload[0] = self.op;
        payload[1] = 1; // htype: Ethernet
        payload[2] = 6; // hlen
        payload[4..8].copy_from_slice(&self.xid.to_be_bytes());
        payload[8..10].copy_from_slice(&self.secs.to_be_bytes());
        if self.broadcast {
            payload[10..12].copy_from_slice(&FLAG_BROADCAST.to_be_bytes());
        }
        payload[12..16].copy_from_slice(&self.ciaddr.octets());
        payload[16..20].copy_from_slice(&self.yiaddr.octets());
        payload[20..24].copy_from_slice(&self.siaddr.octets());
        payload[24..28].copy_from_slice(&self.giaddr.octets());
        payload[28..34].copy_from_slice(&self.chaddr.bytes);
        payload[COOKIE_OFFSET..OPTIONS_OFFSET].copy_from_slice(&DHCP_MAGIC.to_be_bytes());

        if let Some(message_type) = self.message_type {
            payload.extend_from_slice(&[OPT_MESSAGE_TYPE, 1, message_type.into()]);
        }
        if let Some(requested_ip) = self.requested_ip {
            payload.extend_from_slice(&[OPT_REQUESTED_IP, 4]);
            payload.extend_from_slice(&requested_ip.octets());
        }
        if let Some(server_id) = self.server_id {
            payload.extend_from_slice(&[OPT_SERVER_ID, 4]);
            payload.extend_from_slice(&server_id.octets());
        }
        if let Some(subnet_mask) = self.subnet_mask {
            payload.extend_from_slice(&[OPT_SUBNET_MASK, 4]);
            payload.extend_from_slice(&subnet_mask.octets());
        }
        if let Some(router) = self.router {
            payload.extend_from_slice(&[OPT_ROUTER, 4]);
            payload.extend_from_slice(&router.octets());
        }
        if let Some(lease_seconds) = self.lease_seconds {
            payload.extend_from_slice(&[OPT_LEASE_TIME, 4]);
            payload.extend_from_slice(&lease_seconds.to_be_bytes());
        }
        if let Some(list) = &self.parameter_request_list {
            payload.extend_from_slice(&[OPT_PARAMETER_LIST, list.len() as u8]);
            payload.extend_from_slice(list);
        }
        payload.push(OPT_END);

        // BOOTP relays expect at least a 300 byte datagram.
        if payload.len() < 300 {
            payload.resize(300, 0);
        }
        payload
    }
}

fn ipv4_field(data: &[u8], offset: usize) -> Ipv4Addr {
    let bytes: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
    Ipv4Addr::from(bytes)
}

fn u32_field(data: &[u8]) -> u32 {
    u32::from_be_bytes(data[0..4].try_into().unwrap())
}
