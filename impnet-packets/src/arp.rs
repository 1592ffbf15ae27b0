use crate::*;
use std::convert::{TryFrom, TryInto};
use std::net::Ipv4Addr;

pub enum ArpOp {
    Request = 1,
    Reply = 2,
}

pub enum ArpHardwareType {
    Ethernet = 1,
}

// Field offsets within the ARP payload, fixed for Ethernet/IPv4 (hlen 6,
// plen 4), the only combination the bridge speaks.
const OPCODE_OFFSET: usize = 6;
const SENDER_MAC_OFFSET: usize = 8;
const SENDER_IP_OFFSET: usize = 14;
const TARGET_MAC_OFFSET: usize = 18;
const TARGET_IP_OFFSET: usize = 24;
const ARP_PAYLOAD_LEN: usize = 28;

/// EthernetFrame wrapper with getters/setters for the RFC 826 packet
/// structure, restricted to the Ethernet/IPv4 flavor.
#[derive(Clone)]
pub struct ArpFrame {
    frame: EthernetFrame,
}

impl ArpFrame {
    /// Constructs an ARP frame with the hardware/protocol preamble already
    /// filled in for Ethernet/IPv4 and everything else zeroed.
    pub fn new() -> Self {
        let mut payload = [0u8; ARP_PAYLOAD_LEN];
        payload[0..2].copy_from_slice(&(ArpHardwareType::Ethernet as u16).to_be_bytes());
        payload[2..4].copy_from_slice(&IPV4_ETHER_TYPE.to_be_bytes());
        payload[4] = 6;
        payload[5] = 4;

        let mut frame = EthernetFrame::empty();
        frame.set_payload(&payload);
        frame.set_ether_type(ARP_ETHER_TYPE);
        ArpFrame { frame }
    }

    /// Builds a broadcast ARP request asking who has `target_ip`.
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> ArpFrame {
        let mut arp = ArpFrame::new();
        arp.set_opcode(ArpOp::Request as u16);
        arp.set_sender_mac(sender_mac);
        arp.set_sender_ipv4(sender_ip);
        arp.set_target_mac(MacAddr::ZERO);
        arp.set_target_ipv4(target_ip);
        arp.frame.set_src_mac(sender_mac);
        arp.frame.set_dest_mac(MacAddr::BROADCAST);
        arp
    }

    /// Builds a directed ARP reply answering `target_mac`'s request.
    pub fn reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> ArpFrame {
        let mut arp = ArpFrame::new();
        arp.set_opcode(ArpOp::Reply as u16);
        arp.set_sender_mac(sender_mac);
        arp.set_sender_ipv4(sender_ip);
        arp.set_target_mac(target_mac);
        arp.set_target_ipv4(target_ip);
        arp.frame.set_src_mac(sender_mac);
        arp.frame.set_dest_mac(target_mac);
        arp
    }

    /// Builds a gratuitous ARP reply announcing a fresh `ip` binding to the
    /// whole segment.
    pub fn gratuitous(sender_mac: MacAddr, ip: Ipv4Addr) -> ArpFrame {
        let mut arp = ArpFrame::new();
        arp.set_opcode(ArpOp::Reply as u16);
        arp.set_sender_mac(sender_mac);
        arp.set_sender_ipv4(ip);
        arp.set_target_mac(MacAddr::BROADCAST);
        arp.set_target_ipv4(ip);
        arp.frame.set_src_mac(sender_mac);
        arp.frame.set_dest_mac(MacAddr::BROADCAST);
        arp
    }

    pub fn hardware_type(&self) -> u16 {
        u16::from_be_bytes(self.arp_data(0, 2).try_into().unwrap())
    }

    pub fn protocol_type(&self) -> u16 {
        u16::from_be_bytes(self.arp_data(2, 4).try_into().unwrap())
    }

    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.arp_data(OPCODE_OFFSET, OPCODE_OFFSET + 2).try_into().unwrap())
    }

    pub fn sender_mac(&self) -> MacAddr {
        let bytes =
            <[u8; 6]>::try_from(self.arp_data(SENDER_MAC_OFFSET, SENDER_MAC_OFFSET + 6)).unwrap();
        MacAddr::new(bytes)
    }

    pub fn sender_ipv4(&self) -> Ipv4Addr {
        let bytes =
            <[u8; 4]>::try_from(self.arp_data(SENDER_IP_OFFSET, SENDER_IP_OFFSET + 4)).unwrap();
        Ipv4Addr::from(bytes)
    }

    pub fn target_mac(&self) -> MacAddr {
        let bytes =
            <[u8; 6]>::try_from(self.arp_data(TARGET_MAC_OFFSET, TARGET_MAC_OFFSET + 6)).unwrap();
        MacAddr::new(bytes)
    }

    pub fn target_ipv4(&self) -> Ipv4Addr {
        let bytes =
            <[u8; 4]>::try_from(self.arp_data(TARGET_IP_OFFSET, TARGET_IP_OFFSET + 4)).unwrap();
        Ipv4Addr::from(bytes)
    }

    pub fn set_opcode(&mut self, code: u16) {
        self.set_arp_data(&code.to_be_bytes(), OPCODE_OFFSET);
    }

    pub fn set_sender_mac(&mut self, mac: MacAddr) {
        self.set_arp_data(&mac.bytes, SENDER_MAC_OFFSET);
    }

    pub fn set_sender_ipv4(&mut self, ip: Ipv4Addr) {
        self.set_arp_data(&ip.octets(), SENDER_IP_OFFSET);
    }

    pub fn set_target_mac(&mut self, mac: MacAddr) {
        self.set_arp_data(&mac.bytes, TARGET_MAC_OFFSET);
    }

    pub fn set_target_ipv4(&mut self, ip: Ipv4Addr) {
        self.set_arp_data(&ip.octets(), TARGET_IP_OFFSET);
    }

    /// Move ownership of the underlying frame back to the caller.
    pub fn frame(self) -> EthernetFrame {
        self.frame
    }

    fn arp_data(&self, start: usize, end: usize) -> &[u8] {
        &self.frame.data[self.frame.payload_offset + start..self.frame.payload_offset + end]
    }

    fn set_arp_data(&mut self, bytes: &[u8], start: usize) {
        let offset = self.frame.payload_offset + start;
        self.frame.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl Default for ArpFrame {
    fn default() -> Self {
        ArpFrame::new()
    }
}

impl TryFrom<EthernetFrame> for ArpFrame {
    type Error = &'static str;

    /// Decorates the given EthernetFrame with ArpFrame getters/setters.
    /// Validates the ether type and that the payload carries an
    /// Ethernet/IPv4 ARP body.
    fn try_from(frame: EthernetFrame) -> Result<Self, Self::Error> {
        if frame.ether_type() != ARP_ETHER_TYPE {
            return Err("Frame does not have ARP ether type");
        }
        if frame.payload().len() < ARP_PAYLOAD_LEN {
            return Err("Frame payload is too small for Ethernet/IPv4 ARP");
        }

        let arp_frame = ArpFrame { frame };
        if arp_frame.hardware_type() != ArpHardwareType::Ethernet as u16
            || arp_frame.protocol_type() != IPV4_ETHER_TYPE
        {
            return Err("ARP frame is not the Ethernet/IPv4 flavor");
        }
        Ok(arp_frame)
    }
}
