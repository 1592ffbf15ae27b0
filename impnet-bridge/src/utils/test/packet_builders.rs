use crate::config::InterfaceIdentity;
use impnet_packets::{
    EthernetFrame, IpProtocol, Ipv4Packet, MacAddr, PacketData, TcpSegment, UdpSegment,
    IPV4_ETHER_TYPE,
};
use std::convert::TryFrom;
use std::net::Ipv4Addr;

/// The addressing most tests run under: we are 10.0.0.5/24 fronting a host
/// that believes it is 10.0.0.9, with 10.0.0.1 as the gateway.
pub fn identity_10_0_0() -> InterfaceIdentity {
    InterfaceIdentity::statically(
        MacAddr::new([2, 0, 0, 0, 0, 5]),
        Ipv4Addr::new(10, 0, 0, 5),
        Ipv4Addr::new(255, 255, 255, 0),
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 0, 9),
    )
}

/// Raw IPv4+UDP packet bytes with both checksums valid.
pub fn build_udp_packet(
    src: Ipv4Addr,
    dest: Ipv4Addr,
    src_port: u16,
    dest_port: u16,
    payload: &[u8],
) -> PacketData {
    let mut ip = Ipv4Packet::empty();
    ip.set_ttl(64);
    ip.set_protocol(IpProtocol::UDP);
    ip.set_src_addr(src);
    ip.set_dest_addr(dest);

    let mut segment = vec![0u8; 8];
    segment[0..2].copy_from_slice(&src_port.to_be_bytes());
    segment[2..4].copy_from_slice(&dest_port.to_be_bytes());
    let length = (8 + payload.len()) as u16;
    segment[4..6].copy_from_slice(&length.to_be_bytes());
    segment.extend_from_slice(payload);

    ip.set_payload(&segment);
    ip.set_checksum();
    let mut udp = UdpSegment::try_from(ip).unwrap();
    udp.set_checksum().unwrap();
    udp.data
}

/// Raw IPv4+TCP packet bytes with both checksums valid and no TCP options.
#[allow(clippy::too_many_arguments)]
pub fn build_tcp_packet(
    src: Ipv4Addr,
    dest: Ipv4Addr,
    src_port: u16,
    dest_port: u16,
    seq: u32,
    ack: u32,
    flags: u16,
    payload: &[u8],
) -> PacketData {
    let mut ip = Ipv4Packet::empty();
    ip.set_ttl(64);
    ip.set_protocol(IpProtocol::TCP);
    ip.set_src_addr(src);
    ip.set_dest_addr(dest);

    let mut segment = vec![0u8; 20];
    segment[0..2].copy_from_slice(&src_port.to_be_bytes());
    segment[2..4].copy_from_slice(&dest_port.to_be_bytes());
    segment[4..8].copy_from_slice(&seq.to_be_bytes());
    segment[8..12].copy_from_slice(&ack.to_be_bytes());
    let offset_and_flags = (5u16 << 12) | flags;
    segment[12..14].copy_from_slice(&offset_and_flags.to_be_bytes());
    segment[14..16].copy_from_slice(&8192u16.to_be_bytes());
    segment.extend_from_slice(payload);

    ip.set_payload(&segment);
    ip.set_checksum();
    let mut tcp = TcpSegment::try_from(ip).unwrap();
    tcp.set_checksum().unwrap();
    tcp.data
}

/// Wraps raw IPv4 packet bytes in an Ethernet frame padded to the minimum.
pub fn wrap_ipv4_frame(dest_mac: MacAddr, src_mac: MacAddr, packet: &[u8]) -> Vec<u8> {
    let mut frame = EthernetFrame::empty();
    frame.set_payload(packet);
    frame.set_ether_type(IPV4_ETHER_TYPE);
    frame.set_dest_mac(dest_mac);
    frame.set_src_mac(src_mac);
    frame.pad_to_minimum();
    frame.data
}
