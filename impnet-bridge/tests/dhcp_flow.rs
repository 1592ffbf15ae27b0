//! End-to-end lease acquisition over the wire interface, followed by
//! translated traffic using the leased address.

use impnet_bridge::bridge::Bridge;
use impnet_bridge::config::InterfaceIdentity;
use impnet_bridge::utils::test::{build_udp_packet, CountingHost, RecordingWire};
use impnet_packets::{
    ArpFrame, DhcpMessage, DhcpMessageType, EthernetFrame, IpProtocol, Ipv4Packet, MacAddr,
    UdpSegment, ARP_ETHER_TYPE, BOOTREPLY, DHCP_CLIENT_PORT, DHCP_SERVER_PORT,
};
use std::convert::TryFrom;
use std::net::Ipv4Addr;

const CLIENT_MAC: MacAddr = MacAddr {
    bytes: [2, 0, 0, 0, 0, 9],
};
const SERVER_MAC: MacAddr = MacAddr {
    bytes: [2, 0, 0, 0, 0, 1],
};
const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const HOST_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);
const LEASED_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 77);

/// A server-originated DHCP message as the broadcast Ethernet frame the
/// bridge would receive.
fn server_frame(message: &DhcpMessage) -> Vec<u8> {
    let payload = message.encode();
    let mut segment = vec![0u8; 8];
    segment[0..2].copy_from_slice(&DHCP_SERVER_PORT.to_be_bytes());
    segment[2..4].copy_from_slice(&DHCP_CLIENT_PORT.to_be_bytes());
    let length = (8 + payload.len()) as u16;
    segment[4..6].copy_from_slice(&length.to_be_bytes());
    segment.extend_from_slice(&payload);

    let mut ip = Ipv4Packet::empty();
    ip.set_ttl(64);
    ip.set_protocol(IpProtocol::UDP);
    ip.set_src_addr(SERVER_IP);
    ip.set_dest_addr(Ipv4Addr::BROADCAST);
    ip.set_payload(&segment);
    ip.set_checksum();
    let mut udp = UdpSegment::try_from(ip).unwrap();
    udp.set_checksum().unwrap();

    let mut frame = EthernetFrame::encap_ipv4(Ipv4Packet::try_from(udp).unwrap());
    frame.set_src_mac(SERVER_MAC);
    frame.set_dest_mac(MacAddr::BROADCAST);
    frame.pad_to_minimum();
    frame.data
}

fn decode_client_message(frame: &[u8]) -> DhcpMessage {
    let eth = EthernetFrame::from_buffer(frame.to_vec(), 0).unwrap();
    assert!(eth.dest_mac().is_broadcast());
    let ip = Ipv4Packet::try_from(eth).unwrap();
    assert!(ip.validate_checksum());
    let udp = UdpSegment::try_from(ip).unwrap();
    assert_eq!(udp.src_port(), DHCP_CLIENT_PORT);
    assert_eq!(udp.dest_port(), DHCP_SERVER_PORT);
    assert!(udp.validate_checksum());
    DhcpMessage::decode(&udp.payload()).unwrap()
}

fn offer(xid: u32) -> DhcpMessage {
    let mut message = DhcpMessage::client_request(xid, CLIENT_MAC);
    message.op = BOOTREPLY;
    message.message_type = Some(DhcpMessageType::Offer);
    message.yiaddr = LEASED_IP;
    message.server_id = Some(SERVER_IP);
    message.parameter_request_list = None;
    message
}

fn ack(xid: u32) -> DhcpMessage {
    let mut message = offer(xid);
    message.message_type = Some(DhcpMessageType::Ack);
    message.subnet_mask = Some(Ipv4Addr::new(255, 255, 255, 0));
    message.router = Some(SERVER_IP);
    message.lease_seconds = Some(3600);
    message
}

#[test]
fn lease_acquired_over_the_wire_enables_translation() {
    let wire = RecordingWire::new();
    let host = CountingHost::new();
    let mut bridge = Bridge::attach(
        InterfaceIdentity::via_dhcp(CLIENT_MAC, HOST_IP),
        Box::new(wire.clone()),
        Box::new(host.clone()),
    );
    // Unconfigured, so attach programs the filter but announces nothing.
    assert!(wire.take_frames().is_empty());
    assert_eq!(wire.filters().len(), 1);

    // First tick broadcasts a DISCOVER.
    bridge.tick();
    let frames = wire.take_frames();
    assert_eq!(frames.len(), 1);
    let discover = decode_client_message(&frames[0]);
    assert_eq!(discover.message_type, Some(DhcpMessageType::Discover));
    let xid = discover.xid;

    // The offer is answered with a REQUEST naming the offered address.
    bridge.on_frame(server_frame(&offer(xid)));
    let frames = wire.take_frames();
    assert_eq!(frames.len(), 1);
    let request = decode_client_message(&frames[0]);
    assert_eq!(request.message_type, Some(DhcpMessageType::Request));
    assert_eq!(request.requested_ip, Some(LEASED_IP));
    assert_eq!(request.server_id, Some(SERVER_IP));

    // The ACK commits the lease and announces it.
    bridge.on_frame(server_frame(&ack(xid)));
    assert_eq!(bridge.identity().own_ip, LEASED_IP);
    assert_eq!(bridge.identity().own_mask, Ipv4Addr::new(255, 255, 255, 0));
    assert_eq!(bridge.identity().gateway_ip, SERVER_IP);
    let frames = wire.take_frames();
    assert_eq!(frames.len(), 1);
    let eth = EthernetFrame::from_buffer(frames[0].clone(), 0).unwrap();
    assert_eq!(eth.ether_type(), ARP_ETHER_TYPE);
    let gratuitous = ArpFrame::try_from(eth).unwrap();
    assert_eq!(gratuitous.sender_ipv4(), LEASED_IP);

    // Off-subnet traffic routes via the gateway, whose mapping the lease
    // pinned statically, so it goes straight out under the leased address.
    bridge.transmit_host_packet(build_udp_packet(
        HOST_IP,
        Ipv4Addr::new(192, 0, 2, 7),
        4000,
        53,
        b"question",
    ));
    let frames = wire.take_frames();
    assert_eq!(frames.len(), 1);
    let eth = EthernetFrame::from_buffer(frames[0].clone(), 0).unwrap();
    assert_eq!(eth.dest_mac(), SERVER_MAC);
    let ip = Ipv4Packet::try_from(eth).unwrap();
    assert_eq!(ip.src_addr(), LEASED_IP);
    assert!(ip.validate_checksum());
    let udp = UdpSegment::try_from(ip).unwrap();
    assert!(udp.validate_checksum());
    assert_eq!(host.acked(), 1);
}

#[test]
fn corrupt_dhcp_reply_is_ignored() {
    let wire = RecordingWire::new();
    let mut bridge = Bridge::attach(
        InterfaceIdentity::via_dhcp(CLIENT_MAC, HOST_IP),
        Box::new(wire.clone()),
        Box::new(CountingHost::new()),
    );
    bridge.tick();
    let discover = decode_client_message(&wire.take_frames()[0]);

    // Flip a payload byte without fixing the UDP checksum.
    let mut frame = server_frame(&offer(discover.xid));
    frame[60] ^= 0xff;
    bridge.on_frame(frame);

    // No REQUEST went out and the identity is still unconfigured.
    assert!(wire.take_frames().is_empty());
    assert!(!bridge.identity().is_configured());
}
