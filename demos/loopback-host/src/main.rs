//! Walks one packet each way through a bridge, with this program playing both
//! the wire peer and the attached host.

use crate::subscriber::LoopbackHostSubscriber;
use crossbeam::crossbeam_channel;
use crossbeam::crossbeam_channel::Sender;
use impnet_bridge::bridge::Bridge;
use impnet_bridge::config::InterfaceIdentity;
use impnet_bridge::host::ChannelHost;
use impnet_bridge::runner::run_bridge;
use impnet_bridge::transport::{TransmitError, Transport};
use impnet_bridge::utils::test::{build_udp_packet, wrap_ipv4_frame};
use impnet_packets::{ArpFrame, EthernetFrame, Ipv4Packet, MacAddr, UdpSegment, ARP_ETHER_TYPE};
use std::convert::TryFrom;
use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

mod subscriber;

/// `Transport` that hands frames back to the main thread over a channel.
struct ChannelWire {
    frames: Sender<Vec<u8>>,
}

impl Transport for ChannelWire {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransmitError> {
        self.frames.send(frame.to_vec()).map_err(|_| TransmitError)
    }

    fn set_filter(&mut self, own_mac: MacAddr, _extra: &[MacAddr]) {
        println!("wire: receive filter set for {}", own_mac);
    }
}

fn main() {
    let subscriber = LoopbackHostSubscriber::new();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let own_mac = MacAddr::new([2, 0, 0, 0, 0, 5]);
    let peer_mac = MacAddr::new([2, 0, 0, 0, 0, 0xc8]);
    let peer_ip = Ipv4Addr::new(10, 0, 0, 200);
    let identity = InterfaceIdentity::statically(
        own_mac,
        Ipv4Addr::new(10, 0, 0, 5),
        Ipv4Addr::new(255, 255, 255, 0),
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 0, 9),
    );

    let (wire_tx, wire_rx) = crossbeam_channel::unbounded();
    let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
    let (outbound_tx, outbound_rx) = crossbeam_channel::unbounded();
    let (deliver_tx, deliver_rx) = crossbeam_channel::unbounded();
    let (ack_tx, ack_rx) = crossbeam_channel::unbounded();

    let bridge_thread = thread::spawn(move || {
        let bridge = Bridge::attach(
            identity,
            Box::new(ChannelWire { frames: wire_tx }),
            Box::new(ChannelHost::new(deliver_tx, ack_tx)),
        );
        let bridge = run_bridge(bridge, frame_rx, outbound_rx);
        println!("bridge detached: {:?}", bridge.stats());
    });

    let recv = |what: &str| -> Vec<u8> {
        wire_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
    };

    // Attaching announces the bridge's own address.
    let frame = recv("attach announcement");
    let eth = EthernetFrame::from_buffer(frame, 0).expect("announcement frame");
    assert_eq!(eth.ether_type(), ARP_ETHER_TYPE);
    println!("wire: saw gratuitous ARP announcing 10.0.0.5");

    // The host (who believes it is 10.0.0.9) asks 10.0.0.200 a question.
    println!("host: sending question to {}", peer_ip);
    outbound_tx
        .send(build_udp_packet(
            identity.external_host_ip,
            peer_ip,
            4000,
            7,
            b"ping",
        ))
        .expect("bridge gone");

    // The bridge does not know the peer yet, so it asks.
    let frame = recv("ARP request");
    let request = ArpFrame::try_from(EthernetFrame::from_buffer(frame, 0).unwrap())
        .expect("expected an ARP request");
    println!("wire: bridge asks who has {}", request.target_ipv4());
    let mut reply = ArpFrame::reply(peer_mac, peer_ip, own_mac, identity.own_ip).frame();
    reply.pad_to_minimum();
    frame_tx.send(reply.data).expect("bridge gone");

    // Resolution flushes the parked question, translated to our address.
    let frame = recv("data frame");
    let ip = Ipv4Packet::try_from(EthernetFrame::from_buffer(frame, 0).unwrap())
        .expect("expected the flushed question");
    println!(
        "wire: question went out as {} -> {}",
        ip.src_addr(),
        ip.dest_addr()
    );
    let acked = ack_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("no acknowledgment");
    println!("host: {} transmission acknowledged", acked);

    // The peer answers the bridge's address; the host sees its own.
    let answer = build_udp_packet(peer_ip, identity.own_ip, 7, 4000, b"pong");
    frame_tx
        .send(wrap_ipv4_frame(own_mac, peer_mac, &answer))
        .expect("bridge gone");
    let delivered = deliver_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("no delivery");
    let ip = Ipv4Packet::from_buffer(delivered, None, 0).expect("delivered packet");
    let udp = UdpSegment::try_from(ip.clone()).expect("delivered datagram");
    println!(
        "host: received {:?} addressed to {}",
        String::from_utf8_lossy(&udp.payload()),
        ip.dest_addr()
    );

    drop(frame_tx);
    drop(outbound_tx);
    bridge_thread.join().expect("bridge thread panicked");
}
