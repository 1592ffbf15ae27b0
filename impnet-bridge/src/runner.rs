use crate::bridge::Bridge;
use crossbeam::crossbeam_channel;
use crossbeam::crossbeam_channel::Receiver;
use crossbeam::select;
use std::time::Duration;
use tracing::info;

/// The nominal clock period driving aging, retransmits, and lease countdowns.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Drives a bridge from its two input channels plus an internal one-second ticker.
///
/// Runs until both channels disconnect, then detaches the bridge (releasing any DHCP lease)
/// and hands it back so the caller can inspect its final state. A channel that closes early
/// is swapped for a never-ready one so the loop keeps serving the other side.
pub fn run_bridge(
    mut bridge: Bridge,
    mut wire_frames: Receiver<Vec<u8>>,
    mut host_packets: Receiver<Vec<u8>>,
) -> Bridge {
    let ticker = crossbeam_channel::tick(TICK_PERIOD);
    let mut wire_open = true;
    let mut host_open = true;

    while wire_open || host_open {
        select! {
            recv(wire_frames) -> frame => match frame {
                Ok(frame) => bridge.on_frame(frame),
                Err(_) => {
                    wire_open = false;
                    wire_frames = crossbeam_channel::never();
                }
            },
            recv(host_packets) -> packet => match packet {
                Ok(packet) => bridge.transmit_host_packet(packet),
                Err(_) => {
                    host_open = false;
                    host_packets = crossbeam_channel::never();
                }
            },
            recv(ticker) -> _ => bridge.tick(),
        }
    }

    info!("bridge inputs closed, detaching");
    bridge.detach();
    bridge
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test::{
        build_udp_packet, identity_10_0_0, wrap_ipv4_frame, CountingHost, RecordingWire,
    };
    use impnet_packets::{ArpFrame, ArpOp, EthernetFrame, MacAddr};
    use std::convert::TryFrom;
    use std::net::Ipv4Addr;

    /// Preloaded channels with dropped senders let the loop drain everything
    /// and exit without ever sleeping on the ticker.
    #[test]
    fn drains_both_channels_then_detaches() {
        let wire = RecordingWire::new();
        let host = CountingHost::new();
        let identity = identity_10_0_0();
        let bridge = Bridge::attach(identity, Box::new(wire.clone()), Box::new(host.clone()));
        wire.take_frames();

        let peer_mac = MacAddr::new([2, 0, 0, 0, 0, 0xc8]);
        let peer_ip = Ipv4Addr::new(10, 0, 0, 200);

        let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
        let (packet_tx, packet_rx) = crossbeam_channel::unbounded();
        let inbound = build_udp_packet(peer_ip, identity.own_ip, 53, 5000, b"answer");
        frame_tx
            .send(wrap_ipv4_frame(identity.own_mac, peer_mac, &inbound))
            .unwrap();
        packet_tx
            .send(build_udp_packet(
                identity.external_host_ip,
                peer_ip,
                5000,
                53,
                b"question",
            ))
            .unwrap();
        drop(frame_tx);
        drop(packet_tx);

        let bridge = run_bridge(bridge, frame_rx, packet_rx);
        assert_eq!(bridge.stats().delivered_to_host, 1);
        assert_eq!(host.delivered().len(), 1);

        // The host packet had no ARP mapping, so the wire saw a request.
        let frames = wire.frames();
        assert_eq!(frames.len(), 1);
        let request = ArpFrame::try_from(
            EthernetFrame::from_buffer(frames[0].clone(), 0).unwrap(),
        )
        .unwrap();
        assert_eq!(request.opcode(), ArpOp::Request as u16);
        assert_eq!(request.target_ipv4(), peer_ip);
    }
}
