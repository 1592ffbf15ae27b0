use crossbeam::crossbeam_channel::Sender;

/// The host side of a bridge.
///
/// `deliver` hands the host an inbound IP packet (already translated back to the address the
/// host believes it has). `acknowledge` tells the host that `count` of its outbound packets
/// have actually been transmitted, which is what lets a host throttle itself to the wire.
pub trait HostBus {
    fn deliver(&mut self, packet: &[u8]);
    fn acknowledge(&mut self, count: u32);
}

/// `HostBus` backed by a pair of crossbeam channels, for hosts that live on another thread.
/// Send errors mean the host went away, which the bridge has no use for knowing about here,
/// so they are swallowed.
pub struct ChannelHost {
    packets: Sender<Vec<u8>>,
    acks: Sender<u32>,
}

impl ChannelHost {
    pub fn new(packets: Sender<Vec<u8>>, acks: Sender<u32>) -> ChannelHost {
        ChannelHost { packets, acks }
    }
}

impl HostBus for ChannelHost {
    fn deliver(&mut self, packet: &[u8]) {
        let _ = self.packets.send(packet.to_vec());
    }

    fn acknowledge(&mut self, count: u32) {
        let _ = self.acks.send(count);
    }
}
