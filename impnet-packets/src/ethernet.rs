use crate::*;
use std::borrow::Cow;
use std::convert::{TryFrom, TryInto};

#[derive(Clone, Debug)]
pub struct EthernetFrame {
    pub data: PacketData,
    pub layer2_offset: usize,
    pub payload_offset: usize,
}

impl EthernetFrame {
    pub fn from_buffer(
        frame: PacketData,
        layer2_offset: usize,
    ) -> Result<EthernetFrame, &'static str> {
        // Ethernet II header:
        // 0                    6                    12                    14
        // |---6 byte Dest_MAC--|---6 byte Src_MAC---|--2 Byte EtherType--|
        if frame.len() < layer2_offset + ETH_HEADER_LEN {
            return Err("Frame is less than the minimum of 14 bytes");
        }
        if frame.len() > layer2_offset + ETH_MAX_PACKET {
            return Err("Frame is larger than the Ethernet maximum");
        }

        Ok(EthernetFrame {
            data: frame,
            layer2_offset,
            payload_offset: layer2_offset + ETH_HEADER_LEN,
        })
    }

    /// Returns an empty EthernetFrame with a zeroed header and no payload.
    pub fn empty() -> EthernetFrame {
        EthernetFrame::from_buffer(vec![0; ETH_HEADER_LEN], 0).unwrap()
    }

    pub fn dest_mac(&self) -> MacAddr {
        let bytes =
            <[u8; 6]>::try_from(&self.data[self.layer2_offset..self.layer2_offset + 6]).unwrap();
        MacAddr::new(bytes)
    }

    pub fn src_mac(&self) -> MacAddr {
        let bytes =
            <[u8; 6]>::try_from(&self.data[self.layer2_offset + 6..self.layer2_offset + 12])
                .unwrap();
        MacAddr::new(bytes)
    }

    pub fn set_dest_mac(&mut self, mac: MacAddr) {
        self.data[self.layer2_offset..self.layer2_offset + 6].copy_from_slice(&mac.bytes);
    }

    pub fn set_src_mac(&mut self, mac: MacAddr) {
        self.data[self.layer2_offset + 6..self.layer2_offset + 12].copy_from_slice(&mac.bytes);
    }

    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer2_offset + 12..=self.layer2_offset + 13]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_ether_type(&mut self, ether_type: u16) {
        self.data[self.layer2_offset + 12..=self.layer2_offset + 13]
            .copy_from_slice(&ether_type.to_be_bytes());
    }

    pub fn payload(&self) -> Cow<[u8]> {
        Cow::from(&self.data[self.payload_offset..])
    }

    pub fn set_payload(&mut self, payload: &[u8]) {
        self.data.truncate(self.payload_offset);
        self.data.reserve_exact(payload.len());
        self.data.extend(payload);
    }

    /// Pads the frame out with zeros to the Ethernet minimum transmit size.
    pub fn pad_to_minimum(&mut self) {
        let min_len = self.layer2_offset + ETH_MIN_PACKET;
        if self.data.len() < min_len {
            self.data.resize(min_len, 0);
        }
    }

    pub fn encap_ipv4(ipv4: Ipv4Packet) -> EthernetFrame {
        let mut frame = EthernetFrame::empty();
        frame.set_payload(&ipv4.data[ipv4.layer3_offset..]);
        frame.set_ether_type(IPV4_ETHER_TYPE);
        frame
    }
}

/// EthernetFrames are considered the same if they have the same data from the
/// layer 2 header onward; bytes before the header are not compared.
impl PartialEq for EthernetFrame {
    fn eq(&self, other: &Self) -> bool {
        self.data[self.layer2_offset..] == other.data[other.layer2_offset..]
    }
}

impl Eq for EthernetFrame {}

impl TryFrom<Ipv4Packet> for EthernetFrame {
    type Error = &'static str;

    fn try_from(packet: Ipv4Packet) -> Result<Self, Self::Error> {
        if let Some(layer2_offset) = packet.layer2_offset {
            EthernetFrame::from_buffer(packet.data, layer2_offset)
        } else {
            Err("IPv4 Packet does not contain an Ethernet Frame")
        }
    }
}

impl TryFrom<TcpSegment> for EthernetFrame {
    type Error = &'static str;

    fn try_from(segment: TcpSegment) -> Result<Self, Self::Error> {
        if let Some(layer2_offset) = segment.layer2_offset {
            EthernetFrame::from_buffer(segment.data, layer2_offset)
        } else {
            Err("TCP Segment does not contain an Ethernet Frame")
        }
    }
}

impl TryFrom<UdpSegment> for EthernetFrame {
    type Error = &'static str;

    fn try_from(segment: UdpSegment) -> Result<Self, Self::Error> {
        if let Some(layer2_offset) = segment.layer2_offset {
            EthernetFrame::from_buffer(segment.data, layer2_offset)
        } else {
            Err("UDP Segment does not contain an Ethernet Frame")
        }
    }
}
