use crate::*;
use std::borrow::Cow;
use std::convert::{TryFrom, TryInto};
use std::net::Ipv4Addr;

#[derive(Clone, Debug)]
pub struct Ipv4Packet {
    pub data: PacketData,
    pub layer2_offset: Option<usize>,
    pub layer3_offset: usize,
    pub payload_offset: usize,
}

impl Ipv4Packet {
    pub fn from_buffer(
        data: PacketData,
        layer2_offset: Option<usize>,
        layer3_offset: usize,
    ) -> Result<Ipv4Packet, &'static str> {
        if data.len() < layer3_offset + 20 {
            return Err("Data is too short to be an IPv4 Packet");
        }

        let version: u8 = (data[layer3_offset] & 0xF0) >> 4;
        if version != 4 {
            return Err("Packet has incorrect version, is not Ipv4Packet");
        }

        let total_len = u16::from_be_bytes(
            data[layer3_offset + 2..=layer3_offset + 3]
                .try_into()
                .unwrap(),
        ) as usize;
        // Frames are often padded below the Ethernet minimum, so the buffer
        // may run past total_len, but never short of it.
        if data.len() < total_len + layer3_offset {
            return Err("Packet is shorter than its total length field");
        }

        // Header length is in 32-bit words.
        let ihl = (data[layer3_offset] & 0x0F) as usize;
        let payload_offset = layer3_offset + (ihl * 4);
        if ihl < 5 || payload_offset > layer3_offset + total_len {
            return Err("Packet has invalid header length field");
        }

        Ok(Ipv4Packet {
            data,
            layer2_offset,
            layer3_offset,
            payload_offset,
        })
    }

    /// A minimal 20-byte header with no payload, for building datagrams up
    /// from nothing.
    pub fn empty() -> Ipv4Packet {
        let mut data = vec![0; 20];
        data[0] = 0x45;
        data[3] = 20;
        Ipv4Packet::from_buffer(data, None, 0).unwrap()
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        let data: [u8; 4] = self.data[self.layer3_offset + 12..self.layer3_offset + 16]
            .try_into()
            .unwrap();
        Ipv4Addr::from(data)
    }

    pub fn set_src_addr(&mut self, addr: Ipv4Addr) {
        self.data[self.layer3_offset + 12..self.layer3_offset + 16].copy_from_slice(&addr.octets());
    }

    pub fn dest_addr(&self) -> Ipv4Addr {
        let data: [u8; 4] = self.data[self.layer3_offset + 16..self.layer3_offset + 20]
            .try_into()
            .unwrap();
        Ipv4Addr::from(data)
    }

    pub fn set_dest_addr(&mut self, addr: Ipv4Addr) {
        self.data[self.layer3_offset + 16..self.layer3_offset + 20].copy_from_slice(&addr.octets());
    }

    pub fn ihl(&self) -> u8 {
        self.data[self.layer3_offset] & 0x0F
    }

    pub fn header_len(&self) -> usize {
        self.ihl() as usize * 4
    }

    pub fn protocol(&self) -> IpProtocol {
        IpProtocol::from(self.data[self.layer3_offset + 9])
    }

    pub fn set_protocol(&mut self, protocol: IpProtocol) {
        self.data[self.layer3_offset + 9] = protocol.into();
    }

    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer3_offset + 2..=self.layer3_offset + 3]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_total_len(&mut self, total_len: u16) {
        self.data[self.layer3_offset + 2..=self.layer3_offset + 3]
            .copy_from_slice(&total_len.to_be_bytes());
    }

    pub fn ttl(&self) -> u8 {
        self.data[self.layer3_offset + 8]
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.data[self.layer3_offset + 8] = ttl;
    }

    pub fn identification(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer3_offset + 4..=self.layer3_offset + 5]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_identification(&mut self, id: u16) {
        self.data[self.layer3_offset + 4..=self.layer3_offset + 5]
            .copy_from_slice(&id.to_be_bytes());
    }

    /// The payload as bounded by the total length field; trailing frame
    /// padding is not included.
    pub fn payload(&self) -> Cow<[u8]> {
        let end = self.layer3_offset + self.total_len() as usize;
        Cow::from(&self.data[self.payload_offset..end])
    }

    pub fn set_payload(&mut self, payload: &[u8]) {
        self.data.truncate(self.payload_offset);
        self.data.reserve_exact(payload.len());
        self.data.extend(payload);

        let total_len = (payload.len() + self.header_len()) as u16;
        self.set_total_len(total_len);
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer3_offset + 10..=self.layer3_offset + 11]
                .try_into()
                .unwrap(),
        )
    }

    /// Stores a checksum value computed elsewhere, e.g. incrementally.
    pub fn store_checksum(&mut self, value: u16) {
        self.data[self.layer3_offset + 10..=self.layer3_offset + 11]
            .copy_from_slice(&value.to_be_bytes());
    }

    /// True if the header sums to zero with its stored checksum included.
    pub fn validate_checksum(&self) -> bool {
        checksum(&self.data[self.layer3_offset..self.payload_offset]) == 0
    }

    /// What the checksum field should hold given the current header.
    pub fn calculate_checksum(&self) -> u16 {
        let header = &self.data[self.layer3_offset..self.payload_offset];
        let mut sum = sum_words(&header[..10], 0);
        sum = sum_words(&header[12..], sum);
        finalize(sum)
    }

    /// Recomputes the header checksum from scratch and stores it.
    pub fn set_checksum(&mut self) {
        let new_checksum = self.calculate_checksum();
        self.store_checksum(new_checksum);
    }
}

/// Ipv4Packets are considered the same if they have the same data from the
/// layer 3 header onward; bytes before the header are not compared.
impl PartialEq for Ipv4Packet {
    fn eq(&self, other: &Self) -> bool {
        self.data[self.layer3_offset..] == other.data[other.layer3_offset..]
    }
}

impl Eq for Ipv4Packet {}

/// Reads the protocol field out of a raw IPv4 header. Fails if the buffer
/// is too short or the version nibble is wrong.
pub fn get_ipv4_payload_type(
    data: &[u8],
    layer3_offset: usize,
) -> Result<IpProtocol, &'static str> {
    if data.len() <= layer3_offset + 9 || (data[layer3_offset] & 0xF0) != 0x40 {
        return Err("Is not an Ipv4 packet");
    }
    Ok(IpProtocol::from(data[layer3_offset + 9]))
}

impl TryFrom<EthernetFrame> for Ipv4Packet {
    type Error = &'static str;

    fn try_from(frame: EthernetFrame) -> Result<Self, Self::Error> {
        Ipv4Packet::from_buffer(frame.data, Some(frame.layer2_offset), frame.payload_offset)
    }
}

impl TryFrom<TcpSegment> for Ipv4Packet {
    type Error = &'static str;

    fn try_from(segment: TcpSegment) -> Result<Self, Self::Error> {
        if let Some(layer3_offset) = segment.layer3_offset {
            Ipv4Packet::from_buffer(segment.data, segment.layer2_offset, layer3_offset)
        } else {
            Err("TCP Segment does not contain an IP Packet")
        }
    }
}

impl TryFrom<UdpSegment> for Ipv4Packet {
    type Error = &'static str;

    fn try_from(segment: UdpSegment) -> Result<Self, Self::Error> {
        if let Some(layer3_offset) = segment.layer3_offset {
            Ipv4Packet::from_buffer(segment.data, segment.layer2_offset, layer3_offset)
        } else {
            Err("UDP Segment does not contain an IP Packet")
        }
    }
}
