use crate::*;
use std::borrow::Cow;
use std::convert::{TryFrom, TryInto};
use std::net::Ipv4Addr;

#[derive(Clone, Debug)]
pub struct UdpSegment {
    pub data: PacketData,
    pub layer2_offset: Option<usize>,
    pub layer3_offset: Option<usize>,
    pub layer4_offset: usize,
    pub payload_offset: usize,
}

impl UdpSegment {
    pub fn from_buffer(
        data: PacketData,
        layer2_offset: Option<usize>,
        layer3_offset: Option<usize>,
        layer4_offset: usize,
    ) -> Result<UdpSegment, &'static str> {
        if data.len() < layer4_offset + 8 {
            return Err("Segment too short to contain valid UDP Header");
        }

        if let Some(layer3_offset) = layer3_offset {
            if get_ipv4_payload_type(&data, layer3_offset)? != IpProtocol::UDP {
                return Err("Protocol is incorrect, since it isn't UDP");
            }
        }

        let length = u16::from_be_bytes(
            data[layer4_offset + 4..=layer4_offset + 5]
                .try_into()
                .unwrap(),
        );

        if length < 8 || data.len() < layer4_offset + length as usize {
            return Err("Segment is not the length given by its length field");
        }

        Ok(UdpSegment {
            data,
            layer2_offset,
            layer3_offset,
            layer4_offset,
            payload_offset: layer4_offset + 8,
        })
    }

    /// An empty UDP segment with no layer 3 header and no payload.
    pub fn empty() -> UdpSegment {
        let mut data = vec![0; 8];
        data[5] = 8;
        UdpSegment::from_buffer(data, None, None, 0).unwrap()
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer4_offset..=self.layer4_offset + 1]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_src_port(&mut self, port: u16) {
        self.data[self.layer4_offset..=self.layer4_offset + 1].copy_from_slice(&port.to_be_bytes());
    }

    pub fn dest_port(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer4_offset + 2..=self.layer4_offset + 3]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_dest_port(&mut self, port: u16) {
        self.data[self.layer4_offset + 2..=self.layer4_offset + 3]
            .copy_from_slice(&port.to_be_bytes());
    }

    pub fn length(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer4_offset + 4..=self.layer4_offset + 5]
                .try_into()
                .unwrap(),
        )
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer4_offset + 6..=self.layer4_offset + 7]
                .try_into()
                .unwrap(),
        )
    }

    /// Stores a checksum value computed elsewhere, e.g. incrementally.
    pub fn store_checksum(&mut self, value: u16) {
        self.data[self.layer4_offset + 6..=self.layer4_offset + 7]
            .copy_from_slice(&value.to_be_bytes());
    }

    /// Computes the UDP checksum over the pseudo header and segment. Only
    /// possible when an IPv4 header is present to take addresses from.
    /// A computed value of zero is transmitted as 0xFFFF per RFC 768.
    pub fn calculate_checksum(&self) -> Result<u16, &'static str> {
        let layer3_offset = self
            .layer3_offset
            .ok_or("UDP Segment does not contain an IP Packet")?;
        let src = ipv4_addr_at(&self.data, layer3_offset + 12);
        let dest = ipv4_addr_at(&self.data, layer3_offset + 16);
        let length = self.length();

        let mut sum = pseudo_header_sum(src, dest, IpProtocol::UDP.into(), length);
        let segment = &self.data[self.layer4_offset..self.layer4_offset + length as usize];
        sum = sum_words(&segment[..6], sum);
        sum = sum_words(&segment[8..], sum);
        match finalize(sum) {
            0 => Ok(0xFFFF),
            value => Ok(value),
        }
    }

    /// Recomputes the checksum from scratch and stores it.
    pub fn set_checksum(&mut self) -> Result<(), &'static str> {
        let value = self.calculate_checksum()?;
        self.store_checksum(value);
        Ok(())
    }

    /// True if the stored checksum is zero (unused) or sums correctly with
    /// the pseudo header.
    pub fn validate_checksum(&self) -> bool {
        if self.checksum() == 0 {
            return true;
        }
        let layer3_offset = match self.layer3_offset {
            Some(offset) => offset,
            None => return false,
        };
        let src = ipv4_addr_at(&self.data, layer3_offset + 12);
        let dest = ipv4_addr_at(&self.data, layer3_offset + 16);
        let length = self.length();

        let mut sum = pseudo_header_sum(src, dest, IpProtocol::UDP.into(), length);
        sum = sum_words(
            &self.data[self.layer4_offset..self.layer4_offset + length as usize],
            sum,
        );
        finalize(sum) == 0
    }

    pub fn payload(&self) -> Cow<[u8]> {
        let end = self.layer4_offset + self.length() as usize;
        Cow::from(&self.data[self.payload_offset..end])
    }

    /// Sets the payload and fixes the UDP length field. The caller is
    /// responsible for the enclosing IP total length.
    pub fn set_payload(&mut self, payload: &[u8]) {
        self.data.truncate(self.payload_offset);
        self.data.reserve_exact(payload.len());
        self.data.extend(payload);
        let length = (payload.len() + 8) as u16;
        self.data[self.layer4_offset + 4..=self.layer4_offset + 5]
            .copy_from_slice(&length.to_be_bytes());
    }
}

pub(crate) fn ipv4_addr_at(data: &[u8], offset: usize) -> Ipv4Addr {
    let bytes: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
    Ipv4Addr::from(bytes)
}

/// UdpSegments are considered the same if they have the same data from the
/// layer 4 header onward; bytes before the header are not compared.
impl PartialEq for UdpSegment {
    fn eq(&self, other: &Self) -> bool {
        self.data[self.layer4_offset..] == other.data[other.layer4_offset..]
    }
}

impl Eq for UdpSegment {}

impl TryFrom<Ipv4Packet> for UdpSegment {
    type Error = &'static str;

    fn try_from(packet: Ipv4Packet) -> Result<Self, Self::Error> {
        UdpSegment::from_buffer(
            packet.data,
            packet.layer2_offset,
            Some(packet.layer3_offset),
            packet.payload_offset,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_segment() -> UdpSegment {
        let ipv4_data: Vec<u8> = vec![
            0x45, 0, 0, 20, 0, 0, 0, 0, 64, 17, 0, 0, 192, 178, 128, 0, 10, 0, 0, 1,
        ];
        let udp_data: Vec<u8> = vec![
            0, 99, 0, 88, 0, 19, 0xDE, 0xAD, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10,
        ];
        let mut packet = Ipv4Packet::from_buffer(ipv4_data, None, 0).unwrap();
        packet.set_payload(&udp_data);
        UdpSegment::try_from(packet).unwrap()
    }

    #[test]
    fn udp_segment() {
        let segment = sample_segment();
        assert_eq!(segment.src_port(), 99);
        assert_eq!(segment.dest_port(), 88);
        assert_eq!(segment.length(), 19);
        assert_eq!(segment.checksum(), 0xDEAD);
        assert_eq!(segment.payload().len(), 11);
        assert_eq!(segment.payload()[0], 0);
    }

    #[test]
    fn checksum_round_trip() {
        let mut segment = sample_segment();
        segment.set_checksum().unwrap();
        assert!(segment.validate_checksum());
        // Flip a payload byte and it no longer validates.
        let end = segment.data.len() - 1;
        segment.data[end] ^= 0xFF;
        assert!(!segment.validate_checksum());
    }

    #[test]
    fn zero_checksum_is_accepted() {
        let mut segment = sample_segment();
        segment.store_checksum(0);
        assert!(segment.validate_checksum());
    }

    #[test]
    fn empty() {
        let empty_segment = UdpSegment::empty();
        assert_eq!(empty_segment.layer2_offset, None);
        assert_eq!(empty_segment.layer3_offset, None);
        assert_eq!(empty_segment.layer4_offset, 0);
        assert_eq!(empty_segment.payload_offset, 8);
    }
}
