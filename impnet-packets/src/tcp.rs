use crate::udp::ipv4_addr_at;
use crate::*;
use std::borrow::Cow;
use std::convert::{TryFrom, TryInto};

pub const TCP_FIN: u16 = 0x001;
pub const TCP_SYN: u16 = 0x002;
pub const TCP_RST: u16 = 0x004;
pub const TCP_PSH: u16 = 0x008;
pub const TCP_ACK: u16 = 0x010;

#[derive(Clone, Debug)]
pub struct TcpSegment {
    pub data: PacketData,
    pub layer2_offset: Option<usize>,
    pub layer3_offset: Option<usize>,
    pub layer4_offset: usize,
    pub payload_offset: usize,
}

impl TcpSegment {
    pub fn from_buffer(
        data: PacketData,
        layer2_offset: Option<usize>,
        layer3_offset: Option<usize>,
        layer4_offset: usize,
    ) -> Result<TcpSegment, &'static str> {
        if data.len() < layer4_offset + 20 {
            return Err("Segment too short to contain valid TCP Header");
        }

        if let Some(layer3_offset) = layer3_offset {
            if get_ipv4_payload_type(&data, layer3_offset)? != IpProtocol::TCP {
                return Err("Protocol is incorrect, since it isn't TCP");
            }
        }

        let payload_offset =
            layer4_offset + (((data[layer4_offset + 12] & 0xF0) >> 4) as usize * 4);
        if payload_offset < layer4_offset + 20 || data.len() < payload_offset {
            return Err("Segment has invalid data offset field");
        }

        Ok(TcpSegment {
            data,
            layer2_offset,
            layer3_offset,
            layer4_offset,
            payload_offset,
        })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer4_offset..=self.layer4_offset + 1]
                .try_into()
                .unwrap(),
        )
    }

    pub fn dest_port(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer4_offset + 2..=self.layer4_offset + 3]
                .try_into()
                .unwrap(),
        )
    }

    pub fn sequence_number(&self) -> u32 {
        u32::from_be_bytes(
            self.data[self.layer4_offset + 4..=self.layer4_offset + 7]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_sequence_number(&mut self, seq: u32) {
        self.data[self.layer4_offset + 4..=self.layer4_offset + 7]
            .copy_from_slice(&seq.to_be_bytes());
    }

    pub fn acknowledgment_number(&self) -> u32 {
        u32::from_be_bytes(
            self.data[self.layer4_offset + 8..=self.layer4_offset + 11]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_acknowledgment_number(&mut self, ack: u32) {
        self.data[self.layer4_offset + 8..=self.layer4_offset + 11]
            .copy_from_slice(&ack.to_be_bytes());
    }

    pub fn data_offset(&self) -> u8 {
        (self.data[self.layer4_offset + 12] & 0xF0) >> 4
    }

    /// The 9 control bits, in the least significant bits of the result.
    pub fn control_bits(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer4_offset + 12..=self.layer4_offset + 13]
                .try_into()
                .unwrap(),
        ) & 0x01FF
    }

    pub fn is_syn(&self) -> bool {
        self.control_bits() & TCP_SYN != 0
    }

    pub fn is_ack(&self) -> bool {
        self.control_bits() & TCP_ACK != 0
    }

    pub fn window_size(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer4_offset + 14..=self.layer4_offset + 15]
                .try_into()
                .unwrap(),
        )
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer4_offset + 16..=self.layer4_offset + 17]
                .try_into()
                .unwrap(),
        )
    }

    /// Stores a checksum value computed elsewhere, e.g. incrementally.
    pub fn store_checksum(&mut self, value: u16) {
        self.data[self.layer4_offset + 16..=self.layer4_offset + 17]
            .copy_from_slice(&value.to_be_bytes());
    }

    /// Length of the TCP segment (header plus payload) as bounded by the
    /// enclosing IP total length.
    pub fn segment_len(&self) -> Result<usize, &'static str> {
        let layer3_offset = self
            .layer3_offset
            .ok_or("TCP Segment does not contain an IP Packet")?;
        let total_len = u16::from_be_bytes(
            self.data[layer3_offset + 2..=layer3_offset + 3]
                .try_into()
                .unwrap(),
        ) as usize;
        let header_len = (self.data[layer3_offset] & 0x0F) as usize * 4;
        Ok(total_len - header_len)
    }

    /// Computes the TCP checksum over the pseudo header and segment. Only
    /// possible when an IPv4 header is present to take addresses from.
    pub fn calculate_checksum(&self) -> Result<u16, &'static str> {
        let layer3_offset = self
            .layer3_offset
            .ok_or("TCP Segment does not contain an IP Packet")?;
        let src = ipv4_addr_at(&self.data, layer3_offset + 12);
        let dest = ipv4_addr_at(&self.data, layer3_offset + 16);
        let segment_len = self.segment_len()?;

        let mut sum = pseudo_header_sum(src, dest, IpProtocol::TCP.into(), segment_len as u16);
        let segment = &self.data[self.layer4_offset..self.layer4_offset + segment_len];
        sum = sum_words(&segment[..16], sum);
        sum = sum_words(&segment[18..], sum);
        Ok(finalize(sum))
    }

    /// Recomputes the checksum from scratch and stores it.
    pub fn set_checksum(&mut self) -> Result<(), &'static str> {
        let value = self.calculate_checksum()?;
        self.store_checksum(value);
        Ok(())
    }

    /// True if the segment sums to zero with its stored checksum included.
    pub fn validate_checksum(&self) -> bool {
        let layer3_offset = match self.layer3_offset {
            Some(offset) => offset,
            None => return false,
        };
        let segment_len = match self.segment_len() {
            Ok(len) => len,
            Err(_) => return false,
        };
        let src = ipv4_addr_at(&self.data, layer3_offset + 12);
        let dest = ipv4_addr_at(&self.data, layer3_offset + 16);

        let mut sum = pseudo_header_sum(src, dest, IpProtocol::TCP.into(), segment_len as u16);
        sum = sum_words(
            &self.data[self.layer4_offset..self.layer4_offset + segment_len],
            sum,
        );
        finalize(sum) == 0
    }

    pub fn payload(&self) -> Cow<[u8]> {
        match (self.layer3_offset, self.segment_len()) {
            (Some(_), Ok(segment_len)) => {
                let end = self.layer4_offset + segment_len;
                Cow::from(&self.data[self.payload_offset..end])
            }
            _ => Cow::from(&self.data[self.payload_offset..]),
        }
    }

    /// Sets the TCP payload. The caller is responsible for the enclosing IP
    /// total length and for both checksums.
    pub fn set_payload(&mut self, payload: &[u8]) {
        self.data.truncate(self.payload_offset);
        self.data.reserve_exact(payload.len());
        self.data.extend(payload);
    }
}

impl TryFrom<Ipv4Packet> for TcpSegment {
    type Error = &'static str;

    fn try_from(packet: Ipv4Packet) -> Result<Self, Self::Error> {
        TcpSegment::from_buffer(
            packet.data,
            packet.layer2_offset,
            Some(packet.layer3_offset),
            packet.payload_offset,
        )
    }
}
