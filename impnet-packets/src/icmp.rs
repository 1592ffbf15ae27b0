use crate::*;
use std::borrow::Cow;
use std::convert::{TryFrom, TryInto};

/// The ICMP "header" is the 8 bytes preceding the data field.
const ICMP_HEADER_LEN: usize = 8;

#[derive(Clone, Debug)]
pub struct IcmpPacket {
    pub data: PacketData,
    pub layer2_offset: Option<usize>,
    pub layer3_offset: Option<usize>,
    pub layer4_offset: usize,
}

impl IcmpPacket {
    pub fn from_buffer(
        data: PacketData,
        layer2_offset: Option<usize>,
        layer3_offset: Option<usize>,
        layer4_offset: usize,
    ) -> Result<IcmpPacket, &'static str> {
        if data.len() < layer4_offset + ICMP_HEADER_LEN {
            return Err("Packet too short to contain valid ICMP Header");
        }

        if let Some(layer3_offset) = layer3_offset {
            if get_ipv4_payload_type(&data, layer3_offset)? != IpProtocol::ICMP {
                return Err("Protocol is incorrect, since it isn't ICMP");
            }
        }

        Ok(IcmpPacket {
            data,
            layer2_offset,
            layer3_offset,
            layer4_offset,
        })
    }

    pub fn icmp_type(&self) -> u8 {
        self.data[self.layer4_offset]
    }

    pub fn code(&self) -> u8 {
        self.data[self.layer4_offset + 1]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.layer4_offset + 2..=self.layer4_offset + 3]
                .try_into()
                .unwrap(),
        )
    }

    pub fn store_checksum(&mut self, value: u16) {
        self.data[self.layer4_offset + 2..=self.layer4_offset + 3]
            .copy_from_slice(&value.to_be_bytes());
    }

    /// ICMP checksums cover only the ICMP message itself; there is no
    /// pseudo header.
    pub fn calculate_checksum(&self) -> u16 {
        let message = &self.data[self.layer4_offset..];
        let mut sum = sum_words(&message[..2], 0);
        sum = sum_words(&message[4..], sum);
        finalize(sum)
    }

    pub fn set_checksum(&mut self) {
        let value = self.calculate_checksum();
        self.store_checksum(value);
    }

    pub fn validate_checksum(&self) -> bool {
        checksum(&self.data[self.layer4_offset..]) == 0
    }

    pub fn rest_of_header(&self) -> Cow<[u8]> {
        Cow::from(&self.data[self.layer4_offset + 4..self.layer4_offset + ICMP_HEADER_LEN])
    }
}

impl TryFrom<Ipv4Packet> for IcmpPacket {
    type Error = &'static str;

    fn try_from(packet: Ipv4Packet) -> Result<Self, Self::Error> {
        IcmpPacket::from_buffer(
            packet.data,
            packet.layer2_offset,
            Some(packet.layer3_offset),
            packet.payload_offset,
        )
    }
}
