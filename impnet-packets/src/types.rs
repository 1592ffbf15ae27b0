use std::fmt;

/// All packet types in this crate own their bytes as a flat buffer, and keep
/// offsets to the headers they care about.
pub type PacketData = Vec<u8>;

pub const IPV4_ETHER_TYPE: u16 = 0x0800;
pub const ARP_ETHER_TYPE: u16 = 0x0806;

/// Length of an Ethernet II header: destination MAC, source MAC, EtherType.
pub const ETH_HEADER_LEN: usize = 14;
/// Smallest frame a station may put on the wire (sans FCS); shorter frames
/// must be padded out with zeros before transmission.
pub const ETH_MIN_PACKET: usize = 60;
/// Largest frame we will accept or emit (1500 byte payload plus header).
pub const ETH_MAX_PACKET: usize = 1514;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MacAddr {
    pub bytes: [u8; 6],
}

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr {
        bytes: [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
    };

    pub const ZERO: MacAddr = MacAddr { bytes: [0; 6] };

    pub fn new(bytes: [u8; 6]) -> MacAddr {
        MacAddr { bytes }
    }

    pub fn is_broadcast(&self) -> bool {
        *self == MacAddr::BROADCAST
    }

    pub fn is_multicast(&self) -> bool {
        self.bytes[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.bytes[0],
            self.bytes[1],
            self.bytes[2],
            self.bytes[3],
            self.bytes[4],
            self.bytes[5]
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpProtocol {
    ICMP,
    TCP,
    UDP,
    Other(u8),
}

impl From<u8> for IpProtocol {
    fn from(value: u8) -> Self {
        match value {
            1 => IpProtocol::ICMP,
            6 => IpProtocol::TCP,
            17 => IpProtocol::UDP,
            other => IpProtocol::Other(other),
        }
    }
}

impl From<IpProtocol> for u8 {
    fn from(protocol: IpProtocol) -> Self {
        match protocol {
            IpProtocol::ICMP => 1,
            IpProtocol::TCP => 6,
            IpProtocol::UDP => 17,
            IpProtocol::Other(other) => other,
        }
    }
}
