mod types;
pub use self::types::*;

mod checksum;
pub use self::checksum::*;

mod ethernet;
pub use self::ethernet::*;

mod arp;
pub use self::arp::*;

mod ipv4;
pub use self::ipv4::*;

mod udp;
pub use self::udp::*;

mod tcp;
pub use self::tcp::*;

mod icmp;
pub use self::icmp::*;

mod dhcp;
pub use self::dhcp::*;
