extern crate crossbeam;
extern crate impnet_packets;
extern crate rand;
extern crate tracing;

/// Identity of the bridged interface: our link address, the committed IP configuration, and
/// the address of the host machine hiding behind us. Most of the rest of the crate takes an
/// `InterfaceIdentity` by reference and consults it on every frame, because with DHCP in play
/// the configuration can change (or vanish) at any tick.
pub mod config;

/// The outward seam: the `Transport` trait is how a bridge puts Ethernet frames on whatever
/// wire it is attached to. Implementations wrap a raw socket, a pcap handle, a channel in a
/// test, whatever. The bridge only ever asks for two things, `send` and `set_filter`.
pub mod transport;

/// The inward seam: the `HostBus` trait is how translated IP packets reach the attached host,
/// and how the host learns that its own transmissions actually made it onto the wire.
pub mod host;

/// Fixed-size ARP cache with aging, eviction, and static (never-evicted) entries.
pub mod arp_cache;

/// Bounded holding area for IP packets transmitted before their next hop has resolved.
pub mod retry_queue;

/// Per-flow TCP bookkeeping for the address translator: sequence adjustments accumulated by
/// payload rewrites, and idle timers that reclaim slots.
pub mod port_map;

/// The address translator itself. Rewrites the host's real address to our committed address
/// on the way out (and back on the way in), patches the FTP PORT command, and keeps every
/// checksum consistent as it goes.
pub mod translator;

/// DHCP client state machine. Acquires, renews, and releases the lease that becomes the
/// bridge's committed IP configuration.
pub mod dhcp;

/// The bridge proper: owns all of the above and wires the three stimuli (wire frame in, host
/// packet out, clock tick) to them.
pub mod bridge;

/// Channel-driven event loop around a `Bridge`.
pub mod runner;

/// Utility module
pub mod utils;
