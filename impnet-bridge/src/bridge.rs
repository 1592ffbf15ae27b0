use crate::arp_cache::ArpCache;
use crate::config::InterfaceIdentity;
use crate::dhcp::DhcpClient;
use crate::host::HostBus;
use crate::retry_queue::{QueueFull, RetryQueue};
use crate::translator::Translator;
use crate::transport::Transport;
use impnet_packets::{
    ArpFrame, ArpOp, EthernetFrame, IpProtocol, Ipv4Packet, MacAddr, PacketData, UdpSegment,
    ARP_ETHER_TYPE, DHCP_CLIENT_PORT, DHCP_SERVER_PORT, IPV4_ETHER_TYPE,
};
use std::convert::TryFrom;
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Running totals a bridge keeps about its own behavior.
#[derive(Clone, Copy, Debug, Default)]
pub struct BridgeStats {
    pub frames_in: u64,
    pub frames_out: u64,
    pub delivered_to_host: u64,
    pub arp_replies_sent: u64,
    pub queue_full_drops: u64,
    pub queue_expired_drops: u64,
    pub unroutable_drops: u64,
    pub malformed_drops: u64,
    pub transmit_failures: u64,
}

/// One host-to-wire bridge.
///
/// Three stimuli drive it: `on_frame` for traffic arriving from the wire, `transmit_host_packet`
/// for IP packets the host wants sent, and `tick` for the nominal one-second clock that ages the
/// ARP cache, expires parked packets, reclaims idle flows, and advances DHCP.
pub struct Bridge {
    identity: InterfaceIdentity,
    arp: ArpCache,
    retry: RetryQueue,
    translator: Translator,
    dhcp: DhcpClient,
    wire: Box<dyn Transport>,
    host: Box<dyn HostBus>,
    stats: BridgeStats,
}

impl Bridge {
    /// Bring the bridge up on a wire. A statically configured identity is announced with a
    /// gratuitous ARP right away; a DHCP identity stays quiet until the first tick starts
    /// discovery.
    pub fn attach(
        identity: InterfaceIdentity,
        mut wire: Box<dyn Transport>,
        host: Box<dyn HostBus>,
    ) -> Bridge {
        wire.set_filter(identity.own_mac, &[]);
        let mut bridge = Bridge {
            identity,
            arp: ArpCache::new(),
            retry: RetryQueue::new(),
            translator: Translator::new(),
            dhcp: DhcpClient::new(),
            wire,
            host,
            stats: BridgeStats::default(),
        };
        if bridge.identity.is_configured() {
            bridge.announce();
        }
        bridge
    }

    pub fn identity(&self) -> &InterfaceIdentity {
        &self.identity
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Re-program the transport's receive filter, e.g. after the caller
    /// starts caring about extra multicast addresses.
    pub fn refresh_filter(&mut self, extra: &[MacAddr]) {
        self.wire.set_filter(self.identity.own_mac, extra);
    }

    /// A frame arrived from the wire.
    pub fn on_frame(&mut self, frame: Vec<u8>) {
        self.stats.frames_in += 1;
        let frame = match EthernetFrame::from_buffer(frame, 0) {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.malformed_drops += 1;
                debug!(error = err, "unparseable frame dropped");
                return;
            }
        };
        let dest = frame.dest_mac();
        if dest != self.identity.own_mac && !dest.is_broadcast() {
            return;
        }
        match frame.ether_type() {
            ARP_ETHER_TYPE => self.handle_arp(frame),
            IPV4_ETHER_TYPE => self.handle_ipv4(frame),
            _ => {}
        }
    }

    fn handle_arp(&mut self, frame: EthernetFrame) {
        let arp = match ArpFrame::try_from(frame) {
            Ok(arp) => arp,
            Err(err) => {
                self.stats.malformed_drops += 1;
                debug!(error = err, "unparseable ARP frame dropped");
                return;
            }
        };
        let sender_ip = arp.sender_ipv4();
        let sender_mac = arp.sender_mac();
        if !sender_ip.is_unspecified() && !sender_mac.is_broadcast() {
            self.arp.insert(sender_ip, sender_mac);
        }

        let opcode = arp.opcode();
        if opcode == ArpOp::Request as u16 {
            if self.identity.is_configured()
                && arp.target_ipv4() == self.identity.own_ip
                && sender_mac != self.identity.own_mac
            {
                let mut reply = ArpFrame::reply(
                    self.identity.own_mac,
                    self.identity.own_ip,
                    sender_mac,
                    sender_ip,
                )
                .frame();
                reply.pad_to_minimum();
                match self.wire.send(&reply.data) {
                    Ok(()) => self.stats.arp_replies_sent += 1,
                    Err(_) => self.stats.transmit_failures += 1,
                }
            }
        } else if opcode == ArpOp::Reply as u16 {
            // Whatever was parked on this address can go out now.
            for packet in self.retry.take_resolved(sender_ip) {
                self.send_ipv4(sender_mac, packet);
            }
        }
    }

    fn handle_ipv4(&mut self, frame: EthernetFrame) {
        let src_mac = frame.src_mac();
        let ip = match Ipv4Packet::try_from(frame) {
            Ok(ip) => ip,
            Err(err) => {
                self.stats.malformed_drops += 1;
                debug!(error = err, "unparseable IP frame dropped");
                return;
            }
        };
        if !ip.validate_checksum() {
            self.stats.malformed_drops += 1;
            debug!("IP frame with bad header checksum dropped");
            return;
        }

        if ip.protocol() == IpProtocol::UDP && is_dhcp_reply(&ip) {
            let udp = match UdpSegment::try_from(ip) {
                Ok(udp) => udp,
                Err(err) => {
                    self.stats.malformed_drops += 1;
                    debug!(error = err, "unparseable DHCP datagram dropped");
                    return;
                }
            };
            if !udp.validate_checksum() {
                self.stats.malformed_drops += 1;
                debug!("DHCP datagram with bad checksum dropped");
                return;
            }
            self.dhcp.handle_datagram(
                &udp,
                src_mac,
                &mut self.identity,
                &mut self.arp,
                &mut *self.wire,
            );
            return;
        }

        let dest = ip.dest_addr();
        let for_us = dest == self.identity.own_ip
            || dest == Ipv4Addr::BROADCAST
            || (self.identity.is_configured() && dest == self.identity.subnet_broadcast());
        if !for_us {
            return;
        }

        // Hand the host the datagram alone, trimmed of any frame padding.
        let end = ip.layer3_offset + ip.total_len() as usize;
        let packet = ip.data[ip.layer3_offset..end].to_vec();
        match self.translator.inbound(packet, &self.identity) {
            Ok(packet) => {
                self.host.deliver(&packet);
                self.stats.delivered_to_host += 1;
            }
            Err(err) => {
                self.stats.malformed_drops += 1;
                debug!(error = err, "inbound packet dropped in translation");
            }
        }
    }

    /// The host handed us an IP packet to put on the wire.
    pub fn transmit_host_packet(&mut self, packet: Vec<u8>) {
        let packet = match self.translator.outbound(packet, &self.identity) {
            Ok(packet) => packet,
            Err(err) => {
                self.stats.malformed_drops += 1;
                debug!(error = err, "outbound packet dropped in translation");
                return;
            }
        };
        let dest = match destination_of(&packet) {
            Some(dest) => dest,
            None => {
                self.stats.malformed_drops += 1;
                debug!("outbound packet without a readable destination dropped");
                return;
            }
        };

        if dest == Ipv4Addr::BROADCAST
            || (self.identity.is_configured() && dest == self.identity.subnet_broadcast())
        {
            self.send_ipv4(MacAddr::BROADCAST, packet);
            return;
        }

        let next_hop = if self.identity.on_subnet(dest) {
            dest
        } else {
            self.identity.gateway_ip
        };
        if next_hop.is_unspecified() {
            self.stats.unroutable_drops += 1;
            debug!(dest = %dest, "no route to destination, packet dropped");
            return;
        }

        match self.arp.lookup(next_hop) {
            Some(mac) => self.send_ipv4(mac, packet),
            None => match self.retry.enqueue(next_hop, packet) {
                Ok(()) => self.send_arp_request(next_hop),
                Err(QueueFull) => {
                    self.stats.queue_full_drops += 1;
                    warn!(next_hop = %next_hop, "retry queue full, packet dropped");
                }
            },
        }
    }

    /// Advance every time-based concern by one tick.
    pub fn tick(&mut self) {
        self.arp.age_tick();
        self.stats.queue_expired_drops += self.retry.tick() as u64;
        self.translator.tick();
        self.dhcp
            .tick(&mut self.identity, &mut self.arp, &mut *self.wire);
    }

    /// Orderly teardown: give any DHCP lease back and drop all learned state.
    pub fn detach(&mut self) {
        self.dhcp.release(&mut self.identity, &mut *self.wire);
        self.arp.clear();
        self.retry.clear();
        self.translator.clear();
    }

    fn announce(&mut self) {
        let mut frame = ArpFrame::gratuitous(self.identity.own_mac, self.identity.own_ip).frame();
        frame.pad_to_minimum();
        if self.wire.send(&frame.data).is_err() {
            self.stats.transmit_failures += 1;
        }
    }

    fn send_arp_request(&mut self, target: Ipv4Addr) {
        let mut frame =
            ArpFrame::request(self.identity.own_mac, self.identity.own_ip, target).frame();
        frame.pad_to_minimum();
        if self.wire.send(&frame.data).is_err() {
            self.stats.transmit_failures += 1;
            warn!(target = %target, "ARP request transmit failed");
        }
    }

    /// Wrap a raw IP packet for `dest_mac` and transmit it, acknowledging the
    /// host on success.
    fn send_ipv4(&mut self, dest_mac: MacAddr, packet: PacketData) {
        let mut frame = EthernetFrame::empty();
        frame.set_payload(&packet);
        frame.set_ether_type(IPV4_ETHER_TYPE);
        frame.set_dest_mac(dest_mac);
        frame.set_src_mac(self.identity.own_mac);
        frame.pad_to_minimum();
        match self.wire.send(&frame.data) {
            Ok(()) => {
                self.stats.frames_out += 1;
                self.host.acknowledge(1);
            }
            Err(_) => {
                self.stats.transmit_failures += 1;
                warn!("data frame transmit failed");
            }
        }
    }
}

/// Destination address straight out of a raw IPv4 header.
fn destination_of(packet: &[u8]) -> Option<Ipv4Addr> {
    if packet.len() < 20 || packet[0] >> 4 != 4 {
        return None;
    }
    Some(Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]))
}

/// True when the datagram's ports mark it as a server-to-client DHCP reply.
fn is_dhcp_reply(ip: &Ipv4Packet) -> bool {
    let l4 = ip.payload_offset;
    if ip.data.len() < l4 + 8 {
        return false;
    }
    let src_port = u16::from_be_bytes([ip.data[l4], ip.data[l4 + 1]]);
    let dest_port = u16::from_be_bytes([ip.data[l4 + 2], ip.data[l4 + 3]]);
    src_port == DHCP_SERVER_PORT && dest_port == DHCP_CLIENT_PORT
}
