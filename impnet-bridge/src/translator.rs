use crate::config::InterfaceIdentity;
use crate::port_map::PortMap;
use impnet_packets::{
    adjust_checksum, IpProtocol, Ipv4Packet, PacketData, TcpSegment, UdpSegment,
};
use std::convert::TryFrom;
use std::net::Ipv4Addr;
use tracing::{debug, trace};

/// FTP control connections are the one protocol whose payload carries an address.
pub const FTP_CTRL_PORT: u16 = 21;

/// Rewrites IP packets between the host's address space and ours.
///
/// Outbound packets have their source address changed from `external_host_ip` to `own_ip`,
/// inbound packets the reverse on the destination. Transport checksums are patched
/// incrementally for the address change; only an FTP payload rewrite that changes the packet
/// length forces a full recompute.
pub struct Translator {
    port_map: PortMap,
}

impl Translator {
    pub fn new() -> Translator {
        Translator {
            port_map: PortMap::new(),
        }
    }

    pub fn tick(&mut self) {
        self.port_map.tick();
    }

    pub fn clear(&mut self) {
        self.port_map.clear();
    }

    /// Host-to-wire rewriting. Consumes the raw IP packet and returns the rewritten bytes,
    /// or an error when the packet does not parse (the caller drops it).
    pub fn outbound(
        &mut self,
        packet: PacketData,
        identity: &InterfaceIdentity,
    ) -> Result<PacketData, &'static str> {
        if !identity.translates() {
            return Ok(packet);
        }
        let mut ip = Ipv4Packet::from_buffer(packet, None, 0)?;
        if ip.src_addr() != identity.external_host_ip {
            return Ok(ip.data);
        }

        let old_addr = ip.src_addr().octets();
        let new_addr = identity.own_ip.octets();
        ip.set_src_addr(identity.own_ip);
        let fixed = adjust_checksum(ip.checksum(), &old_addr, &new_addr);
        ip.store_checksum(fixed);

        if is_fragment(&ip) {
            return Ok(ip.data);
        }
        match ip.protocol() {
            IpProtocol::TCP => self.outbound_tcp(ip, identity, &old_addr, &new_addr),
            IpProtocol::UDP => fix_udp_checksum(ip, &old_addr, &new_addr),
            // The ICMP checksum has no pseudo header, so the address change
            // does not touch it.
            _ => Ok(ip.data),
        }
    }

    fn outbound_tcp(
        &mut self,
        ip: Ipv4Packet,
        identity: &InterfaceIdentity,
        old_addr: &[u8],
        new_addr: &[u8],
    ) -> Result<PacketData, &'static str> {
        let mut tcp = TcpSegment::try_from(ip)?;
        let fixed = adjust_checksum(tcp.checksum(), old_addr, new_addr);
        tcp.store_checksum(fixed);

        let src_port = tcp.src_port();
        let dst_port = tcp.dest_port();
        let host_seq = tcp.sequence_number();

        if tcp.is_syn() {
            self.port_map.reset(src_port, dst_port);
        } else if let Some(entry) = self.port_map.lookup(src_port, dst_port) {
            // Data past the last rewritten segment lives at shifted sequence
            // numbers on the wire.
            if entry.seq_adjust != 0 && host_seq > entry.last_seq {
                let shifted = host_seq.wrapping_add(entry.seq_adjust);
                trace!(
                    src_port = src_port,
                    seq = host_seq,
                    shifted = shifted,
                    "outbound sequence shifted"
                );
                tcp.set_sequence_number(shifted);
                let fixed = adjust_checksum(
                    tcp.checksum(),
                    &host_seq.to_be_bytes(),
                    &shifted.to_be_bytes(),
                );
                tcp.store_checksum(fixed);
            }
        }

        if dst_port != FTP_CTRL_PORT {
            return Ok(tcp.data);
        }
        let old_payload = tcp.payload().into_owned();
        let new_payload = match rewrite_port_command(&old_payload, identity.own_ip) {
            Some(rewritten) => rewritten,
            None => return Ok(tcp.data),
        };
        debug!(
            src_port = src_port,
            old_len = old_payload.len(),
            new_len = new_payload.len(),
            "rewrote FTP PORT command"
        );

        if new_payload.len() == old_payload.len() {
            // Same size, so the existing checksum can be patched in place.
            let fixed = adjust_checksum(tcp.checksum(), &old_payload, &new_payload);
            tcp.set_payload(&new_payload);
            tcp.store_checksum(fixed);
            return Ok(tcp.data);
        }

        let delta = (new_payload.len() as i32 - old_payload.len() as i32) as u32;
        self.port_map
            .record_adjust(src_port, dst_port, delta, host_seq);

        tcp.set_payload(&new_payload);
        let mut ip = Ipv4Packet::try_from(tcp)?;
        let total_len = (ip.data.len() - ip.layer3_offset) as u16;
        ip.set_total_len(total_len);
        ip.set_checksum();
        let mut tcp = TcpSegment::try_from(ip)?;
        tcp.set_checksum()?;
        Ok(tcp.data)
    }

    /// Wire-to-host rewriting, the mirror of `outbound`.
    pub fn inbound(
        &mut self,
        packet: PacketData,
        identity: &InterfaceIdentity,
    ) -> Result<PacketData, &'static str> {
        if !identity.translates() {
            return Ok(packet);
        }
        let mut ip = Ipv4Packet::from_buffer(packet, None, 0)?;
        if ip.dest_addr() != identity.own_ip {
            return Ok(ip.data);
        }

        let old_addr = ip.dest_addr().octets();
        let new_addr = identity.external_host_ip.octets();
        ip.set_dest_addr(identity.external_host_ip);
        let fixed = adjust_checksum(ip.checksum(), &old_addr, &new_addr);
        ip.store_checksum(fixed);

        if is_fragment(&ip) {
            return Ok(ip.data);
        }
        match ip.protocol() {
            IpProtocol::TCP => self.inbound_tcp(ip, &old_addr, &new_addr),
            IpProtocol::UDP => fix_udp_checksum(ip, &old_addr, &new_addr),
            _ => Ok(ip.data),
        }
    }

    fn inbound_tcp(
        &mut self,
        ip: Ipv4Packet,
        old_addr: &[u8],
        new_addr: &[u8],
    ) -> Result<PacketData, &'static str> {
        let mut tcp = TcpSegment::try_from(ip)?;
        let fixed = adjust_checksum(tcp.checksum(), old_addr, new_addr);
        tcp.store_checksum(fixed);

        // Flow state is keyed by the host's port pair, which inbound traffic
        // carries swapped.
        let src_port = tcp.dest_port();
        let dst_port = tcp.src_port();

        if tcp.is_syn() {
            self.port_map.reset(src_port, dst_port);
        } else if tcp.is_ack() {
            if let Some(entry) = self.port_map.lookup(src_port, dst_port) {
                let ack = tcp.acknowledgment_number();
                if entry.seq_adjust != 0 && ack > entry.last_seq {
                    let shifted = ack.wrapping_sub(entry.seq_adjust);
                    trace!(
                        src_port = src_port,
                        ack = ack,
                        shifted = shifted,
                        "inbound acknowledgment shifted"
                    );
                    tcp.set_acknowledgment_number(shifted);
                    let fixed = adjust_checksum(
                        tcp.checksum(),
                        &ack.to_be_bytes(),
                        &shifted.to_be_bytes(),
                    );
                    tcp.store_checksum(fixed);
                }
            }
        }
        Ok(tcp.data)
    }
}

impl Default for Translator {
    fn default() -> Translator {
        Translator::new()
    }
}

/// A fragment with nonzero offset carries no transport header to fix.
fn is_fragment(ip: &Ipv4Packet) -> bool {
    let off = ip.layer3_offset + 6;
    let field = u16::from_be_bytes([ip.data[off], ip.data[off + 1]]);
    field & 0x1FFF != 0
}

/// UDP checksum fixup for an address change. A stored checksum of zero means
/// the sender did not compute one, and zero it stays.
fn fix_udp_checksum(
    ip: Ipv4Packet,
    old_addr: &[u8],
    new_addr: &[u8],
) -> Result<PacketData, &'static str> {
    let mut udp = UdpSegment::try_from(ip)?;
    if udp.checksum() != 0 {
        let fixed = adjust_checksum(udp.checksum(), old_addr, new_addr);
        udp.store_checksum(fixed);
    }
    Ok(udp.data)
}

/// Rewrites the address in an FTP `PORT h1,h2,h3,h4,p1,p2` command to `new_ip`,
/// leaving the port octets untouched. Returns `None` when the payload is not a
/// well-formed PORT command.
fn rewrite_port_command(payload: &[u8], new_ip: Ipv4Addr) -> Option<Vec<u8>> {
    let args = payload.strip_prefix(b"PORT ")?;
    let line_end = args
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(args.len());
    let fields: Vec<&[u8]> = args[..line_end].split(|&b| b == b',').collect();
    if fields.len() != 6 {
        return None;
    }
    for field in &fields {
        if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
            return None;
        }
    }

    let octets = new_ip.octets();
    let mut rewritten = Vec::with_capacity(payload.len() + 4);
    rewritten.extend_from_slice(b"PORT ");
    for (i, octet) in octets.iter().enumerate() {
        if i > 0 {
            rewritten.push(b',');
        }
        rewritten.extend_from_slice(octet.to_string().as_bytes());
    }
    for field in &fields[4..] {
        rewritten.push(b',');
        rewritten.extend_from_slice(field);
    }
    rewritten.extend_from_slice(&args[line_end..]);
    Some(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test::{build_tcp_packet, build_udp_packet, identity_10_0_0};
    use impnet_packets::{TCP_ACK, TCP_PSH, TCP_SYN};

    const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);
    const OWN: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
    const PEER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 200);

    #[test]
    fn outbound_udp_rewrites_source_and_checksums() {
        let mut translator = Translator::new();
        let id = identity_10_0_0();
        let packet = build_udp_packet(HOST, PEER, 5000, 53, b"hello");

        let out = translator.outbound(packet, &id).unwrap();
        let ip = Ipv4Packet::from_buffer(out, None, 0).unwrap();
        assert_eq!(ip.src_addr(), OWN);
        assert_eq!(ip.dest_addr(), PEER);
        assert!(ip.validate_checksum());
        let udp = UdpSegment::try_from(ip).unwrap();
        assert!(udp.validate_checksum());
        assert_eq!(&udp.payload()[..], b"hello");
    }

    #[test]
    fn inbound_udp_rewrites_destination_and_checksums() {
        let mut translator = Translator::new();
        let id = identity_10_0_0();
        let packet = build_udp_packet(PEER, OWN, 53, 5000, b"answer");

        let out = translator.inbound(packet, &id).unwrap();
        let ip = Ipv4Packet::from_buffer(out, None, 0).unwrap();
        assert_eq!(ip.src_addr(), PEER);
        assert_eq!(ip.dest_addr(), HOST);
        assert!(ip.validate_checksum());
        let udp = UdpSegment::try_from(ip).unwrap();
        assert!(udp.validate_checksum());
    }

    #[test]
    fn zero_udp_checksum_stays_zero() {
        let mut translator = Translator::new();
        let id = identity_10_0_0();
        let mut packet = build_udp_packet(HOST, PEER, 5000, 53, b"x");
        // Clear the UDP checksum, marking it unused.
        packet[26] = 0;
        packet[27] = 0;
        let mut ip = Ipv4Packet::from_buffer(packet, None, 0).unwrap();
        ip.set_checksum();

        let out = translator.outbound(ip.data, &id).unwrap();
        assert_eq!(out[26], 0);
        assert_eq!(out[27], 0);
    }

    #[test]
    fn icmp_keeps_its_checksum_across_the_rewrite() {
        use impnet_packets::IcmpPacket;

        let mut ip = Ipv4Packet::empty();
        ip.set_ttl(64);
        ip.set_protocol(IpProtocol::ICMP);
        ip.set_src_addr(HOST);
        ip.set_dest_addr(PEER);
        // Echo request: type 8, code 0, id/seq, then some data.
        let mut echo = vec![8, 0, 0, 0, 0, 7, 0, 1];
        echo.extend_from_slice(b"abcdefgh");
        ip.set_payload(&echo);
        ip.set_checksum();
        let mut icmp = IcmpPacket::from_buffer(ip.data, None, Some(0), 20).unwrap();
        icmp.set_checksum();

        let mut translator = Translator::new();
        let id = identity_10_0_0();
        let out = translator.outbound(icmp.data, &id).unwrap();
        let ip = Ipv4Packet::from_buffer(out, None, 0).unwrap();
        assert_eq!(ip.src_addr(), OWN);
        assert!(ip.validate_checksum());
        // No pseudo header, so the ICMP sum is untouched by the address change.
        let icmp = IcmpPacket::from_buffer(ip.data, None, Some(0), 20).unwrap();
        assert!(icmp.validate_checksum());
    }

    #[test]
    fn foreign_source_passes_unmodified() {
        let mut translator = Translator::new();
        let id = identity_10_0_0();
        let packet = build_udp_packet(PEER, Ipv4Addr::new(10, 0, 0, 201), 1, 2, b"z");
        let out = translator.outbound(packet.clone(), &id).unwrap();
        assert_eq!(out, packet);
    }

    #[test]
    fn disabled_translation_passes_everything() {
        let mut translator = Translator::new();
        let mut id = identity_10_0_0();
        id.external_host_ip = id.own_ip;
        let packet = vec![0xde, 0xad]; // would not even parse
        let out = translator.outbound(packet.clone(), &id).unwrap();
        assert_eq!(out, packet);
    }

    #[test]
    fn malformed_outbound_is_an_error() {
        let mut translator = Translator::new();
        let id = identity_10_0_0();
        assert!(translator.outbound(vec![0x45, 0x00], &id).is_err());
    }

    #[test]
    fn tcp_checksum_survives_address_rewrite() {
        let mut translator = Translator::new();
        let id = identity_10_0_0();
        let packet = build_tcp_packet(HOST, PEER, 3000, 80, 1000, 2000, TCP_ACK, b"data");

        let out = translator.outbound(packet, &id).unwrap();
        let ip = Ipv4Packet::from_buffer(out, None, 0).unwrap();
        assert!(ip.validate_checksum());
        let tcp = TcpSegment::try_from(ip).unwrap();
        assert!(tcp.validate_checksum());
        assert_eq!(tcp.sequence_number(), 1000);
    }

    #[test]
    fn port_command_grows_and_shifts_later_segments() {
        let mut translator = Translator::new();
        let id = identity_10_0_0();

        // "PORT 10,0,0,9,..." becomes "PORT 100,64,8,5,..." under 100.64.8.5.
        let mut id_long = id;
        id_long.own_ip = Ipv4Addr::new(100, 64, 8, 5);
        let cmd = b"PORT 10,0,0,9,4,10\r\n";
        let packet = build_tcp_packet(HOST, PEER, 3000, 21, 1000, 1, TCP_ACK | TCP_PSH, cmd);
        let out = translator.outbound(packet, &id_long).unwrap();

        let ip = Ipv4Packet::from_buffer(out, None, 0).unwrap();
        assert!(ip.validate_checksum());
        let tcp = TcpSegment::try_from(ip).unwrap();
        assert!(tcp.validate_checksum());
        assert_eq!(&tcp.payload()[..], b"PORT 100,64,8,5,4,10\r\n");
        // Sequence of the PORT segment itself is untouched.
        assert_eq!(tcp.sequence_number(), 1000);

        // The next segment is two bytes further along on the wire.
        let packet = build_tcp_packet(HOST, PEER, 3000, 21, 1020, 1, TCP_ACK, b"LIST\r\n");
        let out = translator.outbound(packet, &id_long).unwrap();
        let tcp = TcpSegment::try_from(Ipv4Packet::from_buffer(out, None, 0).unwrap()).unwrap();
        assert_eq!(tcp.sequence_number(), 1022);
        assert!(tcp.validate_checksum());

        // The peer's acknowledgment comes back shifted down again.
        let packet = build_tcp_packet(PEER, Ipv4Addr::new(100, 64, 8, 5), 21, 3000, 1, 1028, TCP_ACK, b"");
        let mut id_in = id_long;
        id_in.external_host_ip = HOST;
        let out = translator.inbound(packet, &id_in).unwrap();
        let tcp = TcpSegment::try_from(Ipv4Packet::from_buffer(out, None, 0).unwrap()).unwrap();
        assert_eq!(tcp.acknowledgment_number(), 1026);
        assert!(tcp.validate_checksum());
    }

    #[test]
    fn retransmitted_port_command_is_counted_once() {
        let mut translator = Translator::new();
        let mut id = identity_10_0_0();
        id.own_ip = Ipv4Addr::new(100, 64, 8, 5);

        let cmd = b"PORT 10,0,0,9,4,10\r\n";
        let packet = build_tcp_packet(HOST, PEER, 3000, 21, 1000, 1, TCP_ACK | TCP_PSH, cmd);
        translator.outbound(packet, &id).unwrap();

        // The host loses the acknowledgment and resends the same segment.
        let packet = build_tcp_packet(HOST, PEER, 3000, 21, 1000, 1, TCP_ACK | TCP_PSH, cmd);
        let out = translator.outbound(packet, &id).unwrap();
        let tcp = TcpSegment::try_from(Ipv4Packet::from_buffer(out, None, 0).unwrap()).unwrap();
        assert_eq!(&tcp.payload()[..], b"PORT 100,64,8,5,4,10\r\n");
        assert_eq!(tcp.sequence_number(), 1000);

        // Later data is still shifted by the single two-byte rewrite.
        let packet = build_tcp_packet(HOST, PEER, 3000, 21, 1020, 1, TCP_ACK, b"LIST\r\n");
        let out = translator.outbound(packet, &id).unwrap();
        let tcp = TcpSegment::try_from(Ipv4Packet::from_buffer(out, None, 0).unwrap()).unwrap();
        assert_eq!(tcp.sequence_number(), 1022);
        assert!(tcp.validate_checksum());
    }

    #[test]
    fn same_length_port_rewrite_patches_in_place() {
        let mut translator = Translator::new();
        let id = identity_10_0_0();
        let cmd = b"PORT 10,0,0,9,4,10\r\n";
        let packet = build_tcp_packet(HOST, PEER, 3001, 21, 500, 1, TCP_ACK, cmd);

        // 10.0.0.9 -> 10.0.0.5 is a same-length rewrite.
        let out = translator.outbound(packet, &id).unwrap();
        let tcp = TcpSegment::try_from(Ipv4Packet::from_buffer(out, None, 0).unwrap()).unwrap();
        assert_eq!(&tcp.payload()[..], b"PORT 10,0,0,5,4,10\r\n");
        assert!(tcp.validate_checksum());

        // No length change, so later segments are not shifted.
        let packet = build_tcp_packet(HOST, PEER, 3001, 21, 520, 1, TCP_ACK, b"LIST\r\n");
        let out = translator.outbound(packet, &id).unwrap();
        let tcp = TcpSegment::try_from(Ipv4Packet::from_buffer(out, None, 0).unwrap()).unwrap();
        assert_eq!(tcp.sequence_number(), 520);
    }

    #[test]
    fn syn_resets_flow_state() {
        let mut translator = Translator::new();
        let mut id = identity_10_0_0();
        id.own_ip = Ipv4Addr::new(100, 64, 8, 5);

        let cmd = b"PORT 10,0,0,9,4,10\r\n";
        let packet = build_tcp_packet(HOST, PEER, 3002, 21, 100, 1, TCP_ACK, cmd);
        translator.outbound(packet, &id).unwrap();

        // New connection on the same port pair.
        let packet = build_tcp_packet(HOST, PEER, 3002, 21, 9000, 0, TCP_SYN, b"");
        translator.outbound(packet, &id).unwrap();
        let packet = build_tcp_packet(HOST, PEER, 3002, 21, 9001, 1, TCP_ACK, b"NOOP\r\n");
        let out = translator.outbound(packet, &id).unwrap();
        let tcp = TcpSegment::try_from(Ipv4Packet::from_buffer(out, None, 0).unwrap()).unwrap();
        assert_eq!(tcp.sequence_number(), 9001);
    }

    #[test]
    fn non_port_ftp_payload_is_left_alone() {
        let mut translator = Translator::new();
        let id = identity_10_0_0();
        for payload in [
            &b"USER anonymous\r\n"[..],
            b"PORT 10,0,0\r\n",
            b"PORT 10,0,0,9,4\r\n",
            b"PORT a,b,c,d,e,f\r\n",
            b"port 10,0,0,9,4,10\r\n",
        ]
        .iter()
        {
            let packet = build_tcp_packet(HOST, PEER, 3003, 21, 700, 1, TCP_ACK, payload);
            let out = translator.outbound(packet, &id).unwrap();
            let tcp =
                TcpSegment::try_from(Ipv4Packet::from_buffer(out, None, 0).unwrap()).unwrap();
            assert_eq!(&tcp.payload()[..], *payload);
            assert!(tcp.validate_checksum());
        }
    }

    #[test]
    fn rewrite_port_command_parses_strictly() {
        let ip = Ipv4Addr::new(192, 168, 1, 44);
        assert_eq!(
            rewrite_port_command(b"PORT 10,0,0,9,4,10\r\n", ip).unwrap(),
            b"PORT 192,168,1,44,4,10\r\n".to_vec()
        );
        // Port fields survive verbatim, trailing bytes preserved.
        assert_eq!(
            rewrite_port_command(b"PORT 1,2,3,4,04,010\r\nextra", ip).unwrap(),
            b"PORT 192,168,1,44,04,010\r\nextra".to_vec()
        );
        assert!(rewrite_port_command(b"PORT 1,2,3,4,5\r\n", ip).is_none());
        assert!(rewrite_port_command(b"PORT ,2,3,4,5,6\r\n", ip).is_none());
        assert!(rewrite_port_command(b"QUIT\r\n", ip).is_none());
    }
}
