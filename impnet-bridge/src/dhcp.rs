use crate::arp_cache::ArpCache;
use crate::config::InterfaceIdentity;
use crate::transport::Transport;
use impnet_packets::{
    ArpFrame, DhcpMessage, DhcpMessageType, EthernetFrame, IpProtocol, Ipv4Packet, MacAddr,
    UdpSegment, BOOTREPLY, DHCP_CLIENT_PORT, DHCP_SERVER_PORT,
};
use rand::Rng;
use std::convert::TryFrom;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// First retransmit wait in ticks; doubles on every retry.
pub const DHCP_RETRY_START: u32 = 4;
/// Ceiling for the retransmit wait.
pub const DHCP_RETRY_CAP: u32 = 64;
/// Lease length assumed when the server sends none.
pub const DHCP_DEFAULT_LEASE: u32 = 86_400;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpState {
    /// Not running, or waiting for `want_dhcp` to start it.
    Off,
    /// DISCOVER sent, collecting offers.
    Selecting,
    /// REQUEST sent for a specific offer.
    Requesting,
    /// Lease committed.
    Bound,
    /// Unicast renewal with the leasing server in progress.
    Renewing,
    /// Renewal gave up on the server, broadcasting for any server.
    Rebinding,
    /// Transmit failed; waiting out the backoff before starting over.
    BackingOff,
}

/// RFC 2131 client driven by one call per tick plus inbound server datagrams.
///
/// On commit the client writes the lease into the shared `InterfaceIdentity`, pins the
/// server's link address in the ARP cache, and announces the fresh binding with a
/// gratuitous ARP. Losing the lease (expiry or NAK) clears the identity again.
pub struct DhcpClient {
    state: DhcpState,
    xid: u32,
    retry_wait: u32,
    retry_backoff: u32,
    lease_left: u32,
    renew_left: u32,
    rebind_left: u32,
    offered_ip: Ipv4Addr,
    server_ip: Ipv4Addr,
    server_mac: MacAddr,
}

impl DhcpClient {
    pub fn new() -> DhcpClient {
        DhcpClient {
            state: DhcpState::Off,
            xid: 0,
            retry_wait: 0,
            retry_backoff: DHCP_RETRY_START,
            lease_left: 0,
            renew_left: 0,
            rebind_left: 0,
            offered_ip: Ipv4Addr::UNSPECIFIED,
            server_ip: Ipv4Addr::UNSPECIFIED,
            server_mac: MacAddr::ZERO,
        }
    }

    pub fn state(&self) -> DhcpState {
        self.state
    }

    /// Advance the state machine by one tick (nominally one second).
    pub fn tick(
        &mut self,
        identity: &mut InterfaceIdentity,
        arp: &mut ArpCache,
        wire: &mut dyn Transport,
    ) {
        if !identity.want_dhcp {
            return;
        }
        match self.state {
            DhcpState::Off => self.start_discovery(identity, wire),
            DhcpState::Selecting => {
                if self.retry_due() {
                    debug!(xid = self.xid, "retransmitting DHCP discover");
                    if !self.send_discover(identity, wire) {
                        self.back_off();
                    }
                }
            }
            DhcpState::Requesting => {
                if self.retry_due() {
                    debug!(xid = self.xid, "retransmitting DHCP request");
                    if !self.send_select_request(identity, wire) {
                        self.back_off();
                    }
                }
            }
            DhcpState::BackingOff => {
                self.retry_wait -= 1;
                if self.retry_wait == 0 {
                    self.start_discovery(identity, wire);
                }
            }
            DhcpState::Bound | DhcpState::Renewing | DhcpState::Rebinding => {
                self.tick_bound(identity, arp, wire);
            }
        }
    }

    fn tick_bound(
        &mut self,
        identity: &mut InterfaceIdentity,
        _arp: &mut ArpCache,
        wire: &mut dyn Transport,
    ) {
        self.lease_left -= 1;
        if self.lease_left == 0 {
            info!(ip = %identity.own_ip, "DHCP lease expired");
            identity.clear_lease();
            self.state = DhcpState::Off;
            return;
        }
        if self.renew_left > 0 {
            self.renew_left -= 1;
        }
        if self.rebind_left > 0 {
            self.rebind_left -= 1;
        }

        match self.state {
            DhcpState::Bound => {
                if self.renew_left == 0 {
                    info!(ip = %identity.own_ip, "starting DHCP renewal");
                    self.retry_backoff = DHCP_RETRY_START;
                    self.retry_wait = self.retry_backoff;
                    self.state = DhcpState::Renewing;
                    self.send_renew_request(identity, wire);
                }
            }
            DhcpState::Renewing => {
                if self.rebind_left == 0 {
                    info!(ip = %identity.own_ip, "renewal unanswered, rebinding");
                    self.retry_backoff = DHCP_RETRY_START;
                    self.retry_wait = self.retry_backoff;
                    self.state = DhcpState::Rebinding;
                    self.send_rebind_request(identity, wire);
                } else if self.retry_due() {
                    self.send_renew_request(identity, wire);
                }
            }
            DhcpState::Rebinding => {
                if self.retry_due() {
                    self.send_rebind_request(identity, wire);
                }
            }
            _ => unreachable!(),
        }
    }

    /// Counts the retransmit timer down; on expiry re-arms it with the wait
    /// doubled (capped) and reports that a retransmit is due.
    fn retry_due(&mut self) -> bool {
        self.retry_wait -= 1;
        if self.retry_wait > 0 {
            return false;
        }
        self.retry_backoff = (self.retry_backoff * 2).min(DHCP_RETRY_CAP);
        self.retry_wait = self.retry_backoff;
        true
    }

    fn back_off(&mut self) {
        warn!(wait = self.retry_backoff, "DHCP transmit failed, backing off");
        self.retry_wait = self.retry_backoff;
        self.retry_backoff = (self.retry_backoff * 2).min(DHCP_RETRY_CAP);
        self.state = DhcpState::BackingOff;
    }

    fn start_discovery(&mut self, identity: &InterfaceIdentity, wire: &mut dyn Transport) {
        self.xid = rand::thread_rng().gen();
        self.retry_backoff = DHCP_RETRY_START;
        self.retry_wait = self.retry_backoff;
        debug!(xid = self.xid, "starting DHCP discovery");
        if self.send_discover(identity, wire) {
            self.state = DhcpState::Selecting;
        } else {
            self.back_off();
        }
    }

    /// Feed in a server datagram (already checksum-validated by the caller).
    /// Anything that does not match our transaction is silently dropped.
    pub fn handle_datagram(
        &mut self,
        udp: &UdpSegment,
        src_mac: MacAddr,
        identity: &mut InterfaceIdentity,
        arp: &mut ArpCache,
        wire: &mut dyn Transport,
    ) {
        let message = match DhcpMessage::decode(&udp.payload()) {
            Ok(message) => message,
            Err(err) => {
                debug!(error = err, "undecodable DHCP datagram dropped");
                return;
            }
        };
        if message.op != BOOTREPLY
            || message.chaddr != identity.own_mac
            || message.xid != self.xid
        {
            debug!(xid = message.xid, "DHCP reply for someone else dropped");
            return;
        }
        let message_type = match message.message_type {
            Some(message_type) => message_type,
            None => return,
        };

        match (self.state, message_type) {
            (DhcpState::Selecting, DhcpMessageType::Offer) => {
                if message.yiaddr.is_unspecified() {
                    return;
                }
                self.offered_ip = message.yiaddr;
                self.server_ip = message.server_id.unwrap_or(message.siaddr);
                self.server_mac = src_mac;
                self.retry_backoff = DHCP_RETRY_START;
                self.retry_wait = self.retry_backoff;
                info!(ip = %self.offered_ip, server = %self.server_ip, "DHCP offer taken");
                if self.send_select_request(identity, wire) {
                    self.state = DhcpState::Requesting;
                } else {
                    self.back_off();
                }
            }
            (DhcpState::Requesting, DhcpMessageType::Ack) => {
                self.commit(&message, src_mac, identity, arp, wire);
            }
            (DhcpState::Renewing, DhcpMessageType::Ack)
            | (DhcpState::Rebinding, DhcpMessageType::Ack) => {
                self.refresh_timers(&message);
                self.server_ip = message.server_id.unwrap_or(self.server_ip);
                self.server_mac = src_mac;
                self.state = DhcpState::Bound;
                info!(ip = %identity.own_ip, lease = self.lease_left, "DHCP lease renewed");
            }
            (DhcpState::Requesting, DhcpMessageType::Nak) => {
                warn!(ip = %self.offered_ip, "DHCP request refused");
                identity.clear_lease();
                self.state = DhcpState::Off;
            }
            _ => debug!(
                state = ?self.state,
                message_type = ?message_type,
                "DHCP message ignored in this state"
            ),
        }
    }

    fn commit(
        &mut self,
        message: &DhcpMessage,
        src_mac: MacAddr,
        identity: &mut InterfaceIdentity,
        arp: &mut ArpCache,
        wire: &mut dyn Transport,
    ) {
        if message.yiaddr.is_unspecified() {
            return;
        }
        identity.own_ip = message.yiaddr;
        identity.own_mask = message
            .subnet_mask
            .unwrap_or_else(|| Ipv4Addr::new(255, 255, 255, 0));
        identity.gateway_ip = message.router.unwrap_or(Ipv4Addr::UNSPECIFIED);
        self.server_ip = message.server_id.unwrap_or(self.server_ip);
        self.server_mac = src_mac;
        self.refresh_timers(message);
        self.state = DhcpState::Bound;
        info!(
            ip = %identity.own_ip,
            mask = %identity.own_mask,
            gateway = %identity.gateway_ip,
            lease = self.lease_left,
            "DHCP lease committed"
        );

        // The server talks to us without ARPing first, so pin its mapping.
        arp.insert_static(self.server_ip, self.server_mac);

        // Announce the fresh binding to the segment.
        let mut frame = ArpFrame::gratuitous(identity.own_mac, identity.own_ip).frame();
        frame.pad_to_minimum();
        if wire.send(&frame.data).is_err() {
            warn!("gratuitous ARP for new lease not sent");
        }
    }

    fn refresh_timers(&mut self, message: &DhcpMessage) {
        self.lease_left = message.lease_seconds.unwrap_or(DHCP_DEFAULT_LEASE).max(1);
        self.renew_left = message.renewal_seconds.unwrap_or(self.lease_left / 2);
        self.rebind_left = message
            .rebinding_seconds
            .unwrap_or(self.lease_left / 8 * 7);
    }

    /// Give the lease back and fall silent, e.g. when the bridge detaches.
    pub fn release(&mut self, identity: &mut InterfaceIdentity, wire: &mut dyn Transport) {
        let bound = matches!(
            self.state,
            DhcpState::Bound | DhcpState::Renewing | DhcpState::Rebinding
        );
        if bound && identity.is_configured() {
            let mut message = DhcpMessage::client_request(self.xid, identity.own_mac);
            message.message_type = Some(DhcpMessageType::Release);
            message.broadcast = false;
            message.ciaddr = identity.own_ip;
            message.server_id = Some(self.server_ip);
            message.parameter_request_list = None;
            info!(ip = %identity.own_ip, server = %self.server_ip, "releasing DHCP lease");
            self.send_message(
                identity,
                wire,
                &message,
                self.server_mac,
                identity.own_ip,
                self.server_ip,
            );
            identity.clear_lease();
        }
        self.state = DhcpState::Off;
        self.lease_left = 0;
        self.renew_left = 0;
        self.rebind_left = 0;
    }

    fn send_discover(&self, identity: &InterfaceIdentity, wire: &mut dyn Transport) -> bool {
        let mut message = DhcpMessage::client_request(self.xid, identity.own_mac);
        message.message_type = Some(DhcpMessageType::Discover);
        self.send_broadcast(identity, wire, &message)
    }

    fn send_select_request(&self, identity: &InterfaceIdentity, wire: &mut dyn Transport) -> bool {
        let mut message = DhcpMessage::client_request(self.xid, identity.own_mac);
        message.message_type = Some(DhcpMessageType::Request);
        message.requested_ip = Some(self.offered_ip);
        message.server_id = Some(self.server_ip);
        self.send_broadcast(identity, wire, &message)
    }

    fn send_renew_request(&self, identity: &InterfaceIdentity, wire: &mut dyn Transport) -> bool {
        let mut message = DhcpMessage::client_request(self.xid, identity.own_mac);
        message.message_type = Some(DhcpMessageType::Request);
        message.broadcast = false;
        message.ciaddr = identity.own_ip;
        self.send_message(
            identity,
            wire,
            &message,
            self.server_mac,
            identity.own_ip,
            self.server_ip,
        )
    }

    fn send_rebind_request(&self, identity: &InterfaceIdentity, wire: &mut dyn Transport) -> bool {
        let mut message = DhcpMessage::client_request(self.xid, identity.own_mac);
        message.message_type = Some(DhcpMessageType::Request);
        message.ciaddr = identity.own_ip;
        self.send_broadcast(identity, wire, &message)
    }

    fn send_broadcast(
        &self,
        identity: &InterfaceIdentity,
        wire: &mut dyn Transport,
        message: &DhcpMessage,
    ) -> bool {
        self.send_message(
            identity,
            wire,
            message,
            MacAddr::BROADCAST,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
        )
    }

    fn send_message(
        &self,
        identity: &InterfaceIdentity,
        wire: &mut dyn Transport,
        message: &DhcpMessage,
        dest_mac: MacAddr,
        src_ip: Ipv4Addr,
        dest_ip: Ipv4Addr,
    ) -> bool {
        let frame = match build_dhcp_frame(identity.own_mac, dest_mac, src_ip, dest_ip, message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = err, "DHCP frame construction failed");
                return false;
            }
        };
        match wire.send(&frame) {
            Ok(()) => true,
            Err(_) => {
                warn!("DHCP transmit refused by transport");
                false
            }
        }
    }
}

impl Default for DhcpClient {
    fn default() -> DhcpClient {
        DhcpClient::new()
    }
}

fn build_dhcp_frame(
    src_mac: MacAddr,
    dest_mac: MacAddr,
    src_ip: Ipv4Addr,
    dest_ip: Ipv4Addr,
    message: &DhcpMessage,
) -> Result<Vec<u8>, &'static str> {
    let payload = message.encode();
    let mut segment = vec![0u8; 8];
    segment[0..2].copy_from_slice(&DHCP_CLIENT_PORT.to_be_bytes());
    segment[2..4].copy_from_slice(&DHCP_SERVER_PORT.to_be_bytes());
    let length = (8 + payload.len()) as u16;
    segment[4..6].copy_from_slice(&length.to_be_bytes());
    segment.extend_from_slice(&payload);

    let mut ip = Ipv4Packet::empty();
    ip.set_ttl(64);
    ip.set_protocol(IpProtocol::UDP);
    ip.set_src_addr(src_ip);
    ip.set_dest_addr(dest_ip);
    ip.set_payload(&segment);
    ip.set_checksum();

    let mut udp = UdpSegment::try_from(ip)?;
    udp.set_checksum()?;

    let mut frame = EthernetFrame::encap_ipv4(Ipv4Packet::try_from(udp)?);
    frame.set_src_mac(src_mac);
    frame.set_dest_mac(dest_mac);
    frame.pad_to_minimum();
    Ok(frame.data)
}
