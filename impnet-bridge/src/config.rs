use impnet_packets::MacAddr;
use std::net::Ipv4Addr;

/// Addressing state for one bridged interface.
///
/// When `want_dhcp` is set the IP fields start out unspecified and are filled in (and later
/// possibly cleared again) by the DHCP client; otherwise they are fixed for the lifetime of
/// the bridge. `external_host_ip` is the address the attached host believes it has, which the
/// translator maps to and from `own_ip`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterfaceIdentity {
    pub own_mac: MacAddr,
    pub own_ip: Ipv4Addr,
    pub own_mask: Ipv4Addr,
    pub gateway_ip: Ipv4Addr,
    pub external_host_ip: Ipv4Addr,
    pub want_dhcp: bool,
}

impl InterfaceIdentity {
    pub fn statically(
        own_mac: MacAddr,
        own_ip: Ipv4Addr,
        own_mask: Ipv4Addr,
        gateway_ip: Ipv4Addr,
        external_host_ip: Ipv4Addr,
    ) -> InterfaceIdentity {
        InterfaceIdentity {
            own_mac,
            own_ip,
            own_mask,
            gateway_ip,
            external_host_ip,
            want_dhcp: false,
        }
    }

    pub fn via_dhcp(own_mac: MacAddr, external_host_ip: Ipv4Addr) -> InterfaceIdentity {
        InterfaceIdentity {
            own_mac,
            own_ip: Ipv4Addr::UNSPECIFIED,
            own_mask: Ipv4Addr::UNSPECIFIED,
            gateway_ip: Ipv4Addr::UNSPECIFIED,
            external_host_ip,
            want_dhcp: true,
        }
    }

    /// True once an address has been committed (statically or by DHCP).
    pub fn is_configured(&self) -> bool {
        !self.own_ip.is_unspecified()
    }

    /// Address rewriting only happens when the host's address is real and distinct from ours.
    pub fn translates(&self) -> bool {
        !self.external_host_ip.is_unspecified() && self.external_host_ip != self.own_ip
    }

    /// Whether `ip` shares our subnet, judged with the committed netmask.
    pub fn on_subnet(&self, ip: Ipv4Addr) -> bool {
        if self.own_mask.is_unspecified() {
            return false;
        }
        let mask = u32::from(self.own_mask);
        u32::from(ip) & mask == u32::from(self.own_ip) & mask
    }

    /// Directed broadcast address of our subnet, e.g. 10.0.0.255 for 10.0.0.5/24.
    pub fn subnet_broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.own_ip) | !u32::from(self.own_mask))
    }

    /// Drop the committed addressing, e.g. on lease expiry or NAK.
    pub fn clear_lease(&mut self) {
        self.own_ip = Ipv4Addr::UNSPECIFIED;
        self.own_mask = Ipv4Addr::UNSPECIFIED;
        self.gateway_ip = Ipv4Addr::UNSPECIFIED;
    }
}
