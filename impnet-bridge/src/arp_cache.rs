use impnet_packets::MacAddr;
use std::net::Ipv4Addr;
use tracing::trace;

pub const ARP_CACHE_SIZE: usize = 64;
/// Entries older than this are dropped by `age_tick`.
pub const ARP_MAX_AGE: i16 = 100;
/// Sentinel age for entries that never age out (e.g. the DHCP server).
pub const ARP_AGE_STATIC: i16 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub age: i16,
}

impl ArpEntry {
    pub fn is_static(&self) -> bool {
        self.age == ARP_AGE_STATIC
    }
}

/// Fixed-capacity IPv4-to-link-address cache.
///
/// Learning an address that is already present refreshes the entry in place. When the table is
/// full the oldest dynamic entry is evicted; static entries are only removed by `clear`.
pub struct ArpCache {
    entries: [Option<ArpEntry>; ARP_CACHE_SIZE],
}

impl ArpCache {
    pub fn new() -> ArpCache {
        ArpCache {
            entries: [None; ARP_CACHE_SIZE],
        }
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries
            .iter()
            .flatten()
            .find(|entry| entry.ip == ip)
            .map(|entry| entry.mac)
    }

    /// Learn a fresh dynamic mapping.
    pub fn insert(&mut self, ip: Ipv4Addr, mac: MacAddr) {
        self.insert_aged(ip, mac, 0)
    }

    /// Pin a mapping so aging and eviction never touch it.
    pub fn insert_static(&mut self, ip: Ipv4Addr, mac: MacAddr) {
        self.insert_aged(ip, mac, ARP_AGE_STATIC)
    }

    fn insert_aged(&mut self, ip: Ipv4Addr, mac: MacAddr, age: i16) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .flatten()
            .find(|entry| entry.ip == ip)
        {
            entry.mac = mac;
            if !entry.is_static() {
                entry.age = age;
            }
            return;
        }

        let slot = match self.entries.iter().position(Option::is_none) {
            Some(free) => Some(free),
            None => self.oldest_dynamic_slot(),
        };
        match slot {
            Some(slot) => {
                trace!(ip = %ip, mac = %mac, "arp cache learn");
                self.entries[slot] = Some(ArpEntry { ip, mac, age });
            }
            // Every slot pinned static; nothing sane to evict.
            None => trace!(ip = %ip, "arp cache full of static entries, mapping dropped"),
        }
    }

    fn oldest_dynamic_slot(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|entry| (i, entry)))
            .filter(|(_, entry)| !entry.is_static())
            .max_by_key(|(_, entry)| entry.age)
            .map(|(i, _)| i)
    }

    /// Advance every dynamic entry's age by one, dropping those past `ARP_MAX_AGE`.
    /// Returns how many were dropped.
    pub fn age_tick(&mut self) -> usize {
        let mut dropped = 0;
        for slot in self.entries.iter_mut() {
            if let Some(entry) = slot {
                if entry.is_static() {
                    continue;
                }
                entry.age += 1;
                if entry.age > ARP_MAX_AGE {
                    trace!(ip = %entry.ip, "arp cache entry expired");
                    *slot = None;
                    dropped += 1;
                }
            }
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.entries = [None; ARP_CACHE_SIZE];
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ArpCache {
    fn default() -> ArpCache {
        ArpCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([2, 0, 0, 0, 0, last])
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn lookup_after_insert() {
        let mut cache = ArpCache::new();
        assert_eq!(cache.lookup(ip(1)), None);
        cache.insert(ip(1), mac(1));
        assert_eq!(cache.lookup(ip(1)), Some(mac(1)));
    }

    #[test]
    fn reinsert_refreshes_in_place() {
        let mut cache = ArpCache::new();
        cache.insert(ip(1), mac(1));
        for _ in 0..50 {
            cache.age_tick();
        }
        cache.insert(ip(1), mac(2));
        assert_eq!(cache.lookup(ip(1)), Some(mac(2)));
        assert_eq!(cache.len(), 1);
        // Refreshed entry survives another near-full lifetime.
        for _ in 0..ARP_MAX_AGE {
            cache.age_tick();
        }
        assert_eq!(cache.lookup(ip(1)), Some(mac(2)));
    }

    #[test]
    fn entries_expire_past_max_age() {
        let mut cache = ArpCache::new();
        cache.insert(ip(1), mac(1));
        for _ in 0..ARP_MAX_AGE {
            assert_eq!(cache.age_tick(), 0);
        }
        assert_eq!(cache.age_tick(), 1);
        assert_eq!(cache.lookup(ip(1)), None);
    }

    #[test]
    fn static_entries_never_age() {
        let mut cache = ArpCache::new();
        cache.insert_static(ip(1), mac(1));
        for _ in 0..(ARP_MAX_AGE as usize * 3) {
            cache.age_tick();
        }
        assert_eq!(cache.lookup(ip(1)), Some(mac(1)));
    }

    #[test]
    fn full_cache_evicts_oldest_dynamic() {
        let mut cache = ArpCache::new();
        cache.insert(ip(0), mac(0));
        cache.age_tick();
        for i in 1..ARP_CACHE_SIZE {
            cache.insert(ip(i as u8), mac(i as u8));
        }
        assert_eq!(cache.len(), ARP_CACHE_SIZE);
        cache.insert(ip(200), mac(200));
        assert_eq!(cache.len(), ARP_CACHE_SIZE);
        // ip(0) was the only aged entry, so it must be the one that went.
        assert_eq!(cache.lookup(ip(0)), None);
        assert_eq!(cache.lookup(ip(200)), Some(mac(200)));
    }

    #[test]
    fn eviction_skips_static_entries() {
        let mut cache = ArpCache::new();
        cache.insert_static(ip(0), mac(0));
        for i in 1..ARP_CACHE_SIZE {
            cache.insert(ip(i as u8), mac(i as u8));
        }
        cache.age_tick();
        cache.insert(ip(201), mac(201));
        assert_eq!(cache.lookup(ip(0)), Some(mac(0)));
        assert_eq!(cache.lookup(ip(201)), Some(mac(201)));
    }

    #[test]
    fn clear_removes_everything() {
        let mut cache = ArpCache::new();
        cache.insert(ip(1), mac(1));
        cache.insert_static(ip(2), mac(2));
        cache.clear();
        assert!(cache.is_empty());
    }
}
