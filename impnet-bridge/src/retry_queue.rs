use impnet_packets::PacketData;
use std::net::Ipv4Addr;
use tracing::trace;

pub const RETRY_QUEUE_SIZE: usize = 8;
/// Ticks a queued packet survives while waiting for its next hop to resolve.
pub const RETRY_PACKET_LIFE: u32 = 1000;

/// One IP packet parked until ARP resolves `next_hop`.
#[derive(Clone, Debug)]
pub struct PendingPacket {
    pub packet: PacketData,
    pub next_hop: Ipv4Addr,
    pub life: u32,
}

/// Queue admission failure; the caller drops the packet and says so.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFull;

/// Small holding area for outbound packets whose next hop has no ARP entry yet.
///
/// Slots are fixed and tracked with an explicit free list, so admission and release are O(1)
/// and a burst to one dead address cannot grow memory without bound.
pub struct RetryQueue {
    slots: Vec<Option<PendingPacket>>,
    free: Vec<usize>,
}

impl RetryQueue {
    pub fn new() -> RetryQueue {
        RetryQueue {
            slots: vec![None; RETRY_QUEUE_SIZE],
            free: (0..RETRY_QUEUE_SIZE).rev().collect(),
        }
    }

    pub fn enqueue(&mut self, next_hop: Ipv4Addr, packet: PacketData) -> Result<(), QueueFull> {
        let slot = self.free.pop().ok_or(QueueFull)?;
        trace!(next_hop = %next_hop, slot = slot, "packet parked awaiting resolution");
        self.slots[slot] = Some(PendingPacket {
            packet,
            next_hop,
            life: RETRY_PACKET_LIFE,
        });
        Ok(())
    }

    /// Remove and return every packet that was waiting on `resolved`, oldest slot first.
    pub fn take_resolved(&mut self, resolved: Ipv4Addr) -> Vec<PacketData> {
        let mut flushed = Vec::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let matches = slot
                .as_ref()
                .map_or(false, |pending| pending.next_hop == resolved);
            if matches {
                if let Some(pending) = slot.take() {
                    flushed.push(pending.packet);
                    self.free.push(i);
                }
            }
        }
        flushed
    }

    /// Count down every pending packet's life, dropping the expired. Returns the drop count.
    pub fn tick(&mut self) -> usize {
        let mut dropped = 0;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Some(pending) = slot {
                pending.life -= 1;
                if pending.life == 0 {
                    trace!(next_hop = %pending.next_hop, "parked packet expired unresolved");
                    *slot = None;
                    self.free.push(i);
                    dropped += 1;
                }
            }
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.slots = vec![None; RETRY_QUEUE_SIZE];
        self.free = (0..RETRY_QUEUE_SIZE).rev().collect();
    }

    pub fn len(&self) -> usize {
        RETRY_QUEUE_SIZE - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RetryQueue {
    fn default() -> RetryQueue {
        RetryQueue::new()
    }
}
