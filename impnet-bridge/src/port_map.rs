use tracing::trace;

pub const PORT_MAP_SIZE: usize = 64;
/// Idle ticks before a flow's slot is reclaimed.
pub const PORT_CLOSE_TICKS: u16 = 300;

/// Translator-side state for one TCP flow, keyed by the host's (source, destination) ports.
///
/// `seq_adjust` is the running byte delta introduced by payload rewrites on the outbound
/// direction; `last_seq` is the host sequence number of the most recent rewritten segment.
/// Outbound segments past `last_seq` get `seq_adjust` added; inbound acknowledgments past it
/// get `seq_adjust` removed.
#[derive(Clone, Copy, Debug)]
pub struct PortMapEntry {
    pub src_port: u16,
    pub dst_port: u16,
    pub close_timer: u16,
    pub seq_adjust: u32,
    pub last_seq: u32,
}

pub struct PortMap {
    entries: [Option<PortMapEntry>; PORT_MAP_SIZE],
}

impl PortMap {
    pub fn new() -> PortMap {
        PortMap {
            entries: [None; PORT_MAP_SIZE],
        }
    }

    /// Look up the flow's entry, refreshing its idle timer when present.
    pub fn lookup(&mut self, src_port: u16, dst_port: u16) -> Option<PortMapEntry> {
        self.entries
            .iter_mut()
            .flatten()
            .find(|entry| entry.src_port == src_port && entry.dst_port == dst_port)
            .map(|entry| {
                entry.close_timer = PORT_CLOSE_TICKS;
                *entry
            })
    }

    /// Fold another rewrite delta into the flow, creating the entry on first use. A delta
    /// recorded at the flow's current `last_seq` is a retransmission of the segment already
    /// accounted for and only refreshes the timer.
    pub fn record_adjust(&mut self, src_port: u16, dst_port: u16, delta: u32, last_seq: u32) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .flatten()
            .find(|entry| entry.src_port == src_port && entry.dst_port == dst_port)
        {
            entry.close_timer = PORT_CLOSE_TICKS;
            if entry.last_seq == last_seq {
                return;
            }
            entry.seq_adjust = entry.seq_adjust.wrapping_add(delta);
            entry.last_seq = last_seq;
            return;
        }
        match self.entries.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(PortMapEntry {
                    src_port,
                    dst_port,
                    close_timer: PORT_CLOSE_TICKS,
                    seq_adjust: delta,
                    last_seq,
                });
            }
            None => trace!(
                src_port = src_port,
                dst_port = dst_port,
                "port map full, flow adjustment not tracked"
            ),
        }
    }

    /// A SYN restarts the flow, so any stale adjustment for the port pair must go.
    pub fn reset(&mut self, src_port: u16, dst_port: u16) {
        for slot in self.entries.iter_mut() {
            let matches = slot
                .as_ref()
                .map_or(false, |e| e.src_port == src_port && e.dst_port == dst_port);
            if matches {
                *slot = None;
            }
        }
    }

    /// Count down idle timers and reclaim dead flows.
    pub fn tick(&mut self) {
        for slot in self.entries.iter_mut() {
            if let Some(entry) = slot {
                entry.close_timer -= 1;
                if entry.close_timer == 0 {
                    trace!(
                        src_port = entry.src_port,
                        dst_port = entry.dst_port,
                        "idle flow reclaimed from port map"
                    );
                    *slot = None;
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries = [None; PORT_MAP_SIZE];
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }
}

impl Default for PortMap {
    fn default() -> PortMap {
        PortMap::new()
    }
}
