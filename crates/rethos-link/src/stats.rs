//! Global and per-channel traffic counters.
//!
//! The counters are plain integers owned by the dispatcher; nothing else
//! touches them, so no synchronization is involved. The snapshot layout is
//! a stable, packed little-endian block consumed by monitoring clients on
//! channel 0 and must not be reordered.

use rethos_core::constants::NUM_CHANNELS;

/// Byte length of an encoded snapshot: seven global u64 fields followed by
/// five u64 fields for each of the 256 channels.
pub const SNAPSHOT_LEN: usize = 7 * 8 + NUM_CHANNELS * 5 * 8;

/// Whole-link counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalStats {
    pub serial_received: u64,
    pub domain_forwarded: u64,
    pub domain_received: u64,
    pub serial_forwarded: u64,
    pub lost_frames: u64,
    pub bad_frames: u64,
    pub drop_notconnected: u64,
}

/// Per-channel counters. Note the field order differs from the global block;
/// it is part of the snapshot layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelStats {
    pub serial_received: u64,
    pub domain_forwarded: u64,
    pub drop_notconnected: u64,
    pub domain_received: u64,
    pub serial_forwarded: u64,
}

/// All counters for the process.
#[derive(Debug)]
pub struct Stats {
    pub global: GlobalStats,
    pub channel: Box<[ChannelStats; NUM_CHANNELS]>,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            global: GlobalStats::default(),
            channel: Box::new([ChannelStats::default(); NUM_CHANNELS]),
        }
    }

    /// Serialize the packed little-endian snapshot.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SNAPSHOT_LEN);
        let g = &self.global;
        for v in [
            g.serial_received,
            g.domain_forwarded,
            g.domain_received,
            g.serial_forwarded,
            g.lost_frames,
            g.bad_frames,
            g.drop_notconnected,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for c in self.channel.iter() {
            for v in [
                c.serial_received,
                c.domain_forwarded,
                c.drop_notconnected,
                c.domain_received,
                c.serial_forwarded,
            ] {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        debug_assert_eq!(out.len(), SNAPSHOT_LEN);
        out
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
