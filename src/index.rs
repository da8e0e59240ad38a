//! Per-source packet index
//!
//! Maps `(source, frame)` to the byte offset of the packet's frame and its
//! capture time. Frame numbers within a source are dense (`0..N`) and offsets
//! strictly increase with the frame number.
//!
//! The writer builds an index while appending and serialises it into the
//! footer. The reader either loads that footer or rebuilds the same mapping by
//! scanning the stream.

use std::collections::BTreeMap;

use crate::format::SourceStats;
use crate::types::SourceId;
use crate::{PacketStreamError, Result};

/// Location and capture time of one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketIndexEntry {
    /// Absolute byte offset of the packet's first frame (`JSN` if present, else `PKT`)
    pub offset: u64,
    /// Capture time in microseconds
    pub time_us: i64,
}

/// Ordered per-source map from frame number to [`PacketIndexEntry`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacketIndex {
    sources: BTreeMap<SourceId, Vec<PacketIndexEntry>>,
}

impl PacketIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the entry for `frame` of `source`.
    ///
    /// `frame` must be the next frame of the source. Re-adding an existing frame
    /// with the same entry is accepted; any other existing frame, or a frame
    /// past the end, violates the dense ordering and is rejected.
    pub fn add(&mut self, source: SourceId, frame: usize, entry: PacketIndexEntry) -> Result<()> {
        let entries = self.sources.entry(source).or_default();

        if frame < entries.len() {
            if entries[frame] == entry {
                return Ok(());
            }
            return Err(PacketStreamError::Index {
                details: format!(
                    "frame {} of source {} already indexed at offset {}, refusing offset {}",
                    frame, source, entries[frame].offset, entry.offset
                ),
            });
        }

        if frame > entries.len() {
            return Err(PacketStreamError::Index {
                details: format!(
                    "frame {} of source {} would leave a gap after frame {}",
                    frame,
                    source,
                    entries.len() as i64 - 1
                ),
            });
        }

        if let Some(last) = entries.last()
            && entry.offset <= last.offset
        {
            return Err(PacketStreamError::Index {
                details: format!(
                    "offset {} for source {} does not follow previous offset {}",
                    entry.offset, source, last.offset
                ),
            });
        }

        entries.push(entry);
        Ok(())
    }

    /// Append `entry` as the next frame of `source`, returning its frame number.
    pub fn append(&mut self, source: SourceId, entry: PacketIndexEntry) -> Result<usize> {
        let frame = self.sources.get(&source).map_or(0, Vec::len);
        self.add(source, frame, entry)?;
        Ok(frame)
    }

    pub fn has(&self, source: SourceId, frame: usize) -> bool {
        self.get(source, frame).is_some()
    }

    pub fn get(&self, source: SourceId, frame: usize) -> Option<&PacketIndexEntry> {
        self.sources.get(&source).and_then(|entries| entries.get(frame))
    }

    /// Byte offset of `frame` of `source`, if indexed.
    pub fn position(&self, source: SourceId, frame: usize) -> Option<u64> {
        self.get(source, frame).map(|entry| entry.offset)
    }

    /// Number of indexed packets, or `None` for a source never seen.
    pub fn packet_count(&self, source: SourceId) -> Option<usize> {
        self.sources.get(&source).map(Vec::len)
    }

    /// All entries of `source` in frame order.
    pub fn entries(&self, source: SourceId) -> &[PacketIndexEntry] {
        self.sources.get(&source).map_or(&[], Vec::as_slice)
    }

    /// Number of packets of `source` whose frame starts before `offset`.
    pub fn frames_before(&self, source: SourceId, offset: u64) -> usize {
        self.entries(source).partition_point(|entry| entry.offset < offset)
    }

    /// First frame of `source` captured at or after `time_us`.
    ///
    /// Capture times are not required to be monotonic, so this is a linear
    /// search for the first qualifying entry.
    pub fn frame_at_or_after(&self, source: SourceId, time_us: i64) -> Option<usize> {
        self.entries(source).iter().position(|entry| entry.time_us >= time_us)
    }

    /// Total indexed packets across all sources.
    pub fn total_packets(&self) -> usize {
        self.sources.values().map(Vec::len).sum()
    }

    /// Offset of the last indexed frame across all sources.
    pub fn last_offset(&self) -> Option<u64> {
        self.sources.values().filter_map(|entries| entries.last()).map(|e| e.offset).max()
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Offset and time arrays for the `STA` block, one inner array per source id.
    pub fn to_serializable(&self, num_sources: usize) -> (Vec<Vec<u64>>, Vec<Vec<i64>>) {
        let num_sources =
            num_sources.max(self.sources.keys().next_back().map_or(0, |last| last + 1));
        let mut offsets = vec![Vec::new(); num_sources];
        let mut times = vec![Vec::new(); num_sources];

        for (&source, entries) in &self.sources {
            offsets[source] = entries.iter().map(|e| e.offset).collect();
            times[source] = entries.iter().map(|e| e.time_us).collect();
        }

        (offsets, times)
    }

    /// Rebuild an index from a parsed `STA` block, validating its ordering.
    pub fn from_stats(stats: &SourceStats) -> Result<Self> {
        if !stats.is_consistent() {
            return Err(PacketStreamError::Index {
                details: format!(
                    "statistics block for {} sources has mismatched offset/time arrays",
                    stats.num_sources
                ),
            });
        }

        let mut index = Self::new();
        for (source, (offsets, times)) in
            stats.src_packet_index.iter().zip(&stats.src_packet_times).enumerate()
        {
            if offsets.is_empty() {
                continue;
            }
            let entries = index.sources.entry(source).or_default();
            entries.reserve(offsets.len());
            for (&offset, &time_us) in offsets.iter().zip(times) {
                if entries.last().is_some_and(|last| offset <= last.offset) {
                    return Err(PacketStreamError::Index {
                        details: format!(
                            "statistics block offsets for source {} are not increasing",
                            source
                        ),
                    });
                }
                entries.push(PacketIndexEntry { offset, time_us });
            }
        }

        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(offset: u64, time_us: i64) -> PacketIndexEntry {
        PacketIndexEntry { offset, time_us }
    }

    #[test]
    fn append_assigns_dense_frame_numbers() {
        let mut index = PacketIndex::new();
        assert_eq!(index.packet_count(0), None);

        assert_eq!(index.append(0, entry(100, 1)).unwrap(), 0);
        assert_eq!(index.append(1, entry(120, 1)).unwrap(), 0);
        assert_eq!(index.append(0, entry(140, 2)).unwrap(), 1);

        assert_eq!(index.packet_count(0), Some(2));
        assert_eq!(index.packet_count(1), Some(1));
        assert_eq!(index.position(0, 1), Some(140));
        assert!(index.has(1, 0));
        assert!(!index.has(1, 1));
        assert_eq!(index.total_packets(), 3);
        assert_eq!(index.last_offset(), Some(140));
    }

    #[test]
    fn gaps_and_conflicts_are_rejected() {
        let mut index = PacketIndex::new();
        index.add(0, 0, entry(10, 0)).unwrap();

        let gap = index.add(0, 2, entry(30, 0)).unwrap_err();
        assert!(matches!(gap, PacketStreamError::Index { .. }));

        let conflict = index.add(0, 0, entry(11, 0)).unwrap_err();
        assert!(matches!(conflict, PacketStreamError::Index { .. }));

        // Re-adding the identical entry is idempotent
        index.add(0, 0, entry(10, 0)).unwrap();

        let backwards = index.add(0, 1, entry(5, 0)).unwrap_err();
        assert!(matches!(backwards, PacketStreamError::Index { .. }));
        assert_eq!(index.packet_count(0), Some(1));
    }

    #[test]
    fn serializable_form_covers_unseen_sources() {
        let mut index = PacketIndex::new();
        index.append(2, entry(50, 7)).unwrap();

        let (offsets, times) = index.to_serializable(4);
        assert_eq!(offsets, vec![vec![], vec![], vec![50], vec![]]);
        assert_eq!(times, vec![vec![], vec![], vec![7], vec![]]);
    }

    #[test]
    fn time_lookup_and_offset_partition() {
        let mut index = PacketIndex::new();
        for (i, t) in [100, 200, 300].iter().enumerate() {
            index.append(0, entry(10 * (i as u64 + 1), *t)).unwrap();
        }

        assert_eq!(index.frame_at_or_after(0, 0), Some(0));
        assert_eq!(index.frame_at_or_after(0, 150), Some(1));
        assert_eq!(index.frame_at_or_after(0, 300), Some(2));
        assert_eq!(index.frame_at_or_after(0, 301), None);

        assert_eq!(index.frames_before(0, 10), 0);
        assert_eq!(index.frames_before(0, 25), 2);
        assert_eq!(index.frames_before(0, 1000), 3);
    }

    #[test]
    fn stats_with_unordered_offsets_are_rejected() {
        let stats = SourceStats {
            num_sources: 1,
            src_packet_index: vec![vec![40, 20]],
            src_packet_times: vec![vec![1, 2]],
        };
        assert!(PacketIndex::from_stats(&stats).is_err());

        let mismatched = SourceStats {
            num_sources: 1,
            src_packet_index: vec![vec![40]],
            src_packet_times: vec![vec![]],
        };
        assert!(PacketIndex::from_stats(&mismatched).is_err());
    }

    proptest! {
        #[test]
        fn stats_round_trip_preserves_index(
            layout in prop::collection::vec((0usize..4, 1u64..1000, any::<i64>()), 0..64)
        ) {
            let mut index = PacketIndex::new();
            let mut offset = 0u64;
            for (source, step, time_us) in layout {
                offset += step;
                index.append(source, entry(offset, time_us)).unwrap();
            }

            let stats = SourceStats::from_index(&index, 4);
            let restored = PacketIndex::from_stats(&stats).unwrap();

            for source in 0..4 {
                prop_assert_eq!(restored.entries(source), index.entries(source));
            }
        }
    }
}
