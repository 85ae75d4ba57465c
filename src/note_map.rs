//! Ordered multiset of sounding notes with pile counts.
//!
//! Keys are `(device, track, channel, note)` under lexicographic order, so
//! every prefix maps to a contiguous key range. The value is the number of
//! still-open logical voices at that key; an entry exists iff its count is
//! positive.

use std::collections::BTreeMap;

/// Reserved note number meaning "sustain pedal held".
pub(crate) const NOTE_SUSTAIN: i16 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct NoteKey {
    device: i32,
    track: i32,
    channel: u8,
    note: i16,
}

#[derive(Debug, Default)]
pub(crate) struct NoteMap {
    map: BTreeMap<NoteKey, u32>,
}

impl NoteMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Increment the pile at the key, returning the pre-increment count.
    pub(crate) fn push(&mut self, device: i32, track: i32, channel: u8, note: i16) -> u32 {
        let count = self
            .map
            .entry(NoteKey {
                device,
                track,
                channel,
                note,
            })
            .or_insert(0);
        let prior = *count;
        *count += 1;
        prior
    }

    /// Insert-only: sets the count if the key is absent, leaves it otherwise.
    pub(crate) fn set(&mut self, device: i32, track: i32, channel: u8, note: i16, count: u32) {
        self.map
            .entry(NoteKey {
                device,
                track,
                channel,
                note,
            })
            .or_insert(count);
    }

    /// Decrement the pile at the key, erasing it at zero. Returns the new
    /// count; popping an absent key is a no-op returning 0.
    pub(crate) fn pop(&mut self, device: i32, track: i32, channel: u8, note: i16) -> u32 {
        let key = NoteKey {
            device,
            track,
            channel,
            note,
        };
        match self.map.get_mut(&key) {
            Some(count) => {
                *count -= 1;
                let remaining = *count;
                if remaining == 0 {
                    self.map.remove(&key);
                }
                remaining
            }
            None => 0,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }

    /// Erase every entry whose `(device, track, channel)` equals the prefix.
    pub(crate) fn clear_prefix(&mut self, device: i32, track: i32, channel: u8) {
        let lo = NoteKey {
            device,
            track,
            channel,
            note: i16::MIN,
        };
        let hi = NoteKey {
            device,
            track,
            channel,
            note: i16::MAX,
        };
        let keys: Vec<NoteKey> = self.map.range(lo..=hi).map(|(k, _)| *k).collect();
        for key in keys {
            self.map.remove(&key);
        }
    }

    /// Remove every entry for `device` (restricted to `track` unless it is
    /// `ALL_TRACKS`), invoking `f(channel, note, count)` for each in key
    /// order before erasure.
    pub(crate) fn clear_and_call(
        &mut self,
        device: i32,
        track: i32,
        mut f: impl FnMut(u8, i16, u32),
    ) {
        let (lo_track, hi_track) = if track == crate::ALL_TRACKS {
            (i32::MIN, i32::MAX)
        } else {
            (track, track)
        };
        let lo = NoteKey {
            device,
            track: lo_track,
            channel: u8::MIN,
            note: i16::MIN,
        };
        let hi = NoteKey {
            device,
            track: hi_track,
            channel: u8::MAX,
            note: i16::MAX,
        };
        let drained: Vec<(NoteKey, u32)> =
            self.map.range(lo..=hi).map(|(k, c)| (*k, *c)).collect();
        for (key, count) in drained {
            f(key.channel, key.note, count);
            self.map.remove(&key);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ALL_TRACKS;

    #[test]
    fn test_push_pop_piles() {
        let mut map = NoteMap::new();
        assert_eq!(map.push(0, 0, 0, 60), 0);
        assert_eq!(map.push(0, 0, 0, 60), 1);
        assert_eq!(map.pop(0, 0, 0, 60), 1);
        assert!(!map.is_empty());
        assert_eq!(map.pop(0, 0, 0, 60), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn test_pop_absent_is_noop() {
        let mut map = NoteMap::new();
        assert_eq!(map.pop(0, 0, 0, 60), 0);
        assert_eq!(map.pop(0, 0, 0, 60), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn test_set_is_insert_only() {
        let mut map = NoteMap::new();
        map.set(0, 0, 0, NOTE_SUSTAIN, 1);
        map.set(0, 0, 0, NOTE_SUSTAIN, 7);
        assert_eq!(map.pop(0, 0, 0, NOTE_SUSTAIN), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn test_clear_prefix_is_range_erase() {
        let mut map = NoteMap::new();
        map.push(0, 0, 0, 60);
        map.push(0, 0, 0, 64);
        map.push(0, 0, 1, 60);
        map.push(1, 0, 0, 60);
        map.clear_prefix(0, 0, 0);
        assert_eq!(map.len(), 2);
        assert_eq!(map.pop(0, 0, 1, 60), 0);
        assert_eq!(map.pop(1, 0, 0, 60), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn test_clear_and_call_single_track() {
        let mut map = NoteMap::new();
        map.push(0, 7, 0, 64);
        map.push(0, 7, 0, 60);
        map.push(0, 7, 0, 60);
        map.push(0, 3, 0, 62);
        map.push(1, 7, 0, 61);

        let mut seen = Vec::new();
        map.clear_and_call(0, 7, |ch, n, count| seen.push((ch, n, count)));
        // Entries come out in key order: channel then note ascending.
        assert_eq!(seen, vec![(0, 60, 2), (0, 64, 1)]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_clear_and_call_all_tracks() {
        let mut map = NoteMap::new();
        map.push(0, 1, 2, 60);
        map.push(0, 5, 0, 61);
        map.set(0, 5, 0, NOTE_SUSTAIN, 1);
        map.push(2, 0, 0, 62);

        let mut seen = Vec::new();
        map.clear_and_call(0, ALL_TRACKS, |ch, n, count| seen.push((ch, n, count)));
        assert_eq!(seen, vec![(2, 60, 1), (0, NOTE_SUSTAIN, 1), (0, 61, 1)]);
        assert_eq!(map.len(), 1);
    }
}
