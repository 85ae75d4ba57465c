//! Output scheduler: a min-heap of time-stamped messages drained by a
//! dedicated timer thread.
//!
//! The thread sleeps on the output condition variable until the heap head
//! is due, converts ticks to wall-clock milliseconds through the tempo map,
//! and dispatches everything due at that tick. All external mutation
//! (queue, cancel, stop, rescale, retrigger toggle, shutdown) is posted as
//! flags under the output mutex and signalled on the same condition
//! variable.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::OutputConnection;
use crate::engine::Shared;
use crate::input::ReceivedMessage;
use crate::message::{
    C_ALL_NOTES_OFF, C_ALL_SOUND_OFF, C_SUSTAIN, META_TEMPO, STATUS_META, STATUS_SYSEX,
};
use crate::note_map::{NoteMap, NOTE_SUSTAIN};
use crate::tempo::TempoMap;
use crate::{ALL_TRACKS, DEV_LOOPBACK};

/// One outbound message awaiting dispatch.
#[derive(Debug, Clone)]
pub(crate) struct OutputEvent {
    pub(crate) device: i32,
    pub(crate) ticks: f64,
    pub(crate) seq: u32,
    pub(crate) track: i32,
    pub(crate) message: Vec<u8>,
}

// Ordered by (ticks, seq). `seq` wraps mod 2^32; comparing the wrapped
// difference as signed keeps the live window ordered, so same-tick events
// stay FIFO. Tick times are never NaN, which makes total_cmp agree with the
// numeric order and sorts +inf last.
impl Ord for OutputEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.ticks.total_cmp(&other.ticks) {
            Ordering::Equal => (self.seq.wrapping_sub(other.seq) as i32).cmp(&0),
            ordering => ordering,
        }
    }
}

impl PartialOrd for OutputEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OutputEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OutputEvent {}

/// Everything guarded by the output mutex.
pub(crate) struct OutputState {
    pub(crate) heap: BinaryHeap<Reverse<OutputEvent>>,
    next_seq: u32,
    pub(crate) outputs: Vec<Option<Box<dyn OutputConnection>>>,
    pub(crate) tempo: TempoMap,
    pub(crate) shutdown: bool,
    pub(crate) stop_requested: bool,
    pub(crate) pending_scale: Option<f64>,
    pub(crate) cancel_requests: Vec<(i32, i32)>,
    /// Applied only after the next stop completes.
    pub(crate) retrigger_change: Option<bool>,
    pub(crate) retrigger: bool,
    pub(crate) retrigger_map: NoteMap,
    pub(crate) cancel_map: NoteMap,
}

impl OutputState {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            outputs: Vec::new(),
            tempo: TempoMap::new(),
            shutdown: false,
            stop_requested: false,
            pending_scale: None,
            cancel_requests: Vec::new(),
            retrigger_change: None,
            retrigger: true,
            retrigger_map: NoteMap::new(),
            cancel_map: NoteMap::new(),
        }
    }

    pub(crate) fn is_open(&self, device: i32) -> bool {
        device >= 0
            && (device as usize) < self.outputs.len()
            && self.outputs[device as usize].is_some()
    }

    /// Push an event; returns true when the heap head's tick time changed
    /// (only then does the timer thread need a wake-up).
    pub(crate) fn enqueue(&mut self, device: i32, ticks: f64, track: i32, message: Vec<u8>) -> bool {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let prev_head = self.heap.peek().map(|Reverse(e)| e.ticks);
        self.heap.push(Reverse(OutputEvent {
            device,
            ticks,
            seq,
            track,
            message,
        }));
        let new_head = self.heap.peek().map(|Reverse(e)| e.ticks);
        prev_head != new_head
    }
}

/// Timer thread body. Holds the output mutex except while waiting.
pub(crate) fn run(shared: Arc<Shared>) {
    let mut st = shared.out.lock();
    loop {
        // Wait until the head of the queue is due or a request arrives. A
        // zero effective tempo or an infinite tick time means "wait until
        // something changes".
        let mut timed_out = false;
        let mut batch_ticks = 0.0;
        let mut batch_ms = 0.0;
        match st.heap.peek().map(|Reverse(e)| e.ticks) {
            None => shared.out_cond.wait(&mut st),
            Some(head_ticks) => {
                if st.tempo.effective() <= 0.0 || head_ticks == f64::INFINITY {
                    shared.out_cond.wait(&mut st);
                } else {
                    batch_ticks = if head_ticks == f64::NEG_INFINITY {
                        0.0
                    } else {
                        head_ticks
                    };
                    batch_ms = st.tempo.ticks_to_ms(batch_ticks);
                    let deadline = shared.clock.instant_at_ms(batch_ms);
                    let result = shared.out_cond.wait_until(&mut st, deadline);
                    // Never report a timeout before the clock actually
                    // reaches the target.
                    timed_out = result.timed_out() && shared.clock.now_ms() >= batch_ms;
                }
            }
        }

        if st.shutdown {
            break;
        }
        if let Some(scale) = st.pending_scale.take() {
            let now_ms = shared.clock.now_ms();
            st.tempo.rescale(now_ms, scale);
        }
        if st.stop_requested {
            stop_all(&mut st);
            st.stop_requested = false;
            if let Some(enable) = st.retrigger_change.take() {
                st.retrigger = enable;
            }
        }
        if !st.cancel_requests.is_empty() {
            let requests = std::mem::take(&mut st.cancel_requests);
            for (device, track) in requests {
                cancel_messages(&mut st, device, track);
            }
        }
        if !timed_out {
            // Woken by a request or an earlier event; recompute the wait.
            continue;
        }

        while st
            .heap
            .peek()
            .map_or(false, |Reverse(e)| e.ticks <= batch_ticks)
        {
            if let Some(Reverse(event)) = st.heap.pop() {
                dispatch(&shared, &mut st, event, batch_ms, batch_ticks);
            }
        }
    }

    for slot in st.outputs.iter_mut() {
        let _ = slot.take();
    }
    debug!("MIDI scheduler terminated");
}

/// Deliver one due event. `at_ms`/`at_ticks` are its scheduled position
/// (the wait target), which anchors tempo changes.
fn dispatch(shared: &Shared, st: &mut OutputState, event: OutputEvent, at_ms: f64, at_ticks: f64) {
    if event.device == DEV_LOOPBACK {
        shared.push_input(ReceivedMessage {
            device: event.device,
            ticks: event.ticks,
            track: event.track,
            message: event.message,
        });
        return;
    }
    let status = event.message[0];
    if status != STATUS_META {
        if !st.is_open(event.device) {
            return;
        }
        if status == STATUS_SYSEX {
            if let Some(Some(conn)) = st.outputs.get_mut(event.device as usize) {
                if let Err(e) = conn.send_sysex(&event.message[1..]) {
                    warn!("Sysex send failed on device {}: {}", event.device, e);
                }
            }
        } else {
            send_short(st, event.device, event.track, &event.message);
        }
    } else if event.message.len() >= 5 && event.message[1] == META_TEMPO {
        let usecs_per_beat = (u32::from(event.message[2]) << 16)
            | (u32::from(event.message[3]) << 8)
            | u32::from(event.message[4]);
        let bpm = 60_000_000.0 / usecs_per_beat as f64;
        st.tempo.set_bpm(bpm, at_ms, at_ticks);
        debug!("Tempo change to {:.3} BPM at tick {}", bpm, at_ticks);
    }
    // Other meta-events are ignored.
}

/// Send a short message to an open device with retrigger and cancel
/// bookkeeping.
fn send_short(st: &mut OutputState, device: i32, track: i32, bytes: &[u8]) {
    let OutputState {
        outputs,
        retrigger,
        retrigger_map,
        cancel_map,
        ..
    } = st;
    let Some(Some(conn)) = outputs.get_mut(device as usize) else {
        return;
    };

    let channel = bytes[0] & 0x0F;
    let status = bytes[0] & 0xF0;
    let mut suppress = false;

    if status == 0x80 || (status == 0x90 && bytes[2] == 0) {
        // Note-off: with another logical voice still piled on this pitch,
        // only the pile shrinks and the output is held back.
        if *retrigger && retrigger_map.pop(device, 0, channel, bytes[1] as i16) >= 1 {
            suppress = true;
        }
        cancel_map.pop(device, track, channel, bytes[1] as i16);
    } else if status == 0x90 {
        // Note-on: an already-sounding pitch gets a synthetic off first so
        // the note retriggers instead of layering.
        if *retrigger && retrigger_map.push(device, 0, channel, bytes[1] as i16) >= 1 {
            let mut off = bytes.to_vec();
            off[2] = 0;
            let _ = conn.send(&off);
        }
        cancel_map.push(device, track, channel, bytes[1] as i16);
    } else if status == 0xB0 && (bytes[1] == C_ALL_NOTES_OFF || bytes[1] == C_ALL_SOUND_OFF) {
        if *retrigger {
            retrigger_map.clear_prefix(device, 0, channel);
        }
        // The cancel map is kept: some synths ignore these controllers, and
        // cancel must still be able to emit explicit note-offs.
    } else if status == 0xB0 && bytes[1] == C_SUSTAIN {
        if bytes[2] == 0 {
            cancel_map.pop(device, track, channel, NOTE_SUSTAIN);
        } else {
            cancel_map.set(device, track, channel, NOTE_SUSTAIN, 1);
        }
    }

    if !suppress {
        if let Err(e) = conn.send(bytes) {
            warn!("MIDI send failed on device {}: {}", device, e);
        }
    }
}

/// Emit note-offs (and sustain-off) for every entry the cancel map holds
/// for `device`/`track`, erasing them as it goes.
fn flush_held_notes(st: &mut OutputState, device: i32, track: i32) {
    let OutputState {
        outputs,
        retrigger,
        retrigger_map,
        cancel_map,
        ..
    } = st;
    let Some(Some(conn)) = outputs.get_mut(device as usize) else {
        return;
    };
    cancel_map.clear_and_call(device, track, |channel, note, count| {
        if note == NOTE_SUSTAIN {
            let _ = conn.send(&[0xB0 | channel, C_SUSTAIN, 0]);
        } else {
            for _ in 0..count {
                let _ = conn.send(&[0x90 | channel, note as u8, 0]);
                if *retrigger {
                    retrigger_map.pop(device, 0, channel, note);
                }
            }
        }
    });
}

/// Silence everything: flush held notes per device, broadcast the
/// all-notes-off / sustain-off / all-sound-off controllers on every
/// channel, then drop the queue and both note maps.
fn stop_all(st: &mut OutputState) {
    for device in 0..st.outputs.len() as i32 {
        if !st.is_open(device) {
            continue;
        }
        flush_held_notes(st, device, ALL_TRACKS);
        if let Some(Some(conn)) = st.outputs.get_mut(device as usize) {
            for channel in 0..16u8 {
                let _ = conn.send(&[0xB0 | channel, C_ALL_NOTES_OFF, 0]);
                let _ = conn.send(&[0xB0 | channel, C_SUSTAIN, 0]);
                let _ = conn.send(&[0xB0 | channel, C_ALL_SOUND_OFF, 0]);
            }
        }
    }

    st.heap.clear();
    st.retrigger_map.clear();
    st.cancel_map.clear();
}

/// Drop every queued event for `device`/`track` (track `ALL_TRACKS` matches
/// all), then emit note-offs for whatever the cancel map holds there.
fn cancel_messages(st: &mut OutputState, device: i32, track: i32) {
    // One O(n) partition pass plus re-heapify of the kept events.
    st.heap
        .retain(|Reverse(e)| !(e.device == device && (track == ALL_TRACKS || e.track == track)));

    if st.is_open(device) {
        flush_held_notes(st, device, track);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ticks: f64, seq: u32) -> OutputEvent {
        OutputEvent {
            device: 0,
            ticks,
            seq,
            track: 0,
            message: vec![0x90, 60, 100],
        }
    }

    #[test]
    fn test_heap_orders_by_time_then_seq() {
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(event(100.0, 2)));
        heap.push(Reverse(event(50.0, 3)));
        heap.push(Reverse(event(100.0, 1)));
        heap.push(Reverse(event(f64::INFINITY, 0)));

        let order: Vec<(f64, u32)> = std::iter::from_fn(|| heap.pop())
            .map(|Reverse(e)| (e.ticks, e.seq))
            .collect();
        assert_eq!(
            order,
            vec![(50.0, 3), (100.0, 1), (100.0, 2), (f64::INFINITY, 0)]
        );
    }

    #[test]
    fn test_seq_wraparound_stays_fifo() {
        // Two same-tick events straddling the u32 wrap point: the earlier
        // (pre-wrap) event must still sort first.
        let older = event(10.0, u32::MAX);
        let newer = event(10.0, 0);
        assert!(older < newer);
        assert!((newer.seq.wrapping_sub(older.seq) as i32) > 0);
    }

    #[test]
    fn test_enqueue_reports_head_change() {
        let mut st = OutputState::new();
        assert!(st.enqueue(0, 100.0, 0, vec![0x90, 60, 100]));
        // A later event leaves the head alone.
        assert!(!st.enqueue(0, 200.0, 0, vec![0x90, 61, 100]));
        // An earlier event moves the head.
        assert!(st.enqueue(0, 50.0, 0, vec![0x90, 62, 100]));
        // Same-tick-as-head events do not change the head's time.
        assert!(!st.enqueue(0, 50.0, 0, vec![0x90, 63, 100]));
    }

    #[test]
    fn test_cancel_partitions_heap() {
        let mut st = OutputState::new();
        st.enqueue(0, 100.0, 7, vec![0x90, 60, 100]);
        st.enqueue(0, 200.0, 3, vec![0x90, 61, 100]);
        st.enqueue(1, 300.0, 7, vec![0x90, 62, 100]);
        st.enqueue(0, 400.0, 7, vec![0x90, 63, 100]);

        cancel_messages(&mut st, 0, 7);
        let remaining: Vec<(i32, i32)> = st
            .heap
            .iter()
            .map(|Reverse(e)| (e.device, e.track))
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&(0, 3)));
        assert!(remaining.contains(&(1, 7)));

        cancel_messages(&mut st, 0, ALL_TRACKS);
        assert_eq!(st.heap.len(), 1);
    }

    #[test]
    fn test_stop_all_clears_queue_and_maps() {
        let mut st = OutputState::new();
        st.enqueue(0, 100.0, 0, vec![0x90, 60, 100]);
        st.retrigger_map.push(0, 0, 0, 60);
        st.cancel_map.push(0, 0, 0, 60);

        stop_all(&mut st);
        assert!(st.heap.is_empty());
        assert!(st.retrigger_map.is_empty());
        assert!(st.cancel_map.is_empty());
    }
}
