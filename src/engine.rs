//! Engine facade: the entry points a host binding calls.
//!
//! `MidiIoEngine` owns the scheduler and input relay threads plus the two
//! mutex/condvar pairs they coordinate on. Engines are self-contained
//! values; tests run several of them side by side over mock backends.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::backend::{DeviceEvent, MidiBackend};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::input::{self, InputState, ReceivedMessage, SigintGuard};
use crate::message;
use crate::sched::{self, OutputState};
use crate::{DEV_DUMMY, DEV_LOOPBACK};

// Granularity at which a blocked receive notices a routed SIGINT.
const RECV_POLL: Duration = Duration::from_millis(100);

/// State shared between the facade and the worker threads.
pub(crate) struct Shared {
    pub(crate) backend: Arc<dyn MidiBackend>,
    pub(crate) clock: Clock,
    pub(crate) out: Mutex<OutputState>,
    pub(crate) out_cond: Condvar,
    pub(crate) input: Mutex<InputState>,
    pub(crate) input_cond: Condvar,
}

impl Shared {
    /// Tick position for a wall-clock millisecond reading. The only shared
    /// read is the output mutex; no lock is held beyond the conversion.
    pub(crate) fn ms_to_ticks(&self, ms: f64) -> f64 {
        self.out.lock().tempo.ms_to_ticks(ms)
    }

    pub(crate) fn push_input(&self, msg: ReceivedMessage) {
        let mut st = self.input.lock();
        st.fifo.push_back(msg);
        self.input_cond.notify_one();
    }
}

#[derive(Default)]
pub struct MidiIoEngineBuilder {
    backend: Option<Arc<dyn MidiBackend>>,
}

impl MidiIoEngineBuilder {
    /// Inject a backend instead of the default hardware one.
    pub fn backend(mut self, backend: Arc<dyn MidiBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<MidiIoEngine> {
        let backend = match self.backend {
            Some(backend) => backend,
            None => default_backend()?,
        };
        let shared = Arc::new(Shared {
            backend,
            clock: Clock::new(),
            out: Mutex::new(OutputState::new()),
            out_cond: Condvar::new(),
            input: Mutex::new(InputState::new()),
            input_cond: Condvar::new(),
        });

        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        let sched_shared = Arc::clone(&shared);
        let sched_thread = thread::Builder::new()
            .name("ritmo-midi-sched".to_string())
            .spawn(move || sched::run(sched_shared))
            .expect("failed to spawn MIDI scheduler thread");

        let input_shared = Arc::clone(&shared);
        let input_thread = thread::Builder::new()
            .name("ritmo-midi-input".to_string())
            .spawn(move || input::run(input_shared, events_rx))
            .expect("failed to spawn MIDI input thread");

        Ok(MidiIoEngine {
            shared,
            events_tx,
            sched_thread: Some(sched_thread),
            input_thread: Some(input_thread),
        })
    }
}

#[cfg(feature = "midir-backend")]
fn default_backend() -> Result<Arc<dyn MidiBackend>> {
    Ok(Arc::new(crate::backend::MidirBackend::new()))
}

#[cfg(not(feature = "midir-backend"))]
fn default_backend() -> Result<Arc<dyn MidiBackend>> {
    Err(Error::InvalidConfig(
        "no MIDI backend configured (enable `midir-backend` or inject one)".to_string(),
    ))
}

/// Realtime MIDI I/O engine.
///
/// Delivers queued messages to output devices at their scheduled tick
/// instants under a live tempo, relays input back tick-stamped, and
/// silences everything on [`stop`](Self::stop). Dropping the engine shuts
/// both worker threads down and closes every open device.
pub struct MidiIoEngine {
    shared: Arc<Shared>,
    events_tx: Sender<DeviceEvent>,
    sched_thread: Option<JoinHandle<()>>,
    input_thread: Option<JoinHandle<()>>,
}

impl MidiIoEngine {
    pub fn builder() -> MidiIoEngineBuilder {
        MidiIoEngineBuilder::default()
    }

    /// Engine over the default hardware backend.
    #[cfg(feature = "midir-backend")]
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    // ==================== Devices ====================

    pub fn output_devices(&self) -> Vec<String> {
        self.shared.backend.output_devices()
    }

    pub fn input_devices(&self) -> Vec<String> {
        self.shared.backend.input_devices()
    }

    /// Device number of the default output device, -1 if none exist.
    pub fn default_output_device(&self) -> i32 {
        self.shared.backend.default_output_device()
    }

    /// Device number of the default input device, -1 if none exist.
    pub fn default_input_device(&self) -> i32 {
        self.shared.backend.default_input_device()
    }

    /// First output device whose name contains `name` (case-insensitive).
    pub fn find_output_device(&self, name: &str) -> Option<i32> {
        let needle = name.to_lowercase();
        self.output_devices()
            .iter()
            .position(|n| n.to_lowercase().contains(&needle))
            .map(|i| i as i32)
    }

    /// First input device whose name contains `name` (case-insensitive).
    pub fn find_input_device(&self, name: &str) -> Option<i32> {
        let needle = name.to_lowercase();
        self.input_devices()
            .iter()
            .position(|n| n.to_lowercase().contains(&needle))
            .map(|i| i as i32)
    }

    /// Open an output device. The virtual devices (negative numbers) are
    /// always available and need no opening.
    pub fn open_output_device(&self, device: i32) -> Result<()> {
        if device < 0 {
            return Ok(());
        }
        let index = device as usize;
        if index >= self.shared.backend.output_devices().len() {
            return Err(Error::DeviceOpenFailed(format!(
                "no such output device {}",
                device
            )));
        }
        let mut st = self.shared.out.lock();
        if st.outputs.len() <= index {
            st.outputs.resize_with(index + 1, || None);
        }
        if st.outputs[index].is_none() {
            st.outputs[index] = Some(self.shared.backend.open_output(index)?);
        }
        Ok(())
    }

    pub fn close_output_device(&self, device: i32) {
        if device < 0 {
            return;
        }
        let mut st = self.shared.out.lock();
        if let Some(slot) = st.outputs.get_mut(device as usize) {
            let _ = slot.take();
        }
    }

    pub fn is_opened_output_device(&self, device: i32) -> bool {
        if device < 0 {
            return true;
        }
        self.shared.out.lock().is_open(device)
    }

    pub fn open_input_device(&self, device: i32) -> Result<()> {
        if device < 0 {
            return Ok(());
        }
        let index = device as usize;
        if index >= self.shared.backend.input_devices().len() {
            return Err(Error::DeviceOpenFailed(format!(
                "no such input device {}",
                device
            )));
        }
        let mut st = self.shared.input.lock();
        if st.inputs.len() <= index {
            st.inputs.resize_with(index + 1, || None);
        }
        if st.inputs[index].is_none() {
            st.inputs[index] = Some(
                self.shared
                    .backend
                    .open_input(index, self.events_tx.clone())?,
            );
        }
        Ok(())
    }

    /// Close an input device. Messages from it still waiting in the input
    /// queue are discarded, so `recv_ready` must be re-checked afterwards.
    pub fn close_input_device(&self, device: i32) {
        if device < 0 {
            return;
        }
        let mut st = self.shared.input.lock();
        if let Some(slot) = st.inputs.get_mut(device as usize) {
            let _ = slot.take();
        }
        st.fifo.retain(|m| m.device != device);
    }

    pub fn is_opened_input_device(&self, device: i32) -> bool {
        if device < 0 {
            return true;
        }
        let st = self.shared.input.lock();
        matches!(st.inputs.get(device as usize), Some(Some(_)))
    }

    // ==================== Output ====================

    /// Queue a message for delivery at `ticks`.
    ///
    /// Short messages must match the standard length table; 0xF0 (sysex,
    /// leading byte included) and 0xFF meta messages are variable length.
    /// The loopback device accepts any non-empty bytes. `track` is an
    /// opaque tag used as the cancel key.
    pub fn queue_message(&self, device: i32, ticks: f64, track: i32, msg: &[u8]) -> Result<()> {
        if msg.is_empty() || (device != DEV_LOOPBACK && !message::is_valid_outbound(msg)) {
            return Err(Error::InvalidMessage);
        }
        let mut st = self.shared.out.lock();
        if device >= 0 && !st.is_open(device) {
            return Err(Error::DeviceNotOpened(device));
        }
        // Signal only when the queue head moved; a later insertion never
        // needs to wake the timer.
        if st.enqueue(device, ticks, track, msg.to_vec()) {
            self.shared.out_cond.notify_one();
        }
        Ok(())
    }

    /// Drop queued messages for `device` whose track matches `track`
    /// (`ALL_TRACKS` matches every track) and emit note-offs for whatever
    /// is sounding under that key.
    pub fn cancel_messages(&self, device: i32, track: i32) {
        let mut st = self.shared.out.lock();
        st.cancel_requests.push((device, track));
        self.shared.out_cond.notify_one();
    }

    /// Silence all sounding notes and pedals, drop every queued message,
    /// and interrupt a blocked `recv_message`.
    pub fn stop(&self) {
        {
            let mut st = self.shared.out.lock();
            st.stop_requested = true;
            self.shared.out_cond.notify_one();
        }
        self.interrupt_recv_message();
    }

    /// Enable or disable note retriggering. Takes effect after the stop
    /// this request implies.
    pub fn set_retrigger(&self, enable: bool) {
        let mut st = self.shared.out.lock();
        st.stop_requested = true;
        st.retrigger_change = Some(enable);
        self.shared.out_cond.notify_one();
    }

    // ==================== Time ====================

    /// Current position of the engine clock, in ticks.
    pub fn current_time(&self) -> f64 {
        let now_ms = self.shared.clock.now_ms();
        self.shared.out.lock().tempo.ms_to_ticks(now_ms)
    }

    /// Current tempo in BPM.
    pub fn current_tempo(&self) -> f64 {
        self.shared.out.lock().tempo.bpm()
    }

    pub fn current_tempo_scale(&self) -> f64 {
        self.shared.out.lock().tempo.scale()
    }

    /// Change the tempo scale. Negative values clamp to 0, which freezes
    /// playback. Applied by the scheduler at its next wake so the mapping
    /// re-anchors atomically.
    pub fn set_tempo_scale(&self, scale: f64) {
        let mut st = self.shared.out.lock();
        st.pending_scale = Some(scale.max(0.0));
        self.shared.out_cond.notify_one();
    }

    /// Change the tempo by queueing a tempo meta-event at the current time.
    pub fn set_tempo(&self, bpm: f64) -> Result<()> {
        self.queue_message(DEV_DUMMY, self.current_time(), 0, &message::tempo_meta(bpm))
    }

    // ==================== Input ====================

    /// Whether `recv_message` would return without blocking.
    pub fn recv_ready(&self) -> bool {
        !self.shared.input.lock().fifo.is_empty()
    }

    /// Take the next input message, blocking until one arrives.
    ///
    /// A concurrent [`interrupt_recv_message`](Self::interrupt_recv_message)
    /// or a SIGINT delivered while blocked cancels the wait; the result is
    /// then an empty message for the dummy device. SIGINT routing is
    /// installed for the duration of the call only.
    pub fn recv_message(&self) -> ReceivedMessage {
        let sigint = SigintGuard::install();
        let mut st = self.shared.input.lock();
        st.receiving = true;
        while st.fifo.is_empty() && st.receiving {
            if sigint.take() {
                st.fifo.clear();
                st.receiving = false;
                break;
            }
            self.shared.input_cond.wait_for(&mut st, RECV_POLL);
        }
        if st.receiving {
            st.receiving = false;
            match st.fifo.pop_front() {
                Some(msg) => msg,
                None => interrupted_message(),
            }
        } else {
            interrupted_message()
        }
    }

    /// Cancel a blocked `recv_message` and discard pending input.
    pub fn interrupt_recv_message(&self) {
        let mut st = self.shared.input.lock();
        st.fifo.clear();
        st.receiving = false;
        self.shared.input_cond.notify_one();
    }
}

fn interrupted_message() -> ReceivedMessage {
    ReceivedMessage {
        device: DEV_DUMMY,
        ticks: 0.0,
        track: 0,
        message: Vec::new(),
    }
}

impl Drop for MidiIoEngine {
    fn drop(&mut self) {
        {
            let mut st = self.shared.out.lock();
            st.shutdown = true;
            self.shared.out_cond.notify_one();
        }
        let _ = self.events_tx.send(DeviceEvent::Terminate);
        if let Some(handle) = self.sched_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.input_thread.take() {
            let _ = handle.join();
        }
        let mut st = self.shared.input.lock();
        st.inputs.clear();
        st.fifo.clear();
        debug!("MIDI engine shut down");
    }
}
