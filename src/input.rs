//! Input relay: device events are tick-stamped and queued for the blocking
//! consumer.
//!
//! The relay thread drains the backend's event channel, converts the
//! platform timestamp into ticks through the tempo map, and appends to the
//! input FIFO. `recv_message` blocks on the input condition variable until
//! a message arrives or the wait is interrupted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::debug;

use crate::backend::{DeviceEvent, InputConnection};
use crate::engine::Shared;
use crate::message::STATUS_SYSEX;

/// A message taken from the input queue.
///
/// `track` is 0 for device-originated messages; loopback messages keep the
/// track they were queued with. Sysex messages include the leading 0xF0.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub device: i32,
    pub ticks: f64,
    pub track: i32,
    pub message: Vec<u8>,
}

/// Everything guarded by the input mutex.
pub(crate) struct InputState {
    pub(crate) fifo: VecDeque<ReceivedMessage>,
    /// Cleared by `interrupt` to cancel a blocked `recv_message`.
    pub(crate) receiving: bool,
    pub(crate) inputs: Vec<Option<Box<dyn InputConnection>>>,
}

impl InputState {
    pub(crate) fn new() -> Self {
        Self {
            fifo: VecDeque::new(),
            receiving: false,
            inputs: Vec::new(),
        }
    }
}

/// Relay thread body.
pub(crate) fn run(shared: Arc<Shared>, events: Receiver<DeviceEvent>) {
    loop {
        match events.recv() {
            Ok(DeviceEvent::Message {
                device,
                mut bytes,
                sysex,
                at,
            }) => {
                let stamp_ms = shared.clock.ms_at(at);
                let ticks = shared.ms_to_ticks(stamp_ms);
                if sysex {
                    bytes.insert(0, STATUS_SYSEX);
                }
                shared.push_input(ReceivedMessage {
                    device,
                    ticks,
                    track: 0,
                    message: bytes,
                });
            }
            Ok(DeviceEvent::Terminate) | Err(_) => break,
        }
    }
    debug!("MIDI input relay terminated");
}

/// Routes SIGINT into an interrupt flag for the duration of a blocking
/// receive; the handler registration is removed again on drop.
pub(crate) struct SigintGuard {
    flag: Arc<AtomicBool>,
    id: Option<signal_hook::SigId>,
}

impl SigintGuard {
    pub(crate) fn install() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        let id = match signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))
        {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("SIGINT handler registration failed: {}", e);
                None
            }
        };
        Self { flag, id }
    }

    /// Consume a pending interrupt, at most once per delivery.
    pub(crate) fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}

impl Drop for SigintGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            signal_hook::low_level::unregister(id);
        }
    }
}
