//! Realtime MIDI I/O engine for the Ritmo music programming system.
//!
//! Accepts tick-stamped MIDI messages, delivers them to output devices at
//! the right wall-clock instants under a live tempo and tempo scale, and
//! relays incoming messages back tick-stamped in the same time base. A
//! safe stop silences every sounding note and pedal on demand, and the
//! retrigger policy keeps the audible voice count per pitch at most one.
//!
//! ## Quick Start
//!
//! ```ignore
//! use ritmo_midi_io::MidiIoEngine;
//!
//! let engine = MidiIoEngine::new()?;
//! engine.open_output_device(0)?;
//!
//! // Note on at tick 0, note off a beat later (1 tick = 1 ms at the
//! // default tempo).
//! engine.queue_message(0, 0.0, 0, &[0x90, 60, 100])?;
//! engine.queue_message(0, 480.0, 0, &[0x80, 60, 0])?;
//!
//! // Silence everything.
//! engine.stop();
//! ```
//!
//! Timing is millisecond-class, bounded by the OS timer resolution; the
//! engine does not aim for sample accuracy.

pub mod error;
pub use error::{Error, Result};

pub mod backend;
pub use backend::{DeviceEvent, InputConnection, MidiBackend, MockBackend, OutputConnection,
    SentMessage};

#[cfg(feature = "midir-backend")]
pub use backend::MidirBackend;

pub mod message;

mod clock;
mod engine;
mod input;
mod note_map;
mod sched;
mod tempo;

pub use engine::{MidiIoEngine, MidiIoEngineBuilder};
pub use input::ReceivedMessage;

/// Virtual output device that accepts and silently drops every message.
pub const DEV_DUMMY: i32 = -1;

/// Virtual device whose sends reappear as input at their scheduled instant.
pub const DEV_LOOPBACK: i32 = -2;

/// Track wildcard for [`MidiIoEngine::cancel_messages`].
pub const ALL_TRACKS: i32 = -1;
