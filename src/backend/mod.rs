//! Platform MIDI backends.
//!
//! The engine talks to hardware through the small capability set in
//! [`MidiBackend`]; `midir` covers the per-OS work in the production
//! implementation, and [`MockBackend`] provides a recording stand-in for
//! tests and headless hosts.

use std::time::Instant;

use crossbeam_channel::Sender;

use crate::error::Result;

#[cfg(feature = "midir-backend")]
mod midir;
#[cfg(feature = "midir-backend")]
pub use self::midir::MidirBackend;

mod mock;
pub use mock::{MockBackend, SentMessage};

/// An event delivered from a backend to the input relay thread.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A message received from an opened input device.
    ///
    /// For system-exclusive messages `bytes` holds the body only (no frame
    /// bytes) and `sysex` is set; the relay prepends the leading 0xF0.
    Message {
        device: i32,
        bytes: Vec<u8>,
        sysex: bool,
        at: Instant,
    },
    /// Unblocks the relay thread during shutdown.
    Terminate,
}

/// An open output endpoint. Owned by the scheduler; dropping it closes the
/// device.
pub trait OutputConnection: Send {
    /// Send a complete short message (status byte included).
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Send a system-exclusive message given its body without the leading
    /// 0xF0; the backend adds frame bytes as needed.
    fn send_sysex(&mut self, body: &[u8]) -> Result<()>;
}

/// An open input endpoint. Dropping it closes the device and stops event
/// delivery.
pub trait InputConnection: Send {}

/// Capability set the engine needs from a platform MIDI driver.
pub trait MidiBackend: Send + Sync {
    fn output_devices(&self) -> Vec<String>;

    fn input_devices(&self) -> Vec<String>;

    /// Device number of the default output device, -1 if none.
    fn default_output_device(&self) -> i32 {
        if self.output_devices().is_empty() {
            -1
        } else {
            0
        }
    }

    /// Device number of the default input device, -1 if none.
    fn default_input_device(&self) -> i32 {
        if self.input_devices().is_empty() {
            -1
        } else {
            0
        }
    }

    fn open_output(&self, device: usize) -> Result<Box<dyn OutputConnection>>;

    /// Open an input device; received messages flow into `events` until the
    /// returned connection is dropped.
    fn open_input(&self, device: usize, events: Sender<DeviceEvent>)
        -> Result<Box<dyn InputConnection>>;
}
