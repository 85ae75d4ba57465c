//! Recording backend for tests and headless hosts.
//!
//! Sends are appended to a shared log with a millisecond timestamp;
//! incoming messages are injected programmatically per device.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use super::{DeviceEvent, InputConnection, MidiBackend, OutputConnection};
use crate::error::{Error, Result};

/// One message delivered to a mock output device.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub device: usize,
    /// For sysex sends this is the body without frame bytes.
    pub bytes: Vec<u8>,
    pub sysex: bool,
    /// Milliseconds since the backend was created.
    pub at_ms: f64,
}

#[derive(Clone)]
pub struct MockBackend {
    output_names: Vec<String>,
    input_names: Vec<String>,
    started: Instant,
    log: Arc<Mutex<Vec<SentMessage>>>,
    taps: Arc<Mutex<HashMap<i32, Sender<DeviceEvent>>>>,
}

impl MockBackend {
    pub fn new(num_outputs: usize, num_inputs: usize) -> Self {
        Self {
            output_names: (0..num_outputs).map(|i| format!("Mock Out {}", i)).collect(),
            input_names: (0..num_inputs).map(|i| format!("Mock In {}", i)).collect(),
            started: Instant::now(),
            log: Arc::new(Mutex::new(Vec::new())),
            taps: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_names(output_names: Vec<String>, input_names: Vec<String>) -> Self {
        Self {
            output_names,
            input_names,
            started: Instant::now(),
            log: Arc::new(Mutex::new(Vec::new())),
            taps: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Snapshot of everything sent so far, in send order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.log.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.log.lock().clear();
    }

    /// Deliver a message as if it arrived from an opened input device.
    /// Returns false if the device is not open.
    pub fn inject_input(&self, device: i32, bytes: Vec<u8>, sysex: bool) -> bool {
        let taps = self.taps.lock();
        match taps.get(&device) {
            Some(events) => events
                .send(DeviceEvent::Message {
                    device,
                    bytes,
                    sysex,
                    at: Instant::now(),
                })
                .is_ok(),
            None => false,
        }
    }
}

impl MidiBackend for MockBackend {
    fn output_devices(&self) -> Vec<String> {
        self.output_names.clone()
    }

    fn input_devices(&self) -> Vec<String> {
        self.input_names.clone()
    }

    fn open_output(&self, device: usize) -> Result<Box<dyn OutputConnection>> {
        if device >= self.output_names.len() {
            return Err(Error::DeviceOpenFailed(format!(
                "output device {} not found",
                device
            )));
        }
        Ok(Box::new(MockOutputConnection {
            device,
            started: self.started,
            log: Arc::clone(&self.log),
        }))
    }

    fn open_input(
        &self,
        device: usize,
        events: Sender<DeviceEvent>,
    ) -> Result<Box<dyn InputConnection>> {
        if device >= self.input_names.len() {
            return Err(Error::DeviceOpenFailed(format!(
                "input device {} not found",
                device
            )));
        }
        self.taps.lock().insert(device as i32, events);
        Ok(Box::new(MockInputConnection {
            device: device as i32,
            taps: Arc::clone(&self.taps),
        }))
    }
}

struct MockOutputConnection {
    device: usize,
    started: Instant,
    log: Arc<Mutex<Vec<SentMessage>>>,
}

impl MockOutputConnection {
    fn record(&self, bytes: &[u8], sysex: bool) {
        self.log.lock().push(SentMessage {
            device: self.device,
            bytes: bytes.to_vec(),
            sysex,
            at_ms: self.started.elapsed().as_secs_f64() * 1000.0,
        });
    }
}

impl OutputConnection for MockOutputConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.record(bytes, false);
        Ok(())
    }

    fn send_sysex(&mut self, body: &[u8]) -> Result<()> {
        self.record(body, true);
        Ok(())
    }
}

struct MockInputConnection {
    device: i32,
    taps: Arc<Mutex<HashMap<i32, Sender<DeviceEvent>>>>,
}

impl InputConnection for MockInputConnection {}

impl Drop for MockInputConnection {
    fn drop(&mut self) {
        self.taps.lock().remove(&self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_record() {
        let backend = MockBackend::new(2, 0);
        let mut conn = backend.open_output(1).unwrap();
        conn.send(&[0x90, 60, 100]).unwrap();
        conn.send_sysex(&[1, 2, 3]).unwrap();

        let sent = backend.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].device, 1);
        assert_eq!(sent[0].bytes, vec![0x90, 60, 100]);
        assert!(!sent[0].sysex);
        assert!(sent[1].sysex);
    }

    #[test]
    fn test_open_out_of_range() {
        let backend = MockBackend::new(1, 1);
        assert!(backend.open_output(1).is_err());
        let (tx, _rx) = crossbeam_channel::unbounded();
        assert!(backend.open_input(3, tx).is_err());
    }

    #[test]
    fn test_inject_requires_open_device() {
        let backend = MockBackend::new(0, 1);
        assert!(!backend.inject_input(0, vec![0x90, 60, 100], false));

        let (tx, rx) = crossbeam_channel::unbounded();
        let conn = backend.open_input(0, tx).unwrap();
        assert!(backend.inject_input(0, vec![0x90, 60, 100], false));
        assert!(matches!(
            rx.try_recv(),
            Ok(DeviceEvent::Message { device: 0, .. })
        ));

        // Dropping the connection unregisters the tap.
        drop(conn);
        assert!(!backend.inject_input(0, vec![0x80, 60, 0], false));
    }
}
