//! Hardware MIDI backend via midir.

use std::time::Instant;

use crossbeam_channel::Sender;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::{debug, warn};

use super::{DeviceEvent, InputConnection, MidiBackend, OutputConnection};
use crate::error::{Error, Result};

const CLIENT_NAME: &str = "ritmo-midi-io";

pub struct MidirBackend;

impl MidirBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiBackend for MidirBackend {
    fn output_devices(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(output) = MidiOutput::new(CLIENT_NAME) {
            for (index, port) in output.ports().iter().enumerate() {
                names.push(
                    output
                        .port_name(port)
                        .unwrap_or_else(|_| format!("Unknown Device {}", index)),
                );
            }
        }
        names
    }

    fn input_devices(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(input) = MidiInput::new(CLIENT_NAME) {
            for (index, port) in input.ports().iter().enumerate() {
                names.push(
                    input
                        .port_name(port)
                        .unwrap_or_else(|_| format!("Unknown Device {}", index)),
                );
            }
        }
        names
    }

    fn open_output(&self, device: usize) -> Result<Box<dyn OutputConnection>> {
        let output = MidiOutput::new(CLIENT_NAME)?;
        let ports = output.ports();
        let port = ports
            .get(device)
            .ok_or_else(|| Error::DeviceOpenFailed(format!("output device {} not found", device)))?;
        let name = output
            .port_name(port)
            .unwrap_or_else(|_| format!("Device {}", device));
        let connection = output.connect(port, CLIENT_NAME)?;
        debug!("Opened MIDI output device {}: {}", device, name);
        Ok(Box::new(MidirOutputConnection { connection }))
    }

    fn open_input(
        &self,
        device: usize,
        events: Sender<DeviceEvent>,
    ) -> Result<Box<dyn InputConnection>> {
        let mut input = MidiInput::new(CLIENT_NAME)?;
        input.ignore(Ignore::None);
        let ports = input.ports();
        let port = ports
            .get(device)
            .ok_or_else(|| Error::DeviceOpenFailed(format!("input device {} not found", device)))?;
        let name = input
            .port_name(port)
            .unwrap_or_else(|_| format!("Device {}", device));

        let device_num = device as i32;
        let connection = input.connect(
            port,
            CLIENT_NAME,
            move |_stamp, bytes, _| {
                if bytes.is_empty() {
                    warn!("Dropping empty message from input device {}", device_num);
                    return;
                }
                let (bytes, sysex) = if bytes[0] == 0xF0 {
                    // Strip frame bytes; the relay restores the leading 0xF0.
                    let end = if bytes.last() == Some(&0xF7) {
                        bytes.len() - 1
                    } else {
                        bytes.len()
                    };
                    (bytes[1..end].to_vec(), true)
                } else {
                    (bytes.to_vec(), false)
                };
                let _ = events.send(DeviceEvent::Message {
                    device: device_num,
                    bytes,
                    sysex,
                    at: Instant::now(),
                });
            },
            (),
        )?;
        debug!("Opened MIDI input device {}: {}", device, name);
        Ok(Box::new(MidirInputConnection {
            _connection: connection,
        }))
    }
}

struct MidirOutputConnection {
    connection: MidiOutputConnection,
}

impl OutputConnection for MidirOutputConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.connection.send(bytes)?;
        Ok(())
    }

    fn send_sysex(&mut self, body: &[u8]) -> Result<()> {
        let mut wire = Vec::with_capacity(body.len() + 2);
        wire.push(0xF0);
        wire.extend_from_slice(body);
        if wire.last() != Some(&0xF7) {
            wire.push(0xF7);
        }
        self.connection.send(&wire)?;
        Ok(())
    }
}

struct MidirInputConnection {
    _connection: MidiInputConnection<()>,
}

impl InputConnection for MidirInputConnection {}
