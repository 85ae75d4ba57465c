//! Loopback smoke test: schedules a short phrase on the loopback device and
//! prints it as it comes back in. Needs no hardware.

use ritmo_midi_io::{MidiIoEngine, DEV_LOOPBACK};

fn main() {
    let engine = MidiIoEngine::new().unwrap();

    println!("Output devices: {:?}", engine.output_devices());
    println!("Input devices:  {:?}", engine.input_devices());

    // A C major arpeggio, one note every 200 ticks (200 ms at the default
    // tempo), each held for 150 ticks.
    let notes = [60u8, 64, 67, 72];
    for (i, note) in notes.iter().enumerate() {
        let at = 200.0 * i as f64;
        engine
            .queue_message(DEV_LOOPBACK, at, 0, &[0x90, *note, 100])
            .unwrap();
        engine
            .queue_message(DEV_LOOPBACK, at + 150.0, 0, &[0x80, *note, 0])
            .unwrap();
    }

    for _ in 0..notes.len() * 2 {
        let msg = engine.recv_message();
        println!(
            "tick {:8.1}  track {}  bytes {:02X?}",
            msg.ticks, msg.track, msg.message
        );
    }

    engine.stop();
    println!("Done.");
}
