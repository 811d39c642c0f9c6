use anyhow::{anyhow, Result};
use midir::{MidiOutput, MidiOutputConnection};

// ── Status bytes ──────────────────────────────────────────────────────────────

const NOTE_OFF: u8 = 0x80;
const NOTE_ON:  u8 = 0x90;
const CONTROL:  u8 = 0xB0;
const BEND:     u8 = 0xE0;

pub const CLOCK:    u8 = 0xF8;
pub const START:    u8 = 0xFA;
pub const CONTINUE: u8 = 0xFB;
pub const STOP:     u8 = 0xFC;

const CC_MOD_WHEEL:     u8 = 1;
const CC_ALL_NOTES_OFF: u8 = 123;

pub const BEND_MAX:    u16 = 0x3FFF;
pub const BEND_CENTER: u16 = 0x2000;

/// Queue at most this many bytes before forcing a transport write.
const BATCH_FLUSH_BYTES: usize = 24;

// ── Transport sink ────────────────────────────────────────────────────────────

/// Where encoded MIDI bytes go.  `write` receives one or more complete
/// messages back to back, so a whole tick's worth of output can land in a
/// single transport write.
pub trait MidiSink: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Real MIDI port via midir.  Connects to the first available output port.
pub struct MidirSink {
    conn: MidiOutputConnection,
}

impl MidirSink {
    pub fn open(client: &str) -> Result<Self> {
        let out = MidiOutput::new(client)?;
        let ports = out.ports();
        let port = ports
            .first()
            .ok_or_else(|| anyhow!("no MIDI output port available"))?;
        let name = out.port_name(port).unwrap_or_default();
        let conn = out
            .connect(port, client)
            .map_err(|e| anyhow!("connect to MIDI port {name:?}: {e}"))?;
        log::info!("MIDI output connected to {name:?}");
        Ok(Self { conn })
    }
}

impl MidiSink for MidirSink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        // midir wants one message per send; split the batch on status bytes.
        let mut rest = bytes;
        while !rest.is_empty() {
            let len = message_len(rest[0]).min(rest.len());
            self.conn
                .send(&rest[..len])
                .map_err(|e| anyhow!("MIDI send: {e}"))?;
            rest = &rest[len..];
        }
        Ok(())
    }
}

fn message_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 2,
        0xF0 => 1, // only realtime singles are ever encoded here
        _ => 3,
    }
}

/// Discards everything.  Lets the engine run with no MIDI port attached.
pub struct NullSink;

impl MidiSink for NullSink {
    fn write(&mut self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}

// ── Encoder ───────────────────────────────────────────────────────────────────

/// Serializes MIDI messages and batches outgoing bytes.  The buffer is
/// flushed when it crosses `BATCH_FLUSH_BYTES` and at the end of every tick.
pub struct MidiOut {
    sink: Box<dyn MidiSink>,
    buf:  Vec<u8>,
}

impl MidiOut {
    pub fn new(sink: Box<dyn MidiSink>) -> Self {
        Self { sink, buf: Vec::with_capacity(BATCH_FLUSH_BYTES * 2) }
    }

    fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() >= BATCH_FLUSH_BYTES {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let r = self.sink.write(&self.buf);
        self.buf.clear();
        r
    }

    pub fn note_on(&mut self, channel: u8, note: u8) -> Result<()> {
        self.push(&[NOTE_ON | (channel & 0x0F), note & 0x7F, 127])
    }

    pub fn note_off(&mut self, channel: u8, note: u8) -> Result<()> {
        self.push(&[NOTE_OFF | (channel & 0x0F), note & 0x7F, 0])
    }

    pub fn all_notes_off(&mut self, channel: u8) -> Result<()> {
        self.push(&[CONTROL | (channel & 0x0F), CC_ALL_NOTES_OFF, 0])
    }

    pub fn mod_wheel(&mut self, channel: u8, value: u8) -> Result<()> {
        self.push(&[CONTROL | (channel & 0x0F), CC_MOD_WHEEL, value.min(127)])
    }

    pub fn pitch_bend(&mut self, channel: u8, value: u16) -> Result<()> {
        let v = value.min(BEND_MAX);
        self.push(&[BEND | (channel & 0x0F), (v & 0x7F) as u8, (v >> 7) as u8])
    }

    pub fn clock(&mut self)    -> Result<()> { self.push(&[CLOCK]) }
    pub fn start(&mut self)    -> Result<()> { self.push(&[START]) }
    pub fn continue_(&mut self) -> Result<()> { self.push(&[CONTINUE]) }
    pub fn stop(&mut self)     -> Result<()> { self.push(&[STOP]) }
}

// ── Test support ──────────────────────────────────────────────────────────────

#[cfg(test)]
pub use capture::{CaptureSink, FailingSink};

#[cfg(test)]
mod capture {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every flushed byte; shared handle so tests keep reading after
    /// the sink has been boxed into the encoder.
    #[derive(Clone, Default)]
    pub struct CaptureSink {
        bytes: Arc<Mutex<Vec<u8>>>,
        writes: Arc<Mutex<Vec<usize>>>,
    }

    impl CaptureSink {
        pub fn bytes(&self) -> Vec<u8> {
            self.bytes.lock().unwrap().clone()
        }

        /// Sizes of the individual transport writes, for batching assertions.
        pub fn write_sizes(&self) -> Vec<usize> {
            self.writes.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.bytes.lock().unwrap().clear();
            self.writes.lock().unwrap().clear();
        }
    }

    impl MidiSink for CaptureSink {
        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            self.bytes.lock().unwrap().extend_from_slice(bytes);
            self.writes.lock().unwrap().push(bytes.len());
            Ok(())
        }
    }

    /// Fails every write, for exercising the transport-fault path.
    pub struct FailingSink;

    impl MidiSink for FailingSink {
        fn write(&mut self, _bytes: &[u8]) -> Result<()> {
            Err(anyhow!("transport gone"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> (MidiOut, CaptureSink) {
        let sink = CaptureSink::default();
        (MidiOut::new(Box::new(sink.clone())), sink)
    }

    #[test]
    fn encodes_channel_voice_messages() {
        let (mut midi, sink) = encoder();
        midi.note_on(2, 60).unwrap();
        midi.note_off(2, 60).unwrap();
        midi.all_notes_off(0).unwrap();
        midi.flush().unwrap();
        assert_eq!(sink.bytes(), vec![0x92, 60, 127, 0x82, 60, 0, 0xB0, 123, 0]);
    }

    #[test]
    fn clamps_controller_ranges() {
        let (mut midi, sink) = encoder();
        midi.mod_wheel(0, 200).unwrap();
        midi.pitch_bend(1, 0xFFFF).unwrap();
        midi.flush().unwrap();
        assert_eq!(sink.bytes(), vec![0xB0, 1, 127, 0xE1, 0x7F, 0x7F]);
    }

    #[test]
    fn pitch_bend_splits_into_seven_bit_halves() {
        let (mut midi, sink) = encoder();
        midi.pitch_bend(0, BEND_CENTER).unwrap();
        midi.flush().unwrap();
        assert_eq!(sink.bytes(), vec![0xE0, 0x00, 0x40]);
    }

    #[test]
    fn batches_until_threshold_then_writes_once() {
        let (mut midi, sink) = encoder();
        // 8 three-byte messages = 24 bytes: exactly one forced flush.
        for n in 0..8 {
            midi.note_on(0, 60 + n).unwrap();
        }
        assert_eq!(sink.write_sizes(), vec![24]);
        midi.clock().unwrap();
        midi.flush().unwrap();
        assert_eq!(sink.write_sizes(), vec![24, 1]);
    }

    #[test]
    fn realtime_messages_are_single_bytes() {
        let (mut midi, sink) = encoder();
        midi.clock().unwrap();
        midi.start().unwrap();
        midi.continue_().unwrap();
        midi.stop().unwrap();
        midi.flush().unwrap();
        assert_eq!(sink.bytes(), vec![0xF8, 0xFA, 0xFB, 0xFC]);
    }
}
