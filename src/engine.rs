use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use oorandom::Rand32;

use crate::arp::{order_notes, ArpMode, Arpeggiator};
use crate::clock::{
    is_gate_expiry, is_step_start, TimeDivision, TimerCtl, TICKS_PER_CLOCK, TICKS_PER_QUARTER,
    TICK_WRAP,
};
use crate::midi::MidiOut;
use crate::multi::{MultiSeq, KEYBOARD_CHANNEL};
use crate::pots::{pot_to_bend, pot_to_bpm, pot_to_mod, Hysteresis};
use crate::save::SeqStore;
use crate::sequencer::{Recorder, Sequence, Sounding};

// ── Modes ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Basic,
    Arpeggiator,
    Sequencer,
    MultiSequencer,
}

impl Mode {
    pub const ALL: [Mode; 4] = [
        Mode::Basic,
        Mode::Arpeggiator,
        Mode::Sequencer,
        Mode::MultiSequencer,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Basic          => "Basic",
            Self::Arpeggiator    => "Arpeg",
            Self::Sequencer      => "Sequ",
            Self::MultiSequencer => "Multi",
        }
    }

    pub fn next(self) -> Self {
        let i = Self::ALL.iter().position(|&m| m == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        let i = Self::ALL.iter().position(|&m| m == self).unwrap_or(0);
        Self::ALL[(i + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayMode {
    Stopped,
    Playing,
    Pausing,
    Recording,
}

impl PlayMode {
    pub fn glyph(self) -> &'static str {
        match self {
            Self::Stopped   => "⏹",
            Self::Playing   => "⏵",
            Self::Pausing   => "⏸",
            Self::Recording => "⏺",
        }
    }
}

/// Numeric field the digit keys currently edit.  At most one is active;
/// entering another replaces it outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edit {
    None,
    LoadSlot { pending: u8 },
    Channel { pending: u8 },
    Gate { pending: u8 },
    TimeDiv { pending: u8 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transport {
    Start,
    Continue,
}

// ── Display collaborator ──────────────────────────────────────────────────────

/// Fire-and-forget refresh notification after any state change.
pub trait StatusDisplay: Send {
    fn notify(&self);
}

/// Sets a shared flag the UI loop polls to redraw.
pub struct DirtyFlag(pub Arc<AtomicBool>);

impl StatusDisplay for DirtyFlag {
    fn notify(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

pub struct NullDisplay;

impl StatusDisplay for NullDisplay {
    fn notify(&self) {}
}

// ── Configuration vs playback state ───────────────────────────────────────────

/// Written by the input side, read by the tick path.  Scalars only.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub mode:           Mode,
    pub play_mode:      PlayMode,
    pub bpm:            u16,
    pub time_div:       TimeDivision,
    pub gate_tenths:    u8, // 1..=9
    pub midi_channel:   u8, // zero-based on the wire
    pub arp_mode:       ArpMode,
    pub transpose_on:   bool,
    pub transpose_key:  u8, // 60 = no transposition
    pub multi_kbd_play: bool,
    pub edit:           Edit,
    pub seq_slot:       u8,
    pub multi_target:   u8, // zero-based load-target channel
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode:           Mode::Basic,
            play_mode:      PlayMode::Stopped,
            bpm:            60,
            time_div:       TimeDivision::Quarter,
            gate_tenths:    5,
            midi_channel:   0,
            arp_mode:       ArpMode::PressOrder,
            transpose_on:   false,
            transpose_key:  60,
            multi_kbd_play: false,
            edit:           Edit::None,
            seq_slot:       0,
            multi_target:   0,
        }
    }
}

/// Owned and mutated by the tick path; the input side only touches it inside
/// synchronous stop/flush transitions.
struct Playback {
    tick:           u32,
    global_clock:   u64,
    pending:        Option<Transport>,
    seq_step:       u32,
    seq_sounding:   Vec<Sounding>,
    arp_index:      usize,
    arp_order:      Vec<u8>,
    arp_src_mode:   Option<ArpMode>,
    arp_src_held:   Vec<u8>,
    arp_sounding:   Vec<Sounding>,
    multi_sounding: Vec<Vec<Sounding>>,
    live:           Vec<(u8, u8)>, // (channel, note) sent straight through
    rng:            Rand32,
}

impl Playback {
    fn new() -> Self {
        Self {
            tick:           0,
            global_clock:   0,
            pending:        None,
            seq_step:       0,
            seq_sounding:   Vec::new(),
            arp_index:      0,
            arp_order:      Vec::new(),
            arp_src_mode:   None,
            arp_src_held:   Vec::new(),
            arp_sounding:   Vec::new(),
            multi_sounding: vec![Vec::new(); crate::multi::NUM_CHANNELS],
            live:           Vec::new(),
            rng:            Rand32::new(0xBEEF_CAFE),
        }
    }

    /// Back to the top of the pattern.
    fn rewind(&mut self) {
        self.tick = 0;
        self.global_clock = 0;
        self.pending = None;
        self.seq_step = 0;
        self.arp_index = 0;
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct Engine {
    pub cfg:      Config,
    pub seq:      Sequence,
    pub recorder: Recorder,
    pub arp:      Arpeggiator,
    pub multi:    MultiSeq,
    play:         Playback,
    midi:         MidiOut,
    store:        SeqStore,
    display:      Box<dyn StatusDisplay>,
    timer:        Arc<TimerCtl>,
    tempo_hyst:   Hysteresis,
    mod_hyst:     Hysteresis,
    last_bend:    u16,
}

impl Engine {
    pub fn new(
        midi: MidiOut,
        store: SeqStore,
        display: Box<dyn StatusDisplay>,
        timer: Arc<TimerCtl>,
    ) -> Self {
        let cfg = Config::default();
        timer.retime(cfg.bpm);
        Self {
            cfg,
            seq: Sequence::default(),
            recorder: Recorder::default(),
            arp: Arpeggiator::default(),
            multi: MultiSeq::default(),
            play: Playback::new(),
            midi,
            store,
            display,
            timer,
            tempo_hyst: Hysteresis::new(60, 2),
            mod_hyst: Hysteresis::new(0, 1),
            last_bend: crate::midi::BEND_CENTER,
        }
    }

    // ── Tick path ─────────────────────────────────────────────────────────

    /// One timer period.  Any error here makes the ticker disarm the timer
    /// instead of re-faulting every period.
    pub fn tick(&mut self) -> Result<()> {
        let t = self.play.tick;

        if t % TICKS_PER_CLOCK == 0 {
            self.midi.clock()?;
        }
        // Transport bytes stay aligned to quarter-note boundaries.
        if t % TICKS_PER_QUARTER == 0 {
            match self.play.pending.take() {
                Some(Transport::Start)    => self.midi.start()?,
                Some(Transport::Continue) => self.midi.continue_()?,
                None => {}
            }
        }

        if self.cfg.play_mode == PlayMode::Playing {
            match self.cfg.mode {
                Mode::Basic          => {}
                Mode::Sequencer      => self.tick_sequencer(t)?,
                Mode::Arpeggiator    => self.tick_arp(t)?,
                Mode::MultiSequencer => self.tick_multi(t)?,
            }
        }

        if t % TICKS_PER_CLOCK == 0 {
            // The shared multi-sequencer step clock, in 24-ppqn units.  It
            // grows unbounded; per-channel modulo handles looping.
            self.play.global_clock += 1;
        }
        self.play.tick = (t + 1) % TICK_WRAP;
        self.midi.flush()
    }

    fn tick_sequencer(&mut self, t: u32) -> Result<()> {
        let len = self.seq.length;
        if len == 0 {
            return Ok(());
        }
        let sc = self.cfg.time_div.clocks_per_step();

        if is_step_start(t, sc) {
            if let Some(entry) = self.seq.note_at(self.play.seq_step) {
                let note = transposed(entry.note, self.cfg.transpose_key);
                self.midi.note_on(self.cfg.midi_channel, note)?;
                self.play.seq_sounding.push(Sounding {
                    note,
                    remaining: entry.steps.clamp(1, len),
                });
            }
            self.play.seq_step = (self.play.seq_step + 1) % len;
        }
        if is_gate_expiry(t, sc, self.cfg.gate_tenths) {
            expire(&mut self.play.seq_sounding, &mut self.midi, self.cfg.midi_channel)?;
        }
        Ok(())
    }

    fn tick_arp(&mut self, t: u32) -> Result<()> {
        let sc = self.cfg.time_div.clocks_per_step();

        if is_step_start(t, sc) {
            self.refresh_arp_order();
            if !self.play.arp_order.is_empty() {
                let len = self.play.arp_order.len();
                if self.play.arp_index >= len {
                    self.play.arp_index = len - 1;
                }
                let idx = if self.cfg.arp_mode == ArpMode::Random {
                    self.play.rng.rand_range(0..len as u32) as usize
                } else {
                    self.play.arp_index
                };
                let note = self.play.arp_order[idx];
                self.midi.note_on(self.cfg.midi_channel, note)?;
                self.play.arp_sounding.push(Sounding { note, remaining: 1 });
                self.play.arp_index = (self.play.arp_index + 1) % len;
            }
        }
        if is_gate_expiry(t, sc, self.cfg.gate_tenths) {
            expire(&mut self.play.arp_sounding, &mut self.midi, self.cfg.midi_channel)?;
        }
        Ok(())
    }

    fn tick_multi(&mut self, t: u32) -> Result<()> {
        let gate = self.cfg.gate_tenths;
        for &ch in &self.multi.active {
            let channel = &self.multi.channels[ch];
            let sc = channel.time_div.clocks_per_step();
            let len = channel.sequence.length;

            if is_step_start(t, sc) {
                let step = self.multi.step_index(ch, self.play.global_clock);
                if let Some(entry) = channel.sequence.note_at(step) {
                    self.midi.note_on(ch as u8, entry.note)?;
                    self.play.multi_sounding[ch].push(Sounding {
                        note:      entry.note,
                        remaining: entry.steps.clamp(1, len),
                    });
                }
            }
            if is_gate_expiry(t, sc, gate) {
                expire(&mut self.play.multi_sounding[ch], &mut self.midi, ch as u8)?;
            }
        }
        Ok(())
    }

    /// Reorder only when the held set or the mode changed since last time.
    fn refresh_arp_order(&mut self) {
        if self.play.arp_src_mode == Some(self.cfg.arp_mode)
            && self.play.arp_src_held == self.arp.held
        {
            return;
        }
        self.play.arp_order = order_notes(self.cfg.arp_mode, &self.arp.held);
        self.play.arp_src_mode = Some(self.cfg.arp_mode);
        self.play.arp_src_held = self.arp.held.clone();
    }

    // ── Note input ────────────────────────────────────────────────────────

    pub fn note_on(&mut self, note: u8) -> Result<()> {
        match self.cfg.mode {
            Mode::Basic => self.send_live_on(self.cfg.midi_channel, note)?,
            Mode::Sequencer => match self.cfg.play_mode {
                PlayMode::Recording => {
                    self.send_live_on(self.cfg.midi_channel, note)?;
                    self.recorder.note_on(&mut self.seq, note);
                    self.display.notify();
                }
                PlayMode::Playing => {
                    if self.cfg.transpose_on {
                        self.cfg.transpose_key = note;
                        self.display.notify();
                    } else {
                        self.send_live_on(self.cfg.midi_channel, note)?;
                    }
                }
                _ => {}
            },
            Mode::Arpeggiator => {
                self.arp.note_on(note);
                self.display.notify();
            }
            Mode::MultiSequencer => {
                if self.cfg.multi_kbd_play {
                    self.send_live_on(KEYBOARD_CHANNEL as u8, note)?;
                }
            }
        }
        Ok(())
    }

    pub fn note_off(&mut self, note: u8) -> Result<()> {
        match self.cfg.mode {
            Mode::Basic => self.send_live_off(self.cfg.midi_channel, note)?,
            Mode::Sequencer => match self.cfg.play_mode {
                PlayMode::Recording => {
                    self.send_live_off(self.cfg.midi_channel, note)?;
                    self.recorder.note_off(&mut self.seq, note);
                    self.display.notify();
                }
                PlayMode::Playing => {
                    if !self.cfg.transpose_on {
                        self.send_live_off(self.cfg.midi_channel, note)?;
                    }
                }
                _ => {}
            },
            Mode::Arpeggiator => {
                self.arp.note_off(note);
                self.display.notify();
            }
            Mode::MultiSequencer => {
                if self.cfg.multi_kbd_play {
                    self.send_live_off(KEYBOARD_CHANNEL as u8, note)?;
                }
            }
        }
        Ok(())
    }

    fn send_live_on(&mut self, channel: u8, note: u8) -> Result<()> {
        self.midi.note_on(channel, note)?;
        self.play.live.push((channel, note));
        self.midi.flush()
    }

    fn send_live_off(&mut self, channel: u8, note: u8) -> Result<()> {
        if let Some(pos) = self.play.live.iter().position(|&(c, n)| c == channel && n == note) {
            self.play.live.remove(pos);
        }
        self.midi.note_off(channel, note)?;
        self.midi.flush()
    }

    // ── Transitions ───────────────────────────────────────────────────────

    pub fn incr_mode(&mut self) -> Result<()> {
        self.switch_mode(self.cfg.mode.next())
    }

    pub fn decr_mode(&mut self) -> Result<()> {
        self.switch_mode(self.cfg.mode.prev())
    }

    fn switch_mode(&mut self, mode: Mode) -> Result<()> {
        self.timer.disarm();
        self.cfg.play_mode = PlayMode::Stopped;
        self.flush_sounding()?;
        self.play.rewind();
        self.cfg.edit = Edit::None;
        self.cfg.mode = mode;
        match mode {
            Mode::Basic | Mode::MultiSequencer => {}
            Mode::Arpeggiator => self.arp.reset(),
            Mode::Sequencer => self.reload_active_slot()?,
        }
        self.display.notify();
        Ok(())
    }

    pub fn pauseplay(&mut self) -> Result<()> {
        match self.cfg.play_mode {
            PlayMode::Playing => {
                self.cfg.play_mode = PlayMode::Pausing;
                self.timer.disarm();
                self.midi.stop()?;
                self.flush_sounding()?;
            }
            prev => {
                match self.cfg.mode {
                    Mode::Basic => return Ok(()),
                    Mode::Sequencer if self.seq.is_empty() => return Ok(()),
                    Mode::MultiSequencer if !self.multi.can_play() => return Ok(()),
                    _ => {}
                }
                if prev == PlayMode::Pausing {
                    self.play.pending = Some(Transport::Continue);
                } else {
                    self.play.rewind();
                    self.play.pending = Some(Transport::Start);
                }
                self.cfg.play_mode = PlayMode::Playing;
                self.timer.retime(self.cfg.bpm);
                self.timer.arm();
            }
        }
        self.display.notify();
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.timer.disarm();
        let was_stopped = self.cfg.play_mode == PlayMode::Stopped;
        self.cfg.play_mode = PlayMode::Stopped;
        if !was_stopped {
            self.midi.stop()?;
        }
        self.flush_sounding()?;
        self.play.rewind();
        self.display.notify();
        Ok(())
    }

    pub fn rec(&mut self) -> Result<()> {
        if self.cfg.mode != Mode::Sequencer {
            return Ok(());
        }
        self.timer.disarm();
        self.flush_sounding()?;
        self.play.rewind();
        self.cfg.play_mode = PlayMode::Recording;
        self.recorder.clear();
        self.display.notify();
        Ok(())
    }

    /// Blank-step while recording: advance without opening a note.
    pub fn blank_step(&mut self) {
        if self.cfg.mode == Mode::Sequencer && self.cfg.play_mode == PlayMode::Recording {
            self.recorder.advance(&mut self.seq);
            self.display.notify();
        }
    }

    /// Remove the last recorded step.
    pub fn undo_step(&mut self) {
        if self.cfg.mode == Mode::Sequencer && self.cfg.play_mode == PlayMode::Recording {
            self.recorder.undo(&mut self.seq);
            self.display.notify();
        }
    }

    /// Clear in the sequencers, hold toggle in the arpeggiator.
    pub fn clear_hold(&mut self) -> Result<()> {
        match self.cfg.mode {
            Mode::Basic => {}
            Mode::Sequencer => {
                self.stop()?;
                self.seq.clear();
                self.recorder.clear();
                let slot = self.cfg.seq_slot;
                self.save_slot(slot);
            }
            Mode::Arpeggiator => {
                self.arp.toggle_hold();
                if !self.arp.hold {
                    self.flush_sounding()?;
                    self.play.arp_index = 0;
                }
            }
            Mode::MultiSequencer => {
                let target = self.cfg.multi_target as usize;
                expire_all(&mut self.play.multi_sounding[target], &mut self.midi, target as u8)?;
                self.multi.clear_channel(target);
                if self.cfg.play_mode == PlayMode::Playing && !self.multi.can_play() {
                    self.stop()?;
                }
            }
        }
        self.display.notify();
        Ok(())
    }

    pub fn incr_arp_mode(&mut self) {
        if self.cfg.mode == Mode::Arpeggiator {
            self.cfg.arp_mode = self.cfg.arp_mode.next();
            self.display.notify();
        }
    }

    pub fn decr_arp_mode(&mut self) {
        if self.cfg.mode == Mode::Arpeggiator {
            self.cfg.arp_mode = self.cfg.arp_mode.prev();
            self.display.notify();
        }
    }

    /// Transpose/keyboard-play toggle; doubles as the channel-16 passthrough
    /// switch in the multi-sequencer.
    pub fn toggle_kbd_play(&mut self) {
        match self.cfg.mode {
            Mode::Sequencer => self.cfg.transpose_on = !self.cfg.transpose_on,
            Mode::MultiSequencer => self.cfg.multi_kbd_play = !self.cfg.multi_kbd_play,
            _ => return,
        }
        self.display.notify();
    }

    // ── Numeric edits ─────────────────────────────────────────────────────

    pub fn load_seq_pressed(&mut self) {
        if matches!(self.cfg.mode, Mode::Sequencer | Mode::MultiSequencer) {
            self.cfg.edit = Edit::LoadSlot { pending: 0 };
            self.display.notify();
        }
    }

    /// Gate-length edit in the playing modes, MIDI-channel edit in BASIC,
    /// load-target-channel edit in the multi-sequencer.
    pub fn gate_channel_pressed(&mut self) {
        self.cfg.edit = match (self.cfg.mode, self.cfg.edit) {
            (_, Edit::Gate { .. }) | (_, Edit::Channel { .. }) => Edit::None,
            (Mode::Basic | Mode::MultiSequencer, _) => Edit::Channel { pending: 0 },
            (_, _) => Edit::Gate { pending: self.cfg.gate_tenths },
        };
        self.display.notify();
    }

    pub fn time_div_pressed(&mut self) {
        self.cfg.edit = match self.cfg.edit {
            Edit::TimeDiv { .. } => Edit::None,
            _ => Edit::TimeDiv { pending: self.active_time_div().index() as u8 },
        };
        self.display.notify();
    }

    pub fn digit_pressed(&mut self, digit: u8) {
        match &mut self.cfg.edit {
            Edit::None => return,
            Edit::LoadSlot { pending } => {
                *pending = (*pending as u16 * 10 + digit as u16).min(99) as u8;
            }
            Edit::Channel { pending } => {
                *pending = (*pending as u16 * 10 + digit as u16).min(16) as u8;
            }
            Edit::Gate { pending } => {
                if digit != 0 {
                    *pending = digit;
                }
            }
            Edit::TimeDiv { pending } => {
                if (1..=8).contains(&digit) {
                    *pending = digit - 1;
                }
            }
        }
        self.display.notify();
    }

    /// Commit the pending edit.
    pub fn confirm(&mut self) -> Result<()> {
        let edit = std::mem::replace(&mut self.cfg.edit, Edit::None);
        match edit {
            Edit::None => return Ok(()),
            Edit::LoadSlot { pending } => self.load_slot(pending)?,
            Edit::Channel { pending } => {
                // Zero means the field was never typed into; keep the old value.
                if pending != 0 {
                    if self.cfg.mode == Mode::MultiSequencer {
                        self.cfg.multi_target = pending - 1;
                    } else {
                        self.cfg.midi_channel = pending - 1;
                    }
                }
            }
            Edit::Gate { pending } => {
                if pending != 0 {
                    self.cfg.gate_tenths = pending;
                }
            }
            Edit::TimeDiv { pending } => {
                let div = TimeDivision::ALL[pending as usize % 8];
                if self.cfg.mode == Mode::MultiSequencer {
                    self.multi.set_time_div(self.cfg.multi_target as usize, div);
                } else {
                    self.cfg.time_div = div;
                }
            }
        }
        self.display.notify();
        Ok(())
    }

    /// Discard the pending edit.
    pub fn cancel(&mut self) {
        self.cfg.edit = Edit::None;
        self.display.notify();
    }

    // ── Persistence ───────────────────────────────────────────────────────

    fn load_slot(&mut self, slot: u8) -> Result<()> {
        match self.cfg.mode {
            Mode::Sequencer => {
                self.cfg.seq_slot = slot;
                self.reload_active_slot()?;
            }
            Mode::MultiSequencer => {
                let target = self.cfg.multi_target as usize;
                let was_armed = self.timer.is_armed();
                self.timer.disarm();
                expire_all(&mut self.play.multi_sounding[target], &mut self.midi, target as u8)?;
                let seq = self.store.load(slot);
                self.multi.set_channel(target, seq);
                if self.cfg.play_mode == PlayMode::Playing {
                    if self.multi.can_play() {
                        if was_armed {
                            self.timer.arm();
                        }
                    } else {
                        self.stop()?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Timer stays disarmed across the file read so no tick fires mid-I/O.
    /// A missing or corrupt slot loads empty and forces a full stop, so any
    /// note sounding from the replaced sequence is released.
    fn reload_active_slot(&mut self) -> Result<()> {
        let was_armed = self.timer.is_armed();
        self.timer.disarm();
        self.seq = self.store.load(self.cfg.seq_slot);
        self.recorder.clear();
        self.play.seq_step = 0;
        if self.seq.is_empty() {
            self.stop()?;
        } else if was_armed && self.cfg.play_mode == PlayMode::Playing {
            self.timer.arm();
        }
        Ok(())
    }

    fn save_slot(&mut self, slot: u8) {
        let was_armed = self.timer.is_armed();
        self.timer.disarm();
        if let Err(e) = self.store.save(slot, &self.seq) {
            log::warn!("couldn't save sequence {slot}: {e:#}");
        }
        if was_armed {
            self.timer.arm();
        }
    }

    /// Persist the sequencer track to its active slot (end of a recording
    /// pass).
    pub fn save_active_slot(&mut self) {
        if self.cfg.mode == Mode::Sequencer {
            let slot = self.cfg.seq_slot;
            self.save_slot(slot);
        }
    }

    // ── Potentiometers ────────────────────────────────────────────────────

    pub fn tempo_pot(&mut self, raw: u16) {
        if let Some(bpm) = self.tempo_hyst.accept(pot_to_bpm(raw)) {
            self.cfg.bpm = bpm;
            self.timer.retime(bpm);
            self.display.notify();
        }
    }

    pub fn bend_pot(&mut self, raw: u16) -> Result<()> {
        let bend = pot_to_bend(raw);
        if bend != self.last_bend {
            self.last_bend = bend;
            self.midi.pitch_bend(self.cfg.midi_channel, bend)?;
            self.midi.flush()?;
        }
        Ok(())
    }

    pub fn mod_pot(&mut self, raw: u16) -> Result<()> {
        if let Some(v) = self.mod_hyst.accept(pot_to_mod(raw) as u16) {
            self.midi.mod_wheel(self.cfg.midi_channel, v as u8)?;
            self.midi.flush()?;
        }
        Ok(())
    }

    // ── Flush ─────────────────────────────────────────────────────────────

    /// Release every tracked note across all channels, then belt-and-braces
    /// all-notes-off on the working channel.
    fn flush_sounding(&mut self) -> Result<()> {
        for s in self.play.seq_sounding.drain(..) {
            self.midi.note_off(self.cfg.midi_channel, s.note)?;
        }
        for s in self.play.arp_sounding.drain(..) {
            self.midi.note_off(self.cfg.midi_channel, s.note)?;
        }
        for (ch, list) in self.play.multi_sounding.iter_mut().enumerate() {
            for s in list.drain(..) {
                self.midi.note_off(ch as u8, s.note)?;
            }
        }
        for (ch, note) in self.play.live.drain(..) {
            self.midi.note_off(ch, note)?;
        }
        self.midi.all_notes_off(self.cfg.midi_channel)?;
        self.midi.flush()
    }

    // ── Read access for the UI ────────────────────────────────────────────

    pub fn active_time_div(&self) -> TimeDivision {
        if self.cfg.mode == Mode::MultiSequencer {
            self.multi.channels[self.cfg.multi_target as usize].time_div
        } else {
            self.cfg.time_div
        }
    }

    pub fn seq_step(&self) -> u32 {
        self.play.seq_step
    }

    pub fn sounding_count(&self) -> usize {
        self.play.seq_sounding.len()
            + self.play.arp_sounding.len()
            + self.play.multi_sounding.iter().map(Vec::len).sum::<usize>()
    }
}

fn transposed(note: u8, key: u8) -> u8 {
    (note as i16 + key as i16 - 60).clamp(0, 127) as u8
}

/// Age every sounding note by one step and release the expired ones.
fn expire(sounding: &mut Vec<Sounding>, midi: &mut MidiOut, channel: u8) -> Result<()> {
    for s in sounding.iter_mut() {
        s.remaining = s.remaining.saturating_sub(1);
    }
    let mut i = 0;
    while i < sounding.len() {
        if sounding[i].remaining == 0 {
            midi.note_off(channel, sounding[i].note)?;
            sounding.remove(i);
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// Release everything on the list regardless of remaining sustain.
fn expire_all(sounding: &mut Vec<Sounding>, midi: &mut MidiOut, channel: u8) -> Result<()> {
    for s in sounding.drain(..) {
        midi.note_off(channel, s.note)?;
    }
    midi.flush()
}
