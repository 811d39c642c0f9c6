use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::arp::ArpMode;
use crate::clock::TimeDivision;
use crate::engine::{Edit, Engine, Mode, PlayMode};
use crate::sequencer::StepNote;

const FALLBACK_RELEASE_THRESHOLD: Duration = Duration::from_millis(600);

/// One notch of a simulated front-panel pot, on the raw 16-bit scale.
const TEMPO_POT_STEP: u16 = 1560; // ≈5 BPM
const BEND_POT_STEP:  u16 = 0x0800;
const MOD_POT_STEP:   u16 = 0x1000;

// ── Key → MIDI note mapping ───────────────────────────────────────────────────

pub fn key_to_note(key: char, base_octave: i32) -> Option<u8> {
    let (st, oct): (i32, i32) = match key {
        // Lower row – white keys
        'z' => (0,0), 'x' => (2,0), 'c' => (4,0), 'v' => (5,0),
        'b' => (7,0), 'n' => (9,0), 'm' => (11,0),
        ',' => (12,0), '.' => (14,0), '/' => (16,0),
        // Lower row – black keys
        's' => (1,0), 'd' => (3,0), 'g' => (6,0),
        'h' => (8,0), 'j' => (10,0), 'l' => (13,0), ';' => (15,0),
        // Upper row – white keys
        'q' => (0,1), 'w' => (2,1), 'e' => (4,1), 'r' => (5,1),
        't' => (7,1), 'y' => (9,1), 'u' => (11,1),
        'i' => (12,1), 'o' => (14,1), 'p' => (16,1),
        // Upper row – black keys
        '2' => (1,1), '3' => (3,1), '5' => (6,1),
        '6' => (8,1), '7' => (10,1), '9' => (13,1), '0' => (15,1),
        _ => return None,
    };
    let note = (base_octave + oct) * 12 + 12 + st;
    if (0..=127).contains(&note) { Some(note as u8) } else { None }
}

pub fn note_name(note: u8) -> String {
    const NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F",
                               "F#", "G", "G#", "A", "A#", "B"];
    format!("{}{}", NAMES[(note % 12) as usize], note / 12 - 1)
}

// ── UI snapshot ───────────────────────────────────────────────────────────────

/// Everything the draw pass needs, captured under one engine lock so the UI
/// never blocks the ticker for more than a field copy.
pub struct EngineView {
    pub mode:           Mode,
    pub play_mode:      PlayMode,
    pub bpm:            u16,
    pub time_div:       TimeDivision,
    pub gate_tenths:    u8,
    pub midi_channel:   u8,
    pub arp_mode:       ArpMode,
    pub hold:           bool,
    pub held:           Vec<u8>,
    pub transpose_on:   bool,
    pub transpose_key:  u8,
    pub multi_kbd_play: bool,
    pub edit:           Edit,
    pub seq_slot:       u8,
    pub multi_target:   u8,
    pub seq_length:     u32,
    pub seq_step:       u32,
    pub seq_entries:    Vec<(u32, StepNote)>,
    pub open_notes:     usize,
    pub multi_channels: Vec<(usize, u32, TimeDivision)>,
    pub multi_period:   u64,
}

// ── App state ─────────────────────────────────────────────────────────────────

pub struct App {
    pub engine:       Arc<Mutex<Engine>>,
    pub base_octave:  i32,
    pub pressed_keys: HashSet<char>,
    key_last_seen:    HashMap<char, Instant>,
    pub should_quit:  bool,
    pub status_msg:   String,

    // Simulated front-panel pots, raw 16-bit positions.
    tempo_pot: u16,
    bend_pot:  u16,
    mod_pot:   u16,
}

impl App {
    pub fn new(engine: Arc<Mutex<Engine>>) -> Self {
        Self {
            engine,
            base_octave:  4,
            pressed_keys: HashSet::new(),
            key_last_seen: HashMap::new(),
            should_quit:  false,
            status_msg:   String::new(),
            tempo_pot:    u16::MAX / 7, // ≈60 BPM
            bend_pot:     u16::MAX / 2,
            mod_pot:      0,
        }
    }

    pub fn view(&self) -> EngineView {
        let e = self.engine.lock().unwrap();
        EngineView {
            mode:           e.cfg.mode,
            play_mode:      e.cfg.play_mode,
            bpm:            e.cfg.bpm,
            time_div:       e.active_time_div(),
            gate_tenths:    e.cfg.gate_tenths,
            midi_channel:   e.cfg.midi_channel,
            arp_mode:       e.cfg.arp_mode,
            hold:           e.arp.hold,
            held:           e.arp.held.clone(),
            transpose_on:   e.cfg.transpose_on,
            transpose_key:  e.cfg.transpose_key,
            multi_kbd_play: e.cfg.multi_kbd_play,
            edit:           e.cfg.edit,
            seq_slot:       e.cfg.seq_slot,
            multi_target:   e.cfg.multi_target,
            seq_length:     e.seq.length,
            seq_step:       e.seq_step(),
            seq_entries:    e.seq.notes.iter().map(|(&s, &n)| (s, n)).collect(),
            open_notes:     e.recorder.open_count(),
            multi_channels: e
                .multi
                .active
                .iter()
                .map(|&i| {
                    let ch = &e.multi.channels[i];
                    (i, ch.sequence.length, ch.time_div)
                })
                .collect(),
            multi_period:   e.multi.period,
        }
    }

    fn report(&mut self, result: anyhow::Result<()>) {
        if let Err(e) = result {
            log::error!("MIDI output failed: {e:#}");
            self.status_msg = format!("MIDI error: {e:#}");
        }
    }

    // ── Keyboard / note input ─────────────────────────────────────────────

    pub fn key_press(&mut self, key: char) {
        if self.pressed_keys.contains(&key) { return; }
        self.pressed_keys.insert(key);
        self.key_char(key);
    }

    pub fn key_release(&mut self, key: char) {
        if !self.pressed_keys.remove(&key) { return; }
        if let Some(note) = key_to_note(key, self.base_octave) {
            let r = self.engine.lock().unwrap().note_off(note);
            self.report(r);
        }
    }

    pub fn key_press_fallback(&mut self, key: char) {
        self.key_last_seen.insert(key, Instant::now());
        if self.pressed_keys.contains(&key) { return; }
        self.pressed_keys.insert(key);
        self.key_char(key);
    }

    /// Route a character: digit entry while an edit is active, then the
    /// non-note command characters, then the note map.
    fn key_char(&mut self, key: char) {
        if let Some(d) = key.to_digit(10) {
            if self.editing() {
                self.engine.lock().unwrap().digit_pressed(d as u8);
                return;
            }
        }
        match key {
            '#' => self.confirm(),
            '*' => self.cancel(),
            '-' => self.arp_mode_prev(),
            '=' => self.arp_mode_next(),
            _ => {
                if let Some(note) = key_to_note(key, self.base_octave) {
                    let r = self.engine.lock().unwrap().note_on(note);
                    self.report(r);
                }
            }
        }
    }

    fn editing(&self) -> bool {
        self.engine.lock().unwrap().cfg.edit != Edit::None
    }

    /// Without keyboard-enhancement there are no release events; expire keys
    /// not re-reported by terminal auto-repeat.
    pub fn tick_fallback_release(&mut self) {
        let now = Instant::now();
        let stale: Vec<char> = self.pressed_keys.iter().copied()
            .filter(|k| {
                key_to_note(*k, self.base_octave).is_some()
                    && self.key_last_seen.get(k)
                        .map(|t| now.duration_since(*t) >= FALLBACK_RELEASE_THRESHOLD)
                        .unwrap_or(true)
            })
            .collect();
        for k in stale { self.key_last_seen.remove(&k); self.key_release(k); }
    }

    pub fn release_all(&mut self) {
        let keys: Vec<char> = self.pressed_keys.iter().copied().collect();
        for k in keys { self.key_release(k); }
        self.key_last_seen.clear();
    }

    // ── Global controls ───────────────────────────────────────────────────

    pub fn octave_up(&mut self) {
        if self.base_octave < 8 {
            self.release_all();
            self.base_octave += 1;
            self.status_msg = format!("Octave: {}", self.base_octave);
        }
    }

    pub fn octave_down(&mut self) {
        if self.base_octave > 0 {
            self.release_all();
            self.base_octave -= 1;
            self.status_msg = format!("Octave: {}", self.base_octave);
        }
    }

    pub fn mode_next(&mut self) {
        self.release_all();
        let r = self.engine.lock().unwrap().incr_mode();
        self.report(r);
        self.announce_mode();
    }

    pub fn mode_prev(&mut self) {
        self.release_all();
        let r = self.engine.lock().unwrap().decr_mode();
        self.report(r);
        self.announce_mode();
    }

    fn announce_mode(&mut self) {
        let mode = self.engine.lock().unwrap().cfg.mode;
        self.status_msg = format!("Mode: {}", mode.label());
    }

    pub fn pauseplay(&mut self) {
        let r = self.engine.lock().unwrap().pauseplay();
        self.report(r);
        let pm = self.engine.lock().unwrap().cfg.play_mode;
        self.status_msg = match pm {
            PlayMode::Playing => "Playing".to_string(),
            PlayMode::Pausing => "Paused".to_string(),
            _                 => "Nothing to play".to_string(),
        };
    }

    pub fn stop(&mut self) {
        let r = self.engine.lock().unwrap().stop();
        self.report(r);
        self.status_msg = "Stopped".to_string();
    }

    pub fn rec(&mut self) {
        self.release_all();
        let r = self.engine.lock().unwrap().rec();
        self.report(r);
        if self.engine.lock().unwrap().cfg.play_mode == PlayMode::Recording {
            self.status_msg = "Recording".to_string();
        }
    }

    /// End of a recording pass: keep the take.
    pub fn save_take(&mut self) {
        let mut e = self.engine.lock().unwrap();
        if e.cfg.play_mode == PlayMode::Recording {
            e.save_active_slot();
            let slot = e.cfg.seq_slot;
            drop(e);
            self.status_msg = format!("Saved to slot {slot}");
        }
    }

    pub fn blank_step(&mut self) {
        self.engine.lock().unwrap().blank_step();
    }

    pub fn undo_step(&mut self) {
        self.engine.lock().unwrap().undo_step();
        self.status_msg = "Undid last step".to_string();
    }

    pub fn clear_hold(&mut self) {
        let r = self.engine.lock().unwrap().clear_hold();
        self.report(r);
        let e = self.engine.lock().unwrap();
        self.status_msg = match e.cfg.mode {
            Mode::Sequencer => "Sequence cleared".to_string(),
            Mode::Arpeggiator if e.arp.hold => "Hold on".to_string(),
            Mode::Arpeggiator => "Hold off".to_string(),
            Mode::MultiSequencer => format!("Channel {} cleared", e.cfg.multi_target + 1),
            Mode::Basic => return,
        };
    }

    pub fn toggle_kbd_play(&mut self) {
        let mut e = self.engine.lock().unwrap();
        e.toggle_kbd_play();
        self.status_msg = match e.cfg.mode {
            Mode::Sequencer if e.cfg.transpose_on  => "Transpose: keys set the root".to_string(),
            Mode::Sequencer                        => "Transpose off".to_string(),
            Mode::MultiSequencer if e.cfg.multi_kbd_play => "Keys play channel 16".to_string(),
            Mode::MultiSequencer                   => "Channel 16 plays its sequence".to_string(),
            _ => return,
        };
    }

    fn arp_mode_next(&mut self) {
        let mut e = self.engine.lock().unwrap();
        e.incr_arp_mode();
        if e.cfg.mode == Mode::Arpeggiator {
            self.status_msg = format!("Arp: {}", e.cfg.arp_mode.label());
        }
    }

    fn arp_mode_prev(&mut self) {
        let mut e = self.engine.lock().unwrap();
        e.decr_arp_mode();
        if e.cfg.mode == Mode::Arpeggiator {
            self.status_msg = format!("Arp: {}", e.cfg.arp_mode.label());
        }
    }

    // ── Numeric edits ─────────────────────────────────────────────────────

    pub fn load_pressed(&mut self) {
        self.engine.lock().unwrap().load_seq_pressed();
        if self.editing() {
            self.status_msg = "Load slot: type digits, # to load, * to cancel".to_string();
        }
    }

    pub fn gate_channel_pressed(&mut self) {
        self.engine.lock().unwrap().gate_channel_pressed();
        self.status_msg = match self.engine.lock().unwrap().cfg.edit {
            Edit::Gate { .. }    => "Gate: 1–9 tenths of a step, # to set".to_string(),
            Edit::Channel { .. } => "Channel: 1–16, # to set".to_string(),
            _                    => "Edit closed".to_string(),
        };
    }

    pub fn time_div_pressed(&mut self) {
        self.engine.lock().unwrap().time_div_pressed();
        self.status_msg = match self.engine.lock().unwrap().cfg.edit {
            Edit::TimeDiv { .. } => "Division: 1=1/4 … 8=1/32T, # to set".to_string(),
            _                    => "Edit closed".to_string(),
        };
    }

    fn confirm(&mut self) {
        let r = self.engine.lock().unwrap().confirm();
        self.report(r);
        self.status_msg = "OK".to_string();
    }

    fn cancel(&mut self) {
        self.engine.lock().unwrap().cancel();
        self.status_msg = "Cancelled".to_string();
    }

    // ── Pots ──────────────────────────────────────────────────────────────

    pub fn tempo_up(&mut self) {
        self.tempo_pot = self.tempo_pot.saturating_add(TEMPO_POT_STEP);
        self.apply_tempo();
    }

    pub fn tempo_down(&mut self) {
        self.tempo_pot = self.tempo_pot.saturating_sub(TEMPO_POT_STEP);
        self.apply_tempo();
    }

    fn apply_tempo(&mut self) {
        let mut e = self.engine.lock().unwrap();
        e.tempo_pot(self.tempo_pot);
        self.status_msg = format!("Tempo: {} BPM", e.cfg.bpm);
    }

    pub fn bend_up(&mut self) {
        self.bend_pot = self.bend_pot.saturating_add(BEND_POT_STEP);
        let r = self.engine.lock().unwrap().bend_pot(self.bend_pot);
        self.report(r);
    }

    pub fn bend_down(&mut self) {
        self.bend_pot = self.bend_pot.saturating_sub(BEND_POT_STEP);
        let r = self.engine.lock().unwrap().bend_pot(self.bend_pot);
        self.report(r);
    }

    pub fn bend_center(&mut self) {
        self.bend_pot = u16::MAX / 2;
        let r = self.engine.lock().unwrap().bend_pot(self.bend_pot);
        self.report(r);
    }

    pub fn mod_up(&mut self) {
        self.mod_pot = self.mod_pot.saturating_add(MOD_POT_STEP);
        let r = self.engine.lock().unwrap().mod_pot(self.mod_pot);
        self.report(r);
    }

    pub fn mod_down(&mut self) {
        self.mod_pot = self.mod_pot.saturating_sub(MOD_POT_STEP);
        let r = self.engine.lock().unwrap().mod_pot(self.mod_pot);
        self.report(r);
    }
}
