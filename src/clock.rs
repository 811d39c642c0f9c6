use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::Engine;

// ── Tick arithmetic ───────────────────────────────────────────────────────────

/// 240 ticks per quarter note; the tick counter wraps after two quarters.
pub const TICKS_PER_QUARTER: u32 = 240;
pub const TICK_WRAP: u32 = 480;
/// MIDI clock is 24 ppqn, so one clock pulse every 10 ticks.
pub const TICKS_PER_CLOCK: u32 = 10;

pub const MIN_BPM: u16 = 30;
pub const MAX_BPM: u16 = 240;

/// Timer period for one tick at the given tempo.
pub fn period_us(bpm: u16) -> u64 {
    60_000_000 / (bpm as u64 * TICKS_PER_QUARTER as u64)
}

/// Width of one sequencer step in ticks.
pub fn step_span(step_clocks: u32) -> u32 {
    step_clocks * TICKS_PER_CLOCK
}

pub fn is_step_start(tick: u32, step_clocks: u32) -> bool {
    tick % step_span(step_clocks) == 0
}

/// The gate-expiry instant: `gate_tenths/10` of a step after each step start.
pub fn is_gate_expiry(tick: u32, step_clocks: u32, gate_tenths: u8) -> bool {
    let offset = (10 - gate_tenths as u32) * step_clocks;
    (tick + offset) % step_span(step_clocks) == 0
}

// ── Time division ─────────────────────────────────────────────────────────────

/// Step length selector, expressed as 24-ppqn clocks per step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeDivision {
    #[default]
    Quarter,
    QuarterTriplet,
    Eighth,
    EighthTriplet,
    Sixteenth,
    SixteenthTriplet,
    ThirtySecond,
    ThirtySecondTriplet,
}

impl TimeDivision {
    pub const ALL: [TimeDivision; 8] = [
        TimeDivision::Quarter,
        TimeDivision::QuarterTriplet,
        TimeDivision::Eighth,
        TimeDivision::EighthTriplet,
        TimeDivision::Sixteenth,
        TimeDivision::SixteenthTriplet,
        TimeDivision::ThirtySecond,
        TimeDivision::ThirtySecondTriplet,
    ];

    pub fn clocks_per_step(self) -> u32 {
        match self {
            Self::Quarter             => 24,
            Self::QuarterTriplet      => 16,
            Self::Eighth              => 12,
            Self::EighthTriplet       => 8,
            Self::Sixteenth           => 6,
            Self::SixteenthTriplet    => 4,
            Self::ThirtySecond        => 3,
            Self::ThirtySecondTriplet => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Quarter             => "1/4",
            Self::QuarterTriplet      => "1/4T",
            Self::Eighth              => "1/8",
            Self::EighthTriplet       => "1/8T",
            Self::Sixteenth           => "1/16",
            Self::SixteenthTriplet    => "1/16T",
            Self::ThirtySecond        => "1/32",
            Self::ThirtySecondTriplet => "1/32T",
        }
    }

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|&d| d == self).unwrap_or(0)
    }
}

// ── Timer control ─────────────────────────────────────────────────────────────

/// Shared timer state between the engine (input side) and the ticker thread.
/// Both fields are single-word atomics so tempo changes and arm/disarm never
/// need the engine lock.
pub struct TimerCtl {
    enabled:   AtomicBool,
    period_us: AtomicU64,
}

impl TimerCtl {
    pub fn new(bpm: u16) -> Self {
        Self {
            enabled:   AtomicBool::new(false),
            period_us: AtomicU64::new(period_us(bpm)),
        }
    }

    pub fn arm(&self)             { self.enabled.store(true, Ordering::Relaxed); }
    pub fn disarm(&self)          { self.enabled.store(false, Ordering::Relaxed); }
    pub fn is_armed(&self) -> bool { self.enabled.load(Ordering::Relaxed) }

    /// Reprogram the tick period for a new tempo.
    pub fn retime(&self, bpm: u16) {
        self.period_us.store(period_us(bpm), Ordering::Relaxed);
    }

    pub fn period(&self) -> Duration {
        Duration::from_micros(self.period_us.load(Ordering::Relaxed))
    }
}

// ── Ticker thread ─────────────────────────────────────────────────────────────

const IDLE_POLL: Duration = Duration::from_millis(2);

/// Drive `Engine::tick` at the current tempo until shutdown.  A tick that
/// returns `Err` disarms the timer and logs instead of re-faulting every
/// period; play/pause or a mode switch re-arms it.
pub fn spawn_ticker(
    engine: Arc<Mutex<Engine>>,
    ctl: Arc<TimerCtl>,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut next = Instant::now();
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            if !ctl.is_armed() {
                thread::sleep(IDLE_POLL);
                next = Instant::now();
                continue;
            }

            if let Err(e) = engine.lock().unwrap().tick() {
                ctl.disarm();
                log::error!("tick failed, timer disabled: {e:#}");
                continue;
            }

            // Absolute schedule so sleep jitter never accumulates as drift.
            next += ctl.period();
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                next = now;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NullDisplay;
    use crate::midi::{FailingSink, MidiOut};
    use crate::save::SeqStore;

    #[test]
    fn clock_values_match_midi_standard() {
        let clocks: Vec<u32> = TimeDivision::ALL.iter().map(|d| d.clocks_per_step()).collect();
        assert_eq!(clocks, vec![24, 16, 12, 8, 6, 4, 3, 2]);
    }

    #[test]
    fn every_step_span_divides_the_tick_wrap() {
        // Wrapping at 480 must not shift any step or gate boundary.
        for div in TimeDivision::ALL {
            assert_eq!(TICK_WRAP % step_span(div.clocks_per_step()), 0);
        }
    }

    #[test]
    fn gate_expiry_lands_gate_tenths_into_the_step() {
        let sc = 24; // 1/4: 240-tick step
        for gate in 1..=9u8 {
            for t in 0..TICK_WRAP {
                let expect = t % 240 == gate as u32 * 24;
                assert_eq!(is_gate_expiry(t, sc, gate), expect, "gate={gate} t={t}");
            }
        }
    }

    #[test]
    fn period_scales_with_tempo() {
        assert_eq!(period_us(60), 60_000_000 / (60 * 240));
        assert!(period_us(MIN_BPM) > period_us(MAX_BPM));
    }

    #[test]
    fn a_failing_tick_disarms_the_timer() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = Arc::new(TimerCtl::new(240));
        let engine = Arc::new(Mutex::new(Engine::new(
            MidiOut::new(Box::new(FailingSink)),
            SeqStore::new(dir.path()),
            Box::new(NullDisplay),
            Arc::clone(&ctl),
        )));
        let shutdown = Arc::new(AtomicBool::new(false));
        ctl.arm();
        let ticker = spawn_ticker(Arc::clone(&engine), Arc::clone(&ctl), Arc::clone(&shutdown));

        // The first tick flushes a clock byte, hits the broken transport and
        // must disarm instead of re-faulting every period.
        for _ in 0..500 {
            if !ctl.is_armed() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(!ctl.is_armed());

        shutdown.store(true, Ordering::Relaxed);
        ticker.join().unwrap();
    }
}
