//! Potentiometer value mapping.  Raw readings are 16-bit ADC samples; each
//! mapping carries enough hysteresis that ADC jitter never retriggers a
//! tempo or controller change.

use crate::clock::{MAX_BPM, MIN_BPM};
use crate::midi::{BEND_CENTER, BEND_MAX};

const POT_MAX: u32 = u16::MAX as u32;

/// Linear map to the 30–240 BPM tempo range.
pub fn pot_to_bpm(raw: u16) -> u16 {
    (MIN_BPM as u32 + raw as u32 * (MAX_BPM - MIN_BPM) as u32 / POT_MAX) as u16
}

/// Map to the 14-bit pitch-bend range, with a detent that snaps readings
/// near the middle to the exact center value.
pub fn pot_to_bend(raw: u16) -> u16 {
    let bend = (raw as u32 * BEND_MAX as u32 / POT_MAX) as u16;
    const DETENT: u16 = 0x0100;
    if bend.abs_diff(BEND_CENTER) < DETENT {
        BEND_CENTER
    } else {
        bend
    }
}

/// Map to the 7-bit mod-wheel range.
pub fn pot_to_mod(raw: u16) -> u8 {
    (raw >> 9) as u8
}

/// Suppress changes smaller than the threshold.  `accept` returns the new
/// value only when it moved far enough from the last accepted one.
#[derive(Debug)]
pub struct Hysteresis {
    last:      u16,
    threshold: u16,
}

impl Hysteresis {
    pub fn new(initial: u16, threshold: u16) -> Self {
        Self { last: initial, threshold }
    }

    pub fn accept(&mut self, value: u16) -> Option<u16> {
        if value.abs_diff(self.last) > self.threshold {
            self.last = value;
            Some(value)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempo_map_covers_the_bpm_range() {
        assert_eq!(pot_to_bpm(0), MIN_BPM);
        assert_eq!(pot_to_bpm(u16::MAX), MAX_BPM);
        let mid = pot_to_bpm(u16::MAX / 2);
        assert!((130..=140).contains(&mid));
    }

    #[test]
    fn bend_map_snaps_to_center() {
        assert_eq!(pot_to_bend(0), 0);
        assert_eq!(pot_to_bend(u16::MAX), BEND_MAX);
        assert_eq!(pot_to_bend(u16::MAX / 2), BEND_CENTER);
        assert_eq!(pot_to_bend(u16::MAX / 2 + 900), BEND_CENTER);
    }

    #[test]
    fn mod_map_covers_controller_range() {
        assert_eq!(pot_to_mod(0), 0);
        assert_eq!(pot_to_mod(u16::MAX), 127);
    }

    #[test]
    fn hysteresis_suppresses_jitter() {
        let mut h = Hysteresis::new(100, 2);
        assert_eq!(h.accept(101), None);
        assert_eq!(h.accept(99), None);
        assert_eq!(h.accept(104), Some(104));
        assert_eq!(h.accept(103), None);
    }
}
