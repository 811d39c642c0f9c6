use crate::clock::TimeDivision;
use crate::sequencer::Sequence;

pub const NUM_CHANNELS: usize = 16;
/// Channel 16 can be switched to forward live key presses instead of
/// feeding its sequence.
pub const KEYBOARD_CHANNEL: usize = NUM_CHANNELS - 1;

// ── Channels ──────────────────────────────────────────────────────────────────

/// One of the 16 independently-clocked step sequences.
#[derive(Clone, Debug, Default)]
pub struct MultiChannel {
    pub sequence: Sequence,
    pub time_div: TimeDivision,
}

/// 16 channels sharing one global 24-ppqn step clock.  Channel step indices
/// derive from `global_clock / clocks_per_step mod length`, so differently
/// timed channels stay phase-locked without per-channel counters.
#[derive(Debug)]
pub struct MultiSeq {
    pub channels: Vec<MultiChannel>,
    /// Indices of channels with a non-empty sequence, rebuilt on every load
    /// or clear so the tick path only visits active channels.
    pub active: Vec<usize>,
    /// Full pattern period in 24-ppqn clocks: the LCM of
    /// `length × clocks_per_step` over active channels.  Zero when nothing
    /// is loaded, which blocks play from starting.
    pub period: u64,
}

impl Default for MultiSeq {
    fn default() -> Self {
        Self {
            channels: vec![MultiChannel::default(); NUM_CHANNELS],
            active: Vec::new(),
            period: 0,
        }
    }
}

impl MultiSeq {
    pub fn set_channel(&mut self, idx: usize, sequence: Sequence) {
        if let Some(ch) = self.channels.get_mut(idx) {
            ch.sequence = sequence;
            self.rebuild();
        }
    }

    pub fn clear_channel(&mut self, idx: usize) {
        if let Some(ch) = self.channels.get_mut(idx) {
            ch.sequence.clear();
            self.rebuild();
        }
    }

    pub fn set_time_div(&mut self, idx: usize, div: TimeDivision) {
        if let Some(ch) = self.channels.get_mut(idx) {
            ch.time_div = div;
            self.rebuild();
        }
    }

    pub fn can_play(&self) -> bool {
        self.period > 0
    }

    /// Active step of channel `idx` at the given global clock count.
    pub fn step_index(&self, idx: usize, global_clock: u64) -> u32 {
        let ch = &self.channels[idx];
        let sc = ch.time_div.clocks_per_step() as u64;
        ((global_clock / sc) % ch.sequence.length as u64) as u32
    }

    fn rebuild(&mut self) {
        self.active = (0..self.channels.len())
            .filter(|&i| !self.channels[i].sequence.is_empty())
            .collect();
        self.period = self.active.iter().fold(0u64, |acc, &i| {
            let ch = &self.channels[i];
            let span = ch.sequence.length as u64 * ch.time_div.clocks_per_step() as u64;
            if acc == 0 { span } else { lcm(acc, span) }
        });
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::StepNote;

    fn seq_of_len(length: u32) -> Sequence {
        let mut seq = Sequence { length, ..Default::default() };
        for step in 0..length {
            seq.notes.insert(step, StepNote { note: 60 + step as u8, steps: 1 });
        }
        seq
    }

    #[test]
    fn step_index_derivation() {
        let mut multi = MultiSeq::default();
        multi.set_channel(0, seq_of_len(4));
        multi.set_time_div(0, TimeDivision::Eighth); // 12 clocks per step
        assert_eq!(multi.step_index(0, 30), 2); // ⌊30/12⌋ mod 4
        assert_eq!(multi.step_index(0, 0), 0);
        assert_eq!(multi.step_index(0, 48), 0); // wrapped
    }

    #[test]
    fn period_is_lcm_of_channel_spans() {
        let mut multi = MultiSeq::default();
        assert!(!multi.can_play());

        multi.set_channel(0, seq_of_len(4)); // 4 × 24 = 96 clocks
        assert_eq!(multi.period, 96);

        multi.set_time_div(1, TimeDivision::Eighth);
        multi.set_channel(1, seq_of_len(3)); // 3 × 12 = 36 clocks
        assert_eq!(multi.period, 288); // lcm(96, 36)
        assert!(multi.can_play());

        multi.clear_channel(0);
        assert_eq!(multi.period, 36);
        multi.clear_channel(1);
        assert!(!multi.can_play());
    }

    #[test]
    fn active_set_tracks_loads_and_clears() {
        let mut multi = MultiSeq::default();
        multi.set_channel(3, seq_of_len(2));
        multi.set_channel(7, seq_of_len(1));
        assert_eq!(multi.active, vec![3, 7]);
        multi.clear_channel(3);
        assert_eq!(multi.active, vec![7]);
    }
}
