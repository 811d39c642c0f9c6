// ── Arp mode ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArpMode {
    Up,
    Down,
    Inclusive,
    Exclusive,
    Random,
    PressOrder,
    UpX2,
    DownX2,
}

impl ArpMode {
    pub const ALL: [ArpMode; 8] = [
        ArpMode::Up,
        ArpMode::Down,
        ArpMode::Inclusive,
        ArpMode::Exclusive,
        ArpMode::Random,
        ArpMode::PressOrder,
        ArpMode::UpX2,
        ArpMode::DownX2,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Up         => "Up",
            Self::Down       => "Down",
            Self::Inclusive  => "Inclusive",
            Self::Exclusive  => "Exclusive",
            Self::Random     => "Random",
            Self::PressOrder => "Press Order",
            Self::UpX2       => "Up x2",
            Self::DownX2     => "Down x2",
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

// ── Note ordering engine ──────────────────────────────────────────────────────

/// Map the held-note set to the ordered playback sequence for one arp cycle.
/// RANDOM keeps press order; the random draw happens at play time, per step.
pub fn order_notes(mode: ArpMode, held: &[u8]) -> Vec<u8> {
    let mut asc = held.to_vec();
    match mode {
        ArpMode::Random | ArpMode::PressOrder => asc,
        ArpMode::Up => {
            asc.sort_unstable();
            asc
        }
        ArpMode::Down => {
            asc.sort_unstable_by(|a, b| b.cmp(a));
            asc
        }
        ArpMode::Inclusive => {
            asc.sort_unstable();
            let mut out = asc.clone();
            out.extend(asc.iter().rev());
            out
        }
        ArpMode::Exclusive => {
            asc.sort_unstable();
            let mut out = asc.clone();
            if asc.len() > 2 {
                out.extend(asc[1..asc.len() - 1].iter().rev());
            }
            out
        }
        ArpMode::UpX2 => {
            asc.sort_unstable();
            asc.iter().flat_map(|&n| [n, n]).collect()
        }
        ArpMode::DownX2 => {
            asc.sort_unstable_by(|a, b| b.cmp(a));
            asc.iter().flat_map(|&n| [n, n]).collect()
        }
    }
}

// ── Held-note collection ──────────────────────────────────────────────────────

/// Press-ordered held notes plus the live press counter.  Duplicates are
/// allowed; each press/release pair is independent.
///
/// In hold mode released keys keep arpeggiating: the first press after the
/// physical key count returns to zero starts a fresh chord, and only turning
/// hold off clears everything.
#[derive(Debug, Default)]
pub struct Arpeggiator {
    pub held:    Vec<u8>,
    pub pressed: u32,
    pub hold:    bool,
}

impl Arpeggiator {
    pub fn note_on(&mut self, note: u8) {
        if self.hold && self.pressed == 0 {
            self.held.clear();
        }
        self.pressed += 1;
        self.held.push(note);
    }

    pub fn note_off(&mut self, note: u8) {
        self.pressed = self.pressed.saturating_sub(1);
        if !self.hold {
            if let Some(pos) = self.held.iter().position(|&n| n == note) {
                self.held.remove(pos);
            }
        }
    }

    /// Toggle hold; turning it off drops the accumulated chord.
    pub fn toggle_hold(&mut self) {
        self.hold = !self.hold;
        if !self.hold {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.held.clear();
        self.pressed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELD: [u8; 3] = [64, 60, 67];

    #[test]
    fn orderings_for_three_held_notes() {
        assert_eq!(order_notes(ArpMode::Up, &HELD), vec![60, 64, 67]);
        assert_eq!(order_notes(ArpMode::Down, &HELD), vec![67, 64, 60]);
        assert_eq!(order_notes(ArpMode::Inclusive, &HELD), vec![60, 64, 67, 67, 64, 60]);
        assert_eq!(order_notes(ArpMode::Exclusive, &HELD), vec![60, 64, 67, 64]);
        assert_eq!(order_notes(ArpMode::UpX2, &HELD), vec![60, 60, 64, 64, 67, 67]);
        assert_eq!(order_notes(ArpMode::DownX2, &HELD), vec![67, 67, 64, 64, 60, 60]);
        assert_eq!(order_notes(ArpMode::PressOrder, &HELD), vec![64, 60, 67]);
        assert_eq!(order_notes(ArpMode::Random, &HELD), vec![64, 60, 67]);
    }

    #[test]
    fn exclusive_of_two_notes_has_no_repeats() {
        assert_eq!(order_notes(ArpMode::Exclusive, &[64, 60]), vec![60, 64]);
    }

    #[test]
    fn press_and_release_maintain_the_chord() {
        let mut arp = Arpeggiator::default();
        arp.note_on(60);
        arp.note_on(64);
        arp.note_off(60);
        assert_eq!(arp.held, vec![64]);
        assert_eq!(arp.pressed, 1);
    }

    #[test]
    fn duplicate_presses_are_independent() {
        let mut arp = Arpeggiator::default();
        arp.note_on(60);
        arp.note_on(60);
        arp.note_off(60);
        assert_eq!(arp.held, vec![60]);
    }

    #[test]
    fn hold_keeps_released_notes_until_cleared() {
        let mut arp = Arpeggiator::default();
        arp.hold = true;
        arp.note_on(60);
        arp.note_on(64);
        arp.note_off(60);
        arp.note_off(64);
        assert_eq!(arp.held, vec![60, 64]);

        // First press after the count hits zero starts a new chord.
        arp.note_on(67);
        assert_eq!(arp.held, vec![67]);
        arp.note_on(71);
        assert_eq!(arp.held, vec![67, 71]);

        arp.toggle_hold();
        assert!(arp.held.is_empty());
        assert!(!arp.hold);
    }
}
