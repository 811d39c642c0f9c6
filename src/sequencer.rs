use std::collections::BTreeMap;

// ── Sequence model ────────────────────────────────────────────────────────────

/// A note beginning at some step.  `steps` is the sustain length in steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepNote {
    pub note:  u8,
    pub steps: u32,
}

/// One recorded track: a total step count plus a sparse start-step → note
/// mapping.  Only steps where a note begins have an entry; a note occupies
/// `[start, start + steps)` and may overlap its neighbours.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sequence {
    pub length: u32,
    pub notes:  BTreeMap<u32, StepNote>,
}

impl Sequence {
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn note_at(&self, step: u32) -> Option<StepNote> {
        self.notes.get(&step).copied()
    }

    pub fn clear(&mut self) {
        self.length = 0;
        self.notes.clear();
    }
}

/// A note that has been sent and not yet released.  `remaining` counts the
/// sustain left in steps; the gate-expiry pass decrements it once per step
/// and releases the note at zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sounding {
    pub note:      u8,
    pub remaining: u32,
}

// ── Recorder ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
struct RecordingNote {
    note:    u8,
    elapsed: u32,
}

/// Event-driven recorder: reconstructs variable-length, possibly overlapping
/// notes from live note-on/off and explicit advance events, without per-tick
/// samples.
///
/// Step-advance rules: an explicit advance always moves to the next step.
/// A note-on moves on first when other notes are still open, so a new press
/// ends the step the previous notes started in.  A note-off moves on only
/// when the released note has not yet crossed a step boundary, which keeps
/// every committed duration at least one step.
#[derive(Debug, Default)]
pub struct Recorder {
    open:      Vec<RecordingNote>,
    committed: Vec<u32>,
}

impl Recorder {
    pub fn clear(&mut self) {
        self.open.clear();
        self.committed.clear();
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Explicit blank/advance: grow the sequence by one step and age every
    /// open note.
    pub fn advance(&mut self, seq: &mut Sequence) {
        seq.length += 1;
        for r in &mut self.open {
            r.elapsed += 1;
        }
    }

    pub fn note_on(&mut self, seq: &mut Sequence, note: u8) {
        if !self.open.is_empty() {
            self.advance(seq);
        }
        self.open.push(RecordingNote { note, elapsed: 0 });
    }

    /// Commit the most-recently-opened note matching the released pitch at
    /// `start = length - elapsed`.
    pub fn note_off(&mut self, seq: &mut Sequence, note: u8) {
        let Some(pos) = self.open.iter().rposition(|r| r.note == note) else {
            return;
        };
        if self.open[pos].elapsed == 0 {
            self.advance(seq);
        }
        let rec = self.open.remove(pos);
        let start = seq.length.saturating_sub(rec.elapsed);
        seq.notes.insert(start, StepNote { note: rec.note, steps: rec.elapsed });
        self.committed.push(start);
    }

    /// Remove the last recorded step: drop the most recent committed entry
    /// and shrink the sequence by one step.  Open notes cannot have started
    /// before step 0, so their elapsed count is capped at the new length.
    pub fn undo(&mut self, seq: &mut Sequence) {
        if let Some(start) = self.committed.pop() {
            seq.notes.remove(&start);
        }
        seq.length = seq.length.saturating_sub(1);
        for r in &mut self.open {
            r.elapsed = r.elapsed.min(seq.length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_held_over_two_advances() {
        let mut seq = Sequence::default();
        let mut rec = Recorder::default();
        rec.note_on(&mut seq, 60);
        rec.advance(&mut seq);
        rec.advance(&mut seq);
        rec.note_off(&mut seq, 60);

        assert_eq!(seq.length, 2);
        assert_eq!(seq.note_at(0), Some(StepNote { note: 60, steps: 2 }));
        assert_eq!(seq.notes.len(), 1);
    }

    #[test]
    fn tap_within_one_step_still_occupies_a_step() {
        let mut seq = Sequence::default();
        let mut rec = Recorder::default();
        rec.note_on(&mut seq, 60);
        rec.note_off(&mut seq, 60);

        assert_eq!(seq.length, 1);
        assert_eq!(seq.note_at(0), Some(StepNote { note: 60, steps: 1 }));
    }

    #[test]
    fn melody_without_explicit_advances() {
        let mut seq = Sequence::default();
        let mut rec = Recorder::default();
        for note in [60, 62, 64] {
            rec.note_on(&mut seq, note);
            rec.note_off(&mut seq, note);
        }

        assert_eq!(seq.length, 3);
        assert_eq!(seq.note_at(0), Some(StepNote { note: 60, steps: 1 }));
        assert_eq!(seq.note_at(1), Some(StepNote { note: 62, steps: 1 }));
        assert_eq!(seq.note_at(2), Some(StepNote { note: 64, steps: 1 }));
    }

    #[test]
    fn overlapping_notes_reconstruct() {
        let mut seq = Sequence::default();
        let mut rec = Recorder::default();
        rec.note_on(&mut seq, 60);
        rec.advance(&mut seq);
        rec.note_on(&mut seq, 64); // advances: 60 was still open
        rec.advance(&mut seq);
        rec.note_off(&mut seq, 60);
        rec.note_off(&mut seq, 64);

        assert_eq!(seq.note_at(0), Some(StepNote { note: 60, steps: 3 }));
        assert_eq!(seq.note_at(2), Some(StepNote { note: 64, steps: 1 }));
        assert_eq!(seq.length, 3);
    }

    #[test]
    fn duplicate_pitch_release_closes_the_most_recent() {
        let mut seq = Sequence::default();
        let mut rec = Recorder::default();
        rec.note_on(&mut seq, 60);
        rec.advance(&mut seq);
        rec.note_on(&mut seq, 60);
        rec.note_off(&mut seq, 60); // the second press, elapsed 0
        assert_eq!(seq.note_at(2), Some(StepNote { note: 60, steps: 1 }));
        rec.advance(&mut seq);
        rec.note_off(&mut seq, 60); // the first press
        assert_eq!(seq.note_at(0), Some(StepNote { note: 60, steps: 4 }));
        assert_eq!(seq.length, 4);
    }

    #[test]
    fn undo_removes_last_committed_entry() {
        let mut seq = Sequence::default();
        let mut rec = Recorder::default();
        rec.note_on(&mut seq, 60);
        rec.note_off(&mut seq, 60);
        rec.note_on(&mut seq, 62);
        rec.note_off(&mut seq, 62);
        assert_eq!(seq.length, 2);

        rec.undo(&mut seq);
        assert_eq!(seq.length, 1);
        assert_eq!(seq.note_at(1), None);
        assert_eq!(seq.note_at(0), Some(StepNote { note: 60, steps: 1 }));

        rec.undo(&mut seq);
        assert!(seq.is_empty());
        rec.undo(&mut seq); // nothing left, stays empty
        assert_eq!(seq.length, 0);
    }

    #[test]
    fn undo_while_a_note_is_open_keeps_starts_in_range() {
        let mut seq = Sequence::default();
        let mut rec = Recorder::default();
        rec.note_on(&mut seq, 60);
        rec.advance(&mut seq);
        rec.undo(&mut seq);
        rec.note_off(&mut seq, 60);

        assert_eq!(seq.length, 1);
        assert_eq!(seq.note_at(0), Some(StepNote { note: 60, steps: 1 }));
    }

    #[test]
    fn release_without_matching_press_is_ignored() {
        let mut seq = Sequence::default();
        let mut rec = Recorder::default();
        rec.note_off(&mut seq, 60);
        assert!(seq.is_empty());
    }
}
