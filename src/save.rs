use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sequencer::{Sequence, StepNote};

#[derive(Serialize, Deserialize)]
pub struct SeqFile {
    pub length: u32,
    pub notes:  Vec<SavedNote>,
}

#[derive(Serialize, Deserialize)]
pub struct SavedNote {
    pub step:  u32,
    pub note:  u8,
    pub steps: u32,
}

/// Sequence slot storage: one JSON file per slot under `dir`.
pub struct SeqStore {
    dir: PathBuf,
}

impl SeqStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, slot: u8) -> PathBuf {
        self.dir.join(format!("seq_{slot}.json"))
    }

    /// A missing or corrupt slot loads as an empty sequence; the caller must
    /// stop playback when the result has length zero.
    pub fn load(&self, slot: u8) -> Sequence {
        match self.try_load(slot) {
            Ok(seq) => seq,
            Err(e) => {
                log::warn!("couldn't load sequence {slot}: {e:#}");
                Sequence::default()
            }
        }
    }

    fn try_load(&self, slot: u8) -> Result<Sequence> {
        let path = self.path(slot);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        let file: SeqFile = serde_json::from_str(&text)
            .with_context(|| format!("parse {}", path.display()))?;

        let mut seq = Sequence { length: file.length, ..Default::default() };
        for n in file.notes {
            if n.step >= file.length {
                continue;
            }
            seq.notes.insert(n.step, StepNote { note: n.note & 0x7F, steps: n.steps.max(1) });
        }
        Ok(seq)
    }

    pub fn save(&self, slot: u8, seq: &Sequence) -> Result<()> {
        let file = SeqFile {
            length: seq.length,
            notes: seq
                .notes
                .iter()
                .map(|(&step, n)| SavedNote { step, note: n.note, steps: n.steps })
                .collect(),
        };
        let path = self.path(slot);
        let text = serde_json::to_string(&file)?;
        fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeqStore::new(dir.path());

        let mut seq = Sequence { length: 4, ..Default::default() };
        seq.notes.insert(0, StepNote { note: 60, steps: 2 });
        seq.notes.insert(2, StepNote { note: 64, steps: 1 });

        store.save(7, &seq).unwrap();
        assert_eq!(store.load(7), seq);
    }

    #[test]
    fn missing_slot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeqStore::new(dir.path());
        assert!(store.load(42).is_empty());
    }

    #[test]
    fn corrupt_slot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("seq_3.json"), "not json").unwrap();
        let store = SeqStore::new(dir.path());
        assert!(store.load(3).is_empty());
    }

    #[test]
    fn load_drops_entries_past_the_length() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"length":2,"notes":[{"step":0,"note":60,"steps":1},{"step":5,"note":64,"steps":1}]}"#;
        fs::write(dir.path().join("seq_0.json"), json).unwrap();
        let store = SeqStore::new(dir.path());
        let seq = store.load(0);
        assert_eq!(seq.length, 2);
        assert_eq!(seq.notes.len(), 1);
    }
}
