//! Per-downstream version timeline

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which partition a tracked sequence belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Current,
    Pending,
    Past,
}

/// Tag stored per sequence. `order` is a timeline-local logical clock so
/// pending and past keep insertion / demotion order independently of the
/// sequence numbers themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Current,
    Pending { order: u64 },
    Past { order: u64 },
}

impl Slot {
    fn partition(&self) -> Partition {
        match self {
            Slot::Current => Partition::Current,
            Slot::Pending { .. } => Partition::Pending,
            Slot::Past { .. } => Partition::Past,
        }
    }
}

/// Why a timeline mutation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineError {
    AlreadyTracked,
    NotPending,
    NotPast,
}

/// Current / pending / past partitions of one downstream.
///
/// Every tracked sequence maps to exactly one tag, so the partitions are
/// disjoint by construction and at most one sequence is current. Mutations
/// either fully apply or leave the timeline untouched.
#[derive(Debug, Clone, Default)]
pub struct VersionTimeline {
    slots: BTreeMap<i64, Slot>,
    clock: u64,
}

impl VersionTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// The currently applied sequence
    pub fn current(&self) -> Option<i64> {
        self.slots
            .iter()
            .find(|(_, slot)| matches!(slot, Slot::Current))
            .map(|(seq, _)| *seq)
    }

    /// Pending sequences in the order they were staged
    pub fn pending(&self) -> Vec<i64> {
        let mut pending: Vec<(u64, i64)> = self
            .slots
            .iter()
            .filter_map(|(seq, slot)| match slot {
                Slot::Pending { order } => Some((*order, *seq)),
                _ => None,
            })
            .collect();
        pending.sort_unstable();
        pending.into_iter().map(|(_, seq)| seq).collect()
    }

    /// Former current sequences, oldest demotion first
    pub fn past(&self) -> Vec<i64> {
        let mut past: Vec<(u64, i64)> = self
            .slots
            .iter()
            .filter_map(|(seq, slot)| match slot {
                Slot::Past { order } => Some((*order, *seq)),
                _ => None,
            })
            .collect();
        past.sort_unstable();
        past.into_iter().map(|(_, seq)| seq).collect()
    }

    pub fn partition_of(&self, sequence: i64) -> Option<Partition> {
        self.slots.get(&sequence).map(Slot::partition)
    }

    pub fn contains(&self, sequence: i64) -> bool {
        self.slots.contains_key(&sequence)
    }

    /// Every sequence ever tracked, ascending
    pub fn tracked(&self) -> Vec<i64> {
        self.slots.keys().copied().collect()
    }

    /// Stage a new sequence as pending
    pub fn mark_pending(&mut self, sequence: i64) -> Result<(), TimelineError> {
        if self.slots.contains_key(&sequence) {
            return Err(TimelineError::AlreadyTracked);
        }
        let order = self.tick();
        self.slots.insert(sequence, Slot::Pending { order });
        Ok(())
    }

    /// Move a pending sequence to current, demoting the prior current.
    ///
    /// Returns the demoted sequence, if any.
    pub fn promote(&mut self, sequence: i64) -> Result<Option<i64>, TimelineError> {
        if !matches!(self.slots.get(&sequence), Some(Slot::Pending { .. })) {
            return Err(TimelineError::NotPending);
        }
        let demoted = self.demote_current();
        self.slots.insert(sequence, Slot::Current);
        Ok(demoted)
    }

    /// Re-designate a past sequence as current, demoting the prior current.
    ///
    /// Returns the demoted sequence, if any.
    pub fn rollback(&mut self, sequence: i64) -> Result<Option<i64>, TimelineError> {
        if !matches!(self.slots.get(&sequence), Some(Slot::Past { .. })) {
            return Err(TimelineError::NotPast);
        }
        let demoted = self.demote_current();
        self.slots.insert(sequence, Slot::Current);
        Ok(demoted)
    }

    fn demote_current(&mut self) -> Option<i64> {
        let current = self.current()?;
        let order = self.tick();
        self.slots.insert(current, Slot::Past { order });
        Some(current)
    }
}
