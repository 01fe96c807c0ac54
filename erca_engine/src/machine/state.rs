use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::chamber::{Slot, LAST_POSITION, SLOT_COUNT};
use crate::store::{ReplicaStore, StoreKey, StoreValue};

/// A replica's mirror of the shared machine record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MachineState {
    pub open: bool,
    pub chamber: i32,
    pub slots: [i32; SLOT_COUNT],
    pub flush_lever: bool,
}

/// Field combinations that can never be repaired piecemeal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Violation {
    ChamberWhileClosed { chamber: i32 },
    ChamberOutOfRange { chamber: i32 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::ChamberWhileClosed { chamber } => {
                write!(f, "chamber at position {chamber} while the machine is closed")
            }
            Violation::ChamberOutOfRange { chamber } => {
                write!(f, "chamber at out-of-range position {chamber}")
            }
        }
    }
}

impl MachineState {
    pub fn from_store(store: &ReplicaStore) -> Self {
        let mut state = Self::default();
        for key in StoreKey::ALL {
            state.apply(key, &store.get(key));
        }
        state
    }

    pub fn from_snapshot(values: &BTreeMap<StoreKey, StoreValue>) -> Self {
        let mut state = Self::default();
        for (key, value) in values {
            state.apply(*key, value);
        }
        state
    }

    pub fn apply(&mut self, key: StoreKey, value: &StoreValue) {
        match key {
            StoreKey::MachineOpen => self.open = value.as_flag(),
            StoreKey::ChamberPosition => self.chamber = value.as_int(),
            StoreKey::PelletSlot(slot) => self.slots[slot.index()] = value.as_int(),
            StoreKey::FlushLever => self.flush_lever = value.as_flag(),
        }
    }

    pub fn slot(&self, slot: Slot) -> i32 {
        self.slots[slot.index()]
    }

    pub fn pellet_ready(&self) -> bool {
        self.slots.iter().any(|recipe| *recipe != 0)
    }

    /// Slot fed by the current chamber position.
    pub fn staged_slot(&self) -> Option<Slot> {
        Slot::for_position(self.chamber)
    }

    pub fn violations(&self) -> Vec<Violation> {
        let mut found = Vec::new();
        if !(0..=LAST_POSITION).contains(&self.chamber) {
            found.push(Violation::ChamberOutOfRange {
                chamber: self.chamber,
            });
        }
        if !self.open && self.chamber != 0 {
            found.push(Violation::ChamberWhileClosed {
                chamber: self.chamber,
            });
        }
        found
    }

    /// Write that brings a closed machine's chamber back to idle, if needed.
    /// Applying it is idempotent.
    pub fn closed_chamber_correction(&self) -> Option<StoreValue> {
        (!self.open && self.chamber != 0).then(StoreValue::zero)
    }

    /// True for the all-empty, closed record the defensive reset produces.
    pub fn is_reset(&self) -> bool {
        *self == Self::default()
    }
}

/// Writes that collapse the record to its empty, closed state.
pub fn reset_writes() -> impl Iterator<Item = (StoreKey, StoreValue)> {
    StoreKey::ALL
        .into_iter()
        .map(|key| (key, StoreValue::zero()))
}
