//! Per-replica view of the shared state store.
//!
//! Writes never land here directly: the controller emits them as effects and
//! the room routes replicated ones through the relay, so every replica
//! (the writer included) applies a field change only when it is delivered.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::machine::chamber::Slot;

pub type PlayerId = u32;

/// Fields of the shared machine record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum StoreKey {
    MachineOpen,
    ChamberPosition,
    PelletSlot(Slot),
    FlushLever,
}

impl StoreKey {
    pub const ALL: [StoreKey; 8] = [
        StoreKey::PelletSlot(Slot::ALL[0]),
        StoreKey::PelletSlot(Slot::ALL[1]),
        StoreKey::PelletSlot(Slot::ALL[2]),
        StoreKey::PelletSlot(Slot::ALL[3]),
        StoreKey::PelletSlot(Slot::ALL[4]),
        StoreKey::MachineOpen,
        StoreKey::ChamberPosition,
        StoreKey::FlushLever,
    ];
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKey::MachineOpen => f.write_str("MachineOpen"),
            StoreKey::ChamberPosition => f.write_str("ChamberPosition"),
            StoreKey::PelletSlot(slot) => write!(f, "PelletSlot{slot}"),
            StoreKey::FlushLever => f.write_str("FlushLever"),
        }
    }
}

/// Tuple value stored under a key. Every field of the machine record is a
/// one-element integer tuple.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreValue(pub Vec<i32>);

impl StoreValue {
    pub fn int(value: i32) -> Self {
        StoreValue(vec![value])
    }

    pub fn flag(value: bool) -> Self {
        StoreValue(vec![i32::from(value)])
    }

    pub fn zero() -> Self {
        StoreValue::int(0)
    }

    pub fn as_int(&self) -> i32 {
        self.0.first().copied().unwrap_or(0)
    }

    pub fn as_flag(&self) -> bool {
        self.as_int() != 0
    }
}

/// How a write reaches other replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Delivery {
    Immediate,
    Batched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreFlags {
    pub send_to_clients: bool,
    pub delivery: Delivery,
}

impl StoreFlags {
    /// Replicate to every client and deliver right away.
    pub fn replicated() -> Self {
        Self {
            send_to_clients: true,
            delivery: Delivery::Immediate,
        }
    }

    pub fn local_only() -> Self {
        Self {
            send_to_clients: false,
            delivery: Delivery::Immediate,
        }
    }
}

impl Default for StoreFlags {
    fn default() -> Self {
        Self::local_only()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store variable {0:?} is not part of the machine record")]
    UnknownKey(String),
    #[error("store variable {key} received an empty tuple")]
    EmptyValue { key: String },
}

/// Age SDL variable names backing each field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreNames {
    pub machine_open: String,
    pub chamber: String,
    pub pellets: [String; 5],
    pub flush_lever: String,
}

impl Default for StoreNames {
    fn default() -> Self {
        Self {
            machine_open: "ercaPelletMachine".to_string(),
            chamber: "ercaPelletMachineChamber".to_string(),
            pellets: [
                "ercaPellet1".to_string(),
                "ercaPellet2".to_string(),
                "ercaPellet3".to_string(),
                "ercaPellet4".to_string(),
                "ercaPellet5".to_string(),
            ],
            flush_lever: "ercaPelletFlushLever".to_string(),
        }
    }
}

impl StoreNames {
    pub fn name(&self, key: StoreKey) -> &str {
        match key {
            StoreKey::MachineOpen => &self.machine_open,
            StoreKey::ChamberPosition => &self.chamber,
            StoreKey::PelletSlot(slot) => &self.pellets[slot.index()],
            StoreKey::FlushLever => &self.flush_lever,
        }
    }

    pub fn key(&self, name: &str) -> Result<StoreKey, StoreError> {
        StoreKey::ALL
            .into_iter()
            .find(|key| self.name(*key) == name)
            .ok_or_else(|| StoreError::UnknownKey(name.to_string()))
    }
}

/// One client's copy of the record plus its flags and subscriptions.
#[derive(Debug, Clone, Default)]
pub struct ReplicaStore {
    values: BTreeMap<StoreKey, StoreValue>,
    flags: BTreeMap<StoreKey, StoreFlags>,
    subscriptions: BTreeSet<StoreKey>,
}

impl ReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the table from persisted values; fields with no persisted value
    /// keep their defaults.
    pub fn from_persisted(persisted: &BTreeMap<StoreKey, StoreValue>) -> Self {
        let mut store = Self::new();
        store.values.extend(
            persisted
                .iter()
                .map(|(key, value)| (*key, value.clone())),
        );
        store
    }

    pub fn set_flags(&mut self, key: StoreKey, flags: StoreFlags) {
        self.flags.insert(key, flags);
    }

    pub fn flags(&self, key: StoreKey) -> StoreFlags {
        self.flags.get(&key).copied().unwrap_or_default()
    }

    pub fn subscribe(&mut self, key: StoreKey) {
        self.subscriptions.insert(key);
    }

    pub fn is_subscribed(&self, key: StoreKey) -> bool {
        self.subscriptions.contains(&key)
    }

    pub fn get(&self, key: StoreKey) -> StoreValue {
        self.values.get(&key).cloned().unwrap_or_else(StoreValue::zero)
    }

    /// Applies a delivered write. Returns whether the stored tuple changed.
    pub fn apply(&mut self, key: StoreKey, value: StoreValue) -> Result<bool, StoreError> {
        if value.0.is_empty() {
            return Err(StoreError::EmptyValue {
                key: key.to_string(),
            });
        }
        let previous = self.values.insert(key, value.clone());
        Ok(previous.as_ref() != Some(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_read_as_zero() {
        let store = ReplicaStore::new();
        assert_eq!(store.get(StoreKey::ChamberPosition).as_int(), 0);
        assert!(!store.get(StoreKey::MachineOpen).as_flag());
    }

    #[test]
    fn apply_reports_whether_value_changed() {
        let mut store = ReplicaStore::new();
        assert_eq!(store.apply(StoreKey::FlushLever, StoreValue::flag(true)), Ok(true));
        assert_eq!(store.apply(StoreKey::FlushLever, StoreValue::flag(true)), Ok(false));
        assert!(store.apply(StoreKey::FlushLever, StoreValue(Vec::new())).is_err());
    }

    #[test]
    fn names_map_back_to_keys() {
        let names = StoreNames::default();
        for key in StoreKey::ALL {
            assert_eq!(names.key(names.name(key)), Ok(key));
        }
        assert_eq!(
            names.key("ercaBakeryOven"),
            Err(StoreError::UnknownKey("ercaBakeryOven".to_string()))
        );
    }

    #[test]
    fn flags_default_to_local_only() {
        let mut store = ReplicaStore::new();
        assert!(!store.flags(StoreKey::MachineOpen).send_to_clients);
        store.set_flags(StoreKey::MachineOpen, StoreFlags::replicated());
        assert!(store.flags(StoreKey::MachineOpen).send_to_clients);
    }
}
