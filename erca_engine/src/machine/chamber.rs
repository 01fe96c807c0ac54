use std::fmt;

use serde::Serialize;

/// Number of pellet slots the chamber rotates through.
pub const SLOT_COUNT: usize = 5;

/// Highest chamber position. Spitting while parked here is corruption.
pub const LAST_POSITION: i32 = SLOT_COUNT as i32;

/// One of the five pellet slots, numbered 1..=5 like the chamber positions
/// that feed from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Slot(u8);

impl Slot {
    pub const ALL: [Slot; SLOT_COUNT] = [Slot(1), Slot(2), Slot(3), Slot(4), Slot(5)];

    pub fn new(number: u8) -> Option<Self> {
        (1..=SLOT_COUNT as u8).contains(&number).then_some(Slot(number))
    }

    /// Slot fed by the given chamber position; position 0 feeds nothing.
    pub fn for_position(position: i32) -> Option<Self> {
        u8::try_from(position).ok().and_then(Slot::new)
    }

    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    pub fn position(self) -> i32 {
        i32::from(self.0)
    }

    pub fn stop(self) -> &'static ChamberStop {
        &CHAMBER_STOPS[self.index()]
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Responder states used for one chamber position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChamberStop {
    pub slot: Slot,
    pub chamber_state: &'static str,
    pub pellet_state: &'static str,
    pub flush_state: &'static str,
}

pub const CHAMBER_STOPS: [ChamberStop; SLOT_COUNT] = [
    ChamberStop {
        slot: Slot(1),
        chamber_state: "Chamber1",
        pellet_state: "pellet1",
        flush_state: "flush1",
    },
    ChamberStop {
        slot: Slot(2),
        chamber_state: "Chamber2",
        pellet_state: "pellet2",
        flush_state: "flush2",
    },
    ChamberStop {
        slot: Slot(3),
        chamber_state: "Chamber3",
        pellet_state: "pellet3",
        flush_state: "flush3",
    },
    ChamberStop {
        slot: Slot(4),
        chamber_state: "Chamber4",
        pellet_state: "pellet4",
        flush_state: "flush4",
    },
    ChamberStop {
        slot: Slot(5),
        chamber_state: "Chamber5",
        pellet_state: "pellet5",
        flush_state: "flush5",
    },
];
