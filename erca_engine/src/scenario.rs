use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;
use thiserror::Error;

use crate::config::MachineConfig;
use crate::cues::CuePlayer;
use crate::handoff::ChronicleVault;
use crate::lock::ControlKey;
use crate::machine::chamber::Slot;
use crate::machine::{Activator, MachineSnapshot, MachineState};
use crate::room::{AvatarState, InvariantReport, Room, RoomError, TransferRecord};
use crate::store::{PlayerId, StoreKey, StoreValue};

/// Scripted room sessions the CLI and tests can run by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ScenarioSlug {
    OpenEmpty,
    SpitCooldown,
    CaveLink,
    FlushInFlight,
    ReentryReset,
    SiloLink,
    CancelTake,
    FlushOpen,
}

impl ScenarioSlug {
    pub const ALL: [ScenarioSlug; 8] = [
        ScenarioSlug::OpenEmpty,
        ScenarioSlug::SpitCooldown,
        ScenarioSlug::CaveLink,
        ScenarioSlug::FlushInFlight,
        ScenarioSlug::ReentryReset,
        ScenarioSlug::SiloLink,
        ScenarioSlug::CancelTake,
        ScenarioSlug::FlushOpen,
    ];

    pub fn parse(value: &str) -> Result<Self, ScenarioError> {
        let slug = match value.trim().to_ascii_lowercase().as_str() {
            "a" | "open-empty" => ScenarioSlug::OpenEmpty,
            "b" | "spit-cooldown" => ScenarioSlug::SpitCooldown,
            "c" | "cave-link" => ScenarioSlug::CaveLink,
            "d" | "flush-in-flight" => ScenarioSlug::FlushInFlight,
            "e" | "reentry-reset" => ScenarioSlug::ReentryReset,
            "silo-link" => ScenarioSlug::SiloLink,
            "cancel-take" => ScenarioSlug::CancelTake,
            "flush-open" => ScenarioSlug::FlushOpen,
            _ => return Err(ScenarioError::Unknown(value.to_string())),
        };
        Ok(slug)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScenarioSlug::OpenEmpty => "open-empty",
            ScenarioSlug::SpitCooldown => "spit-cooldown",
            ScenarioSlug::CaveLink => "cave-link",
            ScenarioSlug::FlushInFlight => "flush-in-flight",
            ScenarioSlug::ReentryReset => "reentry-reset",
            ScenarioSlug::SiloLink => "silo-link",
            ScenarioSlug::CancelTake => "cancel-take",
            ScenarioSlug::FlushOpen => "flush-open",
        }
    }
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("unknown scenario: {0}")]
    Unknown(String),
    #[error("scenario needs at least one player")]
    NoPlayers,
    #[error(transparent)]
    Room(#[from] RoomError),
}

pub struct ScenarioOptions {
    pub players: u32,
    pub config: MachineConfig,
    pub vault: ChronicleVault,
    pub cave_guid: Option<String>,
    pub cue_player: Option<Rc<dyn CuePlayer>>,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            players: 2,
            config: MachineConfig::default(),
            vault: ChronicleVault::new(),
            cave_guid: None,
            cue_player: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    pub time: f64,
    pub players: Vec<PlayerId>,
    pub owner: Option<PlayerId>,
    pub persisted: MachineState,
    pub replicas: Vec<MachineSnapshot>,
    pub avatars: BTreeMap<PlayerId, AvatarState>,
    pub transfers: Vec<TransferRecord>,
    /// Unconsumed handoff values per present player.
    pub handoffs: BTreeMap<PlayerId, i32>,
    pub invariants: InvariantReport,
}

impl ScenarioReport {
    pub fn capture(slug: ScenarioSlug, room: &Room) -> Self {
        let players = room.players();
        Self {
            scenario: slug.label(),
            time: room.now(),
            owner: room.owner(),
            persisted: room.persisted(),
            replicas: players
                .iter()
                .filter_map(|player| room.machine(*player))
                .map(|machine| machine.snapshot())
                .collect(),
            avatars: players
                .iter()
                .filter_map(|player| room.avatar(*player).map(|avatar| (*player, avatar.clone())))
                .collect(),
            transfers: room.transfers().to_vec(),
            handoffs: players
                .iter()
                .filter_map(|player| {
                    room.vault()
                        .peek_handoff(*player)
                        .ok()
                        .filter(|recipe| *recipe != 0)
                        .map(|recipe| (*player, recipe))
                })
                .collect(),
            invariants: room.check_invariants(),
            players,
        }
    }
}

pub struct ScenarioRun {
    pub room: Room,
    pub report: ScenarioReport,
}

fn slot(number: u8) -> StoreKey {
    // Slot numbers below are literals in 1..=5.
    StoreKey::PelletSlot(Slot::ALL[usize::from(number - 1)])
}

pub fn run_scenario(slug: ScenarioSlug, options: ScenarioOptions) -> Result<ScenarioRun, ScenarioError> {
    if options.players == 0 {
        return Err(ScenarioError::NoPlayers);
    }
    let timers = options.config.timers.clone();
    let mut room = Room::new(options.config).with_vault(options.vault);
    if let Some(guid) = options.cave_guid {
        room = room.with_cave_guid(guid);
    }
    if let Some(cue_player) = options.cue_player {
        room = room.with_cue_player(cue_player);
    }
    let players: Vec<PlayerId> = (1..=options.players).collect();
    let actor = players[0];
    let last = players[players.len() - 1];

    match slug {
        ScenarioSlug::OpenEmpty => {
            join_all(&mut room, &players)?;
            room.activate(actor, Activator::UseMachine)?;
            room.settle()?;
        }
        ScenarioSlug::SpitCooldown => {
            seed_open_with_pellet(&mut room);
            join_all(&mut room, &players)?;
            room.activate(actor, Activator::SpitPellet)?;
            room.settle()?;
            room.advance(timers.spit_cooldown_secs)?;
        }
        ScenarioSlug::CaveLink | ScenarioSlug::SiloLink => {
            seed_open_with_pellet(&mut room);
            join_all(&mut room, &players)?;
            room.activate(actor, Activator::SpitPellet)?;
            room.settle()?;
            room.activate(actor, Activator::TakePellet)?;
            room.settle()?;
            let link = if slug == ScenarioSlug::CaveLink {
                Activator::LinkToCave
            } else {
                Activator::LinkToSilo
            };
            room.activate(actor, link)?;
            room.advance(timers.link_delay_secs)?;
        }
        ScenarioSlug::FlushInFlight => {
            seed_open_with_pellet(&mut room);
            join_all(&mut room, &players)?;
            room.activate(actor, Activator::SpitPellet)?;
            room.settle()?;
            room.activate(last, Activator::FlushLever)?;
            room.settle()?;
        }
        ScenarioSlug::ReentryReset => {
            room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
            room.seed(StoreKey::ChamberPosition, StoreValue::int(3));
            room.seed(slot(2), StoreValue::int(4));
            room.seed(slot(4), StoreValue::int(9));
            room.join(actor)?;
            room.settle()?;
            join_all(&mut room, &players[1..])?;
        }
        ScenarioSlug::CancelTake => {
            seed_open_with_pellet(&mut room);
            join_all(&mut room, &players)?;
            room.activate(actor, Activator::SpitPellet)?;
            room.settle()?;
            room.activate(actor, Activator::TakePellet)?;
            room.settle()?;
            room.press_key(actor, ControlKey::ExitMode)?;
            room.advance(timers.untouch_settle_secs)?;
        }
        ScenarioSlug::FlushOpen => {
            room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
            room.seed(slot(1), StoreValue::int(7));
            room.seed(slot(3), StoreValue::int(2));
            join_all(&mut room, &players)?;
            room.activate(last, Activator::FlushLever)?;
            room.settle()?;
        }
    }

    let report = ScenarioReport::capture(slug, &room);
    Ok(ScenarioRun { room, report })
}

fn seed_open_with_pellet(room: &mut Room) {
    room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
    room.seed(slot(1), StoreValue::int(7));
}

fn join_all(room: &mut Room, players: &[PlayerId]) -> Result<(), RoomError> {
    for player in players {
        room.join(*player)?;
    }
    room.settle()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_parse_by_label_and_letter() {
        for slug in ScenarioSlug::ALL {
            assert_eq!(ScenarioSlug::parse(slug.label()).ok(), Some(slug));
        }
        assert_eq!(ScenarioSlug::parse(" E ").ok(), Some(ScenarioSlug::ReentryReset));
        assert!(matches!(
            ScenarioSlug::parse("bakery"),
            Err(ScenarioError::Unknown(_))
        ));
    }

    #[test]
    fn zero_players_is_rejected() {
        let options = ScenarioOptions {
            players: 0,
            ..ScenarioOptions::default()
        };
        assert!(matches!(
            run_scenario(ScenarioSlug::OpenEmpty, options),
            Err(ScenarioError::NoPlayers)
        ));
    }
}
