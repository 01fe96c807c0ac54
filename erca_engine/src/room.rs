//! Deterministic multi-replica room.
//!
//! Stands in for the server and the clients: a relay that persists the
//! shared record and fans bus frames out in order, one controller per
//! present player, per-replica cue and timer queues, and a virtual clock.

use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use erca_stream::{BusMessage, Hello, Note, NoteMessage, ProtocolError, StoreUpdate};
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::config::MachineConfig;
use crate::cues::{BehaviorRequest, Cue, CuePlayer};
use crate::effects::{Effect, Effects};
use crate::handoff::{ChronicleVault, HandoffWrite, VaultError, EMPTY_RECIPE};
use crate::linking::LinkRequest;
use crate::lock::{AvatarControl, ControlKey};
use crate::machine::{
    Activator, Authority, MachineEvent, MachineState, PelletMachine, RoomEntry, Violation,
};
use crate::store::{Delivery, PlayerId, ReplicaStore, StoreError, StoreKey, StoreValue};
use crate::timer::TimerQueue;

const MAX_SETTLE_STEPS: usize = 10_000;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("player {0} is already in the room")]
    AlreadyPresent(PlayerId),
    #[error("player {0} is not in the room")]
    NotPresent(PlayerId),
    #[error("player {0} has no pending area transfer")]
    NoTransfer(PlayerId),
    #[error("room did not settle after {0} steps")]
    Unsettled(usize),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Vault(#[from] VaultError),
}

pub type Result<T> = std::result::Result<T, RoomError>;

/// Camera and input bookkeeping for one avatar.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AvatarState {
    pub camera_locked: bool,
    pub keys_routed: bool,
    pub lock_acquisitions: u32,
    pub lock_releases: u32,
    pub behaviors: Vec<BehaviorRequest>,
}

impl AvatarState {
    fn apply(&mut self, control: AvatarControl) {
        match control {
            AvatarControl::DisableFirstPerson => {
                self.camera_locked = true;
                self.lock_acquisitions += 1;
            }
            AvatarControl::EnableFirstPerson => {
                self.camera_locked = false;
                self.lock_releases += 1;
            }
            AvatarControl::EnableControlKeys => self.keys_routed = true,
            AvatarControl::DisableControlKeys => self.keys_routed = false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    pub player: PlayerId,
    pub request: LinkRequest,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomLogEntry {
    pub sequence: u32,
    pub time: f64,
    pub player: PlayerId,
    pub label: String,
}

/// Quiescent-state checks across the relay and every replica.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InvariantReport {
    pub violations: Vec<Violation>,
    /// Replicas whose mirror differs from the persisted record.
    pub diverged: Vec<PlayerId>,
    /// Replicas with a local take in progress.
    pub takers: Vec<PlayerId>,
}

impl InvariantReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.diverged.is_empty() && self.takers.len() <= 1
    }
}

#[derive(Debug)]
struct Replica {
    player: PlayerId,
    machine: PelletMachine,
    store: ReplicaStore,
    timers: TimerQueue,
    pending_cues: VecDeque<Cue>,
    avatar: AvatarState,
    events_seen: usize,
}

#[derive(Debug, Default)]
struct Relay {
    persisted: BTreeMap<StoreKey, StoreValue>,
    frames: VecDeque<Vec<u8>>,
    batched: Vec<StoreUpdate>,
    seq: u64,
}

impl Relay {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn send(&mut self, message: &BusMessage) -> Result<()> {
        self.frames.push_back(message.encode()?);
        Ok(())
    }

    /// Releases batched writes onto the bus, as a tick flush would.
    fn flush_batched(&mut self) -> Result<()> {
        for update in std::mem::take(&mut self.batched) {
            self.send(&BusMessage::StoreUpdate(update))?;
        }
        Ok(())
    }
}

pub struct Room {
    config: MachineConfig,
    now: f64,
    relay: Relay,
    replicas: Vec<Replica>,
    cue_player: Option<Rc<dyn CuePlayer>>,
    vault: ChronicleVault,
    cave_guid: Option<String>,
    transfers: Vec<TransferRecord>,
    log: Vec<RoomLogEntry>,
}

impl Room {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            now: 0.0,
            relay: Relay::default(),
            replicas: Vec::new(),
            cue_player: None,
            vault: ChronicleVault::new(),
            cave_guid: None,
            transfers: Vec::new(),
            log: Vec::new(),
        }
    }

    pub fn with_cue_player(mut self, player: Rc<dyn CuePlayer>) -> Self {
        self.cue_player = Some(player);
        self
    }

    pub fn with_vault(mut self, vault: ChronicleVault) -> Self {
        self.vault = vault;
        self
    }

    pub fn with_cave_guid(mut self, guid: impl Into<String>) -> Self {
        self.cave_guid = Some(guid.into());
        self
    }

    /// Sets a persisted value before anyone joins, as left by an earlier
    /// session.
    pub fn seed(&mut self, key: StoreKey, value: StoreValue) {
        self.relay.persisted.insert(key, value);
    }

    /// Sends a write through the relay as if `player`'s replica made it,
    /// such as a late write from a client that missed a reset.
    pub fn write_as(&mut self, player: PlayerId, key: StoreKey, value: StoreValue) -> Result<()> {
        self.route_write(player, key, value)
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn players(&self) -> Vec<PlayerId> {
        self.replicas.iter().map(|replica| replica.player).collect()
    }

    pub fn owner(&self) -> Option<PlayerId> {
        self.replicas
            .iter()
            .find(|replica| replica.machine.authority().is_owner())
            .map(|replica| replica.player)
    }

    pub fn machine(&self, player: PlayerId) -> Option<&PelletMachine> {
        self.replica(player).map(|replica| &replica.machine)
    }

    pub fn avatar(&self, player: PlayerId) -> Option<&AvatarState> {
        self.replica(player).map(|replica| &replica.avatar)
    }

    /// The relay's copy of the shared record.
    pub fn persisted(&self) -> MachineState {
        MachineState::from_snapshot(&self.relay.persisted)
    }

    pub fn transfers(&self) -> &[TransferRecord] {
        &self.transfers
    }

    pub fn vault(&self) -> &ChronicleVault {
        &self.vault
    }

    pub fn vault_mut(&mut self) -> &mut ChronicleVault {
        &mut self.vault
    }

    pub fn events(&self) -> &[RoomLogEntry] {
        &self.log
    }

    pub fn join(&mut self, player: PlayerId) -> Result<()> {
        if self.replica(player).is_some() {
            return Err(RoomError::AlreadyPresent(player));
        }
        let pending_handoff = match self.vault.peek_handoff(player) {
            Ok(value) => value,
            Err(err) => {
                warn!("{err}; discarding");
                self.vault.apply(player, HandoffWrite::Clear);
                EMPTY_RECIPE
            }
        };
        let entry = RoomEntry {
            others_present: self.replicas.len(),
            pending_handoff,
            cave_guid: self.cave_guid.clone(),
        };
        info!("player {player} joins ({} already present)", entry.others_present);

        self.replicas.push(Replica {
            player,
            machine: PelletMachine::new(player, self.config.clone(), Effects::new()),
            store: ReplicaStore::from_persisted(&self.relay.persisted),
            timers: TimerQueue::new(),
            pending_cues: VecDeque::new(),
            avatar: AvatarState::default(),
            events_seen: 0,
        });
        self.reassign_authority();
        self.relay.send(&BusMessage::Hello(Hello::new(
            player,
            Some(env!("CARGO_PKG_VERSION").to_string()),
        )))?;

        let index = self.index(player)?;
        let replica = &mut self.replicas[index];
        replica.machine.on_room_entered(&mut replica.store, entry);
        self.collect_events(index);
        self.process_effects(player)?;

        for peer in self.players().into_iter().filter(|peer| *peer != player) {
            let index = self.index(peer)?;
            self.replicas[index].machine.on_peer_joined(player);
            self.collect_events(index);
            self.process_effects(peer)?;
        }
        Ok(())
    }

    pub fn leave(&mut self, player: PlayerId) -> Result<()> {
        let index = self.index(player)?;
        self.collect_events(index);
        self.replicas.remove(index);
        info!("player {player} leaves");
        self.reassign_authority();
        Ok(())
    }

    /// An avatar clicks an activator; every replica observes the click.
    pub fn activate(&mut self, player: PlayerId, activator: Activator) -> Result<()> {
        self.index(player)?;
        for present in self.players() {
            self.dispatch(
                present,
                MachineEvent::Activated {
                    activator,
                    avatar: player,
                },
            )?;
        }
        Ok(())
    }

    /// Presses and releases a control key. Returns false when the avatar's
    /// keys are not routed to the machine.
    pub fn press_key(&mut self, player: PlayerId, key: ControlKey) -> Result<bool> {
        let index = self.index(player)?;
        if !self.replicas[index].avatar.keys_routed {
            return Ok(false);
        }
        self.dispatch(player, MachineEvent::ControlKey { key, pressed: true })?;
        self.dispatch(player, MachineEvent::ControlKey { key, pressed: false })?;
        Ok(true)
    }

    /// Delivers bus frames and cue completions until nothing is pending.
    pub fn settle(&mut self) -> Result<()> {
        for _ in 0..MAX_SETTLE_STEPS {
            if let Some(frame) = self.relay.frames.pop_front() {
                self.deliver(&frame)?;
                continue;
            }
            let pending = self
                .replicas
                .iter_mut()
                .find_map(|replica| {
                    replica
                        .pending_cues
                        .pop_front()
                        .map(|cue| (replica.player, cue))
                });
            if let Some((player, cue)) = pending {
                self.dispatch(player, MachineEvent::CueCompleted(cue))?;
                continue;
            }
            if !self.relay.batched.is_empty() {
                self.relay.flush_batched()?;
                continue;
            }
            return Ok(());
        }
        Err(RoomError::Unsettled(MAX_SETTLE_STEPS))
    }

    /// Moves the clock forward, firing due timers in order and settling
    /// after each.
    pub fn advance(&mut self, secs: f64) -> Result<()> {
        let target = self.now + secs.max(0.0);
        self.settle()?;
        loop {
            let due = self
                .replicas
                .iter()
                .filter_map(|replica| replica.timers.next_due().map(|due| (due, replica.player)))
                .filter(|(due, _)| *due <= target)
                .min_by(|a, b| a.0.total_cmp(&b.0));
            let Some((due, player)) = due else {
                break;
            };
            self.now = self.now.max(due);
            let index = self.index(player)?;
            if let Some(ticket) = self.replicas[index].timers.pop_due(self.now) {
                self.dispatch(player, MachineEvent::TimerFired(ticket))?;
            }
            self.settle()?;
        }
        self.now = target;
        Ok(())
    }

    /// Destination bootstrap for a player that linked out: consumes the
    /// carried pellet and removes the player from this room.
    pub fn complete_transfer(&mut self, player: PlayerId) -> Result<Option<i32>> {
        let transfer = self
            .transfers
            .iter_mut()
            .find(|transfer| transfer.player == player && !transfer.completed)
            .ok_or(RoomError::NoTransfer(player))?;
        transfer.completed = true;
        let recipe = self.vault.consume_handoff(player)?;
        self.log_room(player, format!("transfer.arrive recipe {}", recipe.unwrap_or(EMPTY_RECIPE)));
        if self.replica(player).is_some() {
            self.leave(player)?;
        }
        Ok(recipe)
    }

    pub fn check_invariants(&self) -> InvariantReport {
        let persisted = self.persisted();
        InvariantReport {
            violations: persisted.violations(),
            diverged: self
                .replicas
                .iter()
                .filter(|replica| *replica.machine.state() != persisted)
                .map(|replica| replica.player)
                .collect(),
            takers: self
                .replicas
                .iter()
                .filter(|replica| replica.machine.take_state().claims_pellet())
                .map(|replica| replica.player)
                .collect(),
        }
    }

    fn replica(&self, player: PlayerId) -> Option<&Replica> {
        self.replicas.iter().find(|replica| replica.player == player)
    }

    fn index(&self, player: PlayerId) -> Result<usize> {
        self.replicas
            .iter()
            .position(|replica| replica.player == player)
            .ok_or(RoomError::NotPresent(player))
    }

    fn reassign_authority(&mut self) {
        for index in 0..self.replicas.len() {
            let authority = if index == 0 {
                Authority::Owner
            } else {
                Authority::NonOwner
            };
            self.replicas[index].machine.set_authority(authority);
            self.collect_events(index);
        }
    }

    fn dispatch(&mut self, player: PlayerId, event: MachineEvent) -> Result<()> {
        let index = self.index(player)?;
        self.replicas[index].machine.handle(event);
        self.collect_events(index);
        self.process_effects(player)
    }

    fn process_effects(&mut self, player: PlayerId) -> Result<()> {
        loop {
            let index = self.index(player)?;
            let effects = self.replicas[index].machine.effects().drain();
            if effects.is_empty() {
                return Ok(());
            }
            for effect in effects {
                self.apply_effect(player, effect)?;
            }
        }
    }

    fn apply_effect(&mut self, player: PlayerId, effect: Effect) -> Result<()> {
        let index = self.index(player)?;
        match effect {
            Effect::Store { key, value } => self.route_write(player, key, value)?,
            Effect::Schedule(request) => self.replicas[index].timers.schedule(self.now, request),
            Effect::Cue(request) => {
                if let Some(cue_player) = &self.cue_player {
                    cue_player.run(player, &request);
                }
                if request.notifies() {
                    self.replicas[index].pending_cues.push_back(request.cue);
                }
            }
            Effect::Behavior(request) => self.replicas[index].avatar.behaviors.push(request),
            Effect::Avatar(control) => self.replicas[index].avatar.apply(control),
            Effect::Note(note) => self.send_note(player, note)?,
            Effect::Handoff(write) => self.vault.apply(player, write),
            Effect::Link(request) => {
                self.log_room(
                    player,
                    format!(
                        "transfer.request {} guid={}",
                        request.age_filename,
                        request.age_instance_guid.as_deref().unwrap_or("-")
                    ),
                );
                self.transfers.push(TransferRecord {
                    player,
                    request,
                    completed: false,
                });
            }
        }
        Ok(())
    }

    fn route_write(&mut self, player: PlayerId, key: StoreKey, value: StoreValue) -> Result<()> {
        let index = self.index(player)?;
        let flags = self.replicas[index].store.flags(key);
        if !flags.send_to_clients {
            let replica = &mut self.replicas[index];
            let changed = replica.store.apply(key, value.clone())?;
            if changed && replica.store.is_subscribed(key) {
                self.dispatch(
                    player,
                    MachineEvent::StoreChanged {
                        key,
                        value,
                        origin: player,
                    },
                )?;
            }
            return Ok(());
        }
        let update = StoreUpdate {
            seq: self.relay.next_seq(),
            origin: player,
            key: self.config.store_names.name(key).to_string(),
            values: value.0,
        };
        match flags.delivery {
            Delivery::Immediate => self.relay.send(&BusMessage::StoreUpdate(update)),
            Delivery::Batched => {
                self.relay.batched.push(update);
                Ok(())
            }
        }
    }

    fn send_note(&mut self, player: PlayerId, note: Note) -> Result<()> {
        let message = BusMessage::Note(NoteMessage {
            seq: self.relay.next_seq(),
            origin: player,
            note,
        });
        self.relay.send(&message)
    }

    fn deliver(&mut self, frame: &[u8]) -> Result<()> {
        match BusMessage::decode(frame)? {
            BusMessage::Hello(hello) => {
                self.log_room(hello.player, format!("relay.hello {}", hello.protocol));
            }
            BusMessage::StoreUpdate(update) => {
                if update.values.is_empty() {
                    return Err(StoreError::EmptyValue { key: update.key }.into());
                }
                let key = self.config.store_names.key(&update.key)?;
                let value = StoreValue(update.values);
                debug!("relay #{}: {key} = {:?} from {}", update.seq, value.0, update.origin);
                self.relay.persisted.insert(key, value.clone());
                for player in self.players() {
                    let index = self.index(player)?;
                    let replica = &mut self.replicas[index];
                    let changed = replica.store.apply(key, value.clone())?;
                    if changed && replica.store.is_subscribed(key) {
                        self.dispatch(
                            player,
                            MachineEvent::StoreChanged {
                                key,
                                value: value.clone(),
                                origin: update.origin,
                            },
                        )?;
                    }
                }
            }
            BusMessage::Note(message) => {
                for player in self.players() {
                    self.dispatch(
                        player,
                        MachineEvent::NoteReceived {
                            note: message.note,
                            origin: message.origin,
                        },
                    )?;
                }
            }
        }
        Ok(())
    }

    fn collect_events(&mut self, index: usize) {
        let replica = &mut self.replicas[index];
        let events = replica.machine.events();
        for label in &events[replica.events_seen..] {
            self.log.push(RoomLogEntry {
                sequence: self.log.len() as u32,
                time: self.now,
                player: replica.player,
                label: label.clone(),
            });
        }
        replica.events_seen = events.len();
    }

    fn log_room(&mut self, player: PlayerId, label: String) {
        info!("player {player}: {label}");
        self.log.push(RoomLogEntry {
            sequence: self.log.len() as u32,
            time: self.now,
            player,
            label,
        });
    }
}
