//! Per-replica controller for the pellet machine.
//!
//! Every replica runs one [`PelletMachine`]. Handlers never touch the world
//! directly: store writes, cues, timers and the rest are pushed to the shared
//! [`Effects`] outbox and applied by the host. Store writes only take effect
//! on this replica once the relay delivers them back as
//! [`MachineEvent::StoreChanged`].

pub mod authority;
pub mod chamber;
pub mod state;
pub mod take;

use erca_stream::{BusyPhase, Note};
use log::{debug, trace, warn};
use serde::Serialize;

use crate::config::MachineConfig;
use crate::cues::{
    BehaviorRequest, Cue, CueRequest, DropKind, EnableState, ModeState, SpitButton, TouchState,
};
use crate::effects::{Effect, Effects};
use crate::handoff::{HandoffWrite, EMPTY_RECIPE};
use crate::linking::{LinkRequest, LinkTarget};
use crate::lock::{ControlKey, InteractionLock};
use crate::store::{PlayerId, ReplicaStore, StoreFlags, StoreKey, StoreValue};
use crate::timer::{TimerGenerations, TimerRequest, TimerTag, TimerTicket};

pub use authority::{Authority, OwnerToken};
use chamber::{Slot, LAST_POSITION};
pub use state::{MachineState, Violation};
pub use take::{SpitPhase, TakeLabel, TakePelletState};

/// Clickables wired to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Activator {
    UseMachine,
    SpitPellet,
    TakePellet,
    FlushLever,
    LinkToSilo,
    LinkToCave,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    /// An avatar clicked an activator. Every replica sees every activation.
    Activated {
        activator: Activator,
        avatar: PlayerId,
    },
    StoreChanged {
        key: StoreKey,
        value: StoreValue,
        origin: PlayerId,
    },
    CueCompleted(Cue),
    TimerFired(TimerTicket),
    ControlKey {
        key: ControlKey,
        pressed: bool,
    },
    NoteReceived {
        note: Note,
        origin: PlayerId,
    },
}

/// What a replica knows about the room when its player arrives.
#[derive(Debug, Clone, Default)]
pub struct RoomEntry {
    pub others_present: usize,
    /// Handoff value left over from an earlier session.
    pub pending_handoff: i32,
    pub cave_guid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FlushDecision {
    may_flush: bool,
}

/// Serializable view of one replica's controller.
#[derive(Debug, Clone, Serialize)]
pub struct MachineSnapshot {
    pub player: PlayerId,
    pub authority: Authority,
    pub state: MachineState,
    pub busy: BusyPhase,
    pub take: TakeLabel,
    pub spit: SpitPhase,
    pub spit_enabled: bool,
    pub may_flush: bool,
}

#[derive(Debug)]
pub struct PelletMachine {
    player: PlayerId,
    config: MachineConfig,
    state: MachineState,
    authority: Authority,
    busy: BusyPhase,
    /// Player whose note put the machine in its current busy phase.
    busy_origin: Option<PlayerId>,
    take: TakePelletState,
    spit: SpitPhase,
    spit_enabled: bool,
    pellet_ready: bool,
    init_correction: bool,
    flush: Option<FlushDecision>,
    cave_guid: Option<String>,
    timers: TimerGenerations,
    effects: Effects,
    events: Vec<String>,
}

impl PelletMachine {
    pub fn new(player: PlayerId, config: MachineConfig, effects: Effects) -> Self {
        Self {
            player,
            config,
            state: MachineState::default(),
            authority: Authority::NonOwner,
            busy: BusyPhase::Idle,
            busy_origin: None,
            take: TakePelletState::Idle,
            spit: SpitPhase::Idle,
            spit_enabled: false,
            pellet_ready: false,
            init_correction: false,
            flush: None,
            cave_guid: None,
            timers: TimerGenerations::new(),
            effects,
            events: Vec::new(),
        }
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn effects(&self) -> &Effects {
        &self.effects
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn set_authority(&mut self, authority: Authority) {
        if self.authority != authority {
            self.log_event(format!("authority {authority:?}"));
        }
        self.authority = authority;
    }

    pub fn busy(&self) -> BusyPhase {
        self.busy
    }

    pub fn take_state(&self) -> TakeLabel {
        self.take.label()
    }

    pub fn keys_routed(&self) -> bool {
        self.take.lock().is_some_and(InteractionLock::keys_routed)
    }

    pub fn spit_phase(&self) -> SpitPhase {
        self.spit
    }

    pub fn spit_enabled(&self) -> bool {
        self.spit_enabled
    }

    /// Open, nothing in flight, nobody interacting.
    pub fn may_flush(&self) -> bool {
        self.state.open
            && !self.spit.in_flight()
            && self.busy == BusyPhase::Idle
            && self.take.is_idle()
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            player: self.player,
            authority: self.authority,
            state: self.state.clone(),
            busy: self.busy,
            take: self.take.label(),
            spit: self.spit,
            spit_enabled: self.spit_enabled,
            may_flush: self.may_flush(),
        }
    }

    /// Registers the record with the local store and corrects whatever an
    /// earlier session left behind.
    pub fn on_room_entered(&mut self, store: &mut ReplicaStore, entry: RoomEntry) {
        self.cave_guid = entry.cave_guid;
        if entry.pending_handoff != EMPTY_RECIPE {
            self.log_event(format!("handoff.discard {}", entry.pending_handoff));
            self.effects.push(Effect::Handoff(HandoffWrite::Clear));
        }

        for key in StoreKey::ALL {
            store.set_flags(key, StoreFlags::replicated());
            store.subscribe(key);
        }
        self.state = MachineState::from_store(store);
        let alone = entry.others_present == 0;
        self.log_event(format!(
            "room.enter others={} open={} chamber={}",
            entry.others_present, self.state.open, self.state.chamber
        ));

        if let Some(violation) = self.state.violations().first().copied() {
            self.reset_on_entry(&format!("room entry found {violation}"));
            return;
        }
        if alone && self.state.open && self.state.chamber != 0 {
            self.reset_on_entry("room entry found an interrupted sequence");
            return;
        }

        for slot in Slot::ALL {
            if self.state.slot(slot) == 0 {
                self.cue(CueRequest::fast_forward(Cue::HidePellet(slot)));
            }
        }

        self.pellet_ready = self.state.pellet_ready();
        if self.pellet_ready {
            if self.state.open {
                self.cue(CueRequest::fast_forward(Cue::MachineMode(ModeState::Open)));
                self.cue(CueRequest::fast_forward(Cue::MachineEnable(
                    EnableState::IfOpening,
                )));
                match self.state.staged_slot() {
                    Some(slot) if !alone => {
                        // A peer's pellet may still be out. Wait out a full
                        // cooldown before offering the spit control.
                        self.cue(CueRequest::fast_forward(Cue::RotateChamber(slot)));
                        self.cue(CueRequest::fast_forward(Cue::SpitPellet(slot)));
                        self.spit = SpitPhase::Presented(slot);
                        self.arm(TimerTag::SpitCooldown, self.config.timers.spit_cooldown_secs);
                        self.log_event(format!("pellet.staged slot {slot}"));
                    }
                    Some(slot) => {
                        self.cue(CueRequest::fast_forward(Cue::RotateChamber(slot)));
                        self.spit_enabled = true;
                    }
                    None => self.spit_enabled = true,
                }
            } else {
                self.cue(CueRequest::fast_forward(Cue::MachineMode(ModeState::Close)));
                self.cue(CueRequest::fast_forward(Cue::MachineEnable(
                    EnableState::Enable,
                )));
            }
        } else {
            self.cue(CueRequest::fast_forward(Cue::MachineEnable(
                EnableState::Disable,
            )));
            self.cue(CueRequest::fast_forward(Cue::MachineMode(ModeState::Close)));
            if self.state.open && alone {
                self.init_correction = true;
                self.write(StoreKey::MachineOpen, StoreValue::flag(false));
            }
        }
    }

    pub fn handle(&mut self, event: MachineEvent) {
        match event {
            MachineEvent::Activated { activator, avatar } => {
                if avatar != self.player {
                    trace!(
                        "player {}: ignoring {activator:?} by remote avatar {avatar}",
                        self.player
                    );
                    return;
                }
                match activator {
                    Activator::UseMachine => self.request_open(),
                    Activator::SpitPellet => self.request_spit(),
                    Activator::TakePellet => self.request_take(),
                    Activator::FlushLever => self.request_flush(),
                    Activator::LinkToSilo => self.request_link(LinkTarget::CitySilo),
                    Activator::LinkToCave => self.request_link(LinkTarget::PelletCave),
                }
            }
            MachineEvent::StoreChanged { key, value, origin } => {
                self.on_store_changed(key, value, origin)
            }
            MachineEvent::CueCompleted(cue) => self.on_cue_completed(cue),
            MachineEvent::TimerFired(ticket) => self.on_timer(ticket),
            MachineEvent::ControlKey { key, pressed } => self.on_control_key(key, pressed),
            MachineEvent::NoteReceived { note, origin } => match note {
                Note::TakePellet { phase } => self.on_busy_note(phase, origin),
            },
        }
    }

    /// Re-announces a busy phase this replica started, so a player who just
    /// entered learns the machine is occupied.
    pub fn on_peer_joined(&mut self, peer: PlayerId) {
        if self.busy != BusyPhase::Idle && self.busy_origin == Some(self.player) {
            self.log_event(format!("busy.announce to {peer}"));
            self.send_note(self.busy);
        }
    }

    /// Collapses the shared record to empty and closed, and drops every
    /// local sequence in progress.
    pub fn defensive_reset(&mut self, reason: &str) {
        warn!("player {}: defensive reset: {reason}", self.player);
        self.log_event(format!("machine.reset {reason}"));
        for (key, value) in state::reset_writes() {
            self.write(key, value);
        }
        self.timers.disarm_all();
        self.spit = SpitPhase::Idle;
        self.spit_enabled = false;
        self.flush = None;
        self.abandon_take();
    }

    fn reset_on_entry(&mut self, reason: &str) {
        self.init_correction = self.state.open;
        self.pellet_ready = false;
        for slot in Slot::ALL {
            self.cue(CueRequest::fast_forward(Cue::HidePellet(slot)));
        }
        self.cue(CueRequest::fast_forward(Cue::MachineEnable(
            EnableState::Disable,
        )));
        self.cue(CueRequest::fast_forward(Cue::MachineMode(ModeState::Close)));
        self.defensive_reset(reason);
    }

    fn request_open(&mut self) {
        if self.state.open {
            self.log_event("machine.open ignored already open");
            return;
        }
        self.log_event("machine.open_request");
        self.write(StoreKey::MachineOpen, StoreValue::flag(true));
    }

    fn request_spit(&mut self) {
        if !self.spit_enabled {
            self.log_event("spit.ignored control disabled");
            return;
        }
        if self.busy != BusyPhase::Idle {
            self.log_event(format!("spit.denied busy {:?}", self.busy));
            self.cue(CueRequest::for_avatar(
                Cue::UseSpitBtn(SpitButton::Deny),
                self.player,
            ));
            return;
        }
        self.spit_enabled = false;
        if self.state.chamber >= LAST_POSITION {
            self.defensive_reset("spit requested at the last chamber position");
            return;
        }
        self.log_event(format!("spit.request chamber {}", self.state.chamber + 1));
        self.write(
            StoreKey::ChamberPosition,
            StoreValue::int(self.state.chamber + 1),
        );
    }

    fn request_take(&mut self) {
        if !matches!(self.spit, SpitPhase::Presented(_)) {
            self.log_event("take.ignored no pellet presented");
            return;
        }
        if self.busy != BusyPhase::Idle || !self.take.is_idle() {
            self.log_event(format!("take.ignored busy {:?}", self.busy));
            return;
        }
        self.send_note(BusyPhase::Held);
        let lock = InteractionLock::acquire(&self.effects, self.player);
        self.cue(CueRequest::play(Cue::TouchPellet(TouchState::Touch)));
        self.behavior(BehaviorRequest::Start {
            avatar: self.player,
        });
        self.take = TakePelletState::Held(lock);
        self.log_event("take.held");
    }

    fn request_flush(&mut self) {
        self.log_event("flush.pull");
        self.write(StoreKey::FlushLever, StoreValue::flag(true));
    }

    fn request_link(&mut self, target: LinkTarget) {
        if !matches!(self.take, TakePelletState::Held(_)) {
            self.log_event(format!("link.ignored {target:?} not holding"));
            return;
        }
        let TakePelletState::Held(lock) = std::mem::take(&mut self.take) else {
            return;
        };
        self.send_note(BusyPhase::Linking);
        self.behavior(BehaviorRequest::GotoStage {
            avatar: self.player,
            stage: target.stage(),
            forward: true,
            new_time: None,
        });
        self.arm(TimerTag::LinkDelay(target), self.config.timers.link_delay_secs);
        self.take = TakePelletState::InTransitToLink { target, lock };
        self.log_event(format!("link.start {target:?}"));
    }

    /// Two takes can cross on the bus. The lower player id keeps the pellet
    /// and the other replica backs out without announcing Idle.
    fn on_busy_note(&mut self, phase: BusyPhase, origin: PlayerId) {
        if phase != BusyPhase::Idle {
            let busy = self.busy != BusyPhase::Idle;
            if let Some(holder) = self.busy_origin.filter(|holder| busy && *holder < origin) {
                self.log_event(format!("busy {phase:?} from {origin} ignored, {holder} holds"));
                return;
            }
            if origin < self.player && self.release_take() {
                self.log_event(format!("take.yield to {origin}"));
            }
        }
        if self.busy != phase {
            self.log_event(format!("busy {phase:?} from {origin}"));
        }
        self.busy = phase;
        self.busy_origin = (phase != BusyPhase::Idle).then_some(origin);
    }

    fn on_store_changed(&mut self, key: StoreKey, value: StoreValue, origin: PlayerId) {
        self.state.apply(key, &value);
        debug!(
            "player {}: {key} -> {:?} (from {origin})",
            self.player, value.0
        );
        match key {
            StoreKey::PelletSlot(_) => self.refresh_pellet_ready(),
            StoreKey::MachineOpen if value.as_flag() => self.on_opened(origin),
            StoreKey::MachineOpen => self.on_closed(),
            StoreKey::ChamberPosition => self.on_chamber_changed(origin),
            StoreKey::FlushLever if value.as_flag() => self.on_flush_raised(origin),
            StoreKey::FlushLever => self.log_event("flush.lowered"),
        }
    }

    fn on_opened(&mut self, origin: PlayerId) {
        self.log_event(format!("machine.opened by {origin}"));
        self.cue(CueRequest::play(Cue::ShowAllPellets));
        self.cue(CueRequest::for_avatar(Cue::UseMachine, origin));
        if origin == self.player && self.state.pellet_ready() {
            self.spit_enabled = true;
        }
    }

    fn on_closed(&mut self) {
        self.log_event("machine.closed");
        self.spit_enabled = false;
        let request = if std::mem::take(&mut self.init_correction) {
            CueRequest::fast_forward(Cue::MachineMode(ModeState::Close))
        } else {
            CueRequest::play(Cue::MachineMode(ModeState::Close))
        };
        self.cue(request);
        if let Some(value) = self.state.closed_chamber_correction() {
            self.write(StoreKey::ChamberPosition, value);
        }
        if matches!(self.take, TakePelletState::Held(_)) {
            self.cancel_take("machine closed");
        }
    }

    fn on_chamber_changed(&mut self, origin: PlayerId) {
        let position = self.state.chamber;
        if !(0..=LAST_POSITION).contains(&position) {
            self.defensive_reset(&format!("chamber position {position} is out of range"));
            return;
        }
        let Some(slot) = Slot::for_position(position) else {
            self.log_event("chamber.idle");
            return;
        };
        if !self.state.open {
            self.defensive_reset(&format!("chamber advanced to {position} while closed"));
            return;
        }
        self.spit_enabled = false;
        self.spit = SpitPhase::Dispensing(slot);
        self.log_event(format!("chamber.advance {position}"));
        self.cue(CueRequest::for_avatar(
            Cue::UseSpitBtn(SpitButton::Allow),
            origin,
        ));
    }

    fn on_flush_raised(&mut self, origin: PlayerId) {
        let may_flush = self.may_flush();
        self.flush = Some(FlushDecision { may_flush });
        self.log_event(format!("flush.raised may_flush={may_flush}"));
        self.cue(CueRequest::for_avatar(Cue::FlushOneShot, origin));
    }

    fn on_cue_completed(&mut self, cue: Cue) {
        trace!("player {}: cue {cue} completed", self.player);
        match cue {
            Cue::UseMachine => {
                self.cue(CueRequest::play(Cue::MachineEnable(EnableState::IfOpening)));
                self.cue(CueRequest::play(Cue::MachineMode(ModeState::Open)));
            }
            Cue::MachineMode(ModeState::Close) => {
                if !self.pellet_ready {
                    self.cue(CueRequest::play(Cue::MachineEnable(EnableState::Disable)));
                }
            }
            Cue::UseSpitBtn(SpitButton::Allow) => {
                if let SpitPhase::Dispensing(slot) = self.spit {
                    self.cue(CueRequest::play(Cue::RotateChamber(slot)));
                }
            }
            Cue::RotateChamber(slot) => {
                if self.spit == SpitPhase::Dispensing(slot) {
                    self.cue(CueRequest::play(Cue::SpitPellet(slot)));
                }
            }
            Cue::SpitPellet(slot) => {
                if self.spit == SpitPhase::Dispensing(slot) {
                    self.spit = SpitPhase::Presented(slot);
                    self.send_note(BusyPhase::Idle);
                    self.arm(TimerTag::SpitCooldown, self.config.timers.spit_cooldown_secs);
                    self.log_event(format!("pellet.presented slot {slot}"));
                }
            }
            Cue::FlushOneShot => {
                self.cue(CueRequest::play(Cue::FlushLever));
                if self.flush.is_some_and(|decision| decision.may_flush) {
                    self.spit_enabled = false;
                }
            }
            Cue::FlushLever => self.finish_flush(),
            Cue::LinkPellet(target) => self.finish_link(target),
            Cue::MachineEnable(_)
            | Cue::MachineMode(ModeState::Open)
            | Cue::UseSpitBtn(SpitButton::Deny)
            | Cue::DropPellet(_)
            | Cue::ShowAllPellets
            | Cue::HidePellet(_)
            | Cue::TouchPellet(_)
            | Cue::FlushAPellet(_) => {}
        }
    }

    fn on_timer(&mut self, ticket: TimerTicket) {
        if !self.timers.accept(ticket) {
            trace!(
                "player {}: stale timer {:?} gen {}",
                self.player,
                ticket.tag,
                ticket.generation
            );
            self.log_event(format!("timer.stale {:?}", ticket.tag));
            return;
        }
        match ticket.tag {
            TimerTag::SpitCooldown => self.on_cooldown_elapsed(),
            TimerTag::TakenReset => self.send_note(BusyPhase::Idle),
            TimerTag::LinkDelay(target) => {
                if self.linking_to(target) {
                    self.cue(CueRequest::for_avatar(Cue::LinkPellet(target), self.player));
                } else {
                    self.log_event(format!("link.delay stale {target:?}"));
                }
            }
            TimerTag::UntouchSettle => {
                if matches!(self.take, TakePelletState::Releasing(_)) {
                    self.cue(CueRequest::play(Cue::TouchPellet(TouchState::Untouch)));
                    self.behavior(BehaviorRequest::Stop {
                        avatar: self.player,
                    });
                    self.take = TakePelletState::Idle;
                    self.log_event("take.released");
                }
            }
        }
    }

    fn on_cooldown_elapsed(&mut self) {
        let SpitPhase::Presented(slot) = self.spit else {
            self.log_event("pellet.cooldown stale");
            return;
        };
        self.spit = SpitPhase::Idle;
        if self.busy == BusyPhase::Linking {
            self.cue(CueRequest::play(Cue::DropPellet(DropKind::Taken)));
            self.arm(TimerTag::TakenReset, self.config.timers.taken_reset_secs);
            self.log_event(format!("pellet.drop slot {slot} taken"));
        } else {
            self.cue(CueRequest::play(Cue::DropPellet(DropKind::Normal)));
            self.log_event(format!("pellet.drop slot {slot}"));
            if matches!(self.take, TakePelletState::Held(_)) {
                self.cancel_take("pellet dropped");
            }
        }
        self.spit_enabled = self.state.open && self.state.pellet_ready();
    }

    fn on_control_key(&mut self, key: ControlKey, pressed: bool) {
        if !pressed || !key.cancels_take() {
            return;
        }
        if matches!(self.take, TakePelletState::Held(_)) {
            self.cancel_take(&format!("{key:?} pressed"));
        }
    }

    fn cancel_take(&mut self, reason: &str) {
        if self.release_take() {
            self.send_note(BusyPhase::Idle);
            self.log_event(format!("take.cancel {reason}"));
        }
    }

    /// Backs a held pellet out and starts the settle timer. The lock stays
    /// until the timer fires.
    fn release_take(&mut self) -> bool {
        let TakePelletState::Held(mut lock) = std::mem::take(&mut self.take) else {
            return false;
        };
        lock.stop_key_routing();
        self.behavior(BehaviorRequest::GotoStage {
            avatar: self.player,
            stage: 0,
            forward: false,
            new_time: Some(1.2),
        });
        self.arm(TimerTag::UntouchSettle, self.config.timers.untouch_settle_secs);
        self.take = TakePelletState::Releasing(lock);
        true
    }

    /// Drops any local take without the settle delay.
    fn abandon_take(&mut self) {
        if self.take.is_idle() {
            return;
        }
        self.behavior(BehaviorRequest::Stop {
            avatar: self.player,
        });
        self.take = TakePelletState::Idle;
        self.send_note(BusyPhase::Idle);
        self.log_event("take.abandoned");
    }

    fn finish_link(&mut self, target: LinkTarget) {
        if !self.linking_to(target) {
            self.log_event(format!("link.complete stale {target:?}"));
            return;
        }
        self.take = TakePelletState::Idle;
        let staged = self
            .state
            .staged_slot()
            .map(|slot| (slot, self.state.slot(slot)))
            .filter(|(_, recipe)| *recipe != EMPTY_RECIPE);
        let Some((slot, recipe)) = staged else {
            warn!(
                "player {}: link to {target:?} finished with no pellet staged",
                self.player
            );
            self.log_event(format!("link.empty {target:?}"));
            return;
        };
        self.write(StoreKey::PelletSlot(slot), StoreValue::zero());
        self.effects
            .push(Effect::Handoff(HandoffWrite::Store { recipe }));
        self.log_event(format!("link.capture {target:?} recipe {recipe}"));
        if target.requests_transfer() {
            let request = LinkRequest::pellet_cave(&self.config.cave_link, self.cave_guid.as_deref());
            self.log_event(format!("link.request {}", request.age_filename));
            self.effects.push(Effect::Link(request));
        }
    }

    fn linking_to(&self, target: LinkTarget) -> bool {
        self.take.label() == TakeLabel::InTransitToLink(target)
    }

    fn finish_flush(&mut self) {
        let Some(decision) = self.flush.take() else {
            return;
        };
        if decision.may_flush {
            self.spit_enabled = false;
            for slot in Slot::ALL {
                if self.state.slot(slot) != 0 {
                    self.cue(CueRequest::play(Cue::FlushAPellet(slot)));
                }
            }
            let cleaned = match self.authority.owner_token() {
                Some(owner) => {
                    owner.flush_cleanup(&self.effects);
                    true
                }
                None => false,
            };
            if cleaned {
                self.log_event("flush.cleanup");
            }
        }
        self.write(StoreKey::FlushLever, StoreValue::flag(false));
    }

    fn refresh_pellet_ready(&mut self) {
        let ready = self.state.pellet_ready();
        if ready == self.pellet_ready {
            return;
        }
        self.pellet_ready = ready;
        if ready {
            self.cue(CueRequest::play(Cue::MachineEnable(EnableState::Enable)));
        } else {
            self.spit_enabled = false;
            self.log_event("machine.empty");
        }
    }

    fn send_note(&mut self, phase: BusyPhase) {
        self.log_event(format!("note.send {phase:?}"));
        self.effects.push(Effect::Note(Note::TakePellet { phase }));
    }

    fn arm(&mut self, tag: TimerTag, delay_secs: f64) {
        let ticket = self.timers.arm(tag);
        self.effects.push(Effect::Schedule(TimerRequest { delay_secs, ticket }));
    }

    fn behavior(&mut self, request: BehaviorRequest) {
        self.effects.push(Effect::Behavior(request));
    }

    fn cue(&mut self, request: CueRequest) {
        self.log_event(format!("cue {}", request.cue));
        self.effects.cue(request);
    }

    fn write(&mut self, key: StoreKey, value: StoreValue) {
        self.log_event(format!("store.write {key}={}", value.as_int()));
        self.effects.write(key, value);
    }

    fn log_event(&mut self, event: impl Into<String>) {
        let event = event.into();
        debug!("player {}: {event}", self.player);
        self.events.push(event);
    }
}
