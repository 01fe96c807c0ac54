use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::linking::LinkTarget;
use crate::machine::chamber::Slot;
use crate::store::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnableState {
    Enable,
    Disable,
    IfOpening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModeState {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpitButton {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DropKind {
    Normal,
    Taken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TouchState {
    Touch,
    Untouch,
}

/// Visual responders wired to the machine, with their typed states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "responder", content = "state")]
pub enum Cue {
    UseMachine,
    MachineEnable(EnableState),
    MachineMode(ModeState),
    UseSpitBtn(SpitButton),
    RotateChamber(Slot),
    SpitPellet(Slot),
    DropPellet(DropKind),
    ShowAllPellets,
    HidePellet(Slot),
    TouchPellet(TouchState),
    FlushOneShot,
    FlushLever,
    FlushAPellet(Slot),
    LinkPellet(LinkTarget),
}

impl Cue {
    /// Responder name as wired in the age.
    pub fn responder(&self) -> &'static str {
        match self {
            Cue::UseMachine => "RespUseMachine",
            Cue::MachineEnable(_) => "RespMachineEnable",
            Cue::MachineMode(_) => "RespMachineMode",
            Cue::UseSpitBtn(_) => "RespUseSpitBtn",
            Cue::RotateChamber(_) => "RespRotateChamber",
            Cue::SpitPellet(_) => "RespSpitPellet",
            Cue::DropPellet(_) => "RespDropPellet",
            Cue::ShowAllPellets => "RespShowAllPellets",
            Cue::HidePellet(_) => "RespHidePellet",
            Cue::TouchPellet(_) => "RespTouchPellet",
            Cue::FlushOneShot => "RespFlushOneShot",
            Cue::FlushLever => "RespFlushLever",
            Cue::FlushAPellet(_) => "RespFlushAPellet",
            Cue::LinkPellet(_) => "RespLinkPellet",
        }
    }

    /// Responder state, for responders that have more than one.
    pub fn state(&self) -> Option<&'static str> {
        match self {
            Cue::UseMachine | Cue::ShowAllPellets | Cue::FlushOneShot | Cue::FlushLever => None,
            Cue::MachineEnable(EnableState::Enable) => Some("Enable"),
            Cue::MachineEnable(EnableState::Disable) => Some("Disable"),
            Cue::MachineEnable(EnableState::IfOpening) => Some("IfOpening"),
            Cue::MachineMode(ModeState::Open) => Some("Open"),
            Cue::MachineMode(ModeState::Close) => Some("Close"),
            Cue::UseSpitBtn(SpitButton::Allow) => Some("allow"),
            Cue::UseSpitBtn(SpitButton::Deny) => Some("deny"),
            Cue::RotateChamber(slot) | Cue::SpitPellet(slot) => Some(slot.stop().chamber_state),
            Cue::DropPellet(DropKind::Normal) => Some("normal"),
            Cue::DropPellet(DropKind::Taken) => Some("taken"),
            Cue::HidePellet(slot) => Some(slot.stop().pellet_state),
            Cue::TouchPellet(TouchState::Touch) => Some("Touch"),
            Cue::TouchPellet(TouchState::Untouch) => Some("Untouch"),
            Cue::FlushAPellet(slot) => Some(slot.stop().flush_state),
            Cue::LinkPellet(target) => Some(target.state()),
        }
    }
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state() {
            Some(state) => write!(f, "{}:{}", self.responder(), state),
            None => f.write_str(self.responder()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CueRequest {
    pub cue: Cue,
    pub avatar: Option<PlayerId>,
    /// Snap to the end state without playing or notifying.
    pub fast_forward: bool,
}

impl CueRequest {
    pub fn play(cue: Cue) -> Self {
        Self {
            cue,
            avatar: None,
            fast_forward: false,
        }
    }

    pub fn for_avatar(cue: Cue, avatar: PlayerId) -> Self {
        Self {
            cue,
            avatar: Some(avatar),
            fast_forward: false,
        }
    }

    pub fn fast_forward(cue: Cue) -> Self {
        Self {
            cue,
            avatar: None,
            fast_forward: true,
        }
    }

    /// Whether the cue player reports completion back to the controller.
    pub fn notifies(&self) -> bool {
        !self.fast_forward
    }
}

/// Requests against the multistage take/link behavior on the local avatar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BehaviorRequest {
    Start {
        avatar: PlayerId,
    },
    GotoStage {
        avatar: PlayerId,
        stage: i32,
        forward: bool,
        new_time: Option<f32>,
    },
    Stop {
        avatar: PlayerId,
    },
}

/// Observer for cue requests as they leave a replica.
pub trait CuePlayer {
    fn run(&self, _replica: PlayerId, _request: &CueRequest) {}
}

impl fmt::Debug for dyn CuePlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CuePlayer")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CueLogEntry {
    pub replica: PlayerId,
    pub cue: String,
    pub avatar: Option<PlayerId>,
    pub fast_forward: bool,
}

#[derive(Clone, Default)]
pub struct RecordingCuePlayer {
    entries: Rc<RefCell<Vec<CueLogEntry>>>,
}

impl RecordingCuePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<CueLogEntry> {
        self.entries.borrow().clone()
    }

    /// Cues a single replica asked for, formatted as `Responder:state`.
    pub fn cues_for(&self, replica: PlayerId) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .filter(|entry| entry.replica == replica)
            .map(|entry| entry.cue.clone())
            .collect()
    }
}

impl CuePlayer for RecordingCuePlayer {
    fn run(&self, replica: PlayerId, request: &CueRequest) {
        self.entries.borrow_mut().push(CueLogEntry {
            replica,
            cue: request.cue.to_string(),
            avatar: request.avatar,
            fast_forward: request.fast_forward,
        });
    }
}
