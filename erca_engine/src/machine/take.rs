use serde::Serialize;

use super::chamber::Slot;
use crate::linking::LinkTarget;
use crate::lock::InteractionLock;

/// Local avatar's involvement with a presented pellet. The lock lives inside
/// the states that need it, so leaving them releases it.
#[derive(Debug, Default)]
pub enum TakePelletState {
    #[default]
    Idle,
    Held(InteractionLock),
    /// Backing out of a touch; waits for the settle timer.
    Releasing(InteractionLock),
    InTransitToLink {
        target: LinkTarget,
        lock: InteractionLock,
    },
}

impl TakePelletState {
    pub fn is_idle(&self) -> bool {
        matches!(self, TakePelletState::Idle)
    }

    pub fn label(&self) -> TakeLabel {
        match self {
            TakePelletState::Idle => TakeLabel::Idle,
            TakePelletState::Held(_) => TakeLabel::Held,
            TakePelletState::Releasing(_) => TakeLabel::Releasing,
            TakePelletState::InTransitToLink { target, .. } => TakeLabel::InTransitToLink(*target),
        }
    }

    pub fn lock(&self) -> Option<&InteractionLock> {
        match self {
            TakePelletState::Idle => None,
            TakePelletState::Held(lock) | TakePelletState::Releasing(lock) => Some(lock),
            TakePelletState::InTransitToLink { lock, .. } => Some(lock),
        }
    }
}

/// Lock-free view of [`TakePelletState`] for reports and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TakeLabel {
    Idle,
    Held,
    Releasing,
    InTransitToLink(LinkTarget),
}

impl TakeLabel {
    /// Held or carrying the pellet to a link. A releasing take no longer
    /// claims it.
    pub fn claims_pellet(self) -> bool {
        matches!(self, TakeLabel::Held | TakeLabel::InTransitToLink(_))
    }
}

/// Where the current spit sequence is on this replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SpitPhase {
    #[default]
    Idle,
    /// Chamber advanced; rotate/spit cues are playing.
    Dispensing(Slot),
    /// Pellet is out and takeable until the cooldown fires.
    Presented(Slot),
}

impl SpitPhase {
    pub fn in_flight(self) -> bool {
        !matches!(self, SpitPhase::Idle)
    }
}
