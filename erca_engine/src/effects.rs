use std::cell::RefCell;
use std::rc::Rc;

use erca_stream::Note;
use serde::Serialize;

use crate::cues::{BehaviorRequest, CueRequest};
use crate::handoff::HandoffWrite;
use crate::linking::LinkRequest;
use crate::lock::AvatarControl;
use crate::store::{StoreKey, StoreValue};
use crate::timer::TimerRequest;

/// Everything a controller asks of the outside world.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Store { key: StoreKey, value: StoreValue },
    Schedule(TimerRequest),
    Cue(CueRequest),
    Behavior(BehaviorRequest),
    Avatar(AvatarControl),
    Note(Note),
    Handoff(HandoffWrite),
    Link(LinkRequest),
}

/// Shared outbox a controller and its lock guard push effects into. The host
/// drains it after each handler.
#[derive(Clone, Default)]
pub struct Effects {
    queue: Rc<RefCell<Vec<Effect>>>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, effect: Effect) {
        self.queue.borrow_mut().push(effect);
    }

    pub fn write(&self, key: StoreKey, value: StoreValue) {
        self.push(Effect::Store { key, value });
    }

    pub fn cue(&self, request: CueRequest) {
        self.push(Effect::Cue(request));
    }

    pub fn drain(&self) -> Vec<Effect> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

impl std::fmt::Debug for Effects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effects")
            .field("pending", &self.queue.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_outbox() {
        let effects = Effects::new();
        let guard_side = effects.clone();
        effects.write(StoreKey::MachineOpen, StoreValue::flag(true));
        guard_side.push(Effect::Avatar(AvatarControl::EnableFirstPerson));

        let drained = effects.drain();
        assert_eq!(drained.len(), 2);
        assert!(guard_side.is_empty());
    }
}
