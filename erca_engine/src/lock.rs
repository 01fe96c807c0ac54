//! Exclusive hold on the local avatar's camera and raw input while it is
//! touching or carrying a pellet.

use serde::Serialize;

use crate::effects::{Effect, Effects};
use crate::store::PlayerId;

/// Camera and input switches the lock flips on the local avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarControl {
    DisableFirstPerson,
    EnableFirstPerson,
    EnableControlKeys,
    DisableControlKeys,
}

/// Raw control keys the host may route to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlKey {
    ExitMode,
    MoveForward,
    MoveBackward,
    RotateLeft,
    RotateRight,
    Jump,
}

impl ControlKey {
    /// Keys that back the avatar out of a pellet touch.
    pub fn cancels_take(self) -> bool {
        matches!(
            self,
            ControlKey::ExitMode
                | ControlKey::MoveBackward
                | ControlKey::RotateLeft
                | ControlKey::RotateRight
        )
    }
}

/// Guard over the avatar's camera and input. Dropping it restores defaults,
/// so leaving the holding state on any path releases exactly once.
#[derive(Debug)]
pub struct InteractionLock {
    effects: Effects,
    avatar: PlayerId,
    keys_routed: bool,
}

impl InteractionLock {
    pub fn acquire(effects: &Effects, avatar: PlayerId) -> Self {
        log::debug!("avatar {avatar}: interaction lock acquired");
        effects.push(Effect::Avatar(AvatarControl::DisableFirstPerson));
        effects.push(Effect::Avatar(AvatarControl::EnableControlKeys));
        Self {
            effects: effects.clone(),
            avatar,
            keys_routed: true,
        }
    }

    pub fn avatar(&self) -> PlayerId {
        self.avatar
    }

    pub fn keys_routed(&self) -> bool {
        self.keys_routed
    }

    /// Stops routing control keys while the camera stays locked.
    pub fn stop_key_routing(&mut self) {
        if self.keys_routed {
            self.keys_routed = false;
            self.effects
                .push(Effect::Avatar(AvatarControl::DisableControlKeys));
        }
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for InteractionLock {
    fn drop(&mut self) {
        self.stop_key_routing();
        self.effects
            .push(Effect::Avatar(AvatarControl::EnableFirstPerson));
        log::debug!("avatar {}: interaction lock released", self.avatar);
    }
}
