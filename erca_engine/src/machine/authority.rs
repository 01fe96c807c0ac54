//! Single-writer role for corrective writes.
//!
//! Exactly one present replica is the owner at a time. Operations that must
//! not be performed by several replicas at once are methods on
//! [`OwnerToken`], and the only way to get a token is from an
//! [`Authority::Owner`].

use std::marker::PhantomData;

use serde::Serialize;

use super::chamber::Slot;
use crate::effects::Effects;
use crate::store::{StoreKey, StoreValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Authority {
    Owner,
    #[default]
    NonOwner,
}

impl Authority {
    pub fn is_owner(self) -> bool {
        matches!(self, Authority::Owner)
    }

    pub fn owner_token(&self) -> Option<OwnerToken<'_>> {
        match self {
            Authority::Owner => Some(OwnerToken {
                _authority: PhantomData,
            }),
            Authority::NonOwner => None,
        }
    }
}

/// Proof that the caller currently holds the owner role.
#[derive(Debug)]
pub struct OwnerToken<'a> {
    _authority: PhantomData<&'a Authority>,
}

impl OwnerToken<'_> {
    /// Empties every slot and closes the machine after an effective flush.
    pub fn flush_cleanup(&self, effects: &Effects) {
        for slot in Slot::ALL {
            effects.write(StoreKey::PelletSlot(slot), StoreValue::zero());
        }
        effects.write(StoreKey::MachineOpen, StoreValue::flag(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::Effect;

    #[test]
    fn only_owner_mints_tokens() {
        assert!(Authority::Owner.owner_token().is_some());
        assert!(Authority::NonOwner.owner_token().is_none());
        assert!(!Authority::default().is_owner());
    }

    #[test]
    fn flush_cleanup_empties_slots_and_closes() {
        let effects = Effects::new();
        let authority = Authority::Owner;
        let token = authority.owner_token().expect("owner token");
        token.flush_cleanup(&effects);

        let writes: Vec<Effect> = effects.drain();
        assert_eq!(writes.len(), 6);
        assert_eq!(
            writes.last(),
            Some(&Effect::Store {
                key: StoreKey::MachineOpen,
                value: StoreValue::flag(false),
            })
        );
    }
}
