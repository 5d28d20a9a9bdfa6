//! Authoritative player registry and the world lock that guards it
//!
//! `PlayerRegistry` is a plain map of identity to `PlayerState` with the
//! movement rule applied on top. `World` wraps the registry together with the
//! identity counter behind one mutex, which is the only state shared between
//! connection handlers.

use log::{error, info};
use shared::{InputState, PlayerState, Snapshot};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Internal failures; none is caused by client input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("identity {0} is already registered")]
    DuplicateIdentity(u32),

    #[error("identity {0} is not registered")]
    UnknownIdentity(u32),

    #[error("no identities left to assign")]
    IdentitiesExhausted,
}

#[derive(Debug, Clone)]
pub struct PlayerRegistry {
    players: HashMap<u32, PlayerState>,
    speed: f32,
}

impl PlayerRegistry {
    pub fn new(speed: f32) -> Self {
        Self {
            players: HashMap::new(),
            speed,
        }
    }

    pub fn register(&mut self, id: u32, state: PlayerState) -> Result<(), RegistryError> {
        if self.players.contains_key(&id) {
            return Err(RegistryError::DuplicateIdentity(id));
        }
        self.players.insert(id, state);
        Ok(())
    }

    /// Applies one tick of input to `id`. Leaves the registry untouched if
    /// the identity is absent.
    pub fn apply_input(&mut self, id: u32, input: &InputState) -> Result<(), RegistryError> {
        let player = self
            .players
            .get_mut(&id)
            .ok_or(RegistryError::UnknownIdentity(id))?;
        player.apply_input(input, self.speed);
        Ok(())
    }

    /// Returns true if an entry was removed. Removing an absent id is fine.
    pub fn remove(&mut self, id: u32) -> bool {
        self.players.remove(&id).is_some()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.players
            .iter()
            .map(|(id, player)| (*id, player.clone()))
            .collect()
    }

    pub fn get(&self, id: u32) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

struct WorldState {
    registry: PlayerRegistry,
    /// `None` once `u32::MAX` has been handed out.
    next_id: Option<u32>,
}

/// Registry plus identity counter under a single lock.
///
/// The lock is never held across an `.await`, so a std mutex is enough and
/// lets [`World::leave`] run from `Drop`.
pub struct World {
    state: Mutex<WorldState>,
}

impl World {
    pub fn new(speed: f32) -> Self {
        Self::starting_at(speed, 1)
    }

    fn starting_at(speed: f32, first_id: u32) -> Self {
        Self {
            state: Mutex::new(WorldState {
                registry: PlayerRegistry::new(speed),
                next_id: Some(first_id),
            }),
        }
    }

    // Every critical section leaves the registry consistent, so a panic in
    // another holder does not invalidate the data.
    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assigns the next identity and registers a freshly spawned player for it.
    pub fn join(&self) -> Result<u32, RegistryError> {
        let mut state = self.lock();
        let Some(id) = state.next_id else {
            error!("Identity counter exhausted");
            return Err(RegistryError::IdentitiesExhausted);
        };
        state.next_id = id.checked_add(1);

        if let Err(e) = state.registry.register(id, PlayerState::spawn(id)) {
            error!("Identity assignment produced a duplicate: {}", e);
            return Err(e);
        }

        info!("Player {} joined ({} online)", id, state.registry.len());
        Ok(id)
    }

    /// Applies `input` for `id` and returns the registry as it stands right
    /// after, both under one lock acquisition.
    pub fn update(&self, id: u32, input: &InputState) -> Result<Snapshot, RegistryError> {
        let mut state = self.lock();
        state.registry.apply_input(id, input)?;
        Ok(state.registry.snapshot())
    }

    pub fn leave(&self, id: u32) -> bool {
        let mut state = self.lock();
        let removed = state.registry.remove(id);
        if removed {
            info!(
                "Player {} left ({} player(s) remaining)",
                id,
                state.registry.len()
            );
        }
        removed
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().registry.snapshot()
    }

    pub fn player_count(&self) -> usize {
        self.lock().registry.len()
    }

}
