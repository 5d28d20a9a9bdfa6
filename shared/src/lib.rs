use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod protocol;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 50000;
pub const PLAYER_SPEED: f32 = 5.0;
pub const SPAWN_X: f32 = 400.0;
pub const SPAWN_Y: f32 = 300.0;
/// Longest display name kept, in bytes. Longer names are cut at a char boundary.
pub const MAX_NAME_LEN: usize = 32;

/// Point-in-time copy of every registered player, keyed by identity.
pub type Snapshot = BTreeMap<u32, PlayerState>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub name: String,
}

impl PlayerState {
    pub fn new(id: u32, x: f32, y: f32, name: impl Into<String>) -> Self {
        Self {
            id,
            x,
            y,
            name: name.into(),
        }
    }

    /// Fresh player at the spawn point with the default `Player{id}` name.
    pub fn spawn(id: u32) -> Self {
        Self::new(id, SPAWN_X, SPAWN_Y, default_name(id))
    }

    /// Moves the player by `speed` along every axis whose flag is set.
    ///
    /// Opposite flags cancel out and diagonal movement is not normalized.
    /// A non-empty `input.name` replaces the display name, truncated to
    /// [`MAX_NAME_LEN`] bytes.
    pub fn apply_input(&mut self, input: &InputState, speed: f32) {
        if input.up {
            self.y -= speed;
        }
        if input.down {
            self.y += speed;
        }
        if input.left {
            self.x -= speed;
        }
        if input.right {
            self.x += speed;
        }

        if !input.name.is_empty() {
            self.name.clear();
            self.name.push_str(truncate_name(&input.name));
        }
    }
}

fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

pub fn default_name(id: u32) -> String {
    format!("Player{}", id)
}

/// Directional input for a single tick, plus an optional rename.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct InputState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub name: String,
}

impl InputState {
    pub fn is_idle(&self) -> bool {
        !(self.up || self.down || self.left || self.right)
    }
}
