//! Per-player chronicle used to carry a captured pellet across a link.
//!
//! The value is written by the machine when a pellet is carried out and
//! consumed (reset to the sentinel) by whoever reads it next: the destination
//! age's bootstrap, or the machine's own room entry when the transfer was
//! abandoned.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::PlayerId;

/// Chronicle entry name holding the carried recipe.
pub const GOT_PELLET_CHRONICLE: &str = "GotPellet";

/// Sentinel for "no pellet carried".
pub const EMPTY_RECIPE: i32 = 0;

/// Handoff mutation requested by a controller for its own player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffWrite {
    Store { recipe: i32 },
    Clear,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("chronicle {name} for player {player} holds non-numeric value {value:?}")]
    CorruptValue {
        player: PlayerId,
        name: String,
        value: String,
    },
}

/// Durable chronicle entries per player, optionally backed by a JSON file.
#[derive(Debug, Default, Clone)]
pub struct ChronicleVault {
    players: BTreeMap<PlayerId, BTreeMap<String, String>>,
    dirty: bool,
    backing_path: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VaultFile {
    #[serde(default)]
    players: BTreeMap<PlayerId, BTreeMap<String, String>>,
}

impl ChronicleVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: Option<&Path>) -> Result<Self> {
        let mut vault = ChronicleVault {
            backing_path: path.map(|p| p.to_path_buf()),
            ..Self::default()
        };
        if let Some(p) = path {
            if p.exists() {
                let raw = fs::read_to_string(p)
                    .with_context(|| format!("failed to read vault file: {}", p.display()))?;
                let file: VaultFile = serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse vault json: {}", p.display()))?;
                vault.players = file.players;
            }
        }
        Ok(vault)
    }

    pub fn find_chronicle(&self, player: PlayerId, name: &str) -> Option<&str> {
        self.players
            .get(&player)
            .and_then(|entries| entries.get(name))
            .map(String::as_str)
    }

    /// Adds the entry when missing, overwrites it otherwise.
    pub fn set_chronicle(&mut self, player: PlayerId, name: &str, value: impl Into<String>) {
        let value = value.into();
        let entries = self.players.entry(player).or_default();
        if entries.get(name) != Some(&value) {
            entries.insert(name.to_string(), value);
            self.dirty = true;
        }
    }

    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(path) = &self.backing_path {
            let file = VaultFile {
                players: self.players.clone(),
            };
            let json = serde_json::to_string_pretty(&file).context("serializing vault")?;
            fs::write(path, json)
                .with_context(|| format!("failed to write vault file: {}", path.display()))?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Current handoff value without consuming it. Missing entries read as
    /// the sentinel.
    pub fn peek_handoff(&self, player: PlayerId) -> Result<i32, VaultError> {
        match self.find_chronicle(player, GOT_PELLET_CHRONICLE) {
            None => Ok(EMPTY_RECIPE),
            Some(raw) => raw.trim().parse().map_err(|_| VaultError::CorruptValue {
                player,
                name: GOT_PELLET_CHRONICLE.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    /// Overwrites the player's handoff; there is never more than one.
    pub fn write_handoff(&mut self, player: PlayerId, recipe: i32) {
        self.set_chronicle(player, GOT_PELLET_CHRONICLE, recipe.to_string());
    }

    /// Reads and resets the handoff. Returns `None` when nothing was carried.
    /// A corrupt value is discarded and reported.
    pub fn consume_handoff(&mut self, player: PlayerId) -> Result<Option<i32>, VaultError> {
        let value = self.peek_handoff(player);
        if self.find_chronicle(player, GOT_PELLET_CHRONICLE).is_some() {
            self.set_chronicle(player, GOT_PELLET_CHRONICLE, EMPTY_RECIPE.to_string());
        }
        value.map(|recipe| (recipe != EMPTY_RECIPE).then_some(recipe))
    }

    pub fn apply(&mut self, player: PlayerId, write: HandoffWrite) {
        match write {
            HandoffWrite::Store { recipe } => self.write_handoff(player, recipe),
            HandoffWrite::Clear => {
                if let Err(err) = self.consume_handoff(player) {
                    log::warn!("{err}; reset to empty");
                }
            }
        }
    }
}
