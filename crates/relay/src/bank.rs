//! Named relays grouped by category, with the optional master valve that
//! feeds every water line.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::board::RelayBoard;
use crate::command::Command;
use crate::config::{Category, Config};

pub(crate) struct RelayBank {
    board: RelayBoard,
    categories: HashMap<String, Category>,
    master: Option<String>,
    open_valves: BTreeSet<String>,
}

impl RelayBank {
    /// Starts with every relay off.
    pub(crate) fn new(config: &Config) -> Result<Self> {
        let board = RelayBoard::new(&config.pins(), config.listener.active_low)?;
        let categories = config
            .relays
            .iter()
            .map(|r| (r.name.clone(), r.category))
            .collect();
        Ok(Self {
            board,
            categories,
            master: config.listener.master_valve.clone(),
            open_valves: BTreeSet::new(),
        })
    }

    pub(crate) fn apply(&mut self, cmd: &Command) {
        let Some(&category) = self.categories.get(&cmd.name) else {
            warn!(relay = %cmd.name, "command for unknown relay ignored");
            return;
        };
        if !self.board.contains(&cmd.name) {
            warn!(relay = %cmd.name, "relay has no output pin");
            return;
        }
        if category != cmd.category {
            warn!(
                relay = %cmd.name,
                configured = %category,
                requested = %cmd.category,
                "category mismatch"
            );
        }
        if self.master.as_deref() == Some(cmd.name.as_str()) {
            warn!(relay = %cmd.name, "master valve follows the other valves, command ignored");
            return;
        }

        self.board.set(&cmd.name, cmd.on);
        if category == Category::Water {
            self.track_valve(&cmd.name, cmd.on);
        }
    }

    fn track_valve(&mut self, name: &str, open: bool) {
        if open {
            self.open_valves.insert(name.to_string());
        } else {
            self.open_valves.remove(name);
        }
        let Some(master) = self.master.clone() else {
            return;
        };
        let master_open = !self.open_valves.is_empty();
        debug!(open = self.open_valves.len(), master_open, "water lines");
        self.board.set(&master, master_open);
    }

    pub(crate) fn all_off(&mut self) {
        info!("switching every relay off");
        self.board.all_off();
        self.open_valves.clear();
    }
}

#[cfg(all(test, not(feature = "gpio")))]
impl RelayBank {
    pub(crate) fn is_on(&self, name: &str) -> bool {
        self.board.relays.get(name).copied().unwrap_or(false)
    }

    pub(crate) fn is_all_off(&self) -> bool {
        self.board.relays.values().all(|on| !on)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
