//! Routes actuator commands to the hardware that drives them and turns
//! driver failures into alerts.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertEngine, Severity};
use crate::config::Config;
use crate::model::{Actuator, Category};
use crate::peer::RelayPeer;
use crate::smartplug::SmartPlug;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("unable to reach {target}: {source}")]
    Unreachable {
        target: String,
        #[source]
        source: io::Error,
    },
    /// The device answered but refused or garbled the command.
    #[error("{0}")]
    Rejected(String),
}

/// Something that can turn one named device on or off.
#[async_trait]
pub trait Switch: Send + Sync {
    async fn set(&self, name: &str, category: Category, on: bool) -> Result<(), DriverError>;
}

/// Smart plugs are matched by actuator name, relay peers by category.
#[derive(Default)]
pub struct Dispatcher {
    plugs: HashMap<String, Arc<dyn Switch>>,
    peers: HashMap<Category, Arc<dyn Switch>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plug(mut self, name: impl Into<String>, switch: Arc<dyn Switch>) -> Self {
        self.plugs.insert(name.into(), switch);
        self
    }

    pub fn with_peer(mut self, category: Category, switch: Arc<dyn Switch>) -> Self {
        self.peers.insert(category, switch);
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let mut dispatcher = Self::new();
        for plug in &config.smartplugs {
            dispatcher = dispatcher.with_plug(
                plug.name.clone(),
                Arc::new(SmartPlug::new(&plug.host, plug.port)),
            );
        }

        let relays = &config.relays;
        let peers = [
            (Category::Fan, &relays.fan),
            (Category::Lights, &relays.lights),
            (Category::Water, &relays.water),
        ];
        for (category, host) in peers {
            if let Some(host) = host {
                dispatcher =
                    dispatcher.with_peer(category, Arc::new(RelayPeer::new(host, relays.port)));
            }
        }

        info!(
            plugs = dispatcher.plugs.len(),
            peers = dispatcher.peers.len(),
            "actuator dispatch ready"
        );
        dispatcher
    }

    /// Drive the hardware behind `actuator` to its commanded state.
    pub async fn apply(&self, alerts: &AlertEngine, actuator: &Actuator) {
        if let Some(plug) = self.plugs.get(&actuator.name) {
            self.apply_plug(alerts, plug.as_ref(), actuator).await;
        } else if let Some(peer) = self.peers.get(&actuator.category) {
            self.apply_peer(alerts, peer.as_ref(), actuator).await;
        } else {
            debug!(actuator = %actuator.name, category = %actuator.category, "no driver for actuator");
        }
    }

    async fn apply_plug(&self, alerts: &AlertEngine, plug: &dyn Switch, actuator: &Actuator) {
        let name = &actuator.name;
        let connect_key = format!("smartplug_connection_{name}");
        let reject_key = format!("smartplug_exception_{name}");

        match plug.set(name, actuator.category, actuator.state).await {
            Ok(()) => {
                info!(actuator = %name, on = actuator.state, "smart plug switched");
                alerts.clear(&connect_key);
                alerts.clear(&reject_key);
            }
            Err(DriverError::Unreachable { source, .. }) => {
                let message = format!("Unable to connect to {name} TP-Link Smartplug");
                warn!(actuator = %name, "{message}: {source}");
                alerts.raise(Alert::new(Severity::High, message, connect_key));
            }
            Err(DriverError::Rejected(reason)) => {
                warn!(actuator = %name, "smart plug rejected command: {reason}");
                alerts.raise(Alert::new(Severity::Mid, reason, reject_key));
            }
        }
    }

    async fn apply_peer(&self, alerts: &AlertEngine, peer: &dyn Switch, actuator: &Actuator) {
        let category = actuator.category;
        let key = format!("{category}_pi_connection");

        match peer.set(&actuator.name, category, actuator.state).await {
            Ok(()) => {
                info!(actuator = %actuator.name, on = actuator.state, "relay command sent");
                alerts.clear(&key);
            }
            Err(e) => {
                let message = format!("Unable to connect to {category} pi");
                warn!(actuator = %actuator.name, "{message}: {e}");
                alerts.raise(Alert::new(Severity::High, message, key));
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
