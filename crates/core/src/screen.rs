use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::datasource::DataSource;
use crate::handler::EventHandler;

/// A screen schema: its local data sources, named handlers and initial
/// state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screen {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    #[serde(default)]
    pub handlers: BTreeMap<String, EventHandler>,
    #[serde(default)]
    pub initial_state: serde_json::Value,
    /// Whether the screen is only reachable when logged in.
    #[serde(default)]
    pub requires_auth: bool,
}

impl Screen {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn handler(&self, name: &str) -> Option<&EventHandler> {
        self.handlers.get(name)
    }
}
