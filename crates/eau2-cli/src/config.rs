use std::fs;
use std::path::Path;

use anyhow::Context;
use eau2_net::NetConfig;
use eau2_store::StoreConfig;
use serde::{Deserialize, Serialize};

/// Everything a node reads from its config file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub net: NetConfig,
    pub store: StoreConfig,
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
