use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result, bail};
use enginelink_core::rpc::RpcConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_RATE_HZ: u32 = 60;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HostSettings {
    pub rpc: RpcConfig,
    /// Main loop frequency
    pub tick_rate_hz: u32,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
        }
    }
}

impl HostSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
        let settings: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Cannot parse {}", path.display()))?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_rate_hz == 0 {
            bail!("tick_rate_hz must be greater than zero");
        }
        self.rpc.validate()?;
        Ok(())
    }
}
