use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;

use super::bridge::DrainBudget;
use super::errors::ConfigError;
use super::frame::DEFAULT_MAX_FRAME_BYTES;

/// What to do with a new client when all connection slots are taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CapacityPolicy {
    /// Answer the newcomer with an error and close it
    #[default]
    Reject,
    /// Close the longest-lived connection to make room
    EvictOldest,
}

/// RPC server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Address to listen on
    pub host: String,
    /// TCP port to listen on, 0 picks a free port
    pub port: u16,
    /// Simultaneous client connections
    pub max_connections: usize,
    pub capacity_policy: CapacityPolicy,
    /// Largest accepted frame, excluding the delimiter
    pub max_frame_bytes: usize,
    /// Main-thread invocations executed per tick at most
    pub max_invocations_per_tick: usize,
    /// Soft time limit of one drain
    pub max_tick_time_ms: Option<u64>,
    /// A client not reading its responses for this long is disconnected
    pub write_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            max_connections: 1,
            capacity_policy: CapacityPolicy::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_invocations_per_tick: 32,
            max_tick_time_ms: None,
            write_timeout_ms: 30_000,
        }
    }
}

impl RpcConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Zero("max_connections"));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Zero("max_frame_bytes"));
        }
        if self.max_invocations_per_tick == 0 {
            return Err(ConfigError::Zero("max_invocations_per_tick"));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Zero("write_timeout_ms"));
        }
        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn drain_budget(&self) -> DrainBudget {
        DrainBudget {
            max_invocations: self.max_invocations_per_tick,
            max_time: self.max_tick_time_ms.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = RpcConfig::default();
        assert_eq!(c.port, 9000);
        assert_eq!(c.max_connections, 1);
        assert_eq!(c.capacity_policy, CapacityPolicy::Reject);
        assert_eq!(c.write_timeout(), Duration::from_secs(30));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json() {
        let c: RpcConfig =
            serde_json::from_str(r#"{"port": 9100, "capacity_policy": "evict_oldest"}"#).unwrap();
        assert_eq!(c.port, 9100);
        assert_eq!(c.host, "127.0.0.1");
        assert_eq!(c.capacity_policy, CapacityPolicy::EvictOldest);
    }

    #[test]
    fn validate_rejects_zero() {
        let c = RpcConfig {
            max_invocations_per_tick: 0,
            ..Default::default()
        };
        assert_eq!(
            c.validate(),
            Err(ConfigError::Zero("max_invocations_per_tick"))
        );
        let c = RpcConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::Zero("max_connections")));
        let c = RpcConfig {
            write_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::Zero("write_timeout_ms")));
    }

    #[test]
    fn budget() {
        let c = RpcConfig {
            max_tick_time_ms: Some(5),
            ..Default::default()
        };
        assert_eq!(
            c.drain_budget(),
            DrainBudget {
                max_invocations: 32,
                max_time: Some(Duration::from_millis(5)),
            }
        );
    }
}
