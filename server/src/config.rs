//! Server configuration.

use shared::{default_tick_interval, BROADCAST_INTERVAL_MS};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tick interval must be non-zero")]
    ZeroTick,
    #[error("broadcast interval must be non-zero")]
    ZeroBroadcast,
    #[error("tick interval ({tick:?}) must be shorter than the broadcast interval ({broadcast:?})")]
    TickNotFaster { tick: Duration, broadcast: Duration },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on, e.g. `127.0.0.1:8000`.
    pub addr: String,
    /// Fixed simulation step of every lobby.
    pub tick_interval: Duration,
    /// Interval between authoritative snapshots.
    pub broadcast_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            tick_interval: default_tick_interval(),
            broadcast_interval: Duration::from_millis(BROADCAST_INTERVAL_MS),
        }
    }
}

impl ServerConfig {
    /// Checks the intervals: both non-zero, and the tick faster than the broadcast.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        if self.broadcast_interval.is_zero() {
            return Err(ConfigError::ZeroBroadcast);
        }
        if self.tick_interval >= self.broadcast_interval {
            return Err(ConfigError::TickNotFaster {
                tick: self.tick_interval,
                broadcast: self.broadcast_interval,
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ServerConfig::default().validate().unwrap();
        assert_eq!(config.broadcast_interval, Duration::from_millis(200));
        assert!(config.tick_interval < Duration::from_millis(17));
    }

    #[test]
    fn test_rejects_bad_intervals() {
        let zero_tick = ServerConfig {
            tick_interval: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert_eq!(zero_tick.validate().unwrap_err(), ConfigError::ZeroTick);

        let slow_tick = ServerConfig {
            tick_interval: Duration::from_millis(300),
            ..ServerConfig::default()
        };
        assert!(matches!(slow_tick.validate(), Err(ConfigError::TickNotFaster { .. })));

        let zero_broadcast = ServerConfig {
            broadcast_interval: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert_eq!(zero_broadcast.validate().unwrap_err(), ConfigError::ZeroBroadcast);
    }
}
