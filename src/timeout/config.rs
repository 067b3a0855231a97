//! Timeout configuration
//!
//! All values are milliseconds in the config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::scheduler::TimerKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Coordinator waiting for all votes
    #[serde(default = "default_vote_timeout")]
    pub vote_timeout_ms: u64,

    /// Participant waiting for a decision or an inquiry answer
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// Coordinator waiting for all acknowledgements
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Delay before a crashed node revives itself
    #[serde(default = "default_respawn_delay")]
    pub respawn_delay_ms: u64,

    /// Bound on how long a recovered coordinator with nobody left to
    /// wait for holds off before writing END
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,

    /// Interval of the dispatch / vote / ack sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Per-request timeout of outbound sends
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

fn default_vote_timeout() -> u64 {
    5000
}
fn default_response_timeout() -> u64 {
    5000
}
fn default_ack_timeout() -> u64 {
    5000
}
fn default_respawn_delay() -> u64 {
    10000
}
fn default_grace_period() -> u64 {
    3000
}
fn default_sweep_interval() -> u64 {
    250
}
fn default_send_timeout() -> u64 {
    2000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            vote_timeout_ms: default_vote_timeout(),
            response_timeout_ms: default_response_timeout(),
            ack_timeout_ms: default_ack_timeout(),
            respawn_delay_ms: default_respawn_delay(),
            grace_period_ms: default_grace_period(),
            sweep_interval_ms: default_sweep_interval(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

impl TimeoutConfig {
    /// Delay of a timer kind
    pub fn duration(&self, kind: TimerKind) -> Duration {
        let ms = match kind {
            TimerKind::Vote => self.vote_timeout_ms,
            TimerKind::Response => self.response_timeout_ms,
            TimerKind::Ack => self.ack_timeout_ms,
            TimerKind::Respawn => self.respawn_delay_ms,
            TimerKind::Grace => self.grace_period_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Rejects zero values; returns the offending field name
    pub fn validate(&self) -> Result<(), &'static str> {
        let fields = [
            ("vote_timeout_ms", self.vote_timeout_ms),
            ("response_timeout_ms", self.response_timeout_ms),
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("respawn_delay_ms", self.respawn_delay_ms),
            ("grace_period_ms", self.grace_period_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("send_timeout_ms", self.send_timeout_ms),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(name),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: TimeoutConfig = serde_json::from_str(r#"{"ack_timeout_ms": 42}"#).unwrap();
        assert_eq!(config.ack_timeout_ms, 42);
        assert_eq!(config.vote_timeout_ms, 5000);
        assert_eq!(config.duration(TimerKind::Ack), Duration::from_millis(42));
        assert_eq!(config.duration(TimerKind::Respawn), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = TimeoutConfig {
            grace_period_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err("grace_period_ms"));
        assert!(TimeoutConfig::default().validate().is_ok());
    }
}
