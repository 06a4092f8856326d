use std::time::Duration;

use anyhow::bail;
use serde::{Deserialize, Deserializer};

/// Queue-wide policy. The timing and retry values are stamped onto every packet on `send`,
///  overriding whatever the packet had before - this is per queue, not per packet.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// period of the scheduler tick
    #[serde(deserialize_with = "millis")]
    pub interval: Duration,
    #[serde(deserialize_with = "millis")]
    pub timeout: Duration,
    #[serde(alias = "replytimeout", deserialize_with = "millis")]
    pub reply_timeout: Duration,
    pub retries: u32,
    #[serde(alias = "retrywait", deserialize_with = "millis")]
    pub retry_wait: Duration,

    /// run the scheduler synchronously on `send` rather than waiting for the next tick
    pub immediate: bool,

    /// The transport is a persistent connection (e.g. a web socket) rather than one-shot
    ///  request / response (e.g. HTTP). On a persistent connection, every inbound frame is
    ///  acknowledged, including replies.
    #[serde(alias = "issocket")]
    pub is_socket: bool,

    /// `suspend` pauses packets that are underway (soft) instead of aborting them (hard)
    #[serde(alias = "softbrake")]
    pub soft_brake: bool,

    /// this queue's identity, stamped onto outgoing packets and used as a prefix for branding
    pub origin: String,
}

impl QueueConfig {
    pub fn new(origin: impl Into<String>) -> QueueConfig {
        QueueConfig {
            origin: origin.into(),
            ..QueueConfig::default()
        }
    }

    /// Unknown keys are ignored, missing keys get their defaults. Durations are in milliseconds.
    pub fn from_json(json: &str) -> anyhow::Result<QueueConfig> {
        let config: QueueConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval.is_zero() {
            bail!("scheduler interval must be greater than zero");
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            interval: Duration::from_millis(500),
            timeout: Duration::ZERO,
            reply_timeout: Duration::ZERO,
            retries: 0,
            retry_wait: Duration::ZERO,
            immediate: true,
            is_socket: false,
            soft_brake: true,
            origin: "unknown".to_string(),
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(deserializer)?))
}
