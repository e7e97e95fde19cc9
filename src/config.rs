//! Configuration types for track-dl

use crate::error::{Error, Result};
use crate::types::Quality;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Scheduler behaviour (concurrency, polling, cooldown)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum concurrent transfers (default: 3)
    ///
    /// Persisted queue state overrides this value on startup, since it can be
    /// changed at runtime with `set_max_concurrent`.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Quality requested from the executor (default: LOSSLESS)
    #[serde(default)]
    pub quality: Quality,

    /// Re-check interval while transfers are in flight (default: 100 ms)
    #[serde(default = "default_busy_poll_interval", with = "duration_ms_serde")]
    pub busy_poll_interval: Duration,

    /// Re-check interval while the queue is completely empty (default: 1 second)
    #[serde(default = "default_idle_poll_interval", with = "duration_ms_serde")]
    pub idle_poll_interval: Duration,

    /// Delay after a transfer finishes before its slot is reused (default: 500 ms)
    ///
    /// Applied after every outcome, including failures and cancellations.
    /// `0` disables it.
    #[serde(default = "default_cooldown", with = "duration_ms_serde")]
    pub cooldown: Duration,

    /// How long `shutdown()` waits for in-flight transfers to settle (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_ms_serde")]
    pub shutdown_timeout: Duration,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            quality: Quality::default(),
            busy_poll_interval: default_busy_poll_interval(),
            idle_poll_interval: default_idle_poll_interval(),
            cooldown: default_cooldown(),
            shutdown_timeout: default_shutdown_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Where queue state is persisted
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    /// Keep queue state in memory only
    #[default]
    None,
    /// Pretty-printed JSON state file
    Json {
        /// Path of the state file
        path: PathBuf,
    },
    /// SQLite database
    Sqlite {
        /// Path of the database file
        path: PathBuf,
    },
}

/// What to do with jobs found in `downloading` when state is loaded
///
/// Such jobs were interrupted by a crash or an unclean exit; no executor is
/// working on them anymore.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Put them back at the head of the queue with progress reset
    #[default]
    Requeue,
    /// Mark them failed with reason "interrupted"
    Fail,
}

/// Data storage and state restoration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// State store backend (default: in-memory)
    #[serde(default)]
    pub backend: StoreBackend,

    /// Reconciliation for interrupted transfers found on load
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,

    /// Drop completed/failed jobs older than this when state is loaded (default: keep all)
    #[serde(default, with = "optional_duration_serde")]
    pub finished_retention: Option<Duration>,
}

/// Main configuration for TrackDownloader
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Persistence settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Check settings that would make the scheduler misbehave
    pub fn validate(&self) -> Result<()> {
        validate_max_concurrent(self.scheduler.max_concurrent)?;
        if self.scheduler.busy_poll_interval.is_zero() {
            return Err(Error::config(
                "busy_poll_interval",
                "busy poll interval must be non-zero",
            ));
        }
        if self.scheduler.idle_poll_interval.is_zero() {
            return Err(Error::config(
                "idle_poll_interval",
                "idle poll interval must be non-zero",
            ));
        }
        if self.scheduler.event_buffer == 0 {
            return Err(Error::config(
                "event_buffer",
                "event buffer must hold at least one event",
            ));
        }
        Ok(())
    }
}

/// Reject a concurrency limit that would never admit anything
pub(crate) fn validate_max_concurrent(max_concurrent: usize) -> Result<()> {
    if max_concurrent == 0 {
        return Err(Error::config(
            "max_concurrent",
            "max_concurrent must be at least 1",
        ));
    }
    Ok(())
}

// Default value functions
fn default_max_concurrent() -> usize {
    3
}

fn default_busy_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_idle_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_cooldown() -> Duration {
    Duration::from_millis(500)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_event_buffer() -> usize {
    1000
}

// Duration serialization helpers
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
