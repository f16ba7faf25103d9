use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Upper bound for every seconds-valued setting (100 years).
pub const MAX_CONFIG_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Clamped so the conversion can never overflow.
fn chrono_seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_CONFIG_SECONDS) as i64)
}

fn ensure_bounded(name: &str, secs: u64) -> Result<()> {
    if secs > MAX_CONFIG_SECONDS {
        return Err(OrchestratorError::InvalidConfig(format!(
            "{name} is {secs}, must be at most {MAX_CONFIG_SECONDS}"
        )));
    }
    Ok(())
}

/// Policy used to pick a worker for a ready job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Lowest worker priority wins
    #[default]
    #[value(name = "priority")]
    Priority,
    /// Rotate through workers in registration order
    #[value(name = "round_robin")]
    RoundRobin,
    /// Lowest current_jobs / max_concurrent wins
    #[value(name = "load_balance")]
    LoadBalance,
    /// Lowest historical average job duration wins
    #[value(name = "fastest_first")]
    FastestFirst,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Priority => write!(f, "priority"),
            StrategyKind::RoundRobin => write!(f, "round_robin"),
            StrategyKind::LoadBalance => write!(f, "load_balance"),
            StrategyKind::FastestFirst => write!(f, "fastest_first"),
        }
    }
}

/// What a dispatch pass does with a queued job no worker can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Leave the job queued and retry on the next tick
    #[default]
    #[value(name = "next_priority")]
    NextPriority,
    /// Leave the job queued until the assignment timeout expires
    #[value(name = "queue_and_wait")]
    QueueAndWait,
    /// Fail the job on the first attempt that finds no eligible worker
    #[value(name = "fail_job")]
    FailJob,
}

impl fmt::Display for FallbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackMode::NextPriority => write!(f, "next_priority"),
            FallbackMode::QueueAndWait => write!(f, "queue_and_wait"),
            FallbackMode::FailJob => write!(f, "fail_job"),
        }
    }
}

/// Scheduling and health settings for the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub assignment_strategy: StrategyKind,
    pub fallback_mode: FallbackMode,
    /// Seconds a job may stay queued under `queue_and_wait`
    pub assignment_timeout_seconds: u64,
    /// Heartbeat age after which a worker is offline
    pub heartbeat_timeout_seconds: u64,
    /// Interval at which workers are expected to heartbeat
    pub heartbeat_interval_seconds: u64,
    /// Consecutive missed heartbeat intervals after which a worker is offline
    pub mark_offline_after_missed: u32,
    pub health_check_interval_seconds: u64,
    pub dispatch_interval_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            assignment_strategy: StrategyKind::Priority,
            fallback_mode: FallbackMode::NextPriority,
            assignment_timeout_seconds: 3600,
            heartbeat_timeout_seconds: 90,
            heartbeat_interval_seconds: 30,
            mark_offline_after_missed: 3,
            health_check_interval_seconds: 30,
            dispatch_interval_seconds: 5,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.assignment_strategy = strategy;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackMode) -> Self {
        self.fallback_mode = fallback;
        self
    }

    /// Heartbeat age beyond which a worker is considered offline.
    ///
    /// Both the explicit timeout and the missed-interval count are honoured;
    /// the longer of the two wins so neither setting can cause an early
    /// reclaim.
    pub fn offline_threshold(&self) -> chrono::Duration {
        chrono_seconds(self.offline_threshold_seconds())
    }

    fn offline_threshold_seconds(&self) -> u64 {
        let missed = self
            .heartbeat_interval_seconds
            .saturating_mul(u64::from(self.mark_offline_after_missed));
        self.heartbeat_timeout_seconds.max(missed)
    }

    pub fn assignment_timeout(&self) -> chrono::Duration {
        chrono_seconds(self.assignment_timeout_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_timeout_seconds == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "heartbeat_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.mark_offline_after_missed == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "mark_offline_after_missed must be at least 1".to_string(),
            ));
        }
        if self.health_check_interval_seconds == 0 || self.dispatch_interval_seconds == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "health check and dispatch intervals must be positive".to_string(),
            ));
        }
        if self.fallback_mode == FallbackMode::QueueAndWait && self.assignment_timeout_seconds == 0
        {
            return Err(OrchestratorError::InvalidConfig(
                "queue_and_wait requires a positive assignment_timeout_seconds".to_string(),
            ));
        }
        ensure_bounded("heartbeat_timeout_seconds", self.heartbeat_timeout_seconds)?;
        ensure_bounded("offline threshold", self.offline_threshold_seconds())?;
        ensure_bounded("assignment_timeout_seconds", self.assignment_timeout_seconds)?;
        ensure_bounded(
            "health_check_interval_seconds",
            self.health_check_interval_seconds,
        )?;
        ensure_bounded("dispatch_interval_seconds", self.dispatch_interval_seconds)?;

        let threshold = self.offline_threshold().num_seconds();
        if i64::try_from(self.health_check_interval_seconds).unwrap_or(i64::MAX) > threshold / 2 {
            tracing::warn!(
                health_check_interval_seconds = self.health_check_interval_seconds,
                offline_threshold_seconds = threshold,
                "Health check interval exceeds half the offline threshold, reclaim will lag"
            );
        }
        Ok(())
    }
}

/// Periodic snapshot persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub path: PathBuf,
    pub interval_seconds: u64,
}

impl SnapshotConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub snapshot: Option<SnapshotConfig>,
    pub orchestrator: OrchestratorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8400)),
            snapshot: None,
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn with_snapshot(mut self, path: PathBuf, interval_seconds: u64) -> Self {
        self.snapshot = Some(SnapshotConfig {
            path,
            interval_seconds,
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.orchestrator.validate()?;
        if let Some(snapshot) = &self.snapshot {
            ensure_bounded("snapshot interval_seconds", snapshot.interval_seconds)?;
        }
        Ok(())
    }
}
