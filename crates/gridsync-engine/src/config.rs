//! Engine configuration, validation, and error types.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use gridsync_core::Timestamp;
use gridsync_model::StoreConfig;

/// Settings for one [`Engine`](crate::Engine).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Clock value every object is initialized to. Default: 0.
    pub start_time: Timestamp,
    /// The run ends once the next time reaches this. Default: none.
    pub stop_time: Option<Timestamp>,
    /// Sync worker threads. `None` = available parallelism, clamped
    /// to `[1, 64]`.
    pub thread_count: Option<usize>,
    /// Fewest objects per worker before a rank bucket is split.
    /// Default: 4.
    pub min_batch: usize,
    /// Passes allowed at one clock value before the run fails.
    /// Default: 100.
    pub iteration_limit: u32,
    /// Re-invocations of one object at one time for early soft
    /// requests before the step fails. Default: 100.
    pub convergence_retry_limit: u32,
    /// Future event times are rounded up to a multiple of this many
    /// seconds. Default: 1 (no rounding).
    pub minimum_timestep: u64,
    /// Caps the skip-safe window at `clock + horizon`. Default: none.
    pub skipsafe_horizon: Option<u64>,
    /// Longest a single object's sync may run. Default: 60 s.
    pub watchdog_timeout: Option<Duration>,
    /// Randomize object order within each rank bucket. Default: true.
    pub shuffle_ranks: bool,
    /// Warn instead of failing on unconventional object names.
    /// Default: false.
    pub relax_naming_rules: bool,
    /// Collect per-class timing and log a summary at shutdown.
    /// Default: false.
    pub profiler: bool,
    /// Seed for object seeds and rank shuffling. Default: 0.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start_time: Timestamp::ZERO,
            stop_time: None,
            thread_count: None,
            min_batch: 4,
            iteration_limit: 100,
            convergence_retry_limit: 100,
            minimum_timestep: 1,
            skipsafe_horizon: None,
            watchdog_timeout: Some(Duration::from_secs(60)),
            shuffle_ranks: true,
            relax_naming_rules: false,
            profiler: false,
            seed: 0,
        }
    }
}

impl EngineConfig {
    /// Resolve the worker count, applying auto-detection if `None`.
    ///
    /// Explicit values are clamped to `[1, 64]`.
    pub fn resolved_thread_count(&self) -> usize {
        match self.thread_count {
            Some(n) => n.clamp(1, 64),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .clamp(1, 64),
        }
    }

    /// The object store settings derived from this configuration.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            relax_naming_rules: self.relax_naming_rules,
            seed: self.seed,
        }
    }

    /// Validate all structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 1. Start time must be a real time.
        if !self.start_time.is_valid() {
            return Err(ConfigError::InvalidStartTime {
                value: self.start_time,
            });
        }
        // 2. Stop time, if set, must follow the start time.
        if let Some(stop) = self.stop_time {
            if stop <= self.start_time {
                return Err(ConfigError::InvalidStopTime {
                    start: self.start_time,
                    stop,
                });
            }
        }
        // 3. Explicit zero threads is a mistake, not "auto".
        if self.thread_count == Some(0) {
            return Err(ConfigError::ZeroThreads);
        }
        // 4. Counters and limits must be at least one.
        if self.min_batch == 0 {
            return Err(ConfigError::ZeroLimit { field: "min_batch" });
        }
        if self.iteration_limit == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "iteration_limit",
            });
        }
        if self.convergence_retry_limit == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "convergence_retry_limit",
            });
        }
        if self.minimum_timestep == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "minimum_timestep",
            });
        }
        // 5. A zero watchdog would fire on every object.
        if self.watchdog_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroLimit {
                field: "watchdog_timeout",
            });
        }
        Ok(())
    }
}

// ── ConfigError ────────────────────────────────────────────────

/// Errors detected during [`EngineConfig::validate()`] and engine setup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The start time is negative or past [`Timestamp::MAX`].
    InvalidStartTime {
        /// The configured start time.
        value: Timestamp,
    },
    /// The stop time does not follow the start time.
    InvalidStopTime {
        /// The configured start time.
        start: Timestamp,
        /// The configured stop time.
        stop: Timestamp,
    },
    /// `thread_count` was explicitly zero.
    ZeroThreads,
    /// A limit that must be at least one was zero.
    ZeroLimit {
        /// The offending field.
        field: &'static str,
    },
    /// A background thread could not be spawned.
    ThreadSpawnFailed {
        /// Description of the failure.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStartTime { value } => write!(f, "invalid start time {value}"),
            Self::InvalidStopTime { start, stop } => {
                write!(f, "stop time {stop} does not follow start time {start}")
            }
            Self::ZeroThreads => write!(f, "thread_count must be at least 1"),
            Self::ZeroLimit { field } => write!(f, "{field} must be at least 1"),
            Self::ThreadSpawnFailed { reason } => write!(f, "thread spawn failed: {reason}"),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_succeeds() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_stop_before_start_fails() {
        let cfg = EngineConfig {
            start_time: Timestamp(100),
            stop_time: Some(Timestamp(100)),
            ..EngineConfig::default()
        };
        match cfg.validate() {
            Err(ConfigError::InvalidStopTime { .. }) => {}
            other => panic!("expected InvalidStopTime, got {other:?}"),
        }
    }

    #[test]
    fn validate_negative_start_fails() {
        let cfg = EngineConfig {
            start_time: Timestamp(-5),
            ..EngineConfig::default()
        };
        match cfg.validate() {
            Err(ConfigError::InvalidStartTime { .. }) => {}
            other => panic!("expected InvalidStartTime, got {other:?}"),
        }
    }

    #[test]
    fn validate_zero_limits_fail() {
        let cfg = EngineConfig {
            iteration_limit: 0,
            ..EngineConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroLimit {
                field: "iteration_limit"
            })
        );
        let cfg = EngineConfig {
            watchdog_timeout: Some(Duration::ZERO),
            ..EngineConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroLimit {
                field: "watchdog_timeout"
            })
        );
    }

    #[test]
    fn validate_zero_threads_fails() {
        let cfg = EngineConfig {
            thread_count: Some(0),
            ..EngineConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroThreads));
    }

    #[test]
    fn resolved_thread_count_clamps() {
        let cfg = EngineConfig {
            thread_count: Some(500),
            ..EngineConfig::default()
        };
        assert_eq!(cfg.resolved_thread_count(), 64);
        let auto = EngineConfig::default().resolved_thread_count();
        assert!((1..=64).contains(&auto));
    }
}
