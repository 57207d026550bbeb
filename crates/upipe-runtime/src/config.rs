//! Tunables for the pump managers.
//!
//! Grounded on `lamco-pipewire`'s `PipeWireConfig`/`PipeWireConfigBuilder`
//! pattern: a plain struct with a `Default` impl, a builder that only
//! overrides what it is told, and a `validate` that collects every problem
//! instead of stopping at the first.

use std::time::Duration;

/// Tunables for [`crate::ManualPumpManager`] and [`crate::MioPumpManager`].
#[derive(Clone, Debug)]
pub struct PumpManagerConfig {
    /// How long [`crate::ManualPumpManager::run`] sleeps between polls when
    /// no timer deadline is closer (default: 5ms). Ignored by
    /// [`crate::MioPumpManager`], which blocks in the OS poll call instead.
    pub idle_poll_interval: Duration,
    /// Upper bound on a single sleep, so a timer armed after the manager
    /// has gone to sleep still fires reasonably promptly (default: 20ms).
    pub max_idle_sleep: Duration,
    /// Capacity of the `mio::Events` buffer a [`crate::MioPumpManager`]
    /// polls into per iteration (default: 128).
    pub event_capacity: usize,
}

impl Default for PumpManagerConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval: Duration::from_millis(5),
            max_idle_sleep: Duration::from_millis(20),
            event_capacity: 128,
        }
    }
}

impl PumpManagerConfig {
    #[must_use]
    pub fn builder() -> PumpManagerConfigBuilder {
        PumpManagerConfigBuilder::default()
    }

    /// Validate configuration and return any issues.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();
        if self.idle_poll_interval > self.max_idle_sleep {
            issues.push("idle_poll_interval must not exceed max_idle_sleep".to_string());
        }
        if self.event_capacity == 0 {
            issues.push("event_capacity must be at least 1".to_string());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

/// Builder for [`PumpManagerConfig`].
#[derive(Clone, Debug, Default)]
pub struct PumpManagerConfigBuilder {
    idle_poll_interval: Option<Duration>,
    max_idle_sleep: Option<Duration>,
    event_capacity: Option<usize>,
}

impl PumpManagerConfigBuilder {
    #[must_use]
    pub fn idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn max_idle_sleep(mut self, max: Duration) -> Self {
        self.max_idle_sleep = Some(max);
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn build(self) -> PumpManagerConfig {
        let defaults = PumpManagerConfig::default();
        PumpManagerConfig {
            idle_poll_interval: self.idle_poll_interval.unwrap_or(defaults.idle_poll_interval),
            max_idle_sleep: self.max_idle_sleep.unwrap_or(defaults.max_idle_sleep),
            event_capacity: self.event_capacity.unwrap_or(defaults.event_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(PumpManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_overrides_only_what_it_sets() {
        let config = PumpManagerConfig::builder().event_capacity(64).build();
        assert_eq!(config.event_capacity, 64);
        assert_eq!(config.idle_poll_interval, Duration::from_millis(5));
    }

    #[test]
    fn poll_interval_exceeding_max_sleep_is_rejected() {
        let config = PumpManagerConfig::builder()
            .idle_poll_interval(Duration::from_millis(50))
            .max_idle_sleep(Duration::from_millis(20))
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_event_capacity_is_rejected() {
        let config = PumpManagerConfig::builder().event_capacity(0).build();
        assert!(config.validate().is_err());
    }
}
