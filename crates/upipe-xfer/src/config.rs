//! Configuration for cross-thread queues.
//!
//! Grounded on `lamco-pipewire`'s `PipeWireConfig`/`PipeWireConfigBuilder`
//! pattern: a plain struct with a `Default` impl, a builder that only
//! overrides what it is told, and a `validate` that collects every problem
//! instead of stopping at the first.

/// How a worker queue behaves once it is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueFullPolicy {
    /// `send` returns [`crate::XferError::Busy`] immediately (default).
    RejectImmediately,
    /// `send` blocks the caller until space frees up.
    Block,
}

/// Tunables for a worker-source/worker-sink/worker-linear channel.
///
/// Spec open question (§9): "the xfer queue size and blocking policy when
/// full are configurable per manager... there is no enforcement." This
/// config is the chosen resolution - see DESIGN.md.
#[derive(Clone, Debug)]
pub struct XferQueueConfig {
    /// Maximum urefs buffered in flight. `None` means unbounded (default).
    pub capacity: Option<usize>,
    /// Behaviour once `capacity` is reached. Ignored when `capacity` is
    /// `None`.
    pub full_policy: QueueFullPolicy,
}

impl Default for XferQueueConfig {
    fn default() -> Self {
        Self { capacity: None, full_policy: QueueFullPolicy::RejectImmediately }
    }
}

impl XferQueueConfig {
    #[must_use]
    pub fn builder() -> XferQueueConfigBuilder {
        XferQueueConfigBuilder::default()
    }

    /// Validate configuration and return any issues.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();
        if self.capacity == Some(0) {
            issues.push("capacity of 0 can never accept a uref; use None for unbounded".to_string());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

/// Builder for [`XferQueueConfig`].
#[derive(Clone, Debug, Default)]
pub struct XferQueueConfigBuilder {
    capacity: Option<usize>,
    full_policy: Option<QueueFullPolicy>,
}

impl XferQueueConfigBuilder {
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn full_policy(mut self, policy: QueueFullPolicy) -> Self {
        self.full_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn build(self) -> XferQueueConfig {
        let defaults = XferQueueConfig::default();
        XferQueueConfig {
            capacity: self.capacity.or(defaults.capacity),
            full_policy: self.full_policy.unwrap_or(defaults.full_policy),
        }
    }
}
