//! Runtime-configurable parameters for the communication engine.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `HIERCOMM_`) or by constructing a custom `CommConfig`.

use std::time::Duration;

/// Engine layout and allreduce tuning parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommConfig {
    /// Number of processes in each model group. 0 means one model spanning
    /// the whole world.
    pub procs_per_model: usize,

    /// Power-of-2 inter-model allreduces on matrices whose height and width
    /// are both at most this use recursive doubling; everything else uses
    /// pairwise-exchange/ring.
    pub recursive_doubling_max_dim: usize,

    /// Exchange raw matrix bytes (skipping the transform) with partners on
    /// the same physical node.
    pub no_local_transform: bool,

    /// Optional bound on a single send or receive inside a collective.
    /// `None` blocks until the peer participates.
    pub collective_timeout: Option<Duration>,

    /// Override for the processor name used in node discovery.
    pub hostname: Option<String>,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            procs_per_model: 0,
            recursive_doubling_max_dim: 64,
            no_local_transform: true,
            collective_timeout: None,
            hostname: None,
        }
    }
}

impl CommConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `HIERCOMM_PROCS_PER_MODEL`
    /// - `HIERCOMM_RD_MAX_DIM`
    /// - `HIERCOMM_NO_LOCAL_TRANSFORM` (`0`/`1`/`true`/`false`)
    /// - `HIERCOMM_COLLECTIVE_TIMEOUT_SECS`
    /// - `HIERCOMM_HOSTNAME`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(n) = lookup("HIERCOMM_PROCS_PER_MODEL").and_then(|v| v.parse().ok()) {
            cfg.procs_per_model = n;
        }
        if let Some(n) = lookup("HIERCOMM_RD_MAX_DIM").and_then(|v| v.parse().ok()) {
            cfg.recursive_doubling_max_dim = n;
        }
        if let Some(v) = lookup("HIERCOMM_NO_LOCAL_TRANSFORM") {
            match v.trim() {
                "1" | "true" => cfg.no_local_transform = true,
                "0" | "false" => cfg.no_local_transform = false,
                _ => {}
            }
        }
        if let Some(s) = lookup("HIERCOMM_COLLECTIVE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            cfg.collective_timeout = Some(Duration::from_secs(s));
        }
        if let Some(h) = lookup("HIERCOMM_HOSTNAME") {
            if !h.is_empty() {
                cfg.hostname = Some(h);
            }
        }

        cfg
    }

    /// Builder-style setter for `procs_per_model`.
    pub fn with_procs_per_model(mut self, procs_per_model: usize) -> Self {
        self.procs_per_model = procs_per_model;
        self
    }
}
