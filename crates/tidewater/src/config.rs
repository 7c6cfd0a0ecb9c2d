/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Configuration types for the master server.
//!
//! Every setting has a default; a TOML file and CLI flags override them in
//! that order.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::load::LoadProtection;

/// Configuration for one master.
///
/// # Construction
///
/// ```rust,ignore
/// let config = MasterConfig::builder()
///     .master_address("10.0.0.1:5678")
///     .fetch_size(50)
///     .build()?;
/// ```
///
/// Or from a TOML file where every field is optional:
///
/// ```toml
/// master_address = "10.0.0.1:5678"
/// fetch_size = 50
/// fetch_interval_ms = 500
///
/// [load_protection]
/// max_cpu_usage = 0.8
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct MasterConfig {
    master_address: String,
    fetch_size: usize,
    id_step: i64,
    fetch_interval: Duration,
    fetch_error_backoff: Duration,
    max_concurrent_bootstraps: usize,
    max_live_workflows: usize,
    dispatch_retry_interval: Duration,
    failover_lock_path: String,
    enable_global_failover: bool,
    load_protection: LoadProtection,
}

impl MasterConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> MasterConfigBuilder {
        MasterConfigBuilder::default()
    }

    /// Reopens the configuration for overrides, e.g. from command-line flags.
    pub fn into_builder(self) -> MasterConfigBuilder {
        MasterConfigBuilder { config: self }
    }

    /// Parses a TOML document, applying defaults for missing fields.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: MasterConfigFile = toml::from_str(source)?;
        file.apply(Self::builder()).build()
    }

    /// Address other cluster members know this master by. Recorded as the
    /// host of every workflow instance it owns.
    pub fn master_address(&self) -> &str {
        &self.master_address
    }

    /// Maximum commands fetched per cycle.
    pub fn fetch_size(&self) -> usize {
        self.fetch_size
    }

    /// Divisor applied to command ids before slotting.
    pub fn id_step(&self) -> i64 {
        self.id_step
    }

    /// Pause between cycles when the shard was empty or the master overloaded.
    pub fn fetch_interval(&self) -> Duration {
        self.fetch_interval
    }

    /// Pause after a failed fetch.
    pub fn fetch_error_backoff(&self) -> Duration {
        self.fetch_error_backoff
    }

    /// Commands of one batch handled concurrently.
    pub fn max_concurrent_bootstraps(&self) -> usize {
        self.max_concurrent_bootstraps
    }

    /// Live workflows at which the pool counts as saturated.
    pub fn max_live_workflows(&self) -> usize {
        self.max_live_workflows
    }

    /// Delay before re-dispatching a task after a dispatch error.
    pub fn dispatch_retry_interval(&self) -> Duration {
        self.dispatch_retry_interval
    }

    pub fn failover_lock_path(&self) -> &str {
        &self.failover_lock_path
    }

    /// Whether the master runs global master failover at startup.
    pub fn enable_global_failover(&self) -> bool {
        self.enable_global_failover
    }

    pub fn load_protection(&self) -> &LoadProtection {
        &self.load_protection
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfigBuilder::default().config
    }
}

/// Builder for [`MasterConfig`].
#[derive(Debug, Clone)]
pub struct MasterConfigBuilder {
    config: MasterConfig,
}

impl Default for MasterConfigBuilder {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            config: MasterConfig {
                master_address: "127.0.0.1:5678".to_string(),
                fetch_size: 10,
                id_step: 1,
                fetch_interval: Duration::from_secs(1),
                fetch_error_backoff: Duration::from_secs(5),
                max_concurrent_bootstraps: parallelism,
                max_live_workflows: 10_000,
                dispatch_retry_interval: Duration::from_secs(1),
                failover_lock_path: "/lock/failover/master".to_string(),
                enable_global_failover: true,
                load_protection: LoadProtection::default(),
            },
        }
    }
}

impl MasterConfigBuilder {
    pub fn master_address(mut self, value: impl Into<String>) -> Self {
        self.config.master_address = value.into();
        self
    }

    pub fn fetch_size(mut self, value: usize) -> Self {
        self.config.fetch_size = value;
        self
    }

    pub fn id_step(mut self, value: i64) -> Self {
        self.config.id_step = value;
        self
    }

    pub fn fetch_interval(mut self, value: Duration) -> Self {
        self.config.fetch_interval = value;
        self
    }

    pub fn fetch_error_backoff(mut self, value: Duration) -> Self {
        self.config.fetch_error_backoff = value;
        self
    }

    pub fn max_concurrent_bootstraps(mut self, value: usize) -> Self {
        self.config.max_concurrent_bootstraps = value;
        self
    }

    pub fn max_live_workflows(mut self, value: usize) -> Self {
        self.config.max_live_workflows = value;
        self
    }

    pub fn dispatch_retry_interval(mut self, value: Duration) -> Self {
        self.config.dispatch_retry_interval = value;
        self
    }

    pub fn failover_lock_path(mut self, value: impl Into<String>) -> Self {
        self.config.failover_lock_path = value.into();
        self
    }

    pub fn enable_global_failover(mut self, value: bool) -> Self {
        self.config.enable_global_failover = value;
        self
    }

    pub fn load_protection(mut self, value: LoadProtection) -> Self {
        self.config.load_protection = value;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<MasterConfig, ConfigError> {
        let config = self.config;
        if config.master_address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "master_address must not be empty".to_string(),
            ));
        }
        if config.fetch_size == 0 {
            return Err(ConfigError::Invalid(
                "fetch_size must be at least 1".to_string(),
            ));
        }
        if config.id_step < 1 {
            return Err(ConfigError::Invalid("id_step must be at least 1".to_string()));
        }
        if config.max_concurrent_bootstraps == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_bootstraps must be at least 1".to_string(),
            ));
        }
        if config.max_live_workflows == 0 {
            return Err(ConfigError::Invalid(
                "max_live_workflows must be at least 1".to_string(),
            ));
        }
        let protection = &config.load_protection;
        for (name, value) in [
            ("max_cpu_usage", protection.max_cpu_usage),
            ("max_memory_usage", protection.max_memory_usage),
            ("max_pool_saturation", protection.max_pool_saturation),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "load_protection.{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(config)
    }
}

/// On-disk shape of the configuration. Durations are milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MasterConfigFile {
    master_address: Option<String>,
    fetch_size: Option<usize>,
    id_step: Option<i64>,
    fetch_interval_ms: Option<u64>,
    fetch_error_backoff_ms: Option<u64>,
    max_concurrent_bootstraps: Option<usize>,
    max_live_workflows: Option<usize>,
    dispatch_retry_interval_ms: Option<u64>,
    failover_lock_path: Option<String>,
    enable_global_failover: Option<bool>,
    load_protection: Option<LoadProtection>,
}

impl MasterConfigFile {
    fn apply(self, mut builder: MasterConfigBuilder) -> MasterConfigBuilder {
        if let Some(value) = self.master_address {
            builder = builder.master_address(value);
        }
        if let Some(value) = self.fetch_size {
            builder = builder.fetch_size(value);
        }
        if let Some(value) = self.id_step {
            builder = builder.id_step(value);
        }
        if let Some(value) = self.fetch_interval_ms {
            builder = builder.fetch_interval(Duration::from_millis(value));
        }
        if let Some(value) = self.fetch_error_backoff_ms {
            builder = builder.fetch_error_backoff(Duration::from_millis(value));
        }
        if let Some(value) = self.max_concurrent_bootstraps {
            builder = builder.max_concurrent_bootstraps(value);
        }
        if let Some(value) = self.max_live_workflows {
            builder = builder.max_live_workflows(value);
        }
        if let Some(value) = self.dispatch_retry_interval_ms {
            builder = builder.dispatch_retry_interval(Duration::from_millis(value));
        }
        if let Some(value) = self.failover_lock_path {
            builder = builder.failover_lock_path(value);
        }
        if let Some(value) = self.enable_global_failover {
            builder = builder.enable_global_failover(value);
        }
        if let Some(value) = self.load_protection {
            builder = builder.load_protection(value);
        }
        builder
    }
}
