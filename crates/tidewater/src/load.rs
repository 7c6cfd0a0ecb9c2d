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

//! Host load sampling and the overload guard of the command engine.

use parking_lot::Mutex;
use serde::Deserialize;
use sysinfo::System;

/// A load sample. Every figure is a fraction in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemLoad {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    /// Live workflows relative to the master's capacity
    pub pool_saturation: f64,
}

pub trait SystemLoadMonitor: Send + Sync {
    fn current_load(&self) -> SystemLoad;
}

/// Samples CPU and memory usage of the host through `sysinfo`.
pub struct SysinfoLoadMonitor {
    system: Mutex<System>,
}

impl Default for SysinfoLoadMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoLoadMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one.
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl SystemLoadMonitor for SysinfoLoadMonitor {
    fn current_load(&self) -> SystemLoad {
        let mut system = self.system.lock();
        system.refresh_cpu();
        system.refresh_memory();

        let cpu_usage = f64::from(system.global_cpu_info().cpu_usage()) / 100.0;
        let total = system.total_memory();
        let memory_usage = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64
        };

        SystemLoad {
            cpu_usage,
            memory_usage,
            pool_saturation: 0.0,
        }
    }
}

/// Thresholds above which the master stops taking new commands.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoadProtection {
    pub enabled: bool,
    pub max_cpu_usage: f64,
    pub max_memory_usage: f64,
    pub max_pool_saturation: f64,
}

impl Default for LoadProtection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cpu_usage: 0.9,
            max_memory_usage: 0.9,
            max_pool_saturation: 1.0,
        }
    }
}

impl LoadProtection {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn is_overloaded(&self, load: &SystemLoad) -> bool {
        self.enabled
            && (load.cpu_usage > self.max_cpu_usage
                || load.memory_usage > self.max_memory_usage
                || load.pool_saturation >= self.max_pool_saturation)
    }
}
