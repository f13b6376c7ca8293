// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration read by devices at kernel-load and build time.
//!
//! Values come from the configuration collaborator; the device layer never
//! mutates them.

use super::info::DeviceTypeMask;
use super::kernel::KernelFeatures;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Device-layer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Backends that enumeration may return.
    pub device_mask: DeviceTypeMask,
    /// Features the scene needs.
    pub kernel_features: KernelFeatures,
    /// Compile kernels specialized to `kernel_features`.
    pub adaptive_compile: bool,
    /// Prefer hardware ray tracing when the device offers it.
    pub use_hardware_raytracing: bool,
    /// Root of the on-disk kernel cache.
    pub kernel_cache_dir: PathBuf,
    /// Directory of precompiled kernels shipped with the distribution.
    pub precompiled_dir: Option<PathBuf>,
    /// Cached artifacts kept per kernel variant.
    pub cache_retention: usize,
    /// Build kernels with debug information.
    pub debug_kernels: bool,
    /// Worker threads for CPU devices, 0 for one per logical core.
    pub cpu_threads: usize,
    /// Bytes every device allocation leaves free.
    pub working_headroom: u64,
    /// Bytes image allocations leave free.
    pub texture_headroom: u64,
    /// Memory budget for backends that cannot report free memory.
    pub memory_budget: Option<u64>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_mask: DeviceTypeMask::all(),
            kernel_features: KernelFeatures::all(),
            adaptive_compile: false,
            use_hardware_raytracing: true,
            kernel_cache_dir: default_cache_dir(),
            precompiled_dir: None,
            cache_retention: 5,
            debug_kernels: false,
            cpu_threads: 0,
            working_headroom: 32 * 1024 * 1024,
            texture_headroom: 128 * 1024 * 1024,
            memory_budget: None,
        }
    }
}

/// Failure to read a configuration file.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The JSON is malformed.
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read device config '{}': {source}", path.display())
            }
            ConfigError::Parse(err) => write!(f, "Invalid device config: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(err) => Some(err),
        }
    }
}

impl DeviceConfig {
    /// Parses JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::Parse)
    }

    /// Reads and parses a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Applies `PHOTON_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps variable names to values.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("PHOTON_ADAPTIVE_COMPILE") {
            self.adaptive_compile = parse_flag(&v);
        }
        if let Some(v) = lookup("PHOTON_HW_RAYTRACING") {
            self.use_hardware_raytracing = parse_flag(&v);
        }
        if let Some(v) = lookup("PHOTON_KERNEL_CACHE") {
            self.kernel_cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PHOTON_CPU_THREADS") {
            match v.trim().parse() {
                Ok(n) => self.cpu_threads = n,
                Err(_) => log::warn!("Ignoring invalid PHOTON_CPU_THREADS value '{v}'"),
            }
        }
        self
    }

    /// Directory holding cached kernel binaries.
    pub fn kernel_dir(&self) -> PathBuf {
        self.kernel_cache_dir.join("kernels")
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

fn default_cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_CACHE_HOME") {
        return PathBuf::from(dir).join("photon");
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home).join(".cache").join("photon");
    }
    std::env::temp_dir().join("photon")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = DeviceConfig::from_json_str(r#"{ "adaptive_compile": true, "cache_retention": 2 }"#)
            .unwrap();
        assert!(config.adaptive_compile);
        assert_eq!(config.cache_retention, 2);
        assert_eq!(config.working_headroom, 32 * 1024 * 1024);
        assert_eq!(config.device_mask, DeviceTypeMask::all());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = DeviceConfig::from_json_str("{ nope").unwrap_err();
        assert!(err.to_string().starts_with("Invalid device config"));
    }

    #[test]
    fn overrides_apply() {
        let config = DeviceConfig::default().with_overrides(|key| match key {
            "PHOTON_ADAPTIVE_COMPILE" => Some("1".into()),
            "PHOTON_HW_RAYTRACING" => Some("off".into()),
            "PHOTON_CPU_THREADS" => Some("3".into()),
            "PHOTON_KERNEL_CACHE" => Some("/tmp/cache".into()),
            _ => None,
        });
        assert!(config.adaptive_compile);
        assert!(!config.use_hardware_raytracing);
        assert_eq!(config.cpu_threads, 3);
        assert_eq!(config.kernel_dir(), PathBuf::from("/tmp/cache/kernels"));
    }
}
