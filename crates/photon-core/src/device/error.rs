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

//! Defines the error types reported by devices, queues and builders.

use super::memory::MemoryType;
use std::fmt;

/// A failure of an acceleration-structure build.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    /// More instances than the backend can address in one top-level structure.
    TooManyInstances {
        /// Number of traceable instances requested.
        requested: usize,
        /// Backend limit.
        limit: usize,
    },
    /// A refit was requested on a structure that was not built with the update flag.
    RefitNotAllowed {
        /// Debug label of the structure.
        label: String,
    },
    /// A refit was requested on a structure that has never been built.
    RefitBeforeBuild,
    /// A top-level instance references a bottom structure that is not built.
    BottomNotBuilt {
        /// Index of the offending instance.
        instance: usize,
    },
    /// The handle does not name a live structure.
    InvalidHandle,
    /// The handle names a structure of the other level.
    WrongLevel,
    /// Refit input does not match the topology of the existing structure.
    TopologyChanged,
    /// The geometry has no primitives.
    EmptyGeometry,
    /// The backend build API reported an error.
    Backend(String),
    /// The build was cancelled through the progress collaborator.
    Cancelled,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::TooManyInstances { requested, limit } => write!(
                f,
                "Scene has {requested} instances but the ray tracing backend supports at most {limit}"
            ),
            BuildError::RefitNotAllowed { label } => write!(
                f,
                "Refit requested for '{label}' which was built without update support"
            ),
            BuildError::RefitBeforeBuild => {
                write!(f, "Refit requested for an acceleration structure that was never built")
            }
            BuildError::BottomNotBuilt { instance } => write!(
                f,
                "Instance {instance} references a bottom-level structure that is not built"
            ),
            BuildError::InvalidHandle => write!(f, "Invalid acceleration structure handle"),
            BuildError::WrongLevel => {
                write!(f, "Acceleration structure handle refers to the wrong level")
            }
            BuildError::TopologyChanged => {
                write!(f, "Refit input does not match the built topology")
            }
            BuildError::EmptyGeometry => write!(f, "Geometry has no primitives to build"),
            BuildError::Backend(msg) => write!(f, "Acceleration structure build failed: {msg}"),
            BuildError::Cancelled => write!(f, "Acceleration structure build cancelled"),
        }
    }
}

impl std::error::Error for BuildError {}

/// The error type of every fallible device, queue and builder operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Device or context creation failed.
    Setup(String),
    /// Kernel compilation failed.
    Compile {
        /// Kernel variant that failed.
        kernel: String,
        /// Compiler diagnostic output.
        diagnostics: String,
    },
    /// Device memory (and host-mapped fallback memory) is exhausted.
    OutOfMemory {
        /// Bytes requested.
        requested: u64,
        /// Bytes free on the device at the time of the request.
        free: u64,
        /// Total bytes on the device.
        total: u64,
    },
    /// A launch or synchronization failed at the backend level.
    Dispatch(String),
    /// The device already holds a sticky error; no backend call was made.
    DeviceFaulted(String),
    /// An acceleration-structure build failed.
    Build(BuildError),
    /// The operation does not accept memory of this type.
    InvalidMemoryType {
        /// Operation name.
        operation: &'static str,
        /// Offending memory type.
        mem_type: MemoryType,
    },
    /// A constant-parameter write does not match the declared field width.
    ParamSizeMismatch {
        /// Field name.
        name: String,
        /// Declared size in bytes.
        expected: usize,
        /// Size of the payload.
        actual: usize,
    },
    /// A named global or parameter field does not exist.
    UnknownParam(String),
    /// Kernels must be loaded before this operation.
    KernelsNotLoaded,
    /// An adaptive kernel module is loaded and cannot be swapped.
    KernelReloadUnsupported,
    /// The device does not support the requested operation.
    Unsupported(String),
    /// A device pointer that this device does not know about.
    InvalidPointer(u64),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Setup(msg) => write!(f, "Device setup failed: {msg}"),
            DeviceError::Compile {
                kernel,
                diagnostics,
            } => write!(f, "Failed to compile kernel '{kernel}': {diagnostics}"),
            DeviceError::OutOfMemory {
                requested,
                free,
                total,
            } => write!(
                f,
                "System is out of GPU and shared host memory (requested {}, free {}, total {})",
                format_bytes(*requested),
                format_bytes(*free),
                format_bytes(*total)
            ),
            DeviceError::Dispatch(msg) => write!(f, "Kernel dispatch failed: {msg}"),
            DeviceError::DeviceFaulted(msg) => {
                write!(f, "Device is in an error state: {msg}")
            }
            DeviceError::Build(err) => write!(f, "{err}"),
            DeviceError::InvalidMemoryType {
                operation,
                mem_type,
            } => write!(f, "'{operation}' cannot be used with {mem_type:?} memory"),
            DeviceError::ParamSizeMismatch {
                name,
                expected,
                actual,
            } => write!(
                f,
                "Kernel parameter '{name}' is {expected} bytes but {actual} bytes were written"
            ),
            DeviceError::UnknownParam(name) => {
                write!(f, "Kernel parameter or global '{name}' does not exist")
            }
            DeviceError::KernelsNotLoaded => write!(f, "Kernels are not loaded"),
            DeviceError::KernelReloadUnsupported => write!(
                f,
                "Skipping kernel reload for adaptive compile, not currently supported"
            ),
            DeviceError::Unsupported(msg) => write!(f, "Unsupported operation: {msg}"),
            DeviceError::InvalidPointer(ptr) => write!(f, "Unknown device pointer {ptr:#x}"),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeviceError::Build(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BuildError> for DeviceError {
    fn from(err: BuildError) -> Self {
        DeviceError::Build(err)
    }
}

/// Formats a byte count the way the diagnostics print memory figures.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
