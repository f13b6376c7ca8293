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

use super::compiler::CompilerError;
use photon_core::device::DeviceError;
use std::fmt;
use std::path::PathBuf;

/// Failures while resolving, compiling or caching kernel artifacts.
#[derive(Debug)]
pub enum KernelError {
    /// The compiler executable could not be located.
    CompilerNotFound(String),
    /// Compilation of a variant failed.
    Compile {
        /// Variant being compiled.
        variant: String,
        /// Compiler output.
        diagnostics: String,
    },
    /// The compiler reported success but wrote nothing.
    MissingOutput(PathBuf),
    /// Filesystem access failed.
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The cache index could not be encoded.
    Index(serde_json::Error),
}

impl KernelError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KernelError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn from_compiler(variant: &str, err: CompilerError) -> Self {
        match err {
            CompilerError::NotFound(name) => KernelError::CompilerNotFound(name),
            other => KernelError::Compile {
                variant: variant.to_string(),
                diagnostics: other.to_string(),
            },
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::CompilerNotFound(name) => write!(f, "compiler not found: {name}"),
            KernelError::Compile {
                variant,
                diagnostics,
            } => write!(f, "Failed to compile kernel variant '{variant}':\n{diagnostics}"),
            KernelError::MissingOutput(path) => write!(
                f,
                "Kernel compiler reported success but produced no output at '{}'",
                path.display()
            ),
            KernelError::Io { path, source } => {
                write!(f, "Kernel cache I/O error on '{}': {source}", path.display())
            }
            KernelError::Index(err) => write!(f, "Kernel cache index error: {err}"),
        }
    }
}

impl std::error::Error for KernelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KernelError::Io { source, .. } => Some(source),
            KernelError::Index(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(err: serde_json::Error) -> Self {
        KernelError::Index(err)
    }
}

impl From<KernelError> for DeviceError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Compile {
                variant,
                diagnostics,
            } => DeviceError::Compile {
                kernel: variant,
                diagnostics,
            },
            other => DeviceError::Setup(other.to_string()),
        }
    }
}
