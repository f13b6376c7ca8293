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

//! Content hashing of kernel sources and compile flags.

use super::error::KernelError;
use photon_core::device::KernelFeatures;
use std::path::Path;
use walkdir::WalkDir;

/// Hashes every file under `dir`: relative path and contents, in sorted order.
///
/// Any edit, addition, removal or rename below `dir` changes the result.
pub fn source_hash(dir: &Path) -> Result<String, KernelError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(dir).to_path_buf();
            let source = err
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            KernelError::io(path, source)
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    let mut hasher = blake3::Hasher::new();
    for path in &files {
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = std::fs::read(path).map_err(|err| KernelError::io(path, err))?;
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Everything besides the sources that changes a compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileFlags {
    /// Target architecture, e.g. `sm_86` or `gfx1100`.
    pub arch: String,
    /// Feature mask, set only for adaptive builds.
    pub features: Option<KernelFeatures>,
    /// Debug level; 0 is optimized.
    pub debug_level: u32,
    /// Compiler name and version.
    pub compiler: String,
    /// User supplied extra flags.
    pub extra: Vec<String>,
}

impl CompileFlags {
    /// Canonical text form; whitespace differences in extra flags do not matter.
    pub fn normalized(&self) -> String {
        let mut out = format!("arch={} debug={} compiler={}", self.arch, self.debug_level, self.compiler);
        if let Some(features) = self.features {
            out.push_str(&format!(" features={:#x}", features.bits()));
        }
        let extra: Vec<&str> = self.extra.iter().flat_map(|f| f.split_whitespace()).collect();
        if !extra.is_empty() {
            out.push_str(" extra=");
            out.push_str(&extra.join(" "));
        }
        out
    }
}

/// Cache key of an artifact built from `source_hash` with `flags`.
pub fn cache_key(source_hash: &str, flags: &CompileFlags) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source_hash.as_bytes());
    hasher.update(b"\n");
    hasher.update(flags.normalized().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Splits an `*_EXTRA_CFLAGS` value into flags.
pub fn parse_extra_flags(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn hash_tracks_content_and_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("util")).unwrap();
        fs::write(dir.path().join("kernel.cu"), "a").unwrap();
        fs::write(dir.path().join("util/math.h"), "b").unwrap();

        let first = source_hash(dir.path()).unwrap();
        assert_eq!(first, source_hash(dir.path()).unwrap());

        fs::write(dir.path().join("util/math.h"), "c").unwrap();
        let edited = source_hash(dir.path()).unwrap();
        assert_ne!(first, edited);

        fs::rename(dir.path().join("util/math.h"), dir.path().join("util/vec.h")).unwrap();
        assert_ne!(edited, source_hash(dir.path()).unwrap());
    }

    #[test]
    fn missing_dir_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = source_hash(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, KernelError::Io { .. }));
    }

    #[test]
    fn key_ignores_extra_flag_spacing() {
        let a = CompileFlags {
            arch: "sm_86".into(),
            extra: vec!["-O3  -use_fast_math".into()],
            ..Default::default()
        };
        let b = CompileFlags {
            extra: vec!["-O3".into(), "-use_fast_math".into()],
            ..a.clone()
        };
        assert_eq!(cache_key("h", &a), cache_key("h", &b));
    }

    #[test]
    fn features_only_matter_when_present() {
        let plain = CompileFlags {
            arch: "sm_86".into(),
            ..Default::default()
        };
        let adaptive = CompileFlags {
            features: Some(KernelFeatures::PATH_TRACING),
            ..plain.clone()
        };
        assert_ne!(cache_key("h", &plain), cache_key("h", &adaptive));
        assert_ne!(cache_key("h", &plain), cache_key("other", &plain));
    }
}
