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

//! Kernel compilation and caching.
//!
//! A [`KernelResolver`] turns a [`KernelVariant`] and a feature mask into a
//! [`KernelArtifact`] on disk: precompiled artifacts first (non-adaptive builds
//! only), then the content-keyed cache, then the compiler.

pub mod cache;
pub mod compiler;
pub mod error;
pub mod hash;

pub use cache::KernelCache;
pub use compiler::{CommandCompiler, CompileRequest, CompilerError, KernelCompiler, WgslAssembler};
pub use error::KernelError;
pub use hash::{cache_key, source_hash, CompileFlags};

use photon_core::device::kernel::LoadState;
use photon_core::device::{DeviceType, KernelFeatures, KernelVariant, NullProfiler, ProfileEvent, Profiler};
use photon_core::Stopwatch;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A compiled module on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelArtifact {
    /// Content key; `"precompiled"` for shipped artifacts.
    pub cache_key: String,
    /// Backend it targets.
    pub backend: DeviceType,
    /// Variant name.
    pub variant: String,
    /// Artifact file.
    pub path: PathBuf,
    /// Lifecycle.
    pub load_state: LoadState,
    /// Features compiled in.
    pub features: KernelFeatures,
    /// Specialized to `features`.
    pub adaptive: bool,
}

impl KernelArtifact {
    /// `true` if this artifact can serve `requested` without a rebuild.
    pub fn covers(&self, requested: KernelFeatures) -> bool {
        !self.adaptive || self.features.contains(requested)
    }

    /// Reads the artifact bytes.
    pub fn read(&self) -> Result<Vec<u8>, KernelError> {
        std::fs::read(&self.path).map_err(|err| KernelError::io(&self.path, err))
    }
}

/// Resolution settings, usually taken from `DeviceConfig`.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Directory holding the cache.
    pub cache_dir: PathBuf,
    /// Shipped artifacts `{variant}_{arch}.{ext}`.
    pub precompiled_dir: Option<PathBuf>,
    /// Specialize builds to the requested features.
    pub adaptive: bool,
    /// Debug builds.
    pub debug: bool,
    /// Artifacts kept per variant.
    pub retention: usize,
    /// Extra compiler flags.
    pub extra_flags: Vec<String>,
}

impl ResolverOptions {
    /// Options from a device configuration, with extra flags from
    /// `PHOTON_<BACKEND>_EXTRA_CFLAGS`.
    pub fn from_config(config: &photon_core::device::DeviceConfig, backend: DeviceType) -> Self {
        let var = format!("PHOTON_{}_EXTRA_CFLAGS", backend.family().name());
        let extra_flags = std::env::var(&var)
            .map(|v| hash::parse_extra_flags(&v))
            .unwrap_or_default();
        if !extra_flags.is_empty() {
            log::info!("KernelResolver: using extra flags from {var}: {}", extra_flags.join(" "));
        }
        Self {
            cache_dir: config.kernel_dir(),
            precompiled_dir: config.precompiled_dir.clone(),
            adaptive: config.adaptive_compile,
            debug: config.debug_kernels,
            retention: config.cache_retention,
            extra_flags,
        }
    }
}

/// Finds or builds kernel artifacts for one backend.
#[derive(Debug)]
pub struct KernelResolver {
    backend: DeviceType,
    compiler: Arc<dyn KernelCompiler>,
    cache: KernelCache,
    options: ResolverOptions,
    source_hash: Mutex<Option<(PathBuf, String)>>,
    profiler: Arc<dyn Profiler>,
}

impl KernelResolver {
    /// Opens the cache and prepares a resolver.
    pub fn new(
        backend: DeviceType,
        compiler: Arc<dyn KernelCompiler>,
        options: ResolverOptions,
    ) -> Result<Self, KernelError> {
        let cache = KernelCache::open(&options.cache_dir, options.retention)?;
        Ok(Self {
            backend,
            compiler,
            cache,
            options,
            source_hash: Mutex::new(None),
            profiler: Arc::new(NullProfiler),
        })
    }

    /// Reports compile times to `profiler`.
    pub fn with_profiler(mut self, profiler: Arc<dyn Profiler>) -> Self {
        self.profiler = profiler;
        self
    }

    /// The compiler in use.
    pub fn compiler(&self) -> &Arc<dyn KernelCompiler> {
        &self.compiler
    }

    /// The cache in use.
    pub fn cache(&self) -> &KernelCache {
        &self.cache
    }

    /// `true` for adaptive resolution.
    pub fn is_adaptive(&self) -> bool {
        self.options.adaptive
    }

    /// Resolves `variant` for `arch` and `features`.
    #[tracing::instrument(skip_all, fields(variant = %variant.name, arch = arch))]
    pub fn resolve(
        &self,
        source_dir: &Path,
        variant: &KernelVariant,
        arch: &str,
        features: KernelFeatures,
    ) -> Result<KernelArtifact, KernelError> {
        let adaptive = self.options.adaptive;
        let covered = if adaptive { features } else { KernelFeatures::all() };
        let ext = self.compiler.artifact_extension().to_string();
        let artifact = |cache_key: String, path: PathBuf| KernelArtifact {
            cache_key,
            backend: self.backend,
            variant: variant.name.clone(),
            path,
            load_state: LoadState::Unloaded,
            features: covered,
            adaptive,
        };

        if !adaptive {
            if let Some(dir) = &self.options.precompiled_dir {
                let path = dir.join(format!("{}_{arch}.{ext}", variant.name));
                if path.is_file() {
                    log::info!("KernelResolver: using precompiled '{}'", path.display());
                    return Ok(artifact("precompiled".into(), path));
                }
            }
        }

        let flags = CompileFlags {
            arch: arch.to_string(),
            features: adaptive.then_some(features),
            debug_level: u32::from(self.options.debug),
            compiler: self.compiler.identity(),
            extra: self.options.extra_flags.clone(),
        };
        let key = cache_key(&self.source_hash(source_dir)?, &flags);

        if let Some(path) = self.cache.lookup(&variant.name, arch, &key, &ext)? {
            return Ok(artifact(key, path));
        }

        let output = self.cache.path_for(&variant.name, arch, &key, &ext);
        let request = CompileRequest {
            variant,
            source_dir,
            output: &output,
            arch,
            features,
            adaptive,
            debug: self.options.debug,
            extra_flags: &self.options.extra_flags,
        };
        let timer = Stopwatch::new();
        self.compiler
            .compile(&request)
            .map_err(|err| KernelError::from_compiler(&variant.name, err))?;
        if !output.is_file() {
            return Err(KernelError::MissingOutput(output));
        }
        let elapsed = timer.elapsed().unwrap_or_default();
        log::info!(
            "KernelResolver: compiled '{}' for {arch} in {:.2}s",
            variant.name,
            elapsed.as_secs_f64()
        );
        self.profiler.record(ProfileEvent::KernelCompile {
            variant: variant.name.clone(),
            elapsed,
        });
        self.cache.insert(&variant.name, arch, &key, &ext)?;
        Ok(artifact(key, output))
    }

    fn source_hash(&self, dir: &Path) -> Result<String, KernelError> {
        let mut memo = self
            .source_hash
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((cached_dir, hash)) = memo.as_ref() {
            if cached_dir == dir {
                return Ok(hash.clone());
            }
        }
        let hash = source_hash(dir)?;
        *memo = Some((dir.to_path_buf(), hash.clone()));
        Ok(hash)
    }
}
