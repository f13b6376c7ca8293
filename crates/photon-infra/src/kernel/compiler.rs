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

//! The compiler seam: turns a kernel variant's sources into a loadable artifact.

use photon_core::device::{KernelFeatures, KernelVariant};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Compiler failures.
#[derive(Debug, thiserror::Error)]
pub enum CompilerError {
    /// The executable is not installed or not on `PATH`.
    #[error("compiler not found: {0}")]
    NotFound(String),
    /// The compiler ran and failed.
    #[error("{compiler} exited with status {status}:\n{diagnostics}")]
    Failed {
        /// Compiler name.
        compiler: String,
        /// Exit status, -1 when killed by a signal.
        status: i32,
        /// Captured standard error.
        diagnostics: String,
    },
    /// The variant's source could not be read.
    #[error("failed to read kernel source '{path}': {source}")]
    Source {
        /// Source file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Spawning or writing failed.
    #[error("failed to run {compiler}: {source}")]
    Io {
        /// Compiler name.
        compiler: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// One compilation job.
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    /// Variant to build.
    pub variant: &'a KernelVariant,
    /// Root of the kernel source tree.
    pub source_dir: &'a Path,
    /// Where the artifact must be written.
    pub output: &'a Path,
    /// Target architecture.
    pub arch: &'a str,
    /// Feature mask, specialized into the build only when `adaptive`.
    pub features: KernelFeatures,
    /// Adaptive build.
    pub adaptive: bool,
    /// Debug build.
    pub debug: bool,
    /// Extra user flags.
    pub extra_flags: &'a [String],
}

/// A kernel compiler.
pub trait KernelCompiler: Send + Sync + Debug {
    /// Name and version, part of every cache key.
    fn identity(&self) -> String;

    /// Extension of produced artifacts.
    fn artifact_extension(&self) -> &str;

    /// Compiles `request.variant` into `request.output`.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<(), CompilerError>;

    /// Number of [`KernelCompiler::compile`] calls so far.
    fn invocations(&self) -> usize;
}

/// Runs an external compiler such as `nvcc`, `hipcc` or `ocloc`.
///
/// The command line is
/// `<program> <base args> -I <source dir> [-D__KERNEL_FEATURES__=<bits>] [-g] <extra> -o <output> <source>`
/// with `{arch}` in base args replaced by the target architecture.
#[derive(Debug)]
pub struct CommandCompiler {
    program: PathBuf,
    version: String,
    base_args: Vec<String>,
    source_extension: String,
    artifact_extension: String,
    invocations: AtomicUsize,
}

impl CommandCompiler {
    /// A compiler reading `<variant>.<source_extension>` and writing `.<artifact_extension>`.
    pub fn new(
        program: impl Into<PathBuf>,
        source_extension: impl Into<String>,
        artifact_extension: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            version: String::new(),
            base_args: Vec::new(),
            source_extension: source_extension.into(),
            artifact_extension: artifact_extension.into(),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Adds fixed arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Records a version string for cache keys.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn build_command(&self, request: &CompileRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        for arg in &self.base_args {
            cmd.arg(arg.replace("{arch}", request.arch));
        }
        cmd.arg("-I").arg(request.source_dir);
        if request.adaptive {
            cmd.arg(format!("-D__KERNEL_FEATURES__={}", request.features.bits()));
        }
        if request.debug {
            cmd.arg("-g");
        }
        cmd.args(request.extra_flags);
        cmd.arg("-o").arg(request.output);
        cmd.arg(
            request
                .source_dir
                .join(format!("{}.{}", request.variant.name, self.source_extension)),
        );
        cmd
    }
}

impl KernelCompiler for CommandCompiler {
    fn identity(&self) -> String {
        format!("{} {}", self.program_name(), self.version)
    }

    fn artifact_extension(&self) -> &str {
        &self.artifact_extension
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<(), CompilerError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let compiler = self.program_name();
        let mut cmd = self.build_command(request);
        log::info!("CommandCompiler: compiling '{}' for {}", request.variant.name, request.arch);
        log::debug!("CommandCompiler: {cmd:?}");

        let output = cmd.output().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                CompilerError::NotFound(compiler.clone())
            } else {
                CompilerError::Io {
                    compiler: compiler.clone(),
                    source,
                }
            }
        })?;
        if !output.status.success() {
            return Err(CompilerError::Failed {
                compiler,
                status: output.status.code().unwrap_or(-1),
                diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }
}

/// Assembles WGSL modules for the wgpu backend.
///
/// Reads `<variant>.wgsl`, prepends the feature mask as a constant and inlines
/// `// #include "<file>"` lines relative to the source directory. Validation
/// happens when the driver creates the shader module.
#[derive(Debug, Default)]
pub struct WgslAssembler {
    invocations: AtomicUsize,
}

impl WgslAssembler {
    /// Creates an assembler.
    pub fn new() -> Self {
        Self::default()
    }

    fn assemble(&self, request: &CompileRequest<'_>, path: &Path, depth: usize, out: &mut String) -> Result<(), CompilerError> {
        let text = std::fs::read_to_string(path).map_err(|source| CompilerError::Source {
            path: path.to_path_buf(),
            source,
        })?;
        for line in text.lines() {
            match line.trim().strip_prefix("// #include ") {
                Some(include) if depth < 16 => {
                    let name = include.trim().trim_matches('"');
                    self.assemble(request, &request.source_dir.join(name), depth + 1, out)?;
                }
                _ => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        Ok(())
    }
}

impl KernelCompiler for WgslAssembler {
    fn identity(&self) -> String {
        format!("wgsl-assembler {}", env!("CARGO_PKG_VERSION"))
    }

    fn artifact_extension(&self) -> &str {
        "wgsl"
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<(), CompilerError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let features = if request.adaptive {
            request.features
        } else {
            KernelFeatures::all()
        };
        let mut out = format!("const KERNEL_FEATURES: u32 = {}u;\n", features.bits());
        let main = request.source_dir.join(format!("{}.wgsl", request.variant.name));
        self.assemble(request, &main, 0, &mut out)?;
        std::fs::write(request.output, out).map_err(|source| CompilerError::Io {
            compiler: "wgsl-assembler".into(),
            source,
        })
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photon_core::device::{DeviceKernel, ParamLayout};

    fn variant() -> KernelVariant {
        KernelVariant {
            name: "kernel".into(),
            kernels: vec![DeviceKernel::ALL[0]],
            params: ParamLayout::new(),
            reserve_kernel: None,
        }
    }

    #[test]
    fn missing_program_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = CommandCompiler::new("/nonexistent/photon-nvcc", "cu", "cubin");
        let v = variant();
        let out = dir.path().join("out.cubin");
        let request = CompileRequest {
            variant: &v,
            source_dir: dir.path(),
            output: &out,
            arch: "sm_86",
            features: KernelFeatures::all(),
            adaptive: false,
            debug: false,
            extra_flags: &[],
        };
        let err = compiler.compile(&request).unwrap_err();
        assert!(matches!(err, CompilerError::NotFound(name) if name == "photon-nvcc"));
        assert_eq!(compiler.invocations(), 1);
    }

    #[test]
    fn wgsl_includes_are_inlined() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("common.wgsl"), "fn helper() {}").unwrap();
        std::fs::write(
            dir.path().join("kernel.wgsl"),
            "// #include \"common.wgsl\"\n@compute @workgroup_size(64) fn main() {}",
        )
        .unwrap();
        let v = variant();
        let out = dir.path().join("kernel.out.wgsl");
        let request = CompileRequest {
            variant: &v,
            source_dir: dir.path(),
            output: &out,
            arch: "vulkan",
            features: KernelFeatures::PATH_TRACING,
            adaptive: true,
            debug: false,
            extra_flags: &[],
        };
        WgslAssembler::new().compile(&request).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("const KERNEL_FEATURES: u32 = 1u;"));
        assert!(text.contains("fn helper() {}"));
        assert!(text.contains("fn main()"));
    }
}
