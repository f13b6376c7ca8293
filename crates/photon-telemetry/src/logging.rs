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

//! Process-wide log and trace subscribers.

use log::LevelFilter;

/// Crates whose `info` output drowns device logs.
const NOISY_MODULES: [&str; 3] = ["wgpu_hal", "wgpu_core", "naga"];

/// Installs `env_logger` with `info` as the default level.
///
/// `RUST_LOG` overrides the default. Calling this more than once is harmless;
/// later calls are ignored.
pub fn init_logging() {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Info);
    for module in NOISY_MODULES {
        builder.filter_module(module, LevelFilter::Warn);
    }
    builder.parse_default_env();
    builder.format_timestamp_millis();
    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}

/// Installs a `tracing` fmt subscriber for the compile and build spans.
///
/// Returns `false` if another subscriber is already installed.
pub fn init_tracing(max_level: tracing::Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(true)
        .try_init()
        .is_ok()
}
