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

//! The progress collaborator: cancellation flag, status text and error sink.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Supplied by the session. The core never owns its lifetime.
pub trait Progress: Send + Sync + Debug {
    /// `true` once the user cancelled.
    fn get_cancel(&self) -> bool;

    /// Secondary status line shown during long builds and compiles.
    fn set_substatus(&self, status: &str);

    /// Error channel for build failures.
    fn set_error(&self, message: &str);
}

#[derive(Debug, Default)]
struct ProgressState {
    substatus: String,
    error: Option<String>,
}

/// A thread-safe [`Progress`] that records what it is told.
#[derive(Debug, Clone, Default)]
pub struct SharedProgress {
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<ProgressState>>,
}

impl SharedProgress {
    /// A fresh, uncancelled progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// The last substatus.
    pub fn substatus(&self) -> String {
        self.state
            .lock()
            .map(|s| s.substatus.clone())
            .unwrap_or_default()
    }

    /// The first error reported, if any.
    pub fn error(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.error.clone())
    }
}

impl Progress for SharedProgress {
    fn get_cancel(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn set_substatus(&self, status: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.substatus = status.to_string();
        }
    }

    fn set_error(&self, message: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.error.get_or_insert_with(|| message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_error_and_last_status() {
        let progress = SharedProgress::new();
        progress.set_substatus("Building BVH");
        progress.set_substatus("Compacting BVH");
        progress.set_error("first");
        progress.set_error("second");
        assert_eq!(progress.substatus(), "Compacting BVH");
        assert_eq!(progress.error().as_deref(), Some("first"));
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let progress = SharedProgress::new();
        let other = progress.clone();
        assert!(!other.get_cancel());
        progress.cancel();
        assert!(other.get_cancel());
    }
}
