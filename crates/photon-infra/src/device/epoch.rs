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

//! Queue submission epochs used as a fence for deferred frees.

use std::collections::HashMap;
use std::sync::Mutex;

/// Identifies one queue registered with [`QueueEpochs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueTicket(u64);

#[derive(Debug, Default)]
struct EpochState {
    submitted: u64,
    next_ticket: u64,
    // First submission of each queue not yet covered by a synchronize.
    oldest_pending: HashMap<QueueTicket, u64>,
}

/// Submission counter shared by every queue of one device.
///
/// Each launch takes the next epoch. A resource released while the counter is
/// at `e` may still be read by submissions up to `e`, so it becomes reclaimable
/// once [`QueueEpochs::safe_epoch`] reaches `e`.
#[derive(Debug, Default)]
pub struct QueueEpochs {
    state: Mutex<EpochState>,
}

impl QueueEpochs {
    /// A counter with nothing submitted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new queue.
    pub fn register(&self) -> QueueTicket {
        match self.state.lock() {
            Ok(mut state) => {
                state.next_ticket += 1;
                QueueTicket(state.next_ticket)
            }
            Err(_) => QueueTicket(u64::MAX),
        }
    }

    /// Forgets a queue whose submissions have all completed.
    pub fn unregister(&self, ticket: QueueTicket) {
        self.complete(ticket);
    }

    /// Records one submission from `ticket` and returns its epoch.
    pub fn submit(&self, ticket: QueueTicket) -> u64 {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        state.submitted += 1;
        let epoch = state.submitted;
        state.oldest_pending.entry(ticket).or_insert(epoch);
        epoch
    }

    /// Marks all work submitted by `ticket` as complete.
    pub fn complete(&self, ticket: QueueTicket) {
        if let Ok(mut state) = self.state.lock() {
            state.oldest_pending.remove(&ticket);
        }
    }

    /// The latest submitted epoch. Resources released now retire at this epoch.
    pub fn current(&self) -> u64 {
        self.state.lock().map(|s| s.submitted).unwrap_or(u64::MAX)
    }

    /// Every submission up to and including this epoch has completed.
    pub fn safe_epoch(&self) -> u64 {
        let Ok(state) = self.state.lock() else {
            return 0;
        };
        state
            .oldest_pending
            .values()
            .min()
            .map_or(state.submitted, |oldest| oldest - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_device_is_always_safe() {
        let epochs = QueueEpochs::new();
        assert_eq!(epochs.safe_epoch(), 0);
        let q = epochs.register();
        epochs.submit(q);
        epochs.submit(q);
        epochs.complete(q);
        assert_eq!(epochs.safe_epoch(), 2);
    }

    #[test]
    fn pending_queue_holds_back_the_safe_epoch() {
        let epochs = QueueEpochs::new();
        let a = epochs.register();
        let b = epochs.register();
        epochs.submit(a);
        epochs.complete(a);
        let pending = epochs.submit(b);
        epochs.submit(a);
        assert_eq!(epochs.safe_epoch(), pending - 1);
        epochs.complete(b);
        assert_eq!(epochs.safe_epoch(), pending);
        epochs.unregister(a);
        assert_eq!(epochs.safe_epoch(), epochs.current());
    }
}
