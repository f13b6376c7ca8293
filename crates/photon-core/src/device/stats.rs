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

//! Shared device-memory accounting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Memory counters shared between a device and whoever reports on it.
///
/// A device calls [`DeviceStats::mem_alloc`] and [`DeviceStats::mem_free`] for
/// every byte it reserves or releases, so an alloc/free pair always returns the
/// counters to their starting values.
#[derive(Debug, Default)]
pub struct DeviceStats {
    mem_used: AtomicU64,
    mem_peak: AtomicU64,
    alloc_count: AtomicU64,
    free_count: AtomicU64,
}

/// A point-in-time copy of [`DeviceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatsSnapshot {
    /// Bytes currently allocated.
    pub mem_used: u64,
    /// Highest value `mem_used` ever reached.
    pub mem_peak: u64,
    /// Number of allocations.
    pub alloc_count: u64,
    /// Number of frees.
    pub free_count: u64,
}

impl DeviceStatsSnapshot {
    /// Allocations not yet freed.
    pub fn live_allocations(&self) -> i64 {
        self.alloc_count as i64 - self.free_count as i64
    }
}

impl DeviceStats {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an allocation of `size` bytes.
    pub fn mem_alloc(&self, size: u64) {
        let used = self.mem_used.fetch_add(size, Ordering::Relaxed) + size;
        self.mem_peak.fetch_max(used, Ordering::Relaxed);
        self.alloc_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a free of `size` bytes.
    pub fn mem_free(&self, size: u64) {
        let _ = self
            .mem_used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(size))
            });
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes currently allocated.
    pub fn mem_used(&self) -> u64 {
        self.mem_used.load(Ordering::Relaxed)
    }

    /// Copies every counter.
    pub fn snapshot(&self) -> DeviceStatsSnapshot {
        DeviceStatsSnapshot {
            mem_used: self.mem_used.load(Ordering::Relaxed),
            mem_peak: self.mem_peak.load(Ordering::Relaxed),
            alloc_count: self.alloc_count.load(Ordering::Relaxed),
            free_count: self.free_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_roundtrip_to_zero() {
        let stats = DeviceStats::new();
        stats.mem_alloc(100);
        stats.mem_alloc(50);
        stats.mem_free(100);
        stats.mem_free(50);
        let snap = stats.snapshot();
        assert_eq!(snap.mem_used, 0);
        assert_eq!(snap.mem_peak, 150);
        assert_eq!(snap.live_allocations(), 0);
    }

    #[test]
    fn free_never_underflows() {
        let stats = DeviceStats::new();
        stats.mem_free(10);
        assert_eq!(stats.mem_used(), 0);
    }
}
