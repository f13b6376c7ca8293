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

//! Registry for managing metrics.

use photon_core::telemetry::metrics::{
    MetricId, MetricType, MetricValue, MetricsError, MetricsResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Store = Arc<Mutex<HashMap<MetricId, MetricValue>>>;

fn with_metric<T>(
    store: &Store,
    id: &MetricId,
    f: impl FnOnce(&mut MetricValue) -> MetricsResult<T>,
) -> MetricsResult<T> {
    let mut guard = store
        .lock()
        .map_err(|e| MetricsError::StorageError(e.to_string()))?;
    let value = guard
        .get_mut(id)
        .ok_or_else(|| MetricsError::MetricNotFound(id.clone()))?;
    f(value)
}

fn mismatch(expected: MetricType, found: &MetricValue) -> MetricsError {
    MetricsError::TypeMismatch {
        expected,
        found: found.metric_type(),
    }
}

/// Central, thread-safe metrics store.
///
/// Registration returns a typed handle; handles are cheap to clone and update
/// the shared store directly.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    store: Store,
}

impl MetricsRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, id: MetricId, initial: MetricValue) -> MetricsResult<()> {
        let mut guard = self
            .store
            .lock()
            .map_err(|e| MetricsError::StorageError(e.to_string()))?;
        match guard.get(&id) {
            Some(existing) if existing.metric_type() != initial.metric_type() => {
                Err(mismatch(initial.metric_type(), existing))
            }
            Some(_) => Ok(()),
            None => {
                guard.insert(id, initial);
                Ok(())
            }
        }
    }

    /// Registers a counter, or returns a handle to the existing one.
    pub fn counter(&self, id: MetricId) -> MetricsResult<CounterHandle> {
        self.register(id.clone(), MetricValue::Counter(0))?;
        Ok(CounterHandle {
            id,
            store: self.store.clone(),
        })
    }

    /// Registers a gauge, or returns a handle to the existing one.
    pub fn gauge(&self, id: MetricId) -> MetricsResult<GaugeHandle> {
        self.register(id.clone(), MetricValue::Gauge(0.0))?;
        Ok(GaugeHandle {
            id,
            store: self.store.clone(),
        })
    }

    /// Registers a histogram, or returns a handle to the existing one.
    pub fn histogram(&self, id: MetricId) -> MetricsResult<HistogramHandle> {
        self.register(id.clone(), MetricValue::empty_histogram())?;
        Ok(HistogramHandle {
            id,
            store: self.store.clone(),
        })
    }

    /// Current value of `id`.
    pub fn get(&self, id: &MetricId) -> MetricsResult<MetricValue> {
        with_metric(&self.store, id, |v| Ok(v.clone()))
    }

    /// Every metric in `namespace`, sorted by id.
    pub fn namespace(&self, namespace: &str) -> Vec<(MetricId, MetricValue)> {
        let Ok(guard) = self.store.lock() else {
            return Vec::new();
        };
        let mut out: Vec<_> = guard
            .iter()
            .filter(|(id, _)| id.namespace == namespace)
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Number of registered metrics.
    pub fn metric_count(&self) -> usize {
        self.store.lock().map(|g| g.len()).unwrap_or(0)
    }

    /// A JSON snapshot of every metric, keyed by formatted id.
    pub fn to_json(&self) -> serde_json::Value {
        let Ok(guard) = self.store.lock() else {
            return serde_json::Value::Null;
        };
        let mut map = serde_json::Map::new();
        for (id, value) in guard.iter() {
            let json = match value {
                MetricValue::Counter(v) => serde_json::json!(v),
                MetricValue::Gauge(v) => serde_json::json!(v),
                MetricValue::Histogram {
                    count,
                    sum,
                    min,
                    max,
                } => serde_json::json!({
                    "count": count,
                    "sum": sum,
                    "min": if *count > 0 { *min } else { 0.0 },
                    "max": if *count > 0 { *max } else { 0.0 },
                }),
            };
            map.insert(id.to_string(), json);
        }
        serde_json::Value::Object(map)
    }
}

/// Handle for counter operations.
#[derive(Debug, Clone)]
pub struct CounterHandle {
    id: MetricId,
    store: Store,
}

impl CounterHandle {
    /// Adds one.
    pub fn increment(&self) -> MetricsResult<u64> {
        self.increment_by(1)
    }

    /// Adds `amount`.
    pub fn increment_by(&self, amount: u64) -> MetricsResult<u64> {
        with_metric(&self.store, &self.id, |value| match value {
            MetricValue::Counter(v) => {
                *v += amount;
                Ok(*v)
            }
            other => Err(mismatch(MetricType::Counter, other)),
        })
    }

    /// Current count.
    pub fn get(&self) -> MetricsResult<u64> {
        with_metric(&self.store, &self.id, |value| {
            value
                .as_counter()
                .ok_or_else(|| mismatch(MetricType::Counter, value))
        })
    }

    /// The metric id.
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}

/// Handle for gauge operations.
#[derive(Debug, Clone)]
pub struct GaugeHandle {
    id: MetricId,
    store: Store,
}

impl GaugeHandle {
    /// Sets the value.
    pub fn set(&self, new_value: f64) -> MetricsResult<()> {
        with_metric(&self.store, &self.id, |value| match value {
            MetricValue::Gauge(v) => {
                *v = new_value;
                Ok(())
            }
            other => Err(mismatch(MetricType::Gauge, other)),
        })
    }

    /// Current value.
    pub fn get(&self) -> MetricsResult<f64> {
        with_metric(&self.store, &self.id, |value| {
            value
                .as_gauge()
                .ok_or_else(|| mismatch(MetricType::Gauge, value))
        })
    }
}

/// Handle for histogram operations.
#[derive(Debug, Clone)]
pub struct HistogramHandle {
    id: MetricId,
    store: Store,
}

impl HistogramHandle {
    /// Records one observation.
    pub fn observe(&self, sample: f64) -> MetricsResult<()> {
        with_metric(&self.store, &self.id, |value| match value {
            MetricValue::Histogram {
                count,
                sum,
                min,
                max,
            } => {
                *count += 1;
                *sum += sample;
                *min = min.min(sample);
                *max = max.max(sample);
                Ok(())
            }
            other => Err(mismatch(MetricType::Histogram, other)),
        })
    }

    /// Current summary.
    pub fn get(&self) -> MetricsResult<MetricValue> {
        with_metric(&self.store, &self.id, |value| Ok(value.clone()))
    }

    /// The metric id.
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_handles() {
        let registry = MetricsRegistry::new();
        let id = MetricId::new("kernel", "launches");
        let a = registry.counter(id.clone()).unwrap();
        let b = registry.counter(id.clone()).unwrap();
        a.increment().unwrap();
        b.increment_by(4).unwrap();
        assert_eq!(a.get().unwrap(), 5);
        assert_eq!(registry.metric_count(), 1);
    }

    #[test]
    fn reregistering_with_another_kind_fails() {
        let registry = MetricsRegistry::new();
        let id = MetricId::new("device", "mem_used");
        registry.gauge(id.clone()).unwrap();
        let err = registry.counter(id).unwrap_err();
        assert!(matches!(err, MetricsError::TypeMismatch { .. }));
    }

    #[test]
    fn histogram_tracks_min_max() {
        let registry = MetricsRegistry::new();
        let h = registry.histogram(MetricId::new("bvh", "build_ms")).unwrap();
        for sample in [3.0, 1.0, 2.0] {
            h.observe(sample).unwrap();
        }
        match h.get().unwrap() {
            MetricValue::Histogram { count, min, max, .. } => {
                assert_eq!(count, 3);
                assert_eq!(min, 1.0);
                assert_eq!(max, 3.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        let json = registry.to_json();
        assert_eq!(json["bvh:build_ms"]["count"], 3);
    }
}
