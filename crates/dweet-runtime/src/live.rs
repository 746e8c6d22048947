//! Latest-value cache shared by the feeds and the renderer.

#![allow(missing_docs)]

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;

/// A partial set of readings, keyed by channel.
pub type Readings = IndexMap<String, f64>;

/// Channel key -> most recent reading.
///
/// Cloning yields another handle to the same cache. Every write goes through
/// [`LiveStateCache::update`], which holds the write lock for the whole merge.
#[derive(Debug, Clone, Default)]
pub struct LiveStateCache {
    values: Arc<RwLock<Readings>>,
}

impl LiveStateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `readings` into the cache, last write wins per key.
    pub fn update<'a, I>(&self, readings: I)
    where
        I: IntoIterator<Item = (&'a String, &'a f64)>,
    {
        let mut values = self.values.write();
        for (key, value) in readings {
            if let Some(slot) = values.get_mut(key.as_str()) {
                *slot = *value;
            } else {
                values.insert(key.clone(), *value);
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            values: self.values.read().clone(),
        }
    }

    /// Latest reading for `key`, zero when nothing has arrived yet.
    #[must_use]
    pub fn value(&self, key: &str) -> f64 {
        self.values.read().get(key).copied().unwrap_or(0.0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

/// Immutable copy of the cache taken under one read lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LiveSnapshot {
    values: Readings,
}

impl LiveSnapshot {
    #[must_use]
    pub fn value(&self, key: &str) -> f64 {
        self.values.get(key).copied().unwrap_or(0.0)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.values.iter().map(|(key, value)| (key.as_str(), *value))
    }
}

impl std::ops::Index<&str> for LiveSnapshot {
    type Output = f64;

    fn index(&self, key: &str) -> &f64 {
        self.values.get(key).unwrap_or(&0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn readings(entries: &[(&str, f64)]) -> Readings {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), *value))
            .collect()
    }

    #[test]
    fn update_merges_last_writer_per_key() {
        let cache = LiveStateCache::new();
        cache.update(&readings(&[("V1(V)", 230.0), ("A1(A)", 4.0)]));
        cache.update(&readings(&[("V1(V)", 231.5)]));
        cache.update(&readings(&[("P1(KW)", 0.9), ("A1(A)", 4.2)]));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot["V1(V)"], 231.5);
        assert_eq!(snapshot["A1(A)"], 4.2);
        assert_eq!(snapshot["P1(KW)"], 0.9);
    }

    #[test]
    fn missing_keys_read_as_zero() {
        let cache = LiveStateCache::new();
        assert_eq!(cache.value("V3(V)"), 0.0);
        assert_eq!(cache.snapshot()["V3(V)"], 0.0);
        assert_eq!(cache.snapshot().get("V3(V)"), None);
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let cache = LiveStateCache::new();
        cache.update(&readings(&[("V1(V)", 1.0)]));
        let before = cache.snapshot();
        cache.update(&readings(&[("V1(V)", 2.0)]));
        assert_eq!(before["V1(V)"], 1.0);
        assert_eq!(cache.value("V1(V)"), 2.0);
    }

    #[test]
    fn concurrent_writers_never_interleave_within_an_update() {
        let cache = LiveStateCache::new();
        let writers = (0..4)
            .map(|writer| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for step in 0..500 {
                        let value = f64::from(writer * 1_000 + step);
                        cache.update(&readings(&[("a", value), ("b", value)]));
                    }
                })
            })
            .collect::<Vec<_>>();
        for _ in 0..500 {
            let snapshot = cache.snapshot();
            assert_eq!(snapshot.get("a"), snapshot.get("b"));
        }
        for writer in writers {
            writer.join().expect("writer thread");
        }
        assert_eq!(cache.len(), 2);
    }
}
