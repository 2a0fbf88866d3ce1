use sensor_drivers::Reading;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Latest value per metric, shared by every producer and the publisher.
///
/// A merge holds the lock for the whole reading, so a snapshot sees either none or
/// all of it. The lock is never held across an await point.
#[derive(Debug, Clone, Default)]
pub struct SensorState {
    inner: Arc<Mutex<BTreeMap<String, f64>>>,
}

impl SensorState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, f64>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply every value of `reading`. Existing keys are overwritten.
    pub fn merge(&self, reading: Reading) -> usize {
        let mut state = self.lock();
        let n = reading.len();
        state.extend(reading);
        n
    }

    pub fn snapshot(&self) -> Reading {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.lock().get(metric).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn reading(pairs: &[(&str, f64)]) -> Reading {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn last_write_wins_per_key() {
        let orders: [[usize; 3]; 3] = [[0, 1, 2], [1, 0, 2], [0, 2, 1]];
        for order in orders {
            let merges = [
                reading(&[("a", 1.0)]),
                reading(&[("b", 2.0)]),
                reading(&[("a", 3.0)]),
            ];
            let state = SensorState::new();
            // `a:1` always lands before `a:3`; `b` may come anywhere.
            for i in order {
                state.merge(merges[i].clone());
            }
            assert_eq!(state.snapshot(), reading(&[("a", 3.0), ("b", 2.0)]));
        }
    }

    #[test]
    fn snapshot_is_detached_from_later_merges() {
        let state = SensorState::new();
        state.merge(reading(&[("co2", 400.0)]));
        let snap = state.snapshot();
        state.merge(reading(&[("co2", 800.0)]));
        assert_eq!(snap.get("co2"), Some(400.0));
        assert_eq!(state.get("co2"), Some(800.0));
    }

    #[test]
    fn snapshots_never_see_half_a_merge() {
        let state = SensorState::new();
        state.merge(reading(&[("x", 0.0), ("y", 0.0)]));

        let writer = {
            let state = state.clone();
            thread::spawn(move || {
                for i in 1..5000 {
                    let v = f64::from(i);
                    state.merge(reading(&[("x", v), ("y", v)]));
                }
            })
        };
        for _ in 0..5000 {
            let snap = state.snapshot();
            assert_eq!(snap.get("x"), snap.get("y"));
        }
        writer.join().unwrap();
        assert_eq!(state.get("x"), Some(4999.0));
    }
}
