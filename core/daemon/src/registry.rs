use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::evaluator::{EvaluatorDefaults, SessionEvaluator};

pub type SharedEvaluator = Arc<Mutex<SessionEvaluator>>;

#[derive(Debug)]
struct RegistryEntry {
    evaluator: SharedEvaluator,
    last_touched: DateTime<Utc>,
}

/// User id -> evaluator map. Entries are created on first access and only
/// leave through [`EvaluatorRegistry::sweep_idle`].
#[derive(Debug, Default)]
pub struct EvaluatorRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
    defaults: EvaluatorDefaults,
}

impl EvaluatorRegistry {
    pub fn new(defaults: EvaluatorDefaults) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            defaults,
        }
    }

    pub fn get(&self, user_id: &str) -> SharedEvaluator {
        self.get_at(user_id, Utc::now())
    }

    pub fn get_at(&self, user_id: &str, now: DateTime<Utc>) -> SharedEvaluator {
        let mut entries = self.lock_entries();
        let entry = entries
            .entry(user_id.to_string())
            .or_insert_with(|| RegistryEntry {
                evaluator: Arc::new(Mutex::new(SessionEvaluator::new(self.defaults.clone()))),
                last_touched: now,
            });
        entry.last_touched = now;
        Arc::clone(&entry.evaluator)
    }

    /// Drops evaluators untouched for longer than `max_idle`. Entries still
    /// held by an in-flight request are kept. Returns the number evicted.
    pub fn sweep_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> usize {
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|user_id, entry| {
            let idle = now.signed_duration_since(entry.last_touched) > max_idle;
            let in_use = Arc::strong_count(&entry.evaluator) > 1;
            if idle && !in_use {
                tracing::debug!(user_id = %user_id, "Evicting idle evaluator");
                return false;
            }
            true
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Locks an evaluator, recovering the data if a previous holder panicked.
pub fn lock_evaluator(evaluator: &SharedEvaluator) -> MutexGuard<'_, SessionEvaluator> {
    evaluator
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
