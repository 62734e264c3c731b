//! Per-query upstream call counting.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::info;

/// Counts upstream calls by name for the lifetime of one query.
///
/// Coordinators increment it once per dispatched window; it is never shared
/// between queries.
#[derive(Debug, Default)]
pub struct CallCounter {
    counts: Mutex<BTreeMap<String, usize>>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &str) {
        let mut counts = self.counts.lock();
        match counts.get_mut(name) {
            Some(count) => *count += 1,
            None => {
                counts.insert(name.to_owned(), 1);
            }
        }
    }

    /// Number of calls recorded for `name`.
    pub fn get(&self, name: &str) -> usize {
        self.counts.lock().get(name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().values().sum()
    }

    pub fn snapshot(&self) -> BTreeMap<String, usize> {
        self.counts.lock().clone()
    }

    /// Log one line per upstream call name.
    pub(crate) fn report(&self) -> BTreeMap<String, usize> {
        let counts = self.snapshot();
        for (upstream, count) in &counts {
            info!(upstream = %upstream, count, "query completed");
        }
        counts
    }
}
