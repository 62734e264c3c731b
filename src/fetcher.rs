use std::{collections::HashMap, fmt::Debug, hash::Hash};

use async_trait::async_trait;

use crate::error::FetchError;

/// A bulk data source for one entity type.
///
/// `fetch` is given the deduplicated keys of one batch window, in the order
/// they were first requested, and must answer with exactly one optional value
/// per key, at the same position. Keys the upstream doesn't know about are
/// `None`. An `Err` fails every caller waiting in the window.
///
/// Implementations should perform a single bulk request per call (or none,
/// for an empty slice); per-key requests defeat the point of batching.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    /// Identifies the upstream call in diagnostics.
    fn name(&self) -> &str;

    async fn fetch(&self, keys: &[Self::Key]) -> Result<Vec<Option<Self::Value>>, FetchError>;
}

/// Line up an unordered list of upstream records with the requested keys.
///
/// The result has one entry per key: the first record whose key matches, or
/// `None`. Records for keys that weren't requested are dropped.
pub fn match_by_key<K, V>(keys: &[K], records: Vec<V>, key_of: impl Fn(&V) -> &K) -> Vec<Option<V>>
where
    K: Eq + Hash,
{
    let positions: HashMap<&K, usize> = keys.iter().enumerate().map(|(i, key)| (key, i)).collect();
    let mut values: Vec<Option<V>> = keys.iter().map(|_| None).collect();

    for record in records {
        let position = positions.get(key_of(&record)).copied();
        if let Some(i) = position {
            values[i].get_or_insert(record);
        }
    }

    values
}
