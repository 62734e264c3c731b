//! Derived views keyed by a foreign field.
//!
//! Some entities don't exist upstream as records of their own: "the reviews of
//! product X" or "how many reviews user Y wrote" are computed by fetching the
//! related records for every requested parent at once and grouping them by
//! the foreign key. [`Grouped`] keeps each group, [`Counted`] reduces it to a
//! count. Both answer every requested key; a parent with no related records
//! gets an empty group (or zero), never `None`.

use std::{collections::HashMap, fmt::Debug, future::Future, hash::Hash};

use async_trait::async_trait;
use futures::FutureExt;

use crate::{
    batch::Coordinator,
    error::{FetchError, LoadResult},
    fetcher::Fetcher,
};

/// A bulk source of records filtered by a foreign key.
#[async_trait]
pub trait GroupSource: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Record: Clone + Send + Sync + 'static;

    fn name(&self) -> &str;

    /// The foreign key a record belongs to.
    fn group_key<'r>(&self, record: &'r Self::Record) -> &'r Self::Key;

    /// Fetch every record whose foreign key is in `keys`, in one request.
    async fn fetch_related(&self, keys: &[Self::Key]) -> Result<Vec<Self::Record>, FetchError>;
}

/// Split `records` into one group per requested key, in request order.
/// Records keep their relative order within a group. Records belonging to
/// keys that weren't requested are dropped.
pub fn group_by<K, R>(keys: &[K], records: Vec<R>, key_of: impl Fn(&R) -> &K) -> Vec<Vec<R>>
where
    K: Eq + Hash,
{
    let positions: HashMap<&K, usize> = keys.iter().enumerate().map(|(i, key)| (key, i)).collect();
    let mut groups: Vec<Vec<R>> = keys.iter().map(|_| Vec::new()).collect();

    for record in records {
        let position = positions.get(key_of(&record)).copied();
        if let Some(i) = position {
            groups[i].push(record);
        }
    }

    groups
}

/// Count `records` per requested key, in request order.
pub fn count_by<K, R>(keys: &[K], records: &[R], key_of: impl Fn(&R) -> &K) -> Vec<usize>
where
    K: Eq + Hash,
{
    let positions: HashMap<&K, usize> = keys.iter().enumerate().map(|(i, key)| (key, i)).collect();
    let mut counts = vec![0; keys.len()];

    for record in records {
        if let Some(&i) = positions.get(key_of(record)) {
            counts[i] += 1;
        }
    }

    counts
}

/// A [`Fetcher`] answering each foreign key with its full group of records.
#[derive(Debug, Clone)]
pub struct Grouped<S>(pub S);

#[async_trait]
impl<S: GroupSource> Fetcher for Grouped<S> {
    type Key = S::Key;
    type Value = Vec<S::Record>;

    fn name(&self) -> &str {
        self.0.name()
    }

    async fn fetch(&self, keys: &[S::Key]) -> Result<Vec<Option<Vec<S::Record>>>, FetchError> {
        let records = self.0.fetch_related(keys).await?;
        let groups = group_by(keys, records, |record| self.0.group_key(record));
        Ok(groups.into_iter().map(Some).collect())
    }
}

/// A [`Fetcher`] answering each foreign key with the number of related
/// records.
#[derive(Debug, Clone)]
pub struct Counted<S>(pub S);

#[async_trait]
impl<S: GroupSource> Fetcher for Counted<S> {
    type Key = S::Key;
    type Value = usize;

    fn name(&self) -> &str {
        self.0.name()
    }

    async fn fetch(&self, keys: &[S::Key]) -> Result<Vec<Option<usize>>, FetchError> {
        let records = self.0.fetch_related(keys).await?;
        let counts = count_by(keys, &records, |record| self.0.group_key(record));
        Ok(counts.into_iter().map(Some).collect())
    }
}

impl<F, R> Coordinator<F>
where
    F: Fetcher<Value = Vec<R>> + ?Sized,
    R: Clone + Send + Sync + 'static,
{
    /// Load the group of records for `key`. A key with no records resolves to
    /// an empty list.
    pub fn load_group(&self, key: F::Key) -> impl Future<Output = LoadResult<Vec<R>>> + Send {
        self.load(key)
            .map(|result| result.map(Option::unwrap_or_default))
    }
}

impl<F> Coordinator<F>
where
    F: Fetcher<Value = usize> + ?Sized,
{
    /// Load the number of records for `key`, zero if there are none.
    pub fn load_count(&self, key: F::Key) -> impl Future<Output = LoadResult<usize>> + Send {
        self.load(key)
            .map(|result| result.map(Option::unwrap_or_default))
    }
}
