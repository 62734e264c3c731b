//! Data structures for passing keys into a fetcher and values back out to the
//! waiting futures.

use std::collections::hash_map::{Entry, HashMap};
use std::hash::Hash;
use std::mem;
use std::num::NonZeroUsize;

use parking_lot::Mutex;

use crate::error::LoadError;

/// Identifies one distinct key in a window. Every future waiting on the same
/// key holds a token with the same value.
#[repr(transparent)]
#[derive(Debug, PartialEq, Eq, Hash)]
pub(crate) struct Token(NonZeroUsize);

impl Token {
    fn duplicate(&self) -> Self {
        Token(self.0)
    }

    fn slot(&self) -> usize {
        self.0.get() - 1
    }
}

#[derive(Debug)]
struct Slot<Key> {
    key: Key,
    // Number of futures waiting on this key *past the first*; in other words,
    // the number of times the value will need to be cloned.
    extra: usize,
}

/// The keys accumulated by an open batch window.
///
/// Keys are deduplicated and kept in the order they were first requested.
/// Slots are never removed, only emptied, so a token stays valid for the
/// lifetime of the set. An emptied slot is revived if its key is requested
/// again before dispatch.
#[derive(Debug)]
pub(crate) struct KeySet<Key: Eq + Hash> {
    slots: Vec<Option<Slot<Key>>>,
    index: HashMap<Key, Token>,
    live: usize,
}

impl<Key: Clone + Eq + Hash> KeySet<Key> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            live: 0,
        }
    }

    /// Number of distinct keys that still have at least one waiting future.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Add a key to this KeySet, and return the token associated with that
    /// key. This token can then be used to pull a value out of the ValueSet
    /// built from this set.
    pub(crate) fn add_key(&mut self, key: Key) -> Token {
        match self.index.entry(key) {
            Entry::Occupied(entry) => {
                let token = entry.get().duplicate();
                let slot = &mut self.slots[token.slot()];
                match slot {
                    Some(slot) => slot.extra += 1,
                    None => {
                        *slot = Some(Slot {
                            key: entry.key().clone(),
                            extra: 0,
                        });
                        self.live += 1;
                    }
                }
                token
            }
            Entry::Vacant(entry) => {
                let token = Token(
                    NonZeroUsize::new(self.slots.len() + 1).expect("slot index overflowed"),
                );
                self.slots.push(Some(Slot {
                    key: entry.key().clone(),
                    extra: 0,
                }));
                entry.insert(token.duplicate());
                self.live += 1;
                token
            }
        }
    }

    /// A future lost interest in its key before dispatch.
    pub(crate) fn discard_token(&mut self, token: Token) {
        let slot = &mut self.slots[token.slot()];
        match slot {
            Some(Slot { extra: 0, .. }) => {
                *slot = None;
                self.live -= 1;
            }
            Some(slot) => slot.extra -= 1,
            None => panic!("Attempted to remove nonexistent token from KeySet"),
        }
    }

    /// Close this window: take the live keys out of `self` in first-seen
    /// order, leaving an empty set behind.
    pub(crate) fn freeze(&mut self) -> FrozenKeys<Key> {
        let slots = mem::take(&mut self.slots);
        self.index.clear();
        self.live = 0;

        let mut keys = Vec::with_capacity(slots.len());
        let mut tokens = Vec::with_capacity(slots.len());

        for (i, slot) in slots.into_iter().enumerate() {
            if let Some(Slot { key, extra }) = slot {
                keys.push(key);
                tokens.push((Token(NonZeroUsize::new(i + 1).expect("slot index overflowed")), extra));
            }
        }

        FrozenKeys { keys, tokens }
    }
}

/// The deduplicated, ordered keys of a dispatched window. `keys[i]` is owned
/// by the futures holding `tokens[i]`.
#[derive(Debug)]
pub(crate) struct FrozenKeys<Key> {
    keys: Vec<Key>,
    tokens: Vec<(Token, usize)>,
}

impl<Key> FrozenKeys<Key> {
    #[inline]
    pub(crate) fn keys(&self) -> &[Key] {
        &self.keys
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Pair each positional value with the futures waiting on the key at the
    /// same position. Fails if the fetcher returned the wrong number of
    /// values.
    pub(crate) fn into_values<Value>(self, values: Vec<Value>) -> Result<ValueSet<Value>, LoadError> {
        if values.len() != self.tokens.len() {
            return Err(LoadError::LengthMismatch {
                expected: self.tokens.len(),
                actual: values.len(),
            });
        }

        let values = self
            .tokens
            .into_iter()
            .zip(values)
            .map(|((token, count), value)| (token, ValueSetEntry { value, count }))
            .collect();

        Ok(ValueSet { values })
    }
}

#[derive(Debug)]
struct ValueSetEntry<Value> {
    count: usize,
    value: Value,
}

/// The result of a dispatched window, used to distribute values to the
/// correct waiting futures.
#[derive(Debug)]
pub(crate) struct ValueSet<Value> {
    values: HashMap<Token, ValueSetEntry<Value>>,
}

impl<Value> ValueSet<Value> {
    /// A ValueSet holding one already-known value for a single waiter.
    pub(crate) fn single(value: Value) -> (Token, Self) {
        let token = Token(NonZeroUsize::MIN);
        let mut values = HashMap::with_capacity(1);
        values.insert(token.duplicate(), ValueSetEntry { value, count: 0 });
        (token, ValueSet { values })
    }

    /// Discard a token associated with this ValueSet without getting the
    /// value. No-op if the token isn't present.
    pub(crate) fn discard(&mut self, token: Token) {
        match self.values.entry(token) {
            Entry::Vacant(..) => {}
            Entry::Occupied(entry) if entry.get().count == 0 => {
                entry.remove();
            }
            Entry::Occupied(mut entry) => {
                entry.get_mut().count -= 1;
            }
        }
    }
}

impl<Value: Clone> ValueSet<Value> {
    /// Take a value associated with a token out of this ValueSet. If other
    /// futures still wait on the same token, the value is cloned; the last
    /// one gets the original.
    pub(crate) fn take(&mut self, token: Token) -> Option<Value> {
        match self.values.entry(token) {
            Entry::Vacant(..) => None,
            Entry::Occupied(entry) if entry.get().count == 0 => Some(entry.remove().value),
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.count -= 1;
                Some(entry.value.clone())
            }
        }
    }
}

/// Results of every successful window a coordinator has dispatched, kept for
/// the rest of its query. Keys the upstream didn't know are cached as `None`.
/// Failed windows are never cached.
pub(crate) struct ValueCache<Key, Value> {
    entries: Mutex<HashMap<Key, Option<Value>>>,
}

impl<Key: Clone + Eq + Hash, Value: Clone> ValueCache<Key, Value> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `Some(result)` if `key` was already fetched.
    pub(crate) fn get(&self, key: &Key) -> Option<Option<Value>> {
        self.entries.lock().get(key).cloned()
    }

    pub(crate) fn fill(&self, keys: &[Key], values: &[Option<Value>]) {
        let mut entries = self.entries.lock();
        for (key, value) in keys.iter().zip(values) {
            entries.insert(key.clone(), value.clone());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
