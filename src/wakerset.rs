use std::{collections::HashMap, default::Default, num::NonZeroUsize, task::Waker};

#[derive(Debug, Eq, PartialEq, Hash)]
pub(crate) struct Token(NonZeroUsize);

impl Token {
    fn duplicate(&self) -> Token {
        Token(self.0)
    }
}

/// Data structure for managing a collection of wakers that are all interested
/// in a single shared batch window. Only a single task needs to actually do
/// the work of driving the window to completion, but other tasks can take its
/// place if that one is dropped.
///
/// Wakers can be added to a wakerset; when added, a token associated with the
/// Waker is returned. This token should be associated with a running future
/// and can be used to:
/// - replace the waker on subsequent polls
/// - discard the waker from the wakerset.
/// These tokens cannot be cloned or otherwise duplicated; this helps to ensure
/// that their lifespan are correctly associated with a particular task.
///
/// The WakerSet maintains the notion of the "driving waker". While a window
/// is accumulating, the first waker added becomes the driver and stays the
/// driver until it is discarded, so that loads issued by sibling futures in
/// the same tick don't close the window early. Once the fetch is running,
/// callers use [`set_driver`] to hand the role to whoever polled last. If the
/// driving waker is discarded from the set, another is selected and woken, so
/// that the shared window always has a path forward.
///
/// [`set_driver`]: WakerSet::set_driver
#[derive(Debug)]
pub(crate) struct WakerSet {
    wakers: HashMap<Token, Waker>,
    driving_waker: Option<Token>,

    // Tokens are an ever-increasing integer. We assume that WakerSets are
    // relatively short-lived and that there's no chance of running out of
    // these.
    next_token: NonZeroUsize,
}

impl Default for WakerSet {
    fn default() -> Self {
        Self {
            wakers: HashMap::with_capacity(1),
            next_token: NonZeroUsize::MIN,
            driving_waker: None,
        }
    }
}

impl WakerSet {
    /// Add a new waker to this set and return its token. If the set has no
    /// driving waker, this one becomes the driver.
    #[must_use]
    pub(crate) fn add_waker(&mut self, waker: Waker) -> Token {
        let token = Token(self.next_token);
        self.next_token = self
            .next_token
            .checked_add(1)
            .expect("Overflow when creating token");

        self.wakers.insert(token.duplicate(), waker);
        if self.driving_waker.is_none() {
            self.driving_waker = Some(token.duplicate());
        }
        token
    }

    /// Add or refresh the waker stored under `slot`. The waker is passed by
    /// reference and is set with clone_from because it comes from a Context
    /// and would need to be cloned anyway.
    pub(crate) fn upsert_waker(&mut self, slot: &mut Option<Token>, waker: &Waker) {
        match slot {
            Some(token) => self
                .wakers
                .get_mut(&*token)
                .expect("Attempted to add Waker to WakerSet with an invalid token")
                .clone_from(waker),
            None => *slot = Some(self.add_waker(waker.clone())),
        }
    }

    pub(crate) fn is_driver(&self, token: &Token) -> bool {
        self.driving_waker.as_ref() == Some(token)
    }

    /// Make `token` the driving waker, on the assumption that it has just been
    /// used to poll the shared future.
    pub(crate) fn set_driver(&mut self, token: &Token) {
        self.driving_waker = Some(token.duplicate());
    }

    /// Wake the current driving waker, if any. Used when the window is
    /// closed from outside a poll (the key limit was reached).
    pub(crate) fn wake_driver(&self) {
        if let Some(waker) = self
            .driving_waker
            .as_ref()
            .and_then(|token| self.wakers.get(token))
        {
            waker.wake_by_ref();
        }
    }

    /// Discard a waker from this set. If that waker was the current driving
    /// waker, the current driving waker is unset. This method should only be
    /// used when a future is completed; otherwise, discard_and_wake should
    /// be preferred to ensure that another wake takes this one's place if it
    /// was the driving waker.
    pub(crate) fn discard_waker(&mut self, token: Token) {
        self.wakers.remove(&token);
        if self.driving_waker == Some(token) {
            self.driving_waker = None;
        }
    }

    /// Discard a waker from this set. If that waker was the current driving
    /// waker (or there is currently no driving waker), an arbitrary waker is
    /// made the current driving waker and awoken.
    ///
    /// We create a new driving waker immediately because if a series of drops
    /// happen at the same time we need to ensure that at least one non-dropped
    /// waker is awoken.
    pub(crate) fn discard_and_wake(&mut self, token: Token) {
        self.wakers.remove(&token);
        if self.driving_waker == Some(token) || self.driving_waker.is_none() {
            match self.wakers.iter().next() {
                None => self.driving_waker = None,
                Some((token, waker)) => {
                    self.driving_waker = Some(token.duplicate());
                    waker.wake_by_ref();
                }
            }
        }
    }

    pub(crate) fn wake_all(self) {
        self.wakers
            .into_iter()
            .for_each(|(_token, waker)| waker.wake());
    }
}
