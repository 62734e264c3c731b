use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    mem,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll},
};

use futures::{future::BoxFuture, ready, FutureExt};
use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, trace, warn};

use crate::{
    data::{FrozenKeys, KeySet, Token as KeyToken, ValueCache, ValueSet},
    diagnostics::CallCounter,
    error::{LoadError, LoadResult},
    fetcher::Fetcher,
    wakerset::{Token as WakerToken, WakerSet},
    window::{BatchPolicy, Window},
};

struct AccumulatingState<F: Fetcher + ?Sized> {
    keys: KeySet<F::Key>,
    fetcher: Arc<F>,
    calls: Arc<CallCounter>,
    cache: Arc<ValueCache<F::Key, F::Value>>,
    window: Window,
    wakers: WakerSet,
}

impl<F: Fetcher + ?Sized> Debug for AccumulatingState<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccumulatingState")
            .field("keys", &self.keys)
            .field("fetcher", &self.fetcher.name())
            .field("window", &self.window)
            .field("wakers", &self.wakers)
            .finish()
    }
}

// Design notes:
//
// We only need one task to "drive" this future. However, there are two cases
// we need to handle:
// - If a future is dropped, we need to arrange for a different task to
//   continue driving this batch
// - When the batch completes, we need to wake ALL the tasks
struct RunningState<F: Fetcher + ?Sized> {
    fut: BoxFuture<'static, LoadResult<ValueSet<Option<F::Value>>>>,
    wakers: WakerSet,
    dropped_tokens: Vec<KeyToken>,
}

enum State<F: Fetcher + ?Sized> {
    Accum(AccumulatingState<F>),
    Running(RunningState<F>),
    Done(LoadResult<ValueSet<Option<F::Value>>>),
}

/// Collects single-key loads into batch windows and dispatches each window to
/// its [`Fetcher`] in one call.
///
/// A coordinator belongs to one query. Every load issued through it shares
/// the same [`CallCounter`] and [`CancellationToken`]; once the token is
/// cancelled, outstanding loads resolve to [`LoadError::Cancelled`] and no
/// further windows are dispatched.
///
/// Results of successful windows are cached for the lifetime of the
/// coordinator, so a key is fetched at most once per query unless its window
/// failed.
pub struct Coordinator<F: Fetcher + ?Sized> {
    fetcher: Arc<F>,
    policy: BatchPolicy,
    calls: Arc<CallCounter>,
    cancel: CancellationToken,
    cache: Arc<ValueCache<F::Key, F::Value>>,
    state: Mutex<Weak<Mutex<State<F>>>>,
}

impl<F: Fetcher + ?Sized> Debug for Coordinator<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("fetcher", &self.fetcher.name())
            .field("policy", &self.policy)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl<F: Fetcher + ?Sized> Coordinator<F> {
    /// A coordinator with a tick window, its own call counter, and a
    /// cancellation token nobody else holds.
    pub fn new(fetcher: Arc<F>) -> Self {
        Self::with_scope(
            fetcher,
            BatchPolicy::default(),
            Arc::new(CallCounter::new()),
            CancellationToken::new(),
        )
    }

    /// A coordinator attached to an existing query scope.
    pub fn with_scope(
        fetcher: Arc<F>,
        policy: BatchPolicy,
        calls: Arc<CallCounter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            policy,
            calls,
            cancel,
            cache: Arc::new(ValueCache::new()),
            state: Mutex::new(Weak::new()),
        }
    }

    pub fn with_policy(self, policy: BatchPolicy) -> Self {
        Self { policy, ..self }
    }

    pub fn calls(&self) -> &CallCounter {
        &self.calls
    }

    /// Request the value for `key`. The key joins the currently open window
    /// (or opens a new one) immediately; the returned future resolves once
    /// that window has been fetched. A key already fetched by this
    /// coordinator is answered from the cache without opening a window.
    pub fn load(&self, key: F::Key) -> LoadFuture<F> {
        if let Some(value) = self.cache.get(&key) {
            trace!(upstream = self.fetcher.name(), ?key, "answered from query cache");
            return LoadFuture::ready(value, &self.cancel);
        }

        let mut guard = self.state.lock();

        // If there is an existing state, and it's still accumulating, add the
        // key to it. We don't check the window here; if it has already
        // closed, the next poll of the driver will dispatch it.
        if let Some(state_handle) = guard.upgrade() {
            let mut state_guard = state_handle.lock();
            if let State::Accum(ref mut state) = *state_guard {
                let key_token = state.keys.add_key(key);

                // If we've hit the key limit, close the window so that the
                // batch is issued on the driver's next poll, then detach the
                // shared state from the coordinator.
                match self.policy.max_keys {
                    Some(max_keys) if state.keys.len() >= max_keys.get() => {
                        trace!(upstream = self.fetcher.name(), "window reached key limit");
                        state.window.close();
                        state.wakers.wake_driver();
                        drop(state_guard);
                        *guard = Weak::new();
                    }
                    _ => drop(state_guard),
                }

                return LoadFuture::new(key_token, state_handle, &self.cancel);
            }
        }

        let mut keys = KeySet::new();
        let key_token = keys.add_key(key);
        let window = self.policy.open();
        let detached = window.is_closed();

        trace!(upstream = self.fetcher.name(), "opening batch window");
        let state = Arc::new(Mutex::new(State::Accum(AccumulatingState {
            keys,
            fetcher: Arc::clone(&self.fetcher),
            calls: Arc::clone(&self.calls),
            cache: Arc::clone(&self.cache),
            window,
            wakers: WakerSet::default(),
        })));

        *guard = if detached {
            Weak::new()
        } else {
            Arc::downgrade(&state)
        };

        LoadFuture::new(key_token, state, &self.cancel)
    }
}

fn dispatch<F: Fetcher + ?Sized>(
    fetcher: Arc<F>,
    calls: Arc<CallCounter>,
    cache: Arc<ValueCache<F::Key, F::Value>>,
    keys: FrozenKeys<F::Key>,
) -> BoxFuture<'static, LoadResult<ValueSet<Option<F::Value>>>> {
    async move {
        if keys.is_empty() {
            return keys.into_values(Vec::new());
        }

        calls.increment(fetcher.name());
        debug!(upstream = fetcher.name(), keys = keys.len(), "dispatching batch");

        let fetched = fetcher.fetch(keys.keys()).await;
        let result = fetched.map_err(LoadError::from).and_then(|values| {
            if values.len() == keys.len() {
                cache.fill(keys.keys(), &values);
            }
            keys.into_values(values)
        });

        if let Err(err) = &result {
            warn!(upstream = fetcher.name(), error = %err, "batch failed");
        }
        result
    }
    .boxed()
}

/// A pending load of a single key. Resolves to `Ok(Some(value))`, `Ok(None)`
/// if the upstream doesn't know the key, or the error that failed the whole
/// window.
// Invariant: while `state` is Some, the key behind `key_token` has been added
// to that state.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct LoadFuture<F: Fetcher + ?Sized> {
    key_token: Option<KeyToken>,
    waker_token: Option<WakerToken>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    state: Option<Arc<Mutex<State<F>>>>,
}

impl<F: Fetcher + ?Sized> LoadFuture<F> {
    fn new(key_token: KeyToken, state: Arc<Mutex<State<F>>>, cancel: &CancellationToken) -> Self {
        Self {
            key_token: Some(key_token),
            waker_token: None,
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
            state: Some(state),
        }
    }

    /// A future that is already resolved to `value`, apart from
    /// cancellation.
    fn ready(value: Option<F::Value>, cancel: &CancellationToken) -> Self {
        let (key_token, values) = ValueSet::single(value);
        Self::new(
            key_token,
            Arc::new(Mutex::new(State::Done(Ok(values)))),
            cancel,
        )
    }

    /// Deregister from the shared state, handing the driver role to another
    /// future if we held it.
    fn detach(&mut self) {
        let state = match self.state.take() {
            Some(state) => state,
            None => return,
        };
        let mut guard = state.lock();

        match *guard {
            State::Accum(ref mut state) => {
                if let Some(key_token) = self.key_token.take() {
                    state.keys.discard_token(key_token);
                }

                if let Some(waker_token) = self.waker_token.take() {
                    state.wakers.discard_and_wake(waker_token);
                }
            }
            State::Running(ref mut state) => {
                if let Some(waker_token) = self.waker_token.take() {
                    state.wakers.discard_and_wake(waker_token);
                }

                // We're in the running state, which means that the keys are
                // frozen (owned by the executing future). Add our token to
                // the list of dropped tokens so that it can be discarded from
                // the ValueSet when it's ready.
                if let Some(key_token) = self.key_token.take() {
                    state.dropped_tokens.push(key_token)
                }
            }
            State::Done(Ok(ref mut values)) => {
                if let Some(key_token) = self.key_token.take() {
                    values.discard(key_token);
                }
            }
            State::Done(Err(..)) => {}
        }
    }
}

impl<F: Fetcher + ?Sized> Future for LoadFuture<F> {
    type Output = LoadResult<Option<F::Value>>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = Pin::into_inner(self);

        if this.cancelled.as_mut().poll(ctx).is_ready() {
            this.detach();
            return Poll::Ready(Err(LoadError::Cancelled));
        }

        let mut guard = this
            .state
            .as_ref()
            .expect("Can't re-poll a completed LoadFuture")
            .lock();

        if let State::Accum(ref mut state) = *guard {
            state.wakers.upsert_waker(&mut this.waker_token, ctx.waker());

            // Only the driver advances the window. Everyone else waits to be
            // woken when the results are in (or when the driver goes away).
            let driving = this
                .waker_token
                .as_ref()
                .map_or(false, |token| state.wakers.is_driver(token));
            if !driving {
                return Poll::Pending;
            }

            ready!(state.window.poll_unpin(ctx));

            // Window is closed. Transition to the Running state.
            let wakers = mem::take(&mut state.wakers);
            let keys = state.keys.freeze();
            let fut = dispatch(
                Arc::clone(&state.fetcher),
                Arc::clone(&state.calls),
                Arc::clone(&state.cache),
                keys,
            );

            *guard = State::Running(RunningState {
                fut,
                wakers,
                dropped_tokens: Vec::new(),
            });
        }

        if let State::Running(ref mut state) = *guard {
            state.wakers.upsert_waker(&mut this.waker_token, ctx.waker());
            if let Some(token) = this.waker_token.as_ref() {
                state.wakers.set_driver(token);
            }

            let mut result = ready!(state.fut.poll_unpin(ctx));

            // Some futures may have lost interest while we were in the Running
            // state. Remove those tokens from the ValueSet.
            let dropped_tokens = mem::take(&mut state.dropped_tokens);
            if let Ok(values) = &mut result {
                dropped_tokens
                    .into_iter()
                    .for_each(|token| values.discard(token));
            }

            // Now that we have a result, signal all the waiting futures to
            // wake up so they can get their results.
            let mut all_wakers = mem::take(&mut state.wakers);
            if let Some(waker_token) = this.waker_token.take() {
                // We're about to grab our result, so we don't need to wake
                // ourself
                all_wakers.discard_waker(waker_token);
            }

            all_wakers.wake_all();

            *guard = State::Done(result);
        }

        let output = match *guard {
            State::Done(Ok(ref mut values)) => {
                let token = this
                    .key_token
                    .take()
                    .expect("LoadFuture lost its key token");
                match values.take(token) {
                    Some(value) => Ok(value),
                    None => unreachable!("no value in ValueSet associated with Token"),
                }
            }
            State::Done(Err(ref err)) => Err(err.clone()),
            _ => unreachable!("LoadFuture contained invalid state"),
        };

        drop(guard);
        this.state = None;
        Poll::Ready(output)
    }
}

impl<F: Fetcher + ?Sized> Drop for LoadFuture<F> {
    fn drop(&mut self) {
        // The shared window is only ever driven by a single future, so if
        // that was us another task has to be woken to take over. detach
        // takes care of that through the WakerSet.
        self.detach();
    }
}

impl<F: Fetcher + ?Sized> Debug for LoadFuture<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadFuture")
            .field("pending", &self.state.is_some())
            .finish()
    }
}
