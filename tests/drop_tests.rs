//! These tests ensure that dropped futures correctly update the shared state

mod common;

use async_trait::async_trait;
use common::Skipper;
use cooked_waker::{IntoWaker, ViaRawPointer, Wake, WakeRef};
use fedloader::{BatchPolicy, Coordinator, FetchError, Fetcher};
use futures::executor;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

/// A Waker that does nothing. Used for when we're manually calling poll.
#[derive(Debug, Default, Copy, Clone)]
struct NoOpWaker;

impl ViaRawPointer for NoOpWaker {
    type Target = ();

    fn into_raw(self) -> *mut () {
        std::ptr::null_mut()
    }

    unsafe fn from_raw(_ptr: *mut ()) -> Self {
        NoOpWaker
    }
}

impl WakeRef for NoOpWaker {
    fn wake_by_ref(&self) {}
}

impl Wake for NoOpWaker {
    fn wake(self) {}
}

/// Hands out clones of a stored `Arc` for every key, so that the strong
/// counts show where the values ended up. Takes `skips` extra polls to
/// answer.
struct SharedValues {
    values: HashMap<i32, Arc<i32>>,
    skips: usize,
    calls: Mutex<Vec<Vec<i32>>>,
}

impl SharedValues {
    fn new(keys: impl IntoIterator<Item = i32>, skips: usize) -> Self {
        Self {
            values: keys.into_iter().map(|key| (key, Arc::new(key))).collect(),
            skips,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn strong_count(&self, key: i32) -> usize {
        Arc::strong_count(&self.values[&key])
    }

    fn calls(&self) -> Vec<Vec<i32>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Fetcher for SharedValues {
    type Key = i32;
    type Value = Arc<i32>;

    fn name(&self) -> &str {
        "shared"
    }

    async fn fetch(&self, keys: &[i32]) -> Result<Vec<Option<Arc<i32>>>, FetchError> {
        self.calls.lock().push(keys.to_vec());
        Skipper::new(self.skips).await;
        Ok(keys.iter().map(|key| self.values.get(key).cloned()).collect())
    }
}

/// This test establishes a baseline behavior for our clone counters
#[test]
fn test_simple_drop_after_resolution() {
    let coordinator = Coordinator::new(Arc::new(SharedValues::new([1], 0)));

    let fut1 = coordinator.load(1);
    let fut2 = coordinator.load(1);
    let fut3 = coordinator.load(1);
    let fut4 = coordinator.load(1);

    let res1 = executor::block_on(fut1).unwrap().unwrap();

    // At this point, the fetcher, the coordinator's cache, the shared result
    // and our local fut1 result should all have an Arc
    assert_eq!(Arc::strong_count(&res1), 4);

    // Resolving fut2 simply clones the underlying Arc
    let res2 = executor::block_on(fut2).unwrap().unwrap();
    assert_eq!(Arc::strong_count(&res2), 5);

    // Dropping this future shouldn't change anything
    drop(fut3);
    assert_eq!(Arc::strong_count(&res1), 5);

    // However, dropping our last remaining handle to the state should cause
    // the shared result to be dropped
    drop(fut4);
    assert_eq!(Arc::strong_count(&res1), 4);

    // The cache keeps its copy until the coordinator goes away
    drop(coordinator);
    assert_eq!(Arc::strong_count(&res1), 3);
}

#[test]
fn test_drop_during_delay() {
    let fetcher = Arc::new(SharedValues::new([1, 2, 3], 0));
    let coordinator =
        Coordinator::new(Arc::clone(&fetcher)).with_policy(BatchPolicy::delay(Duration::from_millis(10)));

    let waker = NoOpWaker;
    let waker = waker.into_waker();
    let mut ctx = Context::from_waker(&waker);

    let mut fut1 = coordinator.load(1);
    let fut11 = coordinator.load(1);
    let fut2 = coordinator.load(2);
    let fut3 = coordinator.load(3);

    // This poll initiates the delay. We'll drop futures in this phase, then
    // confirm that the dropped keys weren't in the batched set.
    let poll = Pin::new(&mut fut1).poll(&mut ctx);
    assert_eq!(poll, Poll::Pending);

    drop(fut11);
    drop(fut3);

    let result = executor::block_on(fut1).unwrap().unwrap();
    assert_eq!(*result, 1);

    let result = executor::block_on(fut2).unwrap().unwrap();
    assert_eq!(*result, 2);

    // Key 1 is still wanted by fut1; key 3 is gone entirely.
    assert_eq!(fetcher.calls(), vec![vec![1, 2]]);
}

#[test]
fn test_drop_while_fetching() {
    let fetcher = Arc::new(SharedValues::new([1, 2], 1));
    let coordinator = Coordinator::new(Arc::clone(&fetcher));

    let waker = NoOpWaker;
    let waker = waker.into_waker();
    let mut ctx = Context::from_waker(&waker);

    let mut fut1 = coordinator.load(1);
    let fut2 = coordinator.load(2);

    // The first poll yields the tick; the second dispatches the window and
    // starts the fetch, which skips once.
    assert_eq!(Pin::new(&mut fut1).poll(&mut ctx), Poll::Pending);
    assert_eq!(Pin::new(&mut fut1).poll(&mut ctx), Poll::Pending);
    assert_eq!(fetcher.calls(), vec![vec![1, 2]]);

    drop(fut2);

    let result = match Pin::new(&mut fut1).poll(&mut ctx) {
        Poll::Ready(result) => result.unwrap().unwrap(),
        Poll::Pending => panic!("fetch should have completed"),
    };
    assert_eq!(*result, 1);

    // Nobody wanted key 2 any more, so the window released its value as soon
    // as the results came in. Only the coordinator's cache still holds it.
    assert_eq!(fetcher.strong_count(2), 2);
    drop(coordinator);
    assert_eq!(fetcher.strong_count(2), 1);
}

#[test]
fn dropping_every_future_abandons_the_window() {
    let fetcher = Arc::new(SharedValues::new([1], 0));
    let coordinator = Coordinator::new(Arc::clone(&fetcher));

    let waker = NoOpWaker;
    let waker = waker.into_waker();
    let mut ctx = Context::from_waker(&waker);

    let mut fut1 = coordinator.load(1);
    assert_eq!(Pin::new(&mut fut1).poll(&mut ctx), Poll::Pending);
    drop(fut1);

    // The abandoned window is gone; a new load opens a fresh one.
    let result = executor::block_on(coordinator.load(1)).unwrap().unwrap();
    assert_eq!(*result, 1);
    assert_eq!(fetcher.calls(), vec![vec![1]]);
}
