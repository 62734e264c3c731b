//! Batch window policies: when an accumulating window closes and its keys are
//! handed to the fetcher.

use std::{
    future::Future,
    num::NonZeroUsize,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::FutureExt;
use futures_timer::Delay;
use serde::{Deserialize, Serialize};

/// How long a window stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Close the window once the driving future has yielded to the executor a
    /// single time. Every load issued before the driver is polled again joins
    /// the window.
    #[default]
    Tick,

    /// Close the window a fixed delay after it opens.
    Delay { millis: u64 },
}

/// Rules for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPolicy {
    pub window: WindowPolicy,

    /// If set, a window is dispatched as soon as it holds this many distinct
    /// keys, regardless of `window`.
    pub max_keys: Option<NonZeroUsize>,
}

impl BatchPolicy {
    /// A policy with a tick window and no key limit.
    pub fn tick() -> Self {
        Self::default()
    }

    pub fn delay(window: Duration) -> Self {
        Self {
            window: WindowPolicy::Delay {
                millis: window.as_millis().try_into().unwrap_or(u64::MAX),
            },
            max_keys: None,
        }
    }

    pub fn with_max_keys(self, max_keys: NonZeroUsize) -> Self {
        Self {
            max_keys: Some(max_keys),
            ..self
        }
    }

    pub(crate) fn open(&self) -> Window {
        match self.max_keys {
            Some(max_keys) if max_keys.get() <= 1 => Window::Closed,
            _ => match self.window {
                WindowPolicy::Tick => Window::Tick { yielded: false },
                WindowPolicy::Delay { millis } => {
                    Window::Delay(Delay::new(Duration::from_millis(millis)))
                }
            },
        }
    }
}

/// The live timer of one accumulating window.
#[derive(Debug)]
pub(crate) enum Window {
    Tick { yielded: bool },
    Delay(Delay),
    Closed,
}

impl Window {
    pub(crate) fn close(&mut self) {
        *self = Window::Closed;
    }

    pub(crate) fn is_closed(&self) -> bool {
        matches!(self, Window::Closed)
    }
}

impl Future for Window {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<()> {
        match self.get_mut() {
            Window::Tick { yielded: true } | Window::Closed => Poll::Ready(()),
            Window::Tick { yielded } => {
                *yielded = true;
                ctx.waker().wake_by_ref();
                Poll::Pending
            }
            Window::Delay(delay) => delay.poll_unpin(ctx),
        }
    }
}
