//! Fedloader batches the entity lookups of a federated query gateway. Resolvers
//! ask for one product, user or review at a time; fedloader collects every
//! lookup issued in the same scheduling tick into a single bulk request per
//! upstream service, then hands each resolver the record for its own key.
//! This is the [dataloader pattern](https://github.com/graphql/dataloader)
//! originally created by Facebook, scoped to a single query.
//!
//! ## Overview
//!
//! The unit of batching is the [`Fetcher`]: an upstream bulk read that takes a
//! list of distinct keys and answers with one optional value per key, in the
//! same order. A [`Coordinator`] wraps a fetcher. Each call to
//! [`Coordinator::load`] registers its key immediately and returns a
//! [`LoadFuture`]; all keys registered before the window closes go to the
//! fetcher together.
//!
//! ```
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use fedloader::{Coordinator, FetchError, Fetcher};
//! use futures::{executor, future};
//!
//! struct Squares;
//!
//! #[async_trait]
//! impl Fetcher for Squares {
//!     type Key = u64;
//!     type Value = u64;
//!
//!     fn name(&self) -> &str {
//!         "squares"
//!     }
//!
//!     async fn fetch(&self, keys: &[u64]) -> Result<Vec<Option<u64>>, FetchError> {
//!         Ok(keys.iter().map(|key| Some(key * key)).collect())
//!     }
//! }
//!
//! let squares = Coordinator::new(Arc::new(Squares));
//! let (two, three, again) = executor::block_on(future::join3(
//!     squares.load(2),
//!     squares.load(3),
//!     squares.load(2),
//! ));
//!
//! assert_eq!(two.unwrap(), Some(4));
//! assert_eq!(three.unwrap(), Some(9));
//! assert_eq!(again.unwrap(), Some(4));
//! assert_eq!(squares.calls().get("squares"), 1);
//! ```
//!
//! Duplicate keys are sent once; every future waiting on a key gets its own
//! copy of the value. A key the upstream doesn't know resolves to `Ok(None)`.
//! If the bulk call fails, every future in that window gets the same error.
//! A coordinator remembers the results of its successful windows, so loading a
//! key again later in the same query doesn't go back upstream.
//!
//! Records that are derived from a foreign key, like "the reviews of a
//! product", are built from a [`GroupSource`] wrapped in [`Grouped`] or
//! [`Counted`], and loaded with [`Coordinator::load_group`] and
//! [`Coordinator::load_count`].
//!
//! ## Query scopes
//!
//! Coordinators must never be shared between queries. A [`Gateway`] holds the
//! long-lived [`Upstreams`] and opens a fresh [`QueryScope`] for every query:
//! its own coordinators, its own [`CallCounter`], its own cancellation token
//! and tracing span. The functions in [`resolve`] take the scope explicitly.
//! Dropping a scope cancels whatever it still has outstanding.
//!
//! ```no_run
//! use fedloader::{resolve, Config, Gateway, LoadError};
//!
//! # async fn handle() -> Result<(), LoadError> {
//! let config = Config::from_env().expect("bad configuration");
//! let gateway = Gateway::from_config(&config).expect("bad configuration");
//!
//! let scope = gateway.scope();
//! let products = scope
//!     .run(resolve::products_with_reviews(&scope, ["p1", "p2"]))
//!     .await?;
//! let calls = scope.finish();
//! # Ok(())
//! # }
//! ```
//!
//! ## Design notes
//!
//! ### Poll-driven design
//!
//! All of the asynchronous work in fedloader is driven through polling
//! [`LoadFuture`]. The fetch is not scheduled in any runtime or run in the
//! background; it is driven directly in the foreground by the futures waiting
//! on it.
//!
//! Only a single task needs to drive a window, so only a single task is
//! notified while it accumulates and while the fetch runs. The other futures
//! are woken only when data is available (or when the driving future is
//! dropped, in which case one of them takes over).
//!
//! The default window closes once the driving future has yielded to its
//! executor a single time, so every load issued by sibling futures in the same
//! poll pass lands in the same batch. A fixed delay and a per-window key limit
//! are available through [`BatchPolicy`].
//!
//! When the fetch is complete, every future is notified. The values are not
//! distributed "into" the futures until the futures are polled; each polled
//! future extracts its particular value from the shared results.

mod batch;
mod config;
mod data;
mod diagnostics;
mod error;
mod fetcher;
mod group;
mod model;
pub mod resolve;
mod scope;
mod upstream;
mod wakerset;
mod window;

pub use batch::{Coordinator, LoadFuture};
pub use config::Config;
pub use diagnostics::CallCounter;
pub use error::{ConfigError, FetchError, LoadError, LoadResult};
pub use fetcher::{match_by_key, Fetcher};
pub use group::{count_by, group_by, Counted, GroupSource, Grouped};
pub use model::{Product, Review, User};
pub use scope::{DynFetcher, Gateway, QueryScope, Upstreams};
pub use upstream::{
    ProductFetcher, RestClient, ReviewFetcher, ReviewsByProduct, ReviewsByUser, UserFetcher,
};
pub use window::{BatchPolicy, WindowPolicy};
