//! Query scopes: the per-query home of every coordinator.
//!
//! A [`Gateway`] is created once per process and holds the shared upstream
//! fetchers. Each incoming query gets its own [`QueryScope`] from
//! [`Gateway::scope`], which owns fresh coordinators, a fresh call counter and
//! a cancellation token. Resolvers receive the scope by reference; nothing is
//! looked up ambiently, and nothing outlives the query.

use std::{
    collections::BTreeMap,
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::{self, Either};
use futures_timer::Delay;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument, Span};

use crate::{
    batch::{Coordinator, LoadFuture},
    config::Config,
    diagnostics::CallCounter,
    error::{ConfigError, LoadError, LoadResult},
    fetcher::Fetcher,
    group::{Counted, Grouped},
    model::{Product, Review, User},
    upstream::{
        ProductFetcher, RestClient, ReviewFetcher, ReviewsByProduct, ReviewsByUser, UserFetcher,
    },
    window::BatchPolicy,
};

/// A fetcher keyed by entity id.
pub type DynFetcher<V> = dyn Fetcher<Key = String, Value = V>;

/// The fetcher behind every accessor of a [`QueryScope`].
#[derive(Clone)]
pub struct Upstreams {
    pub products: Arc<DynFetcher<Product>>,
    pub users: Arc<DynFetcher<User>>,
    pub reviews: Arc<DynFetcher<Review>>,
    pub product_reviews: Arc<DynFetcher<Vec<Review>>>,
    pub user_review_counts: Arc<DynFetcher<usize>>,
}

impl Upstreams {
    /// HTTP fetchers for the services named in `config`. Each service gets
    /// one client, shared by all of its fetchers.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let timeout = config.request_timeout();
        let products = RestClient::new(&config.products_url, timeout)?;
        let users = RestClient::new(&config.users_url, timeout)?;
        let reviews = RestClient::new(&config.reviews_url, timeout)?;

        Ok(Self {
            products: Arc::new(ProductFetcher::new(products)),
            users: Arc::new(UserFetcher::new(users)),
            reviews: Arc::new(ReviewFetcher::new(reviews.clone())),
            product_reviews: Arc::new(Grouped(ReviewsByProduct::new(reviews.clone()))),
            user_review_counts: Arc::new(Counted(ReviewsByUser::new(reviews))),
        })
    }
}

impl Debug for Upstreams {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstreams")
            .field("products", &self.products.name())
            .field("users", &self.users.name())
            .field("reviews", &self.reviews.name())
            .field("product_reviews", &self.product_reviews.name())
            .field("user_review_counts", &self.user_review_counts.name())
            .finish()
    }
}

/// Long-lived entry point; hands out one [`QueryScope`] per query.
#[derive(Debug)]
pub struct Gateway {
    upstreams: Upstreams,
    policy: BatchPolicy,
    deadline: Option<Duration>,
    next_query: AtomicU64,
}

impl Gateway {
    pub fn new(upstreams: Upstreams) -> Self {
        Self {
            upstreams,
            policy: BatchPolicy::default(),
            deadline: None,
            next_query: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(Upstreams::from_config(config)?)
            .with_policy(config.batch)
            .with_deadline(config.query_deadline()))
    }

    pub fn with_policy(self, policy: BatchPolicy) -> Self {
        Self { policy, ..self }
    }

    pub fn with_deadline(self, deadline: Option<Duration>) -> Self {
        Self { deadline, ..self }
    }

    /// Open the scope for a new query.
    pub fn scope(&self) -> QueryScope {
        let id = self.next_query.fetch_add(1, Ordering::Relaxed);
        QueryScope::new(id, &self.upstreams, self.policy, self.deadline)
    }
}

/// Everything one query shares between its resolvers.
///
/// Dropping the scope cancels it: loads still outstanding resolve to
/// [`LoadError::Cancelled`] and their windows are never dispatched.
pub struct QueryScope {
    id: u64,
    products: Coordinator<DynFetcher<Product>>,
    users: Coordinator<DynFetcher<User>>,
    reviews: Coordinator<DynFetcher<Review>>,
    product_reviews: Coordinator<DynFetcher<Vec<Review>>>,
    user_review_counts: Coordinator<DynFetcher<usize>>,
    calls: Arc<CallCounter>,
    cancel: CancellationToken,
    deadline: Option<Duration>,
    span: Span,
}

impl QueryScope {
    pub fn new(
        id: u64,
        upstreams: &Upstreams,
        policy: BatchPolicy,
        deadline: Option<Duration>,
    ) -> Self {
        let calls = Arc::new(CallCounter::new());
        let cancel = CancellationToken::new();

        Self {
            id,
            products: coordinator(&upstreams.products, policy, &calls, &cancel),
            users: coordinator(&upstreams.users, policy, &calls, &cancel),
            reviews: coordinator(&upstreams.reviews, policy, &calls, &cancel),
            product_reviews: coordinator(&upstreams.product_reviews, policy, &calls, &cancel),
            user_review_counts: coordinator(&upstreams.user_review_counts, policy, &calls, &cancel),
            calls,
            cancel,
            deadline,
            span: info_span!("query", id),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn product(&self, id: impl Into<String>) -> LoadFuture<DynFetcher<Product>> {
        self.products.load(id.into())
    }

    pub fn user(&self, id: impl Into<String>) -> LoadFuture<DynFetcher<User>> {
        self.users.load(id.into())
    }

    pub fn review(&self, id: impl Into<String>) -> LoadFuture<DynFetcher<Review>> {
        self.reviews.load(id.into())
    }

    /// Every review of a product; empty if it has none.
    pub fn product_reviews(
        &self,
        product_id: impl Into<String>,
    ) -> impl Future<Output = LoadResult<Vec<Review>>> + Send {
        self.product_reviews.load_group(product_id.into())
    }

    /// How many reviews a user wrote; zero if none.
    pub fn user_review_count(
        &self,
        user_id: impl Into<String>,
    ) -> impl Future<Output = LoadResult<usize>> + Send {
        self.user_review_counts.load_count(user_id.into())
    }

    pub fn calls(&self) -> &CallCounter {
        &self.calls
    }

    /// Resolve every outstanding load of this query with
    /// [`LoadError::Cancelled`]; nothing further is dispatched.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A handle that cancels this scope, for use from another task.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive a resolution future for this query: inside the query's tracing
    /// span, and bounded by the query deadline if there is one. When the
    /// deadline passes, the scope is cancelled and
    /// [`LoadError::DeadlineExceeded`] is returned.
    pub async fn run<T, Fut>(&self, resolution: Fut) -> LoadResult<T>
    where
        Fut: Future<Output = LoadResult<T>>,
    {
        let resolution = resolution.instrument(self.span.clone());

        let deadline = match self.deadline {
            None => return resolution.await,
            Some(deadline) => deadline,
        };

        match future::select(pin!(resolution), Delay::new(deadline)).await {
            Either::Left((output, _)) => output,
            Either::Right(((), _)) => {
                let millis = deadline.as_millis().try_into().unwrap_or(u64::MAX);
                self.span.in_scope(|| warn!(millis, "query deadline exceeded"));
                self.cancel();
                Err(LoadError::DeadlineExceeded { millis })
            }
        }
    }

    /// End the query: cancel anything still outstanding and report how many
    /// upstream calls it made.
    pub fn finish(self) -> BTreeMap<String, usize> {
        self.cancel();
        self.span.in_scope(|| self.calls.report())
    }
}

impl Drop for QueryScope {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Debug for QueryScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryScope")
            .field("id", &self.id)
            .field("calls", &self.calls)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

fn coordinator<V: Clone + Send + Sync + 'static>(
    fetcher: &Arc<DynFetcher<V>>,
    policy: BatchPolicy,
    calls: &Arc<CallCounter>,
    cancel: &CancellationToken,
) -> Coordinator<DynFetcher<V>> {
    Coordinator::with_scope(
        Arc::clone(fetcher),
        policy,
        Arc::clone(calls),
        cancel.clone(),
    )
}
