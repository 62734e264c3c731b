//! In-memory upstreams shared by the integration tests.

#![allow(dead_code)]

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use fedloader::{
    match_by_key, Counted, FetchError, Fetcher, GroupSource, Grouped, Product, Review, Upstreams,
    User,
};
use parking_lot::Mutex;

/// A future that returns pending the first N times it is polled, then
/// returns Ready. It wakes itself every time it is pending, so it can be used
/// to simulate an upstream call that takes a few polls to complete.
#[derive(Debug, Clone)]
pub struct Skipper {
    remaining_skips: usize,
}

impl Skipper {
    pub fn new(count: usize) -> Self {
        Skipper {
            remaining_skips: count,
        }
    }
}

impl Future for Skipper {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match &mut self.get_mut().remaining_skips {
            0 => Poll::Ready(()),
            skips => {
                *skips -= 1;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }
}

/// Every key list a fake upstream was called with.
#[derive(Debug, Clone, Default)]
pub struct Requests(Arc<Mutex<Vec<Vec<String>>>>);

impl Requests {
    pub fn record(&self, keys: &[String]) {
        self.0.lock().push(keys.to_vec());
    }

    pub fn all(&self) -> Vec<Vec<String>> {
        self.0.lock().clone()
    }
}

/// A fetcher over an in-memory table.
pub struct Table<V> {
    name: &'static str,
    rows: Vec<V>,
    key_of: fn(&V) -> &String,
    failure: Mutex<Option<FetchError>>,
    pub requests: Requests,
}

impl<V> Table<V> {
    pub fn new(name: &'static str, rows: Vec<V>, key_of: fn(&V) -> &String) -> Self {
        Self {
            name,
            rows,
            key_of,
            failure: Mutex::new(None),
            requests: Requests::default(),
        }
    }

    /// Fail every subsequent call with `error`.
    pub fn fail_with(&self, error: FetchError) {
        *self.failure.lock() = Some(error);
    }

    /// Answer from the table again.
    pub fn recover(&self) {
        *self.failure.lock() = None;
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> Fetcher for Table<V> {
    type Key = String;
    type Value = V;

    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, keys: &[String]) -> Result<Vec<Option<V>>, FetchError> {
        self.requests.record(keys);

        let failure = self.failure.lock().clone();
        match failure {
            Some(error) => Err(error),
            None => Ok(match_by_key(keys, self.rows.clone(), self.key_of)),
        }
    }
}

/// Reviews filtered by one of their foreign keys.
#[derive(Clone)]
pub struct ReviewIndex {
    name: &'static str,
    reviews: Vec<Review>,
    key_of: fn(&Review) -> &String,
    pub requests: Requests,
}

#[async_trait]
impl GroupSource for ReviewIndex {
    type Key = String;
    type Record = Review;

    fn name(&self) -> &str {
        self.name
    }

    fn group_key<'r>(&self, review: &'r Review) -> &'r String {
        (self.key_of)(review)
    }

    async fn fetch_related(&self, keys: &[String]) -> Result<Vec<Review>, FetchError> {
        self.requests.record(keys);

        Ok(self
            .reviews
            .iter()
            .filter(|review| keys.contains((self.key_of)(review)))
            .cloned()
            .collect())
    }
}

fn product_id(product: &Product) -> &String {
    &product.id
}

fn user_id(user: &User) -> &String {
    &user.id
}

fn review_id(review: &Review) -> &String {
    &review.id
}

fn review_product(review: &Review) -> &String {
    &review.product_id
}

fn review_author(review: &Review) -> &String {
    &review.user_id
}

pub fn product(id: &str, name: &str, price: i64) -> Product {
    Product {
        id: id.to_owned(),
        name: name.to_owned(),
        price,
    }
}

pub fn user(id: &str, username: &str) -> User {
    User {
        id: id.to_owned(),
        username: username.to_owned(),
    }
}

pub fn review(id: &str, product_id: &str, user_id: &str, rating: i32) -> Review {
    Review {
        id: id.to_owned(),
        product_id: product_id.to_owned(),
        user_id: user_id.to_owned(),
        body: format!("review {id}"),
        rating,
        created_at: "2024-03-01T12:00:00Z".to_owned(),
    }
}

/// A small catalogue:
///
/// - `p1` has reviews `rev1` (by `u1`) and `rev2` (by `u3`)
/// - `p2` has `rev3` (by `u1`)
/// - `p3` has `rev4` (by the unknown `u404`) and `rev5` (by `u1`)
/// - `u1` wrote three reviews, `u2` none
pub struct Fixture {
    pub products: Arc<Table<Product>>,
    pub users: Arc<Table<User>>,
    pub reviews: Arc<Table<Review>>,
    pub reviews_by_product: ReviewIndex,
    pub reviews_by_user: ReviewIndex,
}

impl Fixture {
    pub fn new() -> Self {
        let reviews = vec![
            review("rev1", "p1", "u1", 5),
            review("rev2", "p1", "u3", 3),
            review("rev3", "p2", "u1", 4),
            review("rev4", "p3", "u404", 1),
            review("rev5", "p3", "u1", 2),
        ];

        Self {
            products: Arc::new(Table::new(
                "/products?ids",
                vec![
                    product("p1", "Table", 100),
                    product("p2", "Chair", 40),
                    product("p3", "Lamp", 25),
                ],
                product_id,
            )),
            users: Arc::new(Table::new(
                "/users?ids",
                vec![user("u1", "alice"), user("u2", "bob"), user("u3", "carol")],
                user_id,
            )),
            reviews: Arc::new(Table::new("/reviews?ids", reviews.clone(), review_id)),
            reviews_by_product: ReviewIndex {
                name: "/reviews?productIds",
                reviews: reviews.clone(),
                key_of: review_product,
                requests: Requests::default(),
            },
            reviews_by_user: ReviewIndex {
                name: "/reviews?userIds",
                reviews,
                key_of: review_author,
                requests: Requests::default(),
            },
        }
    }

    pub fn upstreams(&self) -> Upstreams {
        Upstreams {
            products: self.products.clone(),
            users: self.users.clone(),
            reviews: self.reviews.clone(),
            product_reviews: Arc::new(Grouped(self.reviews_by_product.clone())),
            user_review_counts: Arc::new(Counted(self.reviews_by_user.clone())),
        }
    }
}
