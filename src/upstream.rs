//! HTTP fetchers for the products, users and reviews services.
//!
//! Every service exposes a bulk read of the form
//! `GET /{collection}?{param}=id1,id2,...` answering with a JSON array of the
//! matching records. Ids the service doesn't know are simply missing from the
//! array.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    error::{ConfigError, FetchError},
    fetcher::{match_by_key, Fetcher},
    group::GroupSource,
    model::{Product, Review, User},
};

/// Thin client for one upstream service.
#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    client: reqwest::Client,
}

impl RestClient {
    /// Creates a client targeting `base_url`. `timeout` bounds every bulk
    /// call.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        let base_url = base_url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient {
                base_url: base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self::with_client(base_url, client))
    }

    /// Creates a client sharing an existing connection pool.
    #[must_use]
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `GET {base}{path}?{param}=ids` in a single request.
    ///
    /// Ids that can't be expressed in a comma-separated list (empty, or
    /// containing a comma) are left out of the request, so they never match a
    /// record. If no id is left, no request is made.
    pub async fn get_many<T: DeserializeOwned>(
        &self,
        path: &str,
        param: &str,
        ids: &[String],
    ) -> Result<Vec<T>, FetchError> {
        let sendable: Vec<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| is_sendable(id))
            .collect();

        let url = self.url(path);
        if sendable.len() < ids.len() {
            debug!(%url, skipped = ids.len() - sendable.len(), "ids not sendable upstream");
        }
        if sendable.is_empty() {
            return Ok(Vec::new());
        }

        debug!(%url, param, ids = sendable.len(), "bulk upstream read");

        let response = self
            .client
            .get(&url)
            .query(&[(param, sendable.join(","))])
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| FetchError::Decode {
                url,
                message: e.to_string(),
            })
    }
}

fn is_sendable(id: &str) -> bool {
    !id.is_empty() && !id.contains(',')
}

/// `GET /products?ids=`
#[derive(Debug, Clone)]
pub struct ProductFetcher {
    client: RestClient,
}

impl ProductFetcher {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ProductFetcher {
    type Key = String;
    type Value = Product;

    fn name(&self) -> &str {
        "/products?ids"
    }

    async fn fetch(&self, keys: &[String]) -> Result<Vec<Option<Product>>, FetchError> {
        let products = self.client.get_many("/products", "ids", keys).await?;
        Ok(match_by_key(keys, products, |product: &Product| &product.id))
    }
}

/// `GET /users?ids=`
#[derive(Debug, Clone)]
pub struct UserFetcher {
    client: RestClient,
}

impl UserFetcher {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for UserFetcher {
    type Key = String;
    type Value = User;

    fn name(&self) -> &str {
        "/users?ids"
    }

    async fn fetch(&self, keys: &[String]) -> Result<Vec<Option<User>>, FetchError> {
        let users = self.client.get_many("/users", "ids", keys).await?;
        Ok(match_by_key(keys, users, |user: &User| &user.id))
    }
}

/// `GET /reviews?ids=`
#[derive(Debug, Clone)]
pub struct ReviewFetcher {
    client: RestClient,
}

impl ReviewFetcher {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ReviewFetcher {
    type Key = String;
    type Value = Review;

    fn name(&self) -> &str {
        "/reviews?ids"
    }

    async fn fetch(&self, keys: &[String]) -> Result<Vec<Option<Review>>, FetchError> {
        let reviews = self.client.get_many("/reviews", "ids", keys).await?;
        Ok(match_by_key(keys, reviews, |review: &Review| &review.id))
    }
}

/// `GET /reviews?productIds=`, grouped by product.
#[derive(Debug, Clone)]
pub struct ReviewsByProduct {
    client: RestClient,
}

impl ReviewsByProduct {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GroupSource for ReviewsByProduct {
    type Key = String;
    type Record = Review;

    fn name(&self) -> &str {
        "/reviews?productIds"
    }

    fn group_key<'r>(&self, review: &'r Review) -> &'r String {
        &review.product_id
    }

    async fn fetch_related(&self, keys: &[String]) -> Result<Vec<Review>, FetchError> {
        self.client.get_many("/reviews", "productIds", keys).await
    }
}

/// `GET /reviews?userIds=`, grouped by author.
#[derive(Debug, Clone)]
pub struct ReviewsByUser {
    client: RestClient,
}

impl ReviewsByUser {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GroupSource for ReviewsByUser {
    type Key = String;
    type Record = Review;

    fn name(&self) -> &str {
        "/reviews?userIds"
    }

    fn group_key<'r>(&self, review: &'r Review) -> &'r String {
        &review.user_id
    }

    async fn fetch_related(&self, keys: &[String]) -> Result<Vec<Review>, FetchError> {
        self.client.get_many("/reviews", "userIds", keys).await
    }
}
