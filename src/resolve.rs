//! Entity resolvers that stitch records from different services together.
//!
//! Each resolver takes the [`QueryScope`] of the query it serves and loads
//! through it, so sibling resolvers running concurrently share batch windows:
//! resolving any number of products with their reviews and review authors
//! costs one products call, one reviews-by-product call and one users call.

use futures::{future::try_join_all, try_join};
use serde::Serialize;

use crate::{
    error::{LoadError, LoadResult},
    model::{Product, Review, User},
    scope::QueryScope,
};

/// A product with every review of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    pub reviews: Vec<ReviewView>,
}

/// A review with its author, if the users service still knows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewView {
    #[serde(flatten)]
    pub review: Review,
    pub author: Option<User>,
}

/// A user with the number of reviews they wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub total_reviews: usize,
}

/// A review with both of its references resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewRefs {
    #[serde(flatten)]
    pub review: Review,
    pub product: Option<Product>,
    pub author: Option<User>,
}

pub async fn product_with_reviews(
    scope: &QueryScope,
    id: impl Into<String>,
) -> LoadResult<Option<ProductView>> {
    let id = id.into();
    let (product, reviews) = try_join!(scope.product(id.clone()), scope.product_reviews(id))?;

    let product = match product {
        Some(product) => product,
        None => return Ok(None),
    };
    let reviews = with_authors(scope, reviews).await?;

    Ok(Some(ProductView { product, reviews }))
}

/// [`product_with_reviews`] for every id, in order.
pub async fn products_with_reviews<I>(
    scope: &QueryScope,
    ids: I,
) -> LoadResult<Vec<Option<ProductView>>>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    try_join_all(ids.into_iter().map(|id| product_with_reviews(scope, id))).await
}

pub async fn user_with_review_count(
    scope: &QueryScope,
    id: impl Into<String>,
) -> LoadResult<Option<UserView>> {
    let id = id.into();
    let (user, total_reviews) = try_join!(scope.user(id.clone()), scope.user_review_count(id))?;

    Ok(user.map(|user| UserView {
        user,
        total_reviews,
    }))
}

/// [`user_with_review_count`] for every id, in order.
pub async fn users_with_review_counts<I>(
    scope: &QueryScope,
    ids: I,
) -> LoadResult<Vec<Option<UserView>>>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    try_join_all(ids.into_iter().map(|id| user_with_review_count(scope, id))).await
}

/// Reviews by id, each with its product and author. Unknown review ids
/// resolve to `None`.
pub async fn reviews_with_refs<I>(scope: &QueryScope, ids: I) -> LoadResult<Vec<Option<ReviewRefs>>>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    try_join_all(ids.into_iter().map(|id| review_with_refs(scope, id.into()))).await
}

async fn review_with_refs(scope: &QueryScope, id: String) -> LoadResult<Option<ReviewRefs>> {
    let review = match scope.review(id).await? {
        Some(review) => review,
        None => return Ok(None),
    };

    let (product, author) = try_join!(
        scope.product(review.product_id.clone()),
        scope.user(review.user_id.clone()),
    )?;

    Ok(Some(ReviewRefs {
        review,
        product,
        author,
    }))
}

async fn with_authors(scope: &QueryScope, reviews: Vec<Review>) -> LoadResult<Vec<ReviewView>> {
    try_join_all(reviews.into_iter().map(|review| async move {
        let author = scope.user(review.user_id.clone()).await?;
        Ok::<_, LoadError>(ReviewView { review, author })
    }))
    .await
}
