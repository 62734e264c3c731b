//! Resolvers batch across siblings: the number of upstream calls doesn't grow
//! with the number of entities resolved.

mod common;

use common::Fixture;
use fedloader::{resolve, Gateway};
use futures::executor;

#[test]
fn products_with_reviews_cost_three_calls() {
    let fixture = Fixture::new();
    let gateway = Gateway::new(fixture.upstreams());
    let scope = gateway.scope();

    let products = executor::block_on(scope.run(resolve::products_with_reviews(
        &scope,
        ["p1", "p2", "p3", "p9"],
    )))
    .unwrap();

    let p1 = products[0].as_ref().unwrap();
    assert_eq!(p1.product.name, "Table");
    let authors: Vec<Option<&str>> = p1
        .reviews
        .iter()
        .map(|review| review.author.as_ref().map(|user| user.username.as_str()))
        .collect();
    assert_eq!(authors, [Some("alice"), Some("carol")]);

    let p3 = products[2].as_ref().unwrap();
    assert_eq!(p3.reviews[0].review.id, "rev4");
    assert_eq!(p3.reviews[0].author, None);

    assert!(products[3].is_none());

    assert_eq!(scope.calls().get("/products?ids"), 1);
    assert_eq!(scope.calls().get("/reviews?productIds"), 1);
    assert_eq!(scope.calls().get("/users?ids"), 1);
    assert_eq!(scope.calls().total(), 3);

    assert_eq!(fixture.users.requests.all(), vec![vec!["u1", "u3", "u404"]]);
}

#[test]
fn single_product_with_reviews() {
    let fixture = Fixture::new();
    let gateway = Gateway::new(fixture.upstreams());
    let scope = gateway.scope();

    let product = executor::block_on(resolve::product_with_reviews(&scope, "p2"))
        .unwrap()
        .unwrap();

    assert_eq!(product.product.price, 40);
    assert_eq!(product.reviews.len(), 1);
    assert_eq!(product.reviews[0].author.as_ref().unwrap().id, "u1");
}

#[test]
fn users_with_review_counts() {
    let fixture = Fixture::new();
    let gateway = Gateway::new(fixture.upstreams());
    let scope = gateway.scope();

    let users = executor::block_on(resolve::users_with_review_counts(
        &scope,
        ["u1", "u2", "u404"],
    ))
    .unwrap();

    let counts: Vec<Option<(&str, usize)>> = users
        .iter()
        .map(|view| {
            view.as_ref()
                .map(|view| (view.user.username.as_str(), view.total_reviews))
        })
        .collect();
    assert_eq!(counts, [Some(("alice", 3)), Some(("bob", 0)), None]);

    assert_eq!(scope.calls().get("/users?ids"), 1);
    assert_eq!(scope.calls().get("/reviews?userIds"), 1);
}

#[test]
fn single_user_with_review_count() {
    let fixture = Fixture::new();
    let gateway = Gateway::new(fixture.upstreams());
    let scope = gateway.scope();

    let user = executor::block_on(resolve::user_with_review_count(&scope, "u3"))
        .unwrap()
        .unwrap();

    assert_eq!(user.user.username, "carol");
    assert_eq!(user.total_reviews, 1);
}

#[test]
fn reviews_with_refs_resolve_both_sides() {
    let fixture = Fixture::new();
    let gateway = Gateway::new(fixture.upstreams());
    let scope = gateway.scope();

    let reviews = executor::block_on(resolve::reviews_with_refs(
        &scope,
        ["rev1", "rev4", "rev9"],
    ))
    .unwrap();

    let rev1 = reviews[0].as_ref().unwrap();
    assert_eq!(rev1.product.as_ref().unwrap().id, "p1");
    assert_eq!(rev1.author.as_ref().unwrap().username, "alice");

    let rev4 = reviews[1].as_ref().unwrap();
    assert_eq!(rev4.product.as_ref().unwrap().name, "Lamp");
    assert_eq!(rev4.author, None);

    assert!(reviews[2].is_none());

    assert_eq!(fixture.products.requests.all(), vec![vec!["p1", "p3"]]);
    assert_eq!(scope.calls().total(), 3);
}

#[test]
fn upstream_failures_fail_the_resolution() {
    let fixture = Fixture::new();
    fixture.users.fail_with(fedloader::FetchError::Status {
        url: "http://users/users".to_owned(),
        status: 503,
    });
    let gateway = Gateway::new(fixture.upstreams());
    let scope = gateway.scope();

    let err = executor::block_on(resolve::products_with_reviews(&scope, ["p1", "p2"])).unwrap_err();

    assert_eq!(
        err.to_string(),
        "http://users/users responded with status 503"
    );
}

#[test]
fn views_serialize_flat() {
    let fixture = Fixture::new();
    let gateway = Gateway::new(fixture.upstreams());
    let scope = gateway.scope();

    let user = executor::block_on(resolve::user_with_review_count(&scope, "u1"))
        .unwrap()
        .unwrap();

    assert_eq!(
        serde_json::to_value(&user).unwrap(),
        serde_json::json!({"id": "u1", "username": "alice", "totalReviews": 3})
    );
}
