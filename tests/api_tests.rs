mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::Arc;

use cinerec::db::MemoryStore;
use cinerec::routes::{create_router, AppState};

use common::*;

async fn create_test_server() -> (TestServer, Arc<MemoryStore>) {
    let store = seeded_store().await;
    add_user(&store, 1).await;
    for id in 1..=5 {
        store
            .insert_movie(movie(id, &format!("Drama {}", id), &[DRAMA], id as f64))
            .await;
    }

    let app = create_router(AppState::new(build_engine(store.clone())));
    (TestServer::new(app).unwrap(), store)
}

#[tokio::test]
async fn test_health_check() {
    let (server, _) = create_test_server().await;
    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_json(&json!({ "status": "healthy" }));
}

#[tokio::test]
async fn test_request_id_is_generated_and_propagated() {
    let (server, _) = create_test_server().await;

    let response = server.get("/health").await;
    let generated = response.header("x-request-id");
    assert!(!generated.is_empty());

    let response = server
        .get("/health")
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("req-42"),
        )
        .await;
    assert_eq!(response.header("x-request-id"), "req-42");
}

#[tokio::test]
async fn test_recommendations_for_new_user() {
    let (server, _) = create_test_server().await;

    let response = server
        .get("/api/v1/users/1/recommendations")
        .add_query_param("limit", 3)
        .await;
    response.assert_status_ok();

    let movies: Vec<Value> = response.json();
    let ids: Vec<i64> = movies.iter().map(|m| m["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![5, 4, 3]);
    assert_eq!(movies[0]["bayesian_rating"], 3.5);
}

#[tokio::test]
async fn test_unknown_user_is_404() {
    let (server, _) = create_test_server().await;

    let response = server.get("/api/v1/users/999/recommendations").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_rate_then_read_ratings() {
    let (server, _) = create_test_server().await;

    let response = server
        .put("/api/v1/users/1/ratings/2")
        .json(&json!({ "rating": 4, "review": "Solid" }))
        .await;
    response.assert_status_ok();
    let rating: Value = response.json();
    assert_eq!(rating["rating"], 4);
    assert_eq!(rating["movie_id"], 2);

    let response = server.get("/api/v1/users/1/ratings").await;
    response.assert_status_ok();
    let ratings: Vec<Value> = response.json();
    assert_eq!(ratings.len(), 1);
    assert_eq!(ratings[0]["review"], "Solid");

    let response = server.get("/api/v1/users/1/recommendations/status").await;
    response.assert_status_ok();
    response.assert_json(&json!({ "has_recommendations": true, "total_ratings": 1 }));
}

#[tokio::test]
async fn test_invalid_rating_is_400() {
    let (server, _) = create_test_server().await;

    let response = server
        .put("/api/v1/users/1/ratings/2")
        .json(&json!({ "rating": 9 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_rating() {
    let (server, store) = create_test_server().await;
    seed_rating(&store, 1, 3, 5).await;

    let response = server.delete("/api/v1/users/1/ratings/3").await;
    response.assert_status(StatusCode::NO_CONTENT);

    let response = server.delete("/api/v1/users/1/ratings/3").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bayesian_rating_endpoint() {
    let (server, store) = create_test_server().await;
    for user_id in 1..=25 {
        seed_rating(&store, user_id, 1, 4).await;
    }

    let response = server.get("/api/v1/movies/1/bayesian-rating").await;
    response.assert_status_ok();
    response.assert_json(&json!({ "movie_id": 1, "bayesian_rating": 3.75 }));
}

#[tokio::test]
async fn test_semantic_search_requires_query_text() {
    let (server, _) = create_test_server().await;

    let response = server
        .get("/api/v1/movies/search/semantic")
        .add_query_param("q", " ")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_embedding_generation_and_similar_movies() {
    let (server, store) = create_test_server().await;
    let mut first = movie(10, "Space Station", &[SCI_FI], 1.0);
    first.overview = Some("Crime in space".to_string());
    let mut second = movie(11, "Space Race", &[SCI_FI], 1.0);
    second.overview = Some("Into space".to_string());
    store.insert_movie(first).await;
    store.insert_movie(second).await;

    for id in [10, 11] {
        let response = server.post(&format!("/api/v1/movies/{}/embedding", id)).await;
        response.assert_status_ok();
        response.assert_json(&json!({ "movie_id": id, "generated": true }));
    }

    let response = server.get("/api/v1/movies/10/similar").await;
    response.assert_status_ok();
    let similar: Vec<Value> = response.json();
    assert_eq!(similar.len(), 1);
    assert_eq!(similar[0]["id"], 11);
    assert!(similar[0]["similarity"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_embedding_regeneration_requires_force() {
    let (server, store) = create_test_server().await;
    let mut station = movie(10, "Space Station", &[SCI_FI], 1.0);
    station.overview = Some("Crime in space".to_string());
    store.insert_movie(station).await;

    let response = server.post("/api/v1/movies/10/embedding").await;
    response.assert_json(&json!({ "movie_id": 10, "generated": true }));

    let response = server.post("/api/v1/movies/10/embedding").await;
    response.assert_status_ok();
    response.assert_json(&json!({ "movie_id": 10, "generated": false }));

    let response = server
        .post("/api/v1/movies/10/embedding")
        .add_query_param("force", true)
        .await;
    response.assert_json(&json!({ "movie_id": 10, "generated": true }));
}

#[tokio::test]
async fn test_recompute_preference_vector_without_ratings() {
    let (server, _) = create_test_server().await;

    let response = server.post("/api/v1/users/1/preference-vector").await;
    response.assert_status_ok();
    response.assert_json(&json!({ "user_id": 1, "computed": false, "dimension": null }));
}
