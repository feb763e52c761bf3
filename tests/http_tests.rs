mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower::ServiceExt;
use tour_access::{app, AppState, ResourceStore, Settings};

fn router(store: Arc<dyn ResourceStore>) -> Router {
    app(AppState::new(store, model(), Settings::default()))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>, caller: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder.header("X-User-Id", caller);
    }
    let request = match body {
        Some(b) => {
            let text = b.to_string();
            builder
                .header("content-type", "application/json")
                .header("content-length", text.len())
                .body(Body::from(text))
                .unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

fn tour_json(name: &str, price: f64) -> Value {
    Value::Object(tour_body(name, price))
}

#[tokio::test]
async fn health_and_version() {
    let (store, _) = memory();
    let app = router(store);
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));

    let (status, body) = send(&app, "GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], json!("ok"));

    let (_, body) = send(&app, "GET", "/version", None, None).await;
    assert_eq!(body["name"], json!("tour-access"));
}

#[tokio::test]
async fn tour_lifecycle() {
    let (store, _) = memory();
    let app = router(store);

    let (status, body) = send(&app, "POST", "/api/v1/tours", Some(tour_json("The Forest Hiker", 397.0)), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], json!("success"));
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", "/api/v1/tours?fields=name,price", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], json!(1));
    assert_eq!(body["data"][0], json!({"id": id, "name": "The Forest Hiker", "price": 397.0}));

    let (status, body) = send(&app, "PATCH", &format!("/api/v1/tours/{}", id), Some(json!({"price": 450})), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["price"], json!(450.0));

    let (status, body) = send(&app, "DELETE", &format!("/api/v1/tours/{}", id), None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, body) = send(&app, "GET", &format!("/api/v1/tours/{}", id), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], json!("fail"));
    assert_eq!(body["error"]["code"], json!("not_found"));
}

#[tokio::test]
async fn query_operators_arrive_from_the_url() {
    let (store, model) = memory();
    create_tour(&store, &model, "The Forest Hiker", 397.0).await;
    create_tour(&store, &model, "The Sea Explorer", 497.0).await;
    create_tour(&store, &model, "The Snow Adventurer", 997.0).await;
    let app = router(store);

    let (status, body) = send(&app, "GET", "/api/v1/tours?price%5Bgte%5D=400&sort=-price", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], json!(2));
    assert_eq!(body["data"][0]["name"], json!("The Snow Adventurer"));

    let (status, body) = send(&app, "GET", "/api/v1/tours/aliases/top-5-cheap", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["name"], json!("The Forest Hiker"));

    let (status, body) = send(&app, "GET", "/api/v1/tours?rating=5", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("validation_error"));
}

#[tokio::test]
async fn nested_reviews_use_the_caller_header() {
    let (store, model) = memory();
    let tour = create_tour(&store, &model, "The Forest Hiker", 397.0).await;
    let ann = create_user(&store, "Ann").await;
    let app = router(store.clone());

    let uri = format!("/api/v1/tours/{}/reviews", tour);
    let (status, body) = send(&app, "POST", &uri, Some(json!({"review": "Great", "rating": 5})), Some(&ann)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["user"], json!(ann));
    assert_eq!(body["data"]["tour"], json!(tour));

    let (status, body) = send(&app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], json!(1));
    assert_eq!(body["data"][0]["user"]["name"], json!("Ann"));

    let (_, body) = send(&app, "GET", &format!("/api/v1/tours/{}", tour), None, None).await;
    assert_eq!(body["data"]["ratingsQuantity"], json!(1));
    assert_eq!(body["data"]["ratingsAverage"], json!(5.0));

    let (status, _) = send(&app, "GET", &format!("/api/v1/users/{}/reviews", ann), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn client_errors_are_classified() {
    let (store, _) = memory();
    let app = router(store);

    let (status, body) = send(&app, "GET", "/api/v1/tours/not-a-uuid", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"], json!({"field": "id"}));

    let (status, _) = send(&app, "GET", "/api/v1/bookings", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "POST", "/api/v1/users", Some(json!({"name": "Ann"})), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("bad_request"));

    let (status, _) = send(&app, "POST", "/api/v1/tours", Some(json!([1, 2])), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut invalid = tour_body("The Forest Hiker", 397.0);
    invalid.insert("difficulty".into(), json!("extreme"));
    let (status, body) = send(&app, "POST", "/api/v1/tours", Some(Value::Object(invalid)), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("validation_error"));
    assert!(body["error"]["message"].as_str().unwrap().starts_with("Invalid input data"));
}

#[tokio::test]
async fn faults_hide_their_details() {
    let failing = Arc::new(FailingStore::new(model()));
    failing.fail_reads.store(true, Ordering::SeqCst);
    let app = router(failing);

    let (status, body) = send(&app, "GET", "/api/v1/tours", None, None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], json!("error"));
    assert_eq!(body["error"]["message"], json!("Something went wrong"));
    assert!(!body.to_string().contains("10.0.0.3"));

    let (status, _) = send(&app, "GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn oversized_bodies_are_refused() {
    let (store, _) = memory();
    let settings = Settings {
        body_limit_bytes: 64,
        ..Settings::default()
    };
    let app = app(AppState::new(store, model(), settings));
    let (status, _) = send(&app, "POST", "/api/v1/tours", Some(tour_json("The Forest Hiker", 397.0)), None).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn stats_and_monthly_plan_routes() {
    let (store, _) = memory();
    let app = router(store);
    let mut body = tour_json("The Forest Hiker", 397.0);
    body["startDates"] = json!(["2021-06-19"]);
    let (status, _) = send(&app, "POST", "/api/v1/tours", Some(body), None).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "GET", "/api/v1/tours/stats", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], json!(1));
    assert_eq!(body["data"][0]["difficulty"], json!("EASY"));

    let (status, body) = send(&app, "GET", "/api/v1/tours/monthly-plan/2021", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["month"], json!(6));
    assert_eq!(body["data"][0]["tours"], json!(["The Forest Hiker"]));

    let (status, body) = send(&app, "GET", "/api/v1/tours/monthly-plan/someday", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], json!("fail"));
}
