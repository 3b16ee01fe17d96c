//! In-process scenario tests for gd-daemon HTTP endpoints.
//!
//! The router is driven via `tower::ServiceExt::oneshot`; no socket is bound.
//! Routes that refuse a request before touching the database run against a
//! lazy pool that never connects. The rest need GIFTDRIVE_DATABASE_URL and
//! skip otherwise.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use gd_cart::CartService;
use gd_config::CartSettings;
use gd_daemon::{routes, state};
use gd_schemas::Store;
use gd_testkit::FakeCommerce;
use http_body_util::BodyExt;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// State over a pool that never connects and a fresh fake commerce cart.
fn offline_state() -> Arc<state::AppState> {
    let pool = PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(200))
        .connect_lazy("postgres://offline@127.0.0.1:1/none")
        .expect("lazy pool");
    let cart = CartService::new(pool, Arc::new(FakeCommerce::new()), CartSettings::default());
    Arc::new(state::AppState::new(cart))
}

fn offline_router() -> axum::Router {
    routes::build_router(offline_state())
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn json_req(method: &str, uri: &str, body: serde_json::Value) -> Request<axum::body::Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// No database needed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let (status, body) = call(offline_router(), get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "gd-daemon");
}

#[tokio::test]
async fn status_reports_mode_and_commerce_adapter() {
    let (status, body) = call(offline_router(), get("/v1/status")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["mode"], "SANDBOX");
    assert_eq!(json["commerce"], "fake");
    assert_eq!(json["recreate_expired"], true);
    assert_eq!(json["cart_mutations"], 0);
}

#[tokio::test]
async fn unknown_need_kind_is_400() {
    let uri = format!("/v1/needs/sibling/{}", uuid::Uuid::new_v4());
    let (status, body) = call(offline_router(), get(&uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(body)["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn add_with_zero_quantity_is_400_invalid_quantity() {
    let req = json_req(
        "POST",
        "/v1/donors/d1/cart/items",
        serde_json::json!({ "kind": "drive", "need_id": uuid::Uuid::new_v4(), "quantity": 0 }),
    );
    let (status, body) = call(offline_router(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json = parse_json(body);
    assert_eq!(json["code"], "INVALID_QUANTITY");
    assert!(json["error"].as_str().unwrap().contains("got 0"));
}

#[tokio::test]
async fn update_with_negative_quantity_is_400() {
    let req = json_req(
        "PATCH",
        "/v1/donors/d1/cart/items",
        serde_json::json!({ "kind": "child", "need_id": uuid::Uuid::new_v4(), "quantity": -2 }),
    );
    let (status, body) = call(offline_router(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(body)["code"], "INVALID_QUANTITY");
}

#[tokio::test]
async fn checkout_with_blank_payment_token_is_400() {
    let req = json_req(
        "POST",
        "/v1/donors/d1/checkout",
        serde_json::json!({ "payment_token": "  " }),
    );
    let (status, body) = call(offline_router(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(body)["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn malformed_body_is_400_invalid_input_json() {
    let req = json_req(
        "POST",
        "/v1/donors/d1/cart/items",
        serde_json::json!({ "kind": "drive", "need_id": uuid::Uuid::new_v4(), "quantity": "two" }),
    );
    let (status, body) = call(offline_router(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json = parse_json(body);
    assert_eq!(json["code"], "INVALID_INPUT");
    assert!(json["error"].as_str().unwrap().contains("request body"));
}

#[tokio::test]
async fn body_without_json_content_type_is_400() {
    let req = Request::builder()
        .method("POST")
        .uri("/v1/donors/d1/checkout")
        .body(axum::body::Body::from(r#"{"payment_token":"tok"}"#))
        .unwrap();
    let (status, body) = call(offline_router(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(body)["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn malformed_need_id_is_400_invalid_input_json() {
    let (status, body) = call(offline_router(), get("/v1/needs/drive/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json = parse_json(body);
    assert_eq!(json["code"], "INVALID_INPUT");
    assert!(json["error"].as_str().unwrap().contains("path"));

    let req = Request::builder()
        .method("DELETE")
        .uri("/v1/donors/d1/cart/items/drive/42")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, body) = call(offline_router(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(body)["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn server_errors_are_published_as_log_lines() {
    let st = offline_state();
    let mut rx = st.bus.subscribe();

    let (status, body) = call(routes::build_router(Arc::clone(&st)), get("/v1/donors/d1/cart")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(parse_json(body)["code"], "DB_ERROR");

    let mut logged = None;
    while let Ok(m) = rx.try_recv() {
        if let state::BusMsg::LogLine { level, msg } = m {
            logged = Some((level, msg));
        }
    }
    let (level, msg) = logged.expect("no log line on the bus");
    assert_eq!(level, "ERROR");
    assert!(msg.contains("GET /v1/donors/d1/cart"), "{msg}");
    assert!(msg.contains("DB_ERROR"), "{msg}");
}

#[tokio::test]
async fn client_errors_are_not_published() {
    let st = offline_state();
    let mut rx = st.bus.subscribe();
    let uri = format!("/v1/needs/sibling/{}", uuid::Uuid::new_v4());
    let (status, _) = call(routes::build_router(Arc::clone(&st)), get(&uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(rx.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Database-backed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_then_get_cart_over_http() -> anyhow::Result<()> {
    let Some(pool) = gd_testkit::test_pool().await? else {
        return Ok(());
    };
    let drive = gd_testkit::seed_drive(&pool).await?;
    let need = gd_testkit::seed_drive_need(&pool, &drive, &Store::Amazon, 3).await?;
    let (cart, fake) = gd_testkit::service(&pool);
    let st = Arc::new(state::AppState::new(cart));
    let donor = gd_testkit::donor();

    let add = json_req(
        "POST",
        &format!("/v1/donors/{donor}/cart/items"),
        serde_json::json!({ "kind": "drive", "need_id": need.need.id(), "quantity": 2 }),
    );
    let (status, body) = call(routes::build_router(Arc::clone(&st)), add).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    let json = parse_json(body);
    let remote_cart_id = json["remote_cart_id"].as_str().unwrap().to_string();
    assert_eq!(fake.remote_quantity(&remote_cart_id, &need.product), 2);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        get(&format!("/v1/donors/{donor}/cart")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    let line = &json["stores"][0]["lines"][0];
    assert_eq!(line["quantity"], 2);
    assert_eq!(line["remaining"], 3);
    assert_eq!(st.status.read().await.cart_mutations, 1);
    Ok(())
}

#[tokio::test]
async fn oversell_over_http_is_409_with_detail() -> anyhow::Result<()> {
    let Some(pool) = gd_testkit::test_pool().await? else {
        return Ok(());
    };
    let drive = gd_testkit::seed_drive(&pool).await?;
    let need = gd_testkit::seed_drive_need(&pool, &drive, &Store::Amazon, 1).await?;
    let (cart, _fake) = gd_testkit::service(&pool);
    let router = routes::build_router(Arc::new(state::AppState::new(cart)));

    let req = json_req(
        "POST",
        &format!("/v1/donors/{}/cart/items", gd_testkit::donor()),
        serde_json::json!({ "kind": "DRIVE", "need_id": need.need.id(), "quantity": 2 }),
    );
    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let json = parse_json(body);
    assert_eq!(json["code"], "OVERSELL");
    assert!(json["detail"].is_object());
    Ok(())
}

#[tokio::test]
async fn unknown_need_is_404() -> anyhow::Result<()> {
    let Some(pool) = gd_testkit::test_pool().await? else {
        return Ok(());
    };
    let (cart, _fake) = gd_testkit::service(&pool);
    let router = routes::build_router(Arc::new(state::AppState::new(cart)));
    let uri = format!("/v1/needs/drive/{}", uuid::Uuid::new_v4());
    let (status, body) = call(router, get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse_json(body)["code"], "NEED_NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn checkout_over_http_records_orders_and_lists_them() -> anyhow::Result<()> {
    let Some(pool) = gd_testkit::test_pool().await? else {
        return Ok(());
    };
    let drive = gd_testkit::seed_drive(&pool).await?;
    let need = gd_testkit::seed_child_need(&pool, &drive, &Store::Amazon, 2).await?;
    let (cart, _fake) = gd_testkit::service(&pool);
    let st = Arc::new(state::AppState::new(cart));
    let donor = gd_testkit::donor();

    st.cart.add_item(&donor, need.need, 2).await?;

    let req = json_req(
        "POST",
        &format!("/v1/donors/{donor}/checkout"),
        serde_json::json!({ "payment_token": "tok_visa" }),
    );
    let (status, body) = call(routes::build_router(Arc::clone(&st)), req).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    let json = parse_json(body);
    assert_eq!(json["finalize"]["stores"][0]["outcome"]["status"], "FINALIZED");
    assert_eq!(json["finalize"]["cart_submitted"], true);
    assert_eq!(st.status.read().await.orders_finalized, 1);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        get(&format!("/v1/donors/{donor}/orders")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["orders"].as_array().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn validate_without_open_cart_is_404() -> anyhow::Result<()> {
    let Some(pool) = gd_testkit::test_pool().await? else {
        return Ok(());
    };
    let (cart, _fake) = gd_testkit::service(&pool);
    let router = routes::build_router(Arc::new(state::AppState::new(cart)));
    let req = Request::builder()
        .method("POST")
        .uri(format!("/v1/donors/{}/cart/validate", gd_testkit::donor()))
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse_json(body)["code"], "NO_OPEN_CART");
    Ok(())
}
