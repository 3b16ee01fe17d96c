//! Axum router and all HTTP handlers for gd-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Donors are identified by the `:donor_id` path segment.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        FromRequest, FromRequestParts, Path, Request, State,
    },
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use gd_cart::{CartError, CartView, FinalizeOutcome, FinalizeReport};
use gd_schemas::{NeedKind, NeedRef, SubmitResult};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api_types::{CartItemRequest, CheckoutRequest, ErrorResponse, HealthResponse, OrdersResponse},
    state::{uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Middleware layers (CORS, tracing) are attached by `main.rs`, so tests can
/// use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/needs/:kind/:need_id", get(need_handler))
        .route("/v1/donors/:donor_id/cart", get(cart_get))
        .route(
            "/v1/donors/:donor_id/cart/items",
            post(cart_add).patch(cart_update),
        )
        .route(
            "/v1/donors/:donor_id/cart/items/:kind/:need_id",
            delete(cart_remove),
        )
        .route("/v1/donors/:donor_id/cart/validate", post(cart_validate))
        .route("/v1/donors/:donor_id/cart/reconcile", post(cart_reconcile))
        .route("/v1/donors/:donor_id/checkout", post(checkout))
        .route("/v1/donors/:donor_id/orders", get(orders_list))
        .route("/v1/donors/:donor_id/orders/finalize", post(orders_finalize))
        .layer(from_fn_with_state(state.clone(), publish_failures))
        .with_state(state)
}

/// Server-side failures are echoed to the SSE `log` stream.
async fn publish_failures(State(st): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let route = format!("{} {}", req.method(), req.uri().path());
    let resp = next.run(req).await;
    if let Some(f) = resp.extensions().get::<Failure>() {
        st.log_line("ERROR", format!("{route} failed: {} {}", f.code, f.message));
    }
    resp
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Handler error: a `CartError` rendered as `{error, code, detail?}`.
#[derive(Debug)]
pub struct ApiError(pub CartError);

impl From<CartError> for ApiError {
    fn from(e: CartError) -> Self {
        ApiError(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        ApiError(CartError::InvalidInput(format!("request body: {}", r.body_text())))
    }
}

impl From<PathRejection> for ApiError {
    fn from(r: PathRejection) -> Self {
        ApiError(CartError::InvalidInput(format!("path: {}", r.body_text())))
    }
}

/// `Json` whose rejections render as `INVALID_INPUT`.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Path` whose rejections render as `INVALID_INPUT`.
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Attached to 5xx responses for `publish_failures`.
#[derive(Clone, Debug)]
struct Failure {
    code: &'static str,
    message: String,
}

pub fn status_for(err: &CartError) -> StatusCode {
    match err {
        CartError::InvalidQuantity { .. } | CartError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CartError::NeedNotFound { .. } | CartError::NotInCart { .. } | CartError::NoOpenCart { .. } => {
            StatusCode::NOT_FOUND
        }
        CartError::Oversell { .. }
        | CartError::CartMismatch { .. }
        | CartError::CheckoutBlocked { .. }
        | CartError::StoreRejected { .. } => StatusCode::CONFLICT,
        CartError::Remote(_) => StatusCode::BAD_GATEWAY,
        CartError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn detail_for(err: &CartError) -> Option<serde_json::Value> {
    match err {
        CartError::Oversell { detail, .. } => serde_json::to_value(detail).ok(),
        CartError::CheckoutBlocked { validation } => serde_json::to_value(validation.as_ref()).ok(),
        CartError::StoreRejected { errors, .. } => serde_json::to_value(errors).ok(),
        _ => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = ErrorResponse {
            error: self.0.to_string(),
            code: self.0.code().to_string(),
            detail: detail_for(&self.0),
        };
        let mut resp = (status, Json(body)).into_response();
        if status.is_server_error() {
            warn!(code = self.0.code(), error = %self.0, "request failed");
            resp.extensions_mut().insert(Failure {
                code: self.0.code(),
                message: self.0.to_string(),
            });
        }
        resp
    }
}

fn parse_need(kind: &str, id: Uuid) -> Result<NeedRef, ApiError> {
    let kind = NeedKind::parse(kind)
        .ok_or_else(|| CartError::InvalidInput(format!("unknown need kind: {kind}")))?;
    Ok(NeedRef::new(kind, id))
}

// ---------------------------------------------------------------------------
// GET /v1/health  /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut snap = st.status.read().await.clone();
    snap.daemon_uptime_secs = uptime_secs();
    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    (StatusCode::OK, Json(snap))
}

// ---------------------------------------------------------------------------
// GET /v1/needs/:kind/:need_id
// ---------------------------------------------------------------------------

pub(crate) async fn need_handler(
    State(st): State<Arc<AppState>>,
    ApiPath((kind, need_id)): ApiPath<(String, Uuid)>,
) -> Result<Response, ApiError> {
    let need = parse_need(&kind, need_id)?;
    let avail = st.cart.need(need).await?;
    Ok((StatusCode::OK, Json(avail)).into_response())
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

pub(crate) async fn cart_get(
    State(st): State<Arc<AppState>>,
    ApiPath(donor_id): ApiPath<String>,
) -> Result<Json<CartView>, ApiError> {
    let view = st.cart.get_cart(&donor_id).await?;
    if view.recreated {
        info!(donor_id = %donor_id, clamps = view.clamps.len(), "remote cart recreated on read");
    }
    Ok(Json(view))
}

pub(crate) async fn cart_add(
    State(st): State<Arc<AppState>>,
    ApiPath(donor_id): ApiPath<String>,
    ApiJson(req): ApiJson<CartItemRequest>,
) -> Result<Json<CartView>, ApiError> {
    let need = parse_need(&req.kind, req.need_id)?;
    let view = st.cart.add_item(&donor_id, need, req.quantity).await?;
    info!(donor_id = %donor_id, %need, quantity = req.quantity, "cart/add");
    st.cart_changed(&donor_id, "add", Some(view.line_count())).await;
    Ok(Json(view))
}

pub(crate) async fn cart_update(
    State(st): State<Arc<AppState>>,
    ApiPath(donor_id): ApiPath<String>,
    ApiJson(req): ApiJson<CartItemRequest>,
) -> Result<Json<CartView>, ApiError> {
    let need = parse_need(&req.kind, req.need_id)?;
    let view = st.cart.update_item(&donor_id, need, req.quantity).await?;
    info!(donor_id = %donor_id, %need, quantity = req.quantity, "cart/update");
    st.cart_changed(&donor_id, "update", Some(view.line_count())).await;
    Ok(Json(view))
}

pub(crate) async fn cart_remove(
    State(st): State<Arc<AppState>>,
    ApiPath((donor_id, kind, need_id)): ApiPath<(String, String, Uuid)>,
) -> Result<Json<CartView>, ApiError> {
    let need = parse_need(&kind, need_id)?;
    let view = st.cart.remove_item(&donor_id, need).await?;
    info!(donor_id = %donor_id, %need, "cart/remove");
    st.cart_changed(&donor_id, "remove", Some(view.line_count())).await;
    Ok(Json(view))
}

/// Always 200; a blocked cart reports `ok: false` with its problems.
pub(crate) async fn cart_validate(
    State(st): State<Arc<AppState>>,
    ApiPath(donor_id): ApiPath<String>,
) -> Result<Response, ApiError> {
    let validation = st.cart.validate_checkout(&donor_id).await?;
    Ok((StatusCode::OK, Json(validation)).into_response())
}

pub(crate) async fn cart_reconcile(
    State(st): State<Arc<AppState>>,
    ApiPath(donor_id): ApiPath<String>,
) -> Result<Response, ApiError> {
    let outcome = st.cart.reconcile_cart(&donor_id).await?;
    info!(
        donor_id = %donor_id,
        clamps = outcome.clamps.len(),
        applied = outcome.applied.len(),
        recreated = outcome.recreated,
        "cart/reconcile"
    );
    if !outcome.applied.is_empty() || !outcome.clamps.is_empty() || outcome.recreated {
        st.cart_changed(&donor_id, "reconcile", None).await;
    }
    Ok((StatusCode::OK, Json(outcome)).into_response())
}

// ---------------------------------------------------------------------------
// Checkout / orders
// ---------------------------------------------------------------------------

pub(crate) async fn checkout(
    State(st): State<Arc<AppState>>,
    ApiPath(donor_id): ApiPath<String>,
    ApiJson(req): ApiJson<CheckoutRequest>,
) -> Result<Response, ApiError> {
    let outcome = st.cart.checkout(&donor_id, &req.payment_token).await?;
    publish_finalized(&st, &donor_id, &outcome.finalize).await;
    Ok((StatusCode::OK, Json(outcome)).into_response())
}

/// Record a submission obtained out of band (e.g. a retried webhook).
pub(crate) async fn orders_finalize(
    State(st): State<Arc<AppState>>,
    ApiPath(donor_id): ApiPath<String>,
    ApiJson(submit): ApiJson<SubmitResult>,
) -> Result<Response, ApiError> {
    let report = st.cart.finalize_order(&donor_id, &submit).await?;
    publish_finalized(&st, &donor_id, &report).await;
    Ok((StatusCode::OK, Json(report)).into_response())
}

pub(crate) async fn orders_list(
    State(st): State<Arc<AppState>>,
    ApiPath(donor_id): ApiPath<String>,
) -> Result<Json<OrdersResponse>, ApiError> {
    let orders = gd_db::orders_for_donor(st.cart.pool(), &donor_id)
        .await
        .map_err(CartError::Db)?;
    Ok(Json(OrdersResponse { donor_id, orders }))
}

async fn publish_finalized(st: &AppState, donor_id: &str, report: &FinalizeReport) {
    for s in &report.stores {
        match &s.outcome {
            FinalizeOutcome::Finalized { order_id, request_id, .. } => {
                info!(donor_id, store = %s.store, %order_id, request_id = %request_id, "order finalized");
                st.order_finalized(donor_id, s.store.key(), *order_id, request_id)
                    .await;
            }
            FinalizeOutcome::Oversold {
                need,
                requested,
                purchased,
                wanted,
            } => {
                let msg = format!(
                    "{donor_id}: {} purchase not recorded, {need} oversold ({purchased}+{requested} > {wanted})",
                    s.store
                );
                st.log_line("WARN", msg);
            }
            FinalizeOutcome::Failed { errors } => {
                warn!(donor_id, store = %s.store, errors = errors.len(), "store submission failed");
                st.log_line("WARN", format!("{donor_id}: {} submission failed", s.store));
            }
            FinalizeOutcome::AlreadyFinalized { .. } | FinalizeOutcome::Pending => {}
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(m.event_name()).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
