//! Request and response types for the gd-daemon HTTP endpoints.
//!
//! Cart results (`CartView`, `CheckoutValidation`, `FinalizeReport`, ...) are
//! serialized straight from `gd_cart`; only the envelope types live here.

use gd_db::OrderRow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response produced by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable machine-readable code (`OVERSELL`, `NO_OPEN_CART`, ...).
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

// ---------------------------------------------------------------------------
// Cart mutations
// ---------------------------------------------------------------------------

/// POST/PATCH /v1/donors/:donor_id/cart/items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItemRequest {
    /// "drive" | "child" (any case).
    pub kind: String,
    pub need_id: Uuid,
    pub quantity: i64,
}

/// POST /v1/donors/:donor_id/checkout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub payment_token: String,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersResponse {
    pub donor_id: String,
    pub orders: Vec<OrderRow>,
}
