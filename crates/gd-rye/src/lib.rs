//! gd-rye
//!
//! Remote cart proxy. Defines the [`CommerceCart`] boundary the cart service
//! talks to, and [`RyeClient`], the GraphQL implementation against the
//! commerce API that fronts Amazon and Shopify checkout.
//!
//! This crate does **not** touch the database; callers keep the local mirror
//! consistent with what these calls return.

mod client;
mod graphql;

use std::fmt;

use async_trait::async_trait;
use gd_schemas::{CartItemInput, ProductRef, RemoteCart, SubmitResult};

pub use client::RyeClient;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RyeError {
    /// Network or transport failure (including non-2xx HTTP status).
    Transport(String),
    /// The API returned an application-level error.
    Api { code: Option<String>, message: String },
    /// The remote cart no longer exists or has expired.
    CartExpired { cart_id: String },
    /// A response payload could not be decoded.
    Decode(String),
    /// Missing or invalid client configuration.
    Config(String),
}

impl RyeError {
    pub fn code(&self) -> &'static str {
        match self {
            RyeError::Transport(_) => "REMOTE_TRANSPORT",
            RyeError::Api { .. } => "REMOTE_API",
            RyeError::CartExpired { .. } => "REMOTE_CART_EXPIRED",
            RyeError::Decode(_) => "REMOTE_DECODE",
            RyeError::Config(_) => "REMOTE_CONFIG",
        }
    }

    pub fn is_cart_expired(&self) -> bool {
        matches!(self, RyeError::CartExpired { .. })
    }
}

impl fmt::Display for RyeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RyeError::Transport(msg) => write!(f, "transport error: {msg}"),
            RyeError::Api {
                code: Some(c),
                message,
            } => write!(f, "commerce api error code={c}: {message}"),
            RyeError::Api {
                code: None,
                message,
            } => write!(f, "commerce api error: {message}"),
            RyeError::CartExpired { cart_id } => write!(f, "remote cart expired: {cart_id}"),
            RyeError::Decode(msg) => write!(f, "decode error: {msg}"),
            RyeError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for RyeError {}

// ---------------------------------------------------------------------------
// Remote cart boundary
// ---------------------------------------------------------------------------

/// Remote shopping cart contract.
///
/// Object-safe and `Send + Sync` so the cart service can hold an
/// `Arc<dyn CommerceCart>` across handler tasks. Every mutation returns the
/// full remote cart as observed after the call, including store-level errors.
///
/// Quantities:
/// - `add_items` adds to whatever the cart already holds for the product.
/// - `update_items` sets the absolute quantity.
#[async_trait]
pub trait CommerceCart: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_cart(&self, items: &[CartItemInput]) -> Result<RemoteCart, RyeError>;

    async fn add_items(&self, cart_id: &str, items: &[CartItemInput]) -> Result<RemoteCart, RyeError>;

    async fn update_items(&self, cart_id: &str, items: &[CartItemInput])
        -> Result<RemoteCart, RyeError>;

    async fn remove_items(&self, cart_id: &str, products: &[ProductRef])
        -> Result<RemoteCart, RyeError>;

    async fn get_cart(&self, cart_id: &str) -> Result<RemoteCart, RyeError>;

    /// Submit every store in the cart for checkout with a tokenized payment.
    async fn submit_cart(&self, cart_id: &str, payment_token: &str) -> Result<SubmitResult, RyeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_and_codes_are_stable() {
        let e = RyeError::Api {
            code: Some("INVALID_INPUT".to_string()),
            message: "bad variant".to_string(),
        };
        assert_eq!(e.to_string(), "commerce api error code=INVALID_INPUT: bad variant");
        assert_eq!(e.code(), "REMOTE_API");

        let x = RyeError::CartExpired {
            cart_id: "c1".to_string(),
        };
        assert!(x.is_cart_expired());
        assert_eq!(x.to_string(), "remote cart expired: c1");
    }
}
