use std::fmt;

use gd_reconcile::Oversell;
use gd_rye::RyeError;
use gd_schemas::{NeedRef, RemoteStoreError, Store};

use crate::CheckoutValidation;

/// Refusals and failures of cart operations.
///
/// `code()` is stable and is what API clients switch on.
#[derive(Debug)]
pub enum CartError {
    InvalidQuantity { quantity: i64 },
    InvalidInput(String),
    NeedNotFound { need: NeedRef },
    Oversell { need: NeedRef, detail: Oversell },
    NotInCart { need: NeedRef },
    NoOpenCart { donor_id: String },
    /// The submitted remote cart does not belong to this donor.
    CartMismatch { donor_id: String, remote_cart_id: String },
    CheckoutBlocked { validation: Box<CheckoutValidation> },
    Remote(RyeError),
    /// The commerce API accepted the call but reported a store error naming
    /// the product; the local change was rolled back.
    StoreRejected {
        store: Store,
        product_id: String,
        errors: Vec<RemoteStoreError>,
    },
    Db(anyhow::Error),
}

impl CartError {
    pub fn code(&self) -> &'static str {
        match self {
            CartError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            CartError::InvalidInput(_) => "INVALID_INPUT",
            CartError::NeedNotFound { .. } => "NEED_NOT_FOUND",
            CartError::Oversell { .. } => "OVERSELL",
            CartError::NotInCart { .. } => "NOT_IN_CART",
            CartError::NoOpenCart { .. } => "NO_OPEN_CART",
            CartError::CartMismatch { .. } => "CART_MISMATCH",
            CartError::CheckoutBlocked { .. } => "CHECKOUT_BLOCKED",
            CartError::Remote(e) => e.code(),
            CartError::StoreRejected { .. } => "STORE_REJECTED",
            CartError::Db(_) => "DB_ERROR",
        }
    }
}

impl fmt::Display for CartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CartError::InvalidQuantity { quantity } => {
                write!(f, "quantity must be >= 1 (got {quantity})")
            }
            CartError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            CartError::NeedNotFound { need } => write!(f, "need not found: {need}"),
            CartError::Oversell { need, detail } => write!(f, "{need}: {detail}"),
            CartError::NotInCart { need } => write!(f, "need is not in cart: {need}"),
            CartError::NoOpenCart { donor_id } => write!(f, "donor has no open cart: {donor_id}"),
            CartError::CartMismatch {
                donor_id,
                remote_cart_id,
            } => write!(
                f,
                "remote cart {remote_cart_id} does not belong to donor {donor_id}"
            ),
            CartError::CheckoutBlocked { validation } => write!(
                f,
                "checkout blocked: {} problem(s)",
                validation.problems.len()
            ),
            CartError::Remote(e) => write!(f, "{e}"),
            CartError::StoreRejected {
                store,
                product_id,
                errors,
            } => {
                let codes: Vec<&str> = errors.iter().map(|e| e.code.as_str()).collect();
                write!(
                    f,
                    "store {store} rejected product {product_id}: {}",
                    codes.join(",")
                )
            }
            CartError::Db(e) => write!(f, "database error: {e:#}"),
        }
    }
}

impl std::error::Error for CartError {}

impl From<anyhow::Error> for CartError {
    fn from(e: anyhow::Error) -> Self {
        CartError::Db(e)
    }
}

impl From<sqlx::Error> for CartError {
    fn from(e: sqlx::Error) -> Self {
        CartError::Db(anyhow::Error::new(e))
    }
}

impl From<RyeError> for CartError {
    fn from(e: RyeError) -> Self {
        CartError::Remote(e)
    }
}
