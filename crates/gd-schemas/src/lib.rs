//! Shared wire and domain types for the cart/checkout subsystem.
//!
//! Everything here is plain data (`Serialize + Deserialize`). No IO and no
//! business rules beyond stable string encodings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Store / product identity
// ---------------------------------------------------------------------------

pub const AMAZON_STORE_KEY: &str = "amazon";

/// A checkout store fronted by the commerce API.
///
/// A single remote cart can hold lines for Amazon and any number of Shopify
/// shops; each store is checked out (and can fail) independently.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Store {
    Amazon,
    Shopify { domain: String },
}

impl Store {
    pub fn shopify(domain: impl Into<String>) -> Self {
        Store::Shopify {
            domain: domain.into(),
        }
    }

    /// Stable key persisted in `items.store_key`: `"amazon"` or the shop domain.
    pub fn key(&self) -> &str {
        match self {
            Store::Amazon => AMAZON_STORE_KEY,
            Store::Shopify { domain } => domain.as_str(),
        }
    }

    /// Inverse of [`Store::key`]. Anything that is not `"amazon"` is a Shopify domain.
    pub fn from_key(key: &str) -> Option<Self> {
        let k = key.trim();
        if k.is_empty() {
            return None;
        }
        if k.eq_ignore_ascii_case(AMAZON_STORE_KEY) {
            return Some(Store::Amazon);
        }
        Some(Store::shopify(k.to_ascii_lowercase()))
    }

    pub fn is_amazon(&self) -> bool {
        matches!(self, Store::Amazon)
    }
}

impl std::fmt::Display for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Remote product identity: Amazon ASIN or Shopify variant id, scoped to a store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductRef {
    pub store: Store,
    pub product_id: String,
}

impl ProductRef {
    pub fn new(store: Store, product_id: impl Into<String>) -> Self {
        Self {
            store,
            product_id: product_id.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Needs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NeedKind {
    Drive,
    Child,
}

impl NeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NeedKind::Drive => "DRIVE",
            NeedKind::Child => "CHILD",
        }
    }

    /// Accepts `DRIVE`/`CHILD` in any case, plus the URL-friendly `drive`/`child`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRIVE" => Some(NeedKind::Drive),
            "CHILD" => Some(NeedKind::Child),
            _ => None,
        }
    }
}

/// Reference to one "N units of item X needed" row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NeedRef {
    /// A `drive_items` row.
    Drive(Uuid),
    /// A `child_items` row.
    Child(Uuid),
}

impl NeedRef {
    pub fn new(kind: NeedKind, id: Uuid) -> Self {
        match kind {
            NeedKind::Drive => NeedRef::Drive(id),
            NeedKind::Child => NeedRef::Child(id),
        }
    }

    pub fn kind(&self) -> NeedKind {
        match self {
            NeedRef::Drive(_) => NeedKind::Drive,
            NeedRef::Child(_) => NeedKind::Child,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            NeedRef::Drive(id) | NeedRef::Child(id) => *id,
        }
    }
}

impl std::fmt::Display for NeedRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.id())
    }
}

// ---------------------------------------------------------------------------
// Remote cart (as observed from the commerce API)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCartLine {
    pub product_id: String,
    pub quantity: i64,
}

/// Store-level error reported by the commerce API (out of stock, invalid
/// variant, shipping unavailable, …). `product_id` is set when the API
/// attributes the error to a single line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStoreError {
    pub code: String,
    pub message: String,
    pub product_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStoreCart {
    pub store: Store,
    pub lines: Vec<RemoteCartLine>,
    pub errors: Vec<RemoteStoreError>,
}

impl RemoteStoreCart {
    pub fn quantity_of(&self, product_id: &str) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.product_id == product_id)
            .map(|l| l.quantity)
            .sum()
    }

    /// Errors attributed to `product_id`, plus store-wide errors (no product).
    pub fn errors_for(&self, product_id: &str) -> Vec<&RemoteStoreError> {
        self.errors
            .iter()
            .filter(|e| e.product_id.as_deref().map_or(true, |p| p == product_id))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCart {
    pub cart_id: String,
    pub stores: Vec<RemoteStoreCart>,
}

impl RemoteCart {
    pub fn store(&self, store: &Store) -> Option<&RemoteStoreCart> {
        self.stores.iter().find(|s| &s.store == store)
    }

    pub fn quantity_of(&self, product: &ProductRef) -> i64 {
        self.store(&product.store)
            .map(|s| s.quantity_of(&product.product_id))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.stores.iter().all(|s| s.lines.is_empty())
    }
}

/// One line of a cart mutation sent to the commerce API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItemInput {
    pub product: ProductRef,
    pub quantity: i64,
}

impl CartItemInput {
    pub fn new(product: ProductRef, quantity: i64) -> Self {
        Self { product, quantity }
    }
}

// ---------------------------------------------------------------------------
// Submission result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreSubmitStatus {
    Completed,
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSubmitResult {
    pub store: Store,
    pub status: StoreSubmitStatus,
    /// Remote checkout request id. Present for completed stores; it is the
    /// idempotency key for local order finalization.
    pub request_id: Option<String>,
    #[serde(default)]
    pub errors: Vec<RemoteStoreError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub cart_id: String,
    pub stores: Vec<StoreSubmitResult>,
}
