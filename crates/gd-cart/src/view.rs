//! Result types returned by the cart service. All of them serialize directly
//! as HTTP response bodies.

use gd_reconcile::{CartDiff, CartReconcileReport, Clamp, RepairOp};
use gd_schemas::{NeedRef, ProductRef, RemoteCartLine, RemoteStoreError, Store, SubmitResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Remote cart augmented with local need metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartView {
    pub donor_id: String,
    /// `None` when the donor has no open cart.
    pub cart_id: Option<Uuid>,
    pub remote_cart_id: Option<String>,
    pub stores: Vec<StoreView>,
    /// The remote cart had expired and was rebuilt from the mirror.
    pub recreated: bool,
    /// Lines reduced or dropped while rebuilding.
    #[serde(default)]
    pub clamps: Vec<Clamp>,
}

impl CartView {
    pub fn empty(donor_id: &str) -> Self {
        Self {
            donor_id: donor_id.to_string(),
            cart_id: None,
            remote_cart_id: None,
            stores: Vec::new(),
            recreated: false,
            clamps: Vec::new(),
        }
    }

    pub fn line(&self, need: &NeedRef) -> Option<&CartLineView> {
        self.stores
            .iter()
            .flat_map(|s| s.lines.iter())
            .find(|l| &l.need == need)
    }

    pub fn line_count(&self) -> usize {
        self.stores.iter().map(|s| s.lines.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreView {
    pub store: Store,
    pub lines: Vec<CartLineView>,
    /// Remote lines no mirror row accounts for.
    pub unknown_lines: Vec<RemoteCartLine>,
    pub errors: Vec<RemoteStoreError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineView {
    pub need: NeedRef,
    pub product: ProductRef,
    pub quantity: i64,
    /// Remote quantity for the product (all needs sharing it).
    pub remote_quantity: i64,
    pub item_name: String,
    pub image_url: Option<String>,
    pub price_cents: Option<i64>,
    pub drive_id: Option<Uuid>,
    pub drive_name: Option<String>,
    pub child_id: Option<Uuid>,
    pub child_name: Option<String>,
    pub requested: i64,
    pub purchased: i64,
    pub remaining: i64,
}

// ---------------------------------------------------------------------------
// Validation / reconcile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "problem", content = "detail", rename_all = "snake_case")]
pub enum CheckoutProblem {
    EmptyCart,
    RemoteCartExpired { remote_cart_id: String },
    Diff(CartDiff),
    Clamp(Clamp),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutValidation {
    pub ok: bool,
    pub problems: Vec<CheckoutProblem>,
}

impl CheckoutValidation {
    pub fn ok() -> Self {
        Self {
            ok: true,
            problems: Vec::new(),
        }
    }

    pub fn blocked(problems: Vec<CheckoutProblem>) -> Self {
        Self {
            ok: false,
            problems,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub cart_id: Uuid,
    pub remote_cart_id: String,
    /// Mirror vs. remote before any change.
    pub before: CartReconcileReport,
    pub clamps: Vec<Clamp>,
    pub applied: Vec<RepairOp>,
    /// Mirror vs. remote after clamps and repair.
    pub after: CartReconcileReport,
    pub recreated: bool,
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub need: NeedRef,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalizeOutcome {
    Finalized {
        order_id: Uuid,
        request_id: String,
        items: Vec<OrderLine>,
    },
    AlreadyFinalized {
        order_id: Uuid,
        request_id: String,
    },
    /// Recording the purchase would exceed the need; nothing was persisted
    /// for this store.
    Oversold {
        need: NeedRef,
        requested: i64,
        purchased: i64,
        wanted: i64,
    },
    Pending,
    Failed {
        errors: Vec<RemoteStoreError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFinalize {
    pub store: Store,
    pub outcome: FinalizeOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeReport {
    pub cart_id: Uuid,
    pub remote_cart_id: String,
    pub stores: Vec<StoreFinalize>,
    /// No mirror lines remain; the cart was marked SUBMITTED.
    pub cart_submitted: bool,
}

impl FinalizeReport {
    pub fn outcome_for(&self, store: &Store) -> Option<&FinalizeOutcome> {
        self.stores.iter().find(|s| &s.store == store).map(|s| &s.outcome)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutOutcome {
    pub submit: SubmitResult,
    pub finalize: FinalizeReport,
}
