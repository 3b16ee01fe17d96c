use std::collections::BTreeMap;

use gd_schemas::{NeedRef, ProductRef, Store};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Need ledger
// ---------------------------------------------------------------------------

/// Requested vs. purchased units for one drive item or child item.
///
/// `purchased` is the sum of every finalized order line referencing the need.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedLedger {
    pub requested: i64,
    pub purchased: i64,
}

impl NeedLedger {
    pub fn new(requested: i64, purchased: i64) -> Self {
        Self {
            requested,
            purchased,
        }
    }

    /// Units still needed. Never negative, even if the ledger is already
    /// over-purchased (legacy rows, manual edits).
    pub fn remaining(&self) -> i64 {
        (self.requested - self.purchased).max(0)
    }

    pub fn is_fulfilled(&self) -> bool {
        self.remaining() == 0
    }

    /// Accept iff `purchased + in_cart + wanted <= requested`.
    ///
    /// `in_cart` is what the same donor already holds for this need and is
    /// not being replaced. Pass 0 when `wanted` is an absolute replacement.
    pub fn check_quantity(&self, in_cart: i64, wanted: i64) -> Result<(), Oversell> {
        let total = self
            .purchased
            .saturating_add(in_cart)
            .saturating_add(wanted);
        if total > self.requested {
            return Err(Oversell {
                requested: self.requested,
                purchased: self.purchased,
                in_cart,
                wanted,
            });
        }
        Ok(())
    }
}

/// Refusal evidence: accepting `wanted` would exceed the requested quantity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Oversell {
    pub requested: i64,
    pub purchased: i64,
    pub in_cart: i64,
    pub wanted: i64,
}

impl Oversell {
    /// Largest `wanted` that would have been accepted.
    pub fn allowed(&self) -> i64 {
        (self.requested - self.purchased - self.in_cart).max(0)
    }
}

impl std::fmt::Display for Oversell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "quantity exceeds need: requested={} purchased={} in_cart={} wanted={} allowed={}",
            self.requested,
            self.purchased,
            self.in_cart,
            self.wanted,
            self.allowed()
        )
    }
}

impl std::error::Error for Oversell {}

// ---------------------------------------------------------------------------
// Local cart mirror
// ---------------------------------------------------------------------------

/// One `cart_contents` row as seen by reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MirrorLine {
    pub need: NeedRef,
    pub product: ProductRef,
    pub quantity: i64,
}

/// What the local DB believes the remote cart contains.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalCartMirror {
    pub lines: Vec<MirrorLine>,
}

impl LocalCartMirror {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(lines: Vec<MirrorLine>) -> Self {
        Self { lines }
    }

    /// Aggregate quantity per product. Two needs may point at the same
    /// product (a drive-level and a child-level request for one toy); the
    /// remote cart only sees the sum.
    pub fn product_totals(&self) -> BTreeMap<ProductRef, i64> {
        let mut out: BTreeMap<ProductRef, i64> = BTreeMap::new();
        for l in &self.lines {
            *out.entry(l.product.clone()).or_insert(0) += l.quantity;
        }
        out
    }

    pub fn line(&self, need: &NeedRef) -> Option<&MirrorLine> {
        self.lines.iter().find(|l| &l.need == need)
    }
}

// ---------------------------------------------------------------------------
// Reconcile report
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileAction {
    /// Mirror and remote agree; no store errors.
    Clean,
    /// Quantities drifted; [`crate::plan_repair`] can bring the remote back in line.
    Repair,
    /// The remote reports store errors; the donor must change the cart.
    Blocked,
}

/// Stable ordering enforced by the engine.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileReason {
    UnknownRemoteLine,
    MissingRemoteLine,
    QuantityDrift,
    StoreError,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartDiff {
    /// Remote cart holds a product the mirror does not know about.
    UnknownRemoteLine { product: ProductRef, remote_qty: i64 },
    /// Mirror has a product the remote cart lost (expired line, manual edit).
    MissingRemoteLine { product: ProductRef, local_qty: i64 },
    QuantityMismatch {
        product: ProductRef,
        local_qty: i64,
        remote_qty: i64,
    },
    StoreError {
        store: Store,
        code: String,
        message: String,
        product_id: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartReconcileReport {
    pub action: ReconcileAction,
    pub reasons: Vec<ReconcileReason>,
    pub diffs: Vec<CartDiff>,
}

impl CartReconcileReport {
    pub fn clean() -> Self {
        Self {
            action: ReconcileAction::Clean,
            reasons: Vec::new(),
            diffs: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.action == ReconcileAction::Clean
    }
}

/// Remote-side mutation planned by [`crate::plan_repair`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RepairOp {
    Remove { product: ProductRef },
    Add { product: ProductRef, quantity: i64 },
    SetQuantity { product: ProductRef, quantity: i64 },
}

/// A mirror line that no longer fits its need's availability.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Clamp {
    pub need: NeedRef,
    pub product: ProductRef,
    pub current: i64,
    /// Quantity that still fits; 0 means the line must be dropped.
    pub allowed: i64,
}

impl Clamp {
    pub fn drops_line(&self) -> bool {
        self.allowed == 0
    }
}
