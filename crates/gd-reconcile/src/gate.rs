//! Checkout gate.
//!
//! A donor may only submit a remote cart when:
//!
//! 1. the mirror and the remote cart agree (reconcile is CLEAN), and
//! 2. every mirror line still fits its need's remaining quantity.
//!
//! Pure deterministic: no IO, no clock.

use std::collections::BTreeMap;

use gd_schemas::{NeedRef, RemoteCart};
use serde::{Deserialize, Serialize};

use crate::{plan_clamp, reconcile_cart, CartReconcileReport, Clamp, LocalCartMirror, NeedLedger};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum CheckoutGate {
    Permitted,
    /// Carries the full evidence; callers must not submit.
    Blocked {
        report: CartReconcileReport,
        clamps: Vec<Clamp>,
    },
}

impl CheckoutGate {
    pub fn is_permitted(&self) -> bool {
        matches!(self, CheckoutGate::Permitted)
    }

    pub fn is_blocked(&self) -> bool {
        !self.is_permitted()
    }
}

/// An empty cart is never permitted: there is nothing to check out.
pub fn check_checkout_gate(
    local: &LocalCartMirror,
    remote: &RemoteCart,
    ledgers: &BTreeMap<NeedRef, NeedLedger>,
) -> CheckoutGate {
    let report = reconcile_cart(local, remote);
    let clamps = plan_clamp(&local.lines, ledgers);
    if report.is_clean() && clamps.is_empty() && !local.lines.is_empty() {
        CheckoutGate::Permitted
    } else {
        CheckoutGate::Blocked { report, clamps }
    }
}
