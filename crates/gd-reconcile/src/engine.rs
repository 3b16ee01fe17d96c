use std::collections::{BTreeMap, BTreeSet};

use gd_schemas::{NeedRef, ProductRef, RemoteCart};

use crate::{
    CartDiff, CartReconcileReport, Clamp, LocalCartMirror, MirrorLine, NeedLedger,
    ReconcileAction, ReconcileReason, RepairOp,
};

fn push_reason_once(reasons: &mut Vec<ReconcileReason>, r: ReconcileReason) {
    if !reasons.contains(&r) {
        reasons.push(r);
    }
}

/// Aggregate remote quantity per product across every store.
pub fn remote_product_totals(remote: &RemoteCart) -> BTreeMap<ProductRef, i64> {
    let mut out: BTreeMap<ProductRef, i64> = BTreeMap::new();
    for sc in &remote.stores {
        for line in &sc.lines {
            let key = ProductRef::new(sc.store.clone(), line.product_id.clone());
            *out.entry(key).or_insert(0) += line.quantity;
        }
    }
    out
}

/// Deterministic mirror-vs-remote comparison:
/// - remote product unknown to the mirror => Repair
/// - mirror product missing remotely      => Repair
/// - quantity drift                       => Repair
/// - any store-level error                => Blocked (dominates Repair)
pub fn reconcile_cart(local: &LocalCartMirror, remote: &RemoteCart) -> CartReconcileReport {
    let mut reasons: Vec<ReconcileReason> = Vec::new();
    let mut diffs: Vec<CartDiff> = Vec::new();

    let local_totals = local.product_totals();
    let remote_totals = remote_product_totals(remote);

    let products: BTreeSet<&ProductRef> = local_totals.keys().chain(remote_totals.keys()).collect();

    for product in products {
        let lq = local_totals.get(product).copied().unwrap_or(0);
        let rq = remote_totals.get(product).copied().unwrap_or(0);
        match (lq, rq) {
            (l, r) if l == r => {}
            (0, r) => {
                diffs.push(CartDiff::UnknownRemoteLine {
                    product: product.clone(),
                    remote_qty: r,
                });
                push_reason_once(&mut reasons, ReconcileReason::UnknownRemoteLine);
            }
            (l, 0) => {
                diffs.push(CartDiff::MissingRemoteLine {
                    product: product.clone(),
                    local_qty: l,
                });
                push_reason_once(&mut reasons, ReconcileReason::MissingRemoteLine);
            }
            (l, r) => {
                diffs.push(CartDiff::QuantityMismatch {
                    product: product.clone(),
                    local_qty: l,
                    remote_qty: r,
                });
                push_reason_once(&mut reasons, ReconcileReason::QuantityDrift);
            }
        }
    }

    let mut blocked = false;
    for sc in &remote.stores {
        for e in &sc.errors {
            diffs.push(CartDiff::StoreError {
                store: sc.store.clone(),
                code: e.code.clone(),
                message: e.message.clone(),
                product_id: e.product_id.clone(),
            });
            push_reason_once(&mut reasons, ReconcileReason::StoreError);
            blocked = true;
        }
    }

    reasons.sort();
    diffs.sort();

    if reasons.is_empty() {
        return CartReconcileReport::clean();
    }

    CartReconcileReport {
        action: if blocked {
            ReconcileAction::Blocked
        } else {
            ReconcileAction::Repair
        },
        reasons,
        diffs,
    }
}

/// Remote mutations that make the remote cart match the mirror.
///
/// The mirror is authoritative for quantities because only it links lines to
/// needs. Store errors produce no op.
pub fn plan_repair(report: &CartReconcileReport) -> Vec<RepairOp> {
    let mut ops: Vec<RepairOp> = report
        .diffs
        .iter()
        .filter_map(|d| match d {
            CartDiff::UnknownRemoteLine { product, .. } => Some(RepairOp::Remove {
                product: product.clone(),
            }),
            CartDiff::MissingRemoteLine { product, local_qty } => Some(RepairOp::Add {
                product: product.clone(),
                quantity: *local_qty,
            }),
            CartDiff::QuantityMismatch {
                product, local_qty, ..
            } => Some(RepairOp::SetQuantity {
                product: product.clone(),
                quantity: *local_qty,
            }),
            CartDiff::StoreError { .. } => None,
        })
        .collect();
    ops.sort();
    ops
}

/// Mirror lines whose quantity no longer fits the need.
///
/// Other donors' carts do not reserve stock, so a line fits iff
/// `purchased + quantity <= requested`. A line whose need has disappeared
/// from `ledgers` is clamped to 0.
pub fn plan_clamp(lines: &[MirrorLine], ledgers: &BTreeMap<NeedRef, NeedLedger>) -> Vec<Clamp> {
    let mut out: Vec<Clamp> = lines
        .iter()
        .filter_map(|l| {
            let allowed = ledgers.get(&l.need).map(|n| n.remaining()).unwrap_or(0);
            if l.quantity <= allowed {
                return None;
            }
            Some(Clamp {
                need: l.need,
                product: l.product.clone(),
                current: l.quantity,
                allowed,
            })
        })
        .collect();
    out.sort();
    out
}

/// Apply clamps to a mirror, dropping lines clamped to 0.
pub fn apply_clamps(local: &LocalCartMirror, clamps: &[Clamp]) -> LocalCartMirror {
    let lines = local
        .lines
        .iter()
        .filter_map(|l| match clamps.iter().find(|c| c.need == l.need) {
            Some(c) if c.drops_line() => None,
            Some(c) => Some(MirrorLine {
                quantity: c.allowed,
                ..l.clone()
            }),
            None => Some(l.clone()),
        })
        .collect();
    LocalCartMirror::new(lines)
}
