//! gd-reconcile
//!
//! Local cart mirror vs. remote cart reconciliation, plus the availability
//! arithmetic behind the no-oversell rule.
//!
//! - Purchased + in-cart + wanted must never exceed requested
//! - The mirror is authoritative for quantities; drift is repaired remotely
//! - Store-level errors block checkout
//! - Clean reconcile and fitting quantities are required before submit
//!
//! Deterministic, pure logic. No IO. No remote calls.

mod engine;
mod gate;
mod types;

pub use engine::{apply_clamps, plan_clamp, plan_repair, reconcile_cart, remote_product_totals};
pub use gate::{check_checkout_gate, CheckoutGate};
pub use types::*;
