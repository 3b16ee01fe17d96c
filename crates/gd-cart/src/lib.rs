//! gd-cart
//!
//! Cart service: keeps the local mirror, the need ledger and the remote
//! commerce cart consistent for every donor-facing cart operation.
//!
//! Locking order inside a transaction is always: the donor's cart row, then
//! need rows sorted by id. Writers that change purchased or in-cart
//! quantities lock the need first, so two donors can never both pass the
//! availability check for the last unit.
//!
//! Remote mutations happen while the local transaction is open. A remote
//! refusal drops the transaction; a local failure after the remote accepted
//! compensates the remote line back to its previous quantity.

mod error;
mod service;
mod view;

pub use error::CartError;
pub use service::CartService;
pub use view::*;
