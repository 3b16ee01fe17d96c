//! In-memory commerce cart with failure injection.
//!
//! Behaves like the remote API for the operations the cart service uses:
//! additive `add_items`, absolute `update_items`, per-store errors, expiry and
//! per-store submit outcomes. Request ids are derived from the cart id and
//! store key, so submitting the same cart twice yields the same ids.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;
use gd_rye::{CommerceCart, RyeError};
use gd_schemas::{
    CartItemInput, ProductRef, RemoteCart, RemoteCartLine, RemoteStoreCart, RemoteStoreError, Store,
    StoreSubmitResult, StoreSubmitStatus, SubmitResult,
};

#[derive(Debug, Default)]
struct FakeCart {
    lines: BTreeMap<ProductRef, i64>,
    expired: bool,
}

#[derive(Debug, Default)]
struct State {
    next_cart: u64,
    carts: BTreeMap<String, FakeCart>,
    product_errors: BTreeMap<ProductRef, String>,
    store_errors: BTreeMap<Store, String>,
    submit_status: BTreeMap<Store, StoreSubmitStatus>,
    fail_next: Vec<RyeError>,
    fail_op: BTreeMap<String, RyeError>,
    calls: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeCommerce {
    state: Mutex<State>,
}

impl FakeCommerce {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    // --- failure injection ---

    /// Every later call touching `cart_id` fails with `CartExpired`.
    pub fn expire_cart(&self, cart_id: &str) {
        if let Some(c) = self.state().carts.get_mut(cart_id) {
            c.expired = true;
        }
    }

    /// The next remote call fails with `err` (queued, FIFO).
    pub fn fail_next(&self, err: RyeError) {
        self.state().fail_next.push(err);
    }

    /// The next call of operation `op` (e.g. `"submit_cart"`) fails with `err`.
    pub fn fail_op(&self, op: &str, err: RyeError) {
        self.state().fail_op.insert(op.to_string(), err);
    }

    /// Report a store error naming `product` whenever it is in a cart.
    pub fn reject_product(&self, product: &ProductRef, code: &str) {
        self.state()
            .product_errors
            .insert(product.clone(), code.to_string());
    }

    pub fn clear_rejections(&self) {
        self.state().product_errors.clear();
    }

    /// Report a store-wide error (no product attribution).
    pub fn store_error(&self, store: &Store, code: &str) {
        self.state()
            .store_errors
            .insert(store.clone(), code.to_string());
    }

    /// Outcome `submit_cart` reports for `store`. Defaults to `Completed`.
    pub fn set_submit_status(&self, store: &Store, status: StoreSubmitStatus) {
        self.state().submit_status.insert(store.clone(), status);
    }

    // --- out-of-band remote edits ---

    /// Change a remote line behind the service's back (drift).
    pub fn set_remote_quantity(&self, cart_id: &str, product: &ProductRef, quantity: i64) {
        if let Some(c) = self.state().carts.get_mut(cart_id) {
            if quantity <= 0 {
                c.lines.remove(product);
            } else {
                c.lines.insert(product.clone(), quantity);
            }
        }
    }

    // --- inspection ---

    pub fn remote_quantity(&self, cart_id: &str, product: &ProductRef) -> i64 {
        self.state()
            .carts
            .get(cart_id)
            .and_then(|c| c.lines.get(product).copied())
            .unwrap_or(0)
    }

    pub fn cart_count(&self) -> usize {
        self.state().carts.len()
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn request_id_for(cart_id: &str, store: &Store) -> String {
        format!("req_{cart_id}_{}", store.key())
    }

    // --- internals ---

    fn begin(&self, st: &mut State, op: &str) -> Result<(), RyeError> {
        st.calls.push(op.to_string());
        if let Some(err) = st.fail_op.remove(op) {
            return Err(err);
        }
        if st.fail_next.is_empty() {
            return Ok(());
        }
        Err(st.fail_next.remove(0))
    }

    fn live_cart<'a>(st: &'a mut State, cart_id: &str) -> Result<&'a mut FakeCart, RyeError> {
        match st.carts.get_mut(cart_id) {
            Some(c) if !c.expired => Ok(c),
            _ => Err(RyeError::CartExpired {
                cart_id: cart_id.to_string(),
            }),
        }
    }

    fn snapshot(st: &State, cart_id: &str) -> RemoteCart {
        let mut stores: BTreeMap<Store, RemoteStoreCart> = BTreeMap::new();
        if let Some(c) = st.carts.get(cart_id) {
            for (p, q) in &c.lines {
                let sc = stores
                    .entry(p.store.clone())
                    .or_insert_with(|| RemoteStoreCart {
                        store: p.store.clone(),
                        lines: Vec::new(),
                        errors: Vec::new(),
                    });
                sc.lines.push(RemoteCartLine {
                    product_id: p.product_id.clone(),
                    quantity: *q,
                });
                if let Some(code) = st.product_errors.get(p) {
                    sc.errors.push(RemoteStoreError {
                        code: code.clone(),
                        message: format!("{code} for {}", p.product_id),
                        product_id: Some(p.product_id.clone()),
                    });
                }
            }
        }
        for sc in stores.values_mut() {
            if let Some(code) = st.store_errors.get(&sc.store) {
                sc.errors.push(RemoteStoreError {
                    code: code.clone(),
                    message: format!("{code} for store {}", sc.store),
                    product_id: None,
                });
            }
        }
        RemoteCart {
            cart_id: cart_id.to_string(),
            stores: stores.into_values().collect(),
        }
    }
}

#[async_trait]
impl CommerceCart for FakeCommerce {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_cart(&self, items: &[CartItemInput]) -> Result<RemoteCart, RyeError> {
        let mut st = self.state();
        self.begin(&mut st, "create_cart")?;
        st.next_cart += 1;
        // Unique across instances: tests share one database and
        // carts.remote_cart_id is unique.
        let id = format!("fake_cart_{}_{}", st.next_cart, Uuid::new_v4().simple());
        let mut cart = FakeCart::default();
        for i in items {
            *cart.lines.entry(i.product.clone()).or_insert(0) += i.quantity;
        }
        st.carts.insert(id.clone(), cart);
        Ok(Self::snapshot(&st, &id))
    }

    async fn add_items(&self, cart_id: &str, items: &[CartItemInput]) -> Result<RemoteCart, RyeError> {
        let mut st = self.state();
        self.begin(&mut st, "add_items")?;
        let cart = Self::live_cart(&mut st, cart_id)?;
        for i in items {
            *cart.lines.entry(i.product.clone()).or_insert(0) += i.quantity;
        }
        Ok(Self::snapshot(&st, cart_id))
    }

    async fn update_items(&self, cart_id: &str, items: &[CartItemInput]) -> Result<RemoteCart, RyeError> {
        let mut st = self.state();
        self.begin(&mut st, "update_items")?;
        let cart = Self::live_cart(&mut st, cart_id)?;
        for i in items {
            if i.quantity <= 0 {
                cart.lines.remove(&i.product);
            } else {
                cart.lines.insert(i.product.clone(), i.quantity);
            }
        }
        Ok(Self::snapshot(&st, cart_id))
    }

    async fn remove_items(&self, cart_id: &str, products: &[ProductRef]) -> Result<RemoteCart, RyeError> {
        let mut st = self.state();
        self.begin(&mut st, "remove_items")?;
        let cart = Self::live_cart(&mut st, cart_id)?;
        for p in products {
            cart.lines.remove(p);
        }
        Ok(Self::snapshot(&st, cart_id))
    }

    async fn get_cart(&self, cart_id: &str) -> Result<RemoteCart, RyeError> {
        let mut st = self.state();
        self.begin(&mut st, "get_cart")?;
        Self::live_cart(&mut st, cart_id)?;
        Ok(Self::snapshot(&st, cart_id))
    }

    async fn submit_cart(&self, cart_id: &str, payment_token: &str) -> Result<SubmitResult, RyeError> {
        let mut st = self.state();
        self.begin(&mut st, "submit_cart")?;
        if payment_token.is_empty() {
            return Err(RyeError::Api {
                code: Some("INVALID_PAYMENT".to_string()),
                message: "missing payment token".to_string(),
            });
        }
        Self::live_cart(&mut st, cart_id)?;

        let snapshot = Self::snapshot(&st, cart_id);
        let stores = snapshot
            .stores
            .into_iter()
            .map(|sc| {
                let status = st
                    .submit_status
                    .get(&sc.store)
                    .copied()
                    .unwrap_or(StoreSubmitStatus::Completed);
                let request_id = match status {
                    StoreSubmitStatus::Completed => Some(Self::request_id_for(cart_id, &sc.store)),
                    _ => None,
                };
                let errors = match status {
                    StoreSubmitStatus::Failed => vec![RemoteStoreError {
                        code: "PAYMENT_FAILED".to_string(),
                        message: "store checkout failed".to_string(),
                        product_id: None,
                    }],
                    _ => Vec::new(),
                };
                StoreSubmitResult {
                    store: sc.store,
                    status,
                    request_id,
                    errors,
                }
            })
            .collect();
        tracing::debug!(cart_id, "fake cart submitted");
        Ok(SubmitResult {
            cart_id: cart_id.to_string(),
            stores,
        })
    }
}
