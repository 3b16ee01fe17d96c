use std::collections::{BTreeMap, BTreeSet};
use std::slice;
use std::sync::Arc;

use anyhow::Context;
use gd_config::CartSettings;
use gd_db::{CartLineRow, CartRow, CartStatus, NeedAvailability, NewOrder};
use gd_reconcile::{
    apply_clamps, check_checkout_gate, plan_clamp, plan_repair, reconcile_cart, CheckoutGate, Clamp,
    LocalCartMirror, NeedLedger, RepairOp,
};
use gd_rye::{CommerceCart, RyeError};
use gd_schemas::{
    CartItemInput, NeedRef, ProductRef, RemoteCart, RemoteStoreError, Store, StoreSubmitStatus,
    SubmitResult,
};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    CartError, CartLineView, CartView, CheckoutOutcome, CheckoutProblem, CheckoutValidation,
    FinalizeOutcome, FinalizeReport, OrderLine, ReconcileOutcome, StoreFinalize, StoreView,
};

#[derive(Clone)]
pub struct CartService {
    pool: PgPool,
    commerce: Arc<dyn CommerceCart>,
    settings: CartSettings,
}

/// A single-product remote change.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RemoteMutation {
    /// Add to whatever the remote holds.
    Add(CartItemInput),
    /// Set the absolute quantity; 0 removes the line.
    Set(CartItemInput),
}

impl CartService {
    pub fn new(pool: PgPool, commerce: Arc<dyn CommerceCart>, settings: CartSettings) -> Self {
        Self {
            pool,
            commerce,
            settings,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn commerce_name(&self) -> &'static str {
        self.commerce.name()
    }

    pub fn settings(&self) -> &CartSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn need(&self, need: NeedRef) -> Result<NeedAvailability, CartError> {
        gd_db::need_availability(&self.pool, need)
            .await?
            .ok_or(CartError::NeedNotFound { need })
    }

    /// Remote cart augmented with mirror metadata. An expired remote cart is
    /// rebuilt from the mirror when `cart.recreate_expired` is set. One with
    /// nothing left to rebuild is marked EXPIRED and the donor starts over.
    pub async fn get_cart(&self, donor_id: &str) -> Result<CartView, CartError> {
        check_donor(donor_id)?;
        let mut tx = self.pool.begin().await?;
        let Some(mut cart) = gd_db::lock_open_cart_for_donor(&mut *tx, donor_id).await? else {
            return Ok(CartView::empty(donor_id));
        };

        let fetched = self.commerce.get_cart(&cart.remote_cart_id).await;
        if matches!(&fetched, Err(e) if e.is_cart_expired())
            && gd_db::cart_lines(&mut *tx, cart.cart_id).await?.is_empty()
        {
            gd_db::mark_cart_status(&mut *tx, cart.cart_id, CartStatus::Expired).await?;
            tx.commit().await.context("get_cart commit failed")?;
            tracing::info!(
                donor_id,
                cart_id = %cart.cart_id,
                remote_cart_id = %cart.remote_cart_id,
                "empty cart expired remotely; closed"
            );
            return Ok(CartView::empty(donor_id));
        }

        let (remote, recreated, clamps) = match fetched {
            Ok(r) => (r, false, Vec::new()),
            Err(e) if e.is_cart_expired() && self.settings.recreate_expired => {
                let (r, clamps) = self.recreate_remote(&mut *tx, &mut cart).await?;
                (r, true, clamps)
            }
            Err(e) => return Err(e.into()),
        };

        let mut view = build_view(&mut *tx, donor_id, &cart, &remote).await?;
        tx.commit().await.context("get_cart commit failed")?;
        view.recreated = recreated;
        view.clamps = clamps;
        Ok(view)
    }

    /// Read-only: mirror vs. remote plus availability of every line.
    pub async fn validate_checkout(&self, donor_id: &str) -> Result<CheckoutValidation, CartError> {
        check_donor(donor_id)?;
        let mut conn = self.pool.acquire().await?;
        let cart = gd_db::open_cart_for_donor(&mut *conn, donor_id)
            .await?
            .ok_or_else(|| no_open_cart(donor_id))?;

        let lines = gd_db::cart_lines(&mut *conn, cart.cart_id).await?;
        let mirror = gd_db::mirror_from_lines(&lines);

        let remote = match self.commerce.get_cart(&cart.remote_cart_id).await {
            Ok(r) => r,
            Err(e) if e.is_cart_expired() => {
                return Ok(CheckoutValidation::blocked(vec![
                    CheckoutProblem::RemoteCartExpired {
                        remote_cart_id: cart.remote_cart_id,
                    },
                ]));
            }
            Err(e) => return Err(e.into()),
        };

        let ledgers = gd_db::need_ledgers(&mut *conn, &needs_of(&lines)).await?;
        let gate = check_checkout_gate(&mirror, &remote, &ledgers);
        let validation = validation_from_gate(&mirror, gate);
        tracing::debug!(
            donor_id,
            ok = validation.ok,
            problems = validation.problems.len(),
            "checkout validated"
        );
        Ok(validation)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub async fn add_item(&self, donor_id: &str, need: NeedRef, quantity: i64) -> Result<CartView, CartError> {
        check_donor(donor_id)?;
        if quantity < 1 {
            return Err(CartError::InvalidQuantity { quantity });
        }

        let mut tx = self.pool.begin().await?;
        let cart = gd_db::lock_open_cart_for_donor(&mut *tx, donor_id).await?;
        let row = gd_db::lock_need(&mut *tx, need)
            .await?
            .ok_or(CartError::NeedNotFound { need })?;
        let ledger = gd_db::ledger_for_row(&mut *tx, &row).await?;

        let lines = match &cart {
            Some(c) => gd_db::cart_lines(&mut *tx, c.cart_id).await?,
            None => Vec::new(),
        };
        let in_cart = line_quantity(&lines, need);
        ledger
            .check_quantity(in_cart, quantity)
            .map_err(|detail| CartError::Oversell { need, detail })?;

        let product = row.product.clone();
        let prev_total = product_total(&lines, &product);
        let item = CartItemInput::new(product.clone(), quantity);

        let (cart, remote) = match cart {
            Some(mut c) => {
                let remote = self
                    .mutate_remote(&mut *tx, &mut c, &RemoteMutation::Add(item))
                    .await?;
                (c, remote)
            }
            None => {
                let remote = self.commerce.create_cart(slice::from_ref(&item)).await?;
                match gd_db::insert_cart(&mut *tx, donor_id, &remote.cart_id).await {
                    Ok(c) => {
                        tracing::info!(donor_id, cart_id = %c.cart_id, remote_cart_id = %remote.cart_id, "cart opened");
                        (c, remote)
                    }
                    Err(e) => {
                        self.compensate(&remote.cart_id, &product, 0).await;
                        return Err(e.into());
                    }
                }
            }
        };

        if let Some(errors) = rejection(&remote, &product) {
            self.compensate(&cart.remote_cart_id, &product, prev_total).await;
            return Err(CartError::StoreRejected {
                store: product.store.clone(),
                product_id: product.product_id.clone(),
                errors,
            });
        }

        let new_qty = in_cart + quantity;
        let written = gd_db::upsert_cart_line(&mut *tx, cart.cart_id, need, new_qty).await;
        self.finish(tx, written, &cart, &product, prev_total)
            .await?;

        tracing::info!(donor_id, %need, quantity, in_cart = new_qty, "cart item added");
        self.view_after(donor_id, &cart, &remote).await
    }

    /// Set the absolute quantity of a line. `0` removes it.
    pub async fn update_item(
        &self,
        donor_id: &str,
        need: NeedRef,
        quantity: i64,
    ) -> Result<CartView, CartError> {
        if quantity == 0 {
            return self.remove_item(donor_id, need).await;
        }
        check_donor(donor_id)?;
        if quantity < 0 {
            return Err(CartError::InvalidQuantity { quantity });
        }

        let mut tx = self.pool.begin().await?;
        let mut cart = gd_db::lock_open_cart_for_donor(&mut *tx, donor_id)
            .await?
            .ok_or_else(|| no_open_cart(donor_id))?;
        let row = gd_db::lock_need(&mut *tx, need)
            .await?
            .ok_or(CartError::NeedNotFound { need })?;
        let ledger = gd_db::ledger_for_row(&mut *tx, &row).await?;

        let lines = gd_db::cart_lines(&mut *tx, cart.cart_id).await?;
        let current = lines
            .iter()
            .find(|l| l.need == need)
            .map(|l| l.quantity)
            .ok_or(CartError::NotInCart { need })?;
        ledger
            .check_quantity(0, quantity)
            .map_err(|detail| CartError::Oversell { need, detail })?;

        let product = row.product.clone();
        let prev_total = product_total(&lines, &product);
        let new_total = prev_total - current + quantity;
        let remote = self
            .mutate_remote(
                &mut *tx,
                &mut cart,
                &RemoteMutation::Set(CartItemInput::new(product.clone(), new_total)),
            )
            .await?;

        if let Some(errors) = rejection(&remote, &product) {
            self.compensate(&cart.remote_cart_id, &product, prev_total).await;
            return Err(CartError::StoreRejected {
                store: product.store.clone(),
                product_id: product.product_id.clone(),
                errors,
            });
        }

        let written = gd_db::set_cart_line_quantity(&mut *tx, cart.cart_id, need, quantity)
            .await
            .map(|_| ());
        self.finish(tx, written, &cart, &product, prev_total)
            .await?;

        tracing::info!(donor_id, %need, quantity, "cart item updated");
        self.view_after(donor_id, &cart, &remote).await
    }

    pub async fn remove_item(&self, donor_id: &str, need: NeedRef) -> Result<CartView, CartError> {
        check_donor(donor_id)?;
        let mut tx = self.pool.begin().await?;
        let mut cart = gd_db::lock_open_cart_for_donor(&mut *tx, donor_id)
            .await?
            .ok_or_else(|| no_open_cart(donor_id))?;

        let lines = gd_db::cart_lines(&mut *tx, cart.cart_id).await?;
        let line = lines
            .iter()
            .find(|l| l.need == need)
            .ok_or(CartError::NotInCart { need })?;

        let product = line.product.clone();
        let prev_total = product_total(&lines, &product);
        let remaining = prev_total - line.quantity;
        let remote = self
            .mutate_remote(
                &mut *tx,
                &mut cart,
                &RemoteMutation::Set(CartItemInput::new(product.clone(), remaining)),
            )
            .await?;

        let written = gd_db::delete_cart_line(&mut *tx, cart.cart_id, need)
            .await
            .map(|_| ());
        self.finish(tx, written, &cart, &product, prev_total)
            .await?;

        tracing::info!(donor_id, %need, "cart item removed");
        self.view_after(donor_id, &cart, &remote).await
    }

    /// Clamp lines that no longer fit their need, then push the mirror to the
    /// remote cart.
    pub async fn reconcile_cart(&self, donor_id: &str) -> Result<ReconcileOutcome, CartError> {
        check_donor(donor_id)?;
        let mut tx = self.pool.begin().await?;
        let mut cart = gd_db::lock_open_cart_for_donor(&mut *tx, donor_id)
            .await?
            .ok_or_else(|| no_open_cart(donor_id))?;

        let lines = gd_db::cart_lines(&mut *tx, cart.cart_id).await?;
        let mirror = gd_db::mirror_from_lines(&lines);

        let remote = match self.commerce.get_cart(&cart.remote_cart_id).await {
            Ok(r) => r,
            Err(e) if e.is_cart_expired() => {
                let gone = RemoteCart {
                    cart_id: cart.remote_cart_id.clone(),
                    stores: Vec::new(),
                };
                let before = reconcile_cart(&mirror, &gone);
                let (fresh, clamps) = self.recreate_remote(&mut *tx, &mut cart).await?;
                let target = apply_clamps(&mirror, &clamps);
                let applied = target
                    .product_totals()
                    .into_iter()
                    .map(|(product, quantity)| RepairOp::Add { product, quantity })
                    .collect();
                let after = reconcile_cart(&target, &fresh);
                tx.commit().await.context("reconcile_cart commit failed")?;
                return Ok(ReconcileOutcome {
                    cart_id: cart.cart_id,
                    remote_cart_id: cart.remote_cart_id,
                    before,
                    clamps,
                    applied,
                    after,
                    recreated: true,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let ledgers = gd_db::need_ledgers(&mut *tx, &needs_of(&lines)).await?;
        let before = reconcile_cart(&mirror, &remote);
        let clamps = plan_clamp(&mirror.lines, &ledgers);
        clamp_mirror(&mut *tx, cart.cart_id, &clamps).await?;

        let target = apply_clamps(&mirror, &clamps);
        let plan = plan_repair(&reconcile_cart(&target, &remote));
        let remote_after = if plan.is_empty() {
            remote
        } else {
            self.apply_repair(&cart.remote_cart_id, &plan).await?
        };
        let after = reconcile_cart(&target, &remote_after);

        gd_db::touch_cart(&mut *tx, cart.cart_id).await?;
        tx.commit().await.context("reconcile_cart commit failed")?;

        tracing::info!(
            donor_id,
            before = ?before.action,
            after = ?after.action,
            clamps = clamps.len(),
            repairs = plan.len(),
            "cart reconciled"
        );

        Ok(ReconcileOutcome {
            cart_id: cart.cart_id,
            remote_cart_id: cart.remote_cart_id,
            before,
            clamps,
            applied: plan,
            after,
            recreated: false,
        })
    }

    // -----------------------------------------------------------------------
    // Checkout
    // -----------------------------------------------------------------------

    /// Record the completed stores of a remote submission as orders.
    ///
    /// Idempotent on the remote `request_id`: a store whose request id is
    /// already recorded is reported `AlreadyFinalized` and nothing is written.
    pub async fn finalize_order(
        &self,
        donor_id: &str,
        submit: &SubmitResult,
    ) -> Result<FinalizeReport, CartError> {
        check_donor(donor_id)?;
        let cart = {
            let mut conn = self.pool.acquire().await?;
            gd_db::cart_by_remote_id(&mut *conn, &submit.cart_id).await?
        }
        .ok_or_else(|| no_open_cart(donor_id))?;
        if cart.donor_id != donor_id {
            return Err(CartError::CartMismatch {
                donor_id: donor_id.to_string(),
                remote_cart_id: submit.cart_id.clone(),
            });
        }

        let mut results: Vec<_> = submit.stores.iter().collect();
        results.sort_by(|a, b| a.store.cmp(&b.store));

        let mut stores = Vec::with_capacity(results.len());
        for s in results {
            let outcome = match (s.status, s.request_id.as_deref()) {
                (StoreSubmitStatus::Completed, Some(request_id)) => {
                    self.finalize_store(&cart, &s.store, request_id).await?
                }
                (StoreSubmitStatus::Completed, None) => {
                    tracing::warn!(store = %s.store, "completed store without request id; not recorded");
                    FinalizeOutcome::Failed {
                        errors: vec![RemoteStoreError {
                            code: "MISSING_REQUEST_ID".to_string(),
                            message: "completed store reported no request id".to_string(),
                            product_id: None,
                        }],
                    }
                }
                (StoreSubmitStatus::Pending, _) => FinalizeOutcome::Pending,
                (StoreSubmitStatus::Failed, _) => FinalizeOutcome::Failed {
                    errors: s.errors.clone(),
                },
            };
            stores.push(StoreFinalize {
                store: s.store.clone(),
                outcome,
            });
        }

        let cart_submitted = self.close_if_empty(cart.cart_id).await?;
        Ok(FinalizeReport {
            cart_id: cart.cart_id,
            remote_cart_id: cart.remote_cart_id,
            stores,
            cart_submitted,
        })
    }

    /// Validate, submit the remote cart, then finalize.
    pub async fn checkout(&self, donor_id: &str, payment_token: &str) -> Result<CheckoutOutcome, CartError> {
        if payment_token.trim().is_empty() {
            return Err(CartError::InvalidInput("payment_token is empty".to_string()));
        }
        let validation = self.validate_checkout(donor_id).await?;
        if !validation.ok {
            return Err(CartError::CheckoutBlocked {
                validation: Box::new(validation),
            });
        }

        let cart = {
            let mut conn = self.pool.acquire().await?;
            gd_db::open_cart_for_donor(&mut *conn, donor_id).await?
        }
        .ok_or_else(|| no_open_cart(donor_id))?;

        let submit = self
            .commerce
            .submit_cart(&cart.remote_cart_id, payment_token)
            .await?;
        let finalize = self.finalize_order(donor_id, &submit).await?;
        Ok(CheckoutOutcome { submit, finalize })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn finalize_store(
        &self,
        cart: &CartRow,
        store: &Store,
        request_id: &str,
    ) -> Result<FinalizeOutcome, CartError> {
        let mut tx = self.pool.begin().await?;
        gd_db::lock_cart(&mut *tx, cart.cart_id).await?;
        if let Some(existing) = gd_db::order_by_request_id(&mut *tx, request_id).await? {
            tracing::info!(%store, request_id, order_id = %existing.order_id, "store already finalized");
            return Ok(FinalizeOutcome::AlreadyFinalized {
                order_id: existing.order_id,
                request_id: request_id.to_string(),
            });
        }

        let mut lines: Vec<CartLineRow> = gd_db::cart_lines(&mut *tx, cart.cart_id)
            .await?
            .into_iter()
            .filter(|l| &l.product.store == store)
            .collect();
        lines.sort_by_key(|l| l.need);

        for l in &lines {
            let ledger = match gd_db::lock_need(&mut *tx, l.need).await? {
                Some(row) => gd_db::ledger_for_row(&mut *tx, &row).await?,
                None => NeedLedger::new(0, 0),
            };
            if let Err(o) = ledger.check_quantity(0, l.quantity) {
                tracing::error!(
                    %store,
                    request_id,
                    need = %l.need,
                    requested = o.requested,
                    purchased = o.purchased,
                    wanted = o.wanted,
                    "finalize would oversell; store rolled back"
                );
                return Ok(FinalizeOutcome::Oversold {
                    need: l.need,
                    requested: o.requested,
                    purchased: o.purchased,
                    wanted: o.wanted,
                });
            }
        }

        let order_id = Uuid::new_v4();
        let inserted = gd_db::insert_order(
            &mut *tx,
            &NewOrder {
                order_id,
                cart_id: cart.cart_id,
                donor_id: cart.donor_id.clone(),
                remote_cart_id: cart.remote_cart_id.clone(),
                store_key: store.key().to_string(),
                request_id: request_id.to_string(),
            },
        )
        .await?;
        if !inserted {
            let existing = gd_db::order_by_request_id(&mut *tx, request_id).await?;
            return Ok(FinalizeOutcome::AlreadyFinalized {
                order_id: existing.map(|o| o.order_id).unwrap_or(order_id),
                request_id: request_id.to_string(),
            });
        }

        let mut items = Vec::with_capacity(lines.len());
        for l in &lines {
            gd_db::insert_order_item(&mut *tx, order_id, l.need, l.quantity).await?;
            items.push(OrderLine {
                need: l.need,
                quantity: l.quantity,
            });
        }
        gd_db::delete_cart_lines_for_store(&mut *tx, cart.cart_id, store).await?;
        gd_db::touch_cart(&mut *tx, cart.cart_id).await?;
        tx.commit().await.context("finalize_store commit failed")?;

        if items.is_empty() {
            tracing::warn!(%store, request_id, "completed store had no mirror lines; order recorded without items");
        }
        tracing::info!(%store, request_id, %order_id, items = items.len(), "order finalized");
        Ok(FinalizeOutcome::Finalized {
            order_id,
            request_id: request_id.to_string(),
            items,
        })
    }

    /// Mark the cart SUBMITTED once no mirror lines remain.
    async fn close_if_empty(&self, cart_id: Uuid) -> Result<bool, CartError> {
        let mut tx = self.pool.begin().await?;
        let Some(cart) = gd_db::lock_cart(&mut *tx, cart_id).await? else {
            return Ok(false);
        };
        if cart.status == CartStatus::Submitted {
            return Ok(true);
        }
        let remaining = gd_db::cart_lines(&mut *tx, cart_id).await?;
        if !remaining.is_empty() || cart.status != CartStatus::Open {
            return Ok(false);
        }
        gd_db::mark_cart_status(&mut *tx, cart_id, CartStatus::Submitted).await?;
        tx.commit().await.context("close cart commit failed")?;
        tracing::info!(%cart_id, "cart submitted");
        Ok(true)
    }

    async fn apply_remote(&self, remote_cart_id: &str, m: &RemoteMutation) -> Result<RemoteCart, RyeError> {
        match m {
            RemoteMutation::Add(i) => self.commerce.add_items(remote_cart_id, slice::from_ref(i)).await,
            RemoteMutation::Set(i) if i.quantity <= 0 => {
                self.commerce
                    .remove_items(remote_cart_id, slice::from_ref(&i.product))
                    .await
            }
            RemoteMutation::Set(i) => {
                self.commerce
                    .update_items(remote_cart_id, slice::from_ref(i))
                    .await
            }
        }
    }

    /// Apply a remote mutation, rebuilding the remote cart once if it expired.
    async fn mutate_remote(
        &self,
        conn: &mut PgConnection,
        cart: &mut CartRow,
        m: &RemoteMutation,
    ) -> Result<RemoteCart, CartError> {
        match self.apply_remote(&cart.remote_cart_id, m).await {
            Ok(r) => Ok(r),
            Err(e) if e.is_cart_expired() && self.settings.recreate_expired => {
                self.recreate_remote(conn, cart).await?;
                Ok(self.apply_remote(&cart.remote_cart_id, m).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a new remote cart from the (clamped) mirror and point the local
    /// cart at it.
    async fn recreate_remote(
        &self,
        conn: &mut PgConnection,
        cart: &mut CartRow,
    ) -> Result<(RemoteCart, Vec<Clamp>), CartError> {
        let lines = gd_db::cart_lines(&mut *conn, cart.cart_id).await?;
        let mirror = gd_db::mirror_from_lines(&lines);
        let ledgers = gd_db::need_ledgers(&mut *conn, &needs_of(&lines)).await?;
        let clamps = plan_clamp(&mirror.lines, &ledgers);
        clamp_mirror(&mut *conn, cart.cart_id, &clamps).await?;

        let items: Vec<CartItemInput> = apply_clamps(&mirror, &clamps)
            .product_totals()
            .into_iter()
            .map(|(p, q)| CartItemInput::new(p, q))
            .collect();
        let remote = self.commerce.create_cart(&items).await?;
        gd_db::replace_remote_cart_id(&mut *conn, cart.cart_id, &remote.cart_id).await?;

        tracing::warn!(
            cart_id = %cart.cart_id,
            expired = %cart.remote_cart_id,
            recreated = %remote.cart_id,
            clamps = clamps.len(),
            "remote cart expired; recreated from mirror"
        );
        cart.remote_cart_id = remote.cart_id.clone();
        Ok((remote, clamps))
    }

    async fn apply_repair(&self, remote_cart_id: &str, plan: &[RepairOp]) -> Result<RemoteCart, CartError> {
        let (removes, sets, adds) = split_repair(plan);
        let mut last = None;
        if !removes.is_empty() {
            last = Some(self.commerce.remove_items(remote_cart_id, &removes).await?);
        }
        if !sets.is_empty() {
            last = Some(self.commerce.update_items(remote_cart_id, &sets).await?);
        }
        if !adds.is_empty() {
            last = Some(self.commerce.add_items(remote_cart_id, &adds).await?);
        }
        match last {
            Some(r) => Ok(r),
            None => Ok(self.commerce.get_cart(remote_cart_id).await?),
        }
    }

    /// Best-effort undo of a remote change whose local write did not land.
    /// Failure leaves drift that `reconcile_cart` repairs.
    async fn compensate(&self, remote_cart_id: &str, product: &ProductRef, prev_total: i64) {
        let m = RemoteMutation::Set(CartItemInput::new(product.clone(), prev_total));
        match self.apply_remote(remote_cart_id, &m).await {
            Ok(_) => tracing::info!(
                remote_cart_id,
                store = %product.store,
                product_id = %product.product_id,
                quantity = prev_total,
                "remote cart line compensated"
            ),
            Err(e) => tracing::error!(
                remote_cart_id,
                store = %product.store,
                product_id = %product.product_id,
                error = %e,
                "remote compensation failed; cart drifts until reconciled"
            ),
        }
    }

    /// Commit a local write that follows an accepted remote mutation,
    /// compensating the remote if the write or the commit fails.
    async fn finish(
        &self,
        mut tx: sqlx::Transaction<'_, sqlx::Postgres>,
        written: anyhow::Result<()>,
        cart: &CartRow,
        product: &ProductRef,
        prev_total: i64,
    ) -> Result<(), CartError> {
        let result = match written {
            Ok(()) => match gd_db::touch_cart(&mut *tx, cart.cart_id).await {
                Ok(()) => tx.commit().await.context("cart commit failed"),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.compensate(&cart.remote_cart_id, product, prev_total).await;
            return Err(CartError::Db(e));
        }
        Ok(())
    }

    async fn view_after(
        &self,
        donor_id: &str,
        cart: &CartRow,
        remote: &RemoteCart,
    ) -> Result<CartView, CartError> {
        let mut conn = self.pool.acquire().await?;
        build_view(&mut *conn, donor_id, cart, remote).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_donor(donor_id: &str) -> Result<(), CartError> {
    if donor_id.trim().is_empty() {
        return Err(CartError::InvalidInput("donor_id is empty".to_string()));
    }
    Ok(())
}

fn no_open_cart(donor_id: &str) -> CartError {
    CartError::NoOpenCart {
        donor_id: donor_id.to_string(),
    }
}

fn needs_of(lines: &[CartLineRow]) -> Vec<NeedRef> {
    lines.iter().map(|l| l.need).collect()
}

fn line_quantity(lines: &[CartLineRow], need: NeedRef) -> i64 {
    lines
        .iter()
        .find(|l| l.need == need)
        .map(|l| l.quantity)
        .unwrap_or(0)
}

/// Mirror quantity of `product` across every need that points at it.
fn product_total(lines: &[CartLineRow], product: &ProductRef) -> i64 {
    lines
        .iter()
        .filter(|l| &l.product == product)
        .map(|l| l.quantity)
        .sum()
}

/// Store errors the remote attributes to `product`. Store-wide errors do not
/// reject a single line.
fn rejection(remote: &RemoteCart, product: &ProductRef) -> Option<Vec<RemoteStoreError>> {
    let store = remote.store(&product.store)?;
    let errors: Vec<RemoteStoreError> = store
        .errors
        .iter()
        .filter(|e| e.product_id.as_deref() == Some(product.product_id.as_str()))
        .cloned()
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors)
    }
}

fn validation_from_gate(mirror: &LocalCartMirror, gate: CheckoutGate) -> CheckoutValidation {
    match gate {
        CheckoutGate::Permitted => CheckoutValidation::ok(),
        CheckoutGate::Blocked { report, clamps } => {
            let mut problems = Vec::new();
            if mirror.lines.is_empty() {
                problems.push(CheckoutProblem::EmptyCart);
            }
            problems.extend(report.diffs.into_iter().map(CheckoutProblem::Diff));
            problems.extend(clamps.into_iter().map(CheckoutProblem::Clamp));
            CheckoutValidation::blocked(problems)
        }
    }
}

fn split_repair(plan: &[RepairOp]) -> (Vec<ProductRef>, Vec<CartItemInput>, Vec<CartItemInput>) {
    let mut removes = Vec::new();
    let mut sets = Vec::new();
    let mut adds = Vec::new();
    for op in plan {
        match op {
            RepairOp::Remove { product } => removes.push(product.clone()),
            RepairOp::SetQuantity { product, quantity } => {
                sets.push(CartItemInput::new(product.clone(), *quantity))
            }
            RepairOp::Add { product, quantity } => adds.push(CartItemInput::new(product.clone(), *quantity)),
        }
    }
    (removes, sets, adds)
}

async fn clamp_mirror(conn: &mut PgConnection, cart_id: Uuid, clamps: &[Clamp]) -> anyhow::Result<()> {
    for c in clamps {
        if c.drops_line() {
            gd_db::delete_cart_line(&mut *conn, cart_id, c.need).await?;
        } else {
            gd_db::set_cart_line_quantity(&mut *conn, cart_id, c.need, c.allowed).await?;
        }
        tracing::info!(%cart_id, need = %c.need, from = c.current, to = c.allowed, "cart line clamped");
    }
    Ok(())
}

async fn build_view(
    conn: &mut PgConnection,
    donor_id: &str,
    cart: &CartRow,
    remote: &RemoteCart,
) -> Result<CartView, CartError> {
    let lines = gd_db::cart_lines(&mut *conn, cart.cart_id).await?;
    let known: BTreeSet<&ProductRef> = lines.iter().map(|l| &l.product).collect();

    let mut stores: BTreeMap<Store, StoreView> = BTreeMap::new();
    for l in &lines {
        let meta = gd_db::fetch_need(&mut *conn, l.need).await?;
        let ledger = match &meta {
            Some(row) => gd_db::ledger_for_row(&mut *conn, row).await?,
            None => NeedLedger::new(0, 0),
        };
        stores
            .entry(l.product.store.clone())
            .or_insert_with(|| empty_store(&l.product.store))
            .lines
            .push(CartLineView {
                need: l.need,
                product: l.product.clone(),
                quantity: l.quantity,
                remote_quantity: remote.quantity_of(&l.product),
                item_name: l.item_name.clone(),
                image_url: l.image_url.clone(),
                price_cents: l.price_cents,
                drive_id: meta.as_ref().map(|m| m.drive_id),
                drive_name: meta.as_ref().map(|m| m.drive_name.clone()),
                child_id: meta.as_ref().and_then(|m| m.child_id),
                child_name: meta.as_ref().and_then(|m| m.child_name.clone()),
                requested: ledger.requested,
                purchased: ledger.purchased,
                remaining: ledger.remaining(),
            });
    }

    for rs in &remote.stores {
        let view = stores
            .entry(rs.store.clone())
            .or_insert_with(|| empty_store(&rs.store));
        view.errors = rs.errors.clone();
        view.unknown_lines = rs
            .lines
            .iter()
            .filter(|rl| !known.contains(&ProductRef::new(rs.store.clone(), rl.product_id.clone())))
            .cloned()
            .collect();
    }

    Ok(CartView {
        donor_id: donor_id.to_string(),
        cart_id: Some(cart.cart_id),
        remote_cart_id: Some(cart.remote_cart_id.clone()),
        stores: stores.into_values().collect(),
        recreated: false,
        clamps: Vec::new(),
    })
}

fn empty_store(store: &Store) -> StoreView {
    StoreView {
        store: store.clone(),
        lines: Vec::new(),
        unknown_lines: Vec::new(),
        errors: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gd_reconcile::{CartDiff, MirrorLine};
    use gd_schemas::RemoteStoreCart;

    fn line(need: NeedRef, product: &ProductRef, quantity: i64) -> CartLineRow {
        CartLineRow {
            cart_content_id: Uuid::new_v4(),
            need,
            quantity,
            product: product.clone(),
            item_name: "Puzzle".to_string(),
            image_url: None,
            price_cents: Some(1299),
        }
    }

    #[test]
    fn product_total_sums_needs_sharing_a_product() {
        let p = ProductRef::new(Store::Amazon, "B0PUZ");
        let other = ProductRef::new(Store::Amazon, "B0CAR");
        let lines = vec![
            line(NeedRef::Drive(Uuid::new_v4()), &p, 2),
            line(NeedRef::Child(Uuid::new_v4()), &p, 1),
            line(NeedRef::Drive(Uuid::new_v4()), &other, 4),
        ];
        assert_eq!(product_total(&lines, &p), 3);
        assert_eq!(line_quantity(&lines, lines[1].need), 1);
        assert_eq!(line_quantity(&lines, NeedRef::Drive(Uuid::nil())), 0);
    }

    #[test]
    fn rejection_ignores_store_wide_errors() {
        let p = ProductRef::new(Store::Amazon, "B0PUZ");
        let remote = RemoteCart {
            cart_id: "c".to_string(),
            stores: vec![RemoteStoreCart {
                store: Store::Amazon,
                lines: vec![],
                errors: vec![RemoteStoreError {
                    code: "SHIPPING_UNAVAILABLE".to_string(),
                    message: "no shipping".to_string(),
                    product_id: None,
                }],
            }],
        };
        assert!(rejection(&remote, &p).is_none());

        let mut named = remote.clone();
        named.stores[0].errors.push(RemoteStoreError {
            code: "OUT_OF_STOCK".to_string(),
            message: "gone".to_string(),
            product_id: Some("B0PUZ".to_string()),
        });
        let errs = rejection(&named, &p).unwrap();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].code, "OUT_OF_STOCK");
    }

    #[test]
    fn empty_mirror_validation_reports_empty_cart() {
        let mirror = LocalCartMirror::empty();
        let remote = RemoteCart {
            cart_id: "c".to_string(),
            stores: vec![],
        };
        let gate = check_checkout_gate(&mirror, &remote, &BTreeMap::new());
        let v = validation_from_gate(&mirror, gate);
        assert!(!v.ok);
        assert_eq!(v.problems, vec![CheckoutProblem::EmptyCart]);
    }

    #[test]
    fn validation_lists_diffs_then_clamps() {
        let need = NeedRef::Drive(Uuid::new_v4());
        let p = ProductRef::new(Store::Amazon, "B0PUZ");
        let mirror = LocalCartMirror::new(vec![MirrorLine {
            need,
            product: p.clone(),
            quantity: 3,
        }]);
        let remote = RemoteCart {
            cart_id: "c".to_string(),
            stores: vec![],
        };
        let mut ledgers = BTreeMap::new();
        ledgers.insert(need, NeedLedger::new(5, 4));

        let v = validation_from_gate(&mirror, check_checkout_gate(&mirror, &remote, &ledgers));
        assert!(!v.ok);
        assert_eq!(
            v.problems[0],
            CheckoutProblem::Diff(CartDiff::MissingRemoteLine {
                product: p.clone(),
                local_qty: 3
            })
        );
        assert!(matches!(&v.problems[1], CheckoutProblem::Clamp(c) if c.allowed == 1));
    }

    #[test]
    fn split_repair_groups_by_op() {
        let a = ProductRef::new(Store::Amazon, "A");
        let b = ProductRef::new(Store::shopify("toys.myshopify.com"), "B");
        let plan = vec![
            RepairOp::Remove { product: a.clone() },
            RepairOp::Add {
                product: b.clone(),
                quantity: 2,
            },
            RepairOp::SetQuantity {
                product: a.clone(),
                quantity: 1,
            },
        ];
        let (removes, sets, adds) = split_repair(&plan);
        assert_eq!(removes, vec![a.clone()]);
        assert_eq!(sets, vec![CartItemInput::new(a, 1)]);
        assert_eq!(adds, vec![CartItemInput::new(b, 2)]);
    }
}
