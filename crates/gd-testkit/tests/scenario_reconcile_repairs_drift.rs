use gd_cart::CheckoutProblem;
use gd_reconcile::{CartDiff, ReconcileAction};
use gd_schemas::{ProductRef, Store};
use gd_testkit::{donor, seed_drive, seed_drive_need, service, test_pool};

#[tokio::test]
async fn reconcile_pushes_the_mirror_back_to_the_remote() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let drive = seed_drive(&pool).await?;
    let n = seed_drive_need(&pool, &drive, &Store::Amazon, 5).await?;
    let (svc, fake) = service(&pool);

    let d = donor();
    let view = svc.add_item(&d, n.need, 2).await?;
    let remote = view.remote_cart_id.clone().unwrap();
    assert!(svc.validate_checkout(&d).await?.ok);

    let stray = ProductRef::new(Store::Amazon, "B0STRAY");
    fake.set_remote_quantity(&remote, &n.product, 5);
    fake.set_remote_quantity(&remote, &stray, 1);

    let v = svc.validate_checkout(&d).await?;
    assert!(!v.ok);
    assert!(v.problems.contains(&CheckoutProblem::Diff(CartDiff::QuantityMismatch {
        product: n.product.clone(),
        local_qty: 2,
        remote_qty: 5,
    })));
    assert!(v.problems.contains(&CheckoutProblem::Diff(CartDiff::UnknownRemoteLine {
        product: stray.clone(),
        remote_qty: 1,
    })));

    let view = svc.get_cart(&d).await?;
    assert_eq!(view.stores[0].unknown_lines.len(), 1);

    let rec = svc.reconcile_cart(&d).await?;
    assert_eq!(rec.before.action, ReconcileAction::Repair);
    assert_eq!(rec.applied.len(), 2);
    assert!(rec.after.is_clean());
    assert_eq!(fake.remote_quantity(&remote, &n.product), 2);
    assert_eq!(fake.remote_quantity(&remote, &stray), 0);

    assert!(svc.validate_checkout(&d).await?.ok);
    Ok(())
}

#[tokio::test]
async fn store_errors_block_checkout_and_are_not_auto_repaired() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let drive = seed_drive(&pool).await?;
    let n = seed_drive_need(&pool, &drive, &Store::Amazon, 5).await?;
    let (svc, fake) = service(&pool);

    let d = donor();
    svc.add_item(&d, n.need, 1).await?;
    fake.store_error(&Store::Amazon, "SHIPPING_UNAVAILABLE");

    let v = svc.validate_checkout(&d).await?;
    assert!(!v.ok);
    assert!(v
        .problems
        .iter()
        .any(|p| matches!(p, CheckoutProblem::Diff(CartDiff::StoreError { code, .. }) if code == "SHIPPING_UNAVAILABLE")));

    let rec = svc.reconcile_cart(&d).await?;
    assert!(rec.applied.is_empty());
    assert_eq!(rec.after.action, ReconcileAction::Blocked);
    assert_eq!(svc.checkout(&d, "tok_visa").await.unwrap_err().code(), "CHECKOUT_BLOCKED");
    Ok(())
}
