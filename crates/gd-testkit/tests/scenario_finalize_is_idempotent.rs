use gd_cart::FinalizeOutcome;
use gd_rye::CommerceCart;
use gd_schemas::Store;
use gd_testkit::{donor, seed_drive, seed_drive_need, service, test_pool};

#[tokio::test]
async fn finalizing_the_same_submission_twice_records_one_order() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let drive = seed_drive(&pool).await?;
    let n = seed_drive_need(&pool, &drive, &Store::Amazon, 5).await?;
    let (svc, _fake) = service(&pool);

    let d = donor();
    svc.add_item(&d, n.need, 2).await?;
    let out = svc.checkout(&d, "tok_visa").await?;

    let first_order = match out.finalize.outcome_for(&Store::Amazon) {
        Some(FinalizeOutcome::Finalized { order_id, items, .. }) => {
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].quantity, 2);
            *order_id
        }
        other => panic!("expected finalized, got {other:?}"),
    };
    assert!(out.finalize.cart_submitted);

    let again = svc.finalize_order(&d, &out.submit).await?;
    match again.outcome_for(&Store::Amazon) {
        Some(FinalizeOutcome::AlreadyFinalized { order_id, .. }) => assert_eq!(*order_id, first_order),
        other => panic!("expected already finalized, got {other:?}"),
    }
    assert!(again.cart_submitted);

    let orders = gd_db::orders_for_donor(&pool, &d).await?;
    assert_eq!(orders.len(), 1);
    let mut conn = pool.acquire().await?;
    assert_eq!(gd_db::purchased_quantity(&mut conn, n.need).await?, 2);

    // The submitted cart is closed; the donor starts a fresh one.
    let view = svc.get_cart(&d).await?;
    assert!(view.cart_id.is_none());
    Ok(())
}

#[tokio::test]
async fn finalize_refuses_a_cart_that_belongs_to_someone_else() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let drive = seed_drive(&pool).await?;
    let n = seed_drive_need(&pool, &drive, &Store::Amazon, 5).await?;
    let (svc, fake) = service(&pool);

    let owner = donor();
    let view = svc.add_item(&owner, n.need, 1).await?;
    let remote_id = view.remote_cart_id.clone().unwrap();

    let submit = fake.submit_cart(&remote_id, "tok_visa").await?;
    let err = svc.finalize_order(&donor(), &submit).await.unwrap_err();
    assert_eq!(err.code(), "CART_MISMATCH");

    let mut conn = pool.acquire().await?;
    assert_eq!(gd_db::purchased_quantity(&mut conn, n.need).await?, 0);
    Ok(())
}
