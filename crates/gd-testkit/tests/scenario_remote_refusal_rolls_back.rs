use gd_cart::CartError;
use gd_rye::RyeError;
use gd_schemas::Store;
use gd_testkit::{donor, seed_drive, seed_drive_need, service, test_pool};

#[tokio::test]
async fn transport_failure_leaves_no_local_cart() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let drive = seed_drive(&pool).await?;
    let n = seed_drive_need(&pool, &drive, &Store::Amazon, 3).await?;
    let (svc, fake) = service(&pool);

    let d = donor();
    fake.fail_next(RyeError::Transport("connection reset".to_string()));
    let err = svc.add_item(&d, n.need, 1).await.unwrap_err();
    assert_eq!(err.code(), "REMOTE_TRANSPORT");
    assert!(svc.get_cart(&d).await?.cart_id.is_none());

    let view = svc.add_item(&d, n.need, 1).await?;
    let remote = view.remote_cart_id.clone().unwrap();

    fake.fail_next(RyeError::Transport("connection reset".to_string()));
    assert!(svc.add_item(&d, n.need, 1).await.is_err());

    let view = svc.get_cart(&d).await?;
    assert_eq!(view.line(&n.need).map(|l| l.quantity), Some(1));
    assert_eq!(fake.remote_quantity(&remote, &n.product), 1);
    Ok(())
}

#[tokio::test]
async fn store_error_naming_the_product_is_rolled_back_and_compensated() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let drive = seed_drive(&pool).await?;
    let ok = seed_drive_need(&pool, &drive, &Store::Amazon, 3).await?;
    let bad = seed_drive_need(&pool, &drive, &Store::Amazon, 3).await?;
    let (svc, fake) = service(&pool);

    let d = donor();
    let view = svc.add_item(&d, ok.need, 1).await?;
    let remote = view.remote_cart_id.clone().unwrap();

    fake.reject_product(&bad.product, "OUT_OF_STOCK");
    let err = svc.add_item(&d, bad.need, 2).await.unwrap_err();
    match &err {
        CartError::StoreRejected {
            store,
            product_id,
            errors,
        } => {
            assert_eq!(*store, Store::Amazon);
            assert_eq!(product_id, &bad.product.product_id);
            assert_eq!(errors[0].code, "OUT_OF_STOCK");
        }
        other => panic!("expected store rejection, got {other}"),
    }

    assert_eq!(fake.remote_quantity(&remote, &bad.product), 0);
    assert_eq!(fake.remote_quantity(&remote, &ok.product), 1);
    let view = svc.get_cart(&d).await?;
    assert!(view.line(&bad.need).is_none());
    assert_eq!(view.line_count(), 1);
    Ok(())
}

#[tokio::test]
async fn remote_submit_refusal_records_nothing() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let drive = seed_drive(&pool).await?;
    let n = seed_drive_need(&pool, &drive, &Store::Amazon, 3).await?;
    let (svc, fake) = service(&pool);

    let d = donor();
    svc.add_item(&d, n.need, 1).await?;
    fake.fail_op("submit_cart", RyeError::Transport("gateway timeout".to_string()));
    let err = svc.checkout(&d, "tok_visa").await.unwrap_err();
    assert_eq!(err.code(), "REMOTE_TRANSPORT");
    assert!(gd_db::orders_for_donor(&pool, &d).await?.is_empty());
    assert_eq!(svc.get_cart(&d).await?.line_count(), 1);
    Ok(())
}
