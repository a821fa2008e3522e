mod common;

use std::sync::atomic::Ordering;

use nexus_hook_dispatcher::components::{REVIEW_REQUEST, SIGNATURE_VALIDATOR, SIGNED_OFF_CHECKER};
use nexus_hook_dispatcher::{ComponentError, Db, Error, Hook, Outcome, Params};

use common::*;

#[tokio::test]
async fn components_run_in_attachment_order() {
    let h = harness(Db::in_memory()).await;
    // Attach in the reverse of registry order.
    h.hooks.create(&Hook::with_id("wh_chain", "chain")).await.unwrap();
    h.hooks
        .attach_component("wh_chain", RECORDING, &Params::new())
        .await
        .unwrap();
    h.hooks
        .attach_component("wh_chain", REVIEW_REQUEST, &token_params("t"))
        .await
        .unwrap();

    let report = h
        .dispatcher
        .dispatch("wh_chain", &pr_delivery("d-1"))
        .await
        .unwrap();
    let order: Vec<_> = report.results.iter().map(|r| r.component.as_str()).collect();
    assert_eq!(order, [RECORDING, REVIEW_REQUEST]);
    assert_eq!(h.log(), [RECORDING]);
}

#[tokio::test]
async fn repeated_delivery_is_a_duplicate_without_side_effects() {
    let h = harness(Db::in_memory()).await;
    h.api.set_commits(vec![commit("c1", "Fix\n\nR=alice")]);
    h.hook("wh_dup", &[REVIEW_REQUEST]).await;

    let first = h.dispatcher.dispatch("wh_dup", &pr_delivery("d-1")).await.unwrap();
    assert!(!first.is_duplicate());
    assert_eq!(first.results[0].outcome, Outcome::Processed);

    let second = h.dispatcher.dispatch("wh_dup", &pr_delivery("d-1")).await.unwrap();
    assert!(second.is_duplicate());
    assert_eq!(h.api.count(|c| matches!(c, Call::RequestReviewers(_))), 1);
    assert_eq!(h.api.count(|c| matches!(c, Call::ListCommits(_))), 1);

    // A different identifier is processed again.
    h.dispatcher.dispatch("wh_dup", &pr_delivery("d-2")).await.unwrap();
    assert_eq!(h.api.count(|c| matches!(c, Call::RequestReviewers(_))), 2);
}

#[tokio::test]
async fn failure_aborts_writes_of_every_component() {
    let db = Db::in_memory();
    let h = harness(db.clone()).await;
    h.api.set_commits(vec![commit("c1", "Fix\n\nR=alice")]);
    h.hook("wh_abort", &[REVIEW_REQUEST, RECORDING, FAILING]).await;

    let err = h
        .dispatcher
        .dispatch("wh_abort", &pr_delivery("d-1"))
        .await
        .unwrap_err();
    match err {
        Error::Component { component, source } => {
            assert_eq!(component, FAILING);
            assert!(matches!(source, ComponentError::Rejected(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The remote call went out but no local state survived.
    assert_eq!(h.api.count(|c| matches!(c, Call::RequestReviewers(_))), 1);
    assert_eq!(
        binding_value(&db, "wh_abort", REVIEW_REQUEST, &["deliveries", "d-1"]),
        None
    );
    assert_eq!(binding_value(&db, "wh_abort", RECORDING, &["seen-d-1"]), None);
    assert_eq!(binding_value(&db, "wh_abort", FAILING, &["attempted"]), None);

    // The retry is not treated as a duplicate and repeats the remote call.
    let _ = h.dispatcher.dispatch("wh_abort", &pr_delivery("d-1")).await;
    assert_eq!(h.api.count(|c| matches!(c, Call::RequestReviewers(_))), 2);
}

#[tokio::test]
async fn successful_delivery_commits_every_component() {
    let db = Db::in_memory();
    let h = harness(db.clone()).await;
    h.hook("wh_ok", &[RECORDING, REVIEW_REQUEST]).await;

    h.dispatcher.dispatch("wh_ok", &pr_delivery("d-9")).await.unwrap();
    assert!(binding_value(&db, "wh_ok", RECORDING, &["seen-d-9"]).is_some());
    assert!(binding_value(&db, "wh_ok", REVIEW_REQUEST, &["deliveries", "d-9"]).is_some());
}

#[tokio::test]
async fn unknown_hook_is_rejected_before_any_component_runs() {
    let h = harness(Db::in_memory()).await;
    let err = h
        .dispatcher
        .dispatch("wh_missing", &pr_delivery("d-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HookNotFound(id) if id == "wh_missing"));
    assert!(h.log().is_empty());
}

#[tokio::test]
async fn hook_without_components_commits_an_empty_report() {
    let h = harness(Db::in_memory()).await;
    h.hook("wh_empty", &[]).await;
    let report = h.dispatcher.dispatch("wh_empty", &pr_delivery("d-1")).await.unwrap();
    assert!(report.results.is_empty());
    assert!(!report.is_duplicate());
}

#[tokio::test]
async fn missing_delivery_id_fails_deduplicating_components() {
    let h = harness(Db::in_memory()).await;
    h.hook("wh_noid", &[REVIEW_REQUEST]).await;
    let err = h
        .dispatcher
        .dispatch("wh_noid", &delivery(None, pull_request_body("acme", "widgets", 1)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Component {
            source: ComponentError::MissingDeliveryId,
            ..
        }
    ));
    assert!(h.api.calls().is_empty());
}

#[tokio::test]
async fn init_without_token_leaves_nothing_behind() {
    let db = Db::in_memory();
    let h = harness(db.clone()).await;
    h.hooks.create(&Hook::with_id("wh_init", "init")).await.unwrap();

    let err = h
        .hooks
        .attach_component("wh_init", SIGNED_OFF_CHECKER, &Params::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Component {
            source: ComponentError::MissingOption("token"),
            ..
        }
    ));
    assert!(h.hooks.list_components("wh_init").unwrap().is_empty());
    let tx = db.read();
    assert!(tx
        .bucket("components")
        .and_then(|b| b.bucket("wh_init"))
        .is_none());
}

#[tokio::test]
async fn attaching_twice_or_unknown_types_fails() {
    let h = harness(Db::in_memory()).await;
    h.hook("wh_twice", &[REVIEW_REQUEST]).await;
    assert!(matches!(
        h.hooks
            .attach_component("wh_twice", REVIEW_REQUEST, &token_params("t"))
            .await,
        Err(Error::ComponentAlreadyAttached { .. })
    ));
    assert!(matches!(
        h.hooks
            .attach_component("wh_twice", "no-such-component", &Params::new())
            .await,
        Err(Error::UnknownComponent(_))
    ));
    assert!(matches!(
        h.hooks.create(&Hook::with_id("wh_twice", "again")).await,
        Err(Error::HookExists(_))
    ));
}

#[tokio::test]
async fn params_round_trip_through_the_namespace() {
    let h = harness(Db::in_memory()).await;
    h.hook("wh_params", &[SIGNED_OFF_CHECKER]).await;
    assert_eq!(
        h.hooks.component_params("wh_params", SIGNED_OFF_CHECKER).unwrap(),
        token_params("secret-token")
    );

    h.hooks
        .update_component("wh_params", SIGNED_OFF_CHECKER, &token_params("rotated"))
        .await
        .unwrap();
    assert_eq!(
        h.hooks.component_params("wh_params", SIGNED_OFF_CHECKER).unwrap(),
        token_params("rotated")
    );
    assert!(matches!(
        h.hooks.component_params("wh_params", REVIEW_REQUEST),
        Err(Error::ComponentNotAttached { .. })
    ));
}

#[tokio::test]
async fn bindings_of_different_hooks_do_not_share_dedup_state() {
    let h = harness(Db::in_memory()).await;
    h.hook("wh_a", &[REVIEW_REQUEST]).await;
    h.hook("wh_b", &[REVIEW_REQUEST]).await;

    let a = h.dispatcher.dispatch("wh_a", &pr_delivery("shared")).await.unwrap();
    let b = h.dispatcher.dispatch("wh_b", &pr_delivery("shared")).await.unwrap();
    assert!(!a.is_duplicate());
    assert!(!b.is_duplicate());
}

#[tokio::test]
async fn signature_validator_rejects_forged_deliveries() {
    let h = harness(Db::in_memory()).await;
    h.hook("wh_sig", &[]).await;
    let params = Params::from([
        ("method".to_string(), "custom-header".to_string()),
        ("secret".to_string(), "X-Token:let-me-in".to_string()),
    ]);
    h.hooks
        .attach_component("wh_sig", SIGNATURE_VALIDATOR, &params)
        .await
        .unwrap();
    h.hooks
        .attach_component("wh_sig", RECORDING, &Params::new())
        .await
        .unwrap();

    let forged = pr_delivery("d-1");
    let err = h.dispatcher.dispatch("wh_sig", &forged).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Component {
            source: ComponentError::Rejected(_),
            ..
        }
    ));
    assert!(h.log().is_empty());

    let mut genuine = pr_delivery("d-1");
    genuine
        .headers
        .insert("x-token", "let-me-in".parse().unwrap());
    h.dispatcher.dispatch("wh_sig", &genuine).await.unwrap();
    assert_eq!(h.log(), [RECORDING]);
}

#[tokio::test]
async fn signature_validator_rejects_unknown_methods() {
    let h = harness(Db::in_memory()).await;
    h.hook("wh_badsig", &[]).await;
    let params = Params::from([
        ("method".to_string(), "md5".to_string()),
        ("secret".to_string(), "s".to_string()),
    ]);
    let err = h
        .hooks
        .attach_component("wh_badsig", SIGNATURE_VALIDATOR, &params)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Component {
            source: ComponentError::InvalidOption { option: "method", .. },
            ..
        }
    ));
}

#[tokio::test]
async fn stats_count_commits_and_aborts() {
    let h = harness(Db::in_memory()).await;
    h.hook("wh_stats", &[REVIEW_REQUEST]).await;
    h.dispatcher.dispatch("wh_stats", &pr_delivery("d-1")).await.unwrap();
    h.dispatcher.dispatch("wh_stats", &pr_delivery("d-1")).await.unwrap();
    h.api.fail_reviewers.store(true, Ordering::SeqCst);
    h.api.set_commits(vec![commit("c1", "R=bob")]);
    let _ = h.dispatcher.dispatch("wh_stats", &pr_delivery("d-2")).await;

    let stats = h.hooks.stats("wh_stats").unwrap();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.committed, 2);
    assert_eq!(stats.aborted, 1);
    assert!(stats.last_delivery.is_some());
}

#[tokio::test]
async fn state_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hooks.db");

    {
        let h = harness(Db::open(&path).unwrap()).await;
        h.hook("wh_disk", &[REVIEW_REQUEST]).await;
        h.dispatcher.dispatch("wh_disk", &pr_delivery("d-1")).await.unwrap();
    }

    let h = harness(Db::open(&path).unwrap()).await;
    assert_eq!(h.hooks.list_components("wh_disk").unwrap(), [REVIEW_REQUEST]);
    let report = h.dispatcher.dispatch("wh_disk", &pr_delivery("d-1")).await.unwrap();
    assert!(report.is_duplicate());
    assert!(h.api.calls().is_empty());
}

#[tokio::test]
async fn chain_is_read_after_acquiring_the_writer() {
    let db = Db::in_memory();
    let h = harness(db.clone()).await;
    h.hook("wh_late", &[]).await;

    // Hold the writer so the delivery queues behind this transaction.
    let mut tx = db.begin_write().await;
    let dispatcher = h.dispatcher.clone();
    let pending =
        tokio::spawn(async move { dispatcher.dispatch("wh_late", &pr_delivery("d-1")).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!pending.is_finished());

    let mut hook: Hook =
        serde_json::from_slice(tx.bucket("hooks").unwrap().get("wh_late").unwrap()).unwrap();
    hook.components.push(RECORDING.to_string());
    tx.bucket_mut("hooks")
        .unwrap()
        .put("wh_late", serde_json::to_vec(&hook).unwrap())
        .unwrap();
    tx.bucket_mut("components")
        .unwrap()
        .into_created_bucket("wh_late")
        .unwrap()
        .into_created_bucket(RECORDING)
        .unwrap();
    tx.commit().await.unwrap();

    let report = pending.await.unwrap().unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].component, RECORDING);
    assert_eq!(h.log(), [RECORDING]);
}

#[tokio::test]
async fn expired_dedup_records_are_pruned_on_delivery() {
    let db = Db::in_memory();
    let h = harness(db.clone()).await;
    h.hook("wh_prune", &[REVIEW_REQUEST]).await;

    let now = chrono::Utc::now();
    {
        let mut tx = db.begin_write().await;
        let mut log = tx
            .bucket_mut("components")
            .unwrap()
            .into_bucket_mut("wh_prune")
            .unwrap()
            .into_bucket_mut(REVIEW_REQUEST)
            .unwrap()
            .into_bucket_mut("deliveries")
            .unwrap();
        log.put("old", (now - chrono::Duration::days(45)).to_rfc3339())
            .unwrap();
        log.put("kept", (now - chrono::Duration::days(5)).to_rfc3339())
            .unwrap();
        drop(log);
        tx.commit().await.unwrap();
    }

    h.dispatcher
        .dispatch("wh_prune", &pr_delivery("d-new"))
        .await
        .unwrap();

    let deliveries = |id: &str| binding_value(&db, "wh_prune", REVIEW_REQUEST, &["deliveries", id]);
    assert_eq!(deliveries("old"), None);
    assert!(deliveries("kept").is_some());
    assert!(deliveries("d-new").is_some());

    // A still-retained id remains a duplicate.
    let report = h
        .dispatcher
        .dispatch("wh_prune", &pr_delivery("kept"))
        .await
        .unwrap();
    assert!(report.is_duplicate());
}

#[tokio::test]
async fn retention_window_is_configurable() {
    let db = Db::in_memory();
    let h = harness(db.clone()).await;
    h.hook("wh_short", &[REVIEW_REQUEST]).await;
    let dispatcher = nexus_hook_dispatcher::Dispatcher::new(h.hooks.clone())
        .with_dedup_retention(chrono::Duration::days(1));

    {
        let mut tx = db.begin_write().await;
        tx.bucket_mut("components")
            .unwrap()
            .into_bucket_mut("wh_short")
            .unwrap()
            .into_bucket_mut(REVIEW_REQUEST)
            .unwrap()
            .into_bucket_mut("deliveries")
            .unwrap()
            .put("two-days", (chrono::Utc::now() - chrono::Duration::days(2)).to_rfc3339())
            .unwrap();
        tx.commit().await.unwrap();
    }

    dispatcher
        .dispatch("wh_short", &pr_delivery("d-1"))
        .await
        .unwrap();
    assert_eq!(
        binding_value(&db, "wh_short", REVIEW_REQUEST, &["deliveries", "two-days"]),
        None
    );
}
