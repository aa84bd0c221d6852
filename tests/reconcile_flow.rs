mod support;

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use serde_json::json;

use pay_reconcile::db::RecordStore;
use pay_reconcile::error::EngineError;
use pay_reconcile::models::OrderStatus;
use pay_reconcile::reconcile::{CallbackInput, CallbackMethod, CallbackReply, Provider};

use support::{harness, order};

fn webpay_return(order_id: &str, token: Option<&str>) -> CallbackInput {
    let body = match token {
        Some(t) => json!({ "token_ws": t }),
        None => json!({}),
    };
    CallbackInput {
        method: CallbackMethod::Post,
        query: HashMap::from([("orderId".to_string(), order_id.to_string())]),
        body,
    }
}

fn khipu_notification(token: &str) -> CallbackInput {
    CallbackInput {
        method: CallbackMethod::Post,
        query: HashMap::new(),
        body: json!({ "notification_token": token, "api_version": "2.0" }),
    }
}

fn redirect_of(reply: CallbackReply) -> String {
    match reply {
        CallbackReply::Redirect { location } => location,
        other => panic!("expected redirect, got {other:?}"),
    }
}

#[tokio::test]
async fn webpay_happy_path_marks_order_paid() {
    let h = harness();
    h.store.insert_order(&order("O1", OrderStatus::Pending, 4990)).await.unwrap();

    let redirect = h.engine.init(Provider::Webpay, "O1", Some("u-1")).await.unwrap();
    assert_eq!(redirect, "https://webpay.example/init?token_ws=tok-O1");

    h.webpay.approve("tok-O1", "O1", 4990);
    let reply = h
        .engine
        .callback(Provider::Webpay, &webpay_return("O1", Some("tok-O1")))
        .await
        .unwrap();
    assert_eq!(redirect_of(reply), "https://shop.example.test/pago/exito?orderId=O1");

    let stored = h.store.get_order("O1").await.unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
    assert_eq!(stored.provider.as_deref(), Some("webpay"));

    let payments = h.store.payments_by_order("O1", false).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, "PAID");
    assert_eq!(payments[0].provider, "webpay");
    assert_eq!(payments[0].amount, Some(4990));
    assert_eq!(payments[0].authorization_code.as_deref(), Some("1213"));
    assert_eq!(payments[0].response_code, Some(0));
    assert_eq!(payments[0].card_last4.as_deref(), Some("6623"));
}

#[tokio::test]
async fn repeated_webpay_return_keeps_one_payment_row() {
    let h = harness();
    h.store.insert_order(&order("O1", OrderStatus::Pending, 4990)).await.unwrap();
    h.webpay.approve("tok-O1", "O1", 4990);

    for _ in 0..2 {
        let reply = h
            .engine
            .commit_webpay(&webpay_return("O1", Some("tok-O1")))
            .await;
        assert_eq!(redirect_of(reply), "https://shop.example.test/pago/exito?orderId=O1");
    }

    assert_eq!(h.store.payments_by_order("O1", false).await.unwrap().len(), 1);
    assert_eq!(h.store.order_writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn webpay_decline_fails_order_and_redirects_to_error() {
    let h = harness();
    h.store.insert_order(&order("O2", OrderStatus::Pending, 4990)).await.unwrap();
    h.webpay.decline("tok-O2", "O2", 4990);

    let reply = h.engine.commit_webpay(&webpay_return("O2", Some("tok-O2"))).await;
    assert_eq!(redirect_of(reply), "https://shop.example.test/pago/error?orderId=O2");

    assert_eq!(h.store.get_order("O2").await.unwrap().status, OrderStatus::Failed);
    let payments = h.store.payments_by_order("O2", false).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, "FAILED");
    assert_eq!(payments[0].response_code, Some(-1));
}

#[tokio::test]
async fn webpay_commit_for_another_order_is_not_applied() {
    let h = harness();
    h.store.insert_order(&order("CHEAP", OrderStatus::Pending, 4990)).await.unwrap();
    h.store.insert_order(&order("PRICEY", OrderStatus::Pending, 499000)).await.unwrap();
    h.webpay.approve("tok-CHEAP", "CHEAP", 4990);

    let reply = h
        .engine
        .commit_webpay(&webpay_return("PRICEY", Some("tok-CHEAP")))
        .await;
    assert_eq!(redirect_of(reply), "https://shop.example.test/pago/error?orderId=PRICEY");

    assert_eq!(h.store.get_order("PRICEY").await.unwrap().status, OrderStatus::Pending);
    assert!(h.store.payments_by_order("PRICEY", false).await.unwrap().is_empty());
    assert_eq!(h.store.order_writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn webpay_commit_with_wrong_amount_is_not_applied() {
    let h = harness();
    h.store.insert_order(&order("O6", OrderStatus::Pending, 499000)).await.unwrap();
    h.webpay.approve("tok-O6", "O6", 4990);

    let reply = h.engine.commit_webpay(&webpay_return("O6", Some("tok-O6"))).await;
    assert_eq!(redirect_of(reply), "https://shop.example.test/pago/error?orderId=O6");
    assert_eq!(h.store.get_order("O6").await.unwrap().status, OrderStatus::Pending);
    assert!(h.store.payments_by_order("O6", false).await.unwrap().is_empty());
}

#[tokio::test]
async fn webpay_commit_for_unknown_order_writes_nothing() {
    let h = harness();
    h.webpay.approve("tok-ghost", "ghost", 4990);

    let reply = h.engine.commit_webpay(&webpay_return("ghost", Some("tok-ghost"))).await;
    assert_eq!(redirect_of(reply), "https://shop.example.test/pago/error?orderId=ghost");
    assert_eq!(h.webpay.commit_calls.load(Ordering::SeqCst), 0);
    assert!(h.store.payments_by_order("ghost", false).await.unwrap().is_empty());
}

#[tokio::test]
async fn webpay_return_without_token_skips_provider() {
    let h = harness();
    h.store.insert_order(&order("O3", OrderStatus::Pending, 4990)).await.unwrap();

    let reply = h.engine.commit_webpay(&webpay_return("O3", None)).await;
    assert_eq!(redirect_of(reply), "https://shop.example.test/pago/error?orderId=O3");
    assert_eq!(h.webpay.commit_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.get_order("O3").await.unwrap().status, OrderStatus::Pending);
}

#[tokio::test]
async fn webpay_get_return_reads_token_from_query() {
    let h = harness();
    h.store.insert_order(&order("O4", OrderStatus::Pending, 4990)).await.unwrap();
    h.webpay.approve("tok-O4", "O4", 4990);

    let input = CallbackInput {
        method: CallbackMethod::Get,
        query: HashMap::from([
            ("orderId".to_string(), "O4".to_string()),
            ("token_ws".to_string(), "tok-O4".to_string()),
        ]),
        body: json!({}),
    };
    let reply = h.engine.commit_webpay(&input).await;
    assert_eq!(redirect_of(reply), "https://shop.example.test/pago/exito?orderId=O4");
}

#[tokio::test]
async fn webpay_provider_failure_redirects_to_error() {
    let h = harness();
    h.store.insert_order(&order("O5", OrderStatus::Pending, 4990)).await.unwrap();
    h.webpay.fail("tok-O5");

    let reply = h.engine.commit_webpay(&webpay_return("O5", Some("tok-O5"))).await;
    assert_eq!(redirect_of(reply), "https://shop.example.test/pago/error?orderId=O5");
    assert_eq!(h.store.get_order("O5").await.unwrap().status, OrderStatus::Pending);
    assert!(h.store.payments_by_order("O5", false).await.unwrap().is_empty());
}

#[tokio::test]
async fn init_refuses_orders_that_are_not_pending() {
    let h = harness();
    h.store.insert_order(&order("P1", OrderStatus::Paid, 4990)).await.unwrap();

    for provider in Provider::ALL {
        let err = h.engine.init(provider, "P1", None).await.unwrap_err();
        assert!(
            matches!(err, EngineError::InvalidStatus { current: OrderStatus::Paid }),
            "{provider:?}: {err:?}"
        );
    }
    assert_eq!(h.webpay.initiate_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.khipu.create_calls(), 0);
}

#[tokio::test]
async fn init_reports_unknown_order() {
    let h = harness();
    let err = h.engine.init(Provider::Khipu, "missing", None).await.unwrap_err();
    assert!(matches!(err, EngineError::OrderNotFound));
}

#[tokio::test]
async fn khipu_init_records_initiated_payment_before_any_notification() {
    let h = harness();
    h.store.insert_order(&order("K1", OrderStatus::Pending, 4990)).await.unwrap();

    let url = h.engine.init(Provider::Khipu, "K1", None).await.unwrap();
    assert_eq!(url, "https://khipu.example/pay/kp-K1");

    let payment = h.store.get_payment("kp-K1").await.unwrap();
    assert_eq!(payment.status, "INITIATED");
    assert_eq!(payment.order_id, "K1");
    assert_eq!(payment.amount, Some(4990));

    let created = h.khipu.created.lock().unwrap();
    assert_eq!(created[0].subject, "Orden K1");
    assert_eq!(created[0].notify_url, "https://api.example.test/api/pay-khipu/notify");
    assert_eq!(created[0].return_url, "https://shop.example.test/checkout/success?orderId=K1");
    assert_eq!(created[0].cancel_url, "https://shop.example.test/checkout/cancel?orderId=K1");
}

#[tokio::test]
async fn khipu_payer_email_falls_back_in_order() {
    let h = harness();
    let mut with_user_email = order("K2", OrderStatus::Pending, 4990);
    with_user_email.email = Some("  ".to_string());
    with_user_email.user_email = Some("buyer@example.org".to_string());
    h.store.insert_order(&with_user_email).await.unwrap();
    h.store.insert_order(&order("K3", OrderStatus::Pending, 4990)).await.unwrap();

    h.engine.init_khipu("K2").await.unwrap();
    h.engine.init_khipu("K3").await.unwrap();

    let created = h.khipu.created.lock().unwrap();
    assert_eq!(created[0].payer_email, "buyer@example.org");
    assert_eq!(created[1].payer_email, "cliente@example.com");
}

#[tokio::test]
async fn khipu_done_notification_pays_order() {
    let h = harness();
    h.store.insert_order(&order("K4", OrderStatus::Pending, 4990)).await.unwrap();
    h.engine.init_khipu("K4").await.unwrap();
    h.khipu.resolve("nt-4", "kp-K4", "K4", "done");

    let ack = h.engine.notify_khipu(&khipu_notification("nt-4")).await.unwrap();
    assert_eq!(ack, json!({"ok": true}));

    let stored = h.store.get_order("K4").await.unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
    assert_eq!(stored.provider.as_deref(), Some("khipu"));
    let payment = h.store.get_payment("kp-K4").await.unwrap();
    assert_eq!(payment.status, "CONFIRMED");
    assert_eq!(payment.raw["status"], "done");
}

#[tokio::test]
async fn khipu_rejection_fails_order() {
    let h = harness();
    h.store.insert_order(&order("K5", OrderStatus::Pending, 4990)).await.unwrap();
    h.engine.init_khipu("K5").await.unwrap();
    h.khipu.resolve("nt-5", "kp-K5", "K5", "rejected");

    h.engine.notify_khipu(&khipu_notification("nt-5")).await.unwrap();

    assert_eq!(h.store.get_order("K5").await.unwrap().status, OrderStatus::Failed);
    assert_eq!(h.store.get_payment("kp-K5").await.unwrap().status, "REJECTED");
}

#[tokio::test]
async fn stale_notification_never_downgrades_paid_order() {
    let h = harness();
    h.store.insert_order(&order("K6", OrderStatus::Pending, 4990)).await.unwrap();
    h.engine.init_khipu("K6").await.unwrap();

    h.khipu.resolve("nt-done", "kp-K6", "K6", "done");
    h.engine.notify_khipu(&khipu_notification("nt-done")).await.unwrap();
    let paid = h.store.get_order("K6").await.unwrap();

    h.khipu.resolve("nt-late", "kp-K6", "K6", "canceled");
    let ack = h.engine.notify_khipu(&khipu_notification("nt-late")).await.unwrap();
    assert_eq!(ack, json!({"ok": true}));

    let after = h.store.get_order("K6").await.unwrap();
    assert_eq!(after.status, OrderStatus::Paid);
    assert_eq!(after.updated_at, paid.updated_at);
    assert_eq!(h.store.order_writes.load(Ordering::SeqCst), 1);

    // Payment history still follows the provider.
    let payment = h.store.get_payment("kp-K6").await.unwrap();
    assert_eq!(payment.status, "CANCELED");
    assert_eq!(payment.raw["status"], "canceled");
}

#[tokio::test]
async fn pending_notification_leaves_order_pending() {
    let h = harness();
    h.store.insert_order(&order("K7", OrderStatus::Pending, 4990)).await.unwrap();
    h.engine.init_khipu("K7").await.unwrap();
    h.khipu.resolve("nt-7", "kp-K7", "K7", "pending");

    h.engine.notify_khipu(&khipu_notification("nt-7")).await.unwrap();

    assert_eq!(h.store.get_order("K7").await.unwrap().status, OrderStatus::Pending);
    assert_eq!(h.store.get_payment("kp-K7").await.unwrap().status, "PENDING");
    assert_eq!(h.store.order_writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_duplicate_notifications_write_once() {
    let h = harness();
    h.store.insert_order(&order("K8", OrderStatus::Pending, 4990)).await.unwrap();
    h.engine.init_khipu("K8").await.unwrap();
    h.khipu.resolve("nt-8", "kp-K8", "K8", "done");

    let input = khipu_notification("nt-8");
    let (a, b) = tokio::join!(h.engine.notify_khipu(&input), h.engine.notify_khipu(&input));
    assert_eq!(a.unwrap(), json!({"ok": true}));
    assert_eq!(b.unwrap(), json!({"ok": true}));

    assert_eq!(h.store.get_order("K8").await.unwrap().status, OrderStatus::Paid);
    assert_eq!(h.store.order_writes.load(Ordering::SeqCst), 1);
    let payments = h.store.payments_by_order("K8", false).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, "CONFIRMED");
}

#[tokio::test]
async fn notification_backfills_missing_payment_row() {
    let h = harness();
    h.store.insert_order(&order("K9", OrderStatus::Pending, 4990)).await.unwrap();
    h.khipu.resolve("nt-9", "kp-K9", "K9", "done");

    h.engine.notify_khipu(&khipu_notification("nt-9")).await.unwrap();

    let payment = h.store.get_payment("kp-K9").await.unwrap();
    assert_eq!(payment.order_id, "K9");
    assert_eq!(payment.status, "CONFIRMED");
    assert_eq!(payment.amount, Some(4990));
}

#[tokio::test]
async fn amount_mismatch_is_recorded_as_reported() {
    let h = harness();
    h.store.insert_order(&order("K11", OrderStatus::Pending, 4990)).await.unwrap();
    h.khipu.resolve_paid("nt-11", "kp-K11", "K11", "done", 990);

    let ack = h.engine.notify_khipu(&khipu_notification("nt-11")).await.unwrap();
    assert_eq!(ack, json!({"ok": true}));

    // Logged as a mismatch; the payment keeps what Khipu reported.
    let payment = h.store.get_payment("kp-K11").await.unwrap();
    assert_eq!(payment.amount, Some(990));
    assert_eq!(h.store.get_order("K11").await.unwrap().status, OrderStatus::Paid);
}

#[tokio::test]
async fn notification_token_alias_is_accepted() {
    let h = harness();
    h.store.insert_order(&order("K12", OrderStatus::Pending, 4990)).await.unwrap();
    h.khipu.resolve("nt-12", "kp-K12", "K12", "done");

    let input = CallbackInput {
        method: CallbackMethod::Post,
        query: HashMap::new(),
        body: json!({"notificationToken": "nt-12"}),
    };
    h.engine.notify_khipu(&input).await.unwrap();
    assert_eq!(h.store.get_order("K12").await.unwrap().status, OrderStatus::Paid);
}

#[tokio::test]
async fn notification_for_unknown_order_is_acknowledged() {
    let h = harness();
    h.khipu.resolve("nt-x", "kp-X", "no-such-order", "done");

    let ack = h.engine.notify_khipu(&khipu_notification("nt-x")).await.unwrap();
    assert_eq!(ack, json!({"ok": true}));
    assert!(h.store.get_payment("kp-X").await.is_err());
}

#[tokio::test]
async fn unresolvable_token_is_acknowledged() {
    let h = harness();
    let ack = h.engine.notify_khipu(&khipu_notification("bogus")).await.unwrap();
    assert_eq!(ack, json!({"ok": true}));
    assert_eq!(h.khipu.fetch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn notification_without_token_is_rejected() {
    let h = harness();
    let input = CallbackInput {
        method: CallbackMethod::Post,
        query: HashMap::new(),
        body: json!({"api_version": "2.0"}),
    };
    let err = h.engine.notify_khipu(&input).await.unwrap_err();
    assert!(matches!(err, EngineError::MissingToken));
    assert_eq!(h.khipu.fetch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn status_lists_order_with_payments() {
    let h = harness();
    h.store.insert_order(&order("K10", OrderStatus::Pending, 4990)).await.unwrap();
    h.engine.init_khipu("K10").await.unwrap();

    let view = h.engine.status_khipu("K10").await.unwrap();
    assert!(view.ok);
    assert_eq!(view.order.id, "K10");
    assert_eq!(view.payments.len(), 1);
    assert_eq!(view.payments[0].id, "kp-K10");

    let err = h.engine.status_khipu("nope").await.unwrap_err();
    assert!(matches!(err, EngineError::OrderNotFound));
}

#[tokio::test]
async fn payments_by_order_lists_history() {
    let h = harness();
    h.store.insert_order(&order("K13", OrderStatus::Pending, 4990)).await.unwrap();
    h.engine.init_khipu("K13").await.unwrap();

    let payments = h.engine.payments_by_order("K13").await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, "INITIATED");
    assert!(h.engine.payments_by_order("none").await.unwrap().is_empty());
    assert!(matches!(
        h.engine.payments_by_order(" ").await,
        Err(EngineError::Validation { .. })
    ));
}
