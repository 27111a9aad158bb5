mod common;

use chrono::Duration;
use common::TestContext;
use entitlement_service::models::SubscriptionStatus;
use entitlement_service::services::{AccessError, AccessReason, EntitlementStore};

#[tokio::test]
async fn free_chapter_is_readable_without_an_account() {
    let ctx = TestContext::new();
    ctx.seed_chapter("c1", 1, 0, true).await;

    let decision = ctx.state.evaluator.check("reader", "c1").await.unwrap();
    assert!(decision.granted);
    assert_eq!(decision.reason, AccessReason::Free);
}

#[tokio::test]
async fn paid_chapter_is_locked_until_unlocked() {
    let ctx = TestContext::new();
    ctx.seed_chapter("c5", 5, 30, false).await;
    ctx.give_coins("reader", 50).await;

    let decision = ctx.state.evaluator.check("reader", "c5").await.unwrap();
    assert!(!decision.granted);
    assert_eq!(decision.reason, AccessReason::Locked);
    assert_eq!(decision.unlock_price, 30);

    ctx.state.unlocks.unlock_chapter("reader", "c5").await.unwrap();

    let decision = ctx.state.evaluator.check("reader", "c5").await.unwrap();
    assert!(decision.granted);
    assert_eq!(decision.reason, AccessReason::Unlocked);

    // Another user still sees it locked.
    assert!(!ctx.state.evaluator.can_access("other", "c5").await.unwrap());
}

#[tokio::test]
async fn unknown_chapter_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx.state.evaluator.check("reader", "missing").await.unwrap_err();
    assert!(matches!(err, AccessError::NotFound("Chapter")));
}

#[tokio::test]
async fn subscription_access_ends_exactly_at_end_date() {
    let ctx = TestContext::new();
    ctx.seed_chapter("c9", 9, 30, false).await;
    ctx.seed_plan("monthly", 10_000, None, 30).await;

    let created = ctx
        .state
        .subscriptions
        .create_subscription("reader", "monthly")
        .await
        .unwrap();
    let id = created.subscription.subscription_id;
    ctx.provider.mark_paid(&created.subscription.invoice_id);
    ctx.state
        .subscriptions
        .verify_payment("reader", id)
        .await
        .unwrap();

    ctx.clock.advance(Duration::days(30) - Duration::seconds(1));
    let decision = ctx.state.evaluator.check("reader", "c9").await.unwrap();
    assert_eq!(decision.reason, AccessReason::Subscription);

    ctx.clock.advance(Duration::seconds(1));
    let decision = ctx.state.evaluator.check("reader", "c9").await.unwrap();
    assert!(!decision.granted);

    // The evaluator reads only; the stored row is still active.
    let stored = ctx.store.get_subscription(id).await.unwrap().unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn pending_subscription_grants_nothing() {
    let ctx = TestContext::new();
    ctx.seed_chapter("c2", 2, 30, false).await;
    ctx.seed_plan("monthly", 10_000, None, 30).await;

    ctx.state
        .subscriptions
        .create_subscription("reader", "monthly")
        .await
        .unwrap();

    assert!(!ctx.state.evaluator.can_access("reader", "c2").await.unwrap());
}
