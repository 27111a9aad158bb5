//! Shared wiring for integration tests: in-memory store, mock provider,
//! and a clock that only moves when a test moves it.

#![allow(dead_code)]

use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use entitlement_service::models::{Chapter, SubscriptionPlan};
use entitlement_service::services::{
    EntitlementStore, ManualClock, MemoryStore, MockPaymentProvider,
};
use entitlement_service::{router, AppState};
use std::sync::Arc;

pub const CURRENCY: &str = "MNT";

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<MockPaymentProvider>,
    pub clock: Arc<ManualClock>,
    pub state: AppState,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockPaymentProvider::new());
        let clock = Arc::new(ManualClock::new(start_time()));

        let state = AppState::new(store.clone(), provider.clone(), clock.clone(), CURRENCY);

        Self {
            store,
            provider,
            clock,
            state,
        }
    }

    pub fn app(&self) -> Router {
        router(self.state.clone())
    }

    pub async fn seed_chapter(&self, chapter_id: &str, number: i32, price: i64, is_free: bool) -> Chapter {
        let chapter = Chapter {
            chapter_id: chapter_id.to_string(),
            work_id: "one-piece".to_string(),
            number,
            title: format!("Chapter {}", number),
            price,
            is_free,
        };
        self.store.upsert_chapter(&chapter).await.unwrap()
    }

    pub async fn seed_plan(
        &self,
        plan_id: &str,
        price: i64,
        discount_percent: Option<i32>,
        duration_days: i32,
    ) -> SubscriptionPlan {
        let plan = SubscriptionPlan {
            plan_id: plan_id.to_string(),
            name: format!("Plan {}", plan_id),
            price,
            discount_percent,
            duration_days,
            is_active: true,
            sequence: 1,
            features: vec!["All chapters".to_string()],
        };
        self.store.upsert_plan(&plan).await.unwrap()
    }

    pub async fn give_coins(&self, user_id: &str, amount: i64) {
        self.state
            .coins
            .purchase_coins(user_id, amount, None)
            .await
            .unwrap();
    }

    pub async fn balance(&self, user_id: &str) -> i64 {
        self.store
            .get_user(user_id)
            .await
            .unwrap()
            .map(|user| user.coins)
            .unwrap_or(0)
    }
}
