//! PostgreSQL store.

use super::{check_amount, EntitlementStore};
use crate::models::{
    CachedSubscriptionStatus, Chapter, CoinTransaction, CreditCoins, CreditReceipt, Subscription,
    SubscriptionPlan, SubscriptionStatus, TransactionKind, UnlockChapter, UnlockReceipt,
    UnlockRecord, UserAccount,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::AccessError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Create the user row if it does not exist yet.
async fn ensure_user_row(
    conn: &mut PgConnection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<(), AccessError> {
    sqlx::query(
        r#"
        INSERT INTO users (user_id, coins, subscription_status, subscription_expiry, created_utc, updated_utc)
        VALUES ($1, 0, 'free', NULL, $2, $2)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(now)
    .execute(conn)
    .await
    .map_err(|e| AccessError::database("Failed to create user", e))?;
    Ok(())
}

/// Mirror a subscription status onto the user row. A `None` expiry keeps
/// the stored one.
async fn mirror_status(
    conn: &mut PgConnection,
    user_id: &str,
    status: CachedSubscriptionStatus,
    expiry: Option<Option<DateTime<Utc>>>,
    now: DateTime<Utc>,
) -> Result<(), AccessError> {
    let result = match expiry {
        Some(expiry) => {
            sqlx::query(
                r#"
                UPDATE users
                SET subscription_status = $2, subscription_expiry = $3, updated_utc = $4
                WHERE user_id = $1
                "#,
            )
            .bind(user_id)
            .bind(status.as_str())
            .bind(expiry)
            .bind(now)
            .execute(conn)
            .await
        }
        None => {
            sqlx::query(
                r#"
                UPDATE users
                SET subscription_status = $2, updated_utc = $3
                WHERE user_id = $1
                "#,
            )
            .bind(user_id)
            .bind(status.as_str())
            .bind(now)
            .execute(conn)
            .await
        }
    };

    result.map_err(|e| AccessError::database("Failed to update subscription cache", e))?;
    Ok(())
}

/// Store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool.
    #[instrument(skip(database_url), fields(service = "entitlement-service"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AccessError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AccessError::database("Failed to connect", e))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AccessError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AccessError::database("Migration failed", e))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn find_credit(
        conn: &mut PgConnection,
        reference: &str,
    ) -> Result<Option<CoinTransaction>, AccessError> {
        sqlx::query_as::<_, CoinTransaction>(
            r#"
            SELECT transaction_id, user_id, kind, amount, description, related_chapter_id, provider_reference, created_utc
            FROM coin_transactions
            WHERE provider_reference = $1
            "#,
        )
        .bind(reference)
        .fetch_optional(conn)
        .await
        .map_err(|e| AccessError::database("Failed to look up credit", e))
    }
}

#[async_trait]
impl EntitlementStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AccessError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AccessError::database("Health check failed", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ensure_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UserAccount, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["ensure_user"])
            .start_timer();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AccessError::database("Failed to acquire connection", e))?;
        ensure_user_row(&mut conn, user_id, now).await?;

        let user = sqlx::query_as::<_, UserAccount>(
            r#"
            SELECT user_id, coins, subscription_status, subscription_expiry, created_utc, updated_utc
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| AccessError::database("Failed to get user", e))?;

        timer.observe_duration();
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_user"])
            .start_timer();

        let user = sqlx::query_as::<_, UserAccount>(
            r#"
            SELECT user_id, coins, subscription_status, subscription_expiry, created_utc, updated_utc
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to get user", e))?;

        timer.observe_duration();
        Ok(user)
    }

    #[instrument(skip(self, chapter), fields(chapter_id = %chapter.chapter_id))]
    async fn upsert_chapter(&self, chapter: &Chapter) -> Result<Chapter, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_chapter"])
            .start_timer();

        let chapter = sqlx::query_as::<_, Chapter>(
            r#"
            INSERT INTO chapters (chapter_id, work_id, number, title, price, is_free)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (chapter_id) DO UPDATE
            SET work_id = EXCLUDED.work_id,
                number = EXCLUDED.number,
                title = EXCLUDED.title,
                price = EXCLUDED.price,
                is_free = EXCLUDED.is_free
            RETURNING chapter_id, work_id, number, title, price, is_free
            "#,
        )
        .bind(&chapter.chapter_id)
        .bind(&chapter.work_id)
        .bind(chapter.number)
        .bind(&chapter.title)
        .bind(chapter.price)
        .bind(chapter.is_free)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to upsert chapter", e))?;

        timer.observe_duration();
        Ok(chapter)
    }

    #[instrument(skip(self))]
    async fn get_chapter(&self, chapter_id: &str) -> Result<Option<Chapter>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_chapter"])
            .start_timer();

        let chapter = sqlx::query_as::<_, Chapter>(
            r#"
            SELECT chapter_id, work_id, number, title, price, is_free
            FROM chapters
            WHERE chapter_id = $1
            "#,
        )
        .bind(chapter_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to get chapter", e))?;

        timer.observe_duration();
        Ok(chapter)
    }

    #[instrument(skip(self, plan), fields(plan_id = %plan.plan_id))]
    async fn upsert_plan(&self, plan: &SubscriptionPlan) -> Result<SubscriptionPlan, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            r#"
            INSERT INTO subscription_plans (plan_id, name, price, discount_percent, duration_days, is_active, sequence, features)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (plan_id) DO UPDATE
            SET name = EXCLUDED.name,
                price = EXCLUDED.price,
                discount_percent = EXCLUDED.discount_percent,
                duration_days = EXCLUDED.duration_days,
                is_active = EXCLUDED.is_active,
                sequence = EXCLUDED.sequence,
                features = EXCLUDED.features
            RETURNING plan_id, name, price, discount_percent, duration_days, is_active, sequence, features
            "#,
        )
        .bind(&plan.plan_id)
        .bind(&plan.name)
        .bind(plan.price)
        .bind(plan.discount_percent)
        .bind(plan.duration_days)
        .bind(plan.is_active)
        .bind(plan.sequence)
        .bind(&plan.features)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to upsert plan", e))?;

        timer.observe_duration();
        Ok(plan)
    }

    #[instrument(skip(self))]
    async fn get_plan(&self, plan_id: &str) -> Result<Option<SubscriptionPlan>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            r#"
            SELECT plan_id, name, price, discount_percent, duration_days, is_active, sequence, features
            FROM subscription_plans
            WHERE plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to get plan", e))?;

        timer.observe_duration();
        Ok(plan)
    }

    #[instrument(skip(self))]
    async fn list_active_plans(&self) -> Result<Vec<SubscriptionPlan>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_plans"])
            .start_timer();

        let plans = sqlx::query_as::<_, SubscriptionPlan>(
            r#"
            SELECT plan_id, name, price, discount_percent, duration_days, is_active, sequence, features
            FROM subscription_plans
            WHERE is_active
            ORDER BY sequence ASC, plan_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to list plans", e))?;

        timer.observe_duration();
        Ok(plans)
    }

    #[instrument(skip(self))]
    async fn find_unlock(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Option<UnlockRecord>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_unlock"])
            .start_timer();

        let record = sqlx::query_as::<_, UnlockRecord>(
            r#"
            SELECT user_id, chapter_id, unlocked_utc
            FROM chapter_unlocks
            WHERE user_id = $1 AND chapter_id = $2
            "#,
        )
        .bind(user_id)
        .bind(chapter_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to look up unlock", e))?;

        timer.observe_duration();
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn list_unlocks(&self, user_id: &str) -> Result<Vec<UnlockRecord>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_unlocks"])
            .start_timer();

        let records = sqlx::query_as::<_, UnlockRecord>(
            r#"
            SELECT user_id, chapter_id, unlocked_utc
            FROM chapter_unlocks
            WHERE user_id = $1
            ORDER BY unlocked_utc DESC, chapter_id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to list unlocks", e))?;

        timer.observe_duration();
        Ok(records)
    }

    #[instrument(skip(self, input), fields(user_id = %input.user_id, chapter_id = %input.chapter_id, price = input.price))]
    async fn unlock_chapter(&self, input: &UnlockChapter) -> Result<UnlockReceipt, AccessError> {
        check_amount(TransactionKind::ChapterUnlock, -input.price)?;
        let timer = DB_QUERY_DURATION
            .with_label_values(&["unlock_chapter"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AccessError::database("Failed to begin transaction", e))?;

        ensure_user_row(&mut tx, &input.user_id, input.now).await?;

        // Row lock serializes balance changes for this user.
        let balance: i64 = sqlx::query_scalar("SELECT coins FROM users WHERE user_id = $1 FOR UPDATE")
            .bind(&input.user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AccessError::database("Failed to lock user", e))?;

        let already: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM chapter_unlocks WHERE user_id = $1 AND chapter_id = $2)",
        )
        .bind(&input.user_id)
        .bind(&input.chapter_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AccessError::database("Failed to look up unlock", e))?;
        if already {
            return Err(AccessError::AlreadyUnlocked);
        }

        let debited: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET coins = coins - $2, updated_utc = $3
            WHERE user_id = $1 AND coins >= $2
            RETURNING coins
            "#,
        )
        .bind(&input.user_id)
        .bind(input.price)
        .bind(input.now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AccessError::database("Failed to debit coins", e))?;

        let Some(balance_after) = debited else {
            return Err(AccessError::InsufficientFunds {
                balance,
                price: input.price,
            });
        };

        let record = sqlx::query_as::<_, UnlockRecord>(
            r#"
            INSERT INTO chapter_unlocks (user_id, chapter_id, unlocked_utc)
            VALUES ($1, $2, $3)
            RETURNING user_id, chapter_id, unlocked_utc
            "#,
        )
        .bind(&input.user_id)
        .bind(&input.chapter_id)
        .bind(input.now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AccessError::AlreadyUnlocked
            } else {
                AccessError::database("Failed to record unlock", e)
            }
        })?;

        let transaction = sqlx::query_as::<_, CoinTransaction>(
            r#"
            INSERT INTO coin_transactions (transaction_id, user_id, kind, amount, description, related_chapter_id, provider_reference, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, NULL, $7)
            RETURNING transaction_id, user_id, kind, amount, description, related_chapter_id, provider_reference, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.user_id)
        .bind(TransactionKind::ChapterUnlock.as_str())
        .bind(-input.price)
        .bind(input.description())
        .bind(&input.chapter_id)
        .bind(input.now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AccessError::database("Failed to append transaction", e))?;

        tx.commit()
            .await
            .map_err(|e| AccessError::database("Failed to commit unlock", e))?;

        timer.observe_duration();

        info!(
            transaction_id = %transaction.transaction_id,
            balance = balance_after,
            "Chapter unlocked"
        );

        Ok(UnlockReceipt {
            record,
            transaction,
            balance: balance_after,
        })
    }

    #[instrument(skip(self, input), fields(user_id = %input.user_id, amount = input.amount))]
    async fn credit_coins(&self, input: &CreditCoins) -> Result<CreditReceipt, AccessError> {
        check_amount(TransactionKind::CoinPurchase, input.amount)?;
        let timer = DB_QUERY_DURATION
            .with_label_values(&["credit_coins"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AccessError::database("Failed to begin transaction", e))?;

        ensure_user_row(&mut tx, &input.user_id, input.now).await?;

        let balance: i64 = sqlx::query_scalar("SELECT coins FROM users WHERE user_id = $1 FOR UPDATE")
            .bind(&input.user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AccessError::database("Failed to lock user", e))?;

        if let Some(reference) = input.provider_reference.as_deref() {
            if let Some(transaction) = Self::find_credit(&mut tx, reference).await? {
                if transaction.user_id != input.user_id {
                    return Err(AccessError::Unauthorized);
                }
                tx.commit()
                    .await
                    .map_err(|e| AccessError::database("Failed to commit", e))?;
                info!(provider_reference = %reference, "Credit already applied");
                return Ok(CreditReceipt {
                    transaction,
                    balance,
                    replayed: true,
                });
            }
        }

        let balance: i64 = sqlx::query_scalar(
            r#"
            UPDATE users
            SET coins = coins + $2, updated_utc = $3
            WHERE user_id = $1
            RETURNING coins
            "#,
        )
        .bind(&input.user_id)
        .bind(input.amount)
        .bind(input.now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AccessError::database("Failed to credit coins", e))?;

        let transaction = sqlx::query_as::<_, CoinTransaction>(
            r#"
            INSERT INTO coin_transactions (transaction_id, user_id, kind, amount, description, related_chapter_id, provider_reference, created_utc)
            VALUES ($1, $2, $3, $4, $5, NULL, $6, $7)
            RETURNING transaction_id, user_id, kind, amount, description, related_chapter_id, provider_reference, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.user_id)
        .bind(TransactionKind::CoinPurchase.as_str())
        .bind(input.amount)
        .bind(input.description())
        .bind(&input.provider_reference)
        .bind(input.now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            // Another user already holds this reference; same-user replays
            // were caught above under the row lock.
            if is_unique_violation(&e) {
                AccessError::Unauthorized
            } else {
                AccessError::database("Failed to append transaction", e)
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| AccessError::database("Failed to commit credit", e))?;

        timer.observe_duration();

        info!(
            transaction_id = %transaction.transaction_id,
            balance = balance,
            "Coins credited"
        );

        Ok(CreditReceipt {
            transaction,
            balance,
            replayed: false,
        })
    }

    #[instrument(skip(self))]
    async fn list_transactions(
        &self,
        user_id: &str,
    ) -> Result<Vec<CoinTransaction>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_transactions"])
            .start_timer();

        let transactions = sqlx::query_as::<_, CoinTransaction>(
            r#"
            SELECT transaction_id, user_id, kind, amount, description, related_chapter_id, provider_reference, created_utc
            FROM coin_transactions
            WHERE user_id = $1
            ORDER BY created_utc DESC, seq DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to list transactions", e))?;

        timer.observe_duration();
        Ok(transactions)
    }

    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id, user_id = %subscription.user_id))]
    async fn insert_subscription(
        &self,
        subscription: &Subscription,
        superseded: Option<Uuid>,
    ) -> Result<Subscription, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_subscription"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AccessError::database("Failed to begin transaction", e))?;

        ensure_user_row(&mut tx, &subscription.user_id, subscription.created_utc).await?;

        if let Some(superseded) = superseded {
            sqlx::query(
                r#"
                UPDATE subscriptions
                SET status = 'cancelled', updated_utc = $3
                WHERE subscription_id = $1 AND user_id = $2 AND status = 'pending'
                "#,
            )
            .bind(superseded)
            .bind(&subscription.user_id)
            .bind(subscription.created_utc)
            .execute(&mut *tx)
            .await
            .map_err(|e| AccessError::database("Failed to cancel superseded subscription", e))?;
        }

        let inserted = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (subscription_id, user_id, plan_id, status, invoice_id, amount, currency, start_utc, end_utc, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING subscription_id, user_id, plan_id, status, invoice_id, amount, currency, start_utc, end_utc, created_utc, updated_utc
            "#,
        )
        .bind(subscription.subscription_id)
        .bind(&subscription.user_id)
        .bind(&subscription.plan_id)
        .bind(subscription.status.as_str())
        .bind(&subscription.invoice_id)
        .bind(subscription.amount)
        .bind(&subscription.currency)
        .bind(subscription.start_utc)
        .bind(subscription.end_utc)
        .bind(subscription.created_utc)
        .bind(subscription.updated_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AccessError::PendingSubscriptionExists
            } else {
                AccessError::database("Failed to insert subscription", e)
            }
        })?;

        mirror_status(
            &mut tx,
            &inserted.user_id,
            inserted.status.cached(),
            Some(None),
            inserted.created_utc,
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| AccessError::database("Failed to commit subscription", e))?;

        timer.observe_duration();
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, invoice_id, amount, currency, start_utc, end_utc, created_utc, updated_utc
            FROM subscriptions
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to get subscription", e))?;

        timer.observe_duration();
        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn find_subscription_by_invoice(
        &self,
        invoice_id: &str,
    ) -> Result<Option<Subscription>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_subscription_by_invoice"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, invoice_id, amount, currency, start_utc, end_utc, created_utc, updated_utc
            FROM subscriptions
            WHERE invoice_id = $1
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to find subscription by invoice", e))?;

        timer.observe_duration();
        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn find_live_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<Subscription>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_live_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, invoice_id, amount, currency, start_utc, end_utc, created_utc, updated_utc
            FROM subscriptions
            WHERE user_id = $1 AND status IN ('pending', 'active')
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to find live subscription", e))?;

        timer.observe_duration();
        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn list_subscriptions(&self, user_id: &str) -> Result<Vec<Subscription>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_subscriptions"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, invoice_id, amount, currency, start_utc, end_utc, created_utc, updated_utc
            FROM subscriptions
            WHERE user_id = $1
            ORDER BY created_utc DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AccessError::database("Failed to list subscriptions", e))?;

        timer.observe_duration();
        Ok(subscriptions)
    }

    #[instrument(skip(self))]
    async fn activate_subscription(
        &self,
        subscription_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["activate_subscription"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AccessError::database("Failed to begin transaction", e))?;

        let activated = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = 'active', start_utc = $2, end_utc = $3, updated_utc = $4
            WHERE subscription_id = $1 AND status = 'pending'
            RETURNING subscription_id, user_id, plan_id, status, invoice_id, amount, currency, start_utc, end_utc, created_utc, updated_utc
            "#,
        )
        .bind(subscription_id)
        .bind(start)
        .bind(end)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AccessError::database("Failed to activate subscription", e))?;

        let Some(activated) = activated else {
            warn!("Subscription was no longer pending");
            return Ok(None);
        };

        mirror_status(
            &mut tx,
            &activated.user_id,
            CachedSubscriptionStatus::Active,
            Some(Some(end)),
            now,
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| AccessError::database("Failed to commit activation", e))?;

        timer.observe_duration();
        Ok(Some(activated))
    }

    #[instrument(skip(self))]
    async fn close_subscription(
        &self,
        subscription_id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AccessError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["close_subscription"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AccessError::database("Failed to begin transaction", e))?;

        let closed = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = $3, updated_utc = $4
            WHERE subscription_id = $1 AND status = $2
            RETURNING subscription_id, user_id, plan_id, status, invoice_id, amount, currency, start_utc, end_utc, created_utc, updated_utc
            "#,
        )
        .bind(subscription_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AccessError::database("Failed to close subscription", e))?;

        let Some(closed) = closed else {
            return Ok(None);
        };

        mirror_status(&mut tx, &closed.user_id, to.cached(), None, now).await?;

        tx.commit()
            .await
            .map_err(|e| AccessError::database("Failed to commit subscription change", e))?;

        timer.observe_duration();
        Ok(Some(closed))
    }
}
