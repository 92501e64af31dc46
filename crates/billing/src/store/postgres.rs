//! Postgres-backed store

use async_trait::async_trait;
use outcomesignal_shared::{
    Account, AccountId, AccountProfile, NewAccount, NewSubscription, Subscription, UsageTracking,
};
use sqlx::PgPool;
use time::OffsetDateTime;

use super::{AccountStore, StoreResult};

const ACCOUNT_COLUMNS: &str = r#"
    id, clerk_user_id AS external_id, email, first_name, last_name, avatar_url,
    created_at, updated_at
"#;

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, user_id AS account_id, tier, status, trial_ends_at,
    current_period_start, current_period_end, created_at, updated_at
"#;

/// Store running against the service-role connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn insert_account(&self, new: &NewAccount) -> StoreResult<Account> {
        let sql = format!(
            r#"
            INSERT INTO users (clerk_user_id, email, first_name, last_name, avatar_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(&new.external_id)
            .bind(&new.profile.email)
            .bind(&new.profile.first_name)
            .bind(&new.profile.last_name)
            .bind(&new.profile.avatar_url)
            .bind(new.created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(account)
    }

    async fn find_account_by_external_id(
        &self,
        external_id: &str,
    ) -> StoreResult<Option<Account>> {
        let sql = format!(
            "SELECT {} FROM users WHERE clerk_user_id = $1",
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn update_account_profile(
        &self,
        id: AccountId,
        profile: &AccountProfile,
    ) -> StoreResult<Account> {
        let sql = format!(
            r#"
            UPDATE users
            SET email = $2, first_name = $3, last_name = $4, avatar_url = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .bind(&profile.email)
            .bind(&profile.first_name)
            .bind(&profile.last_name)
            .bind(&profile.avatar_url)
            .fetch_one(&self.pool)
            .await?;
        Ok(account)
    }

    async fn find_subscription(&self, account_id: AccountId) -> StoreResult<Option<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        );
        let subscription = sqlx::query_as::<_, Subscription>(&sql)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(subscription)
    }

    async fn insert_subscription(&self, new: &NewSubscription) -> StoreResult<Subscription> {
        let sql = format!(
            r#"
            INSERT INTO subscriptions
                (user_id, tier, status, trial_ends_at, current_period_start, current_period_end)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let subscription = sqlx::query_as::<_, Subscription>(&sql)
            .bind(new.account_id)
            .bind(new.tier)
            .bind(new.status)
            .bind(new.trial_ends_at)
            .bind(new.current_period_start)
            .bind(new.current_period_end)
            .fetch_one(&self.pool)
            .await?;
        Ok(subscription)
    }

    async fn insert_usage(&self, usage: &UsageTracking) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_tracking
                (user_id, month, credits_used, credits_limit, initiatives_count, initiatives_limit)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(usage.account_id)
        .bind(&usage.month)
        .bind(usage.credits_used)
        .bind(usage.credits_limit)
        .bind(usage.initiatives_count)
        .bind(usage.initiatives_limit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_usage(
        &self,
        account_id: AccountId,
        month: &str,
    ) -> StoreResult<Option<UsageTracking>> {
        let usage = sqlx::query_as::<_, UsageTracking>(
            r#"
            SELECT user_id AS account_id, month, credits_used, credits_limit,
                   initiatives_count, initiatives_limit
            FROM usage_tracking
            WHERE user_id = $1 AND month = $2
            "#,
        )
        .bind(account_id)
        .bind(month)
        .fetch_optional(&self.pool)
        .await?;
        Ok(usage)
    }

    async fn increment_initiatives(
        &self,
        account_id: AccountId,
        month: &str,
    ) -> StoreResult<Option<i32>> {
        let count: Option<i32> = sqlx::query_scalar("SELECT increment_initiatives_count($1, $2)")
            .bind(account_id)
            .bind(month)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn expire_trials(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = NOW()
            WHERE tier = 'trial'
              AND status = 'active'
              AND trial_ends_at IS NOT NULL
              AND trial_ends_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn subscriptions_missing_usage(&self, month: &str) -> StoreResult<Vec<Subscription>> {
        let sql = format!(
            r#"
            SELECT {} FROM subscriptions s
            WHERE s.status IN ('active', 'past_due')
              AND NOT EXISTS (
                  SELECT 1 FROM usage_tracking u
                  WHERE u.user_id = s.user_id AND u.month = $1
              )
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let subscriptions = sqlx::query_as::<_, Subscription>(&sql)
            .bind(month)
            .fetch_all(&self.pool)
            .await?;
        Ok(subscriptions)
    }
}
