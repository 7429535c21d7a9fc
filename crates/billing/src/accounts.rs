//! Account snapshot consumed by the entitlement resolver
//!
//! Authentication transport lives elsewhere; this store only reads the
//! resolved identity attributes the billing engine needs.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Identity attributes relevant to entitlement resolution
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub profile_id: Option<Uuid>,
    pub email_confirmed: bool,
    pub signup_verified: bool,
    pub test_account: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct AccountStore {
    pool: PgPool,
}

impl AccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, owner_id: Uuid) -> BillingResult<Account> {
        let account: Option<Account> = sqlx::query_as(
            r#"
            SELECT id, email, first_name, subscription_id, customer_id, profile_id,
                   email_confirmed, signup_verified, test_account, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        account.ok_or_else(|| BillingError::not_found(owner_id, "user"))
    }

    /// Store the subscription id issued by the provider.
    pub async fn set_subscription_id(
        &self,
        owner_id: Uuid,
        subscription_id: &str,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE users SET subscription_id = $2 WHERE id = $1")
            .bind(owner_id)
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_customer_id(&self, owner_id: Uuid, customer_id: &str) -> BillingResult<()> {
        sqlx::query("UPDATE users SET customer_id = $2 WHERE id = $1")
            .bind(owner_id)
            .bind(customer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Point the account at the plan profile a settlement paid for.
    pub async fn set_profile_id(&self, owner_id: Uuid, profile_id: Uuid) -> BillingResult<()> {
        sqlx::query("UPDATE users SET profile_id = $2 WHERE id = $1")
            .bind(owner_id)
            .bind(profile_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// First successful settlement confirms a still-unconfirmed registration.
    pub async fn confirm_registration(&self, owner_id: Uuid) -> BillingResult<bool> {
        let result =
            sqlx::query("UPDATE users SET email_confirmed = TRUE WHERE id = $1 AND email_confirmed = FALSE")
                .bind(owner_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Total bytes of stored files, reported as disk usage on login payloads.
    pub async fn disk_used_gb(&self, owner_id: Uuid) -> BillingResult<f64> {
        let (bytes,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM stored_files WHERE owner_id = $1",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(bytes as f64 / 1024.0 / 1024.0 / 1024.0)
    }
}
