//! Plan profile store
//!
//! Profiles are append-only: a plan change inserts a new row and the current
//! profile is always the most recent row per owner. Quota fields are fixed at
//! creation from the plan catalog and never partially updated.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use pressroom_shared::{BillingInterval, PlanType, QuotaLimits, TRIAL_PERIOD_DAYS};

use crate::error::{BillingError, BillingResult};

/// One plan profile row
#[derive(Debug, Clone)]
pub struct PlanProfile {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub plan: PlanType,
    pub interval: Option<BillingInterval>,
    pub limits: QuotaLimits,
    pub created_at: OffsetDateTime,
}

impl PlanProfile {
    /// Trial window end, derived on every read. The stored creation
    /// timestamp is never mutated.
    pub fn trial_period_end(&self) -> OffsetDateTime {
        self.created_at + time::Duration::days(TRIAL_PERIOD_DAYS)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    owner_id: Uuid,
    plan: String,
    billing_interval: Option<String>,
    max_seats: i32,
    max_storage_gb: i32,
    max_emails: i32,
    max_campaigns: i32,
    max_documents: i32,
    created_at: OffsetDateTime,
}

impl ProfileRow {
    fn into_profile(self) -> BillingResult<PlanProfile> {
        let plan: PlanType = self
            .plan
            .parse()
            .map_err(|_| BillingError::Configuration(format!("unknown plan type: {}", self.plan)))?;
        let interval = match self.billing_interval.as_deref() {
            Some(raw) => Some(raw.parse().map_err(|_| {
                BillingError::Configuration(format!("unknown billing interval: {raw}"))
            })?),
            None => None,
        };
        Ok(PlanProfile {
            id: self.id,
            owner_id: self.owner_id,
            plan,
            interval,
            limits: QuotaLimits {
                max_seats: self.max_seats,
                max_storage_gb: self.max_storage_gb,
                max_emails: self.max_emails,
                max_campaigns: self.max_campaigns,
                max_documents: self.max_documents,
            },
            created_at: self.created_at,
        })
    }
}

#[derive(Clone)]
pub struct ProfileStore {
    pool: PgPool,
}

impl ProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new profile row for a plan change or trial start. Limits come
    /// from the catalog; an unknown combination is a configuration error.
    pub async fn create(
        &self,
        owner_id: Uuid,
        plan: PlanType,
        interval: Option<BillingInterval>,
    ) -> BillingResult<PlanProfile> {
        let limits = QuotaLimits::for_plan(plan, interval).ok_or_else(|| {
            BillingError::Configuration(format!(
                "no quota limits for plan {} interval {:?}",
                plan, interval
            ))
        })?;

        let row: ProfileRow = sqlx::query_as(
            r#"
            INSERT INTO plan_profiles
                (owner_id, plan, billing_interval, max_seats, max_storage_gb,
                 max_emails, max_campaigns, max_documents)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, owner_id, plan, billing_interval, max_seats, max_storage_gb,
                      max_emails, max_campaigns, max_documents, created_at
            "#,
        )
        .bind(owner_id)
        .bind(plan.as_str())
        .bind(interval.map(|i| i.as_str()))
        .bind(limits.max_seats)
        .bind(limits.max_storage_gb)
        .bind(limits.max_emails)
        .bind(limits.max_campaigns)
        .bind(limits.max_documents)
        .fetch_one(&self.pool)
        .await?;

        row.into_profile()
    }

    /// The current profile: most recent row by creation time.
    pub async fn latest_by_owner(&self, owner_id: Uuid) -> BillingResult<Option<PlanProfile>> {
        let row: Option<ProfileRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, plan, billing_interval, max_seats, max_storage_gb,
                   max_emails, max_campaigns, max_documents, created_at
            FROM plan_profiles
            WHERE owner_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProfileRow::into_profile).transpose()
    }

    pub async fn by_id(&self, owner_id: Uuid, profile_id: Uuid) -> BillingResult<PlanProfile> {
        let row: Option<ProfileRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, plan, billing_interval, max_seats, max_storage_gb,
                   max_emails, max_campaigns, max_documents, created_at
            FROM plan_profiles
            WHERE id = $1
            "#,
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| BillingError::not_found(owner_id, "plan profile"))?
            .into_profile()
    }

    /// Current profile or a NotFound error carrying the owner.
    pub async fn require_latest(&self, owner_id: Uuid) -> BillingResult<PlanProfile> {
        self.latest_by_owner(owner_id)
            .await?
            .ok_or_else(|| BillingError::not_found(owner_id, "plan profile"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn profile_created_at(created_at: OffsetDateTime) -> PlanProfile {
        PlanProfile {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            plan: PlanType::Trial,
            interval: None,
            limits: QuotaLimits::for_plan(PlanType::Trial, None).unwrap(),
            created_at,
        }
    }

    #[test]
    fn trial_period_end_is_fourteen_days_after_creation() {
        let profile = profile_created_at(datetime!(2026-03-01 12:00 UTC));
        assert_eq!(profile.trial_period_end(), datetime!(2026-03-15 12:00 UTC));
    }

    #[test]
    fn trial_period_end_does_not_depend_on_read_time() {
        // Derived value: reading twice yields the same end.
        let profile = profile_created_at(datetime!(2026-01-31 23:59 UTC));
        assert_eq!(profile.trial_period_end(), profile.trial_period_end());
    }
}
