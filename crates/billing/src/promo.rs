//! Promo code registry
//!
//! Validation reserves the code for the owner (success = false) so the
//! discounted price can be quoted; finalization flips the reservation to
//! success when the settlement it was quoted for succeeds. Reservation
//! creation is a unique-constrained insert and finalization is a conditional
//! update, so two concurrent checkouts cannot both spend one code.

use sqlx::PgPool;
use uuid::Uuid;

use pressroom_shared::{BillingInterval, PlanType};

use crate::catalog::PriceCatalog;
use crate::client::PriceInfo;
use crate::error::BillingResult;
use crate::events::{AuditKind, AuditLog};
use crate::profile::ProfileStore;

/// A promo code catalog entry
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PromoCode {
    pub id: Uuid,
    pub code: String,
    pub tier_class: String,
}

/// Why a promo code was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoRejection {
    /// Unknown code, or a code whose tier class does not fit the plan.
    InvalidCode,
    /// The owner already finalized a redemption of this code.
    AlreadyUsed,
    /// The owner's plan is not promo-eligible at all.
    InvalidPlanType,
}

impl PromoRejection {
    pub fn message(&self) -> &'static str {
        match self {
            PromoRejection::InvalidCode => "Invalid promo code",
            PromoRejection::AlreadyUsed => "You have already used a promo code",
            PromoRejection::InvalidPlanType => "Invalid type",
        }
    }
}

/// Outcome of validating a promo code.
#[derive(Debug, Clone)]
pub enum PromoOutcome {
    Valid {
        price: PriceInfo,
    },
    Rejected(PromoRejection),
}

/// Pure eligibility check: the code's tier class must be prefixed by the
/// plan type, and only promo-eligible plans qualify.
pub fn class_matches_plan(tier_class: &str, plan: PlanType) -> bool {
    plan.promo_eligible() && tier_class.starts_with(plan.as_str())
}

/// The promo code registry
#[derive(Clone)]
pub struct PromoRegistry {
    pool: PgPool,
    catalog: PriceCatalog,
    profiles: ProfileStore,
    audit: AuditLog,
}

impl PromoRegistry {
    pub fn new(pool: PgPool, catalog: PriceCatalog) -> Self {
        let profiles = ProfileStore::new(pool.clone());
        let audit = AuditLog::new(pool.clone());
        Self {
            pool,
            catalog,
            profiles,
            audit,
        }
    }

    async fn find_code(&self, code: &str) -> BillingResult<Option<PromoCode>> {
        let found: Option<PromoCode> =
            sqlx::query_as("SELECT id, code, tier_class FROM promo_codes WHERE code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found)
    }

    /// Validate a promo code for the owner at a billing interval.
    ///
    /// On success the code is reserved for the owner (a `success = false`
    /// redemption row) and the discounted price is returned. A reservation
    /// alone never blocks re-validation; only a finalized redemption does.
    pub async fn validate(
        &self,
        owner_id: Uuid,
        code: &str,
        interval: BillingInterval,
    ) -> BillingResult<PromoOutcome> {
        let Some(promo) = self.find_code(code).await? else {
            return self.reject(owner_id, code, PromoRejection::InvalidCode).await;
        };

        let profile = self.profiles.require_latest(owner_id).await?;
        if !profile.plan.promo_eligible() {
            return self
                .reject(owner_id, code, PromoRejection::InvalidPlanType)
                .await;
        }
        if !class_matches_plan(&promo.tier_class, profile.plan) {
            return self.reject(owner_id, code, PromoRejection::InvalidCode).await;
        }

        let finalized: Option<(bool,)> = sqlx::query_as(
            "SELECT success FROM promo_redemptions WHERE owner_id = $1 AND promo_code_id = $2",
        )
        .bind(owner_id)
        .bind(promo.id)
        .fetch_optional(&self.pool)
        .await?;
        if finalized.map(|(s,)| s).unwrap_or(false) {
            return self.reject(owner_id, code, PromoRejection::AlreadyUsed).await;
        }

        // Reserve. The unique (owner, code) constraint collapses concurrent
        // validates into one reservation row.
        sqlx::query(
            r#"
            INSERT INTO promo_redemptions (owner_id, promo_code_id, success)
            VALUES ($1, $2, FALSE)
            ON CONFLICT (owner_id, promo_code_id) DO NOTHING
            "#,
        )
        .bind(owner_id)
        .bind(promo.id)
        .execute(&self.pool)
        .await?;

        let price = self
            .catalog
            .price_candidates(&promo.tier_class, interval)
            .await?;
        match price {
            Some(price) => Ok(PromoOutcome::Valid { price }),
            None => self.reject(owner_id, code, PromoRejection::InvalidCode).await,
        }
    }

    async fn reject(
        &self,
        owner_id: Uuid,
        code: &str,
        rejection: PromoRejection,
    ) -> BillingResult<PromoOutcome> {
        self.audit
            .record(
                Some(owner_id),
                AuditKind::PromoRejected,
                &format!("{}: {}", code, rejection.message()),
            )
            .await;
        Ok(PromoOutcome::Rejected(rejection))
    }

    /// Finalize the owner's reservation of a code after settlement success.
    ///
    /// A conditional false-to-true flip: returns `true` only for the caller
    /// that actually finalized. Re-finalizing is a no-op, not an error, so
    /// concurrent settlement confirmations cannot double-finalize.
    pub async fn finalize(&self, owner_id: Uuid, code: &str) -> BillingResult<bool> {
        let Some(promo) = self.find_code(code).await? else {
            return Ok(false);
        };

        let result = sqlx::query(
            r#"
            UPDATE promo_redemptions SET success = TRUE
            WHERE owner_id = $1 AND promo_code_id = $2 AND success = FALSE
            "#,
        )
        .bind(owner_id)
        .bind(promo.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Administrative reseed: replace the catalog with the given codes.
    pub async fn reseed(&self, codes: &[(String, String)]) -> BillingResult<Vec<PromoCode>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM promo_redemptions")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM promo_codes").execute(&mut *tx).await?;
        for (code, tier_class) in codes {
            sqlx::query("INSERT INTO promo_codes (code, tier_class) VALUES ($1, $2)")
                .bind(code)
                .bind(tier_class)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let all: Vec<PromoCode> = sqlx::query_as("SELECT id, code, tier_class FROM promo_codes")
            .fetch_all(&self.pool)
            .await?;
        Ok(all)
    }

    pub async fn list(&self) -> BillingResult<Vec<PromoCode>> {
        let all: Vec<PromoCode> =
            sqlx::query_as("SELECT id, code, tier_class FROM promo_codes ORDER BY code")
                .fetch_all(&self.pool)
                .await?;
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_must_be_prefixed_by_plan_type() {
        assert!(class_matches_plan("Premium 25", PlanType::Premium));
        assert!(class_matches_plan("Premium for life", PlanType::Premium));
        assert!(class_matches_plan("Start 50", PlanType::Start));
        assert!(!class_matches_plan("Premium 25", PlanType::Start));
        assert!(!class_matches_plan("Start 50", PlanType::Premium));
    }

    #[test]
    fn trial_and_student_plans_are_never_eligible() {
        assert!(!class_matches_plan("Start 25", PlanType::Trial));
        assert!(!class_matches_plan("Start 25", PlanType::Student));
    }

    #[test]
    fn rejection_messages_are_fixed() {
        assert_eq!(PromoRejection::InvalidCode.message(), "Invalid promo code");
        assert_eq!(
            PromoRejection::AlreadyUsed.message(),
            "You have already used a promo code"
        );
        assert_eq!(PromoRejection::InvalidPlanType.message(), "Invalid type");
    }
}
