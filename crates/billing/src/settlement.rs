//! Settlement records and finalization
//!
//! A settlement is a confirmed payment event from either provider; it
//! anchors a new usage period. The approval provider writes a pending record
//! before redirecting the user and confirms it on execute; the subscription
//! provider's confirmation callback writes and confirms in one step.
//!
//! The success flag is set exactly once: confirmation is a conditional
//! false-to-true update, and everything downstream (ledger row, promo
//! finalization, registration confirmation) hangs off that single flip.

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use pressroom_shared::BillingInterval;

use crate::accounts::AccountStore;
use crate::binding::{Binding, BindingService, ProviderKind};
use crate::client::{format_cents, StripeClient};
use crate::error::{BillingError, BillingResult};
use crate::events::{AuditKind, AuditLog};
use crate::paypal::{CreatedPayment, PayPalClient};
use crate::promo::{PromoOutcome, PromoRegistry};
use crate::usage::UsageLedger;

/// Provider-reported state of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementState {
    Created,
    Approved,
    Failed,
}

impl SettlementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::Created => "created",
            SettlementState::Approved => "approved",
            SettlementState::Failed => "failed",
        }
    }
}

/// One settlement record
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub binding_id: Uuid,
    pub provider_payment_id: String,
    pub state: String,
    pub success: bool,
    pub amount_cents: i64,
    pub promo_code: Option<String>,
    pub period_end: OffsetDateTime,
    pub plan_profile_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

/// Inputs to the subscription-provider confirmation trigger.
#[derive(Debug, Clone)]
pub struct SettlementConfirmation {
    pub owner_id: Uuid,
    pub binding_id: Uuid,
    /// Provider payment status, e.g. "succeeded".
    pub provider_status: String,
    pub provider_payment_id: String,
    pub promo_code: Option<String>,
    pub plan_profile_id: Option<Uuid>,
}

/// Period end for a settlement confirmed now: one billing interval plus the
/// unused remainder of the prior period, if any.
pub fn compute_period_end(
    now: OffsetDateTime,
    interval: BillingInterval,
    prior_period_end: Option<OffsetDateTime>,
) -> OffsetDateTime {
    let carry_days = prior_period_end
        .map(|end| (end - now).whole_days().max(0))
        .unwrap_or(0);
    now + Duration::days(interval.period_days() + carry_days)
}

const COLUMNS: &str = "id, owner_id, binding_id, provider_payment_id, state, success, \
                       amount_cents, promo_code, period_end, plan_profile_id, created_at";

/// Settlement store and finalization service
#[derive(Clone)]
pub struct SettlementService {
    pool: PgPool,
    stripe: StripeClient,
    paypal: Option<PayPalClient>,
    bindings: BindingService,
    promos: PromoRegistry,
    usage: UsageLedger,
    accounts: AccountStore,
    audit: AuditLog,
}

impl SettlementService {
    pub fn new(
        pool: PgPool,
        stripe: StripeClient,
        paypal: Option<PayPalClient>,
        bindings: BindingService,
        promos: PromoRegistry,
    ) -> Self {
        let usage = UsageLedger::new(pool.clone());
        let accounts = AccountStore::new(pool.clone());
        let audit = AuditLog::new(pool.clone());
        Self {
            pool,
            stripe,
            paypal,
            bindings,
            promos,
            usage,
            accounts,
            audit,
        }
    }

    /// Most recent successful settlement for the owner.
    pub async fn last_successful(&self, owner_id: Uuid) -> BillingResult<Option<SettlementRecord>> {
        let row: Option<SettlementRecord> = sqlx::query_as(&format!(
            r#"
            SELECT {COLUMNS} FROM settlements
            WHERE owner_id = $1 AND success = TRUE
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn by_provider_payment_id(
        &self,
        provider_payment_id: &str,
    ) -> BillingResult<Option<SettlementRecord>> {
        let row: Option<SettlementRecord> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM settlements WHERE provider_payment_id = $1"
        ))
        .bind(provider_payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Resolve the amount a settlement will charge: the binding's price,
    /// discounted when a valid promo code is supplied.
    async fn resolve_amount(
        &self,
        owner_id: Uuid,
        binding: &Binding,
        promo_code: Option<&str>,
    ) -> BillingResult<(i64, String, BillingInterval)> {
        let price = self.stripe.price_by_id(&binding.price_id).await?;
        let interval = price.interval.ok_or_else(|| {
            BillingError::Configuration(format!(
                "price {} has no recurring interval",
                binding.price_id
            ))
        })?;

        let mut amount_cents = price.unit_amount_cents;
        if let Some(code) = promo_code {
            match self.promos.validate(owner_id, code, interval).await? {
                PromoOutcome::Valid { price } => amount_cents = price.unit_amount_cents,
                PromoOutcome::Rejected(rejection) => {
                    return Err(BillingError::Validation(rejection.message().to_string()))
                }
            }
        }
        Ok((amount_cents, price.currency, interval))
    }

    /// Subscription-provider confirmation trigger: record the settlement and,
    /// when the provider reports success, finalize it.
    pub async fn record_confirmation(
        &self,
        input: SettlementConfirmation,
    ) -> BillingResult<SettlementRecord> {
        let binding = self.bindings.by_id(input.owner_id, input.binding_id).await?;
        let (amount_cents, _, interval) = self
            .resolve_amount(input.owner_id, &binding, input.promo_code.as_deref())
            .await?;

        let succeeded = input.provider_status == "succeeded";
        let state = if succeeded {
            SettlementState::Approved
        } else {
            SettlementState::Failed
        };

        let now = OffsetDateTime::now_utc();
        let prior = self.last_successful(input.owner_id).await?;
        let period_end = compute_period_end(now, interval, prior.as_ref().map(|p| p.period_end));

        let record = self
            .insert(&input, &binding, state, amount_cents, period_end)
            .await?;

        if succeeded {
            return self.confirm(record.id).await;
        }

        self.audit
            .record(
                Some(input.owner_id),
                AuditKind::PaymentStatus,
                &format!("settlement {} reported {}", record.id, input.provider_status),
            )
            .await;
        Ok(record)
    }

    /// Approval-provider checkout: quote the price, create the provider
    /// payment, and persist a pending settlement awaiting execute.
    pub async fn begin_approval_payment(
        &self,
        owner_id: Uuid,
        promo_code: Option<&str>,
        plan_profile_id: Option<Uuid>,
    ) -> BillingResult<CreatedPayment> {
        let paypal = self.paypal.as_ref().ok_or_else(|| {
            BillingError::Configuration("approval provider not configured".to_string())
        })?;

        let binding = self
            .bindings
            .current_binding(owner_id)
            .await?
            .ok_or_else(|| BillingError::not_found(owner_id, "payment method"))?;
        let (amount_cents, currency, interval) =
            self.resolve_amount(owner_id, &binding, promo_code).await?;

        let now = OffsetDateTime::now_utc();
        let prior = self.last_successful(owner_id).await?;
        let period_end = compute_period_end(now, interval, prior.as_ref().map(|p| p.period_end));

        let payment = paypal
            .create_payment(&format_cents(amount_cents), &currency)
            .await?;

        let input = SettlementConfirmation {
            owner_id,
            binding_id: binding.id,
            provider_status: payment.state.clone(),
            provider_payment_id: payment.payment_id.clone(),
            promo_code: promo_code.map(str::to_string),
            plan_profile_id,
        };
        self.insert(&input, &binding, SettlementState::Created, amount_cents, period_end)
            .await?;

        Ok(payment)
    }

    /// Approval-provider execute callback: run the provider execute and
    /// finalize the pending settlement on approval.
    pub async fn execute_approval_payment(
        &self,
        payment_id: &str,
        payer_id: &str,
    ) -> BillingResult<SettlementRecord> {
        let paypal = self.paypal.as_ref().ok_or_else(|| {
            BillingError::Configuration("approval provider not configured".to_string())
        })?;

        let pending = self
            .by_provider_payment_id(payment_id)
            .await?
            .ok_or_else(|| {
                BillingError::Validation(format!("no settlement for payment {payment_id}"))
            })?;

        let executed = paypal.execute_payment(payment_id, payer_id).await?;
        let state = if executed.approved() {
            SettlementState::Approved
        } else {
            SettlementState::Failed
        };

        sqlx::query("UPDATE settlements SET state = $2 WHERE id = $1 AND success = FALSE")
            .bind(pending.id)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;

        if executed.approved() {
            self.confirm(pending.id).await
        } else {
            self.audit
                .record(
                    Some(pending.owner_id),
                    AuditKind::PaymentStatus,
                    &format!("approval payment {} ended in {}", payment_id, executed.state),
                )
                .await;
            self.by_provider_payment_id(payment_id)
                .await?
                .ok_or_else(|| BillingError::not_found(pending.owner_id, "settlement"))
        }
    }

    async fn insert(
        &self,
        input: &SettlementConfirmation,
        binding: &Binding,
        state: SettlementState,
        amount_cents: i64,
        period_end: OffsetDateTime,
    ) -> BillingResult<SettlementRecord> {
        let row: SettlementRecord = sqlx::query_as(&format!(
            r#"
            INSERT INTO settlements
                (owner_id, binding_id, provider_payment_id, state, success,
                 amount_cents, promo_code, period_end, plan_profile_id)
            VALUES ($1, $2, $3, $4, FALSE, $5, $6, $7, $8)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(input.owner_id)
        .bind(binding.id)
        .bind(&input.provider_payment_id)
        .bind(state.as_str())
        .bind(amount_cents)
        .bind(&input.promo_code)
        .bind(period_end)
        .bind(input.plan_profile_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Flip a settlement to success (exactly once) and apply the downstream
    /// effects: open the new ledger period, finalize the promo reservation,
    /// move the account to the paid-for profile, confirm the registration.
    async fn confirm(&self, settlement_id: Uuid) -> BillingResult<SettlementRecord> {
        let confirmed: Option<SettlementRecord> = sqlx::query_as(&format!(
            r#"
            UPDATE settlements SET success = TRUE, state = 'approved'
            WHERE id = $1 AND success = FALSE
            RETURNING {COLUMNS}
            "#
        ))
        .bind(settlement_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(record) = confirmed else {
            // Already confirmed by a concurrent caller; nothing left to do.
            return sqlx::query_as(&format!("SELECT {COLUMNS} FROM settlements WHERE id = $1"))
                .bind(settlement_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Into::into);
        };

        let now = OffsetDateTime::now_utc();
        self.warn_on_overlap(&record, now).await;

        self.usage
            .open_period(record.owner_id, record.id, now, record.period_end)
            .await?;

        if let Some(code) = record.promo_code.as_deref() {
            if !code.is_empty() {
                let won = self.promos.finalize(record.owner_id, code).await?;
                if !won {
                    tracing::info!(
                        owner_id = %record.owner_id,
                        code = code,
                        "Promo code was already finalized elsewhere"
                    );
                }
            }
        }

        if let Some(profile_id) = record.plan_profile_id {
            self.accounts
                .set_profile_id(record.owner_id, profile_id)
                .await?;
        }
        self.accounts.confirm_registration(record.owner_id).await?;

        self.audit
            .record(
                Some(record.owner_id),
                AuditKind::SettlementRecorded,
                &format!(
                    "settlement {} confirmed, period ends {}",
                    record.id, record.period_end
                ),
            )
            .await;

        Ok(record)
    }

    /// The previous successful settlement still covering `now` means the new
    /// one overlaps it. Most recent wins, but the condition is a
    /// data-integrity smell worth surfacing.
    async fn warn_on_overlap(&self, record: &SettlementRecord, now: OffsetDateTime) {
        let prior: Result<Option<(Uuid, OffsetDateTime)>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT id, period_end FROM settlements
            WHERE owner_id = $1 AND success = TRUE AND id <> $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(record.owner_id)
        .bind(record.id)
        .fetch_optional(&self.pool)
        .await;

        if let Ok(Some((prior_id, prior_end))) = prior {
            if prior_end > now {
                tracing::warn!(
                    owner_id = %record.owner_id,
                    settlement_id = %record.id,
                    prior_settlement_id = %prior_id,
                    prior_period_end = %prior_end,
                    "Overlapping settlement periods; most recent settlement wins"
                );
            }
        }
    }

    /// Provider kind the owner's settlements flow through right now.
    pub async fn current_provider(&self, owner_id: Uuid) -> BillingResult<Option<ProviderKind>> {
        Ok(self
            .bindings
            .current_binding(owner_id)
            .await?
            .map(|b| b.provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn first_settlement_gets_one_plain_interval() {
        let now = datetime!(2026-04-01 00:00 UTC);
        let end = compute_period_end(now, BillingInterval::Month, None);
        assert_eq!(end, now + Duration::days(30));
    }

    #[test]
    fn yearly_interval_is_364_days() {
        let now = datetime!(2026-04-01 00:00 UTC);
        let end = compute_period_end(now, BillingInterval::Year, None);
        assert_eq!(end, now + Duration::days(364));
    }

    #[test]
    fn unused_days_carry_forward_into_the_new_period() {
        let now = datetime!(2026-04-01 00:00 UTC);
        // Prior period still has 5 full days left.
        let prior_end = datetime!(2026-04-06 00:00 UTC);
        let end = compute_period_end(now, BillingInterval::Month, Some(prior_end));
        assert_eq!(end, now + Duration::days(35));
    }

    #[test]
    fn lapsed_prior_period_carries_nothing() {
        let now = datetime!(2026-04-01 00:00 UTC);
        let prior_end = datetime!(2026-03-15 00:00 UTC);
        let end = compute_period_end(now, BillingInterval::Month, Some(prior_end));
        assert_eq!(end, now + Duration::days(30));
    }

    #[test]
    fn partial_remaining_day_is_not_counted() {
        let now = datetime!(2026-04-01 12:00 UTC);
        let prior_end = datetime!(2026-04-02 00:00 UTC);
        let end = compute_period_end(now, BillingInterval::Month, Some(prior_end));
        assert_eq!(end, now + Duration::days(30));
    }
}
