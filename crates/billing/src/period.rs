//! Billing-period reconciliation
//!
//! Read-only: determines the owner's current billing period and which
//! provider settles it. Trial periods are derived from the profile creation
//! time with no provider call; subscription bindings consult the live
//! provider object; approval bindings read the persisted settlement. The
//! expiry comparison itself is a pure function so the boundary cases are
//! testable without a provider.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::accounts::{Account, AccountStore};
use crate::binding::{Binding, BindingService, ProviderKind};
use crate::client::{StripeClient, SubscriptionSnapshot};
use crate::error::BillingResult;
use crate::profile::{PlanProfile, ProfileStore};
use crate::settlement::{SettlementRecord, SettlementService};

use pressroom_shared::PlanType;

/// Status of the reconciled period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodStatus {
    /// Period end is in the future.
    Active,
    /// Period end has passed (boundary inclusive: end <= now is expired).
    Expired,
    /// No settled period exists yet; the caller falls through to
    /// payment-pending handling.
    PaymentPending,
    /// Subscription binding without a stored subscription id.
    MissingSubscription,
    /// The provider no longer knows the stored subscription. Functionally
    /// an expired subscription, kept distinct for audit purposes.
    ProviderMissing,
}

/// The reconciled current period.
#[derive(Debug, Clone)]
pub struct CurrentPeriod {
    /// Settling provider; `None` for trial periods.
    pub provider: Option<ProviderKind>,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub settlement_id: Option<Uuid>,
    pub status: PeriodStatus,
}

/// Everything one reconciliation pass learned. The entitlement resolver
/// consumes this so the provider is called at most once per resolution.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub account: Account,
    pub profile: PlanProfile,
    pub binding: Option<Binding>,
    pub subscription: Option<SubscriptionSnapshot>,
    pub last_settlement: Option<SettlementRecord>,
    pub period: CurrentPeriod,
}

/// Expiry comparison, boundary inclusive at the end.
pub fn evaluate_period_end(period_end: Option<OffsetDateTime>, now: OffsetDateTime) -> PeriodStatus {
    match period_end {
        Some(end) if end <= now => PeriodStatus::Expired,
        Some(_) => PeriodStatus::Active,
        None => PeriodStatus::PaymentPending,
    }
}

/// Derive the trial period from a profile. No provider involved.
pub fn trial_period(profile: &PlanProfile, now: OffsetDateTime) -> CurrentPeriod {
    let end = profile.trial_period_end();
    CurrentPeriod {
        provider: None,
        period_start: Some(profile.created_at),
        period_end: Some(end),
        settlement_id: None,
        status: evaluate_period_end(Some(end), now),
    }
}

/// Derive a period from the most recent successful settlement.
fn settled_period(
    provider: ProviderKind,
    settlement: Option<&SettlementRecord>,
    now: OffsetDateTime,
) -> CurrentPeriod {
    CurrentPeriod {
        provider: Some(provider),
        period_start: settlement.map(|s| s.created_at),
        period_end: settlement.map(|s| s.period_end),
        settlement_id: settlement.map(|s| s.id),
        status: evaluate_period_end(settlement.map(|s| s.period_end), now),
    }
}

/// The billing-period reconciler
#[derive(Clone)]
pub struct PeriodReconciler {
    accounts: AccountStore,
    profiles: ProfileStore,
    bindings: BindingService,
    settlements: SettlementService,
    stripe: StripeClient,
}

impl PeriodReconciler {
    pub fn new(
        pool: PgPool,
        stripe: StripeClient,
        bindings: BindingService,
        settlements: SettlementService,
    ) -> Self {
        Self {
            accounts: AccountStore::new(pool.clone()),
            profiles: ProfileStore::new(pool),
            bindings,
            settlements,
            stripe,
        }
    }

    /// Just the current period, without the provider snapshot.
    pub async fn current_period(&self, owner_id: Uuid) -> BillingResult<CurrentPeriod> {
        Ok(self.reconcile(owner_id).await?.period)
    }

    /// Full reconciliation pass. Makes at most one provider call, and only
    /// for subscription bindings.
    pub async fn reconcile(&self, owner_id: Uuid) -> BillingResult<Reconciliation> {
        let now = OffsetDateTime::now_utc();
        let account = self.accounts.get(owner_id).await?;
        let profile = self.profiles.require_latest(owner_id).await?;

        if profile.plan == PlanType::Trial {
            let period = trial_period(&profile, now);
            return Ok(Reconciliation {
                account,
                profile,
                binding: None,
                subscription: None,
                last_settlement: None,
                period,
            });
        }

        let binding = self.bindings.current_binding(owner_id).await?;
        let last_settlement = self.settlements.last_successful(owner_id).await?;

        let (subscription, period) = match binding.as_ref().map(|b| b.provider) {
            Some(ProviderKind::Subscription) => {
                self.reconcile_subscription(&account, last_settlement.as_ref(), now)
                    .await?
            }
            Some(ProviderKind::Approval) => (
                None,
                settled_period(ProviderKind::Approval, last_settlement.as_ref(), now),
            ),
            // No binding yet: nothing settled, nothing to call.
            None => (
                None,
                CurrentPeriod {
                    provider: None,
                    period_start: None,
                    period_end: None,
                    settlement_id: None,
                    status: PeriodStatus::PaymentPending,
                },
            ),
        };

        Ok(Reconciliation {
            account,
            profile,
            binding,
            subscription,
            last_settlement,
            period,
        })
    }

    async fn reconcile_subscription(
        &self,
        account: &Account,
        last_settlement: Option<&SettlementRecord>,
        now: OffsetDateTime,
    ) -> BillingResult<(Option<SubscriptionSnapshot>, CurrentPeriod)> {
        let Some(subscription_id) = account.subscription_id.as_deref() else {
            return Ok((
                None,
                CurrentPeriod {
                    provider: Some(ProviderKind::Subscription),
                    period_start: None,
                    period_end: None,
                    settlement_id: None,
                    status: PeriodStatus::MissingSubscription,
                },
            ));
        };

        // "No such subscription" is a recoverable expired-state signal, not
        // a fault; the provider garbage-collects cancelled subscriptions.
        let Some(snapshot) = self.stripe.fetch_subscription(subscription_id).await? else {
            return Ok((
                None,
                CurrentPeriod {
                    provider: Some(ProviderKind::Subscription),
                    period_start: None,
                    period_end: None,
                    settlement_id: None,
                    status: PeriodStatus::ProviderMissing,
                },
            ));
        };

        let period = settled_period(ProviderKind::Subscription, last_settlement, now);
        Ok((Some(snapshot), period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pressroom_shared::QuotaLimits;
    use time::macros::datetime;

    fn trial_profile(created_at: OffsetDateTime) -> PlanProfile {
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
    fn period_end_in_the_future_is_active() {
        let now = datetime!(2026-05-01 00:00 UTC);
        assert_eq!(
            evaluate_period_end(Some(datetime!(2026-05-02 00:00 UTC)), now),
            PeriodStatus::Active
        );
    }

    #[test]
    fn period_end_boundary_is_expired() {
        let now = datetime!(2026-05-01 00:00 UTC);
        assert_eq!(
            evaluate_period_end(Some(now), now),
            PeriodStatus::Expired,
            "end == now must count as expired"
        );
        assert_eq!(
            evaluate_period_end(Some(now - time::Duration::seconds(1)), now),
            PeriodStatus::Expired
        );
    }

    #[test]
    fn absent_period_end_means_payment_pending() {
        let now = datetime!(2026-05-01 00:00 UTC);
        assert_eq!(evaluate_period_end(None, now), PeriodStatus::PaymentPending);
    }

    #[test]
    fn trial_window_is_active_until_day_fourteen() {
        let created = datetime!(2026-05-01 00:00 UTC);
        let profile = trial_profile(created);

        let just_before = created + time::Duration::days(14) - time::Duration::seconds(1);
        let period = trial_period(&profile, just_before);
        assert_eq!(period.status, PeriodStatus::Active);
        assert_eq!(period.period_end, Some(created + time::Duration::days(14)));
        assert!(period.provider.is_none());
        assert!(period.settlement_id.is_none());

        let at_boundary = created + time::Duration::days(14);
        assert_eq!(trial_period(&profile, at_boundary).status, PeriodStatus::Expired);
    }
}
