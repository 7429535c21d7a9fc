// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Entitlement Engine
//!
//! Covers boundary conditions in:
//! - Login-state resolution precedence and short-circuiting
//! - Wire-code mapping at the serialization boundary
//! - Billing-period arithmetic (trial window, carry-forward)
//! - Promo eligibility matching

#[cfg(test)]
mod resolver_fixtures {
    use crate::accounts::Account;
    use crate::binding::{Binding, ProviderKind};
    use crate::client::SubscriptionSnapshot;
    use crate::entitlement::{DiskFigures, LoginSnapshot, UsageFigures};
    use crate::period::{CurrentPeriod, PeriodStatus, Reconciliation};
    use crate::profile::PlanProfile;
    use crate::settlement::SettlementRecord;
    use pressroom_shared::{BillingInterval, PlanType, QuotaLimits};
    use time::macros::datetime;
    use time::OffsetDateTime;
    use uuid::Uuid;

    pub const NOW: OffsetDateTime = datetime!(2026-06-15 12:00 UTC);

    pub fn account() -> Account {
        Account {
            id: Uuid::new_v4(),
            email: "avery@example.com".to_string(),
            first_name: Some("Avery".to_string()),
            subscription_id: Some("sub_123".to_string()),
            customer_id: Some("cus_123".to_string()),
            profile_id: None,
            email_confirmed: true,
            signup_verified: true,
            test_account: false,
            created_at: NOW - time::Duration::days(60),
        }
    }

    pub fn profile(owner_id: Uuid, plan: PlanType, interval: Option<BillingInterval>) -> PlanProfile {
        PlanProfile {
            id: Uuid::new_v4(),
            owner_id,
            plan,
            interval,
            limits: QuotaLimits::for_plan(plan, interval).unwrap(),
            created_at: NOW - time::Duration::days(10),
        }
    }

    pub fn binding(owner_id: Uuid, provider: ProviderKind) -> Binding {
        Binding {
            id: Uuid::new_v4(),
            owner_id,
            provider,
            price_id: "price_premium_month".to_string(),
            created_at: NOW - time::Duration::days(10),
        }
    }

    pub fn live_subscription() -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            id: "sub_123".to_string(),
            status: "active".to_string(),
            price_id: Some("price_premium_month".to_string()),
            price_amount_cents: Some(4900),
            interval: Some(BillingInterval::Month),
            current_period_end: Some(NOW + time::Duration::days(20)),
            setup_client_secret: None,
            payment_client_secret: Some("pi_secret_123".to_string()),
            payment_status: Some("succeeded".to_string()),
            setup_intent_status: Some("succeeded".to_string()),
        }
    }

    pub fn settlement(owner_id: Uuid, binding_id: Uuid, period_end: OffsetDateTime) -> SettlementRecord {
        SettlementRecord {
            id: Uuid::new_v4(),
            owner_id,
            binding_id,
            provider_payment_id: "pay_123".to_string(),
            state: "approved".to_string(),
            success: true,
            amount_cents: 4900,
            promo_code: None,
            period_end,
            plan_profile_id: None,
            created_at: NOW - time::Duration::days(10),
        }
    }

    pub fn active_period(settlement_id: Option<Uuid>) -> CurrentPeriod {
        CurrentPeriod {
            provider: Some(ProviderKind::Subscription),
            period_start: Some(NOW - time::Duration::days(10)),
            period_end: Some(NOW + time::Duration::days(20)),
            settlement_id,
            status: PeriodStatus::Active,
        }
    }

    /// A fully healthy paid-subscription snapshot; tests mutate from here.
    pub fn paid_snapshot() -> LoginSnapshot {
        let account = account();
        let profile = profile(account.id, PlanType::Premium, Some(BillingInterval::Month));
        let binding = binding(account.id, ProviderKind::Subscription);
        let settlement = settlement(account.id, binding.id, NOW + time::Duration::days(20));
        let period = active_period(Some(settlement.id));
        LoginSnapshot {
            reconciliation: Reconciliation {
                account,
                profile,
                binding: Some(binding),
                subscription: Some(live_subscription()),
                last_settlement: Some(settlement),
                period,
            },
            usage: UsageFigures {
                current_campaigns: 2,
                max_campaigns: 20,
                current_emails: 150,
                max_emails: 20_000,
                current_documents: 4,
                max_documents: 100,
            },
            disk: DiskFigures {
                total_gb: 3,
                used_gb: 0.4,
            },
        }
    }

    /// A trial snapshot with the profile created `age_days` ago.
    pub fn trial_snapshot(age_days: i64) -> LoginSnapshot {
        let mut account = account();
        account.subscription_id = None;
        let mut profile = profile(account.id, PlanType::Trial, None);
        profile.created_at = NOW - time::Duration::days(age_days);
        let period = crate::period::trial_period(&profile, NOW);
        LoginSnapshot {
            reconciliation: Reconciliation {
                account,
                profile,
                binding: None,
                subscription: None,
                last_settlement: None,
                period,
            },
            usage: UsageFigures::default(),
            disk: DiskFigures::default(),
        }
    }
}

#[cfg(test)]
mod resolver_precedence_tests {
    use super::resolver_fixtures::*;
    use crate::binding::ProviderKind;
    use crate::entitlement::{decide, EntitlementDecision, PaymentStatusCode};
    use crate::period::PeriodStatus;

    // =========================================================================
    // Unconfirmed registration pre-empts an otherwise fully active subscription
    // =========================================================================
    #[test]
    fn test_email_unconfirmed_preempts_everything() {
        let mut snapshot = paid_snapshot();
        snapshot.reconciliation.account.email_confirmed = false;

        let decision = decide(&snapshot, NOW);
        assert!(matches!(
            decision,
            EntitlementDecision::EmailUnconfirmed { .. }
        ));
        assert_eq!(decision.wire_code(), Some(1011));
    }

    // =========================================================================
    // Trial happy path: created now, no settlement, no provider involvement
    // =========================================================================
    #[test]
    fn test_trial_active_returns_no_code() {
        let snapshot = trial_snapshot(0);
        let decision = decide(&snapshot, NOW);

        assert!(matches!(decision, EntitlementDecision::TrialActive(_)));
        assert_eq!(decision.wire_code(), None);
        let wire = decision.wire();
        assert!(wire.get("code").is_none());
        assert_eq!(wire["type"], "Trial");
    }

    // =========================================================================
    // Trial boundary: expired at exactly day fourteen, not a second before
    // =========================================================================
    #[test]
    fn test_trial_expires_at_day_fourteen_inclusive() {
        let active = decide(&trial_snapshot(13), NOW);
        assert!(matches!(active, EntitlementDecision::TrialActive(_)));

        let expired = decide(&trial_snapshot(14), NOW);
        assert!(matches!(expired, EntitlementDecision::TrialExpired(_)));
        let wire = expired.wire();
        assert_eq!(wire["message"], "Trial period expired");
        assert!(wire.get("code").is_none(), "soft failure, not an error code");
    }

    // =========================================================================
    // Paid plan with no subscription id bound resolves to 1007
    // =========================================================================
    #[test]
    fn test_missing_subscription_id_resolves_1007() {
        let mut snapshot = paid_snapshot();
        snapshot.reconciliation.account.subscription_id = None;
        snapshot.reconciliation.subscription = None;
        snapshot.reconciliation.period.status = PeriodStatus::MissingSubscription;

        let decision = decide(&snapshot, NOW);
        assert!(matches!(
            decision,
            EntitlementDecision::NoSubscriptionBound { .. }
        ));
        assert_eq!(decision.wire_code(), Some(1007));
    }

    // =========================================================================
    // QA accounts bypass every paid-path gate once a subscription id exists
    // =========================================================================
    #[test]
    fn test_test_account_bypasses_verification_and_expiry() {
        let mut snapshot = paid_snapshot();
        snapshot.reconciliation.account.test_account = true;
        snapshot.reconciliation.account.signup_verified = false;
        snapshot.reconciliation.period.status = PeriodStatus::Expired;

        let decision = decide(&snapshot, NOW);
        assert!(matches!(
            decision,
            EntitlementDecision::TestAccountBypass(_)
        ));
        assert_eq!(decision.wire_code(), None);
    }

    // =========================================================================
    // Test flag without a subscription id still resolves 1007 first
    // =========================================================================
    #[test]
    fn test_test_account_without_subscription_id_still_1007() {
        let mut snapshot = paid_snapshot();
        snapshot.reconciliation.account.test_account = true;
        snapshot.reconciliation.account.subscription_id = None;

        let decision = decide(&snapshot, NOW);
        assert_eq!(decision.wire_code(), Some(1007));
    }

    // =========================================================================
    // Unverified signup resolves to 1010 ahead of payment checks
    // =========================================================================
    #[test]
    fn test_signup_unverified_resolves_1010() {
        let mut snapshot = paid_snapshot();
        snapshot.reconciliation.account.signup_verified = false;
        snapshot.reconciliation.period.status = PeriodStatus::Expired;

        let decision = decide(&snapshot, NOW);
        assert_eq!(decision.wire_code(), Some(1010));
    }

    // =========================================================================
    // Pending setup intent resolves to 1008 and carries the resume secret
    // =========================================================================
    #[test]
    fn test_incomplete_setup_intent_resolves_1008_with_secret() {
        let mut snapshot = paid_snapshot();
        if let Some(sub) = snapshot.reconciliation.subscription.as_mut() {
            sub.setup_intent_status = Some("requires_action".to_string());
            sub.setup_client_secret = Some("seti_secret_9".to_string());
        }

        let decision = decide(&snapshot, NOW);
        assert_eq!(decision.wire_code(), Some(1008));
        let wire = decision.wire();
        assert_eq!(wire["clientSecret"], "pi_secret_123");
    }

    // =========================================================================
    // Garbage-collected subscription resolves to the expired shape, no code
    // =========================================================================
    #[test]
    fn test_provider_missing_subscription_maps_to_expired_shape() {
        let mut snapshot = paid_snapshot();
        snapshot.reconciliation.subscription = None;
        snapshot.reconciliation.period.status = PeriodStatus::ProviderMissing;

        let decision = decide(&snapshot, NOW);
        assert!(matches!(
            decision,
            EntitlementDecision::ProviderSubscriptionMissing { .. }
        ));
        let wire = decision.wire();
        assert_eq!(wire["message"], "Subscription expired");
        assert!(wire.get("code").is_none());
    }

    // =========================================================================
    // Lapsed settlement period resolves to the soft expired message
    // =========================================================================
    #[test]
    fn test_expired_period_resolves_soft_expired_message() {
        let mut snapshot = paid_snapshot();
        snapshot.reconciliation.period.status = PeriodStatus::Expired;

        let decision = decide(&snapshot, NOW);
        assert!(matches!(
            decision,
            EntitlementDecision::SubscriptionExpired { .. }
        ));
        let wire = decision.wire();
        assert_eq!(wire["message"], "Subscription expired");
        assert!(wire.get("code").is_none());
    }

    // =========================================================================
    // Invoice payment statuses map to 1002-1006 in order
    // =========================================================================
    #[test]
    fn test_payment_statuses_map_to_consecutive_codes() {
        let cases = [
            ("requires_payment_method", 1002),
            ("requires_confirmation", 1003),
            ("requires_action", 1004),
            ("processing", 1005),
            ("canceled", 1006),
        ];
        for (status, expected_code) in cases {
            let mut snapshot = paid_snapshot();
            if let Some(sub) = snapshot.reconciliation.subscription.as_mut() {
                sub.payment_status = Some(status.to_string());
            }
            let decision = decide(&snapshot, NOW);
            assert_eq!(
                decision.wire_code(),
                Some(expected_code),
                "status {status} should map to {expected_code}"
            );
        }
    }

    // =========================================================================
    // No payment method on file resolves to 1001
    // =========================================================================
    #[test]
    fn test_missing_binding_resolves_1001() {
        let mut snapshot = paid_snapshot();
        snapshot.reconciliation.binding = None;
        snapshot.reconciliation.period.status = PeriodStatus::PaymentPending;
        snapshot.reconciliation.period.period_end = None;

        let decision = decide(&snapshot, NOW);
        assert!(matches!(
            decision,
            EntitlementDecision::PaymentStatus {
                status: PaymentStatusCode::NoPaymentMethod,
                ..
            }
        ));
        assert_eq!(decision.wire_code(), Some(1001));
    }

    // =========================================================================
    // Fully healthy subscription resolves to the active payload
    // =========================================================================
    #[test]
    fn test_active_subscription_resolves_full_payload() {
        let snapshot = paid_snapshot();
        let decision = decide(&snapshot, NOW);

        assert!(matches!(decision, EntitlementDecision::Active(_)));
        let wire = decision.wire();
        assert!(wire.get("code").is_none());
        assert_eq!(wire["priceId"], "price_premium_month");
        assert_eq!(wire["price"], "49.00");
        assert_eq!(wire["period"], "month");
        assert_eq!(wire["type"], "Premium");
        assert_eq!(wire["subscriptionId"], "sub_123");
        assert_eq!(wire["usage"]["maxCampaigns"], 20);
    }

    // =========================================================================
    // Approval-provider user with a lapsed settlement resolves to expired
    // =========================================================================
    #[test]
    fn test_approval_expired_settlement_resolves_expired() {
        let mut snapshot = paid_snapshot();
        let owner_id = snapshot.reconciliation.account.id;
        let approval = binding(owner_id, ProviderKind::Approval);
        let lapsed =
            settlement(owner_id, approval.id, NOW - time::Duration::seconds(1));
        snapshot.reconciliation.binding = Some(approval);
        snapshot.reconciliation.subscription = None;
        snapshot.reconciliation.period.provider = Some(ProviderKind::Approval);
        snapshot.reconciliation.period.period_end = Some(lapsed.period_end);
        snapshot.reconciliation.period.status = PeriodStatus::Expired;
        snapshot.reconciliation.last_settlement = Some(lapsed);

        let decision = decide(&snapshot, NOW);
        assert!(matches!(
            decision,
            EntitlementDecision::SubscriptionExpired { .. }
        ));
        assert_eq!(decision.wire()["message"], "Subscription expired");
    }

    // =========================================================================
    // Approval-provider user with a live settlement is active, no provider call
    // =========================================================================
    #[test]
    fn test_approval_live_settlement_resolves_active() {
        let mut snapshot = paid_snapshot();
        let owner_id = snapshot.reconciliation.account.id;
        let approval = binding(owner_id, ProviderKind::Approval);
        snapshot.reconciliation.binding = Some(approval);
        snapshot.reconciliation.subscription = None;
        snapshot.reconciliation.period.provider = Some(ProviderKind::Approval);

        let decision = decide(&snapshot, NOW);
        assert!(matches!(decision, EntitlementDecision::Active(_)));
        let wire = decision.wire();
        assert!(wire.get("subscriptionId").map(|v| v.is_null()).unwrap_or(true));
    }
}

#[cfg(test)]
mod wire_code_tests {
    use crate::entitlement::PaymentStatusCode;

    // =========================================================================
    // Provider status strings map to the documented code table
    // =========================================================================
    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(
            PaymentStatusCode::from_provider_status("requires_payment_method"),
            Some(PaymentStatusCode::RequiresPaymentMethod)
        );
        assert_eq!(
            PaymentStatusCode::from_provider_status("canceled"),
            Some(PaymentStatusCode::Canceled)
        );
        assert_eq!(PaymentStatusCode::from_provider_status("succeeded"), None);
        assert_eq!(PaymentStatusCode::from_provider_status("anything_else"), None);
    }

    // =========================================================================
    // The code table itself
    // =========================================================================
    #[test]
    fn test_wire_code_table() {
        assert_eq!(PaymentStatusCode::NoPaymentMethod.wire_code(), 1001);
        assert_eq!(PaymentStatusCode::RequiresPaymentMethod.wire_code(), 1002);
        assert_eq!(PaymentStatusCode::RequiresConfirmation.wire_code(), 1003);
        assert_eq!(PaymentStatusCode::RequiresAction.wire_code(), 1004);
        assert_eq!(PaymentStatusCode::Processing.wire_code(), 1005);
        assert_eq!(PaymentStatusCode::Canceled.wire_code(), 1006);
    }
}
