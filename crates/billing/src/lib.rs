// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Some settlement operations require many parameters
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Pressroom Billing Module
//!
//! The entitlement and billing-period usage engine.
//!
//! ## Features
//!
//! - **Payment Method Bindings**: append-only provider + price selection,
//!   with subscription dedup on rebind
//! - **Billing-Period Reconciliation**: current period and settling provider
//!   across the subscription (Stripe) and approval (PayPal) providers
//! - **Usage Quota Ledger**: per-period campaign/email/document counters
//!   with atomic quota-gated consumption
//! - **Promo Codes**: at-most-once redemption tied to plan tier and interval
//! - **Settlements**: payment confirmations that open new usage periods
//! - **Login-State Resolution**: the entitlement decision returned at login

pub mod accounts;
pub mod binding;
pub mod catalog;
pub mod client;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod paypal;
pub mod period;
pub mod profile;
pub mod promo;
pub mod settlement;
pub mod usage;

#[cfg(test)]
mod edge_case_tests;

// Accounts
pub use accounts::{Account, AccountStore};

// Bindings
pub use binding::{BindOutcome, Binding, BindingService, ProviderKind};

// Catalog
pub use catalog::{is_public_price, promo_product_name, select_promo_price, PriceCatalog};

// Client
pub use client::{
    format_cents, CreatedSubscription, PriceInfo, StripeClient, StripeConfig,
    SubscriptionSnapshot,
};

// Entitlement
pub use entitlement::{
    decide, ActiveStanding, DiskFigures, EntitlementDecision, EntitlementService, LoginSnapshot,
    PaymentStatusCode, PlanPricing, TrialStanding, UsageFigures,
};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{AuditKind, AuditLog};

// PayPal
pub use paypal::{CreatedPayment, ExecutedPayment, PayPalClient, PayPalConfig};

// Period
pub use period::{
    evaluate_period_end, trial_period, CurrentPeriod, PeriodReconciler, PeriodStatus,
    Reconciliation,
};

// Profiles
pub use profile::{PlanProfile, ProfileStore};

// Promo
pub use promo::{class_matches_plan, PromoCode, PromoOutcome, PromoRegistry, PromoRejection};

// Settlements
pub use settlement::{
    compute_period_end, SettlementConfirmation, SettlementRecord, SettlementService,
    SettlementState,
};

// Usage
pub use usage::{QuotaDecision, UsageCounter, UsageLedger, UsageLedgerRow};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub accounts: AccountStore,
    pub bindings: BindingService,
    pub catalog: PriceCatalog,
    pub entitlements: EntitlementService,
    pub profiles: ProfileStore,
    pub promos: PromoRegistry,
    pub reconciler: PeriodReconciler,
    pub settlements: SettlementService,
    pub usage: UsageLedger,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        let paypal = match PayPalClient::from_env() {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "Approval provider not configured");
                None
            }
        };
        Ok(Self::new(stripe, paypal, pool))
    }

    /// Create a new billing service with explicit clients
    pub fn new(stripe: StripeClient, paypal: Option<PayPalClient>, pool: PgPool) -> Self {
        let catalog = PriceCatalog::new(stripe.clone());
        let bindings = BindingService::new(pool.clone(), stripe.clone());
        let promos = PromoRegistry::new(pool.clone(), catalog.clone());
        let settlements = SettlementService::new(
            pool.clone(),
            stripe.clone(),
            paypal,
            bindings.clone(),
            promos.clone(),
        );
        let reconciler = PeriodReconciler::new(
            pool.clone(),
            stripe,
            bindings.clone(),
            settlements.clone(),
        );
        let entitlements = EntitlementService::new(pool.clone(), reconciler.clone());

        Self {
            accounts: AccountStore::new(pool.clone()),
            bindings,
            catalog,
            entitlements,
            profiles: ProfileStore::new(pool.clone()),
            promos,
            reconciler,
            settlements,
            usage: UsageLedger::new(pool),
        }
    }
}
