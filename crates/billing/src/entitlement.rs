//! Login-state entitlement resolution
//!
//! Answers the question: "what does this user get when they log in?" One
//! closed decision enum, one strict short-circuiting transition order, and a
//! deterministic decision function over a loaded snapshot. The numeric wire
//! codes exist only at the serialization boundary; internally every state is
//! an exhaustively-matched variant.
//!
//! Transition order:
//! email-unconfirmed, then (trial ? active/expired : no-subscription-bound,
//! test-account bypass, signup-unverified, setup-incomplete,
//! expired/provider-missing, payment-status, active).

use serde_json::{json, Value};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use pressroom_shared::{BillingInterval, PlanType};

use crate::accounts::AccountStore;
use crate::binding::ProviderKind;
use crate::client::{format_cents, SubscriptionSnapshot};
use crate::error::BillingResult;
use crate::events::{AuditKind, AuditLog};
use crate::period::{PeriodReconciler, PeriodStatus, Reconciliation};
use crate::usage::UsageLedger;

/// Payment-status wire codes (1001-1006).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatusCode {
    NoPaymentMethod,
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Canceled,
}

impl PaymentStatusCode {
    pub fn wire_code(&self) -> u16 {
        match self {
            PaymentStatusCode::NoPaymentMethod => 1001,
            PaymentStatusCode::RequiresPaymentMethod => 1002,
            PaymentStatusCode::RequiresConfirmation => 1003,
            PaymentStatusCode::RequiresAction => 1004,
            PaymentStatusCode::Processing => 1005,
            PaymentStatusCode::Canceled => 1006,
        }
    }

    /// Map a provider invoice payment status. `None` means the status does
    /// not block access ("succeeded" and anything unrecognized).
    pub fn from_provider_status(status: &str) -> Option<Self> {
        match status {
            "requires_payment_method" => Some(Self::RequiresPaymentMethod),
            "requires_confirmation" => Some(Self::RequiresConfirmation),
            "requires_action" => Some(Self::RequiresAction),
            "processing" => Some(Self::Processing),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

/// Usage counters against their plan limits, for success payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageFigures {
    pub current_campaigns: i32,
    pub max_campaigns: i32,
    pub current_emails: i32,
    pub max_emails: i32,
    pub current_documents: i32,
    pub max_documents: i32,
}

/// Disk usage figures, for success payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFigures {
    pub total_gb: i32,
    pub used_gb: f64,
}

/// Plan/price details attached to paid-path decisions.
#[derive(Debug, Clone)]
pub struct PlanPricing {
    pub plan: PlanType,
    pub price_id: Option<String>,
    pub price: Option<String>,
    pub interval: Option<BillingInterval>,
}

/// Payload for trial decisions.
#[derive(Debug, Clone)]
pub struct TrialStanding {
    pub owner_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub period_end: OffsetDateTime,
    pub usage: UsageFigures,
    pub disk: DiskFigures,
}

/// Payload for the fully-resolved active state.
#[derive(Debug, Clone)]
pub struct ActiveStanding {
    pub owner_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub pricing: PlanPricing,
    pub subscription_id: Option<String>,
    pub client_secret: Option<String>,
    pub usage: UsageFigures,
    pub disk: DiskFigures,
}

/// The resolved login-time access decision. One variant per state.
#[derive(Debug, Clone)]
pub enum EntitlementDecision {
    /// Registration confirmation not completed. Pre-empts everything.
    EmailUnconfirmed { owner_id: Uuid, email: String },
    /// Trial plan, window still open.
    TrialActive(TrialStanding),
    /// Trial plan, window closed. Soft failure: profile data still returned.
    TrialExpired(TrialStanding),
    /// Paid plan on the subscription provider with no subscription id bound.
    NoSubscriptionBound { owner_id: Uuid, email: String },
    /// Signup verification record not marked successful.
    SignupUnverified { owner_id: Uuid, email: String },
    /// Payment setup intent not fully succeeded; carries the resume secret.
    SetupIncomplete {
        owner_id: Uuid,
        pricing: PlanPricing,
        client_secret: Option<String>,
    },
    /// Provider invoice status blocks access (codes 1001-1006).
    PaymentStatus {
        owner_id: Uuid,
        status: PaymentStatusCode,
        pricing: Option<PlanPricing>,
        client_secret: Option<String>,
    },
    /// Reconciled period has lapsed. Soft failure with resume data.
    SubscriptionExpired {
        owner_id: Uuid,
        pricing: Option<PlanPricing>,
        client_secret: Option<String>,
    },
    /// Provider garbage-collected the subscription; same shape as expired.
    ProviderSubscriptionMissing { owner_id: Uuid },
    /// Everything checks out.
    Active(ActiveStanding),
    /// QA account: skips the paid-path gates once a subscription id exists.
    TestAccountBypass(ActiveStanding),
}

impl EntitlementDecision {
    /// The numeric wire code, where the state carries one.
    pub fn wire_code(&self) -> Option<u16> {
        match self {
            EntitlementDecision::EmailUnconfirmed { .. } => Some(1011),
            EntitlementDecision::NoSubscriptionBound { .. } => Some(1007),
            EntitlementDecision::SignupUnverified { .. } => Some(1010),
            EntitlementDecision::SetupIncomplete { .. } => Some(1008),
            EntitlementDecision::PaymentStatus { status, .. } => Some(status.wire_code()),
            _ => None,
        }
    }

    /// Serialize to the wire payload. Success shapes carry no `code` field.
    pub fn wire(&self) -> Value {
        match self {
            EntitlementDecision::EmailUnconfirmed { owner_id, email } => json!({
                "code": 1011,
                "ownerId": owner_id,
                "email": email,
            }),
            EntitlementDecision::TrialActive(standing) => trial_payload(standing, None),
            EntitlementDecision::TrialExpired(standing) => {
                trial_payload(standing, Some("Trial period expired"))
            }
            EntitlementDecision::NoSubscriptionBound { owner_id, email } => json!({
                "code": 1007,
                "ownerId": owner_id,
                "email": email,
            }),
            EntitlementDecision::SignupUnverified { owner_id, email } => json!({
                "code": 1010,
                "ownerId": owner_id,
                "email": email,
            }),
            EntitlementDecision::SetupIncomplete {
                owner_id,
                pricing,
                client_secret,
            } => {
                let mut payload = json!({
                    "code": 1008,
                    "ownerId": owner_id,
                    "clientSecret": client_secret,
                });
                merge_pricing(&mut payload, Some(pricing));
                payload
            }
            EntitlementDecision::PaymentStatus {
                owner_id,
                status,
                pricing,
                client_secret,
            } => {
                let mut payload = json!({
                    "code": status.wire_code(),
                    "ownerId": owner_id,
                    "clientSecret": client_secret,
                });
                merge_pricing(&mut payload, pricing.as_ref());
                payload
            }
            EntitlementDecision::SubscriptionExpired {
                owner_id,
                pricing,
                client_secret,
            } => {
                let mut payload = json!({
                    "message": "Subscription expired",
                    "ownerId": owner_id,
                    "clientSecret": client_secret,
                });
                merge_pricing(&mut payload, pricing.as_ref());
                payload
            }
            EntitlementDecision::ProviderSubscriptionMissing { owner_id } => json!({
                "message": "Subscription expired",
                "ownerId": owner_id,
            }),
            EntitlementDecision::Active(standing)
            | EntitlementDecision::TestAccountBypass(standing) => active_payload(standing),
        }
    }
}

fn merge_pricing(payload: &mut Value, pricing: Option<&PlanPricing>) {
    if let (Value::Object(map), Some(pricing)) = (payload, pricing) {
        map.insert("priceId".into(), json!(pricing.price_id));
        map.insert("price".into(), json!(pricing.price));
        map.insert("period".into(), json!(pricing.interval.map(|i| i.as_str())));
        map.insert("type".into(), json!(pricing.plan.as_str()));
    }
}

fn usage_fields(usage: &UsageFigures) -> Value {
    json!({
        "currentCampaigns": usage.current_campaigns,
        "maxCampaigns": usage.max_campaigns,
        "currentEmails": usage.current_emails,
        "maxEmails": usage.max_emails,
        "currentDocuments": usage.current_documents,
        "maxDocuments": usage.max_documents,
    })
}

fn trial_payload(standing: &TrialStanding, message: Option<&str>) -> Value {
    let mut payload = json!({
        "ownerId": standing.owner_id,
        "type": PlanType::Trial.as_str(),
        "email": standing.email,
        "firstName": standing.first_name,
        "totalDiskSpace": standing.disk.total_gb,
        "availableDiskSpace": standing.disk.used_gb,
        "currentPeriodEnd": standing.period_end.to_string(),
        "usage": usage_fields(&standing.usage),
    });
    if let (Value::Object(map), Some(message)) = (&mut payload, message) {
        map.insert("message".into(), json!(message));
    }
    payload
}

fn active_payload(standing: &ActiveStanding) -> Value {
    json!({
        "ownerId": standing.owner_id,
        "priceId": standing.pricing.price_id,
        "price": standing.pricing.price,
        "period": standing.pricing.interval.map(|i| i.as_str()),
        "type": standing.pricing.plan.as_str(),
        "subscriptionId": standing.subscription_id,
        "email": standing.email,
        "firstName": standing.first_name,
        "clientSecret": standing.client_secret,
        "totalDiskSpace": standing.disk.total_gb,
        "availableDiskSpace": standing.disk.used_gb,
        "usage": usage_fields(&standing.usage),
    })
}

/// Everything the decision function needs, loaded up front.
#[derive(Debug, Clone)]
pub struct LoginSnapshot {
    pub reconciliation: Reconciliation,
    pub usage: UsageFigures,
    pub disk: DiskFigures,
}

fn pricing_from(
    plan: PlanType,
    subscription: Option<&SubscriptionSnapshot>,
    binding_price_id: Option<&str>,
    interval_fallback: Option<BillingInterval>,
) -> PlanPricing {
    match subscription {
        Some(snapshot) => PlanPricing {
            plan,
            price_id: snapshot.price_id.clone(),
            price: snapshot.price_amount_cents.map(format_cents),
            interval: snapshot.interval.or(interval_fallback),
        },
        None => PlanPricing {
            plan,
            price_id: binding_price_id.map(str::to_string),
            price: None,
            interval: interval_fallback,
        },
    }
}

/// The decision function. Deterministic: same snapshot and clock, same
/// decision. Every expected state is a return value, never an error.
pub fn decide(snapshot: &LoginSnapshot, now: OffsetDateTime) -> EntitlementDecision {
    let recon = &snapshot.reconciliation;
    let account = &recon.account;
    let profile = &recon.profile;

    // Registration confirmation pre-empts all other checks.
    if !account.email_confirmed {
        return EntitlementDecision::EmailUnconfirmed {
            owner_id: account.id,
            email: account.email.clone(),
        };
    }

    if profile.plan == PlanType::Trial {
        let standing = TrialStanding {
            owner_id: account.id,
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            period_end: profile.trial_period_end(),
            usage: snapshot.usage,
            disk: snapshot.disk,
        };
        return if profile.trial_period_end() <= now {
            EntitlementDecision::TrialExpired(standing)
        } else {
            EntitlementDecision::TrialActive(standing)
        };
    }

    let provider = recon.binding.as_ref().map(|b| b.provider);
    let binding_price_id = recon.binding.as_ref().map(|b| b.price_id.as_str());

    match provider {
        Some(ProviderKind::Approval) => decide_approval(snapshot),
        // Subscription binding, or nothing bound yet: the subscription
        // provider path is the default.
        _ => decide_subscription(snapshot, binding_price_id),
    }
}

fn decide_subscription(
    snapshot: &LoginSnapshot,
    binding_price_id: Option<&str>,
) -> EntitlementDecision {
    let recon = &snapshot.reconciliation;
    let account = &recon.account;
    let profile = &recon.profile;

    if account.subscription_id.is_none() {
        return EntitlementDecision::NoSubscriptionBound {
            owner_id: account.id,
            email: account.email.clone(),
        };
    }

    let subscription = recon.subscription.as_ref();
    let pricing = pricing_from(
        profile.plan,
        subscription,
        binding_price_id,
        profile.interval,
    );
    let client_secret = subscription.and_then(|s| s.client_secret());

    // QA accounts skip every remaining gate once a subscription id exists.
    if account.test_account {
        return EntitlementDecision::TestAccountBypass(ActiveStanding {
            owner_id: account.id,
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            pricing,
            subscription_id: subscription.map(|s| s.id.clone()),
            client_secret,
            usage: snapshot.usage,
            disk: snapshot.disk,
        });
    }

    if !account.signup_verified {
        return EntitlementDecision::SignupUnverified {
            owner_id: account.id,
            email: account.email.clone(),
        };
    }

    if let Some(setup_status) = subscription.and_then(|s| s.setup_intent_status.as_deref()) {
        if setup_status != "succeeded" {
            return EntitlementDecision::SetupIncomplete {
                owner_id: account.id,
                pricing,
                client_secret,
            };
        }
    }

    if recon.period.status == PeriodStatus::ProviderMissing {
        return EntitlementDecision::ProviderSubscriptionMissing {
            owner_id: account.id,
        };
    }

    if recon.period.status == PeriodStatus::Expired {
        return EntitlementDecision::SubscriptionExpired {
            owner_id: account.id,
            pricing: Some(pricing),
            client_secret,
        };
    }

    // Payment status gate: no binding at all is its own code.
    if recon.binding.is_none() {
        return EntitlementDecision::PaymentStatus {
            owner_id: account.id,
            status: PaymentStatusCode::NoPaymentMethod,
            pricing: Some(pricing),
            client_secret,
        };
    }
    if let Some(status) = subscription
        .and_then(|s| s.payment_status.as_deref())
        .and_then(PaymentStatusCode::from_provider_status)
    {
        return EntitlementDecision::PaymentStatus {
            owner_id: account.id,
            status,
            pricing: Some(pricing),
            client_secret,
        };
    }

    EntitlementDecision::Active(ActiveStanding {
        owner_id: account.id,
        email: account.email.clone(),
        first_name: account.first_name.clone(),
        pricing,
        subscription_id: subscription.map(|s| s.id.clone()),
        client_secret,
        usage: snapshot.usage,
        disk: snapshot.disk,
    })
}

fn decide_approval(snapshot: &LoginSnapshot) -> EntitlementDecision {
    let recon = &snapshot.reconciliation;
    let account = &recon.account;
    let profile = &recon.profile;

    let pricing = PlanPricing {
        plan: profile.plan,
        price_id: recon.binding.as_ref().map(|b| b.price_id.clone()),
        price: recon
            .last_settlement
            .as_ref()
            .map(|s| format_cents(s.amount_cents)),
        interval: profile.interval,
    };

    if !account.signup_verified {
        return EntitlementDecision::SignupUnverified {
            owner_id: account.id,
            email: account.email.clone(),
        };
    }

    match recon.period.status {
        PeriodStatus::Expired => EntitlementDecision::SubscriptionExpired {
            owner_id: account.id,
            pricing: Some(pricing),
            client_secret: None,
        },
        // Nothing settled yet: the pending payment blocks access.
        PeriodStatus::PaymentPending => EntitlementDecision::PaymentStatus {
            owner_id: account.id,
            status: PaymentStatusCode::Processing,
            pricing: Some(pricing),
            client_secret: None,
        },
        _ => EntitlementDecision::Active(ActiveStanding {
            owner_id: account.id,
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            pricing,
            subscription_id: None,
            client_secret: None,
            usage: snapshot.usage,
            disk: snapshot.disk,
        }),
    }
}

/// The login-state resolver service
#[derive(Clone)]
pub struct EntitlementService {
    reconciler: PeriodReconciler,
    usage: UsageLedger,
    accounts: AccountStore,
    audit: AuditLog,
}

impl EntitlementService {
    pub fn new(pool: PgPool, reconciler: PeriodReconciler) -> Self {
        Self {
            reconciler,
            usage: UsageLedger::new(pool.clone()),
            accounts: AccountStore::new(pool.clone()),
            audit: AuditLog::new(pool),
        }
    }

    /// Resolve the login-time decision for an owner.
    pub async fn resolve_login(&self, owner_id: Uuid) -> BillingResult<EntitlementDecision> {
        let snapshot = self.load_snapshot(owner_id).await?;
        let decision = decide(&snapshot, OffsetDateTime::now_utc());
        self.audit_decision(owner_id, &decision).await;
        Ok(decision)
    }

    async fn load_snapshot(&self, owner_id: Uuid) -> BillingResult<LoginSnapshot> {
        let reconciliation = self.reconciler.reconcile(owner_id).await?;
        let ledger = self
            .usage
            .limit_for(owner_id, reconciliation.period.settlement_id)
            .await?;
        let limits = &reconciliation.profile.limits;
        let usage = UsageFigures {
            current_campaigns: ledger.campaigns_used,
            max_campaigns: limits.max_campaigns,
            current_emails: ledger.emails_used,
            max_emails: limits.max_emails,
            current_documents: ledger.documents_used,
            max_documents: limits.max_documents,
        };
        let disk = DiskFigures {
            total_gb: limits.max_storage_gb,
            used_gb: self.accounts.disk_used_gb(owner_id).await?,
        };
        Ok(LoginSnapshot {
            reconciliation,
            usage,
            disk,
        })
    }

    /// Every denied/degraded decision is durably logged with owner and
    /// reason.
    async fn audit_decision(&self, owner_id: Uuid, decision: &EntitlementDecision) {
        let entry = match decision {
            EntitlementDecision::EmailUnconfirmed { .. } => {
                Some((AuditKind::EntitlementDenied, "Registration not confirmed".to_string()))
            }
            EntitlementDecision::TrialExpired(_) => {
                Some((AuditKind::TrialExpired, "Trial period expired".to_string()))
            }
            EntitlementDecision::NoSubscriptionBound { .. } => Some((
                AuditKind::EntitlementDenied,
                "Not subscriptionId in user".to_string(),
            )),
            EntitlementDecision::SignupUnverified { .. } => Some((
                AuditKind::EntitlementDenied,
                "Signup verification not completed".to_string(),
            )),
            EntitlementDecision::SetupIncomplete { .. } => Some((
                AuditKind::PaymentStatus,
                "Payment setup incomplete".to_string(),
            )),
            EntitlementDecision::PaymentStatus { status, .. } => match status {
                PaymentStatusCode::NoPaymentMethod => Some((
                    AuditKind::PaymentStatus,
                    "No payment method in user".to_string(),
                )),
                other => Some((
                    AuditKind::PaymentStatus,
                    format!("User's payment status code {}", other.wire_code()),
                )),
            },
            EntitlementDecision::SubscriptionExpired { .. }
            | EntitlementDecision::ProviderSubscriptionMissing { .. } => Some((
                AuditKind::SubscriptionExpired,
                "Error subscription ended, pay for it".to_string(),
            )),
            EntitlementDecision::TrialActive(_)
            | EntitlementDecision::Active(_)
            | EntitlementDecision::TestAccountBypass(_) => None,
        };

        if let Some((kind, detail)) = entry {
            self.audit.record(Some(owner_id), kind, &detail).await;
        }
    }
}
