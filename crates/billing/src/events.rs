//! Billing audit log
//!
//! Every denied or failed entitlement decision is durably recorded with the
//! owner id and reason. The log is a side channel: a failed write is traced
//! and swallowed, it never alters control flow.

use sqlx::PgPool;
use uuid::Uuid;

/// What kind of event is being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    EntitlementDenied,
    TrialExpired,
    SubscriptionExpired,
    PaymentStatus,
    QuotaDenied,
    PromoRejected,
    ProviderError,
    SettlementRecorded,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::EntitlementDenied => "entitlement_denied",
            AuditKind::TrialExpired => "trial_expired",
            AuditKind::SubscriptionExpired => "subscription_expired",
            AuditKind::PaymentStatus => "payment_status",
            AuditKind::QuotaDenied => "quota_denied",
            AuditKind::PromoRejected => "promo_rejected",
            AuditKind::ProviderError => "provider_error",
            AuditKind::SettlementRecorded => "settlement_recorded",
        }
    }
}

/// Writer for the billing audit log
#[derive(Clone)]
pub struct AuditLog {
    pool: PgPool,
}

impl AuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record an event. Never fails the caller.
    pub async fn record(&self, owner_id: Option<Uuid>, kind: AuditKind, detail: &str) {
        let result = sqlx::query(
            "INSERT INTO billing_audit_log (owner_id, kind, detail) VALUES ($1, $2, $3)",
        )
        .bind(owner_id)
        .bind(kind.as_str())
        .bind(detail)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                owner_id = ?owner_id,
                kind = kind.as_str(),
                detail = detail,
                error = %e,
                "Failed to write billing audit log entry"
            );
        }
    }
}
