//! Usage quota ledger
//!
//! One ledger row per (owner, settled period); trial users get a row with no
//! settlement. Counters only ever grow, and a new successful settlement opens
//! a fresh row rather than resetting the old one, so history stays readable.
//!
//! Quota enforcement is a single atomic conditional update at the store:
//! `check_and_consume` increments only while the counter is below the limit
//! and reports denial when zero rows were affected. Two concurrent requests
//! can never push a counter past its limit.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::{AuditKind, AuditLog};

/// Which counter an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageCounter {
    Campaigns,
    Emails,
    Documents,
}

impl UsageCounter {
    fn column(&self) -> &'static str {
        match self {
            UsageCounter::Campaigns => "campaigns_used",
            UsageCounter::Emails => "emails_used",
            UsageCounter::Documents => "documents_used",
        }
    }

    /// Resource name used in the fixed denial message.
    pub fn resource_name(&self) -> &'static str {
        match self {
            UsageCounter::Campaigns => "Campaigns",
            UsageCounter::Emails => "E-mail",
            UsageCounter::Documents => "Document",
        }
    }

    /// The user-facing denial message for this counter.
    pub fn denial_message(&self) -> String {
        format!(
            "{} limits exceeded. Please update the limits in settings.",
            self.resource_name()
        )
    }
}

/// One usage ledger row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UsageLedgerRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub settlement_id: Option<Uuid>,
    pub campaigns_used: i32,
    pub emails_used: i32,
    pub documents_used: i32,
    pub period_start: OffsetDateTime,
    pub period_end: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl UsageLedgerRow {
    pub fn counter(&self, counter: UsageCounter) -> i32 {
        match counter {
            UsageCounter::Campaigns => self.campaigns_used,
            UsageCounter::Emails => self.emails_used,
            UsageCounter::Documents => self.documents_used,
        }
    }
}

/// Outcome of a quota-gated consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed { current: i32, max: i32 },
    Denied { current: i32, max: i32 },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed { .. })
    }
}

const COLUMNS: &str = "id, owner_id, settlement_id, campaigns_used, emails_used, documents_used, \
                       period_start, period_end, created_at";

/// The usage quota ledger store
#[derive(Clone)]
pub struct UsageLedger {
    pool: PgPool,
    audit: AuditLog,
}

impl UsageLedger {
    pub fn new(pool: PgPool) -> Self {
        let audit = AuditLog::new(pool.clone());
        Self { pool, audit }
    }

    /// Open a fresh zeroed row for a settled period. The previous row is
    /// superseded, never mutated.
    pub async fn open_period(
        &self,
        owner_id: Uuid,
        settlement_id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> BillingResult<UsageLedgerRow> {
        let row: UsageLedgerRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO usage_ledger (owner_id, settlement_id, period_start, period_end)
            VALUES ($1, $2, $3, $4)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(owner_id)
        .bind(settlement_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Lookup-or-create. With a settlement id, the row scoped to that
    /// settlement; without one (trial / nothing settled yet), the most recent
    /// row for the owner, creating a zeroed row if none exists.
    pub async fn limit_for(
        &self,
        owner_id: Uuid,
        settlement_id: Option<Uuid>,
    ) -> BillingResult<UsageLedgerRow> {
        if let Some(settlement_id) = settlement_id {
            let existing: Option<UsageLedgerRow> = sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM usage_ledger WHERE settlement_id = $1"
            ))
            .bind(settlement_id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = existing {
                return Ok(row);
            }
        }

        let latest: Option<UsageLedgerRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM usage_ledger WHERE owner_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = latest {
            return Ok(row);
        }

        let row: UsageLedgerRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO usage_ledger (owner_id, settlement_id)
            VALUES ($1, $2)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(owner_id)
        .bind(settlement_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Unconditional atomic increment on the owner's current row.
    pub async fn increment(&self, owner_id: Uuid, counter: UsageCounter) -> BillingResult<()> {
        let column = counter.column();
        sqlx::query(&format!(
            r#"
            UPDATE usage_ledger SET {column} = {column} + 1
            WHERE id = (
                SELECT id FROM usage_ledger
                WHERE owner_id = $1
                ORDER BY created_at DESC
                LIMIT 1
            )
            "#
        ))
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Quota-gated consume: increment the counter only while it is below the
    /// limit, in one statement. Zero rows affected means denied.
    pub async fn check_and_consume(
        &self,
        owner_id: Uuid,
        counter: UsageCounter,
        limit: i32,
    ) -> BillingResult<QuotaDecision> {
        // Ensure a row exists before the conditional update.
        let row = self.limit_for(owner_id, None).await?;

        let column = counter.column();
        let updated: Option<(i32,)> = sqlx::query_as(&format!(
            r#"
            UPDATE usage_ledger SET {column} = {column} + 1
            WHERE id = $1 AND {column} < $2
            RETURNING {column}
            "#
        ))
        .bind(row.id)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some((current,)) => Ok(QuotaDecision::Allowed {
                current,
                max: limit,
            }),
            None => {
                let current = self
                    .limit_for(owner_id, None)
                    .await
                    .map(|r| r.counter(counter))
                    .unwrap_or(limit);
                self.audit
                    .record(
                        Some(owner_id),
                        AuditKind::QuotaDenied,
                        &counter.denial_message(),
                    )
                    .await;
                Ok(QuotaDecision::Denied {
                    current,
                    max: limit,
                })
            }
        }
    }

    /// Current counters for the owner, for the profile/settings payload.
    pub async fn summary(&self, owner_id: Uuid) -> BillingResult<UsageLedgerRow> {
        self.limit_for(owner_id, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_messages_use_fixed_resource_names() {
        assert_eq!(
            UsageCounter::Campaigns.denial_message(),
            "Campaigns limits exceeded. Please update the limits in settings."
        );
        assert_eq!(
            UsageCounter::Emails.denial_message(),
            "E-mail limits exceeded. Please update the limits in settings."
        );
        assert_eq!(
            UsageCounter::Documents.denial_message(),
            "Document limits exceeded. Please update the limits in settings."
        );
    }

    #[test]
    fn quota_decision_reports_allowed() {
        assert!(QuotaDecision::Allowed { current: 10, max: 10 }.is_allowed());
        assert!(!QuotaDecision::Denied { current: 10, max: 10 }.is_allowed());
    }
}
