//! Plan tiers, billing intervals, and the quota table
//!
//! The quota table is a fixed catalog: (plan type, billing interval) maps to
//! the per-period limits a plan grants. An unknown combination is a
//! configuration bug, not a user error, and is surfaced as `None` here so the
//! billing crate can raise its fatal configuration error.

use serde::{Deserialize, Serialize};

/// Length of the free trial window, anchored at plan-profile creation.
pub const TRIAL_PERIOD_DAYS: i64 = 14;

/// Service level a user is subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanType {
    Trial,
    Start,
    Premium,
    Student,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Trial => "Trial",
            PlanType::Start => "Start",
            PlanType::Premium => "Premium",
            PlanType::Student => "Student",
        }
    }

    /// Whether promo codes can be applied to this plan at all.
    pub fn promo_eligible(&self) -> bool {
        matches!(self, PlanType::Start | PlanType::Premium)
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error parsing a plan type or billing interval from its stored string form.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown value: {0}")]
pub struct ParsePlanError(pub String);

impl std::str::FromStr for PlanType {
    type Err = ParsePlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Trial" => Ok(PlanType::Trial),
            "Start" => Ok(PlanType::Start),
            "Premium" => Ok(PlanType::Premium),
            "Student" => Ok(PlanType::Student),
            other => Err(ParsePlanError(other.to_string())),
        }
    }
}

/// Billing interval of a paid plan. Trial profiles carry no interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Month => "month",
            BillingInterval::Year => "year",
        }
    }

    /// Days one settled period covers before any carry-forward.
    pub fn period_days(&self) -> i64 {
        match self {
            BillingInterval::Month => 30,
            BillingInterval::Year => 364,
        }
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BillingInterval {
    type Err = ParsePlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "month" => Ok(BillingInterval::Month),
            "year" => Ok(BillingInterval::Year),
            other => Err(ParsePlanError(other.to_string())),
        }
    }
}

/// Per-period limits granted by a plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub max_seats: i32,
    pub max_storage_gb: i32,
    pub max_emails: i32,
    pub max_campaigns: i32,
    pub max_documents: i32,
}

impl QuotaLimits {
    /// Fixed catalog lookup. `interval` is ignored for Trial and required for
    /// every paid plan; `None` means the combination is not in the catalog.
    pub fn for_plan(plan: PlanType, interval: Option<BillingInterval>) -> Option<Self> {
        match (plan, interval) {
            (PlanType::Trial, _) => Some(Self {
                max_seats: 1,
                max_storage_gb: 1,
                max_emails: 10_000,
                max_campaigns: 10,
                max_documents: 20,
            }),
            (PlanType::Start | PlanType::Student, Some(BillingInterval::Month)) => Some(Self {
                max_seats: 1,
                max_storage_gb: 1,
                max_emails: 10_000,
                max_campaigns: 10,
                max_documents: 20,
            }),
            (PlanType::Start | PlanType::Student, Some(BillingInterval::Year)) => Some(Self {
                max_seats: 10,
                max_storage_gb: 10,
                max_emails: 100_000,
                max_campaigns: 100,
                max_documents: 200,
            }),
            (PlanType::Premium, Some(BillingInterval::Month)) => Some(Self {
                max_seats: 3,
                max_storage_gb: 3,
                max_emails: 20_000,
                max_campaigns: 20,
                max_documents: 100,
            }),
            (PlanType::Premium, Some(BillingInterval::Year)) => Some(Self {
                max_seats: 30,
                max_storage_gb: 30,
                max_emails: 200_000,
                max_campaigns: 200,
                max_documents: 1_000,
            }),
            (_, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn trial_limits_match_start_monthly() {
        let trial = QuotaLimits::for_plan(PlanType::Trial, None).unwrap();
        let start = QuotaLimits::for_plan(PlanType::Start, Some(BillingInterval::Month)).unwrap();
        assert_eq!(trial, start);
    }

    #[test]
    fn paid_plan_without_interval_is_not_in_catalog() {
        assert!(QuotaLimits::for_plan(PlanType::Premium, None).is_none());
        assert!(QuotaLimits::for_plan(PlanType::Start, None).is_none());
    }

    #[test]
    fn premium_yearly_limits() {
        let limits = QuotaLimits::for_plan(PlanType::Premium, Some(BillingInterval::Year)).unwrap();
        assert_eq!(limits.max_campaigns, 200);
        assert_eq!(limits.max_emails, 200_000);
        assert_eq!(limits.max_documents, 1_000);
        assert_eq!(limits.max_seats, 30);
    }

    #[test]
    fn plan_type_round_trips_through_strings() {
        for plan in [
            PlanType::Trial,
            PlanType::Start,
            PlanType::Premium,
            PlanType::Student,
        ] {
            assert_eq!(PlanType::from_str(plan.as_str()).unwrap(), plan);
        }
        assert!(PlanType::from_str("Enterprise").is_err());
    }

    #[test]
    fn interval_period_days() {
        assert_eq!(BillingInterval::Month.period_days(), 30);
        assert_eq!(BillingInterval::Year.period_days(), 364);
    }

    #[test]
    fn only_start_and_premium_are_promo_eligible() {
        assert!(PlanType::Start.promo_eligible());
        assert!(PlanType::Premium.promo_eligible());
        assert!(!PlanType::Trial.promo_eligible());
        assert!(!PlanType::Student.promo_eligible());
    }
}
