// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Pressroom shared types and database plumbing
//!
//! Holds the plan-tier catalog (plan types, billing intervals, quota limits)
//! and the PostgreSQL pool/migration helpers used by every other crate.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{BillingInterval, ParsePlanError, PlanType, QuotaLimits, TRIAL_PERIOD_DAYS};
