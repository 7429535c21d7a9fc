//! Billing errors
//!
//! Business outcomes (trial expired, quota denied, promo rejected) are enum
//! results on the operations that produce them, never errors. Only
//! configuration bugs, missing records, bad input, and infrastructure
//! failures surface here.

use thiserror::Error;
use uuid::Uuid;

/// Billing errors
#[derive(Error, Debug)]
pub enum BillingError {
    /// Broken catalog/config data (unknown plan-interval combination,
    /// missing provider credentials). Fatal, maps to 500.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required record is missing. Always carries the owner for audit.
    #[error("{what} not found for owner {owner_id}")]
    NotFound { owner_id: Uuid, what: &'static str },

    /// Malformed input (bad promo/interval combination, bad ids).
    #[error("validation error: {0}")]
    Validation(String),

    /// Network/timeout talking to an external payment provider. Retryable;
    /// must surface as 5xx, never be downgraded to a business state.
    #[error("provider error: {0}")]
    ProviderTransient(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BillingError {
    pub fn not_found(owner_id: Uuid, what: &'static str) -> Self {
        Self::NotFound { owner_id, what }
    }

    /// Owner the error pertains to, when known. Used for audit logging.
    pub fn owner_id(&self) -> Option<Uuid> {
        match self {
            Self::NotFound { owner_id, .. } => Some(*owner_id),
            _ => None,
        }
    }

    /// Whether the caller may safely retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderTransient(_))
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
