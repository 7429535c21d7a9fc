//! Application state

use sqlx::PgPool;
use std::sync::Arc;

use pressroom_billing::BillingService;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let billing = BillingService::from_env(pool.clone())?;
        tracing::info!("Billing service initialized");
        Ok(Self {
            pool,
            config,
            billing: Arc::new(billing),
        })
    }
}
