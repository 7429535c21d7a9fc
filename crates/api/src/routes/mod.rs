//! Route registration

mod auth;
mod billing;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/auth/login-state", post(auth::login_state))
        .route("/billing/payment-method", post(billing::bind_payment_method))
        .route("/billing/prices", get(billing::list_prices))
        .route("/billing/promo/validate", post(billing::validate_promo))
        .route("/billing/promo/reseed", post(billing::reseed_promos))
        .route("/billing/settlements", post(billing::record_settlement))
        .route("/billing/paypal", post(billing::create_paypal_payment))
        .route("/billing/paypal/execute", post(billing::execute_paypal_payment))
        .route("/billing/usage", get(billing::usage_summary))
        .route("/billing/usage/{counter}", post(billing::consume_usage))
        .with_state(state)
}
