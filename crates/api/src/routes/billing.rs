//! Billing endpoints: payment methods, prices, promo codes, settlements,
//! and quota consumption.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use pressroom_billing::{
    BindOutcome, PromoOutcome, ProviderKind, QuotaDecision, SettlementConfirmation, UsageCounter,
};
use pressroom_shared::BillingInterval;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindRequest {
    pub owner_id: Uuid,
    pub provider: ProviderKind,
    pub price_id: String,
}

/// Bind a payment provider + price. For the subscription provider the
/// response carries the client secret to complete payment setup.
pub async fn bind_payment_method(
    State(state): State<AppState>,
    Json(request): Json<BindRequest>,
) -> ApiResult<Json<BindOutcome>> {
    let outcome = state
        .billing
        .bindings
        .bind(request.owner_id, request.provider, &request.price_id)
        .await?;
    Ok(Json(outcome))
}

/// Publicly visible catalog prices.
pub async fn list_prices(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let prices = state.billing.catalog.public_prices().await?;
    let listing: Vec<Value> = prices
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "title": p.product_name,
                "price": p.display_price(),
                "currency": p.currency,
                "trialPeriod": p.trial_period_days,
                "interval": p.interval.map(|i| i.as_str()),
                "metadata": p.metadata,
            })
        })
        .collect();
    Ok(Json(Value::Array(listing)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoValidateRequest {
    pub owner_id: Uuid,
    pub promo_code: String,
    pub period: BillingInterval,
}

/// Validate a promo code. Rejections come back as `{code: <message>}` in a
/// 200 response; they are expected outcomes, not errors.
pub async fn validate_promo(
    State(state): State<AppState>,
    Json(request): Json<PromoValidateRequest>,
) -> ApiResult<Json<Value>> {
    let outcome = state
        .billing
        .promos
        .validate(request.owner_id, &request.promo_code, request.period)
        .await?;

    let body = match outcome {
        PromoOutcome::Valid { price } => json!({
            "id": price.id,
            "price": price.display_price(),
            "product": {
                "name": price.product_name,
                "metadata": price.metadata,
            },
        }),
        PromoOutcome::Rejected(rejection) => json!({ "code": rejection.message() }),
    };
    Ok(Json(body))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoReseedRequest {
    /// (code, tier class) pairs replacing the current catalog.
    pub codes: Vec<(String, String)>,
}

/// Administrative reseed of the promo-code catalog.
pub async fn reseed_promos(
    State(state): State<AppState>,
    Json(request): Json<PromoReseedRequest>,
) -> ApiResult<Json<Value>> {
    let all = state.billing.promos.reseed(&request.codes).await?;
    let listing: Vec<Value> = all
        .iter()
        .map(|c| json!({ "code": c.code, "type": c.tier_class }))
        .collect();
    Ok(Json(Value::Array(listing)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    pub owner_id: Uuid,
    pub binding_id: Uuid,
    pub subscription_id: Option<String>,
    pub provider_status: String,
    pub provider_payment_id: String,
    pub promo_code: Option<String>,
    pub plan_profile_id: Option<Uuid>,
}

/// Subscription-provider confirmation trigger, invoked by the payment
/// collaborator once the provider reports a payment outcome.
pub async fn record_settlement(
    State(state): State<AppState>,
    Json(request): Json<SettlementRequest>,
) -> ApiResult<Json<Value>> {
    if let Some(subscription_id) = request.subscription_id.as_deref() {
        tracing::debug!(
            owner_id = %request.owner_id,
            subscription_id = subscription_id,
            "Recording settlement confirmation"
        );
    }
    let record = state
        .billing
        .settlements
        .record_confirmation(SettlementConfirmation {
            owner_id: request.owner_id,
            binding_id: request.binding_id,
            provider_status: request.provider_status,
            provider_payment_id: request.provider_payment_id,
            promo_code: request.promo_code,
            plan_profile_id: request.plan_profile_id,
        })
        .await?;
    Ok(Json(serde_json::to_value(record).unwrap_or_default()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayPalCreateRequest {
    pub owner_id: Uuid,
    pub promo_code: Option<String>,
    pub plan_profile_id: Option<Uuid>,
}

/// Start an approval-provider payment; the caller redirects the user to the
/// returned approval URL.
pub async fn create_paypal_payment(
    State(state): State<AppState>,
    Json(request): Json<PayPalCreateRequest>,
) -> ApiResult<Json<Value>> {
    let payment = state
        .billing
        .settlements
        .begin_approval_payment(
            request.owner_id,
            request.promo_code.as_deref(),
            request.plan_profile_id,
        )
        .await?;
    Ok(Json(json!({
        "paymentId": payment.payment_id,
        "state": payment.state,
        "approvalUrl": payment.approval_url,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayPalExecuteRequest {
    pub payment_id: String,
    pub payer_id: String,
}

/// Approval-provider execute callback.
pub async fn execute_paypal_payment(
    State(state): State<AppState>,
    Json(request): Json<PayPalExecuteRequest>,
) -> ApiResult<Json<Value>> {
    let record = state
        .billing
        .settlements
        .execute_approval_payment(&request.payment_id, &request.payer_id)
        .await?;
    Ok(Json(json!({ "success": record.success })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageQuery {
    pub owner_id: Uuid,
}

/// Current counters against plan limits.
pub async fn usage_summary(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> ApiResult<Json<Value>> {
    let profile = state.billing.profiles.require_latest(query.owner_id).await?;
    let ledger = state.billing.usage.summary(query.owner_id).await?;
    Ok(Json(json!({
        "currentCampaigns": ledger.campaigns_used,
        "maxCampaigns": profile.limits.max_campaigns,
        "currentEmails": ledger.emails_used,
        "maxEmails": profile.limits.max_emails,
        "currentDocuments": ledger.documents_used,
        "maxDocuments": profile.limits.max_documents,
        "periodStart": ledger.period_start.to_string(),
        "periodEnd": ledger.period_end.map(|e| e.to_string()),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub owner_id: Uuid,
}

fn parse_counter(raw: &str) -> Option<UsageCounter> {
    match raw {
        "campaigns" => Some(UsageCounter::Campaigns),
        "emails" => Some(UsageCounter::Emails),
        "documents" => Some(UsageCounter::Documents),
        _ => None,
    }
}

/// Check-and-consume one unit of a quota-gated counter. Denials are 400
/// with the fixed per-resource message.
pub async fn consume_usage(
    State(state): State<AppState>,
    Path(counter): Path<String>,
    Json(request): Json<ConsumeRequest>,
) -> ApiResult<Response> {
    let Some(counter) = parse_counter(&counter) else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": format!("Unknown counter: {counter}") })),
        )
            .into_response());
    };

    let profile = state.billing.profiles.require_latest(request.owner_id).await?;
    let limit = match counter {
        UsageCounter::Campaigns => profile.limits.max_campaigns,
        UsageCounter::Emails => profile.limits.max_emails,
        UsageCounter::Documents => profile.limits.max_documents,
    };

    let decision = state
        .billing
        .usage
        .check_and_consume(request.owner_id, counter, limit)
        .await?;

    let response = match decision {
        QuotaDecision::Allowed { current, max } => (
            StatusCode::OK,
            Json(json!({ "current": current, "max": max })),
        )
            .into_response(),
        QuotaDecision::Denied { .. } => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": counter.denial_message() })),
        )
            .into_response(),
    };
    Ok(response)
}
