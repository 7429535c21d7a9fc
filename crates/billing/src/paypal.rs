//! PayPal REST client (the approval-based payment provider)
//!
//! Unlike the subscription provider there is no live object to query later:
//! a payment is created, the user approves it on the provider's site, and
//! the execute call confirms it. Everything the engine needs afterwards is
//! persisted as a settlement record at creation/confirmation time.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{BillingError, BillingResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// PayPal configuration
#[derive(Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub secret: String,
    /// API base, e.g. https://api-m.sandbox.paypal.com
    pub base_url: String,
    /// Where the provider redirects after approval/cancellation.
    pub redirect_base: String,
}

impl PayPalConfig {
    pub fn from_env() -> BillingResult<Self> {
        let client_id = std::env::var("PAYPAL_CLIENT_ID")
            .map_err(|_| BillingError::Configuration("PAYPAL_CLIENT_ID not set".to_string()))?;
        let secret = std::env::var("PAYPAL_SECRET")
            .map_err(|_| BillingError::Configuration("PAYPAL_SECRET not set".to_string()))?;
        let base_url = std::env::var("PAYPAL_API_URL")
            .unwrap_or_else(|_| "https://api-m.sandbox.paypal.com".to_string());
        let redirect_base = std::env::var("PAYPAL_REDIRECT_URL")
            .map_err(|_| BillingError::Configuration("PAYPAL_REDIRECT_URL not set".to_string()))?;
        Ok(Self {
            client_id,
            secret,
            base_url,
            redirect_base,
        })
    }
}

/// A created payment awaiting user approval.
#[derive(Debug, Clone)]
pub struct CreatedPayment {
    pub payment_id: String,
    pub state: String,
    /// URL the user is sent to for approval.
    pub approval_url: Option<String>,
}

/// Outcome of executing an approved payment.
#[derive(Debug, Clone)]
pub struct ExecutedPayment {
    pub payment_id: String,
    pub state: String,
}

impl ExecutedPayment {
    pub fn approved(&self) -> bool {
        self.state == "approved"
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct PaymentLink {
    rel: String,
    href: String,
}

#[derive(Deserialize)]
struct PaymentResponse {
    id: String,
    state: String,
    #[serde(default)]
    links: Vec<PaymentLink>,
}

/// PayPal API client
#[derive(Clone)]
pub struct PayPalClient {
    http: reqwest::Client,
    config: PayPalConfig,
}

fn map_http_err(e: reqwest::Error) -> BillingError {
    BillingError::ProviderTransient(format!("paypal: {e}"))
}

impl PayPalClient {
    pub fn new(config: PayPalConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Configuration(format!("http client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> BillingResult<Self> {
        Self::new(PayPalConfig::from_env()?)
    }

    pub fn config(&self) -> &PayPalConfig {
        &self.config
    }

    async fn access_token(&self) -> BillingResult<String> {
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.config.base_url))
            .basic_auth(&self.config.client_id, Some(&self.config.secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(map_http_err)?;

        if !response.status().is_success() {
            return Err(BillingError::ProviderTransient(format!(
                "paypal token request failed: {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await.map_err(map_http_err)?;
        Ok(token.access_token)
    }

    /// Create a payment for one subscription period. The user must follow
    /// the returned approval URL; the payment stays in `created` until
    /// executed.
    pub async fn create_payment(
        &self,
        amount: &str,
        currency: &str,
    ) -> BillingResult<CreatedPayment> {
        let token = self.access_token().await?;
        let currency = currency.to_uppercase();

        let body = serde_json::json!({
            "intent": "sale",
            "payer": { "payment_method": "paypal" },
            "redirect_urls": {
                "return_url": format!("{}/success", self.config.redirect_base),
                "cancel_url": format!("{}/cancel", self.config.redirect_base),
            },
            "transactions": [{
                "item_list": {
                    "items": [{
                        "name": "Payment subscriptions",
                        "price": amount,
                        "currency": currency,
                        "quantity": 1,
                    }]
                },
                "amount": { "currency": currency, "total": amount },
                "description": "Payment subscriptions",
            }],
        });

        let response = self
            .http
            .post(format!("{}/v1/payments/payment", self.config.base_url))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(map_http_err)?;

        if !response.status().is_success() {
            return Err(BillingError::ProviderTransient(format!(
                "paypal payment create failed: {}",
                response.status()
            )));
        }

        let payment: PaymentResponse = response.json().await.map_err(map_http_err)?;
        let approval_url = payment
            .links
            .iter()
            .find(|l| l.rel == "approval_url")
            .map(|l| l.href.clone());

        Ok(CreatedPayment {
            payment_id: payment.id,
            state: payment.state,
            approval_url,
        })
    }

    /// Execute a payment the user has approved.
    pub async fn execute_payment(
        &self,
        payment_id: &str,
        payer_id: &str,
    ) -> BillingResult<ExecutedPayment> {
        let token = self.access_token().await?;

        let response = self
            .http
            .post(format!(
                "{}/v1/payments/payment/{}/execute",
                self.config.base_url, payment_id
            ))
            .bearer_auth(&token)
            .json(&serde_json::json!({ "payer_id": payer_id }))
            .send()
            .await
            .map_err(map_http_err)?;

        if !response.status().is_success() {
            return Err(BillingError::ProviderTransient(format!(
                "paypal payment execute failed: {}",
                response.status()
            )));
        }

        let payment: PaymentResponse = response.json().await.map_err(map_http_err)?;
        Ok(ExecutedPayment {
            payment_id: payment.id,
            state: payment.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executed_payment_approved_only_on_approved_state() {
        let approved = ExecutedPayment {
            payment_id: "PAY-1".to_string(),
            state: "approved".to_string(),
        };
        let failed = ExecutedPayment {
            payment_id: "PAY-2".to_string(),
            state: "failed".to_string(),
        };
        assert!(approved.approved());
        assert!(!failed.approved());
    }
}
