//! Stripe client wrapper
//!
//! Wraps the async-stripe client with configuration and the handful of calls
//! this engine needs: subscription lifecycle, setup-intent status, and the
//! price catalog. Distills provider objects into plain snapshots so the rest
//! of the engine never touches SDK types.

use std::str::FromStr;

use time::OffsetDateTime;

use pressroom_shared::BillingInterval;
use stripe::{
    CancelSubscription, CreateCustomer, CreateSubscription, CreateSubscriptionItems, Customer,
    CustomerId, Expandable, ListPrices, ListSetupIntents, Price, PriceId, SetupIntent,
    Subscription, SubscriptionId,
};
// Import the payment behavior enum from the subscription module; the 0.39
// crate does not re-export it at the root.
use stripe::generated::billing::subscription::SubscriptionPaymentBehavior;

use crate::error::{BillingError, BillingResult};

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Configuration("STRIPE_SECRET_KEY not set".to_string()))?;
        Ok(Self { secret_key })
    }
}

/// Stripe API client
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: StripeConfig,
}

/// A price from the external catalog, distilled to what the engine needs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PriceInfo {
    pub id: String,
    pub product_name: String,
    pub unit_amount_cents: i64,
    pub currency: String,
    pub interval: Option<BillingInterval>,
    pub trial_period_days: Option<u32>,
    pub metadata: serde_json::Value,
}

impl PriceInfo {
    /// Decimal display string, e.g. 2500 -> "25.00".
    pub fn display_price(&self) -> String {
        format_cents(self.unit_amount_cents)
    }
}

/// A live subscription, distilled from the provider's object plus the
/// customer's most recent setup-intent status.
#[derive(Debug, Clone)]
pub struct SubscriptionSnapshot {
    pub id: String,
    pub status: String,
    pub price_id: Option<String>,
    pub price_amount_cents: Option<i64>,
    pub interval: Option<BillingInterval>,
    pub current_period_end: Option<OffsetDateTime>,
    /// Client secret of the pending setup intent, if one exists.
    pub setup_client_secret: Option<String>,
    /// Client secret of the latest invoice's payment intent, if expanded.
    pub payment_client_secret: Option<String>,
    /// Status of the latest invoice's payment intent.
    pub payment_status: Option<String>,
    /// Status of the customer's most recent setup intent.
    pub setup_intent_status: Option<String>,
}

impl SubscriptionSnapshot {
    /// Secret the UI needs to resume an incomplete payment or setup flow.
    pub fn client_secret(&self) -> Option<String> {
        self.payment_client_secret
            .clone()
            .or_else(|| self.setup_client_secret.clone())
    }
}

/// Result of creating a subscription: the id plus the payment-intent secret
/// the client confirms against.
#[derive(Debug, Clone)]
pub struct CreatedSubscription {
    pub subscription_id: String,
    pub client_secret: Option<String>,
}

fn expanded<T: stripe::Object>(e: &Expandable<T>) -> Option<&T> {
    match e {
        Expandable::Id(_) => None,
        Expandable::Object(obj) => Some(obj.as_ref()),
    }
}

fn interval_of(price: &Price) -> Option<BillingInterval> {
    price
        .recurring
        .as_ref()
        .and_then(|r| BillingInterval::from_str(&r.interval.to_string()).ok())
}

/// Format a cent amount as a decimal string, e.g. 2500 -> "25.00".
pub fn format_cents(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

/// Map a Stripe error onto the engine's taxonomy. Everything the SDK raises
/// is treated as retryable from the caller's perspective; terminal signals
/// like a garbage-collected subscription are detected separately.
fn map_stripe_err(e: stripe::StripeError) -> BillingError {
    BillingError::ProviderTransient(e.to_string())
}

/// A cancelled subscription may be garbage-collected by the provider; the
/// retrieval then fails with a resource-missing error that is functionally
/// an expired subscription, not a fault.
pub fn is_missing_subscription(e: &stripe::StripeError) -> bool {
    let err_str = e.to_string();
    err_str.contains("No such subscription") || err_str.contains("resource_missing")
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self { client, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Create a customer and return its id.
    pub async fn create_customer(&self, email: &str) -> BillingResult<String> {
        let mut params = CreateCustomer::new();
        params.email = Some(email);
        let customer = Customer::create(self.inner(), params)
            .await
            .map_err(map_stripe_err)?;
        Ok(customer.id.to_string())
    }

    /// Create an incomplete subscription at the given price. The returned
    /// client secret is confirmed by the frontend to collect payment.
    pub async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
    ) -> BillingResult<CreatedSubscription> {
        let customer_id = customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::Validation(format!("invalid customer id: {e}")))?;

        let mut params = CreateSubscription::new(customer_id);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(price_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.payment_behavior = Some(SubscriptionPaymentBehavior::DefaultIncomplete);
        params.expand = &["latest_invoice.payment_intent"];

        let subscription = Subscription::create(self.inner(), params)
            .await
            .map_err(map_stripe_err)?;

        let client_secret = subscription
            .latest_invoice
            .as_ref()
            .and_then(expanded)
            .and_then(|invoice| invoice.payment_intent.as_ref())
            .and_then(expanded)
            .and_then(|intent| intent.client_secret.clone());

        Ok(CreatedSubscription {
            subscription_id: subscription.id.to_string(),
            client_secret,
        })
    }

    /// Cancel a subscription. Best-effort callers may ignore the error.
    pub async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()> {
        let sub_id = subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::Validation(format!("invalid subscription id: {e}")))?;
        Subscription::cancel(self.inner(), &sub_id, CancelSubscription::default())
            .await
            .map_err(map_stripe_err)?;
        Ok(())
    }

    /// Retrieve a subscription and distill it. `Ok(None)` means the provider
    /// no longer knows the subscription (expired-equivalent, not an error).
    pub async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionSnapshot>> {
        let sub_id = subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::Validation(format!("invalid subscription id: {e}")))?;

        let subscription = match Subscription::retrieve(
            self.inner(),
            &sub_id,
            &["pending_setup_intent", "latest_invoice.payment_intent"],
        )
        .await
        {
            Ok(sub) => sub,
            Err(e) if is_missing_subscription(&e) => {
                tracing::info!(
                    subscription_id = subscription_id,
                    "Provider no longer knows subscription, treating as expired"
                );
                return Ok(None);
            }
            Err(e) => return Err(map_stripe_err(e)),
        };

        let setup_intent_status = self
            .latest_setup_intent_status(&subscription.customer)
            .await?;

        Ok(Some(distill_subscription(&subscription, setup_intent_status)))
    }

    async fn latest_setup_intent_status(
        &self,
        customer: &Expandable<Customer>,
    ) -> BillingResult<Option<String>> {
        let customer_id = match customer {
            Expandable::Id(id) => id.clone(),
            Expandable::Object(customer) => customer.id.clone(),
        };
        let params = ListSetupIntents {
            customer: Some(customer_id),
            ..Default::default()
        };
        let intents = SetupIntent::list(self.inner(), &params)
            .await
            .map_err(map_stripe_err)?;
        Ok(intents.data.first().map(|i| i.status.to_string()))
    }

    /// List active prices with their products expanded, optionally filtered
    /// to one billing interval.
    pub async fn list_active_prices(
        &self,
        interval: Option<BillingInterval>,
    ) -> BillingResult<Vec<PriceInfo>> {
        let mut params = ListPrices::new();
        params.active = Some(true);
        params.limit = Some(50);
        params.expand = &["data.product"];

        let prices = Price::list(self.inner(), &params)
            .await
            .map_err(map_stripe_err)?;

        let mut out = Vec::new();
        for price in &prices.data {
            if interval.is_some() && interval_of(price) != interval {
                continue;
            }
            if let Some(info) = distill_price(price) {
                out.push(info);
            }
        }
        Ok(out)
    }

    pub async fn price_by_id(&self, price_id: &str) -> BillingResult<PriceInfo> {
        let id = price_id
            .parse::<PriceId>()
            .map_err(|e| BillingError::Validation(format!("invalid price id: {e}")))?;
        let price = Price::retrieve(self.inner(), &id, &["product"])
            .await
            .map_err(map_stripe_err)?;
        distill_price(&price).ok_or_else(|| {
            BillingError::Configuration(format!("price {price_id} has no active product"))
        })
    }
}

fn distill_subscription(
    subscription: &Subscription,
    setup_intent_status: Option<String>,
) -> SubscriptionSnapshot {
    let price = subscription
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref());

    let latest_payment_intent = subscription
        .latest_invoice
        .as_ref()
        .and_then(expanded)
        .and_then(|invoice| invoice.payment_intent.as_ref())
        .and_then(expanded);

    let pending_setup_intent = subscription.pending_setup_intent.as_ref().and_then(expanded);

    SubscriptionSnapshot {
        id: subscription.id.to_string(),
        status: subscription.status.to_string(),
        price_id: price.map(|p| p.id.to_string()),
        price_amount_cents: price.and_then(|p| p.unit_amount),
        interval: price.and_then(interval_of),
        current_period_end: OffsetDateTime::from_unix_timestamp(subscription.current_period_end)
            .ok(),
        setup_client_secret: pending_setup_intent.and_then(|i| i.client_secret.clone()),
        payment_client_secret: latest_payment_intent.and_then(|i| i.client_secret.clone()),
        payment_status: latest_payment_intent.map(|i| i.status.to_string()),
        setup_intent_status,
    }
}

fn distill_price(price: &Price) -> Option<PriceInfo> {
    let product = price.product.as_ref().and_then(expanded)?;
    if product.active == Some(false) {
        return None;
    }
    Some(PriceInfo {
        id: price.id.to_string(),
        product_name: product.name.clone().unwrap_or_default(),
        unit_amount_cents: price.unit_amount.unwrap_or(0),
        currency: price
            .currency
            .map(|c| c.to_string())
            .unwrap_or_else(|| "usd".to_string()),
        interval: interval_of(price),
        trial_period_days: price.recurring.as_ref().and_then(|r| r.trial_period_days),
        metadata: serde_json::to_value(product.metadata.clone()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_cents_pads_fractional_part() {
        assert_eq!(format_cents(2500), "25.00");
        assert_eq!(format_cents(199), "1.99");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(100000), "1000.00");
    }

    #[test]
    fn display_price_uses_cent_formatting() {
        let info = PriceInfo {
            id: "price_x".to_string(),
            product_name: "Premium".to_string(),
            unit_amount_cents: 4900,
            currency: "usd".to_string(),
            interval: Some(BillingInterval::Month),
            trial_period_days: None,
            metadata: serde_json::Value::Null,
        };
        assert_eq!(info.display_price(), "49.00");
    }
}
