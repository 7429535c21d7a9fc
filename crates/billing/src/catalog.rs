//! Price catalog resolution
//!
//! The external catalog encodes promo tiers in product names: a discounted
//! price for tier class `C` is the product named `"C discount"`, except
//! lifetime classes ("... for life") which use the bare class name. The
//! public price list hides both.

use pressroom_shared::BillingInterval;

use crate::client::{PriceInfo, StripeClient};
use crate::error::BillingResult;

/// Whether a tier class is a lifetime grant (no discount suffix convention).
pub fn is_lifetime_class(tier_class: &str) -> bool {
    tier_class.ends_with("for life")
}

/// Product name a tier class resolves to in the external catalog.
pub fn promo_product_name(tier_class: &str) -> String {
    if is_lifetime_class(tier_class) {
        tier_class.to_string()
    } else {
        format!("{tier_class} discount")
    }
}

/// Select the price a promo tier class resolves to from a fetched price list.
pub fn select_promo_price<'a>(prices: &'a [PriceInfo], tier_class: &str) -> Option<&'a PriceInfo> {
    let wanted = promo_product_name(tier_class);
    prices.iter().find(|p| p.product_name == wanted)
}

/// Whether a price belongs on the public pricing page.
pub fn is_public_price(price: &PriceInfo) -> bool {
    !price.product_name.contains("discount") && !price.product_name.contains("for life")
}

/// Catalog queries over the external pricing provider.
#[derive(Clone)]
pub struct PriceCatalog {
    stripe: StripeClient,
}

impl PriceCatalog {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Publicly visible prices (discount and lifetime products filtered out).
    pub async fn public_prices(&self) -> BillingResult<Vec<PriceInfo>> {
        let prices = self.stripe.list_active_prices(None).await?;
        Ok(prices.into_iter().filter(is_public_price).collect())
    }

    /// Candidate prices for a promo tier class at a billing interval.
    pub async fn price_candidates(
        &self,
        tier_class: &str,
        interval: BillingInterval,
    ) -> BillingResult<Option<PriceInfo>> {
        let prices = self.stripe.list_active_prices(Some(interval)).await?;
        Ok(select_promo_price(&prices, tier_class).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(name: &str, interval: BillingInterval) -> PriceInfo {
        PriceInfo {
            id: format!("price_{}", name.replace(' ', "_")),
            product_name: name.to_string(),
            unit_amount_cents: 2500,
            currency: "usd".to_string(),
            interval: Some(interval),
            trial_period_days: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn discount_classes_resolve_to_suffixed_product() {
        let prices = vec![
            price("Premium 25", BillingInterval::Month),
            price("Premium 25 discount", BillingInterval::Month),
        ];
        let selected = select_promo_price(&prices, "Premium 25").unwrap();
        assert_eq!(selected.product_name, "Premium 25 discount");
    }

    #[test]
    fn lifetime_classes_resolve_to_bare_product() {
        let prices = vec![
            price("Start for life", BillingInterval::Month),
            price("Start for life discount", BillingInterval::Month),
        ];
        let selected = select_promo_price(&prices, "Start for life").unwrap();
        assert_eq!(selected.product_name, "Start for life");
    }

    #[test]
    fn missing_discount_product_yields_none() {
        let prices = vec![price("Start", BillingInterval::Month)];
        assert!(select_promo_price(&prices, "Start 25").is_none());
    }

    #[test]
    fn public_listing_hides_discount_and_lifetime_products() {
        assert!(is_public_price(&price("Premium", BillingInterval::Month)));
        assert!(!is_public_price(&price(
            "Premium 25 discount",
            BillingInterval::Month
        )));
        assert!(!is_public_price(&price(
            "Start for life",
            BillingInterval::Month
        )));
    }
}
