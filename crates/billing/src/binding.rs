//! Payment method bindings
//!
//! A binding records which provider and which price the user selected.
//! Bindings are append-only for auditing; the current binding is the most
//! recent row per owner.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::accounts::AccountStore;
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Which payment provider a binding settles through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Recurring-subscription provider (Stripe).
    Subscription,
    /// One-time-approval provider (PayPal).
    Approval,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Subscription => "subscription",
            ProviderKind::Approval => "approval",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = crate::error::BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(ProviderKind::Subscription),
            "approval" => Ok(ProviderKind::Approval),
            other => Err(BillingError::Configuration(format!(
                "unknown payment provider: {other}"
            ))),
        }
    }
}

/// One payment-method binding row
#[derive(Debug, Clone)]
pub struct Binding {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub provider: ProviderKind,
    pub price_id: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct BindingRow {
    id: Uuid,
    owner_id: Uuid,
    provider: String,
    price_id: String,
    created_at: OffsetDateTime,
}

impl BindingRow {
    fn into_binding(self) -> BillingResult<Binding> {
        Ok(Binding {
            id: self.id,
            owner_id: self.owner_id,
            provider: self.provider.parse()?,
            price_id: self.price_id,
            created_at: self.created_at,
        })
    }
}

/// Result of binding a payment method.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BindOutcome {
    pub binding_id: Uuid,
    /// Client secret to resume/complete payment setup; only for the
    /// subscription provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Clone)]
pub struct BindingService {
    pool: PgPool,
    stripe: StripeClient,
    accounts: AccountStore,
}

impl BindingService {
    pub fn new(pool: PgPool, stripe: StripeClient) -> Self {
        let accounts = AccountStore::new(pool.clone());
        Self {
            pool,
            stripe,
            accounts,
        }
    }

    /// Bind a provider + price for the owner.
    ///
    /// Always inserts a new binding row (history is preserved). For the
    /// subscription provider, a live subscription at the current price is
    /// reused: its client secret is returned instead of creating a duplicate
    /// subscription, so a client retry cannot double-charge.
    pub async fn bind(
        &self,
        owner_id: Uuid,
        provider: ProviderKind,
        price_id: &str,
    ) -> BillingResult<BindOutcome> {
        let row: BindingRow = sqlx::query_as(
            r#"
            INSERT INTO payment_bindings (owner_id, provider, price_id)
            VALUES ($1, $2, $3)
            RETURNING id, owner_id, provider, price_id, created_at
            "#,
        )
        .bind(owner_id)
        .bind(provider.as_str())
        .bind(price_id)
        .fetch_one(&self.pool)
        .await?;
        let binding = row.into_binding()?;

        match provider {
            ProviderKind::Approval => Ok(BindOutcome {
                binding_id: binding.id,
                client_secret: None,
            }),
            ProviderKind::Subscription => {
                let client_secret = self
                    .subscription_client_secret(owner_id, price_id)
                    .await?;
                Ok(BindOutcome {
                    binding_id: binding.id,
                    client_secret: Some(client_secret),
                })
            }
        }
    }

    /// Reuse the live subscription's secret, or replace a dead one.
    async fn subscription_client_secret(
        &self,
        owner_id: Uuid,
        price_id: &str,
    ) -> BillingResult<String> {
        let account = self.accounts.get(owner_id).await?;
        let now = OffsetDateTime::now_utc();

        if let Some(existing_id) = account.subscription_id.as_deref() {
            if let Some(snapshot) = self.stripe.fetch_subscription(existing_id).await? {
                let live = snapshot
                    .current_period_end
                    .map(|end| end > now)
                    .unwrap_or(false);
                if live {
                    if let Some(secret) = snapshot.client_secret() {
                        return Ok(secret);
                    }
                }
                // Expired or secret-less: replace it.
                if let Err(e) = self.stripe.cancel_subscription(existing_id).await {
                    tracing::warn!(
                        owner_id = %owner_id,
                        subscription_id = existing_id,
                        error = %e,
                        "Failed to cancel stale subscription before rebinding"
                    );
                }
            }
        }

        let customer_id = match account.customer_id {
            Some(id) => id,
            None => {
                let id = self.stripe.create_customer(&account.email).await?;
                self.accounts.set_customer_id(owner_id, &id).await?;
                id
            }
        };

        let created = self.stripe.create_subscription(&customer_id, price_id).await?;
        self.accounts
            .set_subscription_id(owner_id, &created.subscription_id)
            .await?;

        created.client_secret.ok_or_else(|| {
            BillingError::ProviderTransient(
                "created subscription carried no client secret".to_string(),
            )
        })
    }

    /// The current binding: most recent row by creation time.
    pub async fn current_binding(&self, owner_id: Uuid) -> BillingResult<Option<Binding>> {
        let row: Option<BindingRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, provider, price_id, created_at
            FROM payment_bindings
            WHERE owner_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BindingRow::into_binding).transpose()
    }

    pub async fn by_id(&self, owner_id: Uuid, binding_id: Uuid) -> BillingResult<Binding> {
        let row: Option<BindingRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, provider, price_id, created_at
            FROM payment_bindings
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(binding_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| BillingError::not_found(owner_id, "payment method"))?
            .into_binding()
    }
}
