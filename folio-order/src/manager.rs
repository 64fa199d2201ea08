use crate::error::OrderError;
use crate::orchestrator::PaymentOrchestrator;
use crate::policy::OrderPolicy;
use crate::tokens;
use chrono::Utc;
use folio_catalog::{
    CurrencyCode, ExchangeRate, ExchangeRateProvider, PriceBreakdown, Template, TemplateCatalog,
};
use folio_core::order::{NewOrder, NewOrderItem, Order, OrderItem};
use folio_core::payment::{IntentRequest, PaymentIntent};
use folio_core::repository::OrderRepository;
use folio_core::StoreError;
use folio_shared::pii::Masked;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info, warn};

const ORDER_NUMBER_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub customer: CustomerDetails,
    /// Duplicates are allowed and each one becomes its own line item.
    pub template_ids: Vec<i64>,
    /// Display currency; the base currency when absent.
    pub currency: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Everything the client needs to open the checkout
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub intent: PaymentIntent,
    pub key_id: String,
}

/// Creates orders and issues their payment intents.
pub struct OrderManager {
    store: Arc<dyn OrderRepository>,
    catalog: Arc<dyn TemplateCatalog>,
    rates: Arc<dyn ExchangeRateProvider>,
    payments: Arc<PaymentOrchestrator>,
    policy: Arc<OrderPolicy>,
}

impl OrderManager {
    pub fn new(
        store: Arc<dyn OrderRepository>,
        catalog: Arc<dyn TemplateCatalog>,
        rates: Arc<dyn ExchangeRateProvider>,
        payments: Arc<PaymentOrchestrator>,
        policy: Arc<OrderPolicy>,
    ) -> Self {
        Self { store, catalog, rates, payments, policy }
    }

    /// Price, persist and open a payment intent for a new order.
    ///
    /// If the gateway fails the order stays `pending` without an intent and the error is
    /// returned; that order is never offered for payment again.
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<CreatedOrder, OrderError> {
        let customer = normalize_customer(&request.customer)?;
        if request.template_ids.is_empty() {
            return Err(OrderError::Validation("at least one template is required".to_string()));
        }
        let target = match request.currency.as_deref() {
            Some(code) => CurrencyCode::parse(code).map_err(|e| OrderError::Validation(e.to_string()))?,
            None => self.policy.base_currency.clone(),
        };

        let templates = self.resolve_templates(&request.template_ids).await?;
        let items: Vec<NewOrderItem> = templates
            .iter()
            .map(|t| NewOrderItem {
                template_id: t.id,
                template_title: t.title.clone(),
                template_slug: t.slug.clone(),
                template_file_ref: t.file_ref.clone(),
                price_minor: t.price_minor,
            })
            .collect();

        let price = PriceBreakdown::from_prices(items.iter().map(|i| i.price_minor), 0, 0)?;
        let rate = if target == self.policy.base_currency {
            ExchangeRate::IDENTITY
        } else {
            self.rates.rate(&self.policy.base_currency, &target).await?
        };

        let (order, items) = self
            .persist(&customer, &items, &price, &target, rate, &request)
            .await?;

        let mut notes = BTreeMap::new();
        notes.insert("order_id".to_string(), order.id.to_string());
        notes.insert("customer_email".to_string(), order.customer_email.clone());
        let intent_request = IntentRequest {
            amount_minor: order.total_minor,
            currency: order.base_currency.clone(),
            reference: order.order_number.clone(),
            notes,
        };

        let intent = match self.payments.create_intent(&intent_request).await {
            Ok(intent) => intent,
            Err(e) => {
                error!("Payment intent for {} failed: {}", order.order_number, e);
                return Err(e.into());
            }
        };

        let order = match self.store.attach_intent(order.id, &intent.id).await? {
            Some(order) => order,
            None => {
                // swept or otherwise moved on while the gateway call was in flight
                let current = self.store.find_by_id(order.id).await?.map(|o| o.status);
                warn!("Order {} left pending before its intent was attached", order.order_number);
                return Err(OrderError::InvalidStatus {
                    current: current.unwrap_or(order.status),
                    attempted: order.status,
                });
            }
        };

        info!(
            "Order {} created for {}: {} item(s), total {} {}",
            order.order_number,
            Masked(order.customer_email.clone()),
            items.len(),
            order.total_minor,
            order.base_currency
        );

        Ok(CreatedOrder {
            order,
            items,
            intent,
            key_id: self.payments.key_id().to_string(),
        })
    }

    /// Customer-facing lookup
    pub async fn find_order(
        &self,
        order_number: &str,
        email: &str,
    ) -> Result<(Order, Vec<OrderItem>), OrderError> {
        let email = email.trim().to_ascii_lowercase();
        let order = self
            .store
            .find_by_number_and_email(order_number.trim(), &email)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_number.to_string()))?;
        let items = self.store.items_for(order.id).await?;
        Ok((order, items))
    }

    /// One template per requested id, in request order.
    async fn resolve_templates(&self, ids: &[i64]) -> Result<Vec<Template>, OrderError> {
        let resolved = self.catalog.resolve_by_ids(ids).await?;
        if resolved.is_empty() {
            return Err(OrderError::NoTemplatesFound);
        }

        let by_id: HashMap<i64, Template> = resolved.into_iter().map(|t| (t.id, t)).collect();
        let mut missing: Vec<i64> = ids.iter().copied().filter(|id| !by_id.contains_key(id)).collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            missing.dedup();
            return Err(OrderError::InvalidTemplates(missing));
        }

        let mut templates = Vec::with_capacity(ids.len());
        for id in ids {
            let template = &by_id[id];
            if !template.is_sellable() {
                return Err(OrderError::TemplateInactive(*id));
            }
            templates.push(template.clone());
        }
        Ok(templates)
    }

    async fn persist(
        &self,
        customer: &CustomerDetails,
        items: &[NewOrderItem],
        price: &PriceBreakdown,
        target: &CurrencyCode,
        rate: ExchangeRate,
        request: &CreateOrderRequest,
    ) -> Result<(Order, Vec<OrderItem>), OrderError> {
        let mut last_err = None;
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let new_order = NewOrder {
                order_number: tokens::order_number(Utc::now()),
                customer_email: customer.email.clone(),
                customer_name: customer.name.clone(),
                customer_phone: customer.phone.clone(),
                subtotal_minor: price.subtotal(),
                discount_minor: price.discount(),
                tax_minor: price.tax(),
                total_minor: price.total(),
                base_currency: self.policy.base_currency.to_string(),
                currency_code: target.to_string(),
                exchange_rate_micros: rate.micros,
                total_converted_minor: rate.convert(price.total()),
                payment_method: self.policy.payment_method.clone(),
                download_token: tokens::download_token(),
                max_downloads: self.policy.max_downloads,
                ip_address: request.ip_address.clone(),
                user_agent: request.user_agent.clone(),
            };

            match self.store.create_order(&new_order, items).await {
                Ok(created) => return Ok(created),
                Err(StoreError::Duplicate(what)) => {
                    warn!("Order number collision on {}, regenerating", what);
                    last_err = Some(StoreError::Duplicate(what));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .unwrap_or_else(|| StoreError::Backend("order number retries exhausted".to_string()))
            .into())
    }
}

fn normalize_customer(customer: &CustomerDetails) -> Result<CustomerDetails, OrderError> {
    let email = customer.email.trim().to_ascii_lowercase();
    let valid_email = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid_email {
        return Err(OrderError::Validation("a valid email address is required".to_string()));
    }

    let name = customer.name.trim().to_string();
    if name.is_empty() {
        return Err(OrderError::Validation("customer name is required".to_string()));
    }

    let phone = customer
        .phone
        .as_deref()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    Ok(CustomerDetails { email, name, phone })
}
