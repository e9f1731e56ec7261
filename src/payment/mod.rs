//! Payment negotiation (agent side)
//!
//! An agent declares the cost of a turn by emitting a
//! [`UsagePaymentRequest`]. Declaring a cost never implies refusing the
//! work: under [`PaymentPolicy::DeliverRegardless`] the artifact goes out
//! in the same turn and the host reconciles billing on its own; under
//! [`PaymentPolicy::WithholdUntilPaid`] the agent waits for a later request
//! carrying `paid = true`.
//!
//! Emitting a payment request gets no synchronous answer. The `paid` flag
//! on a later [`AgentRequest`] is the only settlement signal an agent sees.
//! Content that was already delivered is never retracted.

use std::collections::HashMap;

use tracing::debug;

use crate::config::PricingConfig;
use crate::error::Result;
use crate::proto::{AgentRequest, UsagePaymentRequest};
use crate::session::Emitter;

pub use crate::config::PaymentPolicy;

/// Pricing key -> quantity charged per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceList {
    prices: HashMap<String, i64>,
}

impl PriceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a price list from the `pricing.prices` config section.
    ///
    /// Negative quantities are rejected.
    pub fn from_config(config: &PricingConfig) -> Result<Self> {
        let mut list = Self::new();
        for (key, quantity) in &config.prices {
            list = list.with_price(key, *quantity)?;
        }
        Ok(list)
    }

    /// Adds or replaces a price (builder pattern).
    pub fn with_price(mut self, key: &str, quantity: i64) -> Result<Self> {
        UsagePaymentRequest::new(key, quantity).validate()?;
        self.prices.insert(key.to_string(), quantity);
        Ok(self)
    }

    pub fn price(&self, key: &str) -> Option<i64> {
        self.prices.get(key).copied()
    }

    /// Pricing keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.prices.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// What an agent should do about one priced operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentDecision {
    /// Cost to declare in this turn, if any
    pub charge: Option<UsagePaymentRequest>,
    /// Whether the artifact may be delivered in this turn
    pub deliver: bool,
}

impl PaymentDecision {
    /// Nothing to charge, deliver now.
    pub fn free() -> Self {
        Self {
            charge: None,
            deliver: true,
        }
    }

    pub fn is_withheld(&self) -> bool {
        !self.deliver
    }
}

/// Applies a [`PaymentPolicy`] to a [`PriceList`].
#[derive(Debug, Clone, Default)]
pub struct PaymentGate {
    prices: PriceList,
    policy: PaymentPolicy,
}

impl PaymentGate {
    pub fn new(prices: PriceList, policy: PaymentPolicy) -> Self {
        Self { prices, policy }
    }

    pub fn from_config(config: &PricingConfig) -> Result<Self> {
        Ok(Self::new(PriceList::from_config(config)?, config.policy))
    }

    pub fn policy(&self) -> PaymentPolicy {
        self.policy
    }

    pub fn prices(&self) -> &PriceList {
        &self.prices
    }

    /// Decides whether to charge for and deliver the operation `key`.
    ///
    /// Unpriced keys are free. A zero price yields an informational
    /// request that never withholds delivery. Under `WithholdUntilPaid` a
    /// paid request is delivered without a second charge.
    ///
    /// # Example
    /// ```
    /// use anyagent::payment::{PaymentGate, PaymentPolicy, PriceList};
    /// use anyagent::proto::{AgentRequest, TelegramMessage};
    ///
    /// let prices = PriceList::new().with_price("text", 5).unwrap();
    /// let gate = PaymentGate::new(prices, PaymentPolicy::WithholdUntilPaid);
    /// let request = AgentRequest::message(TelegramMessage::text("hi"));
    ///
    /// let decision = gate.assess(&request, "text");
    /// assert_eq!(decision.charge.map(|c| c.quantity), Some(5));
    /// assert!(!decision.deliver);
    ///
    /// let decision = gate.assess(&request.with_paid(true), "text");
    /// assert!(decision.charge.is_none() && decision.deliver);
    /// ```
    pub fn assess(&self, request: &AgentRequest, key: &str) -> PaymentDecision {
        let Some(quantity) = self.prices.price(key) else {
            return PaymentDecision::free();
        };
        let charge = UsagePaymentRequest::new(key, quantity);

        if charge.is_informational() {
            return PaymentDecision {
                charge: Some(charge),
                deliver: true,
            };
        }

        match self.policy {
            PaymentPolicy::DeliverRegardless => PaymentDecision {
                charge: Some(charge),
                deliver: true,
            },
            PaymentPolicy::WithholdUntilPaid if request.is_paid() => PaymentDecision::free(),
            PaymentPolicy::WithholdUntilPaid => PaymentDecision {
                charge: Some(charge),
                deliver: false,
            },
        }
    }

    /// Assesses `key`, emits the resulting charge, and reports whether the
    /// caller may deliver.
    pub async fn settle(
        &self,
        request: &AgentRequest,
        key: &str,
        emitter: &Emitter,
    ) -> Result<bool> {
        let decision = self.assess(request, key);
        if let Some(charge) = decision.charge {
            debug!(key = %charge.key, quantity = charge.quantity, policy = ?self.policy, "Declaring cost");
            emitter.request_payment(&charge.key, charge.quantity).await?;
        }
        Ok(decision.deliver)
    }
}
