//! Credit ledger.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{AgentError, Result};

/// Host-owned billing ledger.
///
/// The valid set of pricing keys is host configuration; a key the ledger
/// does not know fails with [`AgentError::UnknownPricingKey`].
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn charge_credits(&self, user_id: i64, key: &str, quantity: i64) -> Result<()>;
}

/// One recorded debit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub user_id: i64,
    pub key: String,
    pub quantity: i64,
    /// `quantity` multiplied by the key's per-unit credit cost
    pub credits: i64,
}

/// In-memory [`Ledger`] keyed by pricing key -> credits per unit.
#[derive(Default)]
pub struct MemoryLedger {
    rates: HashMap<String, i64>,
    charges: Mutex<Vec<Charge>>,
}

impl MemoryLedger {
    pub fn new<I, K>(rates: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        Self {
            rates: rates.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            charges: Mutex::new(Vec::new()),
        }
    }

    /// Every debit so far, in the order it was applied.
    pub async fn charges(&self) -> Vec<Charge> {
        self.charges.lock().await.clone()
    }

    /// Total credits spent by `user_id`.
    pub async fn spent(&self, user_id: i64) -> i64 {
        self.charges
            .lock()
            .await
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.credits)
            .sum()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn charge_credits(&self, user_id: i64, key: &str, quantity: i64) -> Result<()> {
        let rate = self
            .rates
            .get(key)
            .copied()
            .ok_or_else(|| AgentError::UnknownPricingKey(key.to_string()))?;
        if quantity < 0 {
            return Err(AgentError::InvalidQuantity {
                key: key.to_string(),
                quantity,
            });
        }

        let credits = rate.saturating_mul(quantity);
        info!(user_id, key, quantity, credits, "Charging credits");
        self.charges.lock().await.push(Charge {
            user_id,
            key: key.to_string(),
            quantity,
            credits,
        });
        Ok(())
    }
}
