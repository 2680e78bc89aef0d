use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use strum_macros::EnumString;
use tokio::sync::RwLock;

use crate::{domain::trade::ContractId, error::SwapbookResult};

/// Tax-lot selection method applied when reducing a position.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TaxLotMethod {
    /// Oldest lot first by trade date, ties by insertion order.
    Fifo,
    /// Newest lot first by trade date, ties by reverse insertion order.
    Lifo,
    /// Highest cost basis first, ties by oldest trade date then insertion.
    Hifo,
}

impl Default for TaxLotMethod {
    fn default() -> Self {
        TaxLotMethod::Fifo
    }
}

/// Source of per-contract allocation rules. Pluggable; implementations may
/// call out to a contract service and are free to cache.
#[async_trait]
pub trait ContractRulesProvider: Send + Sync {
    /// Method for a contract. Trades without a contract id get FIFO.
    async fn method_for(&self, contract_id: Option<&ContractId>) -> SwapbookResult<TaxLotMethod>;
}

/// Fixed rule set held in memory. The zero-config default: FIFO everywhere.
#[derive(Debug, Default)]
pub struct StaticRules {
    overrides: HashMap<ContractId, TaxLotMethod>,
}

impl StaticRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, contract_id: ContractId, method: TaxLotMethod) -> Self {
        self.overrides.insert(contract_id, method);
        self
    }
}

#[async_trait]
impl ContractRulesProvider for StaticRules {
    async fn method_for(&self, contract_id: Option<&ContractId>) -> SwapbookResult<TaxLotMethod> {
        Ok(contract_id
            .and_then(|id| self.overrides.get(id).copied())
            .unwrap_or_default())
    }
}

/// Read-through cache around another provider. Contract rules change rarely;
/// the coldpath replays the same contract id once per event otherwise.
pub struct CachingRules<P> {
    inner: P,
    cache: RwLock<HashMap<ContractId, TaxLotMethod>>,
}

impl<P: ContractRulesProvider> CachingRules<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<P: ContractRulesProvider> ContractRulesProvider for CachingRules<P> {
    async fn method_for(&self, contract_id: Option<&ContractId>) -> SwapbookResult<TaxLotMethod> {
        let Some(id) = contract_id else {
            return Ok(TaxLotMethod::default());
        };

        if let Some(method) = self.cache.read().await.get(id) {
            return Ok(*method);
        }

        let method = self.inner.method_for(Some(id)).await?;
        self.cache.write().await.insert(id.clone(), method);
        Ok(method)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_static_rules_default_to_fifo() {
        let rules = StaticRules::new().with_method("C-LIFO".into(), TaxLotMethod::Lifo);

        assert_eq!(rules.method_for(None).await.unwrap(), TaxLotMethod::Fifo);
        assert_eq!(
            rules.method_for(Some(&"C-UNKNOWN".into())).await.unwrap(),
            TaxLotMethod::Fifo
        );
        assert_eq!(
            rules.method_for(Some(&"C-LIFO".into())).await.unwrap(),
            TaxLotMethod::Lifo
        );
    }

    struct CountingRules(AtomicU32);

    #[async_trait]
    impl ContractRulesProvider for CountingRules {
        async fn method_for(
            &self,
            _contract_id: Option<&ContractId>,
        ) -> SwapbookResult<TaxLotMethod> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(TaxLotMethod::Hifo)
        }
    }

    #[tokio::test]
    async fn test_caching_rules_hit_inner_once_per_contract() {
        let caching = CachingRules::new(CountingRules(AtomicU32::new(0)));
        let id: ContractId = "C-1".into();

        for _ in 0..3 {
            assert_eq!(
                caching.method_for(Some(&id)).await.unwrap(),
                TaxLotMethod::Hifo
            );
        }
        assert_eq!(caching.inner.0.load(Ordering::SeqCst), 1);

        // No contract id short-circuits without touching the cache.
        assert_eq!(caching.method_for(None).await.unwrap(), TaxLotMethod::Fifo);
        assert_eq!(caching.inner.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_method_wire_spelling() {
        assert_eq!(TaxLotMethod::Hifo.to_string(), "HIFO");
        assert_eq!("LIFO".parse::<TaxLotMethod>().unwrap(), TaxLotMethod::Lifo);
    }
}
