//! Extraction strategy registry and fallback algorithm (§4.4).
//!
//! No direct teacher module grounds a strategy registry; built in the
//! teacher's dispatch idiom (`crawl_engine/core.rs`'s `ProgressReporter`
//! trait-object dispatch over named backends).

pub mod cosine_strategy;
pub mod entity;
pub mod llm_strategy;
pub mod rule_strategy;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use std::time::Instant;

pub use entity::{dedup_and_cap, Entity, EntityType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyType {
    Llm,
    RuleBased,
    Cosine,
    Custom,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionContext {
    pub html: String,
    pub markdown: String,
    pub text: String,
    pub url: String,
    pub task_description: Option<String>,
    pub entity_types: Option<Vec<EntityType>>,
}

#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub entities: Vec<Entity>,
    pub success: bool,
    pub confidence: Option<f64>,
    pub strategy: StrategyType,
    pub execution_time_ms: u64,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl ExtractionResult {
    fn failure(strategy: StrategyType, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            entities: Vec::new(),
            success: false,
            confidence: None,
            strategy,
            execution_time_ms,
            error: Some(error.into()),
            metadata: None,
        }
    }
}

pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn strategy_type(&self) -> StrategyType;
    fn is_available(&self) -> bool;
    fn extract<'a>(
        &'a self,
        ctx: &'a ExtractionContext,
    ) -> Pin<Box<dyn Future<Output = ExtractionResult> + Send + 'a>>;
    fn get_config(&self) -> Option<serde_json::Value> {
        None
    }
}

#[derive(Debug, Default, Clone)]
pub struct RegistryStats {
    pub registered: usize,
    pub available: usize,
    pub default_type: Option<StrategyType>,
}

struct Entry {
    strategy: Box<dyn ExtractionStrategy>,
}

/// Strategies keyed by type, with one designated default. Not `Sync` on its
/// own interior mutability because registration happens at startup, then
/// the registry is read-only for the process lifetime — mirrors how the
/// proxy pool and validator cache are wired.
pub struct ExtractionRegistry {
    strategies: RwLock<HashMap<StrategyType, Entry>>,
    default_type: RwLock<Option<StrategyType>>,
}

impl ExtractionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            default_type: RwLock::new(None),
        }
    }

    pub fn register(&self, strategy: Box<dyn ExtractionStrategy>, set_default: bool) {
        let strategy_type = strategy.strategy_type();
        self.strategies.write().unwrap().insert(strategy_type, Entry { strategy });
        if set_default {
            *self.default_type.write().unwrap() = Some(strategy_type);
        }
    }

    pub fn unregister(&self, strategy_type: StrategyType) -> bool {
        let removed = self.strategies.write().unwrap().remove(&strategy_type).is_some();
        let mut default = self.default_type.write().unwrap();
        if *default == Some(strategy_type) {
            *default = None;
        }
        removed
    }

    pub fn get_available(&self) -> Vec<StrategyType> {
        self.strategies
            .read()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.strategy.is_available())
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn get_default_type(&self) -> Option<StrategyType> {
        *self.default_type.read().unwrap()
    }

    /// Rejects setting a type as default when it isn't registered and
    /// available (§4.4 `set_default_type` contract).
    pub fn set_default_type(&self, strategy_type: StrategyType) -> bool {
        let available = self
            .strategies
            .read()
            .unwrap()
            .get(&strategy_type)
            .is_some_and(|e| e.strategy.is_available());
        if available {
            *self.default_type.write().unwrap() = Some(strategy_type);
        }
        available
    }

    pub fn clear(&self) {
        self.strategies.write().unwrap().clear();
        *self.default_type.write().unwrap() = None;
    }

    pub fn get_stats(&self) -> RegistryStats {
        let strategies = self.strategies.read().unwrap();
        RegistryStats {
            registered: strategies.len(),
            available: strategies.values().filter(|e| e.strategy.is_available()).count(),
            default_type: self.get_default_type(),
        }
    }

    /// Run one strategy: `strategy_type` if given, else the registered
    /// default. Errors (not found / unavailable) are reported as a failed
    /// `ExtractionResult` rather than `Err`, matching §4.4's `Result`-typed
    /// contract (no `Err` path — even failure is a structured result).
    pub async fn extract(&self, ctx: &ExtractionContext, strategy_type: Option<StrategyType>) -> ExtractionResult {
        let start = Instant::now();
        let target = strategy_type.or_else(|| self.get_default_type());
        let Some(target) = target else {
            return ExtractionResult::failure(StrategyType::Custom, "no strategy type specified and no default set", elapsed_ms(start));
        };

        let strategies = self.strategies.read().unwrap();
        let Some(entry) = strategies.get(&target) else {
            return ExtractionResult::failure(target, format!("strategy {target:?} not registered"), elapsed_ms(start));
        };
        if !entry.strategy.is_available() {
            return ExtractionResult::failure(target, format!("strategy {target:?} is not available"), elapsed_ms(start));
        }
        entry.strategy.extract(ctx).await
    }

    /// §4.4 fallback algorithm: try each type in `preferred_order` that is
    /// registered and available; return on the first `success=true`.
    /// Otherwise fall through to the remaining available strategies not
    /// already tried. If everything fails, return a failure result typed
    /// `Custom`.
    pub async fn extract_with_fallback(
        &self,
        ctx: &ExtractionContext,
        preferred_order: &[StrategyType],
    ) -> ExtractionResult {
        let start = Instant::now();
        let mut tried = std::collections::HashSet::new();
        let available: Vec<StrategyType> = self.get_available();

        let mut order: Vec<StrategyType> = preferred_order
            .iter()
            .copied()
            .filter(|t| available.contains(t))
            .collect();
        for t in &available {
            if !order.contains(t) {
                order.push(*t);
            }
        }

        let mut last_result: Option<ExtractionResult> = None;
        for strategy_type in order {
            if !tried.insert(strategy_type) {
                continue;
            }
            let result = self.extract(ctx, Some(strategy_type)).await;
            if result.success {
                return result;
            }
            last_result = Some(result);
        }

        last_result.unwrap_or_else(|| {
            ExtractionResult::failure(StrategyType::Custom, "no extraction strategies registered", elapsed_ms(start))
        })
    }
}

impl Default for ExtractionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct AlwaysSucceeds(StrategyType, &'static str);
    impl ExtractionStrategy for AlwaysSucceeds {
        fn name(&self) -> &'static str {
            self.1
        }
        fn strategy_type(&self) -> StrategyType {
            self.0
        }
        fn is_available(&self) -> bool {
            true
        }
        fn extract<'a>(&'a self, _ctx: &'a ExtractionContext) -> Pin<Box<dyn Future<Output = ExtractionResult> + Send + 'a>> {
            let strategy = self.0;
            Box::pin(async move {
                ExtractionResult {
                    entities: vec![Entity::new(EntityType::Company, json!({"name": "Acme"}), 0.9, "test")],
                    success: true,
                    confidence: Some(0.9),
                    strategy,
                    execution_time_ms: 0,
                    error: None,
                    metadata: None,
                }
            })
        }
    }

    struct AlwaysFails(StrategyType);
    impl ExtractionStrategy for AlwaysFails {
        fn name(&self) -> &'static str {
            "always-fails"
        }
        fn strategy_type(&self) -> StrategyType {
            self.0
        }
        fn is_available(&self) -> bool {
            true
        }
        fn extract<'a>(&'a self, _ctx: &'a ExtractionContext) -> Pin<Box<dyn Future<Output = ExtractionResult> + Send + 'a>> {
            let strategy = self.0;
            Box::pin(async move { ExtractionResult::failure(strategy, "boom", 0) })
        }
    }

    struct Unavailable(StrategyType);
    impl ExtractionStrategy for Unavailable {
        fn name(&self) -> &'static str {
            "unavailable"
        }
        fn strategy_type(&self) -> StrategyType {
            self.0
        }
        fn is_available(&self) -> bool {
            false
        }
        fn extract<'a>(&'a self, _ctx: &'a ExtractionContext) -> Pin<Box<dyn Future<Output = ExtractionResult> + Send + 'a>> {
            Box::pin(async move { ExtractionResult::failure(self.0, "unavailable", 0) })
        }
    }

    #[test]
    fn set_default_type_rejects_unavailable() {
        let registry = ExtractionRegistry::new();
        registry.register(Box::new(Unavailable(StrategyType::Llm)), false);
        assert!(!registry.set_default_type(StrategyType::Llm));
        assert_eq!(registry.get_default_type(), None);
    }

    #[tokio::test]
    async fn fallback_returns_first_success() {
        let registry = ExtractionRegistry::new();
        registry.register(Box::new(AlwaysFails(StrategyType::Llm)), false);
        registry.register(Box::new(AlwaysSucceeds(StrategyType::RuleBased, "rule")), false);
        let ctx = ExtractionContext::default();
        let result = registry
            .extract_with_fallback(&ctx, &[StrategyType::Llm, StrategyType::RuleBased])
            .await;
        assert!(result.success);
        assert_eq!(result.strategy, StrategyType::RuleBased);
    }

    #[tokio::test]
    async fn fallback_returns_custom_failure_when_all_fail() {
        let registry = ExtractionRegistry::new();
        registry.register(Box::new(AlwaysFails(StrategyType::Llm)), false);
        let ctx = ExtractionContext::default();
        let result = registry.extract_with_fallback(&ctx, &[StrategyType::Llm]).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn extract_with_no_default_and_no_type_fails() {
        let registry = ExtractionRegistry::new();
        let ctx = ExtractionContext::default();
        let result = registry.extract(&ctx, None).await;
        assert!(!result.success);
    }
}
