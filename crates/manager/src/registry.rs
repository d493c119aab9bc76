use dashmap::DashMap;
use harness_core::strategy::error::StrategyError;
use harness_core::strategy::port::{Strategy, StrategyConstructor};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// 解析策略时依次尝试的命名空间前缀，空串表示原样查找
pub const CANDIDATE_NAMESPACES: [&str; 4] = ["", "strategies", "workers", "builtin"];

/// # Summary
/// 策略注册表：标识 `namespace.module.Class` 到构造函数的映射。
///
/// # Invariants
/// - 同一标识重复注册时后者覆盖前者。
/// - 解析顺序固定为 `CANDIDATE_NAMESPACES`，首个命中者胜出。
#[derive(Default)]
pub struct StrategyRegistry {
    constructors: DashMap<String, StrategyConstructor>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预先注册内置策略的注册表
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::builtin::register_all(&registry);
        registry
    }

    /// # Summary
    /// 以完整标识注册一个策略构造函数。
    ///
    /// # Arguments
    /// * `identifier`: 例如 `builtin.sma.MovingAverageCross`。
    /// * `constructor`: 按参数构造策略实例的闭包。
    pub fn register<F>(&self, identifier: &str, constructor: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Box<dyn Strategy>, StrategyError> + Send + Sync + 'static,
    {
        debug!("Registered strategy [{identifier}]");
        self.constructors
            .insert(identifier.to_string(), Arc::new(constructor));
    }

    /// # Summary
    /// 按模块与类名查找构造函数。
    ///
    /// # Logic
    /// 依次拼接 `CANDIDATE_NAMESPACES` 中的前缀，返回第一个已注册的标识。
    ///
    /// # Returns
    /// 全部未命中时返回 `StrategyError::NotFound`，并附带按顺序搜索过的标识。
    pub fn resolve(&self, module: &str, class: &str) -> Result<StrategyConstructor, StrategyError> {
        let base = if module.is_empty() {
            class.to_string()
        } else {
            format!("{module}.{class}")
        };

        let mut searched = Vec::with_capacity(CANDIDATE_NAMESPACES.len());
        for namespace in CANDIDATE_NAMESPACES {
            let candidate = if namespace.is_empty() {
                base.clone()
            } else {
                format!("{namespace}.{base}")
            };
            if let Some(constructor) = self.constructors.get(&candidate) {
                debug!("Resolved strategy [{base}] as [{candidate}]");
                return Ok(constructor.value().clone());
            }
            searched.push(candidate);
        }

        Err(StrategyError::NotFound {
            identifier: base,
            searched,
        })
    }

    /// 解析并以给定参数构造策略实例
    pub fn create(
        &self,
        module: &str,
        class: &str,
        params: &Map<String, Value>,
    ) -> Result<Box<dyn Strategy>, StrategyError> {
        let constructor = self.resolve(module, class)?;
        constructor(params)
    }

    /// 已注册的全部标识（排序）
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.constructors.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::noop::IdleStrategy;

    #[test]
    fn test_resolve_walks_namespaces_in_order() {
        let registry = StrategyRegistry::new();
        registry.register("workers.demo.Echo", IdleStrategy::create);

        assert!(registry.resolve("demo", "Echo").is_ok());
        assert!(registry.resolve("workers.demo", "Echo").is_ok());
    }

    #[test]
    fn test_not_found_lists_searched_candidates() {
        let registry = StrategyRegistry::with_builtins();
        let err = registry.resolve("missing", "Nope").err();
        assert_eq!(
            err,
            Some(StrategyError::NotFound {
                identifier: "missing.Nope".to_string(),
                searched: vec![
                    "missing.Nope".to_string(),
                    "strategies.missing.Nope".to_string(),
                    "workers.missing.Nope".to_string(),
                    "builtin.missing.Nope".to_string(),
                ],
            })
        );
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = StrategyRegistry::with_builtins();
        assert!(registry.resolve("sma", "MovingAverageCross").is_ok());
        assert!(registry.resolve("noop", "Idle").is_ok());
        assert_eq!(registry.identifiers().len(), 2);
    }
}
