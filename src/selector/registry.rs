//! 选择器构建器注册表
//!
//! 启动时显式创建并填充，之后只读，注入到构建选择器的地方。
//! 名字大小写不敏感。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{Builder, Selector, p2c, random, wrr};
use crate::error::{Result, RoutingError};

#[derive(Clone, Default)]
pub struct BuilderRegistry {
    builders: HashMap<String, Arc<dyn Builder>>,
}

impl BuilderRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置 `p2c`、`random`、`wrr` 三种选择器
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(p2c::builder()));
        registry.register(Arc::new(random::builder()));
        registry.register(Arc::new(wrr::builder()));
        registry
    }

    /// 注册构建器，同名构建器会被替换
    pub fn register(&mut self, builder: Arc<dyn Builder>) {
        let name = builder.name().to_lowercase();
        if self.builders.insert(name.clone(), builder).is_some() {
            debug!(selector = %name, "Selector builder replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Builder>> {
        self.builders.get(&name.to_lowercase()).cloned()
    }

    /// 所有构建器，按名字排序
    pub fn get_all(&self) -> Vec<Arc<dyn Builder>> {
        let mut builders: Vec<_> = self.builders.values().cloned().collect();
        builders.sort_by(|a, b| a.name().to_lowercase().cmp(&b.name().to_lowercase()));
        builders
    }

    /// 按名字构建选择器
    pub fn build(&self, name: &str) -> Result<Arc<dyn Selector>> {
        self.get(name)
            .map(|builder| builder.build())
            .ok_or_else(|| RoutingError::Config(format!("unknown selector: {}", name)))
    }
}

impl fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.builders.keys().collect();
        names.sort();
        f.debug_struct("BuilderRegistry")
            .field("builders", &names)
            .finish()
    }
}
