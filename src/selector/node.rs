//! 负载均衡节点

use std::collections::HashMap;

use crate::instance::ServiceInstance;

/// 初始权重所在的元数据键
pub const WEIGHT_METADATA_KEY: &str = "weight";

/// 负载均衡节点：一个实例的一个 endpoint
///
/// 构造后不可变，实例变化时生成新的节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    scheme: String,
    address: String,
    service_name: String,
    version: String,
    metadata: HashMap<String, String>,
    initial_weight: Option<i64>,
}

impl Node {
    /// 创建新的节点
    pub fn new(scheme: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            address: address.into(),
            service_name: String::new(),
            version: String::new(),
            metadata: HashMap::new(),
            initial_weight: None,
        }
    }

    /// 从服务实例创建节点，初始权重取元数据中的 `weight`
    pub fn from_instance(
        scheme: impl Into<String>,
        address: impl Into<String>,
        instance: &ServiceInstance,
    ) -> Self {
        let initial_weight = instance
            .metadata
            .get(WEIGHT_METADATA_KEY)
            .and_then(|w| w.parse::<i64>().ok());
        Self {
            scheme: scheme.into(),
            address: address.into(),
            service_name: instance.name.clone(),
            version: instance.version.clone(),
            metadata: instance.metadata.clone(),
            initial_weight,
        }
    }

    /// 设置服务名
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 设置初始权重
    pub fn with_initial_weight(mut self, weight: i64) -> Self {
        self.initial_weight = Some(weight);
        self
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// 初始权重；`None` 表示由策略使用默认值
    pub fn initial_weight(&self) -> Option<i64> {
        self.initial_weight
    }
}
