//! 服务实例定义

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RoutingError};

/// 实例状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// 正常接收流量
    #[default]
    Up,
    /// 已下线
    Down,
    /// 已注册但不允许接收流量
    Disallow,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Up => write!(f, "up"),
            InstanceState::Down => write!(f, "down"),
            InstanceState::Disallow => write!(f, "disallow"),
        }
    }
}

impl std::str::FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(InstanceState::Up),
            "down" => Ok(InstanceState::Down),
            "disallow" => Ok(InstanceState::Disallow),
            _ => Err(format!("Unknown instance state: {}", s)),
        }
    }
}

/// 服务实例
///
/// 一个实例的不可变快照。更新时整体替换为同 `id` 的新快照，不做原地修改。
/// 字段名即持久化/传输格式，必须保持不变。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInstance {
    /// 实例 ID，在同一服务内唯一，更新前后保持不变
    pub id: String,

    /// 服务名
    pub name: String,

    /// 版本
    pub version: String,

    /// 状态
    pub state: InstanceState,

    /// 自定义元数据（区域、协议等）
    pub metadata: HashMap<String, String>,

    /// 服务地址列表，形如 `grpc://127.0.0.1:9000?isSecure=false`
    pub endpoints: Vec<String>,
}

impl ServiceInstance {
    /// 创建新的服务实例，自动生成 ID
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), name)
    }

    /// 使用给定 ID 创建服务实例
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: String::new(),
            state: InstanceState::Up,
            metadata: HashMap::new(),
            endpoints: Vec::new(),
        }
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 设置状态
    pub fn with_state(mut self, state: InstanceState) -> Self {
        self.state = state;
        self
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 添加 endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// 是否可以接收流量
    pub fn is_up(&self) -> bool {
        self.state == InstanceState::Up
    }

    /// 校验注册中心写入参数
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RoutingError::invalid_argument("instance name is empty"));
        }
        if self.id.is_empty() {
            return Err(RoutingError::invalid_argument("instance id is empty"));
        }
        if self.is_up() && self.endpoints.is_empty() {
            return Err(RoutingError::invalid_argument(format!(
                "instance {} is up but has no endpoints",
                self.id
            )));
        }
        Ok(())
    }
}

/// 有序的服务实例列表，每次发现变更时整体重新计算
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ServiceInstanceList(Vec<ServiceInstance>);

impl ServiceInstanceList {
    pub fn new(instances: Vec<ServiceInstance>) -> Self {
        Self(instances)
    }

    /// 按 ID 查找实例
    pub fn get(&self, id: &str) -> Option<&ServiceInstance> {
        self.0.iter().find(|inst| inst.id == id)
    }

    pub fn into_inner(self) -> Vec<ServiceInstance> {
        self.0
    }
}

impl Deref for ServiceInstanceList {
    type Target = [ServiceInstance];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<ServiceInstance>> for ServiceInstanceList {
    fn from(instances: Vec<ServiceInstance>) -> Self {
        Self(instances)
    }
}

impl IntoIterator for ServiceInstanceList {
    type Item = ServiceInstance;
    type IntoIter = std::vec::IntoIter<ServiceInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ServiceInstanceList {
    type Item = &'a ServiceInstance;
    type IntoIter = std::slice::Iter<'a, ServiceInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
