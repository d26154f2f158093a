use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RoutingError};
use crate::selector::{SelectOptions, filter};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务发现到选择器的适配配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub service_name: String,
    #[serde(default = "default_scheme")]
    pub scheme: String, // grpc, http
    #[serde(default = "default_insecure")]
    pub insecure: bool,
    /// 0 表示不做子集划分
    #[serde(default = "default_subset_size")]
    pub subset_size: usize,
    /// 构造时是否等待第一次成功更新
    #[serde(default)]
    pub block: bool,
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_scheme() -> String {
    "grpc".to_string()
}

fn default_insecure() -> bool {
    true
}

fn default_subset_size() -> usize {
    25
}

fn default_block_timeout_ms() -> u64 {
    10_000
}

fn default_retry_interval_ms() -> u64 {
    1_000
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            scheme: default_scheme(),
            insecure: default_insecure(),
            subset_size: default_subset_size(),
            block: false,
            block_timeout_ms: default_block_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl ResolverConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectorConfig {
    #[serde(default = "default_balancer")]
    pub balancer: String, // p2c, random, wrr
    /// 只选择该版本的节点
    pub version: Option<String>,
}

fn default_balancer() -> String {
    "p2c".to_string()
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            balancer: default_balancer(),
            version: None,
        }
    }
}

impl SelectorConfig {
    /// 由配置生成的选择选项
    pub fn select_options(&self) -> SelectOptions {
        let opts = SelectOptions::new();
        match self.version.as_deref() {
            Some(version) if !version.is_empty() => opts.filter(filter::version(version)),
            _ => opts,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl RoutingConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RoutingError::Config(format!("failed to read {}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RoutingError::Config(e.to_string()))
    }
}
