//! 日志初始化

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;
use crate::error::{Result, RoutingError};

/// 安装全局 tracing subscriber
///
/// `RUST_LOG` 存在时优先于配置中的级别。重复初始化返回配置错误
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| RoutingError::Config(format!("invalid log level {}: {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
    result.map_err(|e| RoutingError::Config(format!("failed to install subscriber: {}", e)))
}
