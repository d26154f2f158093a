//! Flare Routing Core Library
//!
//! Client-side request routing: service instance model, registry and discovery
//! contracts, a weighted node selector fed by call outcomes, and a context type
//! whose cancellation and deadline bound each pick-and-call sequence.

pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod instance;
pub mod registry;
pub mod resolver;
pub mod selector;
pub mod telemetry;

// Re-exports
pub use config::{LogConfig, ResolverConfig, RoutingConfig, SelectorConfig};
pub use context::{CancelFunc, Context, ContextError, merge};
pub use error::{ErrorCategory, ErrorCode, Result, RoutingError};
pub use instance::{InstanceState, ServiceInstance, ServiceInstanceList};
pub use registry::{Discovery, MemoryRegistry, Registrar, Watcher};
pub use resolver::{Resolver, Updater};
pub use selector::{
    Builder, BuilderRegistry, DefaultBuilder, DefaultSelector, DoneFunc, DoneInfo, Node,
    NodeFilter, Peer, SelectOptions, Selector,
};
pub use telemetry::init_tracing;
