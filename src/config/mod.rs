//! Process-wide configuration: `AppConfig`, its typestate builder, and
//! environment-variable loading.

pub mod builder;
pub mod types;

pub use builder::{from_env, ConfigBuilder, ConfigError, Unvalidated, Validated};
pub use types::{AppConfig, CacheMode, ProxyRotationStrategy, ValidationStrategyKind};
