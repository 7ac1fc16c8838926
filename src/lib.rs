/*!
 * Tunegate - Resilient gateway for flaky, quota-limited upstream APIs
 *
 * Wraps every external call in a fallback chain:
 * - Response cache for repeated requests
 * - Token-bucket rate limiting per upstream
 * - Hourly and daily quotas persisted across restarts
 * - Circuit breaking with half-open recovery probes
 * - Rule-based fallbacks and a degraded result that never fails
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod cli_style;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod registry;

// Re-export commonly used types
pub use config::{CacheSettings, GatewayConfig, LogLevel, UpstreamSettings};
pub use error::{Result, TunegateError};
pub use gateway::{ApiGateway, ApiResponse, FallbackLevel, GatewayStats};
pub use registry::{Upstream, UpstreamRegistry};
pub use tunegate_core_resilience as resilience;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
