use serde::Deserialize;
use std::env;

// Container for every runtime setting, loaded once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub redis: RedisConfig,
    pub upstream: UpstreamConfig,
    pub webhook: WebhookConfig,
    pub locks: LockConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// Upstream authoritative ticketing system. An empty base_url disables every
// outbound call (mirrors are skipped, reconciliation refuses to run).
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub bearer_token: Option<String>,
    pub precio_venta: f64,
}

// Downstream consumer of seat-change notifications. An empty url disables
// delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    pub ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8081".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "seat_broker=debug,tower_http=debug".to_string()),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            },
            upstream: UpstreamConfig {
                base_url: env::var("UPSTREAM_BASE_URL").unwrap_or_default(),
                timeout_ms: env::var("UPSTREAM_TIMEOUT_MS")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .expect("UPSTREAM_TIMEOUT_MS must be a valid number"),
                bearer_token: env::var("UPSTREAM_TOKEN").ok().filter(|t| !t.is_empty()),
                precio_venta: env::var("UPSTREAM_PRECIO_VENTA")
                    .unwrap_or_else(|_| "1000.0".to_string())
                    .parse()
                    .expect("UPSTREAM_PRECIO_VENTA must be a valid number"),
            },
            webhook: WebhookConfig {
                url: env::var("WEBHOOK_URL").unwrap_or_default(),
                timeout_ms: env::var("WEBHOOK_TIMEOUT_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .expect("WEBHOOK_TIMEOUT_MS must be a valid number"),
            },
            locks: LockConfig {
                ttl_seconds: env::var("LOCK_TTL_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .expect("LOCK_TTL_SECONDS must be a valid number"),
                sweep_interval_seconds: env::var("LOCK_SWEEP_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .expect("LOCK_SWEEP_INTERVAL_SECONDS must be a valid number"),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be a valid number"),
                timeout_seconds: env::var("CIRCUIT_BREAKER_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_TIMEOUT_SECONDS must be a valid number"),
            },
        }
    }
}
