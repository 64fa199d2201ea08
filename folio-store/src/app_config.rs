use serde::Deserialize;
use std::collections::HashMap;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub payment: PaymentConfig,
    pub orders: OrdersConfig,
    #[serde(default)]
    pub currency: CurrencyConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Origins allowed by CORS; empty allows any.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Take the client address from `X-Forwarded-For`. Only enable behind a proxy that
    /// overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_notification_topic")]
    pub notification_topic: String,
}

fn default_notification_topic() -> String { "notifications.email".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HS256 secret for admin bearer tokens.
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_seconds: u64,
}

fn default_api_base() -> String { "https://api.razorpay.com".to_string() }
fn default_gateway_timeout() -> u64 { 10 }

#[derive(Debug, Deserialize, Clone)]
pub struct OrdersConfig {
    pub base_currency: String,
    #[serde(default = "default_max_downloads")]
    pub max_downloads: i32,
    #[serde(default = "default_link_ttl_days")]
    pub link_ttl_days: i64,
    #[serde(default = "default_pending_ttl_minutes")]
    pub pending_ttl_minutes: i64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_seconds: u64,
    pub download_base_url: String,
}

fn default_max_downloads() -> i32 { 3 }
fn default_link_ttl_days() -> i64 { 30 }
fn default_pending_ttl_minutes() -> i64 { 60 }
fn default_sweep_interval() -> u64 { 300 }
fn default_notify_timeout() -> u64 { 5 }

/// Exchange rates from the base currency, in millionths (`USD = 12000` is 0.012).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CurrencyConfig {
    #[serde(default)]
    pub rates: HashMap<String, i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub requests: i64,
    pub window_seconds: i64,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. FOLIO__PAYMENT__KEY_SECRET=...
            .add_source(config::Environment::with_prefix("FOLIO").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_order_settings() {
        let raw = r#"
            [server]
            port = 3000

            [database]
            url = "postgres://localhost/folio"

            [redis]
            url = "redis://localhost"

            [kafka]
            brokers = "localhost:9092"

            [auth]
            jwt_secret = "s"

            [payment]
            key_id = "rzp_test"
            key_secret = "k"
            webhook_secret = "w"

            [orders]
            base_currency = "INR"
            download_base_url = "http://localhost:3000/v1/orders/download"

            [rate_limit]
            requests = 30
            window_seconds = 60
        "#;
        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.orders.max_downloads, 3);
        assert_eq!(cfg.orders.link_ttl_days, 30);
        assert_eq!(cfg.kafka.notification_topic, "notifications.email");
        assert_eq!(cfg.payment.api_base, "https://api.razorpay.com");
        assert_eq!(cfg.database.max_connections, 5);
        assert!(cfg.currency.rates.is_empty());
        assert!(cfg.server.allowed_origins.is_empty());
        assert!(!cfg.server.trust_forwarded_for);
    }
}
