use serde::Deserialize;
use std::env;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub mpesa: MpesaConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub tickets: TicketsConfig,
    pub mail: MailConfig,
    pub features: FeatureFlags,
}

/// Секретное значение: никогда не попадает в логи через `Debug`.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: String,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

impl DatabaseConfig {
    /// `memory://` включает хранилище в памяти процесса (локальный запуск без Postgres).
    pub fn is_in_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

// Настройки Redis (кеш необязателен)
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub availability_ttl_seconds: u64,
}

// Настройки JWT
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: Secret,
}

// Настройки платежного шлюза M-Pesa (Daraja)
#[derive(Debug, Clone, Deserialize)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: Secret,
    pub shortcode: String,
    pub passkey: Secret,
    pub transaction_type: String,
    pub callback_url: String,
    pub timeout_seconds: u64,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

// Повторы запросов к шлюзу при недоступности
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

// Настройки выпуска и проверки билетов
#[derive(Debug, Clone, Deserialize)]
pub struct TicketsConfig {
    pub signing_key: Secret,
    pub max_per_order: i32,
    pub stale_pending_minutes: i64,
    pub reconcile_interval_seconds: u64,
}

// Настройки SMTP; без хоста письма только логируются
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub from: String,
}

// Feature flags для включения/выключения функциональности
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    pub enable_payment_simulation: bool,
    pub enable_reconciler: bool,
}

pub const MIN_SIGNING_KEY_LEN: usize = 32;

fn var_or(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = var_or(name, default);
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let signing_key = required("QR_SIGNING_KEY")?;
        if signing_key.len() < MIN_SIGNING_KEY_LEN {
            return Err(ConfigError::Invalid {
                name: "QR_SIGNING_KEY",
                value: format!("<{} bytes>", signing_key.len()),
            });
        }

        let config = Config {
            app: AppConfig {
                host: var_or("HOST", "0.0.0.0"),
                port: parsed("PORT", "8000")?,
                environment: var_or("ENVIRONMENT", "development"),
                rust_log: var_or("RUST_LOG", "ticket_issuance=debug,tower_http=debug"),
                log_format: var_or("LOG_FORMAT", "text"),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parsed("DB_POOL_SIZE", "20")?,
            },
            redis: RedisConfig {
                url: optional("REDIS_URL"),
                availability_ttl_seconds: parsed("AVAILABILITY_CACHE_TTL_SECONDS", "30")?,
            },
            jwt: JwtConfig {
                secret: Secret::new(required("JWT_SECRET")?),
            },
            mpesa: MpesaConfig {
                base_url: var_or("MPESA_BASE_URL", "https://sandbox.safaricom.co.ke"),
                consumer_key: required("MPESA_CONSUMER_KEY")?,
                consumer_secret: Secret::new(required("MPESA_CONSUMER_SECRET")?),
                shortcode: required("MPESA_SHORTCODE")?,
                passkey: Secret::new(required("MPESA_LIPA_NA_MPESA_PASSKEY")?),
                transaction_type: var_or("MPESA_TRANSACTION_TYPE", "CustomerPayBillOnline"),
                callback_url: required("MPESA_CALLBACK_URL")?,
                timeout_seconds: parsed("MPESA_TIMEOUT_SECONDS", "30")?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5")?,
                timeout_seconds: parsed("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60")?,
            },
            retry: RetryConfig {
                max_attempts: parsed("GATEWAY_RETRY_ATTEMPTS", "3")?,
                base_delay_ms: parsed("GATEWAY_RETRY_BASE_DELAY_MS", "500")?,
            },
            tickets: TicketsConfig {
                signing_key: Secret::new(signing_key),
                max_per_order: parsed("MAX_TICKETS_PER_ORDER", "10")?,
                stale_pending_minutes: parsed("STALE_PENDING_MINUTES", "5")?,
                reconcile_interval_seconds: parsed("RECONCILE_INTERVAL_SECONDS", "120")?,
            },
            mail: MailConfig {
                smtp_host: optional("SMTP_HOST"),
                smtp_port: parsed("SMTP_PORT", "587")?,
                username: optional("SMTP_USERNAME"),
                password: optional("SMTP_PASSWORD").map(Secret::new),
                from: var_or("MAIL_FROM", "EventHub <tickets@eventhub.local>"),
            },
            features: FeatureFlags {
                enable_payment_simulation: parsed("ENABLE_PAYMENT_SIMULATION", "false")?,
                enable_reconciler: parsed("ENABLE_RECONCILER", "true")?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Проверки сочетаний настроек, которые нельзя выразить одной переменной.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.is_production() && self.features.enable_payment_simulation {
            return Err(ConfigError::Invalid {
                name: "ENABLE_PAYMENT_SIMULATION",
                value: "true (not allowed in production)".to_string(),
            });
        }
        Ok(())
    }

    /// Симуляция оплаты выдаёт билеты без денег: в production выключена всегда.
    pub fn simulation_allowed(&self) -> bool {
        self.features.enable_payment_simulation && !self.app.is_production()
    }

    /// Конфигурация для тестов и локального запуска без внешних сервисов.
    pub fn for_tests() -> Self {
        Config {
            app: AppConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                environment: "test".to_string(),
                rust_log: "ticket_issuance=debug".to_string(),
                log_format: "text".to_string(),
            },
            database: DatabaseConfig {
                url: "memory://".to_string(),
                pool_size: 1,
            },
            redis: RedisConfig {
                url: None,
                availability_ttl_seconds: 30,
            },
            jwt: JwtConfig {
                secret: Secret::new("test-jwt-secret"),
            },
            mpesa: MpesaConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                consumer_key: "key".to_string(),
                consumer_secret: Secret::new("secret"),
                shortcode: "174379".to_string(),
                passkey: Secret::new("passkey"),
                transaction_type: "CustomerPayBillOnline".to_string(),
                callback_url: "https://example.test/api/payments/mpesa/callback".to_string(),
                timeout_seconds: 5,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                timeout_seconds: 60,
            },
            retry: RetryConfig {
                max_attempts: 2,
                base_delay_ms: 1,
            },
            tickets: TicketsConfig {
                signing_key: Secret::new("test-signing-key-that-is-32-bytes!!"),
                max_per_order: 10,
                stale_pending_minutes: 5,
                reconcile_interval_seconds: 120,
            },
            mail: MailConfig {
                smtp_host: None,
                smtp_port: 587,
                username: None,
                password: None,
                from: "EventHub <tickets@eventhub.local>".to_string(),
            },
            features: FeatureFlags {
                enable_payment_simulation: true,
                enable_reconciler: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_redacted_in_debug_output() {
        let config = Config::for_tests();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("test-signing-key"));
        assert!(!rendered.contains("test-jwt-secret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn production_rejects_payment_simulation() {
        let mut config = Config::for_tests();
        assert!(config.validate().is_ok());
        assert!(config.simulation_allowed());

        config.app.environment = "production".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "ENABLE_PAYMENT_SIMULATION", .. })
        ));
        assert!(!config.simulation_allowed());

        config.features.enable_payment_simulation = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn memory_database_url_is_detected() {
        let config = Config::for_tests();
        assert!(config.database.is_in_memory());
    }
}
