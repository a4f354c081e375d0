use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure, resolved once at startup
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub overload: OverloadConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    /// Absent means the in-memory store is used
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverloadConfig {
    /// Executor permit utilization that counts as overload
    pub thread_pool_threshold: f64,
    /// Connection pool utilization that counts as overload
    pub db_pool_threshold: f64,
    /// System memory utilization that counts as overload
    pub memory_threshold: f64,
    /// Active request ratio that counts as overload
    pub request_ratio_threshold: f64,
    /// Lower bound of the suggested retry delay
    pub base_retry_delay_secs: u64,
    /// Upper bound of the suggested retry delay
    pub max_retry_delay_secs: u64,
    /// Consecutive breaching reads required before overload is declared
    pub consecutive_detections: u32,
    /// Denominator of the active request ratio
    pub max_concurrent_requests: usize,
    /// Memory sampling interval; 0 disables the sampler
    pub memory_sample_interval_ms: u64,
}

impl Default for OverloadConfig {
    fn default() -> Self {
        Self {
            thread_pool_threshold: 0.90,
            db_pool_threshold: 0.95,
            memory_threshold: 0.85,
            request_ratio_threshold: 0.90,
            base_retry_delay_secs: 60,
            max_retry_delay_secs: 300,
            consecutive_detections: 1,
            max_concurrent_requests: 100,
            memory_sample_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures needed to open the circuit
    pub failure_threshold: u32,
    /// Quiet period after the last failure before recovery is probed
    pub recovery_timeout_ms: u64,
    /// Pool utilization at or above which the pool is considered unhealthy
    pub critical_pool_utilization: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            critical_pool_utilization: 0.90,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Tasks per sequential chunk
    pub chunk_size: usize,
    /// Pause between chunks
    pub chunk_pause_ms: u64,
    /// Concurrent permits; keep at or below the pool's steady-state capacity
    pub max_concurrency: usize,
    /// Longest wait for a permit
    pub permit_timeout_ms: u64,
    /// Longest wait for a single task
    pub task_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            chunk_pause_ms: 100,
            max_concurrency: 15,
            permit_timeout_ms: 5_000,
            task_timeout_ms: 30_000,
        }
    }
}

impl ExecutorConfig {
    pub fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }

    pub fn permit_timeout(&self) -> Duration {
        Duration::from_millis(self.permit_timeout_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Upper bound for one chunk: a full permit wait followed by a full task wait
    pub fn chunk_timeout(&self) -> Duration {
        self.permit_timeout() + self.task_timeout()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Rows per grouped update statement
    pub chunk_size: usize,
    /// Bound for the whole transactional call
    pub transaction_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            transaction_timeout_ms: 5_000,
        }
    }
}

impl PersistenceConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Allow per-order fallback after the bulk call fails
    pub enabled: bool,
    /// Use the bulk endpoint at all; when false every batch goes per-order
    pub bulk_enabled: bool,
    /// Largest batch eligible for per-order fallback
    pub max_individual_orders: usize,
    /// Bound for each downstream bulk call
    pub call_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bulk_enabled: true,
            max_individual_orders: 10,
            call_timeout_ms: 60_000,
            retry: RetryConfig::default(),
        }
    }
}

impl FallbackConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub trigger_status_codes: BTreeSet<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            trigger_status_codes: [429, 502, 503, 504].into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Longest wait for a pooled connection
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    20
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DryRunConfig {
    /// Acknowledge orders locally instead of calling the execution service
    pub enabled: bool,
    /// Upper bound of simulated per-call latency
    pub max_latency_ms: u64,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_latency_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for daily rolling log files
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("ORDER_GATE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (ORDER_GATE__EXECUTOR__MAX_CONCURRENCY, etc.)
            .add_source(
                Environment::with_prefix("ORDER_GATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let ratios = [
            ("overload.thread_pool_threshold", self.overload.thread_pool_threshold),
            ("overload.db_pool_threshold", self.overload.db_pool_threshold),
            ("overload.memory_threshold", self.overload.memory_threshold),
            ("overload.request_ratio_threshold", self.overload.request_ratio_threshold),
            (
                "circuit_breaker.critical_pool_utilization",
                self.circuit_breaker.critical_pool_utilization,
            ),
        ];
        for (name, value) in ratios {
            if !(value > 0.0 && value <= 1.0) {
                errors.push(format!("{name} must be in (0, 1], got {value}"));
            }
        }

        if self.overload.base_retry_delay_secs > self.overload.max_retry_delay_secs {
            errors.push("overload.base_retry_delay_secs must not exceed max_retry_delay_secs".to_string());
        }
        if self.overload.consecutive_detections == 0 {
            errors.push("overload.consecutive_detections must be at least 1".to_string());
        }
        if self.overload.max_concurrent_requests == 0 {
            errors.push("overload.max_concurrent_requests must be positive".to_string());
        }
        if self.circuit_breaker.failure_threshold == 0 {
            errors.push("circuit_breaker.failure_threshold must be positive".to_string());
        }
        if self.executor.chunk_size == 0 {
            errors.push("executor.chunk_size must be positive".to_string());
        }
        if self.executor.max_concurrency == 0 {
            errors.push("executor.max_concurrency must be positive".to_string());
        }
        if self.persistence.chunk_size == 0 {
            errors.push("persistence.chunk_size must be positive".to_string());
        }
        if self.fallback.retry.multiplier < 1.0 {
            errors.push("fallback.retry.multiplier must be >= 1.0".to_string());
        }

        if let Some(db) = &self.database {
            if self.executor.max_concurrency > db.max_connections as usize {
                errors.push(format!(
                    "executor.max_concurrency ({}) exceeds database.max_connections ({}); \
                     contention would surface as pool exhaustion instead of permit timeouts",
                    self.executor.max_concurrency, db.max_connections
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
