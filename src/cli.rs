use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::AppConfig;
use crate::domain::{BatchResult, Order, OrderSide, TaskOutcome};
use crate::error::{GateError, Result};
use crate::transport::Acknowledgement;

#[derive(Parser)]
#[command(name = "order-gate")]
#[command(version)]
#[command(about = "Admission control and backpressure for bulk order submission", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml, then $ORDER_GATE_ENV.toml)
    #[arg(short, long, default_value = "config", env = "ORDER_GATE_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load, validate and print the resolved configuration
    CheckConfig,
    /// Apply database migrations
    Migrate,
    /// Push synthetic orders through the gate without an execution service
    DryRun {
        /// Number of orders in the batch
        #[arg(short, long, default_value = "120")]
        orders: usize,
        /// Instrument symbol for every order
        #[arg(short, long, default_value = "BTC-USD")]
        symbol: String,
    },
}

/// Validate and print the effective settings
pub fn check_config(config: &AppConfig) -> Result<()> {
    if let Err(errors) = config.validate() {
        for error in &errors {
            println!("\x1b[31m✗ {}\x1b[0m", error);
        }
        return Err(GateError::Validation(errors.join("; ")));
    }

    println!("\x1b[32m✓ Configuration valid\x1b[0m");
    println!(
        "  executor:  chunk {} | concurrency {} | permit wait {}ms | task wait {}ms",
        config.executor.chunk_size,
        config.executor.max_concurrency,
        config.executor.permit_timeout_ms,
        config.executor.task_timeout_ms
    );
    println!(
        "  breaker:   {} failures | recovery {}ms | critical pool {:.0}%",
        config.circuit_breaker.failure_threshold,
        config.circuit_breaker.recovery_timeout_ms,
        config.circuit_breaker.critical_pool_utilization * 100.0
    );
    println!(
        "  fallback:  bulk {} | individual {} (max {}) | {} retries",
        on_off(config.fallback.bulk_enabled),
        on_off(config.fallback.enabled),
        config.fallback.max_individual_orders,
        config.fallback.retry.max_retries
    );
    match &config.database {
        Some(db) => println!("  database:  {} connections", db.max_connections),
        None => println!("  database:  in-memory store"),
    }
    Ok(())
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Limit orders with ids unique per invocation, alternating sides
pub fn synthetic_orders(count: usize, symbol: &str) -> Vec<Order> {
    let base_id = Utc::now().timestamp_millis() * 1_000;
    (0..count)
        .map(|i| {
            let side = if i % 2 == 0 {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            };
            let price = dec!(100) + Decimal::from(i as u64 % 10);
            Order::limit(base_id + i as i64, 0, symbol, side, dec!(1), price)
        })
        .collect()
}

/// One-line summary plus the first few failures
pub fn print_summary(result: &BatchResult<Acknowledgement>) {
    println!(
        "Submitted {} orders: {} succeeded, {} failed",
        result.len(),
        result.success_count,
        result.failure_count
    );
    for (index, outcome) in result.outcomes.iter().enumerate().take(100) {
        if let TaskOutcome::Failure(reason) = outcome {
            println!("  #{:<4} {}", index, reason);
        }
    }
}
