use clap::Parser;
use order_gate::adapters::{InstrumentedPool, PgStatusStore};
use order_gate::cli::{self, Cli, Commands};
use order_gate::config::AppConfig;
use order_gate::error::{GateError, Result};
use order_gate::logging::{init_logging, init_logging_simple};
use order_gate::monitoring::PoolHealth;
use order_gate::persistence::{MemoryStore, StatusStore};
use order_gate::services::OrderGate;
use order_gate::transport::DryRunTransport;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    match cli.command {
        Commands::CheckConfig => {
            init_logging_simple();
            cli::check_config(&config)?;
        }
        Commands::Migrate => {
            init_logging_simple();
            let store = connect_store(&config).await?;
            store.migrate().await?;
            println!("\x1b[32m✓ Migrations applied\x1b[0m");
        }
        Commands::DryRun { orders, symbol } => {
            let _guard = init_logging(&config.logging);
            run_dry_run(&config, orders, &symbol).await?;
        }
    }

    Ok(())
}

async fn connect_store(config: &AppConfig) -> Result<PgStatusStore> {
    let db = config
        .database
        .as_ref()
        .ok_or_else(|| GateError::Validation("no [database] section configured".to_string()))?;
    let pool = InstrumentedPool::connect(db).await?;
    Ok(PgStatusStore::new(pool))
}

async fn run_dry_run(config: &AppConfig, count: usize, symbol: &str) -> Result<()> {
    if let Err(errors) = config.validate() {
        return Err(GateError::Validation(errors.join("; ")));
    }
    if !config.dry_run.enabled {
        return Err(GateError::Validation(
            "dry_run.enabled is false and no live transport is configured".to_string(),
        ));
    }

    let (store, pool_health): (Arc<dyn StatusStore>, Option<Arc<dyn PoolHealth>>) =
        match &config.database {
            Some(_) => {
                let store = connect_store(config).await?;
                store.migrate().await?;
                let health: Arc<dyn PoolHealth> = Arc::new(store.pool().clone());
                (Arc::new(store), Some(health))
            }
            None => {
                info!("No database configured, using in-memory store");
                (Arc::new(MemoryStore::new()), None)
            }
        };

    let transport = Arc::new(DryRunTransport::new(&config.dry_run));
    let gate = OrderGate::from_config(config, transport.clone(), Arc::clone(&store), pool_health);
    let sampler = gate.start_memory_sampler();

    let orders = cli::synthetic_orders(count, symbol);
    let registered = store.register(&orders).await?;
    info!("Registered {} pending orders", registered);

    let result = tokio::select! {
        result = gate.submit_batch(orders) => result,
        _ = signal::ctrl_c() => {
            warn!("Interrupted, abandoning submission");
            Err(GateError::Internal("interrupted".to_string()))
        }
    };

    if let Some(handle) = sampler {
        handle.abort();
    }

    match result {
        Ok(result) => {
            cli::print_summary(&result);
            info!(
                "Dry run transport saw {} bulk and {} single calls",
                transport.bulk_calls(),
                transport.single_calls()
            );
            Ok(())
        }
        Err(e) => {
            if let Some(secs) = e.retry_after_secs() {
                println!("Rejected: {} (retry after {}s)", e, secs);
            }
            Err(e)
        }
    }
}
