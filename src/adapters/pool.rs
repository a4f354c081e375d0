use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Postgres, Transaction};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::monitoring::{PoolHealth, ProbeError, ResourceMonitor};

/// Connection pool that also counts callers waiting for a connection
#[derive(Clone)]
pub struct InstrumentedPool {
    pool: PgPool,
    waiting: Arc<AtomicUsize>,
}

impl InstrumentedPool {
    /// Connect using the database section of the config
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect(&config.url)
            .await?;

        info!(
            "Connected to PostgreSQL (max {} connections)",
            config.max_connections
        );
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction, counted as waiting until a connection is handed out
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let _waiting = WaitGuard::enter(&self.waiting);
        Ok(self.pool.begin().await?)
    }

    /// Check out a connection, counted as waiting until it is handed out
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>> {
        let _waiting = WaitGuard::enter(&self.waiting);
        Ok(self.pool.acquire().await?)
    }

    pub fn max_connections(&self) -> u32 {
        self.pool.options().get_max_connections()
    }
}

impl PoolHealth for InstrumentedPool {
    fn utilization(&self) -> std::result::Result<f64, ProbeError> {
        let max = self.max_connections();
        if max == 0 {
            return Err(ProbeError::Unavailable("pool has no connections".to_string()));
        }
        let in_use = (self.pool.size() as usize).saturating_sub(self.pool.num_idle());
        Ok(in_use as f64 / max as f64)
    }

    fn waiting(&self) -> std::result::Result<usize, ProbeError> {
        if self.pool.is_closed() {
            return Err(ProbeError::Unavailable("pool closed".to_string()));
        }
        Ok(self.waiting.load(Ordering::SeqCst))
    }
}

impl ResourceMonitor for InstrumentedPool {
    fn utilization(&self) -> std::result::Result<f64, ProbeError> {
        PoolHealth::utilization(self)
    }
}

struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_guard_counts() {
        let counter = AtomicUsize::new(0);
        {
            let _a = WaitGuard::enter(&counter);
            let _b = WaitGuard::enter(&counter);
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lazy_pool_reads_idle() {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect_lazy("postgres://localhost/order_gate")
            .unwrap();
        let pool = InstrumentedPool::from_pool(pool);

        assert_eq!(PoolHealth::utilization(&pool), Ok(0.0));
        assert_eq!(pool.waiting(), Ok(0));
        assert_eq!(pool.max_connections(), 4);
    }
}
