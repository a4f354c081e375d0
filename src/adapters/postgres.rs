use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use tracing::{debug, info, instrument, warn};

use super::InstrumentedPool;
use crate::domain::{Order, StatusUpdate};
use crate::error::{GateError, Result};
use crate::persistence::{StatusStore, StatusTransaction};

/// Grouped conditional update. Each input row carries its ordinal so the
/// affected count can be attributed back to the input position.
const GROUPED_STATUS_UPDATE: &str = r#"
    UPDATE orders AS o
    SET status = v.new_status,
        extra = COALESCE(v.extra::jsonb, o.extra),
        version = o.version + 1,
        updated_at = NOW()
    FROM UNNEST($1::bigint[], $2::bigint[], $3::text[], $4::text[])
        WITH ORDINALITY AS v(id, expected_version, new_status, extra, ord)
    WHERE o.id = v.id AND o.version = v.expected_version
    RETURNING v.ord
"#;

/// Insert a whole batch as pending rows in one statement; existing ids are skipped
const REGISTER_ORDERS: &str = r#"
    INSERT INTO orders (id, client_order_id, symbol, side, order_type, quantity, limit_price, status, version)
    SELECT v.id, v.client_order_id, v.symbol, v.side, v.order_type, v.quantity, v.limit_price, 'PENDING', v.version
    FROM UNNEST($1::bigint[], $2::text[], $3::text[], $4::text[], $5::text[], $6::numeric[], $7::numeric[], $8::bigint[])
        AS v(id, client_order_id, symbol, side, order_type, quantity, limit_price, version)
    ON CONFLICT (id) DO NOTHING
"#;

/// PostgreSQL order status store
#[derive(Clone)]
pub struct PgStatusStore {
    pool: InstrumentedPool,
}

impl PgStatusStore {
    pub fn new(pool: InstrumentedPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(self.pool.pool()).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &InstrumentedPool {
        &self.pool
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn begin(&self) -> Result<Box<dyn StatusTransaction>> {
        let tx = self.pool.begin().await?;
        debug!("Started status update transaction");
        Ok(Box::new(PgStatusTransaction { tx: Some(tx) }))
    }

    #[instrument(skip_all, fields(orders = orders.len()))]
    async fn register(&self, orders: &[Order]) -> Result<u64> {
        if orders.is_empty() {
            return Ok(0);
        }
        let columns = RegisterColumns::from_orders(orders);
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(REGISTER_ORDERS)
            .bind(&columns.ids)
            .bind(&columns.client_order_ids)
            .bind(&columns.symbols)
            .bind(&columns.sides)
            .bind(&columns.order_types)
            .bind(&columns.quantities)
            .bind(&columns.limit_prices)
            .bind(&columns.versions)
            .execute(&mut *conn)
            .await?;
        debug!("Registered {} of {} orders", result.rows_affected(), orders.len());
        Ok(result.rows_affected())
    }
}

/// Orders split into one array per column for [`REGISTER_ORDERS`]
#[derive(Debug, Default, PartialEq)]
struct RegisterColumns {
    ids: Vec<i64>,
    client_order_ids: Vec<String>,
    symbols: Vec<String>,
    sides: Vec<String>,
    order_types: Vec<String>,
    quantities: Vec<Decimal>,
    limit_prices: Vec<Option<Decimal>>,
    versions: Vec<i64>,
}

impl RegisterColumns {
    fn from_orders(orders: &[Order]) -> Self {
        let mut columns = Self::default();
        for order in orders {
            columns.ids.push(order.id);
            columns.client_order_ids.push(order.client_order_id.clone());
            columns.symbols.push(order.symbol.clone());
            columns.sides.push(order.side.to_string());
            columns.order_types.push(order.order_type.as_str().to_string());
            columns.quantities.push(order.quantity);
            columns.limit_prices.push(order.limit_price);
            columns.versions.push(order.version);
        }
        columns
    }
}

/// Rolled back by sqlx if dropped without commit
pub struct PgStatusTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStatusTransaction {
    fn executor(&mut self) -> Result<&mut sqlx::PgConnection> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(GateError::Internal("transaction already finished".to_string())),
        }
    }
}

#[async_trait]
impl StatusTransaction for PgStatusTransaction {
    async fn apply_chunk(&mut self, updates: &[StatusUpdate]) -> Result<Vec<u64>> {
        let ids: Vec<i64> = updates.iter().map(|u| u.order_id).collect();
        let versions: Vec<i64> = updates.iter().map(|u| u.expected_version).collect();
        let statuses: Vec<String> = updates
            .iter()
            .map(|u| u.new_status.as_str().to_string())
            .collect();
        let extras: Vec<Option<String>> = updates
            .iter()
            .map(|u| u.extra.as_ref().map(|v| v.to_string()))
            .collect();

        let ordinals: Vec<i64> = sqlx::query_scalar(GROUPED_STATUS_UPDATE)
            .bind(&ids)
            .bind(&versions)
            .bind(&statuses)
            .bind(&extras)
            .fetch_all(self.executor()?)
            .await?;

        let mut counts = vec![0u64; updates.len()];
        for ord in ordinals {
            match usize::try_from(ord - 1).ok().and_then(|i| counts.get_mut(i)) {
                Some(count) => *count += 1,
                None => {
                    return Err(GateError::Internal(format!(
                        "update returned ordinal {} outside 1..={}",
                        ord,
                        updates.len()
                    )))
                }
            }
        }
        Ok(counts)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
            debug!("Committed status update transaction");
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
            warn!("Rolled back status update transaction");
        }
        Ok(())
    }
}
