use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GateError, Result};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
        }
    }
}

/// Order status as stored in the `orders` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order created but not yet submitted
    Pending,
    /// Order handed to the execution service
    Submitted,
    /// Execution service confirmed the order is working
    Accepted,
    /// Order partially filled
    PartiallyFilled,
    /// Order fully filled
    Filled,
    /// Order cancelled
    Cancelled,
    /// Order rejected downstream
    Rejected,
    /// Order failed (internal error)
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Failed
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An order awaiting downstream execution.
///
/// `id` and `version` identify the stored row; `version` is the optimistic
/// concurrency token checked when the resulting status is written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub version: i64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
}

impl Order {
    pub fn limit(id: i64, version: i64, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            id,
            version,
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(price),
        }
    }

    pub fn market(id: i64, version: i64, symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            id,
            version,
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
        }
    }

    /// Structural checks only; business validity belongs to the caller
    pub fn validate(&self) -> Result<()> {
        if self.client_order_id.trim().is_empty() {
            return Err(GateError::Validation(format!(
                "order {} has empty client order id",
                self.id
            )));
        }
        if self.symbol.trim().is_empty() {
            return Err(GateError::Validation(format!("order {} has empty symbol", self.id)));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(GateError::Validation(format!(
                "order {} has non-positive quantity {}",
                self.id, self.quantity
            )));
        }
        if self.order_type == OrderType::Limit && self.limit_price.is_none() {
            return Err(GateError::Validation(format!(
                "limit order {} has no price",
                self.id
            )));
        }
        Ok(())
    }
}

/// A single status transition guarded by the row version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub order_id: i64,
    pub expected_version: i64,
    pub new_status: OrderStatus,
    pub extra: Option<serde_json::Value>,
}

impl StatusUpdate {
    pub fn new(order_id: i64, expected_version: i64, new_status: OrderStatus) -> Self {
        Self {
            order_id,
            expected_version,
            new_status,
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }
}
