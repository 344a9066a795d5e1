//! Core order lifecycle types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Side, Symbol};

/// Order ID type - u64 for performance
pub type OrderId = u64;

/// Atomic counter for fast order ID generation
static ORDER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate next order ID (thread-safe, lock-free)
pub fn next_order_id() -> OrderId {
    ORDER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Why an order exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderReason {
    Grid,
    Dca,
    Tp,
    Sl,
}

impl std::fmt::Display for OrderReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderReason::Grid => write!(f, "GRID"),
            OrderReason::Dca => write!(f, "DCA"),
            OrderReason::Tp => write!(f, "TP"),
            OrderReason::Sl => write!(f, "SL"),
        }
    }
}

/// Order state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Filled,
    Cancelled,
    Rejected,
}

/// A live limit order owned by the lifecycle manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    /// Limit price, already rounded to the symbol tick
    pub price: f64,
    /// Quantity resolved against equity at placement
    pub quantity: f64,
    /// Notional value at placement
    pub value: f64,
    pub placed_at: DateTime<Utc>,
    /// RSI at placement, for reversal cancellation
    pub initial_rsi: Option<f64>,
    pub reason: OrderReason,
    pub tag: String,
    pub status: OrderStatus,
}

impl PendingOrder {
    pub fn is_live(&self) -> bool {
        self.status == OrderStatus::New
    }
}

/// A fill settled against a pending order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub reason: OrderReason,
    pub tag: String,
    pub fill_price: f64,
    pub fill_qty: f64,
    pub fee: f64,
    pub fee_asset: String,
    /// Set on closing sells: gross PnL minus the exit fee
    pub realized_pnl: Option<f64>,
    /// Cumulative realized PnL after this fill
    pub cumulative_pnl: f64,
    pub timestamp: DateTime<Utc>,
}

/// Events reported back by the execution collaborator, drained at the
/// start of each bar
#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    /// The exchange acknowledged the placement
    PlacementAcked { order_id: OrderId },
    /// The exchange rejected the placement; the order leaves the set
    Rejected { order_id: OrderId, reason: String },
    /// A cancellation was confirmed; idempotent if the order is gone
    CancelConfirmed { order_id: OrderId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_generation_monotonic() {
        let id1 = next_order_id();
        let id2 = next_order_id();
        assert!(id2 > id1);
    }

    #[test]
    fn test_order_liveness() {
        let mut order = PendingOrder {
            id: next_order_id(),
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Buy,
            price: 50_000.0,
            quantity: 0.001,
            value: 50.0,
            placed_at: Utc::now(),
            initial_rsi: Some(45.0),
            reason: OrderReason::Grid,
            tag: "grid_buy_1".to_string(),
            status: OrderStatus::New,
        };
        assert!(order.is_live());

        order.status = OrderStatus::Cancelled;
        assert!(!order.is_live());
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(OrderReason::Grid.to_string(), "GRID");
        assert_eq!(OrderReason::Dca.to_string(), "DCA");
        assert_eq!(OrderReason::Tp.to_string(), "TP");
        assert_eq!(OrderReason::Sl.to_string(), "SL");
    }
}
