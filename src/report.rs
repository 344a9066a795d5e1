//! Session reporting
//!
//! Append-only CSV logs for one trading session: an orders log (every
//! placement, cancellation, and rejection as a discrete row), a fills log,
//! and an end-of-session summary. The core publishes each lifecycle event
//! exactly once; the reporter only ever appends.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::Writer;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::oms::{OrderFill, OrderStatus, PendingOrder};
use crate::Side;

/// One row in the orders log
#[derive(Debug, Serialize)]
struct OrderRow<'a> {
    timestamp: String,
    session_id: &'a str,
    symbol: &'a str,
    order_id: u64,
    side: &'a str,
    action: &'a str,
    price: f64,
    quantity: f64,
    value: f64,
    status: &'a str,
    reason: String,
    tag: &'a str,
}

/// One row in the fills log
#[derive(Debug, Serialize)]
struct FillRow<'a> {
    timestamp: String,
    session_id: &'a str,
    symbol: &'a str,
    order_id: u64,
    side: &'a str,
    action: &'a str,
    price: f64,
    quantity: f64,
    value: f64,
    fee: f64,
    fee_asset: &'a str,
    realized_pnl: f64,
    cumulative_pnl: f64,
    tag: &'a str,
}

/// End-of-session totals
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub symbol: String,
    pub total_orders: u64,
    pub total_fills: u64,
    pub buy_fills: u64,
    pub sell_fills: u64,
    pub total_cancellations: u64,
    pub total_rejections: u64,
    pub total_volume: f64,
    pub total_fees: f64,
    pub total_pnl: f64,
    pub final_equity: f64,
}

/// CSV writers for one session
pub struct SessionReporter {
    session_id: String,
    symbol: String,
    orders: Writer<File>,
    fills: Writer<File>,
    summary_path: PathBuf,

    total_orders: u64,
    total_fills: u64,
    buy_fills: u64,
    sell_fills: u64,
    total_cancellations: u64,
    total_rejections: u64,
    total_volume: f64,
    total_fees: f64,
}

impl SessionReporter {
    /// Create the session files under `output_dir`
    pub fn new(output_dir: impl AsRef<Path>, session_id: &str, symbol: &str) -> Result<Self> {
        let dir = output_dir.as_ref();
        fs::create_dir_all(dir).context("Failed to create output directory")?;

        let orders_path = dir.join(format!("orders_{}.csv", session_id));
        let fills_path = dir.join(format!("fills_{}.csv", session_id));
        let summary_path = dir.join(format!("summary_{}.csv", session_id));

        Ok(Self {
            session_id: session_id.to_string(),
            symbol: symbol.to_string(),
            orders: Writer::from_path(&orders_path).context("Failed to create orders log")?,
            fills: Writer::from_path(&fills_path).context("Failed to create fills log")?,
            summary_path,
            total_orders: 0,
            total_fills: 0,
            buy_fills: 0,
            sell_fills: 0,
            total_cancellations: 0,
            total_rejections: 0,
            total_volume: 0.0,
            total_fees: 0.0,
        })
    }

    fn order_row(&mut self, order: &PendingOrder, reason: String, now: DateTime<Utc>) -> Result<()> {
        let status = match order.status {
            OrderStatus::New => "NEW",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        };
        let row = OrderRow {
            timestamp: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            session_id: &self.session_id,
            symbol: order.symbol.as_str(),
            order_id: order.id,
            side: match order.side {
                Side::Buy => "BUY",
                Side::Sell => "SELL",
            },
            action: match order.side {
                Side::Buy => "OPEN",
                Side::Sell => "CLOSE",
            },
            price: order.price,
            quantity: order.quantity,
            value: order.value,
            status,
            reason,
            tag: &order.tag,
        };
        self.orders.serialize(row).context("Failed to write order row")?;
        self.orders.flush().context("Failed to flush orders log")?;
        Ok(())
    }

    /// Record a placement
    pub fn log_placed(&mut self, order: &PendingOrder, now: DateTime<Utc>) -> Result<()> {
        self.total_orders += 1;
        self.order_row(order, order.reason.to_string(), now)
    }

    /// Record a cancellation with its reason
    pub fn log_cancelled(
        &mut self,
        order: &PendingOrder,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.total_cancellations += 1;
        self.order_row(order, format!("{} - {}", order.reason, reason), now)
    }

    /// Record an exchange rejection
    pub fn log_rejected(
        &mut self,
        order: &PendingOrder,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.total_rejections += 1;
        self.order_row(order, format!("{} - {}", order.reason, reason), now)
    }

    /// Record a fill
    pub fn log_fill(&mut self, fill: &OrderFill) -> Result<()> {
        self.total_fills += 1;
        match fill.side {
            Side::Buy => self.buy_fills += 1,
            Side::Sell => self.sell_fills += 1,
        }
        let value = fill.fill_price * fill.fill_qty;
        self.total_volume += value;
        self.total_fees += fill.fee;

        let row = FillRow {
            timestamp: fill.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            session_id: &self.session_id,
            symbol: fill.symbol.as_str(),
            order_id: fill.order_id,
            side: match fill.side {
                Side::Buy => "BUY",
                Side::Sell => "SELL",
            },
            action: match fill.side {
                Side::Buy => "OPEN",
                Side::Sell => "CLOSE",
            },
            price: fill.fill_price,
            quantity: fill.fill_qty,
            value,
            fee: fill.fee,
            fee_asset: &fill.fee_asset,
            realized_pnl: fill.realized_pnl.unwrap_or(0.0),
            cumulative_pnl: fill.cumulative_pnl,
            tag: &fill.tag,
        };
        self.fills.serialize(row).context("Failed to write fill row")?;
        self.fills.flush().context("Failed to flush fills log")?;
        Ok(())
    }

    /// Write the session summary and return it
    pub fn finalize(mut self, total_pnl: f64, final_equity: f64) -> Result<SessionSummary> {
        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            symbol: self.symbol.clone(),
            total_orders: self.total_orders,
            total_fills: self.total_fills,
            buy_fills: self.buy_fills,
            sell_fills: self.sell_fills,
            total_cancellations: self.total_cancellations,
            total_rejections: self.total_rejections,
            total_volume: self.total_volume,
            total_fees: self.total_fees,
            total_pnl,
            final_equity,
        };

        let mut writer =
            Writer::from_path(&self.summary_path).context("Failed to create summary file")?;
        writer
            .serialize(&summary)
            .context("Failed to write summary")?;
        writer.flush().context("Failed to flush summary")?;

        self.orders.flush().ok();
        self.fills.flush().ok();
        Ok(summary)
    }
}
